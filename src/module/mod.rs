//! Modules: single-threaded actors fed by a mailbox.
//!
//! A [`ModuleHandle`] is the cloneable, thread-safe face of one module. Any
//! task or thread may post into it; only the module's own loop touches its
//! handler tables, agents, components and timers. Before the module starts,
//! that state is parked in the handle and mutated inline; afterwards every
//! mutation travels through the mailbox as a loop task.
//!
//! # Await RPC precondition
//!
//! `await_rpc_call` and its variants wait for the target loop to answer. A
//! handler must never await a call into the module it is running on: the loop
//! would wait on itself. Post a fire-and-forget `rpc_call` instead.

mod component;
mod context;
mod event;
mod pool;
mod recovery;
mod runtime;
mod stats;

pub use component::{Agent, Component, ComponentKind, ComponentManager};
pub use context::ModuleContext;
pub use event::{
    ComponentEvent, LoopTask, ModuleEvent, MsgHandler, RpcHandler, SessionEvent, TimerHandler,
};
pub use recovery::{install_panic_hook, with_recovery};
pub use stats::ModuleStats;

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::debug;

use crate::codec::{RpcPacket, Value};
use crate::timer::TimerId;
use crate::types::{Error, ModuleId, ProtoTypeId, Result, RuntimeConfig};
use component::Attached;
use context::ModuleState;
use pool::{ArgsKind, EventPools};
use stats::ModuleCounters;

/// State and receiver parked in the handle until the loop takes them.
struct Pending {
    state: ModuleState,
    rx: mpsc::UnboundedReceiver<ModuleEvent>,
}

struct ModuleShared {
    id: ModuleId,
    name: String,
    tx: mpsc::UnboundedSender<ModuleEvent>,
    pending: Mutex<Option<Pending>>,
    cancel: CancellationToken,
    stopped: CancellationToken,
    pools: EventPools,
    counters: ModuleCounters,
    config: RuntimeConfig,
}

/// Cloneable handle to one module.
#[derive(Clone)]
pub struct ModuleHandle {
    inner: Arc<ModuleShared>,
}

impl ModuleHandle {
    pub(crate) fn new(name: impl Into<String>, config: RuntimeConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let pools = EventPools::new(config.args_pool_capacity);
        Self {
            inner: Arc::new(ModuleShared {
                id: ModuleId::generate(),
                name: name.into(),
                tx,
                pending: Mutex::new(Some(Pending {
                    state: ModuleState::new(),
                    rx,
                })),
                cancel: CancellationToken::new(),
                stopped: CancellationToken::new(),
                pools,
                counters: ModuleCounters::new(),
                config,
            }),
        }
    }

    pub fn id(&self) -> ModuleId {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// True once the loop is running or has run.
    pub fn is_started(&self) -> bool {
        self.inner.counters.started_at().is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    pub fn stats(&self) -> ModuleStats {
        self.inner.counters.snapshot()
    }

    /// Enqueue any event. Never blocks; fails only once the module is closed.
    pub fn push_event(&self, event: ModuleEvent) -> Result<()> {
        if self.inner.cancel.is_cancelled() {
            return Err(self.closed_error());
        }
        self.inner.tx.send(event).map_err(|_| self.closed_error())
    }

    /// Deliver a decoded protocol message from `sender`.
    pub fn post_message<P>(
        &self,
        sender: Option<Arc<dyn Agent>>,
        type_id: ProtoTypeId,
        payload: P,
    ) -> Result<()>
    where
        P: Any + Send,
    {
        self.push_event(ModuleEvent::Message {
            sender,
            type_id,
            payload: Box::new(payload),
        })
    }

    pub fn post_session(&self, event: SessionEvent) -> Result<()> {
        self.push_event(ModuleEvent::Session(event))
    }

    pub fn post_component(&self, event: ComponentEvent) -> Result<()> {
        self.push_event(ModuleEvent::Component(event))
    }

    /// Fire-and-forget call. A missing handler is logged and dropped at
    /// dispatch time, not reported here.
    pub fn rpc_call<I>(&self, name: impl Into<String>, args: I) -> Result<()>
    where
        I: IntoIterator<Item = Value>,
    {
        let mut buf = self.inner.pools.acquire(ArgsKind::Rpc);
        buf.extend(args);
        self.push_event(ModuleEvent::Rpc {
            name: name.into(),
            args: buf,
        })
    }

    /// Call `name` on this module's loop and wait for its results.
    ///
    /// Must not be awaited from a handler running on this same module.
    pub async fn await_rpc_call<I>(&self, name: impl Into<String>, args: I) -> Result<Vec<Value>>
    where
        I: IntoIterator<Item = Value>,
    {
        let rx = self.send_await_rpc(name.into(), args)?;
        rx.await.map_err(|_| self.closed_error())?
    }

    /// [`await_rpc_call`](Self::await_rpc_call) bounded by `limit`.
    pub async fn await_rpc_call_within<I>(
        &self,
        name: impl Into<String>,
        args: I,
        limit: Duration,
    ) -> Result<Vec<Value>>
    where
        I: IntoIterator<Item = Value>,
    {
        let name = name.into();
        let rx = self.send_await_rpc(name.clone(), args)?;
        match tokio::time::timeout(limit, rx).await {
            Ok(reply) => reply.map_err(|_| self.closed_error())?,
            Err(_) => Err(Error::timeout(format!(
                "rpc '{}' on module '{}' did not answer within {:?}",
                name, self.inner.name, limit
            ))),
        }
    }

    /// [`await_rpc_call_within`](Self::await_rpc_call_within) using the
    /// configured `await_timeout`.
    pub async fn await_rpc_call_bounded<I>(
        &self,
        name: impl Into<String>,
        args: I,
    ) -> Result<Vec<Value>>
    where
        I: IntoIterator<Item = Value>,
    {
        let limit = self.inner.config.await_timeout;
        self.await_rpc_call_within(name, args, limit).await
    }

    /// Blocking variant for plain OS threads. Panics if called from inside
    /// an async runtime thread, like any blocking receive.
    pub fn blocking_await_rpc_call<I>(&self, name: impl Into<String>, args: I) -> Result<Vec<Value>>
    where
        I: IntoIterator<Item = Value>,
    {
        let rx = self.send_await_rpc(name.into(), args)?;
        rx.blocking_recv().map_err(|_| self.closed_error())?
    }

    /// Decode an RPC packet received from the network and enqueue it.
    pub fn deliver_rpc_packet(&self, bytes: &[u8]) -> Result<()> {
        let packet = RpcPacket::decode(bytes)?;
        self.rpc_call(packet.name, packet.args)
    }

    pub fn register_handler<F>(&self, type_id: ProtoTypeId, handler: F) -> Result<()>
    where
        F: Fn(&mut ModuleContext<'_>, &(dyn Any + Send)) + Send + Sync + 'static,
    {
        self.run_or_post(Box::new(move |ctx: &mut ModuleContext<'_>| {
            ctx.register_handler(type_id, handler)
        }))
    }

    pub fn register_rpc_handler<F>(&self, name: impl Into<String>, handler: F) -> Result<()>
    where
        F: Fn(&mut ModuleContext<'_>, &[Value]) -> Vec<Value> + Send + Sync + 'static,
    {
        let name = name.into();
        self.run_or_post(Box::new(move |ctx: &mut ModuleContext<'_>| {
            ctx.register_rpc_handler(name, handler)
        }))
    }

    /// Attach a component whose lifecycle events go to `manager`. A component
    /// attached to a running module is started right away.
    pub fn add_component(
        &self,
        component: Arc<dyn Component>,
        manager: Arc<dyn ComponentManager>,
    ) -> Result<()> {
        self.run_or_post(Box::new(move |ctx: &mut ModuleContext<'_>| {
            let id = component.id();
            let attached = Attached { component, manager };
            let running = ctx.state_mut().running;
            ctx.state_mut().components.insert(id, attached.clone());
            if running {
                runtime::start_component(ctx, &attached);
            }
        }))
    }

    /// Schedule `handler` on this module's loop after `delay_ms`.
    pub async fn add_timer<F>(&self, delay_ms: u64, handler: F, args: Vec<Value>) -> Result<TimerId>
    where
        F: Fn(&mut ModuleContext<'_>, &[Value]) + Send + Sync + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let handler: TimerHandler = Arc::new(handler);
        self.run_or_post(Box::new(move |ctx: &mut ModuleContext<'_>| {
            let _ = tx.send(ctx.add_timer_handler(delay_ms, handler, args));
        }))?;
        rx.await.map_err(|_| self.closed_error())?
    }

    /// Cancel a pending timer. `Ok(false)` when it already fired.
    pub async fn remove_timer(&self, id: TimerId) -> Result<bool> {
        let (tx, rx) = oneshot::channel();
        self.run_or_post(Box::new(move |ctx: &mut ModuleContext<'_>| {
            let _ = tx.send(ctx.remove_timer(id));
        }))?;
        rx.await.map_err(|_| self.closed_error())
    }

    /// Signal the loop to stop. A module that never started drops its
    /// queued events, failing any awaiting callers.
    pub fn close(&self) {
        self.inner.cancel.cancel();
        if self.lock_pending().take().is_some() {
            debug!(module = %self.inner.name, "module closed before start");
            self.inner.stopped.cancel();
        }
    }

    /// Resolves once the loop has exited, or immediately for a module closed
    /// before it started.
    pub async fn stopped(&self) {
        self.inner.stopped.cancelled().await
    }

    /// Spawn the loop on `tracker`. Starting a running module is a no-op.
    pub(crate) fn start(&self, tracker: &TaskTracker, active: &Arc<AtomicUsize>) -> Result<()> {
        if self.inner.cancel.is_cancelled() {
            return Err(Error::state_transition(format!(
                "module '{}' is closed",
                self.inner.name
            )));
        }
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(Error::config(format!(
                "module '{}' must be started inside a tokio runtime",
                self.inner.name
            )));
        }
        let Some(pending) = self.lock_pending().take() else {
            return Ok(());
        };
        active.fetch_add(1, Ordering::SeqCst);
        let module = self.clone();
        let active = Arc::clone(active);
        tracker.spawn(async move {
            module.clone().run_loop(pending.state, pending.rx).await;
            active.fetch_sub(1, Ordering::SeqCst);
            module.mark_stopped();
        });
        Ok(())
    }

    /// Run `task` against the parked state, or post it to the running loop.
    fn run_or_post(&self, task: LoopTask) -> Result<()> {
        let mut guard = self.lock_pending();
        match guard.as_mut() {
            Some(pending) => {
                let mut ctx = ModuleContext::new(self, &mut pending.state, None, None);
                task(&mut ctx);
                Ok(())
            }
            None => {
                drop(guard);
                self.push_event(ModuleEvent::Invoke(task))
            }
        }
    }

    fn send_await_rpc<I>(
        &self,
        name: String,
        args: I,
    ) -> Result<oneshot::Receiver<Result<Vec<Value>>>>
    where
        I: IntoIterator<Item = Value>,
    {
        let (reply, rx) = oneshot::channel();
        let mut buf = self.inner.pools.acquire(ArgsKind::AwaitRpc);
        buf.extend(args);
        self.push_event(ModuleEvent::AwaitRpc {
            name,
            args: buf,
            reply,
        })?;
        Ok(rx)
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, Option<Pending>> {
        self.inner
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn closed_error(&self) -> Error {
        Error::mailbox_closed(format!("module '{}'", self.inner.name))
    }

    pub(crate) fn shared_config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    pub(crate) fn pools(&self) -> &EventPools {
        &self.inner.pools
    }

    pub(crate) fn counters(&self) -> &ModuleCounters {
        &self.inner.counters
    }

    pub(crate) fn cancel_token(&self) -> &CancellationToken {
        &self.inner.cancel
    }

    fn mark_stopped(&self) {
        self.inner.stopped.cancel();
    }
}

impl fmt::Debug for ModuleHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleHandle")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("closed", &self.is_closed())
            .finish()
    }
}
