//! The view a handler gets of the module it runs on.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::component::{Agent, Attached};
use super::event::{MsgHandler, RpcHandler, TimerHandler, TimerTask};
use super::ModuleHandle;
use crate::codec::Value;
use crate::timer::{now_ms, TimerId, TimerManager};
use crate::types::{AgentId, ComponentId, ModuleId, ProtoTypeId, Result};

/// State owned by one module and touched only from its loop (or before start).
pub(crate) struct ModuleState {
    pub(crate) msg_handlers: HashMap<ProtoTypeId, MsgHandler>,
    pub(crate) rpc_handlers: HashMap<String, RpcHandler>,
    pub(crate) agents: HashMap<AgentId, Arc<dyn Agent>>,
    pub(crate) components: HashMap<ComponentId, Attached>,
    pub(crate) timers: TimerManager<TimerTask>,
    pub(crate) locals: HashMap<u32, Box<dyn Any + Send>>,
    pub(crate) running: bool,
}

impl ModuleState {
    pub(crate) fn new() -> Self {
        Self {
            msg_handlers: HashMap::new(),
            rpc_handlers: HashMap::new(),
            agents: HashMap::new(),
            components: HashMap::new(),
            timers: TimerManager::new(now_ms()),
            locals: HashMap::new(),
            running: false,
        }
    }
}

impl fmt::Debug for ModuleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleState")
            .field("msg_handlers", &self.msg_handlers.len())
            .field("rpc_handlers", &self.rpc_handlers.len())
            .field("agents", &self.agents.len())
            .field("components", &self.components.len())
            .field("timers", &self.timers.len())
            .field("running", &self.running)
            .finish()
    }
}

/// Passed to every handler invocation.
///
/// Everything reachable through the context belongs to the current module and
/// may be mutated freely: the loop runs one handler at a time.
pub struct ModuleContext<'a> {
    module: &'a ModuleHandle,
    state: &'a mut ModuleState,
    sender: Option<Arc<dyn Agent>>,
    component: Option<ComponentId>,
}

impl<'a> ModuleContext<'a> {
    pub(crate) fn new(
        module: &'a ModuleHandle,
        state: &'a mut ModuleState,
        sender: Option<Arc<dyn Agent>>,
        component: Option<ComponentId>,
    ) -> Self {
        Self {
            module,
            state,
            sender,
            component,
        }
    }

    /// Handle to the module this handler runs on, for posting back into it.
    pub fn module(&self) -> &ModuleHandle {
        self.module
    }

    pub fn id(&self) -> ModuleId {
        self.module.id()
    }

    pub fn name(&self) -> &str {
        self.module.name()
    }

    /// Agent that sent the message being handled, if any.
    pub fn sender(&self) -> Option<&Arc<dyn Agent>> {
        self.sender.as_ref()
    }

    /// Component that raised the event being handled, if any.
    pub fn component(&self) -> Option<ComponentId> {
        self.component
    }

    /// Schedule `handler` to run on this module's loop after `delay_ms`.
    pub fn add_timer<F>(&mut self, delay_ms: u64, handler: F, args: Vec<Value>) -> Result<TimerId>
    where
        F: Fn(&mut ModuleContext<'_>, &[Value]) + Send + Sync + 'static,
    {
        self.add_timer_handler(delay_ms, Arc::new(handler), args)
    }

    pub(crate) fn add_timer_handler(
        &mut self,
        delay_ms: u64,
        handler: TimerHandler,
        args: Vec<Value>,
    ) -> Result<TimerId> {
        self.state
            .timers
            .add_timer(now_ms(), delay_ms, TimerTask { handler, args })
    }

    /// Cancel a pending timer; `false` if it already fired or never existed.
    pub fn remove_timer(&mut self, id: TimerId) -> bool {
        self.state.timers.delete_timer(id)
    }

    pub fn pending_timers(&self) -> usize {
        self.state.timers.len()
    }

    pub fn register_handler<F>(&mut self, type_id: ProtoTypeId, handler: F)
    where
        F: Fn(&mut ModuleContext<'_>, &(dyn Any + Send)) + Send + Sync + 'static,
    {
        self.state.msg_handlers.insert(type_id, Arc::new(handler));
    }

    pub fn register_rpc_handler<F>(&mut self, name: impl Into<String>, handler: F)
    where
        F: Fn(&mut ModuleContext<'_>, &[Value]) -> Vec<Value> + Send + Sync + 'static,
    {
        self.state.rpc_handlers.insert(name.into(), Arc::new(handler));
    }

    pub fn agent(&self, id: AgentId) -> Option<&Arc<dyn Agent>> {
        self.state.agents.get(&id)
    }

    pub fn agent_count(&self) -> usize {
        self.state.agents.len()
    }

    /// Attach a value to this module under `key`, replacing any previous one.
    pub fn store<T: Any + Send>(&mut self, key: u32, value: T) {
        self.state.locals.insert(key, Box::new(value));
    }

    pub fn get<T: Any + Send>(&self, key: u32) -> Option<&T> {
        self.state.locals.get(&key)?.downcast_ref::<T>()
    }

    pub fn get_mut<T: Any + Send>(&mut self, key: u32) -> Option<&mut T> {
        self.state.locals.get_mut(&key)?.downcast_mut::<T>()
    }

    /// Remove and return the value under `key` if it has type `T`.
    pub fn take<T: Any + Send>(&mut self, key: u32) -> Option<T> {
        if !self.state.locals.get(&key)?.is::<T>() {
            return None;
        }
        let boxed = self.state.locals.remove(&key)?;
        boxed.downcast::<T>().ok().map(|b| *b)
    }

    pub(crate) fn state_mut(&mut self) -> &mut ModuleState {
        self.state
    }
}

impl fmt::Debug for ModuleContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleContext")
            .field("module", &self.module.name())
            .field("sender", &self.sender.as_ref().map(|a| a.id()))
            .field("component", &self.component)
            .finish()
    }
}
