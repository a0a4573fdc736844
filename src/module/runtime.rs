//! The per-module dispatch loop.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::component::Attached;
use super::context::{ModuleContext, ModuleState};
use super::event::{ComponentEvent, ModuleEvent, SessionEvent, TimerTask};
use super::pool::ArgsKind;
use super::recovery::with_recovery;
use super::ModuleHandle;
use crate::timer::now_ms;
use crate::types::Error;

impl ModuleHandle {
    pub(super) async fn run_loop(
        self,
        mut state: ModuleState,
        mut rx: mpsc::UnboundedReceiver<ModuleEvent>,
    ) {
        let config = self.shared_config().clone();
        let cancel = self.cancel_token().clone();
        state.running = true;
        self.counters().mark_started();
        info!(module = %self.name(), id = %self.id(), "module_started");

        let attached: Vec<Attached> = state.components.values().cloned().collect();
        for component in &attached {
            let id = component.component.id();
            let mut ctx = ModuleContext::new(&self, &mut state, None, Some(id));
            self.recover(|| start_component(&mut ctx, component), "component_start");
        }

        let mut last_stats = Instant::now();
        'outer: loop {
            let idle = idle_wait(&state, config.max_idle);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                first = rx.recv() => {
                    let Some(first) = first else { break };
                    self.dispatch(&mut state, first);
                    for _ in 1..config.mailbox_batch {
                        if cancel.is_cancelled() {
                            break 'outer;
                        }
                        match rx.try_recv() {
                            Ok(event) => self.dispatch(&mut state, event),
                            Err(_) => break,
                        }
                    }
                }
                _ = tokio::time::sleep(idle) => {}
            }

            if cancel.is_cancelled() {
                break;
            }
            self.fire_timers(&mut state, config.timer_budget as usize);

            if let Some(period) = config.stats_interval {
                if last_stats.elapsed() >= period {
                    last_stats = Instant::now();
                    let stats = self.stats();
                    info!(
                        module = %self.name(),
                        messages = stats.messages,
                        rpcs = stats.rpcs,
                        timers_fired = stats.timers_fired,
                        dropped = stats.dropped,
                        panics = stats.panics_recovered,
                        pending_timers = state.timers.len(),
                        "module_stats"
                    );
                }
            }
        }

        self.shutdown(&mut state, &mut rx);
    }

    fn shutdown(&self, state: &mut ModuleState, rx: &mut mpsc::UnboundedReceiver<ModuleEvent>) {
        rx.close();
        let mut discarded = 0usize;
        while let Ok(event) = rx.try_recv() {
            discarded += 1;
            self.discard(event);
        }
        for attached in state.components.values() {
            attached.component.close();
        }
        state.agents.clear();
        state.running = false;
        info!(
            module = %self.name(),
            discarded,
            pending_timers = state.timers.len(),
            "module_stopped"
        );
    }

    /// Drop an event that arrived after close, failing its caller if it has one.
    fn discard(&self, event: ModuleEvent) {
        match event {
            ModuleEvent::Rpc { args, .. } => self.pools().release(ArgsKind::Rpc, args),
            ModuleEvent::AwaitRpc { name, args, reply } => {
                let _ = reply.send(Err(Error::cancelled(format!(
                    "module '{}' closed before handling rpc '{}'",
                    self.name(),
                    name
                ))));
                self.pools().release(ArgsKind::AwaitRpc, args);
            }
            _ => {}
        }
    }

    fn fire_timers(&self, state: &mut ModuleState, budget: usize) {
        let due = state.timers.execute(now_ms(), budget);
        for TimerTask { handler, args } in due {
            if self.cancel_token().is_cancelled() {
                break;
            }
            self.counters().timer_fired();
            let mut ctx = ModuleContext::new(self, state, None, None);
            self.recover(|| handler(&mut ctx, &args), "timer");
        }
    }

    pub(super) fn dispatch(&self, state: &mut ModuleState, event: ModuleEvent) {
        debug!(module = %self.name(), kind = event.kind(), "dispatch");
        match event {
            ModuleEvent::Message {
                sender,
                type_id,
                payload,
            } => {
                self.counters().message();
                let Some(handler) = state.msg_handlers.get(&type_id).cloned() else {
                    self.drop_event(format_args!("no handler for message type {}", type_id));
                    return;
                };
                let mut ctx = ModuleContext::new(self, state, sender, None);
                self.recover(|| handler(&mut ctx, &*payload), "message");
            }
            ModuleEvent::Rpc { name, args } => {
                self.counters().rpc();
                match state.rpc_handlers.get(&name).cloned() {
                    Some(handler) => {
                        let mut ctx = ModuleContext::new(self, state, None, None);
                        self.recover(|| drop(handler(&mut ctx, &args)), "rpc");
                    }
                    None => self.drop_event(format_args!("no rpc handler named '{}'", name)),
                }
                self.pools().release(ArgsKind::Rpc, args);
            }
            ModuleEvent::AwaitRpc { name, args, reply } => {
                self.counters().rpc();
                let result = match state.rpc_handlers.get(&name).cloned() {
                    Some(handler) => {
                        let mut ctx = ModuleContext::new(self, state, None, None);
                        let result = with_recovery(|| handler(&mut ctx, &args), "await_rpc");
                        if result.is_err() {
                            self.counters().panic();
                        }
                        result
                    }
                    None => {
                        self.drop_event(format_args!("no rpc handler named '{}'", name));
                        Err(Error::not_found(format!(
                            "rpc handler '{}' on module '{}'",
                            name,
                            self.name()
                        )))
                    }
                };
                if reply.send(result).is_err() {
                    debug!(module = %self.name(), rpc = %name, "await_rpc caller went away");
                }
                self.pools().release(ArgsKind::AwaitRpc, args);
            }
            ModuleEvent::Session(event) => {
                self.counters().lifecycle();
                self.on_session(state, event);
            }
            ModuleEvent::Component(event) => {
                self.counters().lifecycle();
                self.on_component(state, event);
            }
            ModuleEvent::Invoke(task) => {
                let mut ctx = ModuleContext::new(self, state, None, None);
                self.recover(|| task(&mut ctx), "invoke");
            }
        }
    }

    fn on_session(&self, state: &mut ModuleState, event: SessionEvent) {
        match event {
            SessionEvent::Connected { agent, component } => {
                state.agents.insert(agent.id(), agent.clone());
                let Some(attached) = state.components.get(&component).cloned() else {
                    debug!(
                        module = %self.name(),
                        agent = %agent.id(),
                        "agent connected without manager"
                    );
                    return;
                };
                let mut ctx = ModuleContext::new(self, state, Some(agent.clone()), Some(component));
                self.recover(
                    || attached.manager.on_agent_enter(&mut ctx, &agent),
                    "agent_enter",
                );
            }
            SessionEvent::Closed {
                agent,
                component,
                reason,
            } => {
                state.agents.remove(&agent.id());
                let Some(attached) = state.components.get(&component).cloned() else {
                    self.drop_event(format_args!(
                        "agent {} closed on unknown component {}",
                        agent.id(),
                        component
                    ));
                    return;
                };
                let mut ctx = ModuleContext::new(self, state, Some(agent.clone()), Some(component));
                self.recover(
                    || {
                        attached
                            .manager
                            .on_agent_exit(&mut ctx, &agent, reason.as_deref())
                    },
                    "agent_exit",
                );
            }
        }
    }

    fn on_component(&self, state: &mut ModuleState, event: ComponentEvent) {
        let component = match &event {
            ComponentEvent::Started { component } | ComponentEvent::Error { component, .. } => {
                *component
            }
        };
        let Some(attached) = state.components.get(&component).cloned() else {
            self.drop_event(format_args!("event for unknown component {}", component));
            return;
        };
        let mut ctx = ModuleContext::new(self, state, None, Some(component));
        match event {
            ComponentEvent::Started { .. } => self.recover(
                || attached.manager.on_component_start(&mut ctx, component),
                "component_start",
            ),
            ComponentEvent::Error { error, .. } => self.recover(
                || attached.manager.on_component_error(&mut ctx, component, &error),
                "component_error",
            ),
        };
    }

    fn recover<T>(&self, op: impl FnOnce() -> T, name: &str) -> Option<T> {
        match with_recovery(op, name) {
            Ok(value) => Some(value),
            Err(_) => {
                self.counters().panic();
                None
            }
        }
    }

    fn drop_event(&self, why: std::fmt::Arguments<'_>) {
        self.counters().dropped();
        warn!(module = %self.name(), "event dropped: {}", why);
    }
}

/// Start one component on its module's loop, reporting the outcome to its manager.
pub(super) fn start_component(ctx: &mut ModuleContext<'_>, attached: &Attached) {
    let id = attached.component.id();
    let started = with_recovery(|| attached.component.start(), "component_start")
        .and_then(|result| result);
    match started {
        Ok(()) => {
            info!(
                module = %ctx.name(),
                component = %id,
                kind = %attached.component.kind(),
                "component_started"
            );
            attached.manager.on_component_start(ctx, id);
        }
        Err(err) => attached.manager.on_component_error(ctx, id, &err.to_string()),
    }
}

fn idle_wait(state: &ModuleState, max_idle: Duration) -> Duration {
    if state.timers.is_empty() {
        return max_idle;
    }
    let due = state.timers.current_tick() + state.timers.next_wake();
    Duration::from_millis(due.saturating_sub(now_ms())).min(max_idle)
}
