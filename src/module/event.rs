//! Events accepted by a module's mailbox.

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use tokio::sync::oneshot;

use super::component::Agent;
use super::context::ModuleContext;
use crate::codec::Value;
use crate::types::{ComponentId, ProtoTypeId, Result};

/// Handler for an inbound protocol message. The payload is whatever the
/// network layer decoded for that protocol type.
pub type MsgHandler = Arc<dyn Fn(&mut ModuleContext<'_>, &(dyn Any + Send)) + Send + Sync>;

/// Handler for a named RPC. The returned list is delivered to awaiting callers
/// and discarded for fire-and-forget calls.
pub type RpcHandler = Arc<dyn Fn(&mut ModuleContext<'_>, &[Value]) -> Vec<Value> + Send + Sync>;

/// Callback for an expired timer, invoked with the arguments captured at scheduling.
pub type TimerHandler = Arc<dyn Fn(&mut ModuleContext<'_>, &[Value]) + Send + Sync>;

/// Work executed directly on a module's loop.
pub type LoopTask = Box<dyn FnOnce(&mut ModuleContext<'_>) + Send>;

/// Agent lifecycle reported by a network component.
#[derive(Debug)]
pub enum SessionEvent {
    Connected {
        agent: Arc<dyn Agent>,
        component: ComponentId,
    },
    Closed {
        agent: Arc<dyn Agent>,
        component: ComponentId,
        reason: Option<String>,
    },
}

/// Component lifecycle reported from outside the module's loop.
#[derive(Debug, Clone)]
pub enum ComponentEvent {
    Started { component: ComponentId },
    Error { component: ComponentId, error: String },
}

/// One mailbox entry.
pub enum ModuleEvent {
    Message {
        sender: Option<Arc<dyn Agent>>,
        type_id: ProtoTypeId,
        payload: Box<dyn Any + Send>,
    },
    Rpc {
        name: String,
        args: Vec<Value>,
    },
    AwaitRpc {
        name: String,
        args: Vec<Value>,
        reply: oneshot::Sender<Result<Vec<Value>>>,
    },
    Session(SessionEvent),
    Component(ComponentEvent),
    Invoke(LoopTask),
}

impl ModuleEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            ModuleEvent::Message { .. } => "message",
            ModuleEvent::Rpc { .. } => "rpc",
            ModuleEvent::AwaitRpc { .. } => "await_rpc",
            ModuleEvent::Session(_) => "session",
            ModuleEvent::Component(_) => "component",
            ModuleEvent::Invoke(_) => "invoke",
        }
    }
}

impl fmt::Debug for ModuleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModuleEvent::Message { sender, type_id, .. } => f
                .debug_struct("Message")
                .field("sender", &sender.as_ref().map(|a| a.id()))
                .field("type_id", type_id)
                .finish_non_exhaustive(),
            ModuleEvent::Rpc { name, args } => f
                .debug_struct("Rpc")
                .field("name", name)
                .field("args", args)
                .finish(),
            ModuleEvent::AwaitRpc { name, args, .. } => f
                .debug_struct("AwaitRpc")
                .field("name", name)
                .field("args", args)
                .finish_non_exhaustive(),
            ModuleEvent::Session(ev) => f.debug_tuple("Session").field(ev).finish(),
            ModuleEvent::Component(ev) => f.debug_tuple("Component").field(ev).finish(),
            ModuleEvent::Invoke(_) => f.write_str("Invoke(..)"),
        }
    }
}

/// Captured timer callback plus its arguments.
pub(crate) struct TimerTask {
    pub(crate) handler: TimerHandler,
    pub(crate) args: Vec<Value>,
}

impl fmt::Debug for TimerTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerTask")
            .field("args", &self.args)
            .finish_non_exhaustive()
    }
}
