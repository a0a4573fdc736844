//! Interfaces for collaborators that feed a module: network agents and
//! attached components (listeners, connectors, database adapters).

use std::fmt;
use std::sync::Arc;

use super::context::ModuleContext;
use crate::types::{AgentId, ComponentId, Result};

/// A connected peer owned by the network layer.
pub trait Agent: Send + Sync + fmt::Debug {
    fn id(&self) -> AgentId;

    /// Ask the transport to drop the connection.
    fn close(&self);
}

/// What a component is, for logging and lifecycle routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComponentKind {
    TcpServer,
    TcpClient,
    DocumentStore,
    Relational,
    Custom(u16),
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComponentKind::TcpServer => write!(f, "tcp_server"),
            ComponentKind::TcpClient => write!(f, "tcp_client"),
            ComponentKind::DocumentStore => write!(f, "document_store"),
            ComponentKind::Relational => write!(f, "relational"),
            ComponentKind::Custom(n) => write!(f, "custom_{}", n),
        }
    }
}

/// A collaborator attached to one module. Started when the module's loop
/// starts, closed when it exits.
pub trait Component: Send + Sync + fmt::Debug {
    fn id(&self) -> ComponentId;

    fn kind(&self) -> ComponentKind;

    /// Begin background work. Errors are delivered to the component's manager.
    fn start(&self) -> Result<()>;

    fn close(&self);
}

/// Lifecycle callbacks for one component, always invoked on the owning
/// module's loop.
pub trait ComponentManager: Send + Sync {
    fn on_component_start(&self, _ctx: &mut ModuleContext<'_>, _component: ComponentId) {}

    fn on_component_error(&self, ctx: &mut ModuleContext<'_>, component: ComponentId, error: &str) {
        tracing::warn!(
            module = %ctx.name(),
            component = %component,
            "component error: {}",
            error
        );
    }

    fn on_agent_enter(&self, _ctx: &mut ModuleContext<'_>, _agent: &Arc<dyn Agent>) {}

    fn on_agent_exit(
        &self,
        _ctx: &mut ModuleContext<'_>,
        _agent: &Arc<dyn Agent>,
        _reason: Option<&str>,
    ) {
    }
}

/// A component together with the manager receiving its lifecycle events.
#[derive(Clone)]
pub(crate) struct Attached {
    pub(crate) component: Arc<dyn Component>,
    pub(crate) manager: Arc<dyn ComponentManager>,
}

impl fmt::Debug for Attached {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Attached")
            .field("component", &self.component)
            .finish_non_exhaustive()
    }
}
