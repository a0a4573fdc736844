//! Core types for the wheelhouse runtime.
//!
//! This module provides foundational types used throughout the system:
//! - **IDs**: Process-unique numeric identifiers (ModuleId, AgentId, ComponentId)
//! - **Errors**: Application error types with thiserror derives
//! - **Config**: Module loop tuning and observability settings

mod config;
mod errors;
mod ids;

pub use config::{Config, ObservabilityConfig, RuntimeConfig};
pub use errors::{Error, Result};
pub use ids::{AgentId, ComponentId, ModuleId, ProtoTypeId};
