//! Strongly-typed identifiers.
//!
//! Modules, agents and components draw from one process-wide counter, so an id
//! is never reused across kinds.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Protocol message type, used to route inbound messages to handlers.
pub type ProtoTypeId = u32;

static NEXT_ID: AtomicU64 = AtomicU64::new(0);

fn next_raw_id() -> u64 {
    NEXT_ID.fetch_add(1, Ordering::Relaxed) + 1
}

/// Macro to define a numeric id newtype.
///
/// Generates: struct, `generate()`, `from_raw()`, `get()`, Display.
macro_rules! define_id {
    ($name:ident, $prefix:literal) => {
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        pub struct $name(u64);

        impl $name {
            /// Allocate a fresh, process-unique id.
            pub fn generate() -> Self {
                Self(next_raw_id())
            }

            pub const fn from_raw(raw: u64) -> Self {
                Self(raw)
            }

            pub const fn get(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "-{}"), self.0)
            }
        }
    };
}

define_id!(ModuleId, "module");
define_id!(AgentId, "agent");
define_id!(ComponentId, "component");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_monotonic_across_kinds() {
        let a = ModuleId::generate();
        let b = AgentId::generate();
        let c = ComponentId::generate();
        assert!(b.get() > a.get());
        assert!(c.get() > b.get());
    }

    #[test]
    fn test_display_prefix() {
        assert_eq!(ModuleId::from_raw(7).to_string(), "module-7");
        assert_eq!(AgentId::from_raw(9).to_string(), "agent-9");
    }
}
