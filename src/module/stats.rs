//! Per-module dispatch counters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

#[derive(Debug)]
pub(crate) struct ModuleCounters {
    created_at: DateTime<Utc>,
    started_at: OnceLock<DateTime<Utc>>,
    messages: AtomicU64,
    rpcs: AtomicU64,
    timers_fired: AtomicU64,
    lifecycle: AtomicU64,
    dropped: AtomicU64,
    panics: AtomicU64,
}

impl ModuleCounters {
    pub(crate) fn new() -> Self {
        Self {
            created_at: Utc::now(),
            started_at: OnceLock::new(),
            messages: AtomicU64::new(0),
            rpcs: AtomicU64::new(0),
            timers_fired: AtomicU64::new(0),
            lifecycle: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            panics: AtomicU64::new(0),
        }
    }

    pub(crate) fn mark_started(&self) {
        let _ = self.started_at.set(Utc::now());
    }

    pub(crate) fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at.get().copied()
    }

    pub(crate) fn message(&self) {
        self.messages.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn rpc(&self) {
        self.rpcs.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn timer_fired(&self) {
        self.timers_fired.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn lifecycle(&self) {
        self.lifecycle.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn panic(&self) {
        self.panics.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> ModuleStats {
        ModuleStats {
            created_at: self.created_at,
            started_at: self.started_at(),
            messages: self.messages.load(Ordering::Relaxed),
            rpcs: self.rpcs.load(Ordering::Relaxed),
            timers_fired: self.timers_fired.load(Ordering::Relaxed),
            lifecycle_events: self.lifecycle.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            panics_recovered: self.panics.load(Ordering::Relaxed),
        }
    }
}

/// Statistics about one module's dispatch loop.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleStats {
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub messages: u64,
    pub rpcs: u64,
    pub timers_fired: u64,
    pub lifecycle_events: u64,
    /// Events discarded because no handler was registered.
    pub dropped: u64,
    pub panics_recovered: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_counters() {
        let counters = ModuleCounters::new();
        assert!(counters.started_at().is_none());
        counters.mark_started();
        counters.mark_started();
        counters.rpc();
        counters.rpc();
        counters.dropped();
        let snap = counters.snapshot();
        assert!(snap.started_at.is_some());
        assert_eq!(snap.rpcs, 2);
        assert_eq!(snap.dropped, 1);
        assert_eq!(snap.messages, 0);
    }

    #[test]
    fn test_stats_serialize() {
        let json = serde_json::to_value(ModuleCounters::new().snapshot()).unwrap();
        assert_eq!(json["panics_recovered"], 0);
        assert!(json["started_at"].is_null());
    }
}
