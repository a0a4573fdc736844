//! Free lists for mailbox argument buffers.
//!
//! Producers on any thread acquire a buffer, fill it and post it; the module
//! loop hands it back after dispatch. Acquisition always returns an empty
//! buffer, so a recycled one never leaks values from its previous event.

use std::sync::{Mutex, PoisonError};

use crate::codec::Value;

/// Event variants that carry a pooled argument list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ArgsKind {
    Rpc,
    AwaitRpc,
}

impl ArgsKind {
    const COUNT: usize = 2;

    fn index(self) -> usize {
        match self {
            ArgsKind::Rpc => 0,
            ArgsKind::AwaitRpc => 1,
        }
    }
}

#[derive(Debug)]
pub(crate) struct EventPools {
    lists: [Mutex<Vec<Vec<Value>>>; ArgsKind::COUNT],
    capacity: usize,
}

impl EventPools {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            lists: [Mutex::new(Vec::new()), Mutex::new(Vec::new())],
            capacity,
        }
    }

    pub(crate) fn acquire(&self, kind: ArgsKind) -> Vec<Value> {
        let recycled = self.lists[kind.index()]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop();
        match recycled {
            Some(mut buf) => {
                buf.clear();
                buf
            }
            None => Vec::new(),
        }
    }

    /// Return a buffer. Dropped instead when the free list is full.
    pub(crate) fn release(&self, kind: ArgsKind, mut buf: Vec<Value>) {
        buf.clear();
        if buf.capacity() == 0 {
            return;
        }
        let mut list = self.lists[kind.index()]
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if list.len() < self.capacity {
            list.push(buf);
        }
    }

    #[cfg(test)]
    fn pooled(&self, kind: ArgsKind) -> usize {
        self.lists[kind.index()]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args;

    #[test]
    fn test_recycled_buffer_is_reset() {
        let pools = EventPools::new(4);
        let mut buf = pools.acquire(ArgsKind::Rpc);
        buf.extend(args![1, "stale"]);
        let cap = buf.capacity();
        pools.release(ArgsKind::Rpc, buf);

        let reused = pools.acquire(ArgsKind::Rpc);
        assert!(reused.is_empty());
        assert_eq!(reused.capacity(), cap);
    }

    #[test]
    fn test_kinds_do_not_share_lists() {
        let pools = EventPools::new(4);
        pools.release(ArgsKind::AwaitRpc, args![true]);
        assert_eq!(pools.pooled(ArgsKind::AwaitRpc), 1);
        assert_eq!(pools.pooled(ArgsKind::Rpc), 0);
    }

    #[test]
    fn test_capacity_bound() {
        let pools = EventPools::new(2);
        for _ in 0..5 {
            pools.release(ArgsKind::Rpc, args![1]);
        }
        assert_eq!(pools.pooled(ArgsKind::Rpc), 2);

        // Unallocated buffers are not worth keeping
        pools.release(ArgsKind::AwaitRpc, Vec::new());
        assert_eq!(pools.pooled(ArgsKind::AwaitRpc), 0);
    }
}
