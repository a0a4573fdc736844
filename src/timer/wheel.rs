//! A single level of the hierarchical timer wheel.

use std::collections::VecDeque;

/// Slots per wheel level.
pub const SLOTS: usize = 256;

/// A scheduled timer. Lives in exactly one slot of exactly one wheel.
#[derive(Debug)]
pub(crate) struct Entry<T> {
    pub(crate) seq: u32,
    pub(crate) run_tick: u64,
    pub(crate) payload: T,
}

/// Circular array of timer lists at one time resolution.
///
/// Slot `index` covers ticks `[base_tick, base_tick + unit)`; slot `index + k`
/// covers the window `k` units later.
#[derive(Debug)]
pub(crate) struct TimerWheel<T> {
    slots: Vec<VecDeque<Entry<T>>>,
    index: u8,
    bit_size: u32,
    unit: u64,
    base_tick: u64,
    len: usize,
}

impl<T> TimerWheel<T> {
    /// Level `level` has a slot unit of `256^level` milliseconds.
    pub(crate) fn new(level: usize, now: u64) -> Self {
        let bit_size = 8 * level as u32;
        let unit = 1u64 << bit_size;
        // Coarse wheels start one unit ahead: everything nearer belongs to a finer level.
        let base_tick = if level == 0 { now } else { now + unit };
        Self {
            slots: (0..SLOTS).map(|_| VecDeque::new()).collect(),
            index: 0,
            bit_size,
            unit,
            base_tick,
            len: 0,
        }
    }

    pub(crate) fn base_tick(&self) -> u64 {
        self.base_tick
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    /// Slot holding `run_tick`, or `None` when it lies outside this wheel's window.
    fn slot_for(&self, run_tick: u64) -> Option<usize> {
        let delta = run_tick.checked_sub(self.base_tick)? >> self.bit_size;
        if delta >= (SLOTS - self.index as usize) as u64 {
            return None;
        }
        Some(self.index as usize + delta as usize)
    }

    /// Append to the slot covering `entry.run_tick`. Returns the entry back if
    /// the tick is outside the window.
    pub(crate) fn push(&mut self, entry: Entry<T>) -> Result<(), Entry<T>> {
        match self.slot_for(entry.run_tick) {
            Some(slot) => {
                self.slots[slot].push_back(entry);
                self.len += 1;
                Ok(())
            }
            None => Err(entry),
        }
    }

    pub(crate) fn remove(&mut self, run_tick: u64, seq: u32) -> Option<Entry<T>> {
        let slot = self.slot_for(run_tick)?;
        let list = &mut self.slots[slot];
        let pos = list.iter().position(|e| e.seq == seq && e.run_tick == run_tick)?;
        let entry = list.remove(pos)?;
        self.len -= 1;
        Some(entry)
    }

    /// Pop the oldest entry of the current slot.
    pub(crate) fn pop_current(&mut self) -> Option<Entry<T>> {
        let entry = self.slots[self.index as usize].pop_front()?;
        self.len -= 1;
        Some(entry)
    }

    pub(crate) fn current_is_empty(&self) -> bool {
        self.slots[self.index as usize].is_empty()
    }

    /// Detach every entry of the current slot, in insertion order.
    pub(crate) fn take_current(&mut self) -> VecDeque<Entry<T>> {
        let taken = std::mem::take(&mut self.slots[self.index as usize]);
        self.len -= taken.len();
        taken
    }

    /// Move to the next slot. Returns `true` when the index wrapped to 0.
    pub(crate) fn advance(&mut self) -> bool {
        self.index = self.index.wrapping_add(1);
        self.base_tick += self.unit;
        self.index == 0
    }

    /// Restart an empty wheel at `now`, as [`new`](Self::new) would.
    pub(crate) fn rebase(&mut self, now: u64) {
        debug_assert_eq!(self.len, 0);
        self.index = 0;
        self.base_tick = if self.bit_size == 0 { now } else { now + self.unit };
    }

    /// Empty slots ahead of the current one, up to `limit` or the wrap point.
    pub(crate) fn empty_run(&self, limit: u64) -> u64 {
        let mut distance = 0;
        let mut index = self.index as usize;
        while distance < limit {
            if !self.slots[index].is_empty() {
                break;
            }
            index += 1;
            if index == SLOTS {
                break;
            }
            distance += 1;
        }
        distance
    }
}
