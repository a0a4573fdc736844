//! Five cascaded wheels acting as one scheduler.

use std::fmt;

use super::clock::TICK_MASK;
use super::wheel::{Entry, TimerWheel};
use crate::types::{Error, Result};

/// Wheel levels, finest (1 ms slots) to coarsest (2^32 ms slots).
pub const WHEEL_COUNT: usize = 5;

/// Upper bound on the idle hint returned by [`TimerManager::next_wake`].
pub const MAX_WAKE_LOOKAHEAD: u64 = 64;

const SEQ_BITS: u32 = 24;
const SEQ_LIMIT: u32 = (1 << SEQ_BITS) - 1;

/// Opaque handle for cancelling a scheduled timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

impl TimerId {
    fn new(run_tick: u64, seq: u32) -> Self {
        Self((run_tick << SEQ_BITS) | u64::from(seq))
    }

    fn parts(self) -> (u64, u32) {
        (self.0 >> SEQ_BITS, (self.0 & u64::from(SEQ_LIMIT)) as u32)
    }

    /// Raw representation, for storing the handle outside the process-local runtime.
    pub fn into_raw(self) -> u64 {
        self.0
    }

    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer-{:x}", self.0)
    }
}

/// Hierarchical timer wheel: O(1) insertion, amortized O(1) expiry.
///
/// Time is supplied by the caller in milliseconds so the manager can be driven
/// by the process clock or by a simulated one. Expired payloads are handed back
/// from [`execute`](Self::execute) instead of being invoked here, leaving the
/// caller free to run them with whatever context it owns.
#[derive(Debug)]
pub struct TimerManager<T> {
    wheels: Vec<TimerWheel<T>>,
    seq: u32,
}

impl<T> TimerManager<T> {
    pub fn new(now: u64) -> Self {
        Self {
            wheels: (0..WHEEL_COUNT).map(|level| TimerWheel::new(level, now)).collect(),
            seq: 0,
        }
    }

    fn next_seq(&mut self) -> u32 {
        self.seq += 1;
        if self.seq >= SEQ_LIMIT {
            self.seq = 1;
        }
        self.seq
    }

    /// Number of pending timers across all levels.
    pub fn len(&self) -> usize {
        self.wheels.iter().map(TimerWheel::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Schedule `payload` to expire `delay` ms after `now`.
    ///
    /// A target tick the finest wheel has already passed is clamped to the next
    /// tick. Targets beyond the 40-bit tick range are rejected.
    pub fn add_timer(&mut self, now: u64, delay: u64, payload: T) -> Result<TimerId> {
        let run_tick = now
            .checked_add(delay)
            .filter(|tick| *tick <= TICK_MASK)
            .ok_or_else(|| {
                Error::validation(format!("timer delay {}ms exceeds the tick range", delay))
            })?;
        let run_tick = run_tick.max(self.wheels[0].base_tick());
        let seq = self.next_seq();

        self.place(
            Entry {
                seq,
                run_tick,
                payload,
            },
            WHEEL_COUNT - 1,
        )?;
        Ok(TimerId::new(run_tick, seq))
    }

    /// Cancel a pending timer. Returns `false` when it already fired, was
    /// cancelled before, or the id is not one of ours.
    pub fn delete_timer(&mut self, id: TimerId) -> bool {
        self.take_timer(id).is_some()
    }

    /// Cancel a pending timer and hand back its payload.
    pub fn take_timer(&mut self, id: TimerId) -> Option<T> {
        let (run_tick, seq) = id.parts();
        if seq == 0 {
            return None;
        }
        let level = self.level_for(run_tick, WHEEL_COUNT - 1);
        self.wheels[level]
            .remove(run_tick, seq)
            .map(|entry| entry.payload)
    }

    /// Advance the finest wheel up to `now`, cascading coarser wheels as they
    /// come due, and return at most `budget` expired payloads in firing order.
    ///
    /// When the budget runs out mid-slot the rest of that slot stays put and
    /// is returned first by the next call. With no timers pending the wheels
    /// jump straight to `now` instead of walking the idle slots.
    pub fn execute(&mut self, now: u64, budget: usize) -> Vec<T> {
        let mut fired = Vec::new();
        if self.is_empty() {
            if self.wheels[0].base_tick() <= now {
                for wheel in &mut self.wheels {
                    wheel.rebase(now + 1);
                }
            }
            return fired;
        }
        while fired.len() < budget && self.wheels[0].base_tick() <= now {
            while fired.len() < budget {
                match self.wheels[0].pop_current() {
                    Some(entry) => fired.push(entry.payload),
                    None => break,
                }
            }
            if !self.wheels[0].current_is_empty() {
                break;
            }
            if self.wheels[0].advance() {
                self.turn(1);
            }
        }
        fired
    }

    /// Milliseconds the caller may idle before `execute` has work to do,
    /// capped at [`MAX_WAKE_LOOKAHEAD`].
    pub fn next_wake(&self) -> u64 {
        self.wheels[0].empty_run(MAX_WAKE_LOOKAHEAD)
    }

    /// Tick the finest wheel will process next.
    pub fn current_tick(&self) -> u64 {
        self.wheels[0].base_tick()
    }

    /// Finest level at or below `top` whose window starts at or before `run_tick`.
    fn level_for(&self, run_tick: u64, top: usize) -> usize {
        let mut level = top;
        while level > 0 && run_tick < self.wheels[level].base_tick() {
            level -= 1;
        }
        level
    }

    fn place(&mut self, entry: Entry<T>, top: usize) -> Result<()> {
        let level = self.level_for(entry.run_tick, top);
        self.wheels[level].push(entry).map_err(|entry| {
            Error::internal(format!(
                "timer tick {} outside wheel {} window",
                entry.run_tick, level
            ))
        })
    }

    /// Move the current slot of `level` down into finer wheels and advance it.
    fn turn(&mut self, level: usize) {
        if level >= WHEEL_COUNT {
            return;
        }
        let due = self.wheels[level].take_current();
        let wrapped = self.wheels[level].advance();
        for entry in due {
            if let Err(err) = self.place(entry, level - 1) {
                tracing::error!("timer cascade dropped an entry: {}", err);
            }
        }
        if wrapped {
            self.turn(level + 1);
        }
    }
}
