//! Hierarchical timer wheels.
//!
//! Five wheels of 256 slots each, finest to coarsest:
//! ```text
//! level  slot unit        span
//!   0    1 ms             256 ms
//!   1    256 ms           ~65.5 s
//!   2    65536 ms         ~4.66 h
//!   3    ~16.7M ms        ~4.97 months
//!   4    ~4.3B ms         rest of the 40-bit tick range
//! ```
//! Only the finest wheel follows the clock. When it wraps, the next coarser
//! wheel turns one slot and its timers cascade into finer wheels, where they
//! now resolve to a concrete near-term slot.

pub mod clock;
mod manager;
mod wheel;

pub use clock::{now_ms, TICK_MASK};
pub use manager::{TimerId, TimerManager, MAX_WAKE_LOOKAHEAD, WHEEL_COUNT};
pub use wheel::SLOTS;
