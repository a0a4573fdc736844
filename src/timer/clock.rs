//! Monotonic millisecond tick source shared by every timer manager.

use std::sync::OnceLock;
use std::time::Instant;

/// Ticks are truncated to 40 bits so they fit in a timer id next to the sequence.
pub const TICK_MASK: u64 = 0x0000_00ff_ffff_ffff;

static PROCESS_START: OnceLock<Instant> = OnceLock::new();

/// Milliseconds elapsed since the first call in this process, masked to 40 bits.
pub fn now_ms() -> u64 {
    let start = PROCESS_START.get_or_init(Instant::now);
    (start.elapsed().as_millis() as u64) & TICK_MASK
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_is_monotonic() {
        let a = now_ms();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let b = now_ms();
        assert!(b >= a + 5);
        assert!(b <= TICK_MASK);
    }
}
