//! Timer manager driven by simulated time across every wheel level.

use pretty_assertions::assert_eq;
use proptest::prelude::*;

use wheelhouse::timer::{TimerManager, TICK_MASK};
use wheelhouse::Error;

/// Advance simulated time from `from` to `to` in `step` increments, recording
/// `(now, payload)` for every expiry.
fn drive<T>(mgr: &mut TimerManager<T>, from: u64, to: u64, step: u64) -> Vec<(u64, T)> {
    let mut fired = Vec::new();
    let mut now = from;
    while now <= to {
        fired.extend(mgr.execute(now, usize::MAX).into_iter().map(|p| (now, p)));
        now += step;
    }
    fired
}

#[test]
fn million_ms_delay_fires_on_its_tick() {
    let start = 12_345;
    let mut mgr = TimerManager::new(start);
    mgr.add_timer(start, 1_000_000, "far").unwrap();

    // Coarse steps walk through several level-1 and level-2 turns
    let fired = drive(&mut mgr, start, start + 999_999, 997);
    assert!(fired.is_empty());
    assert_eq!(mgr.len(), 1);

    let target = start + 1_000_000;
    assert!(mgr.execute(target - 1, usize::MAX).is_empty());
    assert_eq!(mgr.execute(target, usize::MAX), vec!["far"]);
    assert!(mgr.is_empty());
}

#[test]
fn every_level_fires_exactly() {
    let delays = [
        1u64,
        255,
        256,
        257,
        65_535,
        65_536,
        65_537,
        16_777_216 + 3,
    ];
    let mut mgr = TimerManager::new(0);
    for (i, delay) in delays.iter().enumerate() {
        mgr.add_timer(0, *delay, i).unwrap();
    }

    let mut fired = Vec::new();
    let mut now = 0;
    while !mgr.is_empty() {
        // Jump close to the next target, then walk tick by tick
        let next = delays
            .iter()
            .copied()
            .filter(|d| *d > now)
            .min()
            .unwrap_or(now + 1);
        for tick in [next - 1, next] {
            for payload in mgr.execute(tick, usize::MAX) {
                fired.push((tick, payload));
            }
        }
        now = next;
    }

    let expected: Vec<(u64, usize)> = delays.iter().copied().zip(0..).collect();
    assert_eq!(fired, expected);
}

#[test]
fn cancelled_cascading_timer_never_fires() {
    let mut mgr = TimerManager::new(0);
    let id = mgr.add_timer(0, 70_000, 1u8).unwrap();
    mgr.add_timer(0, 70_001, 2u8).unwrap();

    // Let the first cascade happen, then cancel
    assert!(drive(&mut mgr, 0, 65_600, 50).is_empty());
    assert!(mgr.delete_timer(id));
    assert!(!mgr.delete_timer(id));

    let fired = drive(&mut mgr, 65_600, 70_010, 1);
    assert_eq!(fired, vec![(70_001, 2u8)]);
}

#[test]
fn delete_after_fire_returns_false() {
    let mut mgr = TimerManager::new(0);
    let id = mgr.add_timer(0, 20, ()).unwrap();
    assert_eq!(drive(&mut mgr, 0, 20, 1).len(), 1);
    assert!(!mgr.delete_timer(id));
}

#[test]
fn delay_past_tick_range_is_rejected() {
    let mut mgr = TimerManager::new(100);
    let err = mgr.add_timer(100, TICK_MASK, ()).unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
    assert!(mgr.add_timer(100, TICK_MASK - 100, ()).is_ok());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn shorter_delay_fires_first(d1 in 0u64..200_000, gap in 1u64..100_000, step in 1u64..500) {
        let d2 = d1 + gap;
        let mut mgr = TimerManager::new(0);
        mgr.add_timer(0, d2, d2).unwrap();
        mgr.add_timer(0, d1, d1).unwrap();

        let fired = drive(&mut mgr, 0, d2 + step, step);
        prop_assert_eq!(fired.len(), 2);
        prop_assert_eq!(fired[0].1, d1);
        prop_assert_eq!(fired[1].1, d2);
        for (now, target) in fired {
            // Never early, and no later than the first execute at or after the target
            prop_assert!(now >= target);
            prop_assert!(now < target + step);
        }
    }
}
