//! # Scheduler Policy

/// Number of fixed priority levels. Level `0` is the idle level.
pub const PRIORITY_LEVELS: usize = 5;

/// Priority of the idle thread.
pub const IDLE_PRIORITY: u8 = 0;

/// Highest priority.
pub const MAX_PRIORITY: u8 = (PRIORITY_LEVELS - 1) as u8;

/// Priority a new thread starts at when nothing else is requested.
pub const DEFAULT_PRIORITY: u8 = 2;

/// Timer tick period in milliseconds.
pub const TICK_MILLIS: u32 = 10;

/// Ticks a thread may run before it becomes preemptible, per priority level.
///
/// Higher levels get longer slices.
pub const DEFAULT_QUANTUM_TICKS: [u32; PRIORITY_LEVELS] = [1, 2, 3, 4, 5];

const _: () = {
    assert!(PRIORITY_LEVELS == 5);
    assert!(DEFAULT_PRIORITY <= MAX_PRIORITY);
    assert!(TICK_MILLIS > 0);
    let mut i = 0;
    while i < PRIORITY_LEVELS {
        assert!(DEFAULT_QUANTUM_TICKS[i] > 0);
        i += 1;
    }
};

/// Number of ticks needed to cover `millis`, rounding up, at least one.
#[inline]
#[must_use]
pub const fn millis_to_ticks(millis: u64, tick_millis: u32) -> u64 {
    let t = millis.div_ceil(tick_millis as u64);
    if t == 0 { 1 } else { t }
}
