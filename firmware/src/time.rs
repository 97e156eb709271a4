//! Millisecond tick source.
//!
//! The board's periodic timer interrupt calls [`tick`] once per millisecond;
//! the main loop reads the count back for the IP stack's timers. The tick
//! counter is 32 bits and wraps after ~49.7 days, while smoltcp needs a
//! monotonic clock, so [`instant`] extends it to 64 bits.

use portable_atomic::{AtomicU32, Ordering};
use smoltcp::time::Instant;

static TICKS: AtomicU32 = AtomicU32::new(0);
static CLOCK: WrapClock = WrapClock::new();

/// Advance the clock by one millisecond (timer interrupt context)
pub fn tick() {
    TICKS.fetch_add(1, Ordering::Relaxed);
}

/// Milliseconds since boot. Wraps after ~49 days, like the hardware counter.
pub fn now_ms() -> u32 {
    TICKS.load(Ordering::Relaxed)
}

/// Current time as a smoltcp timestamp.
///
/// Main loop only, and at least once per wrap period (the IP stack polls
/// far more often than that).
pub fn instant() -> Instant {
    Instant::from_millis(CLOCK.extend(now_ms()) as i64)
}

/// Counts wraps of a 32-bit millisecond counter
struct WrapClock {
    last: AtomicU32,
    epoch: AtomicU32,
}

impl WrapClock {
    const fn new() -> Self {
        Self {
            last: AtomicU32::new(0),
            epoch: AtomicU32::new(0),
        }
    }

    /// 64-bit milliseconds for the raw reading `now`. Readings must arrive
    /// in order from a single context.
    fn extend(&self, now: u32) -> u64 {
        let last = self.last.swap(now, Ordering::Relaxed);
        let epoch = if now < last {
            self.epoch.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
        } else {
            self.epoch.load(Ordering::Relaxed)
        };
        (u64::from(epoch) << 32) | u64::from(now)
    }
}
