//! Unified clock abstraction for the measurement loop.
//!
//! This module provides:
//! - `TimeSource` - the contract the source and target tasks time against
//! - `BoxedClock` - an enum wrapping the run-time selectable clocks
//! - `ClockSpec` - specification for which clock to use
//!
//! Clock implementations:
//! - `Timer` - hardware tick counter (rdtsc/cntvct_el0)
//! - `MonotonicClock` - `Instant`-based nanoseconds
//! - `VirtualClock` - deterministic clock that only moves when told to

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use serde::{Deserialize, Serialize};

use super::Timer;

const NANOS_PER_SEC: u64 = 1_000_000_000;

/// Monotonic timestamp source shared by both tasks.
///
/// Timestamps taken on different cores must be comparable: the target stamps
/// the shared cell with `now()` and the source subtracts its own `now()`.
pub trait TimeSource: Send + Sync {
    /// Current tick value.
    fn now(&self) -> u64;

    /// Convert a tick delta to nanoseconds.
    fn ticks_to_ns(&self, ticks: u64) -> u64;

    /// Tick rate, used to turn the run duration into a tick budget.
    fn ticks_per_second(&self) -> u64;

    /// Clock name for report metadata.
    fn name(&self) -> &'static str;

    /// Convert nanoseconds to ticks.
    fn ns_to_ticks(&self, ns: u64) -> u64 {
        let ticks = ns as u128 * self.ticks_per_second() as u128 / NANOS_PER_SEC as u128;
        ticks.min(u64::MAX as u128) as u64
    }

    /// Let at least `ns` nanoseconds pass on this clock.
    ///
    /// Real clocks busy-wait; a virtual clock simply advances.
    fn elapse(&self, ns: u64) {
        let ticks = self.ns_to_ticks(ns);
        let start = self.now();
        while self.now().wrapping_sub(start) < ticks {
            std::hint::spin_loop();
        }
    }
}

/// `Instant`-based clock with one tick per nanosecond.
#[derive(Debug, Clone, Copy, Default)]
pub struct MonotonicClock;

impl MonotonicClock {
    /// Create a monotonic clock. All instances share one epoch.
    pub fn new() -> Self {
        Self
    }

    fn epoch() -> Instant {
        static EPOCH: OnceLock<Instant> = OnceLock::new();
        *EPOCH.get_or_init(Instant::now)
    }
}

impl TimeSource for MonotonicClock {
    #[inline]
    fn now(&self) -> u64 {
        Self::epoch().elapsed().as_nanos() as u64
    }

    #[inline]
    fn ticks_to_ns(&self, ticks: u64) -> u64 {
        ticks
    }

    fn ticks_per_second(&self) -> u64 {
        NANOS_PER_SEC
    }

    fn name(&self) -> &'static str {
        "Instant"
    }
}

/// Deterministic clock that only moves when advanced.
///
/// Clones share the same counter, so a synthetic invoker and the harness can
/// observe one timeline. One tick is one nanosecond.
#[derive(Debug, Clone, Default)]
pub struct VirtualClock {
    ticks: Arc<AtomicU64>,
}

impl VirtualClock {
    /// Create a virtual clock at tick zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Move the clock forward by `ns` nanoseconds.
    pub fn advance(&self, ns: u64) {
        self.ticks.fetch_add(ns, Ordering::AcqRel);
    }
}

impl TimeSource for VirtualClock {
    #[inline]
    fn now(&self) -> u64 {
        self.ticks.load(Ordering::Acquire)
    }

    #[inline]
    fn ticks_to_ns(&self, ticks: u64) -> u64 {
        ticks
    }

    fn ticks_per_second(&self) -> u64 {
        NANOS_PER_SEC
    }

    fn name(&self) -> &'static str {
        "virtual"
    }

    fn elapse(&self, ns: u64) {
        self.advance(ns);
    }
}

/// A clock selected at run time.
///
/// Enum dispatch keeps the hot loop free of trait objects.
#[derive(Debug, Clone)]
pub enum BoxedClock {
    /// Hardware tick counter.
    Cycle(Timer),
    /// `Instant`-based nanoseconds.
    Monotonic(MonotonicClock),
}

impl BoxedClock {
    /// Ticks per nanosecond of the selected clock.
    pub fn cycles_per_ns(&self) -> f64 {
        match self {
            BoxedClock::Cycle(t) => t.cycles_per_ns(),
            BoxedClock::Monotonic(_) => 1.0,
        }
    }
}

impl TimeSource for BoxedClock {
    #[inline]
    fn now(&self) -> u64 {
        match self {
            BoxedClock::Cycle(t) => t.now(),
            BoxedClock::Monotonic(c) => c.now(),
        }
    }

    #[inline]
    fn ticks_to_ns(&self, ticks: u64) -> u64 {
        match self {
            BoxedClock::Cycle(t) => t.ticks_to_ns(ticks),
            BoxedClock::Monotonic(c) => c.ticks_to_ns(ticks),
        }
    }

    fn ticks_per_second(&self) -> u64 {
        match self {
            BoxedClock::Cycle(t) => t.ticks_per_second(),
            BoxedClock::Monotonic(c) => c.ticks_per_second(),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            BoxedClock::Cycle(t) => t.name(),
            BoxedClock::Monotonic(c) => c.name(),
        }
    }
}

/// Specification for which clock to use.
///
/// Lets `IpiStorm` stay `Clone` while deferring calibration until a run starts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClockSpec {
    /// Hardware counter where one exists (x86_64, aarch64), `Instant` elsewhere.
    #[default]
    Auto,

    /// Always use the hardware tick counter.
    Cycle,

    /// Always use `Instant`.
    Monotonic,
}

impl ClockSpec {
    /// Create (and calibrate, if needed) the clock this spec names.
    pub fn create_clock(&self) -> BoxedClock {
        match self {
            ClockSpec::Cycle => BoxedClock::Cycle(Timer::new()),
            ClockSpec::Monotonic => BoxedClock::Monotonic(MonotonicClock::new()),
            ClockSpec::Auto => {
                if cfg!(any(target_arch = "x86_64", target_arch = "aarch64")) {
                    BoxedClock::Cycle(Timer::new())
                } else {
                    BoxedClock::Monotonic(MonotonicClock::new())
                }
            }
        }
    }
}

impl fmt::Display for ClockSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClockSpec::Auto => write!(f, "auto"),
            ClockSpec::Cycle => write!(f, "cycle"),
            ClockSpec::Monotonic => write!(f, "monotonic"),
        }
    }
}

impl FromStr for ClockSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(ClockSpec::Auto),
            "cycle" | "tsc" | "rdtsc" | "cntvct" => Ok(ClockSpec::Cycle),
            "monotonic" | "instant" => Ok(ClockSpec::Monotonic),
            other => Err(format!("unknown clock '{other}' (expected auto, cycle or monotonic)")),
        }
    }
}
