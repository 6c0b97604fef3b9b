//! Measurement infrastructure for cross-core latency runs.
//!
//! This module provides:
//! - High-resolution tick counting with platform-specific implementations
//! - Run-time clock selection
//! - Power-of-two latency histograms and running statistics
//!
//! # Clock Selection
//!
//! By default, timing uses platform counters:
//! - **x86_64**: `rdtsc` instruction, calibrated against the wall clock
//! - **aarch64**: `cntvct_el0` virtual timer, rate read from `cntfrq_el0`
//!
//! Both are readable from any core and share one timeline, which is what lets
//! the target core stamp a value the source core subtracts from. On x86_64
//! this needs an invariant TSC; the preflight checks warn when `/proc/cpuinfo`
//! does not advertise one.

mod clock;
mod histogram;
mod stats;
mod timer;

pub use clock::{BoxedClock, ClockSpec, MonotonicClock, TimeSource, VirtualClock};
pub use histogram::{bucket_index, Log2Histogram, BUCKETS};
pub use stats::{LatencySummary, RunStatistics};
pub use timer::{cycles_per_ns, rdtsc, Timer};
