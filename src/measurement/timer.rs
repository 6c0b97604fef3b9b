//! Platform-specific hardware timestamps.
//!
//! Both hardware counters are system-wide on the platforms we target (invariant
//! TSC on x86_64, the generic timer on aarch64), so a timestamp taken on the
//! target core can be subtracted from one taken on the source core.

use std::sync::atomic::{compiler_fence, Ordering};
use std::time::Instant;

use super::clock::TimeSource;

/// Read the hardware tick counter.
///
/// The read is fenced on both sides. A stamp taken inside a remote call must
/// not be sampled before the interrupt entry that led to it has retired, and
/// the caller's later load of that stamp must not be hoisted above its own
/// start timestamp.
///
/// - x86_64: `lfence; rdtsc; lfence`
/// - aarch64: `isb; mrs cntvct_el0; isb`
/// - other: nanoseconds since the first call, from `Instant`
#[inline]
pub fn rdtsc() -> u64 {
    compiler_fence(Ordering::SeqCst);
    let ticks = read_counter();
    compiler_fence(Ordering::SeqCst);
    ticks
}

#[cfg(target_arch = "x86_64")]
#[inline(always)]
#[allow(unused_unsafe)]
fn read_counter() -> u64 {
    use std::arch::x86_64::{_mm_lfence, _rdtsc};

    // SAFETY: lfence and rdtsc are baseline x86_64 instructions.
    unsafe {
        _mm_lfence();
        let ticks = _rdtsc();
        _mm_lfence();
        ticks
    }
}

/// Read an aarch64 system register.
#[cfg(target_arch = "aarch64")]
macro_rules! read_sysreg {
    ($reg:literal) => {{
        let value: u64;
        // SAFETY: the generic timer registers are readable from EL0 on Linux.
        unsafe {
            std::arch::asm!(
                concat!("mrs {}, ", $reg),
                out(reg) value,
                options(nostack, nomem, preserves_flags),
            );
        }
        value
    }};
}

#[cfg(target_arch = "aarch64")]
#[inline(always)]
fn read_counter() -> u64 {
    // SAFETY: isb is a pure pipeline barrier.
    unsafe { std::arch::asm!("isb", options(nostack, preserves_flags)) };
    let ticks = read_sysreg!("cntvct_el0");
    // SAFETY: as above.
    unsafe { std::arch::asm!("isb", options(nostack, preserves_flags)) };
    ticks
}

/// Counter frequency of the aarch64 generic timer, in Hz.
#[cfg(target_arch = "aarch64")]
fn counter_frequency_hz() -> u64 {
    read_sysreg!("cntfrq_el0")
}

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
#[inline(always)]
fn read_counter() -> u64 {
    use std::sync::OnceLock;
    static START: OnceLock<Instant> = OnceLock::new();

    let start = START.get_or_init(Instant::now);
    start.elapsed().as_nanos() as u64
}

/// Calibrate the tick counter against the wall clock.
///
/// Runs a number of short sleeps and takes the median ratio of elapsed ticks
/// to elapsed nanoseconds. For a 3 GHz invariant TSC this returns roughly 3.0.
///
/// On aarch64 the frequency is architecturally published in `cntfrq_el0` and
/// is read directly instead.
pub fn cycles_per_ns() -> f64 {
    #[cfg(target_arch = "aarch64")]
    {
        let freq = counter_frequency_hz();
        if freq > 0 {
            return freq as f64 / 1e9;
        }
    }

    #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
    {
        return 1.0;
    }

    #[allow(unreachable_code)]
    calibrate()
}

fn calibrate() -> f64 {
    const CALIBRATION_MS: u64 = 2;
    const CALIBRATION_ITERATIONS: usize = 25;

    let mut ratios = Vec::with_capacity(CALIBRATION_ITERATIONS);

    for _ in 0..CALIBRATION_ITERATIONS {
        let start_ticks = rdtsc();
        let start_time = Instant::now();

        std::thread::sleep(std::time::Duration::from_millis(CALIBRATION_MS));

        let end_ticks = rdtsc();
        let elapsed_nanos = start_time.elapsed().as_nanos() as u64;

        if elapsed_nanos == 0 {
            continue;
        }

        let ticks = end_ticks.saturating_sub(start_ticks);
        ratios.push(ticks as f64 / elapsed_nanos as f64);
    }

    if ratios.is_empty() {
        return 3.0;
    }

    ratios.sort_by(|a, b| a.total_cmp(b));
    let mid = ratios.len() / 2;
    if ratios.len() % 2 == 0 {
        (ratios[mid - 1] + ratios[mid]) / 2.0
    } else {
        ratios[mid]
    }
}

/// Calibrated hardware tick counter.
///
/// Wraps [`rdtsc`] with the tick rate needed to turn tick deltas into
/// nanoseconds.
#[derive(Debug, Clone, Copy)]
pub struct Timer {
    /// Ticks per nanosecond for conversion.
    cycles_per_ns: f64,
}

impl Timer {
    /// Create a new timer with automatic calibration.
    pub fn new() -> Self {
        Self::with_cycles_per_ns(cycles_per_ns())
    }

    /// Create a timer with a known ticks-per-nanosecond value.
    ///
    /// Useful when calibration has already been done for this machine.
    /// Non-positive or non-finite rates fall back to 1 tick per nanosecond.
    pub fn with_cycles_per_ns(cycles_per_ns: f64) -> Self {
        let cycles_per_ns = if cycles_per_ns.is_finite() && cycles_per_ns > 0.0 {
            cycles_per_ns
        } else {
            1.0
        };
        Self { cycles_per_ns }
    }

    /// Get the calibrated ticks per nanosecond.
    pub fn cycles_per_ns(&self) -> f64 {
        self.cycles_per_ns
    }

    /// Convert ticks to nanoseconds using the calibrated ratio.
    #[inline]
    pub fn cycles_to_ns(&self, cycles: u64) -> u64 {
        (cycles as f64 / self.cycles_per_ns) as u64
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for Timer {
    #[inline]
    fn now(&self) -> u64 {
        rdtsc()
    }

    #[inline]
    fn ticks_to_ns(&self, ticks: u64) -> u64 {
        self.cycles_to_ns(ticks)
    }

    fn ticks_per_second(&self) -> u64 {
        (self.cycles_per_ns * 1e9) as u64
    }

    fn name(&self) -> &'static str {
        #[cfg(target_arch = "x86_64")]
        {
            "rdtsc"
        }
        #[cfg(target_arch = "aarch64")]
        {
            "cntvct_el0"
        }
        #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
        {
            "Instant"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rdtsc_monotonic() {
        let a = rdtsc();
        let b = rdtsc();
        assert!(b >= a || a.saturating_sub(b) < 1000);
    }

    #[test]
    fn test_cycles_per_ns_reasonable() {
        let cpn = cycles_per_ns();
        // ARM generic timers run at tens of MHz, x86 TSC at 1-5 GHz
        assert!(cpn > 0.01 && cpn < 10.0, "cycles_per_ns = {}", cpn);
    }

    #[test]
    fn test_conversion_uses_rate() {
        let timer = Timer::with_cycles_per_ns(2.0);
        assert_eq!(timer.cycles_to_ns(1000), 500);
        assert_eq!(timer.ticks_to_ns(0), 0);
        assert_eq!(timer.ticks_per_second(), 2_000_000_000);
    }

    #[test]
    fn test_invalid_rate_falls_back() {
        assert_eq!(Timer::with_cycles_per_ns(0.0).cycles_per_ns(), 1.0);
        assert_eq!(Timer::with_cycles_per_ns(f64::NAN).cycles_per_ns(), 1.0);
    }

    #[test]
    fn test_timer_advances_over_sleep() {
        let timer = Timer::new();
        let start = timer.now();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let elapsed_ns = timer.ticks_to_ns(timer.now().saturating_sub(start));
        assert!(elapsed_ns >= 1_000_000, "elapsed_ns = {}", elapsed_ns);
    }
}
