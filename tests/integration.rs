//! End-to-end integration tests.
//!
//! Runs use the synthetic invoker, so they work on any machine with two
//! schedulable cores. Tests that need two cores print a skip line and return
//! when fewer are available; the unpinned path is covered by the unit tests
//! in `storm.rs`.

use std::sync::Mutex;
use std::time::Instant;

use ipistorm::output::format_report;
use ipistorm::{
    ClockSpec, Completion, ConfigError, Error, IpiStorm, RunReport, SyntheticInvoker, TimeSource,
    VirtualClock,
};

/// Every run spins two pinned threads; keep runs from competing for cores.
static SERIAL: Mutex<()> = Mutex::new(());

/// First two schedulable cores, or `None` after printing why `test` skips.
fn two_cores(test: &str) -> Option<(usize, usize)> {
    let cores = core_affinity::get_core_ids().unwrap_or_default();
    if cores.len() < 2 {
        eprintln!("[SKIPPED] {}: need at least two cores, found {}", test, cores.len());
        return None;
    }
    Some((cores[0].id, cores[1].id))
}

fn synthetic_run(storm: IpiStorm, latency_ns: u64) -> Result<RunReport, Error> {
    let clock = VirtualClock::new();
    let invoker = SyntheticInvoker::new(clock.clone(), latency_ns);
    storm.preflight(false).run_with(clock, &invoker)
}

fn assert_consistent(report: &RunReport) {
    assert_eq!(report.histogram.total(), report.iterations);
    match &report.latency {
        Some(latency) => {
            assert_eq!(latency.samples, report.iterations);
            assert!(latency.min_ns <= latency.avg_ns);
            assert!(latency.avg_ns <= latency.max_ns);
            assert_eq!(latency.avg_ns, latency.total_ns / latency.samples);
        }
        None => assert_eq!(report.iterations, 0),
    }
}

/// Fixed 500 ns latency on a virtual clock for one second.
#[test]
fn synthetic_latency_is_reported_exactly() {
    let _guard = SERIAL.lock().unwrap_or_else(|e| e.into_inner());
    let Some((source, target)) = two_cores("synthetic_latency_is_reported_exactly") else { return };

    let report = synthetic_run(
        IpiStorm::new().source(source).target(target).timeout_secs(1),
        500,
    )
    .unwrap();

    assert_consistent(&report);
    assert_eq!(report.iterations, 2_000_000);
    assert_eq!(report.histogram.count(8), report.iterations);
    let latency = report.latency.unwrap();
    assert_eq!((latency.min_ns, latency.max_ns, latency.avg_ns), (500, 500, 500));
    assert_eq!(report.metadata.clock, "virtual");
    assert_eq!(report.metadata.invoker, "synthetic");
    assert_eq!(report.metadata.elapsed_secs, 1.0);
    assert_eq!((report.source, report.target), (source, target));
}

/// Posted mode keeps the bookkeeping invariants even with stale reads.
#[test]
fn posted_mode_does_not_break_invariants() {
    let _guard = SERIAL.lock().unwrap_or_else(|e| e.into_inner());
    let Some((source, target)) = two_cores("posted_mode_does_not_break_invariants") else { return };

    let report = synthetic_run(
        IpiStorm::new().source(source).target(target).timeout_secs(1).wait(false),
        500,
    )
    .unwrap();

    assert_consistent(&report);
    assert_eq!(report.completion, Completion::Posted);
    assert!(report.iterations > 0);
    assert!(format_report(&report).contains("Posted mode"));
}

/// Zero timeout: no iteration, explicit empty report.
#[test]
fn zero_timeout_gives_empty_run() {
    let _guard = SERIAL.lock().unwrap_or_else(|e| e.into_inner());
    let Some((source, target)) = two_cores("zero_timeout_gives_empty_run") else { return };

    let report = synthetic_run(
        IpiStorm::new().source(source).target(target).timeout_secs(0),
        500,
    )
    .unwrap();

    assert!(report.is_empty());
    assert!(report.latency.is_none());
    assert_eq!(report.histogram.total(), 0);
    assert!(format_report(&report).contains("no samples"));
}

/// Repeated runs start from fresh state each time.
#[test]
fn repeated_runs_are_independent() {
    let _guard = SERIAL.lock().unwrap_or_else(|e| e.into_inner());
    let Some((source, target)) = two_cores("repeated_runs_are_independent") else { return };

    let storm = IpiStorm::new().source(source).target(target).timeout_secs(1);
    for _ in 0..3 {
        let report = synthetic_run(storm.clone(), 1_000).unwrap();
        assert_consistent(&report);
        assert_eq!(report.iterations, 1_000_000);
        assert_eq!(report.histogram.count(9), 1_000_000);
    }
}

/// A one-second run on a real clock ends shortly after one second.
#[test]
fn run_terminates_after_timeout() {
    let _guard = SERIAL.lock().unwrap_or_else(|e| e.into_inner());
    let Some((source, target)) = two_cores("run_terminates_after_timeout") else { return };

    let clock = ClockSpec::Monotonic.create_clock();
    let invoker = SyntheticInvoker::new(clock.clone(), 200);
    let started = Instant::now();
    let report = IpiStorm::new()
        .source(source)
        .target(target)
        .timeout_secs(1)
        .preflight(false)
        .run_with(clock, &invoker)
        .unwrap();
    let wall = started.elapsed().as_secs_f64();

    assert_consistent(&report);
    assert!(report.metadata.elapsed_secs >= 1.0);
    assert!(wall >= 1.0 && wall < 10.0, "wall time {:.2}s", wall);
    assert!(report.latency.unwrap().min_ns >= 200);
}

/// 1 ms pauses hold the call rate near 1000 per second.
#[test]
fn delay_bounds_call_rate() {
    let _guard = SERIAL.lock().unwrap_or_else(|e| e.into_inner());
    let Some((source, target)) = two_cores("delay_bounds_call_rate") else { return };

    let clock = ClockSpec::Monotonic.create_clock();
    let invoker = SyntheticInvoker::new(clock.clone(), 100);
    let report = IpiStorm::new()
        .source(source)
        .target(target)
        .timeout_secs(1)
        .delay_us(1_000)
        .preflight(false)
        .run_with(clock.clone(), &invoker)
        .unwrap();

    assert_consistent(&report);
    assert!(report.iterations <= 1_000, "iterations = {}", report.iterations);
    // Sleep overshoot costs some calls; a doubled pause or a unit slip
    // would drop the count far below this.
    assert!(report.iterations >= 300, "iterations = {}", report.iterations);
    // The pause sits outside the timed section.
    assert!(report.latency.unwrap().avg_ns < 1_000_000);
    assert_eq!(report.metadata.delay_us, 1_000);
    assert_eq!(clock.name(), "Instant");
}

#[test]
fn same_core_is_rejected() {
    let result = synthetic_run(IpiStorm::new().source(0).target(0).timeout_secs(1), 500);
    assert!(matches!(
        result,
        Err(Error::Config(ConfigError::SameCore { core: 0 }))
    ));
}

/// The report file is written when a path is configured.
#[test]
fn report_file_is_written() {
    let _guard = SERIAL.lock().unwrap_or_else(|e| e.into_inner());
    let Some((source, target)) = two_cores("report_file_is_written") else { return };

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("reports/run.json");
    let report = synthetic_run(
        IpiStorm::new()
            .source(source)
            .target(target)
            .timeout_secs(1)
            .report_path(&path),
        2_000,
    )
    .unwrap();

    let text = std::fs::read_to_string(&path).unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(parsed["iterations"], report.iterations);
    assert_eq!(parsed["latency"]["avg_ns"], 2_000);
}
