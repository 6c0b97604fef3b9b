//! Main `IpiStorm` entry point and builder.

use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use crate::config::{parse_bool, Config, ConfigError, CoreId};
use crate::error::{Error, SetupFailure, SetupFailureKind};
use crate::invoke::{Completion, Posted, RemoteFn, RemoteInvoker, Wait};
use crate::measurement::{ClockSpec, TimeSource};
use crate::preflight::{run_all_checks, SystemWarning};
use crate::rendezvous::{Role, RunState};
use crate::report::{Metadata, RunReport};
use crate::task::{source_loop, spawn_pinned, target_spin, Measurement};

/// Cross-core remote-call latency harness.
///
/// Configure with the builder methods, then [`run`](Self::run) it with a
/// remote invoker:
///
/// ```ignore
/// use ipistorm::{IpiStorm, SignalInvoker};
///
/// let invoker = SignalInvoker::new()?;
/// let report = IpiStorm::new()
///     .source(0)
///     .target(2)
///     .timeout_secs(5)
///     .run(&invoker)?;
/// println!("{}", ipistorm::output::format_report(&report));
/// ```
///
/// Each run pins one thread to the target core and one to the source core,
/// and times how long each remote call takes to land on the target.
/// Nothing is shared between runs.
#[derive(Debug, Clone)]
pub struct IpiStorm {
    config: Config,
    clock_spec: ClockSpec,
    preflight: bool,
    report_path: Option<PathBuf>,
}

impl Default for IpiStorm {
    fn default() -> Self {
        Self::new()
    }
}

impl IpiStorm {
    /// Create with default configuration: CPU0 -> CPU1, 10 s, blocking calls.
    pub fn new() -> Self {
        Self {
            config: Config::default(),
            clock_spec: ClockSpec::Auto,
            preflight: true,
            report_path: None,
        }
    }

    /// Create from an existing configuration.
    pub fn with_config(config: Config) -> Self {
        Self {
            config,
            ..Self::new()
        }
    }

    /// Merge configuration from environment variables.
    ///
    /// Reads `IPISTORM_TIMEOUT`, `IPISTORM_WAIT`, `IPISTORM_SOURCE`,
    /// `IPISTORM_TARGET`, `IPISTORM_DELAY`, `IPISTORM_CLOCK` and
    /// `IPISTORM_REPORT`. Unset variables leave the current value alone;
    /// unparseable ones are ignored with a warning.
    pub fn from_env(mut self) -> Self {
        if let Some(secs) = parse_env("IPISTORM_TIMEOUT", |v| v.parse::<u64>().ok()) {
            self.config.timeout_secs = secs;
        }
        if let Some(wait) = parse_env("IPISTORM_WAIT", parse_bool) {
            self.config.completion = Completion::from_wait(wait);
        }
        if let Some(core) = parse_env("IPISTORM_SOURCE", |v| v.parse::<CoreId>().ok()) {
            self.config.source = core;
        }
        if let Some(core) = parse_env("IPISTORM_TARGET", |v| v.parse::<CoreId>().ok()) {
            self.config.target = core;
        }
        if let Some(us) = parse_env("IPISTORM_DELAY", |v| v.parse::<u64>().ok()) {
            self.config.delay_us = us;
        }
        if let Some(spec) = parse_env("IPISTORM_CLOCK", |v| v.parse::<ClockSpec>().ok()) {
            self.clock_spec = spec;
        }
        if let Ok(path) = env::var("IPISTORM_REPORT") {
            self.report_path = Some(PathBuf::from(path));
        }
        self
    }

    /// Run duration in seconds.
    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.config.timeout_secs = secs;
        self
    }

    /// Block on every call (`true`, the default) or post and move on.
    pub fn wait(mut self, wait: bool) -> Self {
        self.config.completion = Completion::from_wait(wait);
        self
    }

    /// Set the call variant directly.
    pub fn completion(mut self, completion: Completion) -> Self {
        self.config.completion = completion;
        self
    }

    /// Core that issues the calls.
    pub fn source(mut self, core: CoreId) -> Self {
        self.config.source = core;
        self
    }

    /// Core that receives the calls.
    pub fn target(mut self, core: CoreId) -> Self {
        self.config.target = core;
        self
    }

    /// Randomized pause between calls, in microseconds. 0 disables it.
    pub fn delay_us(mut self, us: u64) -> Self {
        self.config.delay_us = us;
        self
    }

    /// Clock used when running with [`run`](Self::run).
    pub fn clock_spec(mut self, spec: ClockSpec) -> Self {
        self.clock_spec = spec;
        self
    }

    /// Enable or disable the system preflight checks (default: enabled).
    pub fn preflight(mut self, enabled: bool) -> Self {
        self.preflight = enabled;
        self
    }

    /// Also write the report as JSON to `path` after a successful run.
    pub fn report_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.report_path = Some(path.into());
        self
    }

    /// Apply a `key=value` parameter (`timeout`, `wait`, `source`, `target`,
    /// `delay`).
    pub fn param(mut self, param: &str) -> Result<Self, ConfigError> {
        self.config.apply_param(param)?;
        Ok(self)
    }

    /// Current configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Current clock selection.
    pub fn clock(&self) -> ClockSpec {
        self.clock_spec
    }

    /// Run once with the configured clock.
    ///
    /// The configuration is validated before the clock is calibrated.
    pub fn run<I>(&self, invoker: &I) -> Result<RunReport, Error>
    where
        I: RemoteInvoker + ?Sized,
    {
        self.config.validate()?;
        let clock = self.clock_spec.create_clock();
        self.run_with(clock, invoker)
    }

    /// Run once with an explicit clock.
    ///
    /// Both tasks and the remote call read `clock`; timestamps from the two
    /// cores must therefore be comparable on it.
    pub fn run_with<C, I>(&self, clock: C, invoker: &I) -> Result<RunReport, Error>
    where
        C: TimeSource + Clone + 'static,
        I: RemoteInvoker + ?Sized,
    {
        let run_start = Instant::now();
        let config = &self.config;
        config.validate()?;

        let warnings = if self.preflight {
            run_all_checks(config.source, config.target)
        } else {
            Vec::new()
        };
        if config.completion == Completion::Posted {
            tracing::warn!(
                "posted mode: calls are not awaited, samples time the send and may read a stale timestamp"
            );
        }
        tracing::info!(
            source_core = config.source,
            target_core = config.target,
            timeout_secs = config.timeout_secs,
            completion = %config.completion,
            delay_us = config.delay_us,
            clock = clock.name(),
            invoker = invoker.name(),
            "starting run"
        );

        let undelivered_before = invoker.undelivered();
        let state = Arc::new(RunState::new());
        let call: RemoteFn = {
            let state = Arc::clone(&state);
            let clock = clock.clone();
            Arc::new(move || state.stamp(clock.now()))
        };

        let measurement = thread::scope(|scope| -> Result<Measurement, Error> {
            let target = spawn_pinned(
                scope,
                Role::Target,
                config.target,
                || invoker.attach(config.target).map_err(SetupFailureKind::Attach),
                || {
                    target_spin(&state);
                    invoker.detach(config.target);
                },
            )?;

            let source = spawn_pinned(
                scope,
                Role::Source,
                config.source,
                || Ok(()),
                || measure(config, &state, &clock, invoker, &call),
            );
            let source = match source {
                Ok(handle) => handle,
                Err(failure) => {
                    state.request_stop();
                    let _ = target.join();
                    return Err(failure.into());
                }
            };

            let measured = source.join();
            if !matches!(measured, Ok(Some(_))) {
                state.request_stop();
            }
            let target_done = target.join();

            let measurement = match measured {
                Ok(Some(measurement)) => measurement,
                Ok(None) => {
                    return Err(SetupFailure {
                        role: Role::Source,
                        core: config.source,
                        kind: SetupFailureKind::Exited,
                    }
                    .into())
                }
                Err(_) => return Err(Error::TaskPanicked(Role::Source)),
            };
            if target_done.is_err() {
                return Err(Error::TaskPanicked(Role::Target));
            }
            Ok(measurement)
        })?;

        let undelivered = invoker.undelivered().saturating_sub(undelivered_before);
        if undelivered > 0 {
            tracing::warn!(undelivered, "some calls found no receiver and were timed anyway");
        }
        let report = assemble_report(
            config,
            measurement,
            warnings,
            &clock,
            invoker,
            undelivered,
            run_start.elapsed().as_secs_f64(),
        );
        tracing::info!(
            iterations = report.iterations,
            min_ns = report.latency.map(|l| l.min_ns),
            avg_ns = report.latency.map(|l| l.avg_ns),
            max_ns = report.latency.map(|l| l.max_ns),
            "run complete"
        );

        if let Some(path) = &self.report_path {
            report.write_json(path)?;
            tracing::debug!(path = %path.display(), "report written");
        }
        Ok(report)
    }
}

/// Turn a finished measurement into a report.
fn assemble_report<C, I>(
    config: &Config,
    measurement: Measurement,
    warnings: Vec<SystemWarning>,
    clock: &C,
    invoker: &I,
    undelivered: u64,
    runtime_secs: f64,
) -> RunReport
where
    C: TimeSource,
    I: RemoteInvoker + ?Sized,
{
    let latency = measurement.stats.summary();
    if latency.is_none() {
        tracing::warn!(
            timeout_secs = config.timeout_secs,
            "no remote call completed; reporting an empty run"
        );
    }

    RunReport {
        source: config.source,
        target: config.target,
        completion: config.completion,
        iterations: measurement.stats.count(),
        latency,
        histogram: measurement.histogram,
        warnings,
        metadata: Metadata {
            clock: clock.name().to_string(),
            cycles_per_ns: clock.ticks_per_second() as f64 / 1e9,
            invoker: invoker.name().to_string(),
            undelivered,
            timeout_secs: config.timeout_secs,
            delay_us: config.delay_us,
            elapsed_secs: clock.ticks_to_ns(measurement.elapsed_ticks) as f64 / 1e9,
            runtime_secs,
        },
    }
}

/// Run the source loop compiled for the configured call variant.
fn measure<C, I>(
    config: &Config,
    state: &RunState,
    clock: &C,
    invoker: &I,
    call: &RemoteFn,
) -> Measurement
where
    C: TimeSource,
    I: RemoteInvoker + ?Sized,
{
    match config.completion {
        Completion::Wait => source_loop::<C, I, Wait>(
            state,
            clock,
            invoker,
            call,
            config.target,
            config.timeout_secs,
            config.delay_us,
        ),
        Completion::Posted => source_loop::<C, I, Posted>(
            state,
            clock,
            invoker,
            call,
            config.target,
            config.timeout_secs,
            config.delay_us,
        ),
    }
}

fn parse_env<T>(key: &str, parse: impl FnOnce(&str) -> Option<T>) -> Option<T> {
    let raw = env::var(key).ok()?;
    let parsed = parse(raw.trim());
    if parsed.is_none() {
        tracing::warn!(key, value = %raw, "ignoring unparseable environment variable");
    }
    parsed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invoke::SyntheticInvoker;
    use crate::measurement::VirtualClock;

    #[test]
    fn test_builder_sets_config() {
        let storm = IpiStorm::new()
            .timeout_secs(3)
            .wait(false)
            .source(2)
            .target(5)
            .delay_us(100)
            .clock_spec(ClockSpec::Monotonic)
            .preflight(false);

        let config = storm.config();
        assert_eq!(config.timeout_secs, 3);
        assert_eq!(config.completion, Completion::Posted);
        assert_eq!((config.source, config.target), (2, 5));
        assert_eq!(config.delay_us, 100);
        assert_eq!(storm.clock(), ClockSpec::Monotonic);
    }

    #[test]
    fn test_param_builder() {
        let storm = IpiStorm::new().param("timeout=1").unwrap().param("wait=0").unwrap();
        assert_eq!(storm.config().timeout_secs, 1);
        assert_eq!(storm.config().completion, Completion::Posted);
        assert!(IpiStorm::new().param("bogus=1").is_err());
    }

    /// Drives the source loop and report assembly on the calling thread, so
    /// the whole report path runs even where two cores cannot be pinned.
    #[test]
    fn test_unpinned_loop_produces_formatted_report() {
        let config = Config {
            timeout_secs: 1,
            ..Config::default()
        };
        let clock = VirtualClock::new();
        let invoker = SyntheticInvoker::new(clock.clone(), 2_000);
        let state = Arc::new(RunState::new());
        let call: RemoteFn = {
            let state = Arc::clone(&state);
            let clock = clock.clone();
            Arc::new(move || state.stamp(clock.now()))
        };
        state.mark_ready(Role::Target);

        let measurement = measure(&config, &state, &clock, &invoker, &call);
        let report = assemble_report(&config, measurement, Vec::new(), &clock, &invoker, 0, 0.0);

        assert_eq!(report.iterations, 500_000);
        assert_eq!(report.histogram.count(10), 500_000);
        assert_eq!(report.metadata.elapsed_secs, 1.0);
        let text = crate::output::format_report(&report);
        assert!(text.contains("CPU0 -> CPU1"), "{}", text);
        assert!(text.contains("500000 IPIs completed"), "{}", text);
        assert!(text.contains("min=2000ns max=2000ns avg=2000ns"), "{}", text);
        assert!(text.contains("ns < 1024 = 500000\n"), "{}", text);
        let json = crate::output::to_json(&report).unwrap();
        assert!(json.contains("\"undelivered\":0"), "{}", json);
    }

    #[test]
    fn test_same_core_is_rejected_before_spawning() {
        let clock = VirtualClock::new();
        let invoker = SyntheticInvoker::new(clock.clone(), 500);
        let result = IpiStorm::new()
            .source(1)
            .target(1)
            .preflight(false)
            .run_with(clock, &invoker);
        assert!(matches!(
            result,
            Err(Error::Config(ConfigError::SameCore { core: 1 }))
        ));
    }
}
