//! `ipistorm` command line.
//!
//! Settings are merged in order: defaults, `IPISTORM_*` environment
//! variables, positional `key=value` parameters, then flags.

use std::path::PathBuf;
use std::process::ExitCode;
use std::str::FromStr;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use ipistorm::output::{format_report, to_json_pretty};
use ipistorm::{parse_bool, ClockSpec, IpiStorm, RunReport, SignalInvoker, SyntheticInvoker};

/// Measure remote call (IPI) latency between two pinned CPU cores.
#[derive(Debug, Parser)]
#[command(name = "ipistorm", version)]
struct Args {
    /// Parameters in `key=value` form (timeout, wait, source, target, delay)
    params: Vec<String>,

    /// Run duration in seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Wait for each call to complete (y/n, on/off, 1/0)
    #[arg(long, value_parser = parse_wait)]
    wait: Option<bool>,

    /// Core issuing the calls
    #[arg(long)]
    source: Option<usize>,

    /// Core receiving the calls
    #[arg(long)]
    target: Option<usize>,

    /// Randomized pause between calls in microseconds
    #[arg(long)]
    delay: Option<u64>,

    /// Clock: auto, cycle, monotonic
    #[arg(long)]
    clock: Option<ClockSpec>,

    /// Invoker: `signal`, or `synthetic[:<latency_ns>]` for a dry run
    #[arg(long, default_value = "signal")]
    invoker: InvokerChoice,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,

    /// Also write the JSON report to this file
    #[arg(long)]
    report: Option<PathBuf>,

    /// Skip the system preflight checks
    #[arg(long)]
    no_preflight: bool,
}

#[derive(Debug, Clone, Copy)]
enum InvokerChoice {
    Signal,
    Synthetic { latency_ns: u64 },
}

const DEFAULT_SYNTHETIC_NS: u64 = 500;

impl FromStr for InvokerChoice {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().split_once(':') {
            None if s.trim() == "signal" => Ok(InvokerChoice::Signal),
            None if s.trim() == "synthetic" => Ok(InvokerChoice::Synthetic {
                latency_ns: DEFAULT_SYNTHETIC_NS,
            }),
            Some(("synthetic", ns)) => ns
                .parse()
                .map(|latency_ns| InvokerChoice::Synthetic { latency_ns })
                .map_err(|_| format!("invalid synthetic latency '{}'", ns)),
            _ => Err(format!(
                "unknown invoker '{}' (expected signal or synthetic[:ns])",
                s
            )),
        }
    }
}

fn parse_wait(s: &str) -> Result<bool, String> {
    parse_bool(s).ok_or_else(|| format!("invalid boolean '{}'", s))
}

fn main() -> ExitCode {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .try_init();

    let args = Args::parse();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("ipistorm: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let mut storm = IpiStorm::new().from_env();
    for param in &args.params {
        storm = storm.param(param)?;
    }
    if let Some(secs) = args.timeout {
        storm = storm.timeout_secs(secs);
    }
    if let Some(wait) = args.wait {
        storm = storm.wait(wait);
    }
    if let Some(core) = args.source {
        storm = storm.source(core);
    }
    if let Some(core) = args.target {
        storm = storm.target(core);
    }
    if let Some(us) = args.delay {
        storm = storm.delay_us(us);
    }
    if let Some(spec) = args.clock {
        storm = storm.clock_spec(spec);
    }
    if let Some(path) = args.report {
        storm = storm.report_path(path);
    }
    if args.no_preflight {
        storm = storm.preflight(false);
    }

    let report = execute(&storm, args.invoker)?;

    if args.json {
        println!("{}", to_json_pretty(&report)?);
    } else {
        print!("{}", format_report(&report));
    }
    Ok(())
}

fn execute(storm: &IpiStorm, choice: InvokerChoice) -> Result<RunReport, ipistorm::Error> {
    match choice {
        InvokerChoice::Signal => {
            let invoker = SignalInvoker::new()?;
            storm.run(&invoker)
        }
        InvokerChoice::Synthetic { latency_ns } => {
            storm.config().validate()?;
            let clock = storm.clock().create_clock();
            let invoker = SyntheticInvoker::new(clock.clone(), latency_ns);
            storm.run_with(clock, &invoker)
        }
    }
}
