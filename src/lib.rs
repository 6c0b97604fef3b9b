//! # ipistorm
//!
//! Measure how long it takes one CPU core to make another one run code.
//!
//! Two threads are pinned, one on a *source* core and one on a *target* core.
//! The target spins in user mode. The source repeatedly asks it, through a
//! [`RemoteInvoker`], to store the current timestamp, and records the time
//! between issuing the request and the stamp landing. After the configured
//! duration the run reports:
//! - Number of completed calls
//! - Min / max / average latency in nanoseconds
//! - A 32-bucket power-of-two histogram
//!
//! ## ⚠️ Posted Mode
//!
//! With `wait(false)` the source does not wait for the target to run each
//! call. The sample then times only the send, and the timestamp it reads may
//! belong to an earlier call or not be written yet (reported as 0 ns). This
//! mode exists to measure posting cost; its latencies are not round trips.
//!
//! ## Quick Start
//!
//! ```ignore
//! use ipistorm::{IpiStorm, SignalInvoker};
//!
//! let invoker = SignalInvoker::new()?;
//! let report = IpiStorm::new().source(0).target(1).timeout_secs(10).run(&invoker)?;
//! println!("{}", ipistorm::output::format_report(&report));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

// Core modules
mod config;
mod error;
mod report;
mod rendezvous;
mod storm;
mod task;

// Functional modules
pub mod invoke;
pub mod measurement;
pub mod output;
pub mod preflight;

// Re-exports for public API
pub use config::{parse_bool, Config, ConfigError, CoreId};
pub use error::{Error, SetupFailure, SetupFailureKind};
pub use invoke::{Completion, InvokeError, RemoteFn, RemoteInvoker, SignalInvoker, SyntheticInvoker};
pub use measurement::{ClockSpec, LatencySummary, Log2Histogram, TimeSource, Timer, VirtualClock};
pub use report::{Metadata, RunReport};
pub use rendezvous::{Role, RunState};
pub use storm::IpiStorm;
