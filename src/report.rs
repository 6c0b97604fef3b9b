//! Result of a run.

use std::fs;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::CoreId;
use crate::error::Error;
use crate::invoke::Completion;
use crate::measurement::{LatencySummary, Log2Histogram};
use crate::preflight::SystemWarning;

/// Everything a run produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    /// Core that issued the calls.
    pub source: CoreId,
    /// Core that received them.
    pub target: CoreId,
    /// Call variant the loop used.
    pub completion: Completion,
    /// Completed calls.
    pub iterations: u64,
    /// Min/max/avg, `None` when no call completed.
    pub latency: Option<LatencySummary>,
    /// Power-of-two histogram; its total equals `iterations`.
    pub histogram: Log2Histogram,
    /// Preflight findings.
    pub warnings: Vec<SystemWarning>,
    /// How the numbers were obtained.
    pub metadata: Metadata,
}

/// Run context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metadata {
    /// Clock name (rdtsc, cntvct_el0, Instant, virtual).
    pub clock: String,
    /// Ticks per nanosecond of that clock.
    pub cycles_per_ns: f64,
    /// Remote invoker name.
    pub invoker: String,
    /// Calls the invoker could not deliver during this run.
    #[serde(default)]
    pub undelivered: u64,
    /// Configured duration in seconds.
    pub timeout_secs: u64,
    /// Configured pause between calls in microseconds.
    pub delay_us: u64,
    /// Measured loop duration in seconds.
    pub elapsed_secs: f64,
    /// Wall time of the whole run including setup, in seconds.
    pub runtime_secs: f64,
}

impl RunReport {
    /// True when no call completed.
    pub fn is_empty(&self) -> bool {
        self.iterations == 0
    }

    /// Whether the numbers carry the posted-mode caveat.
    pub fn is_posted(&self) -> bool {
        self.completion == Completion::Posted
    }

    /// Write the report as pretty JSON, creating parent directories.
    pub fn write_json(&self, path: &Path) -> Result<(), Error> {
        let io_err = |source: io::Error| Error::ReportIo {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let file = fs::File::create(path).map_err(io_err)?;
        serde_json::to_writer_pretty(file, self).map_err(|err| io_err(io::Error::other(err)))
    }
}
