//! Preflight checks run before the two tasks start.
//!
//! Findings are informational. They are logged and carried into the report;
//! a run is never refused because of them.

mod system;

pub use system::{parse_cpu_list, system_check, tsc_invariant, SystemWarning};

use crate::config::CoreId;

/// Run all checks for a source/target pair and log each finding.
pub fn run_all_checks(source: CoreId, target: CoreId) -> Vec<SystemWarning> {
    let warnings = system_check(source, target);
    for warning in &warnings {
        tracing::warn!("{}", warning.description());
    }
    warnings
}
