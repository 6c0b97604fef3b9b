//! System-level preflight checks.
//!
//! Platform-specific checks for conditions that distort cross-core latency:
//! frequency scaling on either core, shared physical cores, and a tick
//! counter that is not synchronized across cores.

use serde::{Deserialize, Serialize};

use crate::config::CoreId;

/// Warning from system checks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SystemWarning {
    /// CPU frequency scaling is not set to performance mode.
    CpuGovernorNotPerformance {
        /// Core the governor belongs to.
        core: CoreId,
        /// Current governor setting.
        current: String,
        /// Recommended governor.
        recommended: String,
    },

    /// Could not read CPU governor (permission or path issue).
    CpuGovernorUnreadable {
        /// Core whose governor was queried.
        core: CoreId,
        /// Error message.
        reason: String,
    },

    /// Turbo boost is enabled (core clocks drift with load).
    TurboBoostEnabled,

    /// Source and target are hyperthreads of one physical core.
    SmtSiblings {
        /// Source core.
        source: CoreId,
        /// Target core.
        target: CoreId,
    },

    /// The CPU does not advertise an invariant TSC.
    TscNotInvariant,

    /// Running in a virtual machine.
    VirtualMachineDetected {
        /// Type of VM if known.
        vm_type: Option<String>,
    },

    /// High system load detected.
    HighSystemLoad {
        /// Current load average.
        load_average: f64,
        /// Threshold exceeded.
        threshold: f64,
    },
}

impl SystemWarning {
    /// Get a human-readable description of the warning.
    pub fn description(&self) -> String {
        match self {
            SystemWarning::CpuGovernorNotPerformance {
                core,
                current,
                recommended,
            } => {
                format!(
                    "CPU {} frequency governor is '{}', recommend '{}' for stable latency. \
                     Set with: sudo cpupower -c {} frequency-set -g performance",
                    core, current, recommended, core
                )
            }
            SystemWarning::CpuGovernorUnreadable { core, reason } => {
                format!("Could not check CPU {} governor: {}.", core, reason)
            }
            SystemWarning::TurboBoostEnabled => {
                "Turbo boost is enabled. The spinning target and the busy source \
                 boost to different clocks, so interrupt entry on the target \
                 speeds up or slows down with package temperature."
                    .to_string()
            }
            SystemWarning::SmtSiblings { source, target } => {
                format!(
                    "CPU {} and CPU {} are SMT siblings of one physical core; \
                     the measured latency does not cross cores.",
                    source, target
                )
            }
            SystemWarning::TscNotInvariant => {
                "The CPU does not report an invariant TSC (constant_tsc, nonstop_tsc). \
                 Timestamps from different cores may not be comparable; \
                 consider --clock monotonic."
                    .to_string()
            }
            SystemWarning::VirtualMachineDetected { vm_type } => {
                let vm_info = vm_type
                    .as_ref()
                    .map(|t| format!(" ({})", t))
                    .unwrap_or_default();
                format!(
                    "Running under a hypervisor{}. Cross-core interrupts trap to the host \
                     and vCPUs may not map to the requested physical cores.",
                    vm_info
                )
            }
            SystemWarning::HighSystemLoad {
                load_average,
                threshold,
            } => {
                format!(
                    "Load average {:.2} exceeds the {:.2} cores left idle beside the \
                     two pinned tasks; the scheduler will preempt them.",
                    load_average, threshold
                )
            }
        }
    }
}

/// Perform all system checks for a source/target pair.
///
/// On unsupported platforms, returns an empty vector.
pub fn system_check(source: CoreId, target: CoreId) -> Vec<SystemWarning> {
    #[allow(unused_mut)]
    let mut warnings = Vec::new();

    #[cfg(target_os = "linux")]
    {
        for core in [source, target] {
            if let Some(warning) = check_cpu_governor_linux(core) {
                warnings.push(warning);
            }
        }
        let read = |path: &str| std::fs::read_to_string(path).ok();
        if turbo_enabled(
            read("/sys/devices/system/cpu/intel_pstate/no_turbo").as_deref(),
            read("/sys/devices/system/cpu/cpufreq/boost").as_deref(),
        ) {
            warnings.push(SystemWarning::TurboBoostEnabled);
        }
        if let Some(warning) = check_smt_siblings_linux(source, target) {
            warnings.push(warning);
        }

        let cpuinfo = std::fs::read_to_string("/proc/cpuinfo").unwrap_or_default();
        if cfg!(target_arch = "x86_64") && tsc_invariant(&cpuinfo) == Some(false) {
            warnings.push(SystemWarning::TscNotInvariant);
        }
        if has_cpu_flag(&cpuinfo, "hypervisor") {
            let vm_type = read("/sys/class/dmi/id/sys_vendor")
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty());
            warnings.push(SystemWarning::VirtualMachineDetected { vm_type });
        }
        let online = core_affinity::get_core_ids().map_or(0, |cores| cores.len());
        if let Some(warning) = read("/proc/loadavg").and_then(|text| load_warning(&text, online)) {
            warnings.push(warning);
        }
    }

    #[cfg(not(target_os = "linux"))]
    let _ = (source, target);

    warnings
}

/// Parse a sysfs CPU list such as `0-3,8,10-11`.
///
/// Malformed entries are skipped.
pub fn parse_cpu_list(list: &str) -> Vec<CoreId> {
    let mut cores = Vec::new();
    for part in list.trim().split(',').map(str::trim).filter(|p| !p.is_empty()) {
        match part.split_once('-') {
            Some((lo, hi)) => {
                if let (Ok(lo), Ok(hi)) = (lo.parse::<CoreId>(), hi.parse::<CoreId>()) {
                    cores.extend(lo..=hi);
                }
            }
            None => {
                if let Ok(core) = part.parse() {
                    cores.push(core);
                }
            }
        }
    }
    cores
}

/// Whether `/proc/cpuinfo` text advertises an invariant TSC.
///
/// `None` when there is no `flags` line to judge by.
pub fn tsc_invariant(cpuinfo: &str) -> Option<bool> {
    cpu_flags(cpuinfo)?;
    Some(has_cpu_flag(cpuinfo, "constant_tsc") && has_cpu_flag(cpuinfo, "nonstop_tsc"))
}

/// The first `flags` line of `/proc/cpuinfo`, after the colon.
fn cpu_flags(cpuinfo: &str) -> Option<&str> {
    cpuinfo
        .lines()
        .find(|line| line.starts_with("flags"))?
        .split_once(':')
        .map(|(_, flags)| flags)
}

fn has_cpu_flag(cpuinfo: &str, flag: &str) -> bool {
    cpu_flags(cpuinfo).is_some_and(|flags| flags.split_whitespace().any(|f| f == flag))
}

/// Whether frequency boost is on, given the contents of
/// `intel_pstate/no_turbo` and `cpufreq/boost`.
///
/// The intel_pstate knob wins when present; it is inverted.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn turbo_enabled(no_turbo: Option<&str>, boost: Option<&str>) -> bool {
    match (no_turbo.map(str::trim), boost.map(str::trim)) {
        (Some(no_turbo), _) => no_turbo == "0",
        (None, Some(boost)) => boost == "1",
        (None, None) => false,
    }
}

/// Load warning from `/proc/loadavg` text on a machine with `online` cores.
///
/// The two pinned tasks each keep a core at 100%, so only the remaining
/// cores can absorb other runnable work.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn load_warning(loadavg: &str, online: usize) -> Option<SystemWarning> {
    let load: f64 = loadavg.split_whitespace().next()?.parse().ok()?;
    let threshold = online.saturating_sub(2).max(1) as f64;
    (load > threshold).then_some(SystemWarning::HighSystemLoad {
        load_average: load,
        threshold,
    })
}

/// Check CPU frequency governor of one core on Linux.
#[cfg(target_os = "linux")]
fn check_cpu_governor_linux(core: CoreId) -> Option<SystemWarning> {
    let governor_path = format!("/sys/devices/system/cpu/cpu{}/cpufreq/scaling_governor", core);

    match std::fs::read_to_string(governor_path) {
        Ok(governor) => {
            let governor = governor.trim().to_lowercase();
            if governor != "performance" {
                Some(SystemWarning::CpuGovernorNotPerformance {
                    core,
                    current: governor,
                    recommended: "performance".to_string(),
                })
            } else {
                None
            }
        }
        Err(e) => Some(SystemWarning::CpuGovernorUnreadable {
            core,
            reason: e.to_string(),
        }),
    }
}

#[cfg(target_os = "linux")]
fn check_smt_siblings_linux(source: CoreId, target: CoreId) -> Option<SystemWarning> {
    let path = format!("/sys/devices/system/cpu/cpu{}/topology/thread_siblings_list", source);
    let siblings = parse_cpu_list(&std::fs::read_to_string(path).ok()?);
    if siblings.contains(&target) {
        Some(SystemWarning::SmtSiblings { source, target })
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_check_runs() {
        // Just verify it doesn't panic
        let _warnings = system_check(0, 1);
    }

    #[test]
    fn test_parse_cpu_list() {
        assert_eq!(parse_cpu_list("0-3,8\n"), vec![0, 1, 2, 3, 8]);
        assert_eq!(parse_cpu_list("2,34"), vec![2, 34]);
        assert_eq!(parse_cpu_list("5"), vec![5]);
        assert_eq!(parse_cpu_list("x,1-y,7"), vec![7]);
        assert!(parse_cpu_list("").is_empty());
    }

    #[test]
    fn test_tsc_invariant() {
        let good = "processor\t: 0\nflags\t\t: fpu tsc constant_tsc nonstop_tsc rdtscp\n";
        let bad = "processor\t: 0\nflags\t\t: fpu tsc constant_tsc\n";
        assert_eq!(tsc_invariant(good), Some(true));
        assert_eq!(tsc_invariant(bad), Some(false));
        assert_eq!(tsc_invariant("Features\t: fp asimd\n"), None);
        assert!(has_cpu_flag(good, "rdtscp"));
        assert!(!has_cpu_flag(good, "hypervisor"));
        assert!(!has_cpu_flag("Features\t: fp asimd\n", "fp"));
    }

    #[test]
    fn test_turbo_enabled() {
        assert!(turbo_enabled(Some("0\n"), None));
        assert!(!turbo_enabled(Some("1\n"), Some("1\n")));
        assert!(turbo_enabled(None, Some("1\n")));
        assert!(!turbo_enabled(None, Some("0")));
        assert!(!turbo_enabled(None, None));
    }

    #[test]
    fn test_load_warning_leaves_room_for_pinned_tasks() {
        let loadavg = "3.50 2.10 1.00 4/512 12345\n";
        assert_eq!(
            load_warning(loadavg, 4),
            Some(SystemWarning::HighSystemLoad {
                load_average: 3.5,
                threshold: 2.0,
            })
        );
        assert_eq!(load_warning(loadavg, 8), None);
        // Two cores or fewer: anything past one runnable task is too much.
        assert!(load_warning("1.20 0 0 1/1 1", 2).is_some());
        assert_eq!(load_warning("garbage", 4), None);
    }

    #[test]
    fn test_warning_descriptions() {
        let warning = SystemWarning::CpuGovernorNotPerformance {
            core: 3,
            current: "powersave".to_string(),
            recommended: "performance".to_string(),
        };
        let desc = warning.description();
        assert!(desc.contains("CPU 3"));
        assert!(desc.contains("powersave"));

        let desc = SystemWarning::SmtSiblings { source: 0, target: 4 }.description();
        assert!(desc.contains("CPU 0") && desc.contains("CPU 4"));

        let warning = SystemWarning::VirtualMachineDetected {
            vm_type: Some("QEMU".to_string()),
        };
        let desc = warning.description();
        assert!(desc.contains("hypervisor"));
        assert!(desc.contains("QEMU"));

        let warning = SystemWarning::HighSystemLoad {
            load_average: 2.5,
            threshold: 1.0,
        };
        assert!(warning.description().contains("2.50"));
    }
}
