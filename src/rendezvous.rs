//! Shared run state: the startup handshake, the stop flag, and the
//! timestamp cell the target stamps on every remote call.
//!
//! Every field has exactly one writer:
//! - `source_ready`: source task
//! - `target_ready`: target task
//! - `stop`: source task (the harness only when the source never started)
//! - `remote_timestamp`: the remote call running on the target core
//!
//! Flags go false -> true once per run and are never reset. Both tasks poll
//! them in busy loops, so each sits on its own cache line.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crossbeam_utils::CachePadded;
use serde::{Deserialize, Serialize};

/// Which of the two tasks a flag or failure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// The task that issues remote calls and measures them.
    Source,
    /// The task whose core receives the remote calls.
    Target,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Source => write!(f, "source"),
            Role::Target => write!(f, "target"),
        }
    }
}

/// Per-run shared state.
#[derive(Debug, Default)]
pub struct RunState {
    source_ready: CachePadded<AtomicBool>,
    target_ready: CachePadded<AtomicBool>,
    stop: CachePadded<AtomicBool>,
    remote_timestamp: CachePadded<AtomicU64>,
}

impl RunState {
    /// Fresh state for one run.
    pub fn new() -> Self {
        Self::default()
    }

    fn ready_flag(&self, role: Role) -> &AtomicBool {
        match role {
            Role::Source => &self.source_ready,
            Role::Target => &self.target_ready,
        }
    }

    /// Announce that `role` is pinned and running.
    #[inline]
    pub fn mark_ready(&self, role: Role) {
        self.ready_flag(role).store(true, Ordering::Release);
    }

    /// Whether `role` has announced itself.
    #[inline]
    pub fn is_ready(&self, role: Role) -> bool {
        self.ready_flag(role).load(Ordering::Acquire)
    }

    /// Spin until `role` has announced itself.
    #[inline]
    pub fn wait_ready(&self, role: Role) {
        while !self.is_ready(role) {
            std::hint::spin_loop();
        }
    }

    /// Tell the target to stop spinning.
    #[inline]
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    /// Whether a stop was requested.
    #[inline]
    pub fn is_stop_requested(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    /// Store the target-side timestamp.
    #[inline]
    pub fn stamp(&self, ticks: u64) {
        self.remote_timestamp.store(ticks, Ordering::Release);
    }

    /// Last timestamp stored by the target, 0 before the first call lands.
    #[inline]
    pub fn remote_timestamp(&self) -> u64 {
        self.remote_timestamp.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_flags_start_clear() {
        let state = RunState::new();
        assert!(!state.is_ready(Role::Source));
        assert!(!state.is_ready(Role::Target));
        assert!(!state.is_stop_requested());
        assert_eq!(state.remote_timestamp(), 0);
    }

    #[test]
    fn test_flags_are_independent() {
        let state = RunState::new();
        state.mark_ready(Role::Target);
        assert!(state.is_ready(Role::Target));
        assert!(!state.is_ready(Role::Source));
        state.request_stop();
        state.request_stop();
        assert!(state.is_stop_requested());
    }

    #[test]
    fn test_handshake_across_threads() {
        let state = Arc::new(RunState::new());

        let target = {
            let state = Arc::clone(&state);
            thread::spawn(move || {
                state.mark_ready(Role::Target);
                while !state.is_stop_requested() {}
                state.remote_timestamp()
            })
        };

        state.mark_ready(Role::Source);
        state.wait_ready(Role::Target);
        state.stamp(42);
        state.request_stop();

        assert_eq!(target.join().unwrap(), 42);
    }

    #[test]
    fn test_fields_do_not_share_cache_lines() {
        let line = std::mem::align_of::<CachePadded<AtomicBool>>();
        assert!(line >= 32);
        assert!(std::mem::size_of::<RunState>() >= 4 * line);
    }
}
