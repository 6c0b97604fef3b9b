//! The two pinned tasks and the helpers that start them.
//!
//! Setup (pinning, invoker attach) is reported back to the harness over a
//! one-shot channel before the task enters its running state. After that the
//! tasks coordinate only through [`RunState`].

use std::sync::mpsc;
use std::thread::{self, Scope, ScopedJoinHandle};
use std::time::Duration;

use rand::Rng;

use crate::config::CoreId;
use crate::error::{SetupFailure, SetupFailureKind};
use crate::invoke::{Dispatch, RemoteFn, RemoteInvoker};
use crate::measurement::{Log2Histogram, RunStatistics, TimeSource};
use crate::rendezvous::{Role, RunState};

/// Result of the source task's timed loop.
#[derive(Debug, Clone)]
pub(crate) struct Measurement {
    pub stats: RunStatistics,
    pub histogram: Log2Histogram,
    /// Ticks between loop start and the deadline check that ended it.
    pub elapsed_ticks: u64,
}

/// Pin the calling thread to `core`.
pub(crate) fn pin_current(core: CoreId) -> Result<(), SetupFailureKind> {
    let cores = core_affinity::get_core_ids().ok_or(SetupFailureKind::Topology)?;
    let id = cores
        .iter()
        .copied()
        .find(|c| c.id == core)
        .ok_or(SetupFailureKind::NoSuchCore {
            available: cores.len(),
        })?;
    if core_affinity::set_for_current(id) {
        Ok(())
    } else {
        Err(SetupFailureKind::Pin)
    }
}

/// Thread name for a task.
pub(crate) fn thread_name(role: Role, core: CoreId) -> String {
    match role {
        Role::Target => format!("ipistorm_target/{}", core),
        Role::Source => format!("ipistorm/{}", core),
    }
}

/// Spawn a scoped thread pinned to `core`, run `setup` on it, and wait for
/// the outcome before returning.
///
/// `body` only runs after setup succeeded. On failure the thread is joined
/// before the error is returned, so nothing is left running.
pub(crate) fn spawn_pinned<'scope, 'env, T, S, B>(
    scope: &'scope Scope<'scope, 'env>,
    role: Role,
    core: CoreId,
    setup: S,
    body: B,
) -> Result<ScopedJoinHandle<'scope, Option<T>>, SetupFailure>
where
    T: Send + 'scope,
    S: FnOnce() -> Result<(), SetupFailureKind> + Send + 'scope,
    B: FnOnce() -> T + Send + 'scope,
{
    let (ack_tx, ack_rx) = mpsc::sync_channel(1);
    let failure = |kind| SetupFailure { role, core, kind };

    let handle = thread::Builder::new()
        .name(thread_name(role, core))
        .spawn_scoped(scope, move || {
            let outcome = pin_current(core).and_then(|()| setup());
            let started = outcome.is_ok();
            let _ = ack_tx.send(outcome);
            if !started {
                return None;
            }
            Some(body())
        })
        .map_err(|e| failure(SetupFailureKind::Spawn(e)))?;

    match ack_rx.recv() {
        Ok(Ok(())) => {
            tracing::debug!(%role, core, "task pinned");
            Ok(handle)
        }
        Ok(Err(kind)) => {
            let _ = handle.join();
            Err(failure(kind))
        }
        Err(_) => {
            let _ = handle.join();
            Err(failure(SetupFailureKind::Exited))
        }
    }
}

/// Target side: announce readiness, then spin until told to stop.
///
/// The loop body is a bare spin hint. The core stays in user mode so each
/// remote call has to interrupt it.
pub(crate) fn target_spin(state: &RunState) {
    state.mark_ready(Role::Target);
    while !state.is_stop_requested() {
        std::hint::spin_loop();
    }
}

/// Source side: handshake, timed loop, stop.
///
/// Each iteration reads the clock once; that read is both the deadline check
/// and the sample's start. Nothing in the loop logs or allocates.
pub(crate) fn source_loop<C, I, D>(
    state: &RunState,
    clock: &C,
    invoker: &I,
    call: &RemoteFn,
    target: CoreId,
    timeout_secs: u64,
    delay_us: u64,
) -> Measurement
where
    C: TimeSource + ?Sized,
    I: RemoteInvoker + ?Sized,
    D: Dispatch,
{
    state.mark_ready(Role::Source);
    state.wait_ready(Role::Target);
    let completion = D::COMPLETION;
    tracing::debug!(target_core = target, %completion, "handshake complete");

    let budget = clock.ticks_per_second().saturating_mul(timeout_secs);
    let delay_ns = delay_us.saturating_mul(1_000);
    let mut rng = rand::rng();
    let mut stats = RunStatistics::new();
    let mut histogram = Log2Histogram::new();

    let start = clock.now();
    let elapsed_ticks = loop {
        let tb = clock.now();
        let elapsed = tb.wrapping_sub(start);
        if elapsed >= budget {
            break elapsed;
        }

        D::issue(invoker, target, call);

        let delta = clock.ticks_to_ns(state.remote_timestamp().saturating_sub(tb));
        stats.update(delta);
        histogram.record(delta);

        if delay_ns > 0 {
            let pause = rng.random_range(delay_ns..=delay_ns.saturating_add(999));
            thread::sleep(Duration::from_nanos(pause));
        }
    };

    state.request_stop();
    Measurement {
        stats,
        histogram,
        elapsed_ticks,
    }
}
