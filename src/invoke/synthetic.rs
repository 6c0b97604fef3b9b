//! Invoker with a fixed, injected delivery latency.
//!
//! Calls run inline on the calling thread after the clock has been made to
//! pass `latency_ns`. With a [`VirtualClock`](crate::measurement::VirtualClock)
//! the result is fully deterministic: every blocking sample equals the
//! injected latency.
//!
//! Posted calls model delivery lag: a posted call is only executed when the
//! next one is posted, so the caller reads the previous stamp, exactly the
//! hazard a real posted IPI has.

use std::sync::Mutex;

use super::{RemoteFn, RemoteInvoker};
use crate::config::CoreId;
use crate::measurement::TimeSource;

/// Deterministic stand-in for a real cross-core mechanism.
pub struct SyntheticInvoker<C> {
    clock: C,
    latency_ns: u64,
    pending: Mutex<Option<RemoteFn>>,
}

impl<C: std::fmt::Debug> std::fmt::Debug for SyntheticInvoker<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyntheticInvoker")
            .field("clock", &self.clock)
            .field("latency_ns", &self.latency_ns)
            .finish_non_exhaustive()
    }
}

impl<C: TimeSource> SyntheticInvoker<C> {
    /// Deliver calls `latency_ns` after they are issued, as seen by `clock`.
    pub fn new(clock: C, latency_ns: u64) -> Self {
        Self {
            clock,
            latency_ns,
            pending: Mutex::new(None),
        }
    }

    /// The injected latency.
    pub fn latency_ns(&self) -> u64 {
        self.latency_ns
    }

    fn take_pending(&self, replacement: Option<RemoteFn>) -> Option<RemoteFn> {
        let mut pending = match self.pending.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        std::mem::replace(&mut *pending, replacement)
    }
}

impl<C: TimeSource> RemoteInvoker for SyntheticInvoker<C> {
    fn name(&self) -> &'static str {
        "synthetic"
    }

    fn detach(&self, _core: CoreId) {
        // Undelivered posted calls are lost with the receiver.
        self.take_pending(None);
    }

    #[inline]
    fn call_wait(&self, _core: CoreId, call: &RemoteFn) {
        self.clock.elapse(self.latency_ns);
        call();
    }

    #[inline]
    fn call_posted(&self, _core: CoreId, call: &RemoteFn) {
        if let Some(previous) = self.take_pending(Some(call.clone())) {
            previous();
        }
        self.clock.elapse(self.latency_ns);
    }
}
