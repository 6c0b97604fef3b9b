//! Remote execution: "run F on core C, optionally wait until it ran".
//!
//! The measurement loop only needs this one capability, expressed by
//! [`RemoteInvoker`]. It has two call variants on purpose:
//!
//! - [`RemoteInvoker::call_wait`] returns after the target core executed the
//!   call. Everything the call wrote is visible to the caller afterwards.
//! - [`RemoteInvoker::call_posted`] returns once the request is issued. The
//!   call may not have run yet, so a read of its side effects right after the
//!   return can observe an older value.
//!
//! The loop is compiled separately for each variant through the [`Dispatch`]
//! mode types, so the posted-mode accuracy caveat is a mode a caller selects
//! rather than a flag tested on every iteration.
//!
//! Implementations:
//! - `SignalInvoker` - Linux, directed signal to the thread pinned on the
//!   target core; the kernel delivers it with a cross-core interrupt
//! - `SyntheticInvoker` - runs the call inline after an injected latency

mod signal;
mod synthetic;

use std::fmt;
use std::io;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::CoreId;

pub use signal::SignalInvoker;
pub use synthetic::SyntheticInvoker;

/// A call to run on the target core.
///
/// Calls delivered by `SignalInvoker` execute in signal context and must be
/// async-signal-safe: read a clock, store to atomics, nothing that allocates
/// or locks.
pub type RemoteFn = Arc<dyn Fn() + Send + Sync>;

/// Whether a remote call blocks until the target has executed it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Completion {
    /// Block until the target ran the call. Measured latency is meaningful.
    #[default]
    Wait,
    /// Fire and forget. Measures posting cost; samples may be stale.
    Posted,
}

impl Completion {
    /// `Wait` when `wait` is true, `Posted` otherwise.
    pub fn from_wait(wait: bool) -> Self {
        if wait {
            Completion::Wait
        } else {
            Completion::Posted
        }
    }

    /// Whether calls block for completion.
    pub fn is_wait(&self) -> bool {
        matches!(self, Completion::Wait)
    }
}

impl fmt::Display for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Completion::Wait => write!(f, "wait"),
            Completion::Posted => write!(f, "posted"),
        }
    }
}

/// Capability to execute a call on another core.
///
/// The target task calls [`attach`](Self::attach) from its own pinned thread
/// before announcing readiness and [`detach`](Self::detach) after it stops,
/// so an invoker that needs a receiving thread (rather than a core) can find
/// one. Only one target may be attached at a time.
pub trait RemoteInvoker: Send + Sync {
    /// Invoker name for report metadata.
    fn name(&self) -> &'static str;

    /// Register the calling thread as the receiver for `core`.
    fn attach(&self, core: CoreId) -> Result<(), InvokeError> {
        let _ = core;
        Ok(())
    }

    /// Unregister the receiver for `core`.
    fn detach(&self, core: CoreId) {
        let _ = core;
    }

    /// Run `call` on `core` and return after it has executed.
    fn call_wait(&self, core: CoreId, call: &RemoteFn);

    /// Ask `core` to run `call` and return without waiting.
    fn call_posted(&self, core: CoreId, call: &RemoteFn);

    /// Calls so far that could not be handed to any receiver.
    ///
    /// A sample taken after such a call times nothing, so the harness
    /// reports how many of them a run produced.
    fn undelivered(&self) -> u64 {
        0
    }
}

/// Compile-time selection of a call variant.
pub trait Dispatch {
    /// The variant this mode issues.
    const COMPLETION: Completion;

    /// Issue one remote call.
    fn issue<I: RemoteInvoker + ?Sized>(invoker: &I, core: CoreId, call: &RemoteFn);
}

/// Blocking mode: every call completes before `issue` returns.
#[derive(Debug, Clone, Copy)]
pub struct Wait;

/// Posted mode: `issue` returns as soon as the call is requested.
#[derive(Debug, Clone, Copy)]
pub struct Posted;

impl Dispatch for Wait {
    const COMPLETION: Completion = Completion::Wait;

    #[inline]
    fn issue<I: RemoteInvoker + ?Sized>(invoker: &I, core: CoreId, call: &RemoteFn) {
        invoker.call_wait(core, call);
    }
}

impl Dispatch for Posted {
    const COMPLETION: Completion = Completion::Posted;

    #[inline]
    fn issue<I: RemoteInvoker + ?Sized>(invoker: &I, core: CoreId, call: &RemoteFn) {
        invoker.call_posted(core, call);
    }
}

/// Error type for invoker setup.
#[derive(Debug)]
pub enum InvokeError {
    /// This invoker cannot run on the current platform.
    UnsupportedPlatform(&'static str),
    /// Another instance already owns the process-wide delivery slot.
    Busy,
    /// A different core is already attached.
    AlreadyAttached {
        /// Core currently attached.
        core: CoreId,
    },
    /// An OS call failed.
    Os {
        /// Name of the failing call.
        op: &'static str,
        /// Underlying OS error.
        source: io::Error,
    },
}

impl fmt::Display for InvokeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvokeError::UnsupportedPlatform(what) => {
                write!(f, "{} is not supported on this platform", what)
            }
            InvokeError::Busy => write!(f, "another signal invoker is already active in this process"),
            InvokeError::AlreadyAttached { core } => {
                write!(f, "a target is already attached on CPU {}", core)
            }
            InvokeError::Os { op, source } => write!(f, "{} failed: {}", op, source),
        }
    }
}

impl std::error::Error for InvokeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            InvokeError::Os { source, .. } => Some(source),
            _ => None,
        }
    }
}
