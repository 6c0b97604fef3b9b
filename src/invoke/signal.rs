//! Remote calls delivered as directed signals (Linux).
//!
//! The target task attaches its pinned thread. Each call publishes the
//! [`RemoteFn`] in a process-wide slot and sends `SIGUSR1` to that thread
//! with `pthread_kill`. Because the receiver is busy-spinning in user mode on
//! another core, the kernel kicks that core with a reschedule IPI to deliver
//! the signal, and the handler runs the call on the target core.
//!
//! The handler acknowledges every delivery by bumping a counter; `call_wait`
//! spins on that counter, which also orders the call's stores before the
//! caller's subsequent reads.
//!
//! # Requirements
//!
//! - Linux
//! - Nothing else in the process may use `SIGUSR1`
//! - Calls must be async-signal-safe (see [`RemoteFn`])
//! - Only one `SignalInvoker` may exist at a time

use super::{InvokeError, RemoteFn, RemoteInvoker};
use crate::config::CoreId;

#[cfg(target_os = "linux")]
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicU64, AtomicUsize, Ordering};
#[cfg(target_os = "linux")]
use std::sync::{Arc, Mutex};
#[cfg(target_os = "linux")]
use std::{io, ptr};

#[cfg(target_os = "linux")]
const IPI_SIGNAL: libc::c_int = libc::SIGUSR1;

#[cfg(target_os = "linux")]
const DETACHED: usize = usize::MAX;

/// Set while a `SignalInvoker` exists.
#[cfg(target_os = "linux")]
static CLAIMED: AtomicBool = AtomicBool::new(false);

/// Call the handler runs; null when nothing is armed.
#[cfg(target_os = "linux")]
static CALL: AtomicPtr<RemoteFn> = AtomicPtr::new(ptr::null_mut());

/// Deliveries handled so far.
#[cfg(target_os = "linux")]
static ACKS: AtomicU64 = AtomicU64::new(0);

#[cfg(target_os = "linux")]
extern "C" fn on_signal(_signal: libc::c_int) {
    let call = CALL.load(Ordering::Acquire);
    if !call.is_null() {
        // SAFETY: pointers published in CALL point at boxes owned by the live
        // invoker. They are freed only by `detach`, after the signal has been
        // blocked on the one thread that receives it.
        unsafe { (*call)() };
    }
    ACKS.fetch_add(1, Ordering::Release);
}

#[cfg(target_os = "linux")]
fn install_handler() -> io::Result<()> {
    // SAFETY: plain sigaction setup with a zeroed struct and an
    // async-signal-safe handler.
    unsafe {
        let mut action: libc::sigaction = std::mem::zeroed();
        action.sa_sigaction = on_signal as extern "C" fn(libc::c_int) as libc::sighandler_t;
        action.sa_flags = libc::SA_RESTART;
        libc::sigemptyset(&mut action.sa_mask);
        if libc::sigaction(IPI_SIGNAL, &action, ptr::null_mut()) != 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

/// Change whether `IPI_SIGNAL` can be delivered to the calling thread.
#[cfg(target_os = "linux")]
fn set_signal_mask(how: libc::c_int) -> io::Result<()> {
    // SAFETY: the set lives on this stack frame for the duration of the call.
    unsafe {
        let mut set: libc::sigset_t = std::mem::zeroed();
        libc::sigemptyset(&mut set);
        libc::sigaddset(&mut set, IPI_SIGNAL);
        let rc = libc::pthread_sigmask(how, &set, ptr::null_mut());
        if rc != 0 {
            return Err(io::Error::from_raw_os_error(rc));
        }
    }
    Ok(())
}

/// Remote invoker backed by directed signals.
#[cfg(target_os = "linux")]
pub struct SignalInvoker {
    /// Attached core, or `DETACHED`.
    core: AtomicUsize,
    /// `pthread_t` of the attached thread.
    thread: AtomicU64,
    /// Data address of the call currently published in `CALL`, 0 if none.
    armed_id: AtomicUsize,
    /// Calls armed during the current attachment. Drained by `detach` once
    /// the receiver can no longer run the handler.
    armed: Mutex<Vec<Box<RemoteFn>>>,
    /// Calls that found no attached receiver.
    undelivered: AtomicU64,
}

#[cfg(target_os = "linux")]
impl SignalInvoker {
    /// Claim the process-wide delivery slot and install the handler.
    ///
    /// # Errors
    ///
    /// - `Busy` if another `SignalInvoker` is alive
    /// - `Os` if the handler cannot be installed
    pub fn new() -> Result<Self, InvokeError> {
        if CLAIMED.swap(true, Ordering::AcqRel) {
            return Err(InvokeError::Busy);
        }
        if let Err(source) = install_handler() {
            CLAIMED.store(false, Ordering::Release);
            return Err(InvokeError::Os {
                op: "sigaction",
                source,
            });
        }
        tracing::debug!(signal = IPI_SIGNAL, "signal invoker installed");
        Ok(Self {
            core: AtomicUsize::new(DETACHED),
            thread: AtomicU64::new(0),
            armed_id: AtomicUsize::new(0),
            armed: Mutex::new(Vec::new()),
            undelivered: AtomicU64::new(0),
        })
    }

    fn lock_armed(&self) -> std::sync::MutexGuard<'_, Vec<Box<RemoteFn>>> {
        match self.armed.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Publish `call` for the handler unless it is already the armed one.
    #[inline]
    fn arm(&self, call: &RemoteFn) {
        let id = call_id(call);
        if self.armed_id.load(Ordering::Acquire) == id {
            return;
        }

        let mut armed = self.lock_armed();
        let mut boxed = Box::new(Arc::clone(call));
        let raw: *mut RemoteFn = &mut *boxed;
        armed.push(boxed);
        CALL.store(raw, Ordering::Release);
        self.armed_id.store(id, Ordering::Release);
    }

    /// Signal the thread attached for `core`. False if none is attached.
    #[inline]
    fn kick(&self, core: CoreId) -> bool {
        if self.core.load(Ordering::Acquire) != core {
            return false;
        }
        let thread = self.thread.load(Ordering::Relaxed) as libc::pthread_t;
        // SAFETY: the attached thread stays alive until it detaches, and the
        // source never calls after the target has been told to stop.
        unsafe { libc::pthread_kill(thread, IPI_SIGNAL) == 0 }
    }
}

/// Identity of a call: the address of the closure it shares.
#[cfg(target_os = "linux")]
#[inline]
fn call_id(call: &RemoteFn) -> usize {
    Arc::as_ptr(call) as *const () as usize
}

#[cfg(target_os = "linux")]
impl RemoteInvoker for SignalInvoker {
    fn name(&self) -> &'static str {
        "signal"
    }

    fn attach(&self, core: CoreId) -> Result<(), InvokeError> {
        let current = self.core.load(Ordering::Acquire);
        if current != DETACHED {
            return Err(InvokeError::AlreadyAttached { core: current });
        }
        set_signal_mask(libc::SIG_UNBLOCK).map_err(|source| InvokeError::Os {
            op: "pthread_sigmask",
            source,
        })?;
        // SAFETY: pthread_self has no preconditions.
        let thread = unsafe { libc::pthread_self() };
        self.thread.store(thread as u64, Ordering::Relaxed);
        self.core.store(core, Ordering::Release);
        Ok(())
    }

    fn detach(&self, core: CoreId) {
        if self
            .core
            .compare_exchange(core, DETACHED, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        // Only the attached thread is ever signalled, and this is it. Once the
        // signal is blocked here no handler can be running, so the armed
        // calls (and whatever they captured) can be released. A signal still
        // pending is discarded when the thread exits.
        if let Err(e) = set_signal_mask(libc::SIG_BLOCK) {
            tracing::warn!(error = %e, "could not block the signal on detach; keeping armed calls");
            return;
        }
        let mut armed = self.lock_armed();
        CALL.store(ptr::null_mut(), Ordering::Release);
        self.armed_id.store(0, Ordering::Release);
        armed.clear();
    }

    fn undelivered(&self) -> u64 {
        self.undelivered.load(Ordering::Relaxed)
    }

    #[inline]
    fn call_wait(&self, core: CoreId, call: &RemoteFn) {
        self.arm(call);
        let seen = ACKS.load(Ordering::Acquire);
        if !self.kick(core) {
            self.undelivered.fetch_add(1, Ordering::Relaxed);
            return;
        }
        while ACKS.load(Ordering::Acquire) == seen {
            std::hint::spin_loop();
        }
    }

    #[inline]
    fn call_posted(&self, core: CoreId, call: &RemoteFn) {
        self.arm(call);
        if !self.kick(core) {
            self.undelivered.fetch_add(1, Ordering::Relaxed);
        }
    }
}

#[cfg(target_os = "linux")]
impl Drop for SignalInvoker {
    fn drop(&mut self) {
        // The handler stays installed: a straggling signal then only bumps
        // the ack counter instead of hitting SIGUSR1's default action.
        CALL.store(ptr::null_mut(), Ordering::Release);
        CLAIMED.store(false, Ordering::Release);
    }
}

#[cfg(target_os = "linux")]
impl std::fmt::Debug for SignalInvoker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let core = self.core.load(Ordering::Relaxed);
        f.debug_struct("SignalInvoker")
            .field("attached", &(core != DETACHED).then_some(core))
            .finish()
    }
}

// Stub implementation for non-Linux platforms
#[cfg(not(target_os = "linux"))]
/// Stub invoker for non-Linux platforms.
///
/// Construction always fails with `UnsupportedPlatform`.
#[derive(Debug)]
pub struct SignalInvoker {
    _private: (),
}

#[cfg(not(target_os = "linux"))]
impl SignalInvoker {
    /// The signal invoker is only available on Linux.
    pub fn new() -> Result<Self, InvokeError> {
        Err(InvokeError::UnsupportedPlatform("signal invoker"))
    }
}

#[cfg(not(target_os = "linux"))]
impl RemoteInvoker for SignalInvoker {
    fn name(&self) -> &'static str {
        "signal"
    }

    fn call_wait(&self, _core: CoreId, _call: &RemoteFn) {}

    fn call_posted(&self, _core: CoreId, _call: &RemoteFn) {}
}
