//! Error types for a run.

use std::fmt;
use std::io;
use std::path::PathBuf;

use crate::config::{ConfigError, CoreId};
use crate::invoke::InvokeError;
use crate::rendezvous::Role;

/// Why a task could not reach its running state.
#[derive(Debug)]
pub enum SetupFailureKind {
    /// The core is not in the set of cores this process may run on.
    NoSuchCore {
        /// Number of cores that are available.
        available: usize,
    },
    /// The OS did not report a core list.
    Topology,
    /// Setting the thread affinity failed.
    Pin,
    /// The invoker refused the receiving thread.
    Attach(InvokeError),
    /// The thread could not be spawned.
    Spawn(io::Error),
    /// The task exited before reporting its setup result.
    Exited,
}

/// A task failed to start. Fatal for the run; nothing is retried.
#[derive(Debug)]
pub struct SetupFailure {
    /// Task that failed.
    pub role: Role,
    /// Core it was meant to run on.
    pub core: CoreId,
    /// What went wrong.
    pub kind: SetupFailureKind,
}

impl fmt::Display for SetupFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} task on CPU {}: ", self.role, self.core)?;
        match &self.kind {
            SetupFailureKind::NoSuchCore { available } => {
                write!(f, "no such core ({} available)", available)
            }
            SetupFailureKind::Topology => write!(f, "could not enumerate cores"),
            SetupFailureKind::Pin => write!(f, "could not pin thread"),
            SetupFailureKind::Attach(e) => write!(f, "invoker attach failed: {}", e),
            SetupFailureKind::Spawn(e) => write!(f, "could not spawn thread: {}", e),
            SetupFailureKind::Exited => write!(f, "exited during setup"),
        }
    }
}

impl std::error::Error for SetupFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.kind {
            SetupFailureKind::Attach(e) => Some(e),
            SetupFailureKind::Spawn(e) => Some(e),
            _ => None,
        }
    }
}

/// Top-level error of a run.
#[derive(Debug)]
pub enum Error {
    /// Configuration rejected before any thread was created.
    Config(ConfigError),
    /// The invoker could not be created.
    Invoker(InvokeError),
    /// A task failed to start.
    Setup(SetupFailure),
    /// A task panicked.
    TaskPanicked(Role),
    /// Failed to write the report file.
    ReportIo {
        /// Path we attempted to write.
        path: PathBuf,
        /// Underlying IO error.
        source: io::Error,
    },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Config(e) => write!(f, "invalid configuration: {}", e),
            Error::Invoker(e) => write!(f, "remote invoker unavailable: {}", e),
            Error::Setup(e) => write!(f, "setup failed: {}", e),
            Error::TaskPanicked(role) => write!(f, "{} task panicked", role),
            Error::ReportIo { path, source } => {
                write!(f, "failed to write report to {}: {}", path.display(), source)
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Config(e) => Some(e),
            Error::Invoker(e) => Some(e),
            Error::Setup(e) => Some(e),
            Error::TaskPanicked(_) => None,
            Error::ReportIo { source, .. } => Some(source),
        }
    }
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Error::Config(e)
    }
}

impl From<InvokeError> for Error {
    fn from(e: InvokeError) -> Self {
        Error::Invoker(e)
    }
}

impl From<SetupFailure> for Error {
    fn from(e: SetupFailure) -> Self {
        Error::Setup(e)
    }
}
