use std::path::PathBuf;

use thiserror::Error;

use crate::supervisor::ServiceStatus;

/// Errors from the control channel: connecting, issuing commands, tearing down.
#[derive(Error, Debug)]
pub enum CtrlError {
    #[error("supplicant is not running")]
    NotRunning,

    #[error("failed to open control socket {path}: {source}")]
    OpenFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to attach event socket: {0}")]
    AttachFailed(String),

    #[error("command timed out")]
    Timeout,

    #[error("command rejected by supplicant: {0}")]
    Rejected(String),

    #[error("not connected to supplicant")]
    NotConnected,

    #[error("control socket I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CtrlError {
    /// Whether a caller may reasonably retry the failed operation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CtrlError::NotRunning | CtrlError::Timeout)
    }
}

/// Errors from daemon lifecycle operations and the file provisioning they depend on.
#[derive(Error, Debug)]
pub enum LifecycleError {
    #[error("failed to provision {path}: {source}")]
    Provision {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("supervisor failed to {action} {service}: {source}")]
    Supervisor {
        action: &'static str,
        service: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{service} exited during startup")]
    StartFailed { service: String },

    #[error("timed out waiting for {service} to reach {target} state")]
    Timeout {
        service: String,
        target: ServiceStatus,
    },
}
