//! Error types for mount control.
//!
//! [`MountError`] is the single error type returned by every device-facing
//! operation in the workspace. The variants follow the failure classes a mount
//! driver has to distinguish:
//!
//! - **Channel failures** - `Transport`, `Timeout`: the serial exchange itself
//!   failed. The command is considered not applied and the state machine does
//!   not transition.
//! - **Framing failures** - `Protocol`, `Rejected`: bytes arrived but were the
//!   wrong length or content, or the controller refused the command.
//! - **Intent failures** - `InvalidPierSide`, `InvalidTarget`, `InvalidParameter`,
//!   `InvalidState`, `Busy`: the request was rejected before any device I/O.
//! - **Telemetry** - `Telemetry`: a status poll failed while the mount was
//!   moving. The state machine keeps its last-known state and reports degraded
//!   status.
//!
//! No variant implies a retry. Retry policy belongs to the host.

use thiserror::Error;

/// Convenience alias for results using the mount error type.
pub type MountResult<T> = std::result::Result<T, MountError>;

/// Primary error type for mount drivers and the mount state machine.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MountError {
    /// Write or read on the serial channel failed.
    #[error("Transport error: {0}")]
    Transport(String),

    /// No response bytes arrived before the read deadline.
    ///
    /// **Error Type**: Transient - the host may retry the intent.
    #[error("Timed out waiting for reply to '{command}' after {timeout_ms} ms")]
    Timeout { command: String, timeout_ms: u64 },

    /// Response length or content did not match the expected frame.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The controller understood the command but refused it (e.g. target below horizon).
    #[error("Controller rejected '{command}': {reason}")]
    Rejected { command: String, reason: String },

    /// The coordinate transform could not resolve the pier side of a target.
    #[error("Cannot resolve pier side for target RA {ra_hours:.6}h")]
    InvalidPierSide { ra_hours: f64 },

    /// A conflicting motion owns the axis channel.
    #[error("Mount busy: {0}")]
    Busy(String),

    /// Position poll failed while the mount was moving.
    #[error("Telemetry error: {0}")]
    Telemetry(String),

    /// The intent is not valid from the current state.
    #[error("Invalid in state {state}: {intent}")]
    InvalidState { state: &'static str, intent: &'static str },

    /// Target coordinates outside their physical domain.
    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    /// Rate index, duration or similar argument out of range.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// The driver does not implement the requested operation.
    #[error("Operation not supported by {driver}: {operation}")]
    Unsupported {
        driver: &'static str,
        operation: &'static str,
    },

    /// Invalid or missing configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Settings could not be loaded or saved.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// The command queue of the mount service is closed.
    #[error("Mount service is not running")]
    Disconnected,
}

impl MountError {
    /// Whether the error leaves the device in an unknown position.
    ///
    /// Transport-level failures during a multi-step command may have applied
    /// the first sub-command; hosts typically follow up with a Sync.
    pub fn is_transport(&self) -> bool {
        matches!(self, MountError::Transport(_) | MountError::Timeout { .. })
    }

    /// Wrap any error from a status poll as a telemetry failure.
    pub fn into_telemetry(self) -> MountError {
        match self {
            MountError::Telemetry(_) => self,
            other => MountError::Telemetry(other.to_string()),
        }
    }
}

impl From<std::io::Error> for MountError {
    fn from(err: std::io::Error) -> Self {
        MountError::Transport(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn telemetry_wraps_once() {
        let err = MountError::Protocol("short reply".into()).into_telemetry();
        assert_eq!(
            err,
            MountError::Telemetry("Protocol error: short reply".into())
        );
        assert_eq!(err.clone().into_telemetry(), err);
    }

    #[test]
    fn transport_classification() {
        assert!(MountError::Timeout {
            command: ":GR#".into(),
            timeout_ms: 5000
        }
        .is_transport());
        assert!(MountError::from(std::io::Error::from(std::io::ErrorKind::BrokenPipe)).is_transport());
        assert!(!MountError::Busy("slewing".into()).is_transport());
    }
}
