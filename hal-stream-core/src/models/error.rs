use libc::{EAGAIN, EINTR, EINVAL, ENOMEM, ENOSYS, ETIMEDOUT};
use thiserror::Error;

use crate::traits::engine::EngineError;

/// Errors surfaced by stream session operations.
///
/// Every variant maps onto a negative errno-style status through
/// [`StreamError::status`] for callers that speak the framework ABI.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StreamError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("routing error: requested {expected} devices, resolved {resolved}")]
    Routing { expected: usize, resolved: usize },

    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("hardware rejected {op} with status {status}")]
    HardwareRejected { op: &'static str, status: i32 },

    #[error("no data after {retries} read attempts")]
    TransientUnavailable { retries: u32 },

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("operation not supported: {0}")]
    NotSupported(String),

    #[error("cancelled by standby")]
    Cancelled,

    #[error("timed out waiting for {0}")]
    Timeout(&'static str),
}

impl StreamError {
    /// Wrap an engine status for the named hardware operation.
    pub fn hardware(op: &'static str, err: EngineError) -> Self {
        Self::HardwareRejected { op, status: err.0 }
    }

    /// Negative errno-style status for this error.
    pub fn status(&self) -> i32 {
        match self {
            Self::Configuration(_) | Self::Routing { .. } | Self::InvalidState(_) => -EINVAL,
            Self::ResourceExhausted(_) => -ENOMEM,
            Self::HardwareRejected { status, .. } => {
                if *status < 0 {
                    *status
                } else {
                    -EINVAL
                }
            }
            Self::TransientUnavailable { .. } => -EAGAIN,
            Self::NotSupported(_) => -ENOSYS,
            Self::Cancelled => -EINTR,
            Self::Timeout(_) => -ETIMEDOUT,
        }
    }
}

/// Collapse a unit result into the framework's signed status convention.
pub fn status_of(result: &Result<(), StreamError>) -> i32 {
    match result {
        Ok(()) => 0,
        Err(e) => e.status(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_are_negative() {
        let errors = [
            StreamError::Configuration("bad".into()),
            StreamError::Routing { expected: 2, resolved: 1 },
            StreamError::ResourceExhausted("scratch".into()),
            StreamError::HardwareRejected { op: "start", status: 5 },
            StreamError::TransientUnavailable { retries: 25 },
            StreamError::InvalidState("closed".into()),
            StreamError::NotSupported("mmap".into()),
            StreamError::Cancelled,
            StreamError::Timeout("drain"),
        ];
        for e in errors {
            assert!(e.status() < 0, "{e} mapped to {}", e.status());
        }
    }

    #[test]
    fn engine_status_is_passed_through() {
        let err = StreamError::hardware("open", EngineError(-libc::ENODEV));
        assert_eq!(err.status(), -libc::ENODEV);
        assert_eq!(status_of(&Err(err)), -libc::ENODEV);
        assert_eq!(status_of(&Ok(())), 0);
    }

    #[test]
    fn errno_values() {
        assert_eq!(StreamError::ResourceExhausted("x".into()).status(), -libc::ENOMEM);
        assert_eq!(StreamError::NotSupported("x".into()).status(), -libc::ENOSYS);
        assert_eq!(StreamError::TransientUnavailable { retries: 1 }.status(), -libc::EAGAIN);
        assert_eq!(StreamError::Cancelled.status(), -libc::EINTR);
        assert_eq!(StreamError::Timeout("drain").status(), -libc::ETIMEDOUT);
    }
}
