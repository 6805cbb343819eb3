use thiserror::Error;

use crate::transport::Endpoint;

/// Failure categories the capture workflow distinguishes.
///
/// Only `Transport` failures on disposition requests are allowed to coexist
/// with a session reset; every other kind leaves session state untouched.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Operation invoked in a phase where it is meaningless.
    Protocol,
    /// Service answered with a status or shape the client does not know.
    UnrecognizedDiscriminant,
    /// Request could not complete, or the service reported a failure.
    Transport,
    /// Local input (image file) could not be used.
    Input,
}

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("{operation} rejected: {reason}")]
    ProtocolViolation {
        operation: &'static str,
        reason: String,
    },

    #[error("{endpoint} returned unrecognized status '{status}'")]
    UnrecognizedStatus { endpoint: Endpoint, status: String },

    #[error("{endpoint} returned a malformed response: {reason}")]
    MalformedResponse { endpoint: Endpoint, reason: String },

    #[error("{endpoint} reported an error: {message}")]
    ServiceError { endpoint: Endpoint, message: String },

    #[error("request to {endpoint} failed: {reason}")]
    Transport { endpoint: Endpoint, reason: String },

    #[error("image {path} is unusable: {reason}")]
    InvalidImage { path: String, reason: String },
}

impl CaptureError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CaptureError::ProtocolViolation { .. } => ErrorKind::Protocol,
            CaptureError::UnrecognizedStatus { .. } | CaptureError::MalformedResponse { .. } => {
                ErrorKind::UnrecognizedDiscriminant
            }
            CaptureError::ServiceError { .. } | CaptureError::Transport { .. } => {
                ErrorKind::Transport
            }
            CaptureError::InvalidImage { .. } => ErrorKind::Input,
        }
    }

    pub(crate) fn malformed(endpoint: Endpoint, reason: impl Into<String>) -> Self {
        CaptureError::MalformedResponse {
            endpoint,
            reason: reason.into(),
        }
    }

    pub(crate) fn transport(endpoint: Endpoint, reason: impl Into<String>) -> Self {
        CaptureError::Transport {
            endpoint,
            reason: reason.into(),
        }
    }
}
