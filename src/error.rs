//! Coordinator error types.
//!
//! Every error is reported back to the connection that caused it as an
//! `error{kind, message}` frame (or `registration-failed` for registration).
//! None of them are fatal to the process.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for coordinator operations.
pub type Result<T> = std::result::Result<T, CoordinatorError>;

/// Main error type for coordinator operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoordinatorError {
    /// The identity directory could not resolve or create a profile.
    #[error("Identity resolution failed: {0}")]
    IdentityResolution(String),

    /// The call target has no live registration.
    #[error("Target '{0}' is not reachable")]
    TargetUnreachable(String),

    /// A ringing or connected session already links this pair.
    #[error("A call between these participants is already active (session {0})")]
    SessionAlreadyActive(String),

    /// The appointment authorizer refused the call.
    #[error("Call not authorized: {0}")]
    Unauthorized(String),

    #[error("Session '{0}' not found")]
    SessionNotFound(String),

    /// The session exists but is not in a state that allows the operation.
    #[error("Session '{session_id}' is {state}, operation not allowed")]
    NotTerminalEligible { session_id: String, state: String },

    /// The caller is not the party allowed to perform this operation.
    #[error("Not authorized: {0}")]
    NotAuthorized(String),

    /// An external collaborator did not answer in time.
    #[error("{0} did not respond in time")]
    CollaboratorTimeout(String),

    /// The connection sent a call or signaling message before registering.
    #[error("Must register before sending other messages")]
    NotRegistered,

    /// The inbound frame could not be parsed.
    #[error("Invalid message format: {0}")]
    MalformedMessage(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

/// Stable error kind as it appears on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    IdentityResolutionError,
    TargetUnreachable,
    SessionAlreadyActive,
    Unauthorized,
    SessionNotFound,
    NotTerminalEligible,
    NotAuthorized,
    CollaboratorTimeout,
    NotRegistered,
    MalformedMessage,
    InvalidRequest,
}

impl CoordinatorError {
    /// Wire kind for this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoordinatorError::IdentityResolution(_) => ErrorKind::IdentityResolutionError,
            CoordinatorError::TargetUnreachable(_) => ErrorKind::TargetUnreachable,
            CoordinatorError::SessionAlreadyActive(_) => ErrorKind::SessionAlreadyActive,
            CoordinatorError::Unauthorized(_) => ErrorKind::Unauthorized,
            CoordinatorError::SessionNotFound(_) => ErrorKind::SessionNotFound,
            CoordinatorError::NotTerminalEligible { .. } => ErrorKind::NotTerminalEligible,
            CoordinatorError::NotAuthorized(_) => ErrorKind::NotAuthorized,
            CoordinatorError::CollaboratorTimeout(_) => ErrorKind::CollaboratorTimeout,
            CoordinatorError::NotRegistered => ErrorKind::NotRegistered,
            CoordinatorError::MalformedMessage(_) => ErrorKind::MalformedMessage,
            CoordinatorError::InvalidRequest(_) => ErrorKind::InvalidRequest,
        }
    }
}
