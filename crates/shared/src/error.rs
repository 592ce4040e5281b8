use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{KeypadId, PollRef, VotingTarget};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Forbidden,
    NotFound,
    Validation,
    Device,
    TargetMismatch,
    NoActiveSession,
    Internal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum VotingError {
    #[error("vote collector: {0}")]
    Device(String),
    #[error("keypad {0} is not registered")]
    UnknownKeypad(KeypadId),
    #[error("unknown target {0}")]
    UnknownTarget(String),
    #[error("invalid target: {0}")]
    InvalidTarget(String),
    #[error("invalid vote value '{0}'")]
    InvalidVoteValue(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("another voting is active")]
    TargetMismatch { requested: VotingTarget },
    #[error("anonymous keypads cannot use the list of speakers")]
    AnonymousNotAllowed,
    #[error("no voting session is active")]
    NoActiveSession,
    #[error("internal error: {0}")]
    Internal(String),
}

impl VotingError {
    pub fn unknown_poll(poll: PollRef) -> Self {
        Self::UnknownTarget(poll.to_string())
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Device(_) => ErrorCode::Device,
            Self::UnknownKeypad(_) | Self::UnknownTarget(_) => ErrorCode::NotFound,
            Self::InvalidTarget(_) | Self::InvalidVoteValue(_) | Self::InvalidRequest(_) => {
                ErrorCode::Validation
            }
            Self::TargetMismatch { .. } => ErrorCode::TargetMismatch,
            Self::AnonymousNotAllowed => ErrorCode::Forbidden,
            Self::NoActiveSession => ErrorCode::NoActiveSession,
            Self::Internal(_) => ErrorCode::Internal,
        }
    }
}

impl From<VotingError> for ApiError {
    fn from(value: VotingError) -> Self {
        Self {
            code: value.code(),
            message: value.to_string(),
        }
    }
}
