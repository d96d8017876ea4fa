use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while handling a consultation action
#[derive(Error, Debug)]
pub enum ConsultError {
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Chat has already ended")]
    ChatEnded,

    #[error("Chat must be ended before a report can be generated")]
    ChatNotEnded,

    #[error("Unsupported image type: {0}")]
    UnsupportedImage(String),

    #[error("Invalid patient details: {0}")]
    InvalidPatient(String),

    #[error("External service failed: {0}")]
    Service(#[from] ServiceError),

    #[error("Storage error: {0}")]
    StorageError(String),
}

pub type Result<T> = std::result::Result<T, ConsultError>;

/// Classification of an external-call failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum ServiceErrorKind {
    /// The collaborator is not configured for this deployment
    Unavailable,
    Timeout,
    Transport,
    Rejected { status: u16 },
    MalformedResponse,
}

impl ServiceErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceErrorKind::Unavailable => "unavailable",
            ServiceErrorKind::Timeout => "timeout",
            ServiceErrorKind::Transport => "transport",
            ServiceErrorKind::Rejected { .. } => "rejected",
            ServiceErrorKind::MalformedResponse => "malformed_response",
        }
    }
}

/// Failure of a single call into the model, vision or speech collaborator
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{}: {}", .kind.as_str(), .message)]
pub struct ServiceError {
    pub kind: ServiceErrorKind,
    pub message: String,
}

impl ServiceError {
    pub fn new(kind: ServiceErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(ServiceErrorKind::Unavailable, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ServiceErrorKind::Timeout, message)
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(ServiceErrorKind::Transport, message)
    }

    pub fn rejected(status: u16, message: impl Into<String>) -> Self {
        Self::new(ServiceErrorKind::Rejected { status }, message)
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(ServiceErrorKind::MalformedResponse, message)
    }
}

pub type ServiceResult<T> = std::result::Result<T, ServiceError>;
