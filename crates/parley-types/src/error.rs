use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure classes shared by the gateway, the REST layer and the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    /// Missing or invalid credential.
    Authentication,
    /// Request is missing required fields or is malformed.
    Validation,
    /// Caller is authenticated but not allowed to touch the target.
    Forbidden,
    /// Database read or write failed.
    Persistence,
    /// Connection dropped or could not be established.
    Network,
}

#[derive(Debug, Clone, Error)]
#[error("{kind:?}: {message}")]
pub struct ChatError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ChatError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn authentication(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Authentication, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Forbidden, message)
    }

    pub fn persistence(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Persistence, message)
    }
}
