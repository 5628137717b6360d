use thiserror::Error;
use uuid::Uuid;

use parley_types::error::ErrorKind;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("unauthorized")]
    Unauthorized,

    #[error("request failed with status {0}")]
    Status(u16),

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("malformed response: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("not connected to the gateway")]
    NotConnected,

    #[error("unknown conversation {0}")]
    UnknownConversation(Uuid),

    #[error("{0}")]
    Validation(String),
}

impl ClientError {
    /// Where this failure sits in the shared taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Unauthorized => ErrorKind::Authentication,
            Self::Status(403) => ErrorKind::Forbidden,
            Self::Status(400) | Self::Validation(_) | Self::UnknownConversation(_) => {
                ErrorKind::Validation
            }
            Self::Status(_) | Self::Serialization(_) => ErrorKind::Persistence,
            Self::Transport(_) | Self::NotConnected => ErrorKind::Network,
        }
    }
}
