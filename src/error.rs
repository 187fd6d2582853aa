use thiserror::Error;

use crate::collab::SessionState;

/// Failure of a single remote request, as seen by the retrier.
#[derive(Error, Debug, Clone)]
pub enum RemoteError {
    /// The remote service answered with a non-success status.
    #[error("remote call failed with status {status}: {message}")]
    Status { status: u16, message: String },

    /// The request never produced a response (connect, timeout, decode).
    #[error("transport error: {0}")]
    Transport(String),

    /// Re-authorization was attempted and no access token could be retrieved.
    #[error("authorization failed: no access token could be retrieved")]
    AuthorizationFailed,
}

impl RemoteError {
    /// Whether this failure reports an expired or missing authorization.
    pub fn is_auth(&self) -> bool {
        matches!(self, RemoteError::Status { status: 401, .. })
    }
}

/// Errors raised by the file-manager layer.
#[derive(Error, Debug)]
pub enum FileError {
    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("entry not found: {0}")]
    NotFound(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("authorization error: {0}")]
    Auth(String),
}

/// Errors raised by the collaboration layer.
#[derive(Error, Debug)]
pub enum CollabError {
    #[error("file manager error: {0}")]
    File(#[from] FileError),

    #[error("shared document error: {0}")]
    Doc(#[from] loro::LoroError),

    #[error("shared document snapshot error: {0}")]
    Snapshot(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("room not found: {0}")]
    RoomNotFound(String),

    #[error("room already exists: {0}")]
    RoomExists(String),

    #[error("session is not attached to a shared document")]
    NotAttached,

    #[error("operation requires the session owner")]
    NotOwner,

    #[error("operation not valid in session state {0}")]
    InvalidState(SessionState),
}

/// Errors raised by the message sender.
#[derive(Error, Debug)]
pub enum MailError {
    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("no valid recipient address")]
    NoRecipients,
}

/// Errors raised by the token provider.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("token endpoint error: {0}")]
    Endpoint(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("environment variable error: {0}")]
    Env(#[from] envy::Error),
}
