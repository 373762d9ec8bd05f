use std::result;

use thiserror::Error;

/// The global `Result` alias of the crate.
pub type Result<T> = result::Result<T, Error>;

/// The global `Error` enum of the crate.
///
/// `Validation` and `AuthMissing` are raised before any network call.
/// `Network`, `Remote` and `NotFound` come back from the remote client.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid input: {0}")]
    Validation(String),
    #[error("no authentication token, please log in")]
    AuthMissing,
    #[error("network error: {0}")]
    Network(String),
    #[error("remote error {status} ({code}): {message}")]
    Remote {
        status: u16,
        code: String,
        message: String,
    },
    #[error("not found: {0}")]
    NotFound(String),
    #[error("local storage error")]
    Storage(#[from] sqlx::Error),
    #[error("session store error: {0}")]
    Session(String),
    #[error("cannot decode {0}")]
    Decode(String),
}

impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Error::Remote {
            status: 401,
            code: "unauthorized".to_string(),
            message: message.into(),
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Error::Remote { status: 401, .. })
    }

    /// Failures that came back from (or on the way to) the remote service.
    pub fn is_remote_failure(&self) -> bool {
        matches!(
            self,
            Error::Network(_) | Error::Remote { .. } | Error::NotFound(_)
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Decode(err.to_string())
    }
}
