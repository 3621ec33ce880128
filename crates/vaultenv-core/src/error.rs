use std::path::PathBuf;

use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Identity error: {0}")]
    Identity(String),

    #[error("Signed assertion expired at {expired_at}; create a new session")]
    AssertionExpired { expired_at: DateTime<Utc> },

    #[error("HTTP {status} from {url}: {body}")]
    Transport {
        status: StatusCode,
        url: String,
        body: String,
    },

    #[error("Unexpected response shape: {0}")]
    DataShape(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Not authenticated - call login first")]
    NotAuthenticated,

    #[error("Secret '{key}' cannot be set in the environment: {reason}")]
    InvalidEnvEntry { key: String, reason: &'static str },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl Error {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            return body.to_string();
        }
        let mut end = MAX_ERROR_BODY_LENGTH;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
    }

    pub fn from_status(status: StatusCode, url: &str, body: &str) -> Self {
        Error::Transport {
            status,
            url: url.to_string(),
            body: Self::truncate_body(body),
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    /// HTTP status carried by a transport failure, if any.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Error::Transport { status, .. } => Some(*status),
            Error::Network(e) => e.status(),
            _ => None,
        }
    }
}
