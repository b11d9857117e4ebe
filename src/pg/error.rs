//! Error types for the PostgreSQL wire client.

use std::collections::HashMap;
use std::io;

use thiserror::Error;

/// Result type for wire client operations.
pub type PgResult<T> = Result<T, PgError>;

/// Errors that can occur while talking to a PostgreSQL server.
#[derive(Error, Debug)]
pub enum PgError {
    /// I/O error during communication.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Unexpected message, malformed frame or bad configuration.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Authentication failed or is unsupported.
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Server returned an ErrorResponse.
    #[error("{severity}: {message} (SQLSTATE {code}){}{}", fmt_detail(.detail), fmt_hint(.hint))]
    Server {
        severity: String,
        code: String,
        message: String,
        detail: Option<String>,
        hint: Option<String>,
    },

    /// Value could not be converted.
    #[error("Type error: {0}")]
    Type(String),

    /// The server closed the socket, or `close` was already called.
    #[error("Connection is closed")]
    ConnectionClosed,
}

impl PgError {
    /// Build a server error from ErrorResponse fields.
    pub fn from_fields(fields: &HashMap<u8, String>) -> Self {
        PgError::Server {
            severity: fields.get(&b'S').cloned().unwrap_or_default(),
            code: fields.get(&b'C').cloned().unwrap_or_default(),
            message: fields.get(&b'M').cloned().unwrap_or_default(),
            detail: fields.get(&b'D').cloned(),
            hint: fields.get(&b'H').cloned(),
        }
    }

    /// SQLSTATE code for server errors.
    pub fn code(&self) -> Option<&str> {
        match self {
            PgError::Server { code, .. } => Some(code),
            _ => None,
        }
    }
}

fn fmt_detail(detail: &Option<String>) -> String {
    detail
        .as_ref()
        .map(|d| format!("\nDetail: {d}"))
        .unwrap_or_default()
}

fn fmt_hint(hint: &Option<String>) -> String {
    hint.as_ref()
        .map(|h| format!("\nHint: {h}"))
        .unwrap_or_default()
}
