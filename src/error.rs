//! Error types for the probes.
//!
//! Every failure a probe can hit maps to one variant; the top-level handler
//! in [`crate::cli`] treats them all alike and exits non-zero.

use thiserror::Error;

use crate::pg::PgError;

#[derive(Error, Debug)]
pub enum ProbeError {
    /// Malformed or unsupported connection string.
    #[error("ParseConfig error: {0}")]
    ConfigError(String),

    /// Server unreachable, handshake or authentication failed.
    #[error("Failed to connect: {0}")]
    ConnectionError(String),

    /// Malformed SQL or a server-side rejection.
    #[error("Query failed: {0}")]
    QueryError(String),

    /// A row did not fit the expected record shape.
    #[error("Scan failed: {0}")]
    ScanError(String),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl ProbeError {
    /// Map a wire client error raised while running a query.
    ///
    /// Type errors come from decoding or scanning a row; everything else is
    /// a failure of the query itself.
    pub fn from_query(err: PgError) -> Self {
        match err {
            PgError::Type(msg) => ProbeError::ScanError(msg),
            other => ProbeError::QueryError(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, ProbeError>;
