//! PostgreSQL wire protocol client.
//!
//! This is the first probe's client stack. It speaks protocol v3 directly:
//! - Simple query protocol with client-side parameter interpolation
//! - Extended query protocol with a per-connection prepared statement cache
//! - Binary or text parameter encoding, binary results
//!
//! Architecture:
//! - `protocol`: Low-level wire protocol encoding/decoding
//! - `connection`: Connection state machine and query execution
//! - `types`: PostgreSQL type encoding/decoding
//! - `statement`: Prepared statement cache
//! - `interpolate`: `$N` placeholder substitution for the simple protocol
//! - `scram`: SCRAM-SHA-256 authentication

pub mod connection;
pub mod error;
pub mod interpolate;
pub mod protocol;
pub mod scram;
pub mod statement;
pub mod types;

#[cfg(test)]
mod tests;

pub use connection::{PgConfig, PgConnection, QueryExecMode, QueryResult, Row};
pub use error::{PgError, PgResult};
pub use statement::PreparedStatement;
pub use types::{Oid, PgValue};
