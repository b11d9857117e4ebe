//! pgprobe - row-count probes for the PostgreSQL simple and extended query
//! protocols.
//!
//! Two binaries share this library:
//! - `pgprobe-native` runs over the crate's own wire client ([`pg`])
//! - `pgprobe-tokio` runs over `tokio-postgres`
//!
//! Both take a mode argument (`simple` or `extended`), select every row of
//! `test_data`, scan it into a [`TestDataRow`] and print the row count.

pub mod cli;
pub mod config;
pub mod driver;
pub mod error;
pub mod mode;
pub mod pg;
pub mod row;

pub use cli::{Cli, Probe};
pub use config::{ConnTarget, SslMode, DEFAULT_DATABASE_URL};
pub use error::{ProbeError, Result};
pub use mode::ProtocolMode;
pub use row::{ScanError, TestDataRow};
