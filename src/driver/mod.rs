//! The two client stacks under test.
//!
//! - `native`: this crate's own wire client ([`crate::pg`])
//! - `tokio_pg`: the `tokio-postgres` client

pub mod native;
pub mod tokio_pg;

pub use native::NativeProbe;
pub use tokio_pg::TokioProbe;
