//! Query protocol selection.

use std::fmt;

use clap::ValueEnum;

/// Which PostgreSQL query sub-protocol a probe exercises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ProtocolMode {
    /// Query message, literal values inline, text results
    Simple,
    /// Parse/Bind/Execute with bound parameters
    Extended,
}

impl ProtocolMode {
    /// The line a probe prints before connecting.
    pub fn announcement(self, label: &str) -> String {
        let name = match self {
            ProtocolMode::Simple => "SIMPLE",
            ProtocolMode::Extended => "EXTENDED",
        };
        format!("{label}: Using {name} protocol")
    }
}

impl fmt::Display for ProtocolMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolMode::Simple => f.write_str("simple"),
            ProtocolMode::Extended => f.write_str("extended"),
        }
    }
}
