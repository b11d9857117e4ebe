//! Command-line front end shared by both probe binaries.
//!
//! A binary supplies a [`Probe`]; everything else (argument parsing,
//! the stdout contract, the top-level error handler) lives here.

use std::future::Future;
use std::io::{self, Write};
use std::process::ExitCode;

use clap::Parser;
use log::{debug, error};

use crate::config::{ConnTarget, DEFAULT_DATABASE_URL};
use crate::error::Result;
use crate::mode::ProtocolMode;

#[derive(Debug, Parser)]
#[command(version, about = "Count the rows of test_data over one PostgreSQL query protocol")]
pub struct Cli {
    /// Query protocol to exercise
    #[arg(value_enum)]
    pub mode: ProtocolMode,

    /// Connection string of the server under test
    #[arg(long, hide = true, default_value = DEFAULT_DATABASE_URL)]
    pub database_url: String,
}

/// Install the stderr logger. `RUST_LOG` overrides the default `warn` filter.
pub fn init_logging() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
}

/// One client stack that can count the rows of `test_data`.
pub trait Probe {
    /// Upper-case name used in the announcement line.
    fn label(&self) -> &'static str;

    /// Adjust the parsed target for the selected mode.
    fn target_for(&self, target: ConnTarget, _mode: ProtocolMode) -> Result<ConnTarget> {
        target.ensure_plaintext()?;
        Ok(target)
    }

    /// Connect, run the probe query, scan every row and return the count.
    ///
    /// The connection is closed before returning on every path.
    fn count_rows(
        &self,
        target: &ConnTarget,
        mode: ProtocolMode,
    ) -> impl Future<Output = Result<u64>>;
}

/// Run one probe, writing the announcement and the row count to `out`.
pub async fn execute<P, W>(probe: &P, cli: &Cli, out: &mut W) -> Result<u64>
where
    P: Probe,
    W: Write,
{
    let target = ConnTarget::parse(&cli.database_url)?;
    let target = probe.target_for(target, cli.mode)?;

    writeln!(out, "{}", cli.mode.announcement(probe.label()))?;
    out.flush()?;

    debug!("{}: connecting to {target} ({} mode)", probe.label(), cli.mode);
    let count = probe.count_rows(&target, cli.mode).await?;

    writeln!(out, "Fetched {count} rows")?;
    out.flush()?;
    Ok(count)
}

/// Top-level handler: every failure is logged and ends the process with status 1.
pub async fn run<P: Probe>(probe: &P, cli: Cli) -> ExitCode {
    match execute(probe, &cli, &mut io::stdout()).await {
        Ok(_) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}
