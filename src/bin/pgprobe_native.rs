//! Row-count probe over the in-crate PostgreSQL wire client.

use std::process::ExitCode;

use clap::Parser;
use pgprobe::cli::{self, Cli};
use pgprobe::driver::NativeProbe;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    cli::init_logging();

    let args = Cli::parse();
    cli::run(&NativeProbe, args).await
}
