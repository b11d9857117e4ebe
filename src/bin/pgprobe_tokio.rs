//! Row-count probe over `tokio-postgres`.

use std::process::ExitCode;

use clap::Parser;
use pgprobe::cli::{self, Cli};
use pgprobe::driver::TokioProbe;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    cli::init_logging();

    let args = Cli::parse();
    cli::run(&TokioProbe, args).await
}
