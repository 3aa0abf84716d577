//! squall CLI: run one pipeline stage or serve both over HTTP.

use std::process::ExitCode;

use clap::Parser;

use squall::{CliArgs, init_tracing};

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    let args = CliArgs::parse();

    match squall::cli::run(args).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("squall: {e}");
            ExitCode::FAILURE
        }
    }
}
