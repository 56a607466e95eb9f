use std::process::ExitCode;

use clap::Parser;
use tracing::error;

use halfblankd::cli::{self, Cli};

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    cli::init_tracing(cli.log_level.as_deref());
    match cli::run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}
