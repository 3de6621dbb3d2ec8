use std::process::ExitCode;

use clap::Parser;
use parkinghose::{Args, runner};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();

    match runner::run(&args, interrupted()).await {
        Ok(summary) => {
            info!(
                "stream '{}' done: sent={} duplicates={} next_offset={}",
                summary.stream_name, summary.sent, summary.duplicates, summary.next_offset
            );
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!("fatal: {err}");
            eprintln!("Error: {err}");
            ExitCode::FAILURE
        }
    }
}

async fn interrupted() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("cannot listen for Ctrl-C: {err}");
        std::future::pending::<()>().await;
    }
}
