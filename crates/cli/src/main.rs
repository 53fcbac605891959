//! `ferry` binary entry point.

use clap::Parser;
use ferry_cli::cli::{self, Cli};
use std::process::ExitCode;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    match cli::run(Cli::parse()).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("ferry: fatal error - {err:#}");
            ExitCode::FAILURE
        }
    }
}
