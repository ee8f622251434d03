mod cli;
mod config;
mod context;
mod converge;
mod error;
mod links;
mod mapper;
mod model;
mod providers;
mod retry;
mod runner;
mod util;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "jira2yt=info".into()),
        )
        .with_target(false)
        .init();

    let cli = cli::Cli::parse();
    cli::handle(cli).await
}
