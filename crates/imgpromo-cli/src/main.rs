//! imgpromo CLI - promotes container images between registries.

use anyhow::Result;
use clap::Parser;
use tracing::Instrument;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

mod commands;
mod manifests;

use commands::{Cli, Commands};

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "imgpromo=info".into());
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let run_id = Uuid::now_v7();
    let span = tracing::info_span!("run", run_id = %run_id);

    async move {
        match cli.command {
            Commands::Run(args) => commands::run::execute(args).await,
            Commands::Check(args) => commands::check::execute(args).await,
            Commands::Inventory(args) => commands::inventory::execute(args).await,
            Commands::Clear(args) => commands::clear::execute(args).await,
            Commands::Version => {
                println!("imgpromo {}", env!("CARGO_PKG_VERSION"));
                Ok(())
            }
        }
    }
    .instrument(span)
    .await
}
