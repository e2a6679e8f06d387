//! Clear command: wipes a registry, for resetting test environments.

use anyhow::{Context, Result};
use clap::Args;
use imgpromo_core::{Manifest, RegistryContext};
use imgpromo_engine::{SyncConfig, SyncContext};
use imgpromo_registry::GcloudTokenProvider;
use tracing::{info, warn};

use super::RegistryArgs;

/// Arguments for the clear command.
#[derive(Args, Debug)]
pub struct ClearArgs {
    /// Registry to wipe, e.g. gcr.io/k8s-test-scratch
    #[arg(long)]
    pub registry: String,

    /// Service account for the registry
    #[arg(long, default_value = "")]
    pub service_account: String,

    /// Actually delete; without this flag deletions are only printed
    #[arg(long)]
    pub confirm: bool,

    #[command(flatten)]
    pub registry_args: RegistryArgs,
}

/// Executes the clear command.
pub async fn execute(args: ClearArgs) -> Result<()> {
    let rc = RegistryContext::new(args.registry.as_str()).with_service_account(&args.service_account);
    let manifest = Manifest {
        registries: vec![rc.clone()],
        ..Manifest::default()
    };
    let config = SyncConfig::builder()
        .workers(args.registry_args.threads)
        .confirm(args.confirm)
        .use_service_account(args.registry_args.use_service_account)
        .build();
    let ctx = SyncContext::with_tokens(&[manifest], config, &GcloudTokenProvider::default())
        .await
        .context("creating sync context")?;
    let client = args.registry_args.client()?;

    ctx.read_registries(std::slice::from_ref(&rc), true, &client)
        .await
        .check()
        .context("reading registry")?;

    if args.confirm {
        warn!(registry = %rc.name, "Deleting every image");
    }
    let summary = ctx
        .clear_repository(&rc.name, &client)
        .await
        .context("clearing registry")?;
    info!(registry = %rc.name, deleted = summary.completed, confirm = args.confirm, "Cleared registry");
    Ok(())
}
