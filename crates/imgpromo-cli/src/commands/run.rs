//! Run command: the promotion itself.
//!
//! Reads the repositories the manifests touch, filters the declared
//! promotions down to what is missing, runs the prechecks, and copies.
//! Without `--confirm` the copies are only printed.

use anyhow::{Context, Result};
use clap::Args;
use imgpromo_engine::{run_checks, to_promotion_edges, ImageVulnCheck, PreCheck, SyncConfig, SyncContext};
use imgpromo_registry::{ClientConfig, ContainerAnalysisClient, GcloudTokenProvider};
use tracing::{error, info};

use super::{ManifestArgs, RegistryArgs, VulnArgs};

/// Arguments for the run command.
#[derive(Args, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub manifests: ManifestArgs,

    #[command(flatten)]
    pub registry: RegistryArgs,

    #[command(flatten)]
    pub vuln: VulnArgs,

    /// Perform the promotion; without this flag nothing is written
    #[arg(long, env = "IMGPROMO_CONFIRM")]
    pub confirm: bool,

    /// Only parse and validate the manifests
    #[arg(long)]
    pub parse_only: bool,
}

/// Executes the run command.
pub async fn execute(args: RunArgs) -> Result<()> {
    let manifests = args.manifests.load()?;
    info!(manifests = manifests.len(), "Loaded manifests");
    if args.parse_only {
        println!("{} manifest(s) OK", manifests.len());
        return Ok(());
    }

    let edges = to_promotion_edges(&manifests).context("building promotion edges")?;
    info!(edges = edges.len(), "Computed promotion edges");

    let config = SyncConfig::builder()
        .workers(args.registry.threads)
        .confirm(args.confirm)
        .use_service_account(args.registry.use_service_account)
        .build();
    let ctx = SyncContext::with_tokens(&manifests, config, &GcloudTokenProvider::default())
        .await
        .context("creating sync context")?;
    let client = args.registry.client()?;

    let (to_promote, clean) = ctx.filter_promotion_edges(&edges, &client, true).await;
    if !clean {
        ctx.log_json_summary();
        anyhow::bail!("encountered errors during edge filtering");
    }

    if let Some(threshold) = args.vuln.vuln_severity_threshold {
        let scanner = ContainerAnalysisClient::new(
            ClientConfig::default(),
            Box::new(GcloudTokenProvider::default()),
            args.vuln.vuln_service_account.clone(),
        )
        .context("creating vulnerability client")?;
        let vuln = ImageVulnCheck::new(&ctx, &to_promote, threshold, &scanner);
        let checks: [&dyn PreCheck; 1] = [&vuln];
        run_checks(&checks).await?;
    }

    if !args.confirm {
        println!("********** START (DRY RUN) **********");
    }
    let result = ctx.promote_or_capture(&to_promote, &client).await;
    ctx.log_json_summary();

    match result {
        Ok(summary) => {
            info!(promoted = summary.completed, "Promotion finished");
            if !args.confirm {
                println!("********** FINISHED (DRY RUN) **********");
            }
            Ok(())
        }
        Err(err) => {
            error!(error = %err, "Promotion failed");
            Err(err).context("promoting images")
        }
    }
}
