//! Check command: runs the prechecks a change to the manifests must pass.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use imgpromo_engine::{
    run_checks, to_promotion_edges, ImageRemovalCheck, ImageVulnCheck, PreCheck, SyncConfig,
    SyncContext,
};
use imgpromo_registry::{ClientConfig, ContainerAnalysisClient, GcloudTokenProvider};
use tracing::info;

use super::{ManifestArgs, VulnArgs};
use crate::manifests::load_thin_manifests;

/// Arguments for the check command.
#[derive(Args, Debug)]
pub struct CheckArgs {
    /// The proposed manifests
    #[command(flatten)]
    pub manifests: ManifestArgs,

    /// Thin manifest directory to compare against, e.g. a checkout of the
    /// main branch; enables the image removal check
    #[arg(long, env = "IMGPROMO_BASE_THIN_MANIFEST_DIR")]
    pub base_thin_manifest_dir: Option<PathBuf>,

    #[command(flatten)]
    pub vuln: VulnArgs,
}

/// Executes the check command.
pub async fn execute(args: CheckArgs) -> Result<()> {
    let proposed = args.manifests.load()?;
    let edges = to_promotion_edges(&proposed).context("building promotion edges")?;
    let ctx = SyncContext::new(&proposed, SyncConfig::default());

    let removal = match &args.base_thin_manifest_dir {
        Some(dir) => {
            let base = load_thin_manifests(dir).context("loading base manifests")?;
            Some(ImageRemovalCheck::from_manifests(&base, &proposed)?)
        }
        None => None,
    };

    let scanner = match args.vuln.vuln_severity_threshold {
        Some(_) => Some(
            ContainerAnalysisClient::new(
                ClientConfig::default(),
                Box::new(GcloudTokenProvider::default()),
                args.vuln.vuln_service_account.clone(),
            )
            .context("creating vulnerability client")?,
        ),
        None => None,
    };
    let vuln = args
        .vuln
        .vuln_severity_threshold
        .zip(scanner.as_ref())
        .map(|(threshold, scanner)| ImageVulnCheck::new(&ctx, &edges, threshold, scanner));

    let mut checks: Vec<&dyn PreCheck> = Vec::new();
    if let Some(removal) = &removal {
        checks.push(removal);
    }
    if let Some(vuln) = &vuln {
        checks.push(vuln);
    }
    if checks.is_empty() {
        anyhow::bail!("no checks selected; pass --base-thin-manifest-dir or --vuln-severity-threshold");
    }

    run_checks(&checks).await?;
    info!(checks = checks.len(), "All prechecks passed");
    println!("All {} precheck(s) passed", checks.len());
    Ok(())
}
