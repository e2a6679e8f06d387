//! CLI commands and argument parsing.

pub mod check;
pub mod clear;
pub mod inventory;
pub mod run;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use imgpromo_core::Manifest;
use imgpromo_engine::DEFAULT_WORKERS;
use imgpromo_registry::{ClientConfig, RegistryAuth, RegistryClient, Severity};

use crate::manifests::{load_manifest, load_thin_manifests};

/// imgpromo - promotes container images from staging to production registries
#[derive(Parser)]
#[command(name = "imgpromo")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Emit logs as JSON
    #[arg(long, global = true, env = "IMGPROMO_LOG_JSON")]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Promote the images declared in the manifests
    Run(run::RunArgs),

    /// Run the prechecks without promoting
    Check(check::CheckArgs),

    /// Print the images a registry holds
    Inventory(inventory::InventoryArgs),

    /// Delete every image in a registry
    Clear(clear::ClearArgs),

    /// Print version information
    Version,
}

/// Where to load manifests from.
#[derive(Args, Debug, Clone)]
pub struct ManifestArgs {
    /// Promoter manifest file
    #[arg(long, env = "IMGPROMO_MANIFEST", conflicts_with = "thin_manifest_dir")]
    pub manifest: Option<PathBuf>,

    /// Directory of thin manifests
    #[arg(long, env = "IMGPROMO_THIN_MANIFEST_DIR")]
    pub thin_manifest_dir: Option<PathBuf>,
}

impl ManifestArgs {
    /// Loads the selected manifests.
    pub fn load(&self) -> Result<Vec<Manifest>> {
        match (&self.manifest, &self.thin_manifest_dir) {
            (Some(path), _) => Ok(vec![load_manifest(path)?]),
            (None, Some(dir)) => load_thin_manifests(dir),
            (None, None) => anyhow::bail!("one of --manifest or --thin-manifest-dir is required"),
        }
    }
}

/// Worker and credential settings shared by every registry-facing command.
#[derive(Args, Debug, Clone)]
pub struct RegistryArgs {
    /// Number of concurrent registry requests
    #[arg(long, default_value_t = DEFAULT_WORKERS, env = "IMGPROMO_THREADS")]
    pub threads: usize,

    /// Impersonate each registry's service account when reading
    #[arg(long, env = "IMGPROMO_USE_SERVICE_ACCOUNT")]
    pub use_service_account: bool,

    /// Bearer token for copies and deletions
    #[arg(long, env = "IMGPROMO_REGISTRY_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Username for basic authentication
    #[arg(long, env = "IMGPROMO_REGISTRY_USERNAME")]
    pub username: Option<String>,

    /// Password for basic authentication
    #[arg(long, env = "IMGPROMO_REGISTRY_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,
}

impl RegistryArgs {
    /// Builds a registry client with the selected credentials.
    pub fn client(&self) -> Result<RegistryClient> {
        let config = ClientConfig::builder().auth(determine_auth(self)?).build();
        RegistryClient::new(config).context("creating registry client")
    }
}

/// Determines the authentication method from CLI arguments.
fn determine_auth(args: &RegistryArgs) -> Result<RegistryAuth> {
    if let Some(ref token) = args.token {
        return Ok(RegistryAuth::bearer(token.clone()));
    }

    if let (Some(username), Some(password)) = (&args.username, &args.password) {
        return Ok(RegistryAuth::basic(username.clone(), password.clone()));
    }

    if args.username.is_some() || args.password.is_some() {
        anyhow::bail!("Both --username and --password are required for basic authentication");
    }

    // Anonymous; enough for public sources and local registries.
    Ok(RegistryAuth::None)
}

/// Vulnerability gate settings.
#[derive(Args, Debug, Clone)]
pub struct VulnArgs {
    /// Block images with fixable vulnerabilities at or above this severity
    #[arg(long, env = "IMGPROMO_VULN_SEVERITY_THRESHOLD")]
    pub vuln_severity_threshold: Option<Severity>,

    /// Service account used to query vulnerability findings
    #[arg(long, default_value = "", env = "IMGPROMO_VULN_SERVICE_ACCOUNT")]
    pub vuln_service_account: String,
}
