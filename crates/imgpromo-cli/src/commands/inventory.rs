//! Inventory command: prints a registry's images in manifest form.
//!
//! The output can be pasted into an images file to declare everything a
//! staging registry already holds.

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use imgpromo_core::{Image, Manifest, RegInvImage, RegistryContext, Tag};
use imgpromo_engine::{filter_by_tag, SyncConfig, SyncContext};
use imgpromo_registry::GcloudTokenProvider;
use tracing::info;

use super::RegistryArgs;

/// Output format for the inventory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// YAML, as in an images file
    #[default]
    Yaml,
    /// JSON
    Json,
}

/// Arguments for the inventory command.
#[derive(Args, Debug)]
pub struct InventoryArgs {
    /// Registry to read, e.g. gcr.io/k8s-staging-foo
    #[arg(long, env = "IMGPROMO_INVENTORY_REGISTRY")]
    pub registry: String,

    /// Service account for the registry
    #[arg(long, default_value = "")]
    pub service_account: String,

    /// Only keep digests carrying this tag
    #[arg(long)]
    pub tag: Option<String>,

    /// Keep untagged digests that are only children of a manifest list
    #[arg(long)]
    pub include_list_children: bool,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Yaml)]
    pub output: OutputFormat,

    #[command(flatten)]
    pub registry_args: RegistryArgs,
}

/// Executes the inventory command.
pub async fn execute(args: InventoryArgs) -> Result<()> {
    let rc = RegistryContext::source(args.registry.as_str()).with_service_account(&args.service_account);
    let manifest = Manifest {
        registries: vec![rc.clone()],
        ..Manifest::default()
    };
    let config = SyncConfig::builder()
        .workers(args.registry_args.threads)
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
    ctx.read_manifest_lists(&client)
        .await
        .check()
        .context("reading manifest lists")?;

    let mut rii = ctx
        .snapshot_inventory()
        .remove(&rc.name)
        .unwrap_or_default();
    if !args.include_list_children {
        rii = ctx.remove_child_digest_entries(&rii);
    }
    if let Some(tag) = &args.tag {
        rii = filter_by_tag(&rii, &Tag::from(tag.as_str()));
    }
    info!(registry = %rc.name, images = rii.len(), "Read inventory");

    print!("{}", render(&rii, args.output)?);
    Ok(())
}

/// Renders an inventory as a list of images.
fn render(rii: &RegInvImage, format: OutputFormat) -> Result<String> {
    let images: Vec<Image> = rii
        .iter()
        .map(|(name, dmap)| Image {
            name: name.clone(),
            dmap: dmap.clone(),
        })
        .collect();
    match format {
        OutputFormat::Yaml => serde_yaml::to_string(&images).context("rendering YAML"),
        OutputFormat::Json => {
            let mut json = serde_json::to_string_pretty(&images).context("rendering JSON")?;
            json.push('\n');
            Ok(json)
        }
    }
}
