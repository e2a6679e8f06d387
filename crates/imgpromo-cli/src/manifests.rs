//! Loading promoter manifests from disk.
//!
//! Two layouts are supported: a single manifest file, and a thin manifest
//! directory where each project has
//! `manifests/<project>/promoter-manifest.yaml` for its registries and
//! `images/<project>/images.yaml` for its images.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use imgpromo_core::{Image, Manifest, ThinManifest};

/// File holding a thin manifest's registries.
pub const THIN_MANIFEST_FILE: &str = "promoter-manifest.yaml";

/// File holding a thin manifest's images.
pub const THIN_IMAGES_FILE: &str = "images.yaml";

/// Parses, validates and finalizes one manifest.
pub fn parse_manifest(yaml: &str) -> Result<Manifest> {
    let mut manifest: Manifest = serde_yaml::from_str(yaml).context("parsing manifest")?;
    manifest.validate()?;
    manifest.finalize()?;
    Ok(manifest)
}

/// Loads a single manifest file.
pub fn load_manifest(path: &Path) -> Result<Manifest> {
    let yaml = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let mut manifest = parse_manifest(&yaml).with_context(|| format!("in {}", path.display()))?;
    manifest.filepath = Some(path.to_path_buf());
    Ok(manifest)
}

/// Loads every thin manifest under `dir`, sorted by project.
pub fn load_thin_manifests(dir: &Path) -> Result<Vec<Manifest>> {
    let manifests_dir = dir.join("manifests");
    let mut projects: Vec<PathBuf> = fs::read_dir(&manifests_dir)
        .with_context(|| format!("reading {}", manifests_dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.join(THIN_MANIFEST_FILE).is_file())
        .collect();
    projects.sort();

    let mut manifests = Vec::with_capacity(projects.len());
    for project_dir in projects {
        let Some(project) = project_dir.file_name() else {
            continue;
        };
        let manifest_path = project_dir.join(THIN_MANIFEST_FILE);
        let images_path = dir.join("images").join(project).join(THIN_IMAGES_FILE);
        manifests.push(load_thin_manifest(&manifest_path, &images_path)?);
    }

    if manifests.is_empty() {
        anyhow::bail!("no {THIN_MANIFEST_FILE} found under {}", manifests_dir.display());
    }
    Ok(manifests)
}

fn load_thin_manifest(manifest_path: &Path, images_path: &Path) -> Result<Manifest> {
    let yaml = fs::read_to_string(manifest_path)
        .with_context(|| format!("reading {}", manifest_path.display()))?;
    let thin: ThinManifest = serde_yaml::from_str(&yaml)
        .with_context(|| format!("parsing {}", manifest_path.display()))?;

    let yaml = fs::read_to_string(images_path)
        .with_context(|| format!("reading {}", images_path.display()))?;
    let images: Vec<Image> = serde_yaml::from_str(&yaml)
        .with_context(|| format!("parsing {}", images_path.display()))?;

    let mut manifest = Manifest::from_thin(thin, images);
    manifest
        .validate()
        .with_context(|| format!("in {}", manifest_path.display()))?;
    manifest.finalize()?;
    manifest.filepath = Some(manifest_path.to_path_buf());
    Ok(manifest)
}
