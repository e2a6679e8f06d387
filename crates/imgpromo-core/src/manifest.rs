//! Promoter manifests: the declared desired state of the destination
//! registries.
//!
//! A manifest names one source registry, one or more destinations, and the
//! images (digest to tags) that must exist in every destination. A thin
//! manifest carries only the registries; its images live in a separate file
//! so that the two can be guarded by different review rules.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::image::ImageName;
use crate::inventory::{DigestTags, RegInvImage};
use crate::registry::RegistryContext;
use crate::validation::{validate_digest, validate_tag, ValidationError};

/// One declared image.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Image {
    /// Image name relative to each registry.
    pub name: ImageName,
    /// Digest to tags.
    #[serde(default)]
    pub dmap: DigestTags,
}

/// A promoter manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    /// Source and destination registries.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub registries: Vec<RegistryContext>,

    /// Images to promote.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<Image>,

    /// The source registry, set by [`Manifest::finalize`].
    #[serde(skip)]
    pub src_registry: Option<RegistryContext>,

    /// Where the manifest was loaded from, if anywhere.
    #[serde(skip)]
    pub filepath: Option<PathBuf>,
}

/// The registries half of a split manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ThinManifest {
    /// Source and destination registries.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub registries: Vec<RegistryContext>,

    /// Deprecated and ignored.
    #[serde(rename = "imagesPath", default, skip_serializing_if = "String::is_empty")]
    pub images_path: String,
}

impl Manifest {
    /// Combines a thin manifest with its images.
    #[must_use]
    pub fn from_thin(thin: ThinManifest, images: Vec<Image>) -> Self {
        Self {
            registries: thin.registries,
            images,
            ..Self::default()
        }
    }

    /// Checks the manifest for semantic errors.
    ///
    /// Structural problems (missing fields, missing source registry) are
    /// reported together. Digest and tag formats are only checked once the
    /// structure is sound.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Validation`] listing every violated rule.
    pub fn validate(&self) -> Result<()> {
        let errors = self.validate_required_components();
        if !errors.is_empty() {
            return Err(CoreError::Validation(errors));
        }

        let errors = self.validate_images();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(CoreError::Validation(errors))
        }
    }

    fn validate_required_components(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.registries.is_empty() {
            errors.push(ValidationError::required("registries"));
        } else {
            if self.registries.iter().filter(|rc| rc.src).count() > 1 {
                errors.push(ValidationError::new(
                    "registries",
                    "cannot have more than 1 source registry",
                ));
            }
            if self.src_registry_context().map_or(true, |rc| rc.name.is_empty()) {
                errors.push(ValidationError::new("registries", "source registry must be set"));
            }
        }

        for (i, rc) in self.registries.iter().enumerate() {
            if rc.name.is_empty() {
                errors.push(ValidationError::new(
                    format!("registries[{i}]"),
                    "'name' field cannot be empty",
                ));
            }
        }

        for (i, img) in self.images.iter().enumerate() {
            if img.name.is_empty() {
                errors.push(ValidationError::new(
                    format!("images[{i}]"),
                    "'name' field cannot be empty",
                ));
            }
            if img.dmap.is_empty() {
                errors.push(ValidationError::new(
                    format!("images[{i}]"),
                    "'dmap' field cannot be empty",
                ));
            }
        }

        errors
    }

    fn validate_images(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        for img in &self.images {
            for (digest, tags) in &img.dmap {
                if let Err(mut e) = validate_digest(digest) {
                    e.field = format!("images[{}].dmap", img.name);
                    errors.push(e);
                }
                for tag in tags {
                    if let Err(mut e) = validate_tag(tag) {
                        e.field = format!("images[{}].dmap[{digest}]", img.name);
                        errors.push(e);
                    }
                }
            }
        }
        errors
    }

    fn src_registry_context(&self) -> Option<&RegistryContext> {
        self.registries.iter().find(|rc| rc.src)
    }

    /// Populates derived fields. Call after [`Manifest::validate`].
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NoSourceRegistry`] if no registry is marked as
    /// the source.
    pub fn finalize(&mut self) -> Result<()> {
        let src = self
            .src_registry_context()
            .cloned()
            .ok_or(CoreError::NoSourceRegistry)?;
        self.src_registry = Some(src);
        Ok(())
    }

    /// Returns the declared images as an inventory fragment.
    #[must_use]
    pub fn to_reg_inv_image(&self) -> RegInvImage {
        self.images
            .iter()
            .map(|img| (img.name.clone(), img.dmap.clone()))
            .collect()
    }

    /// Returns the destination registries (every registry but the source).
    pub fn destinations(&self) -> impl Iterator<Item = &RegistryContext> {
        self.registries.iter().filter(|rc| !rc.src)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::{Digest, Tag};

    fn digest(c: char) -> Digest {
        Digest::from(format!("sha256:{}", c.to_string().repeat(64)))
    }

    fn valid() -> Manifest {
        let mut dmap = DigestTags::new();
        dmap.insert(digest('a'), vec![Tag::from("v1")]);
        Manifest {
            registries: vec![
                RegistryContext::source("gcr.io/staging"),
                RegistryContext::new("gcr.io/prod"),
            ],
            images: vec![Image {
                name: ImageName::from("foo"),
                dmap,
            }],
            ..Manifest::default()
        }
    }

    #[test]
    fn test_valid_manifest() {
        let mut m = valid();
        m.validate().unwrap();
        m.finalize().unwrap();
        assert_eq!(m.src_registry.as_ref().unwrap().name.as_str(), "gcr.io/staging");
        assert_eq!(m.destinations().count(), 1);
    }

    #[test]
    fn test_required_components_reported_together() {
        let mut m = valid();
        m.registries[1].src = true;
        m.images.push(Image::default());

        let Err(CoreError::Validation(errors)) = m.validate() else {
            panic!("expected validation error");
        };
        let messages: Vec<_> = errors.iter().map(|e| e.message.as_str()).collect();
        assert!(messages.contains(&"cannot have more than 1 source registry"));
        assert!(messages.contains(&"'name' field cannot be empty"));
        assert!(messages.contains(&"'dmap' field cannot be empty"));
    }

    #[test]
    fn test_missing_source() {
        let mut m = valid();
        m.registries[0].src = false;
        let err = m.validate().unwrap_err();
        assert!(err.to_string().contains("source registry must be set"));
        assert!(matches!(m.finalize(), Err(CoreError::NoSourceRegistry)));
    }

    #[test]
    fn test_empty_registries() {
        let m = Manifest::default();
        let err = m.validate().unwrap_err();
        assert!(err.to_string().contains("'registries' field cannot be empty"));
    }

    #[test]
    fn test_bad_digest_and_tag() {
        let mut m = valid();
        let dmap = &mut m.images[0].dmap;
        dmap.insert(Digest::from("sha256:nothex"), vec![Tag::from("-bad")]);

        let Err(CoreError::Validation(errors)) = m.validate() else {
            panic!("expected validation error");
        };
        assert_eq!(errors.len(), 2);
        assert!(errors[0].message.contains("invalid digest"));
        assert!(errors[1].message.contains("invalid tag"));
    }

    #[test]
    fn test_yaml_rejects_unknown_fields() {
        let yaml = "registries:\n- name: gcr.io/a\n  src: true\nimage: []\n";
        assert!(serde_yaml::from_str::<Manifest>(yaml).is_err());
    }

    #[test]
    fn test_yaml_tagless_dmap() {
        let yaml = format!(
            "registries:\n- name: gcr.io/a\n  src: true\n- name: gcr.io/b\nimages:\n- name: foo\n  dmap:\n    \"{}\": []\n",
            digest('b')
        );
        let m: Manifest = serde_yaml::from_str(&yaml).unwrap();
        m.validate().unwrap();
        let rii = m.to_reg_inv_image();
        assert!(rii[&ImageName::from("foo")][&digest('b')].is_empty());
    }

    #[test]
    fn test_from_thin() {
        let thin: ThinManifest =
            serde_yaml::from_str("registries:\n- name: gcr.io/a\n  src: true\n").unwrap();
        let m = Manifest::from_thin(thin, valid().images);
        assert_eq!(m.images.len(), 1);
        assert_eq!(m.registries.len(), 1);
    }
}
