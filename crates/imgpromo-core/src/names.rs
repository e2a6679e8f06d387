//! Image reference helpers.
//!
//! * FQIN: `registry/image@digest`
//! * PQIN: `registry/image:tag`
//! * LQIN: `registry/image`

use once_cell::sync::Lazy;

use regex::Regex;

use crate::error::{CoreError, Result};
use crate::image::{Digest, ImageName, RegistryName, Tag};
use crate::registry::RegistryContext;

static REGISTRY_IMAGE_PATH_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[\w-]+(\.[\w-]+)+(/[\w-]+)+$").expect("registry image path pattern is valid")
});

/// GCR domains whose first path segment is the project.
const GCR_DOMAINS: [&str; 4] = ["gcr.io", "asia.gcr.io", "eu.gcr.io", "us.gcr.io"];

/// Legacy vanity domains that are a root repository on their own.
const LEGACY_DOMAINS: [&str; 2] = ["k8s.gcr.io", "staging-k8s.gcr.io"];

/// Builds a fully-qualified image name.
///
/// # Examples
///
/// ```
/// use imgpromo_core::names::to_fqin;
///
/// let fqin = to_fqin(&"gcr.io/prod".into(), &"foo".into(), &"sha256:aaa".into());
/// assert_eq!(fqin, "gcr.io/prod/foo@sha256:aaa");
/// ```
#[must_use]
pub fn to_fqin(registry: &RegistryName, name: &ImageName, digest: &Digest) -> String {
    format!("{registry}/{name}@{digest}")
}

/// Builds a partially-qualified image name.
#[must_use]
pub fn to_pqin(registry: &RegistryName, name: &ImageName, tag: &Tag) -> String {
    format!("{registry}/{name}:{tag}")
}

/// Builds a loosely-qualified image name.
#[must_use]
pub fn to_lqin(registry: &RegistryName, name: &ImageName) -> String {
    format!("{registry}/{name}")
}

/// Splits a registry name into its token key, domain and repository path.
///
/// The token key is the first two path segments (`gcr.io/project`), or the
/// whole name when it has fewer than two slashes.
///
/// # Errors
///
/// Returns [`CoreError::InvalidReference`] when the name has no `/`.
///
/// # Examples
///
/// ```
/// use imgpromo_core::names::token_key_domain_repo_path;
///
/// let registry = "gcr.io/foo/bar".into();
/// let (key, domain, path) = token_key_domain_repo_path(&registry).unwrap();
/// assert_eq!((key.as_str(), domain, path), ("gcr.io/foo", "gcr.io", "foo/bar"));
/// ```
pub fn token_key_domain_repo_path(registry: &RegistryName) -> Result<(String, &str, &str)> {
    let s = registry.as_str();
    let (domain, repo_path) = s
        .split_once('/')
        .ok_or_else(|| CoreError::invalid_reference(s, "registry name has no repository path"))?;

    let key = if s.matches('/').count() < 2 {
        s.to_string()
    } else {
        s.split('/').take(2).collect::<Vec<_>>().join("/")
    };

    Ok((key, domain, repo_path))
}

/// Splits a full image path into a known registry and the image name.
///
/// Contexts are tried in order, so callers pass them sorted longest name
/// first. A context that is a prefix of the path but cuts a path segment in
/// half (`.../metrics-server` vs `.../metrics-server-amd64`) is skipped.
///
/// # Errors
///
/// Returns [`CoreError::UnknownRegistry`] if no context matches.
pub fn split_by_known_registries(
    path: &str,
    contexts: &[RegistryContext],
) -> Result<(RegistryName, ImageName)> {
    for rc in contexts {
        let Some(trimmed) = path.strip_prefix(rc.name.as_str()) else {
            continue;
        };

        if trimmed.is_empty() {
            // Image pushed to the root of the registry.
            let Some(i) = path.rfind('/') else {
                continue;
            };
            return Ok((RegistryName::from(&path[..i]), ImageName::from(&path[i + 1..])));
        }

        if let Some(image) = trimmed.strip_prefix('/') {
            return Ok((rc.name.clone(), ImageName::from(image)));
        }
    }

    Err(CoreError::UnknownRegistry {
        path: path.to_string(),
    })
}

/// Splits an image path using the first matching known registry name.
///
/// # Errors
///
/// Returns [`CoreError::UnknownRegistry`] when no registry is a prefix of
/// the path.
pub fn split_registry_image_path(
    path: &str,
    known: &[RegistryName],
) -> Result<(RegistryName, ImageName)> {
    known
        .iter()
        .find_map(|name| {
            path.strip_prefix(name.as_str())
                .and_then(|rest| rest.strip_prefix('/'))
                .map(|image| (name.clone(), ImageName::from(image)))
        })
        .ok_or_else(|| CoreError::UnknownRegistry {
            path: path.to_string(),
        })
}

/// Splits a container path into its root registry and repository.
///
/// GCR domains take the project as part of the registry; the legacy vanity
/// domains are registries on their own.
///
/// # Errors
///
/// Returns [`CoreError::InvalidReference`] for unknown domains, empty path
/// segments, or too few segments.
///
/// # Examples
///
/// ```
/// use imgpromo_core::names::parse_container_parts;
///
/// let (registry, repo) = parse_container_parts("gcr.io/foo/bar/baz").unwrap();
/// assert_eq!((registry.as_str(), repo.as_str()), ("gcr.io/foo", "bar/baz"));
/// assert!(parse_container_parts("gcr.io/foo").is_err());
/// ```
pub fn parse_container_parts(s: &str) -> Result<(String, String)> {
    let invalid = || CoreError::invalid_reference(s, "invalid string");

    let parts: Vec<&str> = s.split('/').collect();
    if parts.len() <= 1 || parts.iter().any(|p| p.is_empty()) {
        return Err(invalid());
    }

    if GCR_DOMAINS.contains(&parts[0]) {
        if parts.len() == 2 {
            return Err(invalid());
        }
        return Ok((parts[..2].join("/"), parts[2..].join("/")));
    }

    if LEGACY_DOMAINS.contains(&parts[0]) {
        return Ok((parts[0].to_string(), parts[1..].join("/")));
    }

    Err(invalid())
}

/// Checks that a path looks like `domain.tld/path/...`.
///
/// # Errors
///
/// Returns [`CoreError::InvalidReference`] if the path does not match.
pub fn validate_registry_image_path(path: &str) -> Result<()> {
    if REGISTRY_IMAGE_PATH_RE.is_match(path) {
        Ok(())
    } else {
        Err(CoreError::invalid_reference(path, "invalid registry image path"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_key_domain_repo_path() {
        let cases = [
            ("gcr.io/foo", ("gcr.io/foo", "gcr.io", "foo")),
            ("gcr.io/foo/bar", ("gcr.io/foo", "gcr.io", "foo/bar")),
            ("us.gcr.io/a/b/c", ("us.gcr.io/a", "us.gcr.io", "a/b/c")),
        ];
        for (input, (key, domain, path)) in cases {
            let name = RegistryName::from(input);
            let got = token_key_domain_repo_path(&name).unwrap();
            assert_eq!((got.0.as_str(), got.1, got.2), (key, domain, path), "{input}");
        }
        assert!(token_key_domain_repo_path(&RegistryName::from("gcr.io")).is_err());
    }

    #[test]
    fn test_split_by_known_registries() {
        let contexts = vec![
            RegistryContext::new("us.gcr.io/k8s-artifacts-prod/metrics-server"),
            RegistryContext::new("us.gcr.io/k8s-artifacts-prod"),
        ];

        let (reg, img) = split_by_known_registries(
            "us.gcr.io/k8s-artifacts-prod/metrics-server/foo",
            &contexts,
        )
        .unwrap();
        assert_eq!(reg.as_str(), "us.gcr.io/k8s-artifacts-prod/metrics-server");
        assert_eq!(img.as_str(), "foo");

        // Mid-segment prefix is skipped in favor of the shorter context.
        let (reg, img) = split_by_known_registries(
            "us.gcr.io/k8s-artifacts-prod/metrics-server-amd64",
            &contexts,
        )
        .unwrap();
        assert_eq!(reg.as_str(), "us.gcr.io/k8s-artifacts-prod");
        assert_eq!(img.as_str(), "metrics-server-amd64");

        // Exact match splits at the last slash.
        let (reg, img) =
            split_by_known_registries("us.gcr.io/k8s-artifacts-prod/metrics-server", &contexts)
                .unwrap();
        assert_eq!(reg.as_str(), "us.gcr.io/k8s-artifacts-prod");
        assert_eq!(img.as_str(), "metrics-server");

        let err = split_by_known_registries("gcr.io/other/foo", &contexts).unwrap_err();
        assert!(matches!(err, CoreError::UnknownRegistry { .. }));
    }

    #[test]
    fn test_split_registry_image_path() {
        let known = vec![RegistryName::from("gcr.io/foo")];
        let (reg, img) = split_registry_image_path("gcr.io/foo/a/b/c", &known).unwrap();
        assert_eq!(reg.as_str(), "gcr.io/foo");
        assert_eq!(img.as_str(), "a/b/c");
        assert!(split_registry_image_path("gcr.io/bar/a", &known).is_err());
    }

    #[test]
    fn test_parse_container_parts() {
        let ok = [
            ("gcr.io/foo/bar", ("gcr.io/foo", "bar")),
            ("eu.gcr.io/foo/bar/baz", ("eu.gcr.io/foo", "bar/baz")),
            ("k8s.gcr.io/a/b", ("k8s.gcr.io", "a/b")),
            ("staging-k8s.gcr.io/a", ("staging-k8s.gcr.io", "a")),
        ];
        for (input, (registry, repo)) in ok {
            let got = parse_container_parts(input).unwrap();
            assert_eq!((got.0.as_str(), got.1.as_str()), (registry, repo), "{input}");
        }

        for bad in ["", "gcr.io", "gcr.io/foo", "gcr.io//foo", "gcr.io/foo/", "docker.io/a/b"] {
            assert!(parse_container_parts(bad).is_err(), "{bad} should be invalid");
        }
    }

    #[test]
    fn test_validate_registry_image_path() {
        assert!(validate_registry_image_path("gcr.io/foo/bar").is_ok());
        assert!(validate_registry_image_path("us-docker.pkg.dev/a/b-c/d_e").is_ok());
        assert!(validate_registry_image_path("gcr.io").is_err());
        assert!(validate_registry_image_path("gcr/foo").is_err());
        assert!(validate_registry_image_path("gcr.io/foo:bar").is_err());
    }

    #[test]
    fn test_qualified_names() {
        let reg = RegistryName::from("gcr.io/p");
        let name = ImageName::from("foo");
        assert_eq!(to_pqin(&reg, &name, &Tag::from("v1")), "gcr.io/p/foo:v1");
        assert_eq!(to_lqin(&reg, &name), "gcr.io/p/foo");
    }
}
