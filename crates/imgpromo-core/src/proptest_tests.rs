//! Property-based tests for imgpromo-core types.

use proptest::prelude::*;

use crate::names::{parse_container_parts, split_by_known_registries, to_fqin, to_pqin};
use crate::{validate_digest, validate_tag, Digest, ImageName, RegistryContext, RegistryName, Tag};

/// Strategy for generating GCR project names.
fn project_strategy() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9-]{2,20}"
}

/// Strategy for generating image paths of one to three segments.
fn image_path_strategy() -> impl Strategy<Value = String> {
    prop::collection::vec("[a-z][a-z0-9_-]{0,12}", 1..=3).prop_map(|parts| parts.join("/"))
}

/// Strategy for generating valid tags.
fn tag_strategy() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9_][a-zA-Z0-9_.-]{0,40}"
}

fn digest_strategy() -> impl Strategy<Value = String> {
    "[0-9a-f]{64}".prop_map(|hex| format!("sha256:{hex}"))
}

proptest! {
    #[test]
    fn test_generated_digests_validate(digest in digest_strategy()) {
        prop_assert!(validate_digest(&Digest::from(digest)).is_ok());
    }

    #[test]
    fn test_generated_tags_validate(tag in tag_strategy()) {
        prop_assert!(validate_tag(&Tag::from(tag)).is_ok());
    }

    #[test]
    fn test_parse_container_parts_splits_project(
        project in project_strategy(),
        path in image_path_strategy(),
    ) {
        let input = format!("gcr.io/{project}/{path}");
        let (registry, repo) = parse_container_parts(&input).unwrap();
        prop_assert_eq!(registry, format!("gcr.io/{project}"));
        prop_assert_eq!(repo, path);
    }

    #[test]
    fn test_split_by_known_registries_inverts_join(
        project in project_strategy(),
        path in image_path_strategy(),
    ) {
        let registry = format!("gcr.io/{project}");
        let contexts = vec![RegistryContext::new(registry.as_str())];
        let (reg, img) = split_by_known_registries(&format!("{registry}/{path}"), &contexts).unwrap();
        prop_assert_eq!(reg.as_str(), registry.as_str());
        prop_assert_eq!(img.as_str(), path.as_str());
    }

    #[test]
    fn test_qualified_names_share_lqin(
        project in project_strategy(),
        path in image_path_strategy(),
        tag in tag_strategy(),
        digest in digest_strategy(),
    ) {
        let reg = RegistryName::from(format!("gcr.io/{project}"));
        let name = ImageName::from(path);
        let fqin = to_fqin(&reg, &name, &Digest::from(digest));
        let pqin = to_pqin(&reg, &name, &Tag::from(tag));
        let lqin_f = fqin.split('@').next().unwrap();
        let lqin_p = pqin.rsplit_once(':').unwrap().0;
        prop_assert_eq!(lqin_f, lqin_p);
    }
}
