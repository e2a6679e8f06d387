//! End-to-end promotion runs against in-memory registries.
//!
//! The fakes stand in for the network: a tag-listing reader, a copier and a
//! deleter that record what they were asked to do, and a vulnerability
//! producer with canned findings.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use parking_lot::Mutex;

use imgpromo_core::{
    Digest, Image, ImageName, Manifest, MediaType, PromotionEdge, RegistryContext, RegistryName,
    Set, Token,
};
use imgpromo_engine::{
    to_promotion_edges, CopyHandler, EngineError, ImageVulnCheck, PreCheck, RequestCapturer,
    SyncConfig, SyncContext,
};
use imgpromo_registry::{
    Descriptor, ImageCopier, ImageDeleter, ImageVulnProducer, IndexManifest, ManifestInfo,
    Occurrence, RegistryError, RegistryReader, Severity, Tags, TokenProvider, Vulnerability,
};

const STAGING: &str = "gcr.io/staging";
const PROD: &str = "gcr.io/prod";

const A: &str = "sha256:aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
const B: &str = "sha256:bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";
const LIST: &str = "sha256:1111111111111111111111111111111111111111111111111111111111111111";
const CHILD1: &str = "sha256:2222222222222222222222222222222222222222222222222222222222222222";
const CHILD2: &str = "sha256:3333333333333333333333333333333333333333333333333333333333333333";
const OTHER: &str = "sha256:4444444444444444444444444444444444444444444444444444444444444444";

// =============================================================================
// Fakes
// =============================================================================

#[derive(Default)]
struct FakeRegistries {
    repos: BTreeMap<String, Tags>,
    lists: BTreeMap<String, IndexManifest>,
    broken: BTreeSet<String>,
}

impl FakeRegistries {
    fn repo(mut self, name: &str, manifests: &[(&str, &str, &[&str])], children: &[&str]) -> Self {
        let manifest = manifests
            .iter()
            .map(|(digest, media_type, tags)| {
                let info = ManifestInfo {
                    media_type: (*media_type).to_string(),
                    tag: tags.iter().map(|t| (*t).to_string()).collect(),
                    ..ManifestInfo::default()
                };
                ((*digest).to_string(), info)
            })
            .collect();
        self.repos.insert(
            name.to_string(),
            Tags {
                name: name.to_string(),
                child: children.iter().map(|c| (*c).to_string()).collect(),
                manifest,
                tags: Vec::new(),
            },
        );
        self
    }

    fn list(mut self, digest: &str, children: &[&str]) -> Self {
        let manifests = children
            .iter()
            .map(|child| Descriptor {
                media_type: MediaType::DOCKER_MANIFEST_SCHEMA2.to_string(),
                digest: (*child).to_string(),
                size: 0,
                platform: None,
                annotations: None,
            })
            .collect();
        self.lists.insert(
            digest.to_string(),
            IndexManifest {
                schema_version: 2,
                media_type: Some(MediaType::DOCKER_MANIFEST_LIST.to_string()),
                manifests,
            },
        );
        self
    }

    fn broken(mut self, name: &str) -> Self {
        self.broken.insert(name.to_string());
        self
    }
}

#[async_trait]
impl RegistryReader for FakeRegistries {
    async fn list_tags(
        &self,
        registry: &RegistryContext,
        _token: Option<&Token>,
    ) -> imgpromo_registry::Result<Tags> {
        let name = registry.name.as_str();
        if self.broken.contains(name) {
            return Err(RegistryError::HttpError {
                status: 500,
                message: "backend unavailable".into(),
            });
        }
        self.repos
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound { url: name.to_string() })
    }

    async fn manifest_list(
        &self,
        _registry: &RegistryContext,
        _image: &ImageName,
        digest: &Digest,
        _token: Option<&Token>,
    ) -> imgpromo_registry::Result<IndexManifest> {
        self.lists
            .get(digest.as_str())
            .cloned()
            .ok_or_else(|| RegistryError::NotFound { url: digest.to_string() })
    }
}

#[derive(Default)]
struct FakeCopier {
    copies: Mutex<Vec<(String, String)>>,
    tokens: Mutex<Vec<(Option<String>, Option<String>)>>,
    fail_dst: Option<String>,
}

#[async_trait]
impl ImageCopier for FakeCopier {
    async fn copy(
        &self,
        src: &str,
        dst: &str,
        src_token: Option<&Token>,
        dst_token: Option<&Token>,
    ) -> imgpromo_registry::Result<()> {
        self.copies.lock().push((src.to_string(), dst.to_string()));
        self.tokens.lock().push((
            src_token.map(|t| t.expose().to_string()),
            dst_token.map(|t| t.expose().to_string()),
        ));
        if self.fail_dst.as_deref() == Some(dst) {
            return Err(RegistryError::HttpError {
                status: 403,
                message: "permission denied".into(),
            });
        }
        Ok(())
    }
}

#[derive(Default)]
struct FakeDeleter {
    deleted: Mutex<Vec<String>>,
}

#[async_trait]
impl ImageDeleter for FakeDeleter {
    async fn delete(
        &self,
        _registry: &RegistryContext,
        _image: &ImageName,
        digest: &Digest,
        _token: Option<&Token>,
    ) -> imgpromo_registry::Result<()> {
        self.deleted.lock().push(digest.to_string());
        Ok(())
    }
}

/// Hands out a distinct token per service account.
struct FakeTokens;

#[async_trait]
impl TokenProvider for FakeTokens {
    async fn token(&self, service_account: &str, _use_service_account: bool) -> imgpromo_registry::Result<Token> {
        Ok(Token::new(format!("token-for-{service_account}")))
    }
}

#[derive(Default)]
struct FakeScanner {
    findings: BTreeMap<String, Vec<Occurrence>>,
    calls: Mutex<Vec<String>>,
}

#[async_trait]
impl ImageVulnProducer for FakeScanner {
    async fn occurrences(&self, edge: &PromotionEdge) -> imgpromo_registry::Result<Vec<Occurrence>> {
        self.calls.lock().push(edge.digest.to_string());
        Ok(self.findings.get(edge.digest.as_str()).cloned().unwrap_or_default())
    }
}

fn occurrence(severity: Severity, fix_available: bool) -> Occurrence {
    Occurrence {
        kind: "VULNERABILITY".into(),
        vulnerability: Some(Vulnerability {
            severity,
            effective_severity: severity,
            fix_available,
            ..Vulnerability::default()
        }),
        ..Occurrence::default()
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn manifest(images: &[(&str, &str, &[&str])]) -> Manifest {
    manifest_to(PROD, images)
}

fn manifest_to(dst: &str, images: &[(&str, &str, &[&str])]) -> Manifest {
    let mut by_name: BTreeMap<&str, Image> = BTreeMap::new();
    for (name, digest, tags) in images {
        by_name
            .entry(*name)
            .or_insert_with(|| Image {
                name: ImageName::from(*name),
                dmap: BTreeMap::new(),
            })
            .dmap
            .insert(Digest::from(*digest), tags.iter().map(|t| (*t).into()).collect());
    }
    Manifest {
        registries: vec![RegistryContext::source(STAGING), RegistryContext::new(dst)],
        images: by_name.into_values().collect(),
        ..Manifest::default()
    }
}

fn context(manifests: &[Manifest], confirm: bool) -> SyncContext {
    SyncContext::new(manifests, SyncConfig::builder().confirm(confirm).workers(4).build())
}

/// Reads both registries and returns the promotion candidates.
async fn plan(
    ctx: &SyncContext,
    manifests: &[Manifest],
    reader: &FakeRegistries,
) -> (Set<PromotionEdge>, Set<PromotionEdge>, bool) {
    let edges = to_promotion_edges(manifests).unwrap();
    let summary = ctx.read_registries(ctx.registry_contexts(), true, reader).await;
    assert_eq!(summary.failed, 0, "unexpected read failure");
    let (to_promote, clean) = ctx.get_promotion_candidates(&edges);
    (edges, to_promote, clean)
}

fn staging_with(manifests: &[(&str, &str, &[&str])]) -> FakeRegistries {
    FakeRegistries::default()
        .repo(STAGING, &[], &["foo"])
        .repo("gcr.io/staging/foo", manifests, &[])
}

// =============================================================================
// Promotion
// =============================================================================

#[tokio::test]
async fn test_promotes_into_empty_destination() {
    let manifests = [manifest(&[("foo", A, &["v1"])])];
    let reader = staging_with(&[(A, MediaType::DOCKER_MANIFEST_SCHEMA2, &["v1"])]).repo(PROD, &[], &[]);
    let ctx = context(&manifests, true);

    let (_, to_promote, clean) = plan(&ctx, &manifests, &reader).await;
    assert!(clean);
    assert_eq!(to_promote.len(), 1);

    let copier = FakeCopier::default();
    let summary = ctx.promote(&to_promote, &CopyHandler::new(&ctx, &copier)).await.unwrap();
    assert_eq!(summary.completed, 1);
    assert_eq!(
        *copier.copies.lock(),
        vec![(format!("gcr.io/staging/foo@{A}"), "gcr.io/prod/foo:v1".to_string())]
    );
}

#[tokio::test]
async fn test_tagless_promotion_copies_by_digest() {
    let manifests = [manifest(&[("foo", A, &[])])];
    let reader = staging_with(&[(A, MediaType::OCI_MANIFEST, &[])]).repo(PROD, &[], &[]);
    let ctx = context(&manifests, true);

    let (_, to_promote, _) = plan(&ctx, &manifests, &reader).await;
    let copier = FakeCopier::default();
    ctx.promote(&to_promote, &CopyHandler::new(&ctx, &copier)).await.unwrap();
    assert_eq!(copier.copies.lock()[0].1, format!("gcr.io/prod/foo@{A}"));
}

#[tokio::test]
async fn test_already_promoted_is_a_no_op() {
    let manifests = [manifest(&[("foo", A, &["v1"])])];
    let reader = staging_with(&[(A, MediaType::DOCKER_MANIFEST_SCHEMA2, &["v1"])])
        .repo(PROD, &[], &["foo"])
        .repo("gcr.io/prod/foo", &[(A, MediaType::DOCKER_MANIFEST_SCHEMA2, &["v1"])], &[]);
    let ctx = context(&manifests, true);

    let (_, to_promote, clean) = plan(&ctx, &manifests, &reader).await;
    assert!(to_promote.is_empty());
    assert!(clean);

    let copier = FakeCopier::default();
    let summary = ctx.promote(&to_promote, &CopyHandler::new(&ctx, &copier)).await.unwrap();
    assert_eq!(summary.enqueued, 0);
    assert!(copier.copies.lock().is_empty());
}

#[tokio::test]
async fn test_tag_move_marks_run_unclean() {
    let manifests = [manifest(&[("foo", A, &["v1"])])];
    let reader = staging_with(&[(A, MediaType::DOCKER_MANIFEST_SCHEMA2, &["v1"])])
        .repo(PROD, &[], &["foo"])
        .repo("gcr.io/prod/foo", &[(B, MediaType::DOCKER_MANIFEST_SCHEMA2, &["v1"])], &[]);
    let ctx = context(&manifests, true);

    let (edges, to_promote, clean) = plan(&ctx, &manifests, &reader).await;
    assert!(to_promote.is_empty());
    assert!(!clean);
    assert!(ctx
        .state
        .lock()
        .logs
        .errors
        .iter()
        .any(|e| e.context == "tag move"));

    // Forcing the edge through still refuses to run any of the batch.
    let copier = FakeCopier::default();
    let err = ctx.promote(&edges, &CopyHandler::new(&ctx, &copier)).await.unwrap_err();
    assert!(matches!(err, EngineError::TagMoves { .. }));
    assert!(copier.copies.lock().is_empty());
}

#[tokio::test]
async fn test_lost_source_is_skipped() {
    let manifests = [manifest(&[("foo", A, &["v1"])])];
    let reader = staging_with(&[(B, MediaType::DOCKER_MANIFEST_SCHEMA2, &["v2"])]).repo(PROD, &[], &[]);
    let ctx = context(&manifests, true);

    let (_, to_promote, clean) = plan(&ctx, &manifests, &reader).await;
    assert!(to_promote.is_empty());
    assert!(clean);
    assert_eq!(ctx.state.lock().logs.errors[0].context, "lost image");
}

#[tokio::test]
async fn test_unreadable_source_is_ignored() {
    let manifests = [manifest(&[("foo", A, &["v1"])])];
    let reader = FakeRegistries::default()
        .repo("gcr.io/prod/foo", &[], &[])
        .broken("gcr.io/staging/foo");
    let ctx = context(&manifests, true);
    let edges = to_promotion_edges(&manifests).unwrap();

    let (to_promote, clean) = ctx.filter_promotion_edges(&edges, &reader, true).await;
    assert!(to_promote.is_empty());
    assert!(clean);
    assert!(ctx
        .state
        .lock()
        .inv_ignore
        .contains(&ImageName::from("foo")));
}

#[tokio::test]
async fn test_unreadable_destination_is_ignored() {
    for dst in [PROD, "us.gcr.io/k8s-artifacts-prod/team", "localhost:5000/prod"] {
        let manifests = [manifest_to(dst, &[("foo", A, &["v1"])])];
        let reader = FakeRegistries::default()
            .repo("gcr.io/staging/foo", &[(A, MediaType::DOCKER_MANIFEST_SCHEMA2, &["v1"])], &[])
            .broken(&format!("{dst}/foo"));
        let ctx = context(&manifests, true);
        let edges = to_promotion_edges(&manifests).unwrap();

        let (to_promote, _) = ctx.filter_promotion_edges(&edges, &reader, true).await;
        assert!(to_promote.is_empty(), "{dst}: promoted into an unread destination");
        assert_eq!(
            ctx.state.lock().inv_ignore.iter().collect::<Vec<_>>(),
            vec![&ImageName::from("foo")],
            "{dst}"
        );
    }
}

#[tokio::test]
async fn test_copy_uses_registry_tokens() {
    let manifests = [Manifest {
        registries: vec![
            RegistryContext::source(STAGING).with_service_account("sa@staging"),
            RegistryContext::new(PROD).with_service_account("sa@prod"),
        ],
        ..manifest(&[("foo", A, &["v1"])])
    }];
    let reader = staging_with(&[(A, MediaType::DOCKER_MANIFEST_SCHEMA2, &["v1"])]).repo(PROD, &[], &[]);
    let config = SyncConfig::builder()
        .confirm(true)
        .use_service_account(true)
        .build();
    let ctx = SyncContext::with_tokens(&manifests, config, &FakeTokens).await.unwrap();

    let (_, to_promote, _) = plan(&ctx, &manifests, &reader).await;
    let copier = FakeCopier::default();
    ctx.promote_or_capture(&to_promote, &copier).await.unwrap();
    assert_eq!(
        *copier.tokens.lock(),
        vec![(
            Some("token-for-sa@staging".to_string()),
            Some("token-for-sa@prod".to_string())
        )]
    );
}

#[tokio::test]
async fn test_failed_copy_does_not_block_others() {
    let manifests = [manifest(&[("foo", A, &["v1", "v2"])])];
    let reader = staging_with(&[(A, MediaType::DOCKER_MANIFEST_SCHEMA2, &["v1", "v2"])]).repo(PROD, &[], &[]);
    let ctx = context(&manifests, true);
    let (_, to_promote, _) = plan(&ctx, &manifests, &reader).await;

    let copier = FakeCopier {
        fail_dst: Some("gcr.io/prod/foo:v1".into()),
        ..FakeCopier::default()
    };
    let err = ctx.promote(&to_promote, &CopyHandler::new(&ctx, &copier)).await.unwrap_err();
    assert!(matches!(err, EngineError::RequestsFailed { failed: 1 }));
    assert_eq!(copier.copies.lock().len(), 2);
    assert!(ctx
        .state
        .lock()
        .logs
        .errors
        .iter()
        .any(|e| e.context == "copying image"));
}

#[tokio::test]
async fn test_dry_run_captures_sorted_requests() {
    let manifests = [manifest(&[("foo", A, &["v1", "latest"])])];
    let reader = staging_with(&[(A, MediaType::DOCKER_MANIFEST_SCHEMA2, &["v1"])]).repo(PROD, &[], &[]);
    let ctx = context(&manifests, false);
    let (_, to_promote, _) = plan(&ctx, &manifests, &reader).await;

    let capturer = RequestCapturer::new();
    ctx.promote(&to_promote, &capturer).await.unwrap();
    assert_eq!(
        capturer.captured().lines(),
        vec![
            format!("gcr.io/staging/foo -> gcr.io/prod/foo: Tag: 'latest' <ADD> {A}"),
            format!("gcr.io/staging/foo -> gcr.io/prod/foo: Tag: 'v1' <ADD> {A}"),
        ]
    );

    let copier = FakeCopier::default();
    ctx.promote_or_capture(&to_promote, &copier).await.unwrap();
    assert!(copier.copies.lock().is_empty());
}

#[test]
fn test_overlapping_manifests_are_rejected() {
    let err = to_promotion_edges(&[
        manifest(&[("foo", A, &["v1"])]),
        manifest(&[("foo", B, &["v1"])]),
    ])
    .unwrap_err();
    let EngineError::OverlappingEdges { destinations } = err else {
        panic!("expected overlap, got {err}");
    };
    assert_eq!(destinations, vec!["gcr.io/prod/foo:v1"]);
}

// =============================================================================
// Vulnerability check
// =============================================================================

#[tokio::test]
async fn test_vuln_check_reports_only_fixable_images() {
    let manifests = [manifest(&[("foo", A, &["v1", "v2"]), ("bar", B, &["v1"])])];
    let ctx = context(&manifests, false);
    let edges = to_promotion_edges(&manifests).unwrap();

    let scanner = FakeScanner {
        findings: BTreeMap::from([
            (
                A.to_string(),
                vec![occurrence(Severity::High, true), occurrence(Severity::Critical, false)],
            ),
            (B.to_string(), vec![occurrence(Severity::Low, true)]),
        ]),
        ..FakeScanner::default()
    };

    let check = ImageVulnCheck::new(&ctx, &edges, Severity::High, &scanner);
    let err = check.run().await.unwrap_err();
    let EngineError::VulnerableImages { images } = err else {
        panic!("expected vulnerable images");
    };
    assert_eq!(images, vec![format!("foo@{A} [1 fixable severe vulnerabilities, 2 total]")]);

    // Two edges share digest A; it is scanned once.
    let mut calls = scanner.calls.lock().clone();
    calls.sort();
    assert_eq!(calls, vec![A, B]);
}

#[tokio::test]
async fn test_vuln_check_passes_clean_images() {
    let manifests = [manifest(&[("foo", A, &["v1"])])];
    let ctx = context(&manifests, false);
    let edges = to_promotion_edges(&manifests).unwrap();
    let scanner = FakeScanner::default();

    assert!(ImageVulnCheck::new(&ctx, &edges, Severity::Medium, &scanner)
        .run()
        .await
        .is_ok());
}

// =============================================================================
// Inventory
// =============================================================================

#[tokio::test]
async fn test_recursive_read_builds_inventory() {
    let reader = FakeRegistries::default()
        .repo(STAGING, &[], &["foo", "team"])
        .repo("gcr.io/staging/foo", &[(A, MediaType::DOCKER_MANIFEST_SCHEMA2, &["v1"])], &[])
        .repo("gcr.io/staging/team", &[], &["bar"])
        .repo(
            "gcr.io/staging/team/bar",
            &[(B, "application/vnd.example.unknown", &[])],
            &[],
        );
    let ctx = context(&[manifest(&[])], false);
    let staging = [RegistryContext::source(STAGING)];

    let summary = ctx.read_registries(&staging, true, &reader).await;
    assert_eq!(summary.enqueued, 4);
    assert_eq!(summary.failed, 0);

    let inv = ctx.snapshot_inventory();
    let rii = &inv[&RegistryName::from(STAGING)];
    let images: Vec<&str> = rii.keys().map(ImageName::as_str).collect();
    assert_eq!(images, vec!["foo", "team/bar"]);

    // The unknown media type is kept in the inventory but not typed.
    let state = ctx.state.lock();
    assert!(state.digest_media_type.contains_key(&Digest::from(A)));
    assert!(!state.digest_media_type.contains_key(&Digest::from(B)));
}

#[tokio::test]
async fn test_non_recursive_read_stops_at_root() {
    let reader = FakeRegistries::default()
        .repo(STAGING, &[], &["foo"])
        .repo("gcr.io/staging/foo", &[], &[]);
    let ctx = context(&[manifest(&[])], false);

    let summary = ctx
        .read_registries(&[RegistryContext::source(STAGING)], false, &reader)
        .await;
    assert_eq!(summary.enqueued, 1);
}

#[tokio::test]
async fn test_manifest_list_children_get_parents() {
    let reader = staging_with(&[
        (LIST, MediaType::DOCKER_MANIFEST_LIST, &["v1"]),
        (CHILD1, MediaType::DOCKER_MANIFEST_SCHEMA2, &[]),
        (CHILD2, MediaType::DOCKER_MANIFEST_SCHEMA2, &[]),
    ])
    .list(LIST, &[CHILD1, CHILD2]);
    let ctx = context(&[manifest(&[])], false);

    ctx.read_registries(&[RegistryContext::source(STAGING)], true, &reader)
        .await;
    let summary = ctx.read_manifest_lists(&reader).await;
    assert_eq!(summary.completed, 1);
    assert_eq!(summary.failed, 0);

    {
        let state = ctx.state.lock();
        assert_eq!(state.parent_digest.len(), 2);
        assert_eq!(state.parent_digest[&Digest::from(CHILD1)], Digest::from(LIST));
    }

    let inv = ctx.snapshot_inventory();
    let filtered = ctx.remove_child_digest_entries(&inv[&RegistryName::from(STAGING)]);
    let digests: Vec<&Digest> = filtered[&ImageName::from("foo")].keys().collect();
    assert_eq!(digests, vec![&Digest::from(LIST)]);
}

// =============================================================================
// Clearing
// =============================================================================

#[tokio::test]
async fn test_clear_deletes_lists_first() {
    let reader = FakeRegistries::default()
        .repo(PROD, &[], &["foo", "bar"])
        .repo(
            "gcr.io/prod/foo",
            &[
                (CHILD1, MediaType::DOCKER_MANIFEST_SCHEMA2, &[]),
                (LIST, MediaType::OCI_INDEX, &["v1"]),
                (CHILD2, MediaType::DOCKER_MANIFEST_SCHEMA2, &[]),
            ],
            &[],
        )
        .repo("gcr.io/prod/bar", &[(OTHER, MediaType::OCI_MANIFEST, &["v1"])], &[]);
    let ctx = context(&[manifest(&[])], true);
    ctx.read_registries(&[RegistryContext::new(PROD)], true, &reader)
        .await;

    let deleter = FakeDeleter::default();
    let summary = ctx
        .clear_repository(&RegistryName::from(PROD), &deleter)
        .await
        .unwrap();
    assert_eq!(summary.completed, 4);

    let deleted = deleter.deleted.lock().clone();
    assert_eq!(deleted.len(), 4);
    assert_eq!(deleted[0], LIST);
}

#[tokio::test]
async fn test_clear_without_confirm_deletes_nothing() {
    let reader = FakeRegistries::default()
        .repo(PROD, &[], &["foo"])
        .repo("gcr.io/prod/foo", &[(A, MediaType::OCI_MANIFEST, &["v1"])], &[]);
    let ctx = context(&[manifest(&[])], false);
    ctx.read_registries(&[RegistryContext::new(PROD)], true, &reader)
        .await;

    let deleter = FakeDeleter::default();
    let summary = ctx
        .clear_repository(&RegistryName::from(PROD), &deleter)
        .await
        .unwrap();
    assert_eq!(summary.completed, 1);
    assert!(deleter.deleted.lock().is_empty());
}
