//! End-to-end lifecycle runs against recording collaborators.

use std::sync::Arc;
use std::time::Duration;

use deploy_core::fakes::{FakeWorld, RecordingBuilder, RecordingRefs, RefBehavior, ScriptedChecks};
use deploy_core::{
    DeployConfig, EventPayload, LifecycleEngine, LifecycleError, RunOutcome, WaitConfig,
    WorkflowEvent,
};
use deploy_shims::{CheckRun, CheckRunOutput, ReleaseTags};
use release_state::fakes::MemoryReleaseStore;
use release_state::{MatchPolicy, ReleaseId, ReleaseKey, ReleaseStore, StoredRelease};

const FLEET: &str = "acme/fleet";
const HEAD_SHA: &str = "4ea7a6a7e47d0e1a8c8b0d1e8a7e2f1a3b4c5d6e";
const PR_ID: u64 = 810938017;

fn push_event(git_ref: &str, sha: &str) -> WorkflowEvent {
    let payload = r#"{"repository":{"name":"fleet-app","owner":{"login":"acme"},"master_branch":"main"}}"#;
    WorkflowEvent::from_json("push", git_ref, sha, payload).unwrap()
}

fn pull_request_event(action: &str, merged: bool) -> WorkflowEvent {
    let payload = format!(
        r#"{{
            "action": "{action}",
            "repository": {{"name": "fleet-app", "owner": {{"login": "acme"}}, "default_branch": "main"}},
            "pull_request": {{"id": {PR_ID}, "number": 44, "merged": {merged}, "head": {{"sha": "{HEAD_SHA}"}}}}
        }}"#
    );
    WorkflowEvent::from_json("pull_request", "refs/pull/44/merge", "merge-commit", &payload).unwrap()
}

fn pr_key() -> ReleaseKey {
    ReleaseKey::for_pull_request(FLEET, HEAD_SHA, PR_ID)
}

fn engine(world: &FakeWorld, config: DeployConfig) -> LifecycleEngine {
    LifecycleEngine::new(config, world.collaborators())
}

fn outputs(world: &FakeWorld) -> Vec<(String, String)> {
    world.outputs.values()
}

fn pair(name: &str, value: &str) -> (String, String) {
    (name.to_string(), value.to_string())
}

// ---------------------------------------------------------------------------
// Identity and classification failures
// ---------------------------------------------------------------------------

#[tokio::test]
async fn missing_repository_fails_without_side_effects() {
    let world = FakeWorld::new(42, "v1.2.3");
    let event = WorkflowEvent::new("push", "refs/heads/main", "abc123", EventPayload::default());

    let err = engine(&world, DeployConfig::new(FLEET))
        .run(&event)
        .await
        .unwrap_err();

    assert!(matches!(err, LifecycleError::MissingRepository));
    assert!(world.builder.requests().is_empty());
    assert!(world.finalizer.finalized().is_empty());
    assert!(world.refs.created().is_empty());
    assert!(outputs(&world).is_empty());
}

#[tokio::test]
async fn push_to_other_branch_names_both_refs() {
    let world = FakeWorld::new(42, "v1.2.3");
    let err = engine(&world, DeployConfig::new(FLEET))
        .run(&push_event("refs/heads/feature/x", "abc123"))
        .await
        .unwrap_err();

    let message = err.to_string();
    assert!(matches!(err, LifecycleError::UnexpectedPushRef { .. }));
    assert!(message.contains("main"), "{message}");
    assert!(message.contains("refs/heads/feature/x"), "{message}");
    assert!(world.builder.requests().is_empty());
}

#[tokio::test]
async fn configured_branch_overrides_payload_default() {
    let world = FakeWorld::new(42, "v1.2.3");
    let config = DeployConfig::new(FLEET).with_default_branch("release");

    let err = engine(&world, config.clone())
        .run(&push_event("refs/heads/main", "abc123"))
        .await
        .unwrap_err();
    assert!(err.to_string().starts_with("Push workflow only works with release branch."));

    engine(&world, config)
        .run(&push_event("refs/heads/release", "abc123"))
        .await
        .unwrap();
    assert_eq!(world.builder.requests().len(), 1);
}

#[tokio::test]
async fn unrecognized_event_is_named() {
    let world = FakeWorld::new(42, "v1.2.3");
    let payload = r#"{"repository":{"name":"fleet-app","owner":{"login":"acme"}}}"#;
    let event = WorkflowEvent::from_json("release", "refs/tags/v1", "abc123", payload).unwrap();

    let err = engine(&world, DeployConfig::new(FLEET))
        .run(&event)
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "Unsure how to proceed with event: release");
}

// ---------------------------------------------------------------------------
// Final builds
// ---------------------------------------------------------------------------

#[tokio::test]
async fn push_to_target_builds_final_release() {
    let world = FakeWorld::new(42, "v1.2.3");
    let outcome = engine(&world, DeployConfig::new(FLEET))
        .run(&push_event("refs/heads/main", "abc123"))
        .await
        .unwrap();

    let requests = world.builder.requests();
    assert_eq!(requests.len(), 1);
    assert!(!requests[0].draft);
    assert_eq!(requests[0].tags, ReleaseTags::for_commit("abc123"));
    assert_eq!(
        outputs(&world),
        vec![pair("version", "v1.2.3"), pair("release_id", "42")]
    );
    assert!(world.refs.created().is_empty());
    assert_eq!(
        outcome,
        RunOutcome::Built {
            release_id: ReleaseId(42),
            version: "v1.2.3".to_string(),
            draft: false,
            reused: false,
            tag_url: None,
        }
    );

    let stored = world
        .store
        .find(&ReleaseKey::new(FLEET, "abc123"))
        .await
        .unwrap();
    assert_eq!(stored, Some(StoredRelease::finalized(ReleaseId(42))));
}

#[tokio::test]
async fn push_to_target_creates_tag_when_enabled() {
    let world = FakeWorld::new(42, "v1.2.3");
    let config = DeployConfig::new(FLEET).with_create_tag(true);

    let outcome = engine(&world, config)
        .run(&push_event("refs/heads/main", "abc123"))
        .await
        .unwrap();

    assert_eq!(
        world.refs.created(),
        vec![("abc123".to_string(), "v1.2.3".to_string())]
    );
    match outcome {
        RunOutcome::Built { tag_url, .. } => {
            assert!(tag_url.unwrap().ends_with("/git/refs/tags/v1.2.3"))
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[tokio::test]
async fn existing_tag_is_not_an_error() {
    let mut world = FakeWorld::new(42, "v1.2.3");
    world.refs = Arc::new(RecordingRefs::new(RefBehavior::AlreadyExists));
    let config = DeployConfig::new(FLEET).with_create_tag(true);

    let outcome = engine(&world, config)
        .run(&push_event("refs/heads/main", "abc123"))
        .await
        .unwrap();
    assert!(matches!(outcome, RunOutcome::Built { tag_url: None, .. }));
}

#[tokio::test]
async fn tag_failure_propagates_after_outputs() {
    let mut world = FakeWorld::new(42, "v1.2.3");
    world.refs = Arc::new(RecordingRefs::new(RefBehavior::Fail));
    let config = DeployConfig::new(FLEET).with_create_tag(true);

    let err = engine(&world, config)
        .run(&push_event("refs/heads/main", "abc123"))
        .await
        .unwrap_err();
    assert!(matches!(err, LifecycleError::RefCreation(_)));
    assert_eq!(outputs(&world).len(), 2);
}

#[tokio::test]
async fn tag_push_carries_git_tag() {
    let world = FakeWorld::new(42, "v1.2.3");
    engine(&world, DeployConfig::new(FLEET))
        .run(&push_event("refs/tags/v1.2.3", "abc123"))
        .await
        .unwrap();

    let requests = world.builder.requests();
    assert_eq!(
        requests[0].tags,
        ReleaseTags::for_commit("abc123").with_git_tag("v1.2.3")
    );
    assert!(!requests[0].draft);
}

#[tokio::test]
async fn manual_dispatch_builds_final_release() {
    let world = FakeWorld::new(7, "v0.1.0");
    let payload = r#"{"repository":{"name":"fleet-app","owner":{"login":"acme"}}}"#;
    let event =
        WorkflowEvent::from_json("workflow_dispatch", "refs/heads/any", "abc123", payload).unwrap();

    engine(&world, DeployConfig::new(FLEET)).run(&event).await.unwrap();
    let requests = world.builder.requests();
    assert_eq!(requests.len(), 1);
    assert!(!requests[0].draft);
}

#[tokio::test]
async fn build_flags_follow_config() {
    let world = FakeWorld::new(42, "v1.2.3");
    let config = DeployConfig::new(FLEET)
        .with_source("./app")
        .with_layer_cache(false)
        .with_multi_dockerignore(true);

    engine(&world, config)
        .run(&push_event("refs/heads/main", "abc123"))
        .await
        .unwrap();

    let request = &world.builder.requests()[0];
    assert_eq!(request.fleet, FLEET);
    assert_eq!(request.source, std::path::PathBuf::from("./app"));
    assert!(request.no_cache);
    assert!(request.multi_dockerignore);
}

#[tokio::test]
async fn build_failure_propagates_and_records_nothing() {
    let mut world = FakeWorld::new(42, "v1.2.3");
    world.builder = Arc::new(RecordingBuilder::failing());

    let err = engine(&world, DeployConfig::new(FLEET))
        .run(&push_event("refs/heads/main", "abc123"))
        .await
        .unwrap_err();

    assert!(matches!(err, LifecycleError::BuildExecution(_)));
    assert_eq!(err.to_string(), "Build process returned non-0 exit code");
    assert!(world.store.is_empty());
    assert!(outputs(&world).is_empty());
}

// ---------------------------------------------------------------------------
// Cache reuse
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cached_release_skips_build() {
    let world = FakeWorld::new(42, "v1.2.3");
    world
        .store
        .record(&ReleaseKey::new(FLEET, "abc123"), StoredRelease::finalized(ReleaseId(9)))
        .await
        .unwrap();

    let outcome = engine(&world, DeployConfig::new(FLEET))
        .run(&push_event("refs/heads/main", "abc123"))
        .await
        .unwrap();

    assert!(world.builder.requests().is_empty());
    assert!(matches!(
        outcome,
        RunOutcome::Built {
            release_id: ReleaseId(9),
            reused: true,
            ..
        }
    ));
    assert_eq!(outputs(&world)[1], pair("release_id", "9"));
}

#[tokio::test]
async fn cache_disabled_always_builds() {
    let world = FakeWorld::new(42, "v1.2.3");
    world
        .store
        .record(&ReleaseKey::new(FLEET, "abc123"), StoredRelease::finalized(ReleaseId(9)))
        .await
        .unwrap();

    engine(&world, DeployConfig::new(FLEET).with_cache(false))
        .run(&push_event("refs/heads/main", "abc123"))
        .await
        .unwrap();
    assert_eq!(world.builder.requests().len(), 1);
}

#[tokio::test]
async fn ambiguous_cache_lookup_fails_loudly() {
    let world = FakeWorld::new(42, "v1.2.3");
    world.store.seed(
        ReleaseKey::new(FLEET, "abc123"),
        vec![
            StoredRelease::finalized(ReleaseId(10)),
            StoredRelease::finalized(ReleaseId(9)),
        ],
    );

    let err = engine(&world, DeployConfig::new(FLEET))
        .run(&push_event("refs/heads/main", "abc123"))
        .await
        .unwrap_err();
    assert!(matches!(err, LifecycleError::AmbiguousMatch { count: 2, .. }));
    assert!(world.builder.requests().is_empty());
}

#[tokio::test]
async fn most_recent_policy_reuses_newest() {
    let mut world = FakeWorld::new(42, "v1.2.3");
    world.store = Arc::new(MemoryReleaseStore::with_policy(MatchPolicy::MostRecent));
    world.store.seed(
        ReleaseKey::new(FLEET, "abc123"),
        vec![
            StoredRelease::finalized(ReleaseId(10)),
            StoredRelease::finalized(ReleaseId(9)),
        ],
    );

    let outcome = engine(&world, DeployConfig::new(FLEET))
        .run(&push_event("refs/heads/main", "abc123"))
        .await
        .unwrap();
    assert!(matches!(
        outcome,
        RunOutcome::Built {
            release_id: ReleaseId(10),
            ..
        }
    ));
}

// ---------------------------------------------------------------------------
// Pull requests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn open_pull_request_builds_draft_without_tag() {
    let world = FakeWorld::new(2008424, "0.0.0-1639156200222");
    let config = DeployConfig::new(FLEET).with_create_tag(true);

    engine(&world, config)
        .run(&pull_request_event("synchronize", false))
        .await
        .unwrap();

    let requests = world.builder.requests();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].draft);
    assert_eq!(requests[0].tags, ReleaseTags::for_pull_request(HEAD_SHA, PR_ID));
    assert!(world.refs.created().is_empty());
    assert_eq!(
        outputs(&world),
        vec![
            pair("version", "0.0.0-1639156200222"),
            pair("release_id", "2008424")
        ]
    );
    assert_eq!(
        world.store.find(&pr_key()).await.unwrap(),
        Some(StoredRelease::draft(ReleaseId(2008424)))
    );
}

#[tokio::test(start_paused = true)]
async fn versionbot_branch_checked_out_before_draft_build() {
    let mut world = FakeWorld::new(42, "v1.2.3");
    let bot = |status: &str| CheckRun {
        id: 1,
        name: "Versionbot".to_string(),
        status: status.to_string(),
        output: CheckRunOutput::default(),
        completed_at: None,
    };
    world.checks = Arc::new(ScriptedChecks::new(vec![
        Ok(vec![bot("in_progress")]),
        Ok(vec![bot("completed")]),
    ]));
    let config = DeployConfig::new(FLEET).with_versionbot(true);

    engine(&world, config)
        .run(&pull_request_event("opened", false))
        .await
        .unwrap();

    assert_eq!(world.checks.calls(), 2);
    assert_eq!(
        world.source.calls(),
        vec!["fetch".to_string(), "checkout versionbot/pr/44".to_string()]
    );
    assert_eq!(world.builder.requests().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn versionbot_timeout_prevents_build() {
    let world = FakeWorld::new(42, "v1.2.3");
    let config = DeployConfig::new(FLEET).with_versionbot(true).with_wait(WaitConfig {
        max_attempts: 5,
        interval: Duration::from_secs(4),
        marker: "versionbot".to_string(),
    });

    let err = engine(&world, config)
        .run(&pull_request_event("opened", false))
        .await
        .unwrap_err();

    assert!(err.to_string().contains("versionbot/pr/44"));
    assert_eq!(world.checks.calls(), 5);
    assert!(world.source.calls().is_empty());
    assert!(world.builder.requests().is_empty());
}

#[tokio::test]
async fn versionbot_not_consulted_for_push() {
    let world = FakeWorld::new(42, "v1.2.3");
    engine(&world, DeployConfig::new(FLEET).with_versionbot(true))
        .run(&push_event("refs/heads/main", "abc123"))
        .await
        .unwrap();
    assert_eq!(world.checks.calls(), 0);
    assert!(world.source.calls().is_empty());
}

#[tokio::test]
async fn closed_unmerged_is_noop() {
    let world = FakeWorld::new(42, "v1.2.3");
    let outcome = engine(&world, DeployConfig::new(FLEET))
        .run(&pull_request_event("closed", false))
        .await
        .unwrap();

    assert!(matches!(outcome, RunOutcome::Skipped { .. }));
    assert!(world.builder.requests().is_empty());
    assert!(world.finalizer.finalized().is_empty());
    assert!(outputs(&world).is_empty());
}

// ---------------------------------------------------------------------------
// Finalization
// ---------------------------------------------------------------------------

#[tokio::test]
async fn merge_without_prior_release_fails() {
    let world = FakeWorld::new(42, "v1.2.3");
    let err = engine(&world, DeployConfig::new(FLEET))
        .run(&pull_request_event("closed", true))
        .await
        .unwrap_err();

    assert!(matches!(err, LifecycleError::ReleaseNotFound { .. }));
    assert!(world.finalizer.finalized().is_empty());
}

#[tokio::test]
async fn merge_finalizes_draft_once() {
    let world = FakeWorld::new(42, "v1.2.3");
    world
        .store
        .record(&pr_key(), StoredRelease::draft(ReleaseId(2008424)))
        .await
        .unwrap();
    let engine = engine(&world, DeployConfig::new(FLEET).with_create_tag(true));
    let merged = pull_request_event("closed", true);

    let outcome = engine.run(&merged).await.unwrap();
    assert!(matches!(
        outcome,
        RunOutcome::Finalized {
            release_id: ReleaseId(2008424),
            ..
        }
    ));
    assert_eq!(world.finalizer.finalized(), vec![ReleaseId(2008424)]);
    assert_eq!(
        world.store.find(&pr_key()).await.unwrap(),
        Some(StoredRelease::finalized(ReleaseId(2008424)))
    );
    assert_eq!(
        outputs(&world),
        vec![pair("version", "v1.2.3"), pair("release_id", "2008424")]
    );
    assert_eq!(
        world.refs.created(),
        vec![(HEAD_SHA.to_string(), "v1.2.3".to_string())]
    );

    // Replaying the merge sees the final release and does nothing.
    let replay = engine.run(&merged).await.unwrap();
    assert!(matches!(replay, RunOutcome::Skipped { .. }));
    assert_eq!(world.finalizer.finalized().len(), 1);
    assert_eq!(outputs(&world).len(), 2);
}

#[tokio::test]
async fn draft_then_merge_round_trip() {
    let world = FakeWorld::new(31337, "v2.0.0");
    let engine = engine(&world, DeployConfig::new(FLEET));

    engine.run(&pull_request_event("opened", false)).await.unwrap();
    engine.run(&pull_request_event("closed", true)).await.unwrap();

    assert_eq!(world.builder.requests().len(), 1);
    assert_eq!(world.finalizer.finalized(), vec![ReleaseId(31337)]);
}

#[tokio::test]
async fn plan_does_not_execute() {
    let world = FakeWorld::new(42, "v1.2.3");
    let event = push_event("refs/heads/main", "abc123");
    let repo = deploy_core::resolve(&event).unwrap();

    let decision = engine(&world, DeployConfig::new(FLEET))
        .decide(&event, &repo)
        .await
        .unwrap();

    assert_eq!(
        decision,
        deploy_core::Decision::BuildFinal {
            tags: ReleaseTags::for_commit("abc123")
        }
    );
    assert!(world.builder.requests().is_empty());
    assert!(outputs(&world).is_empty());
}
