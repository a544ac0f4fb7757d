//! Integration tests for pipeline dispatch with FakeEngine.

use shipwright_ci::container::Mount;
use shipwright_ci::fakes::{EngineCall, ExecScript, FakeEngine};
use shipwright_ci::{
    resolve, Dispatcher, EngineSession, ExecutionContext, FileSource, Invocation, PipelineConfig,
    PipelineError, Stage, TaskName,
};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

const APP: &str = "dagger-go-example-app";

fn source_tree() -> TempDir {
    let dir = TempDir::new().expect("tempdir");
    std::fs::write(dir.path().join("main.go"), "package main\n").unwrap();
    std::fs::write(dir.path().join("go.mod"), "module example\n").unwrap();
    dir
}

fn dispatcher(source: &Path) -> Dispatcher {
    Dispatcher::new(
        PipelineConfig::default()
            .with_source_dir(source)
            .with_export_dir(source.join("dist")),
    )
}

fn context(local_mode: bool, token: Option<&str>) -> ExecutionContext {
    let mut env = HashMap::new();
    env.insert("GITHUB_EVENT".to_string(), "push".to_string());
    env.insert("GITHUB_REF".to_string(), "refs/tags/v0.0.1".to_string());
    if let Some(token) = token {
        env.insert("GITHUB_TOKEN".to_string(), token.to_string());
    }
    ExecutionContext::from_lookup(local_mode, move |key| env.get(key).cloned())
}

fn release_binary() -> String {
    format!("{APP}_linux_amd64_v1/{APP}")
}

/// Test: pull-request runs test then build and exports nothing
#[tokio::test]
async fn test_pull_request_success() {
    let source = source_tree();
    let engine = FakeEngine::new();

    let result = dispatcher(source.path())
        .run(TaskName::PullRequest, &context(false, None), &engine)
        .await;

    assert!(result.success(), "pipeline should succeed: {:?}", result.error);
    assert_eq!(result.passed_count(), 2);
    assert_eq!(
        engine.exec_args(),
        vec![
            vec!["go".to_string(), "test".to_string(), "./...".to_string()],
            vec![
                "go".to_string(),
                "build".to_string(),
                "-o".to_string(),
                format!("dist/{APP}"),
                ".".to_string(),
            ],
        ]
    );
    assert!(engine.exports().is_empty(), "no host export for pull requests");
    assert!(engine.publishes().is_empty());
    assert!(!source.path().join("dist").exists());
}

/// Test: verification container is provisioned with a filtered snapshot,
/// the module cache and CGO disabled
#[tokio::test]
async fn test_pull_request_container_shape() {
    let source = source_tree();
    let engine = FakeEngine::new();

    dispatcher(source.path())
        .run(TaskName::PullRequest, &context(false, None), &engine)
        .await;

    let calls = engine.calls();
    let EngineCall::Exec {
        image, mounts, env, ..
    } = &calls[0]
    else {
        panic!("first call should be exec");
    };
    assert_eq!(image, "golang:1.20-alpine");
    assert!(env.contains(&"CGO_ENABLED".to_string()));

    let snapshot = mounts.iter().find_map(|m| match m {
        Mount::Directory { source, target } if target == "/src" => Some(source),
        _ => None,
    });
    let snapshot = snapshot.expect("source mounted at /src");
    assert!(snapshot.is_filtered());
    assert!(snapshot.exclude.contains(&".git".to_string()));

    assert!(mounts.iter().any(|m| matches!(
        m,
        Mount::Cache { volume, target } if volume == "gomod" && target == "/go/pkg/mod"
    )));
}

/// Test: failing tests stop the pipeline before the build
#[tokio::test]
async fn test_pull_request_test_failure_skips_build() {
    let source = source_tree();
    let engine = FakeEngine::new().script(
        &["go", "test", "./..."],
        ExecScript::exit(1, "--- FAIL: TestHello (0.00s)"),
    );

    let result = dispatcher(source.path())
        .run(TaskName::PullRequest, &context(false, None), &engine)
        .await;

    assert_eq!(engine.exec_args().len(), 1, "build must not run");
    assert_eq!(result.stages.len(), 1);
    match result.error {
        Some(PipelineError::TestFailure { stderr }) => {
            assert_eq!(stderr, "--- FAIL: TestHello (0.00s)")
        }
        other => panic!("expected TestFailure, got {other:?}"),
    }
}

/// Test: transport failure during tests is a test failure too
#[tokio::test]
async fn test_pull_request_transport_failure() {
    let source = source_tree();
    let engine = FakeEngine::new().script(
        &["go", "test", "./..."],
        ExecScript::transport("connection reset"),
    );

    let result = dispatcher(source.path())
        .run(TaskName::PullRequest, &context(false, None), &engine)
        .await;

    match result.error {
        Some(PipelineError::TestFailure { stderr }) => assert!(stderr.contains("connection reset")),
        other => panic!("expected TestFailure, got {other:?}"),
    }
}

/// Test: build failure after passing tests
#[tokio::test]
async fn test_pull_request_build_failure() {
    let source = source_tree();
    let engine = FakeEngine::new().script(
        &["go", "build", "-o", "dist/dagger-go-example-app", "."],
        ExecScript::exit(2, "./main.go:3:1: syntax error"),
    );

    let result = dispatcher(source.path())
        .run(TaskName::PullRequest, &context(false, None), &engine)
        .await;

    assert_eq!(result.passed_count(), 1);
    assert!(matches!(
        result.error,
        Some(PipelineError::BuildFailure { ref stderr }) if stderr.contains("syntax error")
    ));
}

/// Test: release without a token fails before any engine call
#[tokio::test]
async fn test_release_without_token() {
    let source = source_tree();
    let engine = FakeEngine::new();

    let result = dispatcher(source.path())
        .run(TaskName::Release, &context(false, None), &engine)
        .await;

    assert!(matches!(
        result.error,
        Some(PipelineError::MissingCredential("GITHUB_TOKEN"))
    ));
    assert!(engine.calls().is_empty(), "release image must not be contacted");
    assert!(result.stages.is_empty());
}

/// Test: full release runs goreleaser --clean with syft, secret and subreaper
#[tokio::test]
async fn test_release_success() {
    let source = source_tree();
    let engine = FakeEngine::new();

    let result = dispatcher(source.path())
        .run(TaskName::Release, &context(false, Some("ghp_token")), &engine)
        .await;

    assert!(result.success(), "release should succeed: {:?}", result.error);
    assert!(result.message.contains("Release completed"));
    assert_eq!(engine.exec_args(), vec![vec!["--clean".to_string()]]);
    assert!(engine.exports().is_empty());
    assert!(engine.publishes().is_empty());

    let calls = engine.calls();
    let EngineCall::Exec {
        image, mounts, env, ..
    } = &calls[0]
    else {
        panic!("expected exec");
    };
    assert_eq!(image, "goreleaser/goreleaser:latest");
    assert!(env.contains(&"GITHUB_TOKEN".to_string()));
    assert!(env.contains(&"TINI_SUBREAPER".to_string()));
    assert!(mounts.iter().any(|m| matches!(
        m,
        Mount::File {
            source: FileSource::Image { image, path },
            target,
        } if image == "anchore/syft:latest" && path == "/syft" && target == "/bin/syft"
    )));
    assert!(mounts.iter().any(|m| matches!(
        m,
        Mount::Directory { source, .. } if !source.is_filtered()
    )));
}

/// Test: goreleaser failure surfaces its stderr
#[tokio::test]
async fn test_release_failure() {
    let source = source_tree();
    let engine = FakeEngine::new().script(
        &["--clean"],
        ExecScript::exit(1, "git is in a dirty state"),
    );

    let result = dispatcher(source.path())
        .run(TaskName::Release, &context(false, Some("ghp_token")), &engine)
        .await;

    assert!(matches!(
        result.error,
        Some(PipelineError::ReleaseFailure { ref stderr }) if stderr == "git is in a dirty state"
    ));
}

/// Test: local release exports dist and publishes one short-lived image
#[tokio::test]
async fn test_local_release_exports_and_publishes() {
    let source = source_tree();
    let engine = FakeEngine::new().export_creates(release_binary());

    let result = dispatcher(source.path())
        .run(TaskName::Release, &context(true, Some("ghp_token")), &engine)
        .await;

    assert!(result.success(), "local release should succeed: {:?}", result.error);
    assert!(result.message.contains("Local release completed"));
    assert_eq!(
        engine.exec_args(),
        vec![vec!["--snapshot".to_string(), "--clean".to_string()]]
    );

    let exports = engine.exports();
    assert_eq!(exports.len(), 1);
    assert_eq!(exports[0].0, "/src/dist");
    assert_eq!(exports[0].1, source.path().join("dist"));
    assert!(source.path().join("dist").join(release_binary()).is_file());

    let publishes = engine.publishes();
    assert_eq!(publishes.len(), 1, "exactly one image is published");
    let (address, image) = &publishes[0];
    assert_eq!(address, &format!("ttl.sh/{APP}-0.0.1:5m"));
    assert_eq!(image.base, "alpine:latest");
    assert_eq!(image.entrypoint, vec![format!("/bin/{APP}")]);
    assert_eq!(image.files[0].0, source.path().join("dist").join(release_binary()));

    let stages: Vec<Stage> = result.stages.iter().map(|s| s.stage).collect();
    assert_eq!(
        stages,
        vec![
            Stage::SnapshotRelease,
            Stage::ExportDist,
            Stage::ExtractBinary,
            Stage::PublishImage,
        ]
    );
}

/// Test: missing platform binary is a local release failure at extraction
#[tokio::test]
async fn test_local_release_missing_binary() {
    let source = source_tree();
    let engine = FakeEngine::new();

    let result = dispatcher(source.path())
        .run(TaskName::Release, &context(true, Some("ghp_token")), &engine)
        .await;

    match &result.error {
        Some(PipelineError::LocalReleaseFailure {
            stage: Stage::ExtractBinary,
            stderr,
        }) => {
            assert!(stderr.contains("not found"));
            assert!(!stderr.contains("snapshot"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(engine.publishes().is_empty());
}

/// Test: export failure names the export stage
#[tokio::test]
async fn test_local_release_export_failure() {
    let source = source_tree();
    let engine = FakeEngine::new().fail_export("No such container path");

    let result = dispatcher(source.path())
        .run(TaskName::Release, &context(true, Some("ghp_token")), &engine)
        .await;

    match result.error {
        Some(PipelineError::LocalReleaseFailure { stage, stderr }) => {
            assert_eq!(stage, Stage::ExportDist);
            assert!(stderr.contains("No such container path"));
        }
        other => panic!("expected LocalReleaseFailure, got {other:?}"),
    }
}

/// Test: snapshot goreleaser failure is a local release failure
#[tokio::test]
async fn test_local_release_snapshot_failure() {
    let source = source_tree();
    let engine = FakeEngine::new().script(
        &["--snapshot", "--clean"],
        ExecScript::exit(1, "build failed for linux_amd64"),
    );

    let result = dispatcher(source.path())
        .run(TaskName::Release, &context(true, Some("ghp_token")), &engine)
        .await;

    assert!(matches!(
        result.error,
        Some(PipelineError::LocalReleaseFailure {
            stage: Stage::SnapshotRelease,
            ..
        })
    ));
    assert!(engine.exports().is_empty());
}

/// Test: registry rejection is a publish failure
#[tokio::test]
async fn test_local_release_publish_failure() {
    let source = source_tree();
    let engine = FakeEngine::new()
        .export_creates(release_binary())
        .fail_publish("denied: requested access to the resource is denied");

    let result = dispatcher(source.path())
        .run(TaskName::Release, &context(true, Some("ghp_token")), &engine)
        .await;

    match result.error {
        Some(PipelineError::PublishFailure { stage, stderr }) => {
            assert_eq!(stage, Stage::PublishImage);
            assert!(stderr.contains("denied"));
        }
        other => panic!("expected PublishFailure, got {other:?}"),
    }
}

/// Test: the engine session closes once per run on success and failure
#[tokio::test]
async fn test_engine_closed_once_per_run() {
    let source = source_tree();

    for (task, ctx, engine) in [
        (TaskName::PullRequest, context(false, None), FakeEngine::new()),
        (
            TaskName::PullRequest,
            context(false, None),
            FakeEngine::new().script(&["go", "test", "./..."], ExecScript::exit(1, "FAIL")),
        ),
        (TaskName::Release, context(false, None), FakeEngine::new()),
        (TaskName::Release, context(false, Some("ghp_token")), FakeEngine::new()),
    ] {
        let engine = Arc::new(engine);
        {
            let session = EngineSession::new(engine.clone());
            dispatcher(source.path())
                .run(task, &ctx, session.engine())
                .await;
        }
        assert_eq!(engine.close_count(), 1);
    }
}

/// Test: resolve feeds the dispatcher end to end
#[tokio::test]
async fn test_resolve_then_dispatch() {
    let source = source_tree();
    let invocation = Invocation {
        task: Some("pull-request".to_string()),
        local: false,
    };
    let (task, ctx) = resolve(&invocation, |key| match key {
        "GITHUB_EVENT" => Some("pull_request".to_string()),
        _ => None,
    })
    .unwrap();

    let engine = FakeEngine::new();
    let result = dispatcher(source.path()).run(task, &ctx, &engine).await;

    assert!(result.success());
    assert_eq!(result.task, TaskName::PullRequest);
}
