//! Pipeline dispatch: pull-request verification and release.

use crate::config::PipelineConfig;
use crate::container::{ContainerSpec, Directory, FileSource, ImageSpec};
use crate::context::{ExecutionContext, TaskName, TOKEN_VAR};
use crate::engine::{ContainerRef, Engine};
use crate::error::{EngineError, PipelineError, Result};
use crate::runner::{StageResult, StageRunner};
use crate::stage::Stage;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{error, info, warn};

/// Container path the source snapshot is mounted at.
pub const SRC_DIR: &str = "/src";

/// Container path of the Go module cache.
pub const GO_MOD_CACHE: &str = "/go/pkg/mod";

/// Location of the SBOM generator inside its image.
const SYFT_IMAGE_PATH: &str = "/syft";

/// Where goreleaser looks for syft.
const SYFT_BIN: &str = "/bin/syft";

/// Result of a complete pipeline run.
#[derive(Debug)]
pub struct PipelineResult {
    pub task: TaskName,

    /// Human-readable outcome.
    pub message: String,

    /// Failure that stopped the run, if any.
    pub error: Option<PipelineError>,

    /// Stages in execution order, including the failing one.
    pub stages: Vec<StageResult>,

    /// Total duration in milliseconds.
    pub duration_ms: u64,
}

impl PipelineResult {
    pub fn success(&self) -> bool {
        self.error.is_none()
    }

    /// Number of stages that passed.
    pub fn passed_count(&self) -> usize {
        self.stages.iter().filter(|s| s.passed()).count()
    }

    /// The success message, or the failure.
    pub fn into_result(self) -> Result<String> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.message),
        }
    }
}

/// Selects and runs the pipeline for a task.
pub struct Dispatcher {
    config: PipelineConfig,
}

impl Dispatcher {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    /// Run the pipeline selected by `task`.
    ///
    /// Stages run strictly in sequence; the first failure ends the run.
    pub async fn run<E: Engine + ?Sized>(
        &self,
        task: TaskName,
        ctx: &ExecutionContext,
        engine: &E,
    ) -> PipelineResult {
        let start = Instant::now();
        info!(
            task = %task,
            event = %ctx.event,
            git_ref = %ctx.git_ref,
            local = ctx.local_mode,
            "Starting pipeline"
        );

        let mut stages = Vec::new();
        let outcome = match task {
            TaskName::PullRequest => self.verify(engine, &mut stages).await,
            TaskName::Release => self.release(ctx, engine, &mut stages).await,
        };
        let duration_ms = start.elapsed().as_millis() as u64;

        match outcome {
            Ok(message) => {
                info!(task = %task, duration_ms, "{}", message);
                PipelineResult {
                    task,
                    message,
                    error: None,
                    stages,
                    duration_ms,
                }
            }
            Err(e) => {
                error!(task = %task, duration_ms, error = %e, "Pipeline failed");
                PipelineResult {
                    task,
                    message: format!("{} pipeline failed", task),
                    error: Some(e),
                    stages,
                    duration_ms,
                }
            }
        }
    }

    /// Test and build inside the Go toolchain image. Nothing leaves the container.
    async fn verify<E: Engine + ?Sized>(
        &self,
        engine: &E,
        stages: &mut Vec<StageResult>,
    ) -> Result<String> {
        let source = Directory::host(&self.config.source_dir)
            .excluding(self.config.verify_excludes.clone());

        let golang = ContainerSpec::from(self.config.go_image())
            .with_mounted_directory(SRC_DIR, source)
            .with_workdir(SRC_DIR)
            .with_mounted_cache(GO_MOD_CACHE, self.config.cache_volume.clone())
            .with_env_variable("CGO_ENABLED", "0");

        self.container_stage(engine, Stage::GoTest, &golang, stages)
            .await
            .map_err(|stderr| PipelineError::TestFailure { stderr })?;
        info!("Tests passed successfully");

        self.container_stage(engine, Stage::GoBuild, &golang, stages)
            .await
            .map_err(|stderr| PipelineError::BuildFailure { stderr })?;
        info!(binary = %self.config.binary_path(), "Built binary successfully");

        Ok(format!(
            "Verification passed: {} tested and built",
            self.config.app_name
        ))
    }

    async fn release<E: Engine + ?Sized>(
        &self,
        ctx: &ExecutionContext,
        engine: &E,
        stages: &mut Vec<StageResult>,
    ) -> Result<String> {
        let token = ctx
            .token
            .clone()
            .ok_or(PipelineError::MissingCredential(TOKEN_VAR))?;

        if ctx.is_tag_push() {
            info!(git_ref = %ctx.git_ref, "Tag push detected");
        } else if !ctx.local_mode {
            warn!(
                event = %ctx.event,
                git_ref = %ctx.git_ref,
                "Release requested outside a version tag push"
            );
        }

        let syft = FileSource::Image {
            image: self.config.syft_image(),
            path: SYFT_IMAGE_PATH.to_string(),
        };
        let goreleaser = ContainerSpec::from(self.config.goreleaser_image())
            .with_file(SYFT_BIN, syft)
            .with_mounted_directory(SRC_DIR, Directory::host(&self.config.source_dir))
            .with_workdir(SRC_DIR)
            .with_mounted_cache(GO_MOD_CACHE, self.config.cache_volume.clone())
            .with_env_variable("TINI_SUBREAPER", "true")
            .with_secret_variable(TOKEN_VAR, token);

        if ctx.local_mode {
            return self.local_release(engine, &goreleaser, stages).await;
        }

        self.container_stage(engine, Stage::Release, &goreleaser, stages)
            .await
            .map_err(|stderr| PipelineError::ReleaseFailure { stderr })?;

        Ok(format!(
            "Release completed: goreleaser published {} for {}",
            self.config.app_name,
            display_ref(&ctx.git_ref)
        ))
    }

    /// Snapshot release, export to the host, and push a short-lived test image.
    async fn local_release<E: Engine + ?Sized>(
        &self,
        engine: &E,
        goreleaser: &ContainerSpec,
        stages: &mut Vec<StageResult>,
    ) -> Result<String> {
        let container = self
            .container_stage(engine, Stage::SnapshotRelease, goreleaser, stages)
            .await
            .map_err(local_failure(Stage::SnapshotRelease))?;

        let export_dir = self.config.export_dir.clone();
        let container_path = format!("{}/{}", SRC_DIR, self.config.build_path);
        self.host_stage(
            Stage::ExportDist,
            stages,
            engine.export_directory(&container, &container_path, &export_dir),
        )
        .await
        .map_err(local_failure(Stage::ExportDist))?;

        let binary = self.config.release_binary_path();
        self.host_stage(Stage::ExtractBinary, stages, locate_binary(binary.clone()))
            .await
            .map_err(local_failure(Stage::ExtractBinary))?;

        let entrypoint = format!("/bin/{}", self.config.app_name);
        let image = ImageSpec::from(self.config.runtime_image.clone())
            .with_file(entrypoint.clone(), binary)
            .with_workdir("/bin")
            .with_entrypoint(vec![entrypoint]);
        let address = self.config.publish_address();
        let published = self
            .host_stage(Stage::PublishImage, stages, engine.publish(&image, &address))
            .await
            .map_err(|stderr| PipelineError::PublishFailure {
                stage: Stage::PublishImage,
                stderr,
            })?;
        info!(image = %published, "Published successfully");

        Ok(format!(
            "Local release completed: snapshot exported to {} and published {}",
            export_dir.display(),
            published
        ))
    }

    /// Run a container stage; `Err` carries the captured stderr.
    async fn container_stage<E: Engine + ?Sized>(
        &self,
        engine: &E,
        stage: Stage,
        spec: &ContainerSpec,
        stages: &mut Vec<StageResult>,
    ) -> std::result::Result<ContainerRef, String> {
        let command = stage.command(&self.config).unwrap_or_default();
        let result = StageRunner::execute_stage(engine, stage, command, spec).await;
        log_stage(&result);

        let outcome = match (&result.container, result.passed()) {
            (Some(container), true) => Ok(container.clone()),
            _ => Err(result.stderr.clone()),
        };
        stages.push(result);
        outcome
    }

    async fn host_stage<F, T>(
        &self,
        stage: Stage,
        stages: &mut Vec<StageResult>,
        work: F,
    ) -> std::result::Result<T, String>
    where
        F: std::future::Future<Output = std::result::Result<T, EngineError>>,
    {
        let (result, value) = StageRunner::execute_host_stage(stage, work).await;
        log_stage(&result);

        let outcome = value.ok_or_else(|| result.stderr.clone());
        stages.push(result);
        outcome
    }
}

fn local_failure(stage: Stage) -> impl Fn(String) -> PipelineError {
    move |stderr| PipelineError::LocalReleaseFailure { stage, stderr }
}

async fn locate_binary(path: PathBuf) -> std::result::Result<PathBuf, EngineError> {
    match tokio::fs::metadata(&path).await {
        Ok(meta) if meta.is_file() => Ok(path),
        Ok(_) => Err(EngineError::NotFound(format!(
            "release binary {} is not a file",
            path.display()
        ))),
        Err(e) => Err(EngineError::NotFound(format!(
            "release binary {}: {}",
            path.display(),
            e
        ))),
    }
}

fn log_stage(result: &StageResult) {
    if result.passed() {
        info!(
            stage = %result.stage,
            duration_ms = result.duration_ms,
            "Stage passed"
        );
    } else {
        error!(
            stage = %result.stage,
            exit_code = result.exit_code,
            duration_ms = result.duration_ms,
            "Stage failed"
        );
    }
}

fn display_ref(git_ref: &str) -> &str {
    if git_ref.is_empty() {
        "the current checkout"
    } else {
        git_ref
    }
}
