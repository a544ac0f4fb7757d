//! Stage execution and timing.

use crate::container::ContainerSpec;
use crate::engine::{ContainerRef, Engine};
use crate::error::EngineResult;
use crate::stage::Stage;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Instant;
use tracing::{debug, info};

/// Result of a stage execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageResult {
    /// Stage that ran.
    pub stage: Stage,

    /// Exit code (0 = success, -1 = never got an exit status).
    pub exit_code: i32,

    /// Captured stdout.
    pub stdout: String,

    /// Captured stderr.
    pub stderr: String,

    /// Duration in milliseconds.
    pub duration_ms: u64,

    /// Container the stage ran in, for stages that run one.
    pub container: Option<ContainerRef>,
}

impl StageResult {
    /// Whether this stage passed (exit code 0).
    pub fn passed(&self) -> bool {
        self.exit_code == 0
    }

    fn failed(stage: Stage, stderr: String, duration_ms: u64) -> Self {
        Self {
            stage,
            exit_code: -1,
            stdout: String::new(),
            stderr,
            duration_ms,
            container: None,
        }
    }
}

/// Runs individual stages against an engine.
pub struct StageRunner;

impl StageRunner {
    /// Run `spec` with the stage's command.
    ///
    /// A transport failure is folded into the result as exit code -1 with the
    /// engine error as stderr, so callers see one failure shape.
    pub async fn execute_stage<E: Engine + ?Sized>(
        engine: &E,
        stage: Stage,
        command: Vec<String>,
        spec: &ContainerSpec,
    ) -> StageResult {
        let start = Instant::now();
        info!(stage = %stage, image = %spec.image, "Executing stage");

        let spec = spec.clone().with_exec(command);
        let result = match engine.exec(&spec).await {
            Ok(output) => StageResult {
                stage,
                exit_code: output.exit_code,
                stdout: output.stdout,
                stderr: output.stderr,
                duration_ms: elapsed_ms(start),
                container: Some(output.container),
            },
            Err(e) => StageResult::failed(stage, e.to_string(), elapsed_ms(start)),
        };

        debug!(stage = %stage, stdout = %result.stdout, "Stage output");
        result
    }

    /// Time a host-side stage (export, extract, publish).
    pub async fn execute_host_stage<F, T>(stage: Stage, work: F) -> (StageResult, Option<T>)
    where
        F: Future<Output = EngineResult<T>>,
    {
        let start = Instant::now();
        info!(stage = %stage, "Executing stage");

        match work.await {
            Ok(value) => (
                StageResult {
                    stage,
                    exit_code: 0,
                    stdout: String::new(),
                    stderr: String::new(),
                    duration_ms: elapsed_ms(start),
                    container: None,
                },
                Some(value),
            ),
            Err(e) => (StageResult::failed(stage, e.to_string(), elapsed_ms(start)), None),
        }
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}
