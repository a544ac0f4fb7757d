//! Shipwright - CI pipelines for the Go example application
//!
//! The `shipwright` command connects to the container engine and runs one of
//! two pipelines.
//!
//! ## Tasks
//!
//! - `pull-request`: run `go test` and `go build` against a filtered snapshot
//! - `release`: run goreleaser; with `--local`, export `dist/` and push a
//!   short-lived image instead of publishing

use anyhow::Result;
use clap::{CommandFactory, Parser};
use serde::Serialize;
use shipwright_ci::{
    init_tracing, resolve, Dispatcher, DockerEngine, EngineSession, Invocation, PipelineConfig,
    PipelineError, PipelineResult, StageResult, TaskName,
};
use std::path::PathBuf;
use tracing::{info, Level};

#[derive(Parser, Debug)]
#[command(name = "shipwright")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Containerised CI pipelines for the Go example application", long_about = None)]
struct Cli {
    /// Pipeline to run (pull-request | release)
    task: Option<String>,

    /// Snapshot release: export the build output locally and push a test image
    #[arg(long, env = "SHIPWRIGHT_LOCAL")]
    local: bool,

    /// Host source directory
    #[arg(long, default_value = ".", env = "SHIPWRIGHT_SOURCE")]
    source: PathBuf,

    /// Host directory for exported build output in local release mode
    #[arg(long, default_value = "dist", env = "SHIPWRIGHT_EXPORT_DIR")]
    export_dir: PathBuf,

    /// Go toolchain version
    #[arg(long, env = "SHIPWRIGHT_GO_VERSION")]
    go_version: Option<String>,

    /// Application binary name
    #[arg(long, env = "SHIPWRIGHT_APP_NAME")]
    app_name: Option<String>,

    /// Application version used in the local release image name
    #[arg(long, env = "SHIPWRIGHT_APP_VERSION")]
    app_version: Option<String>,

    /// Registry for local release images
    #[arg(long, env = "SHIPWRIGHT_REGISTRY")]
    registry: Option<String>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Emit JSON-formatted log lines and a JSON run summary
    #[arg(long)]
    json: bool,
}

impl Cli {
    fn invocation(&self) -> Invocation {
        Invocation {
            task: self.task.clone(),
            local: self.local,
        }
    }

    fn pipeline_config(&self) -> PipelineConfig {
        let mut config = PipelineConfig::default()
            .with_source_dir(self.source.clone())
            .with_export_dir(self.export_dir.clone());
        if let Some(version) = &self.go_version {
            config = config.with_go_version(version.clone());
        }
        if let Some(name) = &self.app_name {
            config = config.with_app_name(name.clone());
        }
        if let Some(version) = &self.app_version {
            config = config.with_app_version(version.clone());
        }
        if let Some(registry) = &self.registry {
            config = config.with_registry(registry.clone());
        }
        config
    }
}

#[derive(Serialize)]
struct RunSummary<'a> {
    task: TaskName,
    success: bool,
    message: &'a str,
    error: Option<String>,
    duration_ms: u64,
    stages: &'a [StageResult],
}

fn usage(error: &PipelineError) -> String {
    format!(
        "error: {}\n\n{}\n\nTasks:\n  pull-request  Test and build the application\n  release       Package and publish a release (--local for a snapshot test image)\n",
        error,
        Cli::command().render_usage()
    )
}

fn print_report(result: &PipelineResult, json: bool) -> Result<()> {
    if json {
        let summary = RunSummary {
            task: result.task,
            success: result.success(),
            message: &result.message,
            error: result.error.as_ref().map(|e| e.to_string()),
            duration_ms: result.duration_ms,
            stages: &result.stages,
        };
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("Task: {}", result.task);
    println!(
        "Status: {}",
        if result.success() { "✓ PASSED" } else { "✗ FAILED" }
    );
    println!("Duration: {}ms", result.duration_ms);
    println!();

    for stage in &result.stages {
        let status = if stage.passed() { "✓" } else { "✗" };
        println!(
            "  {} {} ({}ms, exit code: {})",
            status, stage.stage, stage.duration_ms, stage.exit_code
        );
    }

    println!();
    println!(
        "Summary: {}/{} stages passed",
        result.passed_count(),
        result.stages.len()
    );
    println!("{}", result.message);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (task, ctx) = match resolve(&cli.invocation(), |key| std::env::var(key).ok()) {
        Ok(resolved) => resolved,
        Err(e) => {
            print!("{}", usage(&e));
            std::process::exit(2);
        }
    };

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    init_tracing(cli.json, level);

    let engine = DockerEngine::connect()
        .await
        .map_err(|e| PipelineError::ConnectionFailure(e.to_string()))?;
    let session = EngineSession::new(engine);
    info!(task = %task, "Connected, dispatching pipeline");

    let result = Dispatcher::new(cli.pipeline_config())
        .run(task, &ctx, session.engine())
        .await;
    session.close();

    print_report(&result, cli.json)?;
    result.into_result()?;
    Ok(())
}
