//! Shipwright CI - containerised pipelines for a Go application
//!
//! Provides a pipeline dispatcher that:
//! - Resolves the requested task and the CI context from the environment
//! - Runs `go test` / `go build` for pull requests
//! - Runs goreleaser (with syft) for releases, or a snapshot release that is
//!   exported locally and pushed as a short-lived image
//!
//! All container work goes through the [`Engine`] trait; [`DockerEngine`] is
//! the production implementation and [`fakes::FakeEngine`] backs the tests.

pub mod config;
pub mod container;
pub mod context;
pub mod docker;
pub mod engine;
pub mod error;
pub mod fakes;
pub mod pipeline;
pub mod runner;
pub mod snapshot;
pub mod stage;
pub mod telemetry;

// Re-export key types
pub use config::PipelineConfig;
pub use container::{ContainerSpec, Directory, FileSource, ImageSpec};
pub use context::{resolve, EventKind, ExecutionContext, Invocation, Secret, TaskName};
pub use docker::DockerEngine;
pub use engine::{ContainerRef, Engine, EngineSession, ExecOutput};
pub use error::{EngineError, PipelineError};
pub use pipeline::{Dispatcher, PipelineResult};
pub use runner::{StageResult, StageRunner};
pub use stage::Stage;
pub use telemetry::init_tracing;
