//! Error types for pipeline resolution and execution

use crate::stage::Stage;
use thiserror::Error;

/// Failures surfaced by the context resolver and the pipeline dispatcher.
///
/// Every variant is terminal: the run stops at the first failing step and the
/// captured diagnostic output of the external tool is carried verbatim.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// No task name on the command line
    #[error("missing task argument (expected one of: pull-request, release)")]
    MissingArgument,

    /// Task name outside the known set
    #[error("unknown task '{0}' (expected one of: pull-request, release)")]
    UnknownTask(String),

    /// Container engine unreachable
    #[error("failed to connect to container engine: {0}")]
    ConnectionFailure(String),

    /// Release credential not provided
    #[error("release requires a credential token; set {0}")]
    MissingCredential(&'static str),

    #[error("tests failed:\n{stderr}")]
    TestFailure { stderr: String },

    #[error("build failed:\n{stderr}")]
    BuildFailure { stderr: String },

    #[error("release failed:\n{stderr}")]
    ReleaseFailure { stderr: String },

    #[error("local release failed at stage {stage}:\n{stderr}")]
    LocalReleaseFailure { stage: Stage, stderr: String },

    #[error("publish failed at stage {stage}:\n{stderr}")]
    PublishFailure { stage: Stage, stderr: String },
}

/// Transport-level failures reported by an [`Engine`](crate::engine::Engine).
#[derive(Error, Debug)]
pub enum EngineError {
    /// Engine daemon not reachable
    #[error("container engine unavailable: {0}")]
    Unavailable(String),

    /// Engine CLI invocation exited non-zero
    #[error("`{command}` failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    /// Host snapshot could not be staged
    #[error("snapshot staging failed: {0}")]
    Snapshot(String),

    /// Expected output artifact missing on the host
    #[error("not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<walkdir::Error> for EngineError {
    fn from(err: walkdir::Error) -> Self {
        EngineError::Snapshot(err.to_string())
    }
}

impl From<glob::PatternError> for EngineError {
    fn from(err: glob::PatternError) -> Self {
        EngineError::Snapshot(format!("invalid exclude pattern: {}", err))
    }
}

/// Result type for engine operations
pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;
