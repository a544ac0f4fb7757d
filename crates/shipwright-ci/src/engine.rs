//! Client interface to the container engine.
//!
//! The pipelines only talk to an engine through [`Engine`]. A connected engine
//! is wrapped in an [`EngineSession`], which closes it exactly once however the
//! run ends.

use crate::container::{ContainerSpec, ImageSpec};
use crate::error::EngineResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Handle to a container that ran to completion.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContainerRef(pub String);

impl fmt::Display for ContainerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Captured result of running a container command.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub container: ContainerRef,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Container engine operations used by the pipelines.
///
/// Every call blocks until the engine finishes; there is no timeout or
/// cancellation on top of what the engine offers.
#[async_trait]
pub trait Engine: Send + Sync {
    /// Provision `spec` and run its command to completion.
    ///
    /// A non-zero exit is reported through [`ExecOutput::exit_code`]; `Err` is
    /// reserved for transport failures.
    async fn exec(&self, spec: &ContainerSpec) -> EngineResult<ExecOutput>;

    /// Copy a directory out of a finished container onto the host.
    async fn export_directory(
        &self,
        container: &ContainerRef,
        path: &str,
        host_path: &Path,
    ) -> EngineResult<()>;

    /// Build `image` and push it to `address`, returning the published reference.
    async fn publish(&self, image: &ImageSpec, address: &str) -> EngineResult<String>;

    /// Release everything the engine holds for this client.
    fn close(&self);
}

#[async_trait]
impl<T: Engine + ?Sized> Engine for Arc<T> {
    async fn exec(&self, spec: &ContainerSpec) -> EngineResult<ExecOutput> {
        (**self).exec(spec).await
    }

    async fn export_directory(
        &self,
        container: &ContainerRef,
        path: &str,
        host_path: &Path,
    ) -> EngineResult<()> {
        (**self).export_directory(container, path, host_path).await
    }

    async fn publish(&self, image: &ImageSpec, address: &str) -> EngineResult<String> {
        (**self).publish(image, address).await
    }

    fn close(&self) {
        (**self).close()
    }
}

/// Scoped ownership of a connected engine.
///
/// The engine is closed by [`EngineSession::close`] or, failing that, when the
/// session is dropped (early return or unwinding panic). Never twice.
pub struct EngineSession<E: Engine> {
    engine: E,
    closed: bool,
}

impl<E: Engine> EngineSession<E> {
    pub fn new(engine: E) -> Self {
        Self {
            engine,
            closed: false,
        }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Close the engine now.
    pub fn close(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if !self.closed {
            self.closed = true;
            debug!("Closing container engine session");
            self.engine.close();
        }
    }
}

impl<E: Engine> Drop for EngineSession<E> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::FakeEngine;
    use std::panic::{catch_unwind, AssertUnwindSafe};

    #[test]
    fn test_session_closes_on_drop() {
        let engine = Arc::new(FakeEngine::new());
        {
            let _session = EngineSession::new(engine.clone());
        }
        assert_eq!(engine.close_count(), 1);
    }

    #[test]
    fn test_explicit_close_is_not_repeated_by_drop() {
        let engine = Arc::new(FakeEngine::new());
        let session = EngineSession::new(engine.clone());
        session.close();
        assert_eq!(engine.close_count(), 1);
    }

    #[test]
    fn test_session_closes_when_scope_panics() {
        let engine = Arc::new(FakeEngine::new());
        let inner = engine.clone();
        let outcome = catch_unwind(AssertUnwindSafe(move || {
            let _session = EngineSession::new(inner);
            panic!("stage blew up");
        }));
        assert!(outcome.is_err());
        assert_eq!(engine.close_count(), 1);
    }

    #[test]
    fn test_exec_output_success() {
        let output = ExecOutput {
            container: ContainerRef("c1".to_string()),
            exit_code: 0,
            stdout: String::new(),
            stderr: String::new(),
        };
        assert!(output.success());
        assert!(!ExecOutput {
            exit_code: 2,
            ..output
        }
        .success());
    }
}
