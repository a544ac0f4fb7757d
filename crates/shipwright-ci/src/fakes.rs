//! In-memory fake engine (testing only)
//!
//! `FakeEngine` records every call it receives and answers from a script, so
//! pipelines can be exercised without a container daemon.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::container::{ContainerSpec, ImageSpec, Mount};
use crate::engine::{ContainerRef, Engine, ExecOutput};
use crate::error::{EngineError, EngineResult};

/// Scripted answer to an `exec` call.
#[derive(Debug, Clone)]
pub enum ExecScript {
    Exit {
        code: i32,
        stdout: String,
        stderr: String,
    },
    Transport(String),
}

impl ExecScript {
    pub fn exit(code: i32, stderr: impl Into<String>) -> Self {
        ExecScript::Exit {
            code,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        ExecScript::Transport(message.into())
    }
}

/// A call observed by the fake.
#[derive(Debug, Clone)]
pub enum EngineCall {
    Exec {
        image: String,
        args: Vec<String>,
        mounts: Vec<Mount>,
        env: Vec<String>,
    },
    Export {
        container: ContainerRef,
        path: String,
        host_path: PathBuf,
    },
    Publish {
        image: ImageSpec,
        address: String,
    },
}

#[derive(Debug, Default)]
pub struct FakeEngine {
    scripts: HashMap<Vec<String>, ExecScript>,
    export_files: Vec<PathBuf>,
    export_error: Option<String>,
    publish_error: Option<String>,
    calls: Mutex<Vec<EngineCall>>,
    closes: AtomicUsize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl FakeEngine {
    /// Every command exits 0 until scripted otherwise.
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `exec` calls whose command is exactly `args` with `script`.
    pub fn script(mut self, args: &[&str], script: ExecScript) -> Self {
        let key = args.iter().map(|a| a.to_string()).collect();
        self.scripts.insert(key, script);
        self
    }

    /// Files (relative to the export target) written by `export_directory`.
    pub fn export_creates(mut self, relative: impl Into<PathBuf>) -> Self {
        self.export_files.push(relative.into());
        self
    }

    pub fn fail_export(mut self, message: impl Into<String>) -> Self {
        self.export_error = Some(message.into());
        self
    }

    pub fn fail_publish(mut self, message: impl Into<String>) -> Self {
        self.publish_error = Some(message.into());
        self
    }

    pub fn calls(&self) -> Vec<EngineCall> {
        lock(&self.calls).clone()
    }

    /// Commands of every `exec` call, in order.
    pub fn exec_args(&self) -> Vec<Vec<String>> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                EngineCall::Exec { args, .. } => Some(args),
                _ => None,
            })
            .collect()
    }

    pub fn exports(&self) -> Vec<(String, PathBuf)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                EngineCall::Export {
                    path, host_path, ..
                } => Some((path, host_path)),
                _ => None,
            })
            .collect()
    }

    pub fn publishes(&self) -> Vec<(String, ImageSpec)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                EngineCall::Publish { address, image } => Some((address, image)),
                _ => None,
            })
            .collect()
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    fn record(&self, call: EngineCall) -> usize {
        let mut calls = lock(&self.calls);
        calls.push(call);
        calls.len()
    }
}

#[async_trait]
impl Engine for FakeEngine {
    async fn exec(&self, spec: &ContainerSpec) -> EngineResult<ExecOutput> {
        let seq = self.record(EngineCall::Exec {
            image: spec.image.clone(),
            args: spec.args.clone(),
            mounts: spec.mounts.clone(),
            env: spec.env.iter().map(|e| e.name().to_string()).collect(),
        });
        let container = ContainerRef(format!("fake-{seq}"));

        match self.scripts.get(&spec.args) {
            Some(ExecScript::Transport(message)) => Err(EngineError::Unavailable(message.clone())),
            Some(ExecScript::Exit {
                code,
                stdout,
                stderr,
            }) => Ok(ExecOutput {
                container,
                exit_code: *code,
                stdout: stdout.clone(),
                stderr: stderr.clone(),
            }),
            None => Ok(ExecOutput {
                container,
                exit_code: 0,
                stdout: String::new(),
                stderr: String::new(),
            }),
        }
    }

    async fn export_directory(
        &self,
        container: &ContainerRef,
        path: &str,
        host_path: &Path,
    ) -> EngineResult<()> {
        self.record(EngineCall::Export {
            container: container.clone(),
            path: path.to_string(),
            host_path: host_path.to_path_buf(),
        });
        if let Some(message) = &self.export_error {
            return Err(EngineError::CommandFailed {
                command: "export".to_string(),
                stderr: message.clone(),
            });
        }

        for relative in &self.export_files {
            let target = host_path.join(relative);
            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&target, b"fake binary").await?;
        }
        Ok(())
    }

    async fn publish(&self, image: &ImageSpec, address: &str) -> EngineResult<String> {
        self.record(EngineCall::Publish {
            image: image.clone(),
            address: address.to_string(),
        });
        match &self.publish_error {
            Some(message) => Err(EngineError::CommandFailed {
                command: "push".to_string(),
                stderr: message.clone(),
            }),
            None => Ok(format!("{address}@sha256:fake")),
        }
    }

    fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}
