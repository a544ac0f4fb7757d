//! Docker-backed [`Engine`].
//!
//! Drives the `docker` CLI. Each exec is `docker create`, then the staged
//! source snapshots are copied in with `docker cp`, then `docker start -a`.
//! Container writes stay inside the engine, so nothing root-owned lands in
//! host temp directories. Cache volumes map to named docker volumes, and
//! image files are copied out with `docker create` + `docker cp`.

use crate::container::{ContainerSpec, Directory, EnvVar, FileSource, ImageSpec, Mount};
use crate::engine::{ContainerRef, Engine, ExecOutput};
use crate::error::{EngineError, EngineResult};
use crate::snapshot;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tempfile::TempDir;
use tokio::process::Command;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Container engine reached through the docker CLI.
pub struct DockerEngine {
    binary: String,
    staged: Mutex<HashMap<Directory, TempDir>>,
    files: Mutex<HashMap<(String, String), PathBuf>>,
    scratch: Mutex<Vec<TempDir>>,
    containers: Mutex<Vec<String>>,
}

/// Arguments and secret environment for one `docker create`.
#[derive(Debug)]
struct CreateCommand {
    args: Vec<String>,
    secret_env: Vec<(String, String)>,
}

/// Engine-side flags plus the staged directories to copy in before start.
#[derive(Debug, Default)]
struct PreparedMounts {
    flags: Vec<String>,
    uploads: Vec<(PathBuf, String)>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl DockerEngine {
    /// Connect using the `docker` binary on `PATH`.
    pub async fn connect() -> EngineResult<Self> {
        Self::connect_with("docker").await
    }

    /// Connect using a specific docker-compatible binary.
    pub async fn connect_with(binary: impl Into<String>) -> EngineResult<Self> {
        let binary = binary.into();
        let output = Command::new(&binary)
            .args(["version", "--format", "{{.Server.Version}}"])
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| EngineError::Unavailable(format!("{}: {}", binary, e)))?;

        if !output.status.success() {
            return Err(EngineError::Unavailable(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        let server_version = String::from_utf8_lossy(&output.stdout).trim().to_string();
        info!(engine = %binary, server_version = %server_version, "Connected to container engine");

        Ok(Self {
            binary,
            staged: Mutex::new(HashMap::new()),
            files: Mutex::new(HashMap::new()),
            scratch: Mutex::new(Vec::new()),
            containers: Mutex::new(Vec::new()),
        })
    }

    async fn docker(&self, args: &[String], secret_env: &[(String, String)]) -> EngineResult<Output> {
        debug!(command = %args.first().map(String::as_str).unwrap_or(""), "Invoking docker");
        let mut command = Command::new(&self.binary);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        for (name, value) in secret_env {
            command.env(name, value);
        }
        Ok(command.output().await?)
    }

    /// Run a docker subcommand that must succeed; returns its stdout.
    async fn docker_ok(&self, args: &[String]) -> EngineResult<String> {
        let output = self.docker(args, &[]).await?;
        if !output.status.success() {
            return Err(EngineError::CommandFailed {
                command: format!("{} {}", self.binary, args.first().map(String::as_str).unwrap_or("")),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    async fn stage_directory(&self, source: &Directory) -> EngineResult<PathBuf> {
        let cached = lock(&self.staged)
            .get(source)
            .map(|staged| staged.path().to_path_buf());
        if let Some(path) = cached {
            return Ok(path);
        }

        let dir = source.clone();
        let staged = tokio::task::spawn_blocking(move || snapshot::stage(&dir))
            .await
            .map_err(|e| EngineError::Snapshot(e.to_string()))??;
        let path = staged.path().to_path_buf();
        lock(&self.staged).insert(source.clone(), staged);
        Ok(path)
    }

    async fn fetch_image_file(&self, image: &str, path: &str) -> EngineResult<PathBuf> {
        let key = (image.to_string(), path.to_string());
        let cached = lock(&self.files).get(&key).cloned();
        if let Some(path) = cached {
            return Ok(path);
        }

        let scratch = tempfile::Builder::new().prefix("shipwright-file-").tempdir()?;
        let file_name = Path::new(path)
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "file".into());
        let host_path = scratch.path().join(file_name);

        let id = self
            .docker_ok(&["create".to_string(), image.to_string()])
            .await?
            .trim()
            .to_string();
        let copied = self
            .docker_ok(&[
                "cp".to_string(),
                format!("{}:{}", id, path),
                host_path.to_string_lossy().to_string(),
            ])
            .await;
        if let Err(e) = self.docker_ok(&["rm".to_string(), id.clone()]).await {
            warn!(container = %id, error = %e, "Failed to remove file source container");
        }
        copied?;

        debug!(image = %image, path = %path, host = %host_path.display(), "Fetched file from image");
        lock(&self.scratch).push(scratch);
        lock(&self.files).insert(key, host_path.clone());
        Ok(host_path)
    }

    /// Stage host content for every mount. Directories are copied in after
    /// create; caches and injected files become `--mount` / read-only `-v`.
    async fn prepare_mounts(&self, mounts: &[Mount]) -> EngineResult<PreparedMounts> {
        let mut prepared = PreparedMounts::default();
        for mount in mounts {
            match mount {
                Mount::Directory { source, target } => {
                    let staged = self.stage_directory(source).await?;
                    prepared.uploads.push((staged, target.clone()));
                }
                Mount::Cache { volume, target } => {
                    prepared.flags.push("--mount".to_string());
                    prepared
                        .flags
                        .push(format!("type=volume,source={},target={}", volume, target));
                }
                Mount::File { source, target } => {
                    let FileSource::Image { image, path } = source;
                    let host = self.fetch_image_file(image, path).await?;
                    prepared.flags.push("-v".to_string());
                    prepared.flags.push(format!("{}:{}:ro", host.display(), target));
                }
            }
        }
        Ok(prepared)
    }
}

/// Assemble `docker create` arguments. Secret values stay out of the argument
/// list and are passed through the child environment instead.
fn create_command(name: &str, spec: &ContainerSpec, mount_flags: Vec<String>) -> CreateCommand {
    let mut args = vec!["create".to_string(), "--name".to_string(), name.to_string()];
    args.extend(mount_flags);

    if let Some(workdir) = &spec.workdir {
        args.push("-w".to_string());
        args.push(workdir.clone());
    }

    let mut secret_env = Vec::new();
    for var in &spec.env {
        args.push("-e".to_string());
        match var {
            EnvVar::Plain { name, value } => args.push(format!("{}={}", name, value)),
            EnvVar::Secret { name, value } => {
                args.push(name.clone());
                secret_env.push((name.clone(), value.expose().to_string()));
            }
        }
    }

    args.push(spec.image.clone());
    args.extend(spec.args.iter().cloned());
    CreateCommand { args, secret_env }
}

/// `docker cp <staged>/. <container>:<target>`
fn upload_args(staged: &Path, container: &str, target: &str) -> Vec<String> {
    vec![
        "cp".to_string(),
        format!("{}/.", staged.display()),
        format!("{}:{}", container, target),
    ]
}

/// Dockerfile for a runtime image whose files were copied in as `file-<n>`.
fn dockerfile(image: &ImageSpec) -> EngineResult<String> {
    let mut lines = vec![format!("FROM {}", image.base)];
    for (index, (_, target)) in image.files.iter().enumerate() {
        lines.push(format!("COPY file-{} {}", index, target));
    }
    if let Some(workdir) = &image.workdir {
        lines.push(format!("WORKDIR {}", workdir));
    }
    if !image.entrypoint.is_empty() {
        let entrypoint =
            serde_json::to_string(&image.entrypoint).map_err(std::io::Error::from)?;
        lines.push(format!("ENTRYPOINT {}", entrypoint));
    }
    lines.push(String::new());
    Ok(lines.join("\n"))
}

/// `sha256:...` digest from `docker push` output, if reported.
fn parse_push_digest(stdout: &str) -> Option<String> {
    stdout.lines().find_map(|line| {
        line.split_whitespace()
            .skip_while(|word| *word != "digest:")
            .nth(1)
            .map(str::to_string)
    })
}

#[async_trait]
impl Engine for DockerEngine {
    async fn exec(&self, spec: &ContainerSpec) -> EngineResult<ExecOutput> {
        let name = format!("shipwright-{}", Uuid::new_v4().simple());
        let prepared = self.prepare_mounts(&spec.mounts).await?;
        let command = create_command(&name, spec, prepared.flags);

        lock(&self.containers).push(name.clone());
        let created = self.docker(&command.args, &command.secret_env).await?;
        if !created.status.success() {
            return Err(EngineError::CommandFailed {
                command: format!("{} create", self.binary),
                stderr: String::from_utf8_lossy(&created.stderr).to_string(),
            });
        }
        for (staged, target) in &prepared.uploads {
            self.docker_ok(&upload_args(staged, &name, target)).await?;
        }

        let start = ["start".to_string(), "-a".to_string(), name.clone()];
        let output = self.docker(&start, &[]).await?;

        Ok(ExecOutput {
            container: ContainerRef(name),
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }

    async fn export_directory(
        &self,
        container: &ContainerRef,
        path: &str,
        host_path: &Path,
    ) -> EngineResult<()> {
        tokio::fs::create_dir_all(host_path).await?;
        self.docker_ok(&[
            "cp".to_string(),
            format!("{}:{}/.", container, path.trim_end_matches('/')),
            host_path.to_string_lossy().to_string(),
        ])
        .await?;
        info!(container = %container, path = %path, host = %host_path.display(), "Exported directory");
        Ok(())
    }

    async fn publish(&self, image: &ImageSpec, address: &str) -> EngineResult<String> {
        let context = tempfile::Builder::new().prefix("shipwright-image-").tempdir()?;
        for (index, (host, _)) in image.files.iter().enumerate() {
            tokio::fs::copy(host, context.path().join(format!("file-{}", index))).await?;
        }
        tokio::fs::write(context.path().join("Dockerfile"), dockerfile(image)?).await?;

        self.docker_ok(&[
            "build".to_string(),
            "-t".to_string(),
            address.to_string(),
            context.path().to_string_lossy().to_string(),
        ])
        .await?;
        let pushed = self
            .docker_ok(&["push".to_string(), address.to_string()])
            .await?;

        Ok(match parse_push_digest(&pushed) {
            Some(digest) => format!("{}@{}", address, digest),
            None => address.to_string(),
        })
    }

    fn close(&self) {
        let containers: Vec<String> = lock(&self.containers).drain(..).collect();
        for name in containers {
            let removed = std::process::Command::new(&self.binary)
                .args(["rm", "-f", name.as_str()])
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status();
            match removed {
                Ok(status) if status.success() => debug!(container = %name, "Removed container"),
                Ok(status) => warn!(container = %name, %status, "Failed to remove container"),
                Err(e) => warn!(container = %name, error = %e, "Failed to remove container"),
            }
        }
        lock(&self.staged).clear();
        lock(&self.files).clear();
        lock(&self.scratch).clear();
        info!("Container engine connection closed");
    }
}
