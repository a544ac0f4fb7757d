//! Declarative container descriptions handed to an [`Engine`](crate::engine::Engine).

use crate::context::Secret;
use std::path::PathBuf;

/// Snapshot of a host directory, optionally filtered.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Directory {
    /// Host path the snapshot is taken from.
    pub host_path: PathBuf,

    /// Glob patterns, relative to `host_path`, left out of the snapshot.
    pub exclude: Vec<String>,
}

impl Directory {
    /// Full copy of a host directory.
    pub fn host(path: impl Into<PathBuf>) -> Self {
        Self {
            host_path: path.into(),
            exclude: Vec::new(),
        }
    }

    pub fn excluding(mut self, patterns: Vec<String>) -> Self {
        self.exclude = patterns;
        self
    }

    pub fn is_filtered(&self) -> bool {
        !self.exclude.is_empty()
    }
}

/// Where an injected file comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileSource {
    /// A file inside an image's filesystem.
    Image { image: String, path: String },
}

/// Something made available inside a container.
#[derive(Debug, Clone, PartialEq)]
pub enum Mount {
    /// Host snapshot mounted at `target`.
    Directory { source: Directory, target: String },

    /// Named engine-managed cache volume.
    Cache { volume: String, target: String },

    /// Single file injected at `target`.
    File { source: FileSource, target: String },
}

/// An environment variable, plain or secret.
#[derive(Debug, Clone)]
pub enum EnvVar {
    Plain { name: String, value: String },

    /// Value must never appear on a command line or in logs.
    Secret { name: String, value: Secret },
}

impl EnvVar {
    pub fn name(&self) -> &str {
        match self {
            EnvVar::Plain { name, .. } | EnvVar::Secret { name, .. } => name,
        }
    }
}

/// A container to run to completion: image, mounts, environment and command.
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    pub image: String,
    pub mounts: Vec<Mount>,
    pub env: Vec<EnvVar>,
    pub workdir: Option<String>,
    pub args: Vec<String>,
}

impl ContainerSpec {
    /// Start from an image reference.
    pub fn from(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            mounts: Vec::new(),
            env: Vec::new(),
            workdir: None,
            args: Vec::new(),
        }
    }

    pub fn with_mounted_directory(mut self, target: impl Into<String>, source: Directory) -> Self {
        self.mounts.push(Mount::Directory {
            source,
            target: target.into(),
        });
        self
    }

    pub fn with_mounted_cache(
        mut self,
        target: impl Into<String>,
        volume: impl Into<String>,
    ) -> Self {
        self.mounts.push(Mount::Cache {
            volume: volume.into(),
            target: target.into(),
        });
        self
    }

    pub fn with_file(mut self, target: impl Into<String>, source: FileSource) -> Self {
        self.mounts.push(Mount::File {
            source,
            target: target.into(),
        });
        self
    }

    pub fn with_workdir(mut self, dir: impl Into<String>) -> Self {
        self.workdir = Some(dir.into());
        self
    }

    pub fn with_env_variable(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push(EnvVar::Plain {
            name: name.into(),
            value: value.into(),
        });
        self
    }

    pub fn with_secret_variable(mut self, name: impl Into<String>, value: Secret) -> Self {
        self.env.push(EnvVar::Secret {
            name: name.into(),
            value,
        });
        self
    }

    /// Same container, different command.
    pub fn with_exec(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    /// Container path a directory snapshot is mounted at, if any.
    pub fn directory_target(&self) -> Option<&str> {
        self.mounts.iter().find_map(|m| match m {
            Mount::Directory { target, .. } => Some(target.as_str()),
            _ => None,
        })
    }
}

/// Minimal runtime image wrapping host files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSpec {
    pub base: String,

    /// (host path, image path)
    pub files: Vec<(PathBuf, String)>,

    pub workdir: Option<String>,
    pub entrypoint: Vec<String>,
}

impl ImageSpec {
    pub fn from(base: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            files: Vec::new(),
            workdir: None,
            entrypoint: Vec::new(),
        }
    }

    pub fn with_file(mut self, target: impl Into<String>, host: impl Into<PathBuf>) -> Self {
        self.files.push((host.into(), target.into()));
        self
    }

    pub fn with_workdir(mut self, dir: impl Into<String>) -> Self {
        self.workdir = Some(dir.into());
        self
    }

    pub fn with_entrypoint(mut self, entrypoint: Vec<String>) -> Self {
        self.entrypoint = entrypoint;
        self
    }
}
