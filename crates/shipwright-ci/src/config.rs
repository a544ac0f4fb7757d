//! Pipeline configuration.
//!
//! Image versions, application identity and output paths are explicit values
//! handed to the [`Dispatcher`](crate::pipeline::Dispatcher) at construction.

use std::path::PathBuf;

/// Configuration shared by the verification and release pipelines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Host directory snapshotted into the build containers.
    pub source_dir: PathBuf,

    /// Go toolchain version (`golang:<version>-alpine`).
    pub go_version: String,

    /// goreleaser image tag.
    pub goreleaser_version: String,

    /// syft image tag.
    pub syft_version: String,

    /// Base image wrapping the published binary.
    pub runtime_image: String,

    /// Application binary name.
    pub app_name: String,

    /// Application version used in the published image name.
    pub app_version: String,

    /// Build output directory, relative to the source root.
    pub build_path: String,

    /// Host directory the build output is exported to in local release mode.
    /// Relative paths resolve against the process working directory.
    pub export_dir: PathBuf,

    /// Name of the engine-managed Go module cache volume.
    pub cache_volume: String,

    /// Registry host for local release images.
    pub registry: String,

    /// Tag applied to local release images; ttl.sh reads it as a lifetime.
    pub image_ttl: String,

    /// goreleaser output directory suffix of the binary to publish.
    pub release_platform: String,

    /// Glob patterns left out of the verification snapshot.
    pub verify_excludes: Vec<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            source_dir: PathBuf::from("."),
            go_version: "1.20".to_string(),
            goreleaser_version: "latest".to_string(),
            syft_version: "latest".to_string(),
            runtime_image: "alpine:latest".to_string(),
            app_name: "dagger-go-example-app".to_string(),
            app_version: "0.0.1".to_string(),
            build_path: "dist".to_string(),
            export_dir: PathBuf::from("dist"),
            cache_volume: "gomod".to_string(),
            registry: "ttl.sh".to_string(),
            image_ttl: "5m".to_string(),
            release_platform: "linux_amd64_v1".to_string(),
            verify_excludes: Self::default_verify_excludes(),
        }
    }
}

impl PipelineConfig {
    /// Create a configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build artifacts, vendored modules, VCS metadata and CI files.
    pub fn default_verify_excludes() -> Vec<String> {
        ["dist", "vendor", ".git", "ci", ".github"]
            .iter()
            .map(|p| p.to_string())
            .collect()
    }

    pub fn with_source_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.source_dir = dir.into();
        self
    }

    pub fn with_export_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.export_dir = dir.into();
        self
    }

    pub fn with_go_version(mut self, version: impl Into<String>) -> Self {
        self.go_version = version.into();
        self
    }

    pub fn with_app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = name.into();
        self
    }

    pub fn with_app_version(mut self, version: impl Into<String>) -> Self {
        self.app_version = version.into();
        self
    }

    pub fn with_registry(mut self, registry: impl Into<String>) -> Self {
        self.registry = registry.into();
        self
    }

    /// `golang:<go_version>-alpine`
    pub fn go_image(&self) -> String {
        format!("golang:{}-alpine", self.go_version)
    }

    /// `goreleaser/goreleaser:<goreleaser_version>`
    pub fn goreleaser_image(&self) -> String {
        format!("goreleaser/goreleaser:{}", self.goreleaser_version)
    }

    /// `anchore/syft:<syft_version>`
    pub fn syft_image(&self) -> String {
        format!("anchore/syft:{}", self.syft_version)
    }

    /// Path of the built binary relative to the source root.
    pub fn binary_path(&self) -> String {
        format!("{}/{}", self.build_path, self.app_name)
    }

    /// Host path of the publishable binary once the build directory has been
    /// exported.
    pub fn release_binary_path(&self) -> PathBuf {
        self.export_dir
            .join(format!("{}_{}", self.app_name, self.release_platform))
            .join(&self.app_name)
    }

    /// `<registry>/<app_name>-<app_version>:<ttl>`
    pub fn publish_address(&self) -> String {
        format!(
            "{}/{}-{}:{}",
            self.registry, self.app_name, self.app_version, self.image_ttl
        )
    }
}
