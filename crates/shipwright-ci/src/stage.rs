//! Pipeline stage definitions.

use crate::config::PipelineConfig;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stages the verification and release pipelines are built from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// go test ./...
    GoTest,

    /// go build -o dist/<app> .
    GoBuild,

    /// goreleaser --clean
    #[serde(rename = "goreleaser")]
    Release,

    /// goreleaser --snapshot --clean
    #[serde(rename = "goreleaser_snapshot")]
    SnapshotRelease,

    /// Copy the build output directory back to the host
    ExportDist,

    /// Locate the platform binary inside the exported directory
    ExtractBinary,

    /// Wrap the binary in a runtime image and push it
    PublishImage,
}

impl Stage {
    /// Get the stage name as a string.
    pub fn name(&self) -> &'static str {
        match self {
            Stage::GoTest => "go_test",
            Stage::GoBuild => "go_build",
            Stage::Release => "goreleaser",
            Stage::SnapshotRelease => "goreleaser_snapshot",
            Stage::ExportDist => "export_dist",
            Stage::ExtractBinary => "extract_binary",
            Stage::PublishImage => "publish_image",
        }
    }

    /// Arguments executed inside the stage's container, if the stage runs one.
    ///
    /// Release stages pass arguments only; the goreleaser image supplies the
    /// entrypoint.
    pub fn command(&self, config: &PipelineConfig) -> Option<Vec<String>> {
        match self {
            Stage::GoTest => Some(vec!["go".to_string(), "test".to_string(), "./...".to_string()]),
            Stage::GoBuild => Some(vec![
                "go".to_string(),
                "build".to_string(),
                "-o".to_string(),
                config.binary_path(),
                ".".to_string(),
            ]),
            Stage::Release => Some(vec!["--clean".to_string()]),
            Stage::SnapshotRelease => {
                Some(vec!["--snapshot".to_string(), "--clean".to_string()])
            }
            Stage::ExportDist | Stage::ExtractBinary | Stage::PublishImage => None,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_names() {
        assert_eq!(Stage::GoTest.name(), "go_test");
        assert_eq!(Stage::GoBuild.name(), "go_build");
        assert_eq!(Stage::Release.name(), "goreleaser");
        assert_eq!(Stage::SnapshotRelease.name(), "goreleaser_snapshot");
        assert_eq!(Stage::PublishImage.to_string(), "publish_image");
    }

    #[test]
    fn test_go_commands() {
        let config = PipelineConfig::default();

        let test_cmd = Stage::GoTest.command(&config).unwrap();
        assert_eq!(test_cmd, vec!["go", "test", "./..."]);

        let build_cmd = Stage::GoBuild.command(&config).unwrap();
        assert_eq!(build_cmd[0], "go");
        assert!(build_cmd.contains(&"dist/dagger-go-example-app".to_string()));
    }

    #[test]
    fn test_release_commands() {
        let config = PipelineConfig::default();
        assert_eq!(Stage::Release.command(&config).unwrap(), vec!["--clean"]);
        assert_eq!(
            Stage::SnapshotRelease.command(&config).unwrap(),
            vec!["--snapshot", "--clean"]
        );
    }

    #[test]
    fn test_host_stages_have_no_command() {
        let config = PipelineConfig::default();
        assert!(Stage::ExportDist.command(&config).is_none());
        assert!(Stage::ExtractBinary.command(&config).is_none());
        assert!(Stage::PublishImage.command(&config).is_none());
    }

    #[test]
    fn test_serialized_name_matches_display() {
        for stage in [
            Stage::GoTest,
            Stage::GoBuild,
            Stage::Release,
            Stage::SnapshotRelease,
            Stage::ExportDist,
            Stage::ExtractBinary,
            Stage::PublishImage,
        ] {
            let json = serde_json::to_string(&stage).unwrap();
            assert_eq!(json, format!("\"{}\"", stage));
            assert_eq!(serde_json::from_str::<Stage>(&json).unwrap(), stage);
        }
    }
}
