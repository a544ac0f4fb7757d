//! Task selection and CI execution context.
//!
//! Resolves the command-line task name and the `GITHUB_*` environment into a
//! validated [`TaskName`] and an immutable [`ExecutionContext`].

use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Environment variable carrying the CI event type.
pub const EVENT_VAR: &str = "GITHUB_EVENT";

/// Environment variable carrying the git ref.
pub const REF_VAR: &str = "GITHUB_REF";

/// Environment variable carrying the release credential.
pub const TOKEN_VAR: &str = "GITHUB_TOKEN";

/// Pipeline selected on the command line.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum TaskName {
    PullRequest,
    Release,
}

impl TaskName {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskName::PullRequest => "pull-request",
            TaskName::Release => "release",
        }
    }
}

impl fmt::Display for TaskName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskName {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "" => Err(PipelineError::MissingArgument),
            "pull-request" => Ok(TaskName::PullRequest),
            "release" => Ok(TaskName::Release),
            other => Err(PipelineError::UnknownTask(other.to_string())),
        }
    }
}

/// CI event that triggered the run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Push,
    PullRequest,
    Unknown,
}

impl EventKind {
    /// Decode the raw event name. Anything unrecognised is `Unknown`.
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(str::trim) {
            Some("push") => EventKind::Push,
            Some("pull_request") => EventKind::PullRequest,
            _ => EventKind::Unknown,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EventKind::Push => "push",
            EventKind::PullRequest => "pull_request",
            EventKind::Unknown => "unknown",
        })
    }
}

/// Opaque credential. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    /// Wrap a token; empty values are treated as absent.
    pub fn new(value: impl Into<String>) -> Option<Self> {
        let value = value.into();
        if value.is_empty() {
            None
        } else {
            Some(Self(value))
        }
    }

    /// Reveal the plaintext. Only engines injecting secrets should call this.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

/// Immutable description of the CI environment for one run.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub event: EventKind,
    pub git_ref: String,
    pub token: Option<Secret>,
    pub local_mode: bool,
}

impl ExecutionContext {
    /// Build a context from an environment lookup.
    pub fn from_lookup<F>(local_mode: bool, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self {
            event: EventKind::parse(lookup(EVENT_VAR).as_deref()),
            git_ref: lookup(REF_VAR).unwrap_or_default(),
            token: lookup(TOKEN_VAR).and_then(Secret::new),
            local_mode,
        }
    }

    /// Build a context from the process environment.
    pub fn from_env(local_mode: bool) -> Self {
        Self::from_lookup(local_mode, |key| std::env::var(key).ok())
    }

    /// A push of a `v*` tag, the event a real release is cut from.
    pub fn is_tag_push(&self) -> bool {
        self.event == EventKind::Push && self.git_ref.contains("/tags/v")
    }
}

/// Raw command-line selection before validation.
#[derive(Debug, Clone, Default)]
pub struct Invocation {
    pub task: Option<String>,
    pub local: bool,
}

/// Validate the task name and capture the CI context.
pub fn resolve<F>(invocation: &Invocation, lookup: F) -> Result<(TaskName, ExecutionContext)>
where
    F: Fn(&str) -> Option<String>,
{
    let task = invocation
        .task
        .as_deref()
        .ok_or(PipelineError::MissingArgument)?
        .parse::<TaskName>()?;

    Ok((task, ExecutionContext::from_lookup(invocation.local, lookup)))
}
