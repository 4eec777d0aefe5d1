// Copyright (c) The suitelink Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::RunIdParseError;
use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// Identifies one debug-session-backed run.
///
/// Run ids are allocated monotonically by the dispatcher and are serialized as strings, so that
/// tools can treat them as opaque.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct RunId(u64);

impl RunId {
    /// Creates a run id from its numeric value.
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the numeric value of this run id.
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RunId {
    type Err = RunIdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse()
            .map(Self)
            .map_err(|err| RunIdParseError::new(s, err))
    }
}

impl From<RunId> for String {
    fn from(value: RunId) -> Self {
        value.to_string()
    }
}

impl TryFrom<String> for RunId {
    type Error = RunIdParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// What a run session executes.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RunTarget {
    /// The whole workspace, serialized as `"."`.
    Workspace,

    /// A named top-level suite.
    Suite(String),
}

impl RunTarget {
    const WORKSPACE: &'static str = ".";
}

impl From<String> for RunTarget {
    fn from(value: String) -> Self {
        if value == Self::WORKSPACE {
            Self::Workspace
        } else {
            Self::Suite(value)
        }
    }
}

impl From<RunTarget> for String {
    fn from(value: RunTarget) -> Self {
        match value {
            RunTarget::Workspace => RunTarget::WORKSPACE.to_owned(),
            RunTarget::Suite(name) => name,
        }
    }
}

/// The only request kind used for run sessions.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LaunchRequest {
    /// Launch a new session.
    #[default]
    Launch,
}

/// The configuration used to launch a debug session for a run.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchConfig {
    /// The debug-session type registered by the tool.
    #[serde(rename = "type")]
    pub session_type: String,

    /// Always [`LaunchRequest::Launch`].
    pub request: LaunchRequest,

    /// A display name for the session.
    pub name: String,

    /// The working directory, which is the workspace folder.
    pub cwd: Utf8PathBuf,

    /// The run id embedded in every event the session emits.
    pub run_id: RunId,

    /// The minimal set of suite long-names to parse, if the run is filtered.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suites: Vec<String>,

    /// Relative sources of the suites to parse, so the tool can prune parsing.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parse_include: Vec<Utf8PathBuf>,

    /// Long-names of items to include.
    #[serde(default)]
    pub included_long_names: Vec<String>,

    /// Long-names of items to exclude.
    #[serde(default)]
    pub excluded_long_names: Vec<String>,

    /// Tags selecting which tests to include.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub include_tags: Vec<String>,

    /// Tags selecting which tests to exclude.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude_tags: Vec<String>,

    /// Extra arguments passed through to the tool.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,

    /// True to run without attaching the debugger.
    #[serde(default)]
    pub no_debug: bool,

    /// What the session executes.
    pub target: RunTarget,
}
