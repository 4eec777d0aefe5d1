// Copyright (c) The suitelink Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors produced by suitelink.

use camino::{Utf8Path, Utf8PathBuf};
use config::ConfigError;
use std::{fmt, io};
use thiserror::Error;

/// An error that occurred while parsing the config.
#[derive(Debug, Error)]
#[error("failed to parse suitelink config at `{config_file}`")]
#[non_exhaustive]
pub struct ConfigParseError {
    config_file: Utf8PathBuf,
    #[source]
    kind: ConfigParseErrorKind,
}

impl ConfigParseError {
    pub(crate) fn new(config_file: impl Into<Utf8PathBuf>, kind: ConfigParseErrorKind) -> Self {
        Self {
            config_file: config_file.into(),
            kind,
        }
    }

    /// Returns the config file for this error.
    pub fn config_file(&self) -> &Utf8Path {
        &self.config_file
    }

    /// Returns the kind of error this is.
    pub fn kind(&self) -> &ConfigParseErrorKind {
        &self.kind
    }
}

/// The kind of error that occurred while parsing a config.
///
/// Returned by [`ConfigParseError::kind`].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigParseErrorKind {
    /// An error occurred while building the config.
    #[error(transparent)]
    BuildError(Box<ConfigError>),

    /// An error occurred while deserializing the config.
    #[error(transparent)]
    DeserializeError(Box<serde_path_to_error::Error<ConfigError>>),

    /// A command could not be split into words.
    #[error("invalid command `{command}` for `{key}`")]
    InvalidCommand {
        /// The config key the command was read from.
        key: &'static str,

        /// The command string.
        command: String,

        /// The underlying error.
        #[source]
        err: shell_words::ParseError,
    },

    /// No run profile is marked as the default, or more than one is.
    #[error(
        "exactly one run profile must set `default = true`, found [{}]",
        .0.join(", ")
    )]
    DefaultRunProfile(Vec<String>),
}

/// An error which indicates that a run profile was requested but not known to suitelink.
#[derive(Clone, Debug, Error)]
#[error("run profile `{profile}` not found (known profiles: {})", .all_profiles.join(", "))]
pub struct ProfileNotFound {
    profile: String,
    all_profiles: Vec<String>,
}

impl ProfileNotFound {
    pub(crate) fn new(
        profile: impl Into<String>,
        all_profiles: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        let mut all_profiles: Vec<_> = all_profiles.into_iter().map(|s| s.into()).collect();
        all_profiles.sort_unstable();
        Self {
            profile: profile.into(),
            all_profiles,
        }
    }
}

/// An error that occurred while invoking the discovery tool.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DiscoveryError {
    /// The tool could not be spawned.
    #[error("failed to spawn discovery tool `{program}`")]
    Spawn {
        /// The program that was spawned.
        program: String,

        /// The underlying error.
        #[source]
        err: io::Error,
    },

    /// Unsaved documents could not be serialized.
    #[error("failed to serialize unsaved documents for discovery")]
    SerializeStdin(#[source] serde_json::Error),

    /// Unsaved documents could not be written to the tool.
    #[error("failed to write unsaved documents to discovery tool")]
    WriteStdin(#[source] io::Error),

    /// Waiting for the tool failed.
    #[error("failed to wait for discovery tool")]
    Wait(#[source] io::Error),

    /// The tool exited with a non-zero code.
    #[error("discovery tool failed{}", DisplayExitCode(*exit_code))]
    CommandFailed {
        /// The exit code, or `None` if the tool was terminated by a signal.
        exit_code: Option<i32>,

        /// Standard output of the tool.
        stdout: String,

        /// Standard error of the tool.
        stderr: String,
    },

    /// The tool's output could not be parsed.
    #[error("failed to parse discovery tool output")]
    Json(#[source] serde_json::Error),

    /// Discovery was cancelled by a newer refresh.
    #[error("discovery was cancelled")]
    Cancelled,
}

impl DiscoveryError {
    /// Returns true if this error represents cancellation rather than a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Returns the text displayed on the error node synthesized for this failure.
    ///
    /// For a failed invocation this is what the tool printed, so the user sees the tool's own
    /// diagnosis.
    pub fn node_message(&self) -> String {
        if let Self::CommandFailed { stdout, stderr, .. } = self {
            for output in [stderr, stdout] {
                let trimmed = output.trim();
                if !trimmed.is_empty() {
                    return trimmed.to_owned();
                }
            }
        }
        DisplayErrorChain(self).to_string()
    }
}

/// An error that occurred while validating the execution environment of a workspace.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EnvironmentError {
    /// The check command could not be started.
    #[error("failed to run environment check `{command}`")]
    Spawn {
        /// The check command.
        command: String,

        /// The underlying error.
        #[source]
        err: io::Error,
    },

    /// The check command reported an invalid environment.
    #[error("environment check `{command}` failed{}", DisplayExitCode(*exit_code))]
    CheckFailed {
        /// The check command.
        command: String,

        /// The exit code of the check, if any.
        exit_code: Option<i32>,

        /// Standard error of the check.
        stderr: String,
    },
}

/// An error that occurred while starting a run session.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SessionStartError {
    /// The session host could not be spawned.
    #[error("failed to spawn session host `{program}`")]
    Spawn {
        /// The program that was spawned.
        program: String,

        /// The underlying error.
        #[source]
        err: io::Error,
    },

    /// The launch configuration could not be serialized.
    #[error("failed to serialize launch configuration")]
    Serialize(#[source] serde_json::Error),

    /// The launch configuration could not be written to the session host.
    #[error("failed to write launch configuration to session host")]
    WriteConfig(#[source] io::Error),
}

/// An error that prevented a run from being dispatched for one workspace.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DispatchError {
    /// The execution environment of the workspace is invalid.
    #[error("execution environment for `{workspace}` is invalid")]
    EnvironmentInvalid {
        /// The workspace that was skipped.
        workspace: Utf8PathBuf,
    },

    /// The workspace has no root suite to run.
    #[error("workspace `{workspace}` has no suite to run")]
    NoRootSuite {
        /// The workspace that was skipped.
        workspace: Utf8PathBuf,
    },

    /// The run session could not be started.
    #[error("failed to start run session for `{workspace}`")]
    SessionStart {
        /// The workspace that was skipped.
        workspace: Utf8PathBuf,

        /// The underlying error.
        #[source]
        err: SessionStartError,
    },
}

impl DispatchError {
    /// Returns the workspace this error applies to.
    pub fn workspace(&self) -> &Utf8Path {
        match self {
            Self::EnvironmentInvalid { workspace }
            | Self::NoRootSuite { workspace }
            | Self::SessionStart { workspace, .. } => workspace,
        }
    }
}

struct DisplayExitCode(Option<i32>);

impl fmt::Display for DisplayExitCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(code) => write!(f, " with exit code {code}"),
            None => write!(f, " (terminated by signal)"),
        }
    }
}

/// Displays an error along with its chain of sources, separated by `: `.
pub(crate) struct DisplayErrorChain<E>(pub(crate) E);

impl<E: std::error::Error> fmt::Display for DisplayErrorChain<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)?;
        let mut source = self.0.source();
        while let Some(err) = source {
            write!(f, ": {err}")?;
            source = err.source();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("parse error\n", "", "parse error"; "stderr wins")]
    #[test_case("  ", "usage: tool\n", "usage: tool"; "falls back to stdout")]
    #[test_case("", "", "discovery tool failed with exit code 1"; "falls back to display")]
    fn node_message(stderr: &str, stdout: &str, expected: &str) {
        let err = DiscoveryError::CommandFailed {
            exit_code: Some(1),
            stdout: stdout.to_owned(),
            stderr: stderr.to_owned(),
        };
        assert_eq!(err.node_message(), expected);
    }

    #[test]
    fn node_message_includes_sources() {
        let err = DiscoveryError::Spawn {
            program: "missing-tool".to_owned(),
            err: io::Error::new(io::ErrorKind::NotFound, "not found"),
        };
        assert_eq!(
            err.node_message(),
            "failed to spawn discovery tool `missing-tool`: not found"
        );
    }
}
