// Copyright (c) The suitelink Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::output::StderrStyles;
use camino::Utf8PathBuf;
use owo_colors::OwoColorize;
use std::error::Error;
use suitelink_metadata::SuitelinkExitCode;
use suitelink_runner::errors::{ConfigParseError, DispatchError, ProfileNotFound};
use thiserror::Error;
use tracing::{error, info};

pub(crate) type Result<T, E = ExpectedError> = std::result::Result<T, E>;

// The #[error()] strings are placeholders: errors are meant to be printed with display_to_stderr,
// which colorizes them.

/// An error that suitelink expects to happen, as opposed to a bug.
#[derive(Debug, Error)]
#[doc(hidden)]
pub enum ExpectedError {
    #[error("could not determine the current directory")]
    CurrentDirFailed {
        #[source]
        err: std::io::Error,
    },
    #[error("workspace folder is not valid UTF-8")]
    WorkspaceNotUtf8 {
        #[source]
        err: camino::FromPathBufError,
    },
    #[error("config parse error")]
    ConfigParseError {
        #[from]
        err: ConfigParseError,
    },
    #[error("profile not found")]
    ProfileNotFound {
        #[from]
        err: ProfileNotFound,
    },
    #[error("failed to create async runtime")]
    RuntimeCreateError {
        #[source]
        err: std::io::Error,
    },
    #[error("discovery failed")]
    DiscoveryFailed { failures: Vec<(Utf8PathBuf, String)> },
    #[error("unknown long-name")]
    UnknownLongname { longname: String },
    #[error("no tests to run")]
    NoTestsRun,
    #[error("no run could be dispatched")]
    DispatchFailed { errors: Vec<DispatchError> },
    #[error("test run failed")]
    TestRunFailed,
    #[error("failed to watch workspace folders")]
    WatchError {
        #[source]
        err: notify::Error,
    },
    #[error("failed to set up signal handler")]
    SignalHandlerSetupError {
        #[source]
        err: std::io::Error,
    },
    #[error("failed to write output")]
    WriteOutputError {
        #[source]
        err: std::io::Error,
    },
    #[error("failed to serialize output")]
    SerializeOutputError {
        #[source]
        err: serde_json::Error,
    },
}

impl ExpectedError {
    /// Returns the exit code for the process.
    pub fn process_exit_code(&self) -> i32 {
        match self {
            Self::CurrentDirFailed { .. }
            | Self::WorkspaceNotUtf8 { .. }
            | Self::ConfigParseError { .. }
            | Self::ProfileNotFound { .. }
            | Self::RuntimeCreateError { .. }
            | Self::UnknownLongname { .. }
            | Self::SignalHandlerSetupError { .. } => SuitelinkExitCode::SETUP_ERROR,
            Self::DiscoveryFailed { .. } => SuitelinkExitCode::DISCOVERY_FAILED,
            Self::NoTestsRun => SuitelinkExitCode::NO_TESTS_RUN,
            Self::DispatchFailed { errors } => {
                if !errors.is_empty()
                    && errors
                        .iter()
                        .all(|err| matches!(err, DispatchError::EnvironmentInvalid { .. }))
                {
                    SuitelinkExitCode::ENVIRONMENT_INVALID
                } else {
                    SuitelinkExitCode::DISPATCH_FAILED
                }
            }
            Self::TestRunFailed => SuitelinkExitCode::TEST_RUN_FAILED,
            Self::WatchError { .. } => SuitelinkExitCode::WATCH_FAILED,
            Self::WriteOutputError { .. } | Self::SerializeOutputError { .. } => {
                SuitelinkExitCode::WRITE_OUTPUT_ERROR
            }
        }
    }

    /// Displays this error to stderr.
    pub fn display_to_stderr(&self, styles: &StderrStyles) {
        let mut next_error = match self {
            Self::CurrentDirFailed { err } => {
                error!("could not determine the current directory");
                Some(err as &dyn Error)
            }
            Self::WorkspaceNotUtf8 { err } => {
                error!(
                    "workspace folder `{}` is not valid UTF-8",
                    err.as_path().display().style(styles.bold)
                );
                None
            }
            Self::ConfigParseError { err } => {
                error!(
                    "failed to parse config at `{}`",
                    err.config_file().style(styles.bold)
                );
                Some(err as &dyn Error)
            }
            Self::ProfileNotFound { err } => {
                error!("{err}");
                err.source()
            }
            Self::RuntimeCreateError { err } => {
                error!("failed to create async runtime");
                Some(err as &dyn Error)
            }
            Self::DiscoveryFailed { failures } => {
                for (workspace, message) in failures {
                    error!("discovery failed for `{}`", workspace.style(styles.bold));
                    info!(target: "suitelink::no_heading", "{message}");
                }
                None
            }
            Self::UnknownLongname { longname } => {
                error!(
                    "no test or suite named `{}` was discovered",
                    longname.style(styles.bold)
                );
                None
            }
            Self::NoTestsRun => {
                error!("no tests to run");
                None
            }
            Self::DispatchFailed { errors } => {
                for err in errors {
                    error!("{err}");
                    let mut source = err.source();
                    while let Some(err) = source {
                        error!(target: "suitelink::no_heading", "\nCaused by:\n  {err}");
                        source = err.source();
                    }
                }
                None
            }
            Self::TestRunFailed => {
                error!("test run failed");
                None
            }
            Self::WatchError { err } => {
                error!("failed to watch workspace folders");
                Some(err as &dyn Error)
            }
            Self::SignalHandlerSetupError { err } => {
                error!("failed to set up signal handler");
                Some(err as &dyn Error)
            }
            Self::WriteOutputError { err } => {
                error!("failed to write output");
                Some(err as &dyn Error)
            }
            Self::SerializeOutputError { err } => {
                error!("failed to serialize output");
                Some(err as &dyn Error)
            }
        };

        while let Some(err) = next_error {
            error!(target: "suitelink::no_heading", "\nCaused by:\n  {err}");
            next_error = err.source();
        }
    }
}
