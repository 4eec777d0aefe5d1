// Copyright (c) The suitelink Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Invoking the external tool to discover tests.
//!
//! The main entry point is the [`Discover`] trait, implemented for real invocations by
//! [`DiscoveryClient`].

use crate::{cancel::CancelToken, errors::DiscoveryError};
use camino::{Utf8Path, Utf8PathBuf};
use futures::future::BoxFuture;
use std::{io, process::Stdio};
use suitelink_metadata::{DiscoveryMode, DiscoveryOutput, UnsavedDocuments};
use tokio::{io::AsyncWriteExt, process::Command};
use tracing::{debug, instrument};

/// How to invoke the discovery tool for a workspace.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ToolCommand {
    /// The program to run.
    pub program: String,

    /// Arguments placed before suitelink's own.
    pub args: Vec<String>,

    /// Tool profiles to select.
    pub profiles: Vec<String>,

    /// Search paths passed to the tool.
    pub default_paths: Vec<String>,
}

/// A single discovery invocation.
#[derive(Clone, Debug)]
pub struct DiscoveryRequest {
    /// The workspace folder, used as the working directory.
    pub workspace: Utf8PathBuf,

    /// How to invoke the tool.
    pub tool: ToolCommand,

    /// What to discover.
    pub mode: DiscoveryMode,

    /// Restrict discovery to the suite with this long-name.
    pub suite: Option<String>,

    /// Relative sources the tool should parse. Empty means everything.
    pub parse_include: Vec<Utf8PathBuf>,

    /// Contents of unsaved documents, fed to the tool on standard input.
    pub unsaved: UnsavedDocuments,
}

impl DiscoveryRequest {
    /// Creates a request that discovers everything in a workspace.
    pub fn workspace(workspace: impl Into<Utf8PathBuf>, tool: ToolCommand) -> Self {
        Self {
            workspace: workspace.into(),
            tool,
            mode: DiscoveryMode::All,
            suite: None,
            parse_include: Vec::new(),
            unsaved: UnsavedDocuments::new(),
        }
    }

    /// Returns the arguments passed to the tool, not including the program.
    pub fn command_args(&self) -> Vec<String> {
        let mut args = self.tool.args.clone();
        args.extend(["--format".to_owned(), "json".to_owned()]);
        for profile in &self.tool.profiles {
            args.extend(["-p".to_owned(), profile.clone()]);
        }
        args.push("discover".to_owned());
        if !self.unsaved.is_empty() {
            args.push("--read-from-stdin".to_owned());
        }
        args.push(self.mode.as_str().to_owned());
        if let Some(suite) = &self.suite {
            args.extend(["--suite".to_owned(), suite.clone()]);
        }
        for path in &self.parse_include {
            args.extend(["--parse-include".to_owned(), path.to_string()]);
        }
        args.extend(self.tool.default_paths.iter().cloned());
        args
    }
}

/// Something that can discover tests.
///
/// Implemented by [`DiscoveryClient`] for real tool invocations; tests substitute their own.
pub trait Discover: Send + Sync {
    /// Runs one discovery invocation.
    ///
    /// If `cancel` fires before the invocation completes, the invocation is abandoned and
    /// [`DiscoveryError::Cancelled`] is returned.
    fn discover<'a>(
        &'a self,
        request: DiscoveryRequest,
        cancel: CancelToken,
    ) -> BoxFuture<'a, Result<DiscoveryOutput, DiscoveryError>>;
}

/// Discovers tests by running the external tool as a child process.
#[derive(Clone, Debug, Default)]
pub struct DiscoveryClient {
    _private: (),
}

impl DiscoveryClient {
    /// Creates a new client.
    pub fn new() -> Self {
        Self::default()
    }

    #[instrument(
        level = "debug",
        name = "discover",
        skip_all,
        fields(workspace = %request.workspace, mode = %request.mode),
    )]
    async fn run(
        &self,
        request: DiscoveryRequest,
        cancel: CancelToken,
    ) -> Result<DiscoveryOutput, DiscoveryError> {
        let args = request.command_args();
        debug!("running `{} {}`", request.tool.program, args.join(" "));

        let stdin_payload = if request.unsaved.is_empty() {
            None
        } else {
            Some(serde_json::to_vec(&request.unsaved).map_err(DiscoveryError::SerializeStdin)?)
        };

        let mut command = Command::new(&request.tool.program);
        command
            .args(&args)
            .current_dir(&request.workspace)
            .stdin(if stdin_payload.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // A superseded invocation is abandoned by dropping it.
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|err| DiscoveryError::Spawn {
            program: request.tool.program.clone(),
            err,
        })?;

        let stdin = child.stdin.take();
        let write_stdin = async move {
            if let (Some(mut stdin), Some(payload)) = (stdin, stdin_payload) {
                stdin.write_all(&payload).await?;
                stdin.shutdown().await?;
            }
            Ok::<_, io::Error>(())
        };

        let invocation = async move {
            let (write_res, output) = tokio::join!(write_stdin, child.wait_with_output());
            let output = output.map_err(DiscoveryError::Wait)?;
            match write_res {
                // The tool is free to exit without reading its input.
                Err(err) if err.kind() != io::ErrorKind::BrokenPipe => {
                    Err(DiscoveryError::WriteStdin(err))
                }
                _ => Ok(output),
            }
        };

        let output = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                debug!("discovery cancelled");
                return Err(DiscoveryError::Cancelled);
            }
            output = invocation => output?,
        };

        if !output.status.success() {
            return Err(DiscoveryError::CommandFailed {
                exit_code: output.status.code(),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }

        let output = DiscoveryOutput::parse(&output.stdout).map_err(DiscoveryError::Json)?;
        debug!(
            "discovered {} top-level items",
            output.items.as_ref().map_or(0, Vec::len)
        );
        Ok(output)
    }
}

impl Discover for DiscoveryClient {
    fn discover<'a>(
        &'a self,
        request: DiscoveryRequest,
        cancel: CancelToken,
    ) -> BoxFuture<'a, Result<DiscoveryOutput, DiscoveryError>> {
        Box::pin(self.run(request, cancel))
    }
}

/// Returns the unsaved documents that live under `workspace`.
pub fn unsaved_in(unsaved: &UnsavedDocuments, workspace: &Utf8Path) -> UnsavedDocuments {
    unsaved
        .iter()
        .filter(|(uri, _)| {
            crate::helpers::uri_to_path(uri).is_some_and(|path| path.starts_with(workspace))
        })
        .map(|(uri, text)| (uri.clone(), text.clone()))
        .collect()
}
