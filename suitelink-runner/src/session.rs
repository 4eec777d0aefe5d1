// Copyright (c) The suitelink Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Starting debug sessions that execute runs.
//!
//! A session is hosted by an external process. It receives a [`LaunchConfig`] as a single line
//! of JSON on standard input, and reports [`SessionEvent`]s as newline-delimited JSON on standard
//! output. The session is over once standard output closes.

use crate::errors::SessionStartError;
use futures::future::BoxFuture;
use std::process::Stdio;
use suitelink_metadata::{LaunchConfig, LogBody, LogLevel, RunId, SessionEvent};
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader},
    process::{Child, Command},
    sync::mpsc,
};
use tracing::{debug, info, warn};

/// How to start the process hosting a session.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SessionCommand {
    /// The program to run.
    pub program: String,

    /// Arguments passed to the program.
    pub args: Vec<String>,
}

/// A started session.
///
/// The event channel closes when the session terminates.
#[derive(Debug)]
pub struct DebugSession {
    /// The run this session executes.
    pub run_id: RunId,

    /// Events emitted by the session, in order.
    pub events: mpsc::UnboundedReceiver<SessionEvent>,
}

/// Something that can start debug sessions.
pub trait SessionLauncher: Send + Sync {
    /// Starts a session for `config`.
    fn launch<'a>(
        &'a self,
        command: &'a SessionCommand,
        config: LaunchConfig,
    ) -> BoxFuture<'a, Result<DebugSession, SessionStartError>>;
}

/// Launches sessions as child processes.
#[derive(Clone, Debug, Default)]
pub struct ProcessLauncher {
    _private: (),
}

impl ProcessLauncher {
    /// Creates a new launcher.
    pub fn new() -> Self {
        Self::default()
    }

    async fn start(
        &self,
        command: &SessionCommand,
        config: LaunchConfig,
    ) -> Result<DebugSession, SessionStartError> {
        let mut payload = serde_json::to_vec(&config).map_err(SessionStartError::Serialize)?;
        payload.push(b'\n');

        debug!(
            run_id = %config.run_id,
            "starting session `{} {}`",
            command.program,
            command.args.join(" ")
        );
        let mut child = Command::new(&command.program)
            .args(&command.args)
            .current_dir(&config.cwd)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| SessionStartError::Spawn {
                program: command.program.clone(),
                err,
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(&payload)
                .await
                .map_err(SessionStartError::WriteConfig)?;
            stdin
                .shutdown()
                .await
                .map_err(SessionStartError::WriteConfig)?;
        }

        let (sender, events) = mpsc::unbounded_channel();
        tokio::spawn(pump_session(config.run_id, child, sender));
        info!(run_id = %config.run_id, name = %config.name, "session started");

        Ok(DebugSession {
            run_id: config.run_id,
            events,
        })
    }
}

impl SessionLauncher for ProcessLauncher {
    fn launch<'a>(
        &'a self,
        command: &'a SessionCommand,
        config: LaunchConfig,
    ) -> BoxFuture<'a, Result<DebugSession, SessionStartError>> {
        Box::pin(self.start(command, config))
    }
}

async fn pump_session(
    run_id: RunId,
    mut child: Child,
    sender: mpsc::UnboundedSender<SessionEvent>,
) {
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    tokio::join!(
        forward_lines(stdout, sender.clone(), parse_event_line),
        forward_lines(stderr, sender.clone(), |line| {
            SessionEvent::Message(LogBody::plain(line, LogLevel::Warn))
        }),
    );

    match child.wait().await {
        Ok(status) if status.success() => debug!(%run_id, "session host exited"),
        Ok(status) => {
            info!(%run_id, "session host exited with {status}");
            let _ = sender.send(SessionEvent::Message(LogBody::plain(
                format!("session host exited with {status}"),
                LogLevel::Error,
            )));
        }
        Err(err) => warn!(%run_id, "failed to wait for session host: {err}"),
    }
}

async fn forward_lines<R>(
    reader: Option<R>,
    sender: mpsc::UnboundedSender<SessionEvent>,
    to_event: impl Fn(&str) -> SessionEvent,
) where
    R: AsyncRead + Unpin,
{
    let Some(reader) = reader else {
        return;
    };
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim_end();
                if line.is_empty() {
                    continue;
                }
                // Keep draining even if nobody is listening, so the host never blocks on a full
                // pipe.
                let _ = sender.send(to_event(line));
            }
            Ok(None) => break,
            Err(err) => {
                warn!("failed to read session output: {err}");
                break;
            }
        }
    }
}

/// Parses one line of session output. Lines that aren't events are passed through as tool
/// messages.
fn parse_event_line(line: &str) -> SessionEvent {
    match serde_json::from_str(line) {
        Ok(event) => event,
        Err(err) => {
            if line.starts_with('{') {
                debug!("session output looks like JSON but isn't an event: {err}");
            }
            SessionEvent::Message(LogBody::plain(line, LogLevel::Info))
        }
    }
}
