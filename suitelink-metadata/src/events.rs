// Copyright (c) The suitelink Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::TestId;
use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A custom lifecycle event emitted by a run session.
///
/// Sessions emit one JSON object per event, of the form `{"event": "<name>", "body": {...}}`.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "body", rename_all = "camelCase")]
pub enum SessionEvent {
    /// Items were queued for execution.
    Enqueued(EnqueuedBody),

    /// An item started executing.
    Started(StartedBody),

    /// An item finished executing.
    Ended(EndedBody),

    /// A suite was marked as failed outside of its own execution, for example by a failing
    /// teardown.
    SetFailed(EndedBody),

    /// A log message produced by the code under test.
    Log(LogBody),

    /// A message produced by the tool itself.
    Message(LogBody),

    /// The session finished.
    Exited(ExitedBody),
}

impl SessionEvent {
    /// Returns the wire name of this event.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Enqueued(_) => "enqueued",
            Self::Started(_) => "started",
            Self::Ended(_) => "ended",
            Self::SetFailed(_) => "setFailed",
            Self::Log(_) => "log",
            Self::Message(_) => "message",
            Self::Exited(_) => "exited",
        }
    }
}

/// The body of [`SessionEvent::Enqueued`].
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct EnqueuedBody {
    /// The enqueued item ids.
    #[serde(default)]
    pub items: Vec<TestId>,
}

/// The kind of item a [`StartedBody`] or [`EndedBody`] refers to.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    /// A suite.
    Suite,

    /// A test case.
    Test,

    /// A task.
    Task,

    /// A keyword within a test.
    Keyword,

    /// An item kind not known to this version of suitelink.
    #[serde(other)]
    Other,
}

impl ItemKind {
    /// Returns true if items of this kind are reported individually.
    pub fn is_leaf(self) -> bool {
        matches!(self, Self::Test | Self::Task)
    }
}

/// The body of [`SessionEvent::Started`].
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct StartedBody {
    /// The kind of item that started.
    #[serde(rename = "type")]
    pub kind: ItemKind,

    /// The id of the item.
    pub id: TestId,

    /// Attributes reported by the tool.
    #[serde(default)]
    pub attributes: StartedAttributes,
}

/// Attributes attached to [`StartedBody`].
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct StartedAttributes {
    /// The long-name of the item.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longname: Option<String>,

    /// The source file of the item.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<Utf8PathBuf>,

    /// The one-based line number within [`source`](Self::source).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lineno: Option<u32>,

    /// Tags attached to the item.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

/// The outcome of an item, as reported by the tool.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum TestStatus {
    /// The item passed.
    #[serde(rename = "PASS")]
    Pass,

    /// The item was skipped.
    #[serde(rename = "SKIP")]
    Skip,

    /// The item failed.
    #[serde(rename = "FAIL")]
    Fail,

    /// The item could not be executed.
    #[serde(rename = "ERROR")]
    Error,

    /// The item was not run.
    #[serde(rename = "NOT RUN")]
    NotRun,
}

impl TestStatus {
    /// Returns the wire representation of this status.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pass => "PASS",
            Self::Skip => "SKIP",
            Self::Fail => "FAIL",
            Self::Error => "ERROR",
            Self::NotRun => "NOT RUN",
        }
    }

    /// Returns true if this status counts as a failure.
    pub fn is_failure(self) -> bool {
        matches!(self, Self::Fail | Self::Error)
    }
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The body of [`SessionEvent::Ended`] and [`SessionEvent::SetFailed`].
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndedBody {
    /// The kind of item that ended.
    #[serde(rename = "type")]
    pub kind: ItemKind,

    /// The id of the item.
    pub id: TestId,

    /// Attributes reported by the tool.
    pub attributes: EndedAttributes,

    /// The keywords that failed within this item, outermost first.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_keywords: Option<Vec<FailedKeyword>>,
}

/// Attributes attached to [`EndedBody`].
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct EndedAttributes {
    /// The outcome.
    pub status: TestStatus,

    /// The failure or skip message, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// The elapsed time in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elapsedtime: Option<u64>,

    /// The source file of the item.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<Utf8PathBuf>,

    /// The one-based line number within [`source`](Self::source).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lineno: Option<u32>,

    /// Tags attached to the item.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

/// A keyword that failed within an ended item.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct FailedKeyword {
    /// The failure message.
    pub message: String,

    /// The log level of the failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<LogLevel>,

    /// The source file of the keyword.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<Utf8PathBuf>,

    /// The one-based line number within [`source`](Self::source).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lineno: Option<u32>,
}

/// The level of a log message.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    /// Trace output.
    Trace,

    /// Debug output.
    Debug,

    /// Informational output.
    #[default]
    Info,

    /// A warning.
    Warn,

    /// An error.
    Error,

    /// A failure.
    Fail,

    /// A level not known to this version of suitelink.
    #[serde(other)]
    Other,
}

impl LogLevel {
    /// Returns true if messages at this level indicate a problem.
    pub fn is_problem(self) -> bool {
        matches!(self, Self::Warn | Self::Error | Self::Fail)
    }
}

/// The body of [`SessionEvent::Log`] and [`SessionEvent::Message`].
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogBody {
    /// The item this message belongs to, if known to the tool.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_id: Option<TestId>,

    /// The source file that produced the message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<Utf8PathBuf>,

    /// The one-based line number within [`source`](Self::source).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lineno: Option<u32>,

    /// The one-based column within the line.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,

    /// The message text.
    pub message: String,

    /// The level of the message.
    #[serde(default)]
    pub level: LogLevel,

    /// The timestamp as reported by the tool.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl LogBody {
    /// Creates a message with no location information.
    pub fn plain(message: impl Into<String>, level: LogLevel) -> Self {
        Self {
            item_id: None,
            source: None,
            lineno: None,
            column: None,
            message: message.into(),
            level,
            timestamp: None,
        }
    }
}

/// The body of [`SessionEvent::Exited`].
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExitedBody {
    /// The path to the machine-readable output file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_file: Option<Utf8PathBuf>,

    /// The path to the log file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_file: Option<Utf8PathBuf>,

    /// The path to the report file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report_file: Option<Utf8PathBuf>,

    /// The exit code of the execution process.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}
