// Copyright (c) The suitelink Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use suitelink_metadata::{
    EndedBody, EnqueuedBody, ExitedBody, LogBody, RunId, SessionEvent, StartedBody,
};

/// An event that affects a run, as seen by the correlator.
///
/// This is the closed set of everything a session can report, plus
/// [`SessionTerminated`](Self::SessionTerminated), which is synthesized when a session goes away.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ExecutionEvent {
    /// Items were queued for execution.
    Enqueued(EnqueuedBody),

    /// An item started executing.
    Started(StartedBody),

    /// An item finished executing.
    Ended(EndedBody),

    /// A suite was marked as failed.
    SetFailed(EndedBody),

    /// Output from the code under test.
    Log(LogBody),

    /// Output from the tool itself.
    Message(LogBody),

    /// The session reported that it finished.
    Exited(ExitedBody),

    /// The session terminated, whether or not it reported [`Exited`](Self::Exited) first.
    SessionTerminated,
}

impl ExecutionEvent {
    /// Returns a short name for this event, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Enqueued(_) => "enqueued",
            Self::Started(_) => "started",
            Self::Ended(_) => "ended",
            Self::SetFailed(_) => "setFailed",
            Self::Log(_) => "log",
            Self::Message(_) => "message",
            Self::Exited(_) => "exited",
            Self::SessionTerminated => "session-terminated",
        }
    }

    /// Returns true if this event ends a run.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Exited(_) | Self::SessionTerminated)
    }
}

impl From<SessionEvent> for ExecutionEvent {
    fn from(event: SessionEvent) -> Self {
        match event {
            SessionEvent::Enqueued(body) => Self::Enqueued(body),
            SessionEvent::Started(body) => Self::Started(body),
            SessionEvent::Ended(body) => Self::Ended(body),
            SessionEvent::SetFailed(body) => Self::SetFailed(body),
            SessionEvent::Log(body) => Self::Log(body),
            SessionEvent::Message(body) => Self::Message(body),
            SessionEvent::Exited(body) => Self::Exited(body),
        }
    }
}

/// An [`ExecutionEvent`] addressed to a run.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RoutedEvent {
    /// The run the event belongs to.
    pub run_id: RunId,

    /// The event.
    pub event: ExecutionEvent,
}

impl RoutedEvent {
    /// Creates a new routed event.
    pub fn new(run_id: RunId, event: impl Into<ExecutionEvent>) -> Self {
        Self {
            run_id,
            event: event.into(),
        }
    }
}
