// Copyright (c) The suitelink Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::time::{StopwatchStart, stopwatch};
use camino::Utf8PathBuf;
use chrono::{DateTime, Local};
use debug_ignore::DebugIgnore;
use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};
use suitelink_metadata::{ExitedBody, LogLevel, RunId, TestId, TestStatus};
use tokio::sync::watch;
use tracing::{debug, info};

/// A consumer of run report updates, for example the editor's test results view.
pub trait ReportSink: Send + Sync {
    /// Called for every update, in order.
    fn report(&self, event: ReportEvent);
}

/// An update to a run report.
#[derive(Clone, Debug)]
pub struct ReportEvent {
    /// The time at which the event was generated.
    pub timestamp: DateTime<Local>,

    /// The amount of time elapsed since the start of the run.
    pub elapsed: Duration,

    /// The kind of update.
    pub kind: ReportEventKind,
}

/// The kind of a [`ReportEvent`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ReportEventKind {
    /// An item was queued.
    Enqueued {
        /// The item.
        id: TestId,
    },

    /// An item started.
    Started {
        /// The item.
        id: TestId,
    },

    /// An item finished.
    Finished {
        /// The item.
        id: TestId,

        /// Its outcome.
        status: TestStatus,

        /// Failure and skip messages, in display order.
        messages: Vec<ReportMessage>,

        /// The elapsed time reported by the tool.
        duration: Option<Duration>,
    },

    /// A suite was marked as failed, for example by a failing teardown.
    ///
    /// Suites are not counted as finished items.
    SuiteFailed {
        /// The suite.
        id: TestId,

        /// The status the suite was marked with.
        status: TestStatus,

        /// Failure messages, in display order.
        messages: Vec<ReportMessage>,
    },

    /// Output was produced.
    Output {
        /// The text.
        text: String,

        /// The level of the output.
        level: LogLevel,

        /// The item the output is attributed to.
        item: Option<TestId>,

        /// Where the output was produced.
        location: Option<Location>,
    },

    /// The run ended.
    RunEnded {
        /// Final statistics and artifacts.
        summary: RunSummary,
    },
}

/// A message attached to a finished item.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ReportMessage {
    /// The message text.
    pub text: String,

    /// The location the message points at.
    pub location: Option<Location>,
}

impl ReportMessage {
    /// Creates a message with no location.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            location: None,
        }
    }
}

/// A location in a source file.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Location {
    /// The file.
    pub path: Utf8PathBuf,

    /// The one-based line number, if known.
    pub line: Option<u32>,
}

impl Location {
    /// Builds a location out of the optional source and line fields found in session events.
    pub fn from_parts(path: Option<&Utf8PathBuf>, line: Option<u32>) -> Option<Self> {
        path.map(|path| Self {
            path: path.clone(),
            line,
        })
    }
}

/// Statistics about a run.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct RunStats {
    /// The number of items that were enqueued.
    pub enqueued: usize,

    /// The number of items that finished.
    pub finished: usize,

    /// The number of items that passed.
    pub passed: usize,

    /// The number of items that failed.
    pub failed: usize,

    /// The number of items that could not be executed.
    pub errored: usize,

    /// The number of items that were skipped.
    pub skipped: usize,

    /// The number of items reported as not run.
    pub not_run: usize,

    /// The number of suites marked as failed. Not included in `finished`.
    pub suites_failed: usize,
}

impl RunStats {
    /// Returns true if there are any failures recorded in the stats.
    pub fn has_failures(&self) -> bool {
        self.failed > 0 || self.errored > 0 || self.suites_failed > 0
    }

    /// Returns true if nothing failed.
    pub fn is_success(&self) -> bool {
        !self.has_failures()
    }

    fn on_finished(&mut self, status: TestStatus) {
        self.finished += 1;
        match status {
            TestStatus::Pass => self.passed += 1,
            TestStatus::Fail => self.failed += 1,
            TestStatus::Error => self.errored += 1,
            TestStatus::Skip => self.skipped += 1,
            TestStatus::NotRun => self.not_run += 1,
        }
    }
}

/// Files produced by one session.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RunArtifacts {
    /// The run that produced the files.
    pub run_id: RunId,

    /// What the session reported on exit.
    pub exited: ExitedBody,
}

/// The final state of a run report.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RunSummary {
    /// When the run started.
    pub start_time: DateTime<Local>,

    /// How long the run took.
    pub elapsed: Duration,

    /// Statistics.
    pub stats: RunStats,

    /// Files produced by each session, in exit order.
    pub artifacts: Vec<RunArtifacts>,
}

/// The report of one run request.
///
/// A handle may be shared by several sessions, one per workspace. It ends exactly once: further
/// updates after [`end`](Self::end) are ignored.
#[derive(Debug)]
pub struct TestRunHandle {
    name: String,
    sink: DebugIgnore<Arc<dyn ReportSink>>,
    stopwatch: StopwatchStart,
    state: Mutex<HandleState>,
    ended_tx: watch::Sender<bool>,
}

#[derive(Debug, Default)]
struct HandleState {
    stats: RunStats,
    artifacts: Vec<RunArtifacts>,
    ended: bool,
}

impl TestRunHandle {
    /// Creates a new report that forwards updates to `sink`.
    pub fn new(name: impl Into<String>, sink: Arc<dyn ReportSink>) -> Self {
        let (ended_tx, _) = watch::channel(false);
        Self {
            name: name.into(),
            sink: DebugIgnore(sink),
            stopwatch: stopwatch(),
            state: Mutex::new(HandleState::default()),
            ended_tx,
        }
    }

    /// Returns the name of the run.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Reports that an item was queued.
    pub fn enqueued(&self, id: TestId) {
        let mut state = self.state();
        if state.ended {
            return;
        }
        state.stats.enqueued += 1;
        self.emit(ReportEventKind::Enqueued { id });
    }

    /// Reports that an item started.
    pub fn started(&self, id: TestId) {
        if self.state().ended {
            return;
        }
        self.emit(ReportEventKind::Started { id });
    }

    /// Reports that an item finished.
    pub fn finished(
        &self,
        id: TestId,
        status: TestStatus,
        messages: Vec<ReportMessage>,
        duration: Option<Duration>,
    ) {
        let mut state = self.state();
        if state.ended {
            return;
        }
        state.stats.on_finished(status);
        self.emit(ReportEventKind::Finished {
            id,
            status,
            messages,
            duration,
        });
    }

    /// Reports that a suite was marked as failed. Leaf statistics are left untouched.
    pub fn suite_failed(&self, id: TestId, status: TestStatus, messages: Vec<ReportMessage>) {
        let mut state = self.state();
        if state.ended {
            return;
        }
        if status.is_failure() {
            state.stats.suites_failed += 1;
        }
        self.emit(ReportEventKind::SuiteFailed {
            id,
            status,
            messages,
        });
    }

    /// Appends output to the run.
    pub fn output(
        &self,
        text: impl Into<String>,
        level: LogLevel,
        item: Option<TestId>,
        location: Option<Location>,
    ) {
        if self.state().ended {
            return;
        }
        self.emit(ReportEventKind::Output {
            text: text.into(),
            level,
            item,
            location,
        });
    }

    /// Records the files a session produced.
    pub fn record_artifacts(&self, run_id: RunId, exited: ExitedBody) {
        let mut state = self.state();
        if state.ended {
            return;
        }
        state.artifacts.push(RunArtifacts { run_id, exited });
    }

    /// Ends the report. Returns false if it had already ended.
    pub fn end(&self) -> bool {
        let summary = {
            let mut state = self.state();
            if state.ended {
                debug!(run = %self.name, "report already ended");
                return false;
            }
            state.ended = true;
            let snapshot = self.stopwatch.snapshot();
            RunSummary {
                start_time: snapshot.start_time,
                elapsed: snapshot.duration,
                stats: state.stats,
                artifacts: std::mem::take(&mut state.artifacts),
            }
        };
        info!(
            run = %self.name,
            passed = summary.stats.passed,
            failed = summary.stats.failed + summary.stats.errored,
            skipped = summary.stats.skipped,
            "run ended"
        );
        self.emit(ReportEventKind::RunEnded { summary });
        self.ended_tx.send_replace(true);
        true
    }

    /// Returns true if the report has ended.
    pub fn is_ended(&self) -> bool {
        self.state().ended
    }

    /// Returns the statistics collected so far.
    pub fn stats(&self) -> RunStats {
        self.state().stats
    }

    /// Completes once the report has ended.
    pub async fn wait_ended(&self) {
        let mut receiver = self.ended_tx.subscribe();
        // The sender lives as long as `self`, so this can't fail.
        let _ = receiver.wait_for(|ended| *ended).await;
    }

    fn state(&self) -> MutexGuard<'_, HandleState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, kind: ReportEventKind) {
        self.sink.report(ReportEvent {
            timestamp: Local::now(),
            elapsed: self.stopwatch.snapshot().duration,
            kind,
        });
    }
}

/// A [`ReportSink`] that stores every event, for inspection.
#[derive(Debug, Default)]
pub struct RecordingReport {
    events: Mutex<Vec<ReportEvent>>,
}

impl RecordingReport {
    /// Creates an empty recording.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the kinds of every event recorded so far.
    pub fn kinds(&self) -> Vec<ReportEventKind> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|event| event.kind.clone())
            .collect()
    }
}

impl ReportSink for RecordingReport {
    fn report(&self, event: ReportEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}
