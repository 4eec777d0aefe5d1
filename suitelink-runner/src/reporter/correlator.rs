// Copyright (c) The suitelink Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{ExecutionEvent, Location, ReportMessage, RoutedEvent, TestRunHandle};
use crate::{
    helpers::plural,
    runner::{Release, RunRegistry},
    tree::{TestTreeStore, TreeState},
};
use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::Duration,
};
use suitelink_metadata::{EndedBody, ItemKind, LogBody, LogLevel, RunId, TestId};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, warn};

/// The lifecycle phase of a run, as seen by the correlator.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RunPhase {
    /// The session was started, but hasn't reported anything yet.
    Dispatched,

    /// The session has reported at least one event.
    Running,
}

#[derive(Debug)]
struct RunState {
    phase: RunPhase,
    active: Vec<TestId>,
    enqueued: HashSet<TestId>,
}

impl RunState {
    fn new() -> Self {
        Self {
            phase: RunPhase::Dispatched,
            active: Vec::new(),
            enqueued: HashSet::new(),
        }
    }

    fn pop_active(&mut self, id: &TestId) {
        if let Some(index) = self.active.iter().rposition(|active| active == id) {
            self.active.truncate(index);
        }
    }
}

/// Turns session events into report updates.
///
/// Events are processed one at a time, in the order they are received. Events for run ids that
/// were never registered, and events for items that aren't in the tree, are dropped and logged.
#[derive(Debug)]
pub struct ExecutionEventCorrelator {
    tree: Arc<TestTreeStore>,
    registry: Arc<RunRegistry>,
    runs: HashMap<RunId, RunState>,
}

impl ExecutionEventCorrelator {
    /// Creates a new correlator.
    pub fn new(tree: Arc<TestTreeStore>, registry: Arc<RunRegistry>) -> Self {
        Self {
            tree,
            registry,
            runs: HashMap::new(),
        }
    }

    /// Returns the phase of a run, if the correlator has seen it and it hasn't exited.
    pub fn phase(&self, run_id: RunId) -> Option<RunPhase> {
        self.runs.get(&run_id).map(|state| state.phase)
    }

    /// Processes events until the channel closes.
    pub async fn run(mut self, mut events: UnboundedReceiver<RoutedEvent>) {
        while let Some(event) = events.recv().await {
            self.handle_event(event).await;
        }
        debug!("event channel closed, correlator exiting");
    }

    /// Processes a single event.
    pub async fn handle_event(&mut self, routed: RoutedEvent) {
        let RoutedEvent { run_id, event } = routed;

        // Released runs are gone from the registry, so late events for them end up here too.
        let Some(handle) = self.registry.get(run_id) else {
            warn!(%run_id, event = event.name(), "dropping event for unknown or exited run");
            return;
        };
        if event.is_terminal() {
            let mut state = self.runs.remove(&run_id).unwrap_or_else(RunState::new);
            if let ExecutionEvent::Exited(body) = event {
                handle.record_artifacts(run_id, body);
            }
            finish(run_id, &mut state, &mut *self.tree.lock().await, &self.registry);
            return;
        }
        let state = self.runs.entry(run_id).or_insert_with(RunState::new);
        state.phase = RunPhase::Running;

        let mut tree = self.tree.lock().await;
        match event {
            ExecutionEvent::Enqueued(body) => {
                let count = body.items.len();
                debug!(%run_id, "{count} {} enqueued", plural::tests_str(count));
                for id in body.items {
                    on_enqueued(state, &tree, &handle, id);
                }
            }
            ExecutionEvent::Started(body) => {
                let Some(node) = tree.node_mut(&body.id) else {
                    warn!(%run_id, id = %body.id, "dropping started event for unknown item");
                    return;
                };
                if !matches!(body.kind, ItemKind::Suite | ItemKind::Test | ItemKind::Task) {
                    return;
                }
                state.active.push(body.id.clone());
                if body.kind.is_leaf() && node.kind().is_leaf() {
                    node.set_busy(true);
                    handle.started(body.id);
                }
            }
            ExecutionEvent::Ended(body) => {
                state.pop_active(&body.id);
                let Some(node) = tree.node_mut(&body.id) else {
                    warn!(%run_id, id = %body.id, "dropping ended event for unknown item");
                    return;
                };
                if body.kind.is_leaf() && node.kind().is_leaf() {
                    node.set_busy(false);
                    let messages = failure_messages(&body);
                    let duration = body.attributes.elapsedtime.map(Duration::from_millis);
                    handle.finished(body.id, body.attributes.status, messages, duration);
                } else if body.attributes.status.is_failure() {
                    for message in failure_messages(&body) {
                        handle.output(
                            message.text,
                            LogLevel::Fail,
                            Some(body.id.clone()),
                            message.location,
                        );
                    }
                }
            }
            ExecutionEvent::SetFailed(body) => {
                let Some(node) = tree.node(&body.id) else {
                    warn!(%run_id, id = %body.id, "dropping setFailed event for unknown item");
                    return;
                };
                let messages = failure_messages(&body);
                if node.kind().is_leaf() {
                    handle.finished(body.id, body.attributes.status, messages, None);
                } else {
                    handle.suite_failed(body.id, body.attributes.status, messages);
                }
            }
            ExecutionEvent::Log(body) | ExecutionEvent::Message(body) => {
                on_output(state, &handle, body);
            }
            ExecutionEvent::Exited(_) | ExecutionEvent::SessionTerminated => {
                // Terminal events are handled before the tree is locked.
            }
        }
    }
}

fn on_enqueued(state: &mut RunState, tree: &TreeState, handle: &TestRunHandle, id: TestId) {
    match tree.node(&id) {
        Some(node) if node.kind().is_leaf() => {
            if state.enqueued.insert(id.clone()) {
                handle.enqueued(id);
            }
        }
        Some(_) => {}
        None => debug!(%id, "ignoring enqueued item missing from the tree"),
    }
}

fn on_output(state: &RunState, handle: &TestRunHandle, body: LogBody) {
    let item = body.item_id.or_else(|| state.active.last().cloned());
    let location = Location::from_parts(body.source.as_ref(), body.lineno);
    handle.output(body.message, body.level, item, location);
}

fn finish(run_id: RunId, state: &mut RunState, tree: &mut TreeState, registry: &RunRegistry) {
    for id in state.active.drain(..) {
        if let Some(node) = tree.node_mut(&id) {
            node.set_busy(false);
        }
    }
    state.enqueued.clear();

    match registry.release(run_id) {
        Release::LastReference(handle) => {
            handle.end();
        }
        Release::Released => debug!(%run_id, "run released, report still in use"),
        Release::NotRegistered => debug!(%run_id, "run already released"),
    }
}

/// Builds the messages shown for a finished item.
///
/// The top-level message comes first, unless a failed keyword carries the same text. Failed
/// keywords follow, deepest first.
fn failure_messages(body: &EndedBody) -> Vec<ReportMessage> {
    let keywords = body.failed_keywords.as_deref().unwrap_or_default();
    let mut messages = Vec::with_capacity(keywords.len() + 1);

    if let Some(message) = body
        .attributes
        .message
        .as_deref()
        .filter(|message| !message.is_empty())
    {
        if !keywords.iter().any(|keyword| keyword.message == message) {
            messages.push(ReportMessage {
                text: message.to_owned(),
                location: Location::from_parts(
                    body.attributes.source.as_ref(),
                    body.attributes.lineno,
                ),
            });
        }
    }
    messages.extend(keywords.iter().rev().map(|keyword| ReportMessage {
        text: keyword.message.clone(),
        location: Location::from_parts(keyword.source.as_ref(), keyword.lineno),
    }));
    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        reporter::{RecordingReport, ReportEventKind},
        tree::{Expand, ReconcileScope},
    };
    use camino::Utf8PathBuf;
    use pretty_assertions::assert_eq;
    use suitelink_metadata::{
        EndedAttributes, EnqueuedBody, EntityKind, ExitedBody, FailedKeyword, SessionEvent,
        StartedAttributes, StartedBody, TestEntity, TestStatus,
    };

    struct Fixture {
        correlator: ExecutionEventCorrelator,
        registry: Arc<RunRegistry>,
        tree: Arc<TestTreeStore>,
    }

    async fn fixture() -> Fixture {
        let tree = Arc::new(TestTreeStore::new());
        let mut suite = TestEntity::new("s1", EntityKind::Suite, "Suite");
        suite.children = Some(vec![
            TestEntity::new("t1", EntityKind::Test, "Foo"),
            TestEntity::new("t2", EntityKind::Test, "Bar"),
        ]);
        let mut ws = TestEntity::new("ws", EntityKind::Workspace, "ws");
        ws.children = Some(vec![suite]);
        tree.lock().await.reconcile(
            &ReconcileScope::Workspace(Utf8PathBuf::from("/p")),
            &[ws],
            Expand::All,
        );

        let registry = Arc::new(RunRegistry::new());
        Fixture {
            correlator: ExecutionEventCorrelator::new(tree.clone(), registry.clone()),
            registry,
            tree,
        }
    }

    fn register(registry: &RunRegistry, run_id: u64) -> (Arc<RecordingReport>, Arc<TestRunHandle>) {
        let sink = Arc::new(RecordingReport::new());
        let handle = Arc::new(TestRunHandle::new("run", sink.clone()));
        registry.register(RunId::new(run_id), handle.clone());
        (sink, handle)
    }

    fn enqueued(items: &[&str]) -> SessionEvent {
        SessionEvent::Enqueued(EnqueuedBody {
            items: items.iter().map(|&id| id.into()).collect(),
        })
    }

    fn started(kind: ItemKind, id: &str) -> SessionEvent {
        SessionEvent::Started(StartedBody {
            kind,
            id: id.into(),
            attributes: StartedAttributes::default(),
        })
    }

    fn ended(kind: ItemKind, id: &str, status: TestStatus) -> EndedBody {
        EndedBody {
            kind,
            id: id.into(),
            attributes: EndedAttributes {
                status,
                message: None,
                elapsedtime: Some(5),
                source: None,
                lineno: None,
                tags: Vec::new(),
            },
            failed_keywords: None,
        }
    }

    async fn send(correlator: &mut ExecutionEventCorrelator, run_id: u64, event: impl Into<ExecutionEvent>) {
        correlator
            .handle_event(RoutedEvent::new(RunId::new(run_id), event))
            .await;
    }

    #[tokio::test]
    async fn single_test_passes_once() {
        let Fixture {
            mut correlator,
            registry,
            tree,
        } = fixture().await;
        let (sink, handle) = register(&registry, 7);

        send(&mut correlator, 7, enqueued(&["t1"])).await;
        send(&mut correlator, 7, started(ItemKind::Test, "t1")).await;
        assert!(tree.lock().await.node(&"t1".into()).unwrap().is_busy());
        send(&mut correlator, 7, SessionEvent::Ended(ended(ItemKind::Test, "t1", TestStatus::Pass))).await;
        assert!(!handle.is_ended());
        send(&mut correlator, 7, SessionEvent::Exited(ExitedBody::default())).await;

        let kinds = sink.kinds();
        assert_eq!(
            kinds[..3],
            [
                ReportEventKind::Enqueued { id: "t1".into() },
                ReportEventKind::Started { id: "t1".into() },
                ReportEventKind::Finished {
                    id: "t1".into(),
                    status: TestStatus::Pass,
                    messages: Vec::new(),
                    duration: Some(Duration::from_millis(5)),
                },
            ]
        );
        assert!(matches!(kinds[3], ReportEventKind::RunEnded { .. }));
        assert_eq!(kinds.len(), 4);
        assert_eq!(handle.stats().passed, 1);
        assert_eq!(
            correlator.phase(RunId::new(7)),
            None,
            "exited runs are forgotten"
        );
        assert!(!tree.lock().await.node(&"t1".into()).unwrap().is_busy());

        // Termination after exit doesn't end the report again.
        send(&mut correlator, 7, ExecutionEvent::SessionTerminated).await;
        assert_eq!(sink.kinds().len(), 4);
    }

    #[tokio::test]
    async fn ghost_items_are_dropped() {
        let Fixture {
            mut correlator,
            registry,
            ..
        } = fixture().await;
        let (sink, _handle) = register(&registry, 1);

        send(&mut correlator, 1, SessionEvent::Ended(ended(ItemKind::Test, "ghost", TestStatus::Fail))).await;
        send(&mut correlator, 1, started(ItemKind::Test, "ghost")).await;
        send(&mut correlator, 1, enqueued(&["ghost"])).await;
        assert_eq!(sink.kinds(), Vec::new());
        assert_eq!(correlator.phase(RunId::new(1)), Some(RunPhase::Running));
    }

    #[tokio::test]
    async fn unknown_run_ids_are_dropped() {
        let Fixture { mut correlator, .. } = fixture().await;
        send(&mut correlator, 99, enqueued(&["t1"])).await;
        assert_eq!(correlator.phase(RunId::new(99)), None);
    }

    #[tokio::test]
    async fn repeated_enqueue_is_idempotent() {
        let Fixture {
            mut correlator,
            registry,
            ..
        } = fixture().await;
        let (sink, handle) = register(&registry, 1);

        send(&mut correlator, 1, enqueued(&["t1", "s1"])).await;
        send(&mut correlator, 1, enqueued(&["t1"])).await;
        send(&mut correlator, 1, enqueued(&["t1", "t2"])).await;

        assert_eq!(
            sink.kinds(),
            vec![
                ReportEventKind::Enqueued { id: "t1".into() },
                ReportEventKind::Enqueued { id: "t2".into() },
            ]
        );
        assert_eq!(handle.stats().enqueued, 2);
    }

    #[tokio::test]
    async fn shared_handle_ends_exactly_once() {
        let Fixture {
            mut correlator,
            registry,
            ..
        } = fixture().await;
        let (sink, handle) = register(&registry, 1);
        registry.register(RunId::new(2), handle.clone());

        send(&mut correlator, 1, SessionEvent::Exited(ExitedBody::default())).await;
        assert!(!handle.is_ended(), "second run still references the report");
        send(&mut correlator, 2, ExecutionEvent::SessionTerminated).await;
        assert!(handle.is_ended());
        send(&mut correlator, 2, SessionEvent::Exited(ExitedBody::default())).await;

        let ends = sink
            .kinds()
            .into_iter()
            .filter(|kind| matches!(kind, ReportEventKind::RunEnded { .. }))
            .count();
        assert_eq!(ends, 1);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn termination_without_exit_clears_busy_items() {
        let Fixture {
            mut correlator,
            registry,
            tree,
        } = fixture().await;
        let (_sink, handle) = register(&registry, 1);

        send(&mut correlator, 1, started(ItemKind::Suite, "s1")).await;
        send(&mut correlator, 1, started(ItemKind::Test, "t1")).await;
        send(&mut correlator, 1, ExecutionEvent::SessionTerminated).await;

        assert!(handle.is_ended());
        assert!(!tree.lock().await.node(&"t1".into()).unwrap().is_busy());
    }

    #[tokio::test]
    async fn logs_are_tagged_with_the_innermost_active_item() {
        let Fixture {
            mut correlator,
            registry,
            ..
        } = fixture().await;
        let (sink, _handle) = register(&registry, 1);

        send(&mut correlator, 1, started(ItemKind::Suite, "s1")).await;
        send(&mut correlator, 1, SessionEvent::Log(LogBody::plain("in suite", LogLevel::Info))).await;
        send(&mut correlator, 1, started(ItemKind::Test, "t1")).await;
        send(&mut correlator, 1, SessionEvent::Log(LogBody::plain("in test", LogLevel::Warn))).await;
        send(&mut correlator, 1, SessionEvent::Ended(ended(ItemKind::Test, "t1", TestStatus::Pass))).await;
        let mut explicit = LogBody::plain("explicit", LogLevel::Info);
        explicit.item_id = Some("t2".into());
        send(&mut correlator, 1, SessionEvent::Message(explicit)).await;

        let items: Vec<_> = sink
            .kinds()
            .into_iter()
            .filter_map(|kind| match kind {
                ReportEventKind::Output { text, item, .. } => Some((text, item)),
                _ => None,
            })
            .collect();
        assert_eq!(
            items,
            vec![
                ("in suite".to_owned(), Some("s1".into())),
                ("in test".to_owned(), Some("t1".into())),
                ("explicit".to_owned(), Some("t2".into())),
            ]
        );
    }

    #[tokio::test]
    async fn suite_set_failed_is_reported_on_the_suite() {
        let Fixture {
            mut correlator,
            registry,
            ..
        } = fixture().await;
        let (sink, handle) = register(&registry, 1);

        send(&mut correlator, 1, SessionEvent::Ended(ended(ItemKind::Test, "t1", TestStatus::Fail))).await;
        send(&mut correlator, 1, SessionEvent::Ended(ended(ItemKind::Test, "t2", TestStatus::Fail))).await;
        let mut body = ended(ItemKind::Suite, "s1", TestStatus::Fail);
        body.attributes.message = Some("teardown failed".to_owned());
        send(&mut correlator, 1, SessionEvent::SetFailed(body)).await;

        assert_eq!(
            sink.kinds().last(),
            Some(&ReportEventKind::SuiteFailed {
                id: "s1".into(),
                status: TestStatus::Fail,
                messages: vec![ReportMessage::new("teardown failed")],
            })
        );
        let stats = handle.stats();
        assert_eq!(
            (stats.finished, stats.failed, stats.suites_failed),
            (2, 2, 1),
            "the suite isn't counted as a finished item"
        );
        assert!(stats.has_failures());
    }

    #[test]
    fn failure_messages_are_deduplicated_and_deepest_first() {
        let mut body = ended(ItemKind::Test, "t1", TestStatus::Fail);
        body.attributes.message = Some("inner boom".to_owned());
        body.failed_keywords = Some(vec![
            FailedKeyword {
                message: "outer".to_owned(),
                level: Some(LogLevel::Fail),
                source: None,
                lineno: None,
            },
            FailedKeyword {
                message: "inner boom".to_owned(),
                level: Some(LogLevel::Fail),
                source: Some("/p/kw.resource".into()),
                lineno: Some(9),
            },
        ]);

        assert_eq!(
            failure_messages(&body),
            vec![
                ReportMessage {
                    text: "inner boom".to_owned(),
                    location: Some(Location {
                        path: "/p/kw.resource".into(),
                        line: Some(9),
                    }),
                },
                ReportMessage::new("outer"),
            ]
        );

        body.attributes.message = Some("different".to_owned());
        body.attributes.source = Some("/p/suite.robot".into());
        body.attributes.lineno = Some(3);
        let messages = failure_messages(&body);
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].text, "different");
        assert_eq!(messages[0].location.as_ref().and_then(|l| l.line), Some(3));
    }
}
