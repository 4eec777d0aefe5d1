// Copyright (c) The suitelink Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The test explorer: the orchestrator tying discovery, the tree, refreshes and runs together.
//!
//! A [`TestExplorer`] owns one [`TestTreeStore`] and receives editor and filesystem notifications
//! as [`ExplorerEvent`]s. Notifications turn into debounced refreshes, which run discovery and
//! reconcile the result into the tree. Run requests go through the run dispatcher, and the
//! sessions they start are correlated back into reports.

use crate::{
    cancel::CancelToken,
    config::{RunProfile, RunProfileList, SuitelinkConfig, WorkspaceConfigs},
    discovery::{Discover, DiscoveryClient, DiscoveryRequest, unsaved_in},
    errors::{DisplayErrorChain, ProfileNotFound},
    helpers::{owning_folder, path_to_uri, plural, uri_to_path},
    refresh::{RefreshExecutor, RefreshReason, RefreshRequest, RefreshScheduler, RefreshScope},
    reporter::{ExecutionEventCorrelator, ReportSink, TestRunHandle},
    runner::{
        CommandEnvironmentCheck, DispatchOutcome, EnvironmentCheck, EnvironmentGuard,
        LogRemediationPrompt, RemediationPrompt, RunDispatcher, RunRegistry, RunRequest,
    },
    session::{ProcessLauncher, SessionLauncher},
    tree::{DiscoveryApplied, ReconcileSummary, TestTreeStore},
};
use camino::{Utf8Path, Utf8PathBuf};
use futures::future::{BoxFuture, join_all};
use std::{
    collections::BTreeSet,
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};
use suitelink_metadata::{DiscoveryMode, TestId, UnsavedDocuments};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// How a file changed on disk.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FileChangeKind {
    /// The file was created.
    Created,

    /// The file's contents changed.
    Modified,

    /// The file was removed.
    Removed,
}

/// A notification from the editor or the filesystem.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ExplorerEvent {
    /// A file changed on disk.
    FileChanged {
        /// The file.
        path: Utf8PathBuf,

        /// How it changed.
        kind: FileChangeKind,
    },

    /// A document was opened in the editor.
    DocumentOpened {
        /// The document.
        uri: String,

        /// Its contents.
        text: String,
    },

    /// A document was edited but not saved.
    DocumentChanged {
        /// The document.
        uri: String,

        /// Its new contents.
        text: String,
    },

    /// A document was saved.
    DocumentSaved {
        /// The document.
        uri: String,
    },

    /// A document was closed.
    DocumentClosed {
        /// The document.
        uri: String,
    },

    /// Workspace folders were added or removed.
    WorkspaceFoldersChanged {
        /// Added folders.
        added: Vec<Utf8PathBuf>,

        /// Removed folders.
        removed: Vec<Utf8PathBuf>,
    },

    /// Configuration changed.
    ConfigurationChanged,

    /// The execution environment changed, for one workspace or all of them.
    EnvironmentChanged {
        /// The workspace, or `None` for every workspace.
        workspace: Option<Utf8PathBuf>,
    },

    /// A refresh was requested explicitly. Runs without debouncing.
    Refresh(RefreshScope),

    /// A node was expanded in the UI.
    ResolveNode(TestId),

    /// The discovery cache should be cleared.
    ClearCache,
}

/// A change to the tree, as published to the UI.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TreeChange {
    /// Nodes of a workspace were created, updated or removed.
    Reconciled {
        /// The workspace.
        workspace: Utf8PathBuf,

        /// What changed.
        summary: ReconcileSummary,
    },

    /// Diagnostics of these documents changed.
    DiagnosticsChanged {
        /// The documents.
        uris: BTreeSet<String>,
    },
}

/// Receives [`TreeChange`]s.
pub trait ChangeListener: Send + Sync {
    /// Called after each change has been applied to the tree.
    fn changed(&self, change: TreeChange);
}

/// A [`ChangeListener`] that ignores every change.
#[derive(Clone, Copy, Debug, Default)]
pub struct IgnoreChanges;

impl ChangeListener for IgnoreChanges {
    fn changed(&self, _change: TreeChange) {}
}

/// The external collaborators of a [`TestExplorer`].
#[derive(Clone)]
pub struct ExplorerServices {
    /// Runs discovery.
    pub discover: Arc<dyn Discover>,

    /// Starts run sessions.
    pub launcher: Arc<dyn SessionLauncher>,

    /// Validates execution environments.
    pub environment_check: Arc<dyn EnvironmentCheck>,

    /// Asks the user to fix invalid environments.
    pub remediation: Arc<dyn RemediationPrompt>,

    /// Receives tree changes.
    pub listener: Arc<dyn ChangeListener>,
}

impl ExplorerServices {
    /// Returns services backed by child processes.
    pub fn process_backed(listener: Arc<dyn ChangeListener>) -> Self {
        Self {
            discover: Arc::new(DiscoveryClient::new()),
            launcher: Arc::new(ProcessLauncher::new()),
            environment_check: Arc::new(CommandEnvironmentCheck::new()),
            remediation: Arc::new(LogRemediationPrompt::new()),
            listener,
        }
    }
}

impl fmt::Debug for ExplorerServices {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExplorerServices").finish_non_exhaustive()
    }
}

/// Performs refreshes against the tree. Shared between the explorer and its scheduler.
pub struct ExplorerCore {
    tree: Arc<TestTreeStore>,
    configs: Arc<WorkspaceConfigs>,
    discover: Arc<dyn Discover>,
    listener: Arc<dyn ChangeListener>,
    unsaved: Mutex<UnsavedDocuments>,
}

impl fmt::Debug for ExplorerCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExplorerCore")
            .field("tree", &self.tree)
            .finish_non_exhaustive()
    }
}

impl ExplorerCore {
    fn new(
        tree: Arc<TestTreeStore>,
        configs: Arc<WorkspaceConfigs>,
        discover: Arc<dyn Discover>,
        listener: Arc<dyn ChangeListener>,
    ) -> Self {
        Self {
            tree,
            configs,
            discover,
            listener,
            unsaved: Mutex::new(UnsavedDocuments::new()),
        }
    }

    /// Discovers everything in every workspace. Every cached discovery is invalidated first.
    pub async fn refresh_global(&self, cancel: &CancelToken) {
        self.tree.lock().await.cache_mut().invalidate_all();
        let workspaces = self.configs.workspaces();
        join_all(
            workspaces
                .iter()
                .map(|workspace| self.refresh_workspace(workspace, cancel)),
        )
        .await;
    }

    /// Discovers everything in one workspace and reconciles the result.
    ///
    /// On failure the workspace shows a single error node. On cancellation the tree is left
    /// untouched.
    pub async fn refresh_workspace(&self, workspace: &Utf8Path, cancel: &CancelToken) {
        let config = self.config(workspace);
        let mut request = DiscoveryRequest::workspace(workspace, config.tool_command());
        request.mode = config.discovery_mode();
        request.unsaved = unsaved_in(&self.unsaved(), workspace);

        let result = self.discover.discover(request, cancel.clone()).await;
        if cancel.is_cancelled() {
            debug!("refresh of `{workspace}` cancelled, keeping previous tree");
            return;
        }

        let mut tree = self.tree.lock().await;
        match result {
            Ok(output) => {
                let (items, diagnostics) = output.into_parts();
                let applied = tree.apply_workspace_discovery(workspace, items, diagnostics);
                drop(tree);
                self.publish(workspace, applied);
            }
            Err(err) if err.is_cancelled() => {
                debug!("refresh of `{workspace}` cancelled, keeping previous tree");
            }
            Err(err) => {
                warn!(
                    "discovery failed for `{workspace}`: {}",
                    DisplayErrorChain(&err)
                );
                let summary = tree.apply_workspace_failure(workspace, err.node_message());
                drop(tree);
                self.publish(
                    workspace,
                    DiscoveryApplied {
                        summary,
                        changed_diagnostics: BTreeSet::new(),
                    },
                );
            }
        }
    }

    /// Rediscovers the suite defined by a document.
    ///
    /// Falls back to a workspace refresh if the document doesn't define a known suite, or if the
    /// workspace hasn't been discovered successfully yet.
    pub async fn refresh_document(&self, workspace: &Utf8Path, uri: &str, cancel: &CancelToken) {
        let suite = {
            let tree = self.tree.lock().await;
            if tree.cache().is_valid(workspace) {
                tree.suite_for_uri(uri).map(|node| {
                    (
                        node.id().clone(),
                        node.longname().to_owned(),
                        node.rel_source().map(Utf8Path::to_owned),
                    )
                })
            } else {
                None
            }
        };
        let Some((suite_id, longname, rel_source)) = suite else {
            debug!("no suite known for `{uri}`, refreshing `{workspace}` instead");
            return self.refresh_workspace(workspace, cancel).await;
        };

        let config = self.config(workspace);
        let mut request = DiscoveryRequest::workspace(workspace, config.tool_command());
        request.mode = DiscoveryMode::Tests;
        request.suite = Some(longname);
        request.parse_include = rel_source.into_iter().collect();
        request.unsaved = unsaved_in(&self.unsaved(), workspace);

        let result = self.discover.discover(request, cancel.clone()).await;
        if cancel.is_cancelled() {
            debug!("refresh of `{uri}` cancelled, keeping previous tree");
            return;
        }

        let mut tree = self.tree.lock().await;
        match result {
            Ok(output) => {
                let (items, diagnostics) = output.into_parts();
                match tree.apply_suite_discovery(&suite_id, items, uri, diagnostics) {
                    Some(applied) => {
                        drop(tree);
                        self.publish(workspace, applied);
                    }
                    None => {
                        drop(tree);
                        debug!("suite `{suite_id}` vanished, refreshing `{workspace}` instead");
                        self.refresh_workspace(workspace, cancel).await;
                    }
                }
            }
            Err(err) if err.is_cancelled() => {
                debug!("refresh of `{uri}` cancelled, keeping previous tree");
            }
            Err(err) => {
                warn!("discovery failed for `{uri}`: {}", DisplayErrorChain(&err));
                let summary = tree.apply_suite_failure(&suite_id, err.node_message());
                drop(tree);
                self.publish(
                    workspace,
                    DiscoveryApplied {
                        summary,
                        changed_diagnostics: BTreeSet::new(),
                    },
                );
            }
        }
    }

    /// Records the contents of an unsaved document. Returns false if they're unchanged.
    fn set_unsaved(&self, uri: &str, text: String) -> bool {
        let mut unsaved = self.unsaved();
        if unsaved.get(uri) == Some(&text) {
            return false;
        }
        unsaved.insert(uri.to_owned(), text);
        true
    }

    fn remove_unsaved(&self, uri: &str) -> bool {
        self.unsaved().remove(uri).is_some()
    }

    fn is_open(&self, uri: &str) -> bool {
        self.unsaved().contains_key(uri)
    }

    fn config(&self, workspace: &Utf8Path) -> Arc<SuitelinkConfig> {
        match self.configs.get(workspace) {
            Some(config) => config,
            None => self.configs.load(workspace),
        }
    }

    fn unsaved(&self) -> MutexGuard<'_, UnsavedDocuments> {
        self.unsaved.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, workspace: &Utf8Path, applied: DiscoveryApplied) {
        self.publish_summary(workspace, applied.summary);
        if !applied.changed_diagnostics.is_empty() {
            self.listener.changed(TreeChange::DiagnosticsChanged {
                uris: applied.changed_diagnostics,
            });
        }
    }

    fn publish_summary(&self, workspace: &Utf8Path, summary: ReconcileSummary) {
        if summary.is_empty() {
            return;
        }
        let changed = summary.created.len() + summary.updated.len() + summary.removed.len();
        debug!(
            "`{workspace}`: {changed} {} changed ({} created, {} updated, {} removed)",
            plural::nodes_str(changed),
            summary.created.len(),
            summary.updated.len(),
            summary.removed.len()
        );
        self.listener.changed(TreeChange::Reconciled {
            workspace: workspace.to_owned(),
            summary,
        });
    }
}

impl RefreshExecutor for ExplorerCore {
    fn execute(
        self: Arc<Self>,
        request: RefreshRequest,
        cancel: CancelToken,
    ) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            match &request.scope {
                RefreshScope::Global => self.refresh_global(&cancel).await,
                RefreshScope::Workspace(workspace) => {
                    self.refresh_workspace(workspace, &cancel).await
                }
                RefreshScope::Document { workspace, uri } => {
                    self.refresh_document(workspace, uri, &cancel).await
                }
            }
        })
    }
}

/// The orchestrator.
///
/// Must be created within a Tokio runtime: it spawns the task correlating session events.
pub struct TestExplorer {
    core: Arc<ExplorerCore>,
    configs: Arc<WorkspaceConfigs>,
    scheduler: RefreshScheduler,
    dispatcher: RunDispatcher,
    environment: Arc<EnvironmentGuard>,
    profiles: RunProfileList,
    registry: Arc<RunRegistry>,
}

impl fmt::Debug for TestExplorer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestExplorer")
            .field("workspaces", &self.configs.workspaces())
            .field("scheduler", &self.scheduler)
            .finish_non_exhaustive()
    }
}

impl TestExplorer {
    /// Creates a new explorer with no workspace folders.
    ///
    /// `config_file` is layered on top of every workspace's own configuration.
    pub fn new(config_file: Option<Utf8PathBuf>, services: ExplorerServices) -> Self {
        let tree = Arc::new(TestTreeStore::new());
        let configs = Arc::new(WorkspaceConfigs::new(config_file));
        let registry = Arc::new(RunRegistry::new());
        let environment = Arc::new(EnvironmentGuard::new(
            services.environment_check,
            services.remediation,
        ));

        let (sender, receiver) = mpsc::unbounded_channel();
        let correlator = ExecutionEventCorrelator::new(tree.clone(), registry.clone());
        tokio::spawn(correlator.run(receiver));

        let core = Arc::new(ExplorerCore::new(
            tree.clone(),
            configs.clone(),
            services.discover,
            services.listener,
        ));
        let scheduler = RefreshScheduler::new(core.clone());
        let dispatcher = RunDispatcher::new(
            tree,
            configs.clone(),
            registry.clone(),
            services.launcher,
            environment.clone(),
            sender,
        );

        Self {
            core,
            configs,
            scheduler,
            dispatcher,
            environment,
            profiles: RunProfileList::new(),
            registry,
        }
    }

    /// Returns the test tree.
    pub fn tree(&self) -> &Arc<TestTreeStore> {
        &self.core.tree
    }

    /// Returns the workspace folders, in the order they were added.
    pub fn workspaces(&self) -> Vec<Utf8PathBuf> {
        self.configs.workspaces()
    }

    /// Returns the number of runs whose sessions haven't terminated yet.
    pub fn active_runs(&self) -> usize {
        self.registry.len()
    }

    /// Returns the run profiles, in definition order.
    pub async fn profiles(&self) -> Vec<Arc<RunProfile>> {
        self.profiles.all().await
    }

    /// Processes notifications until the channel closes, then cancels outstanding refreshes.
    pub async fn run(&self, mut events: mpsc::UnboundedReceiver<ExplorerEvent>) {
        while let Some(event) = events.recv().await {
            self.handle_event(event).await;
        }
        debug!("explorer event channel closed");
        self.shutdown();
    }

    /// Processes one notification.
    pub async fn handle_event(&self, event: ExplorerEvent) {
        match event {
            ExplorerEvent::FileChanged { path, kind } => self.on_file_changed(&path, kind),
            ExplorerEvent::DocumentOpened { uri, text }
            | ExplorerEvent::DocumentChanged { uri, text } => {
                if self.core.set_unsaved(&uri, text) {
                    self.schedule_document(&uri);
                }
            }
            ExplorerEvent::DocumentSaved { uri } => self.schedule_document(&uri),
            ExplorerEvent::DocumentClosed { uri } => {
                if self.core.remove_unsaved(&uri) {
                    self.schedule_document(&uri);
                }
            }
            ExplorerEvent::WorkspaceFoldersChanged { added, removed } => {
                self.on_workspace_folders_changed(added, removed).await;
            }
            ExplorerEvent::ConfigurationChanged => {
                info!("configuration changed, reloading");
                self.configs.reload_all();
                self.rebuild_profiles().await;
                self.environment.invalidate_all();
                self.scheduler.schedule(
                    RefreshRequest::new(RefreshScope::Global, RefreshReason::ConfigurationChanged),
                    Duration::ZERO,
                );
            }
            ExplorerEvent::EnvironmentChanged { workspace } => {
                let scope = match workspace {
                    Some(workspace) => {
                        self.environment.invalidate(&workspace);
                        RefreshScope::Workspace(workspace)
                    }
                    None => {
                        self.environment.invalidate_all();
                        RefreshScope::Global
                    }
                };
                self.scheduler.schedule(
                    RefreshRequest::new(scope, RefreshReason::EnvironmentChanged),
                    Duration::ZERO,
                );
            }
            ExplorerEvent::Refresh(scope) => {
                self.scheduler
                    .schedule(RefreshRequest::new(scope, RefreshReason::Manual), Duration::ZERO);
            }
            ExplorerEvent::ResolveNode(id) => self.resolve_node(&id).await,
            ExplorerEvent::ClearCache => self.clear_cache().await,
        }
    }

    /// Adds workspace folders and discovers them.
    pub async fn add_workspaces(&self, folders: impl IntoIterator<Item = Utf8PathBuf>) {
        self.on_workspace_folders_changed(folders.into_iter().collect(), Vec::new())
            .await;
    }

    /// Invalidates every cached discovery and rediscovers every workspace.
    pub async fn clear_cache(&self) {
        self.core.tree.lock().await.cache_mut().invalidate_all();
        self.scheduler.schedule(
            RefreshRequest::new(RefreshScope::Global, RefreshReason::CacheCleared),
            Duration::ZERO,
        );
    }

    /// Completes once no refresh is waiting or running.
    pub async fn wait_idle(&self) {
        self.scheduler.wait_idle().await;
    }

    /// Populates the children of a node, rediscovering its workspace first if the cache is stale.
    ///
    /// Rediscovery goes through the refresh scheduler: a waiting or running refresh covering the
    /// workspace is awaited, and otherwise an immediate one is scheduled.
    pub async fn resolve_node(&self, id: &TestId) {
        let workspace = {
            let mut tree = self.core.tree.lock().await;
            let Some(workspace) = tree.node(id).map(|node| node.workspace().to_owned()) else {
                debug!("not resolving `{id}`: node no longer exists");
                return;
            };
            if let Some(summary) = tree.resolve(id) {
                drop(tree);
                self.core.publish_summary(&workspace, summary);
                return;
            }
            workspace
        };

        let scope = RefreshScope::Workspace(workspace.clone());
        if !self.scheduler.is_covered(&scope) {
            self.scheduler.schedule(
                RefreshRequest::new(scope.clone(), RefreshReason::NodeExpanded),
                Duration::ZERO,
            );
        }
        self.scheduler.wait_covering(&scope).await;

        let summary = self.core.tree.lock().await.resolve(id);
        match summary {
            Some(summary) => self.core.publish_summary(&workspace, summary),
            None => debug!("`{id}` could not be resolved after rediscovery"),
        }
    }

    /// Runs tests with the named profile, or the default profile if `profile` is `None`.
    ///
    /// The returned report ends once every session started for it has terminated, or right away
    /// if none started.
    pub async fn run_tests(
        &self,
        included: Vec<TestId>,
        excluded: Vec<TestId>,
        profile: Option<&str>,
        sink: Arc<dyn ReportSink>,
    ) -> Result<(Arc<TestRunHandle>, DispatchOutcome), ProfileNotFound> {
        let profile = self.profiles.get(profile).await?;
        self.resolve_for_run(&included).await;
        let handle = Arc::new(TestRunHandle::new(profile.description(), sink));
        let request = RunRequest {
            included,
            excluded,
            profile,
        };
        let outcome = self.dispatcher.run(&request, handle.clone()).await;
        Ok((handle, outcome))
    }

    /// Cancels every pending and running refresh. Running tests are not affected.
    pub fn shutdown(&self) {
        self.scheduler.cancel_all();
    }

    // ---
    // Helper methods
    // ---

    /// Populates every subtree a run can reach from the workspace caches. Results are correlated
    /// against tree nodes, so nodes that were never expanded must exist before sessions start.
    async fn resolve_for_run(&self, included: &[TestId]) {
        let mut tree = self.core.tree.lock().await;
        let workspaces: BTreeSet<Utf8PathBuf> = if included.is_empty() {
            self.configs.workspaces().into_iter().collect()
        } else {
            included
                .iter()
                .filter_map(|id| tree.node(id))
                .map(|node| node.workspace().to_owned())
                .collect()
        };
        let summaries: Vec<_> = workspaces
            .into_iter()
            .map(|workspace| {
                let summary = tree.resolve_all(&workspace);
                (workspace, summary)
            })
            .collect();
        drop(tree);

        for (workspace, summary) in summaries {
            self.core.publish_summary(&workspace, summary);
        }
    }

    fn on_file_changed(&self, path: &Utf8Path, kind: FileChangeKind) {
        let workspaces = self.configs.workspaces();
        let Some(workspace) = owning_folder(&workspaces, path) else {
            return;
        };
        let Some(config) = self.configs.get(workspace) else {
            return;
        };

        let scope = if config.is_project_file(path) {
            RefreshScope::Workspace(workspace.clone())
        } else if config.is_test_source(path) {
            match (kind, path_to_uri(path)) {
                // Open documents are refreshed from their editor contents instead.
                (FileChangeKind::Modified, Some(uri)) if self.core.is_open(&uri) => return,
                (FileChangeKind::Modified, Some(uri)) => RefreshScope::Document {
                    workspace: workspace.clone(),
                    uri,
                },
                _ => RefreshScope::Workspace(workspace.clone()),
            }
        } else if kind == FileChangeKind::Removed && path.extension().is_none() {
            // Possibly a directory full of suites.
            RefreshScope::Workspace(workspace.clone())
        } else {
            return;
        };
        self.scheduler.schedule(
            RefreshRequest::new(scope, RefreshReason::FileChanged),
            config.debounce(),
        );
    }

    fn schedule_document(&self, uri: &str) {
        let Some(path) = uri_to_path(uri) else {
            return;
        };
        let workspaces = self.configs.workspaces();
        let Some(workspace) = owning_folder(&workspaces, &path) else {
            return;
        };
        let Some(config) = self.configs.get(workspace) else {
            return;
        };
        if !config.is_test_source(&path) {
            return;
        }
        self.scheduler.schedule(
            RefreshRequest::new(
                RefreshScope::Document {
                    workspace: workspace.clone(),
                    uri: uri.to_owned(),
                },
                RefreshReason::DocumentChanged,
            ),
            config.debounce(),
        );
    }

    async fn on_workspace_folders_changed(
        &self,
        added: Vec<Utf8PathBuf>,
        removed: Vec<Utf8PathBuf>,
    ) {
        for workspace in &removed {
            info!("removing workspace `{workspace}`");
            self.configs.remove(workspace);
            self.environment.invalidate(workspace);
            let applied = self.core.tree.lock().await.remove_workspace(workspace);
            self.core.publish(workspace, applied);
        }
        for workspace in &added {
            info!("adding workspace `{workspace}`");
            self.configs.load(workspace);
        }
        if !added.is_empty() || !removed.is_empty() {
            self.rebuild_profiles().await;
            let count = self.configs.workspaces().len();
            debug!("now tracking {count} {}", plural::workspaces_str(count));
        }
        for workspace in added {
            self.scheduler.schedule(
                RefreshRequest::new(
                    RefreshScope::Workspace(workspace),
                    RefreshReason::WorkspaceFoldersChanged,
                ),
                Duration::ZERO,
            );
        }
    }

    async fn rebuild_profiles(&self) {
        let configs: Vec<_> = self
            .configs
            .workspaces()
            .iter()
            .filter_map(|workspace| self.configs.get(workspace))
            .collect();
        self.profiles
            .rebuild(configs.iter().map(|config| config.run_profiles()))
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        errors::{DiscoveryError, EnvironmentError, SessionStartError},
        reporter::{RecordingReport, ReportEventKind},
        session::{DebugSession, SessionCommand},
    };
    use pretty_assertions::assert_eq;
    use std::collections::VecDeque;
    use suitelink_metadata::{
        DiscoveryOutput, EndedAttributes, EndedBody, EnqueuedBody, EntityKind, ExitedBody,
        ItemKind, LaunchConfig, SessionEvent, StartedAttributes, StartedBody, TestEntity,
        TestStatus,
    };

    /// Answers discovery requests from a queue of canned results.
    #[derive(Default)]
    struct FakeDiscover {
        results: Mutex<VecDeque<Result<DiscoveryOutput, DiscoveryError>>>,
        requests: Mutex<Vec<DiscoveryRequest>>,
    }

    impl FakeDiscover {
        fn push(&self, result: Result<DiscoveryOutput, DiscoveryError>) {
            self.results.lock().unwrap().push_back(result);
        }

        fn requests(&self) -> Vec<DiscoveryRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    impl Discover for FakeDiscover {
        fn discover<'a>(
            &'a self,
            request: DiscoveryRequest,
            _cancel: CancelToken,
        ) -> BoxFuture<'a, Result<DiscoveryOutput, DiscoveryError>> {
            self.requests.lock().unwrap().push(request);
            let result = self
                .results
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(DiscoveryOutput::default()));
            Box::pin(async move { result })
        }
    }

    /// Replays a fixed list of events for every session.
    struct ScriptedLauncher {
        script: Vec<SessionEvent>,
    }

    impl SessionLauncher for ScriptedLauncher {
        fn launch<'a>(
            &'a self,
            _command: &'a SessionCommand,
            config: LaunchConfig,
        ) -> BoxFuture<'a, Result<DebugSession, SessionStartError>> {
            let (sender, events) = mpsc::unbounded_channel();
            for event in &self.script {
                let _ = sender.send(event.clone());
            }
            Box::pin(async move {
                Ok(DebugSession {
                    run_id: config.run_id,
                    events,
                })
            })
        }
    }

    struct AlwaysValid;

    impl EnvironmentCheck for AlwaysValid {
        fn check<'a>(
            &'a self,
            _workspace: &'a Utf8Path,
            _command: &'a [String],
        ) -> BoxFuture<'a, Result<(), EnvironmentError>> {
            Box::pin(async { Ok(()) })
        }
    }

    #[derive(Default)]
    struct RecordingListener {
        changes: Mutex<Vec<TreeChange>>,
    }

    impl ChangeListener for RecordingListener {
        fn changed(&self, change: TreeChange) {
            self.changes.lock().unwrap().push(change);
        }
    }

    fn items(test_name: &str) -> DiscoveryOutput {
        let mut test = TestEntity::new("t1", EntityKind::Test, test_name);
        test.longname = format!("Root.{test_name}");
        let mut suite = TestEntity::new("s1", EntityKind::Suite, "Root");
        suite.longname = "Root".to_owned();
        suite.uri = Some("file:///p/root.robot".to_owned());
        suite.rel_source = Some("root.robot".into());
        suite.children = Some(vec![test]);
        let mut ws = TestEntity::new("ws", EntityKind::Workspace, "p");
        ws.children = Some(vec![suite]);
        DiscoveryOutput {
            items: Some(vec![ws]),
            diagnostics: None,
        }
    }

    fn explorer(
        discover: Arc<FakeDiscover>,
        script: Vec<SessionEvent>,
    ) -> (TestExplorer, Arc<RecordingListener>) {
        let listener = Arc::new(RecordingListener::default());
        let services = ExplorerServices {
            discover,
            launcher: Arc::new(ScriptedLauncher { script }),
            environment_check: Arc::new(AlwaysValid),
            remediation: Arc::new(LogRemediationPrompt::new()),
            listener: listener.clone(),
        };
        (TestExplorer::new(None, services), listener)
    }

    #[tokio::test]
    async fn discovery_failure_then_recovery() {
        let discover = Arc::new(FakeDiscover::default());
        discover.push(Err(DiscoveryError::CommandFailed {
            exit_code: Some(1),
            stdout: String::new(),
            stderr: "parse error\n".to_owned(),
        }));
        discover.push(Ok(items("Foo")));
        let (explorer, _listener) = explorer(discover.clone(), Vec::new());

        explorer.add_workspaces(["/p".into()]).await;
        explorer.wait_idle().await;
        {
            let tree = explorer.tree().lock().await;
            let roots: Vec<_> = tree.roots(Utf8Path::new("/p")).collect();
            assert_eq!(roots.len(), 1);
            assert_eq!(roots[0].kind(), EntityKind::Error);
            assert_eq!(roots[0].error(), Some("parse error"));
        }

        explorer
            .handle_event(ExplorerEvent::Refresh(RefreshScope::Workspace("/p".into())))
            .await;
        explorer.wait_idle().await;
        let tree = explorer.tree().lock().await;
        let roots: Vec<_> = tree
            .roots(Utf8Path::new("/p"))
            .map(|node| node.id().as_str())
            .collect();
        assert_eq!(roots, vec!["ws"]);
        assert_eq!(discover.requests().len(), 2);
    }

    #[tokio::test]
    async fn cancelled_discovery_keeps_the_tree() {
        let discover = Arc::new(FakeDiscover::default());
        discover.push(Ok(items("Foo")));
        discover.push(Err(DiscoveryError::Cancelled));
        let (explorer, _listener) = explorer(discover.clone(), Vec::new());

        explorer.add_workspaces(["/p".into()]).await;
        explorer.wait_idle().await;
        let before = explorer.tree().lock().await.snapshot(Utf8Path::new("/p"));

        explorer
            .handle_event(ExplorerEvent::Refresh(RefreshScope::Workspace("/p".into())))
            .await;
        explorer.wait_idle().await;
        assert_eq!(
            explorer.tree().lock().await.snapshot(Utf8Path::new("/p")),
            before
        );
    }

    #[tokio::test]
    async fn clear_cache_rediscovers_every_workspace() {
        let discover = Arc::new(FakeDiscover::default());
        discover.push(Ok(items("Foo")));
        discover.push(Ok(items("Bar")));
        let (explorer, _listener) = explorer(discover.clone(), Vec::new());
        explorer.add_workspaces(["/p".into()]).await;
        explorer.wait_idle().await;

        explorer.handle_event(ExplorerEvent::ClearCache).await;
        explorer.wait_idle().await;

        assert_eq!(discover.requests().len(), 2);
        let mut tree = explorer.tree().lock().await;
        assert!(tree.cache().is_valid(Utf8Path::new("/p")));
        tree.resolve_all(Utf8Path::new("/p"));
        let labels: Vec<_> = tree
            .children(&"s1".into())
            .map(|node| node.label().to_owned())
            .collect();
        assert_eq!(labels, vec!["Bar".to_owned()]);
    }

    #[tokio::test]
    async fn document_refresh_targets_its_suite() {
        let discover = Arc::new(FakeDiscover::default());
        discover.push(Ok(items("Foo")));
        let (explorer, listener) = explorer(discover.clone(), Vec::new());
        explorer.add_workspaces(["/p".into()]).await;
        explorer.wait_idle().await;

        let mut renamed = TestEntity::new("t2", EntityKind::Test, "Bar");
        renamed.longname = "Root.Bar".to_owned();
        discover.push(Ok(DiscoveryOutput {
            items: Some(vec![renamed]),
            diagnostics: None,
        }));
        explorer
            .core
            .refresh_document(
                Utf8Path::new("/p"),
                "file:///p/root.robot",
                &CancelToken::never(),
            )
            .await;

        let request = discover.requests().pop().expect("document discovery ran");
        assert_eq!(request.mode, DiscoveryMode::Tests);
        assert_eq!(request.suite.as_deref(), Some("Root"));
        assert_eq!(request.parse_include, vec![Utf8PathBuf::from("root.robot")]);

        let tree = explorer.tree().lock().await;
        let children: Vec<_> = tree
            .children(&"s1".into())
            .map(|node| node.label().to_owned())
            .collect();
        assert_eq!(children, vec!["Bar".to_owned()]);
        assert!(
            listener
                .changes
                .lock()
                .unwrap()
                .iter()
                .any(|change| matches!(change, TreeChange::Reconciled { .. }))
        );
    }

    #[tokio::test]
    async fn unknown_document_falls_back_to_workspace_refresh() {
        let discover = Arc::new(FakeDiscover::default());
        let (explorer, _listener) = explorer(discover.clone(), Vec::new());
        explorer.add_workspaces(["/p".into()]).await;
        explorer.wait_idle().await;

        explorer
            .core
            .refresh_document(Utf8Path::new("/p"), "file:///p/new.robot", &CancelToken::never())
            .await;
        let requests = discover.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].mode, DiscoveryMode::All);
    }

    fn passing_session(test: &str) -> Vec<SessionEvent> {
        vec![
            SessionEvent::Enqueued(EnqueuedBody {
                items: vec![test.into()],
            }),
            SessionEvent::Started(StartedBody {
                kind: ItemKind::Test,
                id: test.into(),
                attributes: StartedAttributes::default(),
            }),
            SessionEvent::Ended(EndedBody {
                kind: ItemKind::Test,
                id: test.into(),
                attributes: EndedAttributes {
                    status: TestStatus::Pass,
                    message: None,
                    elapsedtime: None,
                    source: None,
                    lineno: None,
                    tags: Vec::new(),
                },
                failed_keywords: None,
            }),
            SessionEvent::Exited(ExitedBody::default()),
        ]
    }

    fn finished_count(sink: &RecordingReport) -> usize {
        sink.kinds()
            .into_iter()
            .filter(|kind| matches!(kind, ReportEventKind::Finished { .. }))
            .count()
    }

    #[tokio::test]
    async fn run_reports_until_exited() {
        let discover = Arc::new(FakeDiscover::default());
        discover.push(Ok(items("Foo")));
        let (explorer, _listener) = explorer(discover, passing_session("t1"));
        explorer.add_workspaces(["/p".into()]).await;
        explorer.wait_idle().await;
        explorer.handle_event(ExplorerEvent::ResolveNode("s1".into())).await;

        let sink = Arc::new(RecordingReport::new());
        let (handle, outcome) = explorer
            .run_tests(vec!["t1".into()], Vec::new(), None, sink.clone())
            .await
            .expect("default profile exists");
        assert_eq!(outcome.started.len(), 1);
        handle.wait_ended().await;

        assert_eq!(finished_count(&sink), 1);
        assert_eq!(handle.stats().passed, 1);
        assert_eq!(explorer.active_runs(), 0);
    }

    #[tokio::test]
    async fn running_an_unexpanded_suite_reports_its_tests() {
        let discover = Arc::new(FakeDiscover::default());
        discover.push(Ok(items("Foo")));
        let (explorer, listener) = explorer(discover, passing_session("t1"));
        explorer.add_workspaces(["/p".into()]).await;
        explorer.wait_idle().await;
        assert!(
            explorer.tree().lock().await.node(&"t1".into()).is_none(),
            "discovery alone doesn't populate suites"
        );

        let sink = Arc::new(RecordingReport::new());
        let (handle, outcome) = explorer
            .run_tests(vec!["s1".into()], Vec::new(), None, sink.clone())
            .await
            .expect("default profile exists");
        assert_eq!(outcome.started.len(), 1);
        handle.wait_ended().await;

        assert_eq!(finished_count(&sink), 1);
        let stats = handle.stats();
        assert_eq!((stats.finished, stats.passed), (1, 1));
        assert!(
            listener.changes.lock().unwrap().iter().any(|change| matches!(
                change,
                TreeChange::Reconciled { summary, .. } if summary.created.contains(&"t1".into())
            )),
            "nodes populated for the run are published"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn resolving_waits_for_a_pending_workspace_refresh() {
        let discover = Arc::new(FakeDiscover::default());
        discover.push(Ok(items("Foo")));
        discover.push(Ok(items("Bar")));
        let (explorer, _listener) = explorer(discover.clone(), Vec::new());
        explorer.add_workspaces(["/p".into()]).await;
        explorer.wait_idle().await;

        explorer
            .tree()
            .lock()
            .await
            .cache_mut()
            .invalidate(Utf8Path::new("/p"));
        let debounce = Duration::from_secs(1);
        explorer.scheduler.schedule(
            RefreshRequest::new(
                RefreshScope::Workspace("/p".into()),
                RefreshReason::FileChanged,
            ),
            debounce,
        );
        let start = tokio::time::Instant::now();

        explorer.handle_event(ExplorerEvent::ResolveNode("s1".into())).await;
        assert!(start.elapsed() >= debounce, "resolved after the pending refresh fired");
        assert_eq!(
            discover.requests().len(),
            2,
            "the pending refresh is the only rediscovery"
        );

        let tree = explorer.tree().lock().await;
        let children: Vec<_> = tree
            .children(&"s1".into())
            .map(|node| node.label().to_owned())
            .collect();
        assert_eq!(children, vec!["Bar".to_owned()]);
    }

    #[tokio::test]
    async fn resolving_a_stale_node_schedules_a_refresh() {
        let discover = Arc::new(FakeDiscover::default());
        discover.push(Ok(items("Foo")));
        discover.push(Ok(items("Bar")));
        let (explorer, _listener) = explorer(discover.clone(), Vec::new());
        explorer.add_workspaces(["/p".into()]).await;
        explorer.wait_idle().await;
        explorer
            .tree()
            .lock()
            .await
            .cache_mut()
            .invalidate(Utf8Path::new("/p"));

        explorer.resolve_node(&"s1".into()).await;
        assert_eq!(discover.requests().len(), 2);
        assert_eq!(explorer.scheduler.pending_len(), 0);
        let tree = explorer.tree().lock().await;
        assert_eq!(
            tree.node(&"t1".into()).map(|node| node.label().to_owned()),
            Some("Bar".to_owned())
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn file_changes_use_percent_encoded_uris() {
        let discover = Arc::new(FakeDiscover::default());
        discover.push(Ok(items("Foo")));
        let (explorer, _listener) = explorer(discover, Vec::new());
        explorer.add_workspaces(["/p".into()]).await;
        explorer.wait_idle().await;

        explorer
            .handle_event(ExplorerEvent::FileChanged {
                path: "/p/my suite.robot".into(),
                kind: FileChangeKind::Modified,
            })
            .await;
        assert!(explorer.scheduler.is_covered(&RefreshScope::Document {
            workspace: "/p".into(),
            uri: "file:///p/my%20suite.robot".to_owned(),
        }));
        assert!(!explorer.scheduler.is_covered(&RefreshScope::Workspace("/p".into())));
        explorer.shutdown();
    }

    #[tokio::test]
    async fn unknown_profile_is_an_error() {
        let (explorer, _listener) = explorer(Arc::new(FakeDiscover::default()), Vec::new());
        explorer.add_workspaces(["/p".into()]).await;
        let err = explorer
            .run_tests(Vec::new(), Vec::new(), Some("nope"), Arc::new(RecordingReport::new()))
            .await
            .expect_err("profile doesn't exist");
        assert_eq!(
            err.to_string(),
            "run profile `nope` not found (known profiles: debug, run)"
        );
    }

    #[tokio::test]
    async fn removing_a_workspace_clears_its_nodes() {
        let discover = Arc::new(FakeDiscover::default());
        discover.push(Ok(items("Foo")));
        let (explorer, listener) = explorer(discover, Vec::new());
        explorer.add_workspaces(["/p".into()]).await;
        explorer.wait_idle().await;

        explorer
            .handle_event(ExplorerEvent::WorkspaceFoldersChanged {
                added: Vec::new(),
                removed: vec!["/p".into()],
            })
            .await;
        assert!(explorer.tree().lock().await.is_empty());
        assert!(explorer.workspaces().is_empty());
        let last = listener.changes.lock().unwrap().last().cloned();
        assert!(matches!(last, Some(TreeChange::Reconciled { .. })));
    }
}
