// Copyright (c) The suitelink Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{DiagnosticsStore, NodeKey, NodeSnapshot, TreeNode, WorkspaceCache};
use camino::{Utf8Path, Utf8PathBuf};
use indexmap::{IndexMap, IndexSet};
use std::collections::{BTreeSet, HashMap};
use suitelink_metadata::{Diagnostic, DiagnosticsByUri, EntityKind, TestEntity, TestId};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

/// The test tree, shared between refreshes and run correlation.
///
/// All access goes through [`lock`](Self::lock), so reconciliations never overlap.
#[derive(Debug, Default)]
pub struct TestTreeStore {
    state: Mutex<TreeState>,
}

impl TestTreeStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires exclusive access to the tree.
    pub async fn lock(&self) -> MutexGuard<'_, TreeState> {
        self.state.lock().await
    }
}

/// Which children a reconciliation replaces.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum ReconcileScope {
    /// The top-level nodes of a workspace folder.
    Workspace(Utf8PathBuf),

    /// The children of a node.
    Node(TestId),
}

/// How deep a reconciliation descends into fresh entities.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Expand {
    /// Only into nodes whose children are already populated, plus workspace pseudo-roots.
    Resolved,

    /// Into every entity that carries children.
    All,
}

/// What a reconciliation changed.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ReconcileSummary {
    /// Nodes that were created.
    pub created: Vec<TestId>,

    /// Existing nodes whose presentation changed.
    pub updated: Vec<TestId>,

    /// Nodes that were removed, including descendants.
    pub removed: Vec<TestId>,
}

impl ReconcileSummary {
    /// Returns true if nothing changed.
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }

    fn merge(&mut self, other: ReconcileSummary) {
        self.created.extend(other.created);
        self.updated.extend(other.updated);
        self.removed.extend(other.removed);
    }
}

/// The result of applying a discovery to the tree.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct DiscoveryApplied {
    /// Node changes.
    pub summary: ReconcileSummary,

    /// Documents whose diagnostics changed.
    pub changed_diagnostics: BTreeSet<String>,
}

/// The state behind a [`TestTreeStore`].
#[derive(Debug, Default)]
pub struct TreeState {
    next_key: u64,
    nodes: HashMap<TestId, TreeNode>,
    roots: IndexMap<Utf8PathBuf, IndexSet<TestId>>,
    by_uri: HashMap<String, IndexSet<TestId>>,
    cache: WorkspaceCache,
    diagnostics: DiagnosticsStore,
}

impl TreeState {
    /// Returns the node with the given id.
    pub fn node(&self, id: &TestId) -> Option<&TreeNode> {
        self.nodes.get(id)
    }

    /// Returns the node with the given id, mutably.
    pub fn node_mut(&mut self, id: &TestId) -> Option<&mut TreeNode> {
        self.nodes.get_mut(id)
    }

    /// Returns the number of nodes in the tree.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if the tree has no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Returns the workspace folders that have top-level nodes.
    pub fn workspaces(&self) -> impl Iterator<Item = &Utf8Path> {
        self.roots.keys().map(Utf8PathBuf::as_path)
    }

    /// Returns the top-level nodes of a workspace folder.
    pub fn roots(&self, workspace: &Utf8Path) -> impl Iterator<Item = &TreeNode> {
        self.roots
            .get(workspace)
            .into_iter()
            .flatten()
            .filter_map(|id| self.nodes.get(id))
    }

    /// Returns the children of a node.
    pub fn children(&self, id: &TestId) -> impl Iterator<Item = &TreeNode> {
        self.nodes
            .get(id)
            .into_iter()
            .flat_map(|node| node.children.iter())
            .filter_map(|id| self.nodes.get(id))
    }

    /// Returns the workspace cache.
    pub fn cache(&self) -> &WorkspaceCache {
        &self.cache
    }

    /// Returns the workspace cache, mutably.
    pub fn cache_mut(&mut self) -> &mut WorkspaceCache {
        &mut self.cache
    }

    /// Returns the diagnostics store.
    pub fn diagnostics(&self) -> &DiagnosticsStore {
        &self.diagnostics
    }

    /// Returns the suite defined by the given document.
    pub fn suite_for_uri(&self, uri: &str) -> Option<&TreeNode> {
        self.by_uri
            .get(uri)?
            .iter()
            .filter_map(|id| self.nodes.get(id))
            .find(|node| node.kind() == EntityKind::Suite)
    }

    /// Returns the node with the given long-name in a workspace folder.
    ///
    /// Long-names are only unique within a workspace: two folders can each have a `Tests` suite.
    pub fn find_by_longname(&self, workspace: &Utf8Path, longname: &str) -> Option<&TreeNode> {
        self.nodes
            .values()
            .find(|node| node.workspace() == workspace && node.longname() == longname)
    }

    /// Returns the real suite wrapped by a workspace's pseudo-root.
    ///
    /// Tools emit exactly one suite under each workspace entity; anything else is logged and
    /// treated as "no suite".
    pub fn root_suite(&self, workspace: &Utf8Path) -> Option<&TreeNode> {
        let root = self.roots(workspace).find(|node| node.kind() == EntityKind::Workspace)?;
        let children: Vec<_> = self.children(root.id()).collect();
        match children.as_slice() {
            [suite] if suite.kind() == EntityKind::Suite => Some(*suite),
            [] => None,
            other => {
                warn!(
                    "workspace entity `{}` must wrap exactly one suite, found {}",
                    root.id(),
                    other.len()
                );
                None
            }
        }
    }

    /// Reconciles the children of `scope` against freshly discovered entities.
    ///
    /// Existing nodes are updated in place, new ids get new nodes, and nodes whose ids are absent
    /// are removed along with their subtrees.
    pub fn reconcile(
        &mut self,
        scope: &ReconcileScope,
        fresh: &[TestEntity],
        expand: Expand,
    ) -> ReconcileSummary {
        let mut summary = ReconcileSummary::default();
        match scope {
            ReconcileScope::Workspace(workspace) => {
                self.reconcile_children(workspace, None, fresh, expand, &mut summary);
            }
            ReconcileScope::Node(id) => {
                let Some(workspace) = self.nodes.get(id).map(|node| node.workspace().to_owned()) else {
                    debug!("not reconciling children of `{id}`: node no longer exists");
                    return summary;
                };
                self.reconcile_children(&workspace, Some(id), fresh, expand, &mut summary);
                if let Some(node) = self.nodes.get_mut(id) {
                    node.set_resolved();
                }
            }
        }
        summary
    }

    /// Applies a successful full discovery of a workspace.
    pub fn apply_workspace_discovery(
        &mut self,
        workspace: &Utf8Path,
        items: Vec<TestEntity>,
        diagnostics: DiagnosticsByUri,
    ) -> DiscoveryApplied {
        let summary = self.reconcile(
            &ReconcileScope::Workspace(workspace.to_owned()),
            &items,
            Expand::Resolved,
        );
        self.cache.set(workspace, items);
        let changed_diagnostics = self.diagnostics.replace_workspace(workspace, diagnostics);
        DiscoveryApplied {
            summary,
            changed_diagnostics,
        }
    }

    /// Applies a failed full discovery of a workspace: its nodes are replaced by one error node.
    pub fn apply_workspace_failure(
        &mut self,
        workspace: &Utf8Path,
        message: impl Into<String>,
    ) -> ReconcileSummary {
        self.cache.invalidate(workspace);
        let error = TestEntity::error(error_node_id(workspace.as_str()), message);
        self.reconcile(
            &ReconcileScope::Workspace(workspace.to_owned()),
            &[error],
            Expand::Resolved,
        )
    }

    /// Applies a successful discovery of one suite's tests.
    ///
    /// Returns `None` if the suite no longer exists.
    pub fn apply_suite_discovery(
        &mut self,
        suite: &TestId,
        items: Vec<TestEntity>,
        uri: &str,
        mut diagnostics: DiagnosticsByUri,
    ) -> Option<DiscoveryApplied> {
        let workspace = self.nodes.get(suite)?.workspace().to_owned();
        let summary = self.reconcile(
            &ReconcileScope::Node(suite.clone()),
            &items,
            Expand::Resolved,
        );
        self.cache.replace_children(&workspace, suite, items);

        let document: Vec<Diagnostic> = diagnostics.remove(uri).unwrap_or_default();
        let mut changed_diagnostics = BTreeSet::new();
        if self.diagnostics.replace_document(&workspace, uri, document) {
            changed_diagnostics.insert(uri.to_owned());
        }
        Some(DiscoveryApplied {
            summary,
            changed_diagnostics,
        })
    }

    /// Applies a failed discovery of one suite: its children are replaced by one error node.
    pub fn apply_suite_failure(
        &mut self,
        suite: &TestId,
        message: impl Into<String>,
    ) -> ReconcileSummary {
        let error = TestEntity::error(error_node_id(suite.as_str()), message);
        self.reconcile(&ReconcileScope::Node(suite.clone()), &[error], Expand::Resolved)
    }

    /// Populates the children of a node from the workspace cache.
    ///
    /// Returns `None` if the node or its cached entity doesn't exist, in which case the workspace
    /// must be rediscovered.
    pub fn resolve(&mut self, id: &TestId) -> Option<ReconcileSummary> {
        let workspace = self.nodes.get(id)?.workspace().to_owned();
        if !self.cache.is_valid(&workspace) {
            return None;
        }
        let children = self.cache.find_entity(&workspace, id)?.children().to_vec();
        Some(self.reconcile(&ReconcileScope::Node(id.clone()), &children, Expand::Resolved))
    }

    /// Populates every node of a workspace from the workspace cache.
    pub fn resolve_all(&mut self, workspace: &Utf8Path) -> ReconcileSummary {
        let items = self
            .cache
            .get(workspace)
            .map(|entry| entry.items.clone())
            .unwrap_or_default();
        if items.is_empty() {
            return ReconcileSummary::default();
        }
        self.reconcile(
            &ReconcileScope::Workspace(workspace.to_owned()),
            &items,
            Expand::All,
        )
    }

    /// Removes a workspace folder along with its nodes, cache entry and diagnostics.
    pub fn remove_workspace(&mut self, workspace: &Utf8Path) -> DiscoveryApplied {
        let mut summary = ReconcileSummary::default();
        if let Some(roots) = self.roots.shift_remove(workspace) {
            for id in &roots {
                self.remove_subtree(id, &mut summary);
            }
        }
        self.cache.remove(workspace);
        let changed_diagnostics = self.diagnostics.clear_workspace(workspace);
        DiscoveryApplied {
            summary,
            changed_diagnostics,
        }
    }

    /// Returns a serializable copy of a workspace's populated tree.
    pub fn snapshot(&self, workspace: &Utf8Path) -> Vec<NodeSnapshot> {
        self.roots(workspace)
            .map(|node| self.snapshot_node(node))
            .collect()
    }

    fn snapshot_node(&self, node: &TreeNode) -> NodeSnapshot {
        NodeSnapshot {
            id: node.id().clone(),
            kind: node.kind(),
            label: node.label().to_owned(),
            longname: node.longname().to_owned(),
            error: node.error().map(str::to_owned),
            tags: node.tags().to_vec(),
            children: self
                .children(node.id())
                .map(|child| self.snapshot_node(child))
                .collect(),
        }
    }

    // ---
    // Helper methods
    // ---

    fn reconcile_children(
        &mut self,
        workspace: &Utf8Path,
        parent: Option<&TestId>,
        fresh: &[TestEntity],
        expand: Expand,
        summary: &mut ReconcileSummary,
    ) {
        let mut fresh_ids = IndexSet::with_capacity(fresh.len());
        for entity in fresh {
            if !fresh_ids.insert(entity.id.clone()) {
                warn!("ignoring duplicate entity id `{}`", entity.id);
                continue;
            }
            self.upsert(workspace, parent, entity, expand, summary);
        }

        let existing = match parent {
            Some(parent) => self
                .nodes
                .get(parent)
                .map(|node| node.children.clone())
                .unwrap_or_default(),
            None => self.roots.get(workspace).cloned().unwrap_or_default(),
        };
        for stale in existing.iter().filter(|id| !fresh_ids.contains(*id)) {
            self.remove_subtree(stale, summary);
        }

        match parent {
            Some(parent) => {
                if let Some(node) = self.nodes.get_mut(parent) {
                    node.children = fresh_ids;
                }
            }
            None => {
                self.roots.insert(workspace.to_owned(), fresh_ids);
            }
        }
    }

    fn upsert(
        &mut self,
        workspace: &Utf8Path,
        parent: Option<&TestId>,
        entity: &TestEntity,
        expand: Expand,
        summary: &mut ReconcileSummary,
    ) {
        let descend = match self.nodes.get_mut(&entity.id) {
            Some(node) => {
                let old_uri = node.uri().map(str::to_owned);
                let old_parent = node.parent().cloned();
                let old_workspace = node.workspace().to_owned();
                let moved = old_parent.as_ref() != parent || old_workspace != workspace;

                if node.apply(entity) {
                    summary.updated.push(entity.id.clone());
                }
                node.reparent(workspace, parent);
                let descend = match expand {
                    Expand::All => true,
                    Expand::Resolved => node.is_resolved() || node.kind() == EntityKind::Workspace,
                };

                if moved {
                    debug!("node `{}` moved to a new parent", entity.id);
                    self.detach(&old_workspace, old_parent.as_ref(), &entity.id);
                }
                if old_uri.as_deref() != entity.uri.as_deref() {
                    if let Some(uri) = &old_uri {
                        self.unindex_uri(uri, &entity.id);
                    }
                    self.index_uri(entity);
                }
                descend
            }
            None => {
                let key = NodeKey::new(self.next_key);
                self.next_key += 1;
                self.nodes.insert(
                    entity.id.clone(),
                    TreeNode::new(key, workspace, parent, entity),
                );
                self.index_uri(entity);
                summary.created.push(entity.id.clone());
                expand == Expand::All || entity.kind == EntityKind::Workspace
            }
        };

        if descend && entity.kind.can_have_children() {
            if let Some(children) = &entity.children {
                let mut child_summary = ReconcileSummary::default();
                self.reconcile_children(
                    workspace,
                    Some(&entity.id),
                    children,
                    expand,
                    &mut child_summary,
                );
                summary.merge(child_summary);
                if let Some(node) = self.nodes.get_mut(&entity.id) {
                    node.set_resolved();
                }
            }
        }
    }

    fn detach(&mut self, workspace: &Utf8Path, parent: Option<&TestId>, id: &TestId) {
        let siblings = match parent {
            Some(parent) => self.nodes.get_mut(parent).map(|node| &mut node.children),
            None => self.roots.get_mut(workspace),
        };
        if let Some(siblings) = siblings {
            siblings.shift_remove(id);
        }
    }

    fn remove_subtree(&mut self, id: &TestId, summary: &mut ReconcileSummary) {
        let Some(node) = self.nodes.remove(id) else {
            return;
        };
        if let Some(uri) = node.uri() {
            self.unindex_uri(uri, id);
        }
        summary.removed.push(id.clone());
        for child in node.children() {
            self.remove_subtree(child, summary);
        }
    }

    fn index_uri(&mut self, entity: &TestEntity) {
        if let Some(uri) = &entity.uri {
            self.by_uri
                .entry(uri.clone())
                .or_default()
                .insert(entity.id.clone());
        }
    }

    fn unindex_uri(&mut self, uri: &str, id: &TestId) {
        if let Some(ids) = self.by_uri.get_mut(uri) {
            ids.shift_remove(id);
            if ids.is_empty() {
                self.by_uri.remove(uri);
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn uri_index_len(&self) -> usize {
        self.by_uri.values().map(IndexSet::len).sum()
    }
}

/// Returns the id of the error node synthesized for a failed discovery of `scope`.
pub fn error_node_id(scope: &str) -> TestId {
    TestId::new(format!("{scope}::error"))
}
