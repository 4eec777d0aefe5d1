// Copyright (c) The suitelink Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexSet;
use serde::Serialize;
use suitelink_metadata::{EntityKind, Range, TestEntity, TestId};

/// The identity of a [`TreeNode`] instance.
///
/// A node keeps its key for as long as its id keeps being rediscovered. A node that is removed
/// and later rediscovered gets a new key.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct NodeKey(u64);

impl NodeKey {
    pub(super) fn new(value: u64) -> Self {
        Self(value)
    }
}

/// A node in the test tree, mirroring the latest snapshot of one discovered entity.
#[derive(Clone, Debug)]
pub struct TreeNode {
    key: NodeKey,
    id: TestId,
    parent: Option<TestId>,
    workspace: Utf8PathBuf,
    kind: EntityKind,
    label: String,
    longname: String,
    description: Option<String>,
    uri: Option<String>,
    rel_source: Option<Utf8PathBuf>,
    range: Option<Range>,
    tags: Vec<String>,
    error: Option<String>,
    resolved: bool,
    busy: bool,
    pub(super) children: IndexSet<TestId>,
}

impl TreeNode {
    pub(super) fn new(
        key: NodeKey,
        workspace: &Utf8Path,
        parent: Option<&TestId>,
        entity: &TestEntity,
    ) -> Self {
        Self {
            key,
            id: entity.id.clone(),
            parent: parent.cloned(),
            workspace: workspace.to_owned(),
            kind: entity.kind,
            label: entity.name.clone(),
            longname: entity.longname.clone(),
            description: entity.description.clone(),
            uri: entity.uri.clone(),
            rel_source: entity.rel_source.clone(),
            range: entity.range,
            tags: entity.tags.clone(),
            error: entity.error.clone(),
            resolved: false,
            busy: false,
            children: IndexSet::new(),
        }
    }

    /// Updates presentation state from a fresh snapshot of the same entity. Returns true if
    /// anything changed.
    pub(super) fn apply(&mut self, entity: &TestEntity) -> bool {
        let mut changed = false;
        let mut set = |changed_field: bool| changed |= changed_field;

        set(replace(&mut self.kind, entity.kind));
        set(replace(&mut self.label, entity.name.clone()));
        set(replace(&mut self.longname, entity.longname.clone()));
        set(replace(&mut self.description, entity.description.clone()));
        set(replace(&mut self.uri, entity.uri.clone()));
        set(replace(&mut self.rel_source, entity.rel_source.clone()));
        set(replace(&mut self.range, entity.range));
        set(replace(&mut self.tags, entity.tags.clone()));
        set(replace(&mut self.error, entity.error.clone()));
        changed
    }

    pub(super) fn reparent(&mut self, workspace: &Utf8Path, parent: Option<&TestId>) {
        self.workspace = workspace.to_owned();
        self.parent = parent.cloned();
    }

    pub(super) fn set_resolved(&mut self) {
        self.resolved = true;
    }

    /// Returns the identity of this node instance.
    pub fn key(&self) -> NodeKey {
        self.key
    }

    /// Returns the id of the entity this node mirrors.
    pub fn id(&self) -> &TestId {
        &self.id
    }

    /// Returns the id of the parent node, or `None` for a workspace root.
    pub fn parent(&self) -> Option<&TestId> {
        self.parent.as_ref()
    }

    /// Returns the workspace folder this node belongs to.
    pub fn workspace(&self) -> &Utf8Path {
        &self.workspace
    }

    /// Returns the kind of entity.
    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    /// Returns the label shown to the user.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Returns the dotted long-name.
    pub fn longname(&self) -> &str {
        &self.longname
    }

    /// Returns the description, if any.
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Returns the URI of the defining document, if any.
    pub fn uri(&self) -> Option<&str> {
        self.uri.as_deref()
    }

    /// Returns the source path relative to the workspace folder, if any.
    pub fn rel_source(&self) -> Option<&Utf8Path> {
        self.rel_source.as_deref()
    }

    /// Returns the range of the definition, if any.
    pub fn range(&self) -> Option<Range> {
        self.range
    }

    /// Returns the tags attached to this node.
    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    /// Returns the error shown on this node, if any.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Returns true if this node can have children that are populated on demand.
    pub fn is_resolvable(&self) -> bool {
        self.kind.can_have_children()
    }

    /// Returns true if this node's children have been populated.
    pub fn is_resolved(&self) -> bool {
        self.resolved
    }

    /// Returns true if this node is currently executing.
    pub fn is_busy(&self) -> bool {
        self.busy
    }

    /// Marks this node as executing or not.
    pub fn set_busy(&mut self, busy: bool) {
        self.busy = busy;
    }

    /// Returns the ids of this node's children, in discovery order.
    pub fn children(&self) -> &IndexSet<TestId> {
        &self.children
    }
}

fn replace<T: PartialEq>(field: &mut T, value: T) -> bool {
    if *field == value {
        false
    } else {
        *field = value;
        true
    }
}

/// A serializable copy of a subtree, used for display.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct NodeSnapshot {
    /// The node id.
    pub id: TestId,

    /// The kind of entity.
    pub kind: EntityKind,

    /// The label.
    pub label: String,

    /// The dotted long-name.
    pub longname: String,

    /// The error shown on the node, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Tags attached to the node.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    /// The node's children. Empty for unresolved nodes.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<NodeSnapshot>,
}
