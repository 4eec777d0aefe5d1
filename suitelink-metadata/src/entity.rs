// Copyright (c) The suitelink Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::errors::WorkspaceShapeError;
use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::{borrow::Borrow, fmt};

/// The globally stable identifier of a discovered test entity.
///
/// Identifiers are opaque: they are only ever compared for equality.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TestId(SmolStr);

impl TestId {
    /// Creates a new identifier.
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(SmolStr::new(id))
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TestId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for TestId {
    fn from(id: String) -> Self {
        Self(SmolStr::from(id))
    }
}

impl Borrow<str> for TestId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// The kind of a discovered test entity.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    /// A workspace pseudo-root. Always wraps exactly one real suite.
    Workspace,

    /// A suite: a directory or a file containing tests.
    Suite,

    /// A single test case.
    Test,

    /// A single task (a test case in task mode).
    Task,

    /// A placeholder for something that could not be discovered.
    Error,
}

impl EntityKind {
    /// Returns true if this kind of entity is executed and reported on its own.
    pub fn is_leaf(self) -> bool {
        matches!(self, Self::Test | Self::Task)
    }

    /// Returns true if this kind of entity may contain children.
    pub fn can_have_children(self) -> bool {
        matches!(self, Self::Workspace | Self::Suite)
    }

    /// Returns the string used for this kind in JSON output.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Workspace => "workspace",
            Self::Suite => "suite",
            Self::Test => "test",
            Self::Task => "task",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A zero-based position in a text document.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct Position {
    /// The zero-based line.
    pub line: u32,

    /// The zero-based character offset within the line.
    pub character: u32,
}

/// A range in a text document, with an exclusive end.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct Range {
    /// The start of the range.
    pub start: Position,

    /// The end of the range.
    pub end: Position,
}

impl Range {
    /// Returns a range covering the start of the given zero-based line.
    pub fn line(line: u32) -> Self {
        let pos = Position { line, character: 0 };
        Self {
            start: pos,
            end: pos,
        }
    }
}

/// A single entity produced by a discovery invocation.
///
/// Entities are produced fresh by each invocation and are never mutated. Consumers match entities
/// across invocations by [`id`](Self::id), not by value.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestEntity {
    /// The stable identifier.
    pub id: TestId,

    /// The kind of entity.
    #[serde(rename = "type")]
    pub kind: EntityKind,

    /// The short, human-readable name.
    pub name: String,

    /// The dotted path uniquely identifying this entity within its workspace.
    #[serde(default)]
    pub longname: String,

    /// An optional one-line description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// The URI of the document that defines this entity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,

    /// The path of the defining file or directory, relative to the workspace folder.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rel_source: Option<Utf8PathBuf>,

    /// Child entities, if any were discovered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<TestEntity>>,

    /// The range of the definition within [`uri`](Self::uri).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<Range>,

    /// An error attached to this entity by the tool.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Tags attached to this entity.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

impl TestEntity {
    /// Creates a new entity with no optional fields set.
    pub fn new(id: impl Into<TestId>, kind: EntityKind, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            name: name.into(),
            longname: String::new(),
            description: None,
            uri: None,
            rel_source: None,
            children: None,
            range: None,
            error: None,
            tags: Vec::new(),
        }
    }

    /// Creates a synthetic error entity carrying the given message.
    pub fn error(id: impl Into<TestId>, message: impl Into<String>) -> Self {
        let mut entity = Self::new(id, EntityKind::Error, "Error");
        entity.error = Some(message.into());
        entity
    }

    /// Returns the children of this entity, or an empty slice if none were discovered.
    pub fn children(&self) -> &[TestEntity] {
        self.children.as_deref().unwrap_or_default()
    }

    /// Returns a copy of this entity without its children.
    pub fn without_children(&self) -> Self {
        Self {
            id: self.id.clone(),
            kind: self.kind,
            name: self.name.clone(),
            longname: self.longname.clone(),
            description: self.description.clone(),
            uri: self.uri.clone(),
            rel_source: self.rel_source.clone(),
            children: None,
            range: self.range,
            error: self.error.clone(),
            tags: self.tags.clone(),
        }
    }

    /// For a workspace pseudo-root, returns the single real suite it wraps.
    ///
    /// Tools always emit exactly one child suite under a workspace entity. For any other kind of
    /// entity, this returns `Ok(None)`.
    pub fn workspace_suite(&self) -> Result<Option<&TestEntity>, WorkspaceShapeError> {
        if self.kind != EntityKind::Workspace {
            return Ok(None);
        }
        match self.children() {
            [suite] if suite.kind == EntityKind::Suite => Ok(Some(suite)),
            [] => Ok(None),
            children => Err(WorkspaceShapeError::new(
                self.id.clone(),
                children.iter().map(|child| child.kind).collect(),
            )),
        }
    }

    /// Searches this entity and its descendants for the given identifier.
    pub fn find(&self, id: &TestId) -> Option<&TestEntity> {
        if &self.id == id {
            return Some(self);
        }
        self.children().iter().find_map(|child| child.find(id))
    }

    /// Searches this entity and its descendants for the given identifier, mutably.
    pub fn find_mut(&mut self, id: &TestId) -> Option<&mut TestEntity> {
        if &self.id == id {
            return Some(self);
        }
        self.children
            .as_mut()?
            .iter_mut()
            .find_map(|child| child.find_mut(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    fn suite_with(children: Vec<TestEntity>) -> TestEntity {
        let mut ws = TestEntity::new("ws", EntityKind::Workspace, "ws");
        ws.children = Some(children);
        ws
    }

    #[test]
    fn deserialize_entity() {
        let json = indoc::indoc! {r#"
            {
                "id": "ws",
                "type": "workspace",
                "name": "project",
                "longname": "project",
                "children": [
                    {
                        "id": "s1",
                        "type": "suite",
                        "name": "Suite",
                        "longname": "Suite",
                        "uri": "file:///p/suite.robot",
                        "relSource": "suite.robot",
                        "range": {"start": {"line": 0, "character": 0}, "end": {"line": 10, "character": 0}},
                        "tags": ["smoke"]
                    }
                ]
            }
        "#};
        let entity: TestEntity = serde_json::from_str(json).expect("valid entity");
        assert_eq!(entity.kind, EntityKind::Workspace);
        let suite = &entity.children()[0];
        assert_eq!(
            suite.rel_source.as_deref(),
            Some(camino::Utf8Path::new("suite.robot"))
        );
        assert_eq!(suite.tags, vec!["smoke".to_owned()]);
        assert_eq!(suite.range.map(|r| r.end.line), Some(10));
    }

    #[test_case(EntityKind::Test, true; "test")]
    #[test_case(EntityKind::Task, true; "task")]
    #[test_case(EntityKind::Suite, false; "suite")]
    #[test_case(EntityKind::Workspace, false; "workspace")]
    #[test_case(EntityKind::Error, false; "error")]
    fn leaf_kinds(kind: EntityKind, expected: bool) {
        assert_eq!(kind.is_leaf(), expected);
    }

    #[test]
    fn workspace_suite_contract() {
        let suite = TestEntity::new("s1", EntityKind::Suite, "Suite");
        let ws = suite_with(vec![suite.clone()]);
        assert_eq!(ws.workspace_suite().unwrap(), Some(&suite));

        let empty = suite_with(vec![]);
        assert_eq!(empty.workspace_suite().unwrap(), None);

        let broken = suite_with(vec![suite.clone(), suite.clone()]);
        let err = broken.workspace_suite().unwrap_err();
        assert_eq!(
            err.to_string(),
            "workspace entity `ws` must wrap exactly one suite, found [suite, suite]"
        );

        assert_eq!(suite.workspace_suite().unwrap(), None);
    }

    #[test]
    fn find_nested() {
        let mut suite = TestEntity::new("s1", EntityKind::Suite, "Suite");
        suite.children = Some(vec![TestEntity::new("t1", EntityKind::Test, "Foo")]);
        let mut ws = suite_with(vec![suite]);

        assert_eq!(ws.find(&"t1".into()).map(|e| e.name.as_str()), Some("Foo"));
        assert!(ws.find(&"missing".into()).is_none());

        ws.find_mut(&"t1".into()).unwrap().name = "Bar".to_owned();
        assert_eq!(ws.find(&"t1".into()).map(|e| e.name.as_str()), Some("Bar"));
    }
}
