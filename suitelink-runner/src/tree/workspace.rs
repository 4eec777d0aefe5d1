// Copyright (c) The suitelink Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use suitelink_metadata::{TestEntity, TestId};

/// The result of the last full discovery of one workspace folder.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct WorkspaceFolderEntry {
    /// False if the entry must be rediscovered before use.
    pub valid: bool,

    /// The discovered items.
    pub items: Vec<TestEntity>,
}

/// Caches full-workspace discovery results, from which unresolved nodes are populated lazily.
#[derive(Clone, Debug, Default)]
pub struct WorkspaceCache {
    entries: IndexMap<Utf8PathBuf, WorkspaceFolderEntry>,
}

impl WorkspaceCache {
    /// Returns the entry for a workspace.
    pub fn get(&self, workspace: &Utf8Path) -> Option<&WorkspaceFolderEntry> {
        self.entries.get(workspace)
    }

    /// Returns true if the workspace has a valid entry.
    pub fn is_valid(&self, workspace: &Utf8Path) -> bool {
        self.entries.get(workspace).is_some_and(|entry| entry.valid)
    }

    /// Records a successful discovery.
    pub fn set(&mut self, workspace: &Utf8Path, items: Vec<TestEntity>) {
        self.entries.insert(
            workspace.to_owned(),
            WorkspaceFolderEntry { valid: true, items },
        );
    }

    /// Marks a workspace as needing rediscovery. Returns false if the workspace has no entry.
    pub fn invalidate(&mut self, workspace: &Utf8Path) -> bool {
        match self.entries.get_mut(workspace) {
            Some(entry) => {
                entry.valid = false;
                true
            }
            None => false,
        }
    }

    /// Marks every workspace as needing rediscovery.
    pub fn invalidate_all(&mut self) {
        for entry in self.entries.values_mut() {
            entry.valid = false;
        }
    }

    /// Forgets a workspace.
    pub fn remove(&mut self, workspace: &Utf8Path) -> Option<WorkspaceFolderEntry> {
        self.entries.shift_remove(workspace)
    }

    /// Searches the cached items of a workspace for an entity.
    pub fn find_entity(&self, workspace: &Utf8Path, id: &TestId) -> Option<&TestEntity> {
        self.entries
            .get(workspace)?
            .items
            .iter()
            .find_map(|item| item.find(id))
    }

    /// Replaces the children of a cached entity, after a narrower discovery. Returns false if the
    /// entity is not cached.
    pub fn replace_children(
        &mut self,
        workspace: &Utf8Path,
        id: &TestId,
        children: Vec<TestEntity>,
    ) -> bool {
        let Some(entry) = self.entries.get_mut(workspace) else {
            return false;
        };
        match entry.items.iter_mut().find_map(|item| item.find_mut(id)) {
            Some(entity) => {
                entity.children = Some(children);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use suitelink_metadata::EntityKind;

    fn items() -> Vec<TestEntity> {
        let mut suite = TestEntity::new("s1", EntityKind::Suite, "Suite");
        suite.children = Some(vec![TestEntity::new("t1", EntityKind::Test, "Foo")]);
        let mut ws = TestEntity::new("ws", EntityKind::Workspace, "ws");
        ws.children = Some(vec![suite]);
        vec![ws]
    }

    #[test]
    fn invalidate_and_set() {
        let ws = Utf8Path::new("/p");
        let mut cache = WorkspaceCache::default();
        assert!(!cache.is_valid(ws));
        assert!(!cache.invalidate(ws), "nothing to invalidate yet");

        cache.set(ws, items());
        assert!(cache.is_valid(ws));
        cache.invalidate_all();
        assert!(!cache.is_valid(ws));
        assert_eq!(cache.get(ws).map(|entry| entry.items.len()), Some(1));
    }

    #[test]
    fn replace_children_of_suite() {
        let ws = Utf8Path::new("/p");
        let mut cache = WorkspaceCache::default();
        cache.set(ws, items());

        let fresh = vec![TestEntity::new("t2", EntityKind::Test, "Bar")];
        assert!(cache.replace_children(ws, &"s1".into(), fresh));
        assert!(cache.find_entity(ws, &"t1".into()).is_none());
        assert_eq!(
            cache.find_entity(ws, &"t2".into()).map(|e| e.name.as_str()),
            Some("Bar")
        );
        assert!(!cache.replace_children(ws, &"missing".into(), Vec::new()));
    }
}
