// Copyright (c) The suitelink Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    errors::DispatchError,
    helpers::is_longname_ancestor,
    tree::{TreeNode, TreeState},
};
use camino::{Utf8Path, Utf8PathBuf};
use indexmap::{IndexMap, IndexSet};
use suitelink_metadata::{EntityKind, RunTarget, TestId};
use tracing::warn;

/// What to run in one workspace folder.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct WorkspacePlan {
    /// The workspace folder.
    pub workspace: Utf8PathBuf,

    /// What the session executes.
    pub target: RunTarget,

    /// The minimal set of suite long-names to parse. Empty for whole-workspace runs.
    pub suites: Vec<String>,

    /// Relative sources of [`suites`](Self::suites).
    pub parse_include: Vec<Utf8PathBuf>,

    /// Long-names of items to include. Empty for whole-workspace runs.
    pub included_long_names: Vec<String>,

    /// Long-names of items to exclude.
    pub excluded_long_names: Vec<String>,
}

impl WorkspacePlan {
    /// Returns true if this plan runs everything in the workspace.
    pub fn is_whole_workspace(&self) -> bool {
        self.target == RunTarget::Workspace
    }
}

/// Partitions a run request into one plan per workspace folder.
///
/// An empty `included` list selects every workspace. Workspace pseudo-roots are replaced by the
/// suite they wrap. Ids that aren't in the tree are ignored. Workspaces whose pseudo-root doesn't
/// wrap exactly one suite are returned as errors.
pub fn plan_runs(
    tree: &TreeState,
    included: &[TestId],
    excluded: &[TestId],
) -> (Vec<WorkspacePlan>, Vec<DispatchError>) {
    let mut errors = Vec::new();
    let included: Vec<TestId> = if included.is_empty() {
        tree.workspaces()
            .flat_map(|workspace| tree.roots(workspace))
            .map(|node| node.id().clone())
            .collect()
    } else {
        included.to_vec()
    };

    let mut included_by_ws = group_by_workspace(tree, &included, &mut errors);
    let mut excluded_by_ws = group_by_workspace(tree, excluded, &mut Vec::new());

    let mut plans = Vec::with_capacity(included_by_ws.len());
    for (workspace, included) in included_by_ws.drain(..) {
        let Some(root) = tree.root_suite(&workspace) else {
            push_no_root_suite(&mut errors, &workspace);
            continue;
        };
        let excluded = excluded_by_ws.shift_remove(&workspace).unwrap_or_default();
        plans.push(plan_workspace(tree, workspace, root, &included, &excluded));
    }
    (plans, errors)
}

fn group_by_workspace<'a>(
    tree: &'a TreeState,
    ids: &[TestId],
    errors: &mut Vec<DispatchError>,
) -> IndexMap<Utf8PathBuf, IndexMap<TestId, &'a TreeNode>> {
    let mut out: IndexMap<Utf8PathBuf, IndexMap<TestId, &'a TreeNode>> = IndexMap::new();
    for id in ids {
        let Some(node) = tree.node(id) else {
            warn!("ignoring run selection `{id}`: not in the tree");
            continue;
        };
        let node = match node.kind() {
            EntityKind::Workspace => match tree.root_suite(node.workspace()) {
                Some(suite) => suite,
                None => {
                    push_no_root_suite(errors, node.workspace());
                    continue;
                }
            },
            EntityKind::Error => continue,
            EntityKind::Suite | EntityKind::Test | EntityKind::Task => node,
        };
        out.entry(node.workspace().to_owned())
            .or_default()
            .insert(node.id().clone(), node);
    }
    out
}

fn push_no_root_suite(errors: &mut Vec<DispatchError>, workspace: &Utf8Path) {
    if !errors.iter().any(|err| err.workspace() == workspace) {
        errors.push(DispatchError::NoRootSuite {
            workspace: workspace.to_owned(),
        });
    }
}

fn plan_workspace(
    tree: &TreeState,
    workspace: Utf8PathBuf,
    root: &TreeNode,
    included: &IndexMap<TestId, &TreeNode>,
    excluded: &IndexMap<TestId, &TreeNode>,
) -> WorkspacePlan {
    let excluded_long_names: Vec<String> = excluded
        .values()
        .map(|node| node.longname().to_owned())
        .collect();

    if excluded.is_empty() && included.contains_key(root.id()) {
        return WorkspacePlan {
            workspace,
            target: RunTarget::Workspace,
            suites: Vec::new(),
            parse_include: Vec::new(),
            included_long_names: Vec::new(),
            excluded_long_names,
        };
    }

    let included_long_names = minimal_longnames(included.values().map(|node| node.longname()));

    // The suites that must be parsed: each selected suite, or the suite owning a selected test.
    let suite_nodes: Vec<&TreeNode> = included
        .values()
        .filter_map(|node| match node.kind() {
            EntityKind::Suite => Some(*node),
            _ => node.parent().and_then(|parent| tree.node(parent)),
        })
        .collect();
    let suites = minimal_longnames(suite_nodes.iter().map(|node| node.longname()));
    let parse_include: IndexSet<Utf8PathBuf> = suite_nodes
        .iter()
        .filter(|node| suites.iter().any(|suite| suite == node.longname()))
        .filter_map(|node| node.rel_source().map(Utf8Path::to_owned))
        .collect();

    WorkspacePlan {
        workspace,
        target: RunTarget::Suite(root.longname().to_owned()),
        suites,
        parse_include: parse_include.into_iter().collect(),
        included_long_names,
        excluded_long_names,
    }
}

/// Deduplicates long-names and drops any covered by an ancestor in the same set.
fn minimal_longnames<'a>(longnames: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let unique: IndexSet<&str> = longnames.into_iter().collect();
    unique
        .iter()
        .filter(|longname| {
            !unique
                .iter()
                .any(|other| is_longname_ancestor(other, longname))
        })
        .map(|longname| (*longname).to_owned())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::{Expand, ReconcileScope};
    use pretty_assertions::assert_eq;
    use suitelink_metadata::TestEntity;

    fn entity(
        id: &str,
        kind: EntityKind,
        longname: &str,
        rel_source: Option<&str>,
        children: Option<Vec<TestEntity>>,
    ) -> TestEntity {
        let mut entity = TestEntity::new(id, kind, longname.rsplit('.').next().unwrap_or(longname));
        entity.longname = longname.to_owned();
        entity.rel_source = rel_source.map(Utf8PathBuf::from);
        entity.children = children;
        entity
    }

    /// ws -> Root -> {A (a.robot) -> {a1, a2}, B (b.robot) -> {b1}}
    fn tree() -> TreeState {
        let a = entity(
            "a",
            EntityKind::Suite,
            "Root.A",
            Some("a.robot"),
            Some(vec![
                entity("a1", EntityKind::Test, "Root.A.One", Some("a.robot"), None),
                entity("a2", EntityKind::Test, "Root.A.Two", Some("a.robot"), None),
            ]),
        );
        let b = entity(
            "b",
            EntityKind::Suite,
            "Root.B",
            Some("b.robot"),
            Some(vec![entity("b1", EntityKind::Test, "Root.B.One", Some("b.robot"), None)]),
        );
        let root = entity("root", EntityKind::Suite, "Root", None, Some(vec![a, b]));
        let ws = entity("ws", EntityKind::Workspace, "ws", None, Some(vec![root]));

        let mut tree = TreeState::default();
        tree.reconcile(
            &ReconcileScope::Workspace("/p".into()),
            &[ws],
            Expand::All,
        );
        tree
    }

    fn ids(ids: &[&str]) -> Vec<TestId> {
        ids.iter().map(|&id| id.into()).collect()
    }

    #[test]
    fn everything_is_a_whole_workspace_run() {
        let tree = tree();
        for included in [ids(&[]), ids(&["ws"]), ids(&["root"])] {
            let (plans, errors) = plan_runs(&tree, &included, &[]);
            assert!(errors.is_empty());
            assert_eq!(plans.len(), 1);
            assert!(plans[0].is_whole_workspace(), "{included:?}");
            assert!(plans[0].included_long_names.is_empty());
        }
    }

    #[test]
    fn exclusions_force_a_filtered_run() {
        let tree = tree();
        let (plans, _) = plan_runs(&tree, &ids(&["ws"]), &ids(&["a2"]));
        assert_eq!(
            plans,
            vec![WorkspacePlan {
                workspace: "/p".into(),
                target: RunTarget::Suite("Root".to_owned()),
                suites: vec!["Root".to_owned()],
                parse_include: Vec::new(),
                included_long_names: vec!["Root".to_owned()],
                excluded_long_names: vec!["Root.A.Two".to_owned()],
            }]
        );
    }

    #[test]
    fn minimal_suites_and_sources() {
        let tree = tree();
        let (plans, _) = plan_runs(&tree, &ids(&["a1", "a", "b1", "ghost"]), &[]);
        assert_eq!(
            plans,
            vec![WorkspacePlan {
                workspace: "/p".into(),
                target: RunTarget::Suite("Root".to_owned()),
                suites: vec!["Root.A".to_owned(), "Root.B".to_owned()],
                parse_include: vec!["a.robot".into(), "b.robot".into()],
                included_long_names: vec!["Root.A".to_owned(), "Root.B.One".to_owned()],
                excluded_long_names: Vec::new(),
            }]
        );
    }

    #[test]
    fn workspace_without_root_suite_is_an_error() {
        let mut tree = TreeState::default();
        tree.reconcile(
            &ReconcileScope::Workspace("/q".into()),
            &[entity("wq", EntityKind::Workspace, "wq", None, Some(Vec::new()))],
            Expand::All,
        );
        let (plans, errors) = plan_runs(&tree, &[], &[]);
        assert!(plans.is_empty());
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].workspace(), "/q");
    }

    #[test]
    fn minimal_longnames_prunes_descendants() {
        assert_eq!(
            minimal_longnames(["A.B.C", "A.B", "A.BC", "A.B"]),
            vec!["A.B".to_owned(), "A.BC".to_owned()]
        );
    }
}
