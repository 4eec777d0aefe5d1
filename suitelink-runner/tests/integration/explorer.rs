// Copyright (c) The suitelink Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::fixtures::*;
use color_eyre::eyre::Result;
use pretty_assertions::assert_eq;
use std::sync::Arc;
use suitelink_metadata::EntityKind;
use suitelink_runner::{
    explorer::{ExplorerServices, IgnoreChanges, TestExplorer},
    reporter::{RecordingReport, ReportEventKind},
};

const PASSING_SESSION: &str = r#"cat >/dev/null
echo '{"event": "enqueued", "body": {"items": ["t1", "t2"]}}'
echo '{"event": "started", "body": {"type": "suite", "id": "s1"}}'
echo '{"event": "started", "body": {"type": "test", "id": "t1"}}'
echo '{"event": "ended", "body": {"type": "test", "id": "t1", "attributes": {"status": "PASS", "elapsedtime": 12}}}'
echo '{"event": "started", "body": {"type": "test", "id": "t2"}}'
echo '{"event": "ended", "body": {"type": "test", "id": "t2", "attributes": {"status": "FAIL", "message": "1 != 2"}}}'
echo '{"event": "ended", "body": {"type": "suite", "id": "s1", "attributes": {"status": "FAIL"}}}'
echo '{"event": "exited", "body": {}}'"#;

#[tokio::test]
async fn discover_and_run_workspace() -> Result<()> {
    test_init();
    let dir = temp_workspace()?;
    write_config(
        dir.path(),
        &format!("printf '%s' '{DISCOVERY_JSON}'"),
        PASSING_SESSION,
    )?;

    let explorer = TestExplorer::new(None, ExplorerServices::process_backed(Arc::new(IgnoreChanges)));
    explorer.add_workspaces([dir.path().to_owned()]).await;
    explorer.wait_idle().await;

    {
        let mut tree = explorer.tree().lock().await;
        let suite = tree
            .root_suite(dir.path())
            .map(|node| node.id().clone())
            .expect("workspace wraps one suite");
        tree.resolve(&suite).expect("suite is cached");
        let leaves: Vec<_> = tree
            .children(&suite)
            .map(|node| (node.label().to_owned(), node.kind()))
            .collect();
        assert_eq!(
            leaves,
            vec![
                ("Foo".to_owned(), EntityKind::Test),
                ("Bar".to_owned(), EntityKind::Test),
            ]
        );
    }

    let sink = Arc::new(RecordingReport::new());
    let (handle, outcome) = explorer
        .run_tests(Vec::new(), Vec::new(), None, sink.clone())
        .await?;
    assert!(outcome.any_started(), "{outcome:?}");
    handle.wait_ended().await;

    let stats = handle.stats();
    assert_eq!((stats.passed, stats.failed), (1, 1));
    let finished = sink
        .kinds()
        .into_iter()
        .filter(|kind| matches!(kind, ReportEventKind::Finished { .. }))
        .count();
    assert_eq!(finished, 2);
    assert!(
        matches!(sink.kinds().last(), Some(ReportEventKind::RunEnded { .. })),
        "report ends with the run summary"
    );

    let tree = explorer.tree().lock().await;
    assert!(
        tree.children(&"s1".into()).all(|node| !node.is_busy()),
        "no node stays busy after the run"
    );
    Ok(())
}

#[tokio::test]
async fn failing_tool_shows_error_node() -> Result<()> {
    test_init();
    let dir = temp_workspace()?;
    write_config(
        dir.path(),
        "echo 'robot.toml: invalid profile' >&2; exit 1",
        "exit 0",
    )?;

    let explorer = TestExplorer::new(None, ExplorerServices::process_backed(Arc::new(IgnoreChanges)));
    explorer.add_workspaces([dir.path().to_owned()]).await;
    explorer.wait_idle().await;

    let tree = explorer.tree().lock().await;
    let roots: Vec<_> = tree
        .roots(dir.path())
        .map(|node| (node.kind(), node.error().map(str::to_owned)))
        .collect();
    assert_eq!(
        roots,
        vec![(
            EntityKind::Error,
            Some("robot.toml: invalid profile".to_owned())
        )]
    );
    Ok(())
}
