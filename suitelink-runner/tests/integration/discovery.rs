// Copyright (c) The suitelink Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::fixtures::*;
use color_eyre::eyre::{Result, bail};
use maplit::btreemap;
use pretty_assertions::assert_eq;
use std::time::{Duration, Instant};
use suitelink_metadata::EntityKind;
use suitelink_runner::{
    cancel::{CancelSource, CancelToken},
    discovery::{Discover, DiscoveryClient, DiscoveryRequest},
    errors::DiscoveryError,
};

#[tokio::test]
async fn discovers_from_tool_output() -> Result<()> {
    test_init();
    let dir = temp_workspace()?;
    let script = format!("printf '%s' '{DISCOVERY_JSON}'");
    let request = DiscoveryRequest::workspace(dir.path(), sh_tool(&script));

    let output = DiscoveryClient::new()
        .discover(request, CancelToken::never())
        .await?;
    let (items, diagnostics) = output.into_parts();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].kind, EntityKind::Workspace);
    let suite = items[0].workspace_suite()?.expect("one suite under the workspace");
    assert_eq!(suite.longname, "Root");
    assert_eq!(suite.children().len(), 2);
    assert!(diagnostics.is_empty());
    Ok(())
}

#[tokio::test]
async fn passes_discovery_arguments() -> Result<()> {
    test_init();
    let dir = temp_workspace()?;
    // Succeeds only if the expected arguments arrive as positional parameters.
    let script = r#"[ "$*" = "--format json discover tests --suite Root --parse-include root.robot" ] || exit 9; printf '{}'"#;
    let mut request = DiscoveryRequest::workspace(dir.path(), sh_tool(script));
    request.mode = suitelink_metadata::DiscoveryMode::Tests;
    request.suite = Some("Root".to_owned());
    request.parse_include = vec!["root.robot".into()];

    let output = DiscoveryClient::new()
        .discover(request, CancelToken::never())
        .await?;
    assert!(output.items.is_none());
    Ok(())
}

#[tokio::test]
async fn feeds_unsaved_documents_on_stdin() -> Result<()> {
    test_init();
    let dir = temp_workspace()?;
    let script = r#"grep -q 'edited but not saved' || exit 7; printf '{"items": []}'"#;
    let mut request = DiscoveryRequest::workspace(dir.path(), sh_tool(script));
    request.unsaved = btreemap! {
        format!("file://{}/a.robot", dir.path()) => "edited but not saved".to_owned(),
    };

    let output = DiscoveryClient::new()
        .discover(request, CancelToken::never())
        .await?;
    assert_eq!(output.items, Some(Vec::new()));
    Ok(())
}

#[tokio::test]
async fn failed_invocation_reports_stderr() -> Result<()> {
    test_init();
    let dir = temp_workspace()?;
    let script = "echo 'Error: no such suite' >&2; exit 3";
    let request = DiscoveryRequest::workspace(dir.path(), sh_tool(script));

    let err = match DiscoveryClient::new()
        .discover(request, CancelToken::never())
        .await
    {
        Ok(output) => bail!("discovery unexpectedly succeeded: {output:?}"),
        Err(err) => err,
    };
    match &err {
        DiscoveryError::CommandFailed { exit_code, .. } => assert_eq!(*exit_code, Some(3)),
        other => bail!("unexpected error: {other}"),
    }
    assert_eq!(err.node_message(), "Error: no such suite");
    Ok(())
}

#[tokio::test]
async fn invalid_output_is_a_parse_error() -> Result<()> {
    test_init();
    let dir = temp_workspace()?;
    let request = DiscoveryRequest::workspace(dir.path(), sh_tool("echo 'not json'"));

    let err = DiscoveryClient::new()
        .discover(request, CancelToken::never())
        .await
        .expect_err("output isn't JSON");
    assert!(matches!(err, DiscoveryError::Json(_)), "{err:?}");
    Ok(())
}

#[tokio::test]
async fn cancellation_abandons_the_invocation() -> Result<()> {
    test_init();
    let dir = temp_workspace()?;
    let request = DiscoveryRequest::workspace(dir.path(), sh_tool("sleep 30"));
    let source = CancelSource::new();
    let token = source.token();

    let client = DiscoveryClient::new();
    let start = Instant::now();
    let (result, ()) = tokio::join!(client.discover(request, token), async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        source.cancel();
    });
    let err = result.expect_err("discovery was cancelled");
    assert!(err.is_cancelled(), "{err:?}");
    assert!(
        start.elapsed() < Duration::from_secs(10),
        "cancellation didn't wait for the tool"
    );
    Ok(())
}

#[tokio::test]
async fn missing_program_is_a_spawn_error() -> Result<()> {
    test_init();
    let dir = temp_workspace()?;
    let mut tool = sh_tool("");
    tool.program = "suitelink-definitely-not-a-program".to_owned();
    let request = DiscoveryRequest::workspace(dir.path(), tool);

    let err = DiscoveryClient::new()
        .discover(request, CancelToken::never())
        .await
        .expect_err("program doesn't exist");
    assert!(matches!(err, DiscoveryError::Spawn { .. }), "{err:?}");
    Ok(())
}
