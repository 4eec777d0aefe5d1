// Copyright (c) The suitelink Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::fixtures::*;
use color_eyre::eyre::Result;
use pretty_assertions::assert_eq;
use suitelink_metadata::{
    EnqueuedBody, ExitedBody, LaunchConfig, LaunchRequest, LogBody, LogLevel, RunId, RunTarget,
    SessionEvent,
};
use suitelink_runner::session::{ProcessLauncher, SessionLauncher};

fn launch_config(cwd: &camino::Utf8Path) -> LaunchConfig {
    LaunchConfig {
        session_type: "robotcode".to_owned(),
        request: LaunchRequest::Launch,
        name: "Run (ws)".to_owned(),
        cwd: cwd.to_owned(),
        run_id: RunId::new(7),
        suites: Vec::new(),
        parse_include: Vec::new(),
        included_long_names: Vec::new(),
        excluded_long_names: Vec::new(),
        include_tags: Vec::new(),
        exclude_tags: Vec::new(),
        args: Vec::new(),
        no_debug: true,
        target: RunTarget::Workspace,
    }
}

#[tokio::test]
async fn streams_session_events() -> Result<()> {
    test_init();
    let dir = temp_workspace()?;
    // Fails unless the launch configuration arrives on standard input.
    let script = r#"read -r config
case "$config" in *'"runId":"7"'*) ;; *) echo "bad config: $config" >&2; exit 1;; esac
echo '{"event": "enqueued", "body": {"items": ["t1"]}}'
echo 'plain tool output'
echo '{"event": "exited", "body": {}}'"#;
    let command = sh_session(script);

    let launcher = ProcessLauncher::new();
    let mut session = launcher.launch(&command, launch_config(dir.path())).await?;
    assert_eq!(session.run_id, RunId::new(7));

    let mut events = Vec::new();
    while let Some(event) = session.events.recv().await {
        events.push(event);
    }
    assert_eq!(
        events,
        vec![
            SessionEvent::Enqueued(EnqueuedBody {
                items: vec!["t1".into()],
            }),
            SessionEvent::Message(LogBody::plain("plain tool output", LogLevel::Info)),
            SessionEvent::Exited(ExitedBody::default()),
        ]
    );
    Ok(())
}

#[tokio::test]
async fn failing_host_reports_stderr_and_exit_status() -> Result<()> {
    test_init();
    let dir = temp_workspace()?;
    let command = sh_session("cat >/dev/null; echo 'interpreter not found' >&2; exit 2");

    let launcher = ProcessLauncher::new();
    let mut session = launcher.launch(&command, launch_config(dir.path())).await?;
    let mut events = Vec::new();
    while let Some(event) = session.events.recv().await {
        events.push(event);
    }

    assert_eq!(events.len(), 2, "{events:?}");
    assert_eq!(
        events[0],
        SessionEvent::Message(LogBody::plain("interpreter not found", LogLevel::Warn))
    );
    match &events[1] {
        SessionEvent::Message(body) => {
            assert_eq!(body.level, LogLevel::Error);
            assert!(body.message.starts_with("session host exited with"), "{body:?}");
        }
        other => panic!("unexpected event: {other:?}"),
    }
    Ok(())
}
