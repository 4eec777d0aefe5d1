// Copyright (c) The suitelink Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Watch mode: forwards filesystem changes to the explorer.

use crate::{ExpectedError, Result};
use camino::{Utf8Path, Utf8PathBuf};
use notify::{
    EventKind, RecursiveMode, Watcher,
    event::{ModifyKind, RenameMode},
};
use suitelink_runner::explorer::{
    ChangeListener, ExplorerEvent, FileChangeKind, TestExplorer, TreeChange,
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Logs tree changes as they are applied.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct LogChanges;

impl ChangeListener for LogChanges {
    fn changed(&self, change: TreeChange) {
        match change {
            TreeChange::Reconciled { workspace, summary } => {
                if !summary.is_empty() {
                    info!(
                        "tests in `{workspace}` changed: {} created, {} updated, {} removed",
                        summary.created.len(),
                        summary.updated.len(),
                        summary.removed.len(),
                    );
                }
            }
            TreeChange::DiagnosticsChanged { uris } => {
                for uri in uris {
                    debug!("diagnostics changed for {uri}");
                }
            }
        }
    }
}

/// Watches every workspace folder until interrupted.
pub(crate) async fn watch_workspaces(
    explorer: &TestExplorer,
    workspaces: &[Utf8PathBuf],
) -> Result<()> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
        // The receiver is gone once watching has stopped.
        let _ = tx.send(res);
    })
    .map_err(|err| ExpectedError::WatchError { err })?;
    for workspace in workspaces {
        watcher
            .watch(workspace.as_std_path(), RecursiveMode::Recursive)
            .map_err(|err| ExpectedError::WatchError { err })?;
    }
    info!("watching for changes, press Ctrl-C to stop");

    let res = loop {
        tokio::select! {
            biased;

            res = tokio::signal::ctrl_c() => {
                break res.map_err(|err| ExpectedError::SignalHandlerSetupError { err });
            }
            Some(res) = rx.recv() => {
                let event = match res {
                    Ok(event) => event,
                    Err(err) => {
                        warn!("error watching files: {err}");
                        continue;
                    }
                };
                for (path, kind) in file_changes(&event) {
                    explorer
                        .handle_event(ExplorerEvent::FileChanged { path, kind })
                        .await;
                }
            }
        }
    };

    explorer.shutdown();
    drop(watcher);
    res
}

/// Maps a notify event to the changes it represents. Non-UTF-8 paths are skipped.
fn file_changes(event: &notify::Event) -> Vec<(Utf8PathBuf, FileChangeKind)> {
    event
        .paths
        .iter()
        .filter_map(|path| {
            let Some(path) = Utf8Path::from_path(path) else {
                debug!("ignoring non-UTF-8 path {}", path.display());
                return None;
            };
            let kind = match event.kind {
                EventKind::Create(_) => FileChangeKind::Created,
                EventKind::Modify(ModifyKind::Name(mode)) => match mode {
                    RenameMode::From => FileChangeKind::Removed,
                    RenameMode::To => FileChangeKind::Created,
                    _ if path.exists() => FileChangeKind::Created,
                    _ => FileChangeKind::Removed,
                },
                EventKind::Modify(_) => FileChangeKind::Modified,
                EventKind::Remove(_) => FileChangeKind::Removed,
                EventKind::Access(_) | EventKind::Any | EventKind::Other => return None,
            };
            Some((path.to_owned(), kind))
        })
        .collect()
}
