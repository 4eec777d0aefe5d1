// Copyright (c) The suitelink Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Top-level application and command routing.

use crate::{
    ExpectedError, Result,
    output::{OutputContext, OutputOpts, OutputWriter},
    reporter::{ConsoleReport, write_tree},
    watch::{LogChanges, watch_workspaces},
};
use camino::{Utf8Path, Utf8PathBuf};
use clap::{Args, Subcommand};
use std::{
    collections::{BTreeMap, HashMap},
    io::Write,
    sync::Arc,
};
use suitelink_metadata::{EntityKind, SuitelinkExitCode, TestId};
use suitelink_runner::{
    config::SuitelinkConfig,
    explorer::{ChangeListener, ExplorerServices, IgnoreChanges, TestExplorer},
    tree::{NodeSnapshot, TreeState},
};
use tracing::{info, warn};

/// Discover and run tests through a test-explorer bridge, without an editor.
#[derive(Debug, clap::Parser)]
#[command(
    version,
    styles = crate::output::clap_styles::style(),
    max_term_width = 100,
)]
pub struct SuitelinkApp {
    #[clap(flatten)]
    common: CommonOpts,

    #[clap(subcommand)]
    command: Command,
}

impl SuitelinkApp {
    /// Initializes the output context.
    pub fn init_output(&self) -> OutputContext {
        self.common.output.init()
    }

    /// Executes the app, returning the process exit code.
    pub fn exec(self, output: OutputContext, writer: &mut OutputWriter) -> Result<i32> {
        let workspaces = self.common.workspaces()?;
        // Surface config errors up front. The engine itself falls back to defaults.
        for workspace in &workspaces {
            SuitelinkConfig::from_sources(workspace.clone(), self.common.config_file.as_deref())?;
        }

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .map_err(|err| ExpectedError::RuntimeCreateError { err })?;
        let config_file = self.common.config_file;

        runtime.block_on(async move {
            match self.command {
                Command::Discover(opts) => {
                    let explorer = explorer(config_file, Arc::new(IgnoreChanges));
                    opts.exec(&explorer, &workspaces, output, writer).await
                }
                Command::Run(opts) => {
                    let explorer = explorer(config_file, Arc::new(IgnoreChanges));
                    opts.exec(&explorer, &workspaces, output).await
                }
                Command::Watch(opts) => {
                    let explorer = explorer(config_file, Arc::new(LogChanges));
                    opts.exec(&explorer, &workspaces).await
                }
            }
        })
    }
}

fn explorer(config_file: Option<Utf8PathBuf>, listener: Arc<dyn ChangeListener>) -> TestExplorer {
    TestExplorer::new(config_file, ExplorerServices::process_backed(listener))
}

#[derive(Debug, Args)]
struct CommonOpts {
    /// Workspace folder to operate on (may be specified multiple times) [default: current
    /// directory]
    #[arg(long = "workspace", short = 'w', global = true, value_name = "DIR")]
    workspaces: Vec<Utf8PathBuf>,

    /// Config file layered on top of each workspace's configuration
    #[arg(long, global = true, value_name = "PATH", env = "SUITELINK_CONFIG")]
    config_file: Option<Utf8PathBuf>,

    #[clap(flatten)]
    output: OutputOpts,
}

impl CommonOpts {
    /// Returns absolute workspace folders, defaulting to the current directory.
    fn workspaces(&self) -> Result<Vec<Utf8PathBuf>> {
        let cwd = std::env::current_dir().map_err(|err| ExpectedError::CurrentDirFailed { err })?;
        let cwd =
            Utf8PathBuf::try_from(cwd).map_err(|err| ExpectedError::WorkspaceNotUtf8 { err })?;
        if self.workspaces.is_empty() {
            return Ok(vec![cwd]);
        }
        let mut out: Vec<Utf8PathBuf> = Vec::with_capacity(self.workspaces.len());
        for workspace in &self.workspaces {
            let workspace = cwd.join(workspace);
            if !out.contains(&workspace) {
                out.push(workspace);
            }
        }
        Ok(out)
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Discover tests and print the test tree
    Discover(DiscoverOpts),

    /// Run tests through debug sessions
    Run(RunOpts),

    /// Watch workspace folders and rediscover tests as files change
    Watch(WatchOpts),
}

#[derive(Debug, Args)]
struct DiscoverOpts {
    /// Print the tree as JSON
    #[arg(long)]
    json: bool,
}

impl DiscoverOpts {
    async fn exec(
        self,
        explorer: &TestExplorer,
        workspaces: &[Utf8PathBuf],
        output: OutputContext,
        writer: &mut OutputWriter,
    ) -> Result<i32> {
        let discovered = discover_all(explorer, workspaces).await;

        let mut stdout = writer.stdout_writer();
        if self.json {
            let by_workspace: BTreeMap<&str, &[NodeSnapshot]> = discovered
                .trees
                .iter()
                .map(|(workspace, roots)| (workspace.as_str(), roots.as_slice()))
                .collect();
            serde_json::to_writer_pretty(&mut stdout, &by_workspace)
                .map_err(|err| ExpectedError::SerializeOutputError { err })?;
            writeln!(stdout).map_err(|err| ExpectedError::WriteOutputError { err })?;
        } else {
            let styles = output.stdout_styles();
            for (workspace, roots) in &discovered.trees {
                write_tree(&mut stdout, workspace.as_str(), roots, &styles)
                    .map_err(|err| ExpectedError::WriteOutputError { err })?;
            }
        }
        stdout
            .flush()
            .map_err(|err| ExpectedError::WriteOutputError { err })?;

        if discovered.failures.is_empty() {
            Ok(SuitelinkExitCode::OK)
        } else {
            Err(ExpectedError::DiscoveryFailed {
                failures: discovered.failures,
            })
        }
    }
}

#[derive(Debug, Args)]
struct RunOpts {
    /// Run only this test or suite, by long-name (may be specified multiple times)
    #[arg(long, short = 'i', value_name = "LONGNAME")]
    include: Vec<String>,

    /// Skip this test or suite, by long-name (may be specified multiple times)
    #[arg(long, short = 'e', value_name = "LONGNAME")]
    exclude: Vec<String>,

    /// Run profile to use [default: the profile marked as default]
    #[arg(long, short = 'P', value_name = "PROFILE", env = "SUITELINK_PROFILE")]
    profile: Option<String>,
}

impl RunOpts {
    async fn exec(
        self,
        explorer: &TestExplorer,
        workspaces: &[Utf8PathBuf],
        output: OutputContext,
    ) -> Result<i32> {
        let discovered = discover_all(explorer, workspaces).await;
        for (workspace, message) in &discovered.failures {
            warn!("discovery failed for `{workspace}`, its tests won't run: {message}");
        }

        let (included, excluded) = {
            let tree = explorer.tree().lock().await;
            (
                ids_for_longnames(&tree, workspaces, &self.include)?,
                ids_for_longnames(&tree, workspaces, &self.exclude)?,
            )
        };

        let sink = Arc::new(ConsoleReport::new(
            output.stderr_styles(),
            output.verbose,
            discovered.longnames(),
        ));
        let (handle, outcome) = explorer
            .run_tests(included, excluded, self.profile.as_deref(), sink)
            .await?;
        if !outcome.any_started() {
            return if outcome.skipped.is_empty() {
                Err(ExpectedError::NoTestsRun)
            } else {
                Err(ExpectedError::DispatchFailed {
                    errors: outcome.skipped,
                })
            };
        }
        for err in &outcome.skipped {
            warn!("{err}");
        }

        tokio::select! {
            () = handle.wait_ended() => {}
            res = tokio::signal::ctrl_c() => {
                res.map_err(|err| ExpectedError::SignalHandlerSetupError { err })?;
                warn!("interrupted, abandoning the run");
                return Err(ExpectedError::TestRunFailed);
            }
        }

        let stats = handle.stats();
        if stats.has_failures() {
            Err(ExpectedError::TestRunFailed)
        } else if stats.finished == 0 {
            Err(ExpectedError::NoTestsRun)
        } else {
            Ok(SuitelinkExitCode::OK)
        }
    }
}

/// Looks up long-names in every workspace. A long-name matching nodes in several workspaces
/// selects all of them.
fn ids_for_longnames(
    tree: &TreeState,
    workspaces: &[Utf8PathBuf],
    longnames: &[String],
) -> Result<Vec<TestId>> {
    let mut ids = Vec::with_capacity(longnames.len());
    for longname in longnames {
        let before = ids.len();
        ids.extend(
            workspaces
                .iter()
                .filter_map(|workspace| tree.find_by_longname(workspace, longname))
                .map(|node| node.id().clone()),
        );
        if ids.len() == before {
            return Err(ExpectedError::UnknownLongname {
                longname: longname.clone(),
            });
        }
    }
    Ok(ids)
}

#[derive(Debug, Args)]
struct WatchOpts {}

impl WatchOpts {
    async fn exec(self, explorer: &TestExplorer, workspaces: &[Utf8PathBuf]) -> Result<i32> {
        let discovered = discover_all(explorer, workspaces).await;
        for (workspace, roots) in &discovered.trees {
            info!(
                "watching `{workspace}` ({} top-level {})",
                roots.len(),
                if roots.len() == 1 { "item" } else { "items" }
            );
        }
        watch_workspaces(explorer, workspaces).await?;
        Ok(SuitelinkExitCode::OK)
    }
}

/// The fully expanded trees of every workspace after discovery.
struct Discovered {
    trees: Vec<(Utf8PathBuf, Vec<NodeSnapshot>)>,
    failures: Vec<(Utf8PathBuf, String)>,
}

impl Discovered {
    fn longnames(&self) -> HashMap<TestId, String> {
        fn walk(node: &NodeSnapshot, out: &mut HashMap<TestId, String>) {
            if !node.longname.is_empty() {
                out.insert(node.id.clone(), node.longname.clone());
            }
            for child in &node.children {
                walk(child, out);
            }
        }

        let mut out = HashMap::new();
        for (_, roots) in &self.trees {
            for root in roots {
                walk(root, &mut out);
            }
        }
        out
    }
}

async fn discover_all(explorer: &TestExplorer, workspaces: &[Utf8PathBuf]) -> Discovered {
    explorer.add_workspaces(workspaces.iter().cloned()).await;
    explorer.wait_idle().await;

    let mut tree = explorer.tree().lock().await;
    let mut trees = Vec::with_capacity(workspaces.len());
    let mut failures = Vec::new();
    for workspace in workspaces {
        tree.resolve_all(workspace);
        let roots = tree.snapshot(workspace);
        failures.extend(workspace_failures(workspace, &roots));
        trees.push((workspace.clone(), roots));
    }
    Discovered { trees, failures }
}

fn workspace_failures<'a>(
    workspace: &'a Utf8Path,
    roots: &'a [NodeSnapshot],
) -> impl Iterator<Item = (Utf8PathBuf, String)> + 'a {
    roots
        .iter()
        .filter(|root| root.kind == EntityKind::Error)
        .map(move |root| {
            (
                workspace.to_owned(),
                root.error.clone().unwrap_or_else(|| root.label.clone()),
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use pretty_assertions::assert_eq;
    use suitelink_metadata::TestEntity;

    #[test]
    fn parses_run_options() {
        let app = SuitelinkApp::try_parse_from([
            "suitelink",
            "--workspace",
            "a",
            "-w",
            "b",
            "run",
            "--include",
            "Root.Foo",
            "-e",
            "Root.Bar",
            "--profile",
            "debug",
        ])
        .expect("valid arguments");
        assert_eq!(app.common.workspaces, vec![Utf8PathBuf::from("a"), "b".into()]);
        match app.command {
            Command::Run(opts) => {
                assert_eq!(opts.include, vec!["Root.Foo".to_owned()]);
                assert_eq!(opts.exclude, vec!["Root.Bar".to_owned()]);
                assert_eq!(opts.profile.as_deref(), Some("debug"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn longnames_resolve_in_every_workspace() {
        let items = |prefix: &str| {
            let mut suite = TestEntity::new(format!("{prefix}/s1"), EntityKind::Suite, "Tests");
            suite.longname = "Tests".to_owned();
            let mut ws = TestEntity::new(format!("{prefix}/ws"), EntityKind::Workspace, prefix);
            ws.children = Some(vec![suite]);
            vec![ws]
        };
        let mut tree = TreeState::default();
        let workspaces = vec![Utf8PathBuf::from("/a"), "/b".into()];
        tree.apply_workspace_discovery(&workspaces[0], items("a"), Default::default());
        tree.apply_workspace_discovery(&workspaces[1], items("b"), Default::default());

        let ids = ids_for_longnames(&tree, &workspaces, &["Tests".to_owned()])
            .expect("long-name exists");
        assert_eq!(ids, vec![TestId::from("a/s1"), "b/s1".into()]);

        let err = ids_for_longnames(&tree, &workspaces, &["Tests.Missing".to_owned()])
            .expect_err("long-name doesn't exist");
        assert!(
            matches!(&err, ExpectedError::UnknownLongname { longname } if longname == "Tests.Missing"),
            "unexpected error: {err}"
        );
    }

    #[test]
    fn debug_assert_app() {
        use clap::CommandFactory;
        SuitelinkApp::command().debug_assert();
    }
}
