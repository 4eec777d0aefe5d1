// Copyright (c) The suitelink Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The run dispatcher.
//!
//! The dispatcher turns a run request into one debug session per workspace folder. Each session
//! gets its own run id, and all sessions of a request feed the same [`TestRunHandle`].

use super::{EnvironmentGuard, RunRegistry, WorkspacePlan, plan_runs};
use crate::{
    config::{RunProfile, WorkspaceConfigs},
    errors::{DispatchError, DisplayErrorChain},
    helpers::plural,
    reporter::{ExecutionEvent, RoutedEvent, TestRunHandle},
    session::{DebugSession, SessionLauncher},
    tree::TestTreeStore,
};
use std::sync::Arc;
use suitelink_metadata::{LaunchConfig, LaunchRequest, RunId, TestId};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// A request to run tests.
#[derive(Clone, Debug)]
pub struct RunRequest {
    /// The nodes to run. Empty means everything.
    pub included: Vec<TestId>,

    /// The nodes to skip.
    pub excluded: Vec<TestId>,

    /// The profile to run with.
    pub profile: Arc<RunProfile>,
}

/// What [`RunDispatcher::run`] did.
#[derive(Debug, Default)]
pub struct DispatchOutcome {
    /// Runs whose sessions started.
    pub started: Vec<RunId>,

    /// Workspaces that were skipped, and why.
    pub skipped: Vec<DispatchError>,
}

impl DispatchOutcome {
    /// Returns true if at least one session started.
    pub fn any_started(&self) -> bool {
        !self.started.is_empty()
    }
}

/// Starts debug sessions for run requests.
pub struct RunDispatcher {
    tree: Arc<TestTreeStore>,
    configs: Arc<WorkspaceConfigs>,
    registry: Arc<RunRegistry>,
    launcher: Arc<dyn SessionLauncher>,
    environment: Arc<EnvironmentGuard>,
    events: mpsc::UnboundedSender<RoutedEvent>,
}

impl std::fmt::Debug for RunDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunDispatcher")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl RunDispatcher {
    /// Creates a new dispatcher. Session events are forwarded to `events`.
    pub fn new(
        tree: Arc<TestTreeStore>,
        configs: Arc<WorkspaceConfigs>,
        registry: Arc<RunRegistry>,
        launcher: Arc<dyn SessionLauncher>,
        environment: Arc<EnvironmentGuard>,
        events: mpsc::UnboundedSender<RoutedEvent>,
    ) -> Self {
        Self {
            tree,
            configs,
            registry,
            launcher,
            environment,
            events,
        }
    }

    /// Starts one session per workspace folder touched by `request`.
    ///
    /// If no session starts, `handle` is ended before this returns. Otherwise it ends once the
    /// last session has terminated.
    pub async fn run(&self, request: &RunRequest, handle: Arc<TestRunHandle>) -> DispatchOutcome {
        let hold = self.registry.hold(handle.clone());

        let (plans, mut skipped) = {
            let tree = self.tree.lock().await;
            plan_runs(&tree, &request.included, &request.excluded)
        };
        for err in &skipped {
            warn!("{}", DisplayErrorChain(err));
        }

        let mut started = Vec::with_capacity(plans.len());
        for plan in plans {
            match self.dispatch(plan, &request.profile, &handle).await {
                Ok(run_id) => started.push(run_id),
                Err(err) => {
                    warn!("{}", DisplayErrorChain(&err));
                    skipped.push(err);
                }
            }
        }

        if started.is_empty() {
            info!(run = handle.name(), "no sessions started, ending run");
        } else {
            info!(
                run = handle.name(),
                "started {} {}",
                started.len(),
                plural::runs_str(started.len())
            );
        }
        drop(hold);

        DispatchOutcome { started, skipped }
    }

    async fn dispatch(
        &self,
        plan: WorkspacePlan,
        profile: &RunProfile,
        handle: &Arc<TestRunHandle>,
    ) -> Result<RunId, DispatchError> {
        let config = match self.configs.get(&plan.workspace) {
            Some(config) => config,
            None => self.configs.load(&plan.workspace),
        };

        if !self
            .environment
            .ensure_valid(&plan.workspace, config.environment_check())
            .await
        {
            return Err(DispatchError::EnvironmentInvalid {
                workspace: plan.workspace,
            });
        }

        let run_id = self.registry.allocate();
        self.registry.register(run_id, handle.clone());

        let name = match plan.workspace.file_name() {
            Some(folder) => format!("{} ({folder})", profile.description()),
            None => profile.description().to_owned(),
        };
        let launch = LaunchConfig {
            session_type: config.session_type().to_owned(),
            request: LaunchRequest::Launch,
            name,
            cwd: plan.workspace.clone(),
            run_id,
            suites: plan.suites,
            parse_include: plan.parse_include,
            included_long_names: plan.included_long_names,
            excluded_long_names: plan.excluded_long_names,
            include_tags: profile.include_tags().to_vec(),
            exclude_tags: profile.exclude_tags().to_vec(),
            args: profile.args().to_vec(),
            no_debug: profile.no_debug(),
            target: plan.target,
        };
        debug!(%run_id, workspace = %plan.workspace, "launching session");

        match self
            .launcher
            .launch(&config.session_command(), launch)
            .await
        {
            Ok(session) => {
                tokio::spawn(forward_session(session, self.events.clone()));
                Ok(run_id)
            }
            Err(err) => {
                // The dispatcher's own hold keeps the report alive here.
                self.registry.release(run_id);
                Err(DispatchError::SessionStart {
                    workspace: plan.workspace,
                    err,
                })
            }
        }
    }
}

/// Forwards a session's events, followed by [`ExecutionEvent::SessionTerminated`] once the
/// session goes away.
async fn forward_session(mut session: DebugSession, events: mpsc::UnboundedSender<RoutedEvent>) {
    let run_id = session.run_id;
    while let Some(event) = session.events.recv().await {
        if events.send(RoutedEvent::new(run_id, event)).is_err() {
            debug!(%run_id, "correlator gone, dropping session events");
            return;
        }
    }
    let _ = events.send(RoutedEvent::new(run_id, ExecutionEvent::SessionTerminated));
}
