// Copyright (c) The suitelink Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::errors::{DisplayErrorChain, EnvironmentError};
use camino::{Utf8Path, Utf8PathBuf};
use futures::future::BoxFuture;
use std::{
    collections::HashMap,
    process::Stdio,
    sync::{Arc, Mutex as StdMutex, PoisonError},
};
use tokio::{process::Command, sync::Mutex};
use tracing::{debug, warn};

/// Decides whether a workspace's execution environment can run tests.
pub trait EnvironmentCheck: Send + Sync {
    /// Checks the environment of `workspace` using the configured check `command`.
    ///
    /// An empty command means no check is configured.
    fn check<'a>(
        &'a self,
        workspace: &'a Utf8Path,
        command: &'a [String],
    ) -> BoxFuture<'a, Result<(), EnvironmentError>>;
}

/// Checks the environment by running a command in the workspace folder. A zero exit code means
/// the environment is valid.
#[derive(Clone, Debug, Default)]
pub struct CommandEnvironmentCheck {
    _private: (),
}

impl CommandEnvironmentCheck {
    /// Creates a new check.
    pub fn new() -> Self {
        Self::default()
    }

    async fn run(&self, workspace: &Utf8Path, command: &[String]) -> Result<(), EnvironmentError> {
        let Some((program, args)) = command.split_first() else {
            return Ok(());
        };
        let display_cmd = shell_words::join(command);
        debug!("checking environment of `{workspace}` with `{display_cmd}`");

        let output = Command::new(program)
            .args(args)
            .current_dir(workspace)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|err| EnvironmentError::Spawn {
                command: display_cmd.clone(),
                err,
            })?;

        if output.status.success() {
            Ok(())
        } else {
            Err(EnvironmentError::CheckFailed {
                command: display_cmd,
                exit_code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            })
        }
    }
}

impl EnvironmentCheck for CommandEnvironmentCheck {
    fn check<'a>(
        &'a self,
        workspace: &'a Utf8Path,
        command: &'a [String],
    ) -> BoxFuture<'a, Result<(), EnvironmentError>> {
        Box::pin(self.run(workspace, command))
    }
}

/// Asks the user to fix a workspace's execution environment.
pub trait RemediationPrompt: Send + Sync {
    /// Shows the prompt. Completes once the prompt has been handled.
    fn prompt<'a>(
        &'a self,
        workspace: &'a Utf8Path,
        error: &'a EnvironmentError,
    ) -> BoxFuture<'a, ()>;
}

/// A [`RemediationPrompt`] that logs a warning.
#[derive(Clone, Debug, Default)]
pub struct LogRemediationPrompt {
    _private: (),
}

impl LogRemediationPrompt {
    /// Creates a new prompt.
    pub fn new() -> Self {
        Self::default()
    }
}

impl RemediationPrompt for LogRemediationPrompt {
    fn prompt<'a>(
        &'a self,
        workspace: &'a Utf8Path,
        error: &'a EnvironmentError,
    ) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            warn!(
                "the execution environment of `{workspace}` is invalid: {}",
                DisplayErrorChain(error)
            );
        })
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum EnvironmentStatus {
    Unknown,
    Valid,
    Invalid { prompted: bool },
}

/// Tracks which workspaces have a valid execution environment.
///
/// Checks for one workspace are serialized, and an invalid environment is prompted about once
/// until [`invalidate`](Self::invalidate) is called for that workspace.
pub struct EnvironmentGuard {
    check: Arc<dyn EnvironmentCheck>,
    prompt: Arc<dyn RemediationPrompt>,
    slots: StdMutex<HashMap<Utf8PathBuf, Arc<Mutex<EnvironmentStatus>>>>,
}

impl std::fmt::Debug for EnvironmentGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvironmentGuard").finish_non_exhaustive()
    }
}

impl EnvironmentGuard {
    /// Creates a new guard.
    pub fn new(check: Arc<dyn EnvironmentCheck>, prompt: Arc<dyn RemediationPrompt>) -> Self {
        Self {
            check,
            prompt,
            slots: StdMutex::new(HashMap::new()),
        }
    }

    /// Returns true if the environment of `workspace` is valid.
    ///
    /// A valid result is remembered. An invalid one is rechecked next time, but prompted about
    /// only once.
    pub async fn ensure_valid(&self, workspace: &Utf8Path, command: &[String]) -> bool {
        let slot = self.slot(workspace);
        let mut status = slot.lock().await;
        if *status == EnvironmentStatus::Valid {
            return true;
        }

        match self.check.check(workspace, command).await {
            Ok(()) => {
                *status = EnvironmentStatus::Valid;
                true
            }
            Err(err) => {
                let prompted = matches!(*status, EnvironmentStatus::Invalid { prompted: true });
                if prompted {
                    debug!("environment of `{workspace}` still invalid, not prompting again");
                } else {
                    self.prompt.prompt(workspace, &err).await;
                }
                *status = EnvironmentStatus::Invalid { prompted: true };
                false
            }
        }
    }

    /// Forgets what is known about a workspace's environment, for example after the user
    /// switched interpreters.
    pub fn invalidate(&self, workspace: &Utf8Path) {
        self.slots().remove(workspace);
    }

    /// Forgets what is known about every workspace.
    pub fn invalidate_all(&self) {
        self.slots().clear();
    }

    fn slot(&self, workspace: &Utf8Path) -> Arc<Mutex<EnvironmentStatus>> {
        self.slots()
            .entry(workspace.to_owned())
            .or_insert_with(|| Arc::new(Mutex::new(EnvironmentStatus::Unknown)))
            .clone()
    }

    fn slots(
        &self,
    ) -> std::sync::MutexGuard<'_, HashMap<Utf8PathBuf, Arc<Mutex<EnvironmentStatus>>>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct FakeCheck {
        valid: std::sync::atomic::AtomicBool,
        calls: AtomicUsize,
    }

    impl EnvironmentCheck for FakeCheck {
        fn check<'a>(
            &'a self,
            _workspace: &'a Utf8Path,
            _command: &'a [String],
        ) -> BoxFuture<'a, Result<(), EnvironmentError>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let valid = self.valid.load(Ordering::SeqCst);
            Box::pin(async move {
                if valid {
                    Ok(())
                } else {
                    Err(EnvironmentError::CheckFailed {
                        command: "check".to_owned(),
                        exit_code: Some(1),
                        stderr: String::new(),
                    })
                }
            })
        }
    }

    #[derive(Default)]
    struct CountingPrompt {
        prompts: AtomicUsize,
    }

    impl RemediationPrompt for CountingPrompt {
        fn prompt<'a>(
            &'a self,
            _workspace: &'a Utf8Path,
            _error: &'a EnvironmentError,
        ) -> BoxFuture<'a, ()> {
            self.prompts.fetch_add(1, Ordering::SeqCst);
            Box::pin(async {})
        }
    }

    #[tokio::test]
    async fn invalid_environment_prompts_once() {
        let check = Arc::new(FakeCheck::default());
        let prompt = Arc::new(CountingPrompt::default());
        let guard = Arc::new(EnvironmentGuard::new(check.clone(), prompt.clone()));
        let ws = Utf8Path::new("/p");

        let (a, b) = tokio::join!(guard.ensure_valid(ws, &[]), guard.ensure_valid(ws, &[]));
        assert!(!a && !b);
        assert!(!guard.ensure_valid(ws, &[]).await);
        assert_eq!(prompt.prompts.load(Ordering::SeqCst), 1);
        assert_eq!(check.calls.load(Ordering::SeqCst), 3, "invalid results are rechecked");

        // Once the environment changes, a new failure prompts again.
        guard.invalidate(ws);
        assert!(!guard.ensure_valid(ws, &[]).await);
        assert_eq!(prompt.prompts.load(Ordering::SeqCst), 2);

        check.valid.store(true, Ordering::SeqCst);
        assert!(guard.ensure_valid(ws, &[]).await);
        assert!(guard.ensure_valid(ws, &[]).await);
        assert_eq!(check.calls.load(Ordering::SeqCst), 5, "valid results are remembered");
    }

    #[tokio::test]
    async fn empty_command_is_valid() {
        let check = CommandEnvironmentCheck::new();
        check
            .check(Utf8Path::new("/"), &[])
            .await
            .expect("no check configured");
    }
}
