// Copyright (c) The suitelink Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Debouncing and superseding refreshes.
//!
//! Refreshes are keyed by [`RefreshScope`]. Scheduling a refresh resets the timer of a pending
//! refresh with the same scope, and cancels pending or running refreshes with scopes it contains.
//! Cancellation reaches into the running discovery, so a superseded tool invocation is killed.

use crate::cancel::{CancelSource, CancelToken};
use camino::Utf8PathBuf;
use futures::future::BoxFuture;
use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};
use tokio::sync::watch;
use tracing::debug;

/// What a refresh covers.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum RefreshScope {
    /// Every workspace folder.
    Global,

    /// One workspace folder.
    Workspace(Utf8PathBuf),

    /// The suite defined by one document.
    Document {
        /// The workspace folder owning the document.
        workspace: Utf8PathBuf,

        /// The document.
        uri: String,
    },
}

impl RefreshScope {
    /// Returns true if refreshing `self` also refreshes everything `other` covers.
    pub fn contains(&self, other: &RefreshScope) -> bool {
        match (self, other) {
            (Self::Global, _) => true,
            (Self::Workspace(a), Self::Workspace(b)) => a == b,
            (Self::Workspace(a), Self::Document { workspace, .. }) => a == workspace,
            (Self::Document { uri: a, .. }, Self::Document { uri: b, .. }) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for RefreshScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Global => write!(f, "all workspaces"),
            Self::Workspace(workspace) => write!(f, "workspace `{workspace}`"),
            Self::Document { uri, .. } => write!(f, "document `{uri}`"),
        }
    }
}

/// Why a refresh was requested.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RefreshReason {
    /// The explorer started.
    Startup,

    /// The user asked for it.
    Manual,

    /// A file changed on disk.
    FileChanged,

    /// A document was opened, edited, saved or closed.
    DocumentChanged,

    /// Workspace folders were added or removed.
    WorkspaceFoldersChanged,

    /// Configuration changed.
    ConfigurationChanged,

    /// The execution environment changed.
    EnvironmentChanged,

    /// The discovery cache was cleared.
    CacheCleared,

    /// A node was expanded while its workspace's cache was stale.
    NodeExpanded,
}

/// A refresh to perform.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RefreshRequest {
    /// What to refresh.
    pub scope: RefreshScope,

    /// Why.
    pub reason: RefreshReason,
}

impl RefreshRequest {
    /// Creates a new request.
    pub fn new(scope: RefreshScope, reason: RefreshReason) -> Self {
        Self { scope, reason }
    }
}

/// Performs refreshes once their debounce period has elapsed.
pub trait RefreshExecutor: Send + Sync + 'static {
    /// Performs `request`. Implementations should stop early once `cancel` fires.
    fn execute(
        self: Arc<Self>,
        request: RefreshRequest,
        cancel: CancelToken,
    ) -> BoxFuture<'static, ()>;
}

/// Debounces refresh requests per scope.
pub struct RefreshScheduler {
    executor: Arc<dyn RefreshExecutor>,
    shared: Arc<Shared>,
}

struct Shared {
    pending: Mutex<PendingState>,
    pending_count: watch::Sender<usize>,
}

#[derive(Default)]
struct PendingState {
    next_generation: u64,
    entries: HashMap<RefreshScope, PendingRefresh>,
}

struct PendingRefresh {
    generation: u64,
    cancel: CancelSource,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, PendingState> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn finish(&self, scope: &RefreshScope, generation: u64) {
        let mut state = self.state();
        if state
            .entries
            .get(scope)
            .is_some_and(|entry| entry.generation == generation)
        {
            state.entries.remove(scope);
        }
        self.pending_count.send_replace(state.entries.len());
    }
}

impl fmt::Debug for RefreshScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefreshScheduler")
            .field("pending", &self.pending_len())
            .finish_non_exhaustive()
    }
}

impl RefreshScheduler {
    /// Creates a new scheduler that hands fired refreshes to `executor`.
    pub fn new(executor: Arc<dyn RefreshExecutor>) -> Self {
        let (pending_count, _) = watch::channel(0);
        Self {
            executor,
            shared: Arc::new(Shared {
                pending: Mutex::new(PendingState::default()),
                pending_count,
            }),
        }
    }

    /// Schedules a refresh to run after `debounce`. Must be called from within a Tokio runtime.
    ///
    /// Any pending or running refresh whose scope is contained in `request.scope` is cancelled,
    /// including one for the same scope, so the newest request's parameters win.
    pub fn schedule(&self, request: RefreshRequest, debounce: Duration) {
        let cancel = CancelSource::new();
        let token = cancel.token();
        let generation = {
            let mut state = self.shared.state();
            state.entries.retain(|scope, entry| {
                if request.scope.contains(scope) {
                    debug!("refresh of {scope} superseded by refresh of {}", request.scope);
                    entry.cancel.cancel();
                    false
                } else {
                    true
                }
            });
            let generation = state.next_generation;
            state.next_generation += 1;
            state.entries.insert(
                request.scope.clone(),
                PendingRefresh { generation, cancel },
            );
            self.shared.pending_count.send_replace(state.entries.len());
            generation
        };

        let executor = self.executor.clone();
        let shared = self.shared.clone();
        tokio::spawn(async move {
            tokio::select! {
                biased;
                () = token.cancelled() => {
                    return;
                }
                () = tokio::time::sleep(debounce) => {}
            }
            debug!("refreshing {} ({:?})", request.scope, request.reason);
            let scope = request.scope.clone();
            executor.execute(request, token).await;
            shared.finish(&scope, generation);
        });
    }

    /// Cancels every pending and running refresh.
    pub fn cancel_all(&self) {
        let mut state = self.shared.state();
        for (_, entry) in state.entries.drain() {
            entry.cancel.cancel();
        }
        self.shared.pending_count.send_replace(0);
    }

    /// Returns the number of refreshes that are waiting or running.
    pub fn pending_len(&self) -> usize {
        self.shared.state().entries.len()
    }

    /// Returns true if a waiting or running refresh also refreshes everything `scope` covers.
    pub fn is_covered(&self, scope: &RefreshScope) -> bool {
        self.shared
            .state()
            .entries
            .keys()
            .any(|pending| pending.contains(scope))
    }

    /// Completes once no waiting or running refresh covers `scope`.
    pub async fn wait_covering(&self, scope: &RefreshScope) {
        // Subscribe before checking so that a refresh finishing in between isn't missed.
        let mut receiver = self.shared.pending_count.subscribe();
        while self.is_covered(scope) {
            if receiver.changed().await.is_err() {
                return;
            }
        }
    }

    /// Completes once no refresh is waiting or running.
    pub async fn wait_idle(&self) {
        let mut receiver = self.shared.pending_count.subscribe();
        // The sender is owned by `self`, so this can't fail.
        let _ = receiver.wait_for(|count| *count == 0).await;
    }
}

impl Drop for RefreshScheduler {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
