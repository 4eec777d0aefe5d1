// Copyright (c) The suitelink Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::reporter::TestRunHandle;
use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
};
use suitelink_metadata::RunId;
use tracing::debug;

/// Maps run ids to the reports they feed.
///
/// Several run ids may share one [`TestRunHandle`]. A handle is referenced once per registered
/// run plus once per outstanding [`RunHold`]; the report ends when the last reference goes away.
#[derive(Debug, Default)]
pub struct RunRegistry {
    next_id: AtomicU64,
    state: Mutex<RegistryState>,
}

#[derive(Debug, Default)]
struct RegistryState {
    runs: HashMap<RunId, Arc<TestRunHandle>>,
    holds: Vec<(Arc<TestRunHandle>, usize)>,
}

impl RegistryState {
    fn is_referenced(&self, handle: &Arc<TestRunHandle>) -> bool {
        self.runs.values().any(|other| Arc::ptr_eq(other, handle))
            || self.holds.iter().any(|(held, _)| Arc::ptr_eq(held, handle))
    }
}

/// The result of [`RunRegistry::release`].
#[derive(Clone, Debug)]
pub enum Release {
    /// The run id was not registered, or was already released.
    NotRegistered,

    /// The run id was released, and its report is still referenced elsewhere.
    Released,

    /// The run id was released, and it was the last reference to its report.
    LastReference(Arc<TestRunHandle>),
}

impl RunRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a fresh run id. Ids are unique and increasing for the lifetime of the registry.
    pub fn allocate(&self) -> RunId {
        RunId::new(self.next_id.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// Registers a run as feeding `handle`.
    pub fn register(&self, run_id: RunId, handle: Arc<TestRunHandle>) {
        debug!(%run_id, run = handle.name(), "registering run");
        self.state().runs.insert(run_id, handle);
    }

    /// Returns the report a run feeds.
    pub fn get(&self, run_id: RunId) -> Option<Arc<TestRunHandle>> {
        self.state().runs.get(&run_id).cloned()
    }

    /// Returns the number of registered runs.
    pub fn len(&self) -> usize {
        self.state().runs.len()
    }

    /// Returns true if no runs are registered.
    pub fn is_empty(&self) -> bool {
        self.state().runs.is_empty()
    }

    /// Releases a run. Releasing a run twice is a no-op.
    pub fn release(&self, run_id: RunId) -> Release {
        let mut state = self.state();
        let Some(handle) = state.runs.remove(&run_id) else {
            return Release::NotRegistered;
        };
        if state.is_referenced(&handle) {
            Release::Released
        } else {
            Release::LastReference(handle)
        }
    }

    /// Keeps `handle` referenced until the returned guard is dropped.
    ///
    /// When the guard is dropped and no run refers to the handle any more, the report is ended.
    pub fn hold(self: &Arc<Self>, handle: Arc<TestRunHandle>) -> RunHold {
        {
            let mut state = self.state();
            match state
                .holds
                .iter_mut()
                .find(|(held, _)| Arc::ptr_eq(held, &handle))
            {
                Some((_, count)) => *count += 1,
                None => state.holds.push((handle.clone(), 1)),
            }
        }
        RunHold {
            registry: self.clone(),
            handle,
        }
    }

    fn release_hold(&self, handle: &Arc<TestRunHandle>) -> bool {
        let mut state = self.state();
        if let Some(index) = state
            .holds
            .iter()
            .position(|(held, _)| Arc::ptr_eq(held, handle))
        {
            let count = &mut state.holds[index].1;
            *count -= 1;
            if *count == 0 {
                state.holds.swap_remove(index);
            }
        }
        !state.is_referenced(handle)
    }

    fn state(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Keeps a report alive while runs are being dispatched for it.
#[derive(Debug)]
pub struct RunHold {
    registry: Arc<RunRegistry>,
    handle: Arc<TestRunHandle>,
}

impl RunHold {
    /// Returns the held report.
    pub fn handle(&self) -> &Arc<TestRunHandle> {
        &self.handle
    }
}

impl Drop for RunHold {
    fn drop(&mut self) {
        if self.registry.release_hold(&self.handle) {
            self.handle.end();
        }
    }
}
