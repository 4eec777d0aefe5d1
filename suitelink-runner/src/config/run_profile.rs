// Copyright (c) The suitelink Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::RunProfileConfig;
use crate::errors::ProfileNotFound;
use indexmap::IndexMap;
use itertools::Itertools;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

/// A named way of running tests, such as "run" or "debug".
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RunProfile {
    name: String,
    config: RunProfileConfig,
}

impl RunProfile {
    /// Creates a new profile from its configuration.
    pub fn new(name: impl Into<String>, config: RunProfileConfig) -> Self {
        Self {
            name: name.into(),
            config,
        }
    }

    /// Returns the name of this profile.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the description, falling back to the name.
    pub fn description(&self) -> &str {
        self.config.description.as_deref().unwrap_or(&self.name)
    }

    /// Returns true if runs with this profile don't attach the debugger.
    pub fn no_debug(&self) -> bool {
        self.config.no_debug
    }

    /// Returns true if this is the default profile.
    pub fn is_default(&self) -> bool {
        self.config.default
    }

    /// Tags selecting which tests to include.
    pub fn include_tags(&self) -> &[String] {
        &self.config.include_tags
    }

    /// Tags selecting which tests to exclude.
    pub fn exclude_tags(&self) -> &[String] {
        &self.config.exclude_tags
    }

    /// Extra arguments forwarded to the tool.
    pub fn args(&self) -> &[String] {
        &self.config.args
    }
}

/// The list of run profiles offered to the user.
///
/// The list is rebuilt whenever configuration changes; rebuilds are serialized so that
/// overlapping configuration events never interleave.
#[derive(Debug, Default)]
pub struct RunProfileList {
    profiles: Mutex<IndexMap<String, Arc<RunProfile>>>,
}

impl RunProfileList {
    /// Creates an empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the list with the given profiles.
    ///
    /// Profiles from multiple workspaces are merged by name; the first definition wins.
    pub async fn rebuild<'a>(
        &self,
        sources: impl IntoIterator<Item = &'a IndexMap<String, RunProfileConfig>>,
    ) {
        let mut profiles = self.profiles.lock().await;
        let mut rebuilt = IndexMap::new();
        for source in sources {
            for (name, config) in source {
                rebuilt
                    .entry(name.clone())
                    .or_insert_with(|| Arc::new(RunProfile::new(name.clone(), config.clone())));
            }
        }
        debug!(
            "rebuilt run profiles: {}",
            rebuilt.keys().join(", ")
        );
        *profiles = rebuilt;
    }

    /// Returns the profile with the given name, or the default profile if `name` is `None`.
    pub async fn get(&self, name: Option<&str>) -> Result<Arc<RunProfile>, ProfileNotFound> {
        let profiles = self.profiles.lock().await;
        let found = match name {
            Some(name) => profiles.get(name),
            None => profiles.values().find(|profile| profile.is_default()),
        };
        found.cloned().ok_or_else(|| {
            ProfileNotFound::new(name.unwrap_or("<default>"), profiles.keys().cloned())
        })
    }

    /// Returns all profiles, in definition order.
    pub async fn all(&self) -> Vec<Arc<RunProfile>> {
        self.profiles.lock().await.values().cloned().collect()
    }
}
