// Copyright (c) The suitelink Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use std::collections::BTreeSet;
use suitelink_metadata::{Diagnostic, DiagnosticsByUri};

/// Diagnostics reported by discovery, grouped by workspace and document.
#[derive(Clone, Debug, Default)]
pub struct DiagnosticsStore {
    by_workspace: IndexMap<Utf8PathBuf, DiagnosticsByUri>,
}

impl DiagnosticsStore {
    /// Replaces all diagnostics of a workspace.
    ///
    /// Returns the documents whose diagnostics changed, including documents that no longer have
    /// any.
    pub fn replace_workspace(
        &mut self,
        workspace: &Utf8Path,
        diagnostics: DiagnosticsByUri,
    ) -> BTreeSet<String> {
        let previous = self
            .by_workspace
            .insert(workspace.to_owned(), diagnostics)
            .unwrap_or_default();
        let current = &self.by_workspace[workspace];

        let mut changed = BTreeSet::new();
        for (uri, diags) in &previous {
            if current.get(uri) != Some(diags) {
                changed.insert(uri.clone());
            }
        }
        for (uri, diags) in current {
            if previous.get(uri) != Some(diags) {
                changed.insert(uri.clone());
            }
        }
        changed
    }

    /// Replaces the diagnostics of a single document. Returns true if they changed.
    pub fn replace_document(
        &mut self,
        workspace: &Utf8Path,
        uri: &str,
        diagnostics: Vec<Diagnostic>,
    ) -> bool {
        let entry = self.by_workspace.entry(workspace.to_owned()).or_default();
        if diagnostics.is_empty() {
            entry.remove(uri).is_some()
        } else {
            entry.insert(uri.to_owned(), diagnostics.clone()) != Some(diagnostics)
        }
    }

    /// Removes all diagnostics of a workspace, returning the documents that were cleared.
    pub fn clear_workspace(&mut self, workspace: &Utf8Path) -> BTreeSet<String> {
        self.by_workspace
            .shift_remove(workspace)
            .map(|diags| diags.into_keys().collect())
            .unwrap_or_default()
    }

    /// Returns the diagnostics for a document.
    pub fn get(&self, uri: &str) -> &[Diagnostic] {
        self.by_workspace
            .values()
            .find_map(|diags| diags.get(uri))
            .map_or(&[], Vec::as_slice)
    }

    /// Iterates over every document that has diagnostics.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[Diagnostic])> {
        self.by_workspace
            .values()
            .flat_map(|diags| diags.iter())
            .map(|(uri, diags)| (uri.as_str(), diags.as_slice()))
    }
}
