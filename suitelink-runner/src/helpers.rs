// Copyright (c) The suitelink Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! General support code for suitelink-runner.

use camino::{Utf8Path, Utf8PathBuf};
use url::Url;

/// Utilities for pluralizing various words based on count or plurality.
pub mod plural {
    /// Returns "test" if `count` is 1, otherwise "tests".
    pub fn tests_str(count: usize) -> &'static str {
        if count == 1 { "test" } else { "tests" }
    }

    /// Returns "run" if `count` is 1, otherwise "runs".
    pub fn runs_str(count: usize) -> &'static str {
        if count == 1 { "run" } else { "runs" }
    }

    /// Returns "node" if `count` is 1, otherwise "nodes".
    pub fn nodes_str(count: usize) -> &'static str {
        if count == 1 { "node" } else { "nodes" }
    }

    /// Returns "workspace" if `count` is 1, otherwise "workspaces".
    pub fn workspaces_str(count: usize) -> &'static str {
        if count == 1 {
            "workspace"
        } else {
            "workspaces"
        }
    }
}

/// Converts a document URI into a filesystem path.
///
/// Returns `None` for URIs that don't parse, don't use the `file` scheme, or decode to a
/// non-UTF-8 path.
pub fn uri_to_path(uri: &str) -> Option<Utf8PathBuf> {
    let url = Url::parse(uri).ok()?;
    if url.scheme() != "file" {
        return None;
    }
    let path = url.to_file_path().ok()?;
    Utf8PathBuf::from_path_buf(path).ok()
}

/// Converts an absolute filesystem path into a percent-encoded `file` URI.
///
/// Returns `None` if `path` is relative.
pub fn path_to_uri(path: &Utf8Path) -> Option<String> {
    Url::from_file_path(path.as_std_path())
        .ok()
        .map(String::from)
}

/// Returns the innermost folder in `folders` containing `path`.
pub fn owning_folder<'a>(
    folders: impl IntoIterator<Item = &'a Utf8PathBuf>,
    path: &Utf8Path,
) -> Option<&'a Utf8PathBuf> {
    folders
        .into_iter()
        .filter(|folder| path.starts_with(folder))
        .max_by_key(|folder| folder.components().count())
}

/// Returns true if `ancestor` is a strict dotted prefix of `longname`.
///
/// `A.B` is an ancestor of `A.B.C` but not of `A.BC`.
pub fn is_longname_ancestor(ancestor: &str, longname: &str) -> bool {
    longname
        .strip_prefix(ancestor)
        .is_some_and(|rest| rest.starts_with('.'))
}
