// Copyright (c) The suitelink Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{EntityKind, TestId};
use std::{error, fmt, num::ParseIntError};

/// A workspace entity did not wrap exactly one suite.
///
/// Returned by [`TestEntity::workspace_suite`](crate::TestEntity::workspace_suite).
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct WorkspaceShapeError {
    id: TestId,
    child_kinds: Vec<EntityKind>,
}

impl WorkspaceShapeError {
    pub(crate) fn new(id: TestId, child_kinds: Vec<EntityKind>) -> Self {
        Self { id, child_kinds }
    }

    /// The identifier of the malformed workspace entity.
    pub fn id(&self) -> &TestId {
        &self.id
    }

    /// The kinds of the children that were found instead.
    pub fn child_kinds(&self) -> &[EntityKind] {
        &self.child_kinds
    }
}

impl fmt::Display for WorkspaceShapeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kinds: Vec<_> = self.child_kinds.iter().map(|kind| kind.as_str()).collect();
        write!(
            f,
            "workspace entity `{}` must wrap exactly one suite, found [{}]",
            self.id,
            kinds.join(", ")
        )
    }
}

impl error::Error for WorkspaceShapeError {}

/// An error that occurs while parsing a [`RunId`](crate::RunId) from a string.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RunIdParseError {
    input: String,
    err: ParseIntError,
}

impl RunIdParseError {
    pub(crate) fn new(input: impl Into<String>, err: ParseIntError) -> Self {
        Self {
            input: input.into(),
            err,
        }
    }
}

impl fmt::Display for RunIdParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid run id `{}`", self.input)
    }
}

impl error::Error for RunIdParseError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        Some(&self.err)
    }
}

/// An error that occurs while converting a number into a
/// [`DiagnosticSeverity`](crate::DiagnosticSeverity).
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SeverityParseError {
    input: u8,
}

impl SeverityParseError {
    pub(crate) fn new(input: u8) -> Self {
        Self { input }
    }
}

impl fmt::Display for SeverityParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "unrecognized diagnostic severity {} (known values: 1, 2, 3, 4)",
            self.input
        )
    }
}

impl error::Error for SeverityParseError {}
