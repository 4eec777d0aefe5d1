// Copyright (c) The suitelink Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{Range, SeverityParseError, TestEntity};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt};

/// In-memory contents of unsaved documents, keyed by document URI.
///
/// Passed to the tool over standard input so that discovery reflects what the user sees rather
/// than what is on disk.
pub type UnsavedDocuments = BTreeMap<String, String>;

/// Diagnostics produced by a discovery invocation, keyed by document URI.
pub type DiagnosticsByUri = BTreeMap<String, Vec<Diagnostic>>;

/// The output of a `discover` invocation.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryOutput {
    /// The discovered entities, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Vec<TestEntity>>,

    /// Per-document diagnostics, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<DiagnosticsByUri>,
}

impl DiscoveryOutput {
    /// Parses discovery output from raw JSON.
    ///
    /// Empty output is treated as "nothing discovered".
    pub fn parse(json: &[u8]) -> Result<Self, serde_json::Error> {
        if json.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        serde_json::from_slice(json)
    }

    /// Splits the output into items and diagnostics.
    pub fn into_parts(self) -> (Vec<TestEntity>, DiagnosticsByUri) {
        (
            self.items.unwrap_or_default(),
            self.diagnostics.unwrap_or_default(),
        )
    }
}

/// What a discovery invocation should return.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscoveryMode {
    /// The full tree: workspace, suites and tests.
    #[default]
    All,

    /// Only the tests of the selected suite.
    Tests,
}

impl DiscoveryMode {
    /// Returns the command-line argument for this mode.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Tests => "tests",
        }
    }
}

impl fmt::Display for DiscoveryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single diagnostic reported against a document.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// The range the diagnostic applies to.
    pub range: Range,

    /// The human-readable message.
    pub message: String,

    /// The severity. Absent means the consumer decides.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<DiagnosticSeverity>,

    /// The component that produced this diagnostic.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    /// A machine-readable code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<DiagnosticCode>,
}

/// The severity of a [`Diagnostic`], encoded numerically on the wire.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum DiagnosticSeverity {
    /// An error.
    Error,

    /// A warning.
    Warning,

    /// Informational.
    Information,

    /// A hint.
    Hint,
}

impl TryFrom<u8> for DiagnosticSeverity {
    type Error = SeverityParseError;

    fn try_from(value: u8) -> Result<Self, SeverityParseError> {
        match value {
            1 => Ok(Self::Error),
            2 => Ok(Self::Warning),
            3 => Ok(Self::Information),
            4 => Ok(Self::Hint),
            other => Err(SeverityParseError::new(other)),
        }
    }
}

impl From<DiagnosticSeverity> for u8 {
    fn from(value: DiagnosticSeverity) -> Self {
        match value {
            DiagnosticSeverity::Error => 1,
            DiagnosticSeverity::Warning => 2,
            DiagnosticSeverity::Information => 3,
            DiagnosticSeverity::Hint => 4,
        }
    }
}

/// A diagnostic code, which tools may emit as either a number or a string.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DiagnosticCode {
    /// A numeric code.
    Number(i64),

    /// A string code.
    String(String),
}

impl fmt::Display for DiagnosticCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(code) => write!(f, "{code}"),
            Self::String(code) => f.write_str(code),
        }
    }
}
