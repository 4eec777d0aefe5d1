// Copyright (c) The suitelink Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Core functionality for suitelink: bridging an editor's test explorer and debugger to an
//! external discovery and execution tool.
//!
//! The entry point is [`explorer::TestExplorer`]. It keeps a [`tree::TestTreeStore`] in sync with
//! the tool's discovery output, debounces refreshes through a [`refresh::RefreshScheduler`], and
//! turns run requests into debug sessions whose events are correlated into
//! [`reporter::TestRunHandle`] reports.

pub mod cancel;
pub mod config;
pub mod discovery;
pub mod errors;
pub mod explorer;
mod helpers;
pub mod refresh;
pub mod reporter;
pub mod runner;
pub mod session;
mod time;
pub mod tree;
