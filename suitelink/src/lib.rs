// Copyright (c) The suitelink Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Headless frontend for suitelink.
//!
//! Discovers tests, runs them through debug sessions, and watches workspace folders, using the
//! same engine an editor's test explorer would.

#![warn(missing_docs)]

mod dispatch;
mod errors;
mod output;
mod reporter;
mod watch;

#[doc(hidden)]
pub use dispatch::*;
#[doc(hidden)]
pub use errors::*;
#[doc(hidden)]
pub use output::{OutputContext, OutputWriter};
