// Copyright (c) The suitelink Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Structured access to the machine-readable protocol spoken by test discovery and execution
//! tools driven by suitelink.
//!
//! The types in this crate mirror the JSON produced and consumed by the external tool:
//!
//! * [`DiscoveryOutput`] is the result of a `discover` invocation.
//! * [`LaunchConfig`] describes a debug-session launch for a run.
//! * [`SessionEvent`] is a single lifecycle notification emitted by a running session.

mod discovery;
mod entity;
mod errors;
mod events;
mod exit_codes;
mod launch;

pub use discovery::*;
pub use entity::*;
pub use errors::*;
pub use events::*;
pub use exit_codes::*;
pub use launch::*;
