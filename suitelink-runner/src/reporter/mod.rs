// Copyright (c) The suitelink Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Correlating session events into test run reports.
//!
//! The main structure in this module is [`ExecutionEventCorrelator`], which consumes the events
//! emitted by debug sessions and turns them into updates on a [`TestRunHandle`]. The
//! handle is the consumer-facing report: it is shared by every session started for the same
//! request, and ends exactly once.

mod correlator;
mod events;
mod report;

pub use correlator::*;
pub use events::*;
pub use report::*;
