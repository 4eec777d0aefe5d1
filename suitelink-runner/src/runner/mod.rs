// Copyright (c) The suitelink Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Dispatching run requests to debug sessions.
//!
//! A run request is partitioned by workspace folder ([`plan_runs`]). Each workspace whose
//! execution environment is valid ([`EnvironmentGuard`]) gets its own session, identified by a
//! run id allocated from the [`RunRegistry`].

mod dispatcher;
mod environment;
mod filters;
mod registry;

pub use dispatcher::*;
pub use environment::*;
pub use filters::*;
pub use registry::*;
