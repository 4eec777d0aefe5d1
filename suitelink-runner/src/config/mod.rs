// Copyright (c) The suitelink Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration support for suitelink.
//!
//! Configuration is layered, with later layers taking precedence:
//!
//! 1. The default configuration embedded in the binary.
//! 2. `.config/suitelink.toml` in the workspace folder, if present.
//! 3. An explicitly specified config file.
//! 4. `SUITELINK__<SECTION>__<KEY>` environment variables.
//!
//! Each workspace folder has its own [`SuitelinkConfig`], tracked by [`WorkspaceConfigs`].

mod imp;
mod run_profile;

pub use imp::*;
pub use run_profile::*;
