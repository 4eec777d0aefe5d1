// Copyright (c) The suitelink Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

/// Documented exit codes for `suitelink` failures.
///
/// Unknown/unexpected failures will always result in exit code 1.
pub enum SuitelinkExitCode {}

impl SuitelinkExitCode {
    /// No errors occurred and suitelink exited normally.
    pub const OK: i32 = 0;

    /// No tests were selected to run, but no other errors occurred.
    pub const NO_TESTS_RUN: i32 = 4;

    /// Starting an editor-independent watch loop produced an error.
    pub const WATCH_FAILED: i32 = 90;

    /// A user issue happened while setting up a suitelink invocation.
    pub const SETUP_ERROR: i32 = 96;

    /// One or more tests failed.
    pub const TEST_RUN_FAILED: i32 = 100;

    /// No run session could be started for any workspace.
    pub const DISPATCH_FAILED: i32 = 101;

    /// The execution environment of a workspace is invalid.
    pub const ENVIRONMENT_INVALID: i32 = 102;

    /// Invoking the discovery tool produced an error.
    pub const DISCOVERY_FAILED: i32 = 104;

    /// Writing data to stdout or stderr produced an error.
    pub const WRITE_OUTPUT_ERROR: i32 = 110;
}
