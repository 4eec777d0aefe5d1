// Copyright (c) The suitelink Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![cfg(unix)]

mod discovery;
mod explorer;
mod fixtures;
mod session;
