// Copyright (c) The suitelink Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The in-memory test tree.
//!
//! The main structure in this module is [`TestTreeStore`], which mirrors the entities reported by
//! discovery as [`TreeNode`]s. Nodes are matched across discoveries by id and updated in place,
//! so that state attached to a node (selection, expansion, run results) survives refreshes.

mod diagnostics;
mod node;
mod store;
mod workspace;

pub use diagnostics::*;
pub use node::*;
pub use store::*;
pub use workspace::*;
