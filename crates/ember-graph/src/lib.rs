//! # EMBER Graph
//!
//! Deferred-execution primitives of the software device: the native graph
//! and the in-order command list used where no graph exists.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │ NodeParams ── kernel | memcpy | memcpy3d | memset | empty  │
//! │               prefetch | advise | event wait | event record│
//! ├───────────────────────────┬────────────────────────────────┤
//! │ Graph ─▶ GraphExec        │ CommandList (closed once)      │
//! │   topological launch      │   record-order replay          │
//! └───────────────────────────┴────────────────────────────────┘
//!                     │ lower
//!                     ▼
//!              Scheduler stream ops
//! ```

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

extern crate alloc;

// =============================================================================
// MODULE EXPORTS
// =============================================================================

pub mod graph;
pub mod list;
pub mod node;

pub use graph::{Graph, GraphExec};
pub use list::CommandList;
pub use node::{NodeId, NodeKind, NodeParams};

// =============================================================================
// STATIC ASSERTIONS
// =============================================================================

static_assertions::assert_impl_all!(Graph: Send, Sync);
static_assertions::assert_impl_all!(GraphExec: Send, Sync);
static_assertions::assert_impl_all!(CommandList: Send, Sync);
static_assertions::assert_impl_all!(NodeId: Send, Sync, Copy, Ord);
