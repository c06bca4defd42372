//! # EMBER Command Buffers
//!
//! Portable command buffers: GPU work recorded once as a dependency graph
//! of opaque sync points, finalized into the device's native form and
//! enqueued any number of times.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────┐
//! │ CommandBuffer                                                     │
//! │  ├── append_* ── validate ─▶ SyncPointTable::resolve ─▶ Backend    │
//! │  │                                      │                         │
//! │  │                                      └── register SyncPoint    │
//! │  ├── finalize ─▶ instantiate / close                              │
//! │  └── enqueue  ─▶ stream + events ─▶ launch                        │
//! │                                                                   │
//! │ CommandHandle (updatable buffers)                                 │
//! │  └── update_kernel_launch / update_wait_events /                  │
//! │      update_signal_event ─▶ next enqueue                          │
//! ├───────────────────────────────────────────────────────────────────┤
//! │ Backend: NativeGraph (Graph + GraphExec) │ QueueEmulated (list)   │
//! └───────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! let cb = CommandBuffer::create(&ctx, &dev, CommandBufferDesc::default())?;
//! let fill = cb.append_usm_fill(src, &[0xab], 64, AppendDeps::none())?;
//! cb.append_usm_memcpy(dst, src, 64, AppendDeps::after(&[fill.sync_point]))?;
//! cb.finalize()?;
//! cb.enqueue(&queue, &[], true)?.map(|e| e.wait()).transpose()?;
//! cb.release()?;
//! ```

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

extern crate alloc;

// =============================================================================
// MODULE EXPORTS
// =============================================================================

pub mod backend;
pub mod builders;
pub mod command;
pub mod command_buffer;
pub mod fill;
pub mod sync_point;

pub use backend::{Backend, CommandBufferBackend, NativeGraphBackend, QueueEmulatedBackend};
pub use builders::RectCopy;
pub use command::{CommandHandle, CommandInfo, KernelLaunchUpdate};
pub use command_buffer::{
    AppendDeps, Appended, CommandBuffer, CommandBufferDesc, CommandBufferInfo,
    CommandBufferInfoValue,
};
pub use sync_point::{SyncPoint, SyncPointTable};

// =============================================================================
// STATIC ASSERTIONS
// =============================================================================

static_assertions::assert_impl_all!(CommandBuffer: Send, Sync, Copy);
static_assertions::assert_impl_all!(CommandHandle: Send, Sync, Copy);
static_assertions::assert_impl_all!(SyncPoint: Send, Sync, Copy, Ord);
static_assertions::assert_impl_all!(Backend: Send, Sync);
