//! # EMBER Device
//!
//! In-process software device. It plays the role of the vendor driver
//! underneath the command-buffer layer: unified memory, kernels, events,
//! streams and queues, all executing on the host.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ Context ── MemoryArena (unified address space)               │
//! │   └── Device ── Scheduler ── Stream 0 [op][op][op]           │
//! │                          └── Stream 1 [wait][op]             │
//! │ Queue ── round-robin over its compute streams                │
//! │ Event ── (stream, seq) of its last record + timestamps       │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Submitted work runs lazily when a host synchronization point drives the
//! scheduler, which keeps execution deterministic and single-threaded while
//! still exposing the asynchronous submission model.

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

extern crate alloc;

// =============================================================================
// MODULE EXPORTS
// =============================================================================

pub mod config;
pub mod context;
pub mod event;
pub mod kernel;
pub mod memory;
pub mod queue;
pub mod stream;

pub use config::{BackendCaps, BackendKind, DeviceConfig};
pub use context::{ActiveContext, Context, Device};
pub use event::{Event, ProfilingInfo};
pub use kernel::{
    merge_exec_info, ArgValue, CacheConfig, ExecInfo, Kernel, KernelArg, KernelFn, KernelLaunch,
    NdRange, WorkItem,
};
pub use memory::{
    MemBuffer, Memcpy3dParams, MemoryArena, MemsetParams, UsmAdviceFlags, UsmKind,
    UsmMigrationFlags,
};
pub use queue::{Queue, QueueFlags};
pub use stream::{Op, Scheduler, StreamId, StreamPos};

// =============================================================================
// STATIC ASSERTIONS
// =============================================================================

static_assertions::assert_impl_all!(Context: Send, Sync);
static_assertions::assert_impl_all!(Device: Send, Sync);
static_assertions::assert_impl_all!(Event: Send, Sync);
static_assertions::assert_impl_all!(Queue: Send, Sync);
static_assertions::assert_impl_all!(Kernel: Send, Sync);
static_assertions::assert_impl_all!(MemBuffer: Send, Sync);
static_assertions::assert_impl_all!(KernelLaunch: Send, Sync, Clone);
