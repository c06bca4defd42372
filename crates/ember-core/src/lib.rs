//! # EMBER Core
//!
//! Foundational types shared by every layer of the command-buffer stack.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      ember-core                             │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────────────┐  │
//! │  │   Error     │  │   Types     │  │  Handle Table /     │  │
//! │  │  (taxonomy, │  │ (DevicePtr, │  │  RefCounts          │  │
//! │  │   Status)   │  │  Rect*, ..) │  │                     │  │
//! │  └─────────────┘  └─────────────┘  └─────────────────────┘  │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Nothing in this crate touches a device. Everything here is `no_std`
//! with `alloc`.

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

extern crate alloc;

// =============================================================================
// MODULE EXPORTS
// =============================================================================

pub mod error;
pub mod refcount;
pub mod table;
pub mod types;

// Re-exports for convenience
pub use error::{DegradedReason, Error, ErrorClass, Result, Status};
pub use refcount::RefCounts;
pub use table::{Handle, HandleTable};
pub use types::*;

// =============================================================================
// STATIC ASSERTIONS
// =============================================================================

static_assertions::assert_impl_all!(DevicePtr: Send, Sync, Copy);
static_assertions::assert_impl_all!(RectOffset: Send, Sync, Copy);
static_assertions::assert_impl_all!(RectRegion: Send, Sync, Copy);
static_assertions::assert_impl_all!(Error: Send, Sync, Copy);
static_assertions::assert_impl_all!(Status: Send, Sync, Copy);
static_assertions::assert_impl_all!(RefCounts: Send, Sync);
