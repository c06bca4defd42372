//! # Sync Points
//!
//! Opaque, buffer-scoped identifiers for recorded commands.
//!
//! ```text
//!   SyncPoint (u64)
//!   ┌──────────────────────┬──────────────────────┐
//!   │ buffer tag (32 bits) │ ordinal (32 bits)    │
//!   └──────────────────────┴──────────────────────┘
//!                                   │
//!   SyncPointTable.entries[ordinal] ┘──▶ NodeId
//! ```
//!
//! Ordinals start at 0 and grow by one per recorded command. The tag is
//! unique per command buffer, so a sync point handed out by one buffer is
//! never mistaken for a node of another.

use alloc::vec::Vec;
use core::fmt;
use core::sync::atomic::{AtomicU32, Ordering};

use ember_core::{Error, Result};
use ember_graph::NodeId;

static NEXT_TAG: AtomicU32 = AtomicU32::new(1);

// =============================================================================
// SYNC POINT
// =============================================================================

/// Identifier of a recorded command within its command buffer
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SyncPoint(u64);

impl SyncPoint {
    const fn new(tag: u32, ordinal: u32) -> Self {
        Self(((tag as u64) << 32) | ordinal as u64)
    }

    /// Raw identifier
    #[inline]
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Rebuild from a raw identifier
    #[inline]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    const fn tag(self) -> u32 {
        (self.0 >> 32) as u32
    }

    /// Position in record order within the owning buffer
    #[inline]
    pub const fn ordinal(self) -> u32 {
        self.0 as u32
    }
}

impl fmt::Debug for SyncPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SyncPoint({}:{})", self.tag(), self.ordinal())
    }
}

// =============================================================================
// SYNC POINT TABLE
// =============================================================================

/// Append-only map from sync points to native nodes
#[derive(Debug)]
pub struct SyncPointTable {
    tag: u32,
    entries: Vec<NodeId>,
}

impl SyncPointTable {
    /// Create an empty table with a fresh tag
    pub fn new() -> Self {
        Self {
            tag: NEXT_TAG.fetch_add(1, Ordering::Relaxed),
            entries: Vec::new(),
        }
    }

    /// Number of sync points handed out
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check whether no sync point was handed out yet
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Register `node` under the next sync point
    pub fn register(&mut self, node: NodeId) -> Result<SyncPoint> {
        let sync_point = self.reserve()?;
        self.commit(sync_point, node);
        Ok(sync_point)
    }

    /// Next sync point, with room to commit it
    ///
    /// Nothing is handed out until [`commit`](Self::commit).
    pub fn reserve(&mut self) -> Result<SyncPoint> {
        let ordinal = u32::try_from(self.entries.len()).map_err(|_| Error::OutOfResources)?;
        self.entries
            .try_reserve(1)
            .map_err(|_| Error::OutOfHostMemory)?;
        Ok(SyncPoint::new(self.tag, ordinal))
    }

    /// Bind a reserved sync point to `node`
    pub fn commit(&mut self, sync_point: SyncPoint, node: NodeId) {
        debug_assert_eq!(sync_point.ordinal() as usize, self.entries.len());
        self.entries.push(node);
    }

    /// Node of one sync point
    pub fn get(&self, sync_point: SyncPoint) -> Result<NodeId> {
        if sync_point.tag() != self.tag {
            return Err(Error::InvalidValue);
        }
        self.entries
            .get(sync_point.ordinal() as usize)
            .copied()
            .ok_or(Error::InvalidValue)
    }

    /// Map a wait list onto native predecessors, keeping its order
    pub fn resolve(&self, wait_list: &[SyncPoint]) -> Result<Vec<NodeId>> {
        wait_list.iter().map(|&sp| self.get(sp)).collect()
    }
}

impl Default for SyncPointTable {
    fn default() -> Self {
        Self::new()
    }
}
