//! # EMBER Core Types
//!
//! Strongly typed addresses and copy geometry shared across the stack.

use core::fmt;
use core::ops::{Add, Sub};

use crate::error::{Error, Result};

// =============================================================================
// DEVICE POINTER
// =============================================================================

/// Address in the unified device address space
///
/// USM allocations (device, host and shared) and memory objects all live in
/// one address space. A `DevicePtr` is NOT a CPU pointer and cannot be
/// dereferenced directly.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct DevicePtr(u64);

impl DevicePtr {
    /// Create a new device pointer
    #[inline]
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    /// Null device pointer
    #[inline]
    pub const fn null() -> Self {
        Self(0)
    }

    /// Get the raw u64 value
    #[inline]
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Check if null
    #[inline]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Check alignment
    #[inline]
    pub const fn is_aligned(self, alignment: u64) -> bool {
        self.0 & (alignment - 1) == 0
    }

    /// Offset by bytes
    #[inline]
    pub const fn offset(self, bytes: u64) -> Self {
        Self(self.0.wrapping_add(bytes))
    }

    /// Offset by bytes, failing on overflow
    #[inline]
    pub fn checked_offset(self, bytes: u64) -> Result<Self> {
        self.0.checked_add(bytes).map(Self).ok_or(Error::InvalidValue)
    }
}

impl Add<u64> for DevicePtr {
    type Output = Self;

    fn add(self, rhs: u64) -> Self::Output {
        Self(self.0.wrapping_add(rhs))
    }
}

impl Sub<DevicePtr> for DevicePtr {
    type Output = u64;

    fn sub(self, rhs: DevicePtr) -> Self::Output {
        self.0.wrapping_sub(rhs.0)
    }
}

impl fmt::Debug for DevicePtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DevicePtr(0x{:012x})", self.0)
    }
}

impl fmt::Display for DevicePtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:012x}", self.0)
    }
}

// =============================================================================
// RECTANGULAR COPY GEOMETRY
// =============================================================================

/// Origin of a rectangular copy
///
/// `x` is in bytes, `y` in rows and `z` in slices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RectOffset {
    /// Byte offset within a row
    pub x: u64,
    /// Row index
    pub y: u64,
    /// Slice index
    pub z: u64,
}

impl RectOffset {
    /// Create a new origin
    #[inline]
    pub const fn new(x: u64, y: u64, z: u64) -> Self {
        Self { x, y, z }
    }
}

/// Extent of a rectangular copy
///
/// `width` is in bytes, `height` in rows and `depth` in slices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RectRegion {
    /// Bytes per row
    pub width: u64,
    /// Rows per slice
    pub height: u64,
    /// Number of slices
    pub depth: u64,
}

impl RectRegion {
    /// Create a new region
    #[inline]
    pub const fn new(width: u64, height: u64, depth: u64) -> Self {
        Self {
            width,
            height,
            depth,
        }
    }

    /// Check for an empty region
    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0 || self.depth == 0
    }
}

/// Row and slice pitch of one side of a rectangular copy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RectPitch {
    /// Bytes between rows
    pub row: u64,
    /// Bytes between slices
    pub slice: u64,
}

impl RectPitch {
    /// Create a new pitch pair
    #[inline]
    pub const fn new(row: u64, slice: u64) -> Self {
        Self { row, slice }
    }

    /// Resolve zero pitches against a region
    ///
    /// A zero row pitch means tightly packed rows, and a zero slice pitch
    /// means tightly packed slices.
    pub fn resolve(self, region: &RectRegion) -> Result<Self> {
        let row = if self.row == 0 { region.width } else { self.row };
        if row < region.width {
            return Err(Error::InvalidSize);
        }
        let packed_slice = row.checked_mul(region.height).ok_or(Error::InvalidSize)?;
        let slice = if self.slice == 0 {
            packed_slice
        } else {
            self.slice
        };
        if slice < packed_slice {
            return Err(Error::InvalidSize);
        }
        Ok(Self { row, slice })
    }

    /// Byte offset of `origin` under this pitch
    #[inline]
    pub const fn byte_offset(&self, origin: &RectOffset) -> u64 {
        origin.z * self.slice + origin.y * self.row + origin.x
    }

    /// One past the last byte touched by `region` placed at `origin`
    pub fn extent(&self, origin: &RectOffset, region: &RectRegion) -> Result<u64> {
        if region.is_empty() {
            return Err(Error::InvalidSize);
        }
        let last = RectOffset::new(
            origin.x + region.width,
            origin.y + region.height - 1,
            origin.z + region.depth - 1,
        );
        last.z
            .checked_mul(self.slice)
            .and_then(|z| last.y.checked_mul(self.row).and_then(|y| z.checked_add(y)))
            .and_then(|zy| zy.checked_add(last.x))
            .ok_or(Error::InvalidSize)
    }
}

// =============================================================================
// COMMAND KIND
// =============================================================================

/// Kind of command an event was created for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    /// Kernel launch
    KernelLaunch,
    /// USM fill
    UsmFill,
    /// USM copy
    UsmMemcpy,
    /// USM prefetch
    UsmPrefetch,
    /// USM advice
    UsmAdvise,
    /// Memory object fill
    MemBufferFill,
    /// Memory object read
    MemBufferRead,
    /// Memory object write
    MemBufferWrite,
    /// Memory object copy
    MemBufferCopy,
    /// Rectangular memory object copy
    MemBufferCopyRect,
    /// Rectangular memory object read
    MemBufferReadRect,
    /// Rectangular memory object write
    MemBufferWriteRect,
    /// Wait on events
    EventsWait,
    /// Whole command buffer submission
    CommandBufferEnqueue,
}
