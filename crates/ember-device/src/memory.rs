//! # Unified Memory
//!
//! Host-backed arena implementing the device's unified address space.
//!
//! ```text
//!   0x0001_0000_0000 ─┬─ alloc A (device) ──┐
//!                     │                      │ 256-byte aligned,
//!   0x0001_0000_0100 ─┼─ alloc B (host)  ────┤ never reused
//!                     │                      │
//!   ...               ┴                      ┘
//! ```
//!
//! Every USM allocation and every [`MemBuffer`] is a range in this space.
//! Accesses are bounds-checked against the allocation they start in.

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;

use bitflags::bitflags;
use bytemuck::Pod;
use ember_core::{DevicePtr, Error, RectOffset, RectPitch, RectRegion, Result};
use spin::Mutex;

use crate::context::Context;

/// First address handed out by an arena
const ARENA_BASE: u64 = 0x0001_0000_0000;

/// Allocation granularity
const ARENA_ALIGN: u64 = 256;

// =============================================================================
// USM KIND / HINT FLAGS
// =============================================================================

/// USM allocation kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UsmKind {
    /// Device-resident memory
    Device,
    /// Host memory visible to the device
    Host,
    /// Memory migrating between host and device
    Shared,
}

bitflags! {
    /// Prefetch direction
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct UsmMigrationFlags: u32 {
        /// Migrate towards the device
        const HOST_TO_DEVICE = 1 << 0;
        /// Migrate towards the host
        const DEVICE_TO_HOST = 1 << 1;
    }
}

bitflags! {
    /// Memory advice
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct UsmAdviceFlags: u32 {
        /// Range is mostly read
        const SET_READ_MOSTLY               = 1 << 0;
        /// Undo `SET_READ_MOSTLY`
        const CLEAR_READ_MOSTLY             = 1 << 1;
        /// Prefer keeping the range on the device
        const SET_PREFERRED_LOCATION        = 1 << 2;
        /// Undo `SET_PREFERRED_LOCATION`
        const CLEAR_PREFERRED_LOCATION      = 1 << 3;
        /// Prefer keeping the range on the host
        const SET_PREFERRED_LOCATION_HOST   = 1 << 4;
        /// Undo `SET_PREFERRED_LOCATION_HOST`
        const CLEAR_PREFERRED_LOCATION_HOST = 1 << 5;
    }
}

// =============================================================================
// OPERATION PARAMETERS
// =============================================================================

/// Strided 2D memset
///
/// Writes `height` rows, `pitch` bytes apart, each holding `width` elements
/// of `element_size` bytes set to the low bytes of `value`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemsetParams {
    /// First byte written
    pub dst: DevicePtr,
    /// Element value, little-endian
    pub value: u32,
    /// 1, 2 or 4
    pub element_size: u32,
    /// Elements per row
    pub width: u64,
    /// Number of rows
    pub height: u64,
    /// Bytes between row starts
    pub pitch: u64,
}

impl MemsetParams {
    /// Validate element size and geometry
    pub fn validate(&self) -> Result<()> {
        if !matches!(self.element_size, 1 | 2 | 4) {
            return Err(Error::InvalidValue);
        }
        let row_bytes = self.row_bytes()?;
        if self.height > 1 && self.pitch < row_bytes {
            return Err(Error::InvalidValue);
        }
        Ok(())
    }

    fn row_bytes(&self) -> Result<u64> {
        self.width
            .checked_mul(self.element_size as u64)
            .ok_or(Error::InvalidSize)
    }

    /// Bytes spanned from `dst` to the end of the last row
    pub fn span(&self) -> Result<u64> {
        if self.height == 0 {
            return Ok(0);
        }
        (self.height - 1)
            .checked_mul(self.pitch)
            .and_then(|rows| rows.checked_add(self.row_bytes().ok()?))
            .ok_or(Error::InvalidSize)
    }
}

/// 3D (rectangular) copy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Memcpy3dParams {
    /// Source base
    pub src: DevicePtr,
    /// Source origin
    pub src_origin: RectOffset,
    /// Source pitches, already resolved
    pub src_pitch: RectPitch,
    /// Destination base
    pub dst: DevicePtr,
    /// Destination origin
    pub dst_origin: RectOffset,
    /// Destination pitches, already resolved
    pub dst_pitch: RectPitch,
    /// Copied region
    pub region: RectRegion,
}

// =============================================================================
// MEMORY ARENA
// =============================================================================

#[derive(Debug)]
struct Allocation {
    kind: UsmKind,
    data: Vec<u8>,
}

#[derive(Debug)]
struct ArenaState {
    allocations: BTreeMap<u64, Allocation>,
    next_addr: u64,
    used: u64,
}

impl ArenaState {
    /// Find the allocation holding `[ptr, ptr + len)`
    fn locate(&self, ptr: DevicePtr, len: u64) -> Result<(u64, usize)> {
        let (&base, alloc) = self
            .allocations
            .range(..=ptr.raw())
            .next_back()
            .ok_or(Error::InvalidValue)?;
        let offset = ptr.raw() - base;
        let size = alloc.data.len() as u64;
        if offset > size {
            return Err(Error::InvalidValue);
        }
        if offset.checked_add(len).map_or(true, |end| end > size) {
            return Err(Error::InvalidSize);
        }
        Ok((base, offset as usize))
    }

    fn slice(&self, ptr: DevicePtr, len: u64) -> Result<&[u8]> {
        let (base, offset) = self.locate(ptr, len)?;
        let alloc = self.allocations.get(&base).ok_or(Error::InvalidValue)?;
        Ok(&alloc.data[offset..offset + len as usize])
    }

    fn slice_mut(&mut self, ptr: DevicePtr, len: u64) -> Result<&mut [u8]> {
        let (base, offset) = self.locate(ptr, len)?;
        let alloc = self.allocations.get_mut(&base).ok_or(Error::InvalidValue)?;
        Ok(&mut alloc.data[offset..offset + len as usize])
    }
}

/// Unified memory arena
#[derive(Debug)]
pub struct MemoryArena {
    state: Mutex<ArenaState>,
    capacity: u64,
}

impl MemoryArena {
    /// Create an arena with a capacity in bytes
    pub const fn new(capacity: u64) -> Self {
        Self {
            state: Mutex::new(ArenaState {
                allocations: BTreeMap::new(),
                next_addr: ARENA_BASE,
                used: 0,
            }),
            capacity,
        }
    }

    /// Capacity in bytes
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Bytes currently allocated
    pub fn used(&self) -> u64 {
        self.state.lock().used
    }

    /// Allocate zeroed memory
    pub fn alloc(&self, kind: UsmKind, size: u64) -> Result<DevicePtr> {
        if size == 0 {
            return Err(Error::InvalidSize);
        }
        let mut state = self.state.lock();
        if state.used.saturating_add(size) > self.capacity {
            return Err(Error::OutOfDeviceMemory);
        }

        let len = usize::try_from(size).map_err(|_| Error::OutOfHostMemory)?;
        let mut data = Vec::new();
        data.try_reserve_exact(len)
            .map_err(|_| Error::OutOfHostMemory)?;
        data.resize(len, 0);

        let addr = state.next_addr;
        let mask = ARENA_ALIGN - 1;
        state.next_addr = (addr + size + mask) & !mask;
        state.used += size;
        state.allocations.insert(addr, Allocation { kind, data });

        log::trace!("Memory: alloc {:?} {} bytes at 0x{:x}", kind, size, addr);
        Ok(DevicePtr::new(addr))
    }

    /// Free an allocation by its base address
    pub fn free(&self, ptr: DevicePtr) -> Result<()> {
        let mut state = self.state.lock();
        let alloc = state
            .allocations
            .remove(&ptr.raw())
            .ok_or(Error::InvalidValue)?;
        state.used -= alloc.data.len() as u64;
        Ok(())
    }

    /// Kind of the allocation containing `ptr`
    pub fn kind_of(&self, ptr: DevicePtr) -> Result<UsmKind> {
        let state = self.state.lock();
        let (base, _) = state.locate(ptr, 0)?;
        state
            .allocations
            .get(&base)
            .map(|a| a.kind)
            .ok_or(Error::InvalidValue)
    }

    /// Check that `[ptr, ptr + size)` lies inside one allocation
    ///
    /// Unknown pointers yield `InvalidValue`, overruns `InvalidSize`.
    pub fn check_range(&self, ptr: DevicePtr, size: u64) -> Result<()> {
        self.state.lock().locate(ptr, size).map(|_| ())
    }

    // =========================================================================
    // Byte access
    // =========================================================================

    /// Read bytes
    pub fn read(&self, ptr: DevicePtr, out: &mut [u8]) -> Result<()> {
        let state = self.state.lock();
        out.copy_from_slice(state.slice(ptr, out.len() as u64)?);
        Ok(())
    }

    /// Read bytes into a new vector
    pub fn read_vec(&self, ptr: DevicePtr, len: u64) -> Result<Vec<u8>> {
        let state = self.state.lock();
        Ok(state.slice(ptr, len)?.to_vec())
    }

    /// Write bytes
    pub fn write(&self, ptr: DevicePtr, data: &[u8]) -> Result<()> {
        let mut state = self.state.lock();
        state.slice_mut(ptr, data.len() as u64)?.copy_from_slice(data);
        Ok(())
    }

    /// Read one plain-old-data value
    pub fn read_pod<T: Pod>(&self, ptr: DevicePtr) -> Result<T> {
        let state = self.state.lock();
        let bytes = state.slice(ptr, core::mem::size_of::<T>() as u64)?;
        Ok(bytemuck::pod_read_unaligned(bytes))
    }

    /// Write one plain-old-data value
    pub fn write_pod<T: Pod>(&self, ptr: DevicePtr, value: &T) -> Result<()> {
        self.write(ptr, bytemuck::bytes_of(value))
    }

    /// Read `count` consecutive values
    pub fn read_slice<T: Pod>(&self, ptr: DevicePtr, count: usize) -> Result<Vec<T>> {
        let elem = core::mem::size_of::<T>();
        let bytes = self.read_vec(ptr, (count * elem) as u64)?;
        Ok(bytes
            .chunks_exact(elem)
            .map(bytemuck::pod_read_unaligned)
            .collect())
    }

    // =========================================================================
    // Device operations
    // =========================================================================

    /// Linear copy; overlapping ranges behave like `memmove`
    pub fn copy(&self, dst: DevicePtr, src: DevicePtr, size: u64) -> Result<()> {
        if size == 0 {
            return Ok(());
        }
        let mut state = self.state.lock();
        let staged = state.slice(src, size)?.to_vec();
        state.slice_mut(dst, size)?.copy_from_slice(&staged);
        Ok(())
    }

    /// Strided memset
    pub fn memset(&self, params: &MemsetParams) -> Result<()> {
        params.validate()?;
        let span = params.span()?;
        if span == 0 || params.width == 0 {
            return Ok(());
        }

        let es = params.element_size as usize;
        let value = params.value.to_le_bytes();
        let mut state = self.state.lock();
        let bytes = state.slice_mut(params.dst, span)?;
        for row in 0..params.height as usize {
            let start = row * params.pitch as usize;
            let row_bytes = &mut bytes[start..start + params.width as usize * es];
            for elem in row_bytes.chunks_exact_mut(es) {
                elem.copy_from_slice(&value[..es]);
            }
        }
        Ok(())
    }

    /// Fill `size` bytes with a repeated pattern of any length
    pub fn fill(&self, dst: DevicePtr, pattern: &[u8], size: u64) -> Result<()> {
        if pattern.is_empty() || size % pattern.len() as u64 != 0 {
            return Err(Error::InvalidSize);
        }
        let mut state = self.state.lock();
        let bytes = state.slice_mut(dst, size)?;
        for chunk in bytes.chunks_exact_mut(pattern.len()) {
            chunk.copy_from_slice(pattern);
        }
        Ok(())
    }

    /// Rectangular copy
    pub fn copy_3d(&self, params: &Memcpy3dParams) -> Result<()> {
        let region = &params.region;
        if region.is_empty() {
            return Ok(());
        }
        let src_end = params.src_pitch.extent(&params.src_origin, region)?;
        let dst_end = params.dst_pitch.extent(&params.dst_origin, region)?;

        let mut state = self.state.lock();
        // validate both whole ranges before touching anything
        state.locate(params.src, src_end)?;
        state.locate(params.dst, dst_end)?;

        let mut row = vec![0u8; region.width as usize];
        for z in 0..region.depth {
            for y in 0..region.height {
                let so = params.src_pitch.byte_offset(&RectOffset::new(
                    params.src_origin.x,
                    params.src_origin.y + y,
                    params.src_origin.z + z,
                ));
                let d_o = params.dst_pitch.byte_offset(&RectOffset::new(
                    params.dst_origin.x,
                    params.dst_origin.y + y,
                    params.dst_origin.z + z,
                ));
                row.copy_from_slice(state.slice(params.src + so, region.width)?);
                state
                    .slice_mut(params.dst + d_o, region.width)?
                    .copy_from_slice(&row);
            }
        }
        Ok(())
    }
}

// =============================================================================
// MEMORY OBJECT
// =============================================================================

/// Memory object: a device allocation with an extent
///
/// Freed when the last `Arc` drops.
#[derive(Debug)]
pub struct MemBuffer {
    context_id: u32,
    memory: Arc<MemoryArena>,
    base: DevicePtr,
    size: u64,
}

impl MemBuffer {
    /// Allocate a memory object in a context
    pub fn new(context: &Context, size: u64) -> Result<Arc<Self>> {
        let memory = context.memory().clone();
        let base = memory.alloc(UsmKind::Device, size)?;
        Ok(Arc::new(Self {
            context_id: context.id(),
            memory,
            base,
            size,
        }))
    }

    /// Size in bytes
    #[inline]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Owning context id
    #[inline]
    pub fn context_id(&self) -> u32 {
        self.context_id
    }

    /// Device address of `offset`; the one-past-the-end offset is legal
    pub fn ptr_with_offset(&self, offset: u64) -> Result<DevicePtr> {
        if offset > self.size {
            return Err(Error::InvalidValue);
        }
        Ok(self.base + offset)
    }

    /// Check that `[offset, offset + size)` is inside the object
    pub fn check_range(&self, offset: u64, size: u64) -> Result<()> {
        match offset.checked_add(size) {
            Some(end) if end <= self.size => Ok(()),
            _ => Err(Error::InvalidSize),
        }
    }
}

impl Drop for MemBuffer {
    fn drop(&mut self) {
        if self.memory.free(self.base).is_err() {
            log::warn!("Memory: buffer at {} already freed", self.base);
        }
    }
}
