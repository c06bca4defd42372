//! # Node Builders
//!
//! One append operation per command kind. Each builder follows the same
//! steps:
//!
//! ```text
//!   validate arguments ──▶ build node params ──▶ record
//!                                                  │ resolve sync points
//!                                                  │ insert wait nodes, command chain, record node
//!                                                  │ register sync point
//!                                                  └ issue command handle (updatable)
//! ```
//!
//! Validation happens before anything touches the native graph, so a
//! rejected append leaves the buffer exactly as it was.

use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;

use ember_core::{
    CommandKind, DegradedReason, DevicePtr, Error, RectOffset, RectPitch, RectRegion, Result,
    Status,
};
use ember_device::{
    BackendCaps, Kernel, MemBuffer, Memcpy3dParams, NdRange, UsmAdviceFlags, UsmMigrationFlags,
};
use ember_graph::NodeParams;

use crate::command::CommandMeta;
use crate::command_buffer::{AppendDeps, Appended, CommandBuffer, CommandBufferObject, Recording};
use crate::fill::{check_pattern, decompose_fill};

// =============================================================================
// RECT COPY GEOMETRY
// =============================================================================

/// Geometry of a rectangular copy
///
/// Zero pitches default to tightly packed rows and slices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RectCopy {
    /// Origin in the source
    pub src_origin: RectOffset,
    /// Origin in the destination
    pub dst_origin: RectOffset,
    /// Copied region
    pub region: RectRegion,
    /// Source pitches
    pub src_pitch: RectPitch,
    /// Destination pitches
    pub dst_pitch: RectPitch,
}

impl RectCopy {
    /// Packed copy of `region` between two origins
    pub const fn new(src_origin: RectOffset, dst_origin: RectOffset, region: RectRegion) -> Self {
        Self {
            src_origin,
            dst_origin,
            region,
            src_pitch: RectPitch::new(0, 0),
            dst_pitch: RectPitch::new(0, 0),
        }
    }

    /// Set both pitches
    #[must_use]
    pub const fn with_pitches(mut self, src: RectPitch, dst: RectPitch) -> Self {
        self.src_pitch = src;
        self.dst_pitch = dst;
        self
    }

    /// Resolve pitches and compute the extent of each side
    fn resolve(&self) -> Result<(RectPitch, u64, RectPitch, u64)> {
        let src_pitch = self.src_pitch.resolve(&self.region)?;
        let dst_pitch = self.dst_pitch.resolve(&self.region)?;
        let src_end = src_pitch.extent(&self.src_origin, &self.region)?;
        let dst_end = dst_pitch.extent(&self.dst_origin, &self.region)?;
        Ok((src_pitch, src_end, dst_pitch, dst_end))
    }
}

// =============================================================================
// VALIDATION HELPERS
// =============================================================================

fn require(object: &CommandBufferObject, caps: BackendCaps) -> Result<()> {
    if object.caps().contains(caps) {
        Ok(())
    } else {
        Err(Error::UnsupportedFeature)
    }
}

fn check_mem(object: &CommandBufferObject, mem: &MemBuffer) -> Result<()> {
    if mem.context_id() == object.context.id() {
        Ok(())
    } else {
        Err(Error::InvalidMemObject)
    }
}

/// Linear ranges are never empty, on either kind of memory
fn check_size(size: u64) -> Result<()> {
    if size == 0 {
        return Err(Error::InvalidSize);
    }
    Ok(())
}

fn check_usm(object: &CommandBufferObject, ptr: DevicePtr, size: u64) -> Result<()> {
    check_size(size)?;
    object.device.memory().check_range(ptr, size)
}

fn check_buffer_range(buffer: &MemBuffer, offset: u64, size: u64) -> Result<()> {
    check_size(size)?;
    buffer.check_range(offset, size)
}

fn single(kind: CommandKind, params: NodeParams) -> Recording {
    Recording {
        kind,
        nodes: vec![params],
        meta: CommandMeta::Other,
        status: Status::Success,
        keep_alive: Vec::new(),
    }
}

/// Dependency-only stand-in for a hint the back-end cannot record
fn degraded(kind: CommandKind, reason: DegradedReason) -> Recording {
    Recording {
        status: Status::Degraded(reason),
        ..single(kind, NodeParams::Empty)
    }
}

// =============================================================================
// APPEND OPERATIONS
// =============================================================================

impl CommandBuffer {
    /// Record a kernel launch
    ///
    /// Argument bindings are captured now. A zero global size records an
    /// empty node that still orders its dependents.
    pub fn append_kernel_launch(
        self,
        kernel: &Arc<Kernel>,
        range: &NdRange,
        deps: AppendDeps<'_>,
    ) -> Result<Appended> {
        let object = self.live()?;
        range.check_work_dim()?;
        if kernel.context_id() != object.context.id() {
            return Err(Error::InvalidKernel);
        }

        let zero_sized = range.is_empty();
        let params = if zero_sized {
            NodeParams::Empty
        } else {
            let max_wg = object.device.config().max_work_group_size as u64;
            let local = range.resolve_local(max_wg)?;
            NodeParams::Kernel(Arc::new(kernel.snapshot(range, local)?))
        };
        let recording = Recording {
            kind: CommandKind::KernelLaunch,
            nodes: vec![params],
            meta: CommandMeta::Kernel {
                work_dim: range.work_dim,
                zero_sized,
            },
            status: Status::Success,
            keep_alive: Vec::new(),
        };

        let appended = self.record(&object, &deps, recording)?;
        kernel.clear_local_size();
        Ok(appended)
    }

    /// Record a USM copy
    pub fn append_usm_memcpy(
        self,
        dst: DevicePtr,
        src: DevicePtr,
        size: u64,
        deps: AppendDeps<'_>,
    ) -> Result<Appended> {
        let object = self.live()?;
        require(&object, BackendCaps::USM_IN_GRAPH)?;
        check_usm(&object, dst, size)?;
        check_usm(&object, src, size)?;
        let params = NodeParams::Memcpy { dst, src, size };
        self.record(&object, &deps, single(CommandKind::UsmMemcpy, params))
    }

    /// Record a USM fill with a repeated pattern
    pub fn append_usm_fill(
        self,
        ptr: DevicePtr,
        pattern: &[u8],
        size: u64,
        deps: AppendDeps<'_>,
    ) -> Result<Appended> {
        let object = self.live()?;
        require(&object, BackendCaps::USM_IN_GRAPH)?;
        check_pattern(pattern, 0, size)?;
        check_usm(&object, ptr, size)?;
        let recording = Recording {
            kind: CommandKind::UsmFill,
            nodes: fill_nodes(ptr, pattern, size)?,
            meta: CommandMeta::Other,
            status: Status::Success,
            keep_alive: Vec::new(),
        };
        self.record(&object, &deps, recording)
    }

    /// Record a copy between two memory objects
    pub fn append_mem_buffer_copy(
        self,
        src: &Arc<MemBuffer>,
        dst: &Arc<MemBuffer>,
        src_offset: u64,
        dst_offset: u64,
        size: u64,
        deps: AppendDeps<'_>,
    ) -> Result<Appended> {
        let object = self.live()?;
        check_mem(&object, src)?;
        check_mem(&object, dst)?;
        check_buffer_range(src, src_offset, size)?;
        check_buffer_range(dst, dst_offset, size)?;
        let params = NodeParams::Memcpy {
            dst: dst.ptr_with_offset(dst_offset)?,
            src: src.ptr_with_offset(src_offset)?,
            size,
        };
        let mut recording = single(CommandKind::MemBufferCopy, params);
        recording.keep_alive = vec![src.clone(), dst.clone()];
        self.record(&object, &deps, recording)
    }

    /// Record a rectangular copy between two memory objects
    pub fn append_mem_buffer_copy_rect(
        self,
        src: &Arc<MemBuffer>,
        dst: &Arc<MemBuffer>,
        rect: &RectCopy,
        deps: AppendDeps<'_>,
    ) -> Result<Appended> {
        let object = self.live()?;
        check_mem(&object, src)?;
        check_mem(&object, dst)?;
        let (src_pitch, src_end, dst_pitch, dst_end) = rect.resolve()?;
        src.check_range(0, src_end)?;
        dst.check_range(0, dst_end)?;
        let params = NodeParams::Memcpy3d(Memcpy3dParams {
            src: src.ptr_with_offset(0)?,
            src_origin: rect.src_origin,
            src_pitch,
            dst: dst.ptr_with_offset(0)?,
            dst_origin: rect.dst_origin,
            dst_pitch,
            region: rect.region,
        });
        let mut recording = single(CommandKind::MemBufferCopyRect, params);
        recording.keep_alive = vec![src.clone(), dst.clone()];
        self.record(&object, &deps, recording)
    }

    /// Record a read from a memory object into host memory
    pub fn append_mem_buffer_read(
        self,
        buffer: &Arc<MemBuffer>,
        offset: u64,
        size: u64,
        dst: DevicePtr,
        deps: AppendDeps<'_>,
    ) -> Result<Appended> {
        let object = self.live()?;
        check_mem(&object, buffer)?;
        check_buffer_range(buffer, offset, size)?;
        check_usm(&object, dst, size)?;
        let params = NodeParams::Memcpy {
            dst,
            src: buffer.ptr_with_offset(offset)?,
            size,
        };
        let mut recording = single(CommandKind::MemBufferRead, params);
        recording.keep_alive = vec![buffer.clone()];
        self.record(&object, &deps, recording)
    }

    /// Record a rectangular read into host memory
    ///
    /// The source side of `rect` describes the memory object.
    pub fn append_mem_buffer_read_rect(
        self,
        buffer: &Arc<MemBuffer>,
        rect: &RectCopy,
        dst: DevicePtr,
        deps: AppendDeps<'_>,
    ) -> Result<Appended> {
        let object = self.live()?;
        check_mem(&object, buffer)?;
        let (src_pitch, src_end, dst_pitch, dst_end) = rect.resolve()?;
        buffer.check_range(0, src_end)?;
        check_usm(&object, dst, dst_end)?;
        let params = NodeParams::Memcpy3d(Memcpy3dParams {
            src: buffer.ptr_with_offset(0)?,
            src_origin: rect.src_origin,
            src_pitch,
            dst,
            dst_origin: rect.dst_origin,
            dst_pitch,
            region: rect.region,
        });
        let mut recording = single(CommandKind::MemBufferReadRect, params);
        recording.keep_alive = vec![buffer.clone()];
        self.record(&object, &deps, recording)
    }

    /// Record a write of host memory into a memory object
    pub fn append_mem_buffer_write(
        self,
        buffer: &Arc<MemBuffer>,
        offset: u64,
        size: u64,
        src: DevicePtr,
        deps: AppendDeps<'_>,
    ) -> Result<Appended> {
        let object = self.live()?;
        check_mem(&object, buffer)?;
        check_buffer_range(buffer, offset, size)?;
        check_usm(&object, src, size)?;
        let params = NodeParams::Memcpy {
            dst: buffer.ptr_with_offset(offset)?,
            src,
            size,
        };
        let mut recording = single(CommandKind::MemBufferWrite, params);
        recording.keep_alive = vec![buffer.clone()];
        self.record(&object, &deps, recording)
    }

    /// Record a rectangular write from host memory
    ///
    /// The destination side of `rect` describes the memory object.
    pub fn append_mem_buffer_write_rect(
        self,
        buffer: &Arc<MemBuffer>,
        rect: &RectCopy,
        src: DevicePtr,
        deps: AppendDeps<'_>,
    ) -> Result<Appended> {
        let object = self.live()?;
        check_mem(&object, buffer)?;
        let (src_pitch, src_end, dst_pitch, dst_end) = rect.resolve()?;
        check_usm(&object, src, src_end)?;
        buffer.check_range(0, dst_end)?;
        let params = NodeParams::Memcpy3d(Memcpy3dParams {
            src,
            src_origin: rect.src_origin,
            src_pitch,
            dst: buffer.ptr_with_offset(0)?,
            dst_origin: rect.dst_origin,
            dst_pitch,
            region: rect.region,
        });
        let mut recording = single(CommandKind::MemBufferWriteRect, params);
        recording.keep_alive = vec![buffer.clone()];
        self.record(&object, &deps, recording)
    }

    /// Record a fill of a memory object range
    pub fn append_mem_buffer_fill(
        self,
        buffer: &Arc<MemBuffer>,
        pattern: &[u8],
        offset: u64,
        size: u64,
        deps: AppendDeps<'_>,
    ) -> Result<Appended> {
        let object = self.live()?;
        check_mem(&object, buffer)?;
        check_pattern(pattern, offset, size)?;
        check_buffer_range(buffer, offset, size)?;
        let recording = Recording {
            kind: CommandKind::MemBufferFill,
            nodes: fill_nodes(buffer.ptr_with_offset(offset)?, pattern, size)?,
            meta: CommandMeta::Other,
            status: Status::Success,
            keep_alive: vec![buffer.clone()],
        };
        self.record(&object, &deps, recording)
    }

    /// Record a USM prefetch hint
    ///
    /// Without native prefetch nodes this records an empty node and reports
    /// [`Status::Degraded`].
    pub fn append_usm_prefetch(
        self,
        ptr: DevicePtr,
        size: u64,
        flags: UsmMigrationFlags,
        deps: AppendDeps<'_>,
    ) -> Result<Appended> {
        let object = self.live()?;
        require(&object, BackendCaps::USM_IN_GRAPH)?;
        check_usm(&object, ptr, size)?;
        let recording = if object.caps().contains(BackendCaps::PREFETCH_IN_GRAPH) {
            single(CommandKind::UsmPrefetch, NodeParams::Prefetch { ptr, size, flags })
        } else {
            degraded(CommandKind::UsmPrefetch, DegradedReason::PrefetchIgnored)
        };
        self.record(&object, &deps, recording)
    }

    /// Record a USM memory advice
    ///
    /// Without native advice nodes this records an empty node and reports
    /// [`Status::Degraded`].
    pub fn append_usm_advise(
        self,
        ptr: DevicePtr,
        size: u64,
        advice: UsmAdviceFlags,
        deps: AppendDeps<'_>,
    ) -> Result<Appended> {
        let object = self.live()?;
        require(&object, BackendCaps::USM_IN_GRAPH)?;
        check_usm(&object, ptr, size)?;
        let recording = if object.caps().contains(BackendCaps::ADVISE_IN_GRAPH) {
            single(CommandKind::UsmAdvise, NodeParams::Advise { ptr, size, advice })
        } else {
            degraded(CommandKind::UsmAdvise, DegradedReason::AdviseIgnored)
        };
        self.record(&object, &deps, recording)
    }
}

fn fill_nodes(dst: DevicePtr, pattern: &[u8], size: u64) -> Result<Vec<NodeParams>> {
    Ok(decompose_fill(dst, pattern, size)?
        .into_iter()
        .map(NodeParams::Memset)
        .collect())
}
