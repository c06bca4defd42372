//! # Queues
//!
//! A queue is a set of compute streams on one device. Each submission picks
//! the next stream round-robin, so two submissions to the same queue are
//! NOT ordered unless an event says so.
//!
//! Every ordinary submission follows the same sequence:
//!
//! ```text
//!   next_compute_stream ─▶ enqueue_events_wait ─▶ make_native + start
//!          ─▶ ops ─▶ record
//! ```

use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use bitflags::bitflags;
use ember_core::{CommandKind, DevicePtr, Error, Result};

use crate::context::{Context, Device};
use crate::event::Event;
use crate::kernel::{Kernel, NdRange};
use crate::memory::MemBuffer;
use crate::stream::{Op, StreamId};

static NEXT_QUEUE_ID: AtomicU32 = AtomicU32::new(1);

bitflags! {
    /// Queue creation flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct QueueFlags: u32 {
        /// Events carry profiling timestamps
        const PROFILING_ENABLE = 1 << 0;
        /// Use a single stream so submissions execute in order
        const IN_ORDER         = 1 << 1;
    }
}

// =============================================================================
// QUEUE
// =============================================================================

/// Work queue
#[derive(Debug)]
pub struct Queue {
    id: u32,
    context: Arc<Context>,
    device: Arc<Device>,
    flags: QueueFlags,
    streams: Vec<StreamId>,
    next_token: AtomicU64,
}

impl Queue {
    /// Create a queue on `device`
    pub fn new(
        context: &Arc<Context>,
        device: &Arc<Device>,
        flags: QueueFlags,
    ) -> Result<Arc<Self>> {
        if !context.contains(device) {
            return Err(Error::InvalidDevice);
        }
        let count = if flags.contains(QueueFlags::IN_ORDER) {
            1
        } else {
            device.config().compute_streams.max(1)
        };
        let streams = (0..count)
            .map(|_| device.scheduler().create_stream())
            .collect::<Vec<_>>();

        let id = NEXT_QUEUE_ID.fetch_add(1, Ordering::Relaxed);
        log::debug!("Queue {}: {} compute stream(s) on device {}", id, count, device.id());
        Ok(Arc::new(Self {
            id,
            context: context.clone(),
            device: device.clone(),
            flags,
            streams,
            next_token: AtomicU64::new(0),
        }))
    }

    /// Queue id, unique per process
    #[inline]
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Owning context
    #[inline]
    pub fn context(&self) -> &Arc<Context> {
        &self.context
    }

    /// Target device
    #[inline]
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    /// Creation flags
    #[inline]
    pub fn flags(&self) -> QueueFlags {
        self.flags
    }

    /// Compute streams of this queue
    #[inline]
    pub fn streams(&self) -> &[StreamId] {
        &self.streams
    }

    /// Pick the next compute stream and its stream token
    pub fn next_compute_stream(&self) -> (StreamId, u64) {
        let token = self.next_token.fetch_add(1, Ordering::AcqRel);
        let stream = self.streams[(token % self.streams.len() as u64) as usize];
        (stream, token)
    }

    /// Make `stream` wait for `events` before anything submitted after
    pub fn enqueue_events_wait(&self, stream: StreamId, events: &[Arc<Event>]) -> Result<()> {
        let scheduler = self.device.scheduler();
        for event in events {
            if event.device().id() != self.device.id() {
                return Err(Error::InvalidEvent);
            }
            if let Some(pos) = event.recorded_pos() {
                if pos.stream != stream && !scheduler.is_complete(pos) {
                    scheduler.submit(stream, Op::Wait(pos))?;
                }
            }
        }
        Ok(())
    }

    fn submit(&self, kind: CommandKind, wait: &[Arc<Event>], ops: Vec<Op>) -> Result<Arc<Event>> {
        let (stream, token) = self.next_compute_stream();
        self.enqueue_events_wait(stream, wait)?;
        let event = Event::make_native(kind, self, stream, token);
        event.start()?;
        for op in ops {
            self.device.scheduler().submit(stream, op)?;
        }
        event.record()?;
        Ok(event)
    }

    // =========================================================================
    // Ordinary operations
    // =========================================================================

    /// Fill USM memory with a repeated pattern
    pub fn enqueue_usm_fill(
        &self,
        ptr: DevicePtr,
        pattern: &[u8],
        size: u64,
        wait: &[Arc<Event>],
    ) -> Result<Arc<Event>> {
        if pattern.is_empty() || size % pattern.len() as u64 != 0 {
            return Err(Error::InvalidSize);
        }
        self.device.memory().check_range(ptr, size)?;
        let op = Op::Fill {
            dst: ptr,
            pattern: pattern.to_vec(),
            size,
        };
        self.submit(CommandKind::UsmFill, wait, vec![op])
    }

    /// Copy USM memory
    pub fn enqueue_usm_memcpy(
        &self,
        blocking: bool,
        dst: DevicePtr,
        src: DevicePtr,
        size: u64,
        wait: &[Arc<Event>],
    ) -> Result<Arc<Event>> {
        let memory = self.device.memory();
        memory.check_range(dst, size)?;
        memory.check_range(src, size)?;
        let event = self.submit(CommandKind::UsmMemcpy, wait, vec![Op::Memcpy { dst, src, size }])?;
        if blocking {
            event.wait()?;
        }
        Ok(event)
    }

    /// Fill a memory object with a repeated pattern
    pub fn enqueue_mem_buffer_fill(
        &self,
        buffer: &MemBuffer,
        pattern: &[u8],
        offset: u64,
        size: u64,
        wait: &[Arc<Event>],
    ) -> Result<Arc<Event>> {
        if pattern.is_empty() || size % pattern.len() as u64 != 0 {
            return Err(Error::InvalidSize);
        }
        buffer.check_range(offset, size)?;
        let op = Op::Fill {
            dst: buffer.ptr_with_offset(offset)?,
            pattern: pattern.to_vec(),
            size,
        };
        self.submit(CommandKind::MemBufferFill, wait, vec![op])
    }

    /// Write host bytes into a memory object
    pub fn enqueue_mem_buffer_write(
        &self,
        blocking: bool,
        buffer: &MemBuffer,
        offset: u64,
        data: &[u8],
        wait: &[Arc<Event>],
    ) -> Result<Arc<Event>> {
        buffer.check_range(offset, data.len() as u64)?;
        let op = Op::HostWrite {
            dst: buffer.ptr_with_offset(offset)?,
            data: data.to_vec(),
        };
        let event = self.submit(CommandKind::MemBufferWrite, wait, vec![op])?;
        if blocking {
            event.wait()?;
        }
        Ok(event)
    }

    /// Blocking read of a memory object range
    pub fn enqueue_mem_buffer_read(
        &self,
        buffer: &MemBuffer,
        offset: u64,
        size: u64,
        wait: &[Arc<Event>],
    ) -> Result<Vec<u8>> {
        buffer.check_range(offset, size)?;
        let event = self.submit(CommandKind::MemBufferRead, wait, Vec::new())?;
        event.wait()?;
        self.device
            .memory()
            .read_vec(buffer.ptr_with_offset(offset)?, size)
    }

    /// Launch a kernel outside any command buffer
    pub fn enqueue_kernel_launch(
        &self,
        kernel: &Kernel,
        range: &NdRange,
        wait: &[Arc<Event>],
    ) -> Result<Arc<Event>> {
        if kernel.context_id() != self.context.id() {
            return Err(Error::InvalidKernel);
        }
        let local = range.resolve_local(self.device.config().max_work_group_size as u64)?;
        let op = if range.is_empty() {
            Op::Empty
        } else {
            Op::Kernel(Arc::new(kernel.snapshot(range, local)?))
        };
        kernel.clear_local_size();
        self.submit(CommandKind::KernelLaunch, wait, vec![op])
    }

    /// Wait for everything submitted to this queue
    pub fn finish(&self) -> Result<()> {
        self.device
            .scheduler()
            .drain_streams(self.device.memory(), &self.streams)
    }
}
