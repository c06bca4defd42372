//! # Events
//!
//! Completion tokens for stream work.
//!
//! An event is complete once the stream position of its most recent
//! record has completed. An event that was never recorded counts as
//! complete, so waiting on it is a no-op. Re-recording an event moves it to
//! a new position, and waits that already captured the old position are
//! not affected.

use alloc::sync::Arc;
use core::sync::atomic::{AtomicU64, Ordering};

use ember_core::{CommandKind, Error, Result};
use spin::Mutex;

use crate::context::Device;
use crate::queue::Queue;
use crate::stream::{Op, StreamId, StreamPos};

static NEXT_EVENT_ID: AtomicU64 = AtomicU64::new(1);

// =============================================================================
// PROFILING
// =============================================================================

/// Which timestamp a [`Op::Timestamp`] writes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stamp {
    /// Work of the event started
    Start,
    /// Work of the event finished
    End,
}

/// Profiling query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfilingInfo {
    /// Host submitted the command
    Queued,
    /// Device started the command
    Start,
    /// Device finished the command
    End,
}

/// Device timestamps written by stream ops
#[derive(Debug, Default)]
pub struct EventTimes {
    queued: AtomicU64,
    start: AtomicU64,
    end: AtomicU64,
}

impl EventTimes {
    /// Write a timestamp
    pub fn stamp(&self, which: Stamp, tick: u64) {
        match which {
            Stamp::Start => self.start.store(tick, Ordering::Release),
            Stamp::End => self.end.store(tick, Ordering::Release),
        }
    }

    fn stamp_queued(&self, tick: u64) {
        self.queued.store(tick, Ordering::Release);
    }

    fn get(&self, info: ProfilingInfo) -> u64 {
        match info {
            ProfilingInfo::Queued => self.queued.load(Ordering::Acquire),
            ProfilingInfo::Start => self.start.load(Ordering::Acquire),
            ProfilingInfo::End => self.end.load(Ordering::Acquire),
        }
    }
}

// =============================================================================
// EVENT
// =============================================================================

/// Completion event
#[derive(Debug)]
pub struct Event {
    id: u64,
    kind: CommandKind,
    device: Arc<Device>,
    queue_id: Option<u32>,
    stream: Option<StreamId>,
    token: u64,
    recorded: Mutex<Option<StreamPos>>,
    times: Arc<EventTimes>,
}

impl Event {
    /// Event not bound to a queue, recorded by whoever signals it
    pub fn new(device: &Arc<Device>, kind: CommandKind) -> Arc<Self> {
        Self::build(device.clone(), kind, None, None, 0)
    }

    /// Event for a command submitted to `queue` on `stream`
    ///
    /// `token` is the stream token handed out with the stream, so the event
    /// can be correlated with the queue's submission order.
    pub fn make_native(
        kind: CommandKind,
        queue: &Queue,
        stream: StreamId,
        token: u64,
    ) -> Arc<Self> {
        Self::build(
            queue.device().clone(),
            kind,
            Some(queue.id()),
            Some(stream),
            token,
        )
    }

    fn build(
        device: Arc<Device>,
        kind: CommandKind,
        queue_id: Option<u32>,
        stream: Option<StreamId>,
        token: u64,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_EVENT_ID.fetch_add(1, Ordering::Relaxed),
            kind,
            device,
            queue_id,
            stream,
            token,
            recorded: Mutex::new(None),
            times: Arc::new(EventTimes::default()),
        })
    }

    /// Event id, unique per process
    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Command kind this event tracks
    #[inline]
    pub fn kind(&self) -> CommandKind {
        self.kind
    }

    /// Device whose streams signal this event
    #[inline]
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    /// Queue the event was created for
    #[inline]
    pub fn queue_id(&self) -> Option<u32> {
        self.queue_id
    }

    /// Stream token given at creation
    #[inline]
    pub fn stream_token(&self) -> u64 {
        self.token
    }

    /// Stream position of the most recent record
    pub fn recorded_pos(&self) -> Option<StreamPos> {
        *self.recorded.lock()
    }

    /// Mark the start of the tracked work on the event's stream
    pub fn start(&self) -> Result<()> {
        let stream = self.stream.ok_or(Error::InvalidEvent)?;
        self.times.stamp_queued(self.device.scheduler().now());
        self.device
            .scheduler()
            .submit(stream, Op::Timestamp(self.times.clone(), Stamp::Start))?;
        Ok(())
    }

    /// Record on the event's own stream
    pub fn record(&self) -> Result<()> {
        let stream = self.stream.ok_or(Error::InvalidEvent)?;
        self.record_on(stream)
    }

    /// Record on an arbitrary stream of the event's device
    pub fn record_on(&self, stream: StreamId) -> Result<()> {
        let pos = self
            .device
            .scheduler()
            .submit(stream, Op::Timestamp(self.times.clone(), Stamp::End))?;
        *self.recorded.lock() = Some(pos);
        Ok(())
    }

    /// Check for completion without driving the device
    pub fn is_complete(&self) -> bool {
        match self.recorded_pos() {
            Some(pos) => self.device.scheduler().is_complete(pos),
            None => true,
        }
    }

    /// Block until complete, executing device work as needed
    ///
    /// Fails with the first unreported fault on the recorded stream up to
    /// the recorded position.
    pub fn wait(&self) -> Result<()> {
        let Some(pos) = self.recorded_pos() else {
            return Ok(());
        };
        self.device.scheduler().wait_for(self.device.memory(), pos)
    }

    /// Wait on several events
    pub fn wait_all(events: &[Arc<Event>]) -> Result<()> {
        events.iter().try_for_each(|e| e.wait())
    }

    /// Profiling timestamp
    ///
    /// Only available once the event has completed.
    pub fn profiling_info(&self, info: ProfilingInfo) -> Result<u64> {
        if self.recorded_pos().is_none() || !self.is_complete() {
            return Err(Error::InvalidOperation);
        }
        Ok(self.times.get(info))
    }
}
