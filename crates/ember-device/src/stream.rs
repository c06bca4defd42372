//! # Streams and Scheduler
//!
//! Each stream is an in-order FIFO of [`Op`]s. Submitting an op assigns it
//! the next sequence number of its stream. A stream position is complete
//! once every op up to and including that sequence number has run.
//!
//! ```text
//!   stream 0: [1 memset][2 kernel][3 stamp]...
//!   stream 1: [1 wait(s0 #3)][2 memcpy]...
//!                  │
//!                  └── runnable once stream 0 completed #3
//! ```
//!
//! Work is executed lazily. Nothing runs at submission; host
//! synchronization points ([`Scheduler::drive_until`]) pump the streams
//! round-robin until their condition holds. If no stream can make progress
//! while the condition is still false, the wait can never finish and
//! `DeviceLost` is returned instead of spinning forever.
//!
//! A failing op still completes its position. The failure is kept with the
//! stream that ran it and reported once, to the first host wait that covers
//! that position ([`Scheduler::wait_for`], [`Scheduler::drain_streams`]).

use alloc::collections::VecDeque;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};

use ember_core::{DevicePtr, Error, Result};
use spin::Mutex;

use crate::event::{EventTimes, Stamp};
use crate::kernel::KernelLaunch;
use crate::memory::{Memcpy3dParams, MemoryArena, MemsetParams, UsmAdviceFlags, UsmMigrationFlags};

// =============================================================================
// STREAM IDS
// =============================================================================

/// Stream identifier, scoped to one device
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StreamId(u32);

impl StreamId {
    /// Raw index
    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }
}

/// Position of one op in a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamPos {
    /// Stream
    pub stream: StreamId,
    /// Sequence number, starting at 1
    pub seq: u64,
}

// =============================================================================
// OPS
// =============================================================================

/// Unit of stream work
#[derive(Debug, Clone)]
pub enum Op {
    /// Kernel launch
    Kernel(Arc<KernelLaunch>),
    /// Linear copy
    Memcpy {
        /// Destination
        dst: DevicePtr,
        /// Source
        src: DevicePtr,
        /// Bytes
        size: u64,
    },
    /// Rectangular copy
    Memcpy3d(Memcpy3dParams),
    /// Strided memset
    Memset(MemsetParams),
    /// Single-pass pattern fill
    Fill {
        /// Destination
        dst: DevicePtr,
        /// Pattern of any length
        pattern: Vec<u8>,
        /// Bytes, a multiple of the pattern length
        size: u64,
    },
    /// Copy of host-provided bytes
    HostWrite {
        /// Destination
        dst: DevicePtr,
        /// Bytes captured at submission
        data: Vec<u8>,
    },
    /// Migration hint
    Prefetch {
        /// Start of range
        ptr: DevicePtr,
        /// Bytes
        size: u64,
        /// Direction
        flags: UsmMigrationFlags,
    },
    /// Memory advice
    Advise {
        /// Start of range
        ptr: DevicePtr,
        /// Bytes
        size: u64,
        /// Advice
        advice: UsmAdviceFlags,
    },
    /// Dependency-only op
    Empty,
    /// Block the stream until a position of another stream completes
    Wait(StreamPos),
    /// Write an event timestamp
    Timestamp(Arc<EventTimes>, Stamp),
}

// =============================================================================
// SCHEDULER
// =============================================================================

#[derive(Debug)]
struct StreamState {
    ops: VecDeque<(u64, Op)>,
    next_seq: u64,
    completed: u64,
    busy: bool,
    /// Failed ops not yet reported, in sequence order
    faults: VecDeque<(u64, Error)>,
}

impl StreamState {
    fn is_idle(&self) -> bool {
        self.ops.is_empty() && !self.busy
    }

    fn take_fault(&mut self, upto: u64) -> Option<Error> {
        match self.faults.front() {
            Some(&(seq, _)) if seq <= upto => self.faults.pop_front().map(|(_, e)| e),
            _ => None,
        }
    }
}

#[derive(Debug)]
struct SchedulerState {
    streams: Vec<StreamState>,
    cursor: usize,
}

impl SchedulerState {
    fn reached(&self, pos: StreamPos) -> bool {
        self.streams
            .get(pos.stream.0 as usize)
            .map_or(true, |s| s.completed >= pos.seq)
    }

    fn runnable(&self, index: usize) -> bool {
        let stream = &self.streams[index];
        if stream.busy {
            return false;
        }
        match stream.ops.front() {
            Some((_, Op::Wait(pos))) => self.reached(*pos),
            Some(_) => true,
            None => false,
        }
    }
}

/// Per-device stream scheduler
#[derive(Debug)]
pub struct Scheduler {
    state: Mutex<SchedulerState>,
    clock: AtomicU64,
}

impl Scheduler {
    /// Create a scheduler with no streams
    pub const fn new() -> Self {
        Self {
            state: Mutex::new(SchedulerState {
                streams: Vec::new(),
                cursor: 0,
            }),
            clock: AtomicU64::new(0),
        }
    }

    /// Create a new stream
    pub fn create_stream(&self) -> StreamId {
        let mut state = self.state.lock();
        let id = StreamId(state.streams.len() as u32);
        state.streams.push(StreamState {
            ops: VecDeque::new(),
            next_seq: 1,
            completed: 0,
            busy: false,
            faults: VecDeque::new(),
        });
        id
    }

    /// Current device time in ticks
    #[inline]
    pub fn now(&self) -> u64 {
        self.clock.load(Ordering::Acquire)
    }

    /// Append an op to a stream
    pub fn submit(&self, stream: StreamId, op: Op) -> Result<StreamPos> {
        let mut state = self.state.lock();
        let s = state
            .streams
            .get_mut(stream.0 as usize)
            .ok_or(Error::InvalidValue)?;
        let seq = s.next_seq;
        s.next_seq += 1;
        s.ops.push_back((seq, op));
        Ok(StreamPos { stream, seq })
    }

    /// Check that `stream` exists on this scheduler
    pub fn check_stream(&self, stream: StreamId) -> Result<()> {
        if (stream.0 as usize) < self.state.lock().streams.len() {
            Ok(())
        } else {
            Err(Error::InvalidValue)
        }
    }

    /// Check whether a stream position has completed
    pub fn is_complete(&self, pos: StreamPos) -> bool {
        self.state.lock().reached(pos)
    }

    /// Ops still queued on a stream
    pub fn pending(&self, stream: StreamId) -> usize {
        self.state
            .lock()
            .streams
            .get(stream.0 as usize)
            .map_or(0, |s| s.ops.len())
    }

    /// Failures on `stream` not yet reported to a host wait
    pub fn fault_count(&self, stream: StreamId) -> usize {
        self.state
            .lock()
            .streams
            .get(stream.0 as usize)
            .map_or(0, |s| s.faults.len())
    }

    /// Run one runnable op; returns `false` when nothing was runnable
    ///
    /// A failing op is recorded as a fault of its stream.
    pub fn step(&self, memory: &MemoryArena) -> bool {
        let (index, seq, op) = {
            let mut state = self.state.lock();
            let count = state.streams.len();
            let Some(index) = (0..count)
                .map(|k| (state.cursor + k) % count)
                .find(|&i| state.runnable(i))
            else {
                return false;
            };
            state.cursor = (index + 1) % count;
            let stream = &mut state.streams[index];
            let Some((seq, op)) = stream.ops.pop_front() else {
                return false;
            };
            stream.busy = true;
            (index, seq, op)
        };

        let result = self.execute(memory, &op);

        let mut state = self.state.lock();
        let stream = &mut state.streams[index];
        stream.completed = seq;
        stream.busy = false;
        if let Err(e) = result {
            log::warn!("Scheduler: op {} on stream {} failed: {}", seq, index, e);
            stream.faults.push_back((seq, e));
        }
        true
    }

    fn execute(&self, memory: &MemoryArena, op: &Op) -> Result<()> {
        match op {
            Op::Kernel(launch) => launch.execute(memory),
            Op::Memcpy { dst, src, size } => memory.copy(*dst, *src, *size),
            Op::Memcpy3d(params) => memory.copy_3d(params),
            Op::Memset(params) => memory.memset(params),
            Op::Fill { dst, pattern, size } => memory.fill(*dst, pattern, *size),
            Op::HostWrite { dst, data } => memory.write(*dst, data),
            Op::Prefetch { ptr, size, .. } | Op::Advise { ptr, size, .. } => {
                memory.check_range(*ptr, *size)
            },
            Op::Empty | Op::Wait(_) => Ok(()),
            Op::Timestamp(times, stamp) => {
                let tick = self.clock.fetch_add(1, Ordering::AcqRel) + 1;
                times.stamp(*stamp, tick);
                Ok(())
            },
        }
    }

    /// Pump streams until `done` holds
    pub fn drive_until<F>(&self, memory: &MemoryArena, mut done: F) -> Result<()>
    where
        F: FnMut(&Self) -> bool,
    {
        loop {
            if done(self) {
                return Ok(());
            }
            if self.step(memory) {
                continue;
            }
            if done(self) {
                return Ok(());
            }
            if self.state.lock().streams.iter().any(|s| s.busy) {
                // another thread is executing; its completion may unblock us
                core::hint::spin_loop();
                continue;
            }
            log::warn!("Scheduler: no runnable work left, wait cannot complete");
            return Err(Error::DeviceLost);
        }
    }

    /// Run until `pos` completes
    ///
    /// Returns the first unreported failure on `pos.stream` at or before
    /// `pos`.
    pub fn wait_for(&self, memory: &MemoryArena, pos: StreamPos) -> Result<()> {
        self.drive_until(memory, |s| s.is_complete(pos))?;
        let fault = self
            .state
            .lock()
            .streams
            .get_mut(pos.stream.0 as usize)
            .and_then(|s| s.take_fault(pos.seq));
        fault.map_or(Ok(()), Err)
    }

    /// Run until the given streams are empty
    ///
    /// Every unreported failure on those streams is consumed; the first one
    /// is returned.
    pub fn drain_streams(&self, memory: &MemoryArena, streams: &[StreamId]) -> Result<()> {
        self.drive_until(memory, |s| {
            let state = s.state.lock();
            streams.iter().all(|id| {
                state
                    .streams
                    .get(id.0 as usize)
                    .map_or(true, StreamState::is_idle)
            })
        })?;
        let mut state = self.state.lock();
        let mut first = None;
        for id in streams {
            if let Some(stream) = state.streams.get_mut(id.0 as usize) {
                while let Some(e) = stream.take_fault(u64::MAX) {
                    first.get_or_insert(e);
                }
            }
        }
        first.map_or(Ok(()), Err)
    }

    /// Run until every stream is empty
    pub fn drain(&self, memory: &MemoryArena) -> Result<()> {
        let count = self.state.lock().streams.len() as u32;
        let all: Vec<StreamId> = (0..count).map(StreamId).collect();
        self.drain_streams(memory, &all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::UsmKind;

    #[test]
    fn test_in_order_within_stream() {
        let memory = MemoryArena::new(1 << 16);
        let a = memory.alloc(UsmKind::Device, 4).unwrap();
        let sched = Scheduler::new();
        let s = sched.create_stream();

        sched
            .submit(s, Op::Fill { dst: a, pattern: vec![1], size: 4 })
            .unwrap();
        let last = sched
            .submit(s, Op::Fill { dst: a, pattern: vec![2, 3], size: 4 })
            .unwrap();
        assert_eq!(last.seq, 2);
        assert!(!sched.is_complete(last));

        sched.drain(&memory).unwrap();
        assert!(sched.is_complete(last));
        assert_eq!(memory.read_vec(a, 4).unwrap(), vec![2, 3, 2, 3]);
    }

    #[test]
    fn test_cross_stream_wait() {
        let memory = MemoryArena::new(1 << 16);
        let a = memory.alloc(UsmKind::Device, 4).unwrap();
        let b = memory.alloc(UsmKind::Device, 4).unwrap();
        let sched = Scheduler::new();
        let s0 = sched.create_stream();
        let s1 = sched.create_stream();

        // s1 copies a -> b but must wait for the fill on s0
        sched
            .submit(s1, Op::Wait(StreamPos { stream: s0, seq: 1 }))
            .unwrap();
        let copy = sched
            .submit(s1, Op::Memcpy { dst: b, src: a, size: 4 })
            .unwrap();
        sched
            .submit(s0, Op::Fill { dst: a, pattern: vec![9], size: 4 })
            .unwrap();

        sched
            .drive_until(&memory, |s| s.is_complete(copy))
            .unwrap();
        assert_eq!(memory.read_vec(b, 4).unwrap(), vec![9; 4]);
    }

    #[test]
    fn test_unsatisfiable_wait_is_device_lost() {
        let memory = MemoryArena::new(1 << 16);
        let sched = Scheduler::new();
        let s0 = sched.create_stream();
        let s1 = sched.create_stream();

        let w0 = sched
            .submit(s0, Op::Wait(StreamPos { stream: s1, seq: 1 }))
            .unwrap();
        sched
            .submit(s1, Op::Wait(StreamPos { stream: s0, seq: 1 }))
            .unwrap();
        assert_eq!(
            sched.drive_until(&memory, |s| s.is_complete(w0)),
            Err(Error::DeviceLost)
        );
    }

    #[test]
    fn test_failed_op_still_completes() {
        let memory = MemoryArena::new(1 << 16);
        let sched = Scheduler::new();
        let s = sched.create_stream();
        let bad = sched
            .submit(
                s,
                Op::Memcpy {
                    dst: DevicePtr::new(0x10),
                    src: DevicePtr::new(0x20),
                    size: 4,
                },
            )
            .unwrap();
        assert!(sched.step(&memory));
        assert!(sched.is_complete(bad));
        assert_eq!(sched.pending(s), 0);
        assert_eq!(sched.fault_count(s), 1);

        // reported once, to the wait covering the failed op
        assert_eq!(sched.wait_for(&memory, bad), Err(Error::InvalidValue));
        assert_eq!(sched.wait_for(&memory, bad), Ok(()));
        assert_eq!(sched.fault_count(s), 0);
    }

    #[test]
    fn test_fault_stays_with_its_stream() {
        let memory = MemoryArena::new(1 << 16);
        let a = memory.alloc(UsmKind::Device, 4).unwrap();
        let sched = Scheduler::new();
        let s0 = sched.create_stream();
        let s1 = sched.create_stream();

        let bad = Op::Memcpy {
            dst: DevicePtr::new(0x10),
            src: DevicePtr::new(0x20),
            size: 4,
        };
        sched.submit(s0, bad).unwrap();
        let good = sched
            .submit(s1, Op::Fill { dst: a, pattern: vec![5], size: 4 })
            .unwrap();
        sched.step(&memory);

        assert_eq!(sched.wait_for(&memory, good), Ok(()));
        assert_eq!(sched.drain_streams(&memory, &[s1]), Ok(()));
        assert_eq!(sched.drain_streams(&memory, &[s0]), Err(Error::InvalidValue));
        assert_eq!(sched.drain(&memory), Ok(()));
    }
}
