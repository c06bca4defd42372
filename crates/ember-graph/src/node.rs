//! # Graph Nodes
//!
//! Node parameters shared by the graph and the command list, the arena
//! both of them record into, and the lowering of a node onto a stream.

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;

use ember_core::{DevicePtr, Error, Result};
use ember_device::{
    Device, Event, KernelLaunch, Memcpy3dParams, MemsetParams, Op, StreamId, UsmAdviceFlags,
    UsmMigrationFlags,
};

// =============================================================================
// NODE ID
// =============================================================================

/// Index of a node in its graph or command list
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(u32);

impl NodeId {
    /// Position in record order
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    pub(crate) const fn from_index(index: usize) -> Self {
        Self(index as u32)
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Node#{}", self.0)
    }
}

// =============================================================================
// NODE PARAMETERS
// =============================================================================

/// Parameters of one node
#[derive(Debug, Clone)]
pub enum NodeParams {
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
    /// Dependency-only node
    Empty,
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
    /// Wait on an external event
    EventWait(Arc<Event>),
    /// Record an external event
    EventRecord(Arc<Event>),
}

/// Node kind without parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    /// Kernel launch
    Kernel,
    /// Linear copy
    Memcpy,
    /// Rectangular copy
    Memcpy3d,
    /// Strided memset
    Memset,
    /// Dependency-only node
    Empty,
    /// Migration hint
    Prefetch,
    /// Memory advice
    Advise,
    /// Event wait
    EventWait,
    /// Event record
    EventRecord,
}

impl NodeParams {
    /// Kind of this node
    pub fn kind(&self) -> NodeKind {
        match self {
            Self::Kernel(_) => NodeKind::Kernel,
            Self::Memcpy { .. } => NodeKind::Memcpy,
            Self::Memcpy3d(_) => NodeKind::Memcpy3d,
            Self::Memset(_) => NodeKind::Memset,
            Self::Empty => NodeKind::Empty,
            Self::Prefetch { .. } => NodeKind::Prefetch,
            Self::Advise { .. } => NodeKind::Advise,
            Self::EventWait(_) => NodeKind::EventWait,
            Self::EventRecord(_) => NodeKind::EventRecord,
        }
    }

    fn validate(&self, device: &Device) -> Result<()> {
        match self {
            Self::Kernel(launch) => {
                if !(1..=3).contains(&launch.work_dim) {
                    return Err(Error::InvalidWorkDimension);
                }
                let fits = launch
                    .local_size
                    .iter()
                    .zip(launch.global_size.iter())
                    .all(|(&l, &g)| l != 0 && g % l == 0);
                if !fits {
                    return Err(Error::InvalidWorkGroupSize);
                }
                Ok(())
            },
            Self::Memset(params) => params.validate(),
            Self::EventWait(event) | Self::EventRecord(event) => {
                if event.device().id() == device.id() {
                    Ok(())
                } else {
                    Err(Error::InvalidEvent)
                }
            },
            _ => Ok(()),
        }
    }

    /// Submit the ops of this node to `stream`
    ///
    /// Event waits capture the event's position at this point. A wait on an
    /// event that was never recorded, or that already completed, becomes an
    /// empty op.
    pub fn lower(&self, device: &Device, stream: StreamId) -> Result<()> {
        let scheduler = device.scheduler();
        let op = match self {
            Self::Kernel(launch) => Op::Kernel(launch.clone()),
            Self::Memcpy { dst, src, size } => Op::Memcpy {
                dst: *dst,
                src: *src,
                size: *size,
            },
            Self::Memcpy3d(params) => Op::Memcpy3d(*params),
            Self::Memset(params) => Op::Memset(*params),
            Self::Empty => Op::Empty,
            Self::Prefetch { ptr, size, flags } => Op::Prefetch {
                ptr: *ptr,
                size: *size,
                flags: *flags,
            },
            Self::Advise { ptr, size, advice } => Op::Advise {
                ptr: *ptr,
                size: *size,
                advice: *advice,
            },
            Self::EventWait(event) => match event.recorded_pos() {
                Some(pos) if pos.stream != stream && !scheduler.is_complete(pos) => Op::Wait(pos),
                _ => Op::Empty,
            },
            Self::EventRecord(event) => return event.record_on(stream),
        };
        scheduler.submit(stream, op).map(|_| ())
    }
}

// =============================================================================
// NODE ARENA
// =============================================================================

#[derive(Debug, Clone)]
pub(crate) struct Node {
    pub(crate) params: NodeParams,
    pub(crate) deps: Vec<NodeId>,
}

/// Append-only node storage with dependency validation
#[derive(Debug)]
pub(crate) struct NodeArena {
    pub(crate) nodes: Vec<Node>,
    max_nodes: usize,
}

impl NodeArena {
    pub(crate) fn new(max_nodes: usize) -> Result<Self> {
        if max_nodes == 0 {
            return Err(Error::OutOfResources);
        }
        Ok(Self {
            nodes: Vec::new(),
            max_nodes,
        })
    }

    /// Append a node; dependencies must already exist
    pub(crate) fn push(
        &mut self,
        device: &Device,
        deps: &[NodeId],
        params: NodeParams,
    ) -> Result<NodeId> {
        if deps.iter().any(|d| d.index() >= self.nodes.len()) {
            return Err(Error::InvalidValue);
        }
        params.validate(device)?;
        if self.nodes.len() >= self.max_nodes {
            log::warn!("Graph: node limit {} reached", self.max_nodes);
            return Err(Error::OutOfResources);
        }
        self.nodes
            .try_reserve(1)
            .map_err(|_| Error::OutOfHostMemory)?;

        let mut deps = deps.to_vec();
        deps.sort_unstable();
        deps.dedup();

        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node { params, deps });
        Ok(id)
    }

    pub(crate) fn get(&self, id: NodeId) -> Result<&Node> {
        self.nodes.get(id.index()).ok_or(Error::InvalidValue)
    }

    pub(crate) fn get_mut(&mut self, id: NodeId) -> Result<&mut Node> {
        self.nodes.get_mut(id.index()).ok_or(Error::InvalidValue)
    }

    pub(crate) fn len(&self) -> usize {
        self.nodes.len()
    }

    pub(crate) fn truncate(&mut self, len: usize) {
        self.nodes.truncate(len);
    }
}

// =============================================================================
// PARAMETER UPDATES
// =============================================================================

/// Replace the launch of a kernel node, keeping its kernel
pub(crate) fn update_kernel(node: &mut Node, launch: KernelLaunch) -> Result<()> {
    match &mut node.params {
        NodeParams::Kernel(current) => {
            if current.kernel_id != launch.kernel_id || current.work_dim != launch.work_dim {
                return Err(Error::InvalidValue);
            }
            *current = Arc::new(launch);
            Ok(())
        },
        _ => Err(Error::InvalidValue),
    }
}

/// Replace the event of an event-wait node
pub(crate) fn update_event_wait(node: &mut Node, event: Arc<Event>) -> Result<()> {
    match &mut node.params {
        NodeParams::EventWait(current) => {
            *current = event;
            Ok(())
        },
        _ => Err(Error::InvalidValue),
    }
}

/// Replace the event of an event-record node
pub(crate) fn update_event_record(node: &mut Node, event: Arc<Event>) -> Result<()> {
    match &mut node.params {
        NodeParams::EventRecord(current) => {
            *current = event;
            Ok(())
        },
        _ => Err(Error::InvalidValue),
    }
}
