//! # Native Graph
//!
//! Open graph plus its instantiated, executable form.
//!
//! ```text
//!   Graph (open) ── add_*_node ──▶ nodes + deps
//!       │
//!       └── instantiate ──▶ GraphExec (topology frozen)
//!                              │  set_*_params   (next launch only)
//!                              └─ launch(stream)
//! ```
//!
//! Instantiation orders the nodes topologically, preferring record order
//! among ready nodes. A launch lowers every node onto one stream in that
//! order, so each node runs after all of its dependencies.

use alloc::collections::BTreeSet;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;

use ember_core::{DevicePtr, Error, Result};
use ember_device::{
    ActiveContext, Device, Event, KernelLaunch, Memcpy3dParams, MemsetParams, StreamId,
    UsmAdviceFlags, UsmMigrationFlags,
};

use crate::node::{self, Node, NodeArena, NodeId, NodeKind, NodeParams};

// =============================================================================
// GRAPH
// =============================================================================

/// Open native graph
#[derive(Debug)]
pub struct Graph {
    device: Arc<Device>,
    arena: NodeArena,
}

impl Graph {
    /// Create an empty graph for `device`
    pub fn new(device: &Arc<Device>) -> Result<Self> {
        Ok(Self {
            device: device.clone(),
            arena: NodeArena::new(device.config().max_graph_nodes)?,
        })
    }

    /// Target device
    #[inline]
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    /// Number of nodes
    #[inline]
    pub fn node_count(&self) -> usize {
        self.arena.len()
    }

    /// Kind of a node
    pub fn node_kind(&self, id: NodeId) -> Result<NodeKind> {
        Ok(self.arena.get(id)?.params.kind())
    }

    /// Parameters of a node
    pub fn node_params(&self, id: NodeId) -> Result<&NodeParams> {
        Ok(&self.arena.get(id)?.params)
    }

    /// Direct dependencies of a node
    pub fn dependencies(&self, id: NodeId) -> Result<&[NodeId]> {
        Ok(&self.arena.get(id)?.deps)
    }

    /// Add a node with arbitrary parameters
    pub fn add_node(&mut self, deps: &[NodeId], params: NodeParams) -> Result<NodeId> {
        self.arena.push(&self.device, deps, params)
    }

    /// Add a kernel node
    pub fn add_kernel_node(&mut self, deps: &[NodeId], launch: KernelLaunch) -> Result<NodeId> {
        self.add_node(deps, NodeParams::Kernel(Arc::new(launch)))
    }

    /// Add a linear copy node
    pub fn add_memcpy_node(
        &mut self,
        deps: &[NodeId],
        dst: DevicePtr,
        src: DevicePtr,
        size: u64,
    ) -> Result<NodeId> {
        self.add_node(deps, NodeParams::Memcpy { dst, src, size })
    }

    /// Add a rectangular copy node
    pub fn add_memcpy_3d_node(
        &mut self,
        deps: &[NodeId],
        params: Memcpy3dParams,
    ) -> Result<NodeId> {
        self.add_node(deps, NodeParams::Memcpy3d(params))
    }

    /// Add a memset node; element size must be 1, 2 or 4
    pub fn add_memset_node(&mut self, deps: &[NodeId], params: MemsetParams) -> Result<NodeId> {
        self.add_node(deps, NodeParams::Memset(params))
    }

    /// Add a dependency-only node
    pub fn add_empty_node(&mut self, deps: &[NodeId]) -> Result<NodeId> {
        self.add_node(deps, NodeParams::Empty)
    }

    /// Add a prefetch node
    pub fn add_prefetch_node(
        &mut self,
        deps: &[NodeId],
        ptr: DevicePtr,
        size: u64,
        flags: UsmMigrationFlags,
    ) -> Result<NodeId> {
        self.add_node(deps, NodeParams::Prefetch { ptr, size, flags })
    }

    /// Add a memory-advice node
    pub fn add_advise_node(
        &mut self,
        deps: &[NodeId],
        ptr: DevicePtr,
        size: u64,
        advice: UsmAdviceFlags,
    ) -> Result<NodeId> {
        self.add_node(deps, NodeParams::Advise { ptr, size, advice })
    }

    /// Add a node waiting on an external event
    pub fn add_event_wait_node(&mut self, deps: &[NodeId], event: Arc<Event>) -> Result<NodeId> {
        self.add_node(deps, NodeParams::EventWait(event))
    }

    /// Add a node recording an external event
    pub fn add_event_record_node(&mut self, deps: &[NodeId], event: Arc<Event>) -> Result<NodeId> {
        self.add_node(deps, NodeParams::EventRecord(event))
    }

    /// Drop every node from `len` onward
    ///
    /// Used to undo a partially recorded multi-node operation.
    pub fn truncate(&mut self, len: usize) {
        self.arena.truncate(len);
    }
}

// =============================================================================
// GRAPH EXEC
// =============================================================================

/// Instantiated graph
#[derive(Debug)]
pub struct GraphExec {
    device: Arc<Device>,
    nodes: Vec<Node>,
    order: Vec<NodeId>,
}

impl GraphExec {
    /// Freeze `graph` into an executable form
    pub fn instantiate(graph: &Graph) -> Result<Self> {
        let nodes = graph.arena.nodes.clone();
        let order = topological_order(&nodes)?;
        log::debug!(
            "Graph: instantiated {} node(s) for device {}",
            nodes.len(),
            graph.device.id()
        );
        Ok(Self {
            device: graph.device.clone(),
            nodes,
            order,
        })
    }

    /// Number of nodes
    #[inline]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Execution order
    #[inline]
    pub fn order(&self) -> &[NodeId] {
        &self.order
    }

    /// Parameters of a node as they will be used by the next launch
    pub fn node_params(&self, id: NodeId) -> Result<&NodeParams> {
        self.nodes
            .get(id.index())
            .map(|n| &n.params)
            .ok_or(Error::InvalidValue)
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut Node> {
        self.nodes.get_mut(id.index()).ok_or(Error::InvalidValue)
    }

    /// Replace a kernel node's launch; the kernel itself must not change
    pub fn set_kernel_node_params(&mut self, id: NodeId, launch: KernelLaunch) -> Result<()> {
        node::update_kernel(self.node_mut(id)?, launch)
    }

    /// Replace the event an event-wait node waits on
    pub fn set_event_wait_node_event(&mut self, id: NodeId, event: Arc<Event>) -> Result<()> {
        if event.device().id() != self.device.id() {
            return Err(Error::InvalidEvent);
        }
        node::update_event_wait(self.node_mut(id)?, event)
    }

    /// Replace the event an event-record node records
    pub fn set_event_record_node_event(&mut self, id: NodeId, event: Arc<Event>) -> Result<()> {
        if event.device().id() != self.device.id() {
            return Err(Error::InvalidEvent);
        }
        node::update_event_record(self.node_mut(id)?, event)
    }

    /// Launch on `stream`
    ///
    /// Launched work captures the current parameters; later updates only
    /// affect later launches.
    pub fn launch(&self, active: &ActiveContext, stream: StreamId) -> Result<()> {
        active.check_device(&self.device)?;
        // lowering only fails on an unknown stream
        self.device.scheduler().check_stream(stream)?;
        for id in &self.order {
            self.nodes[id.index()].params.lower(&self.device, stream)?;
        }
        Ok(())
    }
}

/// Kahn's algorithm, taking the lowest ready index first
fn topological_order(nodes: &[Node]) -> Result<Vec<NodeId>> {
    let mut indegree = vec![0usize; nodes.len()];
    let mut successors: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];
    for (i, node) in nodes.iter().enumerate() {
        for dep in &node.deps {
            let d = dep.index();
            if d >= nodes.len() {
                return Err(Error::InvalidValue);
            }
            indegree[i] += 1;
            successors[d].push(i);
        }
    }

    let mut ready: BTreeSet<usize> = indegree
        .iter()
        .enumerate()
        .filter(|(_, n)| **n == 0)
        .map(|(i, _)| i)
        .collect();
    let mut order = Vec::with_capacity(nodes.len());
    while let Some(i) = ready.pop_first() {
        order.push(NodeId::from_index(i));
        for &s in &successors[i] {
            indegree[s] -= 1;
            if indegree[s] == 0 {
                ready.insert(s);
            }
        }
    }

    if order.len() != nodes.len() {
        // only reachable through a cycle
        return Err(Error::OutOfResources);
    }
    Ok(order)
}
