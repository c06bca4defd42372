//! # Command-Buffer Back-ends
//!
//! A command buffer records into whatever deferred-execution primitive its
//! device offers. Two back-ends exist:
//!
//! ```text
//!   NativeGraph    Graph ── finalize: instantiate ──▶ GraphExec
//!                  updates go to the GraphExec
//!
//!   QueueEmulated  CommandList ── finalize: close
//!                  updates go to the closed list
//! ```
//!
//! Builders never branch on the back-end kind. They consult
//! [`BackendCaps`] and talk to the [`CommandBufferBackend`] trait.

use alloc::sync::Arc;

use ember_core::{Error, Result};
use ember_device::{ActiveContext, BackendCaps, BackendKind, Device, Event, KernelLaunch, StreamId};
use ember_graph::{CommandList, Graph, GraphExec, NodeId, NodeKind, NodeParams};

// =============================================================================
// BACKEND TRAIT
// =============================================================================

/// Native recording primitive behind a command buffer
pub trait CommandBufferBackend: Send + Sync {
    /// Which primitive this is
    fn kind(&self) -> BackendKind;

    /// Optional features
    fn caps(&self) -> BackendCaps;

    /// Number of recorded nodes
    fn node_count(&self) -> usize;

    /// Kind of a recorded node
    fn node_kind(&self, node: NodeId) -> Result<NodeKind>;

    /// Record a node after `deps`
    fn append(&mut self, deps: &[NodeId], params: NodeParams) -> Result<NodeId>;

    /// Drop every node recorded from `mark` onward
    fn rollback(&mut self, mark: usize);

    /// Compile or close for execution
    fn finalize(&mut self) -> Result<()>;

    /// Submit the whole buffer to `stream`
    fn launch(&self, active: &ActiveContext, stream: StreamId) -> Result<()>;

    /// Current launch of a kernel node
    fn kernel_params(&self, node: NodeId) -> Result<KernelLaunch>;

    /// Replace the launch of a kernel node
    fn update_kernel(&mut self, node: NodeId, launch: KernelLaunch) -> Result<()>;

    /// Replace the event of an event-wait node
    fn update_event_wait(&mut self, node: NodeId, event: Arc<Event>) -> Result<()>;

    /// Replace the event of an event-record node
    fn update_event_record(&mut self, node: NodeId, event: Arc<Event>) -> Result<()>;
}

fn kernel_of(params: &NodeParams) -> Result<KernelLaunch> {
    match params {
        NodeParams::Kernel(launch) => Ok((**launch).clone()),
        _ => Err(Error::InvalidValue),
    }
}

// =============================================================================
// NATIVE GRAPH
// =============================================================================

/// Back-end over the device's native graph
#[derive(Debug)]
pub struct NativeGraphBackend {
    caps: BackendCaps,
    graph: Graph,
    exec: Option<GraphExec>,
}

impl NativeGraphBackend {
    /// Open an empty graph on `device`
    pub fn new(device: &Arc<Device>) -> Result<Self> {
        Ok(Self {
            caps: device.caps(),
            graph: Graph::new(device)?,
            exec: None,
        })
    }

    fn exec_mut(&mut self) -> Result<&mut GraphExec> {
        self.exec.as_mut().ok_or(Error::InvalidOperation)
    }
}

impl CommandBufferBackend for NativeGraphBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::NativeGraph
    }

    fn caps(&self) -> BackendCaps {
        self.caps
    }

    fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    fn node_kind(&self, node: NodeId) -> Result<NodeKind> {
        self.graph.node_kind(node)
    }

    fn append(&mut self, deps: &[NodeId], params: NodeParams) -> Result<NodeId> {
        if self.exec.is_some() {
            return Err(Error::InvalidOperation);
        }
        self.graph.add_node(deps, params)
    }

    fn rollback(&mut self, mark: usize) {
        if self.exec.is_none() {
            self.graph.truncate(mark);
        }
    }

    fn finalize(&mut self) -> Result<()> {
        if self.exec.is_some() {
            return Err(Error::InvalidOperation);
        }
        self.exec = Some(GraphExec::instantiate(&self.graph)?);
        Ok(())
    }

    fn launch(&self, active: &ActiveContext, stream: StreamId) -> Result<()> {
        self.exec
            .as_ref()
            .ok_or(Error::InvalidOperation)?
            .launch(active, stream)
    }

    fn kernel_params(&self, node: NodeId) -> Result<KernelLaunch> {
        match &self.exec {
            Some(exec) => kernel_of(exec.node_params(node)?),
            None => kernel_of(self.graph.node_params(node)?),
        }
    }

    fn update_kernel(&mut self, node: NodeId, launch: KernelLaunch) -> Result<()> {
        self.exec_mut()?.set_kernel_node_params(node, launch)
    }

    fn update_event_wait(&mut self, node: NodeId, event: Arc<Event>) -> Result<()> {
        self.exec_mut()?.set_event_wait_node_event(node, event)
    }

    fn update_event_record(&mut self, node: NodeId, event: Arc<Event>) -> Result<()> {
        self.exec_mut()?.set_event_record_node_event(node, event)
    }
}

// =============================================================================
// QUEUE EMULATED
// =============================================================================

/// Back-end replaying an in-order command list
#[derive(Debug)]
pub struct QueueEmulatedBackend {
    caps: BackendCaps,
    list: CommandList,
}

impl QueueEmulatedBackend {
    /// Open an empty list on `device`
    pub fn new(device: &Arc<Device>, updatable: bool) -> Result<Self> {
        Ok(Self {
            caps: device.caps(),
            list: CommandList::new(device, updatable)?,
        })
    }
}

impl CommandBufferBackend for QueueEmulatedBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::QueueEmulated
    }

    fn caps(&self) -> BackendCaps {
        self.caps
    }

    fn node_count(&self) -> usize {
        self.list.node_count()
    }

    fn node_kind(&self, node: NodeId) -> Result<NodeKind> {
        self.list.node_kind(node)
    }

    fn append(&mut self, deps: &[NodeId], params: NodeParams) -> Result<NodeId> {
        self.list.append(deps, params)
    }

    fn rollback(&mut self, mark: usize) {
        self.list.truncate(mark);
    }

    fn finalize(&mut self) -> Result<()> {
        self.list.close()
    }

    fn launch(&self, active: &ActiveContext, stream: StreamId) -> Result<()> {
        self.list.execute(active, stream)
    }

    fn kernel_params(&self, node: NodeId) -> Result<KernelLaunch> {
        kernel_of(self.list.node_params(node)?)
    }

    fn update_kernel(&mut self, node: NodeId, launch: KernelLaunch) -> Result<()> {
        self.list.update_kernel(node, launch)
    }

    fn update_event_wait(&mut self, node: NodeId, event: Arc<Event>) -> Result<()> {
        self.list.update_event_wait(node, event)
    }

    fn update_event_record(&mut self, node: NodeId, event: Arc<Event>) -> Result<()> {
        self.list.update_event_record(node, event)
    }
}

// =============================================================================
// BACKEND DISPATCH
// =============================================================================

/// Back-end selected from the device configuration
#[derive(Debug)]
pub enum Backend {
    /// Native graph
    NativeGraph(NativeGraphBackend),
    /// Emulated with a command list
    QueueEmulated(QueueEmulatedBackend),
}

impl Backend {
    /// Pick the back-end `device` is configured for
    pub fn for_device(device: &Arc<Device>, updatable: bool) -> Result<Self> {
        Ok(match device.backend() {
            BackendKind::NativeGraph => Self::NativeGraph(NativeGraphBackend::new(device)?),
            BackendKind::QueueEmulated => {
                Self::QueueEmulated(QueueEmulatedBackend::new(device, updatable)?)
            },
        })
    }

    fn inner(&self) -> &dyn CommandBufferBackend {
        match self {
            Self::NativeGraph(b) => b,
            Self::QueueEmulated(b) => b,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn CommandBufferBackend {
        match self {
            Self::NativeGraph(b) => b,
            Self::QueueEmulated(b) => b,
        }
    }
}

impl CommandBufferBackend for Backend {
    fn kind(&self) -> BackendKind {
        self.inner().kind()
    }

    fn caps(&self) -> BackendCaps {
        self.inner().caps()
    }

    fn node_count(&self) -> usize {
        self.inner().node_count()
    }

    fn node_kind(&self, node: NodeId) -> Result<NodeKind> {
        self.inner().node_kind(node)
    }

    fn append(&mut self, deps: &[NodeId], params: NodeParams) -> Result<NodeId> {
        self.inner_mut().append(deps, params)
    }

    fn rollback(&mut self, mark: usize) {
        self.inner_mut().rollback(mark);
    }

    fn finalize(&mut self) -> Result<()> {
        self.inner_mut().finalize()
    }

    fn launch(&self, active: &ActiveContext, stream: StreamId) -> Result<()> {
        self.inner().launch(active, stream)
    }

    fn kernel_params(&self, node: NodeId) -> Result<KernelLaunch> {
        self.inner().kernel_params(node)
    }

    fn update_kernel(&mut self, node: NodeId, launch: KernelLaunch) -> Result<()> {
        self.inner_mut().update_kernel(node, launch)
    }

    fn update_event_wait(&mut self, node: NodeId, event: Arc<Event>) -> Result<()> {
        self.inner_mut().update_event_wait(node, event)
    }

    fn update_event_record(&mut self, node: NodeId, event: Arc<Event>) -> Result<()> {
        self.inner_mut().update_event_record(node, event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_device::{Context, DeviceConfig};

    #[test]
    fn test_backend_follows_config() {
        let ctx = Context::with_devices(&[
            DeviceConfig::native_graph(),
            DeviceConfig::queue_emulated(),
        ])
        .unwrap();
        let graph = Backend::for_device(&ctx.device(0).unwrap(), false).unwrap();
        let list = Backend::for_device(&ctx.device(1).unwrap(), false).unwrap();
        assert_eq!(graph.kind(), BackendKind::NativeGraph);
        assert_eq!(list.kind(), BackendKind::QueueEmulated);
        assert!(graph.caps().contains(BackendCaps::USM_IN_GRAPH));
        assert!(!list.caps().contains(BackendCaps::USM_IN_GRAPH));
    }

    #[test]
    fn test_no_append_after_finalize() {
        for config in [DeviceConfig::native_graph(), DeviceConfig::queue_emulated()] {
            let ctx = Context::new(config).unwrap();
            let mut backend = Backend::for_device(&ctx.device(0).unwrap(), false).unwrap();
            backend.append(&[], NodeParams::Empty).unwrap();
            backend.finalize().unwrap();
            assert_eq!(backend.finalize(), Err(Error::InvalidOperation));
            assert_eq!(
                backend.append(&[], NodeParams::Empty),
                Err(Error::InvalidOperation)
            );
            assert_eq!(backend.node_count(), 1);
        }
    }

    #[test]
    fn test_rollback() {
        let ctx = Context::new(DeviceConfig::native_graph()).unwrap();
        let mut backend = Backend::for_device(&ctx.device(0).unwrap(), false).unwrap();
        let first = backend.append(&[], NodeParams::Empty).unwrap();
        let mark = backend.node_count();
        backend.append(&[first], NodeParams::Empty).unwrap();
        backend.rollback(mark);
        assert_eq!(backend.node_count(), 1);
        assert_eq!(backend.node_kind(first).unwrap(), NodeKind::Empty);
    }

    #[test]
    fn test_update_before_finalize_is_rejected() {
        let ctx = Context::new(DeviceConfig::native_graph()).unwrap();
        let dev = ctx.device(0).unwrap();
        let mut backend = Backend::for_device(&dev, true).unwrap();
        let event = Event::new(&dev, ember_core::CommandKind::EventsWait);
        let node = backend.append(&[], NodeParams::EventRecord(event.clone())).unwrap();
        assert_eq!(
            backend.update_event_record(node, event),
            Err(Error::InvalidOperation)
        );
        assert_eq!(backend.kernel_params(node).map(|_| ()), Err(Error::InvalidValue));
    }
}
