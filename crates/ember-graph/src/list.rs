//! # Command List
//!
//! Recorded command list for devices without a native graph. Commands are
//! replayed in record order; every dependency refers to an earlier command,
//! so record order already satisfies the dependency graph.
//!
//! Unlike [`Graph`](crate::Graph), a list has no separate executable form:
//! it is closed once and then replayed as often as needed.

use alloc::sync::Arc;

use ember_core::{Error, Result};
use ember_device::{ActiveContext, Device, Event, KernelLaunch, StreamId};

use crate::node::{self, NodeArena, NodeId, NodeKind, NodeParams};

/// In-order command list
#[derive(Debug)]
pub struct CommandList {
    device: Arc<Device>,
    arena: NodeArena,
    mutable: bool,
    closed: bool,
}

impl CommandList {
    /// Open a list for `device`
    ///
    /// Only a `mutable` list accepts parameter updates after closing.
    pub fn new(device: &Arc<Device>, mutable: bool) -> Result<Self> {
        Ok(Self {
            device: device.clone(),
            arena: NodeArena::new(device.config().max_graph_nodes)?,
            mutable,
            closed: false,
        })
    }

    /// Target device
    #[inline]
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    /// Whether updates are accepted
    #[inline]
    pub fn is_mutable(&self) -> bool {
        self.mutable
    }

    /// Whether the list is closed
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Number of recorded commands
    #[inline]
    pub fn node_count(&self) -> usize {
        self.arena.len()
    }

    /// Kind of a command
    pub fn node_kind(&self, id: NodeId) -> Result<NodeKind> {
        Ok(self.arena.get(id)?.params.kind())
    }

    /// Parameters of a command
    pub fn node_params(&self, id: NodeId) -> Result<&NodeParams> {
        Ok(&self.arena.get(id)?.params)
    }

    /// Record a command
    pub fn append(&mut self, deps: &[NodeId], params: NodeParams) -> Result<NodeId> {
        if self.closed {
            return Err(Error::InvalidOperation);
        }
        self.arena.push(&self.device, deps, params)
    }

    /// Drop every command from `len` onward
    pub fn truncate(&mut self, len: usize) {
        if !self.closed {
            self.arena.truncate(len);
        }
    }

    /// Close the list for recording
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Err(Error::InvalidOperation);
        }
        self.closed = true;
        log::debug!(
            "CommandList: closed with {} command(s) for device {}",
            self.arena.len(),
            self.device.id()
        );
        Ok(())
    }

    /// Replay every command on `stream`
    pub fn execute(&self, active: &ActiveContext, stream: StreamId) -> Result<()> {
        if !self.closed {
            return Err(Error::InvalidOperation);
        }
        active.check_device(&self.device)?;
        self.device.scheduler().check_stream(stream)?;
        for node in &self.arena.nodes {
            node.params.lower(&self.device, stream)?;
        }
        Ok(())
    }

    fn check_mutable(&self) -> Result<()> {
        if self.closed && self.mutable {
            Ok(())
        } else {
            Err(Error::InvalidOperation)
        }
    }

    /// Replace the launch of a kernel command
    pub fn update_kernel(&mut self, id: NodeId, launch: KernelLaunch) -> Result<()> {
        self.check_mutable()?;
        node::update_kernel(self.arena.get_mut(id)?, launch)
    }

    /// Replace the event of an event-wait command
    pub fn update_event_wait(&mut self, id: NodeId, event: Arc<Event>) -> Result<()> {
        self.check_mutable()?;
        if event.device().id() != self.device.id() {
            return Err(Error::InvalidEvent);
        }
        node::update_event_wait(self.arena.get_mut(id)?, event)
    }

    /// Replace the event of an event-record command
    pub fn update_event_record(&mut self, id: NodeId, event: Arc<Event>) -> Result<()> {
        self.check_mutable()?;
        if event.device().id() != self.device.id() {
            return Err(Error::InvalidEvent);
        }
        node::update_event_record(self.arena.get_mut(id)?, event)
    }
}
