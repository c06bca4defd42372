//! # Device Configuration
//!
//! Static description of what a device and its command-buffer back-end can
//! do. Every capability the command-buffer layer branches on is a bit in
//! [`BackendCaps`], so call sites never special-case a back-end by name.

use bitflags::bitflags;

// =============================================================================
// BACKEND KIND
// =============================================================================

/// Native primitive a command buffer is lowered onto
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// Vendor graph with a separate instantiate step and exec-update hooks
    NativeGraph,
    /// Linear command list replayed in record order, no compile step
    QueueEmulated,
}

bitflags! {
    /// Optional command-buffer capabilities
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BackendCaps: u32 {
        /// USM copies and fills can be recorded
        const USM_IN_GRAPH      = 1 << 0;
        /// Prefetch hints are recorded as real nodes
        const PREFETCH_IN_GRAPH = 1 << 1;
        /// Memory advice is recorded as real nodes
        const ADVISE_IN_GRAPH   = 1 << 2;
        /// Kernel launches can be patched after finalize
        const MUTABLE_DISPATCH  = 1 << 3;
        /// Commands can wait on and signal external events
        const EVENT_SYNC        = 1 << 4;
    }
}

// =============================================================================
// DEVICE CONFIG
// =============================================================================

/// Device configuration
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    /// Human-readable device name
    pub name: &'static str,
    /// Command-buffer back-end
    pub backend: BackendKind,
    /// Back-end capabilities
    pub caps: BackendCaps,
    /// Compute streams created per queue
    pub compute_streams: usize,
    /// Maximum work-items per work-group
    pub max_work_group_size: usize,
    /// Device memory capacity in bytes
    pub memory_capacity: u64,
    /// Maximum nodes in one native graph
    pub max_graph_nodes: usize,
}

impl DeviceConfig {
    /// Graph-capable back-end
    ///
    /// Prefetch and advice have no graph node on this back-end and are
    /// recorded as empty nodes.
    pub fn native_graph() -> Self {
        Self {
            name: "ember-sw-graph",
            backend: BackendKind::NativeGraph,
            caps: BackendCaps::USM_IN_GRAPH
                | BackendCaps::MUTABLE_DISPATCH
                | BackendCaps::EVENT_SYNC,
            compute_streams: 4,
            max_work_group_size: 1024,
            memory_capacity: 64 * 1024 * 1024,
            max_graph_nodes: 4096,
        }
    }

    /// Command-list back-end without USM or event support in the list
    pub fn queue_emulated() -> Self {
        Self {
            name: "ember-sw-list",
            backend: BackendKind::QueueEmulated,
            caps: BackendCaps::MUTABLE_DISPATCH,
            compute_streams: 1,
            max_work_group_size: 256,
            memory_capacity: 64 * 1024 * 1024,
            max_graph_nodes: 4096,
        }
    }

    /// Replace the capability set
    pub fn with_caps(mut self, caps: BackendCaps) -> Self {
        self.caps = caps;
        self
    }

    /// Replace the graph node limit
    pub fn with_max_graph_nodes(mut self, max: usize) -> Self {
        self.max_graph_nodes = max;
        self
    }

    /// Replace the memory capacity
    pub fn with_memory_capacity(mut self, bytes: u64) -> Self {
        self.memory_capacity = bytes;
        self
    }

    /// Replace the number of compute streams per queue
    pub fn with_compute_streams(mut self, count: usize) -> Self {
        self.compute_streams = count.max(1);
        self
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self::native_graph()
    }
}
