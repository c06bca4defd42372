//! # Command Handles
//!
//! A command handle refers to one recorded command of an updatable command
//! buffer and is the entry point for patching it after finalize.
//!
//! ```text
//!   CommandHandle ──▶ CommandObject ── buffer ──▶ CommandBuffer
//!                          │
//!                          ├─ node         (kernel / copy / fill ...)
//!                          ├─ wait_nodes   (one per wait event)
//!                          └─ signal_node  (if a signal was requested)
//! ```
//!
//! Updates never change topology. The number of wait nodes, the presence
//! of a signal node and the work dimension of a kernel are fixed at record
//! time. Every update takes effect on the next enqueue; launches already
//! submitted keep the parameters they were submitted with.
//!
//! Handles start with one external and two internal references: one for
//! the user and one held by the owning buffer. Each live handle in turn
//! holds an internal reference on its buffer.

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;

use bytemuck::Pod;
use ember_core::{CommandKind, DevicePtr, Error, Handle, HandleTable, RefCounts, Result};
use ember_device::{merge_exec_info, Event, ExecInfo, KernelArg, MemBuffer, NdRange};
use ember_graph::NodeId;
use spin::Mutex;

use crate::backend::CommandBufferBackend;
use crate::command_buffer::CommandBuffer;

pub(crate) type CommandTable = Mutex<HandleTable<Arc<CommandObject>>>;

pub(crate) static COMMANDS: CommandTable = Mutex::new(HandleTable::new());

// =============================================================================
// RECORDED METADATA
// =============================================================================

/// Structural properties fixed at record time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CommandMeta {
    /// Kernel launch
    Kernel {
        work_dim: u32,
        /// Recorded as an empty node because the global size was zero
        zero_sized: bool,
    },
    /// Any other command
    Other,
}

#[derive(Debug)]
pub(crate) struct CommandRecord {
    pub(crate) buffer: CommandBuffer,
    pub(crate) kind: CommandKind,
    pub(crate) node: NodeId,
    pub(crate) meta: CommandMeta,
    pub(crate) wait_nodes: Vec<NodeId>,
    pub(crate) signal_node: Option<NodeId>,
}

#[derive(Debug)]
pub(crate) struct CommandObject {
    record: CommandRecord,
    counts: RefCounts,
}

// =============================================================================
// KERNEL LAUNCH UPDATE
// =============================================================================

/// Changes to apply to a recorded kernel launch
///
/// Every field left unset keeps its recorded value.
#[derive(Debug, Clone, Default)]
pub struct KernelLaunchUpdate {
    /// Must equal the recorded work dimension when set
    pub work_dim: Option<u32>,
    /// Argument replacements by index
    pub args: Vec<(u32, KernelArg)>,
    /// Exec-info entries, replacing entries of the same kind
    pub exec_info: Vec<ExecInfo>,
    /// New global offset
    pub global_offset: Option<[u64; 3]>,
    /// New global size
    pub global_size: Option<[u64; 3]>,
    /// New work-group size; derived again when only the global size changes
    pub local_size: Option<[u64; 3]>,
}

impl KernelLaunchUpdate {
    /// Empty update
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace a by-value argument
    #[must_use]
    pub fn arg_value<T: Pod>(mut self, index: u32, value: &T) -> Self {
        let bytes = bytemuck::bytes_of(value).to_vec();
        self.args.push((index, KernelArg::Value(bytes)));
        self
    }

    /// Replace a USM pointer argument
    #[must_use]
    pub fn arg_pointer(mut self, index: u32, ptr: DevicePtr) -> Self {
        self.args.push((index, KernelArg::Pointer(ptr)));
        self
    }

    /// Replace a memory-object argument
    #[must_use]
    pub fn arg_mem_obj(mut self, index: u32, mem: &Arc<MemBuffer>) -> Self {
        self.args.push((index, KernelArg::MemObj(mem.clone())));
        self
    }

    /// Set an exec-info entry
    #[must_use]
    pub fn exec_info(mut self, info: ExecInfo) -> Self {
        self.exec_info.push(info);
        self
    }

    /// State the work dimension
    #[must_use]
    pub fn work_dim(mut self, work_dim: u32) -> Self {
        self.work_dim = Some(work_dim);
        self
    }

    /// Move the iteration space
    #[must_use]
    pub fn global_offset(mut self, offset: [u64; 3]) -> Self {
        self.global_offset = Some(offset);
        self
    }

    /// Resize the iteration space
    #[must_use]
    pub fn global_size(mut self, size: [u64; 3]) -> Self {
        self.global_size = Some(size);
        self
    }

    /// Change the work-group size
    #[must_use]
    pub fn local_size(mut self, size: [u64; 3]) -> Self {
        self.local_size = Some(size);
        self
    }
}

/// Keep the first `dims` entries and pad the rest with `fill`
fn normalize(values: [u64; 3], dims: usize, fill: u64) -> [u64; 3] {
    let mut out = [fill; 3];
    out[..dims].copy_from_slice(&values[..dims]);
    out
}

/// Command info query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandInfo {
    /// External reference count
    ReferenceCount,
}

// =============================================================================
// COMMAND HANDLE
// =============================================================================

/// Handle to a recorded command of an updatable command buffer
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommandHandle(Handle<Arc<CommandObject>>);

impl fmt::Debug for CommandHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Command({}v{})", self.0.index(), self.0.generation())
    }
}

impl CommandHandle {
    pub(crate) fn create_in(table: &CommandTable, record: CommandRecord) -> Result<Self> {
        let object = Arc::new(CommandObject {
            record,
            counts: RefCounts::with_counts(1, 2),
        });
        Ok(Self(table.lock().insert(object)?))
    }

    fn object(self) -> Result<Arc<CommandObject>> {
        COMMANDS.lock().get(self.0).cloned()
    }

    fn live(self) -> Result<Arc<CommandObject>> {
        let object = self.object()?;
        if object.counts.external() == 0 {
            return Err(Error::InvalidNullHandle);
        }
        Ok(object)
    }

    /// Take another user reference
    pub fn retain(self) -> Result<()> {
        self.live()?.counts.retain()
    }

    /// Drop a user reference
    pub fn release(self) -> Result<()> {
        self.live()?.counts.release_external()?;
        self.release_internal()
    }

    /// Drop an internal reference, destroying the command at zero
    pub(crate) fn release_internal(self) -> Result<()> {
        let object = self.object()?;
        if object.counts.release_internal()? == 0 {
            COMMANDS.lock().remove(self.0)?;
            log::trace!("{:?}: destroyed", self);
            object.record.buffer.release_internal()?;
        }
        Ok(())
    }

    /// Check whether the command still exists
    pub fn is_alive(self) -> bool {
        COMMANDS.lock().contains(self.0)
    }

    /// Info query
    pub fn info(self, query: CommandInfo) -> Result<u32> {
        let object = self.live()?;
        Ok(match query {
            CommandInfo::ReferenceCount => object.counts.external(),
        })
    }

    /// Owning command buffer
    pub fn buffer(self) -> Result<CommandBuffer> {
        Ok(self.live()?.record.buffer)
    }

    /// Kind of the recorded command
    pub fn kind(self) -> Result<CommandKind> {
        Ok(self.live()?.record.kind)
    }

    // =========================================================================
    // Updates
    // =========================================================================

    /// Patch a recorded kernel launch
    pub fn update_kernel_launch(self, update: &KernelLaunchUpdate) -> Result<()> {
        let command = self.live()?;
        let record = &command.record;
        record.buffer.with_mutable_backend(|buffer, backend| {
            let CommandMeta::Kernel {
                work_dim,
                zero_sized,
            } = record.meta
            else {
                return Err(Error::InvalidValue);
            };
            if update.work_dim.is_some_and(|dim| dim != work_dim) {
                return Err(Error::UnsupportedFeature);
            }
            if zero_sized {
                // nothing to patch in an empty node, and it cannot grow
                return match update.global_size {
                    Some(_) => Err(Error::UnsupportedFeature),
                    None => Ok(()),
                };
            }

            let mut launch = backend.kernel_params(record.node)?;
            for (index, arg) in &update.args {
                if let KernelArg::MemObj(mem) = arg {
                    if mem.context_id() != buffer.context.id() {
                        return Err(Error::InvalidMemObject);
                    }
                }
                launch.set_arg(*index, arg)?;
            }
            for info in &update.exec_info {
                merge_exec_info(&mut launch.exec_info, *info);
            }

            let dims = work_dim as usize;
            if let Some(offset) = update.global_offset {
                launch.global_offset = normalize(offset, dims, 0);
            }
            if let Some(size) = update.global_size {
                if size[..dims].contains(&0) {
                    return Err(Error::UnsupportedFeature);
                }
                launch.global_size = normalize(size, dims, 1);
            }
            if update.global_size.is_some() || update.local_size.is_some() {
                let range = NdRange {
                    work_dim,
                    global_offset: launch.global_offset,
                    global_size: launch.global_size,
                    local_size: update.local_size,
                };
                let max_wg = buffer.device.config().max_work_group_size as u64;
                launch.local_size = range.resolve_local(max_wg)?;
            }

            backend.update_kernel(record.node, launch)?;
            log::debug!("{:?}: kernel launch updated", self);
            Ok(())
        })
    }

    /// Replace the events the command waits on
    ///
    /// The list must be exactly as long as the recorded one.
    pub fn update_wait_events(self, events: &[Arc<Event>]) -> Result<()> {
        let command = self.live()?;
        let record = &command.record;
        record.buffer.with_mutable_backend(|buffer, backend| {
            if events.len() != record.wait_nodes.len() {
                return Err(Error::InvalidValue);
            }
            if events.iter().any(|e| e.device().id() != buffer.device.id()) {
                return Err(Error::InvalidEvent);
            }
            for (&node, event) in record.wait_nodes.iter().zip(events) {
                backend.update_event_wait(node, event.clone())?;
            }
            log::debug!("{:?}: {} wait event(s) updated", self, events.len());
            Ok(())
        })
    }

    /// Get a fresh signal event for the next enqueue
    ///
    /// Only commands recorded with a signal event have one to replace.
    pub fn update_signal_event(self) -> Result<Arc<Event>> {
        let command = self.live()?;
        let record = &command.record;
        record.buffer.with_mutable_backend(|buffer, backend| {
            let node = record.signal_node.ok_or(Error::InvalidOperation)?;
            let event = Event::new(&buffer.device, record.kind);
            backend.update_event_record(node, event.clone())?;
            log::debug!("{:?}: signal event replaced", self);
            Ok(event)
        })
    }
}
