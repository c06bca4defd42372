//! # Command Buffer
//!
//! Lifecycle of a command buffer: create, record, finalize, enqueue and
//! release.
//!
//! ```text
//!   create ──▶ recording ──finalize──▶ finalized ──enqueue──▶ (n times)
//!                 │                        │
//!              append_*               update_* (updatable only)
//! ```
//!
//! Buffers live in a process-wide handle table. [`CommandBuffer`] is a
//! copyable handle into it; a handle used after the buffer was destroyed
//! fails with `InvalidNullHandle`.
//!
//! ## Reference counting
//!
//! The external count tracks user references. The internal count adds one
//! for every live [`CommandHandle`]. Dropping the last external reference
//! releases the buffer's hold on its command handles, and the buffer's
//! native objects are destroyed once the internal count reaches zero.

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;

use ember_core::{CommandKind, Error, Handle, HandleTable, RefCounts, Result, Status};
use ember_device::{ActiveContext, BackendCaps, Context, Device, Event, MemBuffer, Queue};
use ember_graph::{NodeId, NodeParams};
use spin::Mutex;

use crate::backend::{Backend, CommandBufferBackend};
use crate::command::{CommandHandle, CommandMeta, CommandRecord, CommandTable, COMMANDS};
use crate::sync_point::{SyncPoint, SyncPointTable};

static COMMAND_BUFFERS: Mutex<HandleTable<Arc<CommandBufferObject>>> =
    Mutex::new(HandleTable::new());

// =============================================================================
// DESCRIPTORS
// =============================================================================

/// Creation parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CommandBufferDesc {
    /// Allow patching commands after finalize
    pub updatable: bool,
}

impl CommandBufferDesc {
    /// Descriptor of an updatable buffer
    pub const fn updatable() -> Self {
        Self { updatable: true }
    }
}

/// Buffer info query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandBufferInfo {
    /// External reference count
    ReferenceCount,
    /// Creation descriptor
    Descriptor,
}

/// Answer to a [`CommandBufferInfo`] query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandBufferInfoValue {
    /// External reference count
    ReferenceCount(u32),
    /// Creation descriptor
    Descriptor(CommandBufferDesc),
}

// =============================================================================
// APPEND PARAMETERS
// =============================================================================

/// Ordering inputs of one append
#[derive(Debug, Clone, Default)]
pub struct AppendDeps<'a> {
    /// Commands of the same buffer that must complete first
    pub sync_points: &'a [SyncPoint],
    /// External events the command waits on
    pub wait_events: &'a [Arc<Event>],
    /// Request an event signaled when the command completes
    pub signal_event: bool,
}

impl<'a> AppendDeps<'a> {
    /// No dependencies
    pub const fn none() -> Self {
        Self {
            sync_points: &[],
            wait_events: &[],
            signal_event: false,
        }
    }

    /// Depend on earlier commands
    pub const fn after(sync_points: &'a [SyncPoint]) -> Self {
        Self {
            sync_points,
            wait_events: &[],
            signal_event: false,
        }
    }

    /// Also wait on external events
    #[must_use]
    pub const fn wait_on(mut self, events: &'a [Arc<Event>]) -> Self {
        self.wait_events = events;
        self
    }

    /// Also signal an event on completion
    #[must_use]
    pub const fn signal(mut self) -> Self {
        self.signal_event = true;
        self
    }

    fn uses_events(&self) -> bool {
        !self.wait_events.is_empty() || self.signal_event
    }
}

/// Outcome of one append
#[derive(Debug, Clone)]
pub struct Appended {
    /// Sync point of the recorded command
    pub sync_point: SyncPoint,
    /// Handle for later updates, on updatable buffers
    pub command: Option<CommandHandle>,
    /// Signal event, when requested
    pub event: Option<Arc<Event>>,
    /// Whether the command was recorded as requested
    pub status: Status,
}

/// Nodes of one command, ready to be recorded
#[derive(Debug)]
pub(crate) struct Recording {
    pub(crate) kind: CommandKind,
    /// Chained in order; the last one completes the command
    pub(crate) nodes: Vec<NodeParams>,
    pub(crate) meta: CommandMeta,
    pub(crate) status: Status,
    /// Memory objects the nodes point into
    pub(crate) keep_alive: Vec<Arc<MemBuffer>>,
}

// =============================================================================
// BUFFER OBJECT
// =============================================================================

#[derive(Debug)]
struct BufferState {
    backend: Backend,
    sync_points: SyncPointTable,
    finalized: bool,
    commands: Vec<CommandHandle>,
    retained: Vec<Arc<MemBuffer>>,
}

#[derive(Debug)]
pub(crate) struct CommandBufferObject {
    pub(crate) context: Arc<Context>,
    pub(crate) device: Arc<Device>,
    desc: CommandBufferDesc,
    counts: RefCounts,
    state: Mutex<BufferState>,
}

impl CommandBufferObject {
    pub(crate) fn caps(&self) -> BackendCaps {
        self.device.caps()
    }
}

type Staged = (InsertedNodes, Option<Arc<Event>>, SyncPoint, Option<CommandHandle>);

impl BufferState {
    /// Insert the nodes of `recording` and take everything the append needs
    /// short of the sync-point slot itself
    ///
    /// On error the caller rolls the backend back; no other state changed.
    fn stage(
        &mut self,
        buffer: CommandBuffer,
        object: &CommandBufferObject,
        preds: &[NodeId],
        deps: &AppendDeps<'_>,
        recording: &Recording,
        commands: &CommandTable,
    ) -> Result<Staged> {
        let (nodes, event) =
            insert_nodes(&mut self.backend, &object.device, preds, deps, recording)?;
        let sync_point = self.reserve(recording.keep_alive.len())?;
        let command = if object.desc.updatable {
            let record = CommandRecord {
                buffer,
                kind: recording.kind,
                node: nodes.primary,
                meta: recording.meta.clone(),
                wait_nodes: nodes.waits.clone(),
                signal_node: nodes.signal,
            };
            Some(issue_command(object, commands, record)?)
        } else {
            None
        };
        Ok((nodes, event, sync_point, command))
    }

    /// Next sync point, with room for one command handle and `retained`
    /// memory objects
    fn reserve(&mut self, retained: usize) -> Result<SyncPoint> {
        self.commands
            .try_reserve(1)
            .map_err(|_| Error::OutOfHostMemory)?;
        self.retained
            .try_reserve(retained)
            .map_err(|_| Error::OutOfHostMemory)?;
        self.sync_points.reserve()
    }
}

/// Issue a command handle holding an internal reference on its buffer
fn issue_command(
    object: &CommandBufferObject,
    commands: &CommandTable,
    record: CommandRecord,
) -> Result<CommandHandle> {
    object.counts.retain_internal()?;
    CommandHandle::create_in(commands, record).or_else(|err| {
        object.counts.release_internal()?;
        Err(err)
    })
}

// =============================================================================
// COMMAND BUFFER
// =============================================================================

/// Handle to a command buffer
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommandBuffer(Handle<Arc<CommandBufferObject>>);

impl fmt::Debug for CommandBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CommandBuffer({}v{})", self.0.index(), self.0.generation())
    }
}

impl CommandBuffer {
    /// Create an empty command buffer for `device` in `context`
    pub fn create(
        context: &Arc<Context>,
        device: &Arc<Device>,
        desc: CommandBufferDesc,
    ) -> Result<Self> {
        if !context.contains(device) {
            return Err(Error::InvalidDevice);
        }
        if desc.updatable && !device.caps().contains(BackendCaps::MUTABLE_DISPATCH) {
            return Err(Error::InvalidOperation);
        }

        let object = Arc::new(CommandBufferObject {
            context: context.clone(),
            device: device.clone(),
            desc,
            counts: RefCounts::new(),
            state: Mutex::new(BufferState {
                backend: Backend::for_device(device, desc.updatable)?,
                sync_points: SyncPointTable::new(),
                finalized: false,
                commands: Vec::new(),
                retained: Vec::new(),
            }),
        });
        let buffer = Self(COMMAND_BUFFERS.lock().insert(object)?);
        log::debug!(
            "{:?}: created on device {} (updatable: {})",
            buffer,
            device.id(),
            desc.updatable
        );
        Ok(buffer)
    }

    /// Object behind the handle, regardless of its external count
    pub(crate) fn object(self) -> Result<Arc<CommandBufferObject>> {
        COMMAND_BUFFERS.lock().get(self.0).cloned()
    }

    /// Object behind the handle, if the user still holds a reference
    pub(crate) fn live(self) -> Result<Arc<CommandBufferObject>> {
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
    ///
    /// The last user reference releases the buffer's hold on its command
    /// handles. Native objects survive until no command handle is left.
    pub fn release(self) -> Result<()> {
        let object = self.live()?;
        if object.counts.release_external()? == 0 {
            let commands = core::mem::take(&mut object.state.lock().commands);
            for command in commands {
                command.release_internal()?;
            }
        }
        drop(object);
        self.release_internal()
    }

    /// Drop an internal reference, destroying the buffer at zero
    pub(crate) fn release_internal(self) -> Result<()> {
        let object = self.object()?;
        if object.counts.release_internal()? == 0 {
            COMMAND_BUFFERS.lock().remove(self.0)?;
            log::debug!("{:?}: destroyed", self);
        }
        Ok(())
    }

    /// Check whether the buffer's native objects still exist
    pub fn is_alive(self) -> bool {
        COMMAND_BUFFERS.lock().contains(self.0)
    }

    // =========================================================================
    // Recording
    // =========================================================================

    /// Record the nodes of one command
    ///
    /// Nothing stays recorded when any step fails, and the sync-point table
    /// only grows on success.
    pub(crate) fn record(
        self,
        object: &CommandBufferObject,
        deps: &AppendDeps<'_>,
        recording: Recording,
    ) -> Result<Appended> {
        self.record_in(object, deps, recording, &COMMANDS)
    }

    /// [`record`](Self::record), issuing command handles from `commands`
    pub(crate) fn record_in(
        self,
        object: &CommandBufferObject,
        deps: &AppendDeps<'_>,
        recording: Recording,
        commands: &CommandTable,
    ) -> Result<Appended> {
        let mut state = object.state.lock();
        if state.finalized {
            return Err(Error::InvalidOperation);
        }
        if deps.uses_events() && !object.caps().contains(BackendCaps::EVENT_SYNC) {
            return Err(Error::UnsupportedFeature);
        }
        let preds = state.sync_points.resolve(deps.sync_points)?;

        let mark = state.backend.node_count();
        let staged = state.stage(self, object, &preds, deps, &recording, commands);
        let (nodes, event, sync_point, command) = match staged {
            Ok(staged) => staged,
            Err(err) => {
                state.backend.rollback(mark);
                return Err(err);
            },
        };

        // room for these was reserved above
        state.sync_points.commit(sync_point, nodes.terminal);
        state.commands.extend(command);
        state.retained.extend(recording.keep_alive);

        if let Status::Degraded(reason) = recording.status {
            log::warn!("{:?}: {:?} recorded as empty node: {}", self, recording.kind, reason);
        }
        log::trace!(
            "{:?}: recorded {:?} as {:?}",
            self,
            recording.kind,
            sync_point
        );
        Ok(Appended {
            sync_point,
            command,
            event,
            status: recording.status,
        })
    }

    // =========================================================================
    // Finalize / Enqueue
    // =========================================================================

    /// Compile the recorded commands; allowed once
    pub fn finalize(self) -> Result<()> {
        let object = self.live()?;
        let mut state = object.state.lock();
        if state.finalized {
            return Err(Error::InvalidOperation);
        }
        state.backend.finalize()?;
        state.finalized = true;
        log::debug!(
            "{:?}: finalized with {} node(s)",
            self,
            state.backend.node_count()
        );
        Ok(())
    }

    /// Submit the finalized buffer to `queue`
    ///
    /// The launch waits for `wait_events`. When `want_event` is set, the
    /// returned event completes with the last command of this launch.
    pub fn enqueue(
        self,
        queue: &Queue,
        wait_events: &[Arc<Event>],
        want_event: bool,
    ) -> Result<Option<Arc<Event>>> {
        let object = self.live()?;
        if queue.device().id() != object.device.id() {
            return Err(Error::InvalidQueue);
        }
        let state = object.state.lock();
        if !state.finalized {
            return Err(Error::InvalidOperation);
        }

        let active = ActiveContext::enter(&object.context);
        let (stream, token) = queue.next_compute_stream();
        queue.enqueue_events_wait(stream, wait_events)?;

        let event = if want_event {
            let event = Event::make_native(CommandKind::CommandBufferEnqueue, queue, stream, token);
            event.start()?;
            Some(event)
        } else {
            None
        };
        state.backend.launch(&active, stream)?;
        if let Some(event) = &event {
            event.record()?;
        }

        log::trace!(
            "{:?}: enqueued on queue {} stream {}",
            self,
            queue.id(),
            stream.raw()
        );
        Ok(event)
    }

    // =========================================================================
    // Updates (driven by command handles)
    // =========================================================================

    /// Run `f` on the backend of a finalized, updatable buffer
    pub(crate) fn with_mutable_backend<R>(
        self,
        f: impl FnOnce(&CommandBufferObject, &mut Backend) -> Result<R>,
    ) -> Result<R> {
        let object = self.object()?;
        let mut state = object.state.lock();
        if !state.finalized || !object.desc.updatable {
            return Err(Error::InvalidOperation);
        }
        f(&object, &mut state.backend)
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Generic info query
    pub fn info(self, query: CommandBufferInfo) -> Result<CommandBufferInfoValue> {
        let object = self.live()?;
        Ok(match query {
            CommandBufferInfo::ReferenceCount => {
                CommandBufferInfoValue::ReferenceCount(object.counts.external())
            },
            CommandBufferInfo::Descriptor => CommandBufferInfoValue::Descriptor(object.desc),
        })
    }

    /// External reference count
    pub fn reference_count(self) -> Result<u32> {
        Ok(self.live()?.counts.external())
    }

    /// Internal reference count
    pub fn internal_reference_count(self) -> Result<u32> {
        Ok(self.object()?.counts.internal())
    }

    /// Creation descriptor
    pub fn descriptor(self) -> Result<CommandBufferDesc> {
        Ok(self.live()?.desc)
    }

    /// Whether [`finalize`](Self::finalize) succeeded
    pub fn is_finalized(self) -> Result<bool> {
        Ok(self.live()?.state.lock().finalized)
    }

    /// Number of native nodes recorded
    pub fn node_count(self) -> Result<usize> {
        Ok(self.live()?.state.lock().backend.node_count())
    }

    /// Number of sync points handed out
    pub fn sync_point_count(self) -> Result<usize> {
        Ok(self.live()?.state.lock().sync_points.len())
    }

    /// Owning context
    pub fn context(self) -> Result<Arc<Context>> {
        Ok(self.live()?.context.clone())
    }

    /// Owning device
    pub fn device(self) -> Result<Arc<Device>> {
        Ok(self.live()?.device.clone())
    }
}

// =============================================================================
// NODE INSERTION
// =============================================================================

struct InsertedNodes {
    /// First command node
    primary: NodeId,
    /// Last command node
    terminal: NodeId,
    waits: Vec<NodeId>,
    signal: Option<NodeId>,
}

/// Wait nodes, then the command chain, then the record node
fn insert_nodes(
    backend: &mut Backend,
    device: &Arc<Device>,
    preds: &[NodeId],
    deps: &AppendDeps<'_>,
    recording: &Recording,
) -> Result<(InsertedNodes, Option<Arc<Event>>)> {
    let waits = deps
        .wait_events
        .iter()
        .map(|event| backend.append(preds, NodeParams::EventWait(event.clone())))
        .collect::<Result<Vec<_>>>()?;

    let mut chain: Vec<NodeId> = if waits.is_empty() {
        preds.to_vec()
    } else {
        waits.clone()
    };
    let mut primary = None;
    for params in &recording.nodes {
        let id = backend.append(&chain, params.clone())?;
        primary.get_or_insert(id);
        chain = alloc::vec![id];
    }
    let (Some(primary), Some(&terminal)) = (primary, chain.last()) else {
        return Err(Error::InvalidValue);
    };

    let (signal, event) = if deps.signal_event {
        let event = Event::new(device, recording.kind);
        let node = backend.append(&[terminal], NodeParams::EventRecord(event.clone()))?;
        (Some(node), Some(event))
    } else {
        (None, None)
    };

    Ok((
        InsertedNodes {
            primary,
            terminal,
            waits,
            signal,
        },
        event,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_device::DeviceConfig;

    fn setup(config: DeviceConfig) -> (Arc<Context>, Arc<Device>) {
        let ctx = Context::new(config).unwrap();
        let dev = ctx.device(0).unwrap();
        (ctx, dev)
    }

    fn empty(kind: CommandKind) -> Recording {
        Recording {
            kind,
            nodes: alloc::vec![NodeParams::Empty],
            meta: CommandMeta::Other,
            status: Status::Success,
            keep_alive: Vec::new(),
        }
    }

    #[test]
    fn test_create_checks_device_membership() {
        let (ctx, _dev) = setup(DeviceConfig::native_graph());
        let (_other_ctx, other_dev) = setup(DeviceConfig::native_graph());
        assert_eq!(
            CommandBuffer::create(&ctx, &other_dev, CommandBufferDesc::default()),
            Err(Error::InvalidDevice)
        );
    }

    #[test]
    fn test_updatable_requires_mutable_dispatch() {
        let config = DeviceConfig::native_graph().with_caps(BackendCaps::USM_IN_GRAPH);
        let (ctx, dev) = setup(config);
        assert_eq!(
            CommandBuffer::create(&ctx, &dev, CommandBufferDesc::updatable()),
            Err(Error::InvalidOperation)
        );
    }

    #[test]
    fn test_reference_counts() {
        let (ctx, dev) = setup(DeviceConfig::native_graph());
        let cb = CommandBuffer::create(&ctx, &dev, CommandBufferDesc::default()).unwrap();
        assert_eq!(cb.reference_count().unwrap(), 1);
        cb.retain().unwrap();
        assert_eq!(
            cb.info(CommandBufferInfo::ReferenceCount).unwrap(),
            CommandBufferInfoValue::ReferenceCount(2)
        );
        cb.release().unwrap();
        assert!(cb.is_alive());
        cb.release().unwrap();
        assert!(!cb.is_alive());
        assert_eq!(cb.retain(), Err(Error::InvalidNullHandle));
    }

    #[test]
    fn test_record_and_finalize() {
        let (ctx, dev) = setup(DeviceConfig::native_graph());
        let cb = CommandBuffer::create(&ctx, &dev, CommandBufferDesc::default()).unwrap();
        let object = cb.live().unwrap();

        let first = cb
            .record(&object, &AppendDeps::none(), empty(CommandKind::EventsWait))
            .unwrap();
        let after_first = [first.sync_point];
        let second = cb
            .record(&object, &AppendDeps::after(&after_first), empty(CommandKind::EventsWait))
            .unwrap();
        assert_eq!(first.sync_point.ordinal(), 0);
        assert_eq!(second.sync_point.ordinal(), 1);
        assert!(first.command.is_none());

        cb.finalize().unwrap();
        assert!(cb.is_finalized().unwrap());
        assert_eq!(cb.finalize(), Err(Error::InvalidOperation));
        assert_eq!(
            cb.record(&object, &AppendDeps::none(), empty(CommandKind::EventsWait))
                .map(|_| ()),
            Err(Error::InvalidOperation)
        );
        drop(object);
        cb.release().unwrap();
    }

    #[test]
    fn test_unknown_sync_point_leaves_buffer_unchanged() {
        let (ctx, dev) = setup(DeviceConfig::native_graph());
        let cb = CommandBuffer::create(&ctx, &dev, CommandBufferDesc::default()).unwrap();
        let object = cb.live().unwrap();
        let first = cb
            .record(&object, &AppendDeps::none(), empty(CommandKind::EventsWait))
            .unwrap();

        let bogus = SyncPoint::from_raw(first.sync_point.raw() + 7);
        let deps = [bogus];
        let result = cb.record(&object, &AppendDeps::after(&deps), empty(CommandKind::EventsWait));
        assert_eq!(result.map(|_| ()), Err(Error::InvalidValue));
        assert_eq!(cb.sync_point_count().unwrap(), 1);
        assert_eq!(cb.node_count().unwrap(), 1);
        drop(object);
        cb.release().unwrap();
    }

    #[test]
    fn test_failed_chain_rolls_back() {
        let (ctx, dev) = setup(DeviceConfig::native_graph().with_max_graph_nodes(3));
        let cb = CommandBuffer::create(&ctx, &dev, CommandBufferDesc::default()).unwrap();
        let object = cb.live().unwrap();
        cb.record(&object, &AppendDeps::none(), empty(CommandKind::EventsWait))
            .unwrap();

        let long = Recording {
            kind: CommandKind::UsmFill,
            nodes: alloc::vec![NodeParams::Empty; 4],
            meta: CommandMeta::Other,
            status: Status::Success,
            keep_alive: Vec::new(),
        };
        assert_eq!(
            cb.record(&object, &AppendDeps::none(), long).map(|_| ()),
            Err(Error::OutOfResources)
        );
        assert_eq!(cb.node_count().unwrap(), 1);
        assert_eq!(cb.sync_point_count().unwrap(), 1);
        drop(object);
        cb.release().unwrap();
    }

    #[test]
    fn test_handle_exhaustion_leaves_buffer_unchanged() {
        let (ctx, dev) = setup(DeviceConfig::native_graph());
        let cb = CommandBuffer::create(&ctx, &dev, CommandBufferDesc::updatable()).unwrap();
        let object = cb.live().unwrap();
        let full: CommandTable = Mutex::new(HandleTable::with_limit(0));

        let deps = AppendDeps::none().signal();
        assert_eq!(
            cb.record_in(&object, &deps, empty(CommandKind::UsmFill), &full)
                .map(|_| ()),
            Err(Error::OutOfResources)
        );
        assert_eq!(cb.node_count().unwrap(), 0);
        assert_eq!(cb.sync_point_count().unwrap(), 0);
        assert_eq!(cb.internal_reference_count().unwrap(), 1);

        let appended = cb
            .record(&object, &AppendDeps::none(), empty(CommandKind::UsmFill))
            .unwrap();
        assert_eq!(appended.sync_point.ordinal(), 0);
        assert!(appended.command.is_some());
        assert_eq!(cb.node_count().unwrap(), 1);
        assert_eq!(cb.sync_point_count().unwrap(), 1);
        assert_eq!(cb.internal_reference_count().unwrap(), 2);
        drop(object);
        cb.release().unwrap();
    }

    #[test]
    fn test_events_need_event_sync() {
        let (ctx, dev) = setup(DeviceConfig::queue_emulated());
        let cb = CommandBuffer::create(&ctx, &dev, CommandBufferDesc::default()).unwrap();
        let object = cb.live().unwrap();
        assert_eq!(
            cb.record(&object, &AppendDeps::none().signal(), empty(CommandKind::EventsWait))
                .map(|_| ()),
            Err(Error::UnsupportedFeature)
        );
        drop(object);
        cb.release().unwrap();
    }

    #[test]
    fn test_enqueue_checks() {
        let (ctx, dev) = setup(DeviceConfig::native_graph());
        let cb = CommandBuffer::create(&ctx, &dev, CommandBufferDesc::default()).unwrap();
        let queue = Queue::new(&ctx, &dev, ember_device::QueueFlags::empty()).unwrap();
        assert_eq!(cb.enqueue(&queue, &[], true).map(|_| ()), Err(Error::InvalidOperation));

        let other_ctx = Context::new(DeviceConfig::native_graph()).unwrap();
        let other_queue =
            Queue::new(&other_ctx, &other_ctx.device(0).unwrap(), ember_device::QueueFlags::empty())
                .unwrap();
        cb.finalize().unwrap();
        assert_eq!(cb.enqueue(&other_queue, &[], false).map(|_| ()), Err(Error::InvalidQueue));

        let event = cb.enqueue(&queue, &[], true).unwrap().unwrap();
        event.wait().unwrap();
        assert!(event.is_complete());
        assert!(cb.enqueue(&queue, &[], false).unwrap().is_none());
        cb.release().unwrap();
    }
}
