//! # Contexts and Devices
//!
//! A [`Context`] owns the unified memory arena and the devices that share
//! it. Both are reference counted through `Arc`: retaining is a clone and
//! releasing is a drop.
//!
//! Native launches must happen while the owning context is active on the
//! calling thread. [`ActiveContext`] is the scope guard for that, and it is
//! passed by reference as proof to the calls that need it.

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, Ordering};

use ember_core::{DevicePtr, Error, Result};

use crate::config::{BackendCaps, BackendKind, DeviceConfig};
use crate::memory::{MemoryArena, UsmKind};
use crate::stream::Scheduler;

static NEXT_CONTEXT_ID: AtomicU32 = AtomicU32::new(1);
static NEXT_DEVICE_ID: AtomicU32 = AtomicU32::new(1);

// =============================================================================
// DEVICE
// =============================================================================

/// Software device
#[derive(Debug)]
pub struct Device {
    id: u32,
    context_id: u32,
    config: DeviceConfig,
    memory: Arc<MemoryArena>,
    scheduler: Scheduler,
}

impl Device {
    /// Device id, unique per process
    #[inline]
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Id of the context this device belongs to
    #[inline]
    pub fn context_id(&self) -> u32 {
        self.context_id
    }

    /// Device configuration
    #[inline]
    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    /// Command-buffer back-end
    #[inline]
    pub fn backend(&self) -> BackendKind {
        self.config.backend
    }

    /// Command-buffer capabilities
    #[inline]
    pub fn caps(&self) -> BackendCaps {
        self.config.caps
    }

    /// Unified memory visible to this device
    #[inline]
    pub fn memory(&self) -> &Arc<MemoryArena> {
        &self.memory
    }

    /// Stream scheduler
    #[inline]
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Drain every stream of the device
    pub fn synchronize(&self) -> Result<()> {
        self.scheduler.drain(&self.memory)
    }
}

// =============================================================================
// CONTEXT
// =============================================================================

/// Execution context
#[derive(Debug)]
pub struct Context {
    id: u32,
    memory: Arc<MemoryArena>,
    devices: Vec<Arc<Device>>,
    active: AtomicU32,
}

impl Context {
    /// Create a context with one device
    pub fn new(config: DeviceConfig) -> Result<Arc<Self>> {
        Self::with_devices(&[config])
    }

    /// Create a context with one device per configuration
    ///
    /// All devices share the memory arena sized by the first configuration.
    pub fn with_devices(configs: &[DeviceConfig]) -> Result<Arc<Self>> {
        let first = configs.first().ok_or(Error::InvalidValue)?;
        let id = NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed);
        let memory = Arc::new(MemoryArena::new(first.memory_capacity));

        let devices = configs
            .iter()
            .map(|config| {
                Arc::new(Device {
                    id: NEXT_DEVICE_ID.fetch_add(1, Ordering::Relaxed),
                    context_id: id,
                    config: config.clone(),
                    memory: memory.clone(),
                    scheduler: Scheduler::new(),
                })
            })
            .collect::<Vec<_>>();

        log::debug!("Context {}: created with {} device(s)", id, devices.len());
        Ok(Arc::new(Self {
            id,
            memory,
            devices,
            active: AtomicU32::new(0),
        }))
    }

    /// Context id, unique per process
    #[inline]
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Unified memory arena
    #[inline]
    pub fn memory(&self) -> &Arc<MemoryArena> {
        &self.memory
    }

    /// Devices of this context
    #[inline]
    pub fn devices(&self) -> &[Arc<Device>] {
        &self.devices
    }

    /// Device by index
    pub fn device(&self, index: usize) -> Result<Arc<Device>> {
        self.devices.get(index).cloned().ok_or(Error::InvalidDevice)
    }

    /// Check whether a device belongs to this context
    pub fn contains(&self, device: &Device) -> bool {
        device.context_id == self.id
    }

    /// Check whether some thread holds an [`ActiveContext`] for this context
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire) > 0
    }

    /// Allocate USM memory
    pub fn usm_alloc(&self, kind: UsmKind, size: u64) -> Result<DevicePtr> {
        self.memory.alloc(kind, size)
    }

    /// Free USM memory
    pub fn usm_free(&self, ptr: DevicePtr) -> Result<()> {
        self.memory.free(ptr)
    }
}

// =============================================================================
// ACTIVE CONTEXT
// =============================================================================

/// Scope guard marking a context active
#[derive(Debug)]
pub struct ActiveContext {
    context: Arc<Context>,
}

impl ActiveContext {
    /// Activate `context` until the guard drops
    pub fn enter(context: &Arc<Context>) -> Self {
        context.active.fetch_add(1, Ordering::AcqRel);
        Self {
            context: context.clone(),
        }
    }

    /// The active context
    #[inline]
    pub fn context(&self) -> &Arc<Context> {
        &self.context
    }

    /// Fail unless `device` belongs to the active context
    pub fn check_device(&self, device: &Device) -> Result<()> {
        if self.context.contains(device) {
            Ok(())
        } else {
            Err(Error::InvalidOperation)
        }
    }
}

impl Drop for ActiveContext {
    fn drop(&mut self) {
        self.context.active.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_owns_device() {
        let ctx = Context::new(DeviceConfig::native_graph()).unwrap();
        let other = Context::new(DeviceConfig::native_graph()).unwrap();
        let dev = ctx.device(0).unwrap();
        assert!(ctx.contains(&dev));
        assert!(!other.contains(&dev));
        assert_eq!(ctx.device(1).unwrap_err(), Error::InvalidDevice);
    }

    #[test]
    fn test_active_guard() {
        let ctx = Context::new(DeviceConfig::default()).unwrap();
        assert!(!ctx.is_active());
        {
            let guard = ActiveContext::enter(&ctx);
            assert!(ctx.is_active());
            assert!(guard.check_device(&ctx.device(0).unwrap()).is_ok());
        }
        assert!(!ctx.is_active());
    }

    #[test]
    fn test_shared_memory() {
        let ctx = Context::with_devices(&[
            DeviceConfig::native_graph(),
            DeviceConfig::queue_emulated(),
        ])
        .unwrap();
        let ptr = ctx.usm_alloc(UsmKind::Shared, 8).unwrap();
        let a = ctx.device(0).unwrap();
        let b = ctx.device(1).unwrap();
        a.memory().write_pod(ptr, &7u64).unwrap();
        assert_eq!(b.memory().read_pod::<u64>(ptr).unwrap(), 7);
        ctx.usm_free(ptr).unwrap();
    }
}
