//! # Kernels
//!
//! Kernels on the software device are plain functions invoked once per
//! work-item. A [`Kernel`] accumulates argument bindings; recording or
//! submitting a launch snapshots them into a [`KernelLaunch`], so later
//! `set_arg_*` calls never affect work that was already recorded.
//!
//! ```text
//!   Kernel ── set_arg_* ──▶ bindings ── snapshot ──▶ KernelLaunch ──▶ Op
//!                                                     (owned, Clone)
//! ```

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};

use bytemuck::Pod;
use ember_core::{DevicePtr, Error, Result};
use spin::Mutex;

use crate::context::Context;
use crate::memory::{MemBuffer, MemoryArena};

static NEXT_KERNEL_ID: AtomicU64 = AtomicU64::new(1);

/// Entry point executed once per work-item
pub type KernelFn = fn(&WorkItem<'_>) -> Result<()>;

// =============================================================================
// ARGUMENTS
// =============================================================================

/// Argument as bound by the user
#[derive(Debug, Clone)]
pub enum KernelArg {
    /// Raw bytes passed by value
    Value(Vec<u8>),
    /// USM pointer
    Pointer(DevicePtr),
    /// Memory object, passed as its base address
    MemObj(Arc<MemBuffer>),
    /// Dynamically sized local memory
    Local(u64),
}

/// Argument as seen by the kernel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgValue {
    /// Raw bytes passed by value
    Value(Vec<u8>),
    /// Device address
    Pointer(DevicePtr),
    /// Local memory size in bytes
    Local(u64),
}

/// Launch properties beyond the arguments
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecInfo {
    /// Kernel may dereference USM pointers not passed as arguments
    IndirectAccess(bool),
    /// Preferred local memory versus cache split
    CacheConfig(CacheConfig),
}

impl ExecInfo {
    fn same_key(&self, other: &ExecInfo) -> bool {
        core::mem::discriminant(self) == core::mem::discriminant(other)
    }
}

/// Cache configuration hint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheConfig {
    /// No preference
    Default,
    /// Favor local memory
    LargeSlm,
    /// Favor data cache
    LargeData,
}

/// Insert or replace an exec-info entry of the same kind
pub fn merge_exec_info(list: &mut Vec<ExecInfo>, info: ExecInfo) {
    match list.iter_mut().find(|e| e.same_key(&info)) {
        Some(slot) => *slot = info,
        None => list.push(info),
    }
}

// =============================================================================
// ND RANGE
// =============================================================================

/// Launch iteration space
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NdRange {
    /// Number of used dimensions, 1 to 3
    pub work_dim: u32,
    /// First global id per dimension
    pub global_offset: [u64; 3],
    /// Work-items per dimension
    pub global_size: [u64; 3],
    /// Work-group size; derived when `None`
    pub local_size: Option<[u64; 3]>,
}

impl NdRange {
    /// 1D range
    pub const fn linear(global: u64) -> Self {
        Self {
            work_dim: 1,
            global_offset: [0; 3],
            global_size: [global, 1, 1],
            local_size: None,
        }
    }

    /// 2D range
    pub const fn planar(x: u64, y: u64) -> Self {
        Self {
            work_dim: 2,
            global_offset: [0; 3],
            global_size: [x, y, 1],
            local_size: None,
        }
    }

    /// 3D range
    pub const fn volume(x: u64, y: u64, z: u64) -> Self {
        Self {
            work_dim: 3,
            global_offset: [0; 3],
            global_size: [x, y, z],
            local_size: None,
        }
    }

    /// Set an explicit work-group size
    pub const fn with_local(mut self, local: [u64; 3]) -> Self {
        self.local_size = Some(local);
        self
    }

    /// Set a global offset
    pub const fn with_offset(mut self, offset: [u64; 3]) -> Self {
        self.global_offset = offset;
        self
    }

    /// Validate dimensionality
    pub fn check_work_dim(&self) -> Result<()> {
        if (1..=3).contains(&self.work_dim) {
            Ok(())
        } else {
            Err(Error::InvalidWorkDimension)
        }
    }

    /// True when any used dimension has no work-items
    pub fn is_empty(&self) -> bool {
        self.global_size[..self.work_dim.min(3) as usize]
            .iter()
            .any(|&g| g == 0)
    }

    /// Global size with unused dimensions forced to 1
    pub fn normalized_global(&self) -> [u64; 3] {
        let mut global = [1; 3];
        for d in 0..self.work_dim.min(3) as usize {
            global[d] = self.global_size[d];
        }
        global
    }

    /// Global offset with unused dimensions forced to 0
    pub fn normalized_offset(&self) -> [u64; 3] {
        let mut offset = [0; 3];
        for d in 0..self.work_dim.min(3) as usize {
            offset[d] = self.global_offset[d];
        }
        offset
    }

    /// Work-group size for this range
    ///
    /// An explicit size must divide the global size in every dimension and
    /// fit the device limit. Without one, each dimension takes the largest
    /// divisor of its global size that keeps the group within the limit.
    pub fn resolve_local(&self, max_work_group_size: u64) -> Result<[u64; 3]> {
        self.check_work_dim()?;
        let global = self.normalized_global();
        let dims = self.work_dim as usize;

        match self.local_size {
            Some(requested) => {
                let mut local = [1; 3];
                local[..dims].copy_from_slice(&requested[..dims]);
                let fits = local
                    .iter()
                    .zip(global.iter())
                    .all(|(&l, &g)| l != 0 && g % l == 0);
                let total = local.iter().product::<u64>();
                if !fits || total > max_work_group_size {
                    return Err(Error::InvalidWorkGroupSize);
                }
                Ok(local)
            },
            None => {
                let mut local = [1; 3];
                let mut budget = max_work_group_size.max(1);
                for d in 0..dims {
                    local[d] = largest_divisor_at_most(global[d], budget);
                    budget /= local[d];
                }
                Ok(local)
            },
        }
    }
}

fn largest_divisor_at_most(n: u64, limit: u64) -> u64 {
    if n == 0 {
        return 1;
    }
    (1..=limit.min(n)).rev().find(|d| n % d == 0).unwrap_or(1)
}

// =============================================================================
// KERNEL
// =============================================================================

#[derive(Debug)]
struct KernelState {
    args: Vec<Option<KernelArg>>,
    exec_info: Vec<ExecInfo>,
    local_size: u64,
}

/// Kernel object
#[derive(Debug)]
pub struct Kernel {
    id: u64,
    name: &'static str,
    context_id: u32,
    func: KernelFn,
    state: Mutex<KernelState>,
}

impl Kernel {
    /// Create a kernel with `num_args` unbound arguments
    pub fn new(context: &Context, name: &'static str, num_args: u32, func: KernelFn) -> Arc<Self> {
        let mut args = Vec::with_capacity(num_args as usize);
        args.resize_with(num_args as usize, || None);
        Arc::new(Self {
            id: NEXT_KERNEL_ID.fetch_add(1, Ordering::Relaxed),
            name,
            context_id: context.id(),
            func,
            state: Mutex::new(KernelState {
                args,
                exec_info: Vec::new(),
                local_size: 0,
            }),
        })
    }

    /// Kernel id, unique per process
    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Kernel name
    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Owning context id
    #[inline]
    pub fn context_id(&self) -> u32 {
        self.context_id
    }

    /// Number of arguments
    pub fn num_args(&self) -> u32 {
        self.state.lock().args.len() as u32
    }

    /// Bind an argument
    pub fn set_arg(&self, index: u32, arg: KernelArg) -> Result<()> {
        if let KernelArg::MemObj(mem) = &arg {
            if mem.context_id() != self.context_id {
                return Err(Error::InvalidMemObject);
            }
        }
        let mut state = self.state.lock();
        let slot = state
            .args
            .get_mut(index as usize)
            .ok_or(Error::InvalidValue)?;
        let added_local = match &arg {
            KernelArg::Local(size) => *size,
            _ => 0,
        };
        *slot = Some(arg);
        state.local_size += added_local;
        Ok(())
    }

    /// Bind a plain-old-data argument by value
    pub fn set_arg_value<T: Pod>(&self, index: u32, value: &T) -> Result<()> {
        self.set_arg(index, KernelArg::Value(bytemuck::bytes_of(value).to_vec()))
    }

    /// Bind a USM pointer argument
    pub fn set_arg_pointer(&self, index: u32, ptr: DevicePtr) -> Result<()> {
        self.set_arg(index, KernelArg::Pointer(ptr))
    }

    /// Bind a memory-object argument
    pub fn set_arg_mem_obj(&self, index: u32, mem: &Arc<MemBuffer>) -> Result<()> {
        self.set_arg(index, KernelArg::MemObj(mem.clone()))
    }

    /// Bind a local-memory argument
    pub fn set_arg_local(&self, index: u32, size: u64) -> Result<()> {
        self.set_arg(index, KernelArg::Local(size))
    }

    /// Set or replace an exec-info entry
    pub fn set_exec_info(&self, info: ExecInfo) {
        merge_exec_info(&mut self.state.lock().exec_info, info);
    }

    /// Indices of the bound arguments
    pub fn arg_indices(&self) -> Vec<u32> {
        self.state
            .lock()
            .args
            .iter()
            .enumerate()
            .filter(|(_, a)| a.is_some())
            .map(|(i, _)| i as u32)
            .collect()
    }

    /// Accumulated local-memory size
    pub fn local_size(&self) -> u64 {
        self.state.lock().local_size
    }

    /// Reset the transient local-memory size
    pub fn clear_local_size(&self) {
        self.state.lock().local_size = 0;
    }

    /// Snapshot the bindings into a launch description
    ///
    /// Fails with `InvalidKernelArgs` while any argument is unbound.
    pub fn snapshot(&self, range: &NdRange, local: [u64; 3]) -> Result<KernelLaunch> {
        range.check_work_dim()?;
        let state = self.state.lock();
        let mut launch = KernelLaunch {
            kernel_id: self.id,
            name: self.name,
            func: self.func,
            work_dim: range.work_dim,
            global_offset: range.normalized_offset(),
            global_size: range.normalized_global(),
            local_size: local,
            args: Vec::with_capacity(state.args.len()),
            exec_info: state.exec_info.clone(),
            local_mem: state.local_size,
            keep_alive: Vec::new(),
        };
        for arg in &state.args {
            let arg = arg.as_ref().ok_or(Error::InvalidKernelArgs)?;
            let value = launch.lower_arg(arg)?;
            launch.args.push(value);
        }
        Ok(launch)
    }
}

// =============================================================================
// KERNEL LAUNCH
// =============================================================================

/// Self-contained launch description
#[derive(Debug, Clone)]
pub struct KernelLaunch {
    /// Id of the kernel this launch came from
    pub kernel_id: u64,
    /// Kernel name
    pub name: &'static str,
    /// Entry point
    pub func: KernelFn,
    /// Used dimensions
    pub work_dim: u32,
    /// Global offset
    pub global_offset: [u64; 3],
    /// Global size
    pub global_size: [u64; 3],
    /// Work-group size
    pub local_size: [u64; 3],
    /// Lowered arguments
    pub args: Vec<ArgValue>,
    /// Exec-info entries
    pub exec_info: Vec<ExecInfo>,
    /// Local memory per work-group
    pub local_mem: u64,
    /// Memory objects referenced by `args`
    pub keep_alive: Vec<Arc<MemBuffer>>,
}

impl KernelLaunch {
    fn lower_arg(&mut self, arg: &KernelArg) -> Result<ArgValue> {
        Ok(match arg {
            KernelArg::Value(bytes) => ArgValue::Value(bytes.clone()),
            KernelArg::Pointer(ptr) => ArgValue::Pointer(*ptr),
            KernelArg::MemObj(mem) => {
                let ptr = mem.ptr_with_offset(0)?;
                self.keep_alive.push(mem.clone());
                ArgValue::Pointer(ptr)
            },
            KernelArg::Local(size) => ArgValue::Local(*size),
        })
    }

    /// Replace argument `index`
    ///
    /// `local_mem` follows the local-memory size of the replaced argument.
    pub fn set_arg(&mut self, index: u32, arg: &KernelArg) -> Result<()> {
        if index as usize >= self.args.len() {
            return Err(Error::InvalidValue);
        }
        let value = self.lower_arg(arg)?;
        if let ArgValue::Local(old) = self.args[index as usize] {
            self.local_mem = self.local_mem.saturating_sub(old);
        }
        if let ArgValue::Local(new) = value {
            self.local_mem += new;
        }
        self.args[index as usize] = value;
        Ok(())
    }

    /// Total number of work-items
    pub fn work_items(&self) -> u64 {
        self.global_size.iter().product()
    }

    /// Run every work-item in order
    pub fn execute(&self, memory: &MemoryArena) -> Result<()> {
        let mut groups = [1u64; 3];
        for d in 0..3 {
            if self.local_size[d] == 0 || self.global_size[d] % self.local_size[d] != 0 {
                return Err(Error::InvalidWorkGroupSize);
            }
            groups[d] = self.global_size[d] / self.local_size[d];
        }

        for gz in 0..groups[2] {
            for gy in 0..groups[1] {
                for gx in 0..groups[0] {
                    let group_id = [gx, gy, gz];
                    for lz in 0..self.local_size[2] {
                        for ly in 0..self.local_size[1] {
                            for lx in 0..self.local_size[0] {
                                let local_id = [lx, ly, lz];
                                let item = WorkItem {
                                    launch: self,
                                    memory,
                                    group_id,
                                    local_id,
                                };
                                (self.func)(&item).map_err(|e| {
                                    log::warn!(
                                        "Kernel {}: work-item {:?} failed: {}",
                                        self.name,
                                        item.global_ids(),
                                        e
                                    );
                                    Error::KernelFault
                                })?;
                            }
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

// =============================================================================
// WORK ITEM
// =============================================================================

/// View of one work-item handed to a [`KernelFn`]
#[derive(Debug)]
pub struct WorkItem<'a> {
    launch: &'a KernelLaunch,
    memory: &'a MemoryArena,
    group_id: [u64; 3],
    local_id: [u64; 3],
}

impl WorkItem<'_> {
    /// Used dimensions
    #[inline]
    pub fn work_dim(&self) -> u32 {
        self.launch.work_dim
    }

    /// Global id in dimension `dim`, including the global offset
    #[inline]
    pub fn global_id(&self, dim: usize) -> u64 {
        if dim >= 3 {
            return 0;
        }
        self.launch.global_offset[dim]
            + self.group_id[dim] * self.launch.local_size[dim]
            + self.local_id[dim]
    }

    fn global_ids(&self) -> [u64; 3] {
        [self.global_id(0), self.global_id(1), self.global_id(2)]
    }

    /// Global size in dimension `dim`
    #[inline]
    pub fn global_size(&self, dim: usize) -> u64 {
        self.launch.global_size.get(dim).copied().unwrap_or(1)
    }

    /// Local id in dimension `dim`
    #[inline]
    pub fn local_id(&self, dim: usize) -> u64 {
        self.local_id.get(dim).copied().unwrap_or(0)
    }

    /// Work-group size in dimension `dim`
    #[inline]
    pub fn local_size(&self, dim: usize) -> u64 {
        self.launch.local_size.get(dim).copied().unwrap_or(1)
    }

    /// Work-group id in dimension `dim`
    #[inline]
    pub fn group_id(&self, dim: usize) -> u64 {
        self.group_id.get(dim).copied().unwrap_or(0)
    }

    /// By-value argument `index`
    pub fn arg<T: Pod>(&self, index: usize) -> Result<T> {
        match self.launch.args.get(index) {
            Some(ArgValue::Value(bytes)) if bytes.len() == core::mem::size_of::<T>() => {
                Ok(bytemuck::pod_read_unaligned(bytes))
            },
            _ => Err(Error::InvalidKernelArgs),
        }
    }

    /// Pointer argument `index`
    pub fn arg_ptr(&self, index: usize) -> Result<DevicePtr> {
        match self.launch.args.get(index) {
            Some(ArgValue::Pointer(ptr)) => Ok(*ptr),
            _ => Err(Error::InvalidKernelArgs),
        }
    }

    /// Local-memory argument size
    pub fn arg_local(&self, index: usize) -> Result<u64> {
        match self.launch.args.get(index) {
            Some(ArgValue::Local(size)) => Ok(*size),
            _ => Err(Error::InvalidKernelArgs),
        }
    }

    /// Load element `index` of an array at `base`
    pub fn load<T: Pod>(&self, base: DevicePtr, index: u64) -> Result<T> {
        let offset = index * core::mem::size_of::<T>() as u64;
        self.memory.read_pod(base.checked_offset(offset)?)
    }

    /// Store element `index` of an array at `base`
    pub fn store<T: Pod>(&self, base: DevicePtr, index: u64, value: T) -> Result<()> {
        let offset = index * core::mem::size_of::<T>() as u64;
        self.memory.write_pod(base.checked_offset(offset)?, &value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeviceConfig;
    use crate::memory::UsmKind;

    fn iota(item: &WorkItem<'_>) -> Result<()> {
        let out = item.arg_ptr(0)?;
        let base: u32 = item.arg(1)?;
        let i = item.global_id(0);
        item.store(out, i, base + i as u32)
    }

    #[test]
    fn test_resolve_local_derived() {
        assert_eq!(NdRange::linear(1024).resolve_local(256).unwrap(), [256, 1, 1]);
        assert_eq!(NdRange::linear(100).resolve_local(64).unwrap(), [50, 1, 1]);
        assert_eq!(NdRange::planar(8, 8).resolve_local(16).unwrap(), [8, 2, 1]);
        assert_eq!(NdRange::linear(7).resolve_local(64).unwrap(), [7, 1, 1]);
    }

    #[test]
    fn test_resolve_local_explicit() {
        let range = NdRange::linear(64).with_local([16, 1, 1]);
        assert_eq!(range.resolve_local(256).unwrap(), [16, 1, 1]);

        let range = NdRange::linear(64).with_local([24, 1, 1]);
        assert_eq!(range.resolve_local(256), Err(Error::InvalidWorkGroupSize));

        let range = NdRange::linear(512).with_local([512, 1, 1]);
        assert_eq!(range.resolve_local(256), Err(Error::InvalidWorkGroupSize));
    }

    #[test]
    fn test_work_dim() {
        let mut range = NdRange::linear(4);
        range.work_dim = 0;
        assert_eq!(range.check_work_dim(), Err(Error::InvalidWorkDimension));
        range.work_dim = 4;
        assert_eq!(range.resolve_local(64), Err(Error::InvalidWorkDimension));
        assert!(NdRange::planar(4, 0).is_empty());
        assert!(!NdRange::volume(1, 2, 3).is_empty());
    }

    #[test]
    fn test_snapshot_requires_args() {
        let ctx = Context::new(DeviceConfig::default()).unwrap();
        let kernel = Kernel::new(&ctx, "iota", 2, iota);
        let range = NdRange::linear(4);
        assert_eq!(
            kernel.snapshot(&range, [4, 1, 1]).unwrap_err(),
            Error::InvalidKernelArgs
        );
        kernel.set_arg_pointer(0, DevicePtr::new(0x1000)).unwrap();
        assert_eq!(kernel.arg_indices(), vec![0]);
        assert_eq!(kernel.set_arg_value(2, &0u32), Err(Error::InvalidValue));
    }

    #[test]
    fn test_execute() {
        let ctx = Context::new(DeviceConfig::default()).unwrap();
        let out = ctx.usm_alloc(UsmKind::Device, 16 * 4).unwrap();
        let kernel = Kernel::new(&ctx, "iota", 2, iota);
        kernel.set_arg_pointer(0, out).unwrap();
        kernel.set_arg_value(1, &100u32).unwrap();

        let range = NdRange::linear(16);
        let launch = kernel.snapshot(&range, range.resolve_local(4).unwrap()).unwrap();
        launch.execute(ctx.memory()).unwrap();

        let values = ctx.memory().read_slice::<u32>(out, 16).unwrap();
        assert_eq!(values, (100..116).collect::<Vec<u32>>());
    }

    #[test]
    fn test_snapshot_is_detached() {
        let ctx = Context::new(DeviceConfig::default()).unwrap();
        let kernel = Kernel::new(&ctx, "iota", 2, iota);
        kernel.set_arg_pointer(0, DevicePtr::new(0x1000)).unwrap();
        kernel.set_arg_value(1, &1u32).unwrap();
        let launch = kernel.snapshot(&NdRange::linear(1), [1, 1, 1]).unwrap();
        kernel.set_arg_value(1, &2u32).unwrap();
        assert_eq!(launch.args[1], ArgValue::Value(1u32.to_le_bytes().to_vec()));
    }

    #[test]
    fn test_local_size_accumulates() {
        let ctx = Context::new(DeviceConfig::default()).unwrap();
        let kernel = Kernel::new(&ctx, "iota", 2, iota);
        kernel.set_arg_local(0, 128).unwrap();
        kernel.set_arg_local(1, 64).unwrap();
        assert_eq!(kernel.local_size(), 192);
        kernel.clear_local_size();
        assert_eq!(kernel.local_size(), 0);
    }

    #[test]
    fn test_launch_set_arg_tracks_local_mem() {
        let ctx = Context::new(DeviceConfig::default()).unwrap();
        let kernel = Kernel::new(&ctx, "iota", 2, iota);
        kernel.set_arg_local(0, 128).unwrap();
        kernel.set_arg_value(1, &1u32).unwrap();
        let mut launch = kernel.snapshot(&NdRange::linear(1), [1, 1, 1]).unwrap();
        assert_eq!(launch.local_mem, 128);

        launch.set_arg(0, &KernelArg::Local(32)).unwrap();
        assert_eq!(launch.local_mem, 32);
        launch.set_arg(1, &KernelArg::Local(16)).unwrap();
        assert_eq!(launch.local_mem, 48);
        launch.set_arg(0, &KernelArg::Pointer(DevicePtr::new(0x1000))).unwrap();
        assert_eq!(launch.local_mem, 16);
        assert_eq!(launch.args[1], ArgValue::Local(16));
    }

    #[test]
    fn test_exec_info_merge() {
        let mut list = Vec::new();
        merge_exec_info(&mut list, ExecInfo::IndirectAccess(false));
        merge_exec_info(&mut list, ExecInfo::CacheConfig(CacheConfig::LargeSlm));
        merge_exec_info(&mut list, ExecInfo::IndirectAccess(true));
        assert_eq!(
            list,
            vec![
                ExecInfo::IndirectAccess(true),
                ExecInfo::CacheConfig(CacheConfig::LargeSlm)
            ]
        );
    }
}
