//! Updating recorded commands between enqueues.

use std::sync::Arc;

use ember_cmdbuf::{AppendDeps, CommandBuffer, CommandBufferDesc, CommandInfo, KernelLaunchUpdate};
use ember_core::{Error, Result};
use ember_device::{
    Context, Device, DeviceConfig, Kernel, MemBuffer, NdRange, Queue, QueueFlags, UsmKind, WorkItem,
};

fn add_value(item: &WorkItem<'_>) -> Result<()> {
    let data = item.arg_ptr(0)?;
    let value: u32 = item.arg(1)?;
    let i = item.global_id(0);
    let current: u32 = item.load(data, i)?;
    item.store(data, i, current + value)
}

fn setup(config: DeviceConfig) -> (Arc<Context>, Arc<Device>, Arc<Queue>) {
    let ctx = Context::new(config).unwrap();
    let dev = ctx.device(0).unwrap();
    let queue = Queue::new(&ctx, &dev, QueueFlags::empty()).unwrap();
    (ctx, dev, queue)
}

fn updatable() -> CommandBufferDesc {
    CommandBufferDesc { updatable: true }
}

#[test]
fn test_updated_events_replay_with_new_data() {
    let (ctx, dev, queue) = setup(DeviceConfig::native_graph());
    let p0 = ctx.usm_alloc(UsmKind::Device, 4).unwrap();
    let p1 = ctx.usm_alloc(UsmKind::Device, 4).unwrap();
    let host = ctx.usm_alloc(UsmKind::Host, 4).unwrap();

    let e0 = queue.enqueue_usm_fill(p0, &42u32.to_le_bytes(), 4, &[]).unwrap();

    let cb = CommandBuffer::create(&ctx, &dev, updatable()).unwrap();
    let copy = cb
        .append_usm_memcpy(p1, p0, 4, AppendDeps::none().wait_on(&[e0]).signal())
        .unwrap();
    let command = copy.command.unwrap();
    let e1 = copy.event.unwrap();
    cb.finalize().unwrap();

    cb.enqueue(&queue, &[], false).unwrap();
    queue.enqueue_usm_memcpy(true, host, p1, 4, &[e1.clone()]).unwrap();
    assert_eq!(ctx.memory().read_pod::<u32>(host).unwrap(), 42);

    let e2 = queue.enqueue_usm_fill(p0, &666u32.to_le_bytes(), 4, &[]).unwrap();
    command.update_wait_events(&[e2]).unwrap();
    let e3 = command.update_signal_event().unwrap();
    assert_ne!(e1.id(), e3.id());

    cb.enqueue(&queue, &[], false).unwrap();
    queue.enqueue_usm_memcpy(true, host, p1, 4, &[e3]).unwrap();
    assert_eq!(ctx.memory().read_pod::<u32>(host).unwrap(), 666);

    command.release().unwrap();
    cb.release().unwrap();
}

#[test]
fn test_event_update_validation() {
    let (ctx, dev, queue) = setup(DeviceConfig::native_graph());
    let ptr = ctx.usm_alloc(UsmKind::Device, 16).unwrap();
    let ready = queue.enqueue_usm_fill(ptr, &[0], 16, &[]).unwrap();

    let cb = CommandBuffer::create(&ctx, &dev, updatable()).unwrap();
    let plain = cb.append_usm_fill(ptr, &[1], 16, AppendDeps::none()).unwrap();
    let waiting = cb
        .append_usm_fill(ptr, &[2], 16, AppendDeps::none().wait_on(&[ready.clone()]))
        .unwrap();
    cb.finalize().unwrap();

    let plain = plain.command.unwrap();
    let waiting = waiting.command.unwrap();
    assert_eq!(plain.update_signal_event().map(|_| ()), Err(Error::InvalidOperation));
    assert_eq!(plain.update_wait_events(&[ready.clone()]), Err(Error::InvalidValue));
    assert_eq!(waiting.update_wait_events(&[]), Err(Error::InvalidValue));

    let (other_ctx, _other_dev, other_queue) = setup(DeviceConfig::native_graph());
    let other_ptr = other_ctx.usm_alloc(UsmKind::Device, 4).unwrap();
    let foreign = other_queue.enqueue_usm_fill(other_ptr, &[0], 4, &[]).unwrap();
    assert_eq!(waiting.update_wait_events(&[foreign]), Err(Error::InvalidEvent));
    waiting.update_wait_events(&[ready]).unwrap();

    plain.release().unwrap();
    waiting.release().unwrap();
    cb.release().unwrap();
}

#[test]
fn test_kernel_arg_update_applies_to_next_enqueue() {
    let (ctx, dev, queue) = setup(DeviceConfig::native_graph());
    let data = ctx.usm_alloc(UsmKind::Device, 16).unwrap();
    let kernel = Kernel::new(&ctx, "add_value", 2, add_value);
    kernel.set_arg_pointer(0, data).unwrap();
    kernel.set_arg_value(1, &7u32).unwrap();

    let cb = CommandBuffer::create(&ctx, &dev, updatable()).unwrap();
    let launch = cb
        .append_kernel_launch(&kernel, &NdRange::linear(4), AppendDeps::none())
        .unwrap();
    let command = launch.command.unwrap();
    cb.finalize().unwrap();

    cb.enqueue(&queue, &[], false).unwrap();
    command
        .update_kernel_launch(&KernelLaunchUpdate::new().arg_value(1, &100u32))
        .unwrap();
    cb.enqueue(&queue, &[], false).unwrap();
    queue.finish().unwrap();

    // the first launch keeps the value bound when it was enqueued
    assert_eq!(ctx.memory().read_slice::<u32>(data, 4).unwrap(), vec![107; 4]);

    // the kernel object itself is untouched
    kernel.set_arg_value(1, &1u32).unwrap();
    cb.enqueue(&queue, &[], false).unwrap();
    queue.finish().unwrap();
    assert_eq!(ctx.memory().read_slice::<u32>(data, 4).unwrap(), vec![207; 4]);

    command.release().unwrap();
    cb.release().unwrap();
}

#[test]
fn test_kernel_range_update() {
    let (ctx, dev, queue) = setup(DeviceConfig::native_graph());
    let data = ctx.usm_alloc(UsmKind::Device, 32).unwrap();
    let kernel = Kernel::new(&ctx, "add_value", 2, add_value);
    kernel.set_arg_pointer(0, data).unwrap();
    kernel.set_arg_value(1, &1u32).unwrap();

    let cb = CommandBuffer::create(&ctx, &dev, updatable()).unwrap();
    let command = cb
        .append_kernel_launch(&kernel, &NdRange::linear(4), AppendDeps::none())
        .unwrap()
        .command
        .unwrap();
    cb.finalize().unwrap();

    assert_eq!(
        command.update_kernel_launch(&KernelLaunchUpdate::new().work_dim(2)),
        Err(Error::UnsupportedFeature)
    );
    assert_eq!(
        command.update_kernel_launch(&KernelLaunchUpdate::new().global_size([0, 1, 1])),
        Err(Error::UnsupportedFeature)
    );
    command
        .update_kernel_launch(&KernelLaunchUpdate::new().global_size([8, 1, 1]))
        .unwrap();
    cb.enqueue(&queue, &[], true).unwrap().unwrap().wait().unwrap();
    assert_eq!(ctx.memory().read_slice::<u32>(data, 8).unwrap(), vec![1; 8]);

    let shifted = KernelLaunchUpdate::new()
        .global_offset([4, 0, 0])
        .global_size([4, 1, 1]);
    command.update_kernel_launch(&shifted).unwrap();
    cb.enqueue(&queue, &[], true).unwrap().unwrap().wait().unwrap();
    assert_eq!(
        ctx.memory().read_slice::<u32>(data, 8).unwrap(),
        vec![1, 1, 1, 1, 2, 2, 2, 2]
    );

    command.release().unwrap();
    cb.release().unwrap();
}

#[test]
fn test_zero_sized_kernel_cannot_grow() {
    let (ctx, dev, _queue) = setup(DeviceConfig::native_graph());
    let data = ctx.usm_alloc(UsmKind::Device, 16).unwrap();
    let kernel = Kernel::new(&ctx, "add_value", 2, add_value);
    kernel.set_arg_pointer(0, data).unwrap();
    kernel.set_arg_value(1, &1u32).unwrap();

    let cb = CommandBuffer::create(&ctx, &dev, updatable()).unwrap();
    let command = cb
        .append_kernel_launch(&kernel, &NdRange::linear(0), AppendDeps::none())
        .unwrap()
        .command
        .unwrap();
    cb.finalize().unwrap();

    assert_eq!(
        command.update_kernel_launch(&KernelLaunchUpdate::new().global_size([4, 1, 1])),
        Err(Error::UnsupportedFeature)
    );
    command
        .update_kernel_launch(&KernelLaunchUpdate::new().arg_value(1, &5u32))
        .unwrap();

    command.release().unwrap();
    cb.release().unwrap();
}

#[test]
fn test_non_kernel_command_rejects_kernel_update() {
    let (ctx, dev, _queue) = setup(DeviceConfig::native_graph());
    let ptr = ctx.usm_alloc(UsmKind::Device, 16).unwrap();
    let cb = CommandBuffer::create(&ctx, &dev, updatable()).unwrap();
    let command = cb
        .append_usm_fill(ptr, &[0], 16, AppendDeps::none())
        .unwrap()
        .command
        .unwrap();
    cb.finalize().unwrap();
    assert_eq!(
        command.update_kernel_launch(&KernelLaunchUpdate::new().arg_value(1, &5u32)),
        Err(Error::InvalidValue)
    );
    command.release().unwrap();
    cb.release().unwrap();
}

#[test]
fn test_mem_obj_update_on_queue_emulation() {
    let (ctx, dev, queue) = setup(DeviceConfig::queue_emulated());
    let first = MemBuffer::new(&ctx, 16).unwrap();
    let second = MemBuffer::new(&ctx, 16).unwrap();
    let kernel = Kernel::new(&ctx, "add_value", 2, add_value);
    kernel.set_arg_mem_obj(0, &first).unwrap();
    kernel.set_arg_value(1, &3u32).unwrap();

    let cb = CommandBuffer::create(&ctx, &dev, updatable()).unwrap();
    let command = cb
        .append_kernel_launch(&kernel, &NdRange::linear(4), AppendDeps::none())
        .unwrap()
        .command
        .unwrap();
    cb.finalize().unwrap();

    let (other_ctx, _other_dev, _other_queue) = setup(DeviceConfig::queue_emulated());
    let foreign = MemBuffer::new(&other_ctx, 16).unwrap();
    assert_eq!(
        command.update_kernel_launch(&KernelLaunchUpdate::new().arg_mem_obj(0, &foreign)),
        Err(Error::InvalidMemObject)
    );

    command
        .update_kernel_launch(&KernelLaunchUpdate::new().arg_mem_obj(0, &second))
        .unwrap();
    let done = cb.enqueue(&queue, &[], true).unwrap().unwrap();
    let bytes = queue.enqueue_mem_buffer_read(&second, 0, 16, &[done]).unwrap();
    assert_eq!(bytes, 3u32.to_le_bytes().repeat(4));
    assert_eq!(
        queue.enqueue_mem_buffer_read(&first, 0, 16, &[]).unwrap(),
        vec![0; 16]
    );

    command.release().unwrap();
    cb.release().unwrap();
}

#[test]
fn test_command_outlives_released_buffer() {
    let (ctx, dev, queue) = setup(DeviceConfig::native_graph());
    let ptr = ctx.usm_alloc(UsmKind::Device, 16).unwrap();
    let cb = CommandBuffer::create(&ctx, &dev, updatable()).unwrap();
    let command = cb
        .append_usm_fill(ptr, &[0], 16, AppendDeps::none().signal())
        .unwrap()
        .command
        .unwrap();
    cb.finalize().unwrap();

    command.retain().unwrap();
    assert_eq!(command.info(CommandInfo::ReferenceCount).unwrap(), 2);

    cb.release().unwrap();
    assert!(cb.is_alive());
    assert_eq!(cb.enqueue(&queue, &[], false).map(|_| ()), Err(Error::InvalidNullHandle));

    // updates still reach the buffer through the command
    command.update_signal_event().unwrap();

    command.release().unwrap();
    assert!(cb.is_alive());
    command.release().unwrap();
    assert!(!command.is_alive());
    assert!(!cb.is_alive());
    assert_eq!(command.retain(), Err(Error::InvalidNullHandle));
}
