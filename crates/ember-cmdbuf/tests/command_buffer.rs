//! End-to-end recording and replay on both back-ends.

use std::sync::Arc;

use ember_cmdbuf::{
    AppendDeps, CommandBuffer, CommandBufferDesc, CommandBufferInfo, CommandBufferInfoValue,
    RectCopy,
};
use ember_core::{Error, RectOffset, RectPitch, RectRegion, Result};
use ember_device::{
    Context, Device, DeviceConfig, Kernel, MemBuffer, NdRange, Queue, QueueFlags, UsmKind,
    UsmMigrationFlags, WorkItem,
};

fn add_one(item: &WorkItem<'_>) -> Result<()> {
    let data = item.arg_ptr(0)?;
    let i = item.global_id(0);
    let v: u32 = item.load(data, i)?;
    item.store(data, i, v + 1)
}

fn setup(config: DeviceConfig) -> (Arc<Context>, Arc<Device>, Arc<Queue>) {
    let ctx = Context::new(config).unwrap();
    let dev = ctx.device(0).unwrap();
    let queue = Queue::new(&ctx, &dev, QueueFlags::empty()).unwrap();
    (ctx, dev, queue)
}

#[test]
fn test_chained_commands_see_upstream_writes() {
    let (ctx, dev, queue) = setup(DeviceConfig::native_graph());
    let src = ctx.usm_alloc(UsmKind::Device, 64).unwrap();
    let dst = ctx.usm_alloc(UsmKind::Host, 64).unwrap();
    let kernel = Kernel::new(&ctx, "add_one", 1, add_one);
    kernel.set_arg_pointer(0, src).unwrap();

    let cb = CommandBuffer::create(&ctx, &dev, CommandBufferDesc::default()).unwrap();
    let pattern = [1u8, 0, 0, 0, 2, 0, 0, 0];
    let fill = cb.append_usm_fill(src, &pattern, 64, AppendDeps::none()).unwrap();
    let inc = cb
        .append_kernel_launch(&kernel, &NdRange::linear(16), AppendDeps::after(&[fill.sync_point]))
        .unwrap();
    let copy = cb
        .append_usm_memcpy(dst, src, 64, AppendDeps::after(&[inc.sync_point]))
        .unwrap();
    let after_copy = [copy.sync_point];
    let to_host = UsmMigrationFlags::DEVICE_TO_HOST;
    let hint = cb
        .append_usm_prefetch(dst, 64, to_host, AppendDeps::after(&after_copy))
        .unwrap();
    assert!(hint.status.is_degraded());
    assert_eq!(cb.sync_point_count().unwrap(), 4);
    cb.finalize().unwrap();

    let done = cb.enqueue(&queue, &[], true).unwrap().unwrap();
    done.wait().unwrap();

    let expected: Vec<u32> = (0..16).map(|i| if i % 2 == 0 { 2 } else { 3 }).collect();
    assert_eq!(ctx.memory().read_slice::<u32>(dst, 16).unwrap(), expected);
    cb.release().unwrap();
}

#[test]
fn test_sync_point_from_other_buffer_is_rejected() {
    let (ctx, dev, _queue) = setup(DeviceConfig::native_graph());
    let ptr = ctx.usm_alloc(UsmKind::Device, 16).unwrap();
    let first = CommandBuffer::create(&ctx, &dev, CommandBufferDesc::default()).unwrap();
    let second = CommandBuffer::create(&ctx, &dev, CommandBufferDesc::default()).unwrap();

    let foreign = first.append_usm_fill(ptr, &[1], 16, AppendDeps::none()).unwrap();
    second.append_usm_fill(ptr, &[2], 16, AppendDeps::none()).unwrap();
    assert_eq!(
        second
            .append_usm_fill(ptr, &[3], 16, AppendDeps::after(&[foreign.sync_point]))
            .map(|_| ()),
        Err(Error::InvalidValue)
    );
    assert_eq!(second.sync_point_count().unwrap(), 1);
    assert_eq!(second.node_count().unwrap(), 1);

    first.release().unwrap();
    second.release().unwrap();
}

#[test]
fn test_lifecycle_errors() {
    let (ctx, dev, queue) = setup(DeviceConfig::native_graph());
    let cb = CommandBuffer::create(&ctx, &dev, CommandBufferDesc::default()).unwrap();
    assert_eq!(cb.enqueue(&queue, &[], false).map(|_| ()), Err(Error::InvalidOperation));
    cb.finalize().unwrap();
    assert_eq!(cb.finalize(), Err(Error::InvalidOperation));

    let ptr = ctx.usm_alloc(UsmKind::Device, 16).unwrap();
    assert_eq!(
        cb.append_usm_fill(ptr, &[0], 16, AppendDeps::none()).map(|_| ()),
        Err(Error::InvalidOperation)
    );
    assert_eq!(
        cb.info(CommandBufferInfo::Descriptor).unwrap(),
        CommandBufferInfoValue::Descriptor(CommandBufferDesc::default())
    );
    cb.release().unwrap();
    assert_eq!(cb.finalize(), Err(Error::InvalidNullHandle));
}

#[test]
fn test_repeated_enqueue_gives_independent_events() {
    let (ctx, dev, queue) = setup(DeviceConfig::native_graph());
    let ptr = ctx.usm_alloc(UsmKind::Device, 16).unwrap();
    let kernel = Kernel::new(&ctx, "add_one", 1, add_one);
    kernel.set_arg_pointer(0, ptr).unwrap();

    let cb = CommandBuffer::create(&ctx, &dev, CommandBufferDesc::default()).unwrap();
    cb.append_kernel_launch(&kernel, &NdRange::linear(4), AppendDeps::none())
        .unwrap();
    cb.finalize().unwrap();

    let first = cb.enqueue(&queue, &[], true).unwrap().unwrap();
    let second = cb.enqueue(&queue, &[first.clone()], true).unwrap().unwrap();
    assert_ne!(first.id(), second.id());

    second.wait().unwrap();
    assert!(first.is_complete());
    assert_eq!(ctx.memory().read_slice::<u32>(ptr, 4).unwrap(), vec![2; 4]);
    cb.release().unwrap();
}

#[test]
fn test_enqueue_waits_on_prerequisite_events() {
    let (ctx, dev, queue) = setup(DeviceConfig::native_graph());
    let src = ctx.usm_alloc(UsmKind::Device, 32).unwrap();
    let dst = ctx.usm_alloc(UsmKind::Device, 32).unwrap();

    let cb = CommandBuffer::create(&ctx, &dev, CommandBufferDesc::default()).unwrap();
    cb.append_usm_memcpy(dst, src, 32, AppendDeps::none()).unwrap();
    cb.finalize().unwrap();

    let filled = queue.enqueue_usm_fill(src, &[0x5a], 32, &[]).unwrap();
    let copied = cb.enqueue(&queue, &[filled], true).unwrap().unwrap();
    copied.wait().unwrap();
    assert_eq!(ctx.memory().read_vec(dst, 32).unwrap(), vec![0x5a; 32]);
    cb.release().unwrap();
}

#[test]
fn test_node_limit_leaves_buffer_unchanged() {
    let (ctx, dev, _queue) = setup(DeviceConfig::native_graph().with_max_graph_nodes(4));
    let ptr = ctx.usm_alloc(UsmKind::Device, 64).unwrap();
    let cb = CommandBuffer::create(&ctx, &dev, CommandBufferDesc::default()).unwrap();

    // an 8-byte pattern needs five memset nodes
    assert_eq!(
        cb.append_usm_fill(ptr, &[7; 8], 64, AppendDeps::none()).map(|_| ()),
        Err(Error::OutOfResources)
    );
    assert_eq!(cb.node_count().unwrap(), 0);
    assert_eq!(cb.sync_point_count().unwrap(), 0);

    cb.append_usm_fill(ptr, &[7; 4], 64, AppendDeps::none()).unwrap();
    assert_eq!(cb.node_count().unwrap(), 1);
    cb.release().unwrap();
}

#[test]
fn test_long_pattern_fill_matches_queue_fill() {
    let (ctx, dev, queue) = setup(DeviceConfig::native_graph());
    let recorded = ctx.usm_alloc(UsmKind::Device, 128).unwrap();
    let reference = ctx.usm_alloc(UsmKind::Device, 128).unwrap();
    let pattern: Vec<u8> = (1..=16).collect();

    let cb = CommandBuffer::create(&ctx, &dev, CommandBufferDesc::default()).unwrap();
    cb.append_usm_fill(recorded, &pattern, 128, AppendDeps::none()).unwrap();
    cb.finalize().unwrap();
    cb.enqueue(&queue, &[], false).unwrap();
    queue.enqueue_usm_fill(reference, &pattern, 128, &[]).unwrap();
    queue.finish().unwrap();

    assert_eq!(
        ctx.memory().read_vec(recorded, 128).unwrap(),
        ctx.memory().read_vec(reference, 128).unwrap()
    );
    cb.release().unwrap();
}

#[test]
fn test_buffer_commands_on_queue_emulation() {
    let (ctx, dev, queue) = setup(DeviceConfig::queue_emulated());
    let a = MemBuffer::new(&ctx, 32).unwrap();
    let b = MemBuffer::new(&ctx, 32).unwrap();
    let host_in = ctx.usm_alloc(UsmKind::Host, 16).unwrap();
    let host_out = ctx.usm_alloc(UsmKind::Host, 32).unwrap();
    ctx.memory().write(host_in, &[9; 16]).unwrap();

    let cb = CommandBuffer::create(&ctx, &dev, CommandBufferDesc::default()).unwrap();
    let write = cb
        .append_mem_buffer_write(&a, 0, 16, host_in, AppendDeps::none())
        .unwrap();
    let fill = cb
        .append_mem_buffer_fill(&b, &[1, 2], 0, 32, AppendDeps::none())
        .unwrap();
    let inputs = [write.sync_point, fill.sync_point];
    let copy = cb
        .append_mem_buffer_copy(&a, &b, 0, 8, 16, AppendDeps::after(&inputs))
        .unwrap();
    cb.append_mem_buffer_read(&b, 0, 32, host_out, AppendDeps::after(&[copy.sync_point]))
        .unwrap();
    cb.finalize().unwrap();
    cb.enqueue(&queue, &[], true).unwrap().unwrap().wait().unwrap();

    let mut expected = [1u8, 2].repeat(16);
    expected[8..24].fill(9);
    assert_eq!(ctx.memory().read_vec(host_out, 32).unwrap(), expected);
    cb.release().unwrap();
}

#[test]
fn test_rect_write_and_read() {
    let (ctx, dev, queue) = setup(DeviceConfig::native_graph());
    // 4x4 byte image, update the 2x2 block at (1, 1)
    let image = MemBuffer::new(&ctx, 16).unwrap();
    let block = ctx.usm_alloc(UsmKind::Host, 4).unwrap();
    let out = ctx.usm_alloc(UsmKind::Host, 16).unwrap();
    ctx.memory().write(block, &[1, 2, 3, 4]).unwrap();

    let cb = CommandBuffer::create(&ctx, &dev, CommandBufferDesc::default()).unwrap();
    let clear = cb
        .append_mem_buffer_fill(&image, &[0], 0, 16, AppendDeps::none())
        .unwrap();
    let write = RectCopy::new(
        RectOffset::default(),
        RectOffset::new(1, 1, 0),
        RectRegion::new(2, 2, 1),
    )
        .with_pitches(RectPitch::new(2, 0), RectPitch::new(4, 16));
    let written = cb
        .append_mem_buffer_write_rect(&image, &write, block, AppendDeps::after(&[clear.sync_point]))
        .unwrap();
    let read =
        RectCopy::new(RectOffset::default(), RectOffset::default(), RectRegion::new(4, 4, 1));
    cb.append_mem_buffer_read_rect(&image, &read, out, AppendDeps::after(&[written.sync_point]))
        .unwrap();
    cb.finalize().unwrap();
    cb.enqueue(&queue, &[], true).unwrap().unwrap().wait().unwrap();

    #[rustfmt::skip]
    let expected = [
        0, 0, 0, 0,
        0, 1, 2, 0,
        0, 3, 4, 0,
        0, 0, 0, 0,
    ];
    assert_eq!(ctx.memory().read_vec(out, 16).unwrap(), expected);
    cb.release().unwrap();
}

#[test]
fn test_rect_copy_between_buffers() {
    let (ctx, dev, queue) = setup(DeviceConfig::queue_emulated());
    let src = MemBuffer::new(&ctx, 24).unwrap();
    let dst = MemBuffer::new(&ctx, 8).unwrap();
    let host = ctx.usm_alloc(UsmKind::Host, 24).unwrap();
    let out = ctx.usm_alloc(UsmKind::Host, 8).unwrap();
    let rows: Vec<u8> = (0..24).collect();
    ctx.memory().write(host, &rows).unwrap();

    let cb = CommandBuffer::create(&ctx, &dev, CommandBufferDesc::default()).unwrap();
    let upload = cb.append_mem_buffer_write(&src, 0, 24, host, AppendDeps::none()).unwrap();
    // column block x 2..6 of rows 1 and 2 of a 6x4 source, packed 4x2
    let rect = RectCopy::new(
        RectOffset::new(2, 1, 0),
        RectOffset::default(),
        RectRegion::new(4, 2, 1),
    )
        .with_pitches(RectPitch::new(6, 24), RectPitch::default());
    let copied = cb
        .append_mem_buffer_copy_rect(&src, &dst, &rect, AppendDeps::after(&[upload.sync_point]))
        .unwrap();
    cb.append_mem_buffer_read(&dst, 0, 8, out, AppendDeps::after(&[copied.sync_point]))
        .unwrap();
    cb.finalize().unwrap();
    cb.enqueue(&queue, &[], false).unwrap();
    queue.finish().unwrap();

    assert_eq!(ctx.memory().read_vec(out, 8).unwrap(), vec![8, 9, 10, 11, 14, 15, 16, 17]);
    cb.release().unwrap();
}
