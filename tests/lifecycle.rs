//! Release-exactly-once lifecycle tests
//!
//! Every owning wrapper issues one release call no matter how often it is
//! disposed; every `from_handle` wrapper issues none. Counts come from the
//! mock driver's release log.

use trueno_cl::testing::{HandleKind, MockDriver};
use trueno_cl::{
    BuildOptions, ClError, CommandQueue, Context, Event, Kernel, MemFlags, MemoryObject, Program,
    QueueProperties,
};

const SOURCE: &str = r"
__kernel void fill(__global int* out, int value) {
    out[get_global_id(0)] = value;
}
";

fn context(mock: &MockDriver) -> Context {
    Context::new(mock.driver(), mock.platform(), &mock.devices()).unwrap()
}

// ============================================================================
// Dispose idempotence
// ============================================================================

#[test]
fn dispose_twice_equals_dispose_once() {
    let mock = MockDriver::install();
    let mut ctx = context(&mock);
    let mut queue = CommandQueue::new(&ctx, mock.devices()[0], QueueProperties::empty()).unwrap();
    let mut buffer = MemoryObject::allocate(&ctx, vec![1i32, 2, 3, 4], MemFlags::READ_WRITE).unwrap();
    let mut program = Program::create(&ctx, SOURCE, &BuildOptions::new()).unwrap();
    let mut kernel = program.create_kernel("fill").unwrap();

    kernel.dispose();
    kernel.dispose();
    program.dispose();
    program.dispose();
    buffer.dispose();
    buffer.dispose();
    queue.dispose();
    queue.dispose();
    ctx.dispose();
    ctx.dispose();

    drop((kernel, program, buffer, queue, ctx));

    // one kernel from the build plus one created by name
    assert_eq!(mock.release_count(HandleKind::Kernel), 2);
    assert_eq!(mock.release_count(HandleKind::Program), 1);
    assert_eq!(mock.release_count(HandleKind::Mem), 1);
    assert_eq!(mock.release_count(HandleKind::Queue), 1);
    assert_eq!(mock.release_count(HandleKind::Context), 1);
    for kind in [
        HandleKind::Kernel,
        HandleKind::Program,
        HandleKind::Mem,
        HandleKind::Queue,
        HandleKind::Context,
    ] {
        assert_eq!(mock.live_objects(kind), 0, "{:?} leaked", kind);
    }
}

#[test]
fn drop_alone_releases_once() {
    let mock = MockDriver::install();
    {
        let ctx = context(&mock);
        let _queue = ctx.create_queue(mock.devices()[1], QueueProperties::PROFILING).unwrap();
        let _buffer = MemoryObject::<f32>::allocate_empty(&ctx, 32, MemFlags::WRITE_ONLY).unwrap();
    }
    assert_eq!(mock.total_releases(), 3);
    assert_eq!(mock.live_objects(HandleKind::Context), 0);
}

#[test]
fn pin_released_exactly_at_dispose() {
    let mock = MockDriver::install();
    let ctx = context(&mock);
    let mut buffer = MemoryObject::allocate(
        &ctx,
        vec![1i32, 2, 3, 4],
        MemFlags::READ_WRITE | MemFlags::USE_HOST_PTR,
    )
    .unwrap();
    assert!(buffer.has_pin());
    assert_eq!(buffer.host_data().unwrap(), &[1, 2, 3, 4]);

    buffer.dispose();
    assert!(!buffer.has_pin());
    assert_eq!(buffer.host_data().unwrap_err(), ClError::Disposed("memory object"));
    buffer.dispose();
    assert_eq!(mock.release_count(HandleKind::Mem), 1);
}

#[test]
fn event_release_is_idempotent() {
    let mock = MockDriver::install();
    let ctx = context(&mock);
    let queue = ctx.create_queue(mock.devices()[0], QueueProperties::empty()).unwrap();
    let mut buffer = MemoryObject::<u8>::allocate_empty(&ctx, 16, MemFlags::READ_WRITE).unwrap();

    let mut event = queue
        .enqueue_write_buffer(&mut buffer, true, 0, &[7u8; 16], None)
        .into_result()
        .unwrap();
    let addr = event.handle().addr();
    event.release();
    event.release();
    drop(event);

    assert_eq!(mock.releases_of(addr), 1);
    assert_eq!(mock.live_objects(HandleKind::Event), 0);
}

#[test]
fn sub_buffer_release_order_is_free() {
    let mock = MockDriver::install();
    let ctx = context(&mock);
    let mut parent = MemoryObject::<f32>::allocate_empty(&ctx, 64, MemFlags::READ_WRITE).unwrap();
    let mut sub = parent.create_sub_buffer(MemFlags::READ_ONLY, 16, 16).unwrap();

    parent.dispose();
    assert_eq!(mock.live_objects(HandleKind::Mem), 2);
    assert_eq!(sub.size().unwrap(), 64);
    sub.dispose();
    assert_eq!(mock.live_objects(HandleKind::Mem), 0);
    assert_eq!(mock.release_count(HandleKind::Mem), 2);
}

// ============================================================================
// Non-owning wrappers
// ============================================================================

#[test]
fn from_handle_wrappers_never_release() {
    let mock = MockDriver::install();
    let ctx = context(&mock);
    let queue = ctx.create_queue(mock.devices()[0], QueueProperties::empty()).unwrap();
    let mut buffer = MemoryObject::allocate(&ctx, vec![0i32; 8], MemFlags::READ_WRITE).unwrap();
    let program = Program::create(&ctx, SOURCE, &BuildOptions::new()).unwrap();
    let event = queue
        .enqueue_read_buffer(&mut buffer, true, 0, None)
        .into_result()
        .unwrap();
    mock.clear_logs();

    {
        let mut views = (
            Context::from_handle(mock.driver(), ctx.handle()).unwrap(),
            CommandQueue::from_handle(mock.driver(), queue.handle()).unwrap(),
            MemoryObject::<i32>::from_handle(mock.driver(), buffer.handle()),
            Program::from_handle(mock.driver(), program.handle()).unwrap(),
            Kernel::from_handle(mock.driver(), program.kernel("fill").unwrap().handle()).unwrap(),
            Event::from_handle(mock.driver(), event.handle()),
        );
        assert!(!views.0.is_owned());
        assert!(!views.1.is_owned());
        assert!(!views.2.is_owned());
        assert!(!views.3.is_owned());
        assert!(!views.4.is_owned());
        assert!(!views.5.is_owned());

        views.0.dispose();
        views.1.dispose();
        views.2.dispose();
        views.3.dispose();
        views.4.dispose();
        views.5.release();
    }

    assert_eq!(mock.total_releases(), 0);
    assert_eq!(queue.reference_count().unwrap(), 1);
    assert_eq!(program.reference_count().unwrap(), 1);
    assert_eq!(event.reference_count().unwrap(), 1);
}

#[test]
fn from_handle_view_sees_owner_data() {
    let mock = MockDriver::install();
    let ctx = context(&mock);
    let queue = ctx.create_queue(mock.devices()[0], QueueProperties::empty()).unwrap();
    let owner = MemoryObject::allocate(&ctx, vec![10u16, 20, 30], MemFlags::READ_ONLY).unwrap();
    let mut view = MemoryObject::<u16>::from_handle(mock.driver(), owner.handle());
    queue
        .enqueue_read_buffer(&mut view, true, 0, None)
        .into_result()
        .unwrap();
    assert_eq!(view.host_data().unwrap(), &[10, 20, 30]);
    drop(view);
    assert_eq!(mock.releases_of(owner.handle().addr()), 0);
}
