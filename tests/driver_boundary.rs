//! Driver boundary contract tests
//!
//! These inspect the raw traffic the wrappers send to the driver: wait-list
//! shapes, info-query buffer sizes and commands rejected before any call.

use trueno_cl::driver::sys::{
    CL_INVALID_COMMAND_QUEUE, CL_INVALID_EVENT_WAIT_LIST, CL_INVALID_MEM_OBJECT, CL_INVALID_VALUE,
    CL_KERNEL_REFERENCE_COUNT, CL_MEM_MAP_COUNT, CL_MEM_REFERENCE_COUNT, CL_PROGRAM_REFERENCE_COUNT,
};
use trueno_cl::testing::{EnqueueRecord, MockDriver};
use trueno_cl::{
    enumerate_platforms, BuildOptions, CommandQueue, Context, DeviceType, Event, Kernel, MemFlags,
    MemoryObject, NdRange, Program, QueueProperties, Status,
};

const SOURCE: &str = r"
__kernel void scale(__global float* data, const float factor) {
    data[get_global_id(0)] *= factor;
}
";

struct Fixture {
    mock: MockDriver,
    ctx: Context,
    queue: CommandQueue,
    buffer: MemoryObject<f32>,
    program: Program,
}

fn fixture() -> Fixture {
    let mock = MockDriver::install();
    let ctx = Context::new(mock.driver(), mock.platform(), &mock.devices()).unwrap();
    let queue = ctx.create_queue(mock.devices()[0], QueueProperties::empty()).unwrap();
    let buffer = MemoryObject::allocate(&ctx, vec![1.0f32; 16], MemFlags::READ_WRITE).unwrap();
    let mut program = Program::create(&ctx, SOURCE, &BuildOptions::new()).unwrap();
    let kernel = program.kernel_mut("scale").unwrap();
    kernel.set_arg_mem(0, &buffer).unwrap();
    kernel.set_arg_scalar(1, 2.0f32).unwrap();
    mock.clear_logs();
    Fixture {
        mock,
        ctx,
        queue,
        buffer,
        program,
    }
}

/// Wait-list fields of a record
fn shape(record: &EnqueueRecord) -> (u32, bool, Vec<usize>) {
    (record.num_events, record.wait_list_null, record.wait_list.clone())
}

// ============================================================================
// Wait-list normalization
// ============================================================================

#[test]
fn none_and_empty_wait_lists_have_identical_shape() {
    let mut f = fixture();
    let kernel = f.program.kernel("scale").unwrap();
    let range = NdRange::linear(16);
    let empty: &[&Event] = &[];

    f.queue.enqueue_kernel(kernel, &range, None).into_result().unwrap();
    f.queue.enqueue_kernel(kernel, &range, Some(empty)).into_result().unwrap();
    f.queue
        .enqueue_read_buffer(&mut f.buffer, true, 0, None)
        .into_result()
        .unwrap();
    f.queue
        .enqueue_read_buffer(&mut f.buffer, true, 0, Some(empty))
        .into_result()
        .unwrap();
    f.queue
        .enqueue_write_buffer(&mut f.buffer, true, 0, &[3.0], None)
        .into_result()
        .unwrap();
    f.queue
        .enqueue_write_buffer(&mut f.buffer, true, 0, &[3.0], Some(empty))
        .into_result()
        .unwrap();

    let log = f.mock.enqueue_log();
    assert_eq!(log.len(), 6);
    for pair in log.chunks(2) {
        assert_eq!(pair[0].command, pair[1].command);
        assert_eq!(shape(&pair[0]), shape(&pair[1]));
        assert_eq!(shape(&pair[0]), (0, true, Vec::new()));
    }
}

#[test]
fn wait_list_preserves_caller_order() {
    let mut f = fixture();
    let kernel = f.program.kernel("scale").unwrap();
    let range = NdRange::linear(16);
    let a = f.queue.enqueue_kernel(kernel, &range, None).into_result().unwrap();
    let b = f.queue.enqueue_kernel(kernel, &range, None).into_result().unwrap();
    let c = f.queue.enqueue_kernel(kernel, &range, None).into_result().unwrap();

    f.queue
        .enqueue_read_buffer(&mut f.buffer, true, 0, Some(&[&c, &a, &b]))
        .into_result()
        .unwrap();

    let last = f.mock.enqueue_log().pop().unwrap();
    assert_eq!(last.num_events, 3);
    assert!(!last.wait_list_null);
    assert_eq!(
        last.wait_list,
        vec![c.handle().addr(), a.handle().addr(), b.handle().addr()]
    );
}

#[test]
fn every_enqueue_requests_an_event() {
    let mut f = fixture();
    let kernel = f.program.kernel("scale").unwrap();
    f.queue
        .enqueue_kernel(kernel, &NdRange::linear(16), None)
        .into_result()
        .unwrap();
    f.queue
        .enqueue_write_buffer(&mut f.buffer, false, 2, &[1.0, 2.0], None)
        .into_result()
        .unwrap();
    let log = f.mock.enqueue_log();
    assert!(log.iter().all(|r| r.event_requested && r.event != 0));
    assert_eq!((log[1].offset, log[1].size), (8, 8));
}

// ============================================================================
// Local rejections
// ============================================================================

#[test]
fn local_rejections_never_reach_the_driver() {
    let mut f = fixture();
    let mut released = f
        .queue
        .enqueue_write_buffer(&mut f.buffer, true, 0, &[1.0], None)
        .into_result()
        .unwrap();
    released.release();
    f.mock.clear_logs();

    let past_end = f.queue.enqueue_write_buffer(&mut f.buffer, true, 10, &[0.0; 7], None);
    assert_eq!(past_end.status, Status(CL_INVALID_VALUE));
    assert!(past_end.event.is_null());

    let read_past_end = f.queue.enqueue_read_buffer(&mut f.buffer, true, 17, None);
    assert_eq!(read_past_end.status, Status(CL_INVALID_VALUE));

    let stale_wait = f
        .queue
        .enqueue_read_buffer(&mut f.buffer, true, 0, Some(&[&released]));
    assert_eq!(stale_wait.status, Status(CL_INVALID_EVENT_WAIT_LIST));

    let mut gone = MemoryObject::<f32>::allocate_empty(&f.ctx, 4, MemFlags::READ_WRITE).unwrap();
    gone.dispose();
    f.mock.clear_logs();
    let disposed_buffer = f.queue.enqueue_write_buffer(&mut gone, true, 0, &[1.0], None);
    assert_eq!(disposed_buffer.status, Status(CL_INVALID_MEM_OBJECT));

    let mut queue = f.ctx.create_queue(f.mock.devices()[1], QueueProperties::empty()).unwrap();
    queue.dispose();
    f.mock.clear_logs();
    let kernel = f.program.kernel("scale").unwrap();
    let disposed_queue = queue.enqueue_kernel(kernel, &NdRange::linear(16), None);
    assert_eq!(disposed_queue.status, Status(CL_INVALID_COMMAND_QUEUE));
    assert!(disposed_queue.into_result().is_err());

    assert!(f.mock.enqueue_log().is_empty());
}

#[test]
fn write_at_exact_end_is_accepted() {
    let mut f = fixture();
    f.queue
        .enqueue_write_buffer(&mut f.buffer, true, 12, &[9.0; 4], None)
        .into_result()
        .unwrap();
    let record = f.mock.enqueue_log().pop().unwrap();
    assert_eq!((record.offset, record.size), (48, 16));
    assert_eq!(&f.buffer.host_data().unwrap()[12..], &[9.0; 4]);
}

// ============================================================================
// Two-phase queries
// ============================================================================

#[test]
fn info_queries_pass_exactly_the_reported_size() {
    let f = fixture();
    let devices = f.mock.devices();

    let platforms = enumerate_platforms(f.mock.driver()).unwrap();
    let all = platforms[0].devices(DeviceType::ALL).unwrap();
    assert_eq!(all.len(), 2);

    f.ctx.reference_count().unwrap();
    f.ctx.num_devices().unwrap();
    f.ctx.properties().unwrap();
    f.queue.reference_count().unwrap();
    f.queue.size().unwrap();
    f.buffer.size().unwrap();
    f.buffer.flags().unwrap();
    f.buffer.reference_count().unwrap();
    f.buffer.map_count().unwrap();
    f.buffer.host_ptr().unwrap();
    f.buffer.associated_memobject().unwrap();
    f.buffer.offset().unwrap();
    f.buffer.mem_type().unwrap();
    f.buffer.context().unwrap();
    f.program.reference_count().unwrap();
    f.program.num_devices().unwrap();
    f.program.source().unwrap();
    f.program.num_kernels().unwrap();
    f.program.kernel_names().unwrap();
    for &device in &devices {
        f.program.build_status(device).unwrap();
        f.program.build_log(device).unwrap();
        f.program.build_options(device).unwrap();
    }
    let kernel = Kernel::from_handle(f.mock.driver(), f.program.kernel("scale").unwrap().handle()).unwrap();
    assert_eq!(kernel.num_args(), 2);
    kernel.reference_count().unwrap();
    f.program.kernel("scale").unwrap().reference_count().unwrap();

    let event = f
        .queue
        .enqueue_kernel(f.program.kernel("scale").unwrap(), &NdRange::linear(16), None)
        .into_result()
        .unwrap();
    event.status().unwrap();
    event.command_type().unwrap();
    event.reference_count().unwrap();
    event.queue().unwrap();
    event.context().unwrap();

    let log = f.mock.query_log();
    assert!(log.len() > 40);
    for (function, param) in [
        ("clGetMemObjectInfo", CL_MEM_REFERENCE_COUNT),
        ("clGetMemObjectInfo", CL_MEM_MAP_COUNT),
        ("clGetProgramInfo", CL_PROGRAM_REFERENCE_COUNT),
        ("clGetKernelInfo", CL_KERNEL_REFERENCE_COUNT),
    ] {
        assert!(
            log.iter().any(|r| r.function == function && r.param == param && !r.value_null),
            "{} {:#x} never queried",
            function,
            param
        );
    }
    for record in &log {
        assert_eq!(record.result, 0, "{:?}", record);
        if record.value_null {
            assert_eq!(record.size, 0, "{:?}", record);
        } else {
            assert_eq!(record.size, record.required, "{:?}", record);
        }
    }
    // every value phase is preceded by its size phase
    for pair in log.windows(2).filter(|w| !w[1].value_null) {
        assert!(pair[0].value_null);
        assert_eq!((pair[0].function, pair[0].param), (pair[1].function, pair[1].param));
    }
}

#[test]
fn failed_size_phase_skips_value_phase() {
    let f = fixture();
    f.mock.fail_next("clGetMemObjectInfo", CL_INVALID_MEM_OBJECT);
    let err = f.buffer.size().unwrap_err();
    assert_eq!(err.status(), Some(Status(CL_INVALID_MEM_OBJECT)));

    let log = f.mock.query_log();
    assert_eq!(log.len(), 1);
    assert!(log[0].value_null);
}
