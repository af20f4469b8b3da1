//! Property-based tests for transfers, wait lists and release counting
//!
//! Every case installs a fresh mock driver, so state never leaks between
//! generated inputs.

use proptest::prelude::*;
use trueno_cl::driver::sys::CL_INVALID_VALUE;
use trueno_cl::testing::{HandleKind, MockDriver};
use trueno_cl::{
    BuildOptions, CommandQueue, Context, Event, MemFlags, MemoryObject, NdRange, Program,
    QueueProperties, Status,
};

// ============================================================================
// PROPERTY TEST CONFIGURATION
// ============================================================================

const PROPTEST_CASES: u32 = 64;

fn setup(mock: &MockDriver) -> (Context, CommandQueue) {
    let ctx = Context::new(mock.driver(), mock.platform(), &mock.devices()).unwrap();
    let queue = CommandQueue::new(&ctx, mock.devices()[0], QueueProperties::empty()).unwrap();
    (ctx, queue)
}

fn words(bytes: &[u8]) -> Vec<i32> {
    bytes
        .chunks_exact(4)
        .map(|c| i32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// Buffer contents, a non-empty write window inside them and the data to write
fn write_case() -> impl Strategy<Value = (Vec<i32>, usize, Vec<i32>)> {
    prop::collection::vec(any::<i32>(), 1..64).prop_flat_map(|initial| {
        let n = initial.len();
        (0..n).prop_flat_map(move |offset| {
            (
                Just(initial.clone()),
                Just(offset),
                prop::collection::vec(any::<i32>(), 1..=n - offset),
            )
        })
    })
}

// ============================================================================
// TRANSFERS
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(PROPTEST_CASES))]

    /// A partial write changes exactly the addressed window
    #[test]
    fn prop_partial_write_matches_model((initial, offset, data) in write_case()) {
        let mock = MockDriver::install();
        let (ctx, queue) = setup(&mock);
        let mut buffer = MemoryObject::allocate(&ctx, initial.clone(), MemFlags::READ_WRITE).unwrap();

        let enqueued = queue.enqueue_write_buffer(&mut buffer, true, offset, &data, None);
        prop_assert!(enqueued.is_success());

        let mut model = initial;
        model[offset..offset + data.len()].copy_from_slice(&data);
        prop_assert_eq!(words(&mock.device_bytes(buffer.handle())), model.clone());

        queue.enqueue_read_buffer(&mut buffer, true, 0, None).into_result().unwrap();
        prop_assert_eq!(buffer.host_data().unwrap(), model.as_slice());

        let record = mock.enqueue_log()[0].clone();
        prop_assert_eq!(record.offset, offset * 4);
        prop_assert_eq!(record.size, data.len() * 4);
    }

    /// Writes past the end are rejected and leave the device untouched
    #[test]
    fn prop_write_past_end_rejected(
        initial in prop::collection::vec(any::<i32>(), 1..32),
        extra in 1usize..8,
        offset_seed in any::<usize>(),
    ) {
        let mock = MockDriver::install();
        let (ctx, queue) = setup(&mock);
        let n = initial.len();
        let mut buffer = MemoryObject::allocate(&ctx, initial.clone(), MemFlags::READ_WRITE).unwrap();

        let offset = offset_seed % (n + 1);
        let data = vec![0i32; n - offset + extra];
        let enqueued = queue.enqueue_write_buffer(&mut buffer, true, offset, &data, None);

        prop_assert_eq!(enqueued.status, Status(CL_INVALID_VALUE));
        prop_assert!(enqueued.event.is_null());
        prop_assert!(mock.enqueue_log().is_empty());
        prop_assert_eq!(words(&mock.device_bytes(buffer.handle())), initial);
    }

    /// A read at `offset` fills the pin from the same element onwards
    #[test]
    fn prop_read_offset_mirrors_device(
        data in prop::collection::vec(any::<i32>(), 1..64),
        offset_seed in any::<usize>(),
    ) {
        let mock = MockDriver::install();
        let (ctx, queue) = setup(&mock);
        let n = data.len();
        let offset = offset_seed % n;
        let mut buffer = MemoryObject::<i32>::allocate_empty(&ctx, n, MemFlags::READ_WRITE).unwrap();
        queue.enqueue_write_buffer(&mut buffer, true, 0, &data, None).into_result().unwrap();
        buffer.host_data_mut().unwrap().fill(-1);

        queue.enqueue_read_buffer(&mut buffer, false, offset, None).into_result().unwrap();
        let host = buffer.host_data().unwrap().to_vec();
        prop_assert_eq!(&host[offset..], &data[offset..]);
        prop_assert!(host[..offset].iter().all(|&v| v == -1));
    }
}

// ============================================================================
// WAIT LISTS
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(PROPTEST_CASES))]

    /// The driver sees the wait list in exactly the caller's order
    #[test]
    fn prop_wait_list_order_preserved(
        order in (1usize..7).prop_flat_map(|n| Just((0..n).collect::<Vec<_>>()).prop_shuffle())
    ) {
        let mock = MockDriver::install();
        let (ctx, queue) = setup(&mock);
        let mut buffer = MemoryObject::<u8>::allocate_empty(&ctx, 8, MemFlags::READ_WRITE).unwrap();

        let events: Vec<Event> = (0..order.len())
            .map(|i| {
                queue
                    .enqueue_write_buffer(&mut buffer, true, 0, &[i as u8], None)
                    .into_result()
                    .unwrap()
            })
            .collect();
        let waits: Vec<&Event> = order.iter().map(|&i| &events[i]).collect();
        queue.enqueue_read_buffer(&mut buffer, true, 0, Some(&waits)).into_result().unwrap();

        let expected: Vec<usize> = order.iter().map(|&i| events[i].handle().addr()).collect();
        let record = mock.enqueue_log().pop().unwrap();
        prop_assert_eq!(record.num_events as usize, expected.len());
        prop_assert!(!record.wait_list_null);
        prop_assert_eq!(record.wait_list, expected);
    }
}

// ============================================================================
// LIFECYCLE
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(PROPTEST_CASES))]

    /// Any number of disposes releases each object exactly once
    #[test]
    fn prop_dispose_count_irrelevant(repeats in 1usize..6) {
        let mock = MockDriver::install();
        {
            let (mut ctx, mut queue) = setup(&mock);
            let mut buffer = MemoryObject::<f32>::allocate_empty(&ctx, 4, MemFlags::READ_WRITE).unwrap();
            let mut program = Program::create(
                &ctx,
                "__kernel void k(__global float* x) { x[0] = 0.0f; }",
                &BuildOptions::new(),
            )
            .unwrap();
            for _ in 0..repeats {
                program.dispose();
                buffer.dispose();
                queue.dispose();
                ctx.dispose();
            }
        }
        prop_assert_eq!(mock.release_count(HandleKind::Context), 1);
        prop_assert_eq!(mock.release_count(HandleKind::Queue), 1);
        prop_assert_eq!(mock.release_count(HandleKind::Mem), 1);
        prop_assert_eq!(mock.release_count(HandleKind::Program), 1);
        prop_assert_eq!(mock.release_count(HandleKind::Kernel), 1);
    }
}

// ============================================================================
// LAUNCH GEOMETRY
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(PROPTEST_CASES))]

    /// Work-item count is the product of the active dimensions
    #[test]
    fn prop_total_work_items(x in 1usize..512, y in 1usize..512, z in 1usize..64) {
        prop_assert_eq!(NdRange::linear(x).total_work_items(), x);
        prop_assert_eq!(NdRange::grid_2d(x, y).total_work_items(), x * y);
        prop_assert_eq!(NdRange::grid_3d(x, y, z).total_work_items(), x * y * z);
        prop_assert_eq!(
            NdRange::grid_3d(x, y, z).with_offset([1, 1, 1]).total_work_items(),
            x * y * z
        );
    }

    /// Divisible work-group sizes are accepted by the driver
    #[test]
    fn prop_divisible_local_size_accepted(groups in 1usize..16, local in 1usize..32) {
        let mock = MockDriver::install();
        let (ctx, queue) = setup(&mock);
        let out = MemoryObject::<i32>::allocate_empty(&ctx, groups * local, MemFlags::WRITE_ONLY).unwrap();
        let mut program = Program::create(
            &ctx,
            "__kernel void id(__global int* out) { out[get_global_id(0)] = get_global_id(0); }",
            &BuildOptions::new(),
        )
        .unwrap();
        let kernel = program.kernel_mut("id").unwrap();
        kernel.set_arg_mem(0, &out).unwrap();

        let range = NdRange::linear(groups * local).with_local([local, 1, 1]);
        let enqueued = queue.enqueue_kernel(program.kernel("id").unwrap(), &range, None);
        prop_assert!(enqueued.is_success());
        prop_assert_eq!(mock.enqueue_log()[0].work_dim, 1);
    }
}
