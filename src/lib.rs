//! # trueno-cl: OpenCL Resource Lifecycle Bindings
//!
//! Safe ownership wrappers over the OpenCL 1.2 C API: pinned host buffers,
//! memory objects, contexts, command queues, events, programs and kernels.
//!
//! ## Philosophy
//!
//! **Release exactly once** - every native object has one owner, released
//! on `dispose()` or drop, never twice. Wrappers built with `from_handle`
//! borrow a handle someone else owns and never release it.
//!
//! ## Quick Start
//!
//! ```rust
//! use trueno_cl::testing::MockDriver;
//! use trueno_cl::{CommandQueue, Context, MemFlags, MemoryObject, QueueProperties};
//!
//! let mock = MockDriver::install();
//! let devices = mock.devices();
//! let context = Context::new(mock.driver(), mock.platform(), &devices).unwrap();
//! let queue = CommandQueue::new(&context, devices[0], QueueProperties::empty()).unwrap();
//!
//! let mut buffer = MemoryObject::<f32>::allocate_empty(&context, 4, MemFlags::READ_WRITE).unwrap();
//! queue
//!     .enqueue_write_buffer(&mut buffer, true, 0, &[1.0, 2.0, 3.0, 4.0], None)
//!     .into_result()
//!     .unwrap();
//! queue.enqueue_read_buffer(&mut buffer, false, 0, None).into_result().unwrap();
//! assert_eq!(buffer.host_data().unwrap(), &[1.0, 2.0, 3.0, 4.0]);
//! ```
//!
//! ## Modules
//!
//! - [`driver`] - OpenCL C ABI table, handles and the two-phase info query
//! - [`pin`] - Pinned host buffers
//! - [`memory`] - Buffers and sub-buffers
//! - [`context`] / [`queue`] / [`event`] - Execution objects
//! - [`program`] / [`kernel`] - Build and dispatch
//! - [`platform`] - Platform and device discovery
//! - [`testing`] - In-process mock driver

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![deny(unsafe_op_in_unsafe_fn)]
// ============================================================================
// Lint allows
// ============================================================================
// Allow possible truncation - OpenCL counts are cl_uint
#![allow(clippy::cast_possible_truncation)]
// Allow cast_sign_loss - cl_context_properties carries handles as isize
#![allow(clippy::cast_sign_loss)]
// Allow doc markdown for OpenCL symbol names
#![allow(clippy::doc_markdown)]
// Allow uninlined format args - stylistic preference
#![allow(clippy::uninlined_format_args)]
// Allow map_unwrap_or - more readable with map().unwrap_or()
#![allow(clippy::map_unwrap_or)]
// Allow redundant closure for method calls - clearer intent
#![allow(clippy::redundant_closure_for_method_calls)]
// Allow too_many_arguments - mirrors the C entry points
#![allow(clippy::too_many_arguments)]
// Allow module_name_repetitions - ClError, ClDriver
#![allow(clippy::module_name_repetitions)]
// Allow unwrap_used in tests
#![allow(clippy::unwrap_used)]
// Allow float_cmp in tests where exact comparison is intended
#![allow(clippy::float_cmp)]

pub mod context;
pub mod driver;
pub mod error;
pub mod event;
pub mod kernel;
pub mod memory;
pub mod pin;
pub mod platform;
pub mod program;
pub mod queue;
pub mod testing;

pub use context::Context;
pub use driver::{
    get_driver, opencl_available, ClDriver, ContextHandle, DeviceId, DeviceType, DriverConfig,
    EventHandle, HostElement, KernelHandle, MemFlags, MemHandle, NdRange, PlatformId,
    ProgramHandle, QueueHandle, QueueProperties, TypeQualifiers,
};
pub use error::{ClError, Result, Status};
pub use event::{CommandStatus, Event, WaitList};
pub use kernel::{AccessQualifier, AddressQualifier, Kernel, KernelArgInfo, KernelInfo};
pub use memory::MemoryObject;
pub use pin::PinnedHostBuffer;
pub use platform::{enumerate_platforms, Device, Platform};
pub use program::{BuildOptions, BuildReport, BuildStatus, DeviceBuildLog, Program};
pub use queue::{CommandQueue, Enqueued};
