//! Minimal OpenCL FFI Bindings
//!
//! Hand-written FFI for the OpenCL 1.2 entry points the lifecycle core needs.
//! Dynamic loading via the ICD loader (libOpenCL.so / OpenCL.dll).
//!
//! # Design Philosophy
//!
//! **OWN THE STACK**: the driver boundary is a plain table of C function
//! pointers. The same table is filled either from the system ICD loader or
//! from the in-process mock in [`crate::testing`], so every wrapper is
//! exercised against the exact C ABI it ships with.
//!
//! # Safety
//!
//! All functions in this table are unsafe. Safe wrappers are provided in
//! the resource modules (context.rs, queue.rs, memory.rs, program.rs, ...).

#![allow(non_camel_case_types)]

use std::ffi::c_void;
use std::os::raw::c_char;

// ============================================================================
// OpenCL Type Definitions (from cl.h)
// ============================================================================

/// Signed 32-bit integer (result codes)
pub type cl_int = i32;
/// Unsigned 32-bit integer
pub type cl_uint = u32;
/// Unsigned 64-bit integer
pub type cl_ulong = u64;
/// Boolean (`CL_TRUE` / `CL_FALSE`)
pub type cl_bool = cl_uint;
/// 64-bit bitfield
pub type cl_bitfield = cl_ulong;

/// Platform handle (opaque pointer)
pub type cl_platform_id = *mut c_void;
/// Device handle (opaque pointer)
pub type cl_device_id = *mut c_void;
/// Context handle (opaque pointer)
pub type cl_context = *mut c_void;
/// Command queue handle (opaque pointer)
pub type cl_command_queue = *mut c_void;
/// Memory object handle (opaque pointer)
pub type cl_mem = *mut c_void;
/// Program handle (opaque pointer)
pub type cl_program = *mut c_void;
/// Kernel handle (opaque pointer)
pub type cl_kernel = *mut c_void;
/// Event handle (opaque pointer)
pub type cl_event = *mut c_void;

/// Device type bitfield
pub type cl_device_type = cl_bitfield;
/// Memory flags bitfield
pub type cl_mem_flags = cl_bitfield;
/// Command queue properties bitfield
pub type cl_command_queue_properties = cl_bitfield;
/// Context property list entry
pub type cl_context_properties = isize;

/// Sub-buffer region (`cl_buffer_region`)
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct cl_buffer_region {
    /// Byte offset into the parent buffer
    pub origin: usize,
    /// Byte length
    pub size: usize,
}

/// Context error notification callback
pub type ContextNotify = Option<
    unsafe extern "C" fn(
        errinfo: *const c_char,
        private_info: *const c_void,
        cb: usize,
        user_data: *mut c_void,
    ),
>;

/// Program build completion callback
pub type BuildNotify = Option<unsafe extern "C" fn(program: cl_program, user_data: *mut c_void)>;

/// Shape shared by every `clGet*Info` entry point
pub type InfoFn<H> = unsafe extern "C" fn(
    handle: H,
    param_name: cl_uint,
    param_value_size: usize,
    param_value: *mut c_void,
    param_value_size_ret: *mut usize,
) -> cl_int;

// ============================================================================
// Result Codes
// ============================================================================

/// Success
pub const CL_SUCCESS: cl_int = 0;
/// No device matched the request
pub const CL_DEVICE_NOT_FOUND: cl_int = -1;
/// Device is currently unavailable
pub const CL_DEVICE_NOT_AVAILABLE: cl_int = -2;
/// No online compiler
pub const CL_COMPILER_NOT_AVAILABLE: cl_int = -3;
/// Device allocation failed
pub const CL_MEM_OBJECT_ALLOCATION_FAILURE: cl_int = -4;
/// Device ran out of resources
pub const CL_OUT_OF_RESOURCES: cl_int = -5;
/// Host ran out of memory
pub const CL_OUT_OF_HOST_MEMORY: cl_int = -6;
/// Profiling info not available
pub const CL_PROFILING_INFO_NOT_AVAILABLE: cl_int = -7;
/// Source and destination overlap
pub const CL_MEM_COPY_OVERLAP: cl_int = -8;
/// Build failed
pub const CL_BUILD_PROGRAM_FAILURE: cl_int = -11;
/// Map failed
pub const CL_MAP_FAILURE: cl_int = -12;
/// Sub-buffer origin not aligned to the device base address alignment
pub const CL_MISALIGNED_SUB_BUFFER_OFFSET: cl_int = -13;
/// A command in the wait list failed
pub const CL_EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST: cl_int = -14;
/// Argument metadata was not requested at build time
pub const CL_KERNEL_ARG_INFO_NOT_AVAILABLE: cl_int = -19;
/// Invalid value
pub const CL_INVALID_VALUE: cl_int = -30;
/// Invalid device type
pub const CL_INVALID_DEVICE_TYPE: cl_int = -31;
/// Invalid platform
pub const CL_INVALID_PLATFORM: cl_int = -32;
/// Invalid device
pub const CL_INVALID_DEVICE: cl_int = -33;
/// Invalid context
pub const CL_INVALID_CONTEXT: cl_int = -34;
/// Invalid queue properties
pub const CL_INVALID_QUEUE_PROPERTIES: cl_int = -35;
/// Invalid command queue
pub const CL_INVALID_COMMAND_QUEUE: cl_int = -36;
/// Invalid host pointer
pub const CL_INVALID_HOST_PTR: cl_int = -37;
/// Invalid memory object
pub const CL_INVALID_MEM_OBJECT: cl_int = -38;
/// Invalid binary
pub const CL_INVALID_BINARY: cl_int = -42;
/// Invalid build options
pub const CL_INVALID_BUILD_OPTIONS: cl_int = -43;
/// Invalid program
pub const CL_INVALID_PROGRAM: cl_int = -44;
/// Program has no successfully built executable
pub const CL_INVALID_PROGRAM_EXECUTABLE: cl_int = -45;
/// Kernel name not found
pub const CL_INVALID_KERNEL_NAME: cl_int = -46;
/// Invalid kernel
pub const CL_INVALID_KERNEL: cl_int = -48;
/// Argument index out of range
pub const CL_INVALID_ARG_INDEX: cl_int = -49;
/// Invalid argument value
pub const CL_INVALID_ARG_VALUE: cl_int = -50;
/// Invalid argument size
pub const CL_INVALID_ARG_SIZE: cl_int = -51;
/// Kernel arguments not all set
pub const CL_INVALID_KERNEL_ARGS: cl_int = -52;
/// Work dimension outside 1..=3
pub const CL_INVALID_WORK_DIMENSION: cl_int = -53;
/// Invalid work-group size
pub const CL_INVALID_WORK_GROUP_SIZE: cl_int = -54;
/// Invalid global offset
pub const CL_INVALID_GLOBAL_OFFSET: cl_int = -56;
/// Inconsistent event wait list
pub const CL_INVALID_EVENT_WAIT_LIST: cl_int = -57;
/// Invalid event
pub const CL_INVALID_EVENT: cl_int = -58;
/// Invalid operation
pub const CL_INVALID_OPERATION: cl_int = -59;
/// Invalid buffer size
pub const CL_INVALID_BUFFER_SIZE: cl_int = -61;
/// Invalid global work size
pub const CL_INVALID_GLOBAL_WORK_SIZE: cl_int = -63;
/// Invalid property
pub const CL_INVALID_PROPERTY: cl_int = -64;

/// Boolean true
pub const CL_TRUE: cl_bool = 1;
/// Boolean false
pub const CL_FALSE: cl_bool = 0;

// ============================================================================
// Info Parameters
// ============================================================================

/// Platform profile string
pub const CL_PLATFORM_PROFILE: cl_uint = 0x0900;
/// Platform version string
pub const CL_PLATFORM_VERSION: cl_uint = 0x0901;
/// Platform name
pub const CL_PLATFORM_NAME: cl_uint = 0x0902;
/// Platform vendor
pub const CL_PLATFORM_VENDOR: cl_uint = 0x0903;
/// Space-separated platform extensions
pub const CL_PLATFORM_EXTENSIONS: cl_uint = 0x0904;

/// Default device
pub const CL_DEVICE_TYPE_DEFAULT: cl_device_type = 1 << 0;
/// CPU device
pub const CL_DEVICE_TYPE_CPU: cl_device_type = 1 << 1;
/// GPU device
pub const CL_DEVICE_TYPE_GPU: cl_device_type = 1 << 2;
/// Accelerator device
pub const CL_DEVICE_TYPE_ACCELERATOR: cl_device_type = 1 << 3;
/// All devices
pub const CL_DEVICE_TYPE_ALL: cl_device_type = 0xFFFF_FFFF;

/// Device type bitfield
pub const CL_DEVICE_TYPE: cl_uint = 0x1000;
/// Compute unit count
pub const CL_DEVICE_MAX_COMPUTE_UNITS: cl_uint = 0x1002;
/// Maximum work-group size
pub const CL_DEVICE_MAX_WORK_GROUP_SIZE: cl_uint = 0x1004;
/// Global memory size in bytes
pub const CL_DEVICE_GLOBAL_MEM_SIZE: cl_uint = 0x101F;
/// Device name
pub const CL_DEVICE_NAME: cl_uint = 0x102B;
/// Device vendor
pub const CL_DEVICE_VENDOR: cl_uint = 0x102C;
/// Driver version
pub const CL_DRIVER_VERSION: cl_uint = 0x102D;
/// Device OpenCL version
pub const CL_DEVICE_VERSION: cl_uint = 0x102F;
/// Space-separated device extensions
pub const CL_DEVICE_EXTENSIONS: cl_uint = 0x1030;
/// Owning platform
pub const CL_DEVICE_PLATFORM: cl_uint = 0x1031;

/// Context reference count
pub const CL_CONTEXT_REFERENCE_COUNT: cl_uint = 0x1080;
/// Context devices
pub const CL_CONTEXT_DEVICES: cl_uint = 0x1081;
/// Context property list
pub const CL_CONTEXT_PROPERTIES: cl_uint = 0x1082;
/// Context device count
pub const CL_CONTEXT_NUM_DEVICES: cl_uint = 0x1083;
/// Context property key: platform
pub const CL_CONTEXT_PLATFORM: cl_context_properties = 0x1084;

/// Out-of-order execution
pub const CL_QUEUE_OUT_OF_ORDER_EXEC_MODE_ENABLE: cl_command_queue_properties = 1 << 0;
/// Profiling enabled
pub const CL_QUEUE_PROFILING_ENABLE: cl_command_queue_properties = 1 << 1;
/// Queue context
pub const CL_QUEUE_CONTEXT: cl_uint = 0x1090;
/// Queue device
pub const CL_QUEUE_DEVICE: cl_uint = 0x1091;
/// Queue reference count
pub const CL_QUEUE_REFERENCE_COUNT: cl_uint = 0x1092;
/// Queue properties
pub const CL_QUEUE_PROPERTIES: cl_uint = 0x1093;
/// Queue size
pub const CL_QUEUE_SIZE: cl_uint = 0x1094;

/// Device read/write access
pub const CL_MEM_READ_WRITE: cl_mem_flags = 1 << 0;
/// Device write-only access
pub const CL_MEM_WRITE_ONLY: cl_mem_flags = 1 << 1;
/// Device read-only access
pub const CL_MEM_READ_ONLY: cl_mem_flags = 1 << 2;
/// Allocation backed by the supplied host pointer
pub const CL_MEM_USE_HOST_PTR: cl_mem_flags = 1 << 3;
/// Allocation in host-accessible memory
pub const CL_MEM_ALLOC_HOST_PTR: cl_mem_flags = 1 << 4;
/// Initialise from the supplied host pointer
pub const CL_MEM_COPY_HOST_PTR: cl_mem_flags = 1 << 5;

/// Buffer memory object type
pub const CL_MEM_OBJECT_BUFFER: cl_uint = 0x10F0;
/// Memory object type
pub const CL_MEM_TYPE: cl_uint = 0x1100;
/// Memory flags
pub const CL_MEM_FLAGS: cl_uint = 0x1101;
/// Size in bytes
pub const CL_MEM_SIZE: cl_uint = 0x1102;
/// Host pointer
pub const CL_MEM_HOST_PTR: cl_uint = 0x1103;
/// Map count
pub const CL_MEM_MAP_COUNT: cl_uint = 0x1104;
/// Reference count
pub const CL_MEM_REFERENCE_COUNT: cl_uint = 0x1105;
/// Owning context
pub const CL_MEM_CONTEXT: cl_uint = 0x1106;
/// Parent of a sub-buffer
pub const CL_MEM_ASSOCIATED_MEMOBJECT: cl_uint = 0x1107;
/// Sub-buffer origin
pub const CL_MEM_OFFSET: cl_uint = 0x1108;
/// Sub-buffer creation type: region
pub const CL_BUFFER_CREATE_TYPE_REGION: cl_uint = 0x1220;

/// Program reference count
pub const CL_PROGRAM_REFERENCE_COUNT: cl_uint = 0x1160;
/// Program context
pub const CL_PROGRAM_CONTEXT: cl_uint = 0x1161;
/// Program device count
pub const CL_PROGRAM_NUM_DEVICES: cl_uint = 0x1162;
/// Program devices
pub const CL_PROGRAM_DEVICES: cl_uint = 0x1163;
/// Program source
pub const CL_PROGRAM_SOURCE: cl_uint = 0x1164;
/// Kernel count
pub const CL_PROGRAM_NUM_KERNELS: cl_uint = 0x1167;
/// Semicolon-separated kernel names
pub const CL_PROGRAM_KERNEL_NAMES: cl_uint = 0x1168;

/// Build status
pub const CL_PROGRAM_BUILD_STATUS: cl_uint = 0x1181;
/// Build options
pub const CL_PROGRAM_BUILD_OPTIONS: cl_uint = 0x1182;
/// Build log
pub const CL_PROGRAM_BUILD_LOG: cl_uint = 0x1183;
/// Build succeeded
pub const CL_BUILD_SUCCESS: cl_int = 0;
/// No build attempted
pub const CL_BUILD_NONE: cl_int = -1;
/// Build failed
pub const CL_BUILD_ERROR: cl_int = -2;
/// Build running
pub const CL_BUILD_IN_PROGRESS: cl_int = -3;

/// Kernel function name
pub const CL_KERNEL_FUNCTION_NAME: cl_uint = 0x1190;
/// Kernel argument count
pub const CL_KERNEL_NUM_ARGS: cl_uint = 0x1191;
/// Kernel reference count
pub const CL_KERNEL_REFERENCE_COUNT: cl_uint = 0x1192;
/// Kernel context
pub const CL_KERNEL_CONTEXT: cl_uint = 0x1193;
/// Kernel program
pub const CL_KERNEL_PROGRAM: cl_uint = 0x1194;
/// Space-separated kernel attributes
pub const CL_KERNEL_ATTRIBUTES: cl_uint = 0x1195;

/// Argument address qualifier
pub const CL_KERNEL_ARG_ADDRESS_QUALIFIER: cl_uint = 0x1196;
/// Argument access qualifier
pub const CL_KERNEL_ARG_ACCESS_QUALIFIER: cl_uint = 0x1197;
/// Argument type name
pub const CL_KERNEL_ARG_TYPE_NAME: cl_uint = 0x1198;
/// Argument type qualifier bitfield
pub const CL_KERNEL_ARG_TYPE_QUALIFIER: cl_uint = 0x1199;
/// Argument name
pub const CL_KERNEL_ARG_NAME: cl_uint = 0x119A;
/// `__global`
pub const CL_KERNEL_ARG_ADDRESS_GLOBAL: cl_uint = 0x119B;
/// `__local`
pub const CL_KERNEL_ARG_ADDRESS_LOCAL: cl_uint = 0x119C;
/// `__constant`
pub const CL_KERNEL_ARG_ADDRESS_CONSTANT: cl_uint = 0x119D;
/// `__private`
pub const CL_KERNEL_ARG_ADDRESS_PRIVATE: cl_uint = 0x119E;
/// `read_only`
pub const CL_KERNEL_ARG_ACCESS_READ_ONLY: cl_uint = 0x11A0;
/// `write_only`
pub const CL_KERNEL_ARG_ACCESS_WRITE_ONLY: cl_uint = 0x11A1;
/// `read_write`
pub const CL_KERNEL_ARG_ACCESS_READ_WRITE: cl_uint = 0x11A2;
/// No access qualifier
pub const CL_KERNEL_ARG_ACCESS_NONE: cl_uint = 0x11A3;
/// No type qualifier
pub const CL_KERNEL_ARG_TYPE_NONE: cl_bitfield = 0;
/// `const`
pub const CL_KERNEL_ARG_TYPE_CONST: cl_bitfield = 1 << 0;
/// `restrict`
pub const CL_KERNEL_ARG_TYPE_RESTRICT: cl_bitfield = 1 << 1;
/// `volatile`
pub const CL_KERNEL_ARG_TYPE_VOLATILE: cl_bitfield = 1 << 2;

/// Event command queue
pub const CL_EVENT_COMMAND_QUEUE: cl_uint = 0x11D0;
/// Event command type
pub const CL_EVENT_COMMAND_TYPE: cl_uint = 0x11D1;
/// Event reference count
pub const CL_EVENT_REFERENCE_COUNT: cl_uint = 0x11D2;
/// Event execution status
pub const CL_EVENT_COMMAND_EXECUTION_STATUS: cl_uint = 0x11D3;
/// Event context
pub const CL_EVENT_CONTEXT: cl_uint = 0x11D4;
/// Command complete
pub const CL_COMPLETE: cl_int = 0;
/// Command running
pub const CL_RUNNING: cl_int = 1;
/// Command submitted
pub const CL_SUBMITTED: cl_int = 2;
/// Command queued
pub const CL_QUEUED: cl_int = 3;
/// NDRange kernel command
pub const CL_COMMAND_NDRANGE_KERNEL: cl_uint = 0x11F0;
/// Buffer read command
pub const CL_COMMAND_READ_BUFFER: cl_uint = 0x11F3;
/// Buffer write command
pub const CL_COMMAND_WRITE_BUFFER: cl_uint = 0x11F4;

// ============================================================================
// OpenCL Driver Function Pointers
// ============================================================================

/// OpenCL entry points used by the binding
///
/// Loaded at runtime from the ICD loader, or filled with the in-process
/// mock from [`crate::testing`]. No link-time dependency on OpenCL.
#[allow(non_snake_case)]
#[allow(clippy::type_complexity)]
pub struct ClDriver {
    // Platform / Device
    /// clGetPlatformIDs - List platforms
    pub clGetPlatformIDs: unsafe extern "C" fn(
        num_entries: cl_uint,
        platforms: *mut cl_platform_id,
        num_platforms: *mut cl_uint,
    ) -> cl_int,
    /// clGetPlatformInfo - Query a platform attribute
    pub clGetPlatformInfo: InfoFn<cl_platform_id>,
    /// clGetDeviceIDs - List devices of a platform
    pub clGetDeviceIDs: unsafe extern "C" fn(
        platform: cl_platform_id,
        device_type: cl_device_type,
        num_entries: cl_uint,
        devices: *mut cl_device_id,
        num_devices: *mut cl_uint,
    ) -> cl_int,
    /// clGetDeviceInfo - Query a device attribute
    pub clGetDeviceInfo: InfoFn<cl_device_id>,

    // Context
    /// clCreateContext - Create a context from an explicit device list
    pub clCreateContext: unsafe extern "C" fn(
        properties: *const cl_context_properties,
        num_devices: cl_uint,
        devices: *const cl_device_id,
        pfn_notify: ContextNotify,
        user_data: *mut c_void,
        errcode_ret: *mut cl_int,
    ) -> cl_context,
    /// clCreateContextFromType - Create a context from a device type filter
    pub clCreateContextFromType: unsafe extern "C" fn(
        properties: *const cl_context_properties,
        device_type: cl_device_type,
        pfn_notify: ContextNotify,
        user_data: *mut c_void,
        errcode_ret: *mut cl_int,
    ) -> cl_context,
    /// clReleaseContext - Release a context
    pub clReleaseContext: unsafe extern "C" fn(context: cl_context) -> cl_int,
    /// clGetContextInfo - Query a context attribute
    pub clGetContextInfo: InfoFn<cl_context>,

    // Command Queue
    /// clCreateCommandQueue - Create a queue for a context/device pair
    pub clCreateCommandQueue: unsafe extern "C" fn(
        context: cl_context,
        device: cl_device_id,
        properties: cl_command_queue_properties,
        errcode_ret: *mut cl_int,
    ) -> cl_command_queue,
    /// clReleaseCommandQueue - Release a queue
    pub clReleaseCommandQueue: unsafe extern "C" fn(queue: cl_command_queue) -> cl_int,
    /// clGetCommandQueueInfo - Query a queue attribute
    pub clGetCommandQueueInfo: InfoFn<cl_command_queue>,
    /// clFlush - Submit queued commands
    pub clFlush: unsafe extern "C" fn(queue: cl_command_queue) -> cl_int,
    /// clFinish - Block until queued commands complete
    pub clFinish: unsafe extern "C" fn(queue: cl_command_queue) -> cl_int,

    // Memory
    /// clCreateBuffer - Allocate a buffer
    pub clCreateBuffer: unsafe extern "C" fn(
        context: cl_context,
        flags: cl_mem_flags,
        size: usize,
        host_ptr: *mut c_void,
        errcode_ret: *mut cl_int,
    ) -> cl_mem,
    /// clCreateSubBuffer - Create a sub-buffer view of a buffer
    pub clCreateSubBuffer: unsafe extern "C" fn(
        buffer: cl_mem,
        flags: cl_mem_flags,
        create_type: cl_uint,
        create_info: *const c_void,
        errcode_ret: *mut cl_int,
    ) -> cl_mem,
    /// clReleaseMemObject - Release a memory object
    pub clReleaseMemObject: unsafe extern "C" fn(mem: cl_mem) -> cl_int,
    /// clGetMemObjectInfo - Query a memory object attribute
    pub clGetMemObjectInfo: InfoFn<cl_mem>,

    // Program
    /// clCreateProgramWithSource - Create a program from source strings
    pub clCreateProgramWithSource: unsafe extern "C" fn(
        context: cl_context,
        count: cl_uint,
        strings: *const *const c_char,
        lengths: *const usize,
        errcode_ret: *mut cl_int,
    ) -> cl_program,
    /// clCreateProgramWithBinary - Create a program from device binaries
    pub clCreateProgramWithBinary: unsafe extern "C" fn(
        context: cl_context,
        num_devices: cl_uint,
        device_list: *const cl_device_id,
        lengths: *const usize,
        binaries: *const *const u8,
        binary_status: *mut cl_int,
        errcode_ret: *mut cl_int,
    ) -> cl_program,
    /// clBuildProgram - Build a program for a device subset
    pub clBuildProgram: unsafe extern "C" fn(
        program: cl_program,
        num_devices: cl_uint,
        device_list: *const cl_device_id,
        options: *const c_char,
        pfn_notify: BuildNotify,
        user_data: *mut c_void,
    ) -> cl_int,
    /// clReleaseProgram - Release a program
    pub clReleaseProgram: unsafe extern "C" fn(program: cl_program) -> cl_int,
    /// clGetProgramInfo - Query a program attribute
    pub clGetProgramInfo: InfoFn<cl_program>,
    /// clGetProgramBuildInfo - Query per-device build state
    pub clGetProgramBuildInfo: unsafe extern "C" fn(
        program: cl_program,
        device: cl_device_id,
        param_name: cl_uint,
        param_value_size: usize,
        param_value: *mut c_void,
        param_value_size_ret: *mut usize,
    ) -> cl_int,

    // Kernel
    /// clCreateKernelsInProgram - Create every kernel of a built program
    pub clCreateKernelsInProgram: unsafe extern "C" fn(
        program: cl_program,
        num_kernels: cl_uint,
        kernels: *mut cl_kernel,
        num_kernels_ret: *mut cl_uint,
    ) -> cl_int,
    /// clCreateKernel - Create one kernel by name
    pub clCreateKernel: unsafe extern "C" fn(
        program: cl_program,
        kernel_name: *const c_char,
        errcode_ret: *mut cl_int,
    ) -> cl_kernel,
    /// clReleaseKernel - Release a kernel
    pub clReleaseKernel: unsafe extern "C" fn(kernel: cl_kernel) -> cl_int,
    /// clGetKernelInfo - Query a kernel attribute
    pub clGetKernelInfo: InfoFn<cl_kernel>,
    /// clGetKernelArgInfo - Query a kernel argument attribute
    pub clGetKernelArgInfo: unsafe extern "C" fn(
        kernel: cl_kernel,
        arg_index: cl_uint,
        param_name: cl_uint,
        param_value_size: usize,
        param_value: *mut c_void,
        param_value_size_ret: *mut usize,
    ) -> cl_int,
    /// clSetKernelArg - Bind a positional argument
    pub clSetKernelArg: unsafe extern "C" fn(
        kernel: cl_kernel,
        arg_index: cl_uint,
        arg_size: usize,
        arg_value: *const c_void,
    ) -> cl_int,

    // Enqueue
    /// clEnqueueNDRangeKernel - Enqueue a kernel dispatch
    pub clEnqueueNDRangeKernel: unsafe extern "C" fn(
        queue: cl_command_queue,
        kernel: cl_kernel,
        work_dim: cl_uint,
        global_work_offset: *const usize,
        global_work_size: *const usize,
        local_work_size: *const usize,
        num_events_in_wait_list: cl_uint,
        event_wait_list: *const cl_event,
        event: *mut cl_event,
    ) -> cl_int,
    /// clEnqueueReadBuffer - Enqueue a device→host transfer
    pub clEnqueueReadBuffer: unsafe extern "C" fn(
        queue: cl_command_queue,
        buffer: cl_mem,
        blocking_read: cl_bool,
        offset: usize,
        size: usize,
        ptr: *mut c_void,
        num_events_in_wait_list: cl_uint,
        event_wait_list: *const cl_event,
        event: *mut cl_event,
    ) -> cl_int,
    /// clEnqueueWriteBuffer - Enqueue a host→device transfer
    pub clEnqueueWriteBuffer: unsafe extern "C" fn(
        queue: cl_command_queue,
        buffer: cl_mem,
        blocking_write: cl_bool,
        offset: usize,
        size: usize,
        ptr: *const c_void,
        num_events_in_wait_list: cl_uint,
        event_wait_list: *const cl_event,
        event: *mut cl_event,
    ) -> cl_int,

    // Event
    /// clWaitForEvents - Block until events complete
    pub clWaitForEvents:
        unsafe extern "C" fn(num_events: cl_uint, event_list: *const cl_event) -> cl_int,
    /// clGetEventInfo - Query an event attribute
    pub clGetEventInfo: InfoFn<cl_event>,
    /// clRetainEvent - Increment an event reference count
    pub clRetainEvent: unsafe extern "C" fn(event: cl_event) -> cl_int,
    /// clReleaseEvent - Release an event
    pub clReleaseEvent: unsafe extern "C" fn(event: cl_event) -> cl_int,
}

impl std::fmt::Debug for ClDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClDriver")
            .field("clGetPlatformIDs", &(self.clGetPlatformIDs as *const ()))
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Dynamic Loading
// ============================================================================

/// Library search configuration for the system driver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverConfig {
    /// Library names or paths, tried in order
    pub library_names: Vec<String>,
}

/// Environment variable that prepends a library path to the search list
pub const LIBRARY_ENV: &str = "TRUENO_CL_LIBRARY";

impl Default for DriverConfig {
    fn default() -> Self {
        #[cfg(target_os = "windows")]
        let names: &[&str] = &["OpenCL.dll"];
        #[cfg(target_os = "macos")]
        let names: &[&str] = &["/System/Library/Frameworks/OpenCL.framework/OpenCL"];
        #[cfg(not(any(target_os = "windows", target_os = "macos")))]
        let names: &[&str] = &["libOpenCL.so.1", "libOpenCL.so"];

        Self {
            library_names: names.iter().map(|s| (*s).to_string()).collect(),
        }
    }
}

impl DriverConfig {
    /// Default search list with `TRUENO_CL_LIBRARY` prepended when set
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(path) = std::env::var(LIBRARY_ENV) {
            if !path.trim().is_empty() {
                config.library_names.insert(0, path);
            }
        }
        config
    }
}

#[cfg(feature = "opencl")]
mod loading {
    use super::*;
    use libloading::{Library, Symbol};
    use std::sync::OnceLock;

    /// Global driver instance (loaded once)
    static DRIVER: OnceLock<Option<ClDriver>> = OnceLock::new();

    /// Library handle (must outlive function pointers)
    static LIBRARY: OnceLock<Option<Library>> = OnceLock::new();

    impl ClDriver {
        /// Load the system OpenCL driver
        ///
        /// Returns `None` if no ICD loader is installed. This is expected on
        /// machines without OpenCL and is not an error.
        #[must_use]
        pub fn load() -> Option<&'static Self> {
            Self::load_with(&DriverConfig::from_env())
        }

        /// Load the system OpenCL driver from an explicit search list
        ///
        /// The first successful load wins for the lifetime of the process.
        #[must_use]
        pub fn load_with(config: &DriverConfig) -> Option<&'static Self> {
            let _ = LIBRARY.get_or_init(|| {
                for name in &config.library_names {
                    // SAFETY: loading the vendor ICD loader, a well-known system library
                    if let Ok(lib) = unsafe { Library::new(name) } {
                        tracing::debug!("loaded OpenCL driver from {}", name);
                        return Some(lib);
                    }
                }
                tracing::debug!("no OpenCL driver found in {:?}", config.library_names);
                None
            });

            DRIVER
                .get_or_init(|| {
                    let lib = LIBRARY.get()?.as_ref()?;
                    Self::load_from_library(lib)
                })
                .as_ref()
        }

        /// Load function pointers from library
        fn load_from_library(lib: &Library) -> Option<Self> {
            // SAFETY: all symbols are standard OpenCL 1.2 entry points with the
            // signatures declared on `ClDriver`
            unsafe {
                macro_rules! load_sym {
                    ($name:ident) => {{
                        let sym: Symbol<'_, *const ()> = lib.get(stringify!($name).as_bytes()).ok()?;
                        std::mem::transmute::<*const (), _>(*sym)
                    }};
                }

                Some(ClDriver {
                    clGetPlatformIDs: load_sym!(clGetPlatformIDs),
                    clGetPlatformInfo: load_sym!(clGetPlatformInfo),
                    clGetDeviceIDs: load_sym!(clGetDeviceIDs),
                    clGetDeviceInfo: load_sym!(clGetDeviceInfo),
                    clCreateContext: load_sym!(clCreateContext),
                    clCreateContextFromType: load_sym!(clCreateContextFromType),
                    clReleaseContext: load_sym!(clReleaseContext),
                    clGetContextInfo: load_sym!(clGetContextInfo),
                    clCreateCommandQueue: load_sym!(clCreateCommandQueue),
                    clReleaseCommandQueue: load_sym!(clReleaseCommandQueue),
                    clGetCommandQueueInfo: load_sym!(clGetCommandQueueInfo),
                    clFlush: load_sym!(clFlush),
                    clFinish: load_sym!(clFinish),
                    clCreateBuffer: load_sym!(clCreateBuffer),
                    clCreateSubBuffer: load_sym!(clCreateSubBuffer),
                    clReleaseMemObject: load_sym!(clReleaseMemObject),
                    clGetMemObjectInfo: load_sym!(clGetMemObjectInfo),
                    clCreateProgramWithSource: load_sym!(clCreateProgramWithSource),
                    clCreateProgramWithBinary: load_sym!(clCreateProgramWithBinary),
                    clBuildProgram: load_sym!(clBuildProgram),
                    clReleaseProgram: load_sym!(clReleaseProgram),
                    clGetProgramInfo: load_sym!(clGetProgramInfo),
                    clGetProgramBuildInfo: load_sym!(clGetProgramBuildInfo),
                    clCreateKernelsInProgram: load_sym!(clCreateKernelsInProgram),
                    clCreateKernel: load_sym!(clCreateKernel),
                    clReleaseKernel: load_sym!(clReleaseKernel),
                    clGetKernelInfo: load_sym!(clGetKernelInfo),
                    clGetKernelArgInfo: load_sym!(clGetKernelArgInfo),
                    clSetKernelArg: load_sym!(clSetKernelArg),
                    clEnqueueNDRangeKernel: load_sym!(clEnqueueNDRangeKernel),
                    clEnqueueReadBuffer: load_sym!(clEnqueueReadBuffer),
                    clEnqueueWriteBuffer: load_sym!(clEnqueueWriteBuffer),
                    clWaitForEvents: load_sym!(clWaitForEvents),
                    clGetEventInfo: load_sym!(clGetEventInfo),
                    clRetainEvent: load_sym!(clRetainEvent),
                    clReleaseEvent: load_sym!(clReleaseEvent),
                })
            }
        }
    }
}

#[cfg(not(feature = "opencl"))]
mod loading {
    use super::*;

    impl ClDriver {
        /// OpenCL not available without feature
        #[must_use]
        pub fn load() -> Option<&'static Self> {
            None
        }

        /// OpenCL not available without feature
        #[must_use]
        pub fn load_with(_config: &DriverConfig) -> Option<&'static Self> {
            None
        }
    }
}

// ============================================================================
// Error String Conversion
// ============================================================================

/// Convert an OpenCL result code to its symbol
#[must_use]
pub fn cl_error_string(code: cl_int) -> &'static str {
    match code {
        CL_SUCCESS => "CL_SUCCESS",
        CL_DEVICE_NOT_FOUND => "CL_DEVICE_NOT_FOUND",
        CL_DEVICE_NOT_AVAILABLE => "CL_DEVICE_NOT_AVAILABLE",
        CL_COMPILER_NOT_AVAILABLE => "CL_COMPILER_NOT_AVAILABLE",
        CL_MEM_OBJECT_ALLOCATION_FAILURE => "CL_MEM_OBJECT_ALLOCATION_FAILURE",
        CL_OUT_OF_RESOURCES => "CL_OUT_OF_RESOURCES",
        CL_OUT_OF_HOST_MEMORY => "CL_OUT_OF_HOST_MEMORY",
        CL_PROFILING_INFO_NOT_AVAILABLE => "CL_PROFILING_INFO_NOT_AVAILABLE",
        CL_MEM_COPY_OVERLAP => "CL_MEM_COPY_OVERLAP",
        CL_BUILD_PROGRAM_FAILURE => "CL_BUILD_PROGRAM_FAILURE",
        CL_MAP_FAILURE => "CL_MAP_FAILURE",
        CL_MISALIGNED_SUB_BUFFER_OFFSET => "CL_MISALIGNED_SUB_BUFFER_OFFSET",
        CL_EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST => {
            "CL_EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST"
        }
        CL_KERNEL_ARG_INFO_NOT_AVAILABLE => "CL_KERNEL_ARG_INFO_NOT_AVAILABLE",
        CL_INVALID_VALUE => "CL_INVALID_VALUE",
        CL_INVALID_DEVICE_TYPE => "CL_INVALID_DEVICE_TYPE",
        CL_INVALID_PLATFORM => "CL_INVALID_PLATFORM",
        CL_INVALID_DEVICE => "CL_INVALID_DEVICE",
        CL_INVALID_CONTEXT => "CL_INVALID_CONTEXT",
        CL_INVALID_QUEUE_PROPERTIES => "CL_INVALID_QUEUE_PROPERTIES",
        CL_INVALID_COMMAND_QUEUE => "CL_INVALID_COMMAND_QUEUE",
        CL_INVALID_HOST_PTR => "CL_INVALID_HOST_PTR",
        CL_INVALID_MEM_OBJECT => "CL_INVALID_MEM_OBJECT",
        CL_INVALID_BINARY => "CL_INVALID_BINARY",
        CL_INVALID_BUILD_OPTIONS => "CL_INVALID_BUILD_OPTIONS",
        CL_INVALID_PROGRAM => "CL_INVALID_PROGRAM",
        CL_INVALID_PROGRAM_EXECUTABLE => "CL_INVALID_PROGRAM_EXECUTABLE",
        CL_INVALID_KERNEL_NAME => "CL_INVALID_KERNEL_NAME",
        CL_INVALID_KERNEL => "CL_INVALID_KERNEL",
        CL_INVALID_ARG_INDEX => "CL_INVALID_ARG_INDEX",
        CL_INVALID_ARG_VALUE => "CL_INVALID_ARG_VALUE",
        CL_INVALID_ARG_SIZE => "CL_INVALID_ARG_SIZE",
        CL_INVALID_KERNEL_ARGS => "CL_INVALID_KERNEL_ARGS",
        CL_INVALID_WORK_DIMENSION => "CL_INVALID_WORK_DIMENSION",
        CL_INVALID_WORK_GROUP_SIZE => "CL_INVALID_WORK_GROUP_SIZE",
        CL_INVALID_GLOBAL_OFFSET => "CL_INVALID_GLOBAL_OFFSET",
        CL_INVALID_EVENT_WAIT_LIST => "CL_INVALID_EVENT_WAIT_LIST",
        CL_INVALID_EVENT => "CL_INVALID_EVENT",
        CL_INVALID_OPERATION => "CL_INVALID_OPERATION",
        CL_INVALID_BUFFER_SIZE => "CL_INVALID_BUFFER_SIZE",
        CL_INVALID_GLOBAL_WORK_SIZE => "CL_INVALID_GLOBAL_WORK_SIZE",
        CL_INVALID_PROPERTY => "CL_INVALID_PROPERTY",
        _ => "CL_UNKNOWN_ERROR",
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cl_error_string_success() {
        assert_eq!(cl_error_string(CL_SUCCESS), "CL_SUCCESS");
    }

    #[test]
    fn test_cl_error_string_out_of_resources() {
        assert_eq!(cl_error_string(CL_OUT_OF_RESOURCES), "CL_OUT_OF_RESOURCES");
    }

    #[test]
    fn test_cl_error_string_unknown() {
        assert_eq!(cl_error_string(-9999), "CL_UNKNOWN_ERROR");
        assert_eq!(cl_error_string(42), "CL_UNKNOWN_ERROR");
    }

    #[test]
    fn test_constants_match_header() {
        assert_eq!(CL_SUCCESS, 0);
        assert_eq!(CL_MISALIGNED_SUB_BUFFER_OFFSET, -13);
        assert_eq!(CL_INVALID_ARG_INDEX, -49);
        assert_eq!(CL_INVALID_WORK_DIMENSION, -53);
        assert_eq!(CL_INVALID_EVENT_WAIT_LIST, -57);
        assert_eq!(CL_MEM_USE_HOST_PTR, 8);
        assert_eq!(CL_MEM_SIZE, 0x1102);
    }

    #[test]
    fn test_error_codes_are_distinct() {
        let codes = [
            CL_SUCCESS,
            CL_DEVICE_NOT_FOUND,
            CL_OUT_OF_RESOURCES,
            CL_BUILD_PROGRAM_FAILURE,
            CL_MISALIGNED_SUB_BUFFER_OFFSET,
            CL_INVALID_VALUE,
            CL_INVALID_CONTEXT,
            CL_INVALID_MEM_OBJECT,
            CL_INVALID_ARG_INDEX,
            CL_INVALID_WORK_DIMENSION,
            CL_INVALID_EVENT_WAIT_LIST,
        ];
        for i in 0..codes.len() {
            for j in (i + 1)..codes.len() {
                assert_ne!(codes[i], codes[j], "codes at {} and {} are equal", i, j);
            }
        }
    }

    #[test]
    fn test_handle_type_sizes() {
        assert_eq!(std::mem::size_of::<cl_int>(), 4);
        assert_eq!(std::mem::size_of::<cl_bitfield>(), 8);
        assert_eq!(std::mem::size_of::<cl_mem>(), std::mem::size_of::<*mut ()>());
        assert_eq!(std::mem::size_of::<cl_event>(), std::mem::size_of::<*mut ()>());
    }

    #[test]
    fn test_default_config_has_library_names() {
        let config = DriverConfig::default();
        assert!(!config.library_names.is_empty());
    }

    #[test]
    fn test_from_env_prepends_override() {
        std::env::set_var(LIBRARY_ENV, "/opt/cl/libOpenCL.so");
        let config = DriverConfig::from_env();
        std::env::remove_var(LIBRARY_ENV);

        assert_eq!(config.library_names[0], "/opt/cl/libOpenCL.so");
        assert_eq!(
            config.library_names.len(),
            DriverConfig::default().library_names.len() + 1
        );
    }

    #[test]
    #[cfg(not(feature = "opencl"))]
    fn test_driver_load_without_feature() {
        assert!(ClDriver::load().is_none());
        assert!(ClDriver::load_with(&DriverConfig::default()).is_none());
    }
}

// ============================================================================
// Property-Based Tests
// ============================================================================
