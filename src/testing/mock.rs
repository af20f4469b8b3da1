//! In-process OpenCL driver
//!
//! Implements every entry point of [`ClDriver`] against thread-local state.
//! Handles are plain addresses and objects are reference counted with
//! OpenCL 1.2 semantics. Every release, enqueue and info query is logged so
//! tests can assert on exactly what crossed the driver boundary.
//!
//! Behaviour worth knowing:
//!
//! - info queries are strict: a call with a value pointer must pass exactly
//!   the size the driver reported, anything else is `CL_INVALID_VALUE`
//! - buffers own a byte copy of their contents (including `USE_HOST_PTR`
//!   buffers); sub-buffer origins must be multiples of [`SUB_BUFFER_ALIGN`]
//! - kernels are never executed; every event is created `CL_COMPLETE`
//! - argument metadata is only available after a build with
//!   `-cl-kernel-arg-info`

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::ffi::{c_void, CStr};
use std::marker::PhantomData;
use std::mem;
use std::os::raw::c_char;
use std::ptr;

use tracing::trace;

use super::compiler::{self, KernelSig};
use crate::driver::sys::*;
use crate::driver::{DeviceId, KernelHandle, MemHandle, PlatformId};

/// Sub-buffer origins must be multiples of this many bytes
pub const SUB_BUFFER_ALIGN: usize = 16;

const PLATFORM: usize = 0x100;
const FIRST_OBJECT: usize = 0x10_0000;
const ACCESS_MASK: cl_mem_flags = CL_MEM_READ_WRITE | CL_MEM_WRITE_ONLY | CL_MEM_READ_ONLY;
const HOST_MASK: cl_mem_flags = CL_MEM_USE_HOST_PTR | CL_MEM_ALLOC_HOST_PTR | CL_MEM_COPY_HOST_PTR;
const ARG_INFO_FLAG: &str = "-cl-kernel-arg-info";

struct MockDevice {
    id: usize,
    device_type: cl_device_type,
    name: &'static str,
    compute_units: u32,
    max_work_group: usize,
    global_mem: u64,
}

const DEVICES: [MockDevice; 2] = [
    MockDevice {
        id: 0x200,
        device_type: CL_DEVICE_TYPE_GPU,
        name: "Trueno Mock GPU",
        compute_units: 16,
        max_work_group: 256,
        global_mem: 4 << 30,
    },
    MockDevice {
        id: 0x210,
        device_type: CL_DEVICE_TYPE_CPU,
        name: "Trueno Mock CPU",
        compute_units: 8,
        max_work_group: 1024,
        global_mem: 8 << 30,
    },
];

// ============================================================================
// Public Types
// ============================================================================

/// Object families tracked by the mock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandleKind {
    /// `cl_context`
    Context,
    /// `cl_command_queue`
    Queue,
    /// `cl_mem`
    Mem,
    /// `cl_program`
    Program,
    /// `cl_kernel`
    Kernel,
    /// `cl_event`
    Event,
}

/// Value bound to a kernel argument
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoundArg {
    /// Memory object address (0 for a NULL buffer)
    Mem(usize),
    /// Local memory size in bytes
    Local(usize),
    /// By-value bytes
    Value(Vec<u8>),
}

/// One call to an enqueue entry point, successful or not
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnqueueRecord {
    /// Entry point name
    pub command: &'static str,
    /// Queue address
    pub queue: usize,
    /// Blocking flag (transfers only)
    pub blocking: bool,
    /// Byte offset (transfers only)
    pub offset: usize,
    /// Byte count (transfers only)
    pub size: usize,
    /// Host pointer address (transfers only)
    pub host_ptr: usize,
    /// Work dimension (kernels only)
    pub work_dim: u32,
    /// `num_events_in_wait_list`
    pub num_events: u32,
    /// Whether `event_wait_list` was NULL
    pub wait_list_null: bool,
    /// Wait-list addresses in order
    pub wait_list: Vec<usize>,
    /// Whether an output event was requested
    pub event_requested: bool,
    /// Output event address, 0 if none was created
    pub event: usize,
    /// Returned code
    pub result: cl_int,
}

/// One call to a `clGet*Info` entry point
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryRecord {
    /// Entry point name
    pub function: &'static str,
    /// `param_name`
    pub param: cl_uint,
    /// `param_value_size` as passed
    pub size: usize,
    /// Whether `param_value` was NULL
    pub value_null: bool,
    /// Size the driver reported
    pub required: usize,
    /// Returned code
    pub result: cl_int,
}

// ============================================================================
// State
// ============================================================================

struct MockContext {
    refs: u32,
    devices: Vec<usize>,
    properties: Vec<cl_context_properties>,
}

struct MockQueue {
    refs: u32,
    context: usize,
    device: usize,
    properties: cl_command_queue_properties,
}

enum Storage {
    Owned(Vec<u8>),
    Sub { parent: usize, origin: usize },
}

struct MockMem {
    refs: u32,
    context: usize,
    flags: cl_mem_flags,
    size: usize,
    host_ptr: usize,
    storage: Storage,
}

struct DeviceBuild {
    status: cl_int,
    options: String,
    log: String,
}

struct MockProgram {
    refs: u32,
    context: usize,
    devices: Vec<usize>,
    source: String,
    text: String,
    builds: HashMap<usize, DeviceBuild>,
    kernels: Option<Vec<KernelSig>>,
    arg_info: bool,
}

struct MockKernel {
    refs: u32,
    program: usize,
    context: usize,
    sig: KernelSig,
    arg_info: bool,
    args: Vec<Option<BoundArg>>,
}

struct MockEvent {
    refs: u32,
    queue: usize,
    context: usize,
    command_type: cl_uint,
}

#[derive(Default)]
struct MockState {
    next_id: usize,
    contexts: HashMap<usize, MockContext>,
    queues: HashMap<usize, MockQueue>,
    mems: HashMap<usize, MockMem>,
    programs: HashMap<usize, MockProgram>,
    kernels: HashMap<usize, MockKernel>,
    events: HashMap<usize, MockEvent>,
    releases: Vec<(HandleKind, usize)>,
    enqueues: Vec<EnqueueRecord>,
    queries: Vec<QueryRecord>,
    failures: HashMap<&'static str, VecDeque<cl_int>>,
}

thread_local! {
    static STATE: RefCell<MockState> = RefCell::new(MockState::default());
}

fn with_state<R>(f: impl FnOnce(&mut MockState) -> R) -> R {
    STATE.with(|cell| f(&mut cell.borrow_mut()))
}

type Reply = Result<Vec<u8>, cl_int>;

impl MockState {
    fn fail(&mut self, function: &'static str) -> Result<(), cl_int> {
        match self.failures.get_mut(function).and_then(VecDeque::pop_front) {
            Some(code) => {
                trace!("mock: injected {} into {}", cl_error_string(code), function);
                Err(code)
            }
            None => Ok(()),
        }
    }

    fn allocate_id(&mut self) -> usize {
        self.next_id = if self.next_id < FIRST_OBJECT {
            FIRST_OBJECT
        } else {
            self.next_id + 0x10
        };
        self.next_id
    }

    fn live(&self, kind: HandleKind) -> usize {
        match kind {
            HandleKind::Context => self.contexts.len(),
            HandleKind::Queue => self.queues.len(),
            HandleKind::Mem => self.mems.len(),
            HandleKind::Program => self.programs.len(),
            HandleKind::Kernel => self.kernels.len(),
            HandleKind::Event => self.events.len(),
        }
    }

    fn refs(&self, kind: HandleKind, id: usize) -> Option<u32> {
        match kind {
            HandleKind::Context => self.contexts.get(&id).map(|o| o.refs),
            HandleKind::Queue => self.queues.get(&id).map(|o| o.refs),
            HandleKind::Mem => self.mems.get(&id).map(|o| o.refs),
            HandleKind::Program => self.programs.get(&id).map(|o| o.refs),
            HandleKind::Kernel => self.kernels.get(&id).map(|o| o.refs),
            HandleKind::Event => self.events.get(&id).map(|o| o.refs),
        }
    }

    /// Root storage and base offset of a buffer or sub-buffer
    fn backing(&mut self, id: usize) -> Option<(&mut Vec<u8>, usize)> {
        let (root, base) = match self.mems.get(&id)?.storage {
            Storage::Owned(_) => (id, 0),
            Storage::Sub { parent, origin } => (parent, origin),
        };
        match &mut self.mems.get_mut(&root)?.storage {
            Storage::Owned(data) => Some((data, base)),
            Storage::Sub { .. } => None,
        }
    }

    fn release_mem(&mut self, id: usize) -> Result<(), cl_int> {
        let mem = self.mems.get_mut(&id).ok_or(CL_INVALID_MEM_OBJECT)?;
        mem.refs -= 1;
        if mem.refs == 0 {
            if let Some(MockMem {
                storage: Storage::Sub { parent, .. },
                ..
            }) = self.mems.remove(&id)
            {
                let _ = self.release_mem(parent);
            }
        }
        Ok(())
    }

    fn check_wait_list(&self, count: cl_uint, list_null: bool, waits: &[usize]) -> Result<(), cl_int> {
        if (count == 0) != list_null || waits.iter().any(|e| !self.events.contains_key(e)) {
            return Err(CL_INVALID_EVENT_WAIT_LIST);
        }
        Ok(())
    }

    fn new_event(&mut self, queue: usize, command_type: cl_uint, wanted: bool) -> usize {
        if !wanted {
            return 0;
        }
        let context = self.queues.get(&queue).map_or(0, |q| q.context);
        let id = self.allocate_id();
        self.events.insert(
            id,
            MockEvent {
                refs: 1,
                queue,
                context,
                command_type,
            },
        );
        id
    }

    /// Queue and buffer lookup shared by both transfer directions
    fn transfer_target(&mut self, queue: usize, mem: usize, offset: usize, size: usize) -> Result<(), cl_int> {
        let q = self.queues.get(&queue).ok_or(CL_INVALID_COMMAND_QUEUE)?;
        let m = self.mems.get(&mem).ok_or(CL_INVALID_MEM_OBJECT)?;
        if q.context != m.context {
            return Err(CL_INVALID_CONTEXT);
        }
        if size == 0 || offset.checked_add(size).map_or(true, |end| end > m.size) {
            return Err(CL_INVALID_VALUE);
        }
        Ok(())
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn id(handle: *mut c_void) -> usize {
    handle as usize
}

fn handle(id: usize) -> *mut c_void {
    id as *mut c_void
}

/// Write through an optional out-pointer
unsafe fn store<T>(out: *mut T, value: T) {
    if !out.is_null() {
        // SAFETY: caller guarantees a non-null `out` is writable
        unsafe { out.write(value) };
    }
}

/// Borrow a caller array; NULL or zero-length yields an empty slice
unsafe fn slice_of<'a, T>(data: *const T, len: usize) -> &'a [T] {
    if data.is_null() || len == 0 {
        &[]
    } else {
        // SAFETY: caller guarantees `data` addresses `len` readable elements
        unsafe { std::slice::from_raw_parts(data, len) }
    }
}

fn ids(handles: &[*mut c_void]) -> Vec<usize> {
    handles.iter().map(|&h| id(h)).collect()
}

unsafe fn created(result: Result<usize, cl_int>, errcode_ret: *mut cl_int) -> *mut c_void {
    let (code, object) = match result {
        Ok(object) => (CL_SUCCESS, handle(object)),
        Err(code) => (code, ptr::null_mut()),
    };
    // SAFETY: errcode_ret is NULL or writable per the entry point contract
    unsafe { store(errcode_ret, code) };
    object
}

fn code(result: Result<(), cl_int>) -> cl_int {
    match result {
        Ok(()) => CL_SUCCESS,
        Err(code) => code,
    }
}

fn text(s: &str) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(s.len() + 1);
    bytes.extend_from_slice(s.as_bytes());
    bytes.push(0);
    bytes
}

fn word(value: u32) -> Vec<u8> {
    value.to_ne_bytes().to_vec()
}

fn signed(value: i32) -> Vec<u8> {
    value.to_ne_bytes().to_vec()
}

fn long(value: u64) -> Vec<u8> {
    value.to_ne_bytes().to_vec()
}

fn size(value: usize) -> Vec<u8> {
    value.to_ne_bytes().to_vec()
}

fn sizes(values: &[usize]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_ne_bytes()).collect()
}

/// Answer an info query with strict two-phase sizing
unsafe fn respond(
    function: &'static str,
    param: cl_uint,
    reply: Reply,
    value_size: usize,
    value: *mut c_void,
    size_ret: *mut usize,
) -> cl_int {
    let (result, bytes) = match reply {
        Ok(bytes) if !value.is_null() && value_size != bytes.len() => (CL_INVALID_VALUE, bytes),
        Ok(bytes) => (CL_SUCCESS, bytes),
        Err(code) => (code, Vec::new()),
    };
    with_state(|s| {
        s.queries.push(QueryRecord {
            function,
            param,
            size: value_size,
            value_null: value.is_null(),
            required: bytes.len(),
            result,
        });
    });
    if result != CL_SUCCESS {
        return result;
    }
    // SAFETY: size_ret is NULL or writable; value holds value_size == bytes.len() bytes
    unsafe {
        store(size_ret, bytes.len());
        if !value.is_null() && !bytes.is_empty() {
            ptr::copy_nonoverlapping(bytes.as_ptr(), value.cast::<u8>(), bytes.len());
        }
    }
    CL_SUCCESS
}

fn device(id: usize) -> Option<&'static MockDevice> {
    DEVICES.iter().find(|d| d.id == id)
}

fn matching_devices(device_type: cl_device_type) -> Vec<usize> {
    DEVICES
        .iter()
        .enumerate()
        .filter(|(i, d)| {
            device_type == CL_DEVICE_TYPE_ALL
                || d.device_type & device_type != 0
                || (device_type & CL_DEVICE_TYPE_DEFAULT != 0 && *i == 0)
        })
        .map(|(_, d)| d.id)
        .collect()
}

/// Read and validate a zero-terminated context property list
unsafe fn property_list(properties: *const cl_context_properties) -> Result<Vec<cl_context_properties>, cl_int> {
    let mut list = Vec::new();
    if properties.is_null() {
        return Ok(list);
    }
    let mut at = properties;
    loop {
        // SAFETY: the list is zero-terminated key/value pairs
        let key = unsafe { at.read() };
        list.push(key);
        if key == 0 {
            return Ok(list);
        }
        // SAFETY: every non-zero key is followed by its value
        let value = unsafe { at.add(1).read() };
        list.push(value);
        match key {
            CL_CONTEXT_PLATFORM if value as usize != PLATFORM => return Err(CL_INVALID_PLATFORM),
            CL_CONTEXT_PLATFORM => {}
            _ => return Err(CL_INVALID_PROPERTY),
        }
        // SAFETY: advancing past the pair just read
        at = unsafe { at.add(2) };
    }
}

fn validate_mem_flags(flags: cl_mem_flags) -> Result<(), cl_int> {
    if flags & !(ACCESS_MASK | HOST_MASK) != 0
        || (flags & ACCESS_MASK).count_ones() > 1
        || (flags & CL_MEM_USE_HOST_PTR != 0
            && flags & (CL_MEM_ALLOC_HOST_PTR | CL_MEM_COPY_HOST_PTR) != 0)
    {
        return Err(CL_INVALID_VALUE);
    }
    Ok(())
}

// ============================================================================
// Platform / Device
// ============================================================================

unsafe extern "C" fn get_platform_ids(
    num_entries: cl_uint,
    platforms: *mut cl_platform_id,
    num_platforms: *mut cl_uint,
) -> cl_int {
    if let Err(code) = with_state(|s| s.fail("clGetPlatformIDs")) {
        return code;
    }
    if (platforms.is_null() && num_platforms.is_null()) || (!platforms.is_null() && num_entries == 0) {
        return CL_INVALID_VALUE;
    }
    // SAFETY: platforms has room for num_entries >= 1 handles; counts are writable
    unsafe {
        store(platforms, handle(PLATFORM));
        store(num_platforms, 1);
    }
    CL_SUCCESS
}

unsafe extern "C" fn get_platform_info(
    platform: cl_platform_id,
    param: cl_uint,
    value_size: usize,
    value: *mut c_void,
    size_ret: *mut usize,
) -> cl_int {
    let reply = with_state(|s| -> Reply {
        s.fail("clGetPlatformInfo")?;
        if !platform.is_null() && id(platform) != PLATFORM {
            return Err(CL_INVALID_PLATFORM);
        }
        Ok(match param {
            CL_PLATFORM_PROFILE => text("FULL_PROFILE"),
            CL_PLATFORM_VERSION => text("OpenCL 1.2 trueno-cl mock"),
            CL_PLATFORM_NAME => text("Trueno Mock Platform"),
            CL_PLATFORM_VENDOR => text("Pragmatic AI Labs"),
            CL_PLATFORM_EXTENSIONS => text("cl_khr_icd cl_khr_fp64"),
            _ => return Err(CL_INVALID_VALUE),
        })
    });
    // SAFETY: forwarding the caller's out-pointers
    unsafe { respond("clGetPlatformInfo", param, reply, value_size, value, size_ret) }
}

unsafe extern "C" fn get_device_ids(
    platform: cl_platform_id,
    device_type: cl_device_type,
    num_entries: cl_uint,
    devices: *mut cl_device_id,
    num_devices: *mut cl_uint,
) -> cl_int {
    if let Err(code) = with_state(|s| s.fail("clGetDeviceIDs")) {
        return code;
    }
    if !platform.is_null() && id(platform) != PLATFORM {
        return CL_INVALID_PLATFORM;
    }
    if device_type == 0 {
        return CL_INVALID_DEVICE_TYPE;
    }
    if (devices.is_null() && num_devices.is_null()) || (!devices.is_null() && num_entries == 0) {
        return CL_INVALID_VALUE;
    }
    let found = matching_devices(device_type);
    if found.is_empty() {
        return CL_DEVICE_NOT_FOUND;
    }
    // SAFETY: devices has room for num_entries handles; counts are writable
    unsafe {
        if !devices.is_null() {
            for (i, &d) in found.iter().take(num_entries as usize).enumerate() {
                devices.add(i).write(handle(d));
            }
        }
        store(num_devices, found.len() as cl_uint);
    }
    CL_SUCCESS
}

unsafe extern "C" fn get_device_info(
    dev: cl_device_id,
    param: cl_uint,
    value_size: usize,
    value: *mut c_void,
    size_ret: *mut usize,
) -> cl_int {
    let reply = with_state(|s| -> Reply {
        s.fail("clGetDeviceInfo")?;
        let d = device(id(dev)).ok_or(CL_INVALID_DEVICE)?;
        Ok(match param {
            CL_DEVICE_TYPE => long(d.device_type),
            CL_DEVICE_MAX_COMPUTE_UNITS => word(d.compute_units),
            CL_DEVICE_MAX_WORK_GROUP_SIZE => size(d.max_work_group),
            CL_DEVICE_GLOBAL_MEM_SIZE => long(d.global_mem),
            CL_DEVICE_NAME => text(d.name),
            CL_DEVICE_VENDOR => text("Pragmatic AI Labs"),
            CL_DRIVER_VERSION => text("1.0.0"),
            CL_DEVICE_VERSION => text("OpenCL 1.2 trueno-cl mock"),
            CL_DEVICE_EXTENSIONS => text("cl_khr_fp64 cl_khr_global_int32_base_atomics"),
            CL_DEVICE_PLATFORM => size(PLATFORM),
            _ => return Err(CL_INVALID_VALUE),
        })
    });
    // SAFETY: forwarding the caller's out-pointers
    unsafe { respond("clGetDeviceInfo", param, reply, value_size, value, size_ret) }
}

// ============================================================================
// Context
// ============================================================================

fn insert_context(s: &mut MockState, devices: Vec<usize>, properties: Vec<cl_context_properties>) -> usize {
    let ctx = s.allocate_id();
    s.contexts.insert(
        ctx,
        MockContext {
            refs: 1,
            devices,
            properties,
        },
    );
    ctx
}

unsafe extern "C" fn create_context(
    properties: *const cl_context_properties,
    num_devices: cl_uint,
    devices: *const cl_device_id,
    _pfn_notify: ContextNotify,
    _user_data: *mut c_void,
    errcode_ret: *mut cl_int,
) -> cl_context {
    let result = with_state(|s| -> Result<usize, cl_int> {
        s.fail("clCreateContext")?;
        // SAFETY: zero-terminated list per the entry point contract
        let properties = unsafe { property_list(properties) }?;
        // SAFETY: devices holds num_devices handles
        let devices = ids(unsafe { slice_of(devices, num_devices as usize) });
        if devices.is_empty() {
            return Err(CL_INVALID_VALUE);
        }
        if devices.iter().any(|&d| device(d).is_none()) {
            return Err(CL_INVALID_DEVICE);
        }
        Ok(insert_context(s, devices, properties))
    });
    // SAFETY: errcode_ret is NULL or writable
    unsafe { created(result, errcode_ret) }
}

unsafe extern "C" fn create_context_from_type(
    properties: *const cl_context_properties,
    device_type: cl_device_type,
    _pfn_notify: ContextNotify,
    _user_data: *mut c_void,
    errcode_ret: *mut cl_int,
) -> cl_context {
    let result = with_state(|s| -> Result<usize, cl_int> {
        s.fail("clCreateContextFromType")?;
        // SAFETY: zero-terminated list per the entry point contract
        let properties = unsafe { property_list(properties) }?;
        if device_type == 0 {
            return Err(CL_INVALID_DEVICE_TYPE);
        }
        let devices = matching_devices(device_type);
        if devices.is_empty() {
            return Err(CL_DEVICE_NOT_FOUND);
        }
        Ok(insert_context(s, devices, properties))
    });
    // SAFETY: errcode_ret is NULL or writable
    unsafe { created(result, errcode_ret) }
}

unsafe extern "C" fn release_context(context: cl_context) -> cl_int {
    code(with_state(|s| {
        s.releases.push((HandleKind::Context, id(context)));
        s.fail("clReleaseContext")?;
        let ctx = s.contexts.get_mut(&id(context)).ok_or(CL_INVALID_CONTEXT)?;
        ctx.refs -= 1;
        if ctx.refs == 0 {
            s.contexts.remove(&id(context));
        }
        Ok(())
    }))
}

unsafe extern "C" fn get_context_info(
    context: cl_context,
    param: cl_uint,
    value_size: usize,
    value: *mut c_void,
    size_ret: *mut usize,
) -> cl_int {
    let reply = with_state(|s| -> Reply {
        s.fail("clGetContextInfo")?;
        let ctx = s.contexts.get(&id(context)).ok_or(CL_INVALID_CONTEXT)?;
        Ok(match param {
            CL_CONTEXT_REFERENCE_COUNT => word(ctx.refs),
            CL_CONTEXT_DEVICES => sizes(&ctx.devices),
            CL_CONTEXT_PROPERTIES => ctx.properties.iter().flat_map(|p| p.to_ne_bytes()).collect(),
            CL_CONTEXT_NUM_DEVICES => word(ctx.devices.len() as u32),
            _ => return Err(CL_INVALID_VALUE),
        })
    });
    // SAFETY: forwarding the caller's out-pointers
    unsafe { respond("clGetContextInfo", param, reply, value_size, value, size_ret) }
}

// ============================================================================
// Command Queue
// ============================================================================

unsafe extern "C" fn create_command_queue(
    context: cl_context,
    dev: cl_device_id,
    properties: cl_command_queue_properties,
    errcode_ret: *mut cl_int,
) -> cl_command_queue {
    let result = with_state(|s| -> Result<usize, cl_int> {
        s.fail("clCreateCommandQueue")?;
        let ctx = s.contexts.get(&id(context)).ok_or(CL_INVALID_CONTEXT)?;
        if !ctx.devices.contains(&id(dev)) {
            return Err(CL_INVALID_DEVICE);
        }
        let supported = CL_QUEUE_OUT_OF_ORDER_EXEC_MODE_ENABLE | CL_QUEUE_PROFILING_ENABLE;
        if properties & !supported != 0 {
            return Err(CL_INVALID_QUEUE_PROPERTIES);
        }
        let queue = s.allocate_id();
        s.queues.insert(
            queue,
            MockQueue {
                refs: 1,
                context: id(context),
                device: id(dev),
                properties,
            },
        );
        Ok(queue)
    });
    // SAFETY: errcode_ret is NULL or writable
    unsafe { created(result, errcode_ret) }
}

unsafe extern "C" fn release_command_queue(queue: cl_command_queue) -> cl_int {
    code(with_state(|s| {
        s.releases.push((HandleKind::Queue, id(queue)));
        s.fail("clReleaseCommandQueue")?;
        let q = s.queues.get_mut(&id(queue)).ok_or(CL_INVALID_COMMAND_QUEUE)?;
        q.refs -= 1;
        if q.refs == 0 {
            s.queues.remove(&id(queue));
        }
        Ok(())
    }))
}

unsafe extern "C" fn get_command_queue_info(
    queue: cl_command_queue,
    param: cl_uint,
    value_size: usize,
    value: *mut c_void,
    size_ret: *mut usize,
) -> cl_int {
    let reply = with_state(|s| -> Reply {
        s.fail("clGetCommandQueueInfo")?;
        let q = s.queues.get(&id(queue)).ok_or(CL_INVALID_COMMAND_QUEUE)?;
        Ok(match param {
            CL_QUEUE_CONTEXT => size(q.context),
            CL_QUEUE_DEVICE => size(q.device),
            CL_QUEUE_REFERENCE_COUNT => word(q.refs),
            CL_QUEUE_PROPERTIES => long(q.properties),
            CL_QUEUE_SIZE => word(0),
            _ => return Err(CL_INVALID_VALUE),
        })
    });
    // SAFETY: forwarding the caller's out-pointers
    unsafe { respond("clGetCommandQueueInfo", param, reply, value_size, value, size_ret) }
}

unsafe extern "C" fn flush(queue: cl_command_queue) -> cl_int {
    code(with_state(|s| {
        s.fail("clFlush")?;
        s.queues.get(&id(queue)).map(|_| ()).ok_or(CL_INVALID_COMMAND_QUEUE)
    }))
}

unsafe extern "C" fn finish(queue: cl_command_queue) -> cl_int {
    code(with_state(|s| {
        s.fail("clFinish")?;
        s.queues.get(&id(queue)).map(|_| ()).ok_or(CL_INVALID_COMMAND_QUEUE)
    }))
}

// ============================================================================
// Memory
// ============================================================================

unsafe extern "C" fn create_buffer(
    context: cl_context,
    flags: cl_mem_flags,
    bytes: usize,
    host_ptr: *mut c_void,
    errcode_ret: *mut cl_int,
) -> cl_mem {
    let result = with_state(|s| -> Result<usize, cl_int> {
        s.fail("clCreateBuffer")?;
        if !s.contexts.contains_key(&id(context)) {
            return Err(CL_INVALID_CONTEXT);
        }
        if bytes == 0 {
            return Err(CL_INVALID_BUFFER_SIZE);
        }
        validate_mem_flags(flags)?;
        let wants_host = flags & (CL_MEM_USE_HOST_PTR | CL_MEM_COPY_HOST_PTR) != 0;
        if wants_host == host_ptr.is_null() {
            return Err(CL_INVALID_HOST_PTR);
        }
        let data = if wants_host {
            // SAFETY: host_ptr addresses `bytes` readable bytes
            unsafe { slice_of(host_ptr.cast::<u8>().cast_const(), bytes) }.to_vec()
        } else {
            vec![0; bytes]
        };
        let mem = s.allocate_id();
        s.mems.insert(
            mem,
            MockMem {
                refs: 1,
                context: id(context),
                flags,
                size: bytes,
                host_ptr: if flags & CL_MEM_USE_HOST_PTR != 0 { id(host_ptr) } else { 0 },
                storage: Storage::Owned(data),
            },
        );
        Ok(mem)
    });
    // SAFETY: errcode_ret is NULL or writable
    unsafe { created(result, errcode_ret) }
}

unsafe extern "C" fn create_sub_buffer(
    buffer: cl_mem,
    flags: cl_mem_flags,
    create_type: cl_uint,
    create_info: *const c_void,
    errcode_ret: *mut cl_int,
) -> cl_mem {
    let result = with_state(|s| -> Result<usize, cl_int> {
        s.fail("clCreateSubBuffer")?;
        let parent_id = id(buffer);
        let parent = s.mems.get(&parent_id).ok_or(CL_INVALID_MEM_OBJECT)?;
        if matches!(parent.storage, Storage::Sub { .. }) {
            return Err(CL_INVALID_MEM_OBJECT);
        }
        if create_type != CL_BUFFER_CREATE_TYPE_REGION || create_info.is_null() {
            return Err(CL_INVALID_VALUE);
        }
        // SAFETY: region creation info is a cl_buffer_region
        let region = unsafe { create_info.cast::<cl_buffer_region>().read_unaligned() };
        if region.size == 0 {
            return Err(CL_INVALID_BUFFER_SIZE);
        }
        if region.origin.checked_add(region.size).map_or(true, |end| end > parent.size) {
            return Err(CL_INVALID_VALUE);
        }
        if flags & HOST_MASK != 0 {
            return Err(CL_INVALID_VALUE);
        }
        validate_mem_flags(flags)?;
        if region.origin % SUB_BUFFER_ALIGN != 0 {
            return Err(CL_MISALIGNED_SUB_BUFFER_OFFSET);
        }

        let access = if flags & ACCESS_MASK == 0 {
            parent.flags & ACCESS_MASK
        } else {
            flags & ACCESS_MASK
        };
        let sub = MockMem {
            refs: 1,
            context: parent.context,
            flags: access | (parent.flags & HOST_MASK),
            size: region.size,
            host_ptr: if parent.host_ptr == 0 { 0 } else { parent.host_ptr + region.origin },
            storage: Storage::Sub {
                parent: parent_id,
                origin: region.origin,
            },
        };
        if let Some(parent) = s.mems.get_mut(&parent_id) {
            parent.refs += 1;
        }
        let mem = s.allocate_id();
        s.mems.insert(mem, sub);
        Ok(mem)
    });
    // SAFETY: errcode_ret is NULL or writable
    unsafe { created(result, errcode_ret) }
}

unsafe extern "C" fn release_mem_object(mem: cl_mem) -> cl_int {
    code(with_state(|s| {
        s.releases.push((HandleKind::Mem, id(mem)));
        s.fail("clReleaseMemObject")?;
        s.release_mem(id(mem))
    }))
}

unsafe extern "C" fn get_mem_object_info(
    mem: cl_mem,
    param: cl_uint,
    value_size: usize,
    value: *mut c_void,
    size_ret: *mut usize,
) -> cl_int {
    let reply = with_state(|s| -> Reply {
        s.fail("clGetMemObjectInfo")?;
        let m = s.mems.get(&id(mem)).ok_or(CL_INVALID_MEM_OBJECT)?;
        let (parent, origin) = match m.storage {
            Storage::Owned(_) => (0, 0),
            Storage::Sub { parent, origin } => (parent, origin),
        };
        Ok(match param {
            CL_MEM_TYPE => word(CL_MEM_OBJECT_BUFFER),
            CL_MEM_FLAGS => long(m.flags),
            CL_MEM_SIZE => size(m.size),
            CL_MEM_HOST_PTR => size(m.host_ptr),
            CL_MEM_MAP_COUNT => word(0),
            CL_MEM_REFERENCE_COUNT => word(m.refs),
            CL_MEM_CONTEXT => size(m.context),
            CL_MEM_ASSOCIATED_MEMOBJECT => size(parent),
            CL_MEM_OFFSET => size(origin),
            _ => return Err(CL_INVALID_VALUE),
        })
    });
    // SAFETY: forwarding the caller's out-pointers
    unsafe { respond("clGetMemObjectInfo", param, reply, value_size, value, size_ret) }
}

// ============================================================================
// Program
// ============================================================================

fn insert_program(s: &mut MockState, context: usize, devices: Vec<usize>, source: String, text: String) -> usize {
    let program = s.allocate_id();
    s.programs.insert(
        program,
        MockProgram {
            refs: 1,
            context,
            devices,
            source,
            text,
            builds: HashMap::new(),
            kernels: None,
            arg_info: false,
        },
    );
    program
}

unsafe extern "C" fn create_program_with_source(
    context: cl_context,
    count: cl_uint,
    strings: *const *const c_char,
    lengths: *const usize,
    errcode_ret: *mut cl_int,
) -> cl_program {
    let result = with_state(|s| -> Result<usize, cl_int> {
        s.fail("clCreateProgramWithSource")?;
        let devices = s
            .contexts
            .get(&id(context))
            .ok_or(CL_INVALID_CONTEXT)?
            .devices
            .clone();
        // SAFETY: strings holds `count` pointers
        let pieces = unsafe { slice_of(strings, count as usize) };
        if pieces.is_empty() {
            return Err(CL_INVALID_VALUE);
        }
        // SAFETY: lengths is NULL or holds `count` entries
        let lengths = unsafe { slice_of(lengths, count as usize) };
        let mut source = String::new();
        for (i, &piece) in pieces.iter().enumerate() {
            if piece.is_null() {
                return Err(CL_INVALID_VALUE);
            }
            let len = lengths.get(i).copied().unwrap_or(0);
            // SAFETY: each piece is NUL-terminated or has an explicit length
            let bytes = unsafe {
                if len == 0 {
                    CStr::from_ptr(piece).to_bytes()
                } else {
                    slice_of(piece.cast::<u8>(), len)
                }
            };
            source.push_str(&String::from_utf8_lossy(bytes));
        }
        Ok(insert_program(s, id(context), devices, source.clone(), source))
    });
    // SAFETY: errcode_ret is NULL or writable
    unsafe { created(result, errcode_ret) }
}

unsafe extern "C" fn create_program_with_binary(
    context: cl_context,
    num_devices: cl_uint,
    device_list: *const cl_device_id,
    lengths: *const usize,
    binaries: *const *const u8,
    binary_status: *mut cl_int,
    errcode_ret: *mut cl_int,
) -> cl_program {
    let n = num_devices as usize;
    let result = with_state(|s| -> Result<usize, cl_int> {
        s.fail("clCreateProgramWithBinary")?;
        let ctx = s.contexts.get(&id(context)).ok_or(CL_INVALID_CONTEXT)?;
        // SAFETY: each array holds num_devices entries
        let (devices, lengths, binaries) = unsafe {
            (
                ids(slice_of(device_list, n)),
                slice_of(lengths, n),
                slice_of(binaries, n),
            )
        };
        if n == 0 || devices.len() != n || lengths.len() != n || binaries.len() != n {
            return Err(CL_INVALID_VALUE);
        }
        if devices.iter().any(|d| !ctx.devices.contains(d)) {
            return Err(CL_INVALID_DEVICE);
        }
        let statuses: Vec<cl_int> = lengths
            .iter()
            .zip(binaries)
            .map(|(&len, bin)| if len == 0 || bin.is_null() { CL_INVALID_VALUE } else { CL_SUCCESS })
            .collect();
        if !binary_status.is_null() {
            for (i, &status) in statuses.iter().enumerate() {
                // SAFETY: binary_status holds num_devices entries
                unsafe { binary_status.add(i).write(status) };
            }
        }
        if statuses.iter().any(|&st| st != CL_SUCCESS) {
            return Err(CL_INVALID_VALUE);
        }
        // The mock "binary" format is source text
        // SAFETY: binaries[0] addresses lengths[0] bytes
        let text = String::from_utf8_lossy(unsafe { slice_of(binaries[0], lengths[0]) }).into_owned();
        Ok(insert_program(s, id(context), devices, String::new(), text))
    });
    // SAFETY: errcode_ret is NULL or writable
    unsafe { created(result, errcode_ret) }
}

unsafe extern "C" fn build_program(
    program: cl_program,
    num_devices: cl_uint,
    device_list: *const cl_device_id,
    options: *const c_char,
    _pfn_notify: BuildNotify,
    _user_data: *mut c_void,
) -> cl_int {
    let options = if options.is_null() {
        String::new()
    } else {
        // SAFETY: options is NUL-terminated
        unsafe { CStr::from_ptr(options) }.to_string_lossy().into_owned()
    };
    // SAFETY: device_list holds num_devices handles
    let requested = ids(unsafe { slice_of(device_list, num_devices as usize) });
    code(with_state(|s| {
        s.fail("clBuildProgram")?;
        let prog = s.programs.get_mut(&id(program)).ok_or(CL_INVALID_PROGRAM)?;
        if (num_devices == 0) != device_list.is_null() {
            return Err(CL_INVALID_VALUE);
        }
        let targets = if requested.is_empty() {
            prog.devices.clone()
        } else {
            requested
        };
        if targets.iter().any(|d| !prog.devices.contains(d)) {
            return Err(CL_INVALID_DEVICE);
        }
        if options.split_whitespace().any(|o| !o.starts_with('-')) {
            return Err(CL_INVALID_BUILD_OPTIONS);
        }

        let outcome = compiler::compile(&prog.text);
        let (status, log) = match &outcome {
            Ok(_) => (CL_BUILD_SUCCESS, String::new()),
            Err(log) => (CL_BUILD_ERROR, format!("{}\n", log)),
        };
        for device in targets {
            prog.builds.insert(
                device,
                DeviceBuild {
                    status,
                    options: options.clone(),
                    log: log.clone(),
                },
            );
        }
        match outcome {
            Ok(kernels) => {
                prog.kernels = Some(kernels);
                prog.arg_info = options.split_whitespace().any(|o| o == ARG_INFO_FLAG);
                Ok(())
            }
            Err(_) => Err(CL_BUILD_PROGRAM_FAILURE),
        }
    }))
}

unsafe extern "C" fn release_program(program: cl_program) -> cl_int {
    code(with_state(|s| {
        s.releases.push((HandleKind::Program, id(program)));
        s.fail("clReleaseProgram")?;
        let prog = s.programs.get_mut(&id(program)).ok_or(CL_INVALID_PROGRAM)?;
        prog.refs -= 1;
        if prog.refs == 0 {
            s.programs.remove(&id(program));
        }
        Ok(())
    }))
}

unsafe extern "C" fn get_program_info(
    program: cl_program,
    param: cl_uint,
    value_size: usize,
    value: *mut c_void,
    size_ret: *mut usize,
) -> cl_int {
    let reply = with_state(|s| -> Reply {
        s.fail("clGetProgramInfo")?;
        let prog = s.programs.get(&id(program)).ok_or(CL_INVALID_PROGRAM)?;
        let built = || prog.kernels.as_ref().ok_or(CL_INVALID_PROGRAM_EXECUTABLE);
        Ok(match param {
            CL_PROGRAM_REFERENCE_COUNT => word(prog.refs),
            CL_PROGRAM_CONTEXT => size(prog.context),
            CL_PROGRAM_NUM_DEVICES => word(prog.devices.len() as u32),
            CL_PROGRAM_DEVICES => sizes(&prog.devices),
            CL_PROGRAM_SOURCE => text(&prog.source),
            CL_PROGRAM_NUM_KERNELS => size(built()?.len()),
            CL_PROGRAM_KERNEL_NAMES => {
                let names: Vec<&str> = built()?.iter().map(|k| k.name.as_str()).collect();
                text(&names.join(";"))
            }
            _ => return Err(CL_INVALID_VALUE),
        })
    });
    // SAFETY: forwarding the caller's out-pointers
    unsafe { respond("clGetProgramInfo", param, reply, value_size, value, size_ret) }
}

unsafe extern "C" fn get_program_build_info(
    program: cl_program,
    dev: cl_device_id,
    param: cl_uint,
    value_size: usize,
    value: *mut c_void,
    size_ret: *mut usize,
) -> cl_int {
    let reply = with_state(|s| -> Reply {
        s.fail("clGetProgramBuildInfo")?;
        let prog = s.programs.get(&id(program)).ok_or(CL_INVALID_PROGRAM)?;
        if !prog.devices.contains(&id(dev)) {
            return Err(CL_INVALID_DEVICE);
        }
        let build = prog.builds.get(&id(dev));
        Ok(match param {
            CL_PROGRAM_BUILD_STATUS => signed(build.map_or(CL_BUILD_NONE, |b| b.status)),
            CL_PROGRAM_BUILD_OPTIONS => text(build.map_or("", |b| b.options.as_str())),
            CL_PROGRAM_BUILD_LOG => text(build.map_or("", |b| b.log.as_str())),
            _ => return Err(CL_INVALID_VALUE),
        })
    });
    // SAFETY: forwarding the caller's out-pointers
    unsafe { respond("clGetProgramBuildInfo", param, reply, value_size, value, size_ret) }
}

// ============================================================================
// Kernel
// ============================================================================

fn insert_kernel(s: &mut MockState, program: usize, sig: KernelSig) -> Result<usize, cl_int> {
    let prog = s.programs.get(&program).ok_or(CL_INVALID_PROGRAM)?;
    let (context, arg_info) = (prog.context, prog.arg_info);
    let kernel = s.allocate_id();
    s.kernels.insert(
        kernel,
        MockKernel {
            refs: 1,
            program,
            context,
            args: vec![None; sig.args.len()],
            sig,
            arg_info,
        },
    );
    Ok(kernel)
}

fn program_kernels(s: &MockState, program: usize) -> Result<Vec<KernelSig>, cl_int> {
    s.programs
        .get(&program)
        .ok_or(CL_INVALID_PROGRAM)?
        .kernels
        .clone()
        .ok_or(CL_INVALID_PROGRAM_EXECUTABLE)
}

unsafe extern "C" fn create_kernels_in_program(
    program: cl_program,
    num_kernels: cl_uint,
    kernels: *mut cl_kernel,
    num_kernels_ret: *mut cl_uint,
) -> cl_int {
    code(with_state(|s| {
        s.fail("clCreateKernelsInProgram")?;
        let sigs = program_kernels(s, id(program))?;
        if !kernels.is_null() {
            if (num_kernels as usize) < sigs.len() {
                return Err(CL_INVALID_VALUE);
            }
            for (i, sig) in sigs.iter().enumerate() {
                let kernel = insert_kernel(s, id(program), sig.clone())?;
                // SAFETY: kernels has room for num_kernels >= sigs.len() handles
                unsafe { kernels.add(i).write(handle(kernel)) };
            }
        }
        // SAFETY: num_kernels_ret is NULL or writable
        unsafe { store(num_kernels_ret, sigs.len() as cl_uint) };
        Ok(())
    }))
}

unsafe extern "C" fn create_kernel(program: cl_program, kernel_name: *const c_char, errcode_ret: *mut cl_int) -> cl_kernel {
    let result = with_state(|s| -> Result<usize, cl_int> {
        s.fail("clCreateKernel")?;
        let sigs = program_kernels(s, id(program))?;
        if kernel_name.is_null() {
            return Err(CL_INVALID_VALUE);
        }
        // SAFETY: kernel_name is NUL-terminated
        let name = unsafe { CStr::from_ptr(kernel_name) }.to_string_lossy();
        let sig = sigs
            .into_iter()
            .find(|k| k.name == name)
            .ok_or(CL_INVALID_KERNEL_NAME)?;
        insert_kernel(s, id(program), sig)
    });
    // SAFETY: errcode_ret is NULL or writable
    unsafe { created(result, errcode_ret) }
}

unsafe extern "C" fn release_kernel(kernel: cl_kernel) -> cl_int {
    code(with_state(|s| {
        s.releases.push((HandleKind::Kernel, id(kernel)));
        s.fail("clReleaseKernel")?;
        let k = s.kernels.get_mut(&id(kernel)).ok_or(CL_INVALID_KERNEL)?;
        k.refs -= 1;
        if k.refs == 0 {
            s.kernels.remove(&id(kernel));
        }
        Ok(())
    }))
}

unsafe extern "C" fn get_kernel_info(
    kernel: cl_kernel,
    param: cl_uint,
    value_size: usize,
    value: *mut c_void,
    size_ret: *mut usize,
) -> cl_int {
    let reply = with_state(|s| -> Reply {
        s.fail("clGetKernelInfo")?;
        let k = s.kernels.get(&id(kernel)).ok_or(CL_INVALID_KERNEL)?;
        Ok(match param {
            CL_KERNEL_FUNCTION_NAME => text(&k.sig.name),
            CL_KERNEL_NUM_ARGS => word(k.sig.args.len() as u32),
            CL_KERNEL_REFERENCE_COUNT => word(k.refs),
            CL_KERNEL_CONTEXT => size(k.context),
            CL_KERNEL_PROGRAM => size(k.program),
            CL_KERNEL_ATTRIBUTES => text(&k.sig.attributes.join(" ")),
            _ => return Err(CL_INVALID_VALUE),
        })
    });
    // SAFETY: forwarding the caller's out-pointers
    unsafe { respond("clGetKernelInfo", param, reply, value_size, value, size_ret) }
}

unsafe extern "C" fn get_kernel_arg_info(
    kernel: cl_kernel,
    index: cl_uint,
    param: cl_uint,
    value_size: usize,
    value: *mut c_void,
    size_ret: *mut usize,
) -> cl_int {
    let reply = with_state(|s| -> Reply {
        s.fail("clGetKernelArgInfo")?;
        let k = s.kernels.get(&id(kernel)).ok_or(CL_INVALID_KERNEL)?;
        let arg = k.sig.args.get(index as usize).ok_or(CL_INVALID_ARG_INDEX)?;
        if !k.arg_info {
            return Err(CL_KERNEL_ARG_INFO_NOT_AVAILABLE);
        }
        Ok(match param {
            CL_KERNEL_ARG_ADDRESS_QUALIFIER => word(arg.address),
            CL_KERNEL_ARG_ACCESS_QUALIFIER => word(arg.access),
            CL_KERNEL_ARG_TYPE_NAME => text(&arg.type_name),
            CL_KERNEL_ARG_TYPE_QUALIFIER => long(arg.type_qualifiers),
            CL_KERNEL_ARG_NAME => text(&arg.name),
            _ => return Err(CL_INVALID_VALUE),
        })
    });
    // SAFETY: forwarding the caller's out-pointers
    unsafe { respond("clGetKernelArgInfo", param, reply, value_size, value, size_ret) }
}

unsafe extern "C" fn set_kernel_arg(kernel: cl_kernel, index: cl_uint, arg_size: usize, arg_value: *const c_void) -> cl_int {
    code(with_state(|s| {
        s.fail("clSetKernelArg")?;
        let arg = s
            .kernels
            .get(&id(kernel))
            .ok_or(CL_INVALID_KERNEL)?
            .sig
            .args
            .get(index as usize)
            .cloned()
            .ok_or(CL_INVALID_ARG_INDEX)?;

        let bound = match arg.address {
            CL_KERNEL_ARG_ADDRESS_LOCAL => {
                if !arg_value.is_null() {
                    return Err(CL_INVALID_ARG_VALUE);
                }
                if arg_size == 0 {
                    return Err(CL_INVALID_ARG_SIZE);
                }
                BoundArg::Local(arg_size)
            }
            CL_KERNEL_ARG_ADDRESS_GLOBAL | CL_KERNEL_ARG_ADDRESS_CONSTANT => {
                if arg_size != mem::size_of::<cl_mem>() {
                    return Err(CL_INVALID_ARG_SIZE);
                }
                let mem = if arg_value.is_null() {
                    0
                } else {
                    // SAFETY: arg_value addresses one cl_mem
                    id(unsafe { arg_value.cast::<cl_mem>().read_unaligned() })
                };
                if mem != 0 && !s.mems.contains_key(&mem) {
                    return Err(CL_INVALID_MEM_OBJECT);
                }
                BoundArg::Mem(mem)
            }
            _ => {
                if arg_value.is_null() || arg.is_pointer() {
                    return Err(CL_INVALID_ARG_VALUE);
                }
                if arg.scalar_size().is_some_and(|n| n != arg_size) {
                    return Err(CL_INVALID_ARG_SIZE);
                }
                // SAFETY: arg_value addresses arg_size readable bytes
                BoundArg::Value(unsafe { slice_of(arg_value.cast::<u8>(), arg_size) }.to_vec())
            }
        };
        if let Some(k) = s.kernels.get_mut(&id(kernel)) {
            k.args[index as usize] = Some(bound);
        }
        Ok(())
    }))
}

// ============================================================================
// Enqueue
// ============================================================================

unsafe extern "C" fn enqueue_nd_range_kernel(
    queue: cl_command_queue,
    kernel: cl_kernel,
    work_dim: cl_uint,
    _global_work_offset: *const usize,
    global_work_size: *const usize,
    local_work_size: *const usize,
    num_events: cl_uint,
    wait_list: *const cl_event,
    event: *mut cl_event,
) -> cl_int {
    let dims = (work_dim as usize).min(3);
    // SAFETY: size arrays hold work_dim entries; wait_list holds num_events handles
    let (global, local, waits) = unsafe {
        (
            slice_of(global_work_size, dims).to_vec(),
            slice_of(local_work_size, dims).to_vec(),
            ids(slice_of(wait_list, num_events as usize)),
        )
    };

    with_state(|s| {
        let outcome = (|| -> Result<usize, cl_int> {
            s.fail("clEnqueueNDRangeKernel")?;
            let q = s.queues.get(&id(queue)).ok_or(CL_INVALID_COMMAND_QUEUE)?;
            let k = s.kernels.get(&id(kernel)).ok_or(CL_INVALID_KERNEL)?;
            if q.context != k.context {
                return Err(CL_INVALID_CONTEXT);
            }
            if !(1..=3).contains(&work_dim) {
                return Err(CL_INVALID_WORK_DIMENSION);
            }
            if global.len() != dims || global.contains(&0) {
                return Err(CL_INVALID_GLOBAL_WORK_SIZE);
            }
            if !local.is_empty() && global.iter().zip(&local).any(|(&g, &l)| l == 0 || g % l != 0) {
                return Err(CL_INVALID_WORK_GROUP_SIZE);
            }
            if k.args.iter().any(Option::is_none) {
                return Err(CL_INVALID_KERNEL_ARGS);
            }
            s.check_wait_list(num_events, wait_list.is_null(), &waits)?;
            Ok(s.new_event(id(queue), CL_COMMAND_NDRANGE_KERNEL, !event.is_null()))
        })();
        let (result, created) = match outcome {
            Ok(ev) => (CL_SUCCESS, ev),
            Err(code) => (code, 0),
        };
        s.enqueues.push(EnqueueRecord {
            command: "clEnqueueNDRangeKernel",
            queue: id(queue),
            blocking: false,
            offset: 0,
            size: 0,
            host_ptr: 0,
            work_dim,
            num_events,
            wait_list_null: wait_list.is_null(),
            wait_list: waits,
            event_requested: !event.is_null(),
            event: created,
            result,
        });
        if result == CL_SUCCESS {
            // SAFETY: event is NULL or writable
            unsafe { store(event, handle(created)) };
        }
        result
    })
}

unsafe extern "C" fn enqueue_read_buffer(
    queue: cl_command_queue,
    buffer: cl_mem,
    blocking: cl_bool,
    offset: usize,
    bytes: usize,
    dst: *mut c_void,
    num_events: cl_uint,
    wait_list: *const cl_event,
    event: *mut cl_event,
) -> cl_int {
    // SAFETY: wait_list holds num_events handles
    let waits = ids(unsafe { slice_of(wait_list, num_events as usize) });
    with_state(|s| {
        let outcome = (|| -> Result<usize, cl_int> {
            s.fail("clEnqueueReadBuffer")?;
            s.transfer_target(id(queue), id(buffer), offset, bytes)?;
            if dst.is_null() {
                return Err(CL_INVALID_VALUE);
            }
            s.check_wait_list(num_events, wait_list.is_null(), &waits)?;
            let (data, base) = s.backing(id(buffer)).ok_or(CL_INVALID_MEM_OBJECT)?;
            let from = &data[base + offset..base + offset + bytes];
            // SAFETY: dst addresses `bytes` writable bytes
            unsafe { ptr::copy_nonoverlapping(from.as_ptr(), dst.cast::<u8>(), bytes) };
            Ok(s.new_event(id(queue), CL_COMMAND_READ_BUFFER, !event.is_null()))
        })();
        finish_transfer(
            s,
            "clEnqueueReadBuffer",
            outcome,
            TransferArgs {
                queue: id(queue),
                blocking,
                offset,
                bytes,
                host_ptr: id(dst),
                num_events,
                wait_list_null: wait_list.is_null(),
                waits,
                event,
            },
        )
    })
}

unsafe extern "C" fn enqueue_write_buffer(
    queue: cl_command_queue,
    buffer: cl_mem,
    blocking: cl_bool,
    offset: usize,
    bytes: usize,
    src: *const c_void,
    num_events: cl_uint,
    wait_list: *const cl_event,
    event: *mut cl_event,
) -> cl_int {
    // SAFETY: wait_list holds num_events handles
    let waits = ids(unsafe { slice_of(wait_list, num_events as usize) });
    with_state(|s| {
        let outcome = (|| -> Result<usize, cl_int> {
            s.fail("clEnqueueWriteBuffer")?;
            s.transfer_target(id(queue), id(buffer), offset, bytes)?;
            if src.is_null() {
                return Err(CL_INVALID_VALUE);
            }
            s.check_wait_list(num_events, wait_list.is_null(), &waits)?;
            let (data, base) = s.backing(id(buffer)).ok_or(CL_INVALID_MEM_OBJECT)?;
            // SAFETY: src addresses `bytes` readable bytes
            let from = unsafe { slice_of(src.cast::<u8>(), bytes) };
            data[base + offset..base + offset + bytes].copy_from_slice(from);
            Ok(s.new_event(id(queue), CL_COMMAND_WRITE_BUFFER, !event.is_null()))
        })();
        finish_transfer(
            s,
            "clEnqueueWriteBuffer",
            outcome,
            TransferArgs {
                queue: id(queue),
                blocking,
                offset,
                bytes,
                host_ptr: src as usize,
                num_events,
                wait_list_null: wait_list.is_null(),
                waits,
                event,
            },
        )
    })
}

struct TransferArgs {
    queue: usize,
    blocking: cl_bool,
    offset: usize,
    bytes: usize,
    host_ptr: usize,
    num_events: cl_uint,
    wait_list_null: bool,
    waits: Vec<usize>,
    event: *mut cl_event,
}

fn finish_transfer(
    s: &mut MockState,
    command: &'static str,
    outcome: Result<usize, cl_int>,
    args: TransferArgs,
) -> cl_int {
    let (result, created) = match outcome {
        Ok(ev) => (CL_SUCCESS, ev),
        Err(code) => (code, 0),
    };
    s.enqueues.push(EnqueueRecord {
        command,
        queue: args.queue,
        blocking: args.blocking != CL_FALSE,
        offset: args.offset,
        size: args.bytes,
        host_ptr: args.host_ptr,
        work_dim: 0,
        num_events: args.num_events,
        wait_list_null: args.wait_list_null,
        wait_list: args.waits,
        event_requested: !args.event.is_null(),
        event: created,
        result,
    });
    if result == CL_SUCCESS {
        // SAFETY: event is NULL or writable
        unsafe { store(args.event, handle(created)) };
    }
    result
}

// ============================================================================
// Event
// ============================================================================

unsafe extern "C" fn wait_for_events(num_events: cl_uint, event_list: *const cl_event) -> cl_int {
    // SAFETY: event_list holds num_events handles
    let events = ids(unsafe { slice_of(event_list, num_events as usize) });
    code(with_state(|s| {
        s.fail("clWaitForEvents")?;
        if events.is_empty() {
            return Err(CL_INVALID_VALUE);
        }
        if events.iter().any(|e| !s.events.contains_key(e)) {
            return Err(CL_INVALID_EVENT);
        }
        Ok(())
    }))
}

unsafe extern "C" fn get_event_info(
    event: cl_event,
    param: cl_uint,
    value_size: usize,
    value: *mut c_void,
    size_ret: *mut usize,
) -> cl_int {
    let reply = with_state(|s| -> Reply {
        s.fail("clGetEventInfo")?;
        let e = s.events.get(&id(event)).ok_or(CL_INVALID_EVENT)?;
        Ok(match param {
            CL_EVENT_COMMAND_QUEUE => size(e.queue),
            CL_EVENT_COMMAND_TYPE => word(e.command_type),
            CL_EVENT_REFERENCE_COUNT => word(e.refs),
            CL_EVENT_COMMAND_EXECUTION_STATUS => signed(CL_COMPLETE),
            CL_EVENT_CONTEXT => size(e.context),
            _ => return Err(CL_INVALID_VALUE),
        })
    });
    // SAFETY: forwarding the caller's out-pointers
    unsafe { respond("clGetEventInfo", param, reply, value_size, value, size_ret) }
}

unsafe extern "C" fn retain_event(event: cl_event) -> cl_int {
    code(with_state(|s| {
        s.fail("clRetainEvent")?;
        let e = s.events.get_mut(&id(event)).ok_or(CL_INVALID_EVENT)?;
        e.refs += 1;
        Ok(())
    }))
}

unsafe extern "C" fn release_event(event: cl_event) -> cl_int {
    code(with_state(|s| {
        s.releases.push((HandleKind::Event, id(event)));
        s.fail("clReleaseEvent")?;
        let e = s.events.get_mut(&id(event)).ok_or(CL_INVALID_EVENT)?;
        e.refs -= 1;
        if e.refs == 0 {
            s.events.remove(&id(event));
        }
        Ok(())
    }))
}

static MOCK_DRIVER: ClDriver = ClDriver {
    clGetPlatformIDs: get_platform_ids,
    clGetPlatformInfo: get_platform_info,
    clGetDeviceIDs: get_device_ids,
    clGetDeviceInfo: get_device_info,
    clCreateContext: create_context,
    clCreateContextFromType: create_context_from_type,
    clReleaseContext: release_context,
    clGetContextInfo: get_context_info,
    clCreateCommandQueue: create_command_queue,
    clReleaseCommandQueue: release_command_queue,
    clGetCommandQueueInfo: get_command_queue_info,
    clFlush: flush,
    clFinish: finish,
    clCreateBuffer: create_buffer,
    clCreateSubBuffer: create_sub_buffer,
    clReleaseMemObject: release_mem_object,
    clGetMemObjectInfo: get_mem_object_info,
    clCreateProgramWithSource: create_program_with_source,
    clCreateProgramWithBinary: create_program_with_binary,
    clBuildProgram: build_program,
    clReleaseProgram: release_program,
    clGetProgramInfo: get_program_info,
    clGetProgramBuildInfo: get_program_build_info,
    clCreateKernelsInProgram: create_kernels_in_program,
    clCreateKernel: create_kernel,
    clReleaseKernel: release_kernel,
    clGetKernelInfo: get_kernel_info,
    clGetKernelArgInfo: get_kernel_arg_info,
    clSetKernelArg: set_kernel_arg,
    clEnqueueNDRangeKernel: enqueue_nd_range_kernel,
    clEnqueueReadBuffer: enqueue_read_buffer,
    clEnqueueWriteBuffer: enqueue_write_buffer,
    clWaitForEvents: wait_for_events,
    clGetEventInfo: get_event_info,
    clRetainEvent: retain_event,
    clReleaseEvent: release_event,
};

// ============================================================================
// MockDriver
// ============================================================================

/// Handle to the calling thread's mock driver
///
/// State is thread-local, so parallel tests never observe each other.
/// [`MockDriver::install`] resets it; objects created before the reset
/// become unknown handles.
///
/// # Example
///
/// ```rust
/// use trueno_cl::testing::{HandleKind, MockDriver};
/// use trueno_cl::Context;
///
/// let mock = MockDriver::install();
/// let mut ctx = Context::new(mock.driver(), mock.platform(), &mock.devices()).unwrap();
/// ctx.dispose();
/// assert_eq!(mock.release_count(HandleKind::Context), 1);
/// ```
#[derive(Debug)]
pub struct MockDriver {
    _thread: PhantomData<*const ()>,
}

impl MockDriver {
    /// Reset this thread's mock state and return a handle to it
    #[must_use]
    pub fn install() -> Self {
        with_state(|s| *s = MockState::default());
        trace!("mock: installed");
        Self {
            _thread: PhantomData,
        }
    }

    /// Driver table backed by the mock
    #[must_use]
    pub fn driver(&self) -> &'static ClDriver {
        &MOCK_DRIVER
    }

    /// The single mock platform
    #[must_use]
    pub fn platform(&self) -> PlatformId {
        PlatformId::from_raw(handle(PLATFORM))
    }

    /// Mock devices: a GPU, then a CPU
    #[must_use]
    pub fn devices(&self) -> Vec<DeviceId> {
        DEVICES
            .iter()
            .map(|d| DeviceId::from_raw(handle(d.id)))
            .collect()
    }

    /// Make the next call to `function` return `code`
    ///
    /// Calls queue up per function. Release entry points still log the call.
    pub fn fail_next(&self, function: &'static str, code: cl_int) {
        with_state(|s| s.failures.entry(function).or_default().push_back(code));
    }

    /// Release calls made for one object family
    #[must_use]
    pub fn release_count(&self, kind: HandleKind) -> usize {
        with_state(|s| s.releases.iter().filter(|(k, _)| *k == kind).count())
    }

    /// Release calls made across every family
    #[must_use]
    pub fn total_releases(&self) -> usize {
        with_state(|s| s.releases.len())
    }

    /// Release calls made for one address
    #[must_use]
    pub fn releases_of(&self, addr: usize) -> usize {
        with_state(|s| s.releases.iter().filter(|(_, a)| *a == addr).count())
    }

    /// Objects of a family whose reference count has not reached zero
    #[must_use]
    pub fn live_objects(&self, kind: HandleKind) -> usize {
        with_state(|s| s.live(kind))
    }

    /// Driver-side reference count of a live object
    #[must_use]
    pub fn reference_count(&self, kind: HandleKind, addr: usize) -> Option<u32> {
        with_state(|s| s.refs(kind, addr))
    }

    /// Every enqueue call so far, oldest first
    #[must_use]
    pub fn enqueue_log(&self) -> Vec<EnqueueRecord> {
        with_state(|s| s.enqueues.clone())
    }

    /// Every info query so far, oldest first
    #[must_use]
    pub fn query_log(&self) -> Vec<QueryRecord> {
        with_state(|s| s.queries.clone())
    }

    /// Forget logged releases, enqueues and queries
    pub fn clear_logs(&self) {
        with_state(|s| {
            s.releases.clear();
            s.enqueues.clear();
            s.queries.clear();
        });
    }

    /// Current device contents of a buffer or sub-buffer; empty if unknown
    #[must_use]
    pub fn device_bytes(&self, mem: MemHandle) -> Vec<u8> {
        with_state(|s| {
            let Some(len) = s.mems.get(&mem.addr()).map(|m| m.size) else {
                return Vec::new();
            };
            s.backing(mem.addr())
                .map(|(data, base)| data[base..base + len].to_vec())
                .unwrap_or_default()
        })
    }

    /// Value last bound to a kernel argument
    #[must_use]
    pub fn bound_arg(&self, kernel: KernelHandle, index: u32) -> Option<BoundArg> {
        with_state(|s| {
            s.kernels
                .get(&kernel.addr())
                .and_then(|k| k.args.get(index as usize).cloned().flatten())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(driver: &ClDriver, context: cl_context, param: cl_uint) -> (cl_int, usize) {
        let mut needed = 0usize;
        // SAFETY: size query only
        let code = unsafe { (driver.clGetContextInfo)(context, param, 0, ptr::null_mut(), &mut needed) };
        (code, needed)
    }

    fn new_context(mock: &MockDriver) -> cl_context {
        let devices: Vec<cl_device_id> = mock.devices().iter().map(|d| d.as_raw()).collect();
        let mut err = CL_SUCCESS;
        // SAFETY: two valid device handles, no properties
        let ctx = unsafe {
            (mock.driver().clCreateContext)(
                ptr::null(),
                devices.len() as cl_uint,
                devices.as_ptr(),
                None,
                ptr::null_mut(),
                &mut err,
            )
        };
        assert_eq!(err, CL_SUCCESS);
        ctx
    }

    #[test]
    fn test_strict_two_phase_sizing() {
        let mock = MockDriver::install();
        let driver = mock.driver();
        let ctx = new_context(&mock);
        let (code, needed) = info(driver, ctx, CL_CONTEXT_DEVICES);
        assert_eq!(code, CL_SUCCESS);
        assert_eq!(needed, 2 * mem::size_of::<usize>());

        let mut buf = vec![0u8; needed + 8];
        // SAFETY: buf is larger than the size passed
        let code = unsafe {
            (driver.clGetContextInfo)(ctx, CL_CONTEXT_DEVICES, needed + 8, buf.as_mut_ptr().cast(), ptr::null_mut())
        };
        assert_eq!(code, CL_INVALID_VALUE);

        let log = mock.query_log();
        assert_eq!(log.len(), 2);
        assert!(log[0].value_null);
        assert_eq!(log[0].required, needed);
        assert_eq!(log[1].result, CL_INVALID_VALUE);
    }

    #[test]
    fn test_state_is_reset_by_install() {
        let mock = MockDriver::install();
        let _ = new_context(&mock);
        assert_eq!(mock.live_objects(HandleKind::Context), 1);
        let mock = MockDriver::install();
        assert_eq!(mock.live_objects(HandleKind::Context), 0);
    }

    #[test]
    fn test_release_unknown_handle_is_logged() {
        let mock = MockDriver::install();
        // SAFETY: the mock validates handles
        let code = unsafe { (mock.driver().clReleaseMemObject)(handle(0x4242)) };
        assert_eq!(code, CL_INVALID_MEM_OBJECT);
        assert_eq!(mock.releases_of(0x4242), 1);
    }

    #[test]
    fn test_fail_next_is_one_shot() {
        let mock = MockDriver::install();
        mock.fail_next("clGetPlatformIDs", CL_OUT_OF_HOST_MEMORY);
        let mut count = 0;
        // SAFETY: count query only
        unsafe {
            assert_eq!(
                (mock.driver().clGetPlatformIDs)(0, ptr::null_mut(), &mut count),
                CL_OUT_OF_HOST_MEMORY
            );
            assert_eq!((mock.driver().clGetPlatformIDs)(0, ptr::null_mut(), &mut count), CL_SUCCESS);
        }
        assert_eq!(count, 1);
    }

    #[test]
    fn test_sub_buffer_keeps_parent_alive() {
        let mock = MockDriver::install();
        let driver = mock.driver();
        let ctx = new_context(&mock);
        let mut err = CL_SUCCESS;
        // SAFETY: valid context, no host pointer
        let parent = unsafe { (driver.clCreateBuffer)(ctx, CL_MEM_READ_WRITE, 64, ptr::null_mut(), &mut err) };
        let region = cl_buffer_region { origin: 32, size: 16 };
        // SAFETY: region outlives the call
        let sub = unsafe {
            (driver.clCreateSubBuffer)(
                parent,
                0,
                CL_BUFFER_CREATE_TYPE_REGION,
                ptr::addr_of!(region).cast(),
                &mut err,
            )
        };
        assert_eq!(err, CL_SUCCESS);
        assert_eq!(mock.reference_count(HandleKind::Mem, id(parent)), Some(2));
        // SAFETY: both handles are live
        unsafe {
            assert_eq!((driver.clReleaseMemObject)(parent), CL_SUCCESS);
            assert_eq!(mock.live_objects(HandleKind::Mem), 2);
            assert_eq!((driver.clReleaseMemObject)(sub), CL_SUCCESS);
        }
        assert_eq!(mock.live_objects(HandleKind::Mem), 0);
    }
}
