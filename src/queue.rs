//! OpenCL Command Queue
//!
//! Provides the submission channel for kernel dispatches and buffer
//! transfers.
//!
//! # Design Philosophy
//!
//! Enqueue calls never return `Err`. Each produces an [`Enqueued`] carrying
//! the driver status and the completion [`Event`] (null when no command was
//! created), so callers branch on specific codes such as
//! `CL_MISALIGNED_SUB_BUFFER_OFFSET` or `CL_INVALID_EVENT_WAIT_LIST`.
//! [`Enqueued::into_result`] turns the pair into a `Result` for `?` users.
//!
//! A queue is `Send` but not `Sync`: concurrent enqueue from several
//! threads needs external locking.

use std::cell::Cell;
use std::ffi::c_void;
use std::fmt;
use std::marker::PhantomData;
use std::mem;
use std::ptr;

use tracing::{debug, trace, warn};

use crate::context::Context;
use crate::driver::query::{info_ptr, info_u32, info_u64};
use crate::driver::sys::{
    cl_bool, cl_event, cl_int, ClDriver, CL_FALSE, CL_INVALID_BUFFER_SIZE, CL_INVALID_COMMAND_QUEUE,
    CL_INVALID_EVENT_WAIT_LIST, CL_INVALID_KERNEL, CL_INVALID_MEM_OBJECT, CL_INVALID_VALUE,
    CL_QUEUE_CONTEXT, CL_QUEUE_DEVICE, CL_QUEUE_PROPERTIES, CL_QUEUE_REFERENCE_COUNT,
    CL_QUEUE_SIZE, CL_SUCCESS, CL_TRUE,
};
use crate::driver::{
    ContextHandle, DeviceId, EventHandle, HostElement, NdRange, QueueHandle, QueueProperties,
};
use crate::error::{check, ClError, Result, Status};
use crate::event::{Event, WaitList};
use crate::kernel::Kernel;
use crate::memory::MemoryObject;

const WHAT: &str = "command queue";

// ============================================================================
// Enqueue Result
// ============================================================================

/// Outcome of one enqueue call
#[must_use]
#[derive(Debug)]
pub struct Enqueued {
    /// Command name
    pub command: &'static str,
    /// Driver status
    pub status: Status,
    /// Completion event (null when the command was not created)
    pub event: Event,
}

impl Enqueued {
    /// Check for `CL_SUCCESS`
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Convert to `Ok(event)` or `Err(ClError::Enqueue)`
    ///
    /// # Errors
    ///
    /// Returns `Err(ClError::Enqueue)` carrying the status on failure.
    pub fn into_result(self) -> Result<Event> {
        let Self {
            command,
            status,
            event,
        } = self;
        if status.is_success() {
            Ok(event)
        } else {
            Err(ClError::Enqueue {
                command,
                code: status,
            })
        }
    }
}

// ============================================================================
// Command Queue
// ============================================================================

/// Command queue bound to one context and device
pub struct CommandQueue {
    driver: &'static ClDriver,
    handle: QueueHandle,
    context: ContextHandle,
    device: DeviceId,
    properties: QueueProperties,
    owned: bool,
    disposed: bool,
    _not_sync: PhantomData<Cell<()>>,
}

impl CommandQueue {
    /// Create a queue on `device` within `context`
    ///
    /// # Arguments
    ///
    /// * `context` - Owning context
    /// * `device` - One of the context's devices
    /// * `properties` - Out-of-order execution and profiling switches
    ///
    /// # Errors
    ///
    /// Returns `Err(ClError::Creation)` if the driver rejects the queue.
    pub fn new(context: &Context, device: DeviceId, properties: QueueProperties) -> Result<Self> {
        let ctx = context.live_handle()?;
        let driver = context.driver();

        let mut err = CL_SUCCESS;
        // SAFETY: ctx and device are handles the driver validates
        let raw = unsafe {
            (driver.clCreateCommandQueue)(ctx.as_raw(), device.as_raw(), properties.bits(), &mut err)
        };
        if err != CL_SUCCESS || raw.is_null() {
            return Err(ClError::Creation {
                what: WHAT,
                code: Status(err),
            });
        }

        let handle = QueueHandle::from_raw(raw);
        debug!("created command queue {:?} on {:?} ({:?})", handle, device, properties);
        Ok(Self {
            driver,
            handle,
            context: ctx,
            device,
            properties,
            owned: true,
            disposed: false,
            _not_sync: PhantomData,
        })
    }

    /// Wrap an existing queue handle without taking ownership
    ///
    /// Context, device and properties are queried once and cached.
    ///
    /// # Errors
    ///
    /// Returns `Err(ClError::Query)` if any of the queries fails.
    pub fn from_handle(driver: &'static ClDriver, handle: QueueHandle) -> Result<Self> {
        let raw = handle.as_raw();
        let context = info_ptr(driver.clGetCommandQueueInfo, raw, WHAT, CL_QUEUE_CONTEXT)?;
        let device = info_ptr(driver.clGetCommandQueueInfo, raw, WHAT, CL_QUEUE_DEVICE)?;
        let properties = info_u64(driver.clGetCommandQueueInfo, raw, WHAT, CL_QUEUE_PROPERTIES)?;
        Ok(Self {
            driver,
            handle,
            context: ContextHandle::from_raw(context),
            device: DeviceId::from_raw(device),
            properties: QueueProperties::from_bits(properties),
            owned: false,
            disposed: false,
            _not_sync: PhantomData,
        })
    }

    /// Release the handle (owning queues only)
    ///
    /// Idempotent. Failures are logged, never returned.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        if !self.owned {
            return;
        }
        // SAFETY: owning handle released exactly once
        let result = unsafe { (self.driver.clReleaseCommandQueue)(self.handle.as_raw()) };
        if result == CL_SUCCESS {
            debug!("released command queue {:?}", self.handle);
        } else {
            warn!(
                "clReleaseCommandQueue({:?}) failed: {}",
                self.handle,
                Status(result)
            );
        }
    }

    // ------------------------------------------------------------------------
    // Identity & queries
    // ------------------------------------------------------------------------

    /// Native handle
    #[must_use]
    pub fn handle(&self) -> QueueHandle {
        self.handle
    }

    /// Context the queue was created in
    #[must_use]
    pub fn context(&self) -> ContextHandle {
        self.context
    }

    /// Device the queue submits to
    #[must_use]
    pub fn device(&self) -> DeviceId {
        self.device
    }

    /// Properties captured at creation
    #[must_use]
    pub fn properties(&self) -> QueueProperties {
        self.properties
    }

    /// Check for out-of-order execution
    #[must_use]
    pub fn is_out_of_order(&self) -> bool {
        self.properties.contains(QueueProperties::OUT_OF_ORDER)
    }

    /// Whether dispose releases the handle
    #[must_use]
    pub fn is_owned(&self) -> bool {
        self.owned
    }

    /// Whether [`dispose`](Self::dispose) already ran
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    fn live(&self) -> Result<QueueHandle> {
        if self.disposed {
            Err(ClError::Disposed(WHAT))
        } else {
            Ok(self.handle)
        }
    }

    /// Driver reference count
    ///
    /// # Errors
    ///
    /// Returns `Err(ClError::Query)` if the query fails.
    pub fn reference_count(&self) -> Result<u32> {
        info_u32(
            self.driver.clGetCommandQueueInfo,
            self.live()?.as_raw(),
            WHAT,
            CL_QUEUE_REFERENCE_COUNT,
        )
    }

    /// Queue size reported by the driver
    ///
    /// # Errors
    ///
    /// Returns `Err(ClError::Query)` if the query fails.
    pub fn size(&self) -> Result<u32> {
        info_u32(
            self.driver.clGetCommandQueueInfo,
            self.live()?.as_raw(),
            WHAT,
            CL_QUEUE_SIZE,
        )
    }

    // ------------------------------------------------------------------------
    // Synchronization
    // ------------------------------------------------------------------------

    /// Submit queued commands without waiting for them
    ///
    /// # Errors
    ///
    /// Returns `Err(ClError::Flush)` if submission fails.
    pub fn flush(&self) -> Result<()> {
        let handle = self.live()?;
        // SAFETY: live queue handle
        let result = unsafe { (self.driver.clFlush)(handle.as_raw()) };
        check(result, ClError::Flush)
    }

    /// Block until every enqueued command completes
    ///
    /// # Errors
    ///
    /// Returns `Err(ClError::Finish)` if the driver reports a failure.
    pub fn finish(&self) -> Result<()> {
        let handle = self.live()?;
        // SAFETY: live queue handle
        let result = unsafe { (self.driver.clFinish)(handle.as_raw()) };
        check(result, ClError::Finish)
    }

    // ------------------------------------------------------------------------
    // Enqueue
    // ------------------------------------------------------------------------

    fn rejected(&self, command: &'static str, code: cl_int) -> Enqueued {
        trace!("{} rejected before submission: {}", command, Status(code));
        Enqueued {
            command,
            status: Status(code),
            event: Event::null(self.driver),
        }
    }

    fn submitted(&self, command: &'static str, code: cl_int, event: cl_event) -> Enqueued {
        let status = Status(code);
        trace!("{} on {:?}: {} -> {:?}", command, self.handle, status, event);
        Enqueued {
            command,
            status,
            event: Event::owned(self.driver, EventHandle::from_raw(event)),
        }
    }

    /// Enqueue a kernel dispatch
    ///
    /// `range.work_dim` is passed to the driver as is; values outside 1..=3
    /// come back as `CL_INVALID_WORK_DIMENSION`.
    ///
    /// # Arguments
    ///
    /// * `kernel` - Kernel with every argument bound
    /// * `range` - Work dimension, offset, global and optional local size
    /// * `wait_events` - Events that must complete first (`None` for none)
    pub fn enqueue_kernel(
        &self,
        kernel: &Kernel,
        range: &NdRange,
        wait_events: Option<&[&Event]>,
    ) -> Enqueued {
        const COMMAND: &str = "ndrange kernel";
        let Ok(queue) = self.live() else {
            return self.rejected(COMMAND, CL_INVALID_COMMAND_QUEUE);
        };
        let Ok(kernel) = kernel.live() else {
            return self.rejected(COMMAND, CL_INVALID_KERNEL);
        };
        let Ok(wait) = WaitList::new(wait_events) else {
            return self.rejected(COMMAND, CL_INVALID_EVENT_WAIT_LIST);
        };
        let local = range
            .local_size
            .as_ref()
            .map_or(ptr::null(), |local| local.as_ptr());

        let mut event: cl_event = ptr::null_mut();
        // SAFETY: size arrays hold three elements; wait list pointer/count agree
        let result = unsafe {
            (self.driver.clEnqueueNDRangeKernel)(
                queue.as_raw(),
                kernel.as_raw(),
                range.work_dim,
                range.global_offset.as_ptr(),
                range.global_size.as_ptr(),
                local,
                wait.len(),
                wait.as_ptr(),
                &mut event,
            )
        };
        self.submitted(COMMAND, result, event)
    }

    /// Enqueue a device→host read of `buffer[offset..]` into its pin
    ///
    /// The transfer size is the device size minus `offset` (in elements).
    /// The pin is allocated on first use and reused afterwards; data lands at
    /// the same element offset, so the pin mirrors the device layout.
    ///
    /// Blocking reads leave usable data in the pin on return. Non-blocking
    /// reads record the event on the buffer; [`MemoryObject::host_data`]
    /// waits for it.
    pub fn enqueue_read_buffer<T: HostElement>(
        &self,
        buffer: &mut MemoryObject<T>,
        blocking: bool,
        offset: usize,
        wait_events: Option<&[&Event]>,
    ) -> Enqueued {
        const COMMAND: &str = "read buffer";
        let Ok(queue) = self.live() else {
            return self.rejected(COMMAND, CL_INVALID_COMMAND_QUEUE);
        };
        let Ok(mem) = buffer.live() else {
            return self.rejected(COMMAND, CL_INVALID_MEM_OBJECT);
        };
        let Ok(wait) = WaitList::new(wait_events) else {
            return self.rejected(COMMAND, CL_INVALID_EVENT_WAIT_LIST);
        };
        let len = match buffer.size() {
            Ok(bytes) if bytes % mem::size_of::<T>() == 0 => bytes / mem::size_of::<T>(),
            // a view whose element type does not tile the device buffer
            Ok(_) => return self.rejected(COMMAND, CL_INVALID_BUFFER_SIZE),
            Err(e) => return self.rejected(COMMAND, status_of(&e)),
        };
        if offset > len {
            return self.rejected(COMMAND, CL_INVALID_VALUE);
        }
        let dst = match buffer.transfer_pin(len).and_then(|pin| pin.as_mut_ptr()) {
            // SAFETY: offset <= len == pin length
            Ok(base) => unsafe { base.add(offset) },
            Err(e) => return self.rejected(COMMAND, status_of(&e)),
        };

        let elem = mem::size_of::<T>();
        let mut event: cl_event = ptr::null_mut();
        // SAFETY: dst addresses (len - offset) elements of the pin, which the
        // buffer keeps alive until the read completes
        let result = unsafe {
            (self.driver.clEnqueueReadBuffer)(
                queue.as_raw(),
                mem.as_raw(),
                as_cl_bool(blocking),
                offset * elem,
                (len - offset) * elem,
                dst.cast::<c_void>(),
                wait.len(),
                wait.as_ptr(),
                &mut event,
            )
        };
        let enqueued = self.submitted(COMMAND, result, event);
        self.track(buffer, blocking, enqueued)
    }

    /// Enqueue a host→device write of `data` at `buffer[offset..]`
    ///
    /// `data` is copied into the buffer's pin (created if absent) and
    /// transferred from there, so the caller may reuse `data` immediately.
    /// Partial writes are allowed; `offset + data.len()` beyond the device
    /// size returns `CL_INVALID_VALUE` without reaching the driver.
    ///
    /// Both transfers return `CL_INVALID_BUFFER_SIZE` locally when the device
    /// size is not a whole number of `T` elements.
    pub fn enqueue_write_buffer<T: HostElement>(
        &self,
        buffer: &mut MemoryObject<T>,
        blocking: bool,
        offset: usize,
        data: &[T],
        wait_events: Option<&[&Event]>,
    ) -> Enqueued {
        const COMMAND: &str = "write buffer";
        let Ok(queue) = self.live() else {
            return self.rejected(COMMAND, CL_INVALID_COMMAND_QUEUE);
        };
        let Ok(mem) = buffer.live() else {
            return self.rejected(COMMAND, CL_INVALID_MEM_OBJECT);
        };
        let Ok(wait) = WaitList::new(wait_events) else {
            return self.rejected(COMMAND, CL_INVALID_EVENT_WAIT_LIST);
        };
        let len = match buffer.size() {
            Ok(bytes) if bytes % mem::size_of::<T>() == 0 => bytes / mem::size_of::<T>(),
            // a view whose element type does not tile the device buffer
            Ok(_) => return self.rejected(COMMAND, CL_INVALID_BUFFER_SIZE),
            Err(e) => return self.rejected(COMMAND, status_of(&e)),
        };
        let end = offset.saturating_add(data.len());
        if end > len {
            return self.rejected(COMMAND, CL_INVALID_VALUE);
        }
        let src = match buffer.transfer_pin(len).and_then(|pin| {
            pin.as_mut_slice()?[offset..end].copy_from_slice(data);
            pin.as_ptr()
        }) {
            // SAFETY: offset <= end <= pin length
            Ok(base) => unsafe { base.add(offset) },
            Err(e) => return self.rejected(COMMAND, status_of(&e)),
        };

        let elem = mem::size_of::<T>();
        let mut event: cl_event = ptr::null_mut();
        // SAFETY: src addresses data.len() elements of the pin, which the
        // buffer keeps alive until the write completes
        let result = unsafe {
            (self.driver.clEnqueueWriteBuffer)(
                queue.as_raw(),
                mem.as_raw(),
                as_cl_bool(blocking),
                offset * elem,
                data.len() * elem,
                src.cast::<c_void>(),
                wait.len(),
                wait.as_ptr(),
                &mut event,
            )
        };
        let enqueued = self.submitted(COMMAND, result, event);
        self.track(buffer, blocking, enqueued)
    }

    /// Record a non-blocking transfer on the buffer so host access waits for it
    fn track<T: HostElement>(
        &self,
        buffer: &mut MemoryObject<T>,
        blocking: bool,
        mut enqueued: Enqueued,
    ) -> Enqueued {
        if blocking || !enqueued.is_success() || enqueued.event.is_null() {
            return enqueued;
        }
        match enqueued.event.retain() {
            Ok(retained) => buffer.set_pending(retained),
            Err(_) => {
                // no second reference: settle the transfer now
                if let Err(e) = enqueued.event.wait() {
                    enqueued.status = status_of(&e).into();
                }
            }
        }
        enqueued
    }
}

fn as_cl_bool(value: bool) -> cl_bool {
    if value {
        CL_TRUE
    } else {
        CL_FALSE
    }
}

fn status_of(err: &ClError) -> cl_int {
    err.status().map_or(CL_INVALID_MEM_OBJECT, Status::code)
}

impl Drop for CommandQueue {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for CommandQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandQueue")
            .field("handle", &self.handle)
            .field("device", &self.device)
            .field("properties", &self.properties)
            .field("owned", &self.owned)
            .field("disposed", &self.disposed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::sys::{CL_INVALID_QUEUE_PROPERTIES, CL_OUT_OF_RESOURCES};
    use crate::driver::MemFlags;
    use crate::testing::{HandleKind, MockDriver};

    fn setup(mock: &MockDriver, props: QueueProperties) -> (Context, CommandQueue) {
        let ctx = Context::new(mock.driver(), mock.platform(), &mock.devices()).unwrap();
        let queue = ctx.create_queue(mock.devices()[0], props).unwrap();
        (ctx, queue)
    }

    #[test]
    fn test_queue_binding_cached() {
        let mock = MockDriver::install();
        let (ctx, queue) = setup(&mock, QueueProperties::OUT_OF_ORDER);
        assert_eq!(queue.context(), ctx.handle());
        assert_eq!(queue.device(), mock.devices()[0]);
        assert!(queue.is_out_of_order());
        assert_eq!(queue.reference_count().unwrap(), 1);
        assert_eq!(queue.size().unwrap(), 0);
    }

    #[test]
    fn test_from_handle_reads_binding() {
        let mock = MockDriver::install();
        let (ctx, queue) = setup(&mock, QueueProperties::PROFILING);
        let view = CommandQueue::from_handle(mock.driver(), queue.handle()).unwrap();
        assert!(!view.is_owned());
        assert_eq!(view.context(), ctx.handle());
        assert_eq!(view.properties(), QueueProperties::PROFILING);
        drop(view);
        assert_eq!(mock.release_count(HandleKind::Queue), 0);
    }

    #[test]
    fn test_invalid_properties() {
        let mock = MockDriver::install();
        let ctx = Context::new(mock.driver(), mock.platform(), &mock.devices()).unwrap();
        let err = ctx
            .create_queue(mock.devices()[0], QueueProperties::from_bits(1 << 9))
            .unwrap_err();
        assert_eq!(err.status(), Some(Status(CL_INVALID_QUEUE_PROPERTIES)));
    }

    #[test]
    fn test_flush_finish_repeatable() {
        let mock = MockDriver::install();
        let (_ctx, queue) = setup(&mock, QueueProperties::empty());
        queue.flush().unwrap();
        queue.finish().unwrap();
        queue.finish().unwrap();
    }

    #[test]
    fn test_flush_failure_propagates() {
        let mock = MockDriver::install();
        let (_ctx, queue) = setup(&mock, QueueProperties::empty());
        mock.fail_next("clFlush", CL_OUT_OF_RESOURCES);
        assert_eq!(
            queue.flush().unwrap_err(),
            ClError::Flush(Status(CL_OUT_OF_RESOURCES))
        );
    }

    #[test]
    fn test_disposed_queue_rejects_enqueue() {
        let mock = MockDriver::install();
        let (ctx, mut queue) = setup(&mock, QueueProperties::empty());
        let mut buf = MemoryObject::<i32>::allocate_empty(&ctx, 4, MemFlags::READ_WRITE).unwrap();
        queue.dispose();
        let enq = queue.enqueue_read_buffer(&mut buf, true, 0, None);
        assert_eq!(enq.status, Status(CL_INVALID_COMMAND_QUEUE));
        assert!(enq.event.is_null());
        assert!(mock.enqueue_log().is_empty());
        assert_eq!(queue.finish().unwrap_err(), ClError::Disposed("command queue"));
    }

    #[test]
    fn test_write_past_end_rejected_locally() {
        let mock = MockDriver::install();
        let (ctx, queue) = setup(&mock, QueueProperties::empty());
        let mut buf = MemoryObject::<i32>::allocate_empty(&ctx, 4, MemFlags::READ_WRITE).unwrap();
        let enq = queue.enqueue_write_buffer(&mut buf, true, 2, &[1, 2, 3], None);
        assert_eq!(enq.status, Status(CL_INVALID_VALUE));
        assert!(mock.enqueue_log().is_empty());
    }

    #[test]
    fn test_view_not_tiling_buffer_rejected_locally() {
        let mock = MockDriver::install();
        let (ctx, queue) = setup(&mock, QueueProperties::empty());
        let bytes = MemoryObject::allocate(&ctx, vec![0xAAu8; 6], MemFlags::READ_WRITE).unwrap();
        let mut words = MemoryObject::<u32>::from_handle(mock.driver(), bytes.handle());

        let read = queue.enqueue_read_buffer(&mut words, true, 0, None);
        assert_eq!(read.status, Status(CL_INVALID_BUFFER_SIZE));
        assert!(read.event.is_null());
        let write = queue.enqueue_write_buffer(&mut words, true, 0, &[1u32], None);
        assert_eq!(write.status, Status(CL_INVALID_BUFFER_SIZE));
        assert!(write.event.is_null());

        assert!(mock.enqueue_log().is_empty());
        assert!(!words.has_pin());
        assert_eq!(mock.device_bytes(bytes.handle()), vec![0xAA; 6]);
    }

    #[test]
    fn test_partial_write_at_offset() {
        let mock = MockDriver::install();
        let (ctx, queue) = setup(&mock, QueueProperties::empty());
        let mut buf = MemoryObject::allocate(&ctx, vec![0i32; 4], MemFlags::READ_WRITE).unwrap();
        queue
            .enqueue_write_buffer(&mut buf, true, 2, &[7, 8], None)
            .into_result()
            .unwrap();
        let mut check = MemoryObject::<i32>::from_handle(mock.driver(), buf.handle());
        queue
            .enqueue_read_buffer(&mut check, true, 0, None)
            .into_result()
            .unwrap();
        assert_eq!(check.host_data().unwrap(), &[0, 0, 7, 8]);
    }

    #[test]
    fn test_read_at_offset_mirrors_layout() {
        let mock = MockDriver::install();
        let (ctx, queue) = setup(&mock, QueueProperties::empty());
        let source = MemoryObject::allocate(&ctx, vec![1u32, 2, 3, 4], MemFlags::READ_WRITE).unwrap();
        let mut view = MemoryObject::<u32>::from_handle(mock.driver(), source.handle());
        queue
            .enqueue_read_buffer(&mut view, true, 1, None)
            .into_result()
            .unwrap();
        assert_eq!(view.host_data().unwrap(), &[0, 2, 3, 4]);
        let last = mock.enqueue_log().pop().unwrap();
        assert_eq!(last.offset, 4);
        assert_eq!(last.size, 12);
    }

    #[test]
    fn test_non_blocking_read_waits_on_host_access() {
        let mock = MockDriver::install();
        let (ctx, queue) = setup(&mock, QueueProperties::empty());
        let mut buf = MemoryObject::allocate(&ctx, vec![3i64, 4], MemFlags::READ_WRITE).unwrap();
        let event = queue
            .enqueue_read_buffer(&mut buf, false, 0, None)
            .into_result()
            .unwrap();
        assert!(buf.has_pending_transfer());
        assert_eq!(event.reference_count().unwrap(), 2);
        assert_eq!(buf.host_data().unwrap(), &[3, 4]);
        assert!(!buf.has_pending_transfer());
        assert_eq!(event.reference_count().unwrap(), 1);
    }

    #[test]
    fn test_read_reuses_pin() {
        let mock = MockDriver::install();
        let (ctx, queue) = setup(&mock, QueueProperties::empty());
        let mut buf = MemoryObject::<u8>::allocate_empty(&ctx, 16, MemFlags::READ_WRITE).unwrap();
        let _ = queue.enqueue_read_buffer(&mut buf, true, 0, None);
        let first = mock.enqueue_log().pop().unwrap().host_ptr;
        let _ = queue.enqueue_read_buffer(&mut buf, true, 0, None);
        let second = mock.enqueue_log().pop().unwrap().host_ptr;
        assert_eq!(first, second);
    }

    #[test]
    fn test_enqueued_into_result() {
        let mock = MockDriver::install();
        let (ctx, queue) = setup(&mock, QueueProperties::empty());
        let mut buf = MemoryObject::<f32>::allocate_empty(&ctx, 4, MemFlags::READ_WRITE).unwrap();
        buf.dispose();
        let err = queue
            .enqueue_read_buffer(&mut buf, true, 0, None)
            .into_result()
            .unwrap_err();
        assert_eq!(
            err,
            ClError::Enqueue {
                command: "read buffer",
                code: Status(CL_INVALID_MEM_OBJECT),
            }
        );
        assert!(err.to_string().contains("CL_INVALID_MEM_OBJECT"));
    }

    #[test]
    fn test_dispose_twice() {
        let mock = MockDriver::install();
        let (_ctx, mut queue) = setup(&mock, QueueProperties::empty());
        queue.dispose();
        queue.dispose();
        drop(queue);
        assert_eq!(mock.release_count(HandleKind::Queue), 1);
    }
}
