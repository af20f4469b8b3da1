//! Device Memory Objects
//!
//! Provides the RAII wrapper binding a device buffer to its pinned host
//! array.
//!
//! # Design Philosophy
//!
//! - **Pin then allocate**: host data is pinned before the driver sees its address
//! - **Unpin then release**: disposal frees the pin even when the driver release fails
//! - **Live queries**: every accessor asks the driver, nothing is cached
//!
//! Offsets and lengths on this API are in elements of `T`; they are
//! converted to bytes at the driver boundary.

use std::ffi::c_void;
use std::fmt;
use std::mem;
use std::ptr;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, warn};

use crate::context::Context;
use crate::driver::query::{info_ptr, info_u32, info_u64, info_usize};
use crate::driver::sys::{
    cl_buffer_region, cl_uint, ClDriver, CL_BUFFER_CREATE_TYPE_REGION, CL_MEM_ASSOCIATED_MEMOBJECT,
    CL_MEM_CONTEXT, CL_MEM_FLAGS, CL_MEM_HOST_PTR, CL_MEM_MAP_COUNT, CL_MEM_OFFSET,
    CL_INVALID_BUFFER_SIZE, CL_MEM_REFERENCE_COUNT, CL_MEM_SIZE, CL_MEM_TYPE, CL_SUCCESS,
};
use crate::driver::{ContextHandle, HostElement, MemFlags, MemHandle};
use crate::error::{ClError, Result, Status};
use crate::event::Event;
use crate::pin::PinnedHostBuffer;

const WHAT: &str = "memory object";

/// Slot that takes over a `USE_HOST_PTR` pin when its buffer is disposed
/// while sub-buffers still alias it; the array is freed with the last clone
type HostRetainer<T> = Arc<Mutex<Option<PinnedHostBuffer<T>>>>;

/// Byte size of `len` elements, rejected as `CL_INVALID_BUFFER_SIZE` on overflow
fn byte_size<T>(what: &'static str, len: usize) -> Result<usize> {
    len.checked_mul(mem::size_of::<T>()).ok_or(ClError::Creation {
        what,
        code: Status(CL_INVALID_BUFFER_SIZE),
    })
}

// ============================================================================
// Memory Object
// ============================================================================

/// Device buffer with an optional pinned host array
///
/// # Type Parameter
///
/// * `T` - Element type of the host array
///
/// # Example
///
/// ```ignore
/// let buf = MemoryObject::allocate(&ctx, vec![1i32, 2, 3, 4],
///     MemFlags::READ_WRITE | MemFlags::USE_HOST_PTR)?;
/// assert_eq!(buf.size()?, 16);
/// ```
pub struct MemoryObject<T: HostElement> {
    driver: &'static ClDriver,
    handle: MemHandle,
    flags: MemFlags,
    pin: Option<PinnedHostBuffer<T>>,
    /// Retained event of the last non-blocking transfer through the pin
    pending: Option<Event>,
    /// Host array shared between a `USE_HOST_PTR` buffer and its sub-buffers
    host: Option<HostRetainer<T>>,
    owned: bool,
    disposed: bool,
}

impl<T: HostElement> MemoryObject<T> {
    /// Pin `data` and allocate a device buffer of the same byte size
    ///
    /// When neither `USE_HOST_PTR` nor `COPY_HOST_PTR` is given,
    /// `COPY_HOST_PTR` is added so the device starts with `data`.
    ///
    /// # Arguments
    ///
    /// * `context` - Allocation scope
    /// * `data` - Initial contents; ownership moves into the pin
    /// * `flags` - Access and host-pointer flags
    ///
    /// # Errors
    ///
    /// Returns `Err(ClError::Creation)` if the driver rejects the allocation.
    /// The pin is released before returning.
    pub fn allocate(context: &Context, data: Vec<T>, flags: MemFlags) -> Result<Self> {
        let ctx = context.live_handle()?;
        let driver = context.driver();
        let flags = if flags.needs_host_ptr() {
            flags
        } else {
            flags | MemFlags::COPY_HOST_PTR
        };

        let mut pin = PinnedHostBuffer::acquire(data);
        let size = pin.byte_len();
        let host_ptr = pin.as_mut_ptr()?.cast::<c_void>();

        let mut err = CL_SUCCESS;
        // SAFETY: host_ptr addresses `size` bytes owned by the pin, which
        // outlives the buffer
        let raw = unsafe { (driver.clCreateBuffer)(ctx.as_raw(), flags.bits(), size, host_ptr, &mut err) };
        if err != CL_SUCCESS || raw.is_null() {
            pin.release();
            return Err(ClError::Creation {
                what: "buffer",
                code: Status(err),
            });
        }

        let handle = MemHandle::from_raw(raw);
        debug!("allocated buffer {:?}: {} bytes, {:?}", handle, size, flags);
        let host = flags
            .contains(MemFlags::USE_HOST_PTR)
            .then(|| Arc::new(Mutex::new(None)));
        Ok(Self {
            driver,
            handle,
            flags,
            pin: Some(pin),
            pending: None,
            host,
            owned: true,
            disposed: false,
        })
    }

    /// Allocate a device buffer of `len` elements without host data
    ///
    /// # Errors
    ///
    /// Returns `Err(ClError::Creation)` if the driver rejects the allocation
    /// or the byte size overflows `usize`.
    pub fn allocate_empty(context: &Context, len: usize, flags: MemFlags) -> Result<Self> {
        let ctx = context.live_handle()?;
        let driver = context.driver();
        let size = byte_size::<T>("buffer", len)?;

        let mut err = CL_SUCCESS;
        // SAFETY: no host pointer is passed
        let raw = unsafe {
            (driver.clCreateBuffer)(ctx.as_raw(), flags.bits(), size, ptr::null_mut(), &mut err)
        };
        if err != CL_SUCCESS || raw.is_null() {
            return Err(ClError::Creation {
                what: "buffer",
                code: Status(err),
            });
        }

        let handle = MemHandle::from_raw(raw);
        debug!("allocated buffer {:?}: {} bytes, {:?}", handle, size, flags);
        Ok(Self {
            driver,
            handle,
            flags,
            pin: None,
            pending: None,
            host: None,
            owned: true,
            disposed: false,
        })
    }

    /// Wrap an existing memory handle without taking ownership
    ///
    /// The wrapper has no pin and never releases the handle.
    #[must_use]
    pub fn from_handle(driver: &'static ClDriver, handle: MemHandle) -> Self {
        Self {
            driver,
            handle,
            flags: MemFlags::empty(),
            pin: None,
            pending: None,
            host: None,
            owned: false,
            disposed: false,
        }
    }

    /// Create an owning sub-buffer over `len` elements starting at `origin`
    ///
    /// The sub-buffer has no pin; its [`associated_memobject`](Self::associated_memobject)
    /// is this buffer. Over a `USE_HOST_PTR` buffer it keeps the parent's
    /// host array alive until the sub-buffer itself is disposed.
    ///
    /// # Errors
    ///
    /// Returns `Err(ClError::Creation)` if the driver rejects the region, for
    /// example with `CL_MISALIGNED_SUB_BUFFER_OFFSET`, or if the region's
    /// byte range overflows `usize`.
    pub fn create_sub_buffer(&self, flags: MemFlags, origin: usize, len: usize) -> Result<Self> {
        let parent = self.live()?;
        let region = cl_buffer_region {
            origin: byte_size::<T>("sub-buffer", origin)?,
            size: byte_size::<T>("sub-buffer", len)?,
        };

        let mut err = CL_SUCCESS;
        // SAFETY: region is a valid cl_buffer_region for the duration of the call
        let raw = unsafe {
            (self.driver.clCreateSubBuffer)(
                parent.as_raw(),
                flags.bits(),
                CL_BUFFER_CREATE_TYPE_REGION,
                ptr::addr_of!(region).cast::<c_void>(),
                &mut err,
            )
        };
        if err != CL_SUCCESS || raw.is_null() {
            return Err(ClError::Creation {
                what: "sub-buffer",
                code: Status(err),
            });
        }

        let handle = MemHandle::from_raw(raw);
        debug!(
            "created sub-buffer {:?} of {:?}: origin {} size {} bytes",
            handle, parent, region.origin, region.size
        );
        Ok(Self {
            driver: self.driver,
            handle,
            flags,
            pin: None,
            pending: None,
            host: self.host.clone(),
            owned: true,
            disposed: false,
        })
    }

    /// Release the pin, then the device handle
    ///
    /// Idempotent. The pin is freed even if the driver release fails; release
    /// failures are logged, never returned. A `USE_HOST_PTR` pin that live
    /// sub-buffers still alias is handed to them instead of being freed.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;

        if let Some(mut event) = self.pending.take() {
            event.release();
        }
        if let Some(mut pin) = self.pin.take() {
            match &self.host {
                Some(host) if Arc::strong_count(host) > 1 => {
                    debug!(
                        "buffer {:?} host array outlives it for {} sub-buffer(s)",
                        self.handle,
                        Arc::strong_count(host) - 1
                    );
                    *host.lock().unwrap_or_else(PoisonError::into_inner) = Some(pin);
                }
                _ => {
                    pin.release();
                }
            }
        }

        if self.owned && !self.handle.is_null() {
            // SAFETY: owning handle released exactly once
            let result = unsafe { (self.driver.clReleaseMemObject)(self.handle.as_raw()) };
            if result == CL_SUCCESS {
                debug!("released buffer {:?}", self.handle);
            } else {
                warn!(
                    "clReleaseMemObject({:?}) failed: {}",
                    self.handle,
                    Status(result)
                );
            }
        }
        // the shared host array may only go once the device handle is gone
        self.host = None;
    }

    // ------------------------------------------------------------------------
    // Identity
    // ------------------------------------------------------------------------

    /// Native handle
    #[must_use]
    pub fn handle(&self) -> MemHandle {
        self.handle
    }

    /// Driver this buffer was created through
    #[must_use]
    pub fn driver(&self) -> &'static ClDriver {
        self.driver
    }

    /// Whether dispose releases the device handle
    #[must_use]
    pub fn is_owned(&self) -> bool {
        self.owned
    }

    /// Whether [`dispose`](Self::dispose) already ran
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Flags requested at creation (empty for wrapped handles)
    #[must_use]
    pub fn requested_flags(&self) -> MemFlags {
        self.flags
    }

    pub(crate) fn live(&self) -> Result<MemHandle> {
        if self.disposed {
            Err(ClError::Disposed(WHAT))
        } else {
            Ok(self.handle)
        }
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    /// Device size in bytes
    ///
    /// # Errors
    ///
    /// Returns `Err(ClError::Query)` if either query phase fails.
    pub fn size(&self) -> Result<usize> {
        info_usize(self.driver.clGetMemObjectInfo, self.live()?.as_raw(), WHAT, CL_MEM_SIZE)
    }

    /// Flags the driver reports for the allocation
    ///
    /// # Errors
    ///
    /// Returns `Err(ClError::Query)` if either query phase fails.
    pub fn flags(&self) -> Result<MemFlags> {
        info_u64(self.driver.clGetMemObjectInfo, self.live()?.as_raw(), WHAT, CL_MEM_FLAGS)
            .map(MemFlags::from_bits)
    }

    /// Driver reference count
    ///
    /// # Errors
    ///
    /// Returns `Err(ClError::Query)` if either query phase fails.
    pub fn reference_count(&self) -> Result<u32> {
        info_u32(
            self.driver.clGetMemObjectInfo,
            self.live()?.as_raw(),
            WHAT,
            CL_MEM_REFERENCE_COUNT,
        )
    }

    /// Number of outstanding mappings
    ///
    /// # Errors
    ///
    /// Returns `Err(ClError::Query)` if either query phase fails.
    pub fn map_count(&self) -> Result<u32> {
        info_u32(
            self.driver.clGetMemObjectInfo,
            self.live()?.as_raw(),
            WHAT,
            CL_MEM_MAP_COUNT,
        )
    }

    /// Host pointer the buffer was created with (`None` when null)
    ///
    /// # Errors
    ///
    /// Returns `Err(ClError::Query)` if either query phase fails.
    pub fn host_ptr(&self) -> Result<Option<*mut c_void>> {
        let raw = info_ptr(
            self.driver.clGetMemObjectInfo,
            self.live()?.as_raw(),
            WHAT,
            CL_MEM_HOST_PTR,
        )?;
        Ok((!raw.is_null()).then_some(raw))
    }

    /// Parent buffer of a sub-buffer (`None` for top-level buffers)
    ///
    /// # Errors
    ///
    /// Returns `Err(ClError::Query)` if either query phase fails.
    pub fn associated_memobject(&self) -> Result<Option<MemHandle>> {
        let raw = info_ptr(
            self.driver.clGetMemObjectInfo,
            self.live()?.as_raw(),
            WHAT,
            CL_MEM_ASSOCIATED_MEMOBJECT,
        )?;
        Ok((!raw.is_null()).then(|| MemHandle::from_raw(raw)))
    }

    /// Byte offset of a sub-buffer within its parent
    ///
    /// # Errors
    ///
    /// Returns `Err(ClError::Query)` if either query phase fails.
    pub fn offset(&self) -> Result<usize> {
        info_usize(self.driver.clGetMemObjectInfo, self.live()?.as_raw(), WHAT, CL_MEM_OFFSET)
    }

    /// Object type (`CL_MEM_OBJECT_BUFFER` for buffers)
    ///
    /// # Errors
    ///
    /// Returns `Err(ClError::Query)` if either query phase fails.
    pub fn mem_type(&self) -> Result<cl_uint> {
        info_u32(self.driver.clGetMemObjectInfo, self.live()?.as_raw(), WHAT, CL_MEM_TYPE)
    }

    /// Owning context
    ///
    /// # Errors
    ///
    /// Returns `Err(ClError::Query)` if either query phase fails.
    pub fn context(&self) -> Result<ContextHandle> {
        info_ptr(self.driver.clGetMemObjectInfo, self.live()?.as_raw(), WHAT, CL_MEM_CONTEXT)
            .map(ContextHandle::from_raw)
    }

    // ------------------------------------------------------------------------
    // Host access
    // ------------------------------------------------------------------------

    /// Check for an active pin
    #[must_use]
    pub fn has_pin(&self) -> bool {
        self.pin.as_ref().is_some_and(PinnedHostBuffer::is_active)
    }

    /// Whether this buffer shares a `USE_HOST_PTR` host array with its
    /// parent or sub-buffers
    ///
    /// For a sub-buffer this stays `true` after the parent is disposed.
    #[must_use]
    pub fn shares_host_array(&self) -> bool {
        self.host.is_some()
    }

    /// Check for a non-blocking transfer whose completion was not yet observed
    #[must_use]
    pub fn has_pending_transfer(&self) -> bool {
        self.pending.is_some()
    }

    /// Wait for the outstanding non-blocking transfer, if any
    ///
    /// # Errors
    ///
    /// Returns `Err(ClError::Wait)` if the transfer failed.
    pub fn sync_host(&mut self) -> Result<()> {
        if let Some(event) = self.pending.take() {
            event.wait()?;
        }
        Ok(())
    }

    /// Pinned host array, after any outstanding transfer completes
    ///
    /// # Errors
    ///
    /// Returns `Err(ClError::Disposed)` after dispose, `Err(ClError::InvalidArgument)`
    /// if the buffer has no pin, `Err(ClError::Wait)` if the pending transfer failed.
    pub fn host_data(&mut self) -> Result<&[T]> {
        self.live()?;
        self.sync_host()?;
        match &self.pin {
            Some(pin) => pin.as_slice(),
            None => Err(ClError::InvalidArgument(
                "memory object has no pinned host data".to_string(),
            )),
        }
    }

    /// Pinned host array, mutably, after any outstanding transfer completes
    ///
    /// # Errors
    ///
    /// Same as [`host_data`](Self::host_data).
    pub fn host_data_mut(&mut self) -> Result<&mut [T]> {
        self.live()?;
        self.sync_host()?;
        match &mut self.pin {
            Some(pin) => pin.as_mut_slice(),
            None => Err(ClError::InvalidArgument(
                "memory object has no pinned host data".to_string(),
            )),
        }
    }

    /// Pin `data` as this buffer's host array
    ///
    /// # Errors
    ///
    /// Returns `Err(ClError::PinActive)` while a previous pin is still active.
    pub fn pin(&mut self, data: Vec<T>) -> Result<()> {
        self.live()?;
        if self.has_pin() {
            return Err(ClError::PinActive);
        }
        self.pin = Some(PinnedHostBuffer::acquire(data));
        Ok(())
    }

    /// Release the pin after any outstanding transfer completes
    ///
    /// Returns `true` if a pin was released.
    ///
    /// # Errors
    ///
    /// Returns `Err(ClError::InvalidArgument)` if the pin backs a
    /// `USE_HOST_PTR` allocation, which needs it until dispose.
    pub fn unpin(&mut self) -> Result<bool> {
        self.live()?;
        if self.has_pin() && self.flags.contains(MemFlags::USE_HOST_PTR) {
            return Err(ClError::InvalidArgument(
                "pin backs a USE_HOST_PTR allocation".to_string(),
            ));
        }
        self.sync_host()?;
        Ok(self.pin.take().is_some_and(|mut pin| pin.release()))
    }

    /// Pin used as a transfer endpoint, sized to `len` elements
    ///
    /// Waits for the previous transfer through the pin, reuses an active pin
    /// of at least `len` elements and otherwise replaces it with a zeroed one.
    pub(crate) fn transfer_pin(&mut self, len: usize) -> Result<&mut PinnedHostBuffer<T>> {
        self.live()?;
        self.sync_host()?;
        let reusable = self
            .pin
            .as_ref()
            .is_some_and(|pin| pin.is_active() && pin.len() >= len);
        if !reusable {
            if self.flags.contains(MemFlags::USE_HOST_PTR) && self.has_pin() {
                return Err(ClError::InvalidArgument(
                    "USE_HOST_PTR pin is smaller than the device buffer".to_string(),
                ));
            }
            if let Some(mut old) = self.pin.take() {
                old.release();
            }
            self.pin = Some(PinnedHostBuffer::zeroed(len));
        }
        match &mut self.pin {
            Some(pin) => Ok(pin),
            None => Err(ClError::Disposed("pinned host buffer")),
        }
    }

    /// Track the event of a non-blocking transfer through the pin
    pub(crate) fn set_pending(&mut self, event: Event) {
        if let Some(mut previous) = self.pending.replace(event) {
            previous.release();
        }
    }
}

impl<T: HostElement> Drop for MemoryObject<T> {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl<T: HostElement> fmt::Debug for MemoryObject<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryObject")
            .field("handle", &self.handle)
            .field("flags", &self.flags)
            .field("pin", &self.pin)
            .field("owned", &self.owned)
            .field("disposed", &self.disposed)
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::sys::{
        CL_INVALID_BUFFER_SIZE, CL_MEM_OBJECT_BUFFER, CL_MISALIGNED_SUB_BUFFER_OFFSET,
        CL_OUT_OF_RESOURCES,
    };
    use crate::testing::{HandleKind, MockDriver};

    fn context(mock: &MockDriver) -> Context {
        Context::new(mock.driver(), mock.platform(), &mock.devices()).unwrap()
    }

    #[test]
    fn test_allocate_size_matches_data() {
        let mock = MockDriver::install();
        let ctx = context(&mock);
        let buf = MemoryObject::allocate(
            &ctx,
            vec![1i32, 2, 3, 4],
            MemFlags::READ_WRITE | MemFlags::USE_HOST_PTR,
        )
        .unwrap();
        assert_eq!(buf.size().unwrap(), 16);
        assert!(buf.has_pin());
        assert!(buf.is_owned());
        assert_eq!(buf.mem_type().unwrap(), CL_MEM_OBJECT_BUFFER);
        assert_eq!(buf.context().unwrap(), ctx.handle());
    }

    #[test]
    fn test_allocate_adds_copy_host_ptr() {
        let mock = MockDriver::install();
        let ctx = context(&mock);
        let buf = MemoryObject::allocate(&ctx, vec![1.0f32; 8], MemFlags::READ_ONLY).unwrap();
        let flags = buf.flags().unwrap();
        assert!(flags.contains(MemFlags::COPY_HOST_PTR));
        assert!(flags.contains(MemFlags::READ_ONLY));
        assert_eq!(mock.device_bytes(buf.handle()).len(), 32);
    }

    #[test]
    fn test_host_ptr_is_pin_address() {
        let mock = MockDriver::install();
        let ctx = context(&mock);
        let buf = MemoryObject::allocate(
            &ctx,
            vec![9u8; 4],
            MemFlags::READ_WRITE | MemFlags::USE_HOST_PTR,
        )
        .unwrap();
        let host = buf.host_ptr().unwrap();
        assert!(host.is_some());
    }

    #[test]
    fn test_null_fields_resolve_to_none() {
        let mock = MockDriver::install();
        let ctx = context(&mock);
        let buf = MemoryObject::<u32>::allocate_empty(&ctx, 4, MemFlags::READ_WRITE).unwrap();
        assert_eq!(buf.host_ptr().unwrap(), None);
        assert_eq!(buf.associated_memobject().unwrap(), None);
        assert!(!buf.has_pin());
    }

    #[test]
    fn test_allocate_failure_releases_pin() {
        let mock = MockDriver::install();
        let ctx = context(&mock);
        mock.fail_next("clCreateBuffer", CL_OUT_OF_RESOURCES);
        let err = MemoryObject::allocate(&ctx, vec![1i32; 4], MemFlags::READ_WRITE).unwrap_err();
        assert_eq!(
            err,
            ClError::Creation {
                what: "buffer",
                code: Status(CL_OUT_OF_RESOURCES),
            }
        );
        assert!(err.to_string().contains("CL_OUT_OF_RESOURCES"));
        assert_eq!(mock.live_objects(HandleKind::Mem), 0);
    }

    #[test]
    fn test_allocate_empty_zero_len_rejected() {
        let mock = MockDriver::install();
        let ctx = context(&mock);
        let err = MemoryObject::<f32>::allocate_empty(&ctx, 0, MemFlags::READ_WRITE).unwrap_err();
        assert_eq!(err.status(), Some(Status(CL_INVALID_BUFFER_SIZE)));
    }

    #[test]
    fn test_dispose_twice() {
        let mock = MockDriver::install();
        let ctx = context(&mock);
        let mut buf = MemoryObject::allocate(&ctx, vec![1u16; 2], MemFlags::READ_WRITE).unwrap();
        let handle = buf.handle();
        buf.dispose();
        buf.dispose();
        drop(buf);
        assert_eq!(mock.releases_of(handle.addr()), 1);
    }

    #[test]
    fn test_use_after_dispose_rejected() {
        let mock = MockDriver::install();
        let ctx = context(&mock);
        let mut buf = MemoryObject::allocate(&ctx, vec![1i32; 4], MemFlags::READ_WRITE).unwrap();
        buf.dispose();
        assert_eq!(buf.size().unwrap_err(), ClError::Disposed("memory object"));
        assert_eq!(buf.host_data().unwrap_err(), ClError::Disposed("memory object"));
        assert!(!buf.has_pin());
    }

    #[test]
    fn test_release_failure_still_unpins() {
        let mock = MockDriver::install();
        let ctx = context(&mock);
        let mut buf = MemoryObject::allocate(&ctx, vec![1i32; 4], MemFlags::READ_WRITE).unwrap();
        mock.fail_next("clReleaseMemObject", CL_OUT_OF_RESOURCES);
        buf.dispose();
        assert!(buf.is_disposed());
        assert!(!buf.has_pin());
    }

    #[test]
    fn test_from_handle_never_releases() {
        let mock = MockDriver::install();
        let ctx = context(&mock);
        let owner = MemoryObject::<i32>::allocate_empty(&ctx, 4, MemFlags::READ_WRITE).unwrap();
        let mut view = MemoryObject::<i32>::from_handle(mock.driver(), owner.handle());
        assert!(!view.is_owned());
        assert_eq!(view.size().unwrap(), 16);
        view.dispose();
        drop(view);
        assert_eq!(mock.releases_of(owner.handle().addr()), 0);
    }

    #[test]
    fn test_sub_buffer_parent() {
        let mock = MockDriver::install();
        let ctx = context(&mock);
        let parent = MemoryObject::<f32>::allocate_empty(&ctx, 64, MemFlags::READ_WRITE).unwrap();
        let sub = parent.create_sub_buffer(MemFlags::READ_WRITE, 16, 8).unwrap();
        assert_eq!(sub.associated_memobject().unwrap(), Some(parent.handle()));
        assert_eq!(sub.offset().unwrap(), 64);
        assert_eq!(sub.size().unwrap(), 32);
        assert!(sub.is_owned());
        assert!(!sub.has_pin());
    }

    #[test]
    fn test_allocate_empty_size_overflow_rejected() {
        let mock = MockDriver::install();
        let ctx = context(&mock);
        let err = MemoryObject::<u32>::allocate_empty(&ctx, usize::MAX / 2, MemFlags::READ_WRITE)
            .unwrap_err();
        assert_eq!(
            err,
            ClError::Creation {
                what: "buffer",
                code: Status(CL_INVALID_BUFFER_SIZE),
            }
        );
        assert_eq!(mock.live_objects(HandleKind::Mem), 0);
    }

    #[test]
    fn test_sub_buffer_region_overflow_rejected() {
        let mock = MockDriver::install();
        let ctx = context(&mock);
        let parent = MemoryObject::<f64>::allocate_empty(&ctx, 16, MemFlags::READ_WRITE).unwrap();
        for (origin, len) in [(usize::MAX / 4, 2), (0, usize::MAX / 4)] {
            let err = parent.create_sub_buffer(MemFlags::READ_WRITE, origin, len).unwrap_err();
            assert_eq!(
                err,
                ClError::Creation {
                    what: "sub-buffer",
                    code: Status(CL_INVALID_BUFFER_SIZE),
                }
            );
        }
        assert_eq!(mock.live_objects(HandleKind::Mem), 1);
    }

    #[test]
    fn test_sub_buffer_keeps_use_host_ptr_array() {
        let mock = MockDriver::install();
        let ctx = context(&mock);
        let mut parent = MemoryObject::allocate(
            &ctx,
            (0u8..64).collect::<Vec<u8>>(),
            MemFlags::READ_WRITE | MemFlags::USE_HOST_PTR,
        )
        .unwrap();
        let mut sub = parent.create_sub_buffer(MemFlags::READ_WRITE, 16, 16).unwrap();
        assert!(sub.shares_host_array());
        let host = sub.host_ptr().unwrap().unwrap().cast::<u8>();

        parent.dispose();
        assert!(!parent.has_pin());
        assert!(sub.shares_host_array());
        // SAFETY: the sub-buffer holds the parent's host array, 16 bytes at `host`
        let aliased = unsafe { std::slice::from_raw_parts(host.cast_const(), 16) };
        assert_eq!(aliased, &(16u8..32).collect::<Vec<_>>()[..]);

        sub.dispose();
        assert!(!sub.shares_host_array());
        assert_eq!(mock.live_objects(HandleKind::Mem), 0);
    }

    #[test]
    fn test_sub_buffer_of_plain_buffer_shares_nothing() {
        let mock = MockDriver::install();
        let ctx = context(&mock);
        let parent = MemoryObject::allocate(&ctx, vec![1u8; 32], MemFlags::READ_WRITE).unwrap();
        let sub = parent.create_sub_buffer(MemFlags::READ_WRITE, 16, 16).unwrap();
        assert!(!parent.shares_host_array());
        assert!(!sub.shares_host_array());
    }

    #[test]
    fn test_sub_buffer_misaligned() {
        let mock = MockDriver::install();
        let ctx = context(&mock);
        let parent = MemoryObject::<u8>::allocate_empty(&ctx, 64, MemFlags::READ_WRITE).unwrap();
        let err = parent.create_sub_buffer(MemFlags::READ_WRITE, 3, 8).unwrap_err();
        assert_eq!(
            err,
            ClError::Creation {
                what: "sub-buffer",
                code: Status(CL_MISALIGNED_SUB_BUFFER_OFFSET),
            }
        );
    }

    #[test]
    fn test_pin_replace_rules() {
        let mock = MockDriver::install();
        let ctx = context(&mock);
        let mut buf = MemoryObject::<i32>::allocate_empty(&ctx, 4, MemFlags::READ_WRITE).unwrap();
        buf.pin(vec![1, 2, 3, 4]).unwrap();
        assert_eq!(buf.pin(vec![5]).unwrap_err(), ClError::PinActive);
        assert!(buf.unpin().unwrap());
        assert!(!buf.unpin().unwrap());
        buf.pin(vec![5, 6]).unwrap();
        assert_eq!(buf.host_data().unwrap(), &[5, 6]);
    }

    #[test]
    fn test_unpin_use_host_ptr_rejected() {
        let mock = MockDriver::install();
        let ctx = context(&mock);
        let mut buf = MemoryObject::allocate(
            &ctx,
            vec![1i32; 4],
            MemFlags::READ_WRITE | MemFlags::USE_HOST_PTR,
        )
        .unwrap();
        assert!(matches!(buf.unpin(), Err(ClError::InvalidArgument(_))));
        assert!(buf.has_pin());
    }

    #[test]
    fn test_host_data_without_pin() {
        let mock = MockDriver::install();
        let ctx = context(&mock);
        let mut buf = MemoryObject::<i32>::allocate_empty(&ctx, 4, MemFlags::READ_WRITE).unwrap();
        assert!(matches!(buf.host_data(), Err(ClError::InvalidArgument(_))));
    }
}
