//! OpenCL Context Management
//!
//! Provides the RAII wrapper for contexts, the allocation scope of queues,
//! buffers and programs.
//!
//! Owning contexts come from an explicit device list or a device-type
//! filter. Wrapped contexts (see [`Context::from_handle`]) only observe the
//! handle. Devices are never owned by the context.

use std::fmt;
use std::ptr;

use tracing::{debug, warn};

use crate::driver::query::{decode_usize_list, get_info, info_ptr_list, info_u32};
use crate::driver::sys::{
    cl_context_properties, cl_device_id, cl_uint, ClDriver, CL_CONTEXT_DEVICES,
    CL_CONTEXT_NUM_DEVICES, CL_CONTEXT_PLATFORM, CL_CONTEXT_PROPERTIES,
    CL_CONTEXT_REFERENCE_COUNT, CL_SUCCESS,
};
use crate::driver::{ContextHandle, DeviceId, DeviceType, PlatformId, QueueProperties};
use crate::error::{ClError, Result, Status};
use crate::queue::CommandQueue;

const WHAT: &str = "context";

// ============================================================================
// Context
// ============================================================================

/// OpenCL context with RAII cleanup
///
/// # Example
///
/// ```ignore
/// let platform = enumerate_platforms(driver)?.remove(0);
/// let devices = platform.devices(DeviceType::GPU)?;
/// let ctx = Context::new(driver, platform.id(), &[devices[0].id])?;
/// let queue = ctx.create_queue(devices[0].id, QueueProperties::empty())?;
/// ```
pub struct Context {
    driver: &'static ClDriver,
    handle: ContextHandle,
    devices: Vec<DeviceId>,
    owned: bool,
    disposed: bool,
}

/// Property list selecting `platform`, or `None` for the driver default
fn platform_properties(platform: PlatformId) -> Option<[cl_context_properties; 3]> {
    (!platform.is_null()).then(|| {
        [
            CL_CONTEXT_PLATFORM,
            platform.addr() as cl_context_properties,
            0,
        ]
    })
}

impl Context {
    /// Create a context for an explicit device list
    ///
    /// # Arguments
    ///
    /// * `driver` - Driver table
    /// * `platform` - Platform to bind (null for the driver default)
    /// * `devices` - Devices the context spans
    ///
    /// # Errors
    ///
    /// Returns `Err(ClError::Creation)` if the driver rejects the device list.
    pub fn new(driver: &'static ClDriver, platform: PlatformId, devices: &[DeviceId]) -> Result<Self> {
        let props = platform_properties(platform);
        let props_ptr = props.as_ref().map_or(ptr::null(), |p| p.as_ptr());
        let devices_ptr = if devices.is_empty() {
            ptr::null()
        } else {
            devices.as_ptr().cast::<cl_device_id>()
        };

        let mut err = CL_SUCCESS;
        // SAFETY: props is zero-terminated; DeviceId is a transparent cl_device_id
        let raw = unsafe {
            (driver.clCreateContext)(
                props_ptr,
                devices.len() as cl_uint,
                devices_ptr,
                None,
                ptr::null_mut(),
                &mut err,
            )
        };
        Self::adopt(driver, raw, err)
    }

    /// Create a context for every device of a given type
    ///
    /// # Errors
    ///
    /// Returns `Err(ClError::Creation)` if no device matches or the driver fails.
    pub fn from_type(
        driver: &'static ClDriver,
        platform: PlatformId,
        device_type: DeviceType,
    ) -> Result<Self> {
        let props = platform_properties(platform);
        let props_ptr = props.as_ref().map_or(ptr::null(), |p| p.as_ptr());

        let mut err = CL_SUCCESS;
        // SAFETY: props is zero-terminated
        let raw = unsafe {
            (driver.clCreateContextFromType)(
                props_ptr,
                device_type.bits(),
                None,
                ptr::null_mut(),
                &mut err,
            )
        };
        Self::adopt(driver, raw, err)
    }

    fn adopt(driver: &'static ClDriver, raw: *mut std::ffi::c_void, err: i32) -> Result<Self> {
        if err != CL_SUCCESS || raw.is_null() {
            return Err(ClError::Creation {
                what: WHAT,
                code: Status(err),
            });
        }
        let mut ctx = Self {
            driver,
            handle: ContextHandle::from_raw(raw),
            devices: Vec::new(),
            owned: true,
            disposed: false,
        };
        debug!("created context {:?}", ctx.handle);
        // on failure `ctx` drops and releases the handle
        ctx.devices = ctx.query_devices()?;
        Ok(ctx)
    }

    /// Wrap an existing context handle without taking ownership
    ///
    /// # Errors
    ///
    /// Returns `Err(ClError::Query)` if the device list cannot be queried.
    pub fn from_handle(driver: &'static ClDriver, handle: ContextHandle) -> Result<Self> {
        let mut ctx = Self {
            driver,
            handle,
            devices: Vec::new(),
            owned: false,
            disposed: false,
        };
        ctx.devices = ctx.query_devices()?;
        Ok(ctx)
    }

    fn query_devices(&self) -> Result<Vec<DeviceId>> {
        info_ptr_list(
            self.driver.clGetContextInfo,
            self.handle.as_raw(),
            WHAT,
            CL_CONTEXT_DEVICES,
        )
        .map(|raw| raw.into_iter().map(DeviceId::from_raw).collect())
    }

    /// Release the handle (owning contexts only)
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
        let result = unsafe { (self.driver.clReleaseContext)(self.handle.as_raw()) };
        if result == CL_SUCCESS {
            debug!("released context {:?}", self.handle);
        } else {
            warn!("clReleaseContext({:?}) failed: {}", self.handle, Status(result));
        }
    }

    /// Native handle
    #[must_use]
    pub fn handle(&self) -> ContextHandle {
        self.handle
    }

    /// Driver table
    #[must_use]
    pub fn driver(&self) -> &'static ClDriver {
        self.driver
    }

    /// Devices enumerated at creation
    #[must_use]
    pub fn devices(&self) -> &[DeviceId] {
        &self.devices
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

    pub(crate) fn live_handle(&self) -> Result<ContextHandle> {
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
            self.driver.clGetContextInfo,
            self.live_handle()?.as_raw(),
            WHAT,
            CL_CONTEXT_REFERENCE_COUNT,
        )
    }

    /// Device count reported by the driver
    ///
    /// # Errors
    ///
    /// Returns `Err(ClError::Query)` if the query fails.
    pub fn num_devices(&self) -> Result<u32> {
        info_u32(
            self.driver.clGetContextInfo,
            self.live_handle()?.as_raw(),
            WHAT,
            CL_CONTEXT_NUM_DEVICES,
        )
    }

    /// Property list the context was created with, without the terminating 0
    ///
    /// # Errors
    ///
    /// Returns `Err(ClError::Query)` if the query fails.
    pub fn properties(&self) -> Result<Vec<cl_context_properties>> {
        let bytes = get_info(
            self.driver.clGetContextInfo,
            self.live_handle()?.as_raw(),
            WHAT,
            CL_CONTEXT_PROPERTIES,
        )?;
        let mut props: Vec<cl_context_properties> = decode_usize_list(WHAT, &bytes)?
            .into_iter()
            .map(|v| v as cl_context_properties)
            .collect();
        if props.last() == Some(&0) {
            props.pop();
        }
        Ok(props)
    }

    /// Create a command queue on one of this context's devices
    ///
    /// # Errors
    ///
    /// Returns `Err(ClError::Creation)` if the driver rejects the queue.
    pub fn create_queue(&self, device: DeviceId, properties: QueueProperties) -> Result<CommandQueue> {
        CommandQueue::new(self, device, properties)
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("handle", &self.handle)
            .field("devices", &self.devices)
            .field("owned", &self.owned)
            .field("disposed", &self.disposed)
            .finish()
    }
}
