//! Platform and device discovery
//!
//! [`enumerate_platforms`] is an explicit call with no process-wide cache;
//! it is idempotent and callers keep the result if they need it again.
//! Platforms and root devices are not reference counted, so nothing here
//! is released.

use std::ptr;

use crate::driver::query::{info_ptr, info_string, info_u32, info_u64, info_usize, split_list};
use crate::driver::sys::{
    cl_device_id, cl_platform_id, cl_uint, ClDriver, CL_DEVICE_EXTENSIONS,
    CL_DEVICE_GLOBAL_MEM_SIZE, CL_DEVICE_MAX_COMPUTE_UNITS, CL_DEVICE_MAX_WORK_GROUP_SIZE,
    CL_DEVICE_NAME, CL_DEVICE_NOT_FOUND, CL_DEVICE_PLATFORM, CL_DEVICE_TYPE, CL_DEVICE_VENDOR,
    CL_DEVICE_VERSION, CL_DRIVER_VERSION, CL_PLATFORM_EXTENSIONS, CL_PLATFORM_NAME,
    CL_PLATFORM_PROFILE, CL_PLATFORM_VENDOR, CL_PLATFORM_VERSION,
};
use crate::driver::{DeviceId, DeviceType, PlatformId};
use crate::error::{check, ClError, Result};

/// List every platform the driver exposes
///
/// # Errors
///
/// Returns `Err(ClError::Query)` if the platform list or any platform
/// attribute cannot be queried.
pub fn enumerate_platforms(driver: &'static ClDriver) -> Result<Vec<Platform>> {
    let list_err = |code| ClError::Query {
        what: "platform list",
        param: 0,
        code,
    };

    let mut count: cl_uint = 0;
    // SAFETY: count query only
    let result = unsafe { (driver.clGetPlatformIDs)(0, ptr::null_mut(), &mut count) };
    check(result, list_err)?;
    if count == 0 {
        return Ok(Vec::new());
    }

    let mut ids: Vec<cl_platform_id> = vec![ptr::null_mut(); count as usize];
    // SAFETY: ids has room for `count` handles
    let result = unsafe { (driver.clGetPlatformIDs)(count, ids.as_mut_ptr(), ptr::null_mut()) };
    check(result, list_err)?;

    ids.into_iter()
        .map(|id| Platform::query(driver, PlatformId::from_raw(id)))
        .collect()
}

// ============================================================================
// Platform
// ============================================================================

/// Platform attribute snapshot
#[derive(Debug, Clone)]
pub struct Platform {
    driver: &'static ClDriver,
    id: PlatformId,
    /// Platform name
    pub name: String,
    /// Vendor
    pub vendor: String,
    /// OpenCL version string
    pub version: String,
    /// `FULL_PROFILE` or `EMBEDDED_PROFILE`
    pub profile: String,
    /// Supported extensions
    pub extensions: Vec<String>,
}

impl Platform {
    /// Query every attribute of `id`
    ///
    /// # Errors
    ///
    /// Returns `Err(ClError::Query)` if any attribute query fails.
    pub fn query(driver: &'static ClDriver, id: PlatformId) -> Result<Self> {
        let info = driver.clGetPlatformInfo;
        let raw = id.as_raw();
        Ok(Self {
            driver,
            id,
            name: info_string(info, raw, "platform", CL_PLATFORM_NAME)?,
            vendor: info_string(info, raw, "platform", CL_PLATFORM_VENDOR)?,
            version: info_string(info, raw, "platform", CL_PLATFORM_VERSION)?,
            profile: info_string(info, raw, "platform", CL_PLATFORM_PROFILE)?,
            extensions: split_list(&info_string(info, raw, "platform", CL_PLATFORM_EXTENSIONS)?),
        })
    }

    /// Native handle
    #[must_use]
    pub fn id(&self) -> PlatformId {
        self.id
    }

    /// Check for an extension
    #[must_use]
    pub fn has_extension(&self, name: &str) -> bool {
        self.extensions.iter().any(|e| e == name)
    }

    /// Devices of the given type; empty when none match
    ///
    /// # Errors
    ///
    /// Returns `Err(ClError::Query)` if the device list or a device
    /// attribute cannot be queried.
    pub fn devices(&self, device_type: DeviceType) -> Result<Vec<Device>> {
        let list_err = |code| ClError::Query {
            what: "device list",
            param: 0,
            code,
        };
        let raw = self.id.as_raw();

        let mut count: cl_uint = 0;
        // SAFETY: count query only
        let result = unsafe {
            (self.driver.clGetDeviceIDs)(raw, device_type.bits(), 0, ptr::null_mut(), &mut count)
        };
        if result == CL_DEVICE_NOT_FOUND {
            return Ok(Vec::new());
        }
        check(result, list_err)?;
        if count == 0 {
            return Ok(Vec::new());
        }

        let mut ids: Vec<cl_device_id> = vec![ptr::null_mut(); count as usize];
        // SAFETY: ids has room for `count` handles
        let result = unsafe {
            (self.driver.clGetDeviceIDs)(raw, device_type.bits(), count, ids.as_mut_ptr(), ptr::null_mut())
        };
        check(result, list_err)?;

        ids.into_iter()
            .map(|id| Device::query(self.driver, DeviceId::from_raw(id)))
            .collect()
    }
}

// ============================================================================
// Device
// ============================================================================

/// Device attribute snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    /// Native handle
    pub id: DeviceId,
    /// Owning platform
    pub platform: PlatformId,
    /// Device name
    pub name: String,
    /// Vendor
    pub vendor: String,
    /// OpenCL version string
    pub version: String,
    /// Driver version string
    pub driver_version: String,
    /// Device type
    pub device_type: DeviceType,
    /// Compute units
    pub max_compute_units: u32,
    /// Maximum work-group size
    pub max_work_group_size: usize,
    /// Global memory in bytes
    pub global_mem_size: u64,
    /// Supported extensions
    pub extensions: Vec<String>,
}

impl Device {
    /// Query every attribute of `id`
    ///
    /// # Errors
    ///
    /// Returns `Err(ClError::Query)` if any attribute query fails.
    pub fn query(driver: &'static ClDriver, id: DeviceId) -> Result<Self> {
        const WHAT: &str = "device";
        let info = driver.clGetDeviceInfo;
        let raw = id.as_raw();
        Ok(Self {
            id,
            platform: PlatformId::from_raw(info_ptr(info, raw, WHAT, CL_DEVICE_PLATFORM)?),
            name: info_string(info, raw, WHAT, CL_DEVICE_NAME)?,
            vendor: info_string(info, raw, WHAT, CL_DEVICE_VENDOR)?,
            version: info_string(info, raw, WHAT, CL_DEVICE_VERSION)?,
            driver_version: info_string(info, raw, WHAT, CL_DRIVER_VERSION)?,
            device_type: DeviceType::from_bits(info_u64(info, raw, WHAT, CL_DEVICE_TYPE)?),
            max_compute_units: info_u32(info, raw, WHAT, CL_DEVICE_MAX_COMPUTE_UNITS)?,
            max_work_group_size: info_usize(info, raw, WHAT, CL_DEVICE_MAX_WORK_GROUP_SIZE)?,
            global_mem_size: info_u64(info, raw, WHAT, CL_DEVICE_GLOBAL_MEM_SIZE)?,
            extensions: split_list(&info_string(info, raw, WHAT, CL_DEVICE_EXTENSIONS)?),
        })
    }

    /// Check for an extension
    #[must_use]
    pub fn has_extension(&self, name: &str) -> bool {
        self.extensions.iter().any(|e| e == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::sys::CL_OUT_OF_HOST_MEMORY;
    use crate::error::Status;
    use crate::testing::MockDriver;

    #[test]
    fn test_enumerate_platforms() {
        let mock = MockDriver::install();
        let platforms = enumerate_platforms(mock.driver()).unwrap();
        assert_eq!(platforms.len(), 1);
        let platform = &platforms[0];
        assert_eq!(platform.id(), mock.platform());
        assert_eq!(platform.name, "Trueno Mock Platform");
        assert_eq!(platform.profile, "FULL_PROFILE");
        assert_eq!(platform.extensions, vec!["cl_khr_icd", "cl_khr_fp64"]);
        assert!(platform.has_extension("cl_khr_fp64"));
    }

    #[test]
    fn test_enumerate_is_idempotent() {
        let mock = MockDriver::install();
        let a = enumerate_platforms(mock.driver()).unwrap();
        let b = enumerate_platforms(mock.driver()).unwrap();
        assert_eq!(a.len(), b.len());
        assert_eq!(a[0].id(), b[0].id());
        assert_eq!(a[0].name, b[0].name);
    }

    #[test]
    fn test_devices_by_type() {
        let mock = MockDriver::install();
        let platform = enumerate_platforms(mock.driver()).unwrap().remove(0);
        let all = platform.devices(DeviceType::ALL).unwrap();
        assert_eq!(all.len(), 2);
        let gpus = platform.devices(DeviceType::GPU).unwrap();
        assert_eq!(gpus.len(), 1);
        let gpu = &gpus[0];
        assert_eq!(gpu.id, mock.devices()[0]);
        assert_eq!(gpu.platform, mock.platform());
        assert_eq!(gpu.device_type, DeviceType::GPU);
        assert!(gpu.max_compute_units > 0);
        assert!(gpu.max_work_group_size >= 64);
        assert!(gpu.global_mem_size > 0);
        assert!(!gpu.name.is_empty());
    }

    #[test]
    fn test_no_matching_devices_is_empty() {
        let mock = MockDriver::install();
        let platform = enumerate_platforms(mock.driver()).unwrap().remove(0);
        assert!(platform.devices(DeviceType::ACCELERATOR).unwrap().is_empty());
    }

    #[test]
    fn test_platform_list_failure() {
        let mock = MockDriver::install();
        mock.fail_next("clGetPlatformIDs", CL_OUT_OF_HOST_MEMORY);
        let err = enumerate_platforms(mock.driver()).unwrap_err();
        assert_eq!(err.status(), Some(Status(CL_OUT_OF_HOST_MEMORY)));
    }
}
