//! OpenCL Driver Boundary (Minimal FFI)
//!
//! The C ABI function table, typed handles and the two-phase query
//! primitive shared by every resource wrapper.
//!
//! ## Design Philosophy
//!
//! - **Minimal FFI**: Only bind what we need
//! - **One boundary**: System driver and mock share the same `ClDriver` table
//! - **Safe wrappers**: All unsafe calls live in the resource modules

pub mod query;
pub mod sys;
mod types;

pub use sys::{ClDriver, DriverConfig};
pub use types::*;

/// Get the system OpenCL driver
///
/// # Errors
///
/// Returns `Err(ClError::NotAvailable)` if no ICD loader could be loaded.
pub fn get_driver() -> crate::Result<&'static ClDriver> {
    ClDriver::load().ok_or_else(|| {
        crate::ClError::NotAvailable(format!(
            "no OpenCL library found (set {} to override)",
            sys::LIBRARY_ENV
        ))
    })
}

/// Check if an OpenCL driver with at least one platform is available
#[must_use]
pub fn opencl_available() -> bool {
    ClDriver::load().is_some_and(|driver| {
        let mut count: sys::cl_uint = 0;
        // SAFETY: count is a valid out-pointer; no platform array is written
        let result = unsafe { (driver.clGetPlatformIDs)(0, std::ptr::null_mut(), &mut count) };
        result == sys::CL_SUCCESS && count > 0
    })
}
