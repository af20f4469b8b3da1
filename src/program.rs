//! OpenCL Programs
//!
//! A [`Program`] is created and built in one step. A build failure never
//! yields a `Program`: the per-device status and log are collected into a
//! [`BuildReport`], the program handle is released, and `ClError::Build` is
//! returned. A successful build creates every kernel of the program.

use std::ffi::{c_char, CString};
use std::fmt;
use std::ptr;

use tracing::{debug, warn};

use crate::context::Context;
use crate::driver::query::{
    decode_i32, decode_string, info_ptr, info_string, info_u32, info_usize, query_info,
    split_semicolons,
};
use crate::driver::sys::{
    cl_device_id, cl_int, cl_kernel, cl_program, cl_uint, ClDriver, CL_BUILD_ERROR,
    CL_BUILD_IN_PROGRESS, CL_BUILD_NONE, CL_BUILD_SUCCESS, CL_PROGRAM_BUILD_LOG,
    CL_PROGRAM_BUILD_OPTIONS, CL_PROGRAM_BUILD_STATUS, CL_PROGRAM_CONTEXT, CL_PROGRAM_KERNEL_NAMES,
    CL_PROGRAM_NUM_DEVICES, CL_PROGRAM_NUM_KERNELS, CL_PROGRAM_REFERENCE_COUNT,
    CL_PROGRAM_SOURCE, CL_SUCCESS,
};
use crate::driver::{ContextHandle, DeviceId, ProgramHandle};
use crate::error::{check, ClError, Result, Status};
use crate::kernel::{self, Kernel};

const WHAT: &str = "program";

/// Compiler flag that makes kernel argument metadata queryable
pub const KERNEL_ARG_INFO_FLAG: &str = "-cl-kernel-arg-info";

// ============================================================================
// Build Options
// ============================================================================

/// Build configuration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildOptions {
    /// Devices to build for (`None` for every context device)
    pub devices: Option<Vec<DeviceId>>,
    /// Extra compiler flags
    pub flags: Vec<String>,
}

impl BuildOptions {
    /// Build for every context device with no extra flags
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict the build to `devices`
    #[must_use]
    pub fn devices(mut self, devices: &[DeviceId]) -> Self {
        self.devices = Some(devices.to_vec());
        self
    }

    /// Append a compiler flag
    #[must_use]
    pub fn flag(mut self, flag: impl Into<String>) -> Self {
        self.flags.push(flag.into());
        self
    }

    /// Option string handed to the compiler
    ///
    /// Always contains [`KERNEL_ARG_INFO_FLAG`] exactly once.
    #[must_use]
    pub fn effective_flags(&self) -> String {
        let mut flags: Vec<&str> = vec![KERNEL_ARG_INFO_FLAG];
        flags.extend(
            self.flags
                .iter()
                .map(String::as_str)
                .filter(|f| !f.trim().is_empty() && *f != KERNEL_ARG_INFO_FLAG),
        );
        flags.join(" ")
    }
}

// ============================================================================
// Build Report
// ============================================================================

/// Per-device build state (`CL_PROGRAM_BUILD_STATUS`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildStatus {
    /// Built successfully
    Success,
    /// No build attempted
    None,
    /// Build failed
    Error,
    /// Build running
    InProgress,
    /// Value not defined by OpenCL 1.2
    Unknown(cl_int),
}

impl BuildStatus {
    /// Decode a raw build status
    #[must_use]
    pub fn from_raw(raw: cl_int) -> Self {
        match raw {
            CL_BUILD_SUCCESS => Self::Success,
            CL_BUILD_NONE => Self::None,
            CL_BUILD_ERROR => Self::Error,
            CL_BUILD_IN_PROGRESS => Self::InProgress,
            other => Self::Unknown(other),
        }
    }
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => f.write_str("CL_BUILD_SUCCESS"),
            Self::None => f.write_str("CL_BUILD_NONE"),
            Self::Error => f.write_str("CL_BUILD_ERROR"),
            Self::InProgress => f.write_str("CL_BUILD_IN_PROGRESS"),
            Self::Unknown(raw) => write!(f, "unknown build status {}", raw),
        }
    }
}

/// Build outcome of one device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceBuildLog {
    /// Device
    pub device: DeviceId,
    /// Build status (`None` when the status query failed)
    pub status: Option<BuildStatus>,
    /// Compiler output
    pub log: String,
}

/// Aggregated per-device build status and log
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildReport {
    /// One entry per device the build targeted
    pub devices: Vec<DeviceBuildLog>,
}

impl BuildReport {
    /// Concatenated compiler output of every device
    #[must_use]
    pub fn log(&self) -> String {
        self.devices
            .iter()
            .map(|d| d.log.trim_end())
            .filter(|log| !log.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Check for any non-empty device log
    #[must_use]
    pub fn has_log(&self) -> bool {
        self.devices.iter().any(|d| !d.log.trim().is_empty())
    }
}

impl fmt::Display for BuildReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for entry in &self.devices {
            match entry.status {
                Some(status) => writeln!(f, "device {:?}: {}", entry.device, status)?,
                None => writeln!(f, "device {:?}: status unavailable", entry.device)?,
            }
            let log = entry.log.trim_end();
            if !log.is_empty() {
                writeln!(f, "{}", log)?;
            }
        }
        Ok(())
    }
}

// ============================================================================
// Program
// ============================================================================

/// Built program owning its kernels
pub struct Program {
    driver: &'static ClDriver,
    handle: ProgramHandle,
    context: ContextHandle,
    devices: Vec<DeviceId>,
    kernels: Vec<Kernel>,
    owned: bool,
    disposed: bool,
}

impl Program {
    /// Create a program from source and build it
    ///
    /// # Arguments
    ///
    /// * `context` - Owning context
    /// * `source` - Source text, passed to the driver unmodified
    /// * `options` - Target devices and extra flags
    ///
    /// # Errors
    ///
    /// Returns `Err(ClError::Creation)` if the program object cannot be
    /// created and `Err(ClError::Build)` if the build fails; in the latter
    /// case the program handle has been released.
    pub fn create(context: &Context, source: &str, options: &BuildOptions) -> Result<Self> {
        let ctx = context.live_handle()?;
        let driver = context.driver();
        let strings = [source.as_ptr().cast::<c_char>()];
        let lengths = [source.len()];

        let mut err = CL_SUCCESS;
        // SAFETY: one string of the given length; the driver copies it
        let raw = unsafe {
            (driver.clCreateProgramWithSource)(ctx.as_raw(), 1, strings.as_ptr(), lengths.as_ptr(), &mut err)
        };
        let program = Self::adopt(driver, ctx, raw, err)?;
        program.build(context.devices(), options)
    }

    /// Create a program from per-device binaries and build it
    ///
    /// Without explicit `options.devices` the build targets the binaries'
    /// devices.
    ///
    /// # Errors
    ///
    /// Same as [`Program::create`].
    pub fn create_with_binary(
        context: &Context,
        binaries: &[(DeviceId, &[u8])],
        options: &BuildOptions,
    ) -> Result<Self> {
        let ctx = context.live_handle()?;
        let driver = context.driver();
        let devices: Vec<DeviceId> = binaries.iter().map(|(device, _)| *device).collect();
        let lengths: Vec<usize> = binaries.iter().map(|(_, bin)| bin.len()).collect();
        let pointers: Vec<*const u8> = binaries.iter().map(|(_, bin)| bin.as_ptr()).collect();
        let mut binary_status = vec![CL_SUCCESS; binaries.len()];

        let mut err = CL_SUCCESS;
        // SAFETY: devices, lengths, pointers and binary_status all have binaries.len() entries
        let raw = unsafe {
            (driver.clCreateProgramWithBinary)(
                ctx.as_raw(),
                binaries.len() as cl_uint,
                devices.as_ptr().cast::<cl_device_id>(),
                lengths.as_ptr(),
                pointers.as_ptr(),
                binary_status.as_mut_ptr(),
                &mut err,
            )
        };
        if err == CL_SUCCESS {
            if let Some(&bad) = binary_status.iter().find(|&&s| s != CL_SUCCESS) {
                err = bad;
            }
        }
        let program = Self::adopt(driver, ctx, raw, err)?;
        program.build(&devices, options)
    }

    fn adopt(driver: &'static ClDriver, context: ContextHandle, raw: cl_program, err: cl_int) -> Result<Self> {
        if err != CL_SUCCESS || raw.is_null() {
            if !raw.is_null() {
                release_raw(driver, raw);
            }
            return Err(ClError::Creation {
                what: WHAT,
                code: Status(err),
            });
        }
        debug!("created program {:?}", raw);
        Ok(Self {
            driver,
            handle: ProgramHandle::from_raw(raw),
            context,
            devices: Vec::new(),
            kernels: Vec::new(),
            owned: true,
            disposed: false,
        })
    }

    /// Build for the requested devices, then create every kernel
    fn build(mut self, default_devices: &[DeviceId], options: &BuildOptions) -> Result<Self> {
        let devices = options
            .devices
            .clone()
            .unwrap_or_else(|| default_devices.to_vec());
        let flags = CString::new(options.effective_flags())
            .map_err(|_| ClError::InvalidArgument("build flags contain NUL".to_string()))?;
        let device_ptr = if devices.is_empty() {
            ptr::null()
        } else {
            devices.as_ptr().cast::<cl_device_id>()
        };

        // SAFETY: device_ptr holds devices.len() handles; flags is NUL-terminated
        let result = unsafe {
            (self.driver.clBuildProgram)(
                self.handle.as_raw(),
                devices.len() as cl_uint,
                device_ptr,
                flags.as_ptr(),
                None,
                ptr::null_mut(),
            )
        };
        if result != CL_SUCCESS {
            let report = self.build_report(&devices);
            warn!("build of program {:?} failed: {}", self.handle, Status(result));
            self.dispose();
            return Err(ClError::Build {
                code: Status(result),
                report,
            });
        }

        self.devices = devices;
        self.kernels = self.create_all_kernels()?;
        debug!(
            "built program {:?} with {} kernels",
            self.handle,
            self.kernels.len()
        );
        Ok(self)
    }

    fn build_report(&self, devices: &[DeviceId]) -> BuildReport {
        BuildReport {
            devices: devices
                .iter()
                .map(|&device| DeviceBuildLog {
                    device,
                    status: self.build_status(device).ok(),
                    log: self.build_log(device).unwrap_or_default(),
                })
                .collect(),
        }
    }

    fn create_all_kernels(&self) -> Result<Vec<Kernel>> {
        let program = self.handle.as_raw();
        let mut count: cl_uint = 0;
        // SAFETY: count query only
        let result =
            unsafe { (self.driver.clCreateKernelsInProgram)(program, 0, ptr::null_mut(), &mut count) };
        check(result, |code| ClError::Creation { what: "kernels", code })?;
        if count == 0 {
            return Ok(Vec::new());
        }

        let mut raw: Vec<cl_kernel> = vec![ptr::null_mut(); count as usize];
        // SAFETY: raw has room for `count` handles
        let result = unsafe {
            (self.driver.clCreateKernelsInProgram)(program, count, raw.as_mut_ptr(), ptr::null_mut())
        };
        check(result, |code| ClError::Creation { what: "kernels", code })?;

        let mut kernels = Vec::with_capacity(raw.len());
        let mut handles = raw.into_iter();
        while let Some(handle) = handles.next() {
            match Kernel::adopt(self.driver, handle) {
                Ok(kernel) => kernels.push(kernel),
                Err(e) => {
                    for rest in handles {
                        kernel::release_raw(self.driver, rest);
                    }
                    return Err(e);
                }
            }
        }
        Ok(kernels)
    }

    /// Wrap an existing program handle without taking ownership
    ///
    /// The wrapper holds no kernels; use [`Program::create_kernel`].
    ///
    /// # Errors
    ///
    /// Returns `Err(ClError::Query)` if the context cannot be queried.
    pub fn from_handle(driver: &'static ClDriver, handle: ProgramHandle) -> Result<Self> {
        let context = info_ptr(driver.clGetProgramInfo, handle.as_raw(), WHAT, CL_PROGRAM_CONTEXT)?;
        Ok(Self {
            driver,
            handle,
            context: ContextHandle::from_raw(context),
            devices: Vec::new(),
            kernels: Vec::new(),
            owned: false,
            disposed: false,
        })
    }

    /// Dispose every kernel, then release the program (owning programs only)
    ///
    /// Idempotent. Failures are logged, never returned.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        for kernel in &mut self.kernels {
            kernel.dispose();
        }
        self.kernels.clear();
        if self.owned {
            release_raw(self.driver, self.handle.as_raw());
        }
    }

    // ------------------------------------------------------------------------
    // Identity & kernels
    // ------------------------------------------------------------------------

    /// Native handle
    #[must_use]
    pub fn handle(&self) -> ProgramHandle {
        self.handle
    }

    /// Context the program was created in
    #[must_use]
    pub fn context(&self) -> ContextHandle {
        self.context
    }

    /// Devices the program was built for
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

    fn live(&self) -> Result<ProgramHandle> {
        if self.disposed {
            Err(ClError::Disposed(WHAT))
        } else {
            Ok(self.handle)
        }
    }

    /// Kernels created by the build
    #[must_use]
    pub fn kernels(&self) -> &[Kernel] {
        &self.kernels
    }

    /// Kernel by function name
    #[must_use]
    pub fn kernel(&self, name: &str) -> Option<&Kernel> {
        self.kernels.iter().find(|k| k.name() == name)
    }

    /// Kernel by function name, mutably (for binding arguments)
    #[must_use]
    pub fn kernel_mut(&mut self, name: &str) -> Option<&mut Kernel> {
        self.kernels.iter_mut().find(|k| k.name() == name)
    }

    /// Move a kernel out of the program
    #[must_use]
    pub fn take_kernel(&mut self, name: &str) -> Option<Kernel> {
        let index = self.kernels.iter().position(|k| k.name() == name)?;
        Some(self.kernels.remove(index))
    }

    /// Create an additional owning kernel instance by name
    ///
    /// # Errors
    ///
    /// Returns `Err(ClError::Creation)` with `CL_INVALID_KERNEL_NAME` for
    /// unknown names.
    pub fn create_kernel(&self, name: &str) -> Result<Kernel> {
        Kernel::create(self.driver, self.live()?, name)
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    /// Driver reference count
    ///
    /// # Errors
    ///
    /// Returns `Err(ClError::Query)` if the query fails.
    pub fn reference_count(&self) -> Result<u32> {
        info_u32(
            self.driver.clGetProgramInfo,
            self.live()?.as_raw(),
            WHAT,
            CL_PROGRAM_REFERENCE_COUNT,
        )
    }

    /// Device count of the program
    ///
    /// # Errors
    ///
    /// Returns `Err(ClError::Query)` if the query fails.
    pub fn num_devices(&self) -> Result<u32> {
        info_u32(
            self.driver.clGetProgramInfo,
            self.live()?.as_raw(),
            WHAT,
            CL_PROGRAM_NUM_DEVICES,
        )
    }

    /// Source text (empty for binary programs)
    ///
    /// # Errors
    ///
    /// Returns `Err(ClError::Query)` if the query fails.
    pub fn source(&self) -> Result<String> {
        info_string(
            self.driver.clGetProgramInfo,
            self.live()?.as_raw(),
            WHAT,
            CL_PROGRAM_SOURCE,
        )
    }

    /// Number of kernels in the built program
    ///
    /// # Errors
    ///
    /// Returns `Err(ClError::Query)` if the query fails.
    pub fn num_kernels(&self) -> Result<usize> {
        info_usize(
            self.driver.clGetProgramInfo,
            self.live()?.as_raw(),
            WHAT,
            CL_PROGRAM_NUM_KERNELS,
        )
    }

    /// Kernel names of the built program
    ///
    /// # Errors
    ///
    /// Returns `Err(ClError::Query)` if the query fails.
    pub fn kernel_names(&self) -> Result<Vec<String>> {
        info_string(
            self.driver.clGetProgramInfo,
            self.live()?.as_raw(),
            WHAT,
            CL_PROGRAM_KERNEL_NAMES,
        )
        .map(|names| split_semicolons(&names))
    }

    fn build_info(&self, device: DeviceId, param: cl_uint) -> Result<Vec<u8>> {
        let driver = self.driver;
        let program = self.handle.as_raw();
        query_info("program build", param, |size, value, size_ret| {
            // SAFETY: query_info passes either (0, null) or a buffer of exactly `size` bytes
            unsafe {
                (driver.clGetProgramBuildInfo)(program, device.as_raw(), param, size, value, size_ret)
            }
        })
    }

    /// Build status on `device`
    ///
    /// # Errors
    ///
    /// Returns `Err(ClError::Query)` if the query fails.
    pub fn build_status(&self, device: DeviceId) -> Result<BuildStatus> {
        self.live()?;
        let bytes = self.build_info(device, CL_PROGRAM_BUILD_STATUS)?;
        decode_i32("program build", &bytes).map(BuildStatus::from_raw)
    }

    /// Compiler output on `device`
    ///
    /// # Errors
    ///
    /// Returns `Err(ClError::Query)` if the query fails.
    pub fn build_log(&self, device: DeviceId) -> Result<String> {
        self.live()?;
        Ok(decode_string(&self.build_info(device, CL_PROGRAM_BUILD_LOG)?))
    }

    /// Options of the last build on `device`
    ///
    /// # Errors
    ///
    /// Returns `Err(ClError::Query)` if the query fails.
    pub fn build_options(&self, device: DeviceId) -> Result<String> {
        self.live()?;
        Ok(decode_string(&self.build_info(device, CL_PROGRAM_BUILD_OPTIONS)?))
    }
}

fn release_raw(driver: &'static ClDriver, raw: cl_program) {
    // SAFETY: caller owns the handle and releases it exactly once
    let result = unsafe { (driver.clReleaseProgram)(raw) };
    if result == CL_SUCCESS {
        debug!("released program {:?}", raw);
    } else {
        warn!("clReleaseProgram({:?}) failed: {}", raw, Status(result));
    }
}

impl Drop for Program {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Program")
            .field("handle", &self.handle)
            .field("devices", &self.devices)
            .field("kernels", &self.kernels)
            .field("owned", &self.owned)
            .field("disposed", &self.disposed)
            .finish()
    }
}
