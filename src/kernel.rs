//! OpenCL Kernels
//!
//! A [`Kernel`] carries an immutable [`KernelInfo`] snapshot taken when it
//! is created. Rebuilding the program does not refresh it.

use std::ffi::{c_void, CString};
use std::fmt;
use std::mem;
use std::ptr;

use tracing::{debug, warn};

use crate::driver::query::{
    decode_string, decode_u32, decode_u64, info_ptr, info_string, info_u32, query_info, split_list,
};
use crate::driver::sys::{
    cl_kernel, cl_mem, cl_uint, ClDriver, CL_KERNEL_ARG_ACCESS_NONE,
    CL_KERNEL_ARG_ACCESS_QUALIFIER, CL_KERNEL_ARG_ACCESS_READ_ONLY,
    CL_KERNEL_ARG_ACCESS_READ_WRITE, CL_KERNEL_ARG_ACCESS_WRITE_ONLY,
    CL_KERNEL_ARG_ADDRESS_CONSTANT, CL_KERNEL_ARG_ADDRESS_GLOBAL, CL_KERNEL_ARG_ADDRESS_LOCAL,
    CL_KERNEL_ARG_ADDRESS_PRIVATE, CL_KERNEL_ARG_ADDRESS_QUALIFIER,
    CL_KERNEL_ARG_INFO_NOT_AVAILABLE, CL_KERNEL_ARG_NAME, CL_KERNEL_ARG_TYPE_NAME,
    CL_KERNEL_ARG_TYPE_QUALIFIER, CL_KERNEL_ATTRIBUTES, CL_KERNEL_CONTEXT,
    CL_KERNEL_FUNCTION_NAME, CL_KERNEL_NUM_ARGS, CL_KERNEL_PROGRAM, CL_KERNEL_REFERENCE_COUNT,
    CL_SUCCESS,
};
use crate::driver::{ContextHandle, HostElement, KernelHandle, ProgramHandle, TypeQualifiers};
use crate::error::{check, ClError, Result, Status};
use crate::memory::MemoryObject;

const WHAT: &str = "kernel";

// ============================================================================
// Argument Metadata
// ============================================================================

/// Address space of a kernel argument
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressQualifier {
    /// `__global`
    Global,
    /// `__local`
    Local,
    /// `__constant`
    Constant,
    /// `__private` (by-value arguments)
    Private,
    /// Value not defined by OpenCL 1.2
    Unknown(u32),
}

impl AddressQualifier {
    /// Decode a `CL_KERNEL_ARG_ADDRESS_*` value
    #[must_use]
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            CL_KERNEL_ARG_ADDRESS_GLOBAL => Self::Global,
            CL_KERNEL_ARG_ADDRESS_LOCAL => Self::Local,
            CL_KERNEL_ARG_ADDRESS_CONSTANT => Self::Constant,
            CL_KERNEL_ARG_ADDRESS_PRIVATE => Self::Private,
            other => Self::Unknown(other),
        }
    }
}

/// Image access qualifier of a kernel argument
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessQualifier {
    /// `read_only`
    ReadOnly,
    /// `write_only`
    WriteOnly,
    /// `read_write`
    ReadWrite,
    /// Not an image argument
    None,
    /// Value not defined by OpenCL 1.2
    Unknown(u32),
}

impl AccessQualifier {
    /// Decode a `CL_KERNEL_ARG_ACCESS_*` value
    #[must_use]
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            CL_KERNEL_ARG_ACCESS_READ_ONLY => Self::ReadOnly,
            CL_KERNEL_ARG_ACCESS_WRITE_ONLY => Self::WriteOnly,
            CL_KERNEL_ARG_ACCESS_READ_WRITE => Self::ReadWrite,
            CL_KERNEL_ARG_ACCESS_NONE => Self::None,
            other => Self::Unknown(other),
        }
    }
}

/// Metadata of one kernel argument
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelArgInfo {
    /// Position in the signature
    pub index: u32,
    /// Address space
    pub address: AddressQualifier,
    /// Image access
    pub access: AccessQualifier,
    /// `const` / `restrict` / `volatile`
    pub type_qualifiers: TypeQualifiers,
    /// Argument name
    pub name: String,
    /// Type name as written (e.g. `float*`)
    pub type_name: String,
}

/// Kernel metadata captured at creation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelInfo {
    /// Function name
    pub name: String,
    /// Argument count
    pub num_args: u32,
    /// Attributes from the source, split on whitespace
    pub attributes: Vec<String>,
    /// Owning context
    pub context: ContextHandle,
    /// Owning program
    pub program: ProgramHandle,
    /// Per-argument metadata (`None` when the program was built without it)
    pub args: Option<Vec<KernelArgInfo>>,
}

impl KernelInfo {
    /// Query every field of `kernel`
    fn snapshot(driver: &'static ClDriver, kernel: cl_kernel) -> Result<Self> {
        let info = driver.clGetKernelInfo;
        let name = info_string(info, kernel, WHAT, CL_KERNEL_FUNCTION_NAME)?;
        let num_args = info_u32(info, kernel, WHAT, CL_KERNEL_NUM_ARGS)?;
        let attributes = split_list(&info_string(info, kernel, WHAT, CL_KERNEL_ATTRIBUTES)?);
        let context = ContextHandle::from_raw(info_ptr(info, kernel, WHAT, CL_KERNEL_CONTEXT)?);
        let program = ProgramHandle::from_raw(info_ptr(info, kernel, WHAT, CL_KERNEL_PROGRAM)?);

        let args = match (0..num_args)
            .map(|index| arg_snapshot(driver, kernel, index))
            .collect::<Result<Vec<_>>>()
        {
            Ok(args) => Some(args),
            Err(e) if e.status() == Some(Status(CL_KERNEL_ARG_INFO_NOT_AVAILABLE)) => None,
            Err(e) => return Err(e),
        };

        Ok(Self {
            name,
            num_args,
            attributes,
            context,
            program,
            args,
        })
    }
}

fn arg_info(driver: &'static ClDriver, kernel: cl_kernel, index: cl_uint, param: cl_uint) -> Result<Vec<u8>> {
    query_info("kernel argument", param, |size, value, size_ret| {
        // SAFETY: query_info passes either (0, null) or a buffer of exactly `size` bytes
        unsafe { (driver.clGetKernelArgInfo)(kernel, index, param, size, value, size_ret) }
    })
}

fn arg_snapshot(driver: &'static ClDriver, kernel: cl_kernel, index: cl_uint) -> Result<KernelArgInfo> {
    const ARG: &str = "kernel argument";
    let address = decode_u32(ARG, &arg_info(driver, kernel, index, CL_KERNEL_ARG_ADDRESS_QUALIFIER)?)?;
    let access = decode_u32(ARG, &arg_info(driver, kernel, index, CL_KERNEL_ARG_ACCESS_QUALIFIER)?)?;
    let type_qualifiers = decode_u64(ARG, &arg_info(driver, kernel, index, CL_KERNEL_ARG_TYPE_QUALIFIER)?)?;
    let name = decode_string(&arg_info(driver, kernel, index, CL_KERNEL_ARG_NAME)?);
    let type_name = decode_string(&arg_info(driver, kernel, index, CL_KERNEL_ARG_TYPE_NAME)?);
    Ok(KernelArgInfo {
        index,
        address: AddressQualifier::from_raw(address),
        access: AccessQualifier::from_raw(access),
        type_qualifiers: TypeQualifiers::from_bits(type_qualifiers),
        name,
        type_name,
    })
}

// ============================================================================
// Kernel
// ============================================================================

/// Callable kernel with positional arguments
pub struct Kernel {
    driver: &'static ClDriver,
    handle: KernelHandle,
    info: KernelInfo,
    owned: bool,
    disposed: bool,
}

impl Kernel {
    /// Take ownership of a kernel handle the driver just created
    ///
    /// The handle is released if the metadata snapshot fails.
    pub(crate) fn adopt(driver: &'static ClDriver, raw: cl_kernel) -> Result<Self> {
        match KernelInfo::snapshot(driver, raw) {
            Ok(info) => {
                debug!("created kernel {} ({:?})", info.name, raw);
                Ok(Self {
                    driver,
                    handle: KernelHandle::from_raw(raw),
                    info,
                    owned: true,
                    disposed: false,
                })
            }
            Err(e) => {
                release_raw(driver, raw);
                Err(e)
            }
        }
    }

    /// Create a kernel by name from a built program handle
    pub(crate) fn create(driver: &'static ClDriver, program: ProgramHandle, name: &str) -> Result<Self> {
        let c_name = CString::new(name)
            .map_err(|_| ClError::InvalidArgument(format!("kernel name {:?} contains NUL", name)))?;
        let mut err = CL_SUCCESS;
        // SAFETY: c_name is NUL-terminated and outlives the call
        let raw = unsafe { (driver.clCreateKernel)(program.as_raw(), c_name.as_ptr(), &mut err) };
        if err != CL_SUCCESS || raw.is_null() {
            return Err(ClError::Creation {
                what: WHAT,
                code: Status(err),
            });
        }
        Self::adopt(driver, raw)
    }

    /// Wrap an existing kernel handle without taking ownership
    ///
    /// # Errors
    ///
    /// Returns `Err(ClError::Query)` if the metadata snapshot fails.
    pub fn from_handle(driver: &'static ClDriver, handle: KernelHandle) -> Result<Self> {
        let info = KernelInfo::snapshot(driver, handle.as_raw())?;
        Ok(Self {
            driver,
            handle,
            info,
            owned: false,
            disposed: false,
        })
    }

    /// Release the handle (owning kernels only)
    ///
    /// Idempotent. Failures are logged, never returned.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        if self.owned {
            release_raw(self.driver, self.handle.as_raw());
        }
    }

    /// Native handle
    #[must_use]
    pub fn handle(&self) -> KernelHandle {
        self.handle
    }

    /// Metadata snapshot
    #[must_use]
    pub fn info(&self) -> &KernelInfo {
        &self.info
    }

    /// Function name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.info.name
    }

    /// Argument count
    #[must_use]
    pub fn num_args(&self) -> u32 {
        self.info.num_args
    }

    /// Metadata of argument `index`
    #[must_use]
    pub fn arg(&self, index: u32) -> Option<&KernelArgInfo> {
        self.info.args.as_ref()?.get(index as usize)
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

    pub(crate) fn live(&self) -> Result<KernelHandle> {
        if self.disposed {
            Err(ClError::Disposed(WHAT))
        } else {
            Ok(self.handle)
        }
    }

    /// Driver reference count (live)
    ///
    /// # Errors
    ///
    /// Returns `Err(ClError::Query)` if the query fails.
    pub fn reference_count(&self) -> Result<u32> {
        info_u32(
            self.driver.clGetKernelInfo,
            self.live()?.as_raw(),
            WHAT,
            CL_KERNEL_REFERENCE_COUNT,
        )
    }

    fn set_arg_raw(&mut self, index: u32, size: usize, value: *const c_void) -> Result<()> {
        let handle = self.live()?;
        // SAFETY: value is null (local memory) or points to `size` readable bytes
        let result = unsafe { (self.driver.clSetKernelArg)(handle.as_raw(), index, size, value) };
        check(result, |code| ClError::SetArg { index, code })
    }

    /// Bind a device buffer to argument `index`
    ///
    /// Out-of-range indices are reported by the driver as `CL_INVALID_ARG_INDEX`.
    ///
    /// # Errors
    ///
    /// Returns `Err(ClError::SetArg)` on driver failure and
    /// `Err(ClError::Disposed)` if the kernel or buffer was disposed.
    pub fn set_arg_mem<T: HostElement>(&mut self, index: u32, buffer: &MemoryObject<T>) -> Result<()> {
        let mem: cl_mem = buffer.live()?.as_raw();
        self.set_arg_raw(
            index,
            mem::size_of::<cl_mem>(),
            ptr::addr_of!(mem).cast::<c_void>(),
        )
    }

    /// Bind a by-value scalar to argument `index`
    ///
    /// # Errors
    ///
    /// Returns `Err(ClError::SetArg)` on driver failure.
    pub fn set_arg_scalar<S: HostElement>(&mut self, index: u32, value: S) -> Result<()> {
        self.set_arg_raw(
            index,
            mem::size_of::<S>(),
            ptr::addr_of!(value).cast::<c_void>(),
        )
    }

    /// Reserve `bytes` of `__local` memory for argument `index`
    ///
    /// # Errors
    ///
    /// Returns `Err(ClError::SetArg)` on driver failure.
    pub fn set_arg_local(&mut self, index: u32, bytes: usize) -> Result<()> {
        self.set_arg_raw(index, bytes, ptr::null())
    }
}

/// Release a kernel handle not (or no longer) owned by a [`Kernel`]
pub(crate) fn release_raw(driver: &'static ClDriver, raw: cl_kernel) {
    // SAFETY: caller owns the handle and releases it exactly once
    let result = unsafe { (driver.clReleaseKernel)(raw) };
    if result == CL_SUCCESS {
        debug!("released kernel {:?}", raw);
    } else {
        warn!("clReleaseKernel({:?}) failed: {}", raw, Status(result));
    }
}

impl Drop for Kernel {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Kernel")
            .field("name", &self.info.name)
            .field("handle", &self.handle)
            .field("num_args", &self.info.num_args)
            .field("owned", &self.owned)
            .field("disposed", &self.disposed)
            .finish()
    }
}
