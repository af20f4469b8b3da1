//! OpenCL Driver Types
//!
//! Typed native handles, host element types, flag sets and the NDRange
//! launch geometry.

use std::ffi::c_void;
use std::fmt;

use super::sys::{
    cl_bitfield, cl_command_queue_properties, cl_device_type, cl_mem_flags, cl_uint,
    CL_DEVICE_TYPE_ACCELERATOR, CL_DEVICE_TYPE_ALL, CL_DEVICE_TYPE_CPU, CL_DEVICE_TYPE_DEFAULT,
    CL_DEVICE_TYPE_GPU, CL_MEM_ALLOC_HOST_PTR, CL_MEM_COPY_HOST_PTR, CL_MEM_READ_ONLY,
    CL_MEM_READ_WRITE, CL_MEM_USE_HOST_PTR, CL_MEM_WRITE_ONLY,
    CL_QUEUE_OUT_OF_ORDER_EXEC_MODE_ENABLE, CL_QUEUE_PROFILING_ENABLE,
};

// ============================================================================
// Native Handles
// ============================================================================

macro_rules! native_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[repr(transparent)]
        #[derive(Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name(*mut c_void);

        // SAFETY: a handle is an opaque identifier; the driver synchronises
        // access to the object it names
        unsafe impl Send for $name {}
        unsafe impl Sync for $name {}

        impl $name {
            /// Null handle
            #[must_use]
            pub const fn null() -> Self {
                Self(std::ptr::null_mut())
            }

            /// Wrap a raw driver handle
            #[must_use]
            pub const fn from_raw(raw: *mut c_void) -> Self {
                Self(raw)
            }

            /// Raw driver handle
            #[must_use]
            pub const fn as_raw(self) -> *mut c_void {
                self.0
            }

            /// Check if null
            #[must_use]
            pub fn is_null(self) -> bool {
                self.0.is_null()
            }

            /// Handle value as an integer
            #[must_use]
            pub fn addr(self) -> usize {
                self.0 as usize
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::null()
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({:#x})", stringify!($name), self.addr())
            }
        }
    };
}

native_handle!(
    /// Platform handle
    PlatformId
);
native_handle!(
    /// Device handle
    DeviceId
);
native_handle!(
    /// Context handle
    ContextHandle
);
native_handle!(
    /// Command queue handle
    QueueHandle
);
native_handle!(
    /// Memory object handle
    MemHandle
);
native_handle!(
    /// Program handle
    ProgramHandle
);
native_handle!(
    /// Kernel handle
    KernelHandle
);
native_handle!(
    /// Event handle
    EventHandle
);

// ============================================================================
// Host Elements
// ============================================================================

/// Element type that may be copied to and from device memory byte-for-byte
///
/// # Safety
///
/// Implementors must be plain data: every bit pattern of
/// `size_of::<Self>()` bytes is a valid value and the type has no padding.
pub unsafe trait HostElement: Copy + Default + Send + Sync + 'static {}

macro_rules! host_element {
    ($($t:ty),*) => {
        $(
            // SAFETY: primitive numeric type without padding or invalid bit patterns
            unsafe impl HostElement for $t {}
        )*
    };
}

host_element!(u8, i8, u16, i16, u32, i32, u64, i64, usize, isize, f32, f64);

// ============================================================================
// Flag Sets
// ============================================================================

macro_rules! bitflags_newtype {
    ($(#[$meta:meta])* $name:ident($raw:ty) { $($(#[$fmeta:meta])* $flag:ident = $value:expr;)* }) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
        pub struct $name($raw);

        impl $name {
            $(
                $(#[$fmeta])*
                pub const $flag: Self = Self($value);
            )*

            /// Empty set
            #[must_use]
            pub const fn empty() -> Self {
                Self(0)
            }

            /// Wrap raw bits
            #[must_use]
            pub const fn from_bits(bits: $raw) -> Self {
                Self(bits)
            }

            /// Raw bits
            #[must_use]
            pub const fn bits(self) -> $raw {
                self.0
            }

            /// Check whether every bit of `other` is set
            #[must_use]
            pub const fn contains(self, other: Self) -> bool {
                self.0 & other.0 == other.0
            }

            /// Union
            #[must_use]
            pub const fn union(self, other: Self) -> Self {
                Self(self.0 | other.0)
            }
        }

        impl std::ops::BitOr for $name {
            type Output = Self;

            fn bitor(self, rhs: Self) -> Self {
                self.union(rhs)
            }
        }

        impl std::ops::BitOrAssign for $name {
            fn bitor_assign(&mut self, rhs: Self) {
                self.0 |= rhs.0;
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                let mut names = Vec::new();
                $(
                    if $value != 0 && self.contains(Self::$flag) {
                        names.push(stringify!($flag));
                    }
                )*
                write!(f, "{}({:#x}: {})", stringify!($name), self.0, names.join(" | "))
            }
        }
    };
}

bitflags_newtype!(
    /// Memory allocation flags (`cl_mem_flags`)
    MemFlags(cl_mem_flags) {
        /// Kernel reads and writes
        READ_WRITE = CL_MEM_READ_WRITE;
        /// Kernel writes only
        WRITE_ONLY = CL_MEM_WRITE_ONLY;
        /// Kernel reads only
        READ_ONLY = CL_MEM_READ_ONLY;
        /// Back the allocation with the pinned host array
        USE_HOST_PTR = CL_MEM_USE_HOST_PTR;
        /// Allocate from host-accessible memory
        ALLOC_HOST_PTR = CL_MEM_ALLOC_HOST_PTR;
        /// Initialise from the pinned host array
        COPY_HOST_PTR = CL_MEM_COPY_HOST_PTR;
    }
);

impl MemFlags {
    /// True when the driver reads the host pointer at creation
    #[must_use]
    pub const fn needs_host_ptr(self) -> bool {
        self.contains(Self::USE_HOST_PTR) || self.contains(Self::COPY_HOST_PTR)
    }
}

bitflags_newtype!(
    /// Command queue properties (`cl_command_queue_properties`)
    QueueProperties(cl_command_queue_properties) {
        /// Commands may execute in any order not constrained by wait lists
        OUT_OF_ORDER = CL_QUEUE_OUT_OF_ORDER_EXEC_MODE_ENABLE;
        /// Event profiling counters enabled
        PROFILING = CL_QUEUE_PROFILING_ENABLE;
    }
);

bitflags_newtype!(
    /// Device type filter (`cl_device_type`)
    DeviceType(cl_device_type) {
        /// Platform default
        DEFAULT = CL_DEVICE_TYPE_DEFAULT;
        /// Host CPU
        CPU = CL_DEVICE_TYPE_CPU;
        /// GPU
        GPU = CL_DEVICE_TYPE_GPU;
        /// Dedicated accelerator
        ACCELERATOR = CL_DEVICE_TYPE_ACCELERATOR;
        /// Every device
        ALL = CL_DEVICE_TYPE_ALL;
    }
);

bitflags_newtype!(
    /// Kernel argument type qualifiers
    TypeQualifiers(cl_bitfield) {
        /// `const`
        CONST = super::sys::CL_KERNEL_ARG_TYPE_CONST;
        /// `restrict`
        RESTRICT = super::sys::CL_KERNEL_ARG_TYPE_RESTRICT;
        /// `volatile`
        VOLATILE = super::sys::CL_KERNEL_ARG_TYPE_VOLATILE;
    }
);

// ============================================================================
// NDRange
// ============================================================================

/// Kernel launch geometry
///
/// All vectors have three components; only the first `work_dim` are read by
/// the driver. `work_dim` itself is passed through unchecked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NdRange {
    /// Number of dimensions (1..=3 accepted by the driver)
    pub work_dim: cl_uint,
    /// Global work offset
    pub global_offset: [usize; 3],
    /// Global work size
    pub global_size: [usize; 3],
    /// Work-group size (`None` lets the driver choose)
    pub local_size: Option<[usize; 3]>,
}

impl NdRange {
    /// 1D range of `global` work items
    #[must_use]
    pub const fn linear(global: usize) -> Self {
        Self {
            work_dim: 1,
            global_offset: [0; 3],
            global_size: [global, 1, 1],
            local_size: None,
        }
    }

    /// 2D range
    #[must_use]
    pub const fn grid_2d(x: usize, y: usize) -> Self {
        Self {
            work_dim: 2,
            global_offset: [0; 3],
            global_size: [x, y, 1],
            local_size: None,
        }
    }

    /// 3D range
    #[must_use]
    pub const fn grid_3d(x: usize, y: usize, z: usize) -> Self {
        Self {
            work_dim: 3,
            global_offset: [0; 3],
            global_size: [x, y, z],
            local_size: None,
        }
    }

    /// Set an explicit work-group size
    #[must_use]
    pub const fn with_local(mut self, local: [usize; 3]) -> Self {
        self.local_size = Some(local);
        self
    }

    /// Set a global work offset
    #[must_use]
    pub const fn with_offset(mut self, offset: [usize; 3]) -> Self {
        self.global_offset = offset;
        self
    }

    /// Total work items across the active dimensions
    #[must_use]
    pub fn total_work_items(&self) -> usize {
        let dims = (self.work_dim as usize).clamp(1, 3);
        self.global_size[..dims].iter().product()
    }
}

impl Default for NdRange {
    fn default() -> Self {
        Self::linear(1)
    }
}
