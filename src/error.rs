//! Error types for trueno-cl operations
//!
//! Every variant that carries a driver result code renders the code's
//! symbol, so `CL_OUT_OF_RESOURCES` and `CL_INVALID_CONTEXT` are told apart
//! from the message alone.

use std::fmt;

use thiserror::Error;

use crate::driver::sys::{cl_error_string, cl_int, CL_SUCCESS};
use crate::program::BuildReport;

/// Result type alias for trueno-cl operations
pub type Result<T> = std::result::Result<T, ClError>;

/// Raw driver result code
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Status(pub cl_int);

impl Status {
    /// `CL_SUCCESS`
    pub const SUCCESS: Self = Self(CL_SUCCESS);

    /// Check for `CL_SUCCESS`
    #[must_use]
    pub const fn is_success(self) -> bool {
        self.0 == CL_SUCCESS
    }

    /// Raw code
    #[must_use]
    pub const fn code(self) -> cl_int {
        self.0
    }

    /// Symbol for the code (e.g. `CL_INVALID_VALUE`)
    #[must_use]
    pub fn symbol(self) -> &'static str {
        cl_error_string(self.0)
    }
}

impl From<cl_int> for Status {
    fn from(code: cl_int) -> Self {
        Self(code)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.symbol(), self.0)
    }
}

impl fmt::Debug for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Status({})", self)
    }
}

/// Errors that can occur during OpenCL operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClError {
    /// No OpenCL driver could be loaded
    #[error("OpenCL not available: {0}")]
    NotAvailable(String),

    /// Creating a native object failed
    #[error("failed to create {what}: {code}")]
    Creation {
        /// Kind of object
        what: &'static str,
        /// Driver result
        code: Status,
    },

    /// An info query failed in either phase
    #[error("{what} info query {param:#06x} failed: {code}")]
    Query {
        /// Kind of object queried
        what: &'static str,
        /// Info parameter
        param: u32,
        /// Driver result
        code: Status,
    },

    /// An info value had an unexpected byte length
    #[error("{what} info returned {actual} bytes, expected {expected}")]
    InfoSize {
        /// Decoded field
        what: &'static str,
        /// Expected byte length
        expected: usize,
        /// Reported byte length
        actual: usize,
    },

    /// clFlush failed
    #[error("command queue flush failed: {0}")]
    Flush(Status),

    /// clFinish failed
    #[error("command queue finish failed: {0}")]
    Finish(Status),

    /// Waiting on events failed
    #[error("event wait failed: {0}")]
    Wait(Status),

    /// An enqueue call failed
    #[error("enqueue {command} failed: {code}")]
    Enqueue {
        /// Command name
        command: &'static str,
        /// Driver result
        code: Status,
    },

    /// Program build failed
    #[error("program build failed: {code}\n{report}")]
    Build {
        /// Driver result of clBuildProgram
        code: Status,
        /// Per-device status and log
        report: BuildReport,
    },

    /// Binding a kernel argument failed
    #[error("setting kernel argument {index} failed: {code}")]
    SetArg {
        /// Argument index
        index: u32,
        /// Driver result
        code: Status,
    },

    /// Object was used after dispose
    #[error("{0} used after dispose")]
    Disposed(&'static str),

    /// A pin is still active and cannot be replaced
    #[error("host buffer is already pinned")]
    PinActive,

    /// Invalid argument supplied by the caller
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl ClError {
    /// Driver result code carried by the error, if any
    #[must_use]
    pub fn status(&self) -> Option<Status> {
        match self {
            Self::Creation { code, .. }
            | Self::Query { code, .. }
            | Self::Enqueue { code, .. }
            | Self::Build { code, .. }
            | Self::SetArg { code, .. } => Some(*code),
            Self::Flush(code) | Self::Finish(code) | Self::Wait(code) => Some(*code),
            _ => None,
        }
    }
}

/// Map a driver result to `Ok(())` or the error built by `err`
pub(crate) fn check(code: cl_int, err: impl FnOnce(Status) -> ClError) -> Result<()> {
    if code == CL_SUCCESS {
        Ok(())
    } else {
        Err(err(Status(code)))
    }
}
