//! Deterministic in-process OpenCL driver
//!
//! [`MockDriver`] fills a [`ClDriver`](crate::driver::ClDriver) table with
//! functions that model OpenCL 1.2 object semantics without a device, so
//! every wrapper can be exercised in CI and its driver traffic inspected:
//! release counts, enqueue arguments, wait-list shapes and info-query sizes.
//!
//! ```rust
//! use trueno_cl::testing::MockDriver;
//! use trueno_cl::platform::enumerate_platforms;
//!
//! let mock = MockDriver::install();
//! let platforms = enumerate_platforms(mock.driver()).unwrap();
//! assert_eq!(platforms[0].name, "Trueno Mock Platform");
//! ```

mod compiler;
mod mock;

pub use mock::{BoundArg, EnqueueRecord, HandleKind, MockDriver, QueryRecord, SUB_BUFFER_ALIGN};
