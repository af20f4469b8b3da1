//! Pinned host buffers
//!
//! A [`PinnedHostBuffer`] owns the host array a device operation reads from
//! or writes into. The array is a boxed slice, so its address is fixed for
//! as long as the box lives; the pin is the pair (storage, active flag) with
//! one acquire and one release.

use std::fmt;
use std::mem;

use tracing::trace;

use crate::driver::HostElement;
use crate::error::{ClError, Result};

/// Host array with a stable address while the pin is active
pub struct PinnedHostBuffer<T: HostElement> {
    data: Box<[T]>,
    active: bool,
}

impl<T: HostElement> PinnedHostBuffer<T> {
    /// Pin `data`, taking ownership of it
    #[must_use]
    pub fn acquire(data: Vec<T>) -> Self {
        let data = data.into_boxed_slice();
        trace!(
            "pinned {} host elements at {:p}",
            data.len(),
            data.as_ptr()
        );
        Self { data, active: true }
    }

    /// Pin a zero-initialised array of `len` elements
    #[must_use]
    pub fn zeroed(len: usize) -> Self {
        Self::acquire(vec![T::default(); len])
    }

    /// Release the pin and free the host array
    ///
    /// Returns `true` if the pin was active. Releasing twice is a no-op.
    pub fn release(&mut self) -> bool {
        if !self.active {
            return false;
        }
        trace!("unpinned {} host elements", self.data.len());
        self.active = false;
        self.data = Box::default();
        true
    }

    /// Check if the pin is active
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Number of elements (0 after release)
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if the pinned array is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Size of the pinned array in bytes
    #[must_use]
    pub fn byte_len(&self) -> usize {
        self.data.len() * mem::size_of::<T>()
    }

    /// Stable address of the pinned array
    ///
    /// # Errors
    ///
    /// Returns `Err(ClError::Disposed)` once the pin was released.
    pub fn as_ptr(&self) -> Result<*const T> {
        self.ensure_active()?;
        Ok(self.data.as_ptr())
    }

    /// Stable mutable address of the pinned array
    ///
    /// # Errors
    ///
    /// Returns `Err(ClError::Disposed)` once the pin was released.
    pub fn as_mut_ptr(&mut self) -> Result<*mut T> {
        self.ensure_active()?;
        Ok(self.data.as_mut_ptr())
    }

    /// Pinned array
    ///
    /// # Errors
    ///
    /// Returns `Err(ClError::Disposed)` once the pin was released.
    pub fn as_slice(&self) -> Result<&[T]> {
        self.ensure_active()?;
        Ok(&self.data)
    }

    /// Pinned array, mutably
    ///
    /// # Errors
    ///
    /// Returns `Err(ClError::Disposed)` once the pin was released.
    pub fn as_mut_slice(&mut self) -> Result<&mut [T]> {
        self.ensure_active()?;
        Ok(&mut self.data)
    }

    fn ensure_active(&self) -> Result<()> {
        if self.active {
            Ok(())
        } else {
            Err(ClError::Disposed("pinned host buffer"))
        }
    }
}

impl<T: HostElement> fmt::Debug for PinnedHostBuffer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PinnedHostBuffer")
            .field("len", &self.data.len())
            .field("elem_size", &mem::size_of::<T>())
            .field("active", &self.active)
            .finish()
    }
}
