//! Events and wait lists
//!
//! An [`Event`] is the completion handle of one enqueued command. The
//! caller owns it, not the queue that produced it. A [`WaitList`] turns a
//! caller's `Option<&[&Event]>` into the `(count, pointer)` pair the driver
//! expects, with `None` and an empty slice producing the same shape.

use std::fmt;
use std::ptr;

use tracing::{debug, warn};

use crate::driver::query::{info_ptr, info_u32};
use crate::driver::sys::{
    cl_event, cl_uint, ClDriver, CL_COMPLETE, CL_EVENT_COMMAND_EXECUTION_STATUS,
    CL_EVENT_COMMAND_QUEUE, CL_EVENT_COMMAND_TYPE, CL_EVENT_CONTEXT, CL_EVENT_REFERENCE_COUNT,
    CL_QUEUED, CL_RUNNING, CL_SUBMITTED, CL_SUCCESS,
};
use crate::driver::{ContextHandle, EventHandle, QueueHandle};
use crate::error::{check, ClError, Result, Status};

// ============================================================================
// Command Status
// ============================================================================

/// Execution state of an enqueued command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandStatus {
    /// Waiting in the queue
    Queued,
    /// Submitted to the device
    Submitted,
    /// Executing
    Running,
    /// Finished
    Complete,
    /// Terminated abnormally with a driver error code
    Error(Status),
}

impl CommandStatus {
    /// Decode a `CL_EVENT_COMMAND_EXECUTION_STATUS` value
    #[must_use]
    pub fn from_raw(raw: i32) -> Self {
        match raw {
            CL_COMPLETE => Self::Complete,
            CL_RUNNING => Self::Running,
            CL_SUBMITTED => Self::Submitted,
            CL_QUEUED => Self::Queued,
            code => Self::Error(Status(code)),
        }
    }

    /// True once the command will make no further progress
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Error(_))
    }
}

// ============================================================================
// Event
// ============================================================================

/// Completion handle of one enqueued command
///
/// Owning events release their handle exactly once on [`Event::release`] or
/// drop. Events wrapped with [`Event::from_handle`] never release. A null
/// event stands for a command the driver did not create.
pub struct Event {
    driver: &'static ClDriver,
    handle: EventHandle,
    owned: bool,
    released: bool,
}

impl Event {
    /// Take ownership of a handle returned by an enqueue call
    pub(crate) fn owned(driver: &'static ClDriver, handle: EventHandle) -> Self {
        Self {
            driver,
            handle,
            owned: true,
            released: false,
        }
    }

    /// Wrap an existing event handle without taking ownership
    #[must_use]
    pub fn from_handle(driver: &'static ClDriver, handle: EventHandle) -> Self {
        Self {
            driver,
            handle,
            owned: false,
            released: false,
        }
    }

    /// Null event, produced when a command was not created
    #[must_use]
    pub fn null(driver: &'static ClDriver) -> Self {
        Self::owned(driver, EventHandle::null())
    }

    /// Native handle
    #[must_use]
    pub fn handle(&self) -> EventHandle {
        self.handle
    }

    /// Check for the null event
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.handle.is_null()
    }

    /// Whether this instance releases its handle
    #[must_use]
    pub fn is_owned(&self) -> bool {
        self.owned
    }

    /// Whether [`Event::release`] already ran
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.released
    }

    fn live(&self) -> Result<EventHandle> {
        if self.released {
            Err(ClError::Disposed("event"))
        } else {
            Ok(self.handle)
        }
    }

    /// Current execution state
    ///
    /// Poll this for bounded waits; there is no timeout on [`Event::wait`].
    ///
    /// # Errors
    ///
    /// Returns `Err(ClError::Query)` if the driver rejects the query.
    pub fn status(&self) -> Result<CommandStatus> {
        let raw = info_u32(
            self.driver.clGetEventInfo,
            self.live()?.as_raw(),
            "event",
            CL_EVENT_COMMAND_EXECUTION_STATUS,
        )?;
        Ok(CommandStatus::from_raw(raw as i32))
    }

    /// Command type (`CL_COMMAND_*`)
    ///
    /// # Errors
    ///
    /// Returns `Err(ClError::Query)` if the driver rejects the query.
    pub fn command_type(&self) -> Result<cl_uint> {
        info_u32(
            self.driver.clGetEventInfo,
            self.live()?.as_raw(),
            "event",
            CL_EVENT_COMMAND_TYPE,
        )
    }

    /// Driver reference count
    ///
    /// # Errors
    ///
    /// Returns `Err(ClError::Query)` if the driver rejects the query.
    pub fn reference_count(&self) -> Result<u32> {
        info_u32(
            self.driver.clGetEventInfo,
            self.live()?.as_raw(),
            "event",
            CL_EVENT_REFERENCE_COUNT,
        )
    }

    /// Queue that produced the event
    ///
    /// # Errors
    ///
    /// Returns `Err(ClError::Query)` if the driver rejects the query.
    pub fn queue(&self) -> Result<QueueHandle> {
        info_ptr(
            self.driver.clGetEventInfo,
            self.live()?.as_raw(),
            "event",
            CL_EVENT_COMMAND_QUEUE,
        )
        .map(QueueHandle::from_raw)
    }

    /// Context of the event
    ///
    /// # Errors
    ///
    /// Returns `Err(ClError::Query)` if the driver rejects the query.
    pub fn context(&self) -> Result<ContextHandle> {
        info_ptr(
            self.driver.clGetEventInfo,
            self.live()?.as_raw(),
            "event",
            CL_EVENT_CONTEXT,
        )
        .map(ContextHandle::from_raw)
    }

    /// Block until the command completes
    ///
    /// Waiting on the null event returns immediately.
    ///
    /// # Errors
    ///
    /// Returns `Err(ClError::Wait)` if the command failed or the handle is invalid.
    pub fn wait(&self) -> Result<()> {
        let handle = self.live()?;
        if handle.is_null() {
            return Ok(());
        }
        let raw = handle.as_raw();
        // SAFETY: one valid event handle
        let result = unsafe { (self.driver.clWaitForEvents)(1, &raw) };
        check(result, ClError::Wait)
    }

    /// Block until every event completes
    ///
    /// Null events are skipped. An empty list returns immediately.
    ///
    /// # Errors
    ///
    /// Returns `Err(ClError::Wait)` if any command failed.
    pub fn wait_all(events: &[&Event]) -> Result<()> {
        let Some(first) = events.first() else {
            return Ok(());
        };
        let mut handles = Vec::with_capacity(events.len());
        for event in events {
            let handle = event.live()?;
            if !handle.is_null() {
                handles.push(handle.as_raw());
            }
        }
        if handles.is_empty() {
            return Ok(());
        }
        // SAFETY: handles holds handles.len() valid event handles
        let result =
            unsafe { (first.driver.clWaitForEvents)(handles.len() as cl_uint, handles.as_ptr()) };
        check(result, ClError::Wait)
    }

    /// Retain the handle and return a second owning event for it
    ///
    /// # Errors
    ///
    /// Returns `Err(ClError::Creation)` if the driver rejects the retain.
    pub fn retain(&self) -> Result<Event> {
        let handle = self.live()?;
        if handle.is_null() {
            return Ok(Self::null(self.driver));
        }
        // SAFETY: handle is a live event
        let result = unsafe { (self.driver.clRetainEvent)(handle.as_raw()) };
        check(result, |code| ClError::Creation {
            what: "event reference",
            code,
        })?;
        Ok(Self::owned(self.driver, handle))
    }

    /// Release the handle (owning events only)
    ///
    /// Idempotent. Failures are logged, never returned.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if !self.owned || self.handle.is_null() {
            return;
        }
        // SAFETY: owning handle released exactly once
        let result = unsafe { (self.driver.clReleaseEvent)(self.handle.as_raw()) };
        if result == CL_SUCCESS {
            debug!("released event {:?}", self.handle);
        } else {
            warn!("clReleaseEvent({:?}) failed: {}", self.handle, Status(result));
        }
    }
}

impl Drop for Event {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("handle", &self.handle)
            .field("owned", &self.owned)
            .field("released", &self.released)
            .finish()
    }
}

// ============================================================================
// Wait List
// ============================================================================

/// Normalised event wait list
///
/// `None` and `Some(&[])` both become `(0, NULL)`. Otherwise the handles
/// are laid out contiguously in caller order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitList {
    handles: Vec<cl_event>,
}

impl WaitList {
    /// Build from the caller's events
    ///
    /// # Errors
    ///
    /// Returns `Err(ClError::Disposed)` if any event was already released.
    pub fn new(events: Option<&[&Event]>) -> Result<Self> {
        let handles = events
            .unwrap_or_default()
            .iter()
            .map(|event| event.live().map(EventHandle::as_raw))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { handles })
    }

    /// Build from raw handles
    #[must_use]
    pub fn from_handles(handles: &[EventHandle]) -> Self {
        Self {
            handles: handles.iter().map(|h| h.as_raw()).collect(),
        }
    }

    /// `num_events_in_wait_list`
    #[must_use]
    pub fn len(&self) -> cl_uint {
        self.handles.len() as cl_uint
    }

    /// Check for an empty list
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// `event_wait_list`: NULL when empty
    #[must_use]
    pub fn as_ptr(&self) -> *const cl_event {
        if self.handles.is_empty() {
            ptr::null()
        } else {
            self.handles.as_ptr()
        }
    }

    /// Handles in order
    #[must_use]
    pub fn handles(&self) -> Vec<EventHandle> {
        self.handles.iter().map(|&h| EventHandle::from_raw(h)).collect()
    }
}

// SAFETY: the list holds opaque event identifiers only
unsafe impl Send for WaitList {}
unsafe impl Sync for WaitList {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::sys::{CL_INVALID_EVENT, CL_OUT_OF_RESOURCES};
    use crate::testing::MockDriver;

    fn fake(addr: usize) -> EventHandle {
        EventHandle::from_raw(addr as *mut std::ffi::c_void)
    }

    #[test]
    fn test_command_status_from_raw() {
        assert_eq!(CommandStatus::from_raw(0), CommandStatus::Complete);
        assert_eq!(CommandStatus::from_raw(1), CommandStatus::Running);
        assert_eq!(CommandStatus::from_raw(2), CommandStatus::Submitted);
        assert_eq!(CommandStatus::from_raw(3), CommandStatus::Queued);
        assert_eq!(
            CommandStatus::from_raw(CL_OUT_OF_RESOURCES),
            CommandStatus::Error(Status(CL_OUT_OF_RESOURCES))
        );
        assert!(CommandStatus::Complete.is_terminal());
        assert!(!CommandStatus::Queued.is_terminal());
    }

    #[test]
    fn test_wait_list_none_and_empty_match() {
        let none = WaitList::new(None).unwrap();
        let empty = WaitList::new(Some(&[])).unwrap();
        assert_eq!(none, empty);
        assert_eq!(none.len(), 0);
        assert!(none.as_ptr().is_null());
        assert!(empty.as_ptr().is_null());
    }

    #[test]
    fn test_wait_list_preserves_order() {
        let mock = MockDriver::install();
        let a = Event::from_handle(mock.driver(), fake(0x3000));
        let b = Event::from_handle(mock.driver(), fake(0x2000));
        let list = WaitList::new(Some(&[&a, &b])).unwrap();
        assert_eq!(list.len(), 2);
        assert!(!list.as_ptr().is_null());
        assert_eq!(list.handles(), vec![fake(0x3000), fake(0x2000)]);
    }

    #[test]
    fn test_wait_list_rejects_released_event() {
        let mock = MockDriver::install();
        let mut a = Event::from_handle(mock.driver(), fake(0x3000));
        a.release();
        assert_eq!(
            WaitList::new(Some(&[&a])).unwrap_err(),
            ClError::Disposed("event")
        );
    }

    #[test]
    fn test_null_event() {
        let mock = MockDriver::install();
        let mut event = Event::null(mock.driver());
        assert!(event.is_null());
        assert!(event.wait().is_ok());
        event.release();
        event.release();
        assert_eq!(mock.total_releases(), 0);
    }

    #[test]
    fn test_non_owning_event_never_releases() {
        let mock = MockDriver::install();
        {
            let _event = Event::from_handle(mock.driver(), fake(0x3000));
        }
        assert_eq!(mock.total_releases(), 0);
    }

    #[test]
    fn test_query_after_release_rejected() {
        let mock = MockDriver::install();
        let mut event = Event::from_handle(mock.driver(), fake(0x3000));
        event.release();
        assert_eq!(event.status().unwrap_err(), ClError::Disposed("event"));
        assert_eq!(event.wait().unwrap_err(), ClError::Disposed("event"));
    }

    #[test]
    fn test_unknown_event_query_fails() {
        let mock = MockDriver::install();
        let event = Event::from_handle(mock.driver(), fake(0xdead0));
        assert_eq!(
            event.status().unwrap_err().status(),
            Some(Status(CL_INVALID_EVENT))
        );
    }

    #[test]
    fn test_wait_all_empty() {
        assert!(Event::wait_all(&[]).is_ok());
    }
}
