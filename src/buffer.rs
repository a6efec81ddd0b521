//! Ownership of buffers the remote side allocates.
//!
//! A foreign call may leave a pointer to remotely allocated memory in its
//! out-parameter whether it succeeds or not. [`with_remote_buffer`] hands
//! the call a null out-pointer and wraps whatever comes back in a
//! [`RemoteBuffer`], which releases it through [`DhcpApi::free_memory`]
//! when dropped:
//!
//! - on success, after the caller has copied the records out
//! - on failure with a null out-pointer, never (there is nothing to free)
//! - on failure with a partially or fully populated buffer, before the
//!   error reaches the caller
//!
//! A `RemoteBuffer` is move-only and its only release point is `Drop`, so a
//! buffer cannot be released twice or read after release.

use std::fmt;
use std::marker::PhantomData;
use std::ops::Deref;
use std::ptr::NonNull;

use tracing::trace;

use crate::api::{DhcpApi, ERROR_MORE_DATA, ERROR_NO_MORE_ITEMS, ERROR_SUCCESS, Operation};
use crate::error::{CallContext, Error, Result};

/// How a status code that is not a failure should be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The call succeeded; for enumerations, this page may be the last.
    Complete,
    /// An enumeration page was returned and more records remain.
    MoreData,
    /// The enumeration has nothing more to return.
    Exhausted,
}

/// Maps a status code to an [`Outcome`] or an error for `operation`.
///
/// The "more data" and "no more items" codes are only outcomes for
/// enumerations; any other verb returning them has failed.
pub fn check_status(operation: Operation, status: u32, key: &dyn fmt::Display) -> Result<Outcome> {
    let enumerating = operation == Operation::EnumerateClients;
    match status {
        ERROR_SUCCESS => Ok(Outcome::Complete),
        ERROR_MORE_DATA if enumerating => Ok(Outcome::MoreData),
        ERROR_NO_MORE_ITEMS if enumerating => Ok(Outcome::Exhausted),
        status if operation.is_not_found(status) => Err(Error::NotFound(CallContext::new(
            operation,
            key.to_string(),
        ))),
        status if operation.is_already_exists(status) => Err(Error::AlreadyExists(
            CallContext::new(operation, key.to_string()),
        )),
        status => Err(Error::RemoteFailure {
            status,
            context: CallContext::new(operation, key.to_string()),
        }),
    }
}

/// A buffer allocated by the remote side, released exactly once on drop.
pub struct RemoteBuffer<'a, A: DhcpApi + ?Sized, T> {
    api: &'a A,
    ptr: NonNull<T>,
    _owns: PhantomData<T>,
}

impl<'a, A: DhcpApi + ?Sized, T> RemoteBuffer<'a, A, T> {
    /// Takes ownership of `ptr`, or returns `None` if it is null.
    ///
    /// # Safety
    ///
    /// A non-null `ptr` must point to a `T` allocated by `api`'s allocator
    /// that nothing else will release.
    pub unsafe fn adopt(api: &'a A, ptr: *mut T) -> Option<Self> {
        NonNull::new(ptr).map(|ptr| Self {
            api,
            ptr,
            _owns: PhantomData,
        })
    }

    pub fn as_ptr(&self) -> *const T {
        self.ptr.as_ptr()
    }

    /// Releases the buffer now rather than at the end of scope.
    pub fn release(self) {
        drop(self);
    }
}

impl<A: DhcpApi + ?Sized, T> Deref for RemoteBuffer<'_, A, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: `adopt` requires a live `T`, and it stays live until drop.
        unsafe { self.ptr.as_ref() }
    }
}

impl<A: DhcpApi + ?Sized, T> Drop for RemoteBuffer<'_, A, T> {
    fn drop(&mut self) {
        trace!("Releasing remote buffer {:p}", self.ptr);
        // SAFETY: we own the buffer and this is the only release point.
        unsafe { self.api.free_memory(self.ptr.as_ptr().cast()) }
    }
}

impl<A: DhcpApi + ?Sized, T> fmt::Debug for RemoteBuffer<'_, A, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RemoteBuffer").field(&self.ptr).finish()
    }
}

/// The raw result of one foreign call: its status and whatever it allocated.
#[derive(Debug)]
pub struct Fetched<'a, A: DhcpApi + ?Sized, T> {
    pub status: u32,
    pub buffer: Option<RemoteBuffer<'a, A, T>>,
}

impl<'a, A: DhcpApi + ?Sized, T> Fetched<'a, A, T> {
    /// Classifies the status, releasing the buffer first if it is a failure.
    pub fn into_outcome(
        self,
        operation: Operation,
        key: &dyn fmt::Display,
    ) -> Result<(Outcome, Option<RemoteBuffer<'a, A, T>>)> {
        match check_status(operation, self.status, key) {
            Ok(outcome) => Ok((outcome, self.buffer)),
            Err(error) => {
                drop(self.buffer);
                Err(error)
            }
        }
    }
}

/// Runs one foreign call with a fresh null out-pointer and adopts its result.
///
/// # Safety
///
/// `call` must leave the out-pointer either null or pointing to a `T`
/// allocated by `api` that the call has handed over to the caller.
pub unsafe fn with_remote_buffer<'a, A, T, F>(api: &'a A, call: F) -> Fetched<'a, A, T>
where
    A: DhcpApi + ?Sized,
    F: FnOnce(&mut *mut T) -> u32,
{
    let mut raw: *mut T = std::ptr::null_mut();
    let status = call(&mut raw);
    // SAFETY: upheld by the caller.
    let buffer = unsafe { RemoteBuffer::adopt(api, raw) };
    Fetched { status, buffer }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ERROR_DHCP_CLIENT_EXISTS, ERROR_DHCP_JET_ERROR};
    use crate::simulated::SimulatedServer;

    #[test]
    fn test_release_on_drop() {
        let server = SimulatedServer::new();
        let ptr = server.allocate(42u64);
        {
            let buffer = unsafe { RemoteBuffer::adopt(&server, ptr) }.unwrap();
            assert_eq!(*buffer, 42);
        }
        let stats = server.stats();
        assert_eq!(stats.frees, 1);
        assert_eq!(stats.live, 0);
        assert_eq!(stats.invalid_frees, 0);
    }

    #[test]
    fn test_null_is_not_adopted() {
        let server = SimulatedServer::new();
        let buffer = unsafe { RemoteBuffer::<_, u64>::adopt(&server, std::ptr::null_mut()) };
        assert!(buffer.is_none());
        assert_eq!(server.stats().frees, 0);
    }

    #[test]
    fn test_failure_releases_before_error() {
        let server = SimulatedServer::new();
        let fetched = unsafe {
            with_remote_buffer(&server, |out: &mut *mut u64| {
                *out = server.allocate(7u64);
                ERROR_DHCP_JET_ERROR
            })
        };
        let result = fetched.into_outcome(Operation::GetClient, &"ip 10.0.0.1");
        assert!(matches!(result, Err(Error::NotFound(_))));
        assert_eq!(server.stats().frees, 1);
        assert_eq!(server.stats().live, 0);
    }

    #[test]
    fn test_failure_with_null_out_frees_nothing() {
        let server = SimulatedServer::new();
        let fetched =
            unsafe { with_remote_buffer(&server, |_: &mut *mut u64| ERROR_DHCP_JET_ERROR) };
        assert!(fetched.buffer.is_none());
        assert!(fetched.into_outcome(Operation::GetClient, &"x").is_err());
        assert_eq!(server.stats().frees, 0);
        assert_eq!(server.stats().invalid_frees, 0);
    }

    #[test]
    fn test_explicit_release() {
        let server = SimulatedServer::new();
        let buffer = unsafe { RemoteBuffer::adopt(&server, server.allocate(1u8)) }.unwrap();
        buffer.release();
        assert_eq!(server.stats().frees, 1);
    }

    #[test]
    fn test_check_status_mapping() {
        let key = "ip 192.168.42.42";
        assert_eq!(
            check_status(Operation::GetClient, ERROR_SUCCESS, &key).unwrap(),
            Outcome::Complete
        );
        assert_eq!(
            check_status(Operation::EnumerateClients, ERROR_MORE_DATA, &key).unwrap(),
            Outcome::MoreData
        );
        assert_eq!(
            check_status(Operation::EnumerateClients, ERROR_NO_MORE_ITEMS, &key).unwrap(),
            Outcome::Exhausted
        );
        assert!(matches!(
            check_status(Operation::GetClient, ERROR_NO_MORE_ITEMS, &key),
            Err(Error::RemoteFailure {
                status: ERROR_NO_MORE_ITEMS,
                ..
            })
        ));
        assert!(matches!(
            check_status(Operation::CreateClient, ERROR_DHCP_CLIENT_EXISTS, &key),
            Err(Error::AlreadyExists(_))
        ));
    }

    #[test]
    fn test_failure_context() {
        let error = check_status(Operation::DeleteClient, 5, &"name \"pc\"").unwrap_err();
        assert_eq!(
            error.to_string(),
            "delete client name \"pc\": remote status 5"
        );
    }
}
