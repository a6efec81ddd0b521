//! The remote management calls this crate drives.
//!
//! [`DhcpApi`] mirrors the server's C entry points one to one: raw
//! out-pointers in, a numeric status out. Implementations are the
//! Windows backend in [`remote`](crate::remote) and the in-process
//! [`SimulatedServer`](crate::simulated::SimulatedServer).
//!
//! Every buffer an implementation hands back through an out-pointer is
//! owned by the implementation's allocator and must be returned through
//! [`DhcpApi::free_memory`], which the [`buffer`](crate::buffer) guard
//! does exactly once.

use std::ffi::c_void;
use std::fmt;

use crate::search::DhcpSearchInfo;
use crate::wire::{
    ClientLayout, DhcpClientInfoArrayV4, DhcpClientInfoPb, DhcpClientInfoPbArray,
    DhcpClientInfoV4,
};

pub const ERROR_SUCCESS: u32 = 0;
pub const ERROR_INVALID_PARAMETER: u32 = 87;
/// More records remain after this page.
pub const ERROR_MORE_DATA: u32 = 234;
/// The enumeration is exhausted. Not a failure.
pub const ERROR_NO_MORE_ITEMS: u32 = 259;
pub const ERROR_DHCP_SUBNET_NOT_PRESENT: u32 = 20005;
/// Returned by lookups and deletes for clients the database does not hold.
pub const ERROR_DHCP_JET_ERROR: u32 = 20013;
pub const ERROR_DHCP_CLIENT_EXISTS: u32 = 20014;
pub const ERROR_DHCP_INVALID_DHCP_CLIENT: u32 = 20016;

/// The remote verbs, used to scope status mapping and error context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    EnumerateClients,
    GetClient,
    CreateClient,
    ModifyClient,
    DeleteClient,
}

impl Operation {
    /// Whether `status` means "no such client" for this verb.
    pub fn is_not_found(self, status: u32) -> bool {
        matches!(
            self,
            Self::GetClient | Self::ModifyClient | Self::DeleteClient
        ) && matches!(
            status,
            ERROR_DHCP_JET_ERROR | ERROR_DHCP_INVALID_DHCP_CLIENT
        )
    }

    /// Whether `status` means "client already exists" for this verb.
    pub fn is_already_exists(self, status: u32) -> bool {
        self == Self::CreateClient && status == ERROR_DHCP_CLIENT_EXISTS
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EnumerateClients => write!(f, "enumerate clients"),
            Self::GetClient => write!(f, "get client"),
            Self::CreateClient => write!(f, "create client"),
            Self::ModifyClient => write!(f, "modify client"),
            Self::DeleteClient => write!(f, "delete client"),
        }
    }
}

/// The server's client management entry points.
///
/// Every method returns the server's status code. Out-pointers are only
/// written by the implementation; callers pass them in null.
///
/// # Safety
///
/// All methods are `unsafe` because implementations read through the raw
/// pointers inside their arguments and write raw pointers to remotely
/// allocated memory into their out-parameters. Callers must pass records
/// whose pointers are valid for the duration of the call, and must release
/// any non-null out-pointer with [`free_memory`](Self::free_memory) once and
/// only once, whatever the status.
pub trait DhcpApi {
    /// Fetches one page of legacy records for `subnet`.
    unsafe fn enum_subnet_clients_v4(
        &self,
        subnet: u32,
        resume_handle: &mut u32,
        preferred_maximum: u32,
        clients: &mut *mut DhcpClientInfoArrayV4,
        clients_read: &mut u32,
        clients_total: &mut u32,
    ) -> u32;

    /// Fetches one page of current records for `subnet`.
    unsafe fn enum_subnet_clients_pb(
        &self,
        subnet: u32,
        resume_handle: &mut u32,
        preferred_maximum: u32,
        clients: &mut *mut DhcpClientInfoPbArray,
        clients_read: &mut u32,
        clients_total: &mut u32,
    ) -> u32;

    unsafe fn get_client_info_v4(
        &self,
        search: &DhcpSearchInfo,
        client: &mut *mut DhcpClientInfoV4,
    ) -> u32;

    unsafe fn get_client_info_pb(
        &self,
        search: &DhcpSearchInfo,
        client: &mut *mut DhcpClientInfoPb,
    ) -> u32;

    unsafe fn create_client_info_v4(&self, client: &DhcpClientInfoV4) -> u32;

    unsafe fn create_client_info_pb(&self, client: &DhcpClientInfoPb) -> u32;

    /// Replaces an existing client. Only the legacy layout has a modify verb.
    unsafe fn set_client_info_v4(&self, client: &DhcpClientInfoV4) -> u32;

    unsafe fn delete_client_info(&self, search: &DhcpSearchInfo) -> u32;

    /// Returns a buffer to the remote allocator.
    unsafe fn free_memory(&self, buffer: *mut c_void);
}

impl<A: DhcpApi + ?Sized> DhcpApi for &A {
    unsafe fn enum_subnet_clients_v4(
        &self,
        subnet: u32,
        resume_handle: &mut u32,
        preferred_maximum: u32,
        clients: &mut *mut DhcpClientInfoArrayV4,
        clients_read: &mut u32,
        clients_total: &mut u32,
    ) -> u32 {
        unsafe {
            (**self).enum_subnet_clients_v4(
                subnet,
                resume_handle,
                preferred_maximum,
                clients,
                clients_read,
                clients_total,
            )
        }
    }

    unsafe fn enum_subnet_clients_pb(
        &self,
        subnet: u32,
        resume_handle: &mut u32,
        preferred_maximum: u32,
        clients: &mut *mut DhcpClientInfoPbArray,
        clients_read: &mut u32,
        clients_total: &mut u32,
    ) -> u32 {
        unsafe {
            (**self).enum_subnet_clients_pb(
                subnet,
                resume_handle,
                preferred_maximum,
                clients,
                clients_read,
                clients_total,
            )
        }
    }

    unsafe fn get_client_info_v4(
        &self,
        search: &DhcpSearchInfo,
        client: &mut *mut DhcpClientInfoV4,
    ) -> u32 {
        unsafe { (**self).get_client_info_v4(search, client) }
    }

    unsafe fn get_client_info_pb(
        &self,
        search: &DhcpSearchInfo,
        client: &mut *mut DhcpClientInfoPb,
    ) -> u32 {
        unsafe { (**self).get_client_info_pb(search, client) }
    }

    unsafe fn create_client_info_v4(&self, client: &DhcpClientInfoV4) -> u32 {
        unsafe { (**self).create_client_info_v4(client) }
    }

    unsafe fn create_client_info_pb(&self, client: &DhcpClientInfoPb) -> u32 {
        unsafe { (**self).create_client_info_pb(client) }
    }

    unsafe fn set_client_info_v4(&self, client: &DhcpClientInfoV4) -> u32 {
        unsafe { (**self).set_client_info_v4(client) }
    }

    unsafe fn delete_client_info(&self, search: &DhcpSearchInfo) -> u32 {
        unsafe { (**self).delete_client_info(search) }
    }

    unsafe fn free_memory(&self, buffer: *mut c_void) {
        unsafe { (**self).free_memory(buffer) }
    }
}

/// Binds a record layout to the entry points that speak it.
pub trait LayoutCalls: ClientLayout {
    /// # Safety
    ///
    /// See [`DhcpApi`].
    unsafe fn enumerate<A: DhcpApi + ?Sized>(
        api: &A,
        subnet: u32,
        resume_handle: &mut u32,
        preferred_maximum: u32,
        clients: &mut *mut Self::Array,
        clients_read: &mut u32,
        clients_total: &mut u32,
    ) -> u32;

    /// # Safety
    ///
    /// See [`DhcpApi`].
    unsafe fn get<A: DhcpApi + ?Sized>(
        api: &A,
        search: &DhcpSearchInfo,
        client: &mut *mut Self,
    ) -> u32;

    /// # Safety
    ///
    /// See [`DhcpApi`].
    unsafe fn create<A: DhcpApi + ?Sized>(api: &A, client: &Self) -> u32;
}

impl LayoutCalls for DhcpClientInfoV4 {
    unsafe fn enumerate<A: DhcpApi + ?Sized>(
        api: &A,
        subnet: u32,
        resume_handle: &mut u32,
        preferred_maximum: u32,
        clients: &mut *mut Self::Array,
        clients_read: &mut u32,
        clients_total: &mut u32,
    ) -> u32 {
        unsafe {
            api.enum_subnet_clients_v4(
                subnet,
                resume_handle,
                preferred_maximum,
                clients,
                clients_read,
                clients_total,
            )
        }
    }

    unsafe fn get<A: DhcpApi + ?Sized>(
        api: &A,
        search: &DhcpSearchInfo,
        client: &mut *mut Self,
    ) -> u32 {
        unsafe { api.get_client_info_v4(search, client) }
    }

    unsafe fn create<A: DhcpApi + ?Sized>(api: &A, client: &Self) -> u32 {
        unsafe { api.create_client_info_v4(client) }
    }
}

impl LayoutCalls for DhcpClientInfoPb {
    unsafe fn enumerate<A: DhcpApi + ?Sized>(
        api: &A,
        subnet: u32,
        resume_handle: &mut u32,
        preferred_maximum: u32,
        clients: &mut *mut Self::Array,
        clients_read: &mut u32,
        clients_total: &mut u32,
    ) -> u32 {
        unsafe {
            api.enum_subnet_clients_pb(
                subnet,
                resume_handle,
                preferred_maximum,
                clients,
                clients_read,
                clients_total,
            )
        }
    }

    unsafe fn get<A: DhcpApi + ?Sized>(
        api: &A,
        search: &DhcpSearchInfo,
        client: &mut *mut Self,
    ) -> u32 {
        unsafe { api.get_client_info_pb(search, client) }
    }

    unsafe fn create<A: DhcpApi + ?Sized>(api: &A, client: &Self) -> u32 {
        unsafe { api.create_client_info_pb(client) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_scoped_to_lookup_verbs() {
        assert!(Operation::GetClient.is_not_found(ERROR_DHCP_JET_ERROR));
        assert!(Operation::DeleteClient.is_not_found(ERROR_DHCP_INVALID_DHCP_CLIENT));
        assert!(Operation::ModifyClient.is_not_found(ERROR_DHCP_JET_ERROR));
        assert!(!Operation::CreateClient.is_not_found(ERROR_DHCP_JET_ERROR));
        assert!(!Operation::GetClient.is_not_found(ERROR_DHCP_CLIENT_EXISTS));
    }

    #[test]
    fn test_already_exists_only_for_create() {
        assert!(Operation::CreateClient.is_already_exists(ERROR_DHCP_CLIENT_EXISTS));
        assert!(!Operation::ModifyClient.is_already_exists(ERROR_DHCP_CLIENT_EXISTS));
    }

    #[test]
    fn test_operation_display() {
        assert_eq!(Operation::EnumerateClients.to_string(), "enumerate clients");
        assert_eq!(Operation::DeleteClient.to_string(), "delete client");
    }
}
