//! The Windows DHCP server management API as a [`DhcpApi`].
//!
//! On other platforms [`RemoteServer::connect`] fails with
//! [`Error::Unavailable`] and the type cannot be constructed.

use std::fmt;

#[cfg(windows)]
pub use windows::RemoteServer;

#[cfg(not(windows))]
pub use unsupported::RemoteServer;

#[cfg(windows)]
mod windows {
    use std::collections::HashSet;
    use std::ffi::c_void;
    use std::ptr;
    use std::sync::{Mutex, PoisonError};

    use tracing::{debug, trace};
    use windows_sys::Win32::NetworkManagement::Dhcp::{
        DhcpCreateClientInfoV4, DhcpDeleteClientInfo, DhcpEnumSubnetClientsV4,
        DhcpGetClientInfoV4, DhcpRpcFreeMemory, DhcpSetClientInfoV4, DhcpV4CreateClientInfo,
        DhcpV4EnumSubnetClients, DhcpV4GetClientInfo,
    };

    use crate::api::DhcpApi;
    use crate::error::Result;
    use crate::search::DhcpSearchInfo;
    use crate::text::WideString;
    use crate::wire::{
        DhcpClientInfoArrayV4, DhcpClientInfoPb, DhcpClientInfoPbArray, DhcpClientInfoV4,
    };

    /// The legacy enumeration result as the server lays it out: an array
    /// of record pointers.
    #[repr(C)]
    struct ServerArrayV4 {
        num_elements: u32,
        clients: *mut *mut DhcpClientInfoV4,
    }

    /// A server legacy array copied into contiguous records. The copies
    /// still point into the server buffer, which is freed along with it.
    #[repr(C)]
    struct ContiguousV4 {
        raw: DhcpClientInfoArrayV4,
        _records: Vec<DhcpClientInfoV4>,
        server: *mut ServerArrayV4,
    }

    /// A connection to one DHCP server.
    pub struct RemoteServer {
        server: String,
        address: WideString,
        /// Contiguous copies handed out by legacy enumerations, by address.
        contiguous: Mutex<HashSet<usize>>,
    }

    impl RemoteServer {
        /// Binds to `server`, an address or host name.
        ///
        /// No call is made until the first operation; an unreachable
        /// server surfaces as that operation's remote status.
        pub fn connect(server: &str) -> Result<Self> {
            debug!("Using DHCP server management API on {}", server);
            Ok(Self {
                server: server.to_string(),
                address: WideString::new(server)?,
                contiguous: Mutex::new(HashSet::new()),
            })
        }

        pub fn server(&self) -> &str {
            &self.server
        }

        fn address(&self) -> *const u16 {
            self.address.as_wire_ptr()
        }

        /// # Safety
        ///
        /// `array` must be null or a legacy array returned by the server.
        unsafe fn make_contiguous(&self, array: *mut ServerArrayV4) -> *mut DhcpClientInfoArrayV4 {
            if array.is_null() {
                return ptr::null_mut();
            }

            // SAFETY: the server returned `num_elements` record pointers.
            let server = unsafe { &*array };
            let mut records: Vec<DhcpClientInfoV4> = if server.clients.is_null() {
                Vec::new()
            } else {
                unsafe { std::slice::from_raw_parts(server.clients, server.num_elements as usize) }
                    .iter()
                    .filter(|record| !record.is_null())
                    .map(|&record| unsafe { *record })
                    .collect()
            };

            let owned = Box::new(ContiguousV4 {
                raw: DhcpClientInfoArrayV4 {
                    num_elements: records.len() as u32,
                    clients: records.as_mut_ptr(),
                },
                _records: records,
                server: array,
            });
            let raw = Box::into_raw(owned);
            self.contiguous
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(raw as usize);
            raw.cast()
        }
    }

    impl DhcpApi for RemoteServer {
        unsafe fn enum_subnet_clients_v4(
            &self,
            subnet: u32,
            resume_handle: &mut u32,
            preferred_maximum: u32,
            clients: &mut *mut DhcpClientInfoArrayV4,
            clients_read: &mut u32,
            clients_total: &mut u32,
        ) -> u32 {
            let mut server_array: *mut ServerArrayV4 = ptr::null_mut();
            let status = unsafe {
                DhcpEnumSubnetClientsV4(
                    self.address(),
                    subnet,
                    resume_handle,
                    preferred_maximum,
                    ptr::from_mut(&mut server_array).cast(),
                    clients_read,
                    clients_total,
                )
            };
            *clients = unsafe { self.make_contiguous(server_array) };
            status
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
                DhcpV4EnumSubnetClients(
                    self.address(),
                    subnet,
                    resume_handle,
                    preferred_maximum,
                    ptr::from_mut(clients).cast(),
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
            unsafe {
                DhcpGetClientInfoV4(
                    self.address(),
                    ptr::from_ref(search).cast(),
                    ptr::from_mut(client).cast(),
                )
            }
        }

        unsafe fn get_client_info_pb(
            &self,
            search: &DhcpSearchInfo,
            client: &mut *mut DhcpClientInfoPb,
        ) -> u32 {
            unsafe {
                DhcpV4GetClientInfo(
                    self.address(),
                    ptr::from_ref(search).cast(),
                    ptr::from_mut(client).cast(),
                )
            }
        }

        unsafe fn create_client_info_v4(&self, client: &DhcpClientInfoV4) -> u32 {
            unsafe { DhcpCreateClientInfoV4(self.address(), ptr::from_ref(client).cast()) }
        }

        unsafe fn create_client_info_pb(&self, client: &DhcpClientInfoPb) -> u32 {
            unsafe { DhcpV4CreateClientInfo(self.address(), ptr::from_ref(client).cast()) }
        }

        unsafe fn set_client_info_v4(&self, client: &DhcpClientInfoV4) -> u32 {
            unsafe { DhcpSetClientInfoV4(self.address(), ptr::from_ref(client).cast()) }
        }

        unsafe fn delete_client_info(&self, search: &DhcpSearchInfo) -> u32 {
            unsafe { DhcpDeleteClientInfo(self.address(), ptr::from_ref(search).cast()) }
        }

        unsafe fn free_memory(&self, buffer: *mut c_void) {
            let contiguous = self
                .contiguous
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&(buffer as usize));

            if contiguous {
                // SAFETY: recorded by `make_contiguous`, which boxed it.
                let owned = unsafe { Box::from_raw(buffer.cast::<ContiguousV4>()) };
                trace!("Releasing server legacy array {:p}", owned.server);
                unsafe { DhcpRpcFreeMemory(owned.server.cast()) };
            } else {
                unsafe { DhcpRpcFreeMemory(buffer) };
            }
        }
    }
}

#[cfg(not(windows))]
mod unsupported {
    use std::convert::Infallible;
    use std::ffi::c_void;

    use crate::api::DhcpApi;
    use crate::error::{Error, Result};
    use crate::search::DhcpSearchInfo;
    use crate::wire::{
        DhcpClientInfoArrayV4, DhcpClientInfoPb, DhcpClientInfoPbArray, DhcpClientInfoV4,
    };

    /// Uninhabited: the management API only exists on Windows.
    pub struct RemoteServer {
        never: Infallible,
    }

    impl RemoteServer {
        pub fn connect(server: &str) -> Result<Self> {
            Err(Error::Unavailable(format!(
                "cannot manage {}: the DHCP server management API requires Windows",
                server
            )))
        }

        pub fn server(&self) -> &str {
            match self.never {}
        }
    }

    impl DhcpApi for RemoteServer {
        unsafe fn enum_subnet_clients_v4(
            &self,
            _: u32,
            _: &mut u32,
            _: u32,
            _: &mut *mut DhcpClientInfoArrayV4,
            _: &mut u32,
            _: &mut u32,
        ) -> u32 {
            match self.never {}
        }

        unsafe fn enum_subnet_clients_pb(
            &self,
            _: u32,
            _: &mut u32,
            _: u32,
            _: &mut *mut DhcpClientInfoPbArray,
            _: &mut u32,
            _: &mut u32,
        ) -> u32 {
            match self.never {}
        }

        unsafe fn get_client_info_v4(&self, _: &DhcpSearchInfo, _: &mut *mut DhcpClientInfoV4) -> u32 {
            match self.never {}
        }

        unsafe fn get_client_info_pb(&self, _: &DhcpSearchInfo, _: &mut *mut DhcpClientInfoPb) -> u32 {
            match self.never {}
        }

        unsafe fn create_client_info_v4(&self, _: &DhcpClientInfoV4) -> u32 {
            match self.never {}
        }

        unsafe fn create_client_info_pb(&self, _: &DhcpClientInfoPb) -> u32 {
            match self.never {}
        }

        unsafe fn set_client_info_v4(&self, _: &DhcpClientInfoV4) -> u32 {
            match self.never {}
        }

        unsafe fn delete_client_info(&self, _: &DhcpSearchInfo) -> u32 {
            match self.never {}
        }

        unsafe fn free_memory(&self, _: *mut c_void) {
            match self.never {}
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_connect_unavailable() {
            let result = RemoteServer::connect("127.0.0.1");
            assert!(matches!(result, Err(Error::Unavailable(_))));
        }
    }
}

impl fmt::Debug for RemoteServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteServer")
            .field("server", &self.server())
            .finish()
    }
}
