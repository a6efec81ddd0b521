//! An in-process stand-in for the remote server.
//!
//! [`SimulatedServer`] keeps a client registry in memory and answers the
//! [`DhcpApi`] calls the way the real server does: paged enumerations with
//! resume tokens, per-verb status codes, and result buffers from its own
//! allocator that must be handed back through `free_memory`.
//!
//! It also keeps the books on that allocator, so tests can assert that every
//! buffer was released exactly once, and can be told to fail the next call
//! of a given verb in each of the ways a foreign call can fail:
//!
//! - [`Failure::NullOut`]: the status, with the out-pointer left null
//! - [`Failure::Partial`]: the status, with an allocated but empty result
//! - [`Failure::Populated`]: the status, with a fully populated result

use std::collections::{BTreeMap, HashMap};
use std::ffi::c_void;
use std::net::Ipv4Addr;
use std::ops::Bound;
use std::ptr;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

use crate::api::{
    DhcpApi, ERROR_DHCP_CLIENT_EXISTS, ERROR_DHCP_JET_ERROR, ERROR_DHCP_SUBNET_NOT_PRESENT,
    ERROR_INVALID_PARAMETER, ERROR_MORE_DATA, ERROR_NO_MORE_ITEMS, ERROR_SUCCESS, Operation,
};
use crate::record::{ApiVersion, Client};
use crate::search::{DhcpSearchInfo, SearchKey};
use crate::text::{ip_to_uint32, uint32_to_ip};
use crate::wire::{
    ClientLayout, DhcpClientInfoArrayV4, DhcpClientInfoPb, DhcpClientInfoPbArray,
    DhcpClientInfoV4, Encoded,
};

/// How the next call of an operation should fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    NullOut(u32),
    Partial(u32),
    Populated(u32),
}

impl Failure {
    fn status(self) -> u32 {
        match self {
            Self::NullOut(status) | Self::Partial(status) | Self::Populated(status) => status,
        }
    }
}

/// Allocator bookkeeping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AllocationStats {
    pub allocations: usize,
    pub frees: usize,
    /// Frees of null or of pointers the allocator never handed out (or
    /// already took back).
    pub invalid_frees: usize,
    pub live: usize,
}

type Dropper = unsafe fn(*mut ());

unsafe fn drop_boxed<T>(raw: *mut ()) {
    // SAFETY: only called with pointers produced by `Box::into_raw` for a `T`.
    drop(unsafe { Box::from_raw(raw.cast::<T>()) });
}

/// A legacy enumeration result: the header, its inline records, and the
/// buffers those records point into.
#[repr(C)]
struct OwnedArrayV4 {
    raw: DhcpClientInfoArrayV4,
    _records: Vec<DhcpClientInfoV4>,
    _backing: Vec<Encoded<DhcpClientInfoV4>>,
}

impl OwnedArrayV4 {
    fn new(backing: Vec<Encoded<DhcpClientInfoV4>>) -> Self {
        let mut records: Vec<DhcpClientInfoV4> =
            backing.iter().map(|encoded| *encoded.raw()).collect();
        let raw = DhcpClientInfoArrayV4 {
            num_elements: records.len() as u32,
            clients: if records.is_empty() {
                ptr::null_mut()
            } else {
                records.as_mut_ptr()
            },
        };
        Self {
            raw,
            _records: records,
            _backing: backing,
        }
    }
}

/// A current enumeration result: the header, the pointer array, and the
/// records it points to.
#[repr(C)]
struct OwnedArrayPb {
    raw: DhcpClientInfoPbArray,
    _pointers: Vec<*mut DhcpClientInfoPb>,
    _backing: Vec<Encoded<DhcpClientInfoPb>>,
}

impl OwnedArrayPb {
    fn new(backing: Vec<Encoded<DhcpClientInfoPb>>) -> Self {
        let mut pointers: Vec<*mut DhcpClientInfoPb> = backing
            .iter()
            .map(|encoded| ptr::from_ref(encoded.raw()).cast_mut())
            .collect();
        let raw = DhcpClientInfoPbArray {
            num_elements: pointers.len() as u32,
            clients: if pointers.is_empty() {
                ptr::null_mut()
            } else {
                pointers.as_mut_ptr()
            },
        };
        Self {
            raw,
            _pointers: pointers,
            _backing: backing,
        }
    }
}

/// One page worth of stored clients.
struct Slice {
    clients: Vec<Client>,
    resume_token: u32,
    status: u32,
    total: u32,
}

#[derive(Default)]
struct State {
    /// Subnet address to mask.
    subnets: BTreeMap<u32, u32>,
    /// Keyed by address, so enumeration order is address order.
    clients: BTreeMap<u32, Client>,
    allocations: HashMap<usize, Dropper>,
    stats: AllocationStats,
    failures: HashMap<Operation, Failure>,
    calls: HashMap<Operation, usize>,
}

impl State {
    fn subnet_of(&self, address: u32) -> Option<u32> {
        self.subnets
            .iter()
            .find(|&(&subnet, &mask)| address & mask == subnet)
            .map(|(&subnet, _)| subnet)
    }

    fn find(&self, key: &SearchKey) -> Option<u32> {
        self.clients
            .iter()
            .find(|(_, client)| match key {
                SearchKey::IpAddress(ip) => client.address == *ip,
                SearchKey::Name(name) => client.name.eq_ignore_ascii_case(name),
                SearchKey::HardwareAddress { subnet, mac } => {
                    client.hardware_address == *mac && client.in_subnet(*subnet)
                }
            })
            .map(|(&address, _)| address)
    }
}

/// The simulated server. Cheap to share across threads by reference.
#[derive(Default)]
pub struct SimulatedServer {
    state: Mutex<State>,
}

impl SimulatedServer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_subnet(self, subnet: Ipv4Addr, mask: Ipv4Addr) -> Self {
        self.add_subnet(subnet, mask);
        self
    }

    pub fn add_subnet(&self, subnet: Ipv4Addr, mask: Ipv4Addr) {
        let mask = ip_to_uint32(mask);
        self.lock()
            .subnets
            .insert(ip_to_uint32(subnet) & mask, mask);
    }

    /// Stores `client` directly, bypassing the create verb and its checks.
    pub fn insert_client(&self, client: Client) {
        self.lock()
            .clients
            .insert(ip_to_uint32(client.address), client);
    }

    pub fn remove_client(&self, address: Ipv4Addr) -> Option<Client> {
        self.lock().clients.remove(&ip_to_uint32(address))
    }

    pub fn client(&self, address: Ipv4Addr) -> Option<Client> {
        self.lock().clients.get(&ip_to_uint32(address)).cloned()
    }

    /// Every stored client, in address order.
    pub fn clients(&self) -> Vec<Client> {
        self.lock().clients.values().cloned().collect()
    }

    /// Makes the next call of `operation` fail as described.
    pub fn fail_next(&self, operation: Operation, failure: Failure) {
        self.lock().failures.insert(operation, failure);
    }

    pub fn stats(&self) -> AllocationStats {
        self.lock().stats
    }

    /// How many times `operation` has been called.
    pub fn calls(&self, operation: Operation) -> usize {
        self.lock().calls.get(&operation).copied().unwrap_or(0)
    }

    /// Hands out a buffer from the simulated remote allocator.
    pub fn allocate<T: 'static>(&self, value: T) -> *mut T {
        let raw = Box::into_raw(Box::new(value));
        let mut state = self.lock();
        state
            .allocations
            .insert(raw as usize, drop_boxed::<T> as Dropper);
        state.stats.allocations += 1;
        state.stats.live += 1;
        raw
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Counts the call and takes any failure queued for it.
    fn begin(&self, operation: Operation) -> Option<Failure> {
        let mut state = self.lock();
        *state.calls.entry(operation).or_default() += 1;
        state.failures.remove(&operation)
    }

    fn slice(&self, subnet: u32, resume_token: u32, preferred_maximum: u32) -> Result<Slice, u32> {
        let state = self.lock();
        let Some(&mask) = state.subnets.get(&subnet) else {
            return Err(ERROR_DHCP_SUBNET_NOT_PRESENT);
        };

        let members = || {
            state
                .clients
                .iter()
                .filter(move |&(&address, _)| address & mask == subnet)
        };
        let total = members().count() as u32;
        let page_size = preferred_maximum.max(1) as usize;

        let mut remaining = state
            .clients
            .range((Bound::Excluded(resume_token), Bound::Unbounded))
            .filter(|&(&address, _)| address & mask == subnet)
            .map(|(_, client)| client);
        let clients: Vec<Client> = remaining.by_ref().take(page_size).cloned().collect();
        let more = remaining.next().is_some();

        let Some(last) = clients.last() else {
            return Ok(Slice {
                clients,
                resume_token,
                status: ERROR_NO_MORE_ITEMS,
                total,
            });
        };

        Ok(Slice {
            resume_token: ip_to_uint32(last.address),
            status: if more { ERROR_MORE_DATA } else { ERROR_SUCCESS },
            clients,
            total,
        })
    }

    fn encode_all<L: ClientLayout>(clients: &[Client]) -> Result<Vec<Encoded<L>>, u32> {
        clients
            .iter()
            .map(|client| L::encode_as_stored(client))
            .collect::<crate::error::Result<_>>()
            .map_err(|error| {
                warn!("Simulated server cannot encode a stored client: {}", error);
                ERROR_INVALID_PARAMETER
            })
    }

    #[allow(clippy::too_many_arguments)]
    fn enumerate<L, O>(
        &self,
        subnet: u32,
        resume_handle: &mut u32,
        preferred_maximum: u32,
        clients: &mut *mut L::Array,
        clients_read: &mut u32,
        clients_total: &mut u32,
        empty: L::Array,
        wrap: impl FnOnce(Vec<Encoded<L>>) -> O,
    ) -> u32
    where
        L: ClientLayout + 'static,
        L::Array: 'static,
        O: 'static,
    {
        let failure = self.begin(Operation::EnumerateClients);
        match failure {
            Some(Failure::NullOut(status)) => return status,
            Some(Failure::Partial(status)) => {
                *clients = self.allocate(empty);
                return status;
            }
            _ => {}
        }

        let slice = match self.slice(subnet, *resume_handle, preferred_maximum) {
            Ok(slice) => slice,
            Err(status) => return status,
        };
        debug!(
            "Simulated {} page of {}: {} of {} from token {}",
            L::VERSION,
            uint32_to_ip(subnet),
            slice.clients.len(),
            slice.total,
            *resume_handle
        );

        if !slice.clients.is_empty() {
            let encoded = match Self::encode_all::<L>(&slice.clients) {
                Ok(encoded) => encoded,
                Err(status) => return status,
            };
            // `raw` leads both owned aggregates, so the allocation address
            // is also the address of the array header.
            *clients = self.allocate(wrap(encoded)).cast();
            *clients_read = slice.clients.len() as u32;
        }
        *clients_total = slice.total;

        if let Some(failure) = failure {
            return failure.status();
        }
        *resume_handle = slice.resume_token;
        slice.status
    }

    fn get<L: ClientLayout + 'static>(
        &self,
        search: &DhcpSearchInfo,
        client: &mut *mut L,
        empty: L,
        version: ApiVersion,
    ) -> u32 {
        let failure = self.begin(Operation::GetClient);
        match failure {
            Some(Failure::NullOut(status)) => return status,
            Some(Failure::Partial(status)) => {
                *client = self.allocate(empty);
                return status;
            }
            _ => {}
        }

        // SAFETY: callers pass searches whose payload is valid for the call.
        let Ok(key) = (unsafe { SearchKey::decode(search) }) else {
            return ERROR_INVALID_PARAMETER;
        };
        let found = {
            let state = self.lock();
            state
                .find(&key)
                .and_then(|address| state.clients.get(&address).cloned())
        };
        let Some(found) = found else {
            debug!("Simulated {} lookup of {} found nothing", version, key);
            return ERROR_DHCP_JET_ERROR;
        };

        match L::encode_as_stored(&found) {
            Ok(encoded) => *client = self.allocate(encoded).cast(),
            Err(_) => return ERROR_INVALID_PARAMETER,
        }
        failure.map_or(ERROR_SUCCESS, Failure::status)
    }

    fn create<L: ClientLayout>(&self, record: &L) -> u32 {
        if let Some(failure) = self.begin(Operation::CreateClient) {
            return failure.status();
        }
        // SAFETY: callers pass records whose pointers are valid for the call.
        let Ok(client) = (unsafe { record.decode() }) else {
            return ERROR_INVALID_PARAMETER;
        };

        let address = ip_to_uint32(client.address);
        let mut state = self.lock();
        if state.subnet_of(address).is_none() {
            return ERROR_DHCP_SUBNET_NOT_PRESENT;
        }
        if state.clients.contains_key(&address) {
            return ERROR_DHCP_CLIENT_EXISTS;
        }
        state.clients.insert(address, client);
        ERROR_SUCCESS
    }
}

impl DhcpApi for SimulatedServer {
    unsafe fn enum_subnet_clients_v4(
        &self,
        subnet: u32,
        resume_handle: &mut u32,
        preferred_maximum: u32,
        clients: &mut *mut DhcpClientInfoArrayV4,
        clients_read: &mut u32,
        clients_total: &mut u32,
    ) -> u32 {
        self.enumerate::<DhcpClientInfoV4, _>(
            subnet,
            resume_handle,
            preferred_maximum,
            clients,
            clients_read,
            clients_total,
            DhcpClientInfoArrayV4 {
                num_elements: 0,
                clients: ptr::null_mut(),
            },
            OwnedArrayV4::new,
        )
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
        self.enumerate::<DhcpClientInfoPb, _>(
            subnet,
            resume_handle,
            preferred_maximum,
            clients,
            clients_read,
            clients_total,
            DhcpClientInfoPbArray {
                num_elements: 0,
                clients: ptr::null_mut(),
            },
            OwnedArrayPb::new,
        )
    }

    unsafe fn get_client_info_v4(
        &self,
        search: &DhcpSearchInfo,
        client: &mut *mut DhcpClientInfoV4,
    ) -> u32 {
        self.get(search, client, DhcpClientInfoV4::EMPTY, ApiVersion::Legacy)
    }

    unsafe fn get_client_info_pb(
        &self,
        search: &DhcpSearchInfo,
        client: &mut *mut DhcpClientInfoPb,
    ) -> u32 {
        self.get(search, client, DhcpClientInfoPb::EMPTY, ApiVersion::Current)
    }

    unsafe fn create_client_info_v4(&self, client: &DhcpClientInfoV4) -> u32 {
        self.create(client)
    }

    unsafe fn create_client_info_pb(&self, client: &DhcpClientInfoPb) -> u32 {
        self.create(client)
    }

    unsafe fn set_client_info_v4(&self, client: &DhcpClientInfoV4) -> u32 {
        if let Some(failure) = self.begin(Operation::ModifyClient) {
            return failure.status();
        }
        // SAFETY: callers pass records whose pointers are valid for the call.
        let Ok(mut updated) = (unsafe { client.decode() }) else {
            return ERROR_INVALID_PARAMETER;
        };

        let mut state = self.lock();
        let Some(existing) = state.clients.get_mut(&ip_to_uint32(updated.address)) else {
            return ERROR_DHCP_JET_ERROR;
        };
        // The legacy layout cannot carry these, so they survive a modify.
        updated.extended = existing.extended.take();
        *existing = updated;
        ERROR_SUCCESS
    }

    unsafe fn delete_client_info(&self, search: &DhcpSearchInfo) -> u32 {
        if let Some(failure) = self.begin(Operation::DeleteClient) {
            return failure.status();
        }
        // SAFETY: callers pass searches whose payload is valid for the call.
        let Ok(key) = (unsafe { SearchKey::decode(search) }) else {
            return ERROR_INVALID_PARAMETER;
        };

        let mut state = self.lock();
        match state.find(&key) {
            Some(address) => {
                state.clients.remove(&address);
                ERROR_SUCCESS
            }
            None => ERROR_DHCP_JET_ERROR,
        }
    }

    unsafe fn free_memory(&self, buffer: *mut c_void) {
        let dropper = {
            let mut state = self.lock();
            match state.allocations.remove(&(buffer as usize)) {
                Some(dropper) => {
                    state.stats.frees += 1;
                    state.stats.live -= 1;
                    Some(dropper)
                }
                None => {
                    state.stats.invalid_frees += 1;
                    None
                }
            }
        };

        match dropper {
            // SAFETY: the entry was recorded by `allocate` for this pointer.
            Some(dropper) => unsafe { dropper(buffer.cast()) },
            None => warn!("Free of unknown buffer {:p}", buffer),
        }
    }
}

impl Drop for SimulatedServer {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        for (address, dropper) in state.allocations.drain() {
            // SAFETY: every entry was recorded by `allocate` and never freed.
            unsafe { dropper(address as *mut ()) };
        }
    }
}
