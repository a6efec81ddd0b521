//! Native client record layouts and their mapping to [`Client`].
//!
//! The server speaks two generations of the same record:
//!
//! ```text
//! DHCP_CLIENT_INFO_V4 (legacy)          DHCP_CLIENT_INFO_PB (current)
//! +---------------------------+         +---------------------------+
//! | ClientIpAddress      u32  |         | ClientIpAddress      u32  |
//! | SubnetMask           u32  |         | SubnetMask           u32  |
//! | ClientHardwareAddress     |         | ClientHardwareAddress     |
//! |   { len u32, data * }     |         |   { len u32, data * }     |
//! | ClientName        WCHAR * |         | ClientName        WCHAR * |
//! | ClientComment     WCHAR * |         | ClientComment     WCHAR * |
//! | ClientLeaseExpires  2*u32 |         | ClientLeaseExpires  2*u32 |
//! | OwnerHost {u32, *, *}     |         | OwnerHost {u32, *, *}     |
//! | bClientType          u8   |         | bClientType          u8   |
//! +---------------------------+         | AddressState         u8   |
//!                                       | Status               u32  |
//!                                       | ProbationEnds       2*u32 |
//!                                       | QuarantineCapable    i32  |
//!                                       | FilterStatus         u32  |
//!                                       | PolicyName        WCHAR * |
//!                                       +---------------------------+
//! ```
//!
//! Legacy enumerations return a contiguous array of records; current
//! enumerations return an array of record pointers.
//!
//! These layouts are fixed by the server and must match it byte for byte.

use std::net::Ipv4Addr;
use std::ptr;

use tracing::warn;

use crate::error::{Error, Result};
use crate::record::{
    ApiVersion, Client, ClientType, Extended, FileTime, HTYPE_ETHERNET, MAC_LEN, MacAddress,
    OwnerHost,
};
use crate::text::{WideString, ip_to_uint32, read_wide_ptr, uint32_to_ip};

/// Length of a client UID: subnet (4) + hardware type (1) + MAC (6).
pub const CLIENT_UID_LEN: usize = 4 + 1 + MAC_LEN;

/// `DHCP_BINARY_DATA`
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct DhcpBinaryData {
    pub data_length: u32,
    pub data: *mut u8,
}

impl DhcpBinaryData {
    pub const EMPTY: DhcpBinaryData = DhcpBinaryData {
        data_length: 0,
        data: ptr::null_mut(),
    };

    /// # Safety
    ///
    /// `data` must be null or valid for `data_length` bytes.
    pub unsafe fn as_slice(&self) -> &[u8] {
        if self.data.is_null() || self.data_length == 0 {
            return &[];
        }
        // SAFETY: upheld by the caller.
        unsafe { std::slice::from_raw_parts(self.data, self.data_length as usize) }
    }
}

/// `DATE_TIME`
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DhcpDateTime {
    pub low_date_time: u32,
    pub high_date_time: u32,
}

impl From<DhcpDateTime> for FileTime {
    fn from(value: DhcpDateTime) -> Self {
        FileTime {
            low: value.low_date_time,
            high: value.high_date_time,
        }
    }
}

impl From<FileTime> for DhcpDateTime {
    fn from(value: FileTime) -> Self {
        DhcpDateTime {
            low_date_time: value.low,
            high_date_time: value.high,
        }
    }
}

/// `DHCP_HOST_INFO`
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct DhcpHostInfo {
    pub ip_address: u32,
    pub net_bios_name: *mut u16,
    pub host_name: *mut u16,
}

impl DhcpHostInfo {
    pub const EMPTY: DhcpHostInfo = DhcpHostInfo {
        ip_address: 0,
        net_bios_name: ptr::null_mut(),
        host_name: ptr::null_mut(),
    };
}

/// `DHCP_CLIENT_INFO_V4`
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct DhcpClientInfoV4 {
    pub client_ip_address: u32,
    pub subnet_mask: u32,
    pub client_hardware_address: DhcpBinaryData,
    pub client_name: *mut u16,
    pub client_comment: *mut u16,
    pub client_lease_expires: DhcpDateTime,
    pub owner_host: DhcpHostInfo,
    pub client_type: u8,
}

impl DhcpClientInfoV4 {
    /// A record with every pointer null, as a failed call may leave it.
    pub const EMPTY: DhcpClientInfoV4 = DhcpClientInfoV4 {
        client_ip_address: 0,
        subnet_mask: 0,
        client_hardware_address: DhcpBinaryData::EMPTY,
        client_name: ptr::null_mut(),
        client_comment: ptr::null_mut(),
        client_lease_expires: DhcpDateTime {
            low_date_time: 0,
            high_date_time: 0,
        },
        owner_host: DhcpHostInfo::EMPTY,
        client_type: 0,
    };
}

/// `DHCP_CLIENT_INFO_PB`
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct DhcpClientInfoPb {
    pub client_ip_address: u32,
    pub subnet_mask: u32,
    pub client_hardware_address: DhcpBinaryData,
    pub client_name: *mut u16,
    pub client_comment: *mut u16,
    pub client_lease_expires: DhcpDateTime,
    pub owner_host: DhcpHostInfo,
    pub client_type: u8,
    pub address_state: u8,
    pub status: u32,
    pub probation_ends: DhcpDateTime,
    pub quarantine_capable: i32,
    pub filter_status: u32,
    pub policy_name: *mut u16,
}

impl DhcpClientInfoPb {
    /// A record with every pointer null, as a failed call may leave it.
    pub const EMPTY: DhcpClientInfoPb = DhcpClientInfoPb {
        client_ip_address: 0,
        subnet_mask: 0,
        client_hardware_address: DhcpBinaryData::EMPTY,
        client_name: ptr::null_mut(),
        client_comment: ptr::null_mut(),
        client_lease_expires: DhcpDateTime {
            low_date_time: 0,
            high_date_time: 0,
        },
        owner_host: DhcpHostInfo::EMPTY,
        client_type: 0,
        address_state: 0,
        status: 0,
        probation_ends: DhcpDateTime {
            low_date_time: 0,
            high_date_time: 0,
        },
        quarantine_capable: 0,
        filter_status: 0,
        policy_name: ptr::null_mut(),
    };
}

/// Legacy enumeration result: records stored inline.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct DhcpClientInfoArrayV4 {
    pub num_elements: u32,
    pub clients: *mut DhcpClientInfoV4,
}

/// Current enumeration result: pointers to records.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct DhcpClientInfoPbArray {
    pub num_elements: u32,
    pub clients: *mut *mut DhcpClientInfoPb,
}

/// Splits a hardware address buffer into a MAC and hardware type.
///
/// Buffers up to six bytes are Ethernet addresses, zero padded. A buffer
/// of [`CLIENT_UID_LEN`] bytes is a client UID carrying its own hardware
/// type. Anything longer is truncated to its first six bytes.
pub fn decode_hardware(bytes: &[u8]) -> (MacAddress, u8) {
    let mut mac = [0u8; MAC_LEN];
    if bytes.len() <= MAC_LEN {
        mac[..bytes.len()].copy_from_slice(bytes);
        return (MacAddress(mac), HTYPE_ETHERNET);
    }

    if bytes.len() == CLIENT_UID_LEN {
        mac.copy_from_slice(&bytes[5..]);
        return (MacAddress(mac), bytes[4]);
    }

    warn!(
        "Truncating {}-byte hardware address to {} bytes",
        bytes.len(),
        MAC_LEN
    );
    mac.copy_from_slice(&bytes[..MAC_LEN]);
    (MacAddress(mac), HTYPE_ETHERNET)
}

/// Builds a client UID: subnet as a little-endian DWORD, hardware type, MAC.
pub fn client_uid(subnet: Ipv4Addr, hardware_type: u8, mac: MacAddress) -> Vec<u8> {
    let mut uid = Vec::with_capacity(CLIENT_UID_LEN);
    uid.extend_from_slice(&ip_to_uint32(subnet).to_le_bytes());
    uid.push(hardware_type);
    uid.extend_from_slice(&mac.octets());
    uid
}

/// Hardware bytes for a record: a bare MAC for Ethernet, a UID otherwise.
fn encode_hardware(client: &Client) -> Box<[u8]> {
    if client.hardware_type == HTYPE_ETHERNET {
        Box::new(client.hardware_address.octets())
    } else {
        client_uid(client.subnet(), client.hardware_type, client.hardware_address)
            .into_boxed_slice()
    }
}

/// A wire record together with the buffers its pointers refer to.
///
/// `raw` is the first field, so a pointer to an `Encoded<L>` is also a
/// valid pointer to its `L`.
#[repr(C)]
#[derive(Debug)]
pub struct Encoded<L> {
    raw: L,
    _hardware: Box<[u8]>,
    _strings: Vec<WideString>,
}

impl<L: ClientLayout> Encoded<L> {
    pub fn raw(&self) -> &L {
        &self.raw
    }

    /// Reads the record back.
    pub fn decode(&self) -> Result<Client> {
        // SAFETY: every pointer in `raw` refers to a buffer owned by `self`.
        unsafe { self.raw.decode() }
    }
}

/// Buffers shared by both layouts.
struct CommonWire {
    hardware: Box<[u8]>,
    name: WideString,
    comment: WideString,
    netbios_name: WideString,
    host_name: WideString,
}

impl CommonWire {
    fn encode(client: &Client) -> Result<Self> {
        Ok(Self {
            hardware: encode_hardware(client),
            name: WideString::new(&client.name)?,
            comment: WideString::new(&client.comment)?,
            netbios_name: WideString::new(&client.owner.netbios_name)?,
            host_name: WideString::new(&client.owner.host_name)?,
        })
    }

    fn hardware(&self) -> DhcpBinaryData {
        DhcpBinaryData {
            data_length: self.hardware.len() as u32,
            data: self.hardware.as_ptr().cast_mut(),
        }
    }

    fn owner(&self, client: &Client) -> DhcpHostInfo {
        DhcpHostInfo {
            ip_address: ip_to_uint32(client.owner.address),
            net_bios_name: self.netbios_name.as_wire_ptr(),
            host_name: self.host_name.as_wire_ptr(),
        }
    }

    fn into_encoded<L>(self, raw: L, extra: Option<WideString>) -> Encoded<L> {
        let mut strings = vec![self.name, self.comment, self.netbios_name, self.host_name];
        strings.extend(extra);
        Encoded {
            raw,
            _hardware: self.hardware,
            _strings: strings,
        }
    }
}

/// Fields both layouts carry, borrowed from either.
struct CommonFields<'a> {
    address: u32,
    subnet_mask: u32,
    hardware: &'a DhcpBinaryData,
    name: *const u16,
    comment: *const u16,
    lease_expires: DhcpDateTime,
    owner: &'a DhcpHostInfo,
    client_type: u8,
}

impl CommonFields<'_> {
    /// # Safety
    ///
    /// Every pointer must be null or valid per the layout contract.
    unsafe fn decode(&self, version: ApiVersion) -> Result<Client> {
        // SAFETY: upheld by the caller.
        let (hardware_address, hardware_type) =
            decode_hardware(unsafe { self.hardware.as_slice() });
        Ok(Client {
            address: uint32_to_ip(self.address),
            subnet_mask: uint32_to_ip(self.subnet_mask),
            hardware_address,
            hardware_type,
            name: unsafe { read_wide_ptr(self.name) }?,
            comment: unsafe { read_wide_ptr(self.comment) }?,
            lease_expires: self.lease_expires.into(),
            client_type: ClientType::from(self.client_type),
            owner: OwnerHost {
                address: uint32_to_ip(self.owner.ip_address),
                netbios_name: unsafe { read_wide_ptr(self.owner.net_bios_name) }?,
                host_name: unsafe { read_wide_ptr(self.owner.host_name) }?,
            },
            extended: None,
            version,
        })
    }
}

fn encode_v4(client: &Client, lease_expires: DhcpDateTime) -> Result<Encoded<DhcpClientInfoV4>> {
    let common = CommonWire::encode(client)?;
    let raw = DhcpClientInfoV4 {
        client_ip_address: ip_to_uint32(client.address),
        subnet_mask: ip_to_uint32(client.subnet_mask),
        client_hardware_address: common.hardware(),
        client_name: common.name.as_wire_ptr(),
        client_comment: common.comment.as_wire_ptr(),
        client_lease_expires: lease_expires,
        owner_host: common.owner(client),
        client_type: client.client_type.into(),
    };
    Ok(common.into_encoded(raw, None))
}

fn encode_pb(client: &Client, lease_expires: DhcpDateTime) -> Result<Encoded<DhcpClientInfoPb>> {
    let common = CommonWire::encode(client)?;
    let extended = client.extended.clone().unwrap_or_default();
    let policy_name = WideString::new(&extended.policy_name)?;
    let raw = DhcpClientInfoPb {
        client_ip_address: ip_to_uint32(client.address),
        subnet_mask: ip_to_uint32(client.subnet_mask),
        client_hardware_address: common.hardware(),
        client_name: common.name.as_wire_ptr(),
        client_comment: common.comment.as_wire_ptr(),
        client_lease_expires: lease_expires,
        owner_host: common.owner(client),
        client_type: client.client_type.into(),
        address_state: extended.address_state.into(),
        status: extended.quarantine_status.into(),
        probation_ends: extended.probation_ends.into(),
        quarantine_capable: i32::from(extended.quarantine_capable),
        filter_status: extended.filter_status,
        policy_name: policy_name.as_wire_ptr(),
    };
    Ok(common.into_encoded(raw, Some(policy_name)))
}

/// A native client record generation.
///
/// Implemented by [`DhcpClientInfoV4`] and [`DhcpClientInfoPb`]; everything
/// generic over the layout goes through this trait.
pub trait ClientLayout: Copy + Sized {
    const VERSION: ApiVersion;

    /// The enumeration result shape for this generation.
    type Array;

    /// Encodes `client` into this layout.
    ///
    /// The lease expiration is always sent as the zero time: the server
    /// calls this generation speaks do not accept a custom expiry.
    fn encode(client: &Client) -> Result<Encoded<Self>>;

    /// Encodes `client` the way a server stores it, lease expiration included.
    fn encode_as_stored(client: &Client) -> Result<Encoded<Self>>;

    /// # Safety
    ///
    /// Every pointer in `self` must be null or valid per the layout contract.
    unsafe fn decode(&self) -> Result<Client>;

    /// # Safety
    ///
    /// `array` and everything it points to must be valid per the layout contract.
    unsafe fn decode_array(array: &Self::Array) -> Result<Vec<Client>>;
}

impl ClientLayout for DhcpClientInfoV4 {
    const VERSION: ApiVersion = ApiVersion::Legacy;
    type Array = DhcpClientInfoArrayV4;

    fn encode(client: &Client) -> Result<Encoded<Self>> {
        encode_v4(client, DhcpDateTime::default())
    }

    fn encode_as_stored(client: &Client) -> Result<Encoded<Self>> {
        encode_v4(client, client.lease_expires.into())
    }

    unsafe fn decode(&self) -> Result<Client> {
        let fields = CommonFields {
            address: self.client_ip_address,
            subnet_mask: self.subnet_mask,
            hardware: &self.client_hardware_address,
            name: self.client_name,
            comment: self.client_comment,
            lease_expires: self.client_lease_expires,
            owner: &self.owner_host,
            client_type: self.client_type,
        };
        // SAFETY: upheld by the caller.
        unsafe { fields.decode(Self::VERSION) }
    }

    unsafe fn decode_array(array: &Self::Array) -> Result<Vec<Client>> {
        if array.num_elements == 0 {
            return Ok(Vec::new());
        }
        if array.clients.is_null() {
            return Err(Error::InvalidResponse(format!(
                "{} legacy records reported but no array returned",
                array.num_elements
            )));
        }

        // SAFETY: the server returned `num_elements` contiguous records.
        let records =
            unsafe { std::slice::from_raw_parts(array.clients, array.num_elements as usize) };
        records
            .iter()
            .map(|record| unsafe { record.decode() })
            .collect()
    }
}

impl ClientLayout for DhcpClientInfoPb {
    const VERSION: ApiVersion = ApiVersion::Current;
    type Array = DhcpClientInfoPbArray;

    fn encode(client: &Client) -> Result<Encoded<Self>> {
        encode_pb(client, DhcpDateTime::default())
    }

    fn encode_as_stored(client: &Client) -> Result<Encoded<Self>> {
        encode_pb(client, client.lease_expires.into())
    }

    unsafe fn decode(&self) -> Result<Client> {
        let fields = CommonFields {
            address: self.client_ip_address,
            subnet_mask: self.subnet_mask,
            hardware: &self.client_hardware_address,
            name: self.client_name,
            comment: self.client_comment,
            lease_expires: self.client_lease_expires,
            owner: &self.owner_host,
            client_type: self.client_type,
        };
        // SAFETY: upheld by the caller.
        let mut client = unsafe { fields.decode(Self::VERSION) }?;
        client.extended = Some(Extended {
            address_state: self.address_state.into(),
            quarantine_status: self.status.into(),
            probation_ends: self.probation_ends.into(),
            quarantine_capable: self.quarantine_capable != 0,
            filter_status: self.filter_status,
            policy_name: unsafe { read_wide_ptr(self.policy_name) }?,
        });
        Ok(client)
    }

    unsafe fn decode_array(array: &Self::Array) -> Result<Vec<Client>> {
        if array.num_elements == 0 {
            return Ok(Vec::new());
        }
        if array.clients.is_null() {
            return Err(Error::InvalidResponse(format!(
                "{} records reported but no pointer array returned",
                array.num_elements
            )));
        }

        // SAFETY: the server returned `num_elements` record pointers.
        let pointers =
            unsafe { std::slice::from_raw_parts(array.clients, array.num_elements as usize) };
        let mut clients = Vec::with_capacity(pointers.len());
        for (index, &record) in pointers.iter().enumerate() {
            if record.is_null() {
                warn!("Skipping null record pointer at index {}", index);
                continue;
            }
            // SAFETY: non-null entries point to records owned by the same buffer.
            clients.push(unsafe { (*record).decode() }?);
        }
        Ok(clients)
    }
}

/// A record encoded in whichever layout was requested.
#[derive(Debug)]
pub enum EncodedClient {
    Legacy(Encoded<DhcpClientInfoV4>),
    Current(Encoded<DhcpClientInfoPb>),
}

impl EncodedClient {
    pub fn version(&self) -> ApiVersion {
        match self {
            Self::Legacy(_) => ApiVersion::Legacy,
            Self::Current(_) => ApiVersion::Current,
        }
    }

    pub fn decode(&self) -> Result<Client> {
        match self {
            Self::Legacy(encoded) => encoded.decode(),
            Self::Current(encoded) => encoded.decode(),
        }
    }
}

/// Encodes `client` into the layout for `version`.
///
/// Fields the legacy layout lacks are dropped; the lease expiration is
/// always the zero time.
pub fn encode(client: &Client, version: ApiVersion) -> Result<EncodedClient> {
    match version {
        ApiVersion::Legacy => DhcpClientInfoV4::encode(client).map(EncodedClient::Legacy),
        ApiVersion::Current => DhcpClientInfoPb::encode(client).map(EncodedClient::Current),
    }
}
