//! Lookup keys and their encoding into the `DHCP_SEARCH_INFO` union.
//!
//! A search carries exactly one of three payloads, selected by its tag.
//! The raw union is only ever read through accessors that check the tag
//! first, so asking for the wrong payload is an error rather than garbage.

use std::fmt;
use std::net::Ipv4Addr;

use crate::error::{Error, Result};
use crate::record::{HTYPE_ETHERNET, MacAddress};
use crate::text::{WideString, ip_to_uint32, read_wide_ptr, uint32_to_ip};
use crate::wire::{CLIENT_UID_LEN, DhcpBinaryData, client_uid, decode_hardware};

/// `DHCP_SEARCH_INFO_TYPE` values.
const SEARCH_CLIENT_IP_ADDRESS: u32 = 0;
const SEARCH_CLIENT_HARDWARE_ADDRESS: u32 = 1;
const SEARCH_CLIENT_NAME: u32 = 2;

/// Which payload a search key carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SearchKind {
    IpAddress,
    HardwareAddress,
    Name,
}

impl SearchKind {
    fn tag(self) -> u32 {
        match self {
            Self::IpAddress => SEARCH_CLIENT_IP_ADDRESS,
            Self::HardwareAddress => SEARCH_CLIENT_HARDWARE_ADDRESS,
            Self::Name => SEARCH_CLIENT_NAME,
        }
    }
}

impl TryFrom<u32> for SearchKind {
    type Error = u32;

    fn try_from(value: u32) -> std::result::Result<Self, Self::Error> {
        match value {
            SEARCH_CLIENT_IP_ADDRESS => Ok(Self::IpAddress),
            SEARCH_CLIENT_HARDWARE_ADDRESS => Ok(Self::HardwareAddress),
            SEARCH_CLIENT_NAME => Ok(Self::Name),
            other => Err(other),
        }
    }
}

impl fmt::Display for SearchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IpAddress => write!(f, "IP address"),
            Self::HardwareAddress => write!(f, "hardware address"),
            Self::Name => write!(f, "name"),
        }
    }
}

/// How to find one client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchKey {
    /// Lookups by MAC are scoped to a subnet on the server side.
    HardwareAddress { subnet: Ipv4Addr, mac: MacAddress },
    IpAddress(Ipv4Addr),
    Name(String),
}

impl SearchKey {
    pub fn kind(&self) -> SearchKind {
        match self {
            Self::HardwareAddress { .. } => SearchKind::HardwareAddress,
            Self::IpAddress(_) => SearchKind::IpAddress,
            Self::Name(_) => SearchKind::Name,
        }
    }

    /// Packs the key into the wire union.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Encoding`] only for a name containing a NUL.
    pub fn encode(&self) -> Result<EncodedSearch> {
        let mut encoded = EncodedSearch {
            raw: DhcpSearchInfo {
                search_type: self.kind().tag(),
                search_info: DhcpSearchInfoPayload { client_ip_address: 0 },
            },
            kind: self.kind(),
            _bytes: None,
            _wide: None,
        };

        match self {
            Self::IpAddress(ip) => {
                encoded.raw.search_info = DhcpSearchInfoPayload {
                    client_ip_address: ip_to_uint32(*ip),
                };
            }
            Self::HardwareAddress { subnet, mac } => {
                let uid = client_uid(*subnet, HTYPE_ETHERNET, *mac).into_boxed_slice();
                let data = DhcpBinaryData {
                    data_length: uid.len() as u32,
                    data: uid.as_ptr().cast_mut(),
                };
                encoded.raw.search_info = DhcpSearchInfoPayload {
                    client_hardware_address: data,
                };
                encoded._bytes = Some(uid);
            }
            Self::Name(name) => {
                let wide = WideString::new(name)?;
                encoded.raw.search_info = DhcpSearchInfoPayload {
                    client_name: wide.as_wire_ptr(),
                };
                encoded._wide = Some(wide);
            }
        }

        Ok(encoded)
    }

    /// Reads a key back out of a wire search.
    ///
    /// A hardware payload that is a bare MAC rather than a client UID
    /// decodes with an unspecified subnet.
    ///
    /// # Safety
    ///
    /// The pointer in the active payload must be valid per the layout contract.
    pub unsafe fn decode(raw: &DhcpSearchInfo) -> Result<Self> {
        match raw.kind()? {
            SearchKind::IpAddress => Ok(Self::IpAddress(uint32_to_ip(raw.client_ip_address()?))),
            SearchKind::HardwareAddress => {
                // SAFETY: upheld by the caller.
                let bytes = unsafe { raw.client_hardware_address() }?;
                let subnet = if bytes.len() == CLIENT_UID_LEN {
                    uint32_to_ip(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
                } else {
                    Ipv4Addr::UNSPECIFIED
                };
                let (mac, _) = decode_hardware(bytes);
                Ok(Self::HardwareAddress { subnet, mac })
            }
            SearchKind::Name => Ok(Self::Name(unsafe { raw.client_name() }?)),
        }
    }
}

impl fmt::Display for SearchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HardwareAddress { subnet, mac } => write!(f, "mac {} in {}", mac, subnet),
            Self::IpAddress(ip) => write!(f, "ip {}", ip),
            Self::Name(name) => write!(f, "name {:?}", name),
        }
    }
}

/// `DHCP_SEARCH_INFO` payload union.
#[repr(C)]
#[derive(Clone, Copy)]
pub union DhcpSearchInfoPayload {
    pub client_ip_address: u32,
    pub client_hardware_address: DhcpBinaryData,
    pub client_name: *mut u16,
}

/// `DHCP_SEARCH_INFO`
#[repr(C)]
#[derive(Clone, Copy)]
pub struct DhcpSearchInfo {
    pub search_type: u32,
    pub search_info: DhcpSearchInfoPayload,
}

impl DhcpSearchInfo {
    pub fn kind(&self) -> Result<SearchKind> {
        SearchKind::try_from(self.search_type)
            .map_err(|tag| Error::InvalidResponse(format!("Unknown search type {}", tag)))
    }

    fn expect(&self, requested: SearchKind) -> Result<()> {
        let actual = self.kind()?;
        if actual != requested {
            return Err(Error::SearchFieldMismatch { requested, actual });
        }
        Ok(())
    }

    pub fn client_ip_address(&self) -> Result<u32> {
        self.expect(SearchKind::IpAddress)?;
        // SAFETY: the tag says this member is the active one.
        Ok(unsafe { self.search_info.client_ip_address })
    }

    /// # Safety
    ///
    /// The hardware payload, if active, must point to `data_length` readable bytes.
    pub unsafe fn client_hardware_address(&self) -> Result<&[u8]> {
        self.expect(SearchKind::HardwareAddress)?;
        // SAFETY: the tag says this member is the active one.
        let data = unsafe { &self.search_info.client_hardware_address };
        Ok(unsafe { data.as_slice() })
    }

    /// # Safety
    ///
    /// The name payload, if active, must be null or a terminated wide string.
    pub unsafe fn client_name(&self) -> Result<String> {
        self.expect(SearchKind::Name)?;
        // SAFETY: the tag says this member is the active one.
        unsafe { read_wide_ptr(self.search_info.client_name) }
    }
}

impl fmt::Debug for DhcpSearchInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DhcpSearchInfo")
            .field("search_type", &self.search_type)
            .finish_non_exhaustive()
    }
}

/// A wire search together with the buffer its payload points into.
#[derive(Debug)]
pub struct EncodedSearch {
    raw: DhcpSearchInfo,
    kind: SearchKind,
    _bytes: Option<Box<[u8]>>,
    _wide: Option<WideString>,
}

impl EncodedSearch {
    pub fn raw(&self) -> &DhcpSearchInfo {
        &self.raw
    }

    pub fn kind(&self) -> SearchKind {
        self.kind
    }

    pub fn decode(&self) -> Result<SearchKey> {
        // SAFETY: the active payload points into a buffer owned by `self`.
        unsafe { SearchKey::decode(&self.raw) }
    }
}
