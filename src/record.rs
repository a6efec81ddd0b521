//! The canonical, version-independent subnet client record.
//!
//! Both server layouts decode into [`Client`]; nothing outside
//! [`wire`](crate::wire) ever sees the raw structures.

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};

/// Hardware type for Ethernet.
pub const HTYPE_ETHERNET: u8 = 1;

/// Length of an Ethernet hardware address.
pub const MAC_LEN: usize = 6;

/// 100ns intervals between 1601-01-01 and 1970-01-01.
const FILETIME_UNIX_OFFSET: i64 = 116_444_736_000_000_000;

const FILETIME_TICKS_PER_SECOND: i64 = 10_000_000;

/// A 6-byte hardware address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct MacAddress(pub [u8; MAC_LEN]);

impl MacAddress {
    pub fn octets(&self) -> [u8; MAC_LEN] {
        self.0
    }
}

impl From<[u8; MAC_LEN]> for MacAddress {
    fn from(octets: [u8; MAC_LEN]) -> Self {
        Self(octets)
    }
}

impl FromStr for MacAddress {
    type Err = Error;

    /// Accepts `aa:bb:cc:dd:ee:ff`, `aa-bb-cc-dd-ee-ff` and `aabbccddeeff`.
    fn from_str(text: &str) -> Result<Self> {
        let normalized = text.trim().to_lowercase().replace('-', ":");
        let parts: Vec<&str> = if normalized.contains(':') {
            normalized.split(':').collect()
        } else if normalized.len() == MAC_LEN * 2 && normalized.is_ascii() {
            (0..MAC_LEN)
                .map(|index| &normalized[index * 2..index * 2 + 2])
                .collect()
        } else {
            Vec::new()
        };

        if parts.len() != MAC_LEN {
            return Err(Error::Encoding(format!("Invalid MAC address: {:?}", text)));
        }

        let mut octets = [0u8; MAC_LEN];
        for (octet, part) in octets.iter_mut().zip(parts) {
            if part.len() != 2 {
                return Err(Error::Encoding(format!("Invalid MAC address: {:?}", text)));
            }
            *octet = u8::from_str_radix(part, 16)
                .map_err(|_| Error::Encoding(format!("Invalid MAC address: {:?}", text)))?;
        }
        Ok(Self(octets))
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            a, b, c, d, e, g
        )
    }
}

impl Serialize for MacAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MacAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

/// A 64-bit file-time counter carried as two 32-bit halves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FileTime {
    pub low: u32,
    pub high: u32,
}

/// How a [`FileTime`] lease expiration should be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseExpiry {
    /// The zero time: no expiration recorded.
    NotSet,
    /// The lease never expires (reservations, BOOTP clients).
    Never,
    At(DateTime<Utc>),
}

impl FileTime {
    pub const ZERO: FileTime = FileTime { low: 0, high: 0 };

    /// The value the server uses for leases that never expire.
    pub const NEVER: FileTime = FileTime {
        low: u32::MAX,
        high: i32::MAX as u32,
    };

    pub fn from_ticks(ticks: u64) -> Self {
        Self {
            low: ticks as u32,
            high: (ticks >> 32) as u32,
        }
    }

    pub fn ticks(&self) -> u64 {
        (u64::from(self.high) << 32) | u64::from(self.low)
    }

    pub fn from_datetime(at: DateTime<Utc>) -> Self {
        let ticks = at.timestamp() * FILETIME_TICKS_PER_SECOND
            + i64::from(at.timestamp_subsec_nanos() / 100)
            + FILETIME_UNIX_OFFSET;
        Self::from_ticks(ticks.max(0) as u64)
    }

    pub fn expiry(&self) -> LeaseExpiry {
        let ticks = self.ticks();
        if ticks == 0 {
            return LeaseExpiry::NotSet;
        }
        if ticks >= i64::MAX as u64 {
            return LeaseExpiry::Never;
        }

        let since_epoch = ticks as i64 - FILETIME_UNIX_OFFSET;
        let seconds = since_epoch.div_euclid(FILETIME_TICKS_PER_SECOND);
        let nanos = (since_epoch.rem_euclid(FILETIME_TICKS_PER_SECOND) * 100) as u32;
        match DateTime::from_timestamp(seconds, nanos) {
            Some(at) => LeaseExpiry::At(at),
            None => LeaseExpiry::Never,
        }
    }
}

/// Which protocol a client was served by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientType {
    Unspecified,
    #[default]
    Dhcp,
    Bootp,
    Both,
    None,
    /// Any other value, including reservation-flagged combinations.
    Other(u8),
}

impl From<u8> for ClientType {
    fn from(value: u8) -> Self {
        match value {
            0x00 => Self::Unspecified,
            0x01 => Self::Dhcp,
            0x02 => Self::Bootp,
            0x03 => Self::Both,
            0x64 => Self::None,
            other => Self::Other(other),
        }
    }
}

impl From<ClientType> for u8 {
    fn from(value: ClientType) -> Self {
        match value {
            ClientType::Unspecified => 0x00,
            ClientType::Dhcp => 0x01,
            ClientType::Bootp => 0x02,
            ClientType::Both => 0x03,
            ClientType::None => 0x64,
            ClientType::Other(other) => other,
        }
    }
}

impl FromStr for ClientType {
    type Err = Error;

    fn from_str(text: &str) -> Result<Self> {
        match text.to_lowercase().as_str() {
            "unspecified" => Ok(Self::Unspecified),
            "dhcp" => Ok(Self::Dhcp),
            "bootp" => Ok(Self::Bootp),
            "both" => Ok(Self::Both),
            "none" => Ok(Self::None),
            other => Err(Error::Encoding(format!("Unknown client type: {:?}", other))),
        }
    }
}

impl fmt::Display for ClientType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unspecified => write!(f, "unspecified"),
            Self::Dhcp => write!(f, "dhcp"),
            Self::Bootp => write!(f, "bootp"),
            Self::Both => write!(f, "both"),
            Self::None => write!(f, "none"),
            Self::Other(value) => write!(f, "0x{:02x}", value),
        }
    }
}

/// The server record layout generation a record was read with or is sent as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiVersion {
    /// `DHCP_CLIENT_INFO_V4` records, contiguous enumeration arrays.
    Legacy,
    /// `DHCP_CLIENT_INFO_PB` records, pointer enumeration arrays.
    #[default]
    Current,
}

impl fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Legacy => write!(f, "legacy"),
            Self::Current => write!(f, "current"),
        }
    }
}

/// The server that owns a lease.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerHost {
    pub address: Ipv4Addr,
    pub netbios_name: String,
    pub host_name: String,
}

impl Default for OwnerHost {
    fn default() -> Self {
        Self {
            address: Ipv4Addr::UNSPECIFIED,
            netbios_name: String::new(),
            host_name: String::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressState {
    #[default]
    Offered,
    Active,
    Declined,
    Doom,
    Other(u8),
}

impl From<u8> for AddressState {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::Offered,
            1 => Self::Active,
            2 => Self::Declined,
            3 => Self::Doom,
            other => Self::Other(other),
        }
    }
}

impl From<AddressState> for u8 {
    fn from(value: AddressState) -> Self {
        match value {
            AddressState::Offered => 0,
            AddressState::Active => 1,
            AddressState::Declined => 2,
            AddressState::Doom => 3,
            AddressState::Other(other) => other,
        }
    }
}

/// Network access protection state of a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuarantineStatus {
    #[default]
    NoQuarantine,
    RestrictedAccess,
    DropPacket,
    Probation,
    Exempt,
    DefaultSetting,
    NoQuarantineInfo,
    Other(u32),
}

impl From<u32> for QuarantineStatus {
    fn from(value: u32) -> Self {
        match value {
            0 => Self::NoQuarantine,
            1 => Self::RestrictedAccess,
            2 => Self::DropPacket,
            3 => Self::Probation,
            4 => Self::Exempt,
            5 => Self::DefaultSetting,
            6 => Self::NoQuarantineInfo,
            other => Self::Other(other),
        }
    }
}

impl From<QuarantineStatus> for u32 {
    fn from(value: QuarantineStatus) -> Self {
        match value {
            QuarantineStatus::NoQuarantine => 0,
            QuarantineStatus::RestrictedAccess => 1,
            QuarantineStatus::DropPacket => 2,
            QuarantineStatus::Probation => 3,
            QuarantineStatus::Exempt => 4,
            QuarantineStatus::DefaultSetting => 5,
            QuarantineStatus::NoQuarantineInfo => 6,
            QuarantineStatus::Other(other) => other,
        }
    }
}

/// Fields only the current record layout carries.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Extended {
    pub address_state: AddressState,
    pub quarantine_status: QuarantineStatus,
    pub probation_ends: FileTime,
    pub quarantine_capable: bool,
    pub filter_status: u32,
    pub policy_name: String,
}

/// One subnet client as held by the remote registry.
///
/// The subnet a client belongs to is derived from `address` and
/// `subnet_mask` (see [`Client::subnet`]) and is never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Client {
    pub address: Ipv4Addr,
    pub subnet_mask: Ipv4Addr,
    pub hardware_address: MacAddress,
    pub hardware_type: u8,
    pub name: String,
    pub comment: String,
    pub lease_expires: FileTime,
    pub client_type: ClientType,
    pub owner: OwnerHost,
    /// Present only for records read with [`ApiVersion::Current`].
    pub extended: Option<Extended>,
    pub version: ApiVersion,
}

impl Client {
    /// Creates an Ethernet DHCP client with empty text fields.
    pub fn new(address: Ipv4Addr, subnet_mask: Ipv4Addr, hardware_address: MacAddress) -> Self {
        Self {
            address,
            subnet_mask,
            hardware_address,
            hardware_type: HTYPE_ETHERNET,
            name: String::new(),
            comment: String::new(),
            lease_expires: FileTime::ZERO,
            client_type: ClientType::Dhcp,
            owner: OwnerHost::default(),
            extended: None,
            version: ApiVersion::default(),
        }
    }

    /// The subnet address, `address & subnet_mask`.
    pub fn subnet(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.address) & u32::from(self.subnet_mask))
    }

    pub fn in_subnet(&self, subnet: Ipv4Addr) -> bool {
        self.subnet() == subnet
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_mac_parse_formats() {
        let expected = MacAddress([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);
        assert_eq!("aa:bb:cc:dd:ee:ff".parse::<MacAddress>().unwrap(), expected);
        assert_eq!("AA-BB-CC-DD-EE-FF".parse::<MacAddress>().unwrap(), expected);
        assert_eq!("aabbccddeeff".parse::<MacAddress>().unwrap(), expected);
        assert_eq!(expected.to_string(), "aa:bb:cc:dd:ee:ff");
    }

    #[test]
    fn test_mac_parse_rejects_malformed() {
        assert!("aa:bb:cc:dd:ee".parse::<MacAddress>().is_err());
        assert!("aa:bb:cc:dd:ee:ff:00".parse::<MacAddress>().is_err());
        assert!("aa:bb:cc:dd:ee:zz".parse::<MacAddress>().is_err());
        assert!("a:bb:cc:dd:ee:fff".parse::<MacAddress>().is_err());
        assert!("".parse::<MacAddress>().is_err());
    }

    #[test]
    fn test_mac_serializes_as_text() {
        let mac = MacAddress([0, 1, 2, 3, 4, 5]);
        let json = serde_json::to_string(&mac).unwrap();
        assert_eq!(json, "\"00:01:02:03:04:05\"");
        let back: MacAddress = serde_json::from_str(&json).unwrap();
        assert_eq!(back, mac);
    }

    #[test]
    fn test_subnet_is_derived() {
        let client = Client::new(
            Ipv4Addr::new(192, 168, 42, 42),
            Ipv4Addr::new(255, 255, 255, 0),
            MacAddress::default(),
        );
        assert_eq!(client.subnet(), Ipv4Addr::new(192, 168, 42, 0));
        assert!(client.in_subnet(Ipv4Addr::new(192, 168, 42, 0)));
        assert!(!client.in_subnet(Ipv4Addr::new(192, 168, 43, 0)));
    }

    #[test]
    fn test_filetime_halves() {
        let time = FileTime::from_ticks(0x0123_4567_89ab_cdef);
        assert_eq!(time.low, 0x89ab_cdef);
        assert_eq!(time.high, 0x0123_4567);
        assert_eq!(time.ticks(), 0x0123_4567_89ab_cdef);
    }

    #[test]
    fn test_filetime_expiry() {
        assert_eq!(FileTime::ZERO.expiry(), LeaseExpiry::NotSet);
        assert_eq!(FileTime::NEVER.expiry(), LeaseExpiry::Never);

        let at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap();
        assert_eq!(FileTime::from_datetime(at).expiry(), LeaseExpiry::At(at));
    }

    #[test]
    fn test_filetime_unix_epoch() {
        let epoch = Utc.with_ymd_and_hms(1970, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(
            FileTime::from_datetime(epoch).ticks(),
            FILETIME_UNIX_OFFSET as u64
        );
    }

    #[test]
    fn test_client_type_codes() {
        for value in 0..=u8::MAX {
            assert_eq!(u8::from(ClientType::from(value)), value);
        }
        assert_eq!(ClientType::from(0x64), ClientType::None);
        assert_eq!("both".parse::<ClientType>().unwrap(), ClientType::Both);
        assert!("bogus".parse::<ClientType>().is_err());
    }

    #[test]
    fn test_quarantine_codes() {
        for value in 0..16u32 {
            assert_eq!(u32::from(QuarantineStatus::from(value)), value);
        }
        for value in 0..=u8::MAX {
            assert_eq!(u8::from(AddressState::from(value)), value);
        }
    }
}
