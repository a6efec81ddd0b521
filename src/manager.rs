//! The public client management verbs.
//!
//! [`ClientManager`] owns a [`DhcpApi`] handle and composes the search
//! encoder, buffer guard, record codec and enumerator into one call per
//! verb. It holds no other state: every call allocates its own
//! out-parameters, so one manager can be shared by reference across
//! threads whenever its API handle allows it.

use std::net::Ipv4Addr;

use tracing::{debug, info};

use crate::api::{DhcpApi, LayoutCalls, Operation};
use crate::buffer::{check_status, with_remote_buffer};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::pages::{self, Cursor, DEFAULT_PAGE_SIZE, Page, SubnetWalk};
use crate::record::{ApiVersion, Client, MacAddress};
use crate::search::SearchKey;
use crate::text::parse_ipv4;
use crate::wire::{self, ClientLayout, DhcpClientInfoPb, DhcpClientInfoV4, EncodedClient};

/// Manages the clients of one DHCP server.
#[derive(Debug)]
pub struct ClientManager<A> {
    api: A,
    version: ApiVersion,
    page_size: u32,
}

impl<A: DhcpApi> ClientManager<A> {
    /// Creates a manager speaking the current record layout.
    pub fn new(api: A) -> Self {
        Self {
            api,
            version: ApiVersion::default(),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn from_config(api: A, config: &Config) -> Self {
        Self::new(api)
            .with_version(config.api_version)
            .with_page_size(config.page_size)
    }

    pub fn with_version(mut self, version: ApiVersion) -> Self {
        self.version = version;
        self
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn version(&self) -> ApiVersion {
        self.version
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    /// Walks every client in `subnet`, one page per server call.
    ///
    /// Nothing is fetched until the walk is first advanced, and each call
    /// starts over from the beginning.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Encoding`] if `subnet` is not a dotted-quad address.
    /// Server errors surface as items of the walk.
    pub fn list(&self, subnet: &str) -> Result<SubnetWalk<'_, A>> {
        self.list_as(subnet, self.version)
    }

    /// [`list`](Self::list) with an explicit record layout.
    pub fn list_as(&self, subnet: &str, version: ApiVersion) -> Result<SubnetWalk<'_, A>> {
        let subnet = parse_ipv4(subnet)?;
        debug!("Listing clients of {} ({} layout)", subnet, version);
        Ok(SubnetWalk::new(&self.api, version, subnet, self.page_size))
    }

    /// Fetches the single page after `cursor`.
    ///
    /// # Errors
    ///
    /// Returns the server's failure; `cursor` remains valid for a retry.
    pub fn enumerate_page(&self, subnet: Ipv4Addr, cursor: Cursor) -> Result<Page> {
        pages::enumerate_page_as(&self.api, self.version, subnet, cursor)
    }

    /// Looks up one client.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the server holds no matching client,
    /// or [`Error::RemoteFailure`] for any other server status.
    pub fn get(&self, key: &SearchKey) -> Result<Client> {
        let client = match self.version {
            ApiVersion::Legacy => self.get_as::<DhcpClientInfoV4>(key),
            ApiVersion::Current => self.get_as::<DhcpClientInfoPb>(key),
        }?;
        debug!("Found {} at {}", key, client.address);
        Ok(client)
    }

    /// Looks up a client by MAC address within `subnet`.
    pub fn get_by_mac(&self, subnet: &str, mac: &str) -> Result<Client> {
        self.get(&mac_key(subnet, mac)?)
    }

    pub fn get_by_ip(&self, ip: &str) -> Result<Client> {
        self.get(&SearchKey::IpAddress(parse_ipv4(ip)?))
    }

    pub fn get_by_name(&self, name: &str) -> Result<Client> {
        self.get(&SearchKey::Name(name.to_string()))
    }

    /// Adds a client to the server.
    ///
    /// Returns the record as it was sent. The lease expiration is always
    /// sent, and so returned, as the zero time.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyExists`] if the address is taken, or
    /// [`Error::RemoteFailure`] for any other server status.
    pub fn create(&self, client: &Client) -> Result<Client> {
        let encoded = wire::encode(client, self.version)?;
        // SAFETY: the record's pointers refer to buffers `encoded` owns.
        let status = unsafe {
            match &encoded {
                EncodedClient::Legacy(record) => {
                    DhcpClientInfoV4::create(&self.api, record.raw())
                }
                EncodedClient::Current(record) => {
                    DhcpClientInfoPb::create(&self.api, record.raw())
                }
            }
        };
        check_status(Operation::CreateClient, status, &SearchKey::IpAddress(client.address))?;

        info!(
            "Created client {} ({}) as {}",
            client.address, client.hardware_address, client.name
        );
        encoded.decode()
    }

    /// Replaces an existing client, matched by address.
    ///
    /// The server only has a modify verb for the legacy layout, so fields
    /// only the current layout carries are not sent and the returned record
    /// is tagged [`ApiVersion::Legacy`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the server holds no client at that
    /// address, or [`Error::RemoteFailure`] for any other server status.
    pub fn modify(&self, client: &Client) -> Result<Client> {
        let encoded = DhcpClientInfoV4::encode(client)?;
        // SAFETY: the record's pointers refer to buffers `encoded` owns.
        let status = unsafe { self.api.set_client_info_v4(encoded.raw()) };
        check_status(Operation::ModifyClient, status, &SearchKey::IpAddress(client.address))?;

        info!("Modified client {}", client.address);
        encoded.decode()
    }

    /// Removes one client.
    ///
    /// Deleting a client that does not exist is an error, not a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the server holds no matching client,
    /// or [`Error::RemoteFailure`] for any other server status.
    pub fn delete(&self, key: &SearchKey) -> Result<()> {
        let search = key.encode()?;
        // SAFETY: the payload points into a buffer `search` owns.
        let status = unsafe { self.api.delete_client_info(search.raw()) };
        check_status(Operation::DeleteClient, status, key)?;

        info!("Deleted client {}", key);
        Ok(())
    }

    pub fn delete_by_mac(&self, subnet: &str, mac: &str) -> Result<()> {
        self.delete(&mac_key(subnet, mac)?)
    }

    pub fn delete_by_ip(&self, ip: &str) -> Result<()> {
        self.delete(&SearchKey::IpAddress(parse_ipv4(ip)?))
    }

    pub fn delete_by_name(&self, name: &str) -> Result<()> {
        self.delete(&SearchKey::Name(name.to_string()))
    }

    fn get_as<L: LayoutCalls>(&self, key: &SearchKey) -> Result<Client> {
        let search = key.encode()?;
        // SAFETY: the out-pointer is only ever written by the call.
        let fetched = unsafe {
            with_remote_buffer(&self.api, |out| L::get(&self.api, search.raw(), out))
        };
        let (_, record) = fetched.into_outcome(Operation::GetClient, key)?;
        let record = record.ok_or_else(|| {
            Error::InvalidResponse(format!("Lookup of {} succeeded without a record", key))
        })?;

        // SAFETY: the server filled the record before reporting success.
        unsafe { record.decode() }
    }
}

fn mac_key(subnet: &str, mac: &str) -> Result<SearchKey> {
    Ok(SearchKey::HardwareAddress {
        subnet: parse_ipv4(subnet)?,
        mac: mac.parse::<MacAddress>()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ERROR_DHCP_INVALID_DHCP_CLIENT, ERROR_INVALID_PARAMETER};
    use crate::record::{ClientType, Extended, FileTime};
    use crate::simulated::{Failure, SimulatedServer};

    const SUBNET: Ipv4Addr = Ipv4Addr::new(192, 168, 42, 0);
    const MASK: Ipv4Addr = Ipv4Addr::new(255, 255, 255, 0);

    fn manager() -> ClientManager<SimulatedServer> {
        ClientManager::new(SimulatedServer::new().with_subnet(SUBNET, MASK))
    }

    fn client(last: u8) -> Client {
        let mut client = Client::new(
            Ipv4Addr::new(192, 168, 42, last),
            MASK,
            MacAddress([0x00, 0x15, 0x5d, 0x01, 0x02, last]),
        );
        client.name = format!("ws{}.corp", last);
        client
    }

    #[test]
    fn test_create_then_get_by_each_key() {
        let manager = manager();
        manager.create(&client(42)).unwrap();

        let by_ip = manager.get_by_ip("192.168.42.42").unwrap();
        let by_name = manager.get_by_name("ws42.corp").unwrap();
        let by_mac = manager
            .get_by_mac("192.168.42.0", "00-15-5d-01-02-2a")
            .unwrap();
        assert_eq!(by_ip, by_name);
        assert_eq!(by_ip, by_mac);
        assert_eq!(by_ip.version, ApiVersion::Current);
        assert_eq!(manager.api().stats().live, 0);
    }

    #[test]
    fn test_create_returns_zero_expiry() {
        let manager = manager();
        let mut record = client(9);
        record.lease_expires = FileTime::NEVER;
        let created = manager.create(&record).unwrap();
        assert_eq!(created.lease_expires, FileTime::ZERO);
        assert_eq!(
            manager.get_by_ip("192.168.42.9").unwrap().lease_expires,
            FileTime::ZERO
        );
    }

    #[test]
    fn test_legacy_get_has_no_extended_fields() {
        let manager = manager().with_version(ApiVersion::Legacy);
        let mut record = client(3);
        record.extended = Some(Extended::default());
        manager.api().insert_client(record);

        let found = manager.get_by_ip("192.168.42.3").unwrap();
        assert_eq!(found.version, ApiVersion::Legacy);
        assert_eq!(found.extended, None);
    }

    #[test]
    fn test_modify_existing() {
        let manager = manager();
        manager.create(&client(5)).unwrap();

        let mut changed = client(5);
        changed.comment = "reimaged".to_string();
        changed.client_type = ClientType::Both;
        let modified = manager.modify(&changed).unwrap();
        assert_eq!(modified.version, ApiVersion::Legacy);

        let found = manager.get_by_ip("192.168.42.5").unwrap();
        assert_eq!(found.comment, "reimaged");
        assert_eq!(found.client_type, ClientType::Both);
    }

    #[test]
    fn test_modify_missing_is_not_found() {
        let manager = manager();
        assert!(matches!(
            manager.modify(&client(6)),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_delete_is_not_idempotent() {
        let manager = manager();
        manager.create(&client(7)).unwrap();
        manager.delete_by_name("ws7.corp").unwrap();
        assert!(matches!(
            manager.delete_by_name("ws7.corp"),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_get_failure_modes_release_buffers() {
        let manager = manager();
        manager.create(&client(8)).unwrap();
        let failures = [
            Failure::NullOut(ERROR_INVALID_PARAMETER),
            Failure::Partial(ERROR_INVALID_PARAMETER),
            Failure::Populated(ERROR_DHCP_INVALID_DHCP_CLIENT),
        ];

        for failure in failures {
            manager.api().fail_next(Operation::GetClient, failure);
            assert!(manager.get_by_ip("192.168.42.8").is_err());
            let stats = manager.api().stats();
            assert_eq!(stats.live, 0);
            assert_eq!(stats.invalid_frees, 0);
        }
        assert_eq!(manager.api().stats().frees, 2);
    }

    #[test]
    fn test_error_carries_key_context() {
        let manager = manager();
        let error = manager.get_by_name("nobody").unwrap_err();
        assert_eq!(error.to_string(), "get client name \"nobody\": no such client");
        assert!(error.is_registry_mismatch());
    }

    #[test]
    fn test_bad_input_is_encoding_error() {
        let manager = manager();
        assert!(matches!(
            manager.get_by_ip("192.168.42"),
            Err(Error::Encoding(_))
        ));
        assert!(matches!(
            manager.get_by_mac("192.168.42.0", "not-a-mac"),
            Err(Error::Encoding(_))
        ));
        assert!(matches!(manager.list("nonsense"), Err(Error::Encoding(_))));
        assert_eq!(manager.api().calls(Operation::GetClient), 0);
    }

    #[test]
    fn test_from_config() {
        let config = Config {
            api_version: ApiVersion::Legacy,
            page_size: 7,
            ..Default::default()
        };
        let manager = ClientManager::from_config(SimulatedServer::new(), &config);
        assert_eq!(manager.version(), ApiVersion::Legacy);
        assert_eq!(manager.page_size(), 7);
    }

    #[test]
    fn test_list_restarts() {
        let manager = manager().with_page_size(2);
        for last in 1..=5 {
            manager.create(&client(last)).unwrap();
        }
        let first: Vec<Client> = manager
            .list("192.168.42.0")
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        let second: Vec<Client> = manager
            .list("192.168.42.0")
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(first.len(), 5);
        assert_eq!(first, second);
    }
}
