use std::net::Ipv4Addr;
use std::sync::Arc;

use dhcpclients::api::{ERROR_DHCP_JET_ERROR, ERROR_INVALID_PARAMETER, Operation};
use dhcpclients::pages::{Cursor, CursorState};
use dhcpclients::search::SearchKind;
use dhcpclients::simulated::{Failure, SimulatedServer};
use dhcpclients::{ApiVersion, Client, ClientManager, Error, MacAddress, Result, SearchKey};

const SUBNET: Ipv4Addr = Ipv4Addr::new(192, 168, 42, 0);
const MASK: Ipv4Addr = Ipv4Addr::new(255, 255, 255, 0);

fn client(last: u8) -> Client {
    let mut client = Client::new(
        Ipv4Addr::new(192, 168, 42, last),
        MASK,
        MacAddress([0x00, 0x0c, 0x29, 0x10, 0x20, last]),
    );
    client.name = format!("host{}", last);
    client
}

fn populated(count: u8) -> SimulatedServer {
    let server = SimulatedServer::new().with_subnet(SUBNET, MASK);
    for last in 1..=count {
        server.insert_client(client(last));
    }
    server
}

fn drain(manager: &ClientManager<SimulatedServer>, page_size: u32) -> Vec<Client> {
    let mut cursor = Cursor::new(page_size);
    let mut clients = Vec::new();
    while !cursor.is_exhausted() {
        let page = manager.enumerate_page(SUBNET, cursor).unwrap();
        clients.extend(page.clients);
        cursor = page.cursor;
    }
    clients
}

#[test]
fn list_small_subnet_in_one_page() {
    let manager = ClientManager::new(populated(3));

    let page = manager.enumerate_page(SUBNET, Cursor::new(1024)).unwrap();
    assert_eq!(page.clients.len(), 3);
    assert_eq!(page.read, 3);
    assert_eq!(page.total, 3);

    let listed: Vec<Client> = manager
        .list("192.168.42.0")
        .unwrap()
        .collect::<Result<_>>()
        .unwrap();
    assert_eq!(listed.len(), 3);
}

#[test]
fn get_missing_ip_is_not_found() {
    let manager = ClientManager::new(populated(3));
    let result = manager.get_by_ip("192.168.42.42");
    assert!(matches!(result, Err(Error::NotFound(_))));
    assert_eq!(manager.api().stats().live, 0);
}

#[test]
fn create_twice_is_already_exists() {
    let manager = ClientManager::new(populated(0));
    manager.create(&client(42)).unwrap();

    let second = manager.create(&client(42));
    assert!(matches!(second, Err(Error::AlreadyExists(_))));
    assert_eq!(manager.api().clients().len(), 1);
}

#[test]
fn pagination_boundaries() {
    let count = 7u8;
    for version in [ApiVersion::Legacy, ApiVersion::Current] {
        let manager = ClientManager::new(populated(count)).with_version(version);
        for page_size in [1, count as u32, count as u32 + 1] {
            let addresses: Vec<u8> = drain(&manager, page_size)
                .iter()
                .map(|client| client.address.octets()[3])
                .collect();
            assert_eq!(addresses, (1..=count).collect::<Vec<_>>());
        }
        assert_eq!(manager.api().stats().live, 0);
    }
}

#[test]
fn exhausted_cursor_is_a_no_op() {
    let manager = ClientManager::new(populated(2));
    let mut cursor = Cursor::default();
    while !cursor.is_exhausted() {
        cursor = manager.enumerate_page(SUBNET, cursor).unwrap().cursor;
    }
    let calls = manager.api().calls(Operation::EnumerateClients);

    for _ in 0..3 {
        let page = manager.enumerate_page(SUBNET, cursor).unwrap();
        assert!(page.clients.is_empty());
        assert_eq!(page.cursor, cursor);
        assert_eq!(page.cursor.state(), CursorState::Exhausted);
    }
    assert_eq!(manager.api().calls(Operation::EnumerateClients), calls);
}

#[test]
fn enumeration_failures_release_each_buffer_once() {
    let failures = [
        (Failure::NullOut(ERROR_INVALID_PARAMETER), 0),
        (Failure::Partial(ERROR_INVALID_PARAMETER), 1),
        (Failure::Populated(ERROR_INVALID_PARAMETER), 1),
    ];

    for version in [ApiVersion::Legacy, ApiVersion::Current] {
        for (failure, frees) in failures {
            let manager = ClientManager::new(populated(4)).with_version(version);
            manager.api().fail_next(Operation::EnumerateClients, failure);

            let result = manager.enumerate_page(SUBNET, Cursor::default());
            assert!(matches!(
                result,
                Err(Error::RemoteFailure {
                    status: ERROR_INVALID_PARAMETER,
                    ..
                })
            ));

            let stats = manager.api().stats();
            assert_eq!(stats.frees, frees, "{:?} with {}", failure, version);
            assert_eq!(stats.allocations, frees);
            assert_eq!(stats.invalid_frees, 0);
            assert_eq!(stats.live, 0);
        }
    }
}

#[test]
fn lookup_and_delete_failures_release_buffers() {
    let manager = ClientManager::new(populated(1));
    let key = SearchKey::IpAddress(Ipv4Addr::new(192, 168, 42, 1));

    manager
        .api()
        .fail_next(Operation::GetClient, Failure::Partial(ERROR_DHCP_JET_ERROR));
    assert!(matches!(manager.get(&key), Err(Error::NotFound(_))));

    manager
        .api()
        .fail_next(Operation::DeleteClient, Failure::NullOut(ERROR_INVALID_PARAMETER));
    assert!(matches!(
        manager.delete(&key),
        Err(Error::RemoteFailure { .. })
    ));
    assert_eq!(manager.api().clients().len(), 1);

    let stats = manager.api().stats();
    assert_eq!(stats.allocations, 1);
    assert_eq!(stats.frees, 1);
    assert_eq!(stats.live, 0);
}

#[test]
fn search_payloads_are_exclusive() {
    let keys = [
        SearchKey::IpAddress(Ipv4Addr::new(192, 168, 42, 7)),
        SearchKey::HardwareAddress {
            subnet: SUBNET,
            mac: MacAddress([1, 2, 3, 4, 5, 6]),
        },
        SearchKey::Name("host7".to_string()),
    ];

    for key in keys {
        let encoded = key.encode().unwrap();
        let raw = encoded.raw();
        let readable = [
            raw.client_ip_address().is_ok(),
            unsafe { raw.client_hardware_address() }.is_ok(),
            unsafe { raw.client_name() }.is_ok(),
        ];
        assert_eq!(readable.iter().filter(|ok| **ok).count(), 1, "{}", key);

        if key.kind() != SearchKind::IpAddress {
            assert!(matches!(
                raw.client_ip_address(),
                Err(Error::SearchFieldMismatch {
                    requested: SearchKind::IpAddress,
                    ..
                })
            ));
        }
    }
}

#[test]
fn registry_changes_between_pages() {
    let manager = ClientManager::new(populated(6));
    let first = manager.enumerate_page(SUBNET, Cursor::new(2)).unwrap();

    manager.api().remove_client(Ipv4Addr::new(192, 168, 42, 3));
    manager.api().insert_client(client(200));

    let mut cursor = first.cursor;
    let mut rest = Vec::new();
    let mut totals = Vec::new();
    while !cursor.is_exhausted() {
        let page = manager.enumerate_page(SUBNET, cursor).unwrap();
        totals.push(page.total);
        rest.extend(page.clients.iter().map(|c| c.address.octets()[3]));
        cursor = page.cursor;
    }

    assert_eq!(first.total, 6);
    assert_eq!(totals[0], 6);
    assert_eq!(rest, vec![4, 5, 6, 200]);
}

#[test]
fn legacy_and_current_agree_on_common_fields() {
    let server = populated(3);
    let legacy: Vec<Client> = ClientManager::new(&server)
        .list_as("192.168.42.0", ApiVersion::Legacy)
        .unwrap()
        .collect::<Result<_>>()
        .unwrap();
    let current: Vec<Client> = ClientManager::new(&server)
        .list_as("192.168.42.0", ApiVersion::Current)
        .unwrap()
        .collect::<Result<_>>()
        .unwrap();

    assert_eq!(legacy.len(), current.len());
    for (old, new) in legacy.iter().zip(&current) {
        assert_eq!(old.address, new.address);
        assert_eq!(old.hardware_address, new.hardware_address);
        assert_eq!(old.name, new.name);
        assert_eq!(old.extended, None);
        assert!(new.extended.is_some());
    }
}

#[tokio::test]
async fn concurrent_walks_per_subnet() {
    let server = SimulatedServer::new();
    let subnets: Vec<Ipv4Addr> = (1..=4).map(|third| Ipv4Addr::new(10, 0, third, 0)).collect();
    for (index, subnet) in subnets.iter().enumerate() {
        server.add_subnet(*subnet, MASK);
        let [a, b, c, _] = subnet.octets();
        for last in 1..=(10 * (index as u8 + 1)) {
            server.insert_client(Client::new(
                Ipv4Addr::new(a, b, c, last),
                MASK,
                MacAddress([0x02, 0, c, 0, 0, last]),
            ));
        }
    }
    let manager = Arc::new(ClientManager::new(server).with_page_size(3));

    let workers: Vec<_> = subnets
        .iter()
        .map(|subnet| {
            let manager = Arc::clone(&manager);
            let subnet = subnet.to_string();
            tokio::task::spawn_blocking(move || {
                manager
                    .list(&subnet)
                    .and_then(|walk| walk.collect::<Result<Vec<Client>>>())
            })
        })
        .collect();

    for (index, worker) in workers.into_iter().enumerate() {
        let clients = worker.await.unwrap().unwrap();
        assert_eq!(clients.len(), 10 * (index + 1));
        assert!(clients.iter().all(|c| c.in_subnet(subnets[index])));
    }
    assert_eq!(manager.api().stats().live, 0);
}
