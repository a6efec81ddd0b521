use std::net::Ipv4Addr;

use proptest::prelude::*;

use dhcpclients::pages::{Cursor, enumerate_page_as};
use dhcpclients::record::{
    AddressState, ApiVersion, Client, ClientType, Extended, FileTime, MacAddress, OwnerHost,
    QuarantineStatus,
};
use dhcpclients::search::SearchKey;
use dhcpclients::simulated::SimulatedServer;
use dhcpclients::wire::{self, decode_hardware};

fn text() -> impl Strategy<Value = String> {
    "\\PC{0,24}"
}

fn address() -> impl Strategy<Value = Ipv4Addr> {
    any::<u32>().prop_map(Ipv4Addr::from)
}

fn extended() -> impl Strategy<Value = Extended> {
    (any::<u8>(), any::<u32>(), any::<u64>(), any::<bool>(), any::<u32>(), text()).prop_map(
        |(state, status, probation, capable, filter, policy)| Extended {
            address_state: AddressState::from(state),
            quarantine_status: QuarantineStatus::from(status),
            probation_ends: FileTime::from_ticks(probation),
            quarantine_capable: capable,
            filter_status: filter,
            policy_name: policy,
        },
    )
}

fn client() -> impl Strategy<Value = Client> {
    (
        (address(), address(), any::<[u8; 6]>(), any::<u8>()),
        (text(), text(), any::<u64>(), any::<u8>()),
        (address(), text(), text()),
        proptest::option::of(extended()),
    )
        .prop_map(
            |(
                (address, mask, mac, hardware_type),
                (name, comment, expires, client_type),
                (owner, netbios_name, host_name),
                extended,
            )| {
                let mut client = Client::new(address, mask, MacAddress(mac));
                client.hardware_type = hardware_type;
                client.name = name;
                client.comment = comment;
                client.lease_expires = FileTime::from_ticks(expires);
                client.client_type = ClientType::from(client_type);
                client.owner = OwnerHost {
                    address: owner,
                    netbios_name,
                    host_name,
                };
                client.extended = extended;
                client
            },
        )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    #[test]
    fn legacy_round_trip_keeps_common_fields(client in client()) {
        let decoded = wire::encode(&client, ApiVersion::Legacy)?.decode()?;

        let mut expected = client;
        expected.version = ApiVersion::Legacy;
        expected.extended = None;
        expected.lease_expires = FileTime::ZERO;
        prop_assert_eq!(decoded, expected);
    }

    #[test]
    fn current_round_trip_keeps_every_field(client in client()) {
        let decoded = wire::encode(&client, ApiVersion::Current)?.decode()?;

        let mut expected = client;
        expected.version = ApiVersion::Current;
        expected.extended = Some(expected.extended.unwrap_or_default());
        expected.lease_expires = FileTime::ZERO;
        prop_assert_eq!(decoded, expected);
    }

    #[test]
    fn decode_hardware_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..64)) {
        let (mac, _) = decode_hardware(&bytes);
        let shown = bytes.len().min(6);
        if bytes.len() != 11 {
            prop_assert_eq!(&mac.octets()[..shown], &bytes[..shown]);
        }
    }

    #[test]
    fn search_keys_decode_to_themselves(
        ip in address(),
        subnet in address(),
        mac in any::<[u8; 6]>(),
        name in text(),
    ) {
        let keys = [
            SearchKey::IpAddress(ip),
            SearchKey::HardwareAddress { subnet, mac: MacAddress(mac) },
            SearchKey::Name(name),
        ];
        for key in keys {
            prop_assert_eq!(key.encode()?.decode()?, key);
        }
    }

    #[test]
    fn pages_cover_registry_exactly_once(
        count in 0u8..40,
        page_size in 1u32..45,
        legacy in any::<bool>(),
    ) {
        let subnet = Ipv4Addr::new(172, 16, 5, 0);
        let mask = Ipv4Addr::new(255, 255, 255, 0);
        let server = SimulatedServer::new().with_subnet(subnet, mask);
        for last in 1..=count {
            server.insert_client(Client::new(
                Ipv4Addr::new(172, 16, 5, last),
                mask,
                MacAddress([0x52, 0x54, 0, 0, 0, last]),
            ));
        }
        let version = if legacy { ApiVersion::Legacy } else { ApiVersion::Current };

        let mut cursor = Cursor::new(page_size);
        let mut seen = Vec::new();
        let mut calls = 0;
        while !cursor.is_exhausted() {
            let page = enumerate_page_as(&server, version, subnet, cursor)?;
            prop_assert!(page.clients.len() <= page_size as usize);
            prop_assert_eq!(page.read as usize, page.clients.len());
            seen.extend(page.clients.iter().map(|client| client.address.octets()[3]));
            cursor = page.cursor;
            calls += 1;
            prop_assert!(calls <= count as usize + 2);
        }

        let expected: Vec<u8> = (1..=count).collect();
        prop_assert_eq!(seen, expected);
        prop_assert_eq!(server.stats().live, 0);
        prop_assert_eq!(server.stats().invalid_frees, 0);
    }
}
