//! # dhcpclients
//!
//! Client-side management of a DHCP server's per-subnet client registry,
//! driven through the server's C management API.
//!
//! ## Features
//!
//! - Paged, resumable enumeration of a subnet's clients
//! - Lookup and delete by IP address, name, or MAC address within a subnet
//! - Create and modify
//! - Both server record layouts (legacy and current), decoded into one record type
//! - Every server-allocated buffer released exactly once, on every path
//! - An in-process simulated server for tests and dry runs
//!
//! ## Quick Start
//!
//! ```no_run
//! use dhcpclients::{ClientManager, Config, RemoteServer};
//!
//! fn main() -> dhcpclients::Result<()> {
//!     let config = Config::load_or_create("config.json")?;
//!     let manager = ClientManager::from_config(RemoteServer::connect(&config.server)?, &config);
//!
//!     for client in manager.list("192.168.42.0")? {
//!         let client = client?;
//!         println!("{} {} {}", client.address, client.hardware_address, client.name);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`ClientManager`] - The public verbs: list, get, create, modify, delete
//! - [`pages`] - One page per server call, threaded by a [`Cursor`] value
//! - [`buffer`] - Ownership of server-allocated result buffers
//! - [`search`] - Lookup keys and the tagged search union
//! - [`wire`] - The native record layouts and their mapping to [`Client`]
//! - [`DhcpApi`] - The server entry points, implemented by [`RemoteServer`]
//!   and [`SimulatedServer`]

pub mod api;
pub mod buffer;
pub mod config;
pub mod error;
pub mod manager;
pub mod pages;
pub mod record;
pub mod remote;
pub mod search;
pub mod simulated;
pub mod text;
pub mod wire;

pub use api::{DhcpApi, Operation};
pub use config::Config;
pub use error::{Error, Result};
pub use manager::ClientManager;
pub use pages::{Cursor, CursorState, Page, SubnetWalk};
pub use record::{ApiVersion, Client, ClientType, FileTime, LeaseExpiry, MacAddress};
pub use remote::RemoteServer;
pub use search::SearchKey;
pub use simulated::SimulatedServer;
