use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::{ArgGroup, Args, Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use dhcpclients::{
    ApiVersion, Client, ClientManager, ClientType, Config, Error, LeaseExpiry, MacAddress,
    RemoteServer, Result, SearchKey,
};

#[derive(Parser)]
#[command(name = "dhcpclients")]
#[command(author, version, about = "Manage the clients of a DHCP server", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,

    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    ShowConfig,
    /// List every client of one or more subnets
    List {
        #[arg(required = true)]
        subnets: Vec<Ipv4Addr>,

        /// Use the legacy record layout
        #[arg(long)]
        legacy: bool,

        #[arg(long)]
        json: bool,
    },
    Get(KeyArgs),
    Delete(KeyArgs),
    Create(RecordArgs),
    /// Replace the client at an address
    Modify(RecordArgs),
}

#[derive(Args)]
#[command(group(ArgGroup::new("key").required(true).args(["ip", "name", "mac"])))]
struct KeyArgs {
    #[arg(long)]
    ip: Option<Ipv4Addr>,

    #[arg(long)]
    name: Option<String>,

    /// MAC address; lookups by MAC are scoped to --subnet
    #[arg(long, requires = "subnet")]
    mac: Option<MacAddress>,

    #[arg(long)]
    subnet: Option<Ipv4Addr>,
}

impl KeyArgs {
    fn key(self) -> Result<SearchKey> {
        match (self.ip, self.name, self.mac, self.subnet) {
            (Some(ip), _, _, _) => Ok(SearchKey::IpAddress(ip)),
            (_, Some(name), _, _) => Ok(SearchKey::Name(name)),
            (_, _, Some(mac), Some(subnet)) => Ok(SearchKey::HardwareAddress { subnet, mac }),
            _ => Err(Error::Encoding(
                "one of --ip, --name or --mac with --subnet is required".to_string(),
            )),
        }
    }
}

#[derive(Args)]
struct RecordArgs {
    #[arg(long)]
    ip: Ipv4Addr,

    #[arg(long, default_value = "255.255.255.0")]
    mask: Ipv4Addr,

    #[arg(long)]
    mac: MacAddress,

    #[arg(long, default_value = "")]
    name: String,

    #[arg(long, default_value = "")]
    comment: String,

    #[arg(long, default_value = "dhcp")]
    client_type: ClientType,
}

impl RecordArgs {
    fn client(self) -> Client {
        let mut client = Client::new(self.ip, self.mask, self.mac);
        client.name = self.name;
        client.comment = self.comment;
        client.client_type = self.client_type;
        client
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .init();

    let config = Config::load_or_create(&cli.config)?;
    let connect = || -> Result<Arc<ClientManager<RemoteServer>>> {
        info!("Managing clients on {} with config: {:?}", config.server, cli.config);
        let server = RemoteServer::connect(&config.server)?;
        Ok(Arc::new(ClientManager::from_config(server, &config)))
    };

    match cli.command {
        Commands::ShowConfig => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
        Commands::List {
            subnets,
            legacy,
            json,
        } => {
            let manager = connect()?;
            let version = if legacy {
                ApiVersion::Legacy
            } else {
                manager.version()
            };
            list(manager, subnets, version, json).await
        }
        Commands::Get(key) => {
            let key = key.key()?;
            let manager = connect()?;
            let client = tokio::task::spawn_blocking(move || manager.get(&key))
                .await
                .map_err(std::io::Error::other)??;
            println!("{}", serde_json::to_string_pretty(&client)?);
            Ok(())
        }
        Commands::Delete(key) => {
            let key = key.key()?;
            let manager = connect()?;
            let shown = key.to_string();
            tokio::task::spawn_blocking(move || manager.delete(&key))
                .await
                .map_err(std::io::Error::other)??;
            println!("Deleted {}.", shown);
            Ok(())
        }
        Commands::Create(record) => {
            let client = record.client();
            let manager = connect()?;
            let created = tokio::task::spawn_blocking(move || manager.create(&client))
                .await
                .map_err(std::io::Error::other)??;
            println!("Created {} ({}).", created.address, created.hardware_address);
            Ok(())
        }
        Commands::Modify(record) => {
            let client = record.client();
            let manager = connect()?;
            let modified = tokio::task::spawn_blocking(move || manager.modify(&client))
                .await
                .map_err(std::io::Error::other)??;
            println!("Modified {}.", modified.address);
            Ok(())
        }
    }
}

/// Walks each subnet on its own blocking worker. Ctrl-C stops every walk
/// before its next page.
async fn list(
    manager: Arc<ClientManager<RemoteServer>>,
    subnets: Vec<Ipv4Addr>,
    version: ApiVersion,
    json: bool,
) -> Result<()> {
    let cancel = Arc::new(AtomicBool::new(false));

    let workers: Vec<_> = subnets
        .into_iter()
        .map(|subnet| {
            let manager = Arc::clone(&manager);
            let cancel = Arc::clone(&cancel);
            let worker = tokio::task::spawn_blocking(move || {
                manager
                    .list_as(&subnet.to_string(), version)?
                    .cancel_on(cancel)
                    .collect::<Result<Vec<Client>>>()
            });
            (subnet, worker)
        })
        .collect();

    let interrupt = tokio::spawn({
        let cancel = Arc::clone(&cancel);
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Received interrupt, stopping after the current page...");
                cancel.store(true, Ordering::Relaxed);
            }
        }
    });

    let mut listed = Vec::new();
    let mut failure = None;
    for (subnet, worker) in workers {
        match worker.await.map_err(std::io::Error::other)? {
            Ok(clients) => {
                info!("Listed {} clients in {}", clients.len(), subnet);
                listed.push((subnet, clients));
            }
            Err(Error::Cancelled) => warn!("Listing of {} cancelled", subnet),
            Err(error) => {
                error!("Listing of {} failed: {}", subnet, error);
                failure = Some(error);
            }
        }
    }
    interrupt.abort();

    if json {
        let by_subnet: Vec<serde_json::Value> = listed
            .iter()
            .map(|(subnet, clients)| serde_json::json!({ "subnet": subnet, "clients": clients }))
            .collect();
        println!("{}", serde_json::to_string_pretty(&by_subnet)?);
    } else {
        for (subnet, clients) in &listed {
            print_table(*subnet, clients);
        }
    }

    match failure {
        Some(error) => Err(error),
        None => Ok(()),
    }
}

fn print_table(subnet: Ipv4Addr, clients: &[Client]) {
    println!("Subnet {}:", subnet);
    if clients.is_empty() {
        println!("No clients.");
        println!();
        return;
    }

    println!(
        "{:<16} {:<18} {:<24} {:<24} {:<8}",
        "IP Address", "MAC Address", "Name", "Expires At", "Type"
    );
    println!("{}", "-".repeat(94));

    for client in clients {
        let expires = match client.lease_expires.expiry() {
            LeaseExpiry::NotSet => "-".to_string(),
            LeaseExpiry::Never => "never".to_string(),
            LeaseExpiry::At(at) => at.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        };

        println!(
            "{:<16} {:<18} {:<24} {:<24} {:<8}",
            client.address.to_string(),
            client.hardware_address.to_string(),
            client.name,
            expires,
            client.client_type.to_string()
        );
    }
    println!();
}
