//! Binary entry point for eastsea-node.

use std::env;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tokio::signal;

use eastsea_node::autodiscovery::{AutoDiscoveryController, DiscoverySources};
use eastsea_node::config::{Config, NetworkType};
use eastsea_node::dht::{DhtOverlay, NodeId};
use eastsea_node::discovery::BroadcastDiscovery;
use eastsea_node::network::NodeHub;
use eastsea_node::{bootstrap, chain_consumer, dht, nat, tracker};

struct Cli {
    listen_port: Option<u16>,
    bootstrap_seeds: Vec<SocketAddr>,
    network: NetworkType,
    tracker_addr: Option<SocketAddr>,
    enable_mdns: bool,
    enable_upnp: bool,
}

impl Default for Cli {
    fn default() -> Self {
        Self {
            listen_port: None,
            bootstrap_seeds: Vec::new(),
            network: NetworkType::Mainnet,
            tracker_addr: None,
            enable_mdns: true,
            enable_upnp: true,
        }
    }
}

impl Cli {
    fn from_env_args() -> Self {
        let mut cli = Self::default();
        let mut args = env::args().skip(1);

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--listen-port" => {
                    if let Some(val) = args.next() {
                        match val.parse() {
                            Ok(port) => cli.listen_port = Some(port),
                            Err(_) => eprintln!("invalid --listen-port: {val}"),
                        }
                    }
                }
                "--bootstrap" => {
                    if let Some(val) = args.next() {
                        match val.parse() {
                            Ok(addr) => cli.bootstrap_seeds.push(addr),
                            Err(_) => eprintln!("invalid --bootstrap address: {val}"),
                        }
                    }
                }
                "--network" => {
                    if let Some(val) = args.next() {
                        cli.network = match val.as_str() {
                            "mainnet" => NetworkType::Mainnet,
                            "testnet" => NetworkType::Testnet,
                            "regtest" => NetworkType::Regtest,
                            other => {
                                eprintln!("unknown --network {other}, defaulting to mainnet");
                                NetworkType::Mainnet
                            }
                        };
                    }
                }
                "--tracker" => {
                    if let Some(val) = args.next() {
                        match val.parse() {
                            Ok(addr) => cli.tracker_addr = Some(addr),
                            Err(_) => eprintln!("invalid --tracker address: {val}"),
                        }
                    }
                }
                "--no-mdns" => cli.enable_mdns = false,
                "--no-upnp" => cli.enable_upnp = false,
                "--help" | "-h" => print_help_and_exit(),
                other => {
                    eprintln!("unknown argument: {other}");
                    print_help_and_exit();
                }
            }
        }

        cli
    }
}

fn print_help_and_exit() -> ! {
    eprintln!(
        "\
eastsea-node

USAGE:
  eastsea-node [FLAGS]

FLAGS:
  --listen-port <u16>        Port to listen on (default: network's default port)
  --bootstrap <host:port>    Seed peer to bootstrap from (repeatable)
  --network <mainnet|testnet|regtest>
  --tracker <host:port>      Centralized tracker fallback
  --no-mdns                  Disable mDNS-style service announcement
  --no-upnp                  Disable UPnP port mapping
  -h, --help                 Show this help and exit
"
    );
    std::process::exit(0);
}

fn build_config(cli: &Cli) -> Config {
    let mut config = Config::new(cli.network.clone(), None);
    if let Some(port) = cli.listen_port {
        config.p2p.listen_addr.set_port(port);
    }
    config.p2p.bootstrap_seeds = cli.bootstrap_seeds.clone();
    config.p2p.tracker_addr = cli.tracker_addr;
    config.p2p.enable_mdns = cli.enable_mdns;
    config.p2p.enable_upnp = cli.enable_upnp;
    config
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = env_logger::builder().try_init();

    let cli = Cli::from_env_args();
    let config = build_config(&cli);

    log::info!(
        "starting eastsea-node on {:?}, listen_addr={}",
        config.network,
        config.p2p.listen_addr
    );

    let local_id = NodeId::random();
    let hub = NodeHub::new(local_id);
    let bound_addr = hub.start(config.p2p.listen_addr).await?;
    log::info!("node id {local_id}, listening on {bound_addr}");

    let dht_overlay = Arc::new(DhtOverlay::new(local_id));
    dht::handlers::register_handlers(&hub, dht_overlay.clone());

    let bootstrap_server = Arc::new(bootstrap::server::BootstrapServer::with_default_capacity());
    bootstrap::register_handlers(&hub, bootstrap_server.clone(), bound_addr);

    let consumer = chain_consumer::ChainConsumer::new();
    consumer.register(&hub);

    {
        let hub = hub.clone();
        tokio::spawn(async move {
            if let Err(e) = hub.accept_loop().await {
                log::error!("accept loop stopped: {e}");
            }
        });
    }

    if !config.p2p.bootstrap_seeds.is_empty() {
        match bootstrap::bootstrap(&hub, bound_addr, &config.p2p.bootstrap_seeds).await {
            Ok(n) => log::info!("bootstrap succeeded against {n} seed(s)"),
            Err(e) => log::warn!("bootstrap failed: {e}"),
        }
    }

    let mdns_service = if config.p2p.enable_mdns {
        let service = eastsea_node::discovery::MdnsService::start(bound_addr.port(), bound_addr.ip().to_string()).await;
        if service.is_limited() {
            log::warn!("mdns: running in limited mode, no multicast traffic will be sent");
        }
        Some(service)
    } else {
        None
    };
    let _mdns_service = mdns_service;

    if config.p2p.enable_upnp {
        match nat::upnp::discover().await {
            Ok(locations) => log::info!("upnp: found {} candidate gateway location(s)", locations.len()),
            Err(e) => log::debug!("upnp: discovery failed: {e}"),
        }
    }

    let broadcast_discovery = if config.p2p.enable_broadcast_discovery {
        match BroadcastDiscovery::bind((Ipv4Addr::UNSPECIFIED, bound_addr.port()).into()).await {
            Ok(b) => Some(Arc::new(b)),
            Err(e) => {
                log::warn!("broadcast discovery: failed to bind: {e}");
                None
            }
        }
    } else {
        None
    };

    if let Some(tracker_addr) = config.p2p.tracker_addr {
        let registry = Arc::new(tracker::TrackerRegistry::with_defaults());
        tokio::spawn(async move {
            if let Err(e) = tracker::run(tracker_addr, registry).await {
                log::error!("tracker server stopped: {e}");
            }
        });
    }

    let controller = Arc::new(AutoDiscoveryController::with_max_peers(
        DiscoverySources {
            hub: hub.clone(),
            dht: dht_overlay.clone(),
            bootstrap_seeds: config.p2p.bootstrap_seeds.clone(),
            broadcast: broadcast_discovery,
            port_scan_base: None,
            port_scan_ports: Vec::new(),
        },
        config.p2p.max_peers,
    ));

    {
        let controller = controller.clone();
        tokio::spawn(async move {
            loop {
                controller.discovery_tick().await;
                tokio::time::sleep(eastsea_node::autodiscovery::DISCOVERY_INTERVAL).await;
            }
        });
    }
    {
        let controller = controller.clone();
        tokio::spawn(async move {
            loop {
                controller.connection_tick().await;
                tokio::time::sleep(eastsea_node::autodiscovery::CONNECTION_INTERVAL).await;
            }
        });
    }

    {
        let hub = hub.clone();
        let controller = controller.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(10));
            loop {
                interval.tick().await;
                log::info!(
                    "status: sessions={}, discovered={}, connecting={}, connected={}",
                    hub.session_count(),
                    controller.discovered_count(),
                    controller.connecting_count(),
                    controller.connected_count(),
                );
            }
        });
    }

    log::info!("node running. press ctrl+c to stop.");
    signal::ctrl_c().await?;
    log::info!("shutdown signal received, stopping.");
    hub.stop();
    Ok(())
}
