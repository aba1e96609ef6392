//! fabric-dhcpd
//!
//! Watches `DHCPSubnet` objects, answers relayed DHCP packets and sweeps
//! expired leases.

use anyhow::Context;
use clap::{Parser, Subcommand};
use crds::DHCPSubnet;
use dhcp_server::listener::{self, SERVER_PORT};
use dhcp_server::subnets::run_watch;
use dhcp_server::{DhcpMetrics, DhcpServer, SubnetMap};
use kube::{Api, Client};
use state_store::KubeStore;
use std::env;
use std::net::Ipv4Addr;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "fabric-dhcpd", about = "DHCP server for fabric VPC subnets")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start serving
    Start {
        /// Debug logging
        #[arg(short, long)]
        verbose: bool,

        /// Interface to listen on (all when unset)
        #[arg(short, long, env = "DHCP_LISTEN_INTERFACE")]
        listen: Option<String>,

        /// Server identifier; derived from the route to each relay when unset
        #[arg(long, env = "DHCP_SERVER_IP")]
        server_ip: Option<Ipv4Addr>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let Command::Start {
        verbose,
        listen,
        server_ip,
    } = Cli::parse().command;

    let default_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Another crate may have installed a provider already
    let _ = rustls::crypto::ring::default_provider().install_default();

    let namespace = env::var("WATCH_NAMESPACE").unwrap_or_else(|_| "default".to_string());
    info!("Starting fabric DHCP server");
    info!("  Namespace: {}", namespace);
    info!("  Interface: {}", listen.as_deref().unwrap_or("all"));

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;
    let api: Api<DHCPSubnet> = Api::namespaced(client.clone(), &namespace);
    let store = Arc::new(KubeStore::<DHCPSubnet>::new(client, &namespace));

    let subnets = SubnetMap::new();
    let metrics = DhcpMetrics::new().context("Failed to register metrics")?;
    let server = DhcpServer::new(subnets.clone(), store, metrics).with_server_ip(server_ip);

    let socket = listener::bind_socket(listen.as_deref(), SERVER_PORT)
        .context("Failed to bind DHCP socket")?;
    info!("Listening on 0.0.0.0:{}", SERVER_PORT);

    let cleanup = server.clone();
    tokio::select! {
        _ = run_watch(api, subnets) => {
            error!("DHCPSubnet watch exited");
        }
        _ = cleanup.run_cleanup() => {
            error!("Lease cleanup exited");
        }
        result = listener::serve(server, socket) => {
            result.context("DHCP listener failed")?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
        }
    }

    Ok(())
}
