//! Fabric Controller
//!
//! Control plane of a leaf-spine fabric:
//! - Switch: one Agent per switch with everything its agent renders, plus
//!   the agent's service account and kubeconfig
//! - VPC: DHCPSubnets for the DHCP server and the VPC catalog
//! - Connection: default labels and the connection catalog
//! - SwitchProfile: the built-in hardware profiles
//! - Gateway: VPCInfo objects for VPCs and Externals

mod backoff;
mod config;
mod controller;
mod error;
mod leader;
mod metrics;
mod probes;
mod profiles;
mod reconcile_helpers;
mod reconciler;
#[cfg(test)]
mod test_utils;
mod watcher;

use crate::config::FabricConfig;
use crate::error::ControllerError;
use controller::Controller;
use std::env;
use std::net::SocketAddr;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_CONFIG_PATH: &str = "/etc/fabric/config.yaml";
const DEFAULT_PROBE_ADDR: &str = "0.0.0.0:8081";

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Another crate may have installed a provider already
    let _ = rustls::crypto::ring::default_provider().install_default();

    info!("Starting Fabric Controller");

    let namespace = env::var("WATCH_NAMESPACE").unwrap_or_else(|_| crds::DEFAULT_NAMESPACE.to_string());
    let config_path = env::var("FABRIC_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let probe_addr: SocketAddr = env::var("PROBE_ADDR")
        .unwrap_or_else(|_| DEFAULT_PROBE_ADDR.to_string())
        .parse()
        .map_err(|e| ControllerError::InvalidConfig(format!("PROBE_ADDR: {e}")))?;
    let identity = env::var("POD_NAME")
        .or_else(|_| env::var("HOSTNAME"))
        .map_err(|_| {
            ControllerError::InvalidConfig("POD_NAME or HOSTNAME must be set".to_string())
        })?;

    let config = FabricConfig::load(&config_path)?;

    info!("Configuration:");
    info!("  Namespace: {}", namespace);
    info!("  Fabric config: {}", config_path);
    info!("  Fabric mode: {:?}", config.fabric_mode);
    info!("  Probe address: {}", probe_addr);
    info!("  Identity: {}", identity);

    let controller = Controller::new(config, namespace, probe_addr, identity).await?;
    controller.run().await?;

    Ok(())
}
