//! Fabric DHCP Server
//!
//! DHCPv4 server for VPC subnets behind relaying leaf switches. Subnets come
//! from `DHCPSubnet` objects and are selected by the relay's VRF (option 82
//! sub-option 151) and circuit ID (sub-option 1). Leases are stored in each
//! subnet's status so any replica can pick them up.

pub mod error;
pub mod ipam;
pub mod listener;
pub mod metrics;
pub mod relay;
pub mod reply;
pub mod server;
pub mod subnets;

#[cfg(test)]
pub(crate) mod test_utils;

pub use error::DhcpError;
pub use metrics::DhcpMetrics;
pub use server::DhcpServer;
pub use subnets::SubnetMap;
