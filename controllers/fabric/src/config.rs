//! Fabric configuration
//!
//! A single YAML document describing fabric-wide settings. Reconcilers copy
//! most of it verbatim into every `Agent`; the VLAN ranges also drive the
//! librarian.

use crate::error::ControllerError;
use crds::validation::parse_cidr;
use crds::wiring::validate_vlan_ranges;
use crds::{AgentSpecConfig, AlloyConfig, FabricMode, UserCreds, VLANRange};
use ipnet::Ipv4Net;
use librarian::LibrarianConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};

fn default_api_server() -> String {
    "https://kubernetes.default.svc".to_string()
}

fn default_fabric_mtu() -> u16 {
    9100
}

fn default_server_facing_mtu_offset() -> u16 {
    64
}

fn default_vpc_irb_vlans() -> Vec<VLANRange> {
    vec![VLANRange::new(3000, 3099)]
}

fn default_vpc_peering_vlans() -> Vec<VLANRange> {
    vec![VLANRange::new(3100, 3999)]
}

fn default_eslag_mac_base() -> String {
    "f2:00:00:00:00:00".to_string()
}

fn default_eslag_esi_prefix() -> String {
    "00:f2:00:00:".to_string()
}

fn default_max_paths_ebgp() -> u32 {
    64
}

/// Fabric-wide settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct FabricConfig {
    /// Control plane VIP agents talk to
    pub control_vip: String,

    /// API server URL written into agent kubeconfigs
    #[serde(default = "default_api_server")]
    pub api_server: String,

    pub fabric_mode: FabricMode,

    #[serde(default = "default_fabric_mtu")]
    pub fabric_mtu: u16,

    #[serde(default = "default_server_facing_mtu_offset")]
    pub server_facing_mtu_offset: u16,

    pub spine_asn: u32,

    pub leaf_asn: u32,

    /// Pool for per-VPC IRB VLANs
    #[serde(default = "default_vpc_irb_vlans")]
    pub vpc_irb_vlans: Vec<VLANRange>,

    /// Pool for loopback workaround VLANs
    #[serde(default = "default_vpc_peering_vlans")]
    pub vpc_peering_vlans: Vec<VLANRange>,

    /// Subnets no VPC or IPv4 namespace may intersect
    pub reserved_subnets: Vec<String>,

    pub loopback_workaround: bool,

    #[serde(default = "default_eslag_mac_base")]
    pub eslag_mac_base: String,

    #[serde(default = "default_eslag_esi_prefix")]
    pub eslag_esi_prefix: String,

    #[serde(default = "default_max_paths_ebgp")]
    pub default_max_paths_ebgp: u32,

    /// Local users created on every switch
    pub users: Vec<UserCreds>,

    pub alloy: Option<AlloyConfig>,

    pub gateway: GatewayConfig,
}

/// Gateway sync settings
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct GatewayConfig {
    /// Advertise a synthetic `0.0.0.0/0` subnet for every external instead of
    /// the prefixes its peerings permit
    pub external_default_route: bool,
}

impl Default for FabricConfig {
    fn default() -> Self {
        Self {
            control_vip: String::new(),
            api_server: default_api_server(),
            fabric_mode: FabricMode::default(),
            fabric_mtu: default_fabric_mtu(),
            server_facing_mtu_offset: default_server_facing_mtu_offset(),
            spine_asn: 0,
            leaf_asn: 0,
            vpc_irb_vlans: default_vpc_irb_vlans(),
            vpc_peering_vlans: default_vpc_peering_vlans(),
            reserved_subnets: Vec::new(),
            loopback_workaround: false,
            eslag_mac_base: default_eslag_mac_base(),
            eslag_esi_prefix: default_eslag_esi_prefix(),
            default_max_paths_ebgp: default_max_paths_ebgp(),
            users: Vec::new(),
            alloy: None,
            gateway: GatewayConfig::default(),
        }
    }
}

impl FabricConfig {
    /// Parse and validate a YAML document
    pub fn from_yaml(yaml: &str) -> Result<Self, ControllerError> {
        let config: FabricConfig = serde_yaml::from_str(yaml)
            .map_err(|e| ControllerError::InvalidConfig(format!("failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load the config file; a missing file means all defaults
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ControllerError> {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(yaml) => {
                info!("Loading fabric config from {}", path.display());
                Self::from_yaml(&yaml)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(
                    "Fabric config {} not found, using defaults",
                    path.display()
                );
                let config = Self::default();
                config.validate()?;
                Ok(config)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// IRB and peering VLAN pools must be valid and must not overlap each other
    pub fn validate(&self) -> Result<(), ControllerError> {
        let combined: Vec<VLANRange> = self
            .vpc_irb_vlans
            .iter()
            .chain(self.vpc_peering_vlans.iter())
            .copied()
            .collect();
        validate_vlan_ranges(&combined).map_err(|e| {
            ControllerError::InvalidConfig(format!("VPC IRB/peering VLANs: {e}"))
        })?;
        self.reserved_cidrs()?;
        if self.fabric_mtu <= self.server_facing_mtu_offset {
            return Err(ControllerError::InvalidConfig(format!(
                "fabric MTU {} must exceed server facing offset {}",
                self.fabric_mtu, self.server_facing_mtu_offset
            )));
        }
        Ok(())
    }

    pub fn reserved_cidrs(&self) -> Result<Vec<Ipv4Net>, ControllerError> {
        self.reserved_subnets
            .iter()
            .map(|s| {
                parse_cidr(s).map_err(|e| {
                    ControllerError::InvalidConfig(format!("reserved subnet {s}: {e}"))
                })
            })
            .collect()
    }

    /// Settings copied into every agent
    pub fn agent_config(&self) -> AgentSpecConfig {
        AgentSpecConfig {
            control_vip: self.control_vip.clone(),
            fabric_mode: self.fabric_mode,
            fabric_mtu: self.fabric_mtu,
            server_facing_mtu_offset: self.server_facing_mtu_offset,
            spine_asn: self.spine_asn,
            leaf_asn: self.leaf_asn,
            vpc_irb_vlans: self.vpc_irb_vlans.clone(),
            vpc_peering_vlans: self.vpc_peering_vlans.clone(),
            reserved_subnets: self.reserved_subnets.clone(),
            loopback_workaround: self.loopback_workaround,
            eslag_mac_base: self.eslag_mac_base.clone(),
            eslag_esi_prefix: self.eslag_esi_prefix.clone(),
            default_max_paths_ebgp: self.default_max_paths_ebgp,
            alloy: self.alloy.clone(),
        }
    }

    pub fn librarian_config(&self) -> LibrarianConfig {
        LibrarianConfig {
            vpc_irb_vlans: self.vpc_irb_vlans.clone(),
            vpc_peering_vlans: self.vpc_peering_vlans.clone(),
        }
    }
}
