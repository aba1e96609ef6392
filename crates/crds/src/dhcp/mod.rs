//! DHCPSubnet CRD
//!
//! Derived from a VPC subnet with DHCP enabled. The DHCP server keys subnets by
//! `(vrf, circuitId)` and records leases in `status.allocated`.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Lease time used when the VPC subnet does not set one
pub const DEFAULT_LEASE_TIME_SECONDS: u32 = 3600;

/// Interface MTU used when the VPC subnet does not set one
pub const DEFAULT_INTERFACE_MTU: u16 = 9036;

/// VRF name used for the default VRF
pub const DEFAULT_VRF: &str = "default";

#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[kube(
    group = "dhcp.fabric.microscaler.io",
    version = "v1alpha1",
    kind = "DHCPSubnet",
    namespaced,
    status = "DHCPSubnetStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct DHCPSubnetSpec {
    /// "<vpc>/<subnet>"
    pub subnet: String,

    /// Subnet CIDR
    pub cidr_block: String,

    /// Gateway IP
    pub gateway: String,

    /// First address handed out
    pub start_ip: String,

    /// Last address handed out
    pub end_ip: String,

    /// VRF the relay forwards from ("VrfV<vpc>" or "default")
    pub vrf: String,

    /// Relay circuit ID ("Vlan<vlan>")
    pub circuit_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pxe_url: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dns_servers: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub time_servers: Vec<String>,

    #[serde(default = "default_interface_mtu")]
    pub interface_mtu: u16,

    #[serde(default = "default_lease_time")]
    pub lease_time_seconds: u32,

    #[serde(default)]
    pub disable_default_route: bool,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub advertised_routes: Vec<DHCPRoute>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_url: Option<String>,

    /// Static MAC -> IP bindings
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub static_allocations: BTreeMap<String, DHCPStatic>,

    /// VPC is routed per host (L3VNI or L3Flat)
    #[serde(default)]
    pub l3_mode: bool,
}

fn default_interface_mtu() -> u16 {
    DEFAULT_INTERFACE_MTU
}

fn default_lease_time() -> u32 {
    DEFAULT_LEASE_TIME_SECONDS
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DHCPRoute {
    pub destination: String,
    pub gateway: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DHCPStatic {
    pub ip: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DHCPSubnetStatus {
    /// MAC -> lease
    #[serde(default)]
    pub allocated: BTreeMap<String, DHCPAllocated>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DHCPAllocated {
    pub ip: String,

    /// Lease expiry, unset for static bindings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<chrono::DateTime<chrono::Utc>>,

    #[serde(default)]
    pub hostname: String,

    /// Offered but not yet requested
    #[serde(default)]
    pub discover: bool,
}

impl DHCPAllocated {
    /// Static bindings never expire
    pub fn is_expired(&self, now: chrono::DateTime<chrono::Utc>) -> bool {
        self.expiry.is_some_and(|e| e < now)
    }
}

impl DHCPSubnetSpec {
    /// Map key used by the DHCP server, empty VRF meaning "default"
    pub fn key(&self) -> (String, String) {
        let vrf = if self.vrf.is_empty() {
            DEFAULT_VRF.to_string()
        } else {
            self.vrf.clone()
        };
        (vrf, self.circuit_id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    #[test]
    fn test_expiry() {
        let now = Utc::now();
        let lease = DHCPAllocated {
            ip: "10.0.0.100".to_string(),
            expiry: Some(now - Duration::seconds(1)),
            ..Default::default()
        };
        assert!(lease.is_expired(now));

        let fresh = DHCPAllocated {
            expiry: Some(now + Duration::seconds(60)),
            ..lease.clone()
        };
        assert!(!fresh.is_expired(now));

        let permanent = DHCPAllocated {
            expiry: None,
            ..lease
        };
        assert!(!permanent.is_expired(now));
    }

    #[test]
    fn test_key_defaults_vrf() {
        let spec = DHCPSubnetSpec {
            circuit_id: "Vlan1001".to_string(),
            ..Default::default()
        };
        assert_eq!(spec.key(), ("default".to_string(), "Vlan1001".to_string()));
    }

    #[test]
    fn test_spec_defaults() {
        let spec: DHCPSubnetSpec = serde_json::from_value(serde_json::json!({
            "subnet": "vpc-1/default",
            "cidrBlock": "10.0.1.0/24",
            "gateway": "10.0.1.1",
            "startIp": "10.0.1.10",
            "endIp": "10.0.1.99",
            "vrf": "VrfVvpc-1",
            "circuitId": "Vlan1001"
        }))
        .unwrap();
        assert_eq!(spec.interface_mtu, 9036);
        assert_eq!(spec.lease_time_seconds, 3600);
        assert!(!spec.l3_mode);
    }
}
