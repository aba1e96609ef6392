//! VPC CRD
//!
//! A tenant virtual network: named subnets, each with a CIDR, gateway, VLAN,
//! DHCP configuration and isolation flags.

use crate::validation::{
    check_name_len, check_reserved, contains_net, overlaps, parse_cidr, parse_ip,
    ValidationError, IPV4_NAMESPACE_NAME_MAX_LEN, VPC_NAME_MAX_LEN,
};
use crate::vpc::IPv4NamespaceSpec;
use crate::wiring::VLANNamespaceSpec;
use ipnet::Ipv4Net;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::net::Ipv4Addr;

/// Namespace used when a VPC does not name one
pub const DEFAULT_NAMESPACE: &str = "default";

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[kube(
    group = "vpc.fabric.microscaler.io",
    version = "v1alpha1",
    kind = "VPC",
    namespaced,
    status = "VPCStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct VPCSpec {
    /// Subnets keyed by subnet name
    pub subnets: BTreeMap<String, VPCSubnet>,

    /// IPv4Namespace the subnets are allocated from
    #[serde(default = "default_namespace")]
    pub ipv4_namespace: String,

    /// VLANNamespace the subnet VLANs are allocated from
    #[serde(default = "default_namespace")]
    pub vlan_namespace: String,

    /// Subnets are isolated unless they say otherwise
    #[serde(default)]
    pub default_isolated: bool,

    /// Subnets are restricted unless they say otherwise
    #[serde(default)]
    pub default_restricted: bool,

    /// Subnet groups allowed to talk to each other despite isolation
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub permit: Vec<Vec<String>>,

    /// How the VPC is realized on the switches
    #[serde(default)]
    pub mode: VPCMode,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
pub enum VPCMode {
    #[default]
    #[serde(rename = "l2vni")]
    L2VNI,
    #[serde(rename = "l3vni")]
    L3VNI,
    #[serde(rename = "l3flat")]
    L3Flat,
}

impl VPCMode {
    /// L3 modes route every host, DHCP hands out /32 leases
    pub fn is_l3(self) -> bool {
        matches!(self, VPCMode::L3VNI | VPCMode::L3Flat)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VPCSubnet {
    /// Subnet CIDR
    pub subnet: String,

    /// Gateway IP, first host of the subnet if unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway: Option<String>,

    /// VLAN of the subnet
    pub vlan: u16,

    /// DHCP server configuration
    #[serde(default)]
    pub dhcp: VPCDHCP,

    /// Overrides `defaultIsolated`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub isolated: Option<bool>,

    /// Overrides `defaultRestricted`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restricted: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VPCDHCP {
    #[serde(default)]
    pub enable: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<VPCDHCPRange>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<VPCDHCPOptions>,

    /// Static MAC to IP bindings
    #[serde(default, rename = "static", skip_serializing_if = "BTreeMap::is_empty")]
    pub static_allocations: BTreeMap<String, VPCDHCPStatic>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VPCDHCPRange {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VPCDHCPStatic {
    pub ip: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VPCDHCPOptions {
    /// PXE boot URL (tftp, http, https or ftp)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pxe_url: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dns_servers: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub time_servers: Vec<String>,

    /// Interface MTU handed to clients
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interface_mtu: Option<u16>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease_time_seconds: Option<u32>,

    /// Do not advertise a default route (L3 modes only)
    #[serde(default)]
    pub disable_default_route: bool,

    /// Additional classless static routes
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub advertised_routes: Vec<VPCDHCPRoute>,

    /// Option 114 default URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_url: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VPCDHCPRoute {
    pub destination: String,
    pub gateway: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VPCStatus {}

impl VPCSubnet {
    pub fn cidr(&self) -> Result<Ipv4Net, ValidationError> {
        Ok(parse_cidr(&self.subnet)?.trunc())
    }

    /// Configured gateway or the first host of the subnet
    pub fn gateway_ip(&self) -> Result<Ipv4Addr, ValidationError> {
        match self.gateway.as_deref().filter(|g| !g.is_empty()) {
            Some(gw) => parse_ip(gw),
            None => {
                let cidr = self.cidr()?;
                cidr.hosts().next().ok_or_else(|| {
                    ValidationError::Invalid(format!("subnet {} has no hosts", self.subnet))
                })
            }
        }
    }

    /// DHCP range if DHCP is enabled and both ends are set
    pub fn dhcp_range(&self) -> Option<(&str, &str)> {
        if !self.dhcp.enable {
            return None;
        }
        let range = self.dhcp.range.as_ref()?;
        match (range.start.as_deref(), range.end.as_deref()) {
            (Some(start), Some(end)) if !start.is_empty() && !end.is_empty() => Some((start, end)),
            _ => None,
        }
    }

    fn validate(&self, vpc: &str, name: &str) -> Result<(), ValidationError> {
        let cidr = self.cidr()?;
        let gateway = self.gateway_ip()?;
        if !cidr.contains(&gateway) {
            return Err(ValidationError::Invalid(format!(
                "gateway {gateway} of {vpc}/{name} is outside {cidr}"
            )));
        }
        if self.vlan == 0 || self.vlan > 4094 {
            return Err(ValidationError::Invalid(format!(
                "invalid VLAN {} in {vpc}/{name}",
                self.vlan
            )));
        }
        if let Some((start, end)) = self.dhcp_range() {
            let start = parse_ip(start)?;
            let end = parse_ip(end)?;
            if !cidr.contains(&start) || !cidr.contains(&end) || start > end {
                return Err(ValidationError::Invalid(format!(
                    "DHCP range {start}..{end} of {vpc}/{name} is not inside {cidr}"
                )));
            }
        }
        for (mac, st) in &self.dhcp.static_allocations {
            let ip = parse_ip(&st.ip)?;
            if !cidr.contains(&ip) || ip == gateway {
                return Err(ValidationError::Invalid(format!(
                    "static DHCP allocation {ip} for {mac} in {vpc}/{name} is not usable"
                )));
            }
        }
        Ok(())
    }
}

impl VPCSpec {
    /// Validate the VPC on its own
    ///
    /// Checks name length, subnet shape, VLAN uniqueness within the VPC,
    /// subnet overlap within the VPC, reserved subnets and permit references.
    pub fn validate(&self, name: &str, reserved: &[Ipv4Net]) -> Result<(), ValidationError> {
        check_name_len(name, VPC_NAME_MAX_LEN)?;
        check_name_len(&self.ipv4_namespace, IPV4_NAMESPACE_NAME_MAX_LEN)?;
        if self.subnets.is_empty() {
            return Err(ValidationError::Invalid(format!("VPC {name} has no subnets")));
        }

        let mut vlans: BTreeMap<u16, &str> = BTreeMap::new();
        let mut cidrs: Vec<(&str, Ipv4Net)> = Vec::new();
        for (subnet_name, subnet) in &self.subnets {
            subnet.validate(name, subnet_name)?;

            if let Some(first) = vlans.insert(subnet.vlan, subnet_name) {
                return Err(ValidationError::DuplicateVlan {
                    vlan: subnet.vlan,
                    first: format!("{name}/{first}"),
                    second: format!("{name}/{subnet_name}"),
                });
            }

            let cidr = subnet.cidr()?;
            check_reserved(&cidr, reserved)?;
            if let Some((other, _)) = cidrs.iter().find(|(_, c)| overlaps(c, &cidr)) {
                return Err(ValidationError::Overlap {
                    subnet: format!("{name}/{subnet_name}"),
                    other: format!("{name}/{other}"),
                });
            }
            cidrs.push((subnet_name, cidr));
        }

        for group in &self.permit {
            for subnet in group {
                if !self.subnets.contains_key(subnet) {
                    return Err(ValidationError::UnknownReference {
                        kind: "subnet",
                        name: format!("{name}/{subnet}"),
                    });
                }
            }
        }

        Ok(())
    }

    /// Validate the VPC against its namespaces and the other VPCs
    ///
    /// Every subnet must be inside the IPv4 namespace and must not overlap a
    /// subnet of another VPC in the same namespace; every VLAN must be in the
    /// VLAN namespace and unused by other VPCs sharing it. Subnets of other
    /// VPCs that do not parse are skipped.
    pub fn validate_namespaces<'a>(
        &self,
        name: &str,
        ipv4_namespace: &IPv4NamespaceSpec,
        vlan_namespace: &VLANNamespaceSpec,
        others: impl IntoIterator<Item = (&'a str, &'a VPCSpec)>,
    ) -> Result<(), ValidationError> {
        let ns_subnets = ipv4_namespace.cidrs()?;
        for (subnet_name, subnet) in &self.subnets {
            let cidr = subnet.cidr()?;
            if !ns_subnets.iter().any(|ns| contains_net(ns, &cidr)) {
                return Err(ValidationError::OutsideNamespace {
                    subnet: format!("{name}/{subnet_name}"),
                    namespace: self.ipv4_namespace.clone(),
                });
            }
            if !vlan_namespace.contains(subnet.vlan) {
                return Err(ValidationError::VlanOutsideNamespace {
                    vlan: subnet.vlan,
                    namespace: self.vlan_namespace.clone(),
                });
            }
        }

        for (other_name, other) in others {
            if other_name == name {
                continue;
            }
            for (subnet_name, subnet) in &self.subnets {
                let cidr = subnet.cidr()?;
                for (other_subnet_name, other_subnet) in &other.subnets {
                    // An unparsable subnet is reported on its own VPC
                    if other.ipv4_namespace == self.ipv4_namespace
                        && let Ok(other_cidr) = other_subnet.cidr()
                        && overlaps(&cidr, &other_cidr)
                    {
                        return Err(ValidationError::Overlap {
                            subnet: format!("{name}/{subnet_name}"),
                            other: format!("{other_name}/{other_subnet_name}"),
                        });
                    }
                    if other.vlan_namespace == self.vlan_namespace
                        && other_subnet.vlan == subnet.vlan
                    {
                        return Err(ValidationError::DuplicateVlan {
                            vlan: subnet.vlan,
                            first: format!("{other_name}/{other_subnet_name}"),
                            second: format!("{name}/{subnet_name}"),
                        });
                    }
                }
            }
        }

        Ok(())
    }

    pub fn subnet_names(&self) -> BTreeSet<String> {
        self.subnets.keys().cloned().collect()
    }
}
