//! Connection CRD
//!
//! A connection is a tagged variant: exactly one of its fields is set. Each
//! variant carries one or more links whose endpoints name "<device>/<port>".
//! The variant is exposed to reconcilers as `ConnectionVariant`, borrowed from
//! the spec.

use crate::labels::{server_label, switch_label, LABEL_CONNECTION_TYPE, LABEL_VALUE_TRUE};
use crate::validation::{parse_cidr, parse_ip_or_cidr, ValidationError};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[kube(
    group = "wiring.fabric.microscaler.io",
    version = "v1alpha1",
    kind = "Connection",
    namespaced,
    status = "ConnectionStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionSpec {
    /// Single server port to a single switch port
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unbundled: Option<ConnUnbundled>,

    /// Port channel from a server to a single switch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bundled: Option<ConnBundled>,

    /// Management link of a control node
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub management: Option<ConnMgmt>,

    /// Port channel from a server to an MCLAG switch pair
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mclag: Option<ConnMCLAG>,

    /// Peer and session links of an MCLAG switch pair
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mclag_domain: Option<ConnMCLAGDomain>,

    /// Port channel from a server to an ESLAG switch group
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eslag: Option<ConnESLAG>,

    /// Leaf to spine links
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fabric: Option<ConnFabric>,

    /// Ports of a switch cabled to each other for the loopback workaround
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vpc_loopback: Option<ConnVPCLoopback>,

    /// BGP peering with an external system
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external: Option<ConnExternal>,

    /// Statically routed external link
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub static_external: Option<ConnStaticExternal>,
}

/// A "<device>/<port>" endpoint
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BasePortName {
    pub port: String,
}

impl BasePortName {
    pub fn new(port: impl Into<String>) -> Self {
        Self { port: port.into() }
    }

    /// Device part of the endpoint ("leaf-1" in "leaf-1/E1/7")
    pub fn device_name(&self) -> &str {
        split_port(&self.port).0
    }

    /// Port part of the endpoint ("E1/7" in "leaf-1/E1/7")
    pub fn local_port_name(&self) -> &str {
        split_port(&self.port).1
    }

    fn validate(&self) -> Result<(), ValidationError> {
        match self.port.split_once('/') {
            Some((device, port)) if !device.is_empty() && !port.is_empty() => Ok(()),
            _ => Err(ValidationError::Invalid(format!(
                "port {:?} is not of the form <device>/<port>",
                self.port
            ))),
        }
    }
}

fn split_port(port: &str) -> (&str, &str) {
    port.split_once('/').unwrap_or((port, ""))
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ServerToSwitchLink {
    pub server: BasePortName,
    pub switch: BasePortName,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SwitchToSwitchLink {
    pub switch1: BasePortName,
    pub switch2: BasePortName,
}

impl SwitchToSwitchLink {
    /// Sorted local port pair "A--B", identifies a loopback workaround link
    pub fn loopback_ref(&self) -> String {
        let mut ports = [self.switch1.local_port_name(), self.switch2.local_port_name()];
        ports.sort_unstable();
        format!("{}--{}", ports[0], ports[1])
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FabricLinkSwitch {
    /// "<device>/<port>"
    pub port: String,
    /// Point to point IP with prefix length
    pub ip: String,
}

impl FabricLinkSwitch {
    pub fn base(&self) -> BasePortName {
        BasePortName::new(self.port.clone())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FabricLink {
    pub spine: FabricLinkSwitch,
    pub leaf: FabricLinkSwitch,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConnUnbundled {
    pub link: ServerToSwitchLink,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mtu: Option<u16>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConnBundled {
    pub links: Vec<ServerToSwitchLink>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mtu: Option<u16>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConnMgmt {
    pub link: ServerToSwitchLink,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConnMCLAG {
    pub links: Vec<ServerToSwitchLink>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mtu: Option<u16>,
    /// LACP fallback
    #[serde(default)]
    pub fallback: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConnMCLAGDomain {
    pub peer_links: Vec<SwitchToSwitchLink>,
    pub session_links: Vec<SwitchToSwitchLink>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConnESLAG {
    pub links: Vec<ServerToSwitchLink>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mtu: Option<u16>,
    /// LACP fallback
    #[serde(default)]
    pub fallback: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConnFabric {
    pub links: Vec<FabricLink>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConnVPCLoopback {
    pub links: Vec<SwitchToSwitchLink>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConnExternal {
    pub link: ConnExternalLink,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConnExternalLink {
    pub switch: BasePortName,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConnStaticExternal {
    pub link: ConnStaticExternalLink,

    /// VPC the static routes are installed into, default VRF if unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub within_vpc: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConnStaticExternalLink {
    pub switch: ConnStaticExternalLinkSwitch,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConnStaticExternalLinkSwitch {
    /// "<device>/<port>"
    pub port: String,
    /// Switch side IP with prefix length
    pub ip: String,
    /// Next hop for the routed subnets
    pub next_hop: String,
    /// Subnets routed via the next hop
    #[serde(default)]
    pub subnets: Vec<String>,
    /// VLAN of the link, untagged if zero
    #[serde(default)]
    pub vlan: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {}

/// Borrowed view of the single variant set on a connection
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConnectionVariant<'a> {
    Unbundled(&'a ConnUnbundled),
    Bundled(&'a ConnBundled),
    Management(&'a ConnMgmt),
    MCLAG(&'a ConnMCLAG),
    MCLAGDomain(&'a ConnMCLAGDomain),
    ESLAG(&'a ConnESLAG),
    Fabric(&'a ConnFabric),
    VPCLoopback(&'a ConnVPCLoopback),
    External(&'a ConnExternal),
    StaticExternal(&'a ConnStaticExternal),
}

/// Connection type, used as the value of the connection-type label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ConnectionType {
    Unbundled,
    Bundled,
    Management,
    MCLAG,
    MCLAGDomain,
    ESLAG,
    Fabric,
    VPCLoopback,
    External,
    StaticExternal,
}

impl ConnectionType {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionType::Unbundled => "unbundled",
            ConnectionType::Bundled => "bundled",
            ConnectionType::Management => "management",
            ConnectionType::MCLAG => "mclag",
            ConnectionType::MCLAGDomain => "mclag-domain",
            ConnectionType::ESLAG => "eslag",
            ConnectionType::Fabric => "fabric",
            ConnectionType::VPCLoopback => "vpc-loopback",
            ConnectionType::External => "external",
            ConnectionType::StaticExternal => "static-external",
        }
    }
}

impl fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ConnectionVariant<'_> {
    pub fn connection_type(&self) -> ConnectionType {
        match self {
            ConnectionVariant::Unbundled(_) => ConnectionType::Unbundled,
            ConnectionVariant::Bundled(_) => ConnectionType::Bundled,
            ConnectionVariant::Management(_) => ConnectionType::Management,
            ConnectionVariant::MCLAG(_) => ConnectionType::MCLAG,
            ConnectionVariant::MCLAGDomain(_) => ConnectionType::MCLAGDomain,
            ConnectionVariant::ESLAG(_) => ConnectionType::ESLAG,
            ConnectionVariant::Fabric(_) => ConnectionType::Fabric,
            ConnectionVariant::VPCLoopback(_) => ConnectionType::VPCLoopback,
            ConnectionVariant::External(_) => ConnectionType::External,
            ConnectionVariant::StaticExternal(_) => ConnectionType::StaticExternal,
        }
    }
}

/// Devices and ports a connection touches
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Endpoints {
    pub switches: BTreeSet<String>,
    pub servers: BTreeSet<String>,
    /// Every "<device>/<port>" endpoint
    pub ports: BTreeSet<String>,
}

impl Endpoints {
    fn switch_port(&mut self, port: &BasePortName) -> Result<(), ValidationError> {
        port.validate()?;
        self.switches.insert(port.device_name().to_string());
        self.add_port(&port.port)
    }

    fn server_port(&mut self, port: &BasePortName) -> Result<(), ValidationError> {
        port.validate()?;
        self.servers.insert(port.device_name().to_string());
        self.add_port(&port.port)
    }

    fn add_port(&mut self, port: &str) -> Result<(), ValidationError> {
        if !self.ports.insert(port.to_string()) {
            return Err(ValidationError::Invalid(format!(
                "port {port} is used more than once"
            )));
        }
        Ok(())
    }

    fn server_links(&mut self, links: &[ServerToSwitchLink]) -> Result<(), ValidationError> {
        if links.is_empty() {
            return Err(ValidationError::Invalid("at least one link is required".to_string()));
        }
        for link in links {
            self.server_port(&link.server)?;
            self.switch_port(&link.switch)?;
        }
        Ok(())
    }

    fn switch_links(&mut self, links: &[SwitchToSwitchLink]) -> Result<(), ValidationError> {
        if links.is_empty() {
            return Err(ValidationError::Invalid("at least one link is required".to_string()));
        }
        for link in links {
            self.switch_port(&link.switch1)?;
            self.switch_port(&link.switch2)?;
        }
        Ok(())
    }
}

impl ConnectionSpec {
    /// The single variant set on this connection
    pub fn variant(&self) -> Result<ConnectionVariant<'_>, ValidationError> {
        let mut variants = Vec::with_capacity(1);
        if let Some(c) = &self.unbundled {
            variants.push(ConnectionVariant::Unbundled(c));
        }
        if let Some(c) = &self.bundled {
            variants.push(ConnectionVariant::Bundled(c));
        }
        if let Some(c) = &self.management {
            variants.push(ConnectionVariant::Management(c));
        }
        if let Some(c) = &self.mclag {
            variants.push(ConnectionVariant::MCLAG(c));
        }
        if let Some(c) = &self.mclag_domain {
            variants.push(ConnectionVariant::MCLAGDomain(c));
        }
        if let Some(c) = &self.eslag {
            variants.push(ConnectionVariant::ESLAG(c));
        }
        if let Some(c) = &self.fabric {
            variants.push(ConnectionVariant::Fabric(c));
        }
        if let Some(c) = &self.vpc_loopback {
            variants.push(ConnectionVariant::VPCLoopback(c));
        }
        if let Some(c) = &self.external {
            variants.push(ConnectionVariant::External(c));
        }
        if let Some(c) = &self.static_external {
            variants.push(ConnectionVariant::StaticExternal(c));
        }

        match variants.as_slice() {
            [single] => Ok(*single),
            [] => Err(ValidationError::Invalid(
                "connection has no type set".to_string(),
            )),
            _ => Err(ValidationError::Invalid(format!(
                "connection has {} types set, exactly one is allowed",
                variants.len()
            ))),
        }
    }

    pub fn connection_type(&self) -> Result<ConnectionType, ValidationError> {
        Ok(self.variant()?.connection_type())
    }

    /// Switches, servers and ports the connection touches
    ///
    /// Fails on malformed endpoints or a port used twice.
    pub fn endpoints(&self) -> Result<Endpoints, ValidationError> {
        let mut ep = Endpoints::default();
        match self.variant()? {
            ConnectionVariant::Unbundled(c) => ep.server_links(std::slice::from_ref(&c.link))?,
            ConnectionVariant::Bundled(c) => ep.server_links(&c.links)?,
            ConnectionVariant::Management(c) => ep.server_links(std::slice::from_ref(&c.link))?,
            ConnectionVariant::MCLAG(c) => ep.server_links(&c.links)?,
            ConnectionVariant::ESLAG(c) => ep.server_links(&c.links)?,
            ConnectionVariant::MCLAGDomain(c) => {
                ep.switch_links(&c.peer_links)?;
                ep.switch_links(&c.session_links)?;
            }
            ConnectionVariant::Fabric(c) => {
                if c.links.is_empty() {
                    return Err(ValidationError::Invalid(
                        "at least one link is required".to_string(),
                    ));
                }
                for link in &c.links {
                    ep.switch_port(&link.spine.base())?;
                    ep.switch_port(&link.leaf.base())?;
                }
            }
            ConnectionVariant::VPCLoopback(c) => ep.switch_links(&c.links)?,
            ConnectionVariant::External(c) => ep.switch_port(&c.link.switch)?,
            ConnectionVariant::StaticExternal(c) => {
                ep.switch_port(&BasePortName::new(c.link.switch.port.clone()))?;
            }
        }
        Ok(ep)
    }

    /// Structural validation of the variant and its links
    pub fn validate(&self) -> Result<Endpoints, ValidationError> {
        let ep = self.endpoints()?;
        match self.variant()? {
            ConnectionVariant::Unbundled(_)
            | ConnectionVariant::Bundled(_)
            | ConnectionVariant::Management(_) => {
                if ep.switches.len() != 1 || ep.servers.len() != 1 {
                    return Err(ValidationError::Invalid(
                        "connection must link exactly one server and one switch".to_string(),
                    ));
                }
            }
            ConnectionVariant::MCLAG(_) => {
                if ep.switches.len() != 2 || ep.servers.len() != 1 {
                    return Err(ValidationError::Invalid(
                        "MCLAG connection must link one server to exactly two switches".to_string(),
                    ));
                }
            }
            ConnectionVariant::ESLAG(_) => {
                if ep.switches.len() < 2 || ep.servers.len() != 1 {
                    return Err(ValidationError::Invalid(
                        "ESLAG connection must link one server to at least two switches"
                            .to_string(),
                    ));
                }
            }
            ConnectionVariant::MCLAGDomain(c) => {
                if ep.switches.len() != 2 {
                    return Err(ValidationError::Invalid(
                        "MCLAG domain must link exactly two switches".to_string(),
                    ));
                }
                for link in c.peer_links.iter().chain(&c.session_links) {
                    if link.switch1.device_name() == link.switch2.device_name() {
                        return Err(ValidationError::Invalid(
                            "MCLAG domain link must connect different switches".to_string(),
                        ));
                    }
                }
            }
            ConnectionVariant::Fabric(c) => {
                for link in &c.links {
                    parse_ip_or_cidr(&link.spine.ip)?;
                    parse_ip_or_cidr(&link.leaf.ip)?;
                }
            }
            ConnectionVariant::VPCLoopback(c) => {
                for link in &c.links {
                    if link.switch1.device_name() != link.switch2.device_name() {
                        return Err(ValidationError::Invalid(
                            "VPC loopback link must connect ports of the same switch".to_string(),
                        ));
                    }
                }
            }
            ConnectionVariant::External(_) => {}
            ConnectionVariant::StaticExternal(c) => {
                let sw = &c.link.switch;
                parse_ip_or_cidr(&sw.ip)?;
                parse_ip_or_cidr(&sw.next_hop)?;
                for subnet in &sw.subnets {
                    parse_cidr(subnet)?;
                }
                if sw.vlan > 4094 {
                    return Err(ValidationError::Invalid(format!(
                        "invalid VLAN {}",
                        sw.vlan
                    )));
                }
            }
        }
        Ok(ep)
    }

    /// Labels every connection carries: its type and one per endpoint device
    pub fn default_labels(&self) -> Result<BTreeMap<String, String>, ValidationError> {
        let ep = self.endpoints()?;
        let mut labels = BTreeMap::new();
        labels.insert(
            LABEL_CONNECTION_TYPE.to_string(),
            self.connection_type()?.as_str().to_string(),
        );
        for switch in &ep.switches {
            labels.insert(switch_label(switch), LABEL_VALUE_TRUE.to_string());
        }
        for server in &ep.servers {
            labels.insert(server_label(server), LABEL_VALUE_TRUE.to_string());
        }
        Ok(labels)
    }

    /// Other member of the MCLAG pair if this is an MCLAG domain touching `switch`
    pub fn mclag_peer(&self, switch: &str) -> Option<String> {
        let domain = self.mclag_domain.as_ref()?;
        domain.peer_links.iter().find_map(|link| {
            if link.switch1.device_name() == switch {
                Some(link.switch2.device_name().to_string())
            } else if link.switch2.device_name() == switch {
                Some(link.switch1.device_name().to_string())
            } else {
                None
            }
        })
    }

    /// Loopback workaround link refs on `switch`
    pub fn loopback_refs(&self, switch: &str) -> Vec<String> {
        let Some(lo) = &self.vpc_loopback else {
            return Vec::new();
        };
        lo.links
            .iter()
            .filter(|l| l.switch1.device_name() == switch)
            .map(SwitchToSwitchLink::loopback_ref)
            .collect()
    }
}
