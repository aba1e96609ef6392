//! Agent CRD
//!
//! Everything the on-switch agent needs to render the configuration of one
//! switch. Written by the agent reconciler as the commit point of a reconcile.

use crate::agent::CatalogSpec;
use crate::vpc::{
    ExternalAttachmentSpec, ExternalPeeringSpec, ExternalSpec, IPv4NamespaceSpec,
    VPCAttachmentSpec, VPCPeeringSpec, VPCSpec,
};
use crate::wiring::{
    ConnectionSpec, FabricMode, SwitchProfileSpec, SwitchRole, SwitchSpec, VLANNamespaceSpec,
    VLANRange,
};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[kube(
    group = "agent.fabric.microscaler.io",
    version = "v1alpha1",
    kind = "Agent",
    namespaced,
    status = "AgentStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct AgentSpec {
    pub role: SwitchRole,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Fabric wide settings
    pub config: AgentSpecConfig,

    /// The switch itself
    pub switch: SwitchSpec,

    /// Dereferenced switch profile
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub switch_profile: Option<SwitchProfileSpec>,

    /// Switches on the other end of this switch's connections
    #[serde(default)]
    pub switches: BTreeMap<String, SwitchSpec>,

    /// Other members of the redundancy group
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub redundancy_group_peers: Vec<String>,

    /// MCLAG peer switch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mclag_peer: Option<String>,

    #[serde(default)]
    pub connections: BTreeMap<String, ConnectionSpec>,

    #[serde(default)]
    pub vpcs: BTreeMap<String, VPCSpec>,

    #[serde(default)]
    pub vpc_attachments: BTreeMap<String, VPCAttachmentSpec>,

    #[serde(default)]
    pub vpc_peerings: BTreeMap<String, VPCPeeringSpec>,

    #[serde(default)]
    pub ipv4_namespaces: BTreeMap<String, IPv4NamespaceSpec>,

    #[serde(default)]
    pub vlan_namespaces: BTreeMap<String, VLANNamespaceSpec>,

    #[serde(default)]
    pub externals: BTreeMap<String, ExternalSpec>,

    #[serde(default)]
    pub external_attachments: BTreeMap<String, ExternalAttachmentSpec>,

    #[serde(default)]
    pub external_peerings: BTreeMap<String, ExternalPeeringSpec>,

    /// "<vpc>/<subnet>" attached on this switch or its MCLAG peer
    #[serde(default)]
    pub configured_vpc_subnets: BTreeSet<String>,

    /// VPCs attached on this switch or its MCLAG peer
    #[serde(default)]
    pub attached_vpcs: BTreeSet<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub users: Vec<UserCreds>,

    /// Allocations relevant to this switch
    #[serde(default)]
    pub catalog: CatalogSpec,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AgentSpecConfig {
    #[serde(default)]
    pub control_vip: String,

    #[serde(default)]
    pub fabric_mode: FabricMode,

    #[serde(default)]
    pub fabric_mtu: u16,

    #[serde(default)]
    pub server_facing_mtu_offset: u16,

    #[serde(default)]
    pub spine_asn: u32,

    #[serde(default)]
    pub leaf_asn: u32,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub vpc_irb_vlans: Vec<VLANRange>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub vpc_peering_vlans: Vec<VLANRange>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reserved_subnets: Vec<String>,

    #[serde(default)]
    pub loopback_workaround: bool,

    #[serde(default)]
    pub eslag_mac_base: String,

    #[serde(default)]
    pub eslag_esi_prefix: String,

    #[serde(default)]
    pub default_max_paths_ebgp: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alloy: Option<AlloyConfig>,
}

/// Observability agent settings passed through to switches
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AlloyConfig {
    #[serde(default)]
    pub agent_scrape_interval_seconds: u32,

    #[serde(default)]
    pub unix_scrape_interval_seconds: u32,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub prometheus_targets: BTreeMap<String, AlloyTarget>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub loki_targets: BTreeMap<String, AlloyTarget>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AlloyTarget {
    pub url: String,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    #[serde(default)]
    pub use_control_proxy: bool,
}

/// Local user created on the switch
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserCreds {
    pub name: String,

    /// Password hash
    #[serde(default)]
    pub password: String,

    #[serde(default)]
    pub role: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ssh_keys: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AgentStatus {
    /// Version of the running agent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Last heartbeat from the agent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_heartbeat: Option<chrono::DateTime<chrono::Utc>>,

    /// Generation of the spec last applied by the agent
    #[serde(default)]
    pub last_applied_gen: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_applied_time: Option<chrono::DateTime<chrono::Utc>>,
}
