//! Catalog CRD
//!
//! Persisted allocator state. The same record is used for the global catalogs
//! ("connections", "vpcs"), redundancy group catalogs ("rg--<group>") and
//! switch catalogs ("sw--<switch>"); each scope fills in only its own fields.
//! Agents receive the slice relevant to their switch as `AgentSpec.catalog`.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Name of the global connection ID catalog
pub const CATALOG_CONNECTIONS: &str = "connections";

/// Name of the global VPC VNI catalog
pub const CATALOG_VPCS: &str = "vpcs";

/// Name of the catalog shared by the members of a redundancy group
pub fn redundancy_group_catalog_name(group: &str) -> String {
    format!("rg--{group}")
}

/// Name of the catalog private to a switch
pub fn switch_catalog_name(switch: &str) -> String {
    format!("sw--{switch}")
}

#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[kube(
    group = "agent.fabric.microscaler.io",
    version = "v1alpha1",
    kind = "Catalog",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct CatalogSpec {
    /// Connection name -> ID, for ESLAG connections
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub connection_ids: BTreeMap<String, u32>,

    /// VPC name -> VNI
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub vpc_vnis: BTreeMap<String, u32>,

    /// VPC name -> subnet name -> VNI
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub vpc_subnet_vnis: BTreeMap<String, BTreeMap<String, u32>>,

    /// VPC name -> IRB VLAN
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub irb_vlans: BTreeMap<String, u16>,

    /// Connection name -> port channel ID
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub port_chan_ids: BTreeMap<String, u16>,

    /// Loopback workaround request -> link ref ("E1/1--E1/2")
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub loopback_workaround_links: BTreeMap<String, String>,

    /// Loopback workaround request -> VLAN
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub loopback_workaround_vlans: BTreeMap<String, u16>,

    /// External name -> ID
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub external_ids: BTreeMap<String, u16>,

    /// Subnet CIDR -> ID
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub subnet_ids: BTreeMap<String, u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_names() {
        assert_eq!(redundancy_group_catalog_name("mclag-1"), "rg--mclag-1");
        assert_eq!(switch_catalog_name("leaf-1"), "sw--leaf-1");
    }

    #[test]
    fn test_empty_fields_are_skipped() {
        let spec = CatalogSpec {
            vpc_vnis: BTreeMap::from([("vpc-1".to_string(), 100)]),
            ..Default::default()
        };
        let json = serde_json::to_value(&spec).unwrap();
        assert_eq!(json, serde_json::json!({"vpcVnis": {"vpc-1": 100}}));
    }
}
