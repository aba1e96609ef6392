//! Switch CRD
//!
//! A physical (or virtual) switch of the fabric, its role, redundancy group and
//! addressing.

use crate::validation::{parse_ip_or_cidr, ValidationError};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[kube(
    group = "wiring.fabric.microscaler.io",
    version = "v1alpha1",
    kind = "Switch",
    namespaced,
    status = "SwitchStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct SwitchSpec {
    /// Role of the switch in the fabric
    pub role: SwitchRole,

    /// Human readable description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Name of the SwitchProfile describing the hardware
    #[serde(default)]
    pub profile: String,

    /// Physical location, used to derive the location UUID label
    #[serde(default)]
    pub location: Location,

    /// SwitchGroups the switch belongs to
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<String>,

    /// Redundancy group and protocol
    #[serde(default)]
    pub redundancy: SwitchRedundancy,

    /// VLANNamespaces the switch serves
    #[serde(default)]
    pub vlan_namespaces: Vec<String>,

    /// BGP ASN
    #[serde(default)]
    pub asn: u32,

    /// Protocol (loopback) IP, with prefix length
    #[serde(default)]
    pub protocol_ip: String,

    /// VTEP IP, with prefix length
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vtep_ip: Option<String>,

    /// Port group speed overrides, keyed by port group name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub port_group_speeds: BTreeMap<String, String>,

    /// Port speed overrides, keyed by port label
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub port_speeds: BTreeMap<String, String>,

    /// Port breakout modes, keyed by port label
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub port_breakouts: BTreeMap<String, String>,
}

/// Switch role
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum SwitchRole {
    Spine,
    #[default]
    ServerLeaf,
    BorderLeaf,
    MixedLeaf,
    VirtualEdge,
}

impl SwitchRole {
    pub fn is_spine(self) -> bool {
        self == SwitchRole::Spine
    }

    pub fn is_leaf(self) -> bool {
        matches!(
            self,
            SwitchRole::ServerLeaf | SwitchRole::BorderLeaf | SwitchRole::MixedLeaf
        )
    }
}

/// Topology of the fabric
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum FabricMode {
    #[default]
    SpineLeaf,
    CollapsedCore,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub aisle: String,
    #[serde(default)]
    pub row: String,
    #[serde(default)]
    pub rack: String,
    #[serde(default)]
    pub slot: String,
}

impl Location {
    pub fn is_empty(&self) -> bool {
        self.location.is_empty()
            && self.aisle.is_empty()
            && self.row.is_empty()
            && self.rack.is_empty()
            && self.slot.is_empty()
    }

    /// Stable UUID derived from the location fields
    pub fn uuid(&self) -> Uuid {
        let key = format!(
            "{}--{}--{}--{}--{}",
            self.location, self.aisle, self.row, self.rack, self.slot
        );
        Uuid::new_v5(&Uuid::NAMESPACE_OID, key.as_bytes())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SwitchRedundancy {
    /// Name of the redundancy group, shared by the members
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,

    /// Redundancy protocol
    #[serde(default, rename = "type")]
    pub redundancy_type: RedundancyType,
}

impl SwitchRedundancy {
    /// Group name if the switch is part of an MCLAG or ESLAG pair
    pub fn active_group(&self) -> Option<&str> {
        if self.redundancy_type == RedundancyType::None {
            return None;
        }
        self.group.as_deref().filter(|g| !g.is_empty())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RedundancyType {
    #[default]
    None,
    Mclag,
    Eslag,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SwitchStatus {}

impl SwitchSpec {
    /// Check role/addressing rules
    ///
    /// A VTEP IP is required on leaves of a spine-leaf fabric and forbidden on
    /// spines.
    pub fn validate(&self, name: &str, mode: FabricMode) -> Result<(), ValidationError> {
        if self.vlan_namespaces.is_empty() {
            return Err(ValidationError::Invalid(format!(
                "switch {name} has no VLAN namespaces"
            )));
        }
        if !self.protocol_ip.is_empty() {
            parse_ip_or_cidr(&self.protocol_ip)?;
        }

        let vtep = self.vtep_ip.as_deref().filter(|v| !v.is_empty());
        if self.role.is_spine() {
            if vtep.is_some() {
                return Err(ValidationError::Invalid(format!(
                    "spine {name} must not have a VTEP IP"
                )));
            }
        } else if self.role.is_leaf() && mode == FabricMode::SpineLeaf {
            match vtep {
                Some(v) => {
                    parse_ip_or_cidr(v)?;
                }
                None => {
                    return Err(ValidationError::Invalid(format!(
                        "leaf {name} requires a VTEP IP"
                    )));
                }
            }
        }

        if let Some(group) = &self.redundancy.group
            && !group.is_empty()
            && self.redundancy.redundancy_type == RedundancyType::None
        {
            return Err(ValidationError::Invalid(format!(
                "switch {name} has redundancy group {group} without a redundancy type"
            )));
        }
        if self.redundancy.redundancy_type != RedundancyType::None
            && self.redundancy.active_group().is_none()
        {
            return Err(ValidationError::Invalid(format!(
                "switch {name} has a redundancy type but no group"
            )));
        }

        Ok(())
    }
}
