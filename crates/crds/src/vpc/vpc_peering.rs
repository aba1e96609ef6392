//! VPCPeering CRD
//!
//! Each permit is a two-element map naming a VPC and its subnets on either
//! side. `remote` moves the peering to the switches of a switch group.

use crate::validation::ValidationError;
use crate::vpc::VPCSpec;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[kube(
    group = "vpc.fabric.microscaler.io",
    version = "v1alpha1",
    kind = "VPCPeering",
    namespaced,
    status = "VPCPeeringStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct VPCPeeringSpec {
    /// SwitchGroup the peering is realized on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote: Option<String>,

    /// Permits, each keyed by the two VPC names
    pub permit: Vec<BTreeMap<String, VPCPeer>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VPCPeer {
    /// Subnets of the VPC taking part, all if empty
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subnets: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VPCPeeringStatus {}

impl VPCPeeringSpec {
    /// The two VPCs being peered, in name order
    pub fn vpcs(&self) -> Result<(String, String), ValidationError> {
        let names: BTreeSet<&String> = self.permit.iter().flat_map(BTreeMap::keys).collect();
        let mut names = names.into_iter();
        match (names.next(), names.next(), names.next()) {
            (Some(a), Some(b), None) => Ok((a.clone(), b.clone())),
            _ => Err(ValidationError::Invalid(
                "VPC peering must reference exactly two VPCs".to_string(),
            )),
        }
    }

    pub fn remote(&self) -> Option<&str> {
        self.remote.as_deref().filter(|r| !r.is_empty())
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.permit.is_empty() {
            return Err(ValidationError::Invalid("VPC peering has no permits".to_string()));
        }
        for permit in &self.permit {
            if permit.len() != 2 {
                return Err(ValidationError::Invalid(
                    "each VPC peering permit must name two VPCs".to_string(),
                ));
            }
        }
        self.vpcs().map(|_| ())
    }
}

/// ESLAG switches can only peer VPCs that share both namespaces
pub fn validate_eslag_peering(
    peering: &str,
    vpc1: &VPCSpec,
    vpc2: &VPCSpec,
) -> Result<(), ValidationError> {
    if vpc1.ipv4_namespace != vpc2.ipv4_namespace || vpc1.vlan_namespace != vpc2.vlan_namespace {
        return Err(ValidationError::Invalid(format!(
            "VPC peering {peering} between VPCs in different namespaces is not supported on ESLAG"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peering(a: &str, b: &str) -> VPCPeeringSpec {
        VPCPeeringSpec {
            remote: None,
            permit: vec![BTreeMap::from([
                (a.to_string(), VPCPeer::default()),
                (b.to_string(), VPCPeer::default()),
            ])],
        }
    }

    #[test]
    fn test_vpcs() {
        let spec = peering("vpc-2", "vpc-1");
        assert!(spec.validate().is_ok());
        assert_eq!(spec.vpcs().unwrap(), ("vpc-1".to_string(), "vpc-2".to_string()));
    }

    #[test]
    fn test_three_vpcs_rejected() {
        let mut spec = peering("vpc-1", "vpc-2");
        spec.permit.push(BTreeMap::from([
            ("vpc-1".to_string(), VPCPeer::default()),
            ("vpc-3".to_string(), VPCPeer::default()),
        ]));
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_eslag_peering_namespaces() {
        let a = VPCSpec {
            ipv4_namespace: "default".to_string(),
            vlan_namespace: "default".to_string(),
            ..Default::default()
        };
        let mut b = a.clone();
        assert!(validate_eslag_peering("p", &a, &b).is_ok());

        b.vlan_namespace = "other".to_string();
        assert!(validate_eslag_peering("p", &a, &b).is_err());
    }
}
