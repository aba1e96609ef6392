//! IPv4Namespace CRD
//!
//! A set of non-overlapping IPv4 CIDRs that VPC subnets are carved from.

use crate::validation::{
    check_name_len, check_reserved, overlaps, parse_cidr, ValidationError,
    IPV4_NAMESPACE_NAME_MAX_LEN,
};
use ipnet::Ipv4Net;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[kube(
    group = "vpc.fabric.microscaler.io",
    version = "v1alpha1",
    kind = "IPv4Namespace",
    namespaced,
    status = "IPv4NamespaceStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct IPv4NamespaceSpec {
    /// CIDRs available to VPC subnets
    pub subnets: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IPv4NamespaceStatus {}

impl IPv4NamespaceSpec {
    pub fn cidrs(&self) -> Result<Vec<Ipv4Net>, ValidationError> {
        self.subnets
            .iter()
            .map(|s| parse_cidr(s).map(|n| n.trunc()))
            .collect()
    }

    pub fn validate(&self, name: &str, reserved: &[Ipv4Net]) -> Result<(), ValidationError> {
        check_name_len(name, IPV4_NAMESPACE_NAME_MAX_LEN)?;
        let cidrs = self.cidrs()?;
        if cidrs.is_empty() {
            return Err(ValidationError::Invalid(format!(
                "IPv4 namespace {name} has no subnets"
            )));
        }
        for (i, cidr) in cidrs.iter().enumerate() {
            check_reserved(cidr, reserved)?;
            if let Some(other) = cidrs[i + 1..].iter().find(|o| overlaps(o, cidr)) {
                return Err(ValidationError::Overlap {
                    subnet: cidr.to_string(),
                    other: other.to_string(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate() {
        let ns = IPv4NamespaceSpec {
            subnets: vec!["10.0.0.0/16".to_string(), "10.1.0.0/16".to_string()],
        };
        assert!(ns.validate("default", &[]).is_ok());
        assert!(ns.validate("namespace-too-long", &[]).is_err());

        let overlapping = IPv4NamespaceSpec {
            subnets: vec!["10.0.0.0/16".to_string(), "10.0.128.0/17".to_string()],
        };
        assert!(matches!(
            overlapping.validate("default", &[]),
            Err(ValidationError::Overlap { .. })
        ));
    }
}
