//! ExternalPeering CRD
//!
//! Permits a VPC's subnets to exchange the listed prefixes with an External.

use crate::validation::{parse_cidr, ValidationError};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[kube(
    group = "vpc.fabric.microscaler.io",
    version = "v1alpha1",
    kind = "ExternalPeering",
    namespaced,
    status = "ExternalPeeringStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct ExternalPeeringSpec {
    pub permit: ExternalPeeringPermit,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ExternalPeeringPermit {
    pub vpc: ExternalPeeringVPC,
    pub external: ExternalPeeringExternal,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ExternalPeeringVPC {
    pub name: String,
    #[serde(default)]
    pub subnets: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ExternalPeeringExternal {
    pub name: String,
    #[serde(default)]
    pub prefixes: Vec<ExternalPeeringPrefix>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ExternalPeeringPrefix {
    pub prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExternalPeeringStatus {}

impl ExternalPeeringSpec {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.permit.vpc.name.is_empty() || self.permit.external.name.is_empty() {
            return Err(ValidationError::Invalid(
                "external peering must name a VPC and an external".to_string(),
            ));
        }
        for prefix in &self.permit.external.prefixes {
            parse_cidr(&prefix.prefix)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_prefixes() {
        let mut spec = ExternalPeeringSpec {
            permit: ExternalPeeringPermit {
                vpc: ExternalPeeringVPC {
                    name: "vpc-1".to_string(),
                    subnets: vec!["default".to_string()],
                },
                external: ExternalPeeringExternal {
                    name: "internet".to_string(),
                    prefixes: vec![ExternalPeeringPrefix {
                        prefix: "0.0.0.0/0".to_string(),
                    }],
                },
            },
        };
        assert!(spec.validate().is_ok());

        spec.permit.external.prefixes.push(ExternalPeeringPrefix {
            prefix: "bad".to_string(),
        });
        assert!(spec.validate().is_err());
    }
}
