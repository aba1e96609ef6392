//! VLANNamespace CRD
//!
//! A set of inclusive VLAN ranges. VPC subnet VLANs must be unique within
//! their namespace.

use crate::validation::ValidationError;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[kube(
    group = "wiring.fabric.microscaler.io",
    version = "v1alpha1",
    kind = "VLANNamespace",
    namespaced,
    status = "VLANNamespaceStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct VLANNamespaceSpec {
    /// Inclusive VLAN ranges
    pub ranges: Vec<VLANRange>,
}

/// Inclusive VLAN range
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "camelCase")]
pub struct VLANRange {
    pub from: u16,
    pub to: u16,
}

impl VLANRange {
    pub fn new(from: u16, to: u16) -> Self {
        Self { from, to }
    }

    pub fn contains(&self, vlan: u16) -> bool {
        self.from <= vlan && vlan <= self.to
    }

    pub fn overlaps(&self, other: &VLANRange) -> bool {
        self.from <= other.to && other.from <= self.to
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VLANNamespaceStatus {}

/// Check that ranges are well formed, inside 1..=4094 and disjoint
pub fn validate_vlan_ranges(ranges: &[VLANRange]) -> Result<(), ValidationError> {
    if ranges.is_empty() {
        return Err(ValidationError::Invalid("no VLAN ranges".to_string()));
    }
    for (i, range) in ranges.iter().enumerate() {
        if range.from == 0 || range.to > 4094 || range.from > range.to {
            return Err(ValidationError::Invalid(format!(
                "invalid VLAN range {}..{}",
                range.from, range.to
            )));
        }
        if let Some(other) = ranges[i + 1..].iter().find(|o| o.overlaps(range)) {
            return Err(ValidationError::Invalid(format!(
                "VLAN range {}..{} overlaps {}..{}",
                range.from, range.to, other.from, other.to
            )));
        }
    }
    Ok(())
}

impl VLANNamespaceSpec {
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_vlan_ranges(&self.ranges)
    }

    pub fn contains(&self, vlan: u16) -> bool {
        self.ranges.iter().any(|r| r.contains(vlan))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_vlan_ranges() {
        assert!(validate_vlan_ranges(&[VLANRange::new(1000, 2999)]).is_ok());
        assert!(validate_vlan_ranges(&[]).is_err());
        assert!(validate_vlan_ranges(&[VLANRange::new(0, 10)]).is_err());
        assert!(validate_vlan_ranges(&[VLANRange::new(20, 10)]).is_err());
        assert!(validate_vlan_ranges(&[VLANRange::new(10, 4095)]).is_err());
        assert!(
            validate_vlan_ranges(&[VLANRange::new(10, 20), VLANRange::new(20, 30)]).is_err()
        );
    }

    #[test]
    fn test_contains() {
        let spec = VLANNamespaceSpec {
            ranges: vec![VLANRange::new(1000, 1999), VLANRange::new(3000, 3000)],
        };
        assert!(spec.contains(1000));
        assert!(spec.contains(3000));
        assert!(!spec.contains(2000));
    }
}
