//! VPCAttachment CRD
//!
//! Binds a VPC subnet ("<vpc>/<subnet>") to a connection.

use crate::validation::ValidationError;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[kube(
    group = "vpc.fabric.microscaler.io",
    version = "v1alpha1",
    kind = "VPCAttachment",
    namespaced,
    status = "VPCAttachmentStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct VPCAttachmentSpec {
    /// "<vpc>/<subnet>"
    pub subnet: String,

    /// Connection the subnet is attached to
    pub connection: String,

    /// Attach the subnet untagged
    #[serde(default)]
    pub native_vlan: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VPCAttachmentStatus {}

impl VPCAttachmentSpec {
    pub fn vpc_name(&self) -> &str {
        self.subnet.split_once('/').map_or(self.subnet.as_str(), |(vpc, _)| vpc)
    }

    /// Subnet name, "default" if the attachment names only the VPC
    pub fn subnet_name(&self) -> &str {
        self.subnet.split_once('/').map_or("default", |(_, subnet)| subnet)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.vpc_name().is_empty() || self.subnet_name().is_empty() {
            return Err(ValidationError::Invalid(format!(
                "invalid VPC subnet reference {:?}",
                self.subnet
            )));
        }
        if self.connection.is_empty() {
            return Err(ValidationError::Invalid(
                "VPC attachment has no connection".to_string(),
            ));
        }
        Ok(())
    }
}
