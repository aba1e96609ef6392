//! ExternalAttachment CRD
//!
//! Attaches an External to an external connection with switch side addressing
//! and the BGP neighbor.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[kube(
    group = "vpc.fabric.microscaler.io",
    version = "v1alpha1",
    kind = "ExternalAttachment",
    namespaced,
    status = "ExternalAttachmentStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct ExternalAttachmentSpec {
    /// Name of the External
    pub external: String,

    /// Name of the external Connection
    pub connection: String,

    #[serde(default)]
    pub switch: ExternalAttachmentSwitch,

    #[serde(default)]
    pub neighbor: ExternalAttachmentNeighbor,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ExternalAttachmentSwitch {
    #[serde(default)]
    pub vlan: u16,
    #[serde(default)]
    pub ip: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ExternalAttachmentNeighbor {
    #[serde(default)]
    pub asn: u32,
    #[serde(default)]
    pub ip: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExternalAttachmentStatus {}
