//! External CRD
//!
//! An out-of-fabric system peered over BGP, with inbound and outbound
//! communities.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[kube(
    group = "vpc.fabric.microscaler.io",
    version = "v1alpha1",
    kind = "External",
    namespaced,
    status = "ExternalStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct ExternalSpec {
    /// IPv4Namespace the external prefixes belong to
    #[serde(default)]
    pub ipv4_namespace: String,

    /// Community attached to routes learned from the external
    pub inbound_community: String,

    /// Community attached to routes advertised to the external
    pub outbound_community: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExternalStatus {}
