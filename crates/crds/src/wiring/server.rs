//! Server CRD
//!
//! A server connected to the fabric.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[kube(
    group = "wiring.fabric.microscaler.io",
    version = "v1alpha1",
    kind = "Server",
    namespaced,
    status = "ServerStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct ServerSpec {
    /// Server type
    #[serde(default, rename = "type")]
    pub server_type: ServerType,

    /// Human readable description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ServerType {
    Control,
    #[default]
    Default,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServerStatus {}
