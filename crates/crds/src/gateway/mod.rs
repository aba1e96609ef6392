//! VPCInfo CRD
//!
//! Gateway side view of a VPC or External: its VNI and subnets.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Prefix of VPCInfo objects built from Externals
pub const EXTERNAL_VPCINFO_PREFIX: &str = "ext.";

#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[kube(
    group = "gateway.fabric.microscaler.io",
    version = "v1alpha1",
    kind = "VPCInfo",
    namespaced,
    status = "VPCInfoStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct VPCInfoSpec {
    /// Subnet name -> subnet
    pub subnets: BTreeMap<String, VPCInfoSubnet>,

    /// VNI of the VPC, zero for externals
    #[serde(default)]
    pub vni: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VPCInfoSubnet {
    pub cidr: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VPCInfoStatus {}

/// Name of the VPCInfo built from an External
pub fn external_vpcinfo_name(external: &str) -> String {
    format!("{EXTERNAL_VPCINFO_PREFIX}{external}")
}
