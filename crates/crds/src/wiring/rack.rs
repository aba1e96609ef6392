//! Rack and SwitchGroup CRDs
//!
//! Both are grouping objects only: a rack is a location label and a switch
//! group is referenced by `Switch.groups` and `VPCPeering.remote`.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[kube(
    group = "wiring.fabric.microscaler.io",
    version = "v1alpha1",
    kind = "Rack",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct RackSpec {}

#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[kube(
    group = "wiring.fabric.microscaler.io",
    version = "v1alpha1",
    kind = "SwitchGroup",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct SwitchGroupSpec {}
