//! SwitchProfile CRD
//!
//! Describes a hardware model: its ports keyed by the operator-visible label
//! ("E1/7"), port groups, port profiles and limits.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[kube(
    group = "wiring.fabric.microscaler.io",
    version = "v1alpha1",
    kind = "SwitchProfile",
    namespaced,
    status = "SwitchProfileStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct SwitchProfileSpec {
    /// Display name of the hardware model
    pub display_name: String,

    /// Alternative names of the model
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub other_names: Vec<String>,

    /// Switch ASIC
    #[serde(default)]
    pub switch_silicon: String,

    /// Supported features
    #[serde(default)]
    pub features: SwitchProfileFeatures,

    /// Scale limits
    #[serde(default)]
    pub limits: SwitchProfileLimits,

    /// Model specific configuration
    #[serde(default)]
    pub config: SwitchProfileConfig,

    /// Ports keyed by label ("E1/7")
    #[serde(default)]
    pub ports: BTreeMap<String, SwitchProfilePort>,

    /// Port groups keyed by group name, their members share a speed
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub port_groups: BTreeMap<String, SwitchProfilePortGroup>,

    /// Port profiles keyed by profile name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub port_profiles: BTreeMap<String, SwitchProfilePortProfile>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SwitchProfileFeatures {
    #[serde(default)]
    pub subinterfaces: bool,
    #[serde(default)]
    pub vxlan: bool,
    #[serde(default)]
    pub acls: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SwitchProfileLimits {
    /// Maximum number of VPCs
    #[serde(default)]
    pub vpc: u32,
    /// Maximum number of policies
    #[serde(default)]
    pub policy: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SwitchProfileConfig {
    /// Default eBGP max paths, overrides the fabric default when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_paths_ebgp: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SwitchProfilePort {
    /// Native OS name of the port ("1/7")
    pub nos_name: String,

    /// Native OS base name for breakout ports ("Ethernet20")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_nos_name: Option<String>,

    /// Operator visible label
    pub label: String,

    /// Port group this port belongs to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,

    /// Port profile of the port
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,

    /// Management port
    #[serde(default)]
    pub management: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SwitchProfilePortGroup {
    pub nos_name: String,
    pub profile: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SwitchProfilePortProfile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<PortProfileSpeed>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub breakout: Option<PortProfileBreakout>,

    #[serde(default)]
    pub auto_neg_allowed: bool,

    #[serde(default)]
    pub auto_neg_default: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PortProfileSpeed {
    pub default: String,
    pub supported: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PortProfileBreakout {
    pub default: String,
    /// Supported modes ("4x25G") and the sub-port offsets they create
    pub supported: BTreeMap<String, BreakoutMode>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BreakoutMode {
    pub offsets: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SwitchProfileStatus {}

impl SwitchProfileSpec {
    /// Native OS names keyed by port label, breakout sub-ports included
    ///
    /// A breakout-capable port "E1/1" with base name "Ethernet0" and offsets
    /// ["0", "1"] yields "E1/1/1" -> "Ethernet0" and "E1/1/2" -> "Ethernet1".
    pub fn nos_port_names(&self) -> BTreeMap<String, String> {
        let mut names = BTreeMap::new();
        for (label, port) in &self.ports {
            names.insert(label.clone(), port.nos_name.clone());

            let Some(base) = &port.base_nos_name else {
                continue;
            };
            let Some(breakout) = port
                .profile
                .as_ref()
                .and_then(|p| self.port_profiles.get(p))
                .and_then(|p| p.breakout.as_ref())
            else {
                continue;
            };
            let Some(prefix_len) = base.find(|c: char| c.is_ascii_digit()) else {
                continue;
            };
            let (prefix, index) = base.split_at(prefix_len);
            let Ok(index) = index.parse::<u32>() else {
                continue;
            };

            let max_offsets = breakout
                .supported
                .values()
                .map(|m| m.offsets.len())
                .max()
                .unwrap_or(0);
            let Some(mode) = breakout
                .supported
                .values()
                .find(|m| m.offsets.len() == max_offsets)
            else {
                continue;
            };
            for (i, offset) in mode.offsets.iter().enumerate() {
                let Ok(offset) = offset.parse::<u32>() else {
                    continue;
                };
                names.insert(format!("{label}/{}", i + 1), format!("{prefix}{}", index + offset));
            }
        }
        names
    }
}
