//! Built-in switch profiles
//!
//! Hardware models the fabric supports out of the box. Ports are keyed by
//! their front panel label `E1/<n>`; breakout-capable ports carry the NOS base
//! name of their first lane so sub-port names can be derived from the
//! breakout offsets.

use crds::{
    BreakoutMode, PortProfileBreakout, PortProfileSpeed, SwitchProfileConfig,
    SwitchProfileFeatures, SwitchProfileLimits, SwitchProfilePort, SwitchProfilePortGroup,
    SwitchProfilePortProfile, SwitchProfileSpec,
};
use std::collections::BTreeMap;

pub const PROFILE_VS: &str = "vs";
pub const PROFILE_DELL_S5248F_ON: &str = "dell-s5248f-on";
pub const PROFILE_CELESTICA_DS3000: &str = "celestica-ds3000";

const SFP28_25G: &str = "SFP28-25G";
const QSFP28_100G: &str = "QSFP28-100G";
const QSFP28_100G_FIXED: &str = "QSFP28-100G-fixed";
const QSFPDD_400G: &str = "QSFPDD-400G";

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| (*v).to_string()).collect()
}

fn speed_profile(default: &str, supported: &[&str]) -> SwitchProfilePortProfile {
    SwitchProfilePortProfile {
        speed: Some(PortProfileSpeed {
            default: default.to_string(),
            supported: strings(supported),
        }),
        auto_neg_allowed: true,
        ..Default::default()
    }
}

fn breakout_profile(default: &str, modes: &[(&str, &[&str])]) -> SwitchProfilePortProfile {
    SwitchProfilePortProfile {
        breakout: Some(PortProfileBreakout {
            default: default.to_string(),
            supported: modes
                .iter()
                .map(|(mode, offsets)| {
                    (
                        (*mode).to_string(),
                        BreakoutMode {
                            offsets: strings(offsets),
                        },
                    )
                })
                .collect(),
        }),
        ..Default::default()
    }
}

fn qsfp28_breakout() -> SwitchProfilePortProfile {
    breakout_profile(
        "1x100G",
        &[
            ("1x100G", &["0"]),
            ("1x40G", &["0"]),
            ("2x50G", &["0", "2"]),
            ("4x25G", &["0", "1", "2", "3"]),
            ("4x10G", &["0", "1", "2", "3"]),
        ],
    )
}

fn qsfpdd_breakout() -> SwitchProfilePortProfile {
    breakout_profile(
        "1x400G",
        &[
            ("1x400G", &["0"]),
            ("2x200G", &["0", "4"]),
            ("4x100G", &["0", "2", "4", "6"]),
            ("8x50G", &["0", "1", "2", "3", "4", "5", "6", "7"]),
        ],
    )
}

fn label(n: u32) -> String {
    format!("E1/{n}")
}

/// A port with a fixed speed, directly or through its group
fn fixed_port(n: u32, lane: u32, group: Option<String>, profile: Option<&str>) -> (String, SwitchProfilePort) {
    (
        label(n),
        SwitchProfilePort {
            nos_name: format!("Ethernet{lane}"),
            base_nos_name: None,
            label: label(n),
            group,
            profile: profile.map(str::to_string),
            management: false,
        },
    )
}

fn breakout_port(n: u32, lane: u32, profile: &str) -> (String, SwitchProfilePort) {
    (
        label(n),
        SwitchProfilePort {
            nos_name: format!("1/{n}"),
            base_nos_name: Some(format!("Ethernet{lane}")),
            label: label(n),
            group: None,
            profile: Some(profile.to_string()),
            management: false,
        },
    )
}

fn management_port() -> (String, SwitchProfilePort) {
    (
        "M1".to_string(),
        SwitchProfilePort {
            nos_name: "Management0".to_string(),
            label: "M1".to_string(),
            management: true,
            ..Default::default()
        },
    )
}

fn all_features() -> SwitchProfileFeatures {
    SwitchProfileFeatures {
        subinterfaces: true,
        vxlan: true,
        acls: true,
    }
}

fn vs() -> SwitchProfileSpec {
    let mut ports: BTreeMap<String, SwitchProfilePort> = (1..=48)
        .map(|n| fixed_port(n, n - 1, None, Some(SFP28_25G)))
        .collect();
    ports.extend((49..=56).map(|n| breakout_port(n, 48 + (n - 49) * 4, QSFP28_100G)));
    ports.extend([management_port()]);

    SwitchProfileSpec {
        display_name: "Virtual Switch".to_string(),
        other_names: strings(&["Virtual Switch"]),
        switch_silicon: "vs".to_string(),
        features: all_features(),
        limits: SwitchProfileLimits {
            vpc: 1000,
            policy: 0,
        },
        config: SwitchProfileConfig::default(),
        ports,
        port_groups: BTreeMap::new(),
        port_profiles: BTreeMap::from([
            (SFP28_25G.to_string(), speed_profile("25G", &["10G", "25G"])),
            (QSFP28_100G.to_string(), qsfp28_breakout()),
        ]),
    }
}

fn dell_s5248f_on() -> SwitchProfileSpec {
    let mut ports: BTreeMap<String, SwitchProfilePort> = (1..=48)
        .map(|n| fixed_port(n, n - 1, Some(((n - 1) / 4 + 1).to_string()), None))
        .collect();
    ports.extend((49..=56).map(|n| breakout_port(n, 48 + (n - 49) * 4, QSFP28_100G)));
    ports.extend((57..=58).map(|n| fixed_port(n, 80 + (n - 57) * 4, None, Some(QSFP28_100G_FIXED))));
    ports.extend([management_port()]);

    let port_groups = (1..=12)
        .map(|g| {
            (
                g.to_string(),
                SwitchProfilePortGroup {
                    nos_name: g.to_string(),
                    profile: SFP28_25G.to_string(),
                },
            )
        })
        .collect();

    SwitchProfileSpec {
        display_name: "Dell S5248F-ON".to_string(),
        other_names: strings(&["Dell EMC PowerSwitch S5248F-ON"]),
        switch_silicon: "Broadcom Trident3 BCM56873".to_string(),
        features: all_features(),
        limits: SwitchProfileLimits {
            vpc: 1000,
            policy: 0,
        },
        config: SwitchProfileConfig {
            max_paths_ebgp: Some(16),
        },
        ports,
        port_groups,
        port_profiles: BTreeMap::from([
            (SFP28_25G.to_string(), speed_profile("25G", &["10G", "25G"])),
            (QSFP28_100G.to_string(), qsfp28_breakout()),
            (
                QSFP28_100G_FIXED.to_string(),
                speed_profile("100G", &["40G", "100G"]),
            ),
        ]),
    }
}

fn celestica_ds3000() -> SwitchProfileSpec {
    let mut ports: BTreeMap<String, SwitchProfilePort> = (1..=32)
        .map(|n| breakout_port(n, (n - 1) * 8, QSFPDD_400G))
        .collect();
    ports.extend([management_port()]);

    SwitchProfileSpec {
        display_name: "Celestica DS3000".to_string(),
        other_names: strings(&["Celestica Seastone2"]),
        switch_silicon: "Broadcom Tomahawk".to_string(),
        features: SwitchProfileFeatures {
            subinterfaces: true,
            vxlan: false,
            acls: true,
        },
        limits: SwitchProfileLimits {
            vpc: 500,
            policy: 0,
        },
        config: SwitchProfileConfig::default(),
        ports,
        port_groups: BTreeMap::new(),
        port_profiles: BTreeMap::from([(QSFPDD_400G.to_string(), qsfpdd_breakout())]),
    }
}

/// Every built-in profile with its object name
pub fn builtin_profiles() -> Vec<(&'static str, SwitchProfileSpec)> {
    vec![
        (PROFILE_VS, vs()),
        (PROFILE_DELL_S5248F_ON, dell_s5248f_on()),
        (PROFILE_CELESTICA_DS3000, celestica_ds3000()),
    ]
}
