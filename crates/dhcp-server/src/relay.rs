//! Relay agent information (option 82)
//!
//! The leaf relays client packets with the circuit ID (sub-option 1) set to
//! the VLAN interface and the virtual subnet selection (sub-option 151) set to
//! the VRF.

use crds::DEFAULT_VRF;
use dhcproto::v4::relay::{RelayAgentInformation, RelayCode, RelayInfo};
use dhcproto::v4::{DhcpOption, Encodable, Message, OptionCode};

/// Virtual subnet selection sub-option (RFC 6607)
pub const VSS_SUBOPTION: u8 = 151;

/// VSS type carrying an NVT ASCII VRF name
const VSS_TYPE_NVT_ASCII: u8 = 0;

/// VSS type selecting the global routing table
const VSS_TYPE_GLOBAL: u8 = 0xff;

pub fn relay_information(msg: &Message) -> Option<&RelayAgentInformation> {
    match msg.opts().get(OptionCode::RelayAgentInformation) {
        Some(DhcpOption::RelayAgentInformation(info)) => Some(info),
        _ => None,
    }
}

pub fn circuit_id(info: &RelayAgentInformation) -> Option<String> {
    match info.get(RelayCode::AgentCircuitId) {
        Some(RelayInfo::AgentCircuitId(id)) => Some(String::from_utf8_lossy(id).into_owned()),
        _ => None,
    }
}

/// VRF name from the VSS sub-option
pub fn vrf(info: &RelayAgentInformation) -> Option<String> {
    let vss = info.get(RelayCode::from(VSS_SUBOPTION))?;
    // Sub-option header is code and length
    let encoded = vss.to_vec().ok()?;
    let (vss_type, name) = encoded.get(2..)?.split_first()?;
    match *vss_type {
        VSS_TYPE_NVT_ASCII => {
            let name = String::from_utf8_lossy(name);
            Some(name.trim_end_matches('\0').to_string())
        }
        VSS_TYPE_GLOBAL => Some(DEFAULT_VRF.to_string()),
        _ => None,
    }
}

/// Subnet map key of a relayed packet
pub fn subnet_key(msg: &Message) -> (String, String) {
    let info = relay_information(msg);
    let vrf = info
        .and_then(vrf)
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| DEFAULT_VRF.to_string());
    let circuit = info.and_then(circuit_id).unwrap_or_default();
    (vrf, circuit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{relayed_packet, PacketSpec};
    use dhcproto::v4::MessageType;

    #[test]
    fn test_vrf_and_circuit() {
        let msg = relayed_packet(&PacketSpec {
            vrf: Some("VrfVvpc-1"),
            circuit_id: Some("Vlan1001"),
            ..PacketSpec::new(MessageType::Discover, 1)
        });
        assert_eq!(
            subnet_key(&msg),
            ("VrfVvpc-1".to_string(), "Vlan1001".to_string())
        );
    }

    #[test]
    fn test_missing_vss_means_default_vrf() {
        let msg = relayed_packet(&PacketSpec {
            circuit_id: Some("Vlan1001"),
            ..PacketSpec::new(MessageType::Discover, 1)
        });
        assert_eq!(
            subnet_key(&msg),
            ("default".to_string(), "Vlan1001".to_string())
        );

        let bare = relayed_packet(&PacketSpec::new(MessageType::Discover, 1));
        assert_eq!(subnet_key(&bare), ("default".to_string(), String::new()));
    }
}
