//! Test utilities for building relayed DHCP packets and subnets
//!
//! Packets are assembled on the wire format and decoded, so tests see exactly
//! what a relay would send.

use crds::{DHCPSubnet, DHCPSubnetSpec};
use dhcproto::v4::{Decodable, Decoder, Message, MessageType, OptionCode};
use kube::api::ObjectMeta;
use std::net::Ipv4Addr;

/// Relay address used by the test packets
pub const RELAY_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);

/// Fields of a test packet
#[derive(Debug, Clone)]
pub struct PacketSpec<'a> {
    pub msg_type: MessageType,
    pub mac_last: u8,
    pub vrf: Option<&'a str>,
    pub circuit_id: Option<&'a str>,
    pub requested_ip: Option<Ipv4Addr>,
    pub hostname: Option<&'a str>,
    pub params: Vec<OptionCode>,
    pub class_identifier: Option<&'a str>,
    pub giaddr: Ipv4Addr,
}

impl PacketSpec<'_> {
    pub fn new(msg_type: MessageType, mac_last: u8) -> Self {
        Self {
            msg_type,
            mac_last,
            vrf: None,
            circuit_id: None,
            requested_ip: None,
            hostname: None,
            params: Vec::new(),
            class_identifier: None,
            giaddr: RELAY_IP,
        }
    }
}

fn message_type_code(msg_type: MessageType) -> u8 {
    match msg_type {
        MessageType::Discover => 1,
        MessageType::Offer => 2,
        MessageType::Request => 3,
        MessageType::Decline => 4,
        MessageType::Ack => 5,
        MessageType::Nak => 6,
        MessageType::Release => 7,
        _ => 8,
    }
}

fn push_option(buf: &mut Vec<u8>, code: u8, data: &[u8]) {
    buf.push(code);
    buf.push(u8::try_from(data.len()).unwrap());
    buf.extend_from_slice(data);
}

/// Client MAC of a test packet
pub fn mac(last: u8) -> String {
    format!("02:00:00:00:00:{last:02x}")
}

/// Encode and decode a relayed BOOTREQUEST
pub fn relayed_packet(spec: &PacketSpec<'_>) -> Message {
    message_from_bytes(&packet_bytes(spec))
}

/// Same packet, optionally without option 53
pub fn packet_bytes_with(spec: &PacketSpec<'_>, with_type: bool) -> Vec<u8> {
    let mut buf = vec![0u8; 236];
    buf[0] = 1; // BOOTREQUEST
    buf[1] = 1; // Ethernet
    buf[2] = 6;
    buf[3] = 1; // hops
    buf[4..8].copy_from_slice(&0x1234_5678u32.to_be_bytes());
    buf[24..28].copy_from_slice(&spec.giaddr.octets());
    buf[28..34].copy_from_slice(&[0x02, 0, 0, 0, 0, spec.mac_last]);
    buf.extend_from_slice(&[99, 130, 83, 99]);

    if with_type {
        push_option(&mut buf, 53, &[message_type_code(spec.msg_type)]);
    }
    if let Some(ip) = spec.requested_ip {
        push_option(&mut buf, 50, &ip.octets());
    }
    if let Some(hostname) = spec.hostname {
        push_option(&mut buf, 12, hostname.as_bytes());
    }
    if let Some(class) = spec.class_identifier {
        push_option(&mut buf, 60, class.as_bytes());
    }
    if !spec.params.is_empty() {
        let codes: Vec<u8> = spec.params.iter().map(|c| u8::from(*c)).collect();
        push_option(&mut buf, 55, &codes);
    }

    let mut relay = Vec::new();
    if let Some(circuit) = spec.circuit_id {
        push_option(&mut relay, 1, circuit.as_bytes());
    }
    if let Some(vrf) = spec.vrf {
        let mut vss = vec![0u8];
        vss.extend_from_slice(vrf.as_bytes());
        push_option(&mut relay, 151, &vss);
    }
    if !relay.is_empty() {
        push_option(&mut buf, 82, &relay);
    }

    buf.push(255);
    buf
}

pub fn packet_bytes(spec: &PacketSpec<'_>) -> Vec<u8> {
    packet_bytes_with(spec, true)
}

pub fn message_from_bytes(bytes: &[u8]) -> Message {
    Message::decode(&mut Decoder::new(bytes)).unwrap()
}

/// DHCPSubnet for 10.0.0.0/24 handing out .100 to .199
pub fn test_subnet(name: &str, vrf: &str, circuit_id: &str) -> DHCPSubnet {
    DHCPSubnet {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        spec: DHCPSubnetSpec {
            subnet: name.replace("--", "/"),
            cidr_block: "10.0.0.0/24".to_string(),
            gateway: "10.0.0.1".to_string(),
            start_ip: "10.0.0.100".to_string(),
            end_ip: "10.0.0.199".to_string(),
            vrf: vrf.to_string(),
            circuit_id: circuit_id.to_string(),
            interface_mtu: 9036,
            lease_time_seconds: 3600,
            ..Default::default()
        },
        status: None,
    }
}
