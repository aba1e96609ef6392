//! Packet counters

use prometheus::{opts, Encoder, IntCounterVec, Registry, TextEncoder};

const NAMESPACE: &str = "fabric_dhcp";

/// Message types counted by the server
pub const PACKET_TYPES: &[&str] = &["discover", "request", "release", "decline", "other"];

/// Drop reasons counted by the server
pub const DROP_REASONS: &[&str] = &[
    "no_message_type",
    "no_available_ip",
    "unknown_subnet",
    "store",
    "encode",
    "decode",
    "io",
    "watch",
    "invalid_subnet",
    "unsupported",
];

#[derive(Debug, Clone)]
pub struct DhcpMetrics {
    registry: Registry,
    packets: IntCounterVec,
    dropped: IntCounterVec,
}

impl DhcpMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let packets = IntCounterVec::new(
            opts!("packets_total", "DHCP packets received by message type").namespace(NAMESPACE),
            &["type"],
        )?;
        let dropped = IntCounterVec::new(
            opts!("dropped_total", "DHCP packets dropped by reason").namespace(NAMESPACE),
            &["reason"],
        )?;
        registry.register(Box::new(packets.clone()))?;
        registry.register(Box::new(dropped.clone()))?;

        Ok(Self {
            registry,
            packets,
            dropped,
        })
    }

    pub fn packet(&self, kind: &str) {
        self.packets.with_label_values(&[kind]).inc();
    }

    pub fn dropped(&self, reason: &str) {
        self.dropped.with_label_values(&[reason]).inc();
    }

    pub fn packet_count(&self, kind: &str) -> u64 {
        self.packets.with_label_values(&[kind]).get()
    }

    pub fn dropped_count(&self, reason: &str) -> u64 {
        self.dropped.with_label_values(&[reason]).get()
    }

    /// Packets received and dropped so far
    pub fn totals(&self) -> (u64, u64) {
        let received = PACKET_TYPES.iter().map(|t| self.packet_count(t)).sum();
        let dropped = DROP_REASONS.iter().map(|r| self.dropped_count(r)).sum();
        (received, dropped)
    }

    /// Text exposition of every counter
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
