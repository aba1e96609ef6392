//! DHCP server errors

use state_store::{IsConflict, StoreError};
use thiserror::Error;

/// Errors that can occur while serving DHCP
#[derive(Debug, Error)]
pub enum DhcpError {
    /// Every address of the range is taken
    #[error("No available IP in subnet {0}")]
    NoAvailableIp(String),

    /// No subnet is known for the relay's VRF and circuit ID
    #[error("Unknown subnet for VRF {vrf:?} circuit ID {circuit_id:?}")]
    UnknownSubnet { vrf: String, circuit_id: String },

    /// State store error
    #[error("State store error: {0}")]
    Store(#[from] StoreError),

    #[error("Failed to encode DHCP message: {0}")]
    Encode(#[from] dhcproto::error::EncodeError),

    #[error("Failed to decode DHCP message: {0}")]
    Decode(#[from] dhcproto::error::DecodeError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The subnet was re-created while a lease was being written
    #[error("DHCPSubnet {0} was replaced while updating its leases")]
    UidMismatch(String),

    /// Subnet watch stream failed
    #[error("DHCPSubnet watch failed: {0}")]
    Watch(String),

    /// Subnet spec cannot be served
    #[error("Invalid DHCPSubnet {subnet}: {reason}")]
    InvalidSubnet { subnet: String, reason: String },

    /// Packet is not something this server answers
    #[error("Unsupported DHCP message: {0}")]
    Unsupported(String),
}

impl IsConflict for DhcpError {
    fn is_conflict(&self) -> bool {
        matches!(self, DhcpError::Store(e) if e.is_conflict())
    }
}

impl DhcpError {
    /// Short label for the dropped-packets counter
    pub fn reason(&self) -> &'static str {
        match self {
            DhcpError::NoAvailableIp(_) => "no_available_ip",
            DhcpError::UnknownSubnet { .. } => "unknown_subnet",
            DhcpError::Store(_) | DhcpError::UidMismatch(_) => "store",
            DhcpError::Encode(_) => "encode",
            DhcpError::Decode(_) => "decode",
            DhcpError::Io(_) => "io",
            DhcpError::Watch(_) => "watch",
            DhcpError::InvalidSubnet { .. } => "invalid_subnet",
            DhcpError::Unsupported(_) => "unsupported",
        }
    }
}
