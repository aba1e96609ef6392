//! VPC CRDs
//!
//! Tenancy objects: VPCs and their attachments and peerings, IPv4 namespaces
//! and externals.

pub mod external;
pub mod external_attachment;
pub mod external_peering;
pub mod ipv4_namespace;
#[allow(clippy::module_inception)]
pub mod vpc;
pub mod vpc_attachment;
pub mod vpc_peering;

pub use external::*;
pub use external_attachment::*;
pub use external_peering::*;
pub use ipv4_namespace::*;
pub use vpc::*;
pub use vpc_attachment::*;
pub use vpc_peering::*;
