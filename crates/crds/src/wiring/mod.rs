//! Wiring CRDs
//!
//! Physical topology of the fabric: switches, servers, the connections between
//! them and the VLAN namespaces switches serve.

pub mod connection;
pub mod rack;
pub mod server;
pub mod switch;
pub mod switch_profile;
pub mod vlan_namespace;

pub use connection::*;
pub use rack::*;
pub use server::*;
pub use switch::*;
pub use switch_profile::*;
pub use vlan_namespace::*;
