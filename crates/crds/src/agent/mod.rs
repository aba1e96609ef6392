//! Agent CRDs
//!
//! Derived per-switch objects and the librarian catalogs backing them.

#[allow(clippy::module_inception)]
pub mod agent;
pub mod catalog;

pub use agent::*;
pub use catalog::*;
