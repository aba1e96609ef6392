//! Librarian
//!
//! Stable, collision-free allocation of fabric identifiers: VPC and subnet
//! VNIs, IRB and loopback workaround VLANs, port channel IDs, ESLAG connection
//! IDs, external IDs and subnet IDs. Assignments are persisted in `Catalog`
//! objects and survive controller restarts.

pub mod allocator;
pub mod error;
pub mod librarian;

pub use allocator::{allocate, live_keys, Balanced, NextFreeValueFromRanges, ValueAllocator};
pub use error::{AllocatorError, LibrarianError};
pub use librarian::{Librarian, LibrarianConfig, RedundancyGroupRequest, SwitchRequest};
