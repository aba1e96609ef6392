//! Object Store
//!
//! Typed access to namespaced fabric objects: get, list by label selector,
//! create, replace, status update with optimistic concurrency, and delete.
//!
//! Reconcilers and the DHCP server depend on the `ObjectStore` trait only; the
//! binaries plug in `KubeStore` and tests plug in `MockStore` (feature
//! `test-util`).
//!
//! # Example
//!
//! ```no_run
//! use state_store::{KubeStore, LabelSelector, ObjectStore};
//! use crds::DHCPSubnet;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = kube::Client::try_default().await?;
//! let store = KubeStore::<DHCPSubnet>::new(client, "default");
//!
//! let subnets = store
//!     .list(&LabelSelector::everything().eq("fabric.microscaler.io/vpc", "vpc-1"))
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod kube_store;
pub mod retry;
pub mod selector;
#[path = "trait.rs"]
pub mod store_trait;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use error::{IsConflict, StoreError};
pub use kube_store::KubeStore;
pub use retry::{retry_on_conflict, Backoff};
pub use selector::LabelSelector;
pub use store_trait::{kind_of, name_of, ObjectStore, StoreObject};
#[cfg(any(test, feature = "test-util"))]
pub use mock::MockStore;
