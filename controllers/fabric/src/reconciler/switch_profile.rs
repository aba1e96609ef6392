//! Switch profile reconciler
//!
//! Keeps the built-in switch profiles in the store. They are written once at
//! startup and restored whenever one of them is changed.

use super::Reconciler;
use crate::error::ControllerError;
use crate::profiles::builtin_profiles;
use crate::reconcile_helpers::{managed_labels, upsert};
use crds::SwitchProfile;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;
use std::time::Duration;
use tracing::{info, warn};

/// Startup attempts before giving up
pub const PROFILE_SYNC_ATTEMPTS: u32 = 60;
pub const PROFILE_SYNC_INTERVAL: Duration = Duration::from_secs(5);

impl Reconciler {
    fn builtin_profile(&self, name: &str, spec: crds::SwitchProfileSpec) -> SwitchProfile {
        SwitchProfile {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(self.stores.namespace().to_string()),
                labels: Some(managed_labels()),
                ..Default::default()
            },
            spec,
            status: None,
        }
    }

    /// Upsert every built-in switch profile
    pub async fn ensure_switch_profiles(&self) -> Result<(), ControllerError> {
        for (name, spec) in builtin_profiles() {
            let profile = self.builtin_profile(name, spec);
            upsert(self.stores.switch_profiles.as_ref(), &profile).await?;
        }
        Ok(())
    }

    /// `ensure_switch_profiles`, retried while the API server is not ready
    pub async fn ensure_switch_profiles_with_retry(
        &self,
        attempts: u32,
        interval: Duration,
    ) -> Result<(), ControllerError> {
        let mut attempt = 1;
        loop {
            match self.ensure_switch_profiles().await {
                Ok(()) => {
                    info!("Built-in switch profiles are in place");
                    return Ok(());
                }
                Err(e) if attempt < attempts => {
                    warn!(
                        "Failed to upsert switch profiles (attempt {}/{}): {}",
                        attempt, attempts, e
                    );
                    attempt += 1;
                    tokio::time::sleep(interval).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Restore a built-in profile that was modified
    pub async fn reconcile_switch_profile(&self, profile: &SwitchProfile) -> Result<(), ControllerError> {
        let name = profile.name_any();
        let Some((_, spec)) = builtin_profiles().into_iter().find(|(n, _)| *n == name) else {
            return Ok(());
        };
        info!("Reconciling SwitchProfile {}/{}", self.stores.namespace(), name);
        upsert(
            self.stores.switch_profiles.as_ref(),
            &self.builtin_profile(&name, spec),
        )
        .await?;
        Ok(())
    }
}
