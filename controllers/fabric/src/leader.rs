//! Leader election
//!
//! A `coordination.k8s.io/v1` Lease names the active controller replica. The
//! holder renews it every `RENEW_INTERVAL`; another replica may take it over
//! once `renewTime` is older than the lease duration. All writes carry the
//! resource version read just before, so two replicas racing for an expired
//! lease cannot both win.

use crate::error::ControllerError;
use chrono::{DateTime, SecondsFormat, Utc};
use crds::labels::{LABEL_MANAGED_BY, MANAGED_BY_VALUE};
use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use kube::api::ObjectMeta;
use serde_json::{json, Value};
use state_store::{IsConflict, ObjectStore, StoreError};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Name of the Lease object
pub const LEASE_NAME: &str = "fabric-controller-leader";

/// How long a lease stays valid without renewal
pub const LEASE_DURATION: Duration = Duration::from_secs(15);

/// How often the holder renews
pub const RENEW_INTERVAL: Duration = Duration::from_secs(5);

/// Lease timestamps are MicroTime: RFC 3339 with microseconds
fn micro(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_time(value: &Value) -> Option<DateTime<Utc>> {
    value
        .as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc))
}

/// Current holder of a lease
#[derive(Debug, Clone, Default, PartialEq)]
struct Holder {
    identity: Option<String>,
    acquire_time: Option<DateTime<Utc>>,
    renew_time: Option<DateTime<Utc>>,
    duration_seconds: i64,
    transitions: i32,
}

impl Holder {
    fn from_lease(lease: &Lease) -> Result<Self, ControllerError> {
        let spec = serde_json::to_value(lease.spec.clone().unwrap_or_default())?;
        Ok(Self {
            identity: spec["holderIdentity"]
                .as_str()
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            acquire_time: parse_time(&spec["acquireTime"]),
            renew_time: parse_time(&spec["renewTime"]),
            duration_seconds: spec["leaseDurationSeconds"].as_i64().unwrap_or(0),
            transitions: spec["leaseTransitions"]
                .as_i64()
                .and_then(|t| i32::try_from(t).ok())
                .unwrap_or(0),
        })
    }

    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.renew_time {
            Some(renewed) => now - renewed > chrono::Duration::seconds(self.duration_seconds),
            None => true,
        }
    }
}

#[derive(Clone)]
pub struct LeaderElector {
    store: Arc<dyn ObjectStore<Lease>>,
    identity: String,
}

impl std::fmt::Debug for LeaderElector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeaderElector")
            .field("namespace", &self.store.namespace())
            .field("identity", &self.identity)
            .finish()
    }
}

impl LeaderElector {
    pub fn new(store: Arc<dyn ObjectStore<Lease>>, identity: impl Into<String>) -> Self {
        Self {
            store,
            identity: identity.into(),
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    fn spec(
        &self,
        acquired: DateTime<Utc>,
        now: DateTime<Utc>,
        transitions: i32,
    ) -> Result<LeaseSpec, ControllerError> {
        Ok(serde_json::from_value(json!({
            "holderIdentity": self.identity,
            "leaseDurationSeconds": LEASE_DURATION.as_secs(),
            "acquireTime": micro(acquired),
            "renewTime": micro(now),
            "leaseTransitions": transitions,
        }))?)
    }

    /// Take or renew the lease once; `Ok(false)` if another replica holds it
    pub async fn try_acquire(&self, now: DateTime<Utc>) -> Result<bool, ControllerError> {
        let Some(mut lease) = self.store.get_opt(LEASE_NAME).await? else {
            let lease = Lease {
                metadata: ObjectMeta {
                    name: Some(LEASE_NAME.to_string()),
                    namespace: Some(self.store.namespace().to_string()),
                    labels: Some(BTreeMap::from([(
                        LABEL_MANAGED_BY.to_string(),
                        MANAGED_BY_VALUE.to_string(),
                    )])),
                    ..Default::default()
                },
                spec: Some(self.spec(now, now, 0)?),
            };
            return match self.store.create(&lease).await {
                Ok(_) => {
                    info!("Created lease {} held by {}", LEASE_NAME, self.identity);
                    Ok(true)
                }
                Err(StoreError::AlreadyExists { .. }) => Ok(false),
                Err(e) => Err(e.into()),
            };
        };

        let holder = Holder::from_lease(&lease)?;
        let mine = holder.identity.as_deref() == Some(self.identity.as_str());
        if !mine && holder.identity.is_some() && !holder.is_expired(now) {
            debug!(
                "Lease {} held by {}",
                LEASE_NAME,
                holder.identity.as_deref().unwrap_or_default()
            );
            return Ok(false);
        }

        let (acquired, transitions) = if mine {
            (holder.acquire_time.unwrap_or(now), holder.transitions)
        } else {
            (now, holder.transitions.saturating_add(1))
        };
        lease.spec = Some(self.spec(acquired, now, transitions)?);

        match self.store.replace(&lease).await {
            Ok(_) => {
                if !mine {
                    info!(
                        "Took over lease {} from {}",
                        LEASE_NAME,
                        holder.identity.as_deref().unwrap_or("nobody")
                    );
                }
                Ok(true)
            }
            Err(e) if e.is_conflict() || e.is_not_found() => {
                debug!("Lost race for lease {}: {}", LEASE_NAME, e);
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Block until this replica holds the lease
    pub async fn acquire(&self) {
        info!("Waiting for leadership as {}", self.identity);
        loop {
            match self.try_acquire(Utc::now()).await {
                Ok(true) => {
                    info!("Acquired leadership as {}", self.identity);
                    return;
                }
                Ok(false) => {}
                Err(e) => warn!("Failed to acquire lease {}: {}", LEASE_NAME, e),
            }
            tokio::time::sleep(RENEW_INTERVAL).await;
        }
    }

    /// Keep renewing; returns an error once leadership is lost
    pub async fn hold(&self) -> Result<(), ControllerError> {
        let mut last_renew = Utc::now();
        loop {
            tokio::time::sleep(RENEW_INTERVAL).await;
            let now = Utc::now();
            match self.try_acquire(now).await {
                Ok(true) => last_renew = now,
                Ok(false) => {
                    return Err(ControllerError::Leadership(format!(
                        "lease {LEASE_NAME} taken over by another replica"
                    )));
                }
                Err(e) => {
                    let since = (now - last_renew).to_std().unwrap_or_default();
                    if since > LEASE_DURATION {
                        return Err(ControllerError::Leadership(format!(
                            "lease {LEASE_NAME} not renewed for {since:?}: {e}"
                        )));
                    }
                    warn!("Failed to renew lease {}: {}", LEASE_NAME, e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use state_store::MockStore;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn holder(store: &MockStore<Lease>) -> Holder {
        Holder::from_lease(&store.peek(LEASE_NAME).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_first_replica_creates_lease() {
        let store = MockStore::<Lease>::new("default");
        let a = LeaderElector::new(Arc::new(store.clone()), "a");

        assert!(a.try_acquire(t0()).await.unwrap());
        let h = holder(&store);
        assert_eq!(h.identity.as_deref(), Some("a"));
        assert_eq!(h.renew_time, Some(t0()));
        assert_eq!(h.duration_seconds, 15);
        assert_eq!(h.transitions, 0);
    }

    #[tokio::test]
    async fn test_takeover_only_after_expiry() {
        let store = MockStore::<Lease>::new("default");
        let a = LeaderElector::new(Arc::new(store.clone()), "a");
        let b = LeaderElector::new(Arc::new(store.clone()), "b");

        assert!(a.try_acquire(t0()).await.unwrap());
        assert!(!b.try_acquire(t0() + chrono::Duration::seconds(5)).await.unwrap());

        assert!(a.try_acquire(t0() + chrono::Duration::seconds(5)).await.unwrap());
        let h = holder(&store);
        assert_eq!(h.acquire_time, Some(t0()));
        assert_eq!(h.transitions, 0);

        let later = t0() + chrono::Duration::seconds(21);
        assert!(b.try_acquire(later).await.unwrap());
        let h = holder(&store);
        assert_eq!(h.identity.as_deref(), Some("b"));
        assert_eq!(h.acquire_time, Some(later));
        assert_eq!(h.transitions, 1);

        assert!(!a.try_acquire(later).await.unwrap());
    }

    #[tokio::test]
    async fn test_conflict_loses_the_race() {
        let store = MockStore::<Lease>::new("default");
        let a = LeaderElector::new(Arc::new(store.clone()), "a");
        assert!(a.try_acquire(t0()).await.unwrap());

        store.inject_conflicts(1);
        assert!(!a.try_acquire(t0() + chrono::Duration::seconds(5)).await.unwrap());
        assert!(a.try_acquire(t0() + chrono::Duration::seconds(10)).await.unwrap());
    }

    #[test]
    fn test_micro_time_format() {
        assert_eq!(micro(t0()), "2024-06-01T12:00:00.000000Z");
        assert_eq!(parse_time(&json!(micro(t0()))), Some(t0()));
    }
}
