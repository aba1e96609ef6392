//! Reconciliation logic for fabric CRDs.
//!
//! This module is organized by the object a reconcile is keyed on:
//! - `agent`: one Agent per Switch, plus its agent infra (`agent_infra`)
//! - `vpc`: VPC catalog refresh and DHCPSubnet derivation
//! - `connection`: label defaulting and the connection catalog
//! - `switch_profile`: built-in switch profiles
//! - `gateway`: VPCInfo objects for VPCs and Externals

pub mod agent;
pub mod agent_infra;
pub mod connection;
pub mod gateway;
pub mod switch_profile;
pub mod vpc;

use crate::backoff::ExponentialBackoff;
use crate::config::FabricConfig;
use crate::error::ControllerError;
use crate::metrics::ReconcileMetrics;
use crds::{
    Agent, Catalog, Connection, DHCPSubnet, External, ExternalAttachment, ExternalPeering,
    IPv4Namespace, Switch, SwitchProfile, VLANNamespace, VPCAttachment, VPCInfo, VPCPeering, VPC,
};
use ipnet::Ipv4Net;
use k8s_openapi::api::core::v1::{Secret, ServiceAccount};
use k8s_openapi::api::rbac::v1::{Role, RoleBinding};
use kube::Client;
use librarian::Librarian;
use state_store::{KubeStore, ObjectStore};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::warn;

/// Backoff state for a resource
#[derive(Debug, Clone, Default)]
struct BackoffState {
    backoff: ExponentialBackoff,
    error_count: u32,
}

impl BackoffState {
    fn increment_error(&mut self) {
        self.error_count += 1;
    }

    fn reset(&mut self) {
        self.error_count = 0;
        self.backoff.reset();
    }
}

/// Typed stores for every kind the reconcilers read or write
#[derive(Clone)]
pub struct Stores {
    pub switches: Arc<dyn ObjectStore<Switch>>,
    pub switch_profiles: Arc<dyn ObjectStore<SwitchProfile>>,
    pub connections: Arc<dyn ObjectStore<Connection>>,
    pub vlan_namespaces: Arc<dyn ObjectStore<VLANNamespace>>,
    pub ipv4_namespaces: Arc<dyn ObjectStore<IPv4Namespace>>,
    pub vpcs: Arc<dyn ObjectStore<VPC>>,
    pub vpc_attachments: Arc<dyn ObjectStore<VPCAttachment>>,
    pub vpc_peerings: Arc<dyn ObjectStore<VPCPeering>>,
    pub externals: Arc<dyn ObjectStore<External>>,
    pub external_attachments: Arc<dyn ObjectStore<ExternalAttachment>>,
    pub external_peerings: Arc<dyn ObjectStore<ExternalPeering>>,
    pub agents: Arc<dyn ObjectStore<Agent>>,
    pub catalogs: Arc<dyn ObjectStore<Catalog>>,
    pub dhcp_subnets: Arc<dyn ObjectStore<DHCPSubnet>>,
    pub vpc_infos: Arc<dyn ObjectStore<VPCInfo>>,
    pub service_accounts: Arc<dyn ObjectStore<ServiceAccount>>,
    pub roles: Arc<dyn ObjectStore<Role>>,
    pub role_bindings: Arc<dyn ObjectStore<RoleBinding>>,
    pub secrets: Arc<dyn ObjectStore<Secret>>,
}

impl Stores {
    /// API server backed stores in namespace `ns`
    pub fn kube(client: &Client, ns: &str) -> Self {
        Self {
            switches: Arc::new(KubeStore::<Switch>::new(client.clone(), ns)),
            switch_profiles: Arc::new(KubeStore::<SwitchProfile>::new(client.clone(), ns)),
            connections: Arc::new(KubeStore::<Connection>::new(client.clone(), ns)),
            vlan_namespaces: Arc::new(KubeStore::<VLANNamespace>::new(client.clone(), ns)),
            ipv4_namespaces: Arc::new(KubeStore::<IPv4Namespace>::new(client.clone(), ns)),
            vpcs: Arc::new(KubeStore::<VPC>::new(client.clone(), ns)),
            vpc_attachments: Arc::new(KubeStore::<VPCAttachment>::new(client.clone(), ns)),
            vpc_peerings: Arc::new(KubeStore::<VPCPeering>::new(client.clone(), ns)),
            externals: Arc::new(KubeStore::<External>::new(client.clone(), ns)),
            external_attachments: Arc::new(KubeStore::<ExternalAttachment>::new(client.clone(), ns)),
            external_peerings: Arc::new(KubeStore::<ExternalPeering>::new(client.clone(), ns)),
            agents: Arc::new(KubeStore::<Agent>::new(client.clone(), ns)),
            catalogs: Arc::new(KubeStore::<Catalog>::new(client.clone(), ns)),
            dhcp_subnets: Arc::new(KubeStore::<DHCPSubnet>::new(client.clone(), ns)),
            vpc_infos: Arc::new(KubeStore::<VPCInfo>::new(client.clone(), ns)),
            service_accounts: Arc::new(KubeStore::<ServiceAccount>::new(client.clone(), ns)),
            roles: Arc::new(KubeStore::<Role>::new(client.clone(), ns)),
            role_bindings: Arc::new(KubeStore::<RoleBinding>::new(client.clone(), ns)),
            secrets: Arc::new(KubeStore::<Secret>::new(client.clone(), ns)),
        }
    }

    pub fn namespace(&self) -> &str {
        self.switches.namespace()
    }
}

/// Reconciles fabric resources.
pub struct Reconciler {
    pub(crate) stores: Stores,
    pub(crate) librarian: Librarian,
    pub(crate) config: FabricConfig,
    /// Parsed `config.reserved_subnets`
    pub(crate) reserved: Vec<Ipv4Net>,
    pub(crate) metrics: ReconcileMetrics,
    /// Error count tracking per resource (kind/namespace/name -> BackoffState)
    backoff_states: Arc<Mutex<HashMap<String, BackoffState>>>,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("namespace", &self.stores.namespace())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    /// Creates a new reconciler instance.
    pub fn new(
        stores: Stores,
        config: FabricConfig,
        metrics: ReconcileMetrics,
    ) -> Result<Self, ControllerError> {
        config.validate()?;
        let reserved = config.reserved_cidrs()?;
        let librarian = Librarian::new(
            Arc::clone(&stores.catalogs),
            Arc::clone(&stores.connections),
            Arc::clone(&stores.vpcs),
            config.librarian_config(),
        );
        Ok(Self {
            stores,
            librarian,
            config,
            reserved,
            metrics,
            backoff_states: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    pub fn metrics(&self) -> &ReconcileMetrics {
        &self.metrics
    }

    /// Next requeue delay for a failing resource and its error count
    pub fn get_backoff_for_resource(&self, resource_key: &str) -> (Duration, u32) {
        match self.backoff_states.lock() {
            Ok(mut states) => {
                let state = states.entry(resource_key.to_string()).or_default();
                (state.backoff.next_backoff(), state.error_count)
            }
            Err(e) => {
                warn!("Failed to lock backoff_states: {}, using default backoff", e);
                (Duration::from_secs(crate::backoff::DEFAULT_MIN_SECONDS), 0)
            }
        }
    }

    /// Increment error count for a resource
    pub fn increment_error(&self, resource_key: &str) {
        if let Ok(mut states) = self.backoff_states.lock() {
            states
                .entry(resource_key.to_string())
                .or_default()
                .increment_error();
        }
    }

    /// Reset error count for a resource (on successful reconciliation)
    pub fn reset_error(&self, resource_key: &str) {
        if let Ok(mut states) = self.backoff_states.lock()
            && let Some(state) = states.get_mut(resource_key)
        {
            state.reset();
        }
    }
}
