//! Main controller implementation.
//!
//! This module contains the `Controller` struct that wires the store, the
//! reconciler, leader election, the probe server and the watchers together.
//! Watchers only start once this replica holds the leader lease and the
//! built-in switch profiles are in place.

use crate::config::FabricConfig;
use crate::error::ControllerError;
use crate::leader::LeaderElector;
use crate::metrics::ReconcileMetrics;
use crate::probes::{self, ProbeState};
use crate::reconciler::switch_profile::{PROFILE_SYNC_ATTEMPTS, PROFILE_SYNC_INTERVAL};
use crate::reconciler::{Reconciler, Stores};
use crate::watcher::Watcher;
use k8s_openapi::api::coordination::v1::Lease;
use kube::Client;
use state_store::KubeStore;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

type Task = JoinHandle<Result<(), ControllerError>>;

/// Main controller for the fabric.
pub struct Controller {
    probe_server: Task,
    leadership: Task,
    switch_watcher: Task,
    vpc_watcher: Task,
    connection_watcher: Task,
    switch_profile_watcher: Task,
    gateway_vpc_watcher: Task,
    gateway_external_watcher: Task,
}

impl Controller {
    /// Creates a new controller instance.
    ///
    /// Blocks until leadership is acquired.
    pub async fn new(
        config: FabricConfig,
        namespace: String,
        probe_addr: SocketAddr,
        identity: String,
    ) -> Result<Self, ControllerError> {
        info!("Initializing Fabric Controller");

        let client = Client::try_default().await?;

        let metrics = ReconcileMetrics::new()?;
        let probe_state = ProbeState::new(metrics.clone());
        let probe_server = {
            let state = probe_state.clone();
            tokio::spawn(async move { probes::serve(probe_addr, state).await })
        };

        let stores = Stores::kube(&client, &namespace);
        let reconciler = Arc::new(Reconciler::new(stores, config, metrics)?);

        let leader = Arc::new(LeaderElector::new(
            Arc::new(KubeStore::<Lease>::new(client.clone(), &namespace)),
            identity,
        ));
        leader.acquire().await;
        let leadership = {
            let leader = Arc::clone(&leader);
            tokio::spawn(async move { leader.hold().await })
        };

        reconciler
            .ensure_switch_profiles_with_retry(PROFILE_SYNC_ATTEMPTS, PROFILE_SYNC_INTERVAL)
            .await?;

        let watcher_instance = Watcher::new(Arc::clone(&reconciler), client, namespace);

        let switch_watcher = {
            let watcher = watcher_instance.clone();
            tokio::spawn(async move { watcher.watch_switches().await })
        };
        let vpc_watcher = {
            let watcher = watcher_instance.clone();
            tokio::spawn(async move { watcher.watch_vpcs().await })
        };
        let connection_watcher = {
            let watcher = watcher_instance.clone();
            tokio::spawn(async move { watcher.watch_connections().await })
        };
        let switch_profile_watcher = {
            let watcher = watcher_instance.clone();
            tokio::spawn(async move { watcher.watch_switch_profiles().await })
        };
        let gateway_vpc_watcher = {
            let watcher = watcher_instance.clone();
            tokio::spawn(async move { watcher.watch_gateway_vpcs().await })
        };
        let gateway_external_watcher = {
            let watcher = watcher_instance;
            tokio::spawn(async move { watcher.watch_gateway_externals().await })
        };

        probe_state.set_ready(true);

        Ok(Self {
            probe_server,
            leadership,
            switch_watcher,
            vpc_watcher,
            connection_watcher,
            switch_profile_watcher,
            gateway_vpc_watcher,
            gateway_external_watcher,
        })
    }

    /// Runs until a watcher, the probe server or leadership fails.
    pub async fn run(mut self) -> Result<(), ControllerError> {
        info!("Fabric Controller running");

        let (name, result) = tokio::select! {
            result = &mut self.switch_watcher => ("Switch watcher", result),
            result = &mut self.vpc_watcher => ("VPC watcher", result),
            result = &mut self.connection_watcher => ("Connection watcher", result),
            result = &mut self.switch_profile_watcher => ("SwitchProfile watcher", result),
            result = &mut self.gateway_vpc_watcher => ("Gateway VPC watcher", result),
            result = &mut self.gateway_external_watcher => ("Gateway External watcher", result),
            result = &mut self.probe_server => ("Probe server", result),
            result = &mut self.leadership => ("Leader election", result),
        };

        result.map_err(|e| ControllerError::Watch(format!("{name} panicked: {e}")))??;
        Err(ControllerError::Watch(format!("{name} exited")))
    }
}
