//! Kubernetes resource watchers.
//!
//! Every reconciler except the connection one runs under a
//! `kube_runtime::Controller` through the generic `watch_resource()` helper,
//! which adds per-object exponential backoff, metrics and logging. Related
//! kinds are mapped onto the reconciled kind with `watches`.
//!
//! Connections are consumed from a raw watcher stream so that deletions are
//! seen as events and release their catalog entries. Failed connection events
//! are requeued by name on the same per-object backoff.

use crate::error::ControllerError;
use crate::metrics::{RESULT_ERROR, RESULT_SUCCESS};
use crate::reconciler::Reconciler;
use crds::labels::{LABEL_AGENT_SWITCH, LABEL_VPC};
use crds::{
    Agent, Catalog, Connection, DHCPSubnet, External, ExternalAttachment, ExternalPeering,
    IPv4Namespace, Switch, SwitchProfile, VLANNamespace, VPCAttachment, VPCPeering, VPC,
};
use futures::StreamExt;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::NamespaceResourceScope;
use kube::{Api, Client, Resource, ResourceExt};
use kube_runtime::controller::{Action, Config as ControllerConfig};
use kube_runtime::reflector::{ObjectRef, Store};
use kube_runtime::{watcher, Controller, WatchStreamExt};
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Boxed reconcile future
type ReconcileFuture = Pin<Box<dyn Future<Output = Result<Action, ControllerError>> + Send>>;

/// Backoff and log key of an object
fn resource_key<K: Resource<DynamicType = ()>>(obj: &K) -> String {
    format!(
        "{}/{}/{}",
        K::kind(&()),
        obj.namespace().unwrap_or_default(),
        obj.name_any()
    )
}

/// Map any event onto every object in `store`
fn all_of<O, K>(store: Store<K>) -> impl Fn(O) -> Vec<ObjectRef<K>> + Send + Sync + Clone + 'static
where
    K: Resource<DynamicType = ()> + Clone + Send + Sync + 'static,
{
    move |_| {
        store
            .state()
            .iter()
            .map(|obj| ObjectRef::from_obj(obj.as_ref()))
            .collect()
    }
}

/// Generic watcher helper that runs a reconcile function under a Controller.
///
/// Errors the object has to change to fix are not retried; every other
/// error requeues the object with its own exponential backoff, reset on the
/// next success.
async fn watch_resource<K, F>(
    controller: Controller<K>,
    reconciler: Arc<Reconciler>,
    reconcile_fn: F,
    resource_name: &'static str,
) -> Result<(), ControllerError>
where
    K: Resource<DynamicType = ()> + Clone + Send + Sync + 'static + Debug + DeserializeOwned,
    F: Fn(Arc<Reconciler>, Arc<K>) -> ReconcileFuture + Send + Sync + Clone + 'static,
{
    info!("Starting {} watcher", resource_name);

    let error_policy = move |obj: Arc<K>, error: &ControllerError, ctx: Arc<Reconciler>| {
        let key = resource_key(obj.as_ref());
        if error.is_permanent() {
            warn!("Not retrying {} until it changes: {}", key, error);
            return Action::await_change();
        }
        ctx.increment_error(&key);
        let (delay, count) = ctx.get_backoff_for_resource(&key);
        error!(
            "Reconciliation error for {} (attempt {}), retrying in {:?}: {}",
            key, count, delay, error
        );
        Action::requeue(delay)
    };

    let reconcile = move |obj: Arc<K>, ctx: Arc<Reconciler>| {
        let reconcile_fn = reconcile_fn.clone();
        async move {
            let key = resource_key(obj.as_ref());
            debug!("Reconciling {}", key);
            let start = Instant::now();
            let result = reconcile_fn(Arc::clone(&ctx), obj).await;
            match &result {
                Ok(_) => {
                    ctx.metrics().observe(resource_name, RESULT_SUCCESS, start.elapsed());
                    ctx.reset_error(&key);
                }
                Err(e) => {
                    ctx.metrics().observe(resource_name, RESULT_ERROR, start.elapsed());
                    debug!("Reconciliation failed for {}: {} ({})", key, e, e.kind());
                }
            }
            result
        }
    };

    // Debounce batches bursts of related events (a catalog write per switch)
    let controller_config = ControllerConfig::default()
        .debounce(Duration::from_secs(1))
        .concurrency(3);

    controller
        .with_config(controller_config)
        .run(reconcile, error_policy, reconciler)
        .for_each(|res| async move {
            if let Err(e) = res {
                debug!("Controller error for {}: {}", resource_name, e);
            }
        })
        .await;

    Err(ControllerError::Watch(format!("{resource_name} controller stopped")))
}

/// Watches fabric resources and drives the reconcilers.
#[derive(Clone)]
pub struct Watcher {
    reconciler: Arc<Reconciler>,
    client: Client,
    namespace: String,
}

impl Watcher {
    pub fn new(reconciler: Arc<Reconciler>, client: Client, namespace: impl Into<String>) -> Self {
        Self {
            reconciler,
            client,
            namespace: namespace.into(),
        }
    }

    fn api<K>(&self) -> Api<K>
    where
        K: Resource<Scope = NamespaceResourceScope>,
        K::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    /// Switches, reconciled into Agents
    pub async fn watch_switches(&self) -> Result<(), ControllerError> {
        let cfg = watcher::Config::default;
        let controller = Controller::new(self.api::<Switch>(), cfg());
        let switches = controller.store();

        let ns = self.namespace.clone();
        let by_connection = move |conn: Connection| {
            conn.spec
                .endpoints()
                .map(|ep| ep.switches.into_iter().collect::<Vec<_>>())
                .unwrap_or_default()
                .into_iter()
                .map(|s| ObjectRef::<Switch>::new(&s).within(&ns))
                .collect::<Vec<_>>()
        };
        let profile_users = switches.clone();
        let by_profile = move |profile: SwitchProfile| {
            let name = profile.name_any();
            profile_users
                .state()
                .iter()
                .filter(|s| s.spec.profile == name)
                .map(|s| ObjectRef::from_obj(s.as_ref()))
                .collect::<Vec<_>>()
        };

        let controller = controller
            .owns(self.api::<Agent>(), cfg())
            .owns(self.api::<Secret>(), cfg().labels(LABEL_AGENT_SWITCH))
            .watches(self.api::<Connection>(), cfg(), by_connection)
            .watches(self.api::<SwitchProfile>(), cfg(), by_profile)
            .watches(self.api::<VPC>(), cfg(), all_of::<VPC, _>(switches.clone()))
            .watches(self.api::<VPCAttachment>(), cfg(), all_of::<VPCAttachment, _>(switches.clone()))
            .watches(self.api::<VPCPeering>(), cfg(), all_of::<VPCPeering, _>(switches.clone()))
            .watches(self.api::<External>(), cfg(), all_of::<External, _>(switches.clone()))
            .watches(self.api::<ExternalAttachment>(), cfg(), all_of::<ExternalAttachment, _>(switches.clone()))
            .watches(self.api::<ExternalPeering>(), cfg(), all_of::<ExternalPeering, _>(switches.clone()))
            .watches(self.api::<IPv4Namespace>(), cfg(), all_of::<IPv4Namespace, _>(switches.clone()))
            .watches(self.api::<VLANNamespace>(), cfg(), all_of::<VLANNamespace, _>(switches.clone()))
            .watches(self.api::<Catalog>(), cfg(), all_of::<Catalog, _>(switches));

        watch_resource(
            controller,
            Arc::clone(&self.reconciler),
            |reconciler, switch: Arc<Switch>| {
                Box::pin(async move { reconciler.reconcile_switch(&switch).await })
            },
            "agent",
        )
        .await
    }

    /// VPCs, reconciled into DHCPSubnets
    pub async fn watch_vpcs(&self) -> Result<(), ControllerError> {
        let cfg = watcher::Config::default;
        let controller = Controller::new(self.api::<VPC>(), cfg());
        let vpcs = controller.store();

        let ns = self.namespace.clone();
        let by_label = move |subnet: DHCPSubnet| {
            subnet
                .labels()
                .get(LABEL_VPC)
                .map(|vpc| ObjectRef::<VPC>::new(vpc).within(&ns))
        };
        // Any switch change refreshes one VPC, which rewrites the DHCP subnet list
        let any_vpc = move |_: Switch| {
            vpcs.state()
                .first()
                .map(|vpc| ObjectRef::from_obj(vpc.as_ref()))
        };

        let controller = controller
            .watches(self.api::<DHCPSubnet>(), cfg(), by_label)
            .watches(self.api::<Switch>(), cfg(), any_vpc);

        watch_resource(
            controller,
            Arc::clone(&self.reconciler),
            |reconciler, vpc: Arc<VPC>| Box::pin(async move { reconciler.reconcile_vpc(&vpc).await }),
            "vpc",
        )
        .await
    }

    /// Built-in switch profiles
    pub async fn watch_switch_profiles(&self) -> Result<(), ControllerError> {
        let controller = Controller::new(self.api::<SwitchProfile>(), watcher::Config::default());
        watch_resource(
            controller,
            Arc::clone(&self.reconciler),
            |reconciler, profile: Arc<SwitchProfile>| {
                Box::pin(async move {
                    reconciler.reconcile_switch_profile(&profile).await?;
                    Ok(Action::await_change())
                })
            },
            "switch-profile",
        )
        .await
    }

    /// VPCInfo objects of VPCs
    pub async fn watch_gateway_vpcs(&self) -> Result<(), ControllerError> {
        let cfg = watcher::Config::default;
        let controller = Controller::new(self.api::<VPC>(), cfg());
        let vpcs = controller.store();
        // VNIs come from the VPC catalog
        let controller = controller.watches(self.api::<Catalog>(), cfg(), all_of::<Catalog, _>(vpcs));

        watch_resource(
            controller,
            Arc::clone(&self.reconciler),
            |reconciler, vpc: Arc<VPC>| {
                Box::pin(async move {
                    reconciler.sync_vpc_info(&vpc).await?;
                    Ok(Action::await_change())
                })
            },
            "gateway-vpc",
        )
        .await
    }

    /// VPCInfo objects of Externals
    pub async fn watch_gateway_externals(&self) -> Result<(), ControllerError> {
        let cfg = watcher::Config::default;
        let ns = self.namespace.clone();
        let by_peering = move |peering: ExternalPeering| {
            Some(ObjectRef::<External>::new(&peering.spec.permit.external.name).within(&ns))
        };
        let controller = Controller::new(self.api::<External>(), cfg())
            .watches(self.api::<ExternalPeering>(), cfg(), by_peering);

        watch_resource(
            controller,
            Arc::clone(&self.reconciler),
            |reconciler, external: Arc<External>| {
                Box::pin(async move {
                    reconciler.sync_external_info(&external).await?;
                    Ok(Action::await_change())
                })
            },
            "gateway-external",
        )
        .await
    }

    /// Connections, from a raw watch so deletions are seen
    ///
    /// Failed events are retried by name with the per-object backoff; the
    /// retry reconciles whatever the store holds at that point.
    pub async fn watch_connections(&self) -> Result<(), ControllerError> {
        info!("Starting Connection watcher");
        let mut events = watcher(self.api::<Connection>(), watcher::Config::default())
            .default_backoff()
            .boxed();
        let (retry_tx, mut retries) = mpsc::unbounded_channel::<String>();

        loop {
            let start = Instant::now();
            let (name, result) = tokio::select! {
                event = events.next() => match event {
                    Some(Ok(watcher::Event::Apply(conn) | watcher::Event::InitApply(conn))) => {
                        let result = self.reconciler.reconcile_connection(&conn).await;
                        (conn.name_any(), result)
                    }
                    Some(Ok(watcher::Event::Delete(conn))) => {
                        let result = self.reconciler.reconcile_connection_deleted(&conn).await;
                        (conn.name_any(), result)
                    }
                    Some(Ok(watcher::Event::Init | watcher::Event::InitDone)) => continue,
                    Some(Err(e)) => {
                        warn!("Connection watch error: {}", e);
                        continue;
                    }
                    None => break,
                },
                Some(name) = retries.recv() => {
                    let result = self.reconciler.reconcile_connection_by_name(&name).await;
                    (name, result)
                }
            };

            let metrics = self.reconciler.metrics();
            let key = format!("{}/{}/{}", Connection::kind(&()), self.namespace, name);
            match result {
                Ok(()) => {
                    metrics.observe("connection", RESULT_SUCCESS, start.elapsed());
                    self.reconciler.reset_error(&key);
                }
                Err(e) if e.is_permanent() => {
                    metrics.observe("connection", RESULT_ERROR, start.elapsed());
                    warn!("Invalid {}: {}", key, e);
                }
                Err(e) => {
                    metrics.observe("connection", RESULT_ERROR, start.elapsed());
                    self.reconciler.increment_error(&key);
                    let (delay, count) = self.reconciler.get_backoff_for_resource(&key);
                    error!(
                        "Reconciliation error for {} (attempt {}), retrying in {:?}: {}",
                        key, count, delay, e
                    );
                    let retry_tx = retry_tx.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        let _ = retry_tx.send(name);
                    });
                }
            }
        }

        Err(ControllerError::Watch("Connection watch stream ended".to_string()))
    }
}
