//! Connection reconciler
//!
//! Keeps the connection labels that every selector query relies on in place
//! and refreshes the connection catalog (ESLAG connection IDs).

use super::Reconciler;
use crate::error::ControllerError;
use crds::Connection;
use kube::ResourceExt;
use tracing::{debug, info};

impl Reconciler {
    pub async fn reconcile_connection(&self, conn: &Connection) -> Result<(), ControllerError> {
        let name = conn.name_any();
        let ns = self.stores.namespace();
        info!("Reconciling Connection {}/{}", ns, name);

        conn.spec.validate()?;

        let defaults = conn.spec.default_labels()?;
        let labels = conn.labels();
        let missing = defaults
            .iter()
            .any(|(k, v)| labels.get(k) != Some(v));
        if missing {
            let mut labeled = conn.clone();
            labeled.labels_mut().extend(defaults);
            self.stores.connections.replace(&labeled).await?;
            info!("Set default labels on Connection {}/{}", ns, name);
        } else {
            debug!("Connection {}/{} labels are up-to-date", ns, name);
        }

        self.librarian.update_connections().await?;
        Ok(())
    }

    /// Release what a deleted connection held in the connection catalog
    pub async fn reconcile_connection_deleted(&self, conn: &Connection) -> Result<(), ControllerError> {
        info!(
            "Connection {}/{} deleted, refreshing connection catalog",
            self.stores.namespace(),
            conn.name_any()
        );
        self.librarian.update_connections().await?;
        Ok(())
    }

    /// Reconcile the stored copy of a connection, or its deletion if it is gone
    ///
    /// Failed watch events are retried through here so the retry never works
    /// on the stale object the event carried.
    pub async fn reconcile_connection_by_name(&self, name: &str) -> Result<(), ControllerError> {
        match self.stores.connections.get_opt(name).await? {
            Some(conn) => self.reconcile_connection(&conn).await,
            None => {
                info!(
                    "Connection {}/{} is gone, refreshing connection catalog",
                    self.stores.namespace(),
                    name
                );
                self.librarian.update_connections().await?;
                Ok(())
            }
        }
    }
}
