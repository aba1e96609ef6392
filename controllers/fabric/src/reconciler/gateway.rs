//! Gateway sync
//!
//! Publishes a `VPCInfo` per VPC (its VNI and subnets) and per External (the
//! prefixes reachable through it) for the upstream gateway.

use super::Reconciler;
use crate::error::ControllerError;
use crate::reconcile_helpers::{is_deleting, managed_labels, owner_ref, upsert};
use crds::labels::LABEL_VPC;
use crds::{external_vpcinfo_name, External, VPCInfo, VPCInfoSpec, VPCInfoSubnet, VPC};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::ResourceExt;
use state_store::LabelSelector;
use std::collections::BTreeMap;
use tracing::info;

/// Subnet name of the synthetic default route of an External
pub const EXTERNAL_DEFAULT_SUBNET: &str = "external";
pub const DEFAULT_ROUTE: &str = "0.0.0.0/0";

/// VPCInfo subnet name for an external prefix, "10.1.0.0/16" -> "10-1-0-0-16"
pub fn prefix_subnet_name(prefix: &str) -> String {
    prefix.replace(['.', '/'], "-")
}

impl Reconciler {
    fn vpc_info(
        &self,
        name: String,
        labels: BTreeMap<String, String>,
        owner: OwnerReference,
        spec: VPCInfoSpec,
    ) -> VPCInfo {
        VPCInfo {
            metadata: ObjectMeta {
                name: Some(name),
                namespace: Some(self.stores.namespace().to_string()),
                labels: Some(labels),
                owner_references: Some(vec![owner]),
                ..Default::default()
            },
            spec,
            status: None,
        }
    }

    pub async fn sync_vpc_info(&self, vpc: &VPC) -> Result<(), ControllerError> {
        if is_deleting(vpc) {
            return Ok(());
        }
        let name = vpc.name_any();
        info!("Syncing VPCInfo for VPC {}/{}", self.stores.namespace(), name);

        let vni = self.librarian.vpc_vni(&name).await?;
        let mut subnets = BTreeMap::new();
        for (subnet_name, subnet) in &vpc.spec.subnets {
            subnets.insert(
                subnet_name.clone(),
                VPCInfoSubnet {
                    cidr: subnet.cidr()?.to_string(),
                },
            );
        }

        let mut labels = managed_labels();
        labels.insert(LABEL_VPC.to_string(), name.clone());
        let info = self.vpc_info(name, labels, owner_ref(vpc, false)?, VPCInfoSpec { subnets, vni });
        upsert(self.stores.vpc_infos.as_ref(), &info).await?;
        Ok(())
    }

    pub async fn sync_external_info(&self, external: &External) -> Result<(), ControllerError> {
        if is_deleting(external) {
            return Ok(());
        }
        let name = external.name_any();
        info!("Syncing VPCInfo for External {}/{}", self.stores.namespace(), name);

        let mut subnets = BTreeMap::new();
        if self.config.gateway.external_default_route {
            subnets.insert(
                EXTERNAL_DEFAULT_SUBNET.to_string(),
                VPCInfoSubnet {
                    cidr: DEFAULT_ROUTE.to_string(),
                },
            );
        } else {
            let peerings = self
                .stores
                .external_peerings
                .list(&LabelSelector::everything())
                .await?;
            for peering in peerings.iter().filter(|p| p.spec.permit.external.name == name) {
                for prefix in &peering.spec.permit.external.prefixes {
                    subnets.insert(
                        prefix_subnet_name(&prefix.prefix),
                        VPCInfoSubnet {
                            cidr: prefix.prefix.clone(),
                        },
                    );
                }
            }
        }

        let info = self.vpc_info(
            external_vpcinfo_name(&name),
            managed_labels(),
            owner_ref(external, false)?,
            VPCInfoSpec { subnets, vni: 0 },
        );
        upsert(self.stores.vpc_infos.as_ref(), &info).await?;
        Ok(())
    }
}

#[cfg(test)]
mod gateway_test;
