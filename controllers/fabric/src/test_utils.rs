//! Test utilities for unit testing reconcilers
//!
//! `MockStores` holds one in-memory store per kind so a test can seed
//! objects, run a reconcile and then inspect what was written. The
//! `create_test_*` helpers build minimal valid fabric objects.

use crate::config::FabricConfig;
use crate::metrics::ReconcileMetrics;
use crate::reconciler::{Reconciler, Stores};
use crds::*;
use k8s_openapi::api::core::v1::{Secret, ServiceAccount};
use k8s_openapi::api::rbac::v1::{Role, RoleBinding};
use k8s_openapi::ByteString;
use kube::Resource;
use serde::de::DeserializeOwned;
use serde::Serialize;
use state_store::MockStore;
use std::collections::BTreeMap;
use std::sync::Arc;

pub const TEST_NAMESPACE: &str = "default";

/// One mock store per kind the reconcilers touch
#[derive(Debug, Clone)]
pub struct MockStores {
    pub switches: MockStore<Switch>,
    pub switch_profiles: MockStore<SwitchProfile>,
    pub connections: MockStore<Connection>,
    pub vlan_namespaces: MockStore<VLANNamespace>,
    pub ipv4_namespaces: MockStore<IPv4Namespace>,
    pub vpcs: MockStore<VPC>,
    pub vpc_attachments: MockStore<VPCAttachment>,
    pub vpc_peerings: MockStore<VPCPeering>,
    pub externals: MockStore<External>,
    pub external_attachments: MockStore<ExternalAttachment>,
    pub external_peerings: MockStore<ExternalPeering>,
    pub agents: MockStore<Agent>,
    pub catalogs: MockStore<Catalog>,
    pub dhcp_subnets: MockStore<DHCPSubnet>,
    pub vpc_infos: MockStore<VPCInfo>,
    pub service_accounts: MockStore<ServiceAccount>,
    pub roles: MockStore<Role>,
    pub role_bindings: MockStore<RoleBinding>,
    pub secrets: MockStore<Secret>,
}

impl MockStores {
    pub fn new() -> Self {
        let switches = MockStore::new(TEST_NAMESPACE);
        Self {
            switch_profiles: MockStore::sharing_versions_with(&switches),
            connections: MockStore::sharing_versions_with(&switches),
            vlan_namespaces: MockStore::sharing_versions_with(&switches),
            ipv4_namespaces: MockStore::sharing_versions_with(&switches),
            vpcs: MockStore::sharing_versions_with(&switches),
            vpc_attachments: MockStore::sharing_versions_with(&switches),
            vpc_peerings: MockStore::sharing_versions_with(&switches),
            externals: MockStore::sharing_versions_with(&switches),
            external_attachments: MockStore::sharing_versions_with(&switches),
            external_peerings: MockStore::sharing_versions_with(&switches),
            agents: MockStore::sharing_versions_with(&switches),
            catalogs: MockStore::sharing_versions_with(&switches),
            dhcp_subnets: MockStore::sharing_versions_with(&switches),
            vpc_infos: MockStore::sharing_versions_with(&switches),
            service_accounts: MockStore::sharing_versions_with(&switches),
            roles: MockStore::sharing_versions_with(&switches),
            role_bindings: MockStore::sharing_versions_with(&switches),
            secrets: MockStore::sharing_versions_with(&switches),
            switches,
        }
    }

    pub fn stores(&self) -> Stores {
        Stores {
            switches: Arc::new(self.switches.clone()),
            switch_profiles: Arc::new(self.switch_profiles.clone()),
            connections: Arc::new(self.connections.clone()),
            vlan_namespaces: Arc::new(self.vlan_namespaces.clone()),
            ipv4_namespaces: Arc::new(self.ipv4_namespaces.clone()),
            vpcs: Arc::new(self.vpcs.clone()),
            vpc_attachments: Arc::new(self.vpc_attachments.clone()),
            vpc_peerings: Arc::new(self.vpc_peerings.clone()),
            externals: Arc::new(self.externals.clone()),
            external_attachments: Arc::new(self.external_attachments.clone()),
            external_peerings: Arc::new(self.external_peerings.clone()),
            agents: Arc::new(self.agents.clone()),
            catalogs: Arc::new(self.catalogs.clone()),
            dhcp_subnets: Arc::new(self.dhcp_subnets.clone()),
            vpc_infos: Arc::new(self.vpc_infos.clone()),
            service_accounts: Arc::new(self.service_accounts.clone()),
            roles: Arc::new(self.roles.clone()),
            role_bindings: Arc::new(self.role_bindings.clone()),
            secrets: Arc::new(self.secrets.clone()),
        }
    }

    pub fn reconciler(&self, config: FabricConfig) -> Reconciler {
        Reconciler::new(self.stores(), config, ReconcileMetrics::new().unwrap()).unwrap()
    }

    /// Seed the "default" IPv4 and VLAN namespaces
    pub fn seed_default_namespaces(&self) {
        self.ipv4_namespaces.seed(IPv4Namespace::new(
            DEFAULT_NAMESPACE,
            IPv4NamespaceSpec {
                subnets: vec!["10.0.0.0/16".to_string()],
            },
        ));
        self.vlan_namespaces.seed(VLANNamespace::new(
            DEFAULT_NAMESPACE,
            VLANNamespaceSpec {
                ranges: vec![VLANRange::new(1000, 2999)],
            },
        ));
    }

    /// Fill in the token secret of a switch the way the API server would
    pub fn populate_token(&self, switch: &str) {
        let name = crate::reconciler::agent_infra::token_secret_name(switch);
        let mut secret = self.secrets.peek(&name).unwrap();
        secret.data = Some(BTreeMap::from([
            ("ca.crt".to_string(), ByteString(b"test-ca".to_vec())),
            ("token".to_string(), ByteString(b"test-token".to_vec())),
            ("namespace".to_string(), ByteString(TEST_NAMESPACE.as_bytes().to_vec())),
        ]));
        self.secrets.seed(secret);
    }
}

/// Leaf switch with addressing valid for a spine-leaf fabric
pub fn create_test_leaf(name: &str, index: u8) -> Switch {
    Switch::new(
        name,
        SwitchSpec {
            role: SwitchRole::ServerLeaf,
            vlan_namespaces: vec![DEFAULT_NAMESPACE.to_string()],
            asn: 65100,
            protocol_ip: format!("172.30.8.{index}/32"),
            vtep_ip: Some(format!("172.30.12.{index}/32")),
            ..Default::default()
        },
    )
}

/// Leaf switch that is a member of MCLAG group `group`
pub fn create_test_mclag_leaf(name: &str, index: u8, group: &str) -> Switch {
    let mut switch = create_test_leaf(name, index);
    switch.spec.redundancy = SwitchRedundancy {
        group: Some(group.to_string()),
        redundancy_type: RedundancyType::Mclag,
    };
    switch
}

pub fn create_test_spine(name: &str, index: u8) -> Switch {
    Switch::new(
        name,
        SwitchSpec {
            role: SwitchRole::Spine,
            vlan_namespaces: vec![DEFAULT_NAMESPACE.to_string()],
            asn: 65000,
            protocol_ip: format!("172.30.8.{}/32", 100 + u16::from(index)),
            ..Default::default()
        },
    )
}

/// Connection carrying its default labels
pub fn create_test_connection(name: &str, spec: ConnectionSpec) -> Connection {
    let mut conn = Connection::new(name, spec);
    conn.metadata.labels = Some(conn.spec.default_labels().unwrap());
    conn
}

pub fn server_link(server_port: &str, switch_port: &str) -> ServerToSwitchLink {
    ServerToSwitchLink {
        server: BasePortName::new(server_port),
        switch: BasePortName::new(switch_port),
    }
}

pub fn switch_link(port1: &str, port2: &str) -> SwitchToSwitchLink {
    SwitchToSwitchLink {
        switch1: BasePortName::new(port1),
        switch2: BasePortName::new(port2),
    }
}

pub fn create_test_unbundled(name: &str, server_port: &str, switch_port: &str) -> Connection {
    create_test_connection(
        name,
        ConnectionSpec {
            unbundled: Some(ConnUnbundled {
                link: server_link(server_port, switch_port),
                mtu: None,
            }),
            ..Default::default()
        },
    )
}

/// MCLAG server connection over one port on each of two switches
pub fn create_test_mclag(name: &str, server: &str, switch1: &str, switch2: &str, port: &str) -> Connection {
    create_test_connection(
        name,
        ConnectionSpec {
            mclag: Some(ConnMCLAG {
                links: vec![
                    server_link(&format!("{server}/enp2s1"), &format!("{switch1}/{port}")),
                    server_link(&format!("{server}/enp2s2"), &format!("{switch2}/{port}")),
                ],
                ..Default::default()
            }),
            ..Default::default()
        },
    )
}

pub fn create_test_mclag_domain(name: &str, switch1: &str, switch2: &str) -> Connection {
    create_test_connection(
        name,
        ConnectionSpec {
            mclag_domain: Some(ConnMCLAGDomain {
                peer_links: vec![switch_link(&format!("{switch1}/E1/48"), &format!("{switch2}/E1/48"))],
                session_links: vec![switch_link(&format!("{switch1}/E1/47"), &format!("{switch2}/E1/47"))],
            }),
            ..Default::default()
        },
    )
}

/// VPC subnet with DHCP over `.10`..`.99` of a /24
pub fn create_test_subnet(cidr: &str, vlan: u16, dhcp: bool) -> VPCSubnet {
    let prefix = cidr.trim_end_matches(".0/24");
    VPCSubnet {
        subnet: cidr.to_string(),
        vlan,
        dhcp: VPCDHCP {
            enable: dhcp,
            range: Some(VPCDHCPRange {
                start: Some(format!("{prefix}.10")),
                end: Some(format!("{prefix}.99")),
            }),
            ..Default::default()
        },
        ..Default::default()
    }
}

pub fn create_test_vpc(name: &str, subnets: Vec<(&str, VPCSubnet)>) -> VPC {
    VPC::new(
        name,
        VPCSpec {
            subnets: subnets
                .into_iter()
                .map(|(n, s)| (n.to_string(), s))
                .collect(),
            ipv4_namespace: DEFAULT_NAMESPACE.to_string(),
            vlan_namespace: DEFAULT_NAMESPACE.to_string(),
            ..Default::default()
        },
    )
}

pub fn create_test_attachment(name: &str, subnet: &str, connection: &str) -> VPCAttachment {
    VPCAttachment::new(
        name,
        VPCAttachmentSpec {
            subnet: subnet.to_string(),
            connection: connection.to_string(),
            native_vlan: false,
        },
    )
}

/// Give an object a deletion timestamp, as the API server does on delete
pub fn mark_deleted<K: Resource + Serialize + DeserializeOwned>(obj: &K) -> K {
    let mut value = serde_json::to_value(obj).unwrap();
    value["metadata"]["deletionTimestamp"] = serde_json::json!("2024-06-01T12:00:00Z");
    serde_json::from_value(value).unwrap()
}
