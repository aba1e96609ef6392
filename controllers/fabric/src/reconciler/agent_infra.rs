//! Agent infra
//!
//! Every switch agent talks to the API server with its own identity: a
//! service account, a role that only exposes the switch's Agent object, a
//! binding between the two, a service account token secret and a kubeconfig
//! secret built from that token. All of them are owned by the Switch.

use crate::error::ControllerError;
use crate::reconcile_helpers::{managed_labels, owner_ref, upsert};
use crate::reconciler::Reconciler;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use crds::labels::LABEL_AGENT_SWITCH;
use crds::Switch;
use k8s_openapi::api::core::v1::{Secret, ServiceAccount};
use k8s_openapi::api::rbac::v1::{PolicyRule, Role, RoleBinding, RoleRef, Subject};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use kube::ResourceExt;
use std::collections::BTreeMap;
use tracing::debug;

const AGENT_API_GROUP: &str = "agent.fabric.microscaler.io";
const SERVICE_ACCOUNT_TOKEN_TYPE: &str = "kubernetes.io/service-account-token";
const SERVICE_ACCOUNT_NAME_ANNOTATION: &str = "kubernetes.io/service-account.name";

/// Key of the kubeconfig in the kubeconfig secret
pub const KUBECONFIG_KEY: &str = "kubeconfig";

/// Entries the API server injects into a token secret
const TOKEN_KEYS: [&str; 3] = ["ca.crt", "token", "namespace"];

/// Name of the service account, role and role binding of a switch agent
pub fn agent_infra_name(switch: &str) -> String {
    format!("agent--{switch}")
}

pub fn token_secret_name(switch: &str) -> String {
    format!("agent--{switch}--token")
}

pub fn kubeconfig_secret_name(switch: &str) -> String {
    format!("agent--{switch}--kubeconfig")
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| (*v).to_string()).collect()
}

/// Kubeconfig for an agent authenticating with a service account token
pub fn render_kubeconfig(ca: &[u8], server: &str, namespace: &str, token: &str) -> String {
    format!(
        "apiVersion: v1
kind: Config
clusters:
- name: fabric
  cluster:
    certificate-authority-data: {ca}
    server: {server}
contexts:
- name: agent
  context:
    cluster: fabric
    namespace: {namespace}
    user: agent
current-context: agent
users:
- name: agent
  user:
    token: {token}
",
        ca = BASE64.encode(ca),
    )
}

/// Value of a populated token secret entry
fn token_entry<'a>(secret: &'a Secret, key: &str) -> Option<&'a [u8]> {
    secret
        .data
        .as_ref()?
        .get(key)
        .map(|v| v.0.as_slice())
        .filter(|v| !v.is_empty())
}

impl Reconciler {
    fn agent_infra_meta(&self, switch: &Switch, name: String) -> Result<ObjectMeta, ControllerError> {
        let mut labels = managed_labels();
        labels.insert(LABEL_AGENT_SWITCH.to_string(), switch.name_any());
        Ok(ObjectMeta {
            name: Some(name),
            namespace: Some(self.stores.namespace().to_string()),
            labels: Some(labels),
            owner_references: Some(vec![owner_ref(switch, true)?]),
            ..Default::default()
        })
    }

    /// Make sure the agent of `switch` can reach the API server
    ///
    /// Returns `false` while the API server has not yet populated the token
    /// secret; the caller should requeue shortly.
    pub async fn ensure_agent_infra(&self, switch: &Switch) -> Result<bool, ControllerError> {
        let switch_name = switch.name_any();
        let ns = self.stores.namespace().to_string();
        let name = agent_infra_name(&switch_name);

        let service_account = ServiceAccount {
            metadata: self.agent_infra_meta(switch, name.clone())?,
            ..Default::default()
        };
        upsert(self.stores.service_accounts.as_ref(), &service_account).await?;

        let role = Role {
            metadata: self.agent_infra_meta(switch, name.clone())?,
            rules: Some(vec![
                PolicyRule {
                    api_groups: Some(strings(&[AGENT_API_GROUP])),
                    resources: Some(strings(&["agents"])),
                    resource_names: Some(vec![switch_name.clone()]),
                    verbs: strings(&["get", "watch"]),
                    ..Default::default()
                },
                PolicyRule {
                    api_groups: Some(strings(&[AGENT_API_GROUP])),
                    resources: Some(strings(&["agents/status"])),
                    resource_names: Some(vec![switch_name.clone()]),
                    verbs: strings(&["get", "list", "watch", "create", "update", "patch", "delete"]),
                    ..Default::default()
                },
            ]),
        };
        upsert(self.stores.roles.as_ref(), &role).await?;

        let role_binding = RoleBinding {
            metadata: self.agent_infra_meta(switch, name.clone())?,
            role_ref: RoleRef {
                api_group: "rbac.authorization.k8s.io".to_string(),
                kind: "Role".to_string(),
                name: name.clone(),
            },
            subjects: Some(vec![Subject {
                kind: "ServiceAccount".to_string(),
                name: name.clone(),
                namespace: Some(ns.clone()),
                ..Default::default()
            }]),
        };
        upsert(self.stores.role_bindings.as_ref(), &role_binding).await?;

        let mut token_meta = self.agent_infra_meta(switch, token_secret_name(&switch_name))?;
        token_meta.annotations = Some(BTreeMap::from([(
            SERVICE_ACCOUNT_NAME_ANNOTATION.to_string(),
            name.clone(),
        )]));
        let token_secret = Secret {
            metadata: token_meta,
            type_: Some(SERVICE_ACCOUNT_TOKEN_TYPE.to_string()),
            ..Default::default()
        };
        upsert(self.stores.secrets.as_ref(), &token_secret).await?;

        let token_secret = self.stores.secrets.get(&token_secret_name(&switch_name)).await?;
        let (Some(ca), Some(token), Some(_)) = (
            token_entry(&token_secret, TOKEN_KEYS[0]),
            token_entry(&token_secret, TOKEN_KEYS[1]),
            token_entry(&token_secret, TOKEN_KEYS[2]),
        ) else {
            debug!("Token secret for agent {}/{} is not populated yet", ns, switch_name);
            return Ok(false);
        };

        let kubeconfig = render_kubeconfig(
            ca,
            &self.config.api_server,
            &ns,
            &String::from_utf8_lossy(token),
        );
        let kubeconfig_secret = Secret {
            metadata: self.agent_infra_meta(switch, kubeconfig_secret_name(&switch_name))?,
            data: Some(BTreeMap::from([(
                KUBECONFIG_KEY.to_string(),
                ByteString(kubeconfig.into_bytes()),
            )])),
            ..Default::default()
        };
        upsert(self.stores.secrets.as_ref(), &kubeconfig_secret).await?;

        debug!("Agent infra for switch {}/{} is ready", ns, switch_name);
        Ok(true)
    }
}
