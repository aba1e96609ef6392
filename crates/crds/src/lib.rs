//! Fabric CRD Definitions
//!
//! Kubernetes Custom Resource Definitions for the fabric control plane, the
//! well-known labels used to index them and the validation rules they obey.

pub mod agent;
pub mod dhcp;
pub mod gateway;
pub mod labels;
pub mod validation;
pub mod vpc;
pub mod wiring;

pub use agent::*;
pub use dhcp::*;
pub use gateway::*;
pub use validation::ValidationError;
pub use vpc::*;
pub use wiring::*;

use kube::CustomResourceExt;

/// Every CRD of the fabric, in apply order
pub fn all_crds() -> Vec<k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition> {
    vec![
        Switch::crd(),
        SwitchProfile::crd(),
        SwitchGroup::crd(),
        Server::crd(),
        Rack::crd(),
        Connection::crd(),
        VLANNamespace::crd(),
        IPv4Namespace::crd(),
        VPC::crd(),
        VPCAttachment::crd(),
        VPCPeering::crd(),
        External::crd(),
        ExternalAttachment::crd(),
        ExternalPeering::crd(),
        Catalog::crd(),
        Agent::crd(),
        DHCPSubnet::crd(),
        VPCInfo::crd(),
    ]
}
