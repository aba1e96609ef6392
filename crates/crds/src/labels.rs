//! Well-known labels
//!
//! Back references between objects are resolved with label selectors, so every
//! derived or indexed object carries one of these.

/// Names the VPC a derived object belongs to (DHCPSubnet, VPCInfo)
pub const LABEL_VPC: &str = "fabric.microscaler.io/vpc";

/// Names the VPC subnet a DHCPSubnet was built from
pub const LABEL_SUBNET: &str = "fabric.microscaler.io/subnet";

/// Connection type, one of the `ConnectionType` label values
pub const LABEL_CONNECTION_TYPE: &str = "fabric.microscaler.io/connection-type";

/// Derived location UUID of a switch
pub const LABEL_LOCATION: &str = "fabric.microscaler.io/location";

/// Names the switch that agent infra objects were created for
pub const LABEL_AGENT_SWITCH: &str = "fabric.microscaler.io/agent";

/// Marks an object as managed by the fabric controller
pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";

/// Value of `LABEL_MANAGED_BY`
pub const MANAGED_BY_VALUE: &str = "fabric-controller";

const SWITCH_LABEL_PREFIX: &str = "switch.fabric.microscaler.io/";
const SERVER_LABEL_PREFIX: &str = "server.fabric.microscaler.io/";
const EXTERNAL_LABEL_PREFIX: &str = "external.fabric.microscaler.io/";
const VPC_LABEL_PREFIX: &str = "vpc.fabric.microscaler.io/";

/// Value used for all presence labels
pub const LABEL_VALUE_TRUE: &str = "true";

/// Label set on a connection for each switch it touches
pub fn switch_label(switch: &str) -> String {
    format!("{SWITCH_LABEL_PREFIX}{switch}")
}

/// Label set on a connection for each server it touches
pub fn server_label(server: &str) -> String {
    format!("{SERVER_LABEL_PREFIX}{server}")
}

/// Label set on an external attachment/peering for its external
pub fn external_label(external: &str) -> String {
    format!("{EXTERNAL_LABEL_PREFIX}{external}")
}

/// Label set on peerings for each VPC they name
pub fn vpc_label(vpc: &str) -> String {
    format!("{VPC_LABEL_PREFIX}{vpc}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presence_labels() {
        assert_eq!(switch_label("leaf-1"), "switch.fabric.microscaler.io/leaf-1");
        assert_eq!(server_label("srv-01"), "server.fabric.microscaler.io/srv-01");
        assert_eq!(vpc_label("vpc-1"), "vpc.fabric.microscaler.io/vpc-1");
    }
}
