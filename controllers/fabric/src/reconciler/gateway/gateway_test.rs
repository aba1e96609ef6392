//! Unit tests for gateway sync

#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::config::{FabricConfig, GatewayConfig};
    use crate::test_utils::{create_test_subnet, create_test_vpc, MockStores};
    use crds::{
        ExternalPeering, ExternalPeeringExternal, ExternalPeeringPermit, ExternalPeeringPrefix,
        ExternalPeeringSpec, ExternalPeeringVPC, ExternalSpec,
    };

    fn external(name: &str) -> External {
        External::new(
            name,
            ExternalSpec {
                ipv4_namespace: "default".to_string(),
                inbound_community: "65102:5000".to_string(),
                outbound_community: "50000:50001".to_string(),
            },
        )
    }

    fn external_peering(name: &str, vpc: &str, external: &str, prefixes: &[&str]) -> ExternalPeering {
        ExternalPeering::new(
            name,
            ExternalPeeringSpec {
                permit: ExternalPeeringPermit {
                    vpc: ExternalPeeringVPC {
                        name: vpc.to_string(),
                        subnets: vec!["default".to_string()],
                    },
                    external: ExternalPeeringExternal {
                        name: external.to_string(),
                        prefixes: prefixes
                            .iter()
                            .map(|p| ExternalPeeringPrefix {
                                prefix: (*p).to_string(),
                            })
                            .collect(),
                    },
                },
            },
        )
    }

    #[tokio::test]
    async fn test_vpc_info_carries_vni_and_subnets() {
        let mocks = MockStores::new();
        let reconciler = mocks.reconciler(FabricConfig::default());
        let vpc = mocks.vpcs.seed(create_test_vpc(
            "vpc-1",
            vec![
                ("a", create_test_subnet("10.0.1.0/24", 1001, true)),
                ("b", create_test_subnet("10.0.2.0/24", 1002, false)),
            ],
        ));
        reconciler.librarian.update_vpcs().await.unwrap();
        let vni = reconciler.librarian.vpc_vni("vpc-1").await.unwrap();

        reconciler.sync_vpc_info(&vpc).await.unwrap();

        let info = mocks.vpc_infos.peek("vpc-1").unwrap();
        assert_eq!(info.spec.vni, vni);
        assert_eq!(info.spec.subnets["a"].cidr, "10.0.1.0/24");
        assert_eq!(info.spec.subnets["b"].cidr, "10.0.2.0/24");
        let owner = &info.metadata.owner_references.as_ref().unwrap()[0];
        assert_eq!(owner.name, "vpc-1");
        assert_eq!(owner.block_owner_deletion, None);
    }

    #[tokio::test]
    async fn test_vpc_without_vni_fails() {
        let mocks = MockStores::new();
        let reconciler = mocks.reconciler(FabricConfig::default());
        let vpc = mocks.vpcs.seed(create_test_vpc(
            "vpc-1",
            vec![("a", create_test_subnet("10.0.1.0/24", 1001, true))],
        ));

        assert!(reconciler.sync_vpc_info(&vpc).await.is_err());
        assert!(mocks.vpc_infos.peek("vpc-1").is_none());
    }

    #[tokio::test]
    async fn test_external_info_from_peerings() {
        let mocks = MockStores::new();
        let reconciler = mocks.reconciler(FabricConfig::default());
        let ext = mocks.externals.seed(external("ext-1"));
        mocks
            .external_peerings
            .seed(external_peering("vpc-1--ext-1", "vpc-1", "ext-1", &["10.100.0.0/16"]));
        mocks
            .external_peerings
            .seed(external_peering("vpc-2--ext-2", "vpc-2", "ext-2", &["10.200.0.0/16"]));

        reconciler.sync_external_info(&ext).await.unwrap();

        let info = mocks.vpc_infos.peek("ext.ext-1").unwrap();
        assert_eq!(info.spec.vni, 0);
        assert_eq!(info.spec.subnets.len(), 1);
        assert_eq!(info.spec.subnets["10-100-0-0-16"].cidr, "10.100.0.0/16");
    }

    #[tokio::test]
    async fn test_external_default_route_flag() {
        let mocks = MockStores::new();
        let config = FabricConfig {
            gateway: GatewayConfig {
                external_default_route: true,
            },
            ..Default::default()
        };
        let reconciler = mocks.reconciler(config);
        let ext = mocks.externals.seed(external("ext-1"));
        mocks
            .external_peerings
            .seed(external_peering("vpc-1--ext-1", "vpc-1", "ext-1", &["10.100.0.0/16"]));

        reconciler.sync_external_info(&ext).await.unwrap();

        let info = mocks.vpc_infos.peek("ext.ext-1").unwrap();
        assert_eq!(info.spec.subnets.len(), 1);
        assert_eq!(info.spec.subnets[EXTERNAL_DEFAULT_SUBNET].cidr, DEFAULT_ROUTE);
    }

    #[test]
    fn test_prefix_subnet_name() {
        assert_eq!(prefix_subnet_name("10.1.0.0/16"), "10-1-0-0-16");
    }
}
