//! Unit tests for the librarian catalogs

#[cfg(test)]
mod tests {
    use super::super::*;
    use crds::labels::LABEL_CONNECTION_TYPE;
    use crds::{ConnectionSpec, VPCSpec, VPCSubnet};
    use state_store::MockStore;

    struct Fixture {
        catalogs: MockStore<Catalog>,
        connections: MockStore<Connection>,
        vpcs: MockStore<VPC>,
        librarian: Librarian,
    }

    fn fixture() -> Fixture {
        fixture_with_irb_vlans(VLANRange::new(3000, 3099))
    }

    fn fixture_with_irb_vlans(irb_vlans: VLANRange) -> Fixture {
        let catalogs = MockStore::<Catalog>::new("default");
        let connections = MockStore::<Connection>::new("default");
        let vpcs = MockStore::<VPC>::new("default");
        let librarian = Librarian::new(
            Arc::new(catalogs.clone()),
            Arc::new(connections.clone()),
            Arc::new(vpcs.clone()),
            LibrarianConfig {
                vpc_irb_vlans: vec![irb_vlans],
                vpc_peering_vlans: vec![VLANRange::new(3100, 3999)],
            },
        );
        Fixture {
            catalogs,
            connections,
            vpcs,
            librarian,
        }
    }

    fn vpc(name: &str, subnets: &[&str]) -> VPC {
        VPC {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            spec: VPCSpec {
                subnets: subnets
                    .iter()
                    .map(|s| (s.to_string(), VPCSubnet::default()))
                    .collect(),
                ..Default::default()
            },
            status: None,
        }
    }

    fn connection(name: &str, conn_type: ConnectionType) -> Connection {
        Connection {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(BTreeMap::from([(
                    LABEL_CONNECTION_TYPE.to_string(),
                    conn_type.as_str().to_string(),
                )])),
                ..Default::default()
            },
            spec: ConnectionSpec::default(),
            status: None,
        }
    }

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn catalog(store: &MockStore<Catalog>, name: &str) -> CatalogSpec {
        store.peek(name).map(|c| c.spec).unwrap_or_default()
    }

    #[tokio::test]
    async fn test_vpc_vnis_reuse_released_block() {
        let f = fixture();
        for name in ["a", "b", "c"] {
            f.vpcs.seed(vpc(name, &["default"]));
        }
        f.librarian.update_vpcs().await.unwrap();
        let spec = catalog(&f.catalogs, CATALOG_VPCS);
        assert_eq!(spec.vpc_vnis["a"], 100);
        assert_eq!(spec.vpc_vnis["b"], 200);
        assert_eq!(spec.vpc_vnis["c"], 300);

        f.vpcs.delete("b").await.unwrap();
        f.vpcs.seed(vpc("d", &["default"]));
        f.librarian.update_vpcs().await.unwrap();
        let spec = catalog(&f.catalogs, CATALOG_VPCS);
        assert_eq!(spec.vpc_vnis.get("b"), None);
        assert_eq!(spec.vpc_vnis["a"], 100);
        assert_eq!(spec.vpc_vnis["c"], 300);
        assert_eq!(spec.vpc_vnis["d"], 200);
        assert_eq!(f.librarian.vpc_vni("d").await.unwrap(), 200);
    }

    #[tokio::test]
    async fn test_subnet_vnis_nest_in_vpc_block() {
        let f = fixture();
        f.vpcs.seed(vpc("a", &["default", "storage", "mgmt"]));
        f.librarian.update_vpcs().await.unwrap();

        let spec = catalog(&f.catalogs, CATALOG_VPCS);
        let subnets = &spec.vpc_subnet_vnis["a"];
        assert_eq!(subnets.len(), 3);
        for vni in subnets.values() {
            assert!((101..=199).contains(vni), "subnet VNI {vni} outside the VPC block");
        }
        // Key order: default, mgmt, storage
        assert_eq!(subnets["default"], 101);
        assert_eq!(subnets["mgmt"], 102);
        assert_eq!(subnets["storage"], 103);
    }

    #[tokio::test]
    async fn test_deleting_vpc_releases_vni() {
        let f = fixture();
        f.vpcs.seed(vpc("a", &["default"]));
        f.librarian.update_vpcs().await.unwrap();
        assert_eq!(catalog(&f.catalogs, CATALOG_VPCS).vpc_vnis.len(), 1);

        f.vpcs.delete("a").await.unwrap();
        f.librarian.update_vpcs().await.unwrap();
        let spec = catalog(&f.catalogs, CATALOG_VPCS);
        assert!(spec.vpc_vnis.is_empty());
        assert!(spec.vpc_subnet_vnis.is_empty());
    }

    #[tokio::test]
    async fn test_unchanged_catalog_is_not_rewritten() {
        let f = fixture();
        f.vpcs.seed(vpc("a", &["default"]));
        f.librarian.update_vpcs().await.unwrap();
        let writes = f.catalogs.write_count();

        f.librarian.update_vpcs().await.unwrap();
        f.librarian.update_vpcs().await.unwrap();
        assert_eq!(f.catalogs.write_count(), writes);
    }

    #[tokio::test]
    async fn test_update_connections_only_eslag() {
        let f = fixture();
        f.connections.seed(connection("eslag-1", ConnectionType::ESLAG));
        f.connections.seed(connection("eslag-2", ConnectionType::ESLAG));
        f.connections.seed(connection("mclag-1", ConnectionType::MCLAG));
        f.librarian.update_connections().await.unwrap();

        let spec = catalog(&f.catalogs, CATALOG_CONNECTIONS);
        assert_eq!(
            spec.connection_ids,
            BTreeMap::from([("eslag-1".to_string(), 1), ("eslag-2".to_string(), 2)])
        );
    }

    #[tokio::test]
    async fn test_redundancy_group_retains_port_channels_of_other_members() {
        let f = fixture();
        for name in ["vpc-1", "vpc-2"] {
            f.vpcs.seed(vpc(name, &["default"]));
        }
        f.connections.seed(connection("mclag-1", ConnectionType::MCLAG));
        f.connections.seed(connection("mclag-2", ConnectionType::MCLAG));
        f.librarian.update_vpcs().await.unwrap();

        let first = f
            .librarian
            .catalog_for_redundancy_group(
                "leaf-1",
                Some("mclag-1"),
                &RedundancyGroupRequest {
                    used_vpcs: set(&["vpc-1", "vpc-2"]),
                    port_chan_conns: set(&["mclag-1", "mclag-2"]),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(first.irb_vlans["vpc-1"], 3000);
        assert_eq!(first.irb_vlans["vpc-2"], 3001);
        assert_eq!(first.vpc_vnis["vpc-2"], 200);
        assert_eq!(first.vpc_subnet_vnis["vpc-1"]["default"], 101);

        // The peer only uses mclag-2 but the group catalog keeps mclag-1
        let second = f
            .librarian
            .catalog_for_redundancy_group(
                "leaf-2",
                Some("mclag-1"),
                &RedundancyGroupRequest {
                    used_vpcs: set(&["vpc-2"]),
                    port_chan_conns: set(&["mclag-2"]),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(second.irb_vlans, BTreeMap::from([("vpc-2".to_string(), 3001)]));
        assert_eq!(second.port_chan_ids, BTreeMap::from([("mclag-2".to_string(), 2)]));

        let stored = catalog(&f.catalogs, &redundancy_group_catalog_name("mclag-1"));
        assert_eq!(stored.irb_vlans, BTreeMap::from([("vpc-2".to_string(), 3001)]));
        assert_eq!(stored.port_chan_ids.len(), 2);
    }

    #[tokio::test]
    async fn test_redundancy_group_releases_detached_vpcs() {
        let f = fixture_with_irb_vlans(VLANRange::new(3000, 3001));
        for name in ["vpc-1", "vpc-2", "vpc-3"] {
            f.vpcs.seed(vpc(name, &["default"]));
        }
        f.librarian.update_vpcs().await.unwrap();

        let both = RedundancyGroupRequest {
            used_vpcs: set(&["vpc-1", "vpc-2"]),
            ..Default::default()
        };
        f.librarian
            .catalog_for_redundancy_group("leaf-1", Some("g"), &both)
            .await
            .unwrap();

        // vpc-1 and vpc-2 still exist but are no longer attached to the group
        let third = RedundancyGroupRequest {
            used_vpcs: set(&["vpc-3"]),
            ..Default::default()
        };
        let result = f
            .librarian
            .catalog_for_redundancy_group("leaf-1", Some("g"), &third)
            .await
            .unwrap();
        assert_eq!(result.irb_vlans, BTreeMap::from([("vpc-3".to_string(), 3000)]));

        let stored = catalog(&f.catalogs, &redundancy_group_catalog_name("g"));
        assert_eq!(stored.irb_vlans, BTreeMap::from([("vpc-3".to_string(), 3000)]));
    }

    #[tokio::test]
    async fn test_redundancy_group_drops_deleted_vpcs() {
        let f = fixture();
        f.vpcs.seed(vpc("vpc-1", &["default"]));
        f.vpcs.seed(vpc("vpc-2", &["default"]));
        f.librarian.update_vpcs().await.unwrap();
        let req = RedundancyGroupRequest {
            used_vpcs: set(&["vpc-1", "vpc-2"]),
            ..Default::default()
        };
        f.librarian
            .catalog_for_redundancy_group("leaf-1", Some("g"), &req)
            .await
            .unwrap();

        f.vpcs.delete("vpc-1").await.unwrap();
        f.librarian.update_vpcs().await.unwrap();
        let req = RedundancyGroupRequest {
            used_vpcs: set(&["vpc-2"]),
            ..Default::default()
        };
        f.librarian
            .catalog_for_redundancy_group("leaf-1", Some("g"), &req)
            .await
            .unwrap();

        let stored = catalog(&f.catalogs, &redundancy_group_catalog_name("g"));
        assert_eq!(stored.irb_vlans, BTreeMap::from([("vpc-2".to_string(), 3001)]));
    }

    #[tokio::test]
    async fn test_missing_global_entry_is_an_error() {
        let f = fixture();
        let err = f
            .librarian
            .catalog_for_redundancy_group(
                "leaf-1",
                None,
                &RedundancyGroupRequest {
                    used_vpcs: set(&["ghost"]),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, LibrarianError::MissingCatalogEntry { .. }));

        let err = f
            .librarian
            .catalog_for_redundancy_group(
                "leaf-1",
                None,
                &RedundancyGroupRequest {
                    id_conns: set(&["eslag-1"]),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, LibrarianError::MissingCatalogEntry { .. }));
    }

    #[tokio::test]
    async fn test_switch_catalog_allocations() {
        let f = fixture();
        let req = SwitchRequest {
            loopback_links: set(&["E1/1--E1/2", "E1/3--E1/4"]),
            loopback_requests: set(&["vpc@p1", "vpc@p2", "ext@p3"]),
            externals: set(&["ext-1"]),
            subnets: set(&["10.0.1.0/24", "10.0.2.0/24"]),
        };
        let spec = f.librarian.catalog_for_switch("leaf-1", &req).await.unwrap();

        assert_eq!(spec.loopback_workaround_links.len(), 3);
        assert_eq!(spec.loopback_workaround_links["ext@p3"], "E1/1--E1/2");
        assert_eq!(spec.loopback_workaround_links["vpc@p1"], "E1/3--E1/4");
        assert_eq!(spec.loopback_workaround_links["vpc@p2"], "E1/1--E1/2");
        assert_eq!(spec.loopback_workaround_vlans["ext@p3"], 3100);
        assert_eq!(spec.external_ids["ext-1"], 10);
        assert_eq!(spec.subnet_ids["10.0.1.0/24"], 100);
        assert_eq!(spec.subnet_ids["10.0.2.0/24"], 101);
        assert!(spec.irb_vlans.is_empty());

        assert_eq!(catalog(&f.catalogs, &switch_catalog_name("leaf-1")), spec);
    }

    #[tokio::test]
    async fn test_switch_catalog_drops_stale_links() {
        let f = fixture();
        let mut req = SwitchRequest {
            loopback_links: set(&["E1/1--E1/2", "E1/3--E1/4"]),
            loopback_requests: set(&["vpc@p1", "vpc@p2"]),
            ..Default::default()
        };
        let before = f.librarian.catalog_for_switch("leaf-1", &req).await.unwrap();
        assert_eq!(before.loopback_workaround_links["vpc@p2"], "E1/3--E1/4");

        req.loopback_links = set(&["E1/1--E1/2"]);
        let after = f.librarian.catalog_for_switch("leaf-1", &req).await.unwrap();
        assert_eq!(after.loopback_workaround_links["vpc@p1"], "E1/1--E1/2");
        assert_eq!(after.loopback_workaround_links["vpc@p2"], "E1/1--E1/2");
        assert_eq!(
            after.loopback_workaround_vlans,
            before.loopback_workaround_vlans
        );
    }

    #[tokio::test]
    async fn test_loopback_requests_without_links_fail() {
        let f = fixture();
        let req = SwitchRequest {
            loopback_requests: set(&["vpc@p1"]),
            ..Default::default()
        };
        let err = f.librarian.catalog_for_switch("leaf-1", &req).await.unwrap_err();
        assert!(matches!(
            err,
            LibrarianError::Allocator {
                source: AllocatorError::EmptyCandidateSet,
                ..
            }
        ));
    }
}
