#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::test_utils::{
        mac, message_from_bytes, packet_bytes_with, relayed_packet, test_subnet, PacketSpec,
    };
    use chrono::TimeZone;
    use kube::api::ObjectMeta;
    use state_store::MockStore;

    const VRF: &str = "VrfVvpc-1";
    const CIRCUIT: &str = "Vlan1001";
    const SERVER_IP: Ipv4Addr = Ipv4Addr::new(10, 255, 0, 1);

    async fn fixture(subnet: DHCPSubnet) -> (DhcpServer, MockStore<DHCPSubnet>) {
        let store = MockStore::new("default");
        let seeded = store.seed(subnet);
        let subnets = SubnetMap::new();
        subnets.upsert(seeded).await;
        let server = DhcpServer::new(subnets, Arc::new(store.clone()), DhcpMetrics::new().unwrap())
            .with_server_ip(Some(SERVER_IP));
        (server, store)
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn packet(msg_type: MessageType, mac_last: u8) -> Message {
        relayed_packet(&PacketSpec {
            vrf: Some(VRF),
            circuit_id: Some(CIRCUIT),
            ..PacketSpec::new(msg_type, mac_last)
        })
    }

    async fn offered(server: &DhcpServer, mac_last: u8) -> Ipv4Addr {
        let reply = server
            .handle(&packet(MessageType::Discover, mac_last), now())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply.opts().msg_type(), Some(MessageType::Offer));
        reply.yiaddr()
    }

    fn allocated(store: &MockStore<DHCPSubnet>) -> DHCPSubnetStatus {
        store
            .peek("vpc-1--default")
            .and_then(|s| s.status)
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn test_discover_release_discover() {
        let (server, store) = fixture(test_subnet("vpc-1--default", VRF, CIRCUIT)).await;

        assert_eq!(offered(&server, 0).await, Ipv4Addr::new(10, 0, 0, 100));
        assert_eq!(offered(&server, 1).await, Ipv4Addr::new(10, 0, 0, 101));
        assert_eq!(offered(&server, 2).await, Ipv4Addr::new(10, 0, 0, 102));

        let released = server
            .handle(&packet(MessageType::Release, 1), now())
            .await
            .unwrap();
        assert!(released.is_none());
        assert!(!allocated(&store).allocated.contains_key(&mac(1)));

        assert_eq!(offered(&server, 3).await, Ipv4Addr::new(10, 0, 0, 101));
        assert_eq!(allocated(&store).allocated.len(), 3);
        assert_eq!(server.metrics().packet_count("discover"), 4);
        assert_eq!(server.metrics().packet_count("release"), 1);
    }

    #[tokio::test]
    async fn test_release_reaches_store_from_stale_cache() {
        let (server, store) = fixture(test_subnet("vpc-1--default", VRF, CIRCUIT)).await;

        // Another replica hands out the lease; this server's map never sees it
        let other_map = SubnetMap::new();
        other_map.upsert(store.peek("vpc-1--default").unwrap()).await;
        let other = DhcpServer::new(other_map, Arc::new(store.clone()), DhcpMetrics::new().unwrap())
            .with_server_ip(Some(SERVER_IP));
        assert_eq!(offered(&other, 1).await, Ipv4Addr::new(10, 0, 0, 100));
        assert!(allocated(&store).allocated.contains_key(&mac(1)));

        let released = server
            .handle(&packet(MessageType::Release, 1), now())
            .await
            .unwrap();
        assert!(released.is_none());
        assert!(!allocated(&store).allocated.contains_key(&mac(1)));
    }

    #[tokio::test]
    async fn test_noop_release_does_not_write() {
        let mut subnet = test_subnet("vpc-1--default", VRF, CIRCUIT);
        subnet.status = Some(DHCPSubnetStatus::default());
        let (server, store) = fixture(subnet).await;
        server
            .handle(&packet(MessageType::Release, 4), now())
            .await
            .unwrap();
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test]
    async fn test_request_after_offer_acks_same_address() {
        let (server, store) = fixture(test_subnet("vpc-1--default", VRF, CIRCUIT)).await;
        let ip = offered(&server, 7).await;

        let request = relayed_packet(&PacketSpec {
            vrf: Some(VRF),
            circuit_id: Some(CIRCUIT),
            requested_ip: Some(ip),
            hostname: Some("server-7"),
            ..PacketSpec::new(MessageType::Request, 7)
        });
        let ack = server.handle(&request, now()).await.unwrap().unwrap();
        assert_eq!(ack.opts().msg_type(), Some(MessageType::Ack));
        assert_eq!(ack.yiaddr(), ip);

        let lease = allocated(&store).allocated.get(&mac(7)).cloned().unwrap();
        assert_eq!(lease.ip, ip.to_string());
        assert_eq!(lease.hostname, "server-7");
        assert!(!lease.discover);
    }

    #[tokio::test]
    async fn test_l3_request_gets_vpc_route() {
        let mut subnet = test_subnet("vpc-1--default", VRF, CIRCUIT);
        subnet.spec.l3_mode = true;
        subnet.spec.disable_default_route = true;
        let (server, _store) = fixture(subnet).await;

        let request = relayed_packet(&PacketSpec {
            vrf: Some(VRF),
            circuit_id: Some(CIRCUIT),
            params: vec![OptionCode::ClasslessStaticRoute, OptionCode::Router],
            ..PacketSpec::new(MessageType::Request, 9)
        });
        let ack = server.handle(&request, now()).await.unwrap().unwrap();

        assert_eq!(
            ack.opts().get(OptionCode::ClasslessStaticRoute),
            Some(&DhcpOption::ClasslessStaticRoute(vec![(
                "10.0.0.0/24".parse().unwrap(),
                Ipv4Addr::new(10, 0, 0, 1)
            )]))
        );
        assert!(ack.opts().get(OptionCode::Router).is_none());
        assert_eq!(
            ack.opts().get(OptionCode::ServerIdentifier),
            Some(&DhcpOption::ServerIdentifier(SERVER_IP))
        );
    }

    #[tokio::test]
    async fn test_unknown_subnet_is_dropped() {
        let (server, store) = fixture(test_subnet("vpc-1--default", VRF, CIRCUIT)).await;
        let stray = relayed_packet(&PacketSpec {
            vrf: Some("VrfVother"),
            circuit_id: Some(CIRCUIT),
            ..PacketSpec::new(MessageType::Discover, 1)
        });

        assert!(server.respond(&stray, now()).await.is_none());
        assert_eq!(server.metrics().dropped_count("unknown_subnet"), 1);
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_message_type_is_dropped() {
        let (server, store) = fixture(test_subnet("vpc-1--default", VRF, CIRCUIT)).await;
        let spec = PacketSpec {
            vrf: Some(VRF),
            circuit_id: Some(CIRCUIT),
            ..PacketSpec::new(MessageType::Discover, 1)
        };
        let untyped = message_from_bytes(&packet_bytes_with(&spec, false));

        assert!(server.handle(&untyped, now()).await.unwrap().is_none());
        assert_eq!(server.metrics().dropped_count("no_message_type"), 1);
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test]
    async fn test_conflicts_are_retried() {
        let (server, store) = fixture(test_subnet("vpc-1--default", VRF, CIRCUIT)).await;
        store.inject_conflicts(3);

        assert_eq!(offered(&server, 4).await, Ipv4Addr::new(10, 0, 0, 100));
        assert_eq!(store.write_count(), 1);
        assert!(allocated(&store).allocated.contains_key(&mac(4)));
    }

    #[tokio::test]
    async fn test_recreated_subnet_is_not_written() {
        let (server, store) = fixture(test_subnet("vpc-1--default", VRF, CIRCUIT)).await;

        store.delete("vpc-1--default").await.unwrap();
        let mut recreated = test_subnet("vpc-1--default", VRF, CIRCUIT);
        recreated.metadata = ObjectMeta {
            name: Some("vpc-1--default".to_string()),
            ..Default::default()
        };
        store.create(&recreated).await.unwrap();

        let err = server
            .handle(&packet(MessageType::Discover, 1), now())
            .await
            .unwrap_err();
        assert!(matches!(err, DhcpError::UidMismatch(name) if name == "vpc-1--default"));
        assert!(store.peek("vpc-1--default").unwrap().status.is_none());
    }

    #[tokio::test]
    async fn test_cleanup_removes_expired_leases() {
        let (server, store) = fixture(test_subnet("vpc-1--default", VRF, CIRCUIT)).await;
        let request = packet(MessageType::Request, 5);
        server.handle(&request, now()).await.unwrap().unwrap();
        offered(&server, 6).await;

        let later = now() + chrono::Duration::seconds(120);
        assert_eq!(server.cleanup(later).await, 1);
        let status = allocated(&store);
        assert!(status.allocated.contains_key(&mac(5)));
        assert!(!status.allocated.contains_key(&mac(6)));

        let writes = store.write_count();
        assert_eq!(server.cleanup(later).await, 0);
        assert_eq!(store.write_count(), writes);

        let expired = now() + chrono::Duration::seconds(3601);
        assert_eq!(server.cleanup(expired).await, 1);
        assert!(allocated(&store).allocated.is_empty());
    }

    #[test]
    fn test_client_mac_is_lowercase() {
        let msg = packet(MessageType::Discover, 0xab);
        assert_eq!(client_mac(&msg), "02:00:00:00:00:ab");
    }
}
