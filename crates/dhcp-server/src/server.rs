//! DHCP Server
//!
//! Answers relayed DHCPv4 packets from the subnet map and persists leases in
//! the owning `DHCPSubnet` status. Each subnet is the only writer of its own
//! `status.allocated`; concurrent writers are serialized by resource version
//! and retried on conflict.

use crate::error::DhcpError;
use crate::ipam::{self, LeaseKind, LeaseRequest, SubnetRange};
use crate::metrics::DhcpMetrics;
use crate::relay;
use crate::reply::{build_reply, ReplyParams};
use crate::subnets::SubnetMap;
use chrono::{DateTime, Utc};
use crds::{DHCPSubnet, DHCPSubnetSpec, DHCPSubnetStatus};
use dhcproto::v4::{DhcpOption, Message, MessageType, OptionCode};
use kube::ResourceExt;
use state_store::{retry_on_conflict, Backoff, ObjectStore};
use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// How often expired leases are swept
pub const CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Clone)]
pub struct DhcpServer {
    subnets: SubnetMap,
    store: Arc<dyn ObjectStore<DHCPSubnet>>,
    metrics: DhcpMetrics,
    backoff: Backoff,
    server_ip: Option<Ipv4Addr>,
}

impl std::fmt::Debug for DhcpServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DhcpServer")
            .field("namespace", &self.store.namespace())
            .field("server_ip", &self.server_ip)
            .finish_non_exhaustive()
    }
}

/// Lowercase colon separated MAC of the client
pub fn client_mac(msg: &Message) -> String {
    let chaddr = msg.chaddr();
    let len = chaddr.len().min(6);
    chaddr[..len]
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(":")
}

fn requested_ip(msg: &Message) -> Option<Ipv4Addr> {
    match msg.opts().get(OptionCode::RequestedIpAddress) {
        Some(DhcpOption::RequestedIpAddress(ip)) => Some(*ip),
        _ => Some(msg.ciaddr()).filter(|ip| !ip.is_unspecified()),
    }
}

fn hostname(msg: &Message) -> String {
    match msg.opts().get(OptionCode::Hostname) {
        Some(DhcpOption::Hostname(name)) => name.clone(),
        _ => String::new(),
    }
}

fn type_label(msg_type: MessageType) -> &'static str {
    match msg_type {
        MessageType::Discover => "discover",
        MessageType::Request => "request",
        MessageType::Release => "release",
        MessageType::Decline => "decline",
        _ => "other",
    }
}

/// Local address the kernel would use to reach `peer`
///
/// Connecting a UDP socket sends nothing; it only resolves the route.
pub fn local_ip_towards(peer: Ipv4Addr) -> Option<Ipv4Addr> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect((peer, 67)).ok()?;
    match socket.local_addr().ok()? {
        SocketAddr::V4(addr) => Some(*addr.ip()),
        SocketAddr::V6(_) => None,
    }
}

impl DhcpServer {
    pub fn new(
        subnets: SubnetMap,
        store: Arc<dyn ObjectStore<DHCPSubnet>>,
        metrics: DhcpMetrics,
    ) -> Self {
        Self {
            subnets,
            store,
            metrics,
            backoff: Backoff::DEFAULT_RETRY,
            server_ip: None,
        }
    }

    /// Fix the server identifier instead of deriving it from the relay route
    pub fn with_server_ip(mut self, server_ip: Option<Ipv4Addr>) -> Self {
        self.server_ip = server_ip;
        self
    }

    pub fn subnets(&self) -> &SubnetMap {
        &self.subnets
    }

    pub fn metrics(&self) -> &DhcpMetrics {
        &self.metrics
    }

    fn server_ip_for(&self, req: &Message) -> Ipv4Addr {
        self.server_ip
            .or_else(|| local_ip_towards(req.giaddr()))
            .unwrap_or(Ipv4Addr::UNSPECIFIED)
    }

    /// Answer one packet, counting and logging anything that is dropped
    pub async fn respond(&self, req: &Message, now: DateTime<Utc>) -> Option<Message> {
        match self.handle(req, now).await {
            Ok(reply) => reply,
            Err(e) => {
                self.metrics.dropped(e.reason());
                match e {
                    DhcpError::UnknownSubnet { .. } | DhcpError::Unsupported(_) => debug!("{}", e),
                    _ => warn!("Dropping DHCP packet from {}: {}", client_mac(req), e),
                }
                None
            }
        }
    }

    /// Answer one packet; `Ok(None)` for messages that get no reply
    pub async fn handle(
        &self,
        req: &Message,
        now: DateTime<Utc>,
    ) -> Result<Option<Message>, DhcpError> {
        let Some(msg_type) = req.opts().msg_type() else {
            self.metrics.dropped("no_message_type");
            debug!("Ignoring packet from {} without message type", client_mac(req));
            return Ok(None);
        };
        self.metrics.packet(type_label(msg_type));

        let (vrf, circuit_id) = relay::subnet_key(req);
        let subnet = self
            .subnets
            .get(&vrf, &circuit_id)
            .await
            .ok_or(DhcpError::UnknownSubnet { vrf, circuit_id })?;
        let mac = client_mac(req);

        match msg_type {
            MessageType::Discover | MessageType::Request => {
                let kind = if msg_type == MessageType::Discover {
                    LeaseKind::Discover
                } else {
                    LeaseKind::Request
                };
                let lease_req = LeaseRequest {
                    mac: mac.clone(),
                    requested_ip: requested_ip(req),
                    hostname: hostname(req),
                    kind,
                };
                let lease = self
                    .update_status(&subnet, |spec, status| {
                        ipam::allocate(spec, status, &lease_req, now)
                    })
                    .await?;

                let range = SubnetRange::parse(&subnet.spec)?;
                let reply_type = if kind == LeaseKind::Discover {
                    MessageType::Offer
                } else {
                    MessageType::Ack
                };
                info!(
                    "{:?} {} to {} in {}",
                    reply_type,
                    lease.ip,
                    mac,
                    subnet.name_any()
                );
                let params = ReplyParams {
                    spec: &subnet.spec,
                    range: &range,
                    lease,
                    server_ip: self.server_ip_for(req),
                };
                Ok(Some(build_reply(req, reply_type, &params)))
            }
            MessageType::Release | MessageType::Decline => {
                let released = self
                    .update_status(&subnet, |_, status| Ok(ipam::release(status, &mac)))
                    .await?;
                if released {
                    info!("{:?} of {} in {}", msg_type, mac, subnet.name_any());
                }
                Ok(None)
            }
            other => Err(DhcpError::Unsupported(format!("{other:?} from {mac}"))),
        }
    }

    /// Store copy of a subnet, unless it was re-created since `uid` was seen
    async fn fetch(&self, name: &str, uid: &Option<String>) -> Result<DHCPSubnet, DhcpError> {
        let fresh = self.store.get(name).await?;
        if fresh.metadata.uid != *uid {
            return Err(DhcpError::UidMismatch(name.to_string()));
        }
        Ok(fresh)
    }

    /// Mutate a subnet's status with optimistic concurrency
    ///
    /// The first attempt works on the cached copy; retries re-read the subnet
    /// and give up if it was re-created in the meantime. A mutation that
    /// changes nothing on the cached copy is re-applied to the store copy
    /// before the write is skipped. The map is refreshed with the copy that
    /// was written or read.
    pub async fn update_status<T, F>(&self, cached: &DHCPSubnet, mutate: F) -> Result<T, DhcpError>
    where
        F: Fn(&DHCPSubnetSpec, &mut DHCPSubnetStatus) -> Result<T, DhcpError>,
    {
        let name = cached.name_any();
        let uid = cached.metadata.uid.clone();
        let mutate = &mutate;
        let name = &name;
        let uid = &uid;

        let (written, out) = retry_on_conflict::<_, DhcpError, _, _>(self.backoff, |attempt| async move {
            let mut subnet = if attempt == 0 {
                cached.clone()
            } else {
                self.fetch(name, uid).await?
            };

            let mut status = subnet.status.clone().unwrap_or_default();
            let mut out = mutate(&subnet.spec, &mut status)?;
            if subnet.status.as_ref() == Some(&status) {
                if attempt > 0 {
                    return Ok((Some(subnet), out));
                }
                // The cache may lag the store; only a fresh copy can be a no-op
                subnet = self.fetch(name, uid).await?;
                status = subnet.status.clone().unwrap_or_default();
                out = mutate(&subnet.spec, &mut status)?;
                if subnet.status.as_ref() == Some(&status) {
                    return Ok((Some(subnet), out));
                }
            }
            subnet.status = Some(status);
            let written = self.store.update_status(&subnet).await?;
            Ok((Some(written), out))
        })
        .await?;

        if let Some(written) = written {
            self.subnets.upsert(written).await;
        }
        Ok(out)
    }

    /// Drop expired leases from every subnet, returning how many were dropped
    pub async fn cleanup(&self, now: DateTime<Utc>) -> usize {
        let mut removed = 0;
        for subnet in self.subnets.all().await {
            if !ipam::has_expired(subnet.status.as_ref(), now) {
                continue;
            }
            match self
                .update_status(&subnet, |_, status| Ok(ipam::remove_expired(status, now)))
                .await
            {
                Ok(n) => {
                    debug!("Removed {} expired leases from {}", n, subnet.name_any());
                    removed += n;
                }
                Err(e) => error!("Failed to clean up {}: {}", subnet.name_any(), e),
            }
        }
        removed
    }

    /// Sweep expired leases forever
    pub async fn run_cleanup(&self) {
        let mut interval = tokio::time::interval(CLEANUP_INTERVAL);
        loop {
            interval.tick().await;
            let removed = self.cleanup(Utc::now()).await;
            let (received, dropped) = self.metrics.totals();
            info!(
                "Lease cleanup removed {} leases; {} packets received, {} dropped",
                removed, received, dropped
            );
        }
    }
}

#[cfg(test)]
mod server_test;
