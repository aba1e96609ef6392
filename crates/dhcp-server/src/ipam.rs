//! Lease selection
//!
//! Pure functions over a subnet spec and its `status.allocated` map. The
//! caller persists the mutated status.

use crate::error::DhcpError;
use chrono::{DateTime, Duration, Utc};
use crds::{DHCPAllocated, DHCPSubnetSpec, DHCPSubnetStatus};
use ipnet::Ipv4Net;
use std::net::Ipv4Addr;

/// Offers are held this long before the client has to request them
pub const OFFER_HOLD_SECONDS: i64 = 60;

/// Lease time handed out on the first request in L3 mode
pub const L3_FIRST_LEASE_SECONDS: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseKind {
    Discover,
    Request,
}

/// What the client asked for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseRequest {
    /// Lowercase "aa:bb:cc:dd:ee:ff"
    pub mac: String,
    pub requested_ip: Option<Ipv4Addr>,
    pub hostname: String,
    pub kind: LeaseKind,
}

/// Result of a lease selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lease {
    pub ip: Ipv4Addr,
    /// Request that follows an offer or comes without any prior lease
    pub first_request: bool,
}

/// Parsed addresses of a subnet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubnetRange {
    pub cidr: Ipv4Net,
    pub gateway: Ipv4Addr,
    pub start: Ipv4Addr,
    pub end: Ipv4Addr,
}

impl SubnetRange {
    pub fn parse(spec: &DHCPSubnetSpec) -> Result<Self, DhcpError> {
        let invalid = |reason: String| DhcpError::InvalidSubnet {
            subnet: spec.subnet.clone(),
            reason,
        };
        let cidr: Ipv4Net = spec
            .cidr_block
            .parse()
            .map_err(|e| invalid(format!("CIDR {:?}: {e}", spec.cidr_block)))?;
        let addr = |field: &str, value: &str| {
            value
                .parse::<Ipv4Addr>()
                .map_err(|e| invalid(format!("{field} {value:?}: {e}")))
        };
        let range = Self {
            cidr: cidr.trunc(),
            gateway: addr("gateway", &spec.gateway)?,
            start: addr("start IP", &spec.start_ip)?,
            end: addr("end IP", &spec.end_ip)?,
        };
        if range.start > range.end {
            return Err(invalid(format!(
                "start IP {} is after end IP {}",
                range.start, range.end
            )));
        }
        Ok(range)
    }

    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        self.start <= ip && ip <= self.end
    }
}

/// Static binding of `mac`, MAC keys compared case-insensitively
pub fn static_ip(spec: &DHCPSubnetSpec, mac: &str) -> Option<Ipv4Addr> {
    spec.static_allocations
        .iter()
        .find(|(m, _)| m.eq_ignore_ascii_case(mac))
        .and_then(|(_, s)| s.ip.parse().ok())
}

fn held_by_other(status: &DHCPSubnetStatus, mac: &str, ip: Ipv4Addr) -> bool {
    status
        .allocated
        .iter()
        .any(|(m, a)| !m.eq_ignore_ascii_case(mac) && a.ip.parse::<Ipv4Addr>().ok() == Some(ip))
}

fn static_of_other(spec: &DHCPSubnetSpec, mac: &str, ip: Ipv4Addr) -> bool {
    spec.static_allocations
        .iter()
        .any(|(m, s)| !m.eq_ignore_ascii_case(mac) && s.ip.parse::<Ipv4Addr>().ok() == Some(ip))
}

/// Pick an address for the client and record it in `status`
///
/// Order: valid static binding, requested IP, previous lease, first free
/// address of the range. Dynamic candidates never hit the gateway or another
/// client's static binding.
pub fn allocate(
    spec: &DHCPSubnetSpec,
    status: &mut DHCPSubnetStatus,
    req: &LeaseRequest,
    now: DateTime<Utc>,
) -> Result<Lease, DhcpError> {
    let range = SubnetRange::parse(spec)?;
    let previous = status.allocated.get(&req.mac).cloned();

    let mut expiry = Some(match req.kind {
        LeaseKind::Discover => now + Duration::seconds(OFFER_HOLD_SECONDS),
        LeaseKind::Request => now + Duration::seconds(i64::from(spec.lease_time_seconds)),
    });

    let usable = |ip: Ipv4Addr| {
        range.contains(ip)
            && ip != range.gateway
            && !held_by_other(status, &req.mac, ip)
            && !static_of_other(spec, &req.mac, ip)
    };

    let static_binding = static_ip(spec, &req.mac)
        .filter(|ip| *ip != range.gateway && !held_by_other(status, &req.mac, *ip));

    let ip = if let Some(ip) = static_binding {
        expiry = None;
        ip
    } else if let Some(ip) = req.requested_ip.filter(|ip| usable(*ip)) {
        ip
    } else if let Some(ip) = previous
        .as_ref()
        .and_then(|p| p.ip.parse::<Ipv4Addr>().ok())
        .filter(|ip| usable(*ip))
    {
        ip
    } else {
        (u32::from(range.start)..=u32::from(range.end))
            .map(Ipv4Addr::from)
            .find(|ip| usable(*ip))
            .ok_or_else(|| DhcpError::NoAvailableIp(spec.subnet.clone()))?
    };

    let first_request =
        req.kind == LeaseKind::Request && previous.as_ref().is_none_or(|p| p.discover);

    status.allocated.insert(
        req.mac.clone(),
        DHCPAllocated {
            ip: ip.to_string(),
            expiry,
            hostname: req.hostname.clone(),
            discover: req.kind == LeaseKind::Discover,
        },
    );

    Ok(Lease { ip, first_request })
}

/// Forget the client's lease, true if there was one
pub fn release(status: &mut DHCPSubnetStatus, mac: &str) -> bool {
    status.allocated.remove(mac).is_some()
}

/// Drop every expired lease, returning how many were dropped
pub fn remove_expired(status: &mut DHCPSubnetStatus, now: DateTime<Utc>) -> usize {
    let before = status.allocated.len();
    status.allocated.retain(|_, a| !a.is_expired(now));
    before - status.allocated.len()
}

/// Whether any lease is expired
pub fn has_expired(status: Option<&DHCPSubnetStatus>, now: DateTime<Utc>) -> bool {
    status.is_some_and(|s| s.allocated.values().any(|a| a.is_expired(now)))
}
