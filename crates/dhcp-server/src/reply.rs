//! Reply building
//!
//! Turns a lease into an OFFER or ACK carrying the subnet's options: router or
//! classless static routes (RFC 3442), DNS, NTP, MTU, default URL (option 114)
//! and PXE boot file.

use crate::ipam::{Lease, SubnetRange, L3_FIRST_LEASE_SECONDS};
use crds::DHCPSubnetSpec;
use dhcproto::v4::{DhcpOption, Message, MessageType, Opcode, OptionCode, UnknownOption};
use ipnet::Ipv4Net;
use std::net::Ipv4Addr;
use tracing::warn;
use url::Url;

/// Default URL option code
pub const OPTION_DEFAULT_URL: u8 = 114;

const BOOTP_FILE_LEN: usize = 128;

/// Everything needed to answer one client
#[derive(Debug, Clone, Copy)]
pub struct ReplyParams<'a> {
    pub spec: &'a DHCPSubnetSpec,
    pub range: &'a SubnetRange,
    pub lease: Lease,
    pub server_ip: Ipv4Addr,
}

/// Whether the client listed `code` in its parameter request list
pub fn requested(req: &Message, code: OptionCode) -> bool {
    matches!(
        req.opts().get(OptionCode::ParameterRequestList),
        Some(DhcpOption::ParameterRequestList(list)) if list.contains(&code)
    )
}

fn parse_ips(values: &[String], what: &str) -> Vec<Ipv4Addr> {
    values
        .iter()
        .filter_map(|v| match v.parse() {
            Ok(ip) => Some(ip),
            Err(e) => {
                warn!("Skipping {} {:?}: {}", what, v, e);
                None
            }
        })
        .collect()
}

/// Routes for option 121, empty when the router option should be used
pub fn classless_routes(
    req: &Message,
    spec: &DHCPSubnetSpec,
    range: &SubnetRange,
) -> Vec<(Ipv4Net, Ipv4Addr)> {
    let l3_no_default = spec.l3_mode && spec.disable_default_route;
    if !requested(req, OptionCode::ClasslessStaticRoute)
        || (spec.advertised_routes.is_empty() && !l3_no_default)
    {
        return Vec::new();
    }

    let mut routes = Vec::new();
    if !spec.disable_default_route {
        routes.push((Ipv4Net::default(), range.gateway));
    } else if spec.l3_mode {
        routes.push((range.cidr, range.gateway));
    }
    for route in &spec.advertised_routes {
        match (route.destination.parse::<Ipv4Net>(), route.gateway.parse::<Ipv4Addr>()) {
            (Ok(dst), Ok(gw)) => routes.push((dst.trunc(), gw)),
            _ => warn!(
                "Skipping advertised route {} via {} of {}",
                route.destination, route.gateway, spec.subnet
            ),
        }
    }
    routes
}

/// BOOTP file field, left empty when the name does not fit
fn set_file(reply: &mut Message, file: &[u8]) {
    if file.len() < BOOTP_FILE_LEN {
        reply.set_fname(file);
    }
}

fn pxe_options(req: &Message, reply: &mut Message, pxe_url: &str) {
    let url = match Url::parse(pxe_url) {
        Ok(url) => url,
        Err(e) => {
            warn!("Invalid PXE URL {:?}: {}", pxe_url, e);
            return;
        }
    };

    match url.scheme() {
        "http" | "https" | "ftp" => {
            set_file(reply, url.as_str().as_bytes());
            reply
                .opts_mut()
                .insert(DhcpOption::BootfileName(url.as_str().as_bytes().to_vec()));
            if let Some(class @ DhcpOption::ClassIdentifier(_)) =
                req.opts().get(OptionCode::ClassIdentifier)
            {
                reply.opts_mut().insert(class.clone());
            }
        }
        _ => {
            let file = url.path().trim_start_matches('/');
            set_file(reply, file.as_bytes());
            reply
                .opts_mut()
                .insert(DhcpOption::BootfileName(file.as_bytes().to_vec()));
            if let Some(host) = url.host_str() {
                reply
                    .opts_mut()
                    .insert(DhcpOption::TFTPServerName(host.as_bytes().to_vec()));
                // The TFTP host answers as server identifier
                if let Ok(ip) = host.parse::<Ipv4Addr>() {
                    reply.set_siaddr(ip);
                    reply.opts_mut().insert(DhcpOption::ServerIdentifier(ip));
                }
            }
        }
    }
}

/// Build the OFFER or ACK for `req`
pub fn build_reply(req: &Message, msg_type: MessageType, params: &ReplyParams<'_>) -> Message {
    let ReplyParams {
        spec,
        range,
        lease,
        server_ip,
    } = *params;

    let mut reply = Message::default();
    reply
        .set_opcode(Opcode::BootReply)
        .set_htype(req.htype())
        .set_hops(0)
        .set_xid(req.xid())
        .set_flags(req.flags())
        .set_ciaddr(req.ciaddr())
        .set_yiaddr(lease.ip)
        .set_giaddr(req.giaddr())
        .set_chaddr(req.chaddr());

    let lease_time = if spec.l3_mode && lease.first_request {
        L3_FIRST_LEASE_SECONDS
    } else {
        spec.lease_time_seconds
    };
    let mask = if spec.l3_mode {
        Ipv4Addr::BROADCAST
    } else {
        range.cidr.netmask()
    };

    let routes = classless_routes(req, spec, range);
    {
        let opts = reply.opts_mut();
        opts.insert(DhcpOption::MessageType(msg_type));
        opts.insert(DhcpOption::ServerIdentifier(server_ip));
        opts.insert(DhcpOption::AddressLeaseTime(lease_time));
        opts.insert(DhcpOption::SubnetMask(mask));

        if routes.is_empty() {
            opts.insert(DhcpOption::Router(vec![range.gateway]));
        } else {
            opts.insert(DhcpOption::ClasslessStaticRoute(routes));
        }

        let dns = parse_ips(&spec.dns_servers, "DNS server");
        if !dns.is_empty() {
            opts.insert(DhcpOption::DomainNameServer(dns));
        }
        let ntp = parse_ips(&spec.time_servers, "time server");
        if !ntp.is_empty() {
            opts.insert(DhcpOption::NtpServers(ntp));
        }
        if spec.interface_mtu > 0 {
            opts.insert(DhcpOption::InterfaceMtu(spec.interface_mtu));
        }
        if let Some(url) = spec.default_url.as_deref().filter(|u| !u.is_empty()) {
            opts.insert(DhcpOption::Unknown(UnknownOption::new(
                OptionCode::from(OPTION_DEFAULT_URL),
                url.as_bytes().to_vec(),
            )));
        }
        if let Some(relay @ DhcpOption::RelayAgentInformation(_)) =
            req.opts().get(OptionCode::RelayAgentInformation)
        {
            opts.insert(relay.clone());
        }
    }

    if let Some(pxe_url) = spec.pxe_url.as_deref().filter(|u| !u.is_empty())
        && (requested(req, OptionCode::TFTPServerName) || requested(req, OptionCode::BootfileName))
    {
        pxe_options(req, &mut reply, pxe_url);
    }

    reply
}
