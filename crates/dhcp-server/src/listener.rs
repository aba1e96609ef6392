//! UDP listener
//!
//! Binds the server port, decodes each datagram, and sends replies back to the
//! relay (or broadcasts them for directly attached clients).

use crate::error::DhcpError;
use crate::server::DhcpServer;
use chrono::Utc;
use dhcproto::v4::{Decodable, Decoder, Encodable, Message};
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tracing::{debug, warn};

pub const SERVER_PORT: u16 = 67;
pub const CLIENT_PORT: u16 = 68;

/// Largest datagram read from the socket
const MAX_PACKET_SIZE: usize = 1500;

/// Bind the DHCP port, optionally pinned to one interface
pub fn bind_socket(interface: Option<&str>, port: u16) -> Result<UdpSocket, DhcpError> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;

    #[cfg(target_os = "linux")]
    if let Some(interface) = interface {
        socket.bind_device(Some(interface.as_bytes()))?;
    }
    #[cfg(not(target_os = "linux"))]
    if let Some(interface) = interface {
        warn!("Ignoring listen interface {} on this platform", interface);
    }

    socket.set_reuse_address(true)?;
    socket.set_broadcast(true)?;
    socket.set_nonblocking(true)?;
    let local = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port);
    socket.bind(&local.into())?;

    Ok(UdpSocket::from_std(socket.into())?)
}

/// Where the reply for `req` goes
pub fn reply_destination(req: &Message) -> SocketAddr {
    if req.giaddr().is_unspecified() {
        SocketAddr::from((Ipv4Addr::BROADCAST, CLIENT_PORT))
    } else {
        SocketAddr::from((req.giaddr(), SERVER_PORT))
    }
}

async fn handle_datagram(
    server: &DhcpServer,
    socket: &UdpSocket,
    bytes: &[u8],
    from: SocketAddr,
) -> Result<(), DhcpError> {
    let req = Message::decode(&mut Decoder::new(bytes))?;
    let Some(reply) = server.respond(&req, Utc::now()).await else {
        return Ok(());
    };
    let dest = reply_destination(&req);
    let encoded = reply.to_vec()?;
    socket.send_to(&encoded, dest).await?;
    debug!("Sent {} bytes to {} for request from {}", encoded.len(), dest, from);
    Ok(())
}

/// Serve packets until the socket fails
pub async fn serve(server: DhcpServer, socket: UdpSocket) -> Result<(), DhcpError> {
    let socket = Arc::new(socket);
    let mut buf = vec![0u8; MAX_PACKET_SIZE];

    loop {
        let (len, from) = socket.recv_from(&mut buf).await?;
        let bytes = buf[..len].to_vec();
        let server = server.clone();
        let socket = Arc::clone(&socket);

        tokio::spawn(async move {
            if let Err(e) = handle_datagram(&server, &socket, &bytes, from).await {
                server.metrics().dropped(e.reason());
                warn!("Failed to answer DHCP packet from {}: {}", from, e);
            }
        });
    }
}
