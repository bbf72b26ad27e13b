//! UDP socket plumbing and the wire codec.

pub mod wire;

use std::net::{SocketAddr, UdpSocket};

use anyhow::{Context, Result};
use socket2::{Domain, Protocol, Socket, Type};
use tracing::info;

/// Build and bind the session's UDP socket, non-blocking so it can be
/// converted into a tokio socket.
pub fn bind_udp(local: SocketAddr) -> Result<UdpSocket> {
    let domain = if local.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };

    let socket =
        Socket::new(domain, Type::DGRAM, Some(Protocol::UDP)).context("Failed to create socket")?;

    socket
        .set_reuse_address(true)
        .context("Failed to set reuse address")?;

    socket
        .set_nonblocking(true)
        .context("Failed to set non-blocking")?;

    socket
        .bind(&local.into())
        .context(format!("Failed to bind {local}"))?;

    let socket: UdpSocket = socket.into();
    info!("UDP socket bound on {}", socket.local_addr()?);

    Ok(socket)
}
