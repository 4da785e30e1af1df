// Host address discovery.
//
// The relay binds to the machine's primary IPv4 address rather than loopback
// or the wildcard, so the address it announces is the one it listens on. The
// routing table is asked which local address would carry an outbound packet:
// a UDP socket is `connect`ed to a documentation-range address and its local
// address read back. Nothing is sent.

use std::net::{IpAddr, Ipv4Addr, UdpSocket};

use tracing::debug;

use crate::error::RelayError;

/// TEST-NET-1; any routable address works.
const ROUTE_TARGET: (Ipv4Addr, u16) = (Ipv4Addr::new(192, 0, 2, 1), 9);

/// The host's primary non-loopback IPv4 address.
pub fn primary_ipv4() -> Result<Ipv4Addr, RelayError> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
    socket.connect(ROUTE_TARGET)?;
    let ip = socket.local_addr()?.ip();
    debug!(%ip, "routing table picked local address");
    usable_ipv4(ip).ok_or_else(|| {
        RelayError::AddressDiscovery(format!("routing table chose {ip}"))
    })
}

fn usable_ipv4(ip: IpAddr) -> Option<Ipv4Addr> {
    match ip {
        IpAddr::V4(ip) if !ip.is_loopback() && !ip.is_unspecified() => Some(ip),
        _ => None,
    }
}
