//! Local address and host name lookup for service records.

use crate::config::DiscoveryConfig;
use std::net::{IpAddr, Ipv4Addr, UdpSocket};
use tracing::warn;

/// Address of the interface used for outbound traffic.
///
/// Connecting a UDP socket selects a route without sending anything. Falls
/// back to loopback when the host has no route.
pub fn detect_local_ip() -> IpAddr {
    let probe = || -> std::io::Result<IpAddr> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
        socket.connect(DiscoveryConfig::PROBE_ADDR)?;
        Ok(socket.local_addr()?.ip())
    };

    match probe() {
        Ok(ip) if !ip.is_unspecified() => ip,
        Ok(_) => {
            warn!("No routable local address; advertising loopback");
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        }
        Err(e) => {
            warn!("Local address detection failed ({}); advertising loopback", e);
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        }
    }
}

/// This machine's host name, for DNS-SD host records.
pub fn host_name() -> String {
    sysinfo::System::host_name()
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}
