//! UDP IP discovery, used to learn the address and port the voice server sees for this client.
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use discortp::discord::{IpDiscoveryPacket, IpDiscoveryType, MutableIpDiscoveryPacket};
use tokio::net::UdpSocket;
use tokio::time::timeout;
use tracing::{debug, instrument, warn};

use super::connection::error::{Error, Result};
use crate::constants::DISCOVERY_PACKET_LEN;

/// Where the address announced to the voice server came from.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DiscoveredAddr {
    /// The voice server answered the discovery request.
    External(SocketAddr),
    /// No valid answer arrived in time: the socket's own outbound address is used.
    ///
    /// This is only reachable from the server when no NAT sits between the two.
    Local(SocketAddr),
}

impl DiscoveredAddr {
    #[must_use]
    pub fn addr(self) -> SocketAddr {
        match self {
            Self::External(addr) | Self::Local(addr) => addr,
        }
    }
}

/// Builds the 74-byte discovery request for `ssrc`.
#[must_use]
pub fn request(ssrc: u32) -> [u8; DISCOVERY_PACKET_LEN] {
    let mut bytes = [0u8; DISCOVERY_PACKET_LEN];

    if let Some(mut view) = MutableIpDiscoveryPacket::new(&mut bytes[..]) {
        view.set_pkt_type(IpDiscoveryType::Request);
        view.set_length(70);
        view.set_ssrc(ssrc);
    }

    bytes
}

/// Parses the voice server's discovery response.
///
/// # Errors
///
/// Returns [`Error::IllegalDiscoveryResponse`] unless the reply is exactly 74 bytes of
/// response type 2, and [`Error::IllegalIp`] if the address field is not a NUL-terminated
/// textual IP.
pub fn parse_response(bytes: &[u8]) -> Result<SocketAddr> {
    if bytes.len() != DISCOVERY_PACKET_LEN {
        return Err(Error::IllegalDiscoveryResponse);
    }

    let view = IpDiscoveryPacket::new(bytes).ok_or(Error::IllegalDiscoveryResponse)?;

    if view.get_pkt_type() != IpDiscoveryType::Response {
        return Err(Error::IllegalDiscoveryResponse);
    }

    // UDP may be spoofed, so no trailing run of NULs is assumed: scan from the left.
    let address_raw = view.get_address_raw();
    let nul_byte_index =
        address_raw.iter().position(|&b| b == 0).ok_or(Error::IllegalIp)?;

    let address_str =
        std::str::from_utf8(&address_raw[..nul_byte_index]).map_err(|_| Error::IllegalIp)?;

    let address = IpAddr::from_str(address_str).map_err(|_| Error::IllegalIp)?;

    Ok(SocketAddr::new(address, view.get_port()))
}

/// Performs IP discovery over a connected socket.
///
/// # Errors
///
/// Fails on socket errors, a malformed response, or if no response arrives within `wait`.
#[instrument(skip(udp))]
pub async fn discover(udp: &UdpSocket, ssrc: u32, wait: Duration) -> Result<SocketAddr> {
    udp.send(&request(ssrc)).await?;

    // One spare byte, so oversized replies are visible as such.
    let mut bytes = [0u8; DISCOVERY_PACKET_LEN + 1];
    let len = timeout(wait, udp.recv(&mut bytes)).await.map_err(|_| Error::TimedOut)??;

    parse_response(&bytes[..len])
}

/// Performs IP discovery, falling back to the socket's local address on failure.
///
/// # Errors
///
/// Only fails if the socket cannot report its own local address.
pub async fn discover_or_local(
    udp: &UdpSocket,
    ssrc: u32,
    wait: Duration,
) -> Result<DiscoveredAddr> {
    match discover(udp, ssrc, wait).await {
        Ok(addr) => {
            debug!("IP discovery found {}.", addr);
            Ok(DiscoveredAddr::External(addr))
        },
        Err(why) => {
            let local = udp.local_addr()?;
            warn!("IP discovery failed ({}); announcing local address {}.", why, local);
            Ok(DiscoveredAddr::Local(local))
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(kind: u16, ip: &str, port: u16) -> [u8; DISCOVERY_PACKET_LEN] {
        let mut bytes = [0u8; DISCOVERY_PACKET_LEN];
        bytes[..2].copy_from_slice(&kind.to_be_bytes());
        bytes[2..4].copy_from_slice(&70u16.to_be_bytes());
        bytes[4..8].copy_from_slice(&1001u32.to_be_bytes());
        bytes[8..8 + ip.len()].copy_from_slice(ip.as_bytes());
        bytes[72..].copy_from_slice(&port.to_be_bytes());
        bytes
    }

    #[test]
    fn request_layout() {
        let bytes = request(0xdead_beef);

        assert_eq!(bytes.len(), 74);
        assert_eq!(&bytes[..8], &[0x00, 0x01, 0x00, 0x46, 0xde, 0xad, 0xbe, 0xef]);
        assert!(bytes[8..].iter().all(|&b| b == 0));
    }

    #[test]
    fn parses_valid_response() {
        let bytes = response(2, "203.0.113.5", 50000);

        assert_eq!(parse_response(&bytes).unwrap(), "203.0.113.5:50000".parse().unwrap());
    }

    #[test]
    fn rejects_wrong_type() {
        let bytes = response(1, "203.0.113.5", 50000);

        assert!(matches!(parse_response(&bytes), Err(Error::IllegalDiscoveryResponse)));
    }

    #[test]
    fn rejects_wrong_length() {
        let bytes = response(2, "203.0.113.5", 50000);

        assert!(matches!(parse_response(&bytes[..73]), Err(Error::IllegalDiscoveryResponse)));

        let mut long = bytes.to_vec();
        long.push(0);
        assert!(matches!(parse_response(&long), Err(Error::IllegalDiscoveryResponse)));
    }

    #[test]
    fn rejects_unterminated_or_garbage_address() {
        let mut bytes = response(2, "203.0.113.5", 50000);
        bytes[8..72].fill(b'1');
        assert!(matches!(parse_response(&bytes), Err(Error::IllegalIp)));

        let bytes = response(2, "not-an-ip", 50000);
        assert!(matches!(parse_response(&bytes), Err(Error::IllegalIp)));
    }
}
