use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use crate::errors::QuicError;

/// A UDP address family. The reuse layer keeps the two strictly
/// separate; there is no v4/v6 bridging.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Network {
    Udp4,
    Udp6,
}

impl Network {
    pub fn of(addr: &SocketAddr) -> Network {
        if addr.is_ipv4() {
            Network::Udp4
        } else {
            Network::Udp6
        }
    }

    /// The family's wildcard address with an OS-chosen port.
    pub fn unspecified(&self) -> SocketAddr {
        match self {
            Network::Udp4 => SocketAddr::new(IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED), 0),
            Network::Udp6 => SocketAddr::new(IpAddr::V6(std::net::Ipv6Addr::UNSPECIFIED), 0),
        }
    }
}

impl std::fmt::Display for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Network::Udp4 => write!(f, "udp4"),
            Network::Udp6 => write!(f, "udp6"),
        }
    }
}

/// A composite transport address: `/ip4/A.B.C.D/udp/PORT/quic` or
/// `/ip6/…/udp/PORT/quic`.
///
/// The IP and port components map literally onto a UDP socket address;
/// the trailing component names this transport's protocol.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct PeerAddr {
    ip: IpAddr,
    port: u16,
}

impl PeerAddr {
    pub fn new(ip: IpAddr, port: u16) -> Self {
        Self { ip, port }
    }

    pub fn from_socket(addr: SocketAddr) -> Self {
        Self {
            ip: addr.ip(),
            port: addr.port(),
        }
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }

    pub fn ip(&self) -> IpAddr {
        self.ip
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn network(&self) -> Network {
        match self.ip {
            IpAddr::V4(_) => Network::Udp4,
            IpAddr::V6(_) => Network::Udp6,
        }
    }
}

impl std::fmt::Display for PeerAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.ip {
            IpAddr::V4(ip) => write!(f, "/ip4/{}/udp/{}/quic", ip, self.port),
            IpAddr::V6(ip) => write!(f, "/ip6/{}/udp/{}/quic", ip, self.port),
        }
    }
}

impl FromStr for PeerAddr {
    type Err = QuicError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || QuicError::Address(s.to_string());

        let mut parts = s.split('/');
        if parts.next() != Some("") {
            return Err(invalid());
        }

        let ip = match (parts.next(), parts.next()) {
            (Some("ip4"), Some(host)) => IpAddr::V4(host.parse().map_err(|_| invalid())?),
            (Some("ip6"), Some(host)) => IpAddr::V6(host.parse().map_err(|_| invalid())?),
            _ => return Err(invalid()),
        };

        let port = match (parts.next(), parts.next()) {
            (Some("udp"), Some(port)) => port.parse().map_err(|_| invalid())?,
            _ => return Err(invalid()),
        };

        if parts.next() != Some("quic") || parts.next().is_some() {
            return Err(invalid());
        }

        Ok(PeerAddr { ip, port })
    }
}

impl From<SocketAddr> for PeerAddr {
    fn from(addr: SocketAddr) -> Self {
        PeerAddr::from_socket(addr)
    }
}
