//! Address resolution and socket dialing.

use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use tokio::net::{lookup_host, TcpStream, UdpSocket};
use tokio_util::sync::CancellationToken;

use crate::error::{CoapError, Result};

/// Default time allowed for resolving and connecting.
pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(3);

/// Transport kind and address family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Network {
    #[default]
    Udp,
    Udp4,
    Udp6,
    Tcp,
    Tcp4,
    Tcp6,
}

impl Network {
    /// Whether this network carries datagrams.
    pub fn is_datagram(self) -> bool {
        matches!(self, Network::Udp | Network::Udp4 | Network::Udp6)
    }

    /// Whether `addr` belongs to this network's address family.
    pub fn accepts(self, addr: &SocketAddr) -> bool {
        match self {
            Network::Udp | Network::Tcp => true,
            Network::Udp4 | Network::Tcp4 => addr.is_ipv4(),
            Network::Udp6 | Network::Tcp6 => addr.is_ipv6(),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Network::Udp => "udp",
            Network::Udp4 => "udp4",
            Network::Udp6 => "udp6",
            Network::Tcp => "tcp",
            Network::Tcp4 => "tcp4",
            Network::Tcp6 => "tcp6",
        }
    }
}

impl FromStr for Network {
    type Err = CoapError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "udp" => Ok(Network::Udp),
            "udp4" => Ok(Network::Udp4),
            "udp6" => Ok(Network::Udp6),
            "tcp" => Ok(Network::Tcp),
            "tcp4" => Ok(Network::Tcp4),
            "tcp6" => Ok(Network::Tcp6),
            other => Err(CoapError::UnsupportedNetwork(other.to_string())),
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A freshly dialed socket.
#[derive(Debug)]
pub enum Socket {
    Udp(UdpSocket),
    Tcp(TcpStream),
}

impl Socket {
    pub fn kind(&self) -> &'static str {
        match self {
            Socket::Udp(_) => "udp",
            Socket::Tcp(_) => "tcp",
        }
    }
}

/// Opens sockets to a target address.
#[derive(Debug, Clone)]
pub struct Dialer {
    /// Time allowed for resolution plus connection.
    pub timeout: Duration,
    /// Local address to bind datagram sockets to.
    pub local_addr: Option<SocketAddr>,
}

impl Default for Dialer {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_DIAL_TIMEOUT,
            local_addr: None,
        }
    }
}

impl Dialer {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            local_addr: None,
        }
    }

    /// Resolve `target` and connect a socket of kind `network`.
    ///
    /// Gives up with [`CoapError::Timeout`] after the dial timeout and with
    /// [`CoapError::Cancelled`] when `ctx` is cancelled. A socket that was
    /// opened but not yet returned is dropped in both cases.
    pub async fn dial(&self, ctx: &CancellationToken, network: Network, target: &str) -> Result<Socket> {
        tokio::select! {
            biased;
            _ = ctx.cancelled() => Err(CoapError::Cancelled),
            res = tokio::time::timeout(self.timeout, self.connect(network, target)) => {
                res.map_err(|_| CoapError::Timeout)?
            }
        }
    }

    async fn connect(&self, network: Network, target: &str) -> Result<Socket> {
        let addr = lookup_host(target)
            .await?
            .find(|a| network.accepts(a))
            .ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::AddrNotAvailable,
                    format!("no {} address for {}", network, target),
                )
            })?;
        tracing::debug!("dialing {} {}", network, addr);

        if !network.is_datagram() {
            return Ok(Socket::Tcp(TcpStream::connect(addr).await?));
        }

        let local = match self.local_addr {
            Some(local) => local,
            None if addr.is_ipv4() => SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
            None => SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0)),
        };
        let socket = UdpSocket::bind(local).await?;
        socket.connect(addr).await?;
        Ok(Socket::Udp(socket))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_from_str() {
        assert_eq!("udp".parse::<Network>().unwrap(), Network::Udp);
        assert_eq!("tcp6".parse::<Network>().unwrap(), Network::Tcp6);
        assert!(matches!(
            "sctp".parse::<Network>(),
            Err(CoapError::UnsupportedNetwork(n)) if n == "sctp"
        ));
        assert_eq!(Network::Udp4.to_string(), "udp4");
    }

    #[test]
    fn test_network_family_filter() {
        let v4: SocketAddr = "127.0.0.1:5683".parse().unwrap();
        let v6: SocketAddr = "[::1]:5683".parse().unwrap();
        assert!(Network::Udp.accepts(&v6));
        assert!(Network::Udp4.accepts(&v4));
        assert!(!Network::Udp4.accepts(&v6));
        assert!(!Network::Tcp6.accepts(&v4));
    }

    #[tokio::test]
    async fn test_dial_udp_connects() {
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let target = peer.local_addr().unwrap().to_string();

        let socket = Dialer::default()
            .dial(&CancellationToken::new(), Network::Udp, &target)
            .await
            .unwrap();
        match socket {
            Socket::Udp(s) => assert_eq!(s.peer_addr().unwrap(), peer.local_addr().unwrap()),
            other => panic!("unexpected socket {}", other.kind()),
        }
    }

    #[tokio::test]
    async fn test_dial_cancelled() {
        let ctx = CancellationToken::new();
        ctx.cancel();
        let res = Dialer::default()
            .dial(&ctx, Network::Udp, "127.0.0.1:5683")
            .await;
        assert!(matches!(res, Err(CoapError::Cancelled)));
    }

    #[tokio::test]
    async fn test_dial_family_mismatch() {
        let res = Dialer::default()
            .dial(&CancellationToken::new(), Network::Udp6, "127.0.0.1:5683")
            .await;
        assert!(matches!(res, Err(CoapError::Io(_))));
    }
}
