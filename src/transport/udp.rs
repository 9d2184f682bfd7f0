//! Connected datagram socket with heartbeat-bounded I/O.

use std::fmt;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;

use crate::config::ErrorFunc;
use crate::error::{CoapError, Result};

/// Datagram socket bound to one peer.
///
/// Reads and writes are split into heartbeat-long slices so the
/// cancellation scope is re-checked at least once per heartbeat.
pub struct UdpConn {
    socket: UdpSocket,
    heartbeat: Duration,
    errors: ErrorFunc,
}

impl UdpConn {
    pub fn new(socket: UdpSocket, heartbeat: Duration, errors: ErrorFunc) -> Self {
        Self {
            socket,
            heartbeat,
            errors,
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn peer_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.peer_addr()?)
    }

    #[inline]
    pub fn heartbeat(&self) -> Duration {
        self.heartbeat
    }

    /// Send one datagram.
    pub async fn write(&self, ctx: &CancellationToken, data: &[u8]) -> Result<()> {
        loop {
            if ctx.is_cancelled() {
                return Err(CoapError::Cancelled);
            }
            match tokio::time::timeout(self.heartbeat, self.socket.send(data)).await {
                Ok(Ok(_)) => return Ok(()),
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => continue,
            }
        }
    }

    /// Receive one datagram into `buf`.
    ///
    /// ICMP port-unreachable shows up as `ConnectionRefused` on a connected
    /// socket. It is reported to the error sink and the read continues.
    pub async fn read(&self, ctx: &CancellationToken, buf: &mut [u8]) -> Result<usize> {
        loop {
            let res = tokio::select! {
                _ = ctx.cancelled() => return Err(CoapError::Cancelled),
                res = tokio::time::timeout(self.heartbeat, self.socket.recv(buf)) => res,
            };
            match res {
                Ok(Ok(n)) => return Ok(n),
                Ok(Err(e)) if e.kind() == ErrorKind::ConnectionRefused => {
                    (self.errors)(e.into());
                }
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => {}
            }
        }
    }
}

impl fmt::Debug for UdpConn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UdpConn")
            .field("socket", &self.socket)
            .field("heartbeat", &self.heartbeat)
            .finish()
    }
}
