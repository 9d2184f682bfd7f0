//! Session: one transport, one peer, one receive loop.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::error::{CoapError, Result};
use crate::message::{MessagePool, PoolMessage};
use crate::transport::UdpConn;

/// Owns the transport of a connection and frames datagrams as messages.
#[derive(Debug)]
pub struct Session {
    ctx: CancellationToken,
    conn: UdpConn,
    raddr: SocketAddr,
    max_message_size: usize,
    pool: Arc<MessagePool>,
}

impl Session {
    pub fn new(
        ctx: CancellationToken,
        conn: UdpConn,
        raddr: SocketAddr,
        max_message_size: usize,
        pool: Arc<MessagePool>,
    ) -> Self {
        Self {
            ctx,
            conn,
            raddr,
            max_message_size,
            pool,
        }
    }

    /// Scope cancelled when the session closes.
    #[inline]
    pub fn context(&self) -> &CancellationToken {
        &self.ctx
    }

    #[inline]
    pub fn remote_addr(&self) -> SocketAddr {
        self.raddr
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.conn.local_addr()
    }

    #[inline]
    pub fn max_message_size(&self) -> usize {
        self.max_message_size
    }

    #[inline]
    pub fn pool(&self) -> &Arc<MessagePool> {
        &self.pool
    }

    /// Encode `msg` and send it to the peer.
    pub async fn write_message(&self, msg: &mut PoolMessage) -> Result<()> {
        let data = msg.marshal()?;
        if data.len() > self.max_message_size {
            return Err(CoapError::MessageTooLarge {
                size: data.len(),
                max: self.max_message_size,
            });
        }
        self.conn.write(&self.ctx, data).await
    }

    /// Receive datagrams until the session closes, passing each decoded
    /// message to `process`.
    ///
    /// Datagrams that fail to decode or exceed the maximum size are dropped.
    /// Returns `Ok(())` once the session is closed.
    pub async fn run<F, Fut>(&self, mut process: F) -> Result<()>
    where
        F: FnMut(PoolMessage) -> Fut,
        Fut: Future<Output = ()>,
    {
        // one spare byte detects oversized datagrams
        let mut buf = vec![0u8; self.max_message_size.saturating_add(1)];
        loop {
            let n = match self.conn.read(&self.ctx, &mut buf).await {
                Ok(n) => n,
                Err(CoapError::Cancelled) => return Ok(()),
                Err(e) => return Err(e),
            };
            if n > self.max_message_size {
                tracing::debug!("dropping oversized datagram from {}", self.raddr);
                continue;
            }

            let mut msg = self.pool.acquire(self.ctx.child_token());
            match msg.unmarshal(&buf[..n]) {
                Ok(_) => process(msg).await,
                Err(e) => {
                    tracing::debug!("dropping datagram from {}: {}", self.raddr, e);
                    self.pool.release(msg);
                }
            }
        }
    }

    /// Cancel the session scope. Pending reads and writes return.
    pub fn close(&self) {
        self.ctx.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.ctx.is_cancelled()
    }
}
