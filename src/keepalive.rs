//! Keepalive: periodic CoAP ping over an otherwise idle connection.

use std::time::Duration;

use crate::conn::ClientConn;
use crate::error::{CoapError, Result};

/// Default spacing between pings.
pub const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Default time a single ping may take.
pub const DEFAULT_KEEPALIVE_TIMEOUT: Duration = Duration::from_secs(10);

/// Default number of consecutive failed pings tolerated.
pub const DEFAULT_KEEPALIVE_MAX_RETRIES: u32 = 4;

/// Keepalive policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepAlive {
    pub interval: Duration,
    pub timeout: Duration,
    pub max_retries: u32,
}

impl Default for KeepAlive {
    fn default() -> Self {
        Self {
            interval: DEFAULT_KEEPALIVE_INTERVAL,
            timeout: DEFAULT_KEEPALIVE_TIMEOUT,
            max_retries: DEFAULT_KEEPALIVE_MAX_RETRIES,
        }
    }
}

impl KeepAlive {
    pub fn new(interval: Duration, timeout: Duration, max_retries: u32) -> Self {
        Self {
            interval,
            timeout,
            max_retries,
        }
    }

    /// Ping `conn` every interval until it closes.
    ///
    /// After `max_retries` consecutive unanswered pings the connection is
    /// closed and [`CoapError::KeepAliveTimeout`] is returned. A connection
    /// closed by someone else ends the loop with `Ok(())`.
    pub async fn run(&self, conn: &ClientConn) -> Result<()> {
        let done = conn.done().clone();
        let mut failures = 0u32;

        loop {
            tokio::select! {
                _ = done.cancelled() => return Ok(()),
                _ = tokio::time::sleep(self.interval) => {}
            }

            match tokio::time::timeout(self.timeout, conn.ping()).await {
                Ok(Ok(())) => failures = 0,
                Ok(Err(CoapError::Cancelled | CoapError::ConnectionClosed)) if done.is_cancelled() => {
                    return Ok(());
                }
                Ok(Err(e)) => {
                    failures += 1;
                    tracing::warn!("keepalive ping {} failed: {}", failures, e);
                }
                Err(_) => {
                    failures += 1;
                    tracing::warn!("keepalive ping {} timed out", failures);
                }
            }

            if failures >= self.max_retries {
                conn.close();
                return Err(CoapError::KeepAliveTimeout(failures));
            }
        }
    }
}
