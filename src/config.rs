//! Dial configuration.
//!
//! Every knob is a [`DialOption`] variant. [`DialOptions::resolve`] starts
//! from the defaults and applies options in call order, so a later option
//! overrides an earlier one for the same field. The resolved snapshot is
//! read once when the connection is built and never changes afterwards.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use coap_udp_client::config::{DialOption, DialOptions};
//!
//! let opts = DialOptions::resolve([
//!     DialOption::HeartBeat(Duration::from_millis(50)),
//!     DialOption::KeepAlive(None),
//! ]);
//! assert_eq!(opts.heartbeat, Duration::from_millis(50));
//! assert!(opts.keepalive.is_none());
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::blockwise::Szx;
use crate::dispatch::{GoPool, TokioGoPool};
use crate::error::{CoapError, Result};
use crate::handler::{default_handler, HandlerFunc};
use crate::keepalive::KeepAlive;
use crate::message::MessagePool;
use crate::transport::{Dialer, Network};

/// Sink for errors raised outside any caller's stack.
pub type ErrorFunc = Arc<dyn Fn(CoapError) + Send + Sync>;

/// Default maximum encoded message size (64 KiB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Largest accepted maximum message size. No UDP datagram payload exceeds it.
pub const MAX_DATAGRAM_SIZE: usize = 64 * 1024;

/// Default I/O heartbeat.
pub const DEFAULT_HEARTBEAT: Duration = Duration::from_millis(100);

/// Default blockwise transfer timeout.
pub const DEFAULT_BLOCKWISE_TRANSFER_TIMEOUT: Duration = Duration::from_secs(3);

/// Default spacing before a retransmission.
pub const DEFAULT_TRANSMISSION_N_START: Duration = Duration::from_secs(1);

/// Default time to wait for an acknowledgement.
pub const DEFAULT_TRANSMISSION_ACK_TIMEOUT: Duration = Duration::from_secs(2);

/// Default number of retransmissions.
pub const DEFAULT_TRANSMISSION_MAX_RETRANSMIT: u32 = 4;

/// Error sink that logs through `tracing` at error level.
///
/// Nothing is printed unless the application installs a `tracing`
/// subscriber (for example one writing to stderr). Replace the sink with
/// [`DialOption::Errors`] to handle errors directly.
pub fn default_errors() -> ErrorFunc {
    Arc::new(|e: CoapError| tracing::error!("coap client: {}", e))
}

/// One configuration option.
pub enum DialOption {
    /// Parent cancellation scope of the connection.
    Context(CancellationToken),
    /// Maximum encoded message size, at most [`MAX_DATAGRAM_SIZE`].
    MaxMessageSize(usize),
    /// Upper bound on a single blocking read or write.
    HeartBeat(Duration),
    /// Handler for inbound requests.
    Handler(HandlerFunc),
    /// Sink for errors of the background tasks.
    ///
    /// The default is [`default_errors`], which is only visible with a
    /// `tracing` subscriber installed.
    Errors(ErrorFunc),
    GoPool(Arc<dyn GoPool>),
    Dialer(Dialer),
    /// `None` disables keepalive.
    KeepAlive(Option<KeepAlive>),
    Network(Network),
    BlockwiseEnable(bool),
    BlockwiseSzx(Szx),
    BlockwiseTransferTimeout(Duration),
    TransmissionNStart(Duration),
    TransmissionAcknowledgeTimeout(Duration),
    TransmissionMaxRetransmit(u32),
    /// Message pool shared with other connections.
    ///
    /// Without this option each connection gets its own pool, so messages
    /// are only recycled across connections that were given the same pool.
    /// Construct one pool per process and pass it to every dial.
    MessagePool(Arc<MessagePool>),
}

impl fmt::Debug for DialOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DialOption::Context(c) => f.debug_tuple("Context").field(c).finish(),
            DialOption::MaxMessageSize(v) => f.debug_tuple("MaxMessageSize").field(v).finish(),
            DialOption::HeartBeat(v) => f.debug_tuple("HeartBeat").field(v).finish(),
            DialOption::Handler(_) => f.write_str("Handler(..)"),
            DialOption::Errors(_) => f.write_str("Errors(..)"),
            DialOption::GoPool(_) => f.write_str("GoPool(..)"),
            DialOption::Dialer(d) => f.debug_tuple("Dialer").field(d).finish(),
            DialOption::KeepAlive(k) => f.debug_tuple("KeepAlive").field(k).finish(),
            DialOption::Network(n) => f.debug_tuple("Network").field(n).finish(),
            DialOption::BlockwiseEnable(v) => f.debug_tuple("BlockwiseEnable").field(v).finish(),
            DialOption::BlockwiseSzx(v) => f.debug_tuple("BlockwiseSzx").field(v).finish(),
            DialOption::BlockwiseTransferTimeout(v) => {
                f.debug_tuple("BlockwiseTransferTimeout").field(v).finish()
            }
            DialOption::TransmissionNStart(v) => f.debug_tuple("TransmissionNStart").field(v).finish(),
            DialOption::TransmissionAcknowledgeTimeout(v) => {
                f.debug_tuple("TransmissionAcknowledgeTimeout").field(v).finish()
            }
            DialOption::TransmissionMaxRetransmit(v) => {
                f.debug_tuple("TransmissionMaxRetransmit").field(v).finish()
            }
            DialOption::MessagePool(p) => f.debug_tuple("MessagePool").field(p).finish(),
        }
    }
}

/// Resolved configuration snapshot.
#[derive(Clone)]
pub struct DialOptions {
    pub ctx: CancellationToken,
    pub max_message_size: usize,
    pub heartbeat: Duration,
    pub handler: HandlerFunc,
    pub errors: ErrorFunc,
    pub go_pool: Arc<dyn GoPool>,
    pub dialer: Dialer,
    pub keepalive: Option<KeepAlive>,
    pub network: Network,
    pub blockwise_enable: bool,
    pub blockwise_szx: Szx,
    pub blockwise_transfer_timeout: Duration,
    pub transmission_n_start: Duration,
    pub transmission_ack_timeout: Duration,
    pub transmission_max_retransmit: u32,
    pub message_pool: Arc<MessagePool>,
}

impl Default for DialOptions {
    fn default() -> Self {
        Self {
            ctx: CancellationToken::new(),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            heartbeat: DEFAULT_HEARTBEAT,
            handler: default_handler(),
            errors: default_errors(),
            go_pool: Arc::new(TokioGoPool::new()),
            dialer: Dialer::default(),
            keepalive: Some(KeepAlive::default()),
            network: Network::Udp,
            blockwise_enable: true,
            blockwise_szx: Szx::Szx1024,
            blockwise_transfer_timeout: DEFAULT_BLOCKWISE_TRANSFER_TIMEOUT,
            transmission_n_start: DEFAULT_TRANSMISSION_N_START,
            transmission_ack_timeout: DEFAULT_TRANSMISSION_ACK_TIMEOUT,
            transmission_max_retransmit: DEFAULT_TRANSMISSION_MAX_RETRANSMIT,
            message_pool: Arc::new(MessagePool::new()),
        }
    }
}

impl DialOptions {
    /// Apply `opts` in order on top of the defaults.
    pub fn resolve(opts: impl IntoIterator<Item = DialOption>) -> Self {
        let mut cfg = Self::default();
        for opt in opts {
            cfg.apply(opt);
        }
        cfg
    }

    /// Apply a single option.
    pub fn apply(&mut self, opt: DialOption) {
        match opt {
            DialOption::Context(ctx) => self.ctx = ctx,
            DialOption::MaxMessageSize(v) => self.max_message_size = v,
            DialOption::HeartBeat(v) => self.heartbeat = v,
            DialOption::Handler(h) => self.handler = h,
            DialOption::Errors(e) => self.errors = e,
            DialOption::GoPool(p) => self.go_pool = p,
            DialOption::Dialer(d) => self.dialer = d,
            DialOption::KeepAlive(k) => self.keepalive = k,
            DialOption::Network(n) => self.network = n,
            DialOption::BlockwiseEnable(v) => self.blockwise_enable = v,
            DialOption::BlockwiseSzx(v) => self.blockwise_szx = v,
            DialOption::BlockwiseTransferTimeout(v) => self.blockwise_transfer_timeout = v,
            DialOption::TransmissionNStart(v) => self.transmission_n_start = v,
            DialOption::TransmissionAcknowledgeTimeout(v) => self.transmission_ack_timeout = v,
            DialOption::TransmissionMaxRetransmit(v) => self.transmission_max_retransmit = v,
            DialOption::MessagePool(p) => self.message_pool = p,
        }
    }

    /// Reject values the connection cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.max_message_size == 0 {
            return Err(CoapError::InvalidConfig("max message size must be positive"));
        }
        if self.max_message_size > MAX_DATAGRAM_SIZE {
            return Err(CoapError::InvalidConfig("max message size exceeds a UDP datagram"));
        }
        if self.heartbeat.is_zero() {
            return Err(CoapError::InvalidConfig("heartbeat must be positive"));
        }
        if self.transmission_ack_timeout.is_zero() {
            return Err(CoapError::InvalidConfig("acknowledge timeout must be positive"));
        }
        if let Some(k) = &self.keepalive {
            if k.interval.is_zero() || k.max_retries == 0 {
                return Err(CoapError::InvalidConfig(
                    "keepalive needs a positive interval and retry count",
                ));
            }
        }
        Ok(())
    }
}

impl fmt::Debug for DialOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DialOptions")
            .field("max_message_size", &self.max_message_size)
            .field("heartbeat", &self.heartbeat)
            .field("dialer", &self.dialer)
            .field("keepalive", &self.keepalive)
            .field("network", &self.network)
            .field("blockwise_enable", &self.blockwise_enable)
            .field("blockwise_szx", &self.blockwise_szx)
            .field("blockwise_transfer_timeout", &self.blockwise_transfer_timeout)
            .field("transmission_n_start", &self.transmission_n_start)
            .field("transmission_ack_timeout", &self.transmission_ack_timeout)
            .field("transmission_max_retransmit", &self.transmission_max_retransmit)
            .finish_non_exhaustive()
    }
}
