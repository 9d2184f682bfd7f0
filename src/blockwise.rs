//! Blockwise transfer hooks and engine.
//!
//! The engine never touches the message pool or the observation registry
//! directly. It is handed a [`BlockwiseHooks`] implementation that can
//! acquire and release messages and look up the request registered for a
//! token. [`PoolHooks`] is the implementation backed by a
//! [`MessagePool`] and an [`ObservationRegistry`].
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//! use coap_udp_client::blockwise::{BlockWise, PoolHooks};
//! use coap_udp_client::message::MessagePool;
//! use coap_udp_client::observation::ObservationRegistry;
//!
//! let hooks = PoolHooks::new(Arc::new(MessagePool::new()), Arc::new(ObservationRegistry::new()));
//! let bw = BlockWise::new(hooks, Duration::from_secs(3), Arc::new(|_err| {}), false);
//! assert!(!bw.is_server());
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use crate::config::ErrorFunc;
use crate::error::{CoapError, Result};
use crate::message::{Message, MessagePool, PoolMessage};
use crate::observation::ObservationRegistry;
use crate::protocol::{encode_uint, Code, OptionId, Options, Token};

/// Largest block number representable in a Block1/Block2 option.
pub const MAX_BLOCK_NUM: u32 = (1 << 20) - 1;

/// Block size exponent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Szx {
    Szx16 = 0,
    Szx32 = 1,
    Szx64 = 2,
    Szx128 = 3,
    Szx256 = 4,
    Szx512 = 5,
    Szx1024 = 6,
    /// Block-wise extension for reliable transports, 1024-byte units.
    Bert = 7,
}

impl Szx {
    /// Block size in bytes.
    pub fn size(self) -> usize {
        match self {
            Szx::Bert => 1024,
            szx => 1 << (4 + szx as u8),
        }
    }

    /// Decode from the three low bits of `v`.
    pub fn from_bits(v: u8) -> Self {
        match v & 0b111 {
            0 => Szx::Szx16,
            1 => Szx::Szx32,
            2 => Szx::Szx64,
            3 => Szx::Szx128,
            4 => Szx::Szx256,
            5 => Szx::Szx512,
            6 => Szx::Szx1024,
            _ => Szx::Bert,
        }
    }
}

/// Decoded Block1/Block2 option value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockOption {
    pub num: u32,
    pub more: bool,
    pub szx: Szx,
}

impl BlockOption {
    /// Encode as `num << 4 | more << 3 | szx`.
    pub fn encode(&self) -> Result<u32> {
        if self.num > MAX_BLOCK_NUM {
            return Err(CoapError::EncodingTooLarge("block number above 2^20 - 1"));
        }
        Ok((self.num << 4) | (u32::from(self.more) << 3) | self.szx as u32)
    }

    pub fn decode(v: u32) -> Self {
        Self {
            num: v >> 4,
            more: v & 0b1000 != 0,
            szx: Szx::from_bits((v & 0b111) as u8),
        }
    }

    /// Read a block option from `options`.
    pub fn from_options(options: &Options, id: OptionId) -> Option<Self> {
        options.get_uint(id).map(Self::decode)
    }

    /// Byte offset of this block in the full body.
    pub fn offset(&self) -> usize {
        self.num as usize * self.szx.size()
    }
}

/// Mutation capability the engine needs on the messages it assembles.
pub trait BlockwiseMessage: Send {
    fn set_code(&mut self, code: Code);
    fn set_token(&mut self, token: Token);
    fn reset_options_to(&mut self, options: &Options);
    fn set_option(&mut self, id: OptionId, value: Bytes);
    fn remove_option(&mut self, id: OptionId);
}

impl BlockwiseMessage for PoolMessage {
    fn set_code(&mut self, code: Code) {
        PoolMessage::set_code(self, code)
    }

    fn set_token(&mut self, token: Token) {
        PoolMessage::set_token(self, token)
    }

    fn reset_options_to(&mut self, options: &Options) {
        PoolMessage::reset_options_to(self, options)
    }

    fn set_option(&mut self, id: OptionId, value: Bytes) {
        PoolMessage::set_option(self, id, value)
    }

    fn remove_option(&mut self, id: OptionId) {
        PoolMessage::remove_option(self, id)
    }
}

/// Functions handed to the engine in place of the pool and registry.
pub trait BlockwiseHooks: Send + Sync {
    /// Message type produced by [`acquire`](Self::acquire).
    type Message: BlockwiseMessage;

    /// Borrow a message bound to `ctx`.
    fn acquire(&self, ctx: CancellationToken) -> Self::Message;

    /// Give back a message obtained from [`acquire`](Self::acquire).
    fn release(&self, msg: Self::Message);

    /// In-flight request registered under `token`.
    fn lookup(&self, token: &Token) -> Option<Arc<Message>>;
}

/// Hooks backed by a message pool and an observation registry.
#[derive(Debug, Clone)]
pub struct PoolHooks {
    pool: Arc<MessagePool>,
    observations: Arc<ObservationRegistry>,
}

impl PoolHooks {
    pub fn new(pool: Arc<MessagePool>, observations: Arc<ObservationRegistry>) -> Self {
        Self { pool, observations }
    }
}

impl BlockwiseHooks for PoolHooks {
    type Message = PoolMessage;

    fn acquire(&self, ctx: CancellationToken) -> PoolMessage {
        self.pool.acquire(ctx)
    }

    fn release(&self, msg: PoolMessage) {
        self.pool.release(msg)
    }

    fn lookup(&self, token: &Token) -> Option<Arc<Message>> {
        self.observations.get(token)
    }
}

/// Blockwise transfer engine.
pub struct BlockWise<H: BlockwiseHooks> {
    hooks: H,
    transfer_timeout: Duration,
    errors: ErrorFunc,
    is_server: bool,
}

impl<H: BlockwiseHooks> BlockWise<H> {
    /// Create an engine over `hooks`.
    ///
    /// `is_server` selects which side of a transfer this engine plays.
    pub fn new(hooks: H, transfer_timeout: Duration, errors: ErrorFunc, is_server: bool) -> Self {
        Self {
            hooks,
            transfer_timeout,
            errors,
            is_server,
        }
    }

    /// Maximum duration of one complete transfer.
    #[inline]
    pub fn transfer_timeout(&self) -> Duration {
        self.transfer_timeout
    }

    #[inline]
    pub fn is_server(&self) -> bool {
        self.is_server
    }

    /// Request registered under `token`.
    pub fn lookup(&self, token: &Token) -> Option<Arc<Message>> {
        self.hooks.lookup(token)
    }

    /// Build the request for the block after `received`.
    ///
    /// The original request is found by token; the new request carries its
    /// code, token and options (without Observe) plus the next Block2 value.
    /// Returns `None` if no request is registered for `token`.
    pub fn continuation_request(&self, token: &Token, received: BlockOption) -> Option<H::Message> {
        let original = self.hooks.lookup(token)?;
        let Some(ctx) = original.context.clone() else {
            (self.errors)(CoapError::MissingContext);
            return None;
        };

        let next = BlockOption {
            num: received.num + 1,
            more: false,
            szx: received.szx,
        };
        let value = match next.encode() {
            Ok(v) => v,
            Err(e) => {
                (self.errors)(e);
                return None;
            }
        };

        let mut req = self.hooks.acquire(ctx);
        req.set_code(original.code);
        req.set_token(original.token.clone());
        req.reset_options_to(&original.options);
        req.remove_option(OptionId::OBSERVE);
        req.set_option(OptionId::BLOCK2, encode_uint(value));
        Some(req)
    }

    /// Return a message the engine handed out.
    pub fn discard(&self, msg: H::Message) {
        self.hooks.release(msg)
    }
}

impl<H: BlockwiseHooks> fmt::Debug for BlockWise<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockWise")
            .field("transfer_timeout", &self.transfer_timeout)
            .field("is_server", &self.is_server)
            .finish()
    }
}
