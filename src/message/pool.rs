//! Pooled messages for allocation-free datagram handling.
//!
//! A [`PoolMessage`] owns two scratch buffers: one holding the last
//! received datagram and one for marshaling. Both are reused by capacity
//! across [`MessagePool::release`] / [`MessagePool::acquire`] cycles, so a
//! steady stream of messages stops allocating once the buffers have grown
//! to the working size.
//!
//! # Usage
//!
//! ```
//! use coap_udp_client::message::MessagePool;
//! use coap_udp_client::protocol::{Code, Type};
//! use tokio_util::sync::CancellationToken;
//!
//! let pool = MessagePool::new();
//! let mut msg = pool.acquire(CancellationToken::new());
//! msg.set_code(Code::GET);
//! msg.set_type(Type::Confirmable);
//! msg.set_path("/sensors/temp");
//! let bytes = msg.marshal().unwrap().to_vec();
//! pool.release(msg);
//!
//! let mut decoded = pool.acquire(CancellationToken::new());
//! decoded.unmarshal(&bytes).unwrap();
//! assert_eq!(decoded.code(), Code::GET);
//! ```

use std::fmt;

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::protocol::{self, Code, MediaType, OptionId, Options, Token, Type, WireMessage};

/// Initial capacity of both scratch buffers.
pub const DEFAULT_BUFFER_CAPACITY: usize = 256;

/// Default number of idle messages retained by a pool.
pub const DEFAULT_MAX_IDLE: usize = 1024;

/// A reusable protocol message with transport fields.
pub struct PoolMessage {
    ctx: CancellationToken,
    code: Code,
    token: Token,
    options: Options,
    body: Option<Bytes>,
    message_id: u16,
    typ: Type,
    /// Copy of the last unmarshaled datagram; options and body slice into it.
    raw_data: BytesMut,
    raw_marshal_data: Vec<u8>,
    is_modified: bool,
}

impl PoolMessage {
    fn new(ctx: CancellationToken) -> Self {
        Self {
            ctx,
            code: Code::EMPTY,
            token: Token::EMPTY,
            options: Options::with_capacity(16),
            body: None,
            message_id: 0,
            typ: Type::NonConfirmable,
            raw_data: BytesMut::with_capacity(DEFAULT_BUFFER_CAPACITY),
            raw_marshal_data: Vec::with_capacity(DEFAULT_BUFFER_CAPACITY),
            is_modified: false,
        }
    }

    /// Clear every field for reuse. Buffers keep their capacity.
    pub fn reset(&mut self) {
        self.code = Code::EMPTY;
        self.token = Token::EMPTY;
        self.options.clear();
        self.body = None;
        self.message_id = 0;
        self.typ = Type::NonConfirmable;
        self.raw_data.clear();
        self.raw_marshal_data.clear();
        self.is_modified = false;
    }

    /// Lifetime scope this message was acquired with.
    #[inline]
    pub fn context(&self) -> &CancellationToken {
        &self.ctx
    }

    #[inline]
    pub fn code(&self) -> Code {
        self.code
    }

    pub fn set_code(&mut self, code: Code) {
        self.code = code;
        self.is_modified = true;
    }

    #[inline]
    pub fn token(&self) -> &Token {
        &self.token
    }

    pub fn set_token(&mut self, token: Token) {
        self.token = token;
        self.is_modified = true;
    }

    #[inline]
    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Replace all options with a copy of `options`.
    pub fn reset_options_to(&mut self, options: &Options) {
        self.options.reset_to(options);
        self.is_modified = true;
    }

    pub fn add_option(&mut self, id: OptionId, value: impl Into<Bytes>) {
        self.options.add(id, value);
        self.is_modified = true;
    }

    pub fn set_option(&mut self, id: OptionId, value: impl Into<Bytes>) {
        self.options.set(id, value);
        self.is_modified = true;
    }

    pub fn remove_option(&mut self, id: OptionId) {
        self.options.remove(id);
        self.is_modified = true;
    }

    pub fn set_path(&mut self, path: &str) {
        self.options.set_path(path);
        self.is_modified = true;
    }

    pub fn set_content_format(&mut self, media_type: MediaType) {
        self.options.set_content_format(media_type);
        self.is_modified = true;
    }

    pub fn set_observe(&mut self, v: u32) {
        self.options.set_observe(v);
        self.is_modified = true;
    }

    #[inline]
    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    pub fn set_body(&mut self, body: Option<Bytes>) {
        self.body = body;
        self.is_modified = true;
    }

    /// Body bytes, empty when there is no body.
    pub fn read_body(&self) -> Bytes {
        self.body.clone().unwrap_or_default()
    }

    #[inline]
    pub fn message_id(&self) -> u16 {
        self.message_id
    }

    pub fn set_message_id(&mut self, mid: u16) {
        self.message_id = mid;
        self.is_modified = true;
    }

    #[inline]
    pub fn message_type(&self) -> Type {
        self.typ
    }

    pub fn set_type(&mut self, typ: Type) {
        self.typ = typ;
        self.is_modified = true;
    }

    /// True if any field was set since acquisition or the last unmarshal.
    #[inline]
    pub fn is_modified(&self) -> bool {
        self.is_modified
    }

    /// Check if this is an empty ACK announcing a separate response.
    pub fn is_separate(&self) -> bool {
        self.code == Code::EMPTY
            && self.token.is_empty()
            && self.typ == Type::Acknowledgement
            && self.options.is_empty()
            && self.body.is_none()
    }

    /// Decode `data` into this message.
    ///
    /// The message is reset first; on error it stays empty. Returns the
    /// number of bytes consumed.
    pub fn unmarshal(&mut self, data: &[u8]) -> Result<usize> {
        self.reset();
        // reclaims the previous allocation once no slice of it is alive
        self.raw_data.reserve(data.len());
        self.raw_data.extend_from_slice(data);
        let raw = self.raw_data.split().freeze();

        match protocol::unmarshal(&raw, &mut self.options) {
            Ok((n, decoded)) => {
                self.code = decoded.code;
                self.token = Token::new(decoded.token);
                self.typ = decoded.typ;
                self.message_id = decoded.message_id;
                self.body = decoded.payload;
                Ok(n)
            }
            Err(e) => {
                self.options.clear();
                Err(e)
            }
        }
    }

    /// Encode this message into the internal marshal buffer.
    ///
    /// The buffer grows in place when the encoded size exceeds it; the
    /// returned slice is exactly the encoded size.
    pub fn marshal(&mut self) -> Result<&[u8]> {
        let payload = self.read_body();
        let wire = WireMessage {
            typ: self.typ,
            code: self.code,
            message_id: self.message_id,
            token: self.token.as_bytes(),
            options: &self.options,
            payload: &payload,
        };
        let size = wire.size()?;
        if self.raw_marshal_data.len() < size {
            self.raw_marshal_data.resize(size, 0);
        }
        let n = wire.marshal_to(&mut self.raw_marshal_data)?;
        self.raw_marshal_data.truncate(n);
        Ok(&self.raw_marshal_data)
    }

    #[cfg(test)]
    pub(crate) fn marshal_capacity(&self) -> usize {
        self.raw_marshal_data.capacity()
    }

    pub(crate) fn set_context(&mut self, ctx: CancellationToken) {
        self.ctx = ctx;
    }
}

impl fmt::Debug for PoolMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolMessage")
            .field("type", &self.typ)
            .field("message_id", &self.message_id)
            .field("code", &self.code)
            .field("token", &self.token)
            .field("options", &self.options)
            .field("body_len", &self.body.as_ref().map(|b| b.len()))
            .finish()
    }
}

impl fmt::Display for PoolMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Type: {}, MID: {}, Code: {}, Token: {}, Options: {}",
            self.typ, self.message_id, self.code, self.token, self.options
        )?;
        if let Some(body) = &self.body {
            write!(f, ", Body: {} bytes", body.len())?;
        }
        Ok(())
    }
}

/// Shared free-list of [`PoolMessage`] instances.
///
/// Construct one pool per process and hand it to every connection through
/// configuration. Distinct messages may be acquired and released from any
/// thread; a single message is exclusively owned by its holder.
pub struct MessagePool {
    idle: Mutex<Vec<PoolMessage>>,
    max_idle: usize,
}

impl MessagePool {
    /// Create a pool retaining up to [`DEFAULT_MAX_IDLE`] idle messages.
    pub fn new() -> Self {
        Self::with_max_idle(DEFAULT_MAX_IDLE)
    }

    /// Create a pool retaining up to `max_idle` idle messages.
    pub fn with_max_idle(max_idle: usize) -> Self {
        Self {
            idle: Mutex::new(Vec::new()),
            max_idle,
        }
    }

    /// Get an empty message bound to `ctx`.
    pub fn acquire(&self, ctx: CancellationToken) -> PoolMessage {
        let recycled = self.idle.lock().pop();
        match recycled {
            Some(mut msg) => {
                msg.reset();
                msg.set_context(ctx);
                msg
            }
            None => PoolMessage::new(ctx),
        }
    }

    /// Return a message to the pool.
    ///
    /// The message is consumed, so it cannot be touched after release.
    pub fn release(&self, mut msg: PoolMessage) {
        msg.reset();
        let mut idle = self.idle.lock();
        if idle.len() < self.max_idle {
            idle.push(msg);
        }
    }

    /// Number of idle messages ready for reuse.
    pub fn idle_count(&self) -> usize {
        self.idle.lock().len()
    }
}

impl Default for MessagePool {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MessagePool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessagePool")
            .field("idle", &self.idle_count())
            .field("max_idle", &self.max_idle)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoapError;

    fn sample(pool: &MessagePool) -> PoolMessage {
        let mut msg = pool.acquire(CancellationToken::new());
        msg.set_code(Code::PUT);
        msg.set_type(Type::Confirmable);
        msg.set_message_id(0xBEEF);
        msg.set_token(Token::copy_from_slice(&[9, 8, 7, 6]));
        msg.set_path("/actuators/led");
        msg.add_option(OptionId::URI_QUERY, "on=1");
        msg.set_content_format(MediaType::APP_JSON);
        msg.set_body(Some(Bytes::from_static(b"{\"on\":true}")));
        msg
    }

    #[test]
    fn test_marshal_unmarshal_round_trip() {
        let pool = MessagePool::new();
        let mut msg = sample(&pool);
        let bytes = msg.marshal().unwrap().to_vec();

        let mut decoded = pool.acquire(CancellationToken::new());
        let n = decoded.unmarshal(&bytes).unwrap();
        assert_eq!(n, bytes.len());
        assert_eq!(decoded.code(), Code::PUT);
        assert_eq!(decoded.message_type(), Type::Confirmable);
        assert_eq!(decoded.message_id(), 0xBEEF);
        assert_eq!(decoded.token(), msg.token());
        assert_eq!(decoded.options(), msg.options());
        assert_eq!(decoded.read_body(), msg.read_body());
        assert!(!decoded.is_modified());
    }

    #[test]
    fn test_release_then_acquire_is_clean() {
        let pool = MessagePool::new();
        let mut msg = sample(&pool);
        msg.marshal().unwrap();
        pool.release(msg);
        assert_eq!(pool.idle_count(), 1);

        let msg = pool.acquire(CancellationToken::new());
        assert_eq!(pool.idle_count(), 0);
        assert_eq!(msg.message_id(), 0);
        assert_eq!(msg.message_type(), Type::NonConfirmable);
        assert_eq!(msg.code(), Code::EMPTY);
        assert!(msg.token().is_empty());
        assert!(msg.options().is_empty());
        assert!(msg.body().is_none());
        assert!(!msg.is_modified());
    }

    #[test]
    fn test_release_keeps_buffer_capacity() {
        let pool = MessagePool::new();
        let mut msg = pool.acquire(CancellationToken::new());
        msg.set_body(Some(Bytes::from(vec![0x5A; 1000])));
        msg.marshal().unwrap();
        let grown = msg.marshal_capacity();
        assert!(grown >= 1000);
        pool.release(msg);

        let msg = pool.acquire(CancellationToken::new());
        assert_eq!(msg.marshal_capacity(), grown);
    }

    #[test]
    fn test_marshal_grows_buffer_without_corruption() {
        let pool = MessagePool::new();
        let mut msg = pool.acquire(CancellationToken::new());
        let body: Vec<u8> = (0..2000u32).map(|i| (i % 251) as u8).collect();
        msg.set_code(Code::POST);
        msg.set_token(Token::copy_from_slice(&[1]));
        msg.set_body(Some(Bytes::from(body.clone())));

        let encoded = msg.marshal().unwrap().to_vec();
        // header 4 + token 1 + marker 1 + body
        assert_eq!(encoded.len(), 4 + 1 + 1 + body.len());
        assert_eq!(&encoded[6..], &body[..]);

        let mut decoded = pool.acquire(CancellationToken::new());
        decoded.unmarshal(&encoded).unwrap();
        assert_eq!(&decoded.read_body()[..], &body[..]);
    }

    #[test]
    fn test_marshal_shrinks_to_encoded_size() {
        let pool = MessagePool::new();
        let mut msg = pool.acquire(CancellationToken::new());
        msg.set_body(Some(Bytes::from(vec![1u8; 500])));
        assert_eq!(msg.marshal().unwrap().len(), 4 + 1 + 500);

        msg.set_body(None);
        assert_eq!(msg.marshal().unwrap().len(), 4);
    }

    #[test]
    fn test_unmarshal_error_leaves_message_empty() {
        let pool = MessagePool::new();
        let mut msg = sample(&pool);
        // Uri-Path option claims 5 bytes, only 1 present
        let err = msg.unmarshal(&[0x42, 0x01, 0x00, 0x01, 0xAA, 0xBB, 0xB5, b'a']);
        assert!(matches!(err, Err(CoapError::MalformedMessage(_))));
        assert_eq!(msg.code(), Code::EMPTY);
        assert!(msg.token().is_empty());
        assert!(msg.options().is_empty());
        assert!(msg.body().is_none());
        assert_eq!(msg.message_id(), 0);
    }

    #[test]
    fn test_marshal_rejects_long_token() {
        let pool = MessagePool::new();
        let mut msg = pool.acquire(CancellationToken::new());
        msg.set_token(Token::copy_from_slice(&[0u8; 9]));
        assert!(matches!(msg.marshal(), Err(CoapError::MalformedMessage(_))));
    }

    #[test]
    fn test_is_separate() {
        let pool = MessagePool::new();
        let separate = || {
            let mut m = pool.acquire(CancellationToken::new());
            m.set_type(Type::Acknowledgement);
            m
        };
        assert!(separate().is_separate());

        let mut m = separate();
        m.set_code(Code::CONTENT);
        assert!(!m.is_separate());

        let mut m = separate();
        m.set_token(Token::copy_from_slice(&[1]));
        assert!(!m.is_separate());

        let mut m = separate();
        m.set_type(Type::Confirmable);
        assert!(!m.is_separate());

        let mut m = separate();
        m.add_option(OptionId::MAX_AGE, Bytes::new());
        assert!(!m.is_separate());

        let mut m = separate();
        m.set_body(Some(Bytes::new()));
        assert!(!m.is_separate());
    }

    #[test]
    fn test_is_separate_from_wire() {
        let pool = MessagePool::new();
        let mut m = pool.acquire(CancellationToken::new());
        m.unmarshal(&[0x60, 0x00, 0x12, 0x34]).unwrap();
        assert!(m.is_separate());
        assert_eq!(m.message_id(), 0x1234);
    }

    #[test]
    fn test_modified_flag_tracks_transport_fields() {
        let pool = MessagePool::new();
        let mut m = pool.acquire(CancellationToken::new());
        assert!(!m.is_modified());
        m.set_message_id(5);
        assert!(m.is_modified());

        let mut m = pool.acquire(CancellationToken::new());
        m.set_type(Type::Reset);
        assert!(m.is_modified());

        let mut m = pool.acquire(CancellationToken::new());
        m.set_code(Code::GET);
        assert!(m.is_modified());
    }

    #[test]
    fn test_acquire_binds_context() {
        let pool = MessagePool::new();
        let ctx = CancellationToken::new();
        let m = pool.acquire(ctx.clone());
        pool.release(m);

        let m = pool.acquire(ctx.clone());
        ctx.cancel();
        assert!(m.context().is_cancelled());
    }

    #[test]
    fn test_pool_respects_max_idle() {
        let pool = MessagePool::with_max_idle(1);
        let a = pool.acquire(CancellationToken::new());
        let b = pool.acquire(CancellationToken::new());
        pool.release(a);
        pool.release(b);
        assert_eq!(pool.idle_count(), 1);
    }

    #[test]
    fn test_pool_across_threads() {
        let pool = std::sync::Arc::new(MessagePool::new());
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let pool = pool.clone();
                std::thread::spawn(move || {
                    for j in 0..100u16 {
                        let mut m = pool.acquire(CancellationToken::new());
                        m.set_message_id(i * 1000 + j);
                        let bytes = m.marshal().unwrap().to_vec();
                        let mut d = pool.acquire(CancellationToken::new());
                        d.unmarshal(&bytes).unwrap();
                        assert_eq!(d.message_id(), i * 1000 + j);
                        pool.release(m);
                        pool.release(d);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert!(pool.idle_count() <= 8);
    }
}
