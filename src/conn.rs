//! Client connection over one session.
//!
//! [`ClientConn`] assigns message IDs and tokens, retransmits confirmable
//! messages until they are acknowledged, matches piggybacked and separate
//! responses to their requests, and hands inbound requests and observe
//! notifications to handlers through the dispatch pool.

use std::fmt;
use std::hash::Hash;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use dashmap::DashMap;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::blockwise::{BlockOption, BlockWise, PoolHooks, Szx};
use crate::config::{DialOptions, ErrorFunc};
use crate::dispatch::{BoxFuture, GoPool};
use crate::error::{CoapError, Result};
use crate::handler::{observation_handler, HandlerContainer, HandlerFunc, ResponseWriter};
use crate::message::{from_generic, Message, MessagePool, PoolMessage};
use crate::observation::ObservationRegistry;
use crate::protocol::{encode_uint, Code, MediaType, OptionId, Token, Type};
use crate::session::Session;

/// Retransmission parameters for confirmable messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transmission {
    /// Extra spacing before each retransmission.
    pub n_start: Duration,
    /// Time a transmission waits for its acknowledgement.
    pub ack_timeout: Duration,
    /// Retransmissions after the first send.
    pub max_retransmit: u32,
}

impl Transmission {
    pub fn from_options(opts: &DialOptions) -> Self {
        Self {
            n_start: opts.transmission_n_start,
            ack_timeout: opts.transmission_ack_timeout,
            max_retransmit: opts.transmission_max_retransmit,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ack {
    Acknowledged,
    Reset,
}

enum Delivery {
    Ack(Ack),
    Response(PoolMessage),
}

/// Entry in a pending-exchange table, removed when the exchange ends or
/// its future is dropped.
struct Pending<'a, K: Eq + Hash, V> {
    table: &'a DashMap<K, V>,
    key: K,
}

impl<'a, K: Eq + Hash, V> Pending<'a, K, V> {
    fn insert(table: &'a DashMap<K, V>, key: K, value: V) -> Self
    where
        K: Clone,
    {
        table.insert(key.clone(), value);
        Self { table, key }
    }
}

impl<K: Eq + Hash, V> Drop for Pending<'_, K, V> {
    fn drop(&mut self) {
        self.table.remove(&self.key);
    }
}

/// A connection to one CoAP server.
pub struct ClientConn {
    session: Session,
    handler: HandlerFunc,
    handlers: Arc<HandlerContainer>,
    observations: Arc<ObservationRegistry>,
    blockwise: Option<BlockWise<PoolHooks>>,
    blockwise_szx: Szx,
    go_pool: Arc<dyn GoPool>,
    errors: ErrorFunc,
    transmission: Transmission,
    responses: DashMap<String, oneshot::Sender<PoolMessage>>,
    acks: DashMap<u16, oneshot::Sender<Ack>>,
    next_mid: AtomicU16,
}

impl ClientConn {
    /// Assemble a connection from its parts.
    ///
    /// Inbound messages are routed to the observation handler registered
    /// for their token first and to `opts.handler` otherwise.
    pub fn new(
        session: Session,
        opts: &DialOptions,
        handlers: Arc<HandlerContainer>,
        observations: Arc<ObservationRegistry>,
        blockwise: Option<BlockWise<PoolHooks>>,
    ) -> Self {
        Self {
            session,
            handler: observation_handler(handlers.clone(), opts.handler.clone()),
            handlers,
            observations,
            blockwise,
            blockwise_szx: opts.blockwise_szx,
            go_pool: opts.go_pool.clone(),
            errors: opts.errors.clone(),
            transmission: Transmission::from_options(opts),
            responses: DashMap::new(),
            acks: DashMap::new(),
            next_mid: AtomicU16::new(rand::random()),
        }
    }

    #[inline]
    pub fn session(&self) -> &Session {
        &self.session
    }

    #[inline]
    pub fn pool(&self) -> &Arc<MessagePool> {
        self.session.pool()
    }

    #[inline]
    pub fn observations(&self) -> &Arc<ObservationRegistry> {
        &self.observations
    }

    #[inline]
    pub fn handlers(&self) -> &Arc<HandlerContainer> {
        &self.handlers
    }

    #[inline]
    pub fn blockwise(&self) -> Option<&BlockWise<PoolHooks>> {
        self.blockwise.as_ref()
    }

    #[inline]
    pub fn transmission(&self) -> Transmission {
        self.transmission
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.session.remote_addr()
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.session.local_addr()
    }

    /// Scope cancelled when the connection closes.
    #[inline]
    pub fn done(&self) -> &CancellationToken {
        self.session.context()
    }

    pub fn is_closed(&self) -> bool {
        self.session.is_closed()
    }

    /// Close the connection.
    ///
    /// Pending requests fail with [`CoapError::ConnectionClosed`] and all
    /// observations are dropped.
    pub fn close(&self) {
        self.session.close();
        self.observations.close();
        self.handlers.clear();
        self.responses.clear();
        self.acks.clear();
    }

    /// Give a message back to the pool.
    pub fn release(&self, msg: PoolMessage) {
        self.pool().release(msg);
    }

    fn next_message_id(&self) -> u16 {
        self.next_mid.fetch_add(1, Ordering::Relaxed)
    }

    /// Receive loop. Returns when the connection closes.
    pub async fn run(self: &Arc<Self>) -> Result<()> {
        let res = self.session.run(|msg| self.process(msg)).await;
        self.close();
        res
    }

    async fn process(self: &Arc<Self>, msg: PoolMessage) {
        let mid = msg.message_id();
        let typ = msg.message_type();
        let code = msg.code();

        if code.is_empty() {
            match typ {
                // ping
                Type::Confirmable => self.send_empty(Type::Reset, mid).await,
                Type::Acknowledgement => self.complete_ack(mid, Ack::Acknowledged),
                Type::Reset => self.complete_ack(mid, Ack::Reset),
                Type::NonConfirmable => {}
            }
            self.release(msg);
            return;
        }

        if code.is_request() {
            self.dispatch_request(msg);
            return;
        }

        match typ {
            Type::Acknowledgement => self.complete_ack(mid, Ack::Acknowledged),
            Type::Confirmable => self.send_empty(Type::Acknowledgement, mid).await,
            Type::NonConfirmable => {}
            Type::Reset => {
                tracing::debug!("dropping reset carrying code {}", code);
                self.release(msg);
                return;
            }
        }

        if let Some((_, tx)) = self.responses.remove(&msg.token().as_key()) {
            if let Err(msg) = tx.send(msg) {
                self.release(msg);
            }
            return;
        }
        self.dispatch_notification(msg);
    }

    fn complete_ack(&self, mid: u16, ack: Ack) {
        if let Some((_, tx)) = self.acks.remove(&mid) {
            let _ = tx.send(ack);
        }
    }

    async fn send_empty(&self, typ: Type, mid: u16) {
        let mut msg = self.pool().acquire(self.done().child_token());
        msg.set_type(typ);
        msg.set_message_id(mid);
        if let Err(e) = self.session.write_message(&mut msg).await {
            (self.errors)(e);
        }
        self.release(msg);
    }

    fn submit(&self, task: BoxFuture<'static, Result<()>>) {
        if let Err(e) = self.go_pool.submit(task) {
            (self.errors)(e);
        }
    }

    fn dispatch_request(self: &Arc<Self>, msg: PoolMessage) {
        let conn = self.clone();
        self.submit(Box::pin(async move {
            let mut w = ResponseWriter::new();
            (conn.handler)(&mut w, &msg);
            let res = conn.reply(&msg, &w).await;
            conn.release(msg);
            res
        }));
    }

    async fn reply(&self, req: &PoolMessage, w: &ResponseWriter) -> Result<()> {
        let confirmable = req.message_type() == Type::Confirmable;
        let Some(code) = w.code() else {
            if confirmable {
                self.send_empty(Type::Acknowledgement, req.message_id()).await;
            }
            return Ok(());
        };

        let mut resp = self.pool().acquire(self.done().child_token());
        resp.set_code(code);
        resp.set_token(req.token().clone());
        if let Some(cf) = w.content_format() {
            resp.set_content_format(cf);
        }
        resp.set_body(w.body().cloned());
        if confirmable {
            resp.set_type(Type::Acknowledgement);
            resp.set_message_id(req.message_id());
        } else {
            resp.set_type(Type::NonConfirmable);
            resp.set_message_id(self.next_message_id());
        }

        let res = self.session.write_message(&mut resp).await;
        self.release(resp);
        res
    }

    fn dispatch_notification(self: &Arc<Self>, msg: PoolMessage) {
        let Some(handler) = self.handlers.get(msg.token()) else {
            tracing::debug!("dropping unmatched {} for token {}", msg.code(), msg.token());
            self.release(msg);
            return;
        };

        let conn = self.clone();
        self.submit(Box::pin(async move {
            let msg = match BlockOption::from_options(msg.options(), OptionId::BLOCK2) {
                Some(block) if block.more => {
                    let token = msg.token().clone();
                    conn.assemble(msg, block, |received| {
                        conn.blockwise
                            .as_ref()
                            .and_then(|bw| bw.continuation_request(&token, received))
                            .ok_or(CoapError::ConnectionClosed)
                    })
                    .await?
                }
                _ => msg,
            };
            let mut w = ResponseWriter::new();
            handler(&mut w, &msg);
            conn.release(msg);
            Ok::<(), CoapError>(())
        }));
    }

    /// Fetch the remaining Block2 blocks of `first` and join the bodies.
    ///
    /// `next_request` builds the request for the block after the one it is
    /// given. Without blockwise support `first` is returned as received.
    async fn assemble<F>(&self, mut first: PoolMessage, block: BlockOption, mut next_request: F) -> Result<PoolMessage>
    where
        F: FnMut(BlockOption) -> Result<PoolMessage>,
    {
        let Some(bw) = &self.blockwise else {
            return Ok(first);
        };
        let mut body = BytesMut::from(first.read_body().as_ref());

        let fetch = async {
            let mut block = block;
            while block.more {
                let req = next_request(block)?;
                let resp = self.do_request(req).await?;
                let next = BlockOption::from_options(resp.options(), OptionId::BLOCK2);
                body.extend_from_slice(&resp.read_body());
                self.release(resp);
                block = match next {
                    Some(b) if b.num == block.num + 1 => b,
                    _ => return Err(CoapError::MalformedMessage("unexpected block in transfer")),
                };
            }
            Ok::<(), CoapError>(())
        };
        let res = match tokio::time::timeout(bw.transfer_timeout(), fetch).await {
            Ok(res) => res,
            Err(_) => Err(CoapError::Timeout),
        };
        if let Err(e) = res {
            self.release(first);
            return Err(e);
        }

        first.remove_option(OptionId::BLOCK2);
        first.set_body(Some(body.freeze()));
        Ok(first)
    }

    /// Send a confirmable message and wait until it is acknowledged,
    /// reset or answered.
    ///
    /// Each transmission waits `ack_timeout`; every retransmission is
    /// preceded by a further `n_start`. After `max_retransmit`
    /// retransmissions the exchange fails with [`CoapError::Timeout`].
    async fn transmit(
        &self,
        ctx: &CancellationToken,
        msg: &mut PoolMessage,
        mut response: Option<&mut oneshot::Receiver<PoolMessage>>,
    ) -> Result<Delivery> {
        let mid = self.next_message_id();
        msg.set_type(Type::Confirmable);
        msg.set_message_id(mid);
        let (tx, mut ack_rx) = oneshot::channel();
        let _pending = Pending::insert(&self.acks, mid, tx);

        let max = self.transmission.max_retransmit;
        for attempt in 0..=max {
            if attempt > 0 {
                tracing::debug!("retransmitting message {} (attempt {})", mid, attempt);
            }
            self.session.write_message(msg).await?;

            let wait = if attempt < max {
                self.transmission.ack_timeout + self.transmission.n_start
            } else {
                self.transmission.ack_timeout
            };
            tokio::select! {
                ack = &mut ack_rx => {
                    return ack.map(Delivery::Ack).map_err(|_| CoapError::ConnectionClosed);
                }
                resp = recv_response(response.as_deref_mut()) => {
                    return resp.map(Delivery::Response);
                }
                _ = tokio::time::sleep(wait) => {}
                _ = ctx.cancelled() => return Err(CoapError::Cancelled),
                _ = self.done().cancelled() => return Err(CoapError::ConnectionClosed),
            }
        }
        Err(CoapError::Timeout)
    }

    /// Send `req` as a confirmable request and wait for its response.
    ///
    /// A token is generated if the request has none. The request is
    /// released once the exchange ends.
    pub async fn do_request(&self, mut req: PoolMessage) -> Result<PoolMessage> {
        if self.is_closed() {
            self.release(req);
            return Err(CoapError::ConnectionClosed);
        }
        if req.token().is_empty() {
            req.set_token(Token::random());
        }

        let (tx, rx) = oneshot::channel();
        let pending = Pending::insert(&self.responses, req.token().as_key(), tx);
        let res = self.exchange(&mut req, rx).await;
        drop(pending);
        self.release(req);
        self.closed_as_error(res)
    }

    // request scopes are children of the connection scope
    fn closed_as_error<T>(&self, res: Result<T>) -> Result<T> {
        match res {
            Err(CoapError::Cancelled) if self.is_closed() => Err(CoapError::ConnectionClosed),
            res => res,
        }
    }

    async fn exchange(
        &self,
        req: &mut PoolMessage,
        mut rx: oneshot::Receiver<PoolMessage>,
    ) -> Result<PoolMessage> {
        let ctx = req.context().clone();
        match self.transmit(&ctx, req, Some(&mut rx)).await? {
            Delivery::Response(resp) => return Ok(resp),
            Delivery::Ack(Ack::Reset) => return Err(CoapError::Rejected(req.message_id())),
            Delivery::Ack(Ack::Acknowledged) => {}
        }

        // separate response
        tokio::select! {
            resp = rx => resp.map_err(|_| CoapError::ConnectionClosed),
            _ = ctx.cancelled() => Err(CoapError::Cancelled),
            _ = self.done().cancelled() => Err(CoapError::ConnectionClosed),
        }
    }

    /// Pooled request for `path`, bound to this connection.
    pub fn new_request(&self, code: Code, path: &str) -> PoolMessage {
        let mut req = self.pool().acquire(self.done().child_token());
        req.set_code(code);
        req.set_token(Token::random());
        req.set_path(path);
        req
    }

    /// GET `path`.
    ///
    /// With blockwise enabled, a response split into Block2 blocks is
    /// fetched in full within the transfer timeout.
    pub async fn get(&self, path: &str) -> Result<PoolMessage> {
        let mut req = self.new_request(Code::GET, path);
        if self.blockwise.is_some() && self.blockwise_szx != Szx::Szx1024 {
            // ask for smaller blocks up front
            let block = BlockOption {
                num: 0,
                more: false,
                szx: self.blockwise_szx,
            };
            req.set_option(OptionId::BLOCK2, encode_uint(block.encode()?));
        }
        let resp = self.do_request(req).await?;
        match BlockOption::from_options(resp.options(), OptionId::BLOCK2) {
            Some(block) if block.more => {
                self.assemble(resp, block, |received| {
                    let next = BlockOption {
                        num: received.num + 1,
                        more: false,
                        szx: received.szx,
                    };
                    let value = encode_uint(next.encode()?);
                    let mut req = self.new_request(Code::GET, path);
                    req.set_option(OptionId::BLOCK2, value);
                    Ok(req)
                })
                .await
            }
            _ => Ok(resp),
        }
    }

    pub async fn post(&self, path: &str, content_format: MediaType, body: impl Into<Bytes>) -> Result<PoolMessage> {
        let mut req = self.new_request(Code::POST, path);
        req.set_content_format(content_format);
        req.set_body(Some(body.into()));
        self.do_request(req).await
    }

    pub async fn put(&self, path: &str, content_format: MediaType, body: impl Into<Bytes>) -> Result<PoolMessage> {
        let mut req = self.new_request(Code::PUT, path);
        req.set_content_format(content_format);
        req.set_body(Some(body.into()));
        self.do_request(req).await
    }

    pub async fn delete(&self, path: &str) -> Result<PoolMessage> {
        self.do_request(self.new_request(Code::DELETE, path)).await
    }

    /// CoAP ping: an empty confirmable message the peer answers with Reset.
    pub async fn ping(&self) -> Result<()> {
        let ctx = self.done().child_token();
        let mut msg = self.pool().acquire(ctx.clone());
        let res = self.transmit(&ctx, &mut msg, None).await;
        self.release(msg);
        match self.closed_as_error(res)? {
            Delivery::Ack(_) => Ok(()),
            Delivery::Response(resp) => {
                self.release(resp);
                Ok(())
            }
        }
    }

    /// Observe `path`.
    ///
    /// The first response is passed to `handler` before this returns;
    /// later notifications are passed to it from the dispatch pool. If the
    /// server does not accept the registration the returned observation is
    /// inactive and `handler` is not called again.
    pub async fn observe(self: &Arc<Self>, path: &str, handler: HandlerFunc) -> Result<Observation> {
        let token = Token::random();
        let mut request = Message::request(self.done().child_token(), Code::GET, path);
        request.token = token.clone();
        request.options.set_observe(0);
        let request = Arc::new(request);

        self.handlers.insert(&token, handler.clone())?;
        if let Err(e) = self.observations.insert(request.clone()) {
            self.handlers.pop(&token);
            return Err(e);
        }

        let res = match from_generic(self.pool(), &request) {
            Ok(req) => self.do_request(req).await,
            Err(e) => Err(e),
        };
        let resp = match res {
            Ok(resp) => resp,
            Err(e) => {
                self.forget_observation(&token);
                return Err(e);
            }
        };

        let active = resp.code().is_response() && resp.options().observe().is_some();
        let mut w = ResponseWriter::new();
        handler(&mut w, &resp);
        self.release(resp);
        if !active {
            tracing::debug!("{} is not observable", path);
            self.forget_observation(&token);
        }

        Ok(Observation {
            conn: self.clone(),
            token,
            path: path.to_string(),
            active,
        })
    }

    fn forget_observation(&self, token: &Token) {
        self.handlers.pop(token);
        self.observations.remove(token);
    }
}

async fn recv_response(rx: Option<&mut oneshot::Receiver<PoolMessage>>) -> Result<PoolMessage> {
    match rx {
        Some(rx) => rx.await.map_err(|_| CoapError::ConnectionClosed),
        None => std::future::pending().await,
    }
}

impl fmt::Debug for ClientConn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConn")
            .field("session", &self.session)
            .field("blockwise", &self.blockwise)
            .field("transmission", &self.transmission)
            .field("pending", &self.responses.len())
            .finish_non_exhaustive()
    }
}

/// An active observation started by [`ClientConn::observe`].
pub struct Observation {
    conn: Arc<ClientConn>,
    token: Token,
    path: String,
    active: bool,
}

impl Observation {
    pub fn token(&self) -> &Token {
        &self.token
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Whether the server accepted the registration.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Stop observing and deregister with the server.
    pub async fn cancel(self) -> Result<()> {
        self.conn.forget_observation(&self.token);
        if !self.active {
            return Ok(());
        }
        let mut req = self.conn.new_request(Code::GET, &self.path);
        req.set_token(self.token.clone());
        req.set_observe(1);
        let resp = self.conn.do_request(req).await?;
        self.conn.release(resp);
        Ok(())
    }
}

impl fmt::Debug for Observation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observation")
            .field("token", &self.token)
            .field("path", &self.path)
            .field("active", &self.active)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DialOption;
    use crate::transport::UdpConn;
    use tokio::net::UdpSocket;

    struct Peer {
        socket: UdpSocket,
        pool: MessagePool,
    }

    impl Peer {
        async fn recv(&self) -> PoolMessage {
            let mut buf = vec![0u8; 2048];
            let n = self.socket.recv(&mut buf).await.unwrap();
            let mut msg = self.pool.acquire(CancellationToken::new());
            msg.unmarshal(&buf[..n]).unwrap();
            msg
        }

        async fn send(&self, typ: Type, code: Code, mid: u16, token: &Token, body: Option<&'static [u8]>) {
            let mut msg = self.pool.acquire(CancellationToken::new());
            msg.set_type(typ);
            msg.set_code(code);
            msg.set_message_id(mid);
            msg.set_token(token.clone());
            msg.set_body(body.map(Bytes::from_static));
            self.socket.send(msg.marshal().unwrap()).await.unwrap();
        }

        async fn send_block(&self, req: &PoolMessage, block: BlockOption, body: &'static [u8]) {
            let mut msg = self.pool.acquire(CancellationToken::new());
            msg.set_type(Type::Acknowledgement);
            msg.set_code(Code::CONTENT);
            msg.set_message_id(req.message_id());
            msg.set_token(req.token().clone());
            msg.set_option(OptionId::BLOCK2, encode_uint(block.encode().unwrap()));
            msg.set_body(Some(Bytes::from_static(body)));
            self.socket.send(msg.marshal().unwrap()).await.unwrap();
        }
    }

    async fn connect(opts: impl IntoIterator<Item = DialOption>) -> (Arc<ClientConn>, Peer) {
        let opts = DialOptions::resolve(opts);
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        socket.connect(peer.local_addr().unwrap()).await.unwrap();
        peer.connect(socket.local_addr().unwrap()).await.unwrap();

        let raddr = peer.local_addr().unwrap();
        let session = Session::new(
            opts.ctx.child_token(),
            UdpConn::new(socket, opts.heartbeat, opts.errors.clone()),
            raddr,
            opts.max_message_size,
            opts.message_pool.clone(),
        );
        let observations = Arc::new(ObservationRegistry::new());
        let blockwise = opts.blockwise_enable.then(|| {
            BlockWise::new(
                PoolHooks::new(opts.message_pool.clone(), observations.clone()),
                opts.blockwise_transfer_timeout,
                opts.errors.clone(),
                false,
            )
        });
        let conn = Arc::new(ClientConn::new(
            session,
            &opts,
            Arc::new(HandlerContainer::new()),
            observations,
            blockwise,
        ));
        let runner = conn.clone();
        tokio::spawn(async move { runner.run().await });

        let peer = Peer {
            socket: peer,
            pool: MessagePool::new(),
        };
        (conn, peer)
    }

    fn fast() -> Vec<DialOption> {
        vec![
            DialOption::TransmissionNStart(Duration::from_millis(10)),
            DialOption::TransmissionAcknowledgeTimeout(Duration::from_millis(30)),
            DialOption::TransmissionMaxRetransmit(2),
            DialOption::HeartBeat(Duration::from_millis(20)),
        ]
    }

    #[tokio::test]
    async fn test_get_piggybacked_response() {
        let (conn, peer) = connect(fast()).await;

        let server = tokio::spawn(async move {
            let req = peer.recv().await;
            assert_eq!(req.message_type(), Type::Confirmable);
            assert_eq!(req.code(), Code::GET);
            assert_eq!(req.options().path(), "/temp");
            peer.send(
                Type::Acknowledgement,
                Code::CONTENT,
                req.message_id(),
                req.token(),
                Some(b"21.5"),
            )
            .await;
        });

        let resp = conn.get("/temp").await.unwrap();
        assert_eq!(resp.code(), Code::CONTENT);
        assert_eq!(resp.read_body(), Bytes::from_static(b"21.5"));
        conn.release(resp);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_separate_response_is_acknowledged() {
        let (conn, peer) = connect(fast()).await;

        let server = tokio::spawn(async move {
            let req = peer.recv().await;
            peer.send(Type::Acknowledgement, Code::EMPTY, req.message_id(), &Token::EMPTY, None)
                .await;
            tokio::time::sleep(Duration::from_millis(100)).await;
            peer.send(Type::Confirmable, Code::CHANGED, 0x7000, req.token(), None)
                .await;

            let ack = peer.recv().await;
            assert_eq!(ack.message_type(), Type::Acknowledgement);
            assert_eq!(ack.message_id(), 0x7000);
            assert!(ack.code().is_empty());
        });

        let resp = conn
            .put("/led", MediaType::TEXT_PLAIN, Bytes::from_static(b"on"))
            .await
            .unwrap();
        assert_eq!(resp.code(), Code::CHANGED);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_retransmits_then_times_out() {
        let (conn, peer) = connect(fast()).await;

        let res = conn.get("/silent").await;
        assert!(matches!(res, Err(CoapError::Timeout)));

        let first = peer.recv().await;
        for _ in 0..2 {
            let again = peer.recv().await;
            assert_eq!(again.message_id(), first.message_id());
            assert_eq!(again.token(), first.token());
        }
    }

    #[tokio::test]
    async fn test_dropped_request_leaves_no_pending_entries() {
        let (conn, _peer) = connect([
            DialOption::TransmissionAcknowledgeTimeout(Duration::from_secs(5)),
            DialOption::HeartBeat(Duration::from_millis(20)),
        ])
        .await;

        for _ in 0..5 {
            let res = tokio::time::timeout(Duration::from_millis(20), conn.get("/slow")).await;
            assert!(res.is_err());
        }
        assert_eq!(conn.responses.len(), 0);
        assert_eq!(conn.acks.len(), 0);

        let res = tokio::time::timeout(Duration::from_millis(20), conn.ping()).await;
        assert!(res.is_err());
        assert_eq!(conn.acks.len(), 0);
    }

    #[tokio::test]
    async fn test_get_fetches_remaining_blocks() {
        let mut opts = fast();
        opts.push(DialOption::BlockwiseSzx(Szx::Szx16));
        let (conn, peer) = connect(opts).await;

        let server = tokio::spawn(async move {
            let first = peer.recv().await;
            let hint = BlockOption::from_options(first.options(), OptionId::BLOCK2).unwrap();
            assert_eq!(hint.num, 0);
            assert_eq!(hint.szx, Szx::Szx16);
            let block = BlockOption {
                num: 0,
                more: true,
                szx: Szx::Szx16,
            };
            peer.send_block(&first, block, b"0123456789abcdef").await;

            let second = peer.recv().await;
            assert_eq!(second.code(), Code::GET);
            assert_eq!(second.options().path(), first.options().path());
            let next = BlockOption::from_options(second.options(), OptionId::BLOCK2).unwrap();
            assert_eq!(next.num, 1);
            let block = BlockOption {
                num: 1,
                more: false,
                szx: Szx::Szx16,
            };
            peer.send_block(&second, block, b"tail").await;
        });

        let resp = conn.get("/big").await.unwrap();
        assert_eq!(resp.read_body(), Bytes::from_static(b"0123456789abcdeftail"));
        assert!(resp.options().get(OptionId::BLOCK2).is_none());
        conn.release(resp);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_get_block_transfer_times_out() {
        let mut opts = fast();
        opts.push(DialOption::BlockwiseSzx(Szx::Szx16));
        opts.push(DialOption::BlockwiseTransferTimeout(Duration::from_millis(50)));
        let (conn, peer) = connect(opts).await;

        let server = tokio::spawn(async move {
            let first = peer.recv().await;
            let block = BlockOption {
                num: 0,
                more: true,
                szx: Szx::Szx16,
            };
            peer.send_block(&first, block, b"0123456789abcdef").await;
            peer
        });

        assert!(matches!(conn.get("/big").await, Err(CoapError::Timeout)));
        let _peer = server.await.unwrap();
    }

    #[tokio::test]
    async fn test_reset_rejects_request() {
        let (conn, peer) = connect(fast()).await;

        let server = tokio::spawn(async move {
            let req = peer.recv().await;
            peer.send(Type::Reset, Code::EMPTY, req.message_id(), &Token::EMPTY, None)
                .await;
        });

        assert!(matches!(
            conn.delete("/x").await,
            Err(CoapError::Rejected(_))
        ));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_ping_both_directions() {
        let (conn, peer) = connect(fast()).await;

        let server = tokio::spawn(async move {
            let ping = peer.recv().await;
            assert_eq!(ping.message_type(), Type::Confirmable);
            assert!(ping.code().is_empty());
            peer.send(Type::Reset, Code::EMPTY, ping.message_id(), &Token::EMPTY, None)
                .await;

            peer.send(Type::Confirmable, Code::EMPTY, 0x0101, &Token::EMPTY, None)
                .await;
            let pong = peer.recv().await;
            assert_eq!(pong.message_type(), Type::Reset);
            assert_eq!(pong.message_id(), 0x0101);
        });

        conn.ping().await.unwrap();
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_close_fails_pending_request() {
        let (conn, _peer) = connect([
            DialOption::TransmissionAcknowledgeTimeout(Duration::from_secs(5)),
            DialOption::HeartBeat(Duration::from_millis(20)),
        ])
        .await;

        let closer = conn.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            closer.close();
        });

        assert!(matches!(
            conn.get("/slow").await,
            Err(CoapError::ConnectionClosed)
        ));
        assert!(conn.is_closed());
        assert!(conn.observations().is_closed());
    }
}
