//! Connection bootstrap and the client handle.
//!
//! [`dial`] resolves the target, opens a datagram socket and hands it to
//! [`client`], which builds the connection object graph from one resolved
//! configuration and starts its background tasks:
//! 1. Observation registry
//! 2. Blockwise engine (if enabled)
//! 3. Handler container
//! 4. Transport wrapper and session
//! 5. Connection, then its run loop and (if configured) keepalive loop
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use coap_udp_client::Client;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Client::builder()
//!         .heartbeat(Duration::from_millis(50))
//!         .keepalive(None)
//!         .dial("127.0.0.1:5683")
//!         .await?;
//!
//!     let resp = client.get("/sensors/temp").await?;
//!     println!("{}: {:?}", resp.code(), resp.read_body());
//!     client.release(resp);
//!
//!     client.shutdown().await;
//!     Ok(())
//! }
//! ```

use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::blockwise::{BlockWise, PoolHooks, Szx};
use crate::config::{DialOption, DialOptions, ErrorFunc};
use crate::conn::ClientConn;
use crate::dispatch::GoPool;
use crate::error::{CoapError, Result};
use crate::handler::{HandlerContainer, HandlerFunc};
use crate::keepalive::KeepAlive;
use crate::message::MessagePool;
use crate::observation::ObservationRegistry;
use crate::session::Session;
use crate::transport::{Dialer, Network, Socket, UdpConn};

/// Dial `target` and return a running client.
///
/// Only datagram networks are accepted; a stream socket fails with
/// [`CoapError::UnsupportedConnectionType`].
pub async fn dial(target: &str, opts: impl IntoIterator<Item = DialOption>) -> Result<Client> {
    let cfg = DialOptions::resolve(opts);
    cfg.validate()?;

    let socket = cfg.dialer.dial(&cfg.ctx, cfg.network, target).await?;
    match socket {
        Socket::Udp(socket) => build(socket, cfg),
        other => {
            tracing::debug!("dial {} produced a {} socket", target, other.kind());
            Err(CoapError::UnsupportedConnectionType(other.kind()))
        }
    }
}

/// Build a client over an already connected datagram socket.
///
/// Must be called from within a tokio runtime. Failures of the background
/// tasks are reported to the configured error sink only.
pub fn client(socket: UdpSocket, opts: impl IntoIterator<Item = DialOption>) -> Result<Client> {
    let cfg = DialOptions::resolve(opts);
    cfg.validate()?;
    build(socket, cfg)
}

fn build(socket: UdpSocket, cfg: DialOptions) -> Result<Client> {
    let raddr = socket.peer_addr()?;

    let observations = Arc::new(ObservationRegistry::new());
    let blockwise = cfg.blockwise_enable.then(|| {
        BlockWise::new(
            PoolHooks::new(cfg.message_pool.clone(), observations.clone()),
            cfg.blockwise_transfer_timeout,
            cfg.errors.clone(),
            false,
        )
    });
    let handlers = Arc::new(HandlerContainer::new());

    let transport = UdpConn::new(socket, cfg.heartbeat, cfg.errors.clone());
    let session = Session::new(
        cfg.ctx.child_token(),
        transport,
        raddr,
        cfg.max_message_size,
        cfg.message_pool.clone(),
    );
    let conn = Arc::new(ClientConn::new(session, &cfg, handlers, observations, blockwise));

    let mut tasks = Vec::with_capacity(2);

    let runner = conn.clone();
    let errors = cfg.errors.clone();
    tasks.push(tokio::spawn(async move {
        if let Err(e) = runner.run().await {
            errors(e);
        }
    }));

    if let Some(keepalive) = cfg.keepalive {
        let pinger = conn.clone();
        let errors = cfg.errors.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = keepalive.run(&pinger).await {
                errors(e);
            }
        }));
    }

    tracing::debug!("connected to {} ({} background tasks)", raddr, tasks.len());
    Ok(Client { conn, tasks })
}

/// A running client connection.
///
/// Dereferences to the underlying [`ClientConn`] for requests.
pub struct Client {
    conn: Arc<ClientConn>,
    tasks: Vec<JoinHandle<()>>,
}

impl Client {
    /// Create a new client builder.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    pub fn conn(&self) -> &Arc<ClientConn> {
        &self.conn
    }

    /// Number of background tasks started for this connection.
    pub fn background_tasks(&self) -> usize {
        self.tasks.len()
    }

    /// Close the connection without waiting for its tasks.
    pub fn close(&self) {
        self.conn.close();
    }

    /// Close the connection and wait for its background tasks to finish.
    pub async fn shutdown(self) {
        self.conn.close();
        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::warn!("background task ended abnormally: {}", e);
            }
        }
    }
}

impl Deref for Client {
    type Target = Arc<ClientConn>;

    fn deref(&self) -> &Self::Target {
        &self.conn
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("conn", &self.conn)
            .field("tasks", &self.tasks.len())
            .finish()
    }
}

/// Fluent builder over [`DialOption`]s.
///
/// Options are applied in the order the builder methods are called.
#[derive(Debug, Default)]
pub struct ClientBuilder {
    opts: Vec<DialOption>,
}

impl ClientBuilder {
    /// Create a new client builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a raw option.
    pub fn option(mut self, opt: DialOption) -> Self {
        self.opts.push(opt);
        self
    }

    /// Parent cancellation scope.
    pub fn context(self, ctx: CancellationToken) -> Self {
        self.option(DialOption::Context(ctx))
    }

    /// Maximum encoded message size.
    ///
    /// Default: 64 KiB
    pub fn max_message_size(self, size: usize) -> Self {
        self.option(DialOption::MaxMessageSize(size))
    }

    /// Upper bound on one blocking read or write.
    ///
    /// Default: 100 ms
    pub fn heartbeat(self, heartbeat: Duration) -> Self {
        self.option(DialOption::HeartBeat(heartbeat))
    }

    /// Handler for inbound requests.
    pub fn handler(self, handler: HandlerFunc) -> Self {
        self.option(DialOption::Handler(handler))
    }

    /// Sink for background errors.
    ///
    /// Default: `tracing::error!`, visible only with a subscriber installed
    pub fn errors(self, errors: ErrorFunc) -> Self {
        self.option(DialOption::Errors(errors))
    }

    pub fn go_pool(self, pool: Arc<dyn GoPool>) -> Self {
        self.option(DialOption::GoPool(pool))
    }

    pub fn dialer(self, dialer: Dialer) -> Self {
        self.option(DialOption::Dialer(dialer))
    }

    /// Keepalive policy; `None` disables it.
    pub fn keepalive(self, keepalive: Option<KeepAlive>) -> Self {
        self.option(DialOption::KeepAlive(keepalive))
    }

    pub fn network(self, network: Network) -> Self {
        self.option(DialOption::Network(network))
    }

    /// Blockwise settings.
    ///
    /// Default: enabled, 1024-byte blocks, 3 s transfer timeout
    pub fn blockwise(self, enable: bool, szx: Szx, transfer_timeout: Duration) -> Self {
        self.option(DialOption::BlockwiseEnable(enable))
            .option(DialOption::BlockwiseSzx(szx))
            .option(DialOption::BlockwiseTransferTimeout(transfer_timeout))
    }

    /// Retransmission settings.
    ///
    /// Default: 1 s spacing, 2 s acknowledge timeout, 4 retransmissions
    pub fn transmission(self, n_start: Duration, ack_timeout: Duration, max_retransmit: u32) -> Self {
        self.option(DialOption::TransmissionNStart(n_start))
            .option(DialOption::TransmissionAcknowledgeTimeout(ack_timeout))
            .option(DialOption::TransmissionMaxRetransmit(max_retransmit))
    }

    /// Share a message pool with other connections.
    ///
    /// Default: a pool owned by this connection alone
    pub fn message_pool(self, pool: Arc<MessagePool>) -> Self {
        self.option(DialOption::MessagePool(pool))
    }

    /// Dial `target` with the collected options.
    pub async fn dial(self, target: &str) -> Result<Client> {
        dial(target, self.opts).await
    }

    /// Build a client over a connected socket with the collected options.
    pub fn connect(self, socket: UdpSocket) -> Result<Client> {
        client(socket, self.opts)
    }
}
