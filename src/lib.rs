//! # coap-udp-client
//!
//! CoAP (RFC 7252) client over UDP.
//!
//! The crate is built around a pooled message codec: [`message::PoolMessage`]
//! decodes datagrams in place and encodes into a reusable buffer, and
//! [`message::MessagePool`] recycles messages across requests and
//! connections. On top of it, [`dial`] and [`client`] assemble a connection
//! from one resolved configuration and start its run loop and keepalive.
//!
//! ## Architecture
//!
//! - **Codec**: [`protocol`] wire format, [`message`] pooled and generic messages
//! - **Connection**: [`session`] receive loop, [`conn`] request/response matching
//!   and retransmission, [`keepalive`] pings
//! - **Extensions**: [`blockwise`] engine, [`observation`] registry, [`handler`]s
//!   run through a [`dispatch`] pool
//!
//! ## Example
//!
//! ```no_run
//! use coap_udp_client::{dial, DialOption};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), coap_udp_client::CoapError> {
//!     let client = dial("127.0.0.1:5683", [DialOption::KeepAlive(None)]).await?;
//!     let resp = client.get("/.well-known/core").await?;
//!     println!("{}", resp.code());
//!     client.release(resp);
//!     client.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod blockwise;
pub mod config;
pub mod conn;
pub mod dispatch;
pub mod error;
pub mod handler;
pub mod keepalive;
pub mod message;
pub mod observation;
pub mod protocol;
pub mod session;
pub mod transport;

mod client;

pub use client::{client, dial, Client, ClientBuilder};
pub use config::{DialOption, DialOptions, ErrorFunc};
pub use conn::{ClientConn, Observation, Transmission};
pub use error::{CoapError, Result};
pub use handler::{HandlerFunc, ResponseWriter};
pub use keepalive::KeepAlive;
pub use message::{Message, MessagePool, PoolMessage};
