//! Handler module - inbound request and notification handling.
//!
//! Provides:
//! - [`HandlerFunc`] - user callback invoked for inbound messages
//! - [`ResponseWriter`] - collects the response a handler wants to send
//! - [`HandlerContainer`] - token-indexed handlers for observations
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use coap_udp_client::handler::{HandlerFunc, ResponseWriter};
//! use coap_udp_client::message::PoolMessage;
//! use coap_udp_client::protocol::{Code, MediaType};
//!
//! let echo: HandlerFunc = Arc::new(|w: &mut ResponseWriter, r: &PoolMessage| {
//!     w.set_response(Code::CONTENT, MediaType::TEXT_PLAIN, Some(r.read_body()));
//! });
//! # let _ = echo;
//! ```

mod context;
mod registry;

pub use context::ResponseWriter;
pub use registry::{default_handler, observation_handler, HandlerContainer, HandlerFunc};
