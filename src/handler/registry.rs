//! Handler container keyed by token.
//!
//! Observations register a handler under the token of their request.
//! Notifications carrying that token are routed to it; everything else
//! falls through to the connection's default handler.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;

use super::ResponseWriter;
use crate::error::{CoapError, Result};
use crate::message::PoolMessage;
use crate::protocol::{Code, MediaType, Token};

/// Handler invoked for inbound requests and notifications.
pub type HandlerFunc = Arc<dyn Fn(&mut ResponseWriter, &PoolMessage) + Send + Sync>;

/// Handler answering 4.04 to GET, POST, PUT and DELETE.
///
/// Other codes get no response.
pub fn default_handler() -> HandlerFunc {
    Arc::new(|w: &mut ResponseWriter, r: &PoolMessage| match r.code() {
        Code::GET | Code::POST | Code::PUT | Code::DELETE => {
            w.set_response(Code::NOT_FOUND, MediaType::TEXT_PLAIN, None);
        }
        _ => {}
    })
}

/// Concurrent token → handler table.
#[derive(Default)]
pub struct HandlerContainer {
    handlers: DashMap<String, HandlerFunc>,
}

impl HandlerContainer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `token`.
    ///
    /// Fails if a handler is already registered for the token.
    pub fn insert(&self, token: &Token, handler: HandlerFunc) -> Result<()> {
        use dashmap::mapref::entry::Entry;

        match self.handlers.entry(token.as_key()) {
            Entry::Occupied(_) => Err(CoapError::InvalidConfig("token already has a handler")),
            Entry::Vacant(v) => {
                v.insert(handler);
                Ok(())
            }
        }
    }

    pub fn get(&self, token: &Token) -> Option<HandlerFunc> {
        self.handlers.get(&token.as_key()).map(|h| h.value().clone())
    }

    /// Remove and return the handler for `token`.
    pub fn pop(&self, token: &Token) -> Option<HandlerFunc> {
        self.handlers.remove(&token.as_key()).map(|(_, h)| h)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn clear(&self) {
        self.handlers.clear();
    }
}

impl fmt::Debug for HandlerContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerContainer")
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

/// Route messages with a registered token to their handler, the rest to `fallback`.
pub fn observation_handler(container: Arc<HandlerContainer>, fallback: HandlerFunc) -> HandlerFunc {
    Arc::new(move |w: &mut ResponseWriter, r: &PoolMessage| {
        match container.get(r.token()) {
            Some(h) => h(w, r),
            None => fallback(w, r),
        }
    })
}
