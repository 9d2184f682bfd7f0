//! Registry of in-flight observe requests, indexed by token.
//!
//! The connection inserts a request when it starts observing a resource and
//! removes it when the observation is cancelled. The blockwise engine reads
//! it from other tasks to find the request a notification block belongs to,
//! so the table carries its own synchronization.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use crate::error::{CoapError, Result};
use crate::message::Message;
use crate::protocol::Token;

/// Concurrent token → request table owned by one connection.
#[derive(Debug, Default)]
pub struct ObservationRegistry {
    entries: DashMap<String, Arc<Message>>,
    closed: AtomicBool,
}

impl ObservationRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `request` under its token.
    ///
    /// Fails with [`CoapError::ConnectionClosed`] after [`close`](Self::close).
    pub fn insert(&self, request: Arc<Message>) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(CoapError::ConnectionClosed);
        }
        self.entries.insert(request.token.as_key(), request);
        // close() may have raced with the insert
        if self.closed.load(Ordering::Acquire) {
            self.entries.clear();
            return Err(CoapError::ConnectionClosed);
        }
        Ok(())
    }

    /// Request registered under `token`.
    pub fn get(&self, token: &Token) -> Option<Arc<Message>> {
        if self.closed.load(Ordering::Acquire) {
            return None;
        }
        self.entries.get(&token.as_key()).map(|e| e.value().clone())
    }

    /// Remove and return the request registered under `token`.
    pub fn remove(&self, token: &Token) -> Option<Arc<Message>> {
        self.entries.remove(&token.as_key()).map(|(_, v)| v)
    }

    /// Number of active observations.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop all entries and refuse further inserts.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.entries.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Code;
    use tokio_util::sync::CancellationToken;

    fn request(token: &[u8]) -> Arc<Message> {
        let mut m = Message::request(CancellationToken::new(), Code::GET, "/obs");
        m.token = Token::copy_from_slice(token);
        Arc::new(m)
    }

    #[test]
    fn test_insert_get_remove() {
        let registry = ObservationRegistry::new();
        registry.insert(request(&[1, 2])).unwrap();

        let token = Token::copy_from_slice(&[1, 2]);
        let found = registry.get(&token).unwrap();
        assert_eq!(found.options.path(), "/obs");
        assert!(registry.get(&Token::copy_from_slice(&[3])).is_none());

        assert!(registry.remove(&token).is_some());
        assert!(registry.get(&token).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_closed_registry_fails_safely() {
        let registry = ObservationRegistry::new();
        registry.insert(request(&[1])).unwrap();
        registry.close();

        assert!(registry.is_closed());
        assert!(registry.get(&Token::copy_from_slice(&[1])).is_none());
        assert!(matches!(
            registry.insert(request(&[2])),
            Err(CoapError::ConnectionClosed)
        ));
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn test_concurrent_writer_and_reader() {
        let registry = Arc::new(ObservationRegistry::new());

        let writer = {
            let registry = registry.clone();
            std::thread::spawn(move || {
                for i in 0..500u16 {
                    registry.insert(request(&i.to_be_bytes())).unwrap();
                    if i % 2 == 0 {
                        registry.remove(&Token::copy_from_slice(&i.to_be_bytes()));
                    }
                }
            })
        };
        let reader = {
            let registry = registry.clone();
            std::thread::spawn(move || {
                for i in 0..500u16 {
                    let _ = registry.get(&Token::copy_from_slice(&i.to_be_bytes()));
                }
            })
        };
        writer.join().unwrap();
        reader.join().unwrap();

        assert_eq!(registry.len(), 250);
    }
}
