//! Task dispatch strategy for user handlers.
//!
//! The connection never runs a handler on its receive loop. Each inbound
//! request or notification is wrapped in a future and submitted to a
//! [`GoPool`], which decides where and when it runs.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::error::{CoapError, Result};

/// Boxed future submitted to a [`GoPool`].
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Default maximum number of handler tasks in flight.
pub const DEFAULT_MAX_CONCURRENT_HANDLERS: usize = 256;

/// Runs units of work on behalf of a connection.
pub trait GoPool: Send + Sync + 'static {
    /// Submit `task` without waiting for it to run.
    ///
    /// Returns [`CoapError::Overloaded`] if the work was refused.
    fn submit(&self, task: BoxFuture<'static, Result<()>>) -> Result<()>;
}

/// Spawns each task on the current tokio runtime, bounded by a semaphore.
///
/// Errors returned by a task are logged and otherwise dropped.
#[derive(Clone)]
pub struct TokioGoPool {
    permits: Arc<Semaphore>,
}

impl TokioGoPool {
    pub fn new() -> Self {
        Self::with_limit(DEFAULT_MAX_CONCURRENT_HANDLERS)
    }

    /// Allow at most `limit` tasks in flight.
    pub fn with_limit(limit: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(limit)),
        }
    }

    /// Number of tasks that can still be accepted.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}

impl Default for TokioGoPool {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TokioGoPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokioGoPool")
            .field("available", &self.available())
            .finish()
    }
}

impl GoPool for TokioGoPool {
    fn submit(&self, task: BoxFuture<'static, Result<()>>) -> Result<()> {
        let permit = match self.permits.clone().try_acquire_owned() {
            Ok(p) => p,
            Err(_) => {
                tracing::warn!("handler capacity reached, dropping task");
                return Err(CoapError::Overloaded);
            }
        };

        tokio::spawn(async move {
            // held until the task completes
            let _permit = permit;
            if let Err(e) = task.await {
                tracing::error!("handler task failed: {}", e);
            }
        });
        Ok(())
    }
}
