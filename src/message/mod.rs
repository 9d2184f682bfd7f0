//! Message module - pooled wire messages and generic messages.
//!
//! Provides:
//! - [`PoolMessage`] / [`MessagePool`] - reusable messages with in-place codec
//! - [`Message`] - transport-agnostic message used by upper layers
//! - [`from_generic`] / [`to_generic`] - conversion between the two

mod convert;
mod generic;
mod pool;

pub use convert::{from_generic, to_generic, OPTIONS_SCRATCH_SIZE};
pub use generic::Message;
pub use pool::{MessagePool, PoolMessage, DEFAULT_BUFFER_CAPACITY, DEFAULT_MAX_IDLE};
