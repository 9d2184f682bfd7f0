//! Conversion between pooled wire messages and generic messages.

use bytes::Bytes;

use super::generic::Message;
use super::pool::{MessagePool, PoolMessage};
use crate::error::{CoapError, Result};
use crate::protocol::{CoapOption, Options};

/// Initial size of the scratch buffer used to pack option values.
pub const OPTIONS_SCRATCH_SIZE: usize = 64;

/// Copy a generic message into a freshly acquired pooled message.
///
/// # Errors
///
/// Returns [`CoapError::MissingContext`] if `m` has no context, since the
/// pooled message cannot be acquired without one.
pub fn from_generic(pool: &MessagePool, m: &Message) -> Result<PoolMessage> {
    let ctx = m.context.clone().ok_or(CoapError::MissingContext)?;
    let mut r = pool.acquire(ctx);
    r.set_code(m.code);
    r.reset_options_to(&m.options);
    r.set_body(m.body.clone());
    r.set_token(m.token.clone());
    Ok(r)
}

/// Copy a pooled message into a generic message.
///
/// Option values are packed into one shared buffer. If the default
/// scratch buffer is too small the packing is retried exactly once with a
/// buffer of the reported size; a second failure is returned as is.
pub fn to_generic(m: &PoolMessage) -> Result<Message> {
    let mut buf = vec![0u8; OPTIONS_SCRATCH_SIZE];
    let used = match m.options().copy_values_into(&mut buf) {
        Err(CoapError::TooSmall { required, .. }) => {
            buf.resize(required, 0);
            m.options().copy_values_into(&mut buf)?
        }
        res => res?,
    };
    buf.truncate(used);

    let storage = Bytes::from(buf);
    let mut options = Options::with_capacity(m.options().len());
    let mut offset = 0;
    for option in m.options() {
        let len = option.value.len();
        options.push_sorted(CoapOption {
            id: option.id,
            value: storage.slice(offset..offset + len),
        });
        offset += len;
    }

    // detach from the pooled receive buffer
    let body = m.body().map(|b| Bytes::copy_from_slice(b));

    Ok(Message {
        context: Some(m.context().clone()),
        code: m.code(),
        token: m.token().clone(),
        options,
        body,
    })
}
