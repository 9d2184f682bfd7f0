//! Transport-agnostic message used by request builders and registries.

use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use crate::protocol::{Code, MediaType, Options, Token};

/// A message without transport fields (no message ID, no delivery type).
///
/// The body is held in memory and can be read any number of times.
#[derive(Debug, Clone, Default)]
pub struct Message {
    /// Lifetime scope of the request this message belongs to.
    pub context: Option<CancellationToken>,
    pub code: Code,
    pub token: Token,
    pub options: Options,
    pub body: Option<Bytes>,
}

impl Message {
    /// Create an empty message bound to `ctx`.
    pub fn new(ctx: CancellationToken) -> Self {
        Self {
            context: Some(ctx),
            ..Self::default()
        }
    }

    /// Build a request for `path`.
    pub fn request(ctx: CancellationToken, code: Code, path: &str) -> Self {
        let mut msg = Self::new(ctx);
        msg.code = code;
        msg.options.set_path(path);
        msg
    }

    /// Attach a body with its content format.
    pub fn with_body(mut self, media_type: MediaType, body: impl Into<Bytes>) -> Self {
        self.options.set_content_format(media_type);
        self.body = Some(body.into());
        self
    }
}
