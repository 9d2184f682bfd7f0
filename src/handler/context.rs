//! Response context handed to handlers.

use bytes::Bytes;

use crate::protocol::{Code, MediaType};

/// Collects the response a handler wants to send.
///
/// A handler that never calls [`set_response`](Self::set_response) sends
/// nothing beyond the protocol-level acknowledgement.
#[derive(Debug, Clone, Default)]
pub struct ResponseWriter {
    code: Option<Code>,
    content_format: Option<MediaType>,
    body: Option<Bytes>,
}

impl ResponseWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the response code, content format and body.
    ///
    /// Calling it again replaces the previous response.
    pub fn set_response(&mut self, code: Code, content_format: MediaType, body: Option<Bytes>) {
        self.code = Some(code);
        self.content_format = Some(content_format);
        self.body = body;
    }

    /// Response code, if a response was set.
    #[inline]
    pub fn code(&self) -> Option<Code> {
        self.code
    }

    #[inline]
    pub fn content_format(&self) -> Option<MediaType> {
        self.content_format
    }

    #[inline]
    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    /// Whether the handler produced a response.
    #[inline]
    pub fn has_response(&self) -> bool {
        self.code.is_some()
    }
}
