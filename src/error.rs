//! Error types for coap-udp-client.

use thiserror::Error;

/// Main error type for all CoAP client operations.
#[derive(Debug, Error)]
pub enum CoapError {
    /// I/O error during socket operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Structurally invalid datagram (truncated token, bad option, etc.).
    #[error("Malformed message: {0}")]
    MalformedMessage(&'static str),

    /// A field cannot be represented in the wire format.
    #[error("Encoding too large: {0}")]
    EncodingTooLarge(&'static str),

    /// Destination buffer is shorter than the encoded data.
    #[error("Buffer too small: {required} bytes required, {available} available")]
    TooSmall {
        /// Exact number of bytes needed.
        required: usize,
        /// Number of bytes that were available.
        available: usize,
    },

    /// Generic message carries no cancellation context.
    #[error("Message has no context")]
    MissingContext,

    /// Dialing produced a socket that is not a datagram socket.
    #[error("Unsupported connection type: {0}")]
    UnsupportedConnectionType(&'static str),

    /// Unknown network name.
    #[error("Unsupported network: {0}")]
    UnsupportedNetwork(String),

    /// Encoded message exceeds the configured maximum message size.
    #[error("Message size {size} exceeds maximum {max}")]
    MessageTooLarge {
        /// Encoded size.
        size: usize,
        /// Configured maximum.
        max: usize,
    },

    /// Configuration rejected by validation.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(&'static str),

    /// Connection (or its registry) has been closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// No acknowledgement or response within the retransmission window.
    #[error("Timeout")]
    Timeout,

    /// The operation's context was cancelled.
    #[error("Cancelled")]
    Cancelled,

    /// The peer answered a confirmable message with Reset.
    #[error("Message {0} rejected by peer")]
    Rejected(u16),

    /// The dispatch strategy refused new work.
    #[error("Dispatch pool at capacity")]
    Overloaded,

    /// Keepalive gave up on an unresponsive peer.
    #[error("Keepalive: peer did not answer {0} pings")]
    KeepAliveTimeout(u32),
}

/// Result type alias using CoapError.
pub type Result<T> = std::result::Result<T, CoapError>;
