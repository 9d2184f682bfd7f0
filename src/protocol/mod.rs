//! Protocol module - message fields and the datagram wire format.
//!
//! This module implements the byte layer of CoAP over UDP:
//! - Codes, delivery types and tokens
//! - Ordered options with delta/length nibble encoding
//! - Header, token, options and payload marker encoding/decoding

mod codes;
mod msg_type;
mod options;
mod token;
mod wire_format;

pub use codes::Code;
pub use msg_type::Type;
pub use options::{decode_uint, encode_uint, CoapOption, MediaType, OptionId, Options};
pub use token::{Token, MAX_TOKEN_LEN};
pub use wire_format::{
    unmarshal, DecodedMessage, WireMessage, HEADER_SIZE, PAYLOAD_MARKER, VERSION,
};
