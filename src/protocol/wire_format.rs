//! Wire format encoding and decoding.
//!
//! Implements the RFC 7252 datagram layout:
//! ```text
//! ┌─────┬──────┬─────┬────────┬────────────┬──────────┬─────────┬──────┬─────────┐
//! │ Ver │ Type │ TKL │  Code  │ Message ID │  Token   │ Options │ 0xFF │ Payload │
//! │ 2b  │  2b  │ 4b  │ 1 byte │ uint16 BE  │ 0-8 byte │   ...   │      │   ...   │
//! └─────┴──────┴─────┴────────┴────────────┴──────────┴─────────┴──────┴─────────┘
//! ```
//!
//! Each option is `(delta, length, value)`, where delta and length are
//! 4-bit nibbles extended by one byte (nibble 13, value - 13) or two bytes
//! (nibble 14, value - 269). Nibble 15 is reserved for the payload marker.

use bytes::Bytes;

use super::codes::Code;
use super::msg_type::Type;
use super::options::{CoapOption, OptionId, Options};
use super::token::MAX_TOKEN_LEN;
use crate::error::{CoapError, Result};

/// Fixed header size in bytes.
pub const HEADER_SIZE: usize = 4;

/// Protocol version carried in the two top bits.
pub const VERSION: u8 = 1;

/// Separates options from the payload.
pub const PAYLOAD_MARKER: u8 = 0xFF;

const EXT_BYTE: u8 = 13;
const EXT_WORD: u8 = 14;
const NIBBLE_RESERVED: u8 = 15;
const EXT_BYTE_BASE: usize = 13;
const EXT_WORD_BASE: usize = 269;
const MAX_EXT_VALUE: usize = 0xFFFF + EXT_WORD_BASE;

/// Borrowed view of a message ready to be encoded.
#[derive(Debug, Clone, Copy)]
pub struct WireMessage<'a> {
    pub typ: Type,
    pub code: Code,
    pub message_id: u16,
    pub token: &'a [u8],
    pub options: &'a Options,
    pub payload: &'a [u8],
}

/// Header fields and payload of a decoded datagram.
///
/// Options are written into the caller's [`Options`] so its allocation
/// can be reused.
#[derive(Debug, Clone)]
pub struct DecodedMessage {
    pub typ: Type,
    pub code: Code,
    pub message_id: u16,
    pub token: Bytes,
    /// `None` when no payload marker was present.
    pub payload: Option<Bytes>,
}

/// Nibble and extension length for a delta or length value.
fn ext_nibble(v: usize) -> Result<(u8, usize)> {
    if v < EXT_BYTE_BASE {
        Ok((v as u8, 0))
    } else if v < EXT_WORD_BASE {
        Ok((EXT_BYTE, 1))
    } else if v <= MAX_EXT_VALUE {
        Ok((EXT_WORD, 2))
    } else {
        Err(CoapError::EncodingTooLarge("option value longer than 65804 bytes"))
    }
}

fn write_ext(buf: &mut [u8], pos: &mut usize, nibble: u8, v: usize) {
    match nibble {
        EXT_BYTE => {
            buf[*pos] = (v - EXT_BYTE_BASE) as u8;
            *pos += 1;
        }
        EXT_WORD => {
            let ext = (v - EXT_WORD_BASE) as u16;
            buf[*pos..*pos + 2].copy_from_slice(&ext.to_be_bytes());
            *pos += 2;
        }
        _ => {}
    }
}

fn read_ext(data: &[u8], pos: &mut usize, nibble: u8) -> Result<usize> {
    match nibble {
        EXT_BYTE => {
            let b = *data
                .get(*pos)
                .ok_or(CoapError::MalformedMessage("truncated option extension"))?;
            *pos += 1;
            Ok(usize::from(b) + EXT_BYTE_BASE)
        }
        EXT_WORD => {
            let ext = data
                .get(*pos..*pos + 2)
                .ok_or(CoapError::MalformedMessage("truncated option extension"))?;
            *pos += 2;
            Ok(usize::from(u16::from_be_bytes([ext[0], ext[1]])) + EXT_WORD_BASE)
        }
        NIBBLE_RESERVED => Err(CoapError::MalformedMessage("reserved option nibble")),
        n => Ok(usize::from(n)),
    }
}

impl<'a> WireMessage<'a> {
    /// Exact encoded size in bytes.
    pub fn size(&self) -> Result<usize> {
        if self.token.len() > MAX_TOKEN_LEN {
            return Err(CoapError::MalformedMessage("token longer than 8 bytes"));
        }
        let mut size = HEADER_SIZE + self.token.len();
        let mut prev = 0usize;
        for option in self.options {
            let delta = usize::from(option.id.0) - prev;
            let (_, delta_ext) = ext_nibble(delta)?;
            let (_, len_ext) = ext_nibble(option.value.len())?;
            size += 1 + delta_ext + len_ext + option.value.len();
            prev = usize::from(option.id.0);
        }
        if !self.payload.is_empty() {
            size += 1 + self.payload.len();
        }
        Ok(size)
    }

    /// Encode into `buf`, returning the number of bytes written.
    ///
    /// Fails with [`CoapError::TooSmall`] if `buf` is shorter than
    /// [`size`](Self::size).
    pub fn marshal_to(&self, buf: &mut [u8]) -> Result<usize> {
        let size = self.size()?;
        if buf.len() < size {
            return Err(CoapError::TooSmall {
                required: size,
                available: buf.len(),
            });
        }

        buf[0] = (VERSION << 6) | ((self.typ as u8) << 4) | self.token.len() as u8;
        buf[1] = self.code.0;
        buf[2..4].copy_from_slice(&self.message_id.to_be_bytes());
        let mut pos = HEADER_SIZE;
        buf[pos..pos + self.token.len()].copy_from_slice(self.token);
        pos += self.token.len();

        let mut prev = 0usize;
        for option in self.options {
            let delta = usize::from(option.id.0) - prev;
            let len = option.value.len();
            let (delta_nibble, _) = ext_nibble(delta)?;
            let (len_nibble, _) = ext_nibble(len)?;
            buf[pos] = (delta_nibble << 4) | len_nibble;
            pos += 1;
            write_ext(buf, &mut pos, delta_nibble, delta);
            write_ext(buf, &mut pos, len_nibble, len);
            buf[pos..pos + len].copy_from_slice(&option.value);
            pos += len;
            prev = usize::from(option.id.0);
        }

        if !self.payload.is_empty() {
            buf[pos] = PAYLOAD_MARKER;
            pos += 1;
            buf[pos..pos + self.payload.len()].copy_from_slice(self.payload);
            pos += self.payload.len();
        }

        debug_assert_eq!(pos, size);
        Ok(pos)
    }
}

/// Decode a datagram.
///
/// Option values, token and payload are zero-copy slices of `data`.
/// `options` is cleared first; on error it may hold a partial result and
/// must be discarded by the caller.
pub fn unmarshal(data: &Bytes, options: &mut Options) -> Result<(usize, DecodedMessage)> {
    options.clear();
    if data.len() < HEADER_SIZE {
        return Err(CoapError::MalformedMessage("message shorter than header"));
    }
    if data[0] >> 6 != VERSION {
        return Err(CoapError::MalformedMessage("unsupported version"));
    }
    let typ = Type::from_bits(data[0] >> 4);
    let token_len = usize::from(data[0] & 0x0f);
    if token_len > MAX_TOKEN_LEN {
        return Err(CoapError::MalformedMessage("token length above 8"));
    }
    let code = Code(data[1]);
    let message_id = u16::from_be_bytes([data[2], data[3]]);

    let mut pos = HEADER_SIZE;
    if data.len() < pos + token_len {
        return Err(CoapError::MalformedMessage("truncated token"));
    }
    let token = data.slice(pos..pos + token_len);
    pos += token_len;

    let mut payload = None;
    let mut prev = 0usize;
    while pos < data.len() {
        let b = data[pos];
        pos += 1;
        if b == PAYLOAD_MARKER {
            payload = Some(data.slice(pos..));
            pos = data.len();
            break;
        }
        let delta = read_ext(data, &mut pos, b >> 4)?;
        let len = read_ext(data, &mut pos, b & 0x0f)?;
        let id = prev + delta;
        let id = u16::try_from(id).map_err(|_| CoapError::MalformedMessage("option id overflow"))?;
        if data.len() - pos < len {
            return Err(CoapError::MalformedMessage("option length exceeds message"));
        }
        options.push_sorted(CoapOption {
            id: OptionId(id),
            value: data.slice(pos..pos + len),
        });
        pos += len;
        prev = usize::from(id);
    }

    Ok((
        pos,
        DecodedMessage {
            typ,
            code,
            message_id,
            token,
            payload,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(msg: &WireMessage<'_>) -> Vec<u8> {
        let mut buf = vec![0u8; msg.size().unwrap()];
        let n = msg.marshal_to(&mut buf).unwrap();
        buf.truncate(n);
        buf
    }

    #[test]
    fn test_known_get_request_bytes() {
        let mut opts = Options::new();
        opts.set_path("/temp");
        let msg = WireMessage {
            typ: Type::Confirmable,
            code: Code::GET,
            message_id: 0x1234,
            token: &[0xAA, 0xBB],
            options: &opts,
            payload: &[],
        };
        let bytes = encode(&msg);
        assert_eq!(
            bytes,
            vec![0x42, 0x01, 0x12, 0x34, 0xAA, 0xBB, 0xB4, b't', b'e', b'm', b'p']
        );
    }

    #[test]
    fn test_extended_delta_and_length() {
        let mut opts = Options::new();
        opts.add(OptionId::URI_PATH, vec![b'x'; 13]); // 1-byte length extension
        opts.add(OptionId::SIZE1, vec![b'y'; 300]); // 1-byte delta, 2-byte length
        let msg = WireMessage {
            typ: Type::NonConfirmable,
            code: Code::POST,
            message_id: 1,
            token: &[],
            options: &opts,
            payload: b"body",
        };
        let bytes = encode(&msg);

        // Uri-Path: delta 11, len 13 -> 0xBD 0x00
        assert_eq!(&bytes[4..6], &[0xBD, 0x00]);
        // Size1: delta 49 -> nibble 13 ext 36, len 300 -> nibble 14 ext 31
        let opt2 = 4 + 2 + 13;
        assert_eq!(&bytes[opt2..opt2 + 4], &[0xDE, 36, 0x00, 31]);
        assert_eq!(bytes.len(), msg.size().unwrap());

        let mut decoded_opts = Options::new();
        let (n, decoded) = unmarshal(&Bytes::from(bytes.clone()), &mut decoded_opts).unwrap();
        assert_eq!(n, bytes.len());
        assert_eq!(decoded_opts, opts);
        assert_eq!(decoded.payload.as_deref(), Some(&b"body"[..]));
        assert_eq!(decoded.code, Code::POST);
    }

    #[test]
    fn test_round_trip_preserves_repeated_options() {
        let mut opts = Options::new();
        opts.add(OptionId::URI_PATH, "a");
        opts.add(OptionId::URI_PATH, "b");
        opts.add(OptionId::URI_QUERY, "k=v");
        opts.add(OptionId::URI_PATH, "c");
        let msg = WireMessage {
            typ: Type::Acknowledgement,
            code: Code::CONTENT,
            message_id: 0xFFFF,
            token: &[1, 2, 3, 4, 5, 6, 7, 8],
            options: &opts,
            payload: &[0, 1, 2],
        };
        let bytes = Bytes::from(encode(&msg));

        let mut decoded_opts = Options::new();
        let (_, decoded) = unmarshal(&bytes, &mut decoded_opts).unwrap();
        assert_eq!(decoded.typ, Type::Acknowledgement);
        assert_eq!(decoded.message_id, 0xFFFF);
        assert_eq!(&decoded.token[..], &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(decoded_opts.path(), "/a/b/c");
        assert_eq!(decoded_opts, opts);
    }

    #[test]
    fn test_token_too_long_is_rejected() {
        let opts = Options::new();
        let msg = WireMessage {
            typ: Type::Confirmable,
            code: Code::GET,
            message_id: 1,
            token: &[0u8; 9],
            options: &opts,
            payload: &[],
        };
        assert!(matches!(msg.size(), Err(CoapError::MalformedMessage(_))));
    }

    #[test]
    fn test_marshal_to_short_buffer() {
        let opts = Options::new();
        let msg = WireMessage {
            typ: Type::Confirmable,
            code: Code::GET,
            message_id: 1,
            token: &[1, 2],
            options: &opts,
            payload: b"abc",
        };
        let mut buf = [0u8; 5];
        match msg.marshal_to(&mut buf) {
            Err(CoapError::TooSmall { required, .. }) => assert_eq!(required, 10),
            other => panic!("expected TooSmall, got {:?}", other),
        }
    }

    #[test]
    fn test_option_value_too_large() {
        let mut opts = Options::new();
        opts.add(OptionId::PROXY_URI, vec![0u8; MAX_EXT_VALUE + 1]);
        let msg = WireMessage {
            typ: Type::Confirmable,
            code: Code::GET,
            message_id: 1,
            token: &[],
            options: &opts,
            payload: &[],
        };
        assert!(matches!(msg.size(), Err(CoapError::EncodingTooLarge(_))));
    }

    fn decode_err(bytes: &[u8]) -> CoapError {
        let mut opts = Options::new();
        unmarshal(&Bytes::copy_from_slice(bytes), &mut opts).unwrap_err()
    }

    #[test]
    fn test_malformed_inputs() {
        // too short
        assert!(matches!(decode_err(&[0x40, 0x01]), CoapError::MalformedMessage(_)));
        // version 0
        assert!(matches!(decode_err(&[0x00, 0x01, 0, 1]), CoapError::MalformedMessage(_)));
        // token length 9
        assert!(matches!(decode_err(&[0x49, 0x01, 0, 1]), CoapError::MalformedMessage(_)));
        // truncated token
        assert!(matches!(
            decode_err(&[0x44, 0x01, 0, 1, 0xAA]),
            CoapError::MalformedMessage("truncated token")
        ));
        // option length exceeds remaining bytes
        assert!(matches!(
            decode_err(&[0x40, 0x01, 0, 1, 0xB5, b'a']),
            CoapError::MalformedMessage("option length exceeds message")
        ));
        // truncated extended length
        assert!(matches!(
            decode_err(&[0x40, 0x01, 0, 1, 0xBE, 0x00]),
            CoapError::MalformedMessage("truncated option extension")
        ));
        // reserved delta nibble
        assert!(matches!(
            decode_err(&[0x40, 0x01, 0, 1, 0xF1, 0x00]),
            CoapError::MalformedMessage("reserved option nibble")
        ));
    }

    #[test]
    fn test_marker_with_empty_payload() {
        let mut opts = Options::new();
        let data = Bytes::from_static(&[0x50, 0x45, 0x00, 0x07, 0xFF]);
        let (n, decoded) = unmarshal(&data, &mut opts).unwrap();
        assert_eq!(n, 5);
        assert_eq!(decoded.payload.as_deref(), Some(&[][..]));

        let data = Bytes::from_static(&[0x50, 0x45, 0x00, 0x07]);
        let (_, decoded) = unmarshal(&data, &mut opts).unwrap();
        assert!(decoded.payload.is_none());
    }
}
