//! Request/response correlation token.

use std::fmt;

use bytes::Bytes;

/// Maximum token length allowed on the wire.
pub const MAX_TOKEN_LEN: usize = 8;

/// Opaque token correlating a request with its response(s).
///
/// The type itself does not cap the length; the wire codec rejects
/// tokens longer than [`MAX_TOKEN_LEN`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Token(Bytes);

impl Token {
    /// The zero-length token.
    pub const EMPTY: Token = Token(Bytes::new());

    /// Create a token from bytes.
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    /// Copy a token from a slice.
    pub fn copy_from_slice(data: &[u8]) -> Self {
        Self(Bytes::copy_from_slice(data))
    }

    /// Generate a random 8-byte token.
    pub fn random() -> Self {
        let raw: [u8; MAX_TOKEN_LEN] = rand::random();
        Self(Bytes::copy_from_slice(&raw))
    }

    /// Token bytes.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Token length in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if the token is absent.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Lowercase hex encoding, used as the key of token-indexed tables.
    pub fn as_key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.0.iter() {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

impl From<&[u8]> for Token {
    fn from(data: &[u8]) -> Self {
        Self::copy_from_slice(data)
    }
}

impl From<Bytes> for Token {
    fn from(data: Bytes) -> Self {
        Self(data)
    }
}
