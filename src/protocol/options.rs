//! Message options.
//!
//! Options are kept sorted by numeric id so they can be delta-encoded
//! directly. Options sharing an id keep their insertion order, which is
//! significant for repeatable options such as Uri-Path.

use std::fmt;

use bytes::Bytes;

use crate::error::{CoapError, Result};

/// Numeric option identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OptionId(pub u16);

impl OptionId {
    pub const IF_MATCH: OptionId = OptionId(1);
    pub const URI_HOST: OptionId = OptionId(3);
    pub const ETAG: OptionId = OptionId(4);
    pub const IF_NONE_MATCH: OptionId = OptionId(5);
    pub const OBSERVE: OptionId = OptionId(6);
    pub const URI_PORT: OptionId = OptionId(7);
    pub const LOCATION_PATH: OptionId = OptionId(8);
    pub const URI_PATH: OptionId = OptionId(11);
    pub const CONTENT_FORMAT: OptionId = OptionId(12);
    pub const MAX_AGE: OptionId = OptionId(14);
    pub const URI_QUERY: OptionId = OptionId(15);
    pub const ACCEPT: OptionId = OptionId(17);
    pub const LOCATION_QUERY: OptionId = OptionId(20);
    pub const BLOCK2: OptionId = OptionId(23);
    pub const BLOCK1: OptionId = OptionId(27);
    pub const SIZE2: OptionId = OptionId(28);
    pub const PROXY_URI: OptionId = OptionId(35);
    pub const PROXY_SCHEME: OptionId = OptionId(39);
    pub const SIZE1: OptionId = OptionId(60);
}

/// Content-Format registry values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MediaType(pub u16);

impl MediaType {
    pub const TEXT_PLAIN: MediaType = MediaType(0);
    pub const APP_LINK_FORMAT: MediaType = MediaType(40);
    pub const APP_XML: MediaType = MediaType(41);
    pub const APP_OCTETS: MediaType = MediaType(42);
    pub const APP_EXI: MediaType = MediaType(47);
    pub const APP_JSON: MediaType = MediaType(50);
    pub const APP_CBOR: MediaType = MediaType(60);
}

/// A single option: id plus raw value bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoapOption {
    /// Option number.
    pub id: OptionId,
    /// Raw value.
    pub value: Bytes,
}

impl CoapOption {
    /// Create a new option.
    pub fn new(id: OptionId, value: impl Into<Bytes>) -> Self {
        Self {
            id,
            value: value.into(),
        }
    }
}

/// Encode an unsigned option value in its minimal big-endian form (0 is empty).
pub fn encode_uint(v: u32) -> Bytes {
    let be = v.to_be_bytes();
    let skip = be.iter().take_while(|&&b| b == 0).count();
    Bytes::copy_from_slice(&be[skip..])
}

/// Decode an unsigned option value (at most 4 bytes).
pub fn decode_uint(value: &[u8]) -> Option<u32> {
    if value.len() > 4 {
        return None;
    }
    Some(value.iter().fold(0u32, |acc, &b| (acc << 8) | u32::from(b)))
}

/// Ordered option set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Options(Vec<CoapOption>);

impl Options {
    /// Create an empty option set.
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Create an empty option set with room for `capacity` options.
    pub fn with_capacity(capacity: usize) -> Self {
        Self(Vec::with_capacity(capacity))
    }

    /// Add an option after any existing options with the same id.
    pub fn add(&mut self, id: OptionId, value: impl Into<Bytes>) {
        let pos = self.0.partition_point(|o| o.id <= id);
        self.0.insert(pos, CoapOption::new(id, value));
    }

    /// Replace every option with `id` by a single one.
    pub fn set(&mut self, id: OptionId, value: impl Into<Bytes>) {
        self.remove(id);
        self.add(id, value);
    }

    /// First value for `id`.
    pub fn get(&self, id: OptionId) -> Option<&Bytes> {
        self.0.iter().find(|o| o.id == id).map(|o| &o.value)
    }

    /// All values for `id`, in order.
    pub fn get_all(&self, id: OptionId) -> impl Iterator<Item = &Bytes> {
        self.0.iter().filter(move |o| o.id == id).map(|o| &o.value)
    }

    /// Check if an option with `id` is present.
    pub fn has(&self, id: OptionId) -> bool {
        self.0.iter().any(|o| o.id == id)
    }

    /// Remove all options with `id`.
    pub fn remove(&mut self, id: OptionId) {
        self.0.retain(|o| o.id != id);
    }

    /// Set an unsigned-integer option.
    pub fn set_uint(&mut self, id: OptionId, v: u32) {
        self.set(id, encode_uint(v));
    }

    /// Read an unsigned-integer option.
    pub fn get_uint(&self, id: OptionId) -> Option<u32> {
        self.get(id).and_then(|v| decode_uint(v))
    }

    /// Content-Format option.
    pub fn content_format(&self) -> Option<MediaType> {
        self.get_uint(OptionId::CONTENT_FORMAT)
            .and_then(|v| u16::try_from(v).ok())
            .map(MediaType)
    }

    pub fn set_content_format(&mut self, media_type: MediaType) {
        self.set_uint(OptionId::CONTENT_FORMAT, u32::from(media_type.0));
    }

    /// Observe option (sequence number or register/deregister flag).
    pub fn observe(&self) -> Option<u32> {
        self.get_uint(OptionId::OBSERVE)
    }

    pub fn set_observe(&mut self, v: u32) {
        self.set_uint(OptionId::OBSERVE, v);
    }

    /// Replace Uri-Path with the segments of `path` (leading `/` optional).
    pub fn set_path(&mut self, path: &str) {
        self.remove(OptionId::URI_PATH);
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            self.add(OptionId::URI_PATH, Bytes::copy_from_slice(segment.as_bytes()));
        }
    }

    /// Uri-Path joined with `/`.
    pub fn path(&self) -> String {
        let mut path = String::new();
        for segment in self.get_all(OptionId::URI_PATH) {
            path.push('/');
            path.push_str(&String::from_utf8_lossy(segment));
        }
        path
    }

    /// Append a Uri-Query option.
    pub fn add_query(&mut self, query: &str) {
        self.add(OptionId::URI_QUERY, Bytes::copy_from_slice(query.as_bytes()));
    }

    /// Number of options.
    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate options in wire order.
    pub fn iter(&self) -> std::slice::Iter<'_, CoapOption> {
        self.0.iter()
    }

    /// Remove all options, keeping the allocation.
    pub fn clear(&mut self) {
        self.0.clear();
    }

    /// Replace the content with a copy of `other`, reusing the allocation.
    pub fn reset_to(&mut self, other: &Options) {
        self.0.clear();
        self.0.extend(other.0.iter().cloned());
    }

    /// Push an option that is known to sort after every current option.
    pub(crate) fn push_sorted(&mut self, option: CoapOption) {
        debug_assert!(self.0.last().map_or(true, |o| o.id <= option.id));
        self.0.push(option);
    }

    /// Total length of all option values.
    pub fn values_len(&self) -> usize {
        self.0.iter().map(|o| o.value.len()).sum()
    }

    /// Pack all option values contiguously into `buf`.
    ///
    /// Returns the number of bytes used. If `buf` is too short nothing is
    /// written and the error reports the exact size required.
    pub fn copy_values_into(&self, buf: &mut [u8]) -> Result<usize> {
        let required = self.values_len();
        if buf.len() < required {
            return Err(CoapError::TooSmall {
                required,
                available: buf.len(),
            });
        }
        let mut offset = 0;
        for option in &self.0 {
            buf[offset..offset + option.value.len()].copy_from_slice(&option.value);
            offset += option.value.len();
        }
        Ok(offset)
    }
}

impl FromIterator<CoapOption> for Options {
    fn from_iter<I: IntoIterator<Item = CoapOption>>(iter: I) -> Self {
        let mut options: Vec<CoapOption> = iter.into_iter().collect();
        // stable: equal ids keep their relative order
        options.sort_by_key(|o| o.id);
        Self(options)
    }
}

impl<'a> IntoIterator for &'a Options {
    type Item = &'a CoapOption;
    type IntoIter = std::slice::Iter<'a, CoapOption>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl fmt::Display for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, o) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}:{:02x?}", o.id.0, &o.value[..])?;
        }
        f.write_str("]")
    }
}
