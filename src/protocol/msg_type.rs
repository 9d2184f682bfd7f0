//! Message delivery type (2-bit field of the first header byte).

use std::fmt;

/// Delivery type of a datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Type {
    /// Requires an acknowledgement.
    Confirmable = 0,
    /// Fire-and-forget.
    NonConfirmable = 1,
    /// Acknowledges a confirmable message.
    Acknowledgement = 2,
    /// Rejects a message that could not be processed.
    Reset = 3,
}

impl Type {
    /// Decode from the two low bits of `v`.
    #[inline]
    pub fn from_bits(v: u8) -> Self {
        match v & 0b11 {
            0 => Type::Confirmable,
            1 => Type::NonConfirmable,
            2 => Type::Acknowledgement,
            _ => Type::Reset,
        }
    }
}

impl Default for Type {
    fn default() -> Self {
        Type::NonConfirmable
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Type::Confirmable => "CON",
            Type::NonConfirmable => "NON",
            Type::Acknowledgement => "ACK",
            Type::Reset => "RST",
        };
        f.write_str(s)
    }
}
