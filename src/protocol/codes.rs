//! Message codes.
//!
//! A code is a single byte split into a 3-bit class and a 5-bit detail,
//! written `c.dd` (e.g. `4.04` for Not Found).

use std::fmt;

/// CoAP request method or response status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Code(pub u8);

const fn code(class: u8, detail: u8) -> Code {
    Code((class << 5) | detail)
}

impl Code {
    /// Empty message (ping, bare ACK/RST).
    pub const EMPTY: Code = code(0, 0);

    pub const GET: Code = code(0, 1);
    pub const POST: Code = code(0, 2);
    pub const PUT: Code = code(0, 3);
    pub const DELETE: Code = code(0, 4);

    pub const CREATED: Code = code(2, 1);
    pub const DELETED: Code = code(2, 2);
    pub const VALID: Code = code(2, 3);
    pub const CHANGED: Code = code(2, 4);
    pub const CONTENT: Code = code(2, 5);
    pub const CONTINUE: Code = code(2, 31);

    pub const BAD_REQUEST: Code = code(4, 0);
    pub const UNAUTHORIZED: Code = code(4, 1);
    pub const BAD_OPTION: Code = code(4, 2);
    pub const FORBIDDEN: Code = code(4, 3);
    pub const NOT_FOUND: Code = code(4, 4);
    pub const METHOD_NOT_ALLOWED: Code = code(4, 5);
    pub const NOT_ACCEPTABLE: Code = code(4, 6);
    pub const REQUEST_ENTITY_INCOMPLETE: Code = code(4, 8);
    pub const PRECONDITION_FAILED: Code = code(4, 12);
    pub const REQUEST_ENTITY_TOO_LARGE: Code = code(4, 13);
    pub const UNSUPPORTED_MEDIA_TYPE: Code = code(4, 15);

    pub const INTERNAL_SERVER_ERROR: Code = code(5, 0);
    pub const NOT_IMPLEMENTED: Code = code(5, 1);
    pub const BAD_GATEWAY: Code = code(5, 2);
    pub const SERVICE_UNAVAILABLE: Code = code(5, 3);
    pub const GATEWAY_TIMEOUT: Code = code(5, 4);
    pub const PROXYING_NOT_SUPPORTED: Code = code(5, 5);

    /// Code class (0 = request, 2 = success, 4 = client error, 5 = server error).
    #[inline]
    pub fn class(self) -> u8 {
        self.0 >> 5
    }

    /// Code detail.
    #[inline]
    pub fn detail(self) -> u8 {
        self.0 & 0x1f
    }

    /// Check if this is the empty code.
    #[inline]
    pub fn is_empty(self) -> bool {
        self == Code::EMPTY
    }

    /// Check if this is a request method.
    #[inline]
    pub fn is_request(self) -> bool {
        self.class() == 0 && !self.is_empty()
    }

    /// Check if this is a response code.
    #[inline]
    pub fn is_response(self) -> bool {
        self.class() >= 2
    }

    fn name(self) -> Option<&'static str> {
        let name = match self {
            Code::EMPTY => "Empty",
            Code::GET => "GET",
            Code::POST => "POST",
            Code::PUT => "PUT",
            Code::DELETE => "DELETE",
            Code::CREATED => "Created",
            Code::DELETED => "Deleted",
            Code::VALID => "Valid",
            Code::CHANGED => "Changed",
            Code::CONTENT => "Content",
            Code::CONTINUE => "Continue",
            Code::BAD_REQUEST => "BadRequest",
            Code::UNAUTHORIZED => "Unauthorized",
            Code::BAD_OPTION => "BadOption",
            Code::FORBIDDEN => "Forbidden",
            Code::NOT_FOUND => "NotFound",
            Code::METHOD_NOT_ALLOWED => "MethodNotAllowed",
            Code::NOT_ACCEPTABLE => "NotAcceptable",
            Code::REQUEST_ENTITY_INCOMPLETE => "RequestEntityIncomplete",
            Code::PRECONDITION_FAILED => "PreconditionFailed",
            Code::REQUEST_ENTITY_TOO_LARGE => "RequestEntityTooLarge",
            Code::UNSUPPORTED_MEDIA_TYPE => "UnsupportedMediaType",
            Code::INTERNAL_SERVER_ERROR => "InternalServerError",
            Code::NOT_IMPLEMENTED => "NotImplemented",
            Code::BAD_GATEWAY => "BadGateway",
            Code::SERVICE_UNAVAILABLE => "ServiceUnavailable",
            Code::GATEWAY_TIMEOUT => "GatewayTimeout",
            Code::PROXYING_NOT_SUPPORTED => "ProxyingNotSupported",
            _ => return None,
        };
        Some(name)
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "{}.{:02}", self.class(), self.detail()),
        }
    }
}

impl From<u8> for Code {
    fn from(v: u8) -> Self {
        Code(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_class_and_detail() {
        assert_eq!(Code::NOT_FOUND.0, 0x84);
        assert_eq!(Code::NOT_FOUND.class(), 4);
        assert_eq!(Code::NOT_FOUND.detail(), 4);
        assert_eq!(Code::CONTENT.0, 69);
    }

    #[test]
    fn test_request_response_classification() {
        assert!(Code::GET.is_request());
        assert!(!Code::EMPTY.is_request());
        assert!(Code::CHANGED.is_response());
        assert!(!Code::DELETE.is_response());
    }

    #[test]
    fn test_display() {
        assert_eq!(Code::NOT_FOUND.to_string(), "NotFound");
        assert_eq!(Code(0x47).to_string(), "2.07");
    }
}
