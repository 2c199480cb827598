use crate::buffer::StreamingMessageBuffer;
use crate::enums::Status;
use crate::headers::Headers;


/// Request line and headers
///
/// `authority` is the `Host` header for HTTP/1.x and `:authority` for
/// HTTP/2.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    pub method: String,
    pub path: String,
    pub authority: Option<String>,
    pub headers: Headers,
}

/// Status and headers of a response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    pub code: u16,
    pub reason: String,
    pub headers: Headers,
}

/// Common accessors of requests and responses on both sides
pub trait Message {
    fn headers(&self) -> &Headers;
    fn body(&self) -> &StreamingMessageBuffer;
}

impl RequestHead {
    pub fn new<M, P>(method: M, path: P) -> RequestHead
        where M: Into<String>, P: Into<String>
    {
        RequestHead {
            method: method.into(),
            path: path.into(),
            authority: None,
            headers: Headers::new(),
        }
    }
    /// Responses to `HEAD` requests have no body even if they say otherwise
    pub fn is_head(&self) -> bool {
        self.method.eq_ignore_ascii_case("HEAD")
    }
}

impl ResponseHead {
    pub fn new(status: Status) -> ResponseHead {
        ResponseHead {
            code: status.code(),
            reason: status.reason().to_string(),
            headers: Headers::new(),
        }
    }
    pub fn status(&self) -> Status {
        Status::from_code(self.code)
    }
    /// The body is declared to be exactly this long
    pub fn content_length(&self) -> Option<u64> {
        self.headers.get("Content-Length")
            .and_then(|v| v.trim().parse().ok())
    }
}
