//! HTTP/1.1 message heads, body framing and serialization
use crate::enums::{Status, Version};
use crate::error::Error;
use crate::headers::{Headers, is_chunked, is_close, is_connection};
use crate::headers::is_content_length;
use crate::headers::{is_continue, is_expect, is_transfer_encoding};
use crate::message::{RequestHead, ResponseHead};

mod body;
mod serializer;

pub use self::body::{BodyDecoder, BodyKind};
pub use self::serializer::{write_continue, Body, HeaderError, MessageState};

/// Maximum number of headers in a message
pub const MAX_HEADERS: usize = 64;
/// Head which is still incomplete at this size is rejected
pub const MAX_HEAD_SIZE: usize = 65536;

/// Value of `HTTP2-Settings` sent with an upgrade request
///
/// Base64url of a single SETTINGS_ENABLE_PUSH = 0 entry.
pub const UPGRADE_SETTINGS: &'static str = "AAIAAAAA";


/// Request head as received from the network
#[derive(Debug)]
pub struct ParsedRequest {
    pub head: RequestHead,
    pub version: Version,
    pub body: BodyKind,
    pub close: bool,
    pub expect_continue: bool,
    pub upgrade_h2c: bool,
    /// Bytes of the input buffer occupied by the head
    pub consumed: usize,
}

/// Response head as received from the network
#[derive(Debug)]
pub struct ParsedResponse {
    pub head: ResponseHead,
    pub version: Version,
    pub body: BodyKind,
    pub close: bool,
    pub consumed: usize,
}

struct Framing {
    content_length: Option<u64>,
    chunked: bool,
    close: bool,
    keep_alive: bool,
    expect_continue: bool,
}

fn framing(headers: &[httparse::Header]) -> Result<Framing, Error> {
    let mut result = Framing {
        content_length: None,
        chunked: false,
        close: false,
        keep_alive: false,
        expect_continue: false,
    };
    for header in headers {
        if is_transfer_encoding(header.name) {
            let last = header.value.split(|&x| x == b',').last();
            if last.map(is_chunked).unwrap_or(false) {
                result.chunked = true;
            } else {
                return Err(Error::Protocol("unsupported transfer encoding"));
            }
        } else if is_content_length(header.name) {
            if result.content_length.is_some() {
                return Err(Error::Protocol("duplicate content length"));
            }
            let value = String::from_utf8_lossy(header.value);
            result.content_length = Some(value.trim().parse()
                .map_err(|_| Error::Protocol("bad content length"))?);
        } else if is_connection(header.name) {
            for token in header.value.split(|&x| x == b',') {
                if is_close(token) {
                    result.close = true;
                } else if String::from_utf8_lossy(token).trim()
                    .eq_ignore_ascii_case("keep-alive")
                {
                    result.keep_alive = true;
                }
            }
        } else if is_expect(header.name) {
            result.expect_continue = is_continue(header.value);
        }
    }
    Ok(result)
}

fn copy_headers(raw: &[httparse::Header], headers: &mut Headers) {
    for header in raw {
        headers.add(header.name,
                    String::from_utf8_lossy(header.value).into_owned());
    }
}

/// Parses request head from the beginning of `data`
///
/// Returns `None` when the head is not complete yet.
pub fn parse_request(data: &[u8]) -> Result<Option<ParsedRequest>, Error> {
    let mut raw = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut req = httparse::Request::new(&mut raw);
    let consumed = match req.parse(data)? {
        httparse::Status::Complete(n) => n,
        httparse::Status::Partial => {
            if data.len() > MAX_HEAD_SIZE {
                return Err(Error::Protocol("request head is too long"));
            }
            return Ok(None);
        }
    };
    let (method, path, version) = match (req.method, req.path, req.version) {
        (Some(m), Some(p), Some(v)) => (m, p, Version::from_httparse(v)),
        _ => return Err(Error::Protocol("incomplete request line")),
    };
    let frame = framing(req.headers)?;
    let mut head = RequestHead::new(method, path);
    copy_headers(req.headers, &mut head.headers);
    head.authority = head.headers.get("Host").map(|h| h.to_string());
    let upgrade_h2c = head.headers.has_token("Upgrade", "h2c")
        && head.headers.has_token("Connection", "upgrade")
        && head.headers.contains("HTTP2-Settings");
    let body = if frame.chunked {
        BodyKind::Chunked
    } else {
        BodyKind::Fixed(frame.content_length.unwrap_or(0))
    };
    Ok(Some(ParsedRequest {
        head: head,
        version: version,
        body: body,
        close: frame.close ||
            (version == Version::Http10 && !frame.keep_alive),
        expect_continue: frame.expect_continue,
        upgrade_h2c: upgrade_h2c,
        consumed: consumed,
    }))
}

/// Parses response head from the beginning of `data`
///
/// `is_head` is true when the response answers a `HEAD` request.
pub fn parse_response(data: &[u8], is_head: bool)
    -> Result<Option<ParsedResponse>, Error>
{
    let mut raw = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut resp = httparse::Response::new(&mut raw);
    let consumed = match resp.parse(data)? {
        httparse::Status::Complete(n) => n,
        httparse::Status::Partial => {
            if data.len() > MAX_HEAD_SIZE {
                return Err(Error::Protocol("response head is too long"));
            }
            return Ok(None);
        }
    };
    let (code, version) = match (resp.code, resp.version) {
        (Some(c), Some(v)) => (c, Version::from_httparse(v)),
        _ => return Err(Error::Protocol("incomplete status line")),
    };
    let frame = framing(resp.headers)?;
    let mut head = ResponseHead::new(Status::from_code(code));
    if let Some(reason) = resp.reason {
        head.reason = reason.to_string();
    }
    copy_headers(resp.headers, &mut head.headers);
    let mut close = frame.close ||
        (version == Version::Http10 && !frame.keep_alive);
    let body = if is_head || !head.status().has_body() {
        BodyKind::Fixed(0)
    } else if frame.chunked {
        BodyKind::Chunked
    } else if let Some(n) = frame.content_length {
        BodyKind::Fixed(n)
    } else {
        close = true;
        BodyKind::Eof
    };
    Ok(Some(ParsedResponse {
        head: head,
        version: version,
        body: body,
        close: close,
        consumed: consumed,
    }))
}

#[cfg(test)]
mod test {
    use super::{parse_request, parse_response, BodyKind};
    use crate::enums::Version;

    #[test]
    fn simple_get() {
        let req = parse_request(b"GET /x HTTP/1.1\r\nHost: a\r\n\r\nrest")
            .unwrap().unwrap();
        assert_eq!(req.head.method, "GET");
        assert_eq!(req.head.path, "/x");
        assert_eq!(req.head.authority, Some("a".to_string()));
        assert_eq!(req.body, BodyKind::Fixed(0));
        assert_eq!(req.consumed, 28);
        assert!(!req.close);
        assert!(!req.upgrade_h2c);
    }

    #[test]
    fn partial() {
        assert!(parse_request(b"GET / HTTP/1.1\r\nHost").unwrap().is_none());
    }

    #[test]
    fn http10_closes() {
        let req = parse_request(b"GET / HTTP/1.0\r\n\r\n").unwrap().unwrap();
        assert_eq!(req.version, Version::Http10);
        assert!(req.close);
    }

    #[test]
    fn upgrade_request() {
        let req = parse_request(b"POST / HTTP/1.1\r\n\
            Host: localhost\r\n\
            Connection: Upgrade, HTTP2-Settings\r\n\
            Upgrade: h2c\r\n\
            HTTP2-Settings: AAIAAAAA\r\n\
            Content-Length: 4\r\n\r\nbody").unwrap().unwrap();
        assert!(req.upgrade_h2c);
        assert_eq!(req.body, BodyKind::Fixed(4));
    }

    #[test]
    fn chunked_and_continue() {
        let req = parse_request(b"PUT / HTTP/1.1\r\n\
            Transfer-Encoding: chunked\r\n\
            Expect: 100-continue\r\n\r\n").unwrap().unwrap();
        assert_eq!(req.body, BodyKind::Chunked);
        assert!(req.expect_continue);
    }

    #[test]
    fn bad_length() {
        assert!(parse_request(b"POST / HTTP/1.1\r\n\
            Content-Length: 1\r\nContent-Length: 2\r\n\r\n").is_err());
        assert!(parse_request(b"POST / HTTP/1.1\r\n\
            Content-Length: x\r\n\r\n").is_err());
    }

    #[test]
    fn responses() {
        let resp = parse_response(b"HTTP/1.1 200 OK\r\n\r\n", false)
            .unwrap().unwrap();
        assert_eq!(resp.body, BodyKind::Eof);
        assert!(resp.close);
        let resp = parse_response(
            b"HTTP/1.1 504 Gateway Timeout\r\nContent-Length: 15\r\n\r\n",
            false).unwrap().unwrap();
        assert_eq!(resp.head.code, 504);
        assert_eq!(resp.head.reason, "Gateway Timeout");
        assert_eq!(resp.body, BodyKind::Fixed(15));
        let resp = parse_response(
            b"HTTP/1.1 200 OK\r\nContent-Length: 15\r\n\r\n",
            true).unwrap().unwrap();
        assert_eq!(resp.body, BodyKind::Fixed(0));
        let resp = parse_response(
            b"HTTP/1.1 101 Switching Protocols\r\nUpgrade: h2c\r\n\r\n",
            false).unwrap().unwrap();
        assert_eq!(resp.head.code, 101);
        assert_eq!(resp.body, BodyKind::Fixed(0));
    }
}
