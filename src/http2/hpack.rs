//! Header block compression
//!
//! Both sides keep one encoder and one decoder per connection, dynamic
//! table state lives inside `fluke_hpack`.
use std::fmt;

use crate::error::Error;
use crate::headers::{is_hop_by_hop, Headers};
use crate::message::{RequestHead, ResponseHead};
use crate::enums::Status;


/// Serializes message heads into header blocks
pub struct HeaderEncoder {
    inner: fluke_hpack::Encoder<'static>,
}

/// Parses header blocks into message heads
pub struct HeaderDecoder {
    inner: fluke_hpack::Decoder<'static>,
}

fn regular_headers(headers: &Headers, out: &mut Vec<(Vec<u8>, Vec<u8>)>)
{
    for (name, value) in headers {
        if is_hop_by_hop(name) || name.eq_ignore_ascii_case("Host") {
            continue;
        }
        out.push((name.to_ascii_lowercase().into_bytes(),
                  value.as_bytes().to_vec()));
    }
}

impl HeaderEncoder {
    pub fn new() -> HeaderEncoder {
        HeaderEncoder { inner: fluke_hpack::Encoder::new() }
    }

    fn encode(&mut self, pairs: &[(Vec<u8>, Vec<u8>)]) -> Vec<u8> {
        self.inner.encode(pairs.iter()
            .map(|&(ref n, ref v)| (&n[..], &v[..]))
            .collect::<Vec<_>>())
    }

    /// `Host` becomes `:authority` unless the head carries one explicitly
    pub fn encode_request(&mut self, head: &RequestHead, scheme: &str)
        -> Vec<u8>
    {
        let mut pairs = Vec::with_capacity(head.headers.len() + 4);
        pairs.push((b":method".to_vec(), head.method.as_bytes().to_vec()));
        pairs.push((b":scheme".to_vec(), scheme.as_bytes().to_vec()));
        pairs.push((b":path".to_vec(), head.path.as_bytes().to_vec()));
        let authority = head.authority.as_ref().map(|a| &a[..])
            .or_else(|| head.headers.get("Host"));
        if let Some(authority) = authority {
            pairs.push((b":authority".to_vec(), authority.as_bytes().to_vec()));
        }
        regular_headers(&head.headers, &mut pairs);
        self.encode(&pairs)
    }

    pub fn encode_response(&mut self, head: &ResponseHead) -> Vec<u8> {
        let mut pairs = Vec::with_capacity(head.headers.len() + 1);
        pairs.push((b":status".to_vec(), head.code.to_string().into_bytes()));
        regular_headers(&head.headers, &mut pairs);
        self.encode(&pairs)
    }
}

fn utf8(data: Vec<u8>) -> Result<String, Error> {
    String::from_utf8(data)
        .map_err(|_| Error::Hpack("header is not valid utf-8".into()))
}

impl HeaderDecoder {
    pub fn new() -> HeaderDecoder {
        HeaderDecoder { inner: fluke_hpack::Decoder::new() }
    }

    fn decode(&mut self, block: &[u8]) -> Result<Vec<(String, String)>, Error>
    {
        let pairs = self.inner.decode(block)
            .map_err(|e| Error::Hpack(format!("{:?}", e)))?;
        pairs.into_iter()
            .map(|(n, v)| Ok((utf8(n)?, utf8(v)?)))
            .collect()
    }

    /// Pseudo headers must precede regular ones, `:method` and `:path`
    /// are required
    pub fn decode_request(&mut self, block: &[u8])
        -> Result<RequestHead, Error>
    {
        let mut method = None;
        let mut path = None;
        let mut authority = None;
        let mut headers = Headers::new();
        for (name, value) in self.decode(block)? {
            if name.starts_with(':') {
                if !headers.is_empty() {
                    return Err(Error::Protocol("pseudo header after regular"));
                }
                match &name[..] {
                    ":method" => method = Some(value),
                    ":path" => path = Some(value),
                    ":authority" => authority = Some(value),
                    ":scheme" => {}
                    _ => return Err(Error::Protocol("unknown pseudo header")),
                }
            } else {
                headers.add(name, value);
            }
        }
        match (method, path) {
            (Some(method), Some(path)) => {
                let mut head = RequestHead::new(method, path);
                if authority.is_none() {
                    authority = headers.get("Host").map(|h| h.to_string());
                }
                head.authority = authority;
                head.headers = headers;
                Ok(head)
            }
            _ => Err(Error::Protocol("request pseudo headers are missing")),
        }
    }

    pub fn decode_response(&mut self, block: &[u8])
        -> Result<ResponseHead, Error>
    {
        let mut code = None;
        let mut headers = Headers::new();
        for (name, value) in self.decode(block)? {
            if name == ":status" {
                code = Some(value.parse::<u16>()
                    .map_err(|_| Error::Protocol("invalid :status"))?);
            } else if name.starts_with(':') {
                return Err(Error::Protocol("unknown pseudo header"));
            } else {
                headers.add(name, value);
            }
        }
        let code = code.ok_or(Error::Protocol("no :status in response"))?;
        let mut head = ResponseHead::new(Status::from_code(code));
        head.code = code;
        head.headers = headers;
        Ok(head)
    }
}

impl fmt::Debug for HeaderEncoder {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("HeaderEncoder").finish()
    }
}

impl fmt::Debug for HeaderDecoder {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("HeaderDecoder").finish()
    }
}

#[cfg(test)]
mod test {
    use crate::enums::Status;
    use crate::message::{RequestHead, ResponseHead};
    use super::{HeaderDecoder, HeaderEncoder};

    #[test]
    fn request() {
        let mut head = RequestHead::new("POST", "/upload?x=1");
        head.headers.add("Host", "example.com:8080");
        head.headers.add("Connection", "Upgrade, HTTP2-Settings");
        head.headers.add("X-Token", "a");
        head.headers.add("x-token", "b");
        let mut enc = HeaderEncoder::new();
        let mut dec = HeaderDecoder::new();
        let block = enc.encode_request(&head, "http");
        let parsed = dec.decode_request(&block).unwrap();
        assert_eq!(parsed.method, "POST");
        assert_eq!(parsed.path, "/upload?x=1");
        assert_eq!(parsed.authority.as_ref().map(|x| &x[..]),
                   Some("example.com:8080"));
        assert!(!parsed.headers.contains("Connection"));
        assert!(!parsed.headers.contains("Host"));
        assert_eq!(parsed.headers.get_all("x-token"), &["a", "b"]);
        // dynamic table is shared by the following blocks
        let block = enc.encode_request(&head, "http");
        assert_eq!(dec.decode_request(&block).unwrap(), parsed);
    }

    #[test]
    fn response() {
        let mut head = ResponseHead::new(Status::GatewayTimeout);
        head.headers.add("Content-Type", "text/plain");
        head.headers.add("Transfer-Encoding", "chunked");
        let mut enc = HeaderEncoder::new();
        let parsed = HeaderDecoder::new()
            .decode_response(&enc.encode_response(&head)).unwrap();
        assert_eq!(parsed.code, 504);
        assert_eq!(parsed.headers.get("content-type"), Some("text/plain"));
        assert!(!parsed.headers.contains("transfer-encoding"));
    }

    #[test]
    fn missing_pseudo_headers() {
        let mut enc = HeaderEncoder::new();
        let mut head = ResponseHead::new(Status::Ok);
        head.headers.add("X-A", "1");
        let block = enc.encode_response(&head);
        assert!(HeaderDecoder::new().decode_request(&block).is_err());
    }
}
