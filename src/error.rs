use std::fmt;
use std::io;

use crate::http1::HeaderError;


/// Why an exchange or a body stream ended abnormally
///
/// This is a small `Copy` value stored in buffers and exchanges, so that
/// every party blocked on a body can observe the same cause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Explicit cancellation by the application
    Interrupted,
    /// No network activity within the configured socket idle timeout
    IdleTimeout,
    /// The peer closed the connection or it was torn down locally
    ConnectionClosed,
    /// Malformed input or an operation that breaks message framing
    ProtocolViolation,
    /// Factory teardown could not wait for its threads
    ShutdownInterrupted,
    /// The peer abandoned a single HTTP/2 stream
    StreamReset,
}

impl ErrorKind {
    /// Short static description of the error kind
    pub fn as_str(&self) -> &'static str {
        use self::ErrorKind::*;
        match *self {
            Interrupted => "interrupted",
            IdleTimeout => "idle timeout",
            ConnectionClosed => "connection closed",
            ProtocolViolation => "protocol violation",
            ShutdownInterrupted => "shutdown interrupted",
            StreamReset => "stream reset",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

quick_error! {
    /// Error of the transport, its connectors and protocol drivers
    #[derive(Debug)]
    pub enum Error {
        /// Socket IO error
        Io(err: io::Error) {
            description("IO error")
            display("IO error: {}", err)
            from()
        }
        /// Error parsing HTTP/1.x message head
        Header(err: httparse::Error) {
            description("bad headers")
            display("bad headers: {}", err)
            from()
        }
        /// Error parsing chunked body
        ChunkSize(err: httparse::InvalidChunkSize) {
            description("invalid chunk size")
            display("invalid chunk size")
            from()
        }
        /// Malformed HPACK header block
        Hpack(msg: String) {
            description("header compression error")
            display("header compression error: {}", msg)
        }
        /// HTTP/2 framing or negotiation error
        Protocol(msg: &'static str) {
            description(msg)
            display("protocol error: {}", msg)
        }
        /// Invalid url passed to a client request
        Url(err: url::ParseError) {
            description("invalid url")
            display("invalid url: {}", err)
            from()
        }
        /// The exchange was terminated, the kind tells why
        Exchange(kind: ErrorKind) {
            description("exchange terminated")
            display("exchange terminated: {}", kind)
            from()
        }
        /// Only `http` scheme is served by this crate
        UnsupportedScheme {
            description("unsupported scheme")
        }
        /// Version string is neither `1.1` nor `2.0`
        UnsupportedVersion {
            description("unsupported HTTP version")
        }
        /// Option name is not known
        UnknownOption(name: String) {
            description("unknown option")
            display("unknown option {:?}", name)
        }
        /// Option value can't be parsed
        InvalidOption(name: String, value: String) {
            description("invalid option value")
            display("invalid value {:?} for option {:?}", value, name)
        }
        /// Response head was already sent for this exchange
        ResponseStarted {
            description("response is already started")
        }
        /// Outgoing HTTP/1.x message can't be serialized
        Serialize(err: HeaderError) {
            description("message serialization error")
            display("message serialization error: {}", err)
            from()
        }
        /// Response received when no request was in flight
        PrematureResponse {
            description("response received before request was sent")
        }
        /// The other side of a channel has gone
        Canceled {
            description("request canceled")
        }
        /// Connection or connector is closed
        Closed {
            description("connection closed")
        }
    }
}

impl Error {
    /// Returns exchange error kind if this error carries one
    pub fn kind(&self) -> Option<ErrorKind> {
        match *self {
            Error::Exchange(kind) => Some(kind),
            _ => None,
        }
    }
}

#[cfg(test)]
mod test {
    use super::{Error, ErrorKind};

    #[test]
    fn display_kind() {
        assert_eq!(ErrorKind::IdleTimeout.to_string(), "idle timeout");
        let err = Error::from(ErrorKind::ConnectionClosed);
        assert_eq!(err.to_string(),
            "exchange terminated: connection closed");
        assert_eq!(err.kind(), Some(ErrorKind::ConnectionClosed));
    }
}
