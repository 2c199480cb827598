//! HTTP server side: handler interface, connection driver and connector
use std::fmt;
use std::net::SocketAddr;

use bytes::Bytes;

use crate::buffer::StreamingMessageBuffer;
use crate::chunk::Chunk;
use crate::enums::Status;
use crate::error::{Error, ErrorKind};
use crate::exchange::{Exchange, StreamId};
use crate::headers::Headers;
use crate::message::{Message, ResponseHead};

pub(crate) mod connector;
mod proto;

pub use self::connector::{ServerConnector, ServerConnectorFuture};
pub use self::proto::Proto;


/// Application callback invoked for every new exchange
///
/// Runs on the handler thread pool, so it may block reading the request
/// body. Implemented for closures.
pub trait Handler: Send + Sync + 'static {
    fn handle(&self, request: Request, responder: Responder);
}

impl<F> Handler for F
    where F: Fn(Request, Responder) + Send + Sync + 'static
{
    fn handle(&self, request: Request, responder: Responder) {
        (self)(request, responder)
    }
}

/// Request received by the server
pub struct Request {
    exchange: Exchange,
    peer_addr: SocketAddr,
}

/// Sends the response of a single exchange
pub struct Responder {
    exchange: Exchange,
}

/// Streams the response body after `Responder::start`
pub struct BodyWriter {
    body: StreamingMessageBuffer,
}

impl Request {
    pub(crate) fn new(exchange: Exchange, peer_addr: SocketAddr) -> Request {
        Request { exchange: exchange, peer_addr: peer_addr }
    }
    pub fn method(&self) -> &str {
        &self.exchange.request().method
    }
    pub fn path(&self) -> &str {
        &self.exchange.request().path
    }
    /// `Host` of HTTP/1.x or `:authority` of HTTP/2
    pub fn authority(&self) -> Option<&str> {
        self.exchange.request().authority.as_ref().map(|x| &x[..])
    }
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }
    pub fn stream_id(&self) -> StreamId {
        self.exchange.id()
    }
}

impl Message for Request {
    fn headers(&self) -> &Headers {
        &self.exchange.request().headers
    }
    fn body(&self) -> &StreamingMessageBuffer {
        self.exchange.request_body()
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.method())
            .field("path", &self.path())
            .field("peer_addr", &self.peer_addr)
            .finish()
    }
}

fn response_error(kind: ErrorKind) -> Error {
    match kind {
        ErrorKind::ProtocolViolation => Error::ResponseStarted,
        kind => Error::Exchange(kind),
    }
}

impl Responder {
    pub(crate) fn new(exchange: Exchange) -> Responder {
        Responder { exchange: exchange }
    }
    /// Sends the response head, the body is written with `BodyWriter`
    ///
    /// Without `Content-Length` in `headers` HTTP/1.1 responses are
    /// chunked. Fails with the terminal error once the exchange timed out
    /// or was closed.
    pub fn start(&self, status: Status, headers: Headers)
        -> Result<BodyWriter, Error>
    {
        let mut head = ResponseHead::new(status);
        head.headers = headers;
        self.exchange.begin_response(head).map_err(response_error)?;
        Ok(BodyWriter { body: self.exchange.response_body().clone() })
    }
    /// Sends a response with a complete body
    pub fn respond<B: Into<Bytes>>(&self, status: Status,
        mut headers: Headers, body: B)
        -> Result<(), Error>
    {
        let body = body.into();
        if status.has_body() {
            headers.set("Content-Length", body.len().to_string());
        }
        self.start(status, headers)?.last(body)
    }
    /// Request this responder answers
    pub fn stream_id(&self) -> StreamId {
        self.exchange.id()
    }
}

impl BodyWriter {
    pub fn write<B: Into<Bytes>>(&self, data: B) -> Result<(), Error> {
        self.body.push(Chunk::new(data))?;
        Ok(())
    }
    /// Writes the final piece of the body
    pub fn last<B: Into<Bytes>>(self, data: B) -> Result<(), Error> {
        self.body.push(Chunk::last(data))?;
        Ok(())
    }
    pub fn finish(self) -> Result<(), Error> {
        self.body.finish()?;
        Ok(())
    }
    /// Aborts the response, HTTP/2 streams are reset, HTTP/1.x connections
    /// are closed
    pub fn cancel(self) {
        self.body.cancel(ErrorKind::Interrupted);
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use futures::task::AtomicTask;

    use crate::buffer::{Pull, StreamingMessageBuffer};
    use crate::chunk::Chunk;
    use crate::connection::Role;
    use crate::enums::Status;
    use crate::error::{Error, ErrorKind};
    use crate::exchange::Exchange;
    use crate::headers::Headers;
    use crate::message::RequestHead;
    use super::Responder;

    fn responder() -> (Exchange, Responder) {
        let ex = Exchange::new(1, Role::Server, RequestHead::new("GET", "/"),
            StreamingMessageBuffer::new(), Arc::new(AtomicTask::new()));
        (ex.clone(), Responder::new(ex))
    }

    #[test]
    fn cancel_interrupts_blocked_consumer() {
        let (ex, resp) = responder();
        let writer = resp.start(Status::Ok, Headers::new()).unwrap();
        writer.write("partial").unwrap();
        let body = ex.response_body().clone();
        assert_eq!(body.pull(), Pull::Chunk(Chunk::new("partial")));
        let thread = thread::spawn(move || body.pull());
        thread::sleep(Duration::from_millis(20));
        writer.cancel();
        assert_eq!(thread.join().unwrap(),
                   Pull::Cancelled(ErrorKind::Interrupted));
        assert_eq!(ex.response_body().push(Chunk::new("late")),
                   Err(ErrorKind::Interrupted));
    }

    #[test]
    fn respond_sets_length() {
        let (ex, resp) = responder();
        resp.respond(Status::Ok, Headers::new(), "hello").unwrap();
        let head = ex.response_head().unwrap();
        assert_eq!(head.headers.get("content-length"), Some("5"));
        assert_eq!(ex.response_body().pull(), Pull::Chunk(Chunk::last("hello")));
    }

    #[test]
    fn second_response_is_rejected() {
        let (_ex, resp) = responder();
        resp.start(Status::Ok, Headers::new()).unwrap();
        match resp.start(Status::Ok, Headers::new()) {
            Err(Error::ResponseStarted) => {}
            other => panic!("unexpected {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn respond_after_timeout() {
        let (ex, resp) = responder();
        assert!(ex.time_out());
        match resp.respond(Status::Ok, Headers::new(), "late") {
            Err(Error::Exchange(ErrorKind::IdleTimeout)) => {}
            other => panic!("unexpected {:?}", other),
        }
    }
}
