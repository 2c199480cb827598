//! HTTP client side: requests, responses, connection driver and connector
use std::fmt;
use std::net::SocketAddr;

use bytes::Bytes;
use futures::{Async, Future, Poll};
use futures::sync::oneshot;
use url::Url;

use crate::buffer::StreamingMessageBuffer;
use crate::chunk::Chunk;
use crate::enums::Status;
use crate::error::Error;
use crate::exchange::{Exchange, StreamId};
use crate::headers::Headers;
use crate::message::{Message, RequestHead, ResponseHead};

pub(crate) mod connector;
mod proto;

pub use self::connector::HttpClientConnector;
pub use self::proto::Proto;


pub(crate) type ResponseSender = oneshot::Sender<Result<Response, Error>>;

/// Request waiting for a connection
pub(crate) struct Queued {
    pub request: Request,
    pub sender: ResponseSender,
    pub addr: SocketAddr,
}

/// Outgoing request
///
/// The body is either set as a whole with `set_body`, streamed through the
/// buffer returned by `streaming_body`, or left empty.
pub struct Request {
    head: RequestHead,
    url: Url,
    body: StreamingMessageBuffer,
    streaming: bool,
}

/// Response head with the body that is still being received
pub struct Response {
    exchange: Exchange,
    head: ResponseHead,
}

/// Resolves to the `Response` once its head is received
pub struct ResponseFuture {
    receiver: oneshot::Receiver<Result<Response, Error>>,
}

impl Request {
    /// Creates a request, `url` must be absolute
    pub fn new(method: &str, url: &str) -> Result<Request, Error> {
        let url = Url::parse(url)?;
        let authority = match (url.host_str(), url.port()) {
            (Some(host), Some(port)) => format!("{}:{}", host, port),
            (Some(host), None) => host.to_string(),
            (None, _) => return Err(url::ParseError::EmptyHost.into()),
        };
        let mut path = url.path().to_string();
        if let Some(query) = url.query() {
            path.push('?');
            path.push_str(query);
        }
        let mut head = RequestHead::new(method, path);
        head.headers.set("Host", &authority[..]);
        head.authority = Some(authority);
        Ok(Request {
            head: head,
            url: url,
            body: StreamingMessageBuffer::new(),
            streaming: false,
        })
    }
    pub fn method(&self) -> &str {
        &self.head.method
    }
    pub fn path(&self) -> &str {
        &self.head.path
    }
    pub fn url(&self) -> &Url {
        &self.url
    }
    pub fn add_header<N, V>(&mut self, name: N, value: V) -> &mut Self
        where N: Into<String> + AsRef<str>, V: Into<String>
    {
        self.head.headers.add(name, value);
        self
    }
    /// Sets the complete request body
    pub fn set_body<B: Into<Bytes>>(&mut self, data: B)
        -> Result<&mut Self, Error>
    {
        self.body.push(Chunk::last(data))?;
        Ok(self)
    }
    /// Returns the body buffer to push chunks into after sending
    ///
    /// The body must be ended with a last chunk or `finish()`.
    pub fn streaming_body(&mut self) -> StreamingMessageBuffer {
        self.streaming = true;
        self.body.clone()
    }
    /// Ends a body nobody is going to stream
    pub(crate) fn prepare(&self) {
        if !self.streaming && !self.body.is_end_of_message() {
            self.body.finish().ok();
        }
    }
    pub(crate) fn into_parts(self) -> (RequestHead, StreamingMessageBuffer) {
        (self.head, self.body)
    }
}

impl Message for Request {
    fn headers(&self) -> &Headers {
        &self.head.headers
    }
    fn body(&self) -> &StreamingMessageBuffer {
        &self.body
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.head.method)
            .field("url", &self.url.as_str())
            .finish()
    }
}

impl Response {
    pub(crate) fn new(exchange: Exchange, head: ResponseHead) -> Response {
        Response { exchange: exchange, head: head }
    }
    pub fn status(&self) -> Status {
        self.head.status()
    }
    pub fn code(&self) -> u16 {
        self.head.code
    }
    pub fn reason(&self) -> &str {
        &self.head.reason
    }
    pub fn stream_id(&self) -> StreamId {
        self.exchange.id()
    }
    /// Waits for the whole body
    ///
    /// Blocks the current thread, so must not be called on the reactor.
    pub fn read_to_end(&self) -> Result<Vec<u8>, Error> {
        let chunks = self.body().drain_all()?;
        let mut result = Vec::with_capacity(
            chunks.iter().map(|c| c.len()).sum());
        for chunk in &chunks {
            result.extend_from_slice(chunk.data());
        }
        Ok(result)
    }
    /// Waits for the whole body and decodes it lossily as utf-8
    pub fn text(&self) -> Result<String, Error> {
        Ok(String::from_utf8_lossy(&self.read_to_end()?).into_owned())
    }
}

impl Message for Response {
    fn headers(&self) -> &Headers {
        &self.head.headers
    }
    fn body(&self) -> &StreamingMessageBuffer {
        self.exchange.response_body()
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Response")
            .field("code", &self.head.code)
            .field("reason", &self.head.reason)
            .field("stream_id", &self.exchange.id())
            .finish()
    }
}

impl ResponseFuture {
    pub(crate) fn new(receiver: oneshot::Receiver<Result<Response, Error>>)
        -> ResponseFuture
    {
        ResponseFuture { receiver: receiver }
    }
}

impl Future for ResponseFuture {
    type Item = Response;
    type Error = Error;
    fn poll(&mut self) -> Poll<Response, Error> {
        match self.receiver.poll() {
            Ok(Async::Ready(Ok(response))) => Ok(Async::Ready(response)),
            Ok(Async::Ready(Err(e))) => Err(e),
            Ok(Async::NotReady) => Ok(Async::NotReady),
            Err(oneshot::Canceled) => Err(Error::Canceled),
        }
    }
}
