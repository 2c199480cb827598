use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use futures::task::AtomicTask;

use crate::buffer::StreamingMessageBuffer;
use crate::connection::Role;
use crate::error::ErrorKind;
use crate::message::{RequestHead, ResponseHead};
use crate::simple_error_page::SimpleErrorPage;


/// Stream identifier, HTTP/1.x exchanges are numbered as HTTP/2 streams
pub type StreamId = u32;

/// Lifecycle status of an exchange
///
/// Status only moves from `Open` to one of the terminal states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeStatus {
    Open,
    Completed,
    Failed,
    TimedOut,
}

impl ExchangeStatus {
    pub fn is_terminal(&self) -> bool {
        *self != ExchangeStatus::Open
    }
}

struct Progress {
    status: ExchangeStatus,
    terminal_error: Option<ErrorKind>,
    response: Option<ResponseHead>,
}

struct Inner {
    id: StreamId,
    role: Role,
    request: RequestHead,
    request_body: StreamingMessageBuffer,
    response_body: StreamingMessageBuffer,
    progress: Mutex<Progress>,
    listener: Arc<AtomicTask>,
}

/// One request/response pair on a connection
///
/// Shared between the connection driver (network side) and the
/// application. Cloning gives another handle to the same exchange.
#[derive(Clone)]
pub struct Exchange {
    inner: Arc<Inner>,
}

impl Exchange {
    /// Creates an exchange in the `Open` state
    ///
    /// The outbound buffer (response body on the server, request body on
    /// the client) wakes `listener` whenever the application produces data.
    pub(crate) fn new(id: StreamId, role: Role, request: RequestHead,
        request_body: StreamingMessageBuffer, listener: Arc<AtomicTask>)
        -> Exchange
    {
        let response_body = StreamingMessageBuffer::new();
        match role {
            Role::Server => response_body.set_listener(listener.clone()),
            Role::Client => request_body.set_listener(listener.clone()),
        }
        Exchange {
            inner: Arc::new(Inner {
                id: id,
                role: role,
                request: request,
                request_body: request_body,
                response_body: response_body,
                progress: Mutex::new(Progress {
                    status: ExchangeStatus::Open,
                    terminal_error: None,
                    response: None,
                }),
                listener: listener,
            }),
        }
    }

    fn progress(&self) -> MutexGuard<Progress> {
        self.inner.progress.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn id(&self) -> StreamId {
        self.inner.id
    }
    pub fn role(&self) -> Role {
        self.inner.role
    }
    pub fn request(&self) -> &RequestHead {
        &self.inner.request
    }
    pub fn request_body(&self) -> &StreamingMessageBuffer {
        &self.inner.request_body
    }
    pub fn response_body(&self) -> &StreamingMessageBuffer {
        &self.inner.response_body
    }
    /// Body received from the network
    pub fn inbound_body(&self) -> &StreamingMessageBuffer {
        match self.inner.role {
            Role::Server => &self.inner.request_body,
            Role::Client => &self.inner.response_body,
        }
    }
    /// Body written to the network
    pub fn outbound_body(&self) -> &StreamingMessageBuffer {
        match self.inner.role {
            Role::Server => &self.inner.response_body,
            Role::Client => &self.inner.request_body,
        }
    }
    pub fn status(&self) -> ExchangeStatus {
        self.progress().status
    }
    pub fn terminal_error(&self) -> Option<ErrorKind> {
        self.progress().terminal_error
    }
    pub fn response_head(&self) -> Option<ResponseHead> {
        self.progress().response.clone()
    }
    pub fn is_response_started(&self) -> bool {
        self.progress().response.is_some()
    }

    /// Installs the response head
    ///
    /// Fails once the exchange is terminal or when a response already
    /// began. Checked under the same lock as the timeout, so a handler can
    /// never start a response after the synthetic one was installed.
    pub fn begin_response(&self, head: ResponseHead) -> Result<(), ErrorKind> {
        {
            let mut progress = self.progress();
            if progress.status.is_terminal() {
                return Err(progress.terminal_error
                    .unwrap_or(ErrorKind::ConnectionClosed));
            }
            if progress.response.is_some() {
                return Err(ErrorKind::ProtocolViolation);
            }
            progress.response = Some(head);
        }
        self.inner.listener.notify();
        Ok(())
    }

    /// Marks the exchange as successfully finished
    pub fn complete(&self) -> bool {
        let mut progress = self.progress();
        if progress.status.is_terminal() {
            return false;
        }
        progress.status = ExchangeStatus::Completed;
        true
    }

    /// Cancels the inbound body unless it was received completely
    fn cancel_inbound(&self, cause: ErrorKind) {
        let body = self.inbound_body();
        if !body.is_end_of_message() {
            body.cancel(cause);
        }
    }

    /// Fails the exchange, both bodies are cancelled with the same cause
    ///
    /// An inbound body whose last chunk has already arrived stays readable.
    pub fn fail(&self, cause: ErrorKind) -> bool {
        {
            let mut progress = self.progress();
            if progress.status.is_terminal() {
                return false;
            }
            progress.status = ExchangeStatus::Failed;
            progress.terminal_error = Some(cause);
        }
        self.cancel_inbound(cause);
        self.outbound_body().cancel(cause);
        true
    }

    /// Applies the idle timeout to the exchange
    ///
    /// On the server the request body is cancelled and, unless the handler
    /// already started a response, the synthetic timeout response is
    /// installed. A started response is cancelled so that the driver
    /// aborts the stream. On the client both bodies are cancelled, except
    /// a response body that was received completely.
    pub fn time_out(&self) -> bool {
        let synthesize = {
            let mut progress = self.progress();
            if progress.status.is_terminal() {
                return false;
            }
            progress.status = ExchangeStatus::TimedOut;
            progress.terminal_error = Some(ErrorKind::IdleTimeout);
            match self.inner.role {
                Role::Server if progress.response.is_none() => {
                    let page = SimpleErrorPage::timeout();
                    progress.response = Some(page.head());
                    Some(page)
                }
                _ => None,
            }
        };
        self.inner.request_body.cancel(ErrorKind::IdleTimeout);
        match synthesize {
            Some(page) => {
                // fresh buffer nobody else has written to
                if self.inner.response_body.push(page.body()).is_err() {
                    self.inner.response_body.cancel(ErrorKind::IdleTimeout);
                }
            }
            None => match self.inner.role {
                Role::Server => {
                    self.inner.response_body.cancel(ErrorKind::IdleTimeout);
                }
                Role::Client => self.cancel_inbound(ErrorKind::IdleTimeout),
            },
        }
        self.inner.listener.notify();
        true
    }
}

impl fmt::Debug for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Exchange")
            .field("id", &self.inner.id)
            .field("role", &self.inner.role)
            .field("method", &self.inner.request.method)
            .field("path", &self.inner.request.path)
            .field("status", &self.status())
            .finish()
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use futures::task::AtomicTask;

    use crate::buffer::{StreamingMessageBuffer, Pull};
    use crate::chunk::Chunk;
    use crate::connection::Role;
    use crate::enums::Status;
    use crate::error::ErrorKind;
    use crate::message::{RequestHead, ResponseHead};
    use super::{Exchange, ExchangeStatus};

    fn exchange(role: Role) -> Exchange {
        Exchange::new(1, role, RequestHead::new("GET", "/"),
            StreamingMessageBuffer::new(), Arc::new(AtomicTask::new()))
    }

    #[test]
    fn monotonic_status() {
        let ex = exchange(Role::Server);
        assert_eq!(ex.status(), ExchangeStatus::Open);
        assert!(ex.complete());
        assert!(!ex.fail(ErrorKind::ConnectionClosed));
        assert!(!ex.time_out());
        assert_eq!(ex.status(), ExchangeStatus::Completed);
        assert_eq!(ex.terminal_error(), None);
    }

    #[test]
    fn fail_cancels_bodies() {
        let ex = exchange(Role::Server);
        assert!(ex.fail(ErrorKind::ConnectionClosed));
        assert_eq!(ex.request_body().pull(),
                   Pull::Cancelled(ErrorKind::ConnectionClosed));
        assert_eq!(ex.response_body().cancelled(),
                   Some(ErrorKind::ConnectionClosed));
        assert_eq!(ex.begin_response(ResponseHead::new(Status::Ok)),
                   Err(ErrorKind::ConnectionClosed));
    }

    #[test]
    fn server_timeout_synthesizes_response() {
        let ex = exchange(Role::Server);
        assert!(ex.time_out());
        assert_eq!(ex.status(), ExchangeStatus::TimedOut);
        assert_eq!(ex.terminal_error(), Some(ErrorKind::IdleTimeout));
        assert_eq!(ex.response_head().map(|h| h.code), Some(504));
        assert_eq!(ex.response_body().pull(),
                   Pull::Chunk(Chunk::last("Server time out")));
        assert_eq!(ex.request_body().pull(),
                   Pull::Cancelled(ErrorKind::IdleTimeout));
        // handler is too late
        assert_eq!(ex.begin_response(ResponseHead::new(Status::Ok)),
                   Err(ErrorKind::IdleTimeout));
    }

    #[test]
    fn server_timeout_after_response_started() {
        let ex = exchange(Role::Server);
        ex.begin_response(ResponseHead::new(Status::Ok)).unwrap();
        ex.response_body().push(Chunk::new("partial")).unwrap();
        assert!(ex.time_out());
        assert_eq!(ex.response_head().map(|h| h.code), Some(200));
        assert_eq!(ex.response_body().pull(),
                   Pull::Cancelled(ErrorKind::IdleTimeout));
    }

    #[test]
    fn client_timeout() {
        let ex = exchange(Role::Client);
        assert!(ex.time_out());
        assert!(!ex.is_response_started());
        assert_eq!(ex.inbound_body().pull(),
                   Pull::Cancelled(ErrorKind::IdleTimeout));
    }

    #[test]
    fn complete_inbound_body_survives_failure() {
        let ex = exchange(Role::Client);
        ex.begin_response(ResponseHead::new(Status::GatewayTimeout)).unwrap();
        ex.response_body().push(Chunk::last("Server time out")).unwrap();
        assert!(ex.fail(ErrorKind::ConnectionClosed));
        assert_eq!(ex.request_body().cancelled(),
                   Some(ErrorKind::ConnectionClosed));
        assert_eq!(ex.response_body().pull(),
                   Pull::Chunk(Chunk::last("Server time out")));
        assert_eq!(ex.response_body().pull(), Pull::End);
    }

    #[test]
    fn partial_inbound_body_is_cancelled() {
        let ex = exchange(Role::Client);
        ex.begin_response(ResponseHead::new(Status::Ok)).unwrap();
        ex.response_body().push(Chunk::new("part")).unwrap();
        assert!(ex.fail(ErrorKind::ConnectionClosed));
        assert_eq!(ex.response_body().pull(),
                   Pull::Cancelled(ErrorKind::ConnectionClosed));
    }

    #[test]
    fn double_response() {
        let ex = exchange(Role::Server);
        ex.begin_response(ResponseHead::new(Status::Ok)).unwrap();
        assert_eq!(ex.begin_response(ResponseHead::new(Status::Ok)),
                   Err(ErrorKind::ProtocolViolation));
    }
}
