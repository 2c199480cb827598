//! Lifecycle of a single physical connection
//!
//! `ConnectionManager` knows nothing about sockets: protocol drivers feed it
//! decoded messages and the current time, and it keeps the registry of
//! exchanges, the negotiated protocol and the idle watchdog consistent.
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::task::AtomicTask;

use crate::buffer::StreamingMessageBuffer;
use crate::chunk::Chunk;
use crate::error::ErrorKind;
use crate::exchange::{Exchange, ExchangeStatus, StreamId};
use crate::message::RequestHead;
use crate::watchdog::{IdleTimeoutWatchdog, WatchdogState};


/// Which side of the connection we are
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

/// Wire protocol of the connection
///
/// `Http2Upgrade` is a pending upgrade until `is_http2()` becomes true.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Http11,
    Http2Upgrade,
    Http2PriorKnowledge,
}

struct Entry {
    exchange: Exchange,
    outbound_done: bool,
}

/// Registry of exchanges of one connection with its idle watchdog
pub struct ConnectionManager {
    role: Role,
    protocol: Protocol,
    upgraded: bool,
    exchanges: BTreeMap<StreamId, Entry>,
    watchdog: IdleTimeoutWatchdog,
    next_stream_id: StreamId,
    last_peer_stream: StreamId,
    started: bool,
    closing: bool,
    closed: Option<ErrorKind>,
    listener: Arc<AtomicTask>,
}

impl ConnectionManager {
    /// Manager of a connection that's ready, the watchdog is armed at `now`
    pub fn new(role: Role, protocol: Protocol,
        idle_timeout: Option<Duration>, now: Instant)
        -> ConnectionManager
    {
        let mut watchdog = IdleTimeoutWatchdog::new(idle_timeout, now);
        watchdog.arm(now);
        ConnectionManager {
            role: role,
            protocol: protocol,
            upgraded: false,
            exchanges: BTreeMap::new(),
            watchdog: watchdog,
            next_stream_id: match (role, protocol) {
                (Role::Server, Protocol::Http2PriorKnowledge) => 2,
                _ => 1,
            },
            last_peer_stream: 0,
            started: false,
            closing: false,
            closed: None,
            listener: Arc::new(AtomicTask::new()),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }
    pub fn protocol(&self) -> Protocol {
        self.protocol
    }
    /// Frames are exchanged on the wire
    pub fn is_http2(&self) -> bool {
        match self.protocol {
            Protocol::Http2PriorKnowledge => true,
            Protocol::Http2Upgrade => self.upgraded,
            Protocol::Http11 => false,
        }
    }
    /// Upgrade is requested but not confirmed yet
    pub fn is_upgrade_pending(&self) -> bool {
        self.protocol == Protocol::Http2Upgrade && !self.upgraded
    }
    /// Task of the connection driver, notified by outbound buffers
    pub fn listener(&self) -> &Arc<AtomicTask> {
        &self.listener
    }
    pub fn watchdog(&self) -> &IdleTimeoutWatchdog {
        &self.watchdog
    }
    /// Highest stream opened by the peer, reported in GOAWAY
    pub fn last_peer_stream(&self) -> StreamId {
        self.last_peer_stream
    }

    /// Changes the negotiated protocol
    ///
    /// * prior knowledge is only possible before the first exchange;
    /// * `Http2Upgrade` completes the upgrade of a HTTP/1.1 connection
    ///   carrying at most the exchange that requested it;
    /// * `Http11` is the fallback when the server refused to upgrade.
    pub fn switch_protocol(&mut self, protocol: Protocol)
        -> Result<(), ErrorKind>
    {
        if self.is_http2() {
            return Err(ErrorKind::ProtocolViolation);
        }
        match protocol {
            Protocol::Http2PriorKnowledge => {
                if self.started {
                    return Err(ErrorKind::ProtocolViolation);
                }
                self.protocol = protocol;
                if self.role == Role::Server {
                    self.next_stream_id = 2;
                }
            }
            Protocol::Http2Upgrade => {
                if self.exchanges.len() > 1 {
                    return Err(ErrorKind::ProtocolViolation);
                }
                self.protocol = protocol;
                self.upgraded = true;
                if self.role == Role::Server {
                    self.next_stream_id = 2;
                }
            }
            Protocol::Http11 => {
                self.protocol = protocol;
            }
        }
        debug!("Connection switched to {:?}", self.protocol);
        Ok(())
    }

    /// Allocates an id for a stream initiated by this side
    ///
    /// Client streams and all HTTP/1.x exchanges get odd ids, so an
    /// upgraded request becomes stream 1. A server speaking HTTP/2 gets
    /// even ids.
    pub fn next_stream_id(&mut self) -> StreamId {
        let id = self.next_stream_id;
        self.next_stream_id += 2;
        id
    }

    /// Registers a new exchange
    ///
    /// HTTP/1.1 carries a single exchange at a time. HTTP/2 streams opened
    /// by a client have odd ids. A watchdog that fired or was disarmed is
    /// armed again.
    pub fn open_exchange(&mut self, id: StreamId, request: RequestHead,
        body: StreamingMessageBuffer, now: Instant)
        -> Result<Exchange, ErrorKind>
    {
        if let Some(cause) = self.closed {
            return Err(cause);
        }
        if self.closing {
            return Err(ErrorKind::ConnectionClosed);
        }
        if self.exchanges.contains_key(&id) {
            return Err(ErrorKind::ProtocolViolation);
        }
        if self.is_http2() {
            if id % 2 == 0 {
                return Err(ErrorKind::ProtocolViolation);
            }
        } else if !self.exchanges.is_empty() {
            return Err(ErrorKind::ProtocolViolation);
        }
        if self.watchdog.state() != WatchdogState::Armed {
            self.watchdog.arm(now);
        }
        if self.role == Role::Server && id > self.last_peer_stream {
            self.last_peer_stream = id;
        }
        self.started = true;
        let exchange = Exchange::new(id, self.role, request, body,
                                     self.listener.clone());
        self.exchanges.insert(id, Entry {
            exchange: exchange.clone(),
            outbound_done: false,
        });
        Ok(exchange)
    }

    pub fn exchange(&self, id: StreamId) -> Option<&Exchange> {
        self.exchanges.get(&id).map(|e| &e.exchange)
    }
    /// Live exchanges in stream id order
    pub fn exchanges<'a>(&'a self) -> impl Iterator<Item=&'a Exchange> + 'a {
        self.exchanges.values().map(|e| &e.exchange)
    }
    /// Ids of exchanges whose outbound side is still being written
    pub fn pending_outbound(&self) -> Vec<StreamId> {
        self.exchanges.iter()
            .filter(|&(_, e)| !e.outbound_done)
            .map(|(&id, _)| id)
            .collect()
    }
    pub fn len(&self) -> usize {
        self.exchanges.len()
    }
    pub fn is_empty(&self) -> bool {
        self.exchanges.is_empty()
    }
    pub fn open_count(&self) -> usize {
        self.exchanges.values()
            .filter(|e| e.exchange.status() == ExchangeStatus::Open)
            .count()
    }
    pub fn inbound_body(&self, id: StreamId)
        -> Option<&StreamingMessageBuffer>
    {
        self.exchange(id).map(|e| e.inbound_body())
    }
    pub fn outbound_body(&self, id: StreamId)
        -> Option<&StreamingMessageBuffer>
    {
        self.exchange(id).map(|e| e.outbound_body())
    }

    /// Routes a decoded body chunk to its exchange
    ///
    /// Chunks for a terminal exchange are dropped. Unknown streams and
    /// chunks after the last one are a protocol violation, even when the
    /// application has already drained the body.
    pub fn push_inbound(&mut self, id: StreamId, chunk: Chunk)
        -> Result<(), ErrorKind>
    {
        let exchange = match self.exchanges.get(&id) {
            Some(entry) => &entry.exchange,
            None => return Err(ErrorKind::ProtocolViolation),
        };
        if exchange.status().is_terminal() {
            return Ok(());
        }
        let body = exchange.inbound_body();
        // replay is for the application, the peer's pass is over
        if body.is_consumed_once() {
            exchange.fail(ErrorKind::ProtocolViolation);
            return Err(ErrorKind::ProtocolViolation);
        }
        match body.push(chunk) {
            Ok(()) => Ok(()),
            Err(ErrorKind::ProtocolViolation) => {
                exchange.fail(ErrorKind::ProtocolViolation);
                Err(ErrorKind::ProtocolViolation)
            }
            // the application cancelled the body, it's not interested
            Err(_) => Ok(()),
        }
    }

    /// The driver has written the whole outbound side of the exchange
    /// (or gave up writing it)
    pub fn finish_outbound(&mut self, id: StreamId) {
        if let Some(entry) = self.exchanges.get_mut(&id) {
            entry.outbound_done = true;
        }
    }

    /// Fails and forgets a single stream, others are not affected
    pub fn reset_stream(&mut self, id: StreamId, cause: ErrorKind) -> bool {
        match self.exchanges.remove(&id) {
            Some(entry) => {
                debug!("Stream {} reset: {}", id, cause);
                entry.exchange.fail(cause);
                true
            }
            None => false,
        }
    }

    /// Destroys finished exchanges and returns their ids
    ///
    /// An open exchange completes when both bodies have ended and its
    /// outbound side was written. A terminal one is dropped once nothing
    /// remains to write.
    pub fn reap(&mut self) -> Vec<StreamId> {
        let mut done = Vec::new();
        for (&id, entry) in &self.exchanges {
            let ex = &entry.exchange;
            match ex.status() {
                ExchangeStatus::Open => {
                    if entry.outbound_done
                        && ex.request_body().is_end_of_message()
                        && ex.response_body().is_end_of_message()
                    {
                        ex.complete();
                        done.push(id);
                    }
                }
                ExchangeStatus::Failed | ExchangeStatus::Completed => {
                    done.push(id);
                }
                ExchangeStatus::TimedOut => {
                    if entry.outbound_done || self.role == Role::Client {
                        done.push(id);
                    }
                }
            }
        }
        for id in &done {
            self.exchanges.remove(id);
        }
        done
    }

    pub fn record_activity(&mut self, now: Instant) {
        self.watchdog.record_activity(now);
    }
    pub fn idle_deadline(&self) -> Option<Instant> {
        self.watchdog.deadline()
    }

    /// Checks the watchdog and applies the timeout if it expired
    ///
    /// Every open exchange times out and the connection starts closing.
    /// Returns true if the watchdog fired.
    pub fn poll_idle(&mut self, now: Instant) -> bool {
        if !self.watchdog.poll_expired(now) {
            return false;
        }
        let mut timed_out = 0;
        for entry in self.exchanges.values() {
            if entry.exchange.time_out() {
                timed_out += 1;
            }
        }
        info!("Connection idle for {:?}, {} exchange(s) timed out",
              self.watchdog.timeout().unwrap_or(Duration::new(0, 0)),
              timed_out);
        self.closing = true;
        true
    }

    /// Stops accepting new exchanges, in-flight ones may finish
    pub fn begin_close(&mut self) {
        if !self.closing {
            debug!("Connection is closing");
            self.closing = true;
        }
    }
    pub fn is_closing(&self) -> bool {
        self.closing || self.closed.is_some()
    }
    pub fn is_closed(&self) -> bool {
        self.closed.is_some()
    }

    /// Tears the connection down
    ///
    /// Every open exchange fails with `cause`, the watchdog is disarmed and
    /// all exchanges are destroyed. Returns the number of failed exchanges.
    /// Calling it again is a no-op.
    pub fn close(&mut self, cause: ErrorKind) -> usize {
        if self.closed.is_some() {
            return 0;
        }
        self.closed = Some(cause);
        self.closing = true;
        self.watchdog.disarm();
        let mut failed = 0;
        for (_, entry) in ::std::mem::replace(&mut self.exchanges,
                                              BTreeMap::new())
        {
            if entry.exchange.fail(cause) {
                failed += 1;
            }
        }
        if failed > 0 {
            debug!("Connection closed ({}), {} exchange(s) failed",
                   cause, failed);
        }
        failed
    }
}

#[cfg(test)]
mod test {
    use std::time::{Duration, Instant};

    use crate::buffer::{StreamingMessageBuffer, Pull};
    use crate::chunk::Chunk;
    use crate::error::ErrorKind;
    use crate::exchange::ExchangeStatus;
    use crate::message::RequestHead;
    use super::{ConnectionManager, Role, Protocol};

    fn get() -> RequestHead {
        RequestHead::new("GET", "/")
    }

    fn manager(role: Role, proto: Protocol) -> ConnectionManager {
        ConnectionManager::new(role, proto,
            Some(Duration::from_millis(100)), Instant::now())
    }

    #[test]
    fn close_fails_all_streams() {
        let now = Instant::now();
        let mut conn = manager(Role::Server, Protocol::Http2PriorKnowledge);
        let exchanges = [1, 3, 5].iter().map(|&id| {
            conn.open_exchange(id, get(), StreamingMessageBuffer::new(), now)
                .unwrap()
        }).collect::<Vec<_>>();
        assert_eq!(conn.close(ErrorKind::ConnectionClosed), 3);
        for ex in &exchanges {
            assert_eq!(ex.status(), ExchangeStatus::Failed);
            assert_eq!(ex.terminal_error(), Some(ErrorKind::ConnectionClosed));
            assert_eq!(ex.request_body().pull(),
                       Pull::Cancelled(ErrorKind::ConnectionClosed));
        }
        assert!(conn.is_empty());
        assert_eq!(conn.close(ErrorKind::ProtocolViolation), 0);
        assert_eq!(conn.open_exchange(7, get(),
                       StreamingMessageBuffer::new(), now).unwrap_err(),
                   ErrorKind::ConnectionClosed);
    }

    #[test]
    fn reset_affects_single_stream() {
        let now = Instant::now();
        let mut conn = manager(Role::Client, Protocol::Http2PriorKnowledge);
        let a = conn.next_stream_id();
        let b = conn.next_stream_id();
        assert_eq!((a, b), (1, 3));
        let ex_a = conn.open_exchange(a, get(),
            StreamingMessageBuffer::new(), now).unwrap();
        let ex_b = conn.open_exchange(b, get(),
            StreamingMessageBuffer::new(), now).unwrap();
        assert!(conn.reset_stream(a, ErrorKind::StreamReset));
        assert_eq!(ex_a.status(), ExchangeStatus::Failed);
        assert_eq!(ex_b.status(), ExchangeStatus::Open);
        assert_eq!(conn.len(), 1);
    }

    #[test]
    fn http11_single_exchange() {
        let now = Instant::now();
        let mut conn = manager(Role::Server, Protocol::Http11);
        let id = conn.next_stream_id();
        assert_eq!(id, 1);
        conn.open_exchange(id, get(), StreamingMessageBuffer::new(), now)
            .unwrap();
        let next = conn.next_stream_id();
        assert_eq!(conn.open_exchange(next, get(),
                       StreamingMessageBuffer::new(), now).unwrap_err(),
                   ErrorKind::ProtocolViolation);
    }

    #[test]
    fn even_stream_rejected() {
        let now = Instant::now();
        let mut conn = manager(Role::Server, Protocol::Http2PriorKnowledge);
        assert_eq!(conn.next_stream_id(), 2);
        assert_eq!(conn.open_exchange(2, get(),
                       StreamingMessageBuffer::new(), now).unwrap_err(),
                   ErrorKind::ProtocolViolation);
    }

    #[test]
    fn upgrade() {
        let now = Instant::now();
        let mut conn = manager(Role::Client, Protocol::Http2Upgrade);
        assert!(conn.is_upgrade_pending());
        assert!(!conn.is_http2());
        let id = conn.next_stream_id();
        conn.open_exchange(id, get(), StreamingMessageBuffer::new(), now)
            .unwrap();
        conn.switch_protocol(Protocol::Http2Upgrade).unwrap();
        assert!(conn.is_http2());
        assert_eq!(conn.next_stream_id(), 3);
        assert_eq!(conn.switch_protocol(Protocol::Http11),
                   Err(ErrorKind::ProtocolViolation));
    }

    #[test]
    fn prior_knowledge_on_fresh_connection_only() {
        let now = Instant::now();
        let mut conn = manager(Role::Server, Protocol::Http11);
        conn.open_exchange(1, get(), StreamingMessageBuffer::new(), now)
            .unwrap();
        assert_eq!(conn.switch_protocol(Protocol::Http2PriorKnowledge),
                   Err(ErrorKind::ProtocolViolation));
    }

    #[test]
    fn server_idle_timeout() {
        let start = Instant::now();
        let mut conn = ConnectionManager::new(Role::Server,
            Protocol::Http2PriorKnowledge,
            Some(Duration::from_millis(100)), start);
        let ex = conn.open_exchange(1, get(),
            StreamingMessageBuffer::new(), start).unwrap();
        conn.record_activity(start + Duration::from_millis(50));
        assert!(!conn.poll_idle(start + Duration::from_millis(120)));
        assert!(conn.poll_idle(start + Duration::from_millis(150)));
        assert!(conn.is_closing());
        assert_eq!(ex.status(), ExchangeStatus::TimedOut);
        assert_eq!(ex.response_head().map(|h| h.code), Some(504));
        assert_eq!(ex.response_body().pull(),
                   Pull::Chunk(Chunk::last("Server time out")));
        // kept until the synthetic response is written
        assert!(conn.reap().is_empty());
        conn.finish_outbound(1);
        assert_eq!(conn.reap(), vec![1]);
        // fires once
        assert!(!conn.poll_idle(start + Duration::from_secs(10)));
    }

    #[test]
    fn client_idle_timeout() {
        let start = Instant::now();
        let mut conn = ConnectionManager::new(Role::Client, Protocol::Http11,
            Some(Duration::from_millis(10)), start);
        let ex = conn.open_exchange(1, get(),
            StreamingMessageBuffer::new(), start).unwrap();
        assert!(conn.poll_idle(start + Duration::from_millis(10)));
        assert_eq!(ex.terminal_error(), Some(ErrorKind::IdleTimeout));
        assert_eq!(ex.response_body().pull(),
                   Pull::Cancelled(ErrorKind::IdleTimeout));
        assert_eq!(conn.reap(), vec![1]);
    }

    #[test]
    fn reap_completed() {
        let now = Instant::now();
        let mut conn = manager(Role::Server, Protocol::Http11);
        let ex = conn.open_exchange(1, get(),
            StreamingMessageBuffer::new(), now).unwrap();
        conn.push_inbound(1, Chunk::end()).unwrap();
        assert!(conn.reap().is_empty());
        ex.response_body().push(Chunk::last("ok")).unwrap();
        assert!(conn.reap().is_empty());
        conn.finish_outbound(1);
        assert_eq!(conn.reap(), vec![1]);
        assert_eq!(ex.status(), ExchangeStatus::Completed);
    }

    #[test]
    fn inbound_routing() {
        let now = Instant::now();
        let mut conn = manager(Role::Client, Protocol::Http11);
        let ex = conn.open_exchange(1, get(),
            StreamingMessageBuffer::new(), now).unwrap();
        conn.push_inbound(1, Chunk::last("body")).unwrap();
        assert_eq!(ex.response_body().snapshot(), vec![Chunk::last("body")]);
        assert_eq!(conn.push_inbound(9, Chunk::end()),
                   Err(ErrorKind::ProtocolViolation));
        assert_eq!(conn.push_inbound(1, Chunk::end()),
                   Err(ErrorKind::ProtocolViolation));
        assert_eq!(ex.status(), ExchangeStatus::Failed);
        // the complete body is still there
        assert_eq!(ex.response_body().pull(), Pull::Chunk(Chunk::last("body")));
        assert_eq!(ex.response_body().pull(), Pull::End);
    }

    #[test]
    fn data_after_drained_body() {
        let now = Instant::now();
        let mut conn = manager(Role::Server, Protocol::Http2PriorKnowledge);
        let ex = conn.open_exchange(1, get(),
            StreamingMessageBuffer::new(), now).unwrap();
        conn.push_inbound(1, Chunk::last("body")).unwrap();
        assert_eq!(ex.request_body().drain_all().unwrap(),
                   vec![Chunk::last("body")]);
        assert_eq!(conn.push_inbound(1, Chunk::new("after end")),
                   Err(ErrorKind::ProtocolViolation));
        assert!(ex.request_body().is_end_of_message());
        assert!(ex.request_body().is_empty());
        assert_eq!(ex.status(), ExchangeStatus::Failed);
        assert_eq!(ex.terminal_error(), Some(ErrorKind::ProtocolViolation));
        assert_eq!(conn.reap(), vec![1]);
    }

    #[test]
    fn data_after_queued_end() {
        let now = Instant::now();
        let mut conn = manager(Role::Server, Protocol::Http2PriorKnowledge);
        let ex = conn.open_exchange(1, get(),
            StreamingMessageBuffer::new(), now).unwrap();
        conn.push_inbound(1, Chunk::last("body")).unwrap();
        assert_eq!(conn.push_inbound(1, Chunk::new("after end")),
                   Err(ErrorKind::ProtocolViolation));
        assert_eq!(ex.request_body().snapshot(), vec![Chunk::last("body")]);
        assert_eq!(ex.status(), ExchangeStatus::Failed);
        assert_eq!(conn.reap(), vec![1]);
    }

    #[test]
    fn application_replay_is_still_allowed() {
        let now = Instant::now();
        let mut conn = manager(Role::Server, Protocol::Http2PriorKnowledge);
        let ex = conn.open_exchange(1, get(),
            StreamingMessageBuffer::new(), now).unwrap();
        conn.push_inbound(1, Chunk::last("body")).unwrap();
        ex.request_body().drain_all().unwrap();
        ex.request_body().push(Chunk::last("again")).unwrap();
        assert_eq!(ex.request_body().pull(), Pull::Chunk(Chunk::last("again")));
        assert_eq!(ex.status(), ExchangeStatus::Open);
    }
}
