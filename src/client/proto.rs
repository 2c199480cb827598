use std::collections::{BTreeMap, VecDeque};
use std::mem;
use std::sync::Arc;
use std::time::Instant;

use futures::{Async, Future, Poll};
use tk_bufstream::{Buf, IoBuf};
use tokio_core::reactor::Handle;
use tokio_io::{AsyncRead, AsyncWrite};

use crate::buffer::StreamingMessageBuffer;
use crate::chunk::{Chunk, ChunkSource};
use crate::config::{Scheme, SenderConfig};
use crate::connection::{ConnectionManager, Protocol, Role};
use crate::enums::Version;
use crate::error::{Error, ErrorKind};
use crate::exchange::StreamId;
use crate::headers::{is_content_length, is_hop_by_hop};
use crate::http1::{self, BodyDecoder, MessageState};
use crate::http2::{self, Codec, Frame, Reason};
use crate::message::{RequestHead, ResponseHead};
use crate::timer::IdleTimer;
use super::{Queued, Response, ResponseSender};


enum InState {
    /// No HTTP/1.x request in flight
    Idle,
    Head { id: StreamId, is_head: bool, upgrade: bool },
    Body(StreamId, BodyDecoder),
    Frames,
}

enum Progress {
    Pending,
    Done,
    Abort(ErrorKind),
}

/// Request body being written
struct Outbound {
    body: StreamingMessageBuffer,
    h1: Option<MessageState>,
}

/// Client side connection driver
///
/// HTTP/1.1 requests are sent one at a time, HTTP/2 ones are multiplexed.
/// Resolves when the connection is closed, requests that were never
/// started can be taken back with `take_queue`.
pub struct Proto<S> {
    io: IoBuf<S>,
    manager: ConnectionManager,
    scheme: Scheme,
    reading: InState,
    eof: bool,
    queue: VecDeque<Queued>,
    pending: BTreeMap<StreamId, ResponseSender>,
    outbound: BTreeMap<StreamId, Outbound>,
    h2: Option<Codec>,
    upgrade_attempted: bool,
    goaway_sent: bool,
    timer: IdleTimer,
}

fn h1_request(buf: &mut Buf, head: &RequestHead,
    body: &StreamingMessageBuffer, upgrade: bool)
    -> Result<MessageState, Error>
{
    let mut state = MessageState::RequestStart;
    state.request_line(buf, &head.method, &head.path, Version::Http11);
    for (name, value) in &head.headers {
        if is_hop_by_hop(name) || is_content_length(name) {
            continue;
        }
        state.add_header(buf, name, value)?;
    }
    if upgrade {
        state.add_header(buf, "Connection", "Upgrade, HTTP2-Settings")?;
        state.add_header(buf, "Upgrade", "h2c")?;
        state.add_header(buf, "HTTP2-Settings", http1::UPGRADE_SETTINGS)?;
    }
    if body.is_end_of_message() {
        let length = body.queued_bytes() as u64;
        if length > 0 {
            state.add_length(buf, length)?;
        }
    } else {
        state.add_chunked(buf)?;
    }
    state.done_headers(buf)?;
    Ok(state)
}

fn write_outbound(id: StreamId, out: &mut Outbound, buf: &mut Buf,
    mut h2: Option<&mut Codec>)
    -> Result<Progress, Error>
{
    loop {
        let chunk = match out.body.poll_chunk() {
            Ok(Async::Ready(Some(chunk))) => chunk,
            Ok(Async::Ready(None)) => Chunk::end(),
            Ok(Async::NotReady) => return Ok(Progress::Pending),
            Err(kind) => return Ok(Progress::Abort(kind)),
        };
        match (out.h1.as_mut(), h2.as_mut()) {
            (Some(state), _) => {
                state.write_body(buf, chunk.data())?;
                if chunk.is_last() {
                    state.done(buf)?;
                }
            }
            (None, Some(codec)) => {
                if !chunk.is_empty() || chunk.is_last() {
                    codec.writer.data(buf, id, chunk.data(), chunk.is_last());
                }
            }
            (None, None) => return Err(Error::Protocol("no HTTP/2 state")),
        }
        if chunk.is_last() {
            return Ok(Progress::Done);
        }
    }
}

/// Hands the response to the waiting future
fn start_response(manager: &ConnectionManager,
    pending: &mut BTreeMap<StreamId, ResponseSender>,
    id: StreamId, head: ResponseHead)
{
    let exchange = match manager.exchange(id) {
        Some(exchange) => exchange.clone(),
        None => return,
    };
    if let Err(kind) = exchange.begin_response(head.clone()) {
        debug!("Response on stream {} dropped: {}", id, kind);
        return;
    }
    debug!("Response {} on stream {}", head.code, id);
    if let Some(sender) = pending.remove(&id) {
        sender.send(Ok(Response::new(exchange, head))).ok();
    }
}

impl<S: AsyncRead + AsyncWrite> Proto<S> {
    /// Create a new protocol implementation from a TCP connection and a config
    ///
    /// With `force_http2` the connection preface is sent right away.
    pub fn new(conn: S, config: &Arc<SenderConfig>, handle: &Handle)
        -> Proto<S>
    {
        let protocol = if config.force_http2 {
            Protocol::Http2PriorKnowledge
        } else if config.version == Version::Http2 {
            Protocol::Http2Upgrade
        } else {
            Protocol::Http11
        };
        let mut proto = Proto {
            io: IoBuf::new(conn),
            manager: ConnectionManager::new(Role::Client, protocol,
                config.socket_idle_timeout, Instant::now()),
            scheme: config.scheme,
            reading: InState::Idle,
            eof: false,
            queue: VecDeque::new(),
            pending: BTreeMap::new(),
            outbound: BTreeMap::new(),
            h2: None,
            upgrade_attempted: false,
            goaway_sent: false,
            timer: IdleTimer::new(handle),
        };
        if protocol == Protocol::Http2PriorKnowledge {
            proto.io.out_buf.extend(http2::CONNECTION_PREFACE);
            proto.start_http2();
        }
        proto
    }

    pub(crate) fn send(&mut self, queued: Queued) {
        self.queue.push_back(queued);
    }
    /// Requests that were not started on this connection
    pub(crate) fn take_queue(&mut self) -> VecDeque<Queued> {
        mem::replace(&mut self.queue, VecDeque::new())
    }
    /// Finish in-flight requests and close
    pub fn begin_close(&mut self) {
        self.manager.begin_close();
    }

    fn start_http2(&mut self) {
        let codec = Codec::new();
        codec.writer.settings(&mut self.io.out_buf,
            &[(http2::SETTINGS_ENABLE_PUSH, 0)]);
        self.h2 = Some(codec);
        self.reading = InState::Frames;
    }

    fn read_input(&mut self) {
        let mut total = 0;
        loop {
            match self.io.read() {
                Ok(0) => break,
                Ok(n) => total += n,
                Err(e) => {
                    debug!("Read error: {}", e);
                    self.eof = true;
                    break;
                }
            }
        }
        if self.io.done() {
            self.eof = true;
        }
        if total > 0 {
            self.manager.record_activity(Instant::now());
        }
    }

    fn flush(&mut self) -> Result<(), Error> {
        let before = self.io.out_buf.len();
        if before > 0 {
            self.io.flush()?;
            if self.io.out_buf.len() < before {
                self.manager.record_activity(Instant::now());
            }
        }
        Ok(())
    }

    fn start_requests(&mut self) -> Result<(), Error> {
        while !self.queue.is_empty() && !self.manager.is_closing() {
            let http2 = self.manager.is_http2();
            let h1_busy = match self.reading {
                InState::Idle => !self.manager.is_empty(),
                _ => true,
            };
            if !http2 && h1_busy {
                break;
            }
            let Queued { request, sender, .. } = match self.queue.pop_front() {
                Some(queued) => queued,
                None => break,
            };
            let (head, body) = request.into_parts();
            let id = self.manager.next_stream_id();
            let exchange = match self.manager.open_exchange(id, head, body,
                                                            Instant::now())
            {
                Ok(exchange) => exchange,
                Err(kind) => {
                    sender.send(Err(kind.into())).ok();
                    continue;
                }
            };
            debug!("{} {} on stream {}", exchange.request().method,
                   exchange.request().path, id);
            let body = exchange.request_body().clone();
            let h1 = if http2 {
                let codec = match self.h2 {
                    Some(ref mut codec) => codec,
                    None => return Err(Error::Protocol("no HTTP/2 state")),
                };
                let block = codec.encoder.encode_request(exchange.request(),
                                                         self.scheme.as_str());
                codec.writer.headers(&mut self.io.out_buf, id, &block, false);
                None
            } else {
                let upgrade = self.manager.is_upgrade_pending()
                    && !self.upgrade_attempted
                    && body.is_end_of_message();
                if self.manager.is_upgrade_pending() && !upgrade {
                    // a streaming body can't be resent after the upgrade
                    self.manager.switch_protocol(Protocol::Http11)?;
                }
                self.upgrade_attempted |= upgrade;
                self.reading = InState::Head {
                    id: id,
                    is_head: exchange.request().is_head(),
                    upgrade: upgrade,
                };
                Some(h1_request(&mut self.io.out_buf, exchange.request(),
                                &body, upgrade)?)
            };
            self.pending.insert(id, sender);
            self.outbound.insert(id, Outbound { body: body, h1: h1 });
        }
        Ok(())
    }

    fn deliver(&mut self, id: StreamId, chunk: Chunk) -> Result<(), Error> {
        if self.manager.exchange(id).is_some() {
            self.manager.push_inbound(id, chunk)?;
        }
        Ok(())
    }

    fn process_input(&mut self) -> Result<(), Error> {
        loop {
            let (next, progress) = match
                mem::replace(&mut self.reading, InState::Idle)
            {
                InState::Idle => {
                    if self.io.in_buf.len() > 0 {
                        return Err(Error::PrematureResponse);
                    }
                    (InState::Idle, false)
                }
                InState::Head { id, is_head, upgrade } => {
                    let parsed = http1::parse_response(&self.io.in_buf[..],
                                                       is_head)?;
                    match parsed {
                        None => {
                            (InState::Head { id, is_head, upgrade }, false)
                        }
                        Some(resp) => {
                            self.io.in_buf.consume(resp.consumed);
                            let code = resp.head.code;
                            if code == 101 && upgrade {
                                self.manager.switch_protocol(
                                    Protocol::Http2Upgrade)?;
                                self.io.out_buf.extend(
                                    http2::CONNECTION_PREFACE);
                                self.start_http2();
                                (InState::Frames, true)
                            } else if code >= 100 && code < 200 {
                                (InState::Head { id, is_head, upgrade }, true)
                            } else {
                                if upgrade {
                                    debug!("Upgrade refused with {}", code);
                                    self.manager.switch_protocol(
                                        Protocol::Http11)?;
                                }
                                if resp.close {
                                    self.manager.begin_close();
                                }
                                start_response(&self.manager,
                                    &mut self.pending, id, resp.head);
                                (InState::Body(id, BodyDecoder::new(resp.body)),
                                 true)
                            }
                        }
                    }
                }
                InState::Body(id, mut decoder) => {
                    match decoder.decode(&mut self.io.in_buf, self.eof)? {
                        Some(chunk) => {
                            let last = chunk.is_last();
                            self.deliver(id, chunk)?;
                            if last {
                                (InState::Idle, true)
                            } else {
                                (InState::Body(id, decoder), true)
                            }
                        }
                        None => (InState::Body(id, decoder), false),
                    }
                }
                InState::Frames => {
                    let frame = match self.h2 {
                        Some(ref mut codec) => {
                            codec.frames.decode(&mut self.io.in_buf)?
                        }
                        None => return Err(Error::Protocol("no HTTP/2 state")),
                    };
                    match frame {
                        Some(frame) => {
                            self.reading = InState::Frames;
                            self.handle_frame(frame)?;
                            continue;
                        }
                        None => (InState::Frames, false),
                    }
                }
            };
            self.reading = next;
            if !progress {
                return Ok(());
            }
        }
    }

    fn handle_frame(&mut self, frame: Frame) -> Result<(), Error> {
        let codec = match self.h2 {
            Some(ref mut codec) => codec,
            None => return Err(Error::Protocol("no HTTP/2 state")),
        };
        let buf = &mut self.io.out_buf;
        match frame {
            Frame::Headers { stream_id, block, end_stream } => {
                let head = codec.decoder.decode_response(&block)?;
                let started = match self.manager.exchange(stream_id) {
                    Some(exchange) => exchange.is_response_started(),
                    None => {
                        debug!("Headers on unknown stream {}", stream_id);
                        return Ok(());
                    }
                };
                if !started {
                    if head.code >= 100 && head.code < 200 {
                        return Ok(());
                    }
                    start_response(&self.manager, &mut self.pending,
                                   stream_id, head);
                }
                if end_stream {
                    self.manager.push_inbound(stream_id, Chunk::end()).ok();
                }
            }
            Frame::Data { stream_id, data, end_stream } => {
                let len = data.len();
                if self.manager.exchange(stream_id).is_some() {
                    let chunk = if end_stream {
                        Chunk::last(data)
                    } else {
                        Chunk::new(data)
                    };
                    if let Err(kind) =
                        self.manager.push_inbound(stream_id, chunk)
                    {
                        codec.writer.rst_stream(buf, stream_id,
                                                Reason::StreamClosed);
                        self.manager.reset_stream(stream_id, kind);
                        self.outbound.remove(&stream_id);
                    }
                }
                codec.credit(buf, stream_id, len, end_stream);
            }
            Frame::RstStream { stream_id, reason } => {
                debug!("Stream {} reset by peer: {:?}", stream_id, reason);
                self.manager.reset_stream(stream_id, ErrorKind::StreamReset);
                self.outbound.remove(&stream_id);
                if let Some(sender) = self.pending.remove(&stream_id) {
                    sender.send(Err(ErrorKind::StreamReset.into())).ok();
                }
            }
            Frame::Settings { ack: false, settings } => {
                codec.peer_settings(buf, &settings)?;
            }
            Frame::Ping { ack: false, payload } => {
                codec.writer.ping_ack(buf, &payload);
            }
            Frame::GoAway { last_stream_id, reason } => {
                debug!("GOAWAY (last stream {}, {:?})", last_stream_id, reason);
                self.manager.begin_close();
                let unprocessed = self.manager.exchanges()
                    .map(|e| e.id())
                    .filter(|&id| id > last_stream_id)
                    .collect::<Vec<_>>();
                for id in unprocessed {
                    self.manager.reset_stream(id, ErrorKind::ConnectionClosed);
                    self.outbound.remove(&id);
                }
            }
            Frame::PushPromise { .. } => {
                return Err(Error::Protocol("PUSH_PROMISE is disabled"));
            }
            Frame::Settings { ack: true, .. } | Frame::Ping { ack: true, .. }
            | Frame::Priority { .. } | Frame::WindowUpdate { .. }
            | Frame::Unknown { .. } => {}
        }
        Ok(())
    }

    fn process_output(&mut self) -> Result<(), Error> {
        let ids = self.outbound.keys().cloned().collect::<Vec<_>>();
        for id in ids {
            let progress = match self.outbound.get_mut(&id) {
                Some(out) => write_outbound(id, out,
                    &mut self.io.out_buf, self.h2.as_mut())?,
                None => continue,
            };
            match progress {
                Progress::Pending => {}
                Progress::Done => {
                    self.outbound.remove(&id);
                    self.manager.finish_outbound(id);
                }
                Progress::Abort(kind) => {
                    let h1 = self.outbound.remove(&id)
                        .map(|out| out.h1.is_some())
                        .unwrap_or(false);
                    self.manager.finish_outbound(id);
                    if h1 || self.h2.is_none() {
                        debug!("Request aborted ({}), closing", kind);
                        self.close(kind);
                    } else if let Some(ref codec) = self.h2 {
                        debug!("Resetting stream {}: {}", id, kind);
                        codec.writer.rst_stream(&mut self.io.out_buf, id,
                                                Reason::Cancel);
                        self.manager.reset_stream(id, kind);
                    }
                }
            }
        }
        Ok(())
    }

    /// Fails futures of requests whose exchange ended without a response
    fn fail_pending(&mut self) {
        let manager = &self.manager;
        let failed = self.pending.keys()
            .filter_map(|&id| match manager.exchange(id) {
                None => Some((id, ErrorKind::ConnectionClosed)),
                Some(ex) if ex.status().is_terminal() => {
                    Some((id, ex.terminal_error()
                        .unwrap_or(ErrorKind::ConnectionClosed)))
                }
                Some(_) => None,
            })
            .collect::<Vec<_>>();
        for (id, kind) in failed {
            if let Some(sender) = self.pending.remove(&id) {
                sender.send(Err(kind.into())).ok();
            }
        }
    }

    fn close(&mut self, cause: ErrorKind) {
        self.fail_pending();
        self.manager.close(cause);
        for (_, sender) in mem::replace(&mut self.pending, BTreeMap::new()) {
            sender.send(Err(cause.into())).ok();
        }
        self.outbound.clear();
    }

    fn protocol_error(&mut self, err: &Error) {
        info!("Protocol error: {}", err);
        if let Some(ref codec) = self.h2 {
            if !self.goaway_sent {
                codec.writer.goaway(&mut self.io.out_buf, 0,
                                    Reason::ProtocolError);
                self.goaway_sent = true;
            }
        }
        self.close(ErrorKind::ProtocolViolation);
        self.io.flush().ok();
    }

    /// Returns true when a closing connection has nothing more to do
    fn poll_finish(&mut self) -> Result<bool, Error> {
        if self.manager.is_closed() {
            return Ok(true);
        }
        if !self.manager.is_closing() || !self.manager.is_empty() {
            return Ok(false);
        }
        if let Some(ref codec) = self.h2 {
            if !self.goaway_sent {
                codec.writer.goaway(&mut self.io.out_buf, 0, Reason::NoError);
                self.goaway_sent = true;
            }
        }
        self.flush()?;
        if self.io.out_buf.len() > 0 {
            return Ok(false);
        }
        self.close(ErrorKind::ConnectionClosed);
        Ok(true)
    }
}

impl<S: AsyncRead + AsyncWrite> Future for Proto<S> {
    type Item = ();
    type Error = Error;

    fn poll(&mut self) -> Poll<(), Error> {
        self.manager.listener().register();
        loop {
            self.start_requests()?;
            self.read_input();
            if let Err(e) = self.process_input() {
                self.protocol_error(&e);
                return Err(e);
            }
            self.process_output()?;
            self.flush()?;
            self.fail_pending();
            let reaped = self.manager.reap();
            if self.eof {
                debug!("Connection is closed by peer");
                self.close(ErrorKind::ConnectionClosed);
                return Ok(Async::Ready(()));
            }
            if self.manager.poll_idle(Instant::now()) {
                continue;
            }
            if self.poll_finish()? {
                return Ok(Async::Ready(()));
            }
            if !reaped.is_empty() && !self.queue.is_empty() {
                continue;
            }
            if self.timer.poll_deadline(self.manager.idle_deadline())? {
                continue;
            }
            return Ok(Async::NotReady);
        }
    }
}

impl<S> Drop for Proto<S> {
    fn drop(&mut self) {
        self.manager.close(ErrorKind::ConnectionClosed);
        for (_, sender) in mem::replace(&mut self.pending, BTreeMap::new()) {
            sender.send(Err(ErrorKind::ConnectionClosed.into())).ok();
        }
    }
}
