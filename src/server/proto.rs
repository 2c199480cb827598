use std::collections::BTreeMap;
use std::mem;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
#[cfg(feature="date_header")]
use std::time::SystemTime;

use futures::{Async, Future, Poll};
use futures_cpupool::CpuPool;
use tk_bufstream::{Buf, IoBuf};
use tokio_core::reactor::Handle;
use tokio_io::{AsyncRead, AsyncWrite};

use crate::buffer::StreamingMessageBuffer;
use crate::chunk::{Chunk, ChunkSource};
use crate::config::ListenerConfig;
use crate::connection::{ConnectionManager, Protocol, Role};
use crate::enums::{Status, Version};
use crate::error::{Error, ErrorKind};
use crate::exchange::{Exchange, StreamId};
use crate::headers::{is_content_length, is_hop_by_hop};
use crate::http1::{self, BodyDecoder, MessageState, ParsedRequest};
use crate::http2::{self, Codec, Frame, Reason};
use crate::message::ResponseHead;
use crate::simple_error_page::SimpleErrorPage;
use crate::timer::IdleTimer;
use super::{Handler, Request, Responder};


enum InState {
    /// Waiting for enough bytes to tell the HTTP/2 preface from HTTP/1.x
    Detect,
    Headers,
    Body(StreamId, BodyDecoder),
    /// Body of the request that asked for `Upgrade: h2c`
    UpgradeBody(StreamId, BodyDecoder),
    Preface,
    Frames,
    Closed,
}

enum Progress {
    Pending,
    Done,
    Abort(ErrorKind),
}

/// Response being written for a single exchange
struct Outbound {
    exchange: Exchange,
    body: StreamingMessageBuffer,
    is_head: bool,
    close: bool,
    head_written: bool,
    h1: Option<MessageState>,
}

/// Server side connection driver
///
/// Owns the socket, decodes requests into the `ConnectionManager`, runs
/// handlers on the pool and writes responses as handlers produce them.
/// Resolves when the connection is closed.
pub struct Proto<S> {
    io: IoBuf<S>,
    peer_addr: SocketAddr,
    manager: ConnectionManager,
    reading: InState,
    eof: bool,
    outbound: BTreeMap<StreamId, Outbound>,
    h2: Option<Codec>,
    http2_enabled: bool,
    goaway_sent: bool,
    handler: Arc<dyn Handler>,
    pool: CpuPool,
    timer: IdleTimer,
}

fn dispatch(handler: &Arc<dyn Handler>, pool: &CpuPool,
    peer_addr: SocketAddr, exchange: Exchange)
{
    debug!("{} {} from {} (stream {})", exchange.request().method,
        exchange.request().path, peer_addr, exchange.id());
    let handler = handler.clone();
    let request = Request::new(exchange.clone(), peer_addr);
    let responder = Responder::new(exchange);
    pool.spawn_fn(move || {
        handler.handle(request, responder);
        Ok::<(), ()>(())
    }).forget();
}

#[cfg(feature="date_header")]
fn date(head: &mut ResponseHead) {
    if !head.headers.contains("Date") {
        head.headers.set("Date", httpdate::fmt_http_date(SystemTime::now()));
    }
}

#[cfg(not(feature="date_header"))]
fn date(_head: &mut ResponseHead) {
}

/// Writes HTTP/1.1 status line and headers
///
/// Without a known `length` the body is chunked.
fn h1_head(buf: &mut Buf, head: &ResponseHead, is_head: bool, close: bool,
    length: Option<u64>)
    -> Result<MessageState, Error>
{
    let mut state = MessageState::response(Version::Http11, is_head, close);
    state.response_status(buf, head.code, &head.reason);
    for (name, value) in &head.headers {
        if is_hop_by_hop(name) || is_content_length(name) {
            continue;
        }
        state.add_header(buf, name, value)?;
    }
    if head.status().has_body() {
        match length {
            Some(n) => state.add_length(buf, n)?,
            None => state.add_chunked(buf)?,
        }
    }
    state.done_headers(buf)?;
    Ok(state)
}

fn write_outbound(id: StreamId, out: &mut Outbound, buf: &mut Buf,
    mut h2: Option<&mut Codec>)
    -> Result<Progress, Error>
{
    if !out.head_written {
        let mut head = match out.exchange.response_head() {
            Some(head) => head,
            None if out.exchange.status().is_terminal() => {
                return Ok(Progress::Abort(out.exchange.terminal_error()
                    .unwrap_or(ErrorKind::ConnectionClosed)));
            }
            None => return Ok(Progress::Pending),
        };
        date(&mut head);
        match h2 {
            Some(ref mut codec) => {
                let block = codec.encoder.encode_response(&head);
                codec.writer.headers(buf, id, &block, false);
            }
            None => {
                out.close |= head.headers.has_token("Connection", "close");
                let length = head.content_length().or_else(|| {
                    if out.body.is_end_of_message() {
                        Some(out.body.queued_bytes() as u64)
                    } else {
                        None
                    }
                });
                out.h1 = Some(h1_head(buf, &head, out.is_head, out.close,
                                      length)?);
            }
        }
        debug!("Response {} on stream {}", head.code, id);
        out.head_written = true;
    }
    loop {
        let chunk = match out.body.poll_chunk() {
            Ok(Async::Ready(Some(chunk))) => chunk,
            Ok(Async::Ready(None)) => Chunk::end(),
            Ok(Async::NotReady) => return Ok(Progress::Pending),
            Err(kind) => return Ok(Progress::Abort(kind)),
        };
        match h2 {
            Some(ref mut codec) => {
                let data = if out.is_head { &b""[..] } else { chunk.data() };
                if !data.is_empty() || chunk.is_last() {
                    codec.writer.data(buf, id, data, chunk.is_last());
                }
            }
            None => {
                if let Some(ref mut state) = out.h1 {
                    state.write_body(buf, chunk.data())?;
                    if chunk.is_last() {
                        state.done(buf)?;
                    }
                }
            }
        }
        if chunk.is_last() {
            return Ok(Progress::Done);
        }
    }
}

impl<S: AsyncRead + AsyncWrite> Proto<S> {
    /// Create a new protocol implementation from a TCP connection and a config
    pub fn new(conn: S, peer_addr: SocketAddr, config: &Arc<ListenerConfig>,
        handler: Arc<dyn Handler>, pool: CpuPool, handle: &Handle)
        -> Proto<S>
    {
        let http2 = config.version == Version::Http2;
        Proto {
            io: IoBuf::new(conn),
            peer_addr: peer_addr,
            manager: ConnectionManager::new(Role::Server, Protocol::Http11,
                config.socket_idle_timeout, Instant::now()),
            reading: if http2 { InState::Detect } else { InState::Headers },
            eof: false,
            outbound: BTreeMap::new(),
            h2: None,
            http2_enabled: http2,
            goaway_sent: false,
            handler: handler,
            pool: pool,
            timer: IdleTimer::new(handle),
        }
    }

    fn start_http2(&mut self) {
        let codec = Codec::new();
        codec.writer.settings(&mut self.io.out_buf,
            &[(http2::SETTINGS_MAX_CONCURRENT_STREAMS, 100)]);
        self.h2 = Some(codec);
    }

    fn read_input(&mut self) {
        let mut total = 0;
        loop {
            match self.io.read() {
                Ok(0) => break,
                Ok(n) => total += n,
                Err(e) => {
                    debug!("Read error from {}: {}", self.peer_addr, e);
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

    fn deliver(&mut self, id: StreamId, chunk: Chunk) -> Result<(), Error> {
        // exchange may be gone already, e.g. timed out and answered
        if self.manager.exchange(id).is_some() {
            self.manager.push_inbound(id, chunk)?;
        }
        Ok(())
    }

    fn bad_request(&mut self) -> Result<(), Error> {
        let page = SimpleErrorPage::new(Status::BadRequest);
        let buf = &mut self.io.out_buf;
        let mut state = h1_head(buf, &page.head(), false, true,
                                Some(page.body().len() as u64))?;
        state.write_body(buf, page.body().data())?;
        state.done(buf)?;
        self.manager.begin_close();
        Ok(())
    }

    fn start_request(&mut self, req: ParsedRequest) -> Result<InState, Error> {
        let ParsedRequest { head, body, close, expect_continue,
                            upgrade_h2c, .. } = req;
        let upgrade = upgrade_h2c && !close && self.http2_enabled;
        let is_head = head.is_head();
        let id = self.manager.next_stream_id();
        let exchange = self.manager.open_exchange(id, head,
            StreamingMessageBuffer::new(), Instant::now())?;
        if upgrade {
            self.io.out_buf.extend(b"HTTP/1.1 101 Switching Protocols\r\n\
                Connection: Upgrade\r\n\
                Upgrade: h2c\r\n\r\n");
            self.manager.switch_protocol(Protocol::Http2Upgrade)?;
            self.start_http2();
        } else if expect_continue {
            http1::write_continue(&mut self.io.out_buf);
        }
        if close {
            self.manager.begin_close();
        }
        self.outbound.insert(id, Outbound {
            body: exchange.response_body().clone(),
            exchange: exchange.clone(),
            is_head: is_head,
            close: close,
            head_written: false,
            h1: None,
        });
        dispatch(&self.handler, &self.pool, self.peer_addr, exchange);
        let decoder = BodyDecoder::new(body);
        if upgrade {
            Ok(InState::UpgradeBody(id, decoder))
        } else {
            Ok(InState::Body(id, decoder))
        }
    }

    fn process_input(&mut self) -> Result<(), Error> {
        loop {
            let (next, progress) = match
                mem::replace(&mut self.reading, InState::Closed)
            {
                InState::Detect => {
                    match http2::match_preface(&self.io.in_buf[..]) {
                        Some(true) => {
                            self.io.in_buf.consume(
                                http2::CONNECTION_PREFACE.len());
                            self.manager.switch_protocol(
                                Protocol::Http2PriorKnowledge)?;
                            self.start_http2();
                            (InState::Frames, true)
                        }
                        Some(false) => (InState::Headers, true),
                        None => (InState::Detect, false),
                    }
                }
                InState::Headers => {
                    if !self.manager.is_empty() || self.manager.is_closing() {
                        (InState::Headers, false)
                    } else {
                        match http1::parse_request(&self.io.in_buf[..]) {
                            Ok(Some(req)) => {
                                self.io.in_buf.consume(req.consumed);
                                (self.start_request(req)?, true)
                            }
                            Ok(None) => (InState::Headers, false),
                            Err(e) => {
                                info!("Bad request from {}: {}",
                                      self.peer_addr, e);
                                self.bad_request()?;
                                (InState::Closed, false)
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
                                (InState::Headers, true)
                            } else {
                                (InState::Body(id, decoder), true)
                            }
                        }
                        None => (InState::Body(id, decoder), false),
                    }
                }
                InState::UpgradeBody(id, mut decoder) => {
                    match decoder.decode(&mut self.io.in_buf, self.eof)? {
                        Some(chunk) => {
                            let last = chunk.is_last();
                            self.deliver(id, chunk)?;
                            if last {
                                (InState::Preface, true)
                            } else {
                                (InState::UpgradeBody(id, decoder), true)
                            }
                        }
                        None => (InState::UpgradeBody(id, decoder), false),
                    }
                }
                InState::Preface => {
                    match http2::match_preface(&self.io.in_buf[..]) {
                        Some(true) => {
                            self.io.in_buf.consume(
                                http2::CONNECTION_PREFACE.len());
                            (InState::Frames, true)
                        }
                        Some(false) => {
                            return Err(Error::Protocol(
                                "invalid connection preface"));
                        }
                        None => (InState::Preface, false),
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
                InState::Closed => (InState::Closed, false),
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
                let head = codec.decoder.decode_request(&block)?;
                if self.manager.exchange(stream_id).is_some() {
                    // trailers, they are not exposed
                    if end_stream {
                        self.manager.push_inbound(stream_id, Chunk::end())?;
                    }
                    return Ok(());
                }
                if stream_id <= self.manager.last_peer_stream() {
                    return Err(Error::Protocol("stream id is reused"));
                }
                let is_head = head.is_head();
                let opened = self.manager.open_exchange(stream_id, head,
                    StreamingMessageBuffer::new(), Instant::now());
                match opened {
                    Ok(exchange) => {
                        if end_stream {
                            self.manager.push_inbound(stream_id,
                                                      Chunk::end())?;
                        }
                        self.outbound.insert(stream_id, Outbound {
                            body: exchange.response_body().clone(),
                            exchange: exchange.clone(),
                            is_head: is_head,
                            close: false,
                            head_written: false,
                            h1: None,
                        });
                        dispatch(&self.handler, &self.pool, self.peer_addr,
                                 exchange);
                    }
                    Err(ErrorKind::ProtocolViolation) => {
                        return Err(Error::Protocol("invalid stream id"));
                    }
                    Err(kind) => {
                        debug!("Refusing stream {}: {}", stream_id, kind);
                        codec.writer.rst_stream(buf, stream_id,
                                                Reason::RefusedStream);
                    }
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
                } else if stream_id > self.manager.last_peer_stream() {
                    return Err(Error::Protocol("DATA on idle stream"));
                }
                codec.credit(buf, stream_id, len, end_stream);
            }
            Frame::RstStream { stream_id, reason } => {
                debug!("Stream {} reset by peer: {:?}", stream_id, reason);
                self.manager.reset_stream(stream_id, ErrorKind::StreamReset);
                self.outbound.remove(&stream_id);
            }
            Frame::Settings { ack: false, settings } => {
                codec.peer_settings(buf, &settings)?;
            }
            Frame::Ping { ack: false, payload } => {
                codec.writer.ping_ack(buf, &payload);
            }
            Frame::GoAway { last_stream_id, reason } => {
                debug!("GOAWAY from {} (last stream {}, {:?})",
                       self.peer_addr, last_stream_id, reason);
                self.manager.begin_close();
            }
            Frame::PushPromise { .. } => {
                return Err(Error::Protocol("PUSH_PROMISE sent by client"));
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
                    if let Some(out) = self.outbound.remove(&id) {
                        if out.close {
                            self.manager.begin_close();
                        }
                    }
                    self.manager.finish_outbound(id);
                }
                Progress::Abort(kind) => {
                    self.outbound.remove(&id);
                    self.manager.finish_outbound(id);
                    match self.h2 {
                        Some(ref codec) => {
                            debug!("Resetting stream {}: {}", id, kind);
                            codec.writer.rst_stream(&mut self.io.out_buf, id,
                                                    Reason::Cancel);
                            self.manager.reset_stream(id, kind);
                        }
                        None => {
                            // HTTP/1.x framing is broken, nothing to reuse
                            debug!("Response aborted ({}), closing {}",
                                   kind, self.peer_addr);
                            self.manager.close(kind);
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn protocol_error(&mut self, err: &Error) {
        info!("Protocol error from {}: {}", self.peer_addr, err);
        if let Some(ref codec) = self.h2 {
            if !self.goaway_sent {
                codec.writer.goaway(&mut self.io.out_buf,
                    self.manager.last_peer_stream(), Reason::ProtocolError);
                self.goaway_sent = true;
            }
        }
        self.manager.close(ErrorKind::ProtocolViolation);
        self.io.flush().ok();
    }

    /// Returns true when a closing connection has nothing more to write
    fn poll_finish(&mut self) -> Result<bool, Error> {
        if self.manager.is_closed() {
            self.io.flush().ok();
            return Ok(true);
        }
        if !self.manager.is_closing() || !self.outbound.is_empty() {
            return Ok(false);
        }
        if let Some(ref codec) = self.h2 {
            if !self.goaway_sent {
                codec.writer.goaway(&mut self.io.out_buf,
                    self.manager.last_peer_stream(), Reason::NoError);
                self.goaway_sent = true;
            }
        }
        self.flush()?;
        if self.io.out_buf.len() > 0 {
            return Ok(false);
        }
        self.manager.close(ErrorKind::ConnectionClosed);
        Ok(true)
    }
}

impl<S: AsyncRead + AsyncWrite> Future for Proto<S> {
    type Item = ();
    type Error = Error;

    fn poll(&mut self) -> Poll<(), Error> {
        self.manager.listener().register();
        loop {
            self.read_input();
            if let Err(e) = self.process_input() {
                self.protocol_error(&e);
                return Err(e);
            }
            self.process_output()?;
            self.flush()?;
            let reaped = self.manager.reap();
            if self.eof {
                debug!("Connection from {} is closed by peer", self.peer_addr);
                self.manager.close(ErrorKind::ConnectionClosed);
                return Ok(Async::Ready(()));
            }
            if self.manager.poll_idle(Instant::now()) {
                continue;
            }
            if self.poll_finish()? {
                return Ok(Async::Ready(()));
            }
            if !reaped.is_empty() {
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
    }
}
