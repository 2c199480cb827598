//! Frame codec
//!
//! Every frame starts with a 9 byte header: 24 bit length, type, flags and
//! a 31 bit stream identifier.
use std::cmp::min;

use byteorder::{BigEndian, ByteOrder};
use bytes::Bytes;
use tk_bufstream::Buf;

use crate::error::Error;
use super::{Reason, DEFAULT_MAX_FRAME_SIZE, MAX_ALLOWED_FRAME_SIZE};

const HEADER_LEN: usize = 9;

const DATA: u8 = 0x0;
const HEADERS: u8 = 0x1;
const PRIORITY: u8 = 0x2;
const RST_STREAM: u8 = 0x3;
const SETTINGS: u8 = 0x4;
const PUSH_PROMISE: u8 = 0x5;
const PING: u8 = 0x6;
const GOAWAY: u8 = 0x7;
const WINDOW_UPDATE: u8 = 0x8;
const CONTINUATION: u8 = 0x9;

const END_STREAM: u8 = 0x1;
const ACK: u8 = 0x1;
const END_HEADERS: u8 = 0x4;
const PADDED: u8 = 0x8;
const PRIORITY_FLAG: u8 = 0x20;

/// A decoded frame
///
/// HEADERS and CONTINUATION frames are merged, `block` is the complete
/// header block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Data { stream_id: u32, data: Bytes, end_stream: bool },
    Headers { stream_id: u32, block: Vec<u8>, end_stream: bool },
    Priority { stream_id: u32 },
    RstStream { stream_id: u32, reason: Reason },
    Settings { ack: bool, settings: Vec<(u16, u32)> },
    PushPromise { stream_id: u32 },
    Ping { ack: bool, payload: [u8; 8] },
    GoAway { last_stream_id: u32, reason: Reason },
    WindowUpdate { stream_id: u32, increment: u32 },
    Unknown { kind: u8 },
}

struct PendingHeaders {
    stream_id: u32,
    end_stream: bool,
    block: Vec<u8>,
}

/// Incremental frame decoder over the input buffer of a connection
pub struct FrameDecoder {
    max_frame_size: u32,
    pending: Option<PendingHeaders>,
}

fn strip_padding(flags: u8, payload: &[u8]) -> Result<&[u8], Error> {
    if flags & PADDED == 0 {
        return Ok(payload);
    }
    if payload.is_empty() {
        return Err(Error::Protocol("padded frame without pad length"));
    }
    let pad = payload[0] as usize;
    if pad + 1 > payload.len() {
        return Err(Error::Protocol("padding exceeds frame payload"));
    }
    Ok(&payload[1..payload.len() - pad])
}

impl FrameDecoder {
    pub fn new() -> FrameDecoder {
        FrameDecoder {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            pending: None,
        }
    }

    /// Decodes the next complete frame from `buf`
    ///
    /// Returns `None` if there is not enough data yet. Frames interleaved
    /// into a header block are a protocol error.
    pub fn decode(&mut self, buf: &mut Buf) -> Result<Option<Frame>, Error> {
        loop {
            if buf.len() < HEADER_LEN {
                return Ok(None);
            }
            let (length, kind, flags, stream_id) = {
                let hdr = &buf[..][..HEADER_LEN];
                (BigEndian::read_u24(&hdr[0..3]), hdr[3], hdr[4],
                 BigEndian::read_u32(&hdr[5..9]) & 0x7fff_ffff)
            };
            if length > self.max_frame_size {
                return Err(Error::Protocol("frame is too large"));
            }
            let total = HEADER_LEN + length as usize;
            if buf.len() < total {
                return Ok(None);
            }
            let frame = {
                let payload = &buf[..][HEADER_LEN..total];
                self.parse(kind, flags, stream_id, payload)?
            };
            buf.consume(total);
            if let Some(frame) = frame {
                return Ok(Some(frame));
            }
        }
    }

    fn parse(&mut self, kind: u8, flags: u8, stream_id: u32, payload: &[u8])
        -> Result<Option<Frame>, Error>
    {
        if let Some(ref mut pending) = self.pending {
            if kind != CONTINUATION || stream_id != pending.stream_id {
                return Err(Error::Protocol("header block is interrupted"));
            }
        }
        let frame = match kind {
            DATA => {
                if stream_id == 0 {
                    return Err(Error::Protocol("DATA on stream zero"));
                }
                Frame::Data {
                    stream_id: stream_id,
                    data: Bytes::from(strip_padding(flags, payload)?),
                    end_stream: flags & END_STREAM != 0,
                }
            }
            HEADERS => {
                if stream_id == 0 {
                    return Err(Error::Protocol("HEADERS on stream zero"));
                }
                let mut block = strip_padding(flags, payload)?;
                if flags & PRIORITY_FLAG != 0 {
                    if block.len() < 5 {
                        return Err(Error::Protocol("short HEADERS priority"));
                    }
                    block = &block[5..];
                }
                let end_stream = flags & END_STREAM != 0;
                if flags & END_HEADERS == 0 {
                    self.pending = Some(PendingHeaders {
                        stream_id: stream_id,
                        end_stream: end_stream,
                        block: block.to_vec(),
                    });
                    return Ok(None);
                }
                Frame::Headers {
                    stream_id: stream_id,
                    block: block.to_vec(),
                    end_stream: end_stream,
                }
            }
            CONTINUATION => {
                let mut pending = match self.pending.take() {
                    Some(pending) => pending,
                    None => {
                        return Err(Error::Protocol("unexpected CONTINUATION"));
                    }
                };
                pending.block.extend_from_slice(payload);
                if flags & END_HEADERS == 0 {
                    self.pending = Some(pending);
                    return Ok(None);
                }
                Frame::Headers {
                    stream_id: pending.stream_id,
                    block: pending.block,
                    end_stream: pending.end_stream,
                }
            }
            PRIORITY => Frame::Priority { stream_id: stream_id },
            RST_STREAM => {
                if payload.len() != 4 {
                    return Err(Error::Protocol("bad RST_STREAM size"));
                }
                Frame::RstStream {
                    stream_id: stream_id,
                    reason: Reason::from_code(BigEndian::read_u32(payload)),
                }
            }
            SETTINGS => {
                if payload.len() % 6 != 0 || stream_id != 0 {
                    return Err(Error::Protocol("malformed SETTINGS"));
                }
                let settings = payload.chunks(6)
                    .map(|s| (BigEndian::read_u16(&s[0..2]),
                              BigEndian::read_u32(&s[2..6])))
                    .collect();
                Frame::Settings { ack: flags & ACK != 0, settings: settings }
            }
            PUSH_PROMISE => Frame::PushPromise { stream_id: stream_id },
            PING => {
                if payload.len() != 8 {
                    return Err(Error::Protocol("bad PING size"));
                }
                let mut data = [0u8; 8];
                data.copy_from_slice(payload);
                Frame::Ping { ack: flags & ACK != 0, payload: data }
            }
            GOAWAY => {
                if payload.len() < 8 {
                    return Err(Error::Protocol("short GOAWAY"));
                }
                Frame::GoAway {
                    last_stream_id:
                        BigEndian::read_u32(&payload[0..4]) & 0x7fff_ffff,
                    reason: Reason::from_code(
                        BigEndian::read_u32(&payload[4..8])),
                }
            }
            WINDOW_UPDATE => {
                if payload.len() != 4 {
                    return Err(Error::Protocol("bad WINDOW_UPDATE size"));
                }
                Frame::WindowUpdate {
                    stream_id: stream_id,
                    increment: BigEndian::read_u32(payload) & 0x7fff_ffff,
                }
            }
            kind => Frame::Unknown { kind: kind },
        };
        Ok(Some(frame))
    }
}

/// Encodes frames into the output buffer of a connection
pub struct FrameWriter {
    max_frame_size: u32,
}

fn write_header(buf: &mut Buf, length: usize, kind: u8, flags: u8,
    stream_id: u32)
{
    let mut hdr = [0u8; HEADER_LEN];
    BigEndian::write_u24(&mut hdr[0..3], length as u32);
    hdr[3] = kind;
    hdr[4] = flags;
    BigEndian::write_u32(&mut hdr[5..9], stream_id & 0x7fff_ffff);
    buf.extend(&hdr);
}

impl FrameWriter {
    pub fn new() -> FrameWriter {
        FrameWriter { max_frame_size: DEFAULT_MAX_FRAME_SIZE }
    }
    /// Applies SETTINGS_MAX_FRAME_SIZE announced by the peer
    pub fn set_max_frame_size(&mut self, value: u32) -> Result<(), Error> {
        if value < DEFAULT_MAX_FRAME_SIZE || value > MAX_ALLOWED_FRAME_SIZE {
            return Err(Error::Protocol("invalid SETTINGS_MAX_FRAME_SIZE"));
        }
        self.max_frame_size = value;
        Ok(())
    }
    pub fn settings(&self, buf: &mut Buf, settings: &[(u16, u32)]) {
        write_header(buf, settings.len() * 6, SETTINGS, 0, 0);
        for &(id, value) in settings {
            let mut item = [0u8; 6];
            BigEndian::write_u16(&mut item[0..2], id);
            BigEndian::write_u32(&mut item[2..6], value);
            buf.extend(&item);
        }
    }
    pub fn settings_ack(&self, buf: &mut Buf) {
        write_header(buf, 0, SETTINGS, ACK, 0);
    }
    /// Writes a header block, splitting it into CONTINUATION frames
    pub fn headers(&self, buf: &mut Buf, stream_id: u32, block: &[u8],
        end_stream: bool)
    {
        let size = self.max_frame_size as usize;
        let mut parts = block.chunks(size).peekable();
        let first = parts.next().unwrap_or(&[]);
        let mut flags = if end_stream { END_STREAM } else { 0 };
        if parts.peek().is_none() {
            flags |= END_HEADERS;
        }
        write_header(buf, first.len(), HEADERS, flags, stream_id);
        buf.extend(first);
        while let Some(part) = parts.next() {
            let flags = if parts.peek().is_none() { END_HEADERS } else { 0 };
            write_header(buf, part.len(), CONTINUATION, flags, stream_id);
            buf.extend(part);
        }
    }
    /// Writes body data, splitting it by the peer's maximum frame size
    pub fn data(&self, buf: &mut Buf, stream_id: u32, data: &[u8],
        end_stream: bool)
    {
        let size = self.max_frame_size as usize;
        let mut rest = data;
        loop {
            let n = min(rest.len(), size);
            let last = n == rest.len();
            let flags = if last && end_stream { END_STREAM } else { 0 };
            write_header(buf, n, DATA, flags, stream_id);
            buf.extend(&rest[..n]);
            rest = &rest[n..];
            if last {
                break;
            }
        }
    }
    pub fn rst_stream(&self, buf: &mut Buf, stream_id: u32, reason: Reason) {
        write_header(buf, 4, RST_STREAM, 0, stream_id);
        let mut code = [0u8; 4];
        BigEndian::write_u32(&mut code, reason.code());
        buf.extend(&code);
    }
    pub fn ping_ack(&self, buf: &mut Buf, payload: &[u8; 8]) {
        write_header(buf, 8, PING, ACK, 0);
        buf.extend(&payload[..]);
    }
    pub fn goaway(&self, buf: &mut Buf, last_stream_id: u32, reason: Reason) {
        write_header(buf, 8, GOAWAY, 0, 0);
        let mut payload = [0u8; 8];
        BigEndian::write_u32(&mut payload[0..4], last_stream_id & 0x7fff_ffff);
        BigEndian::write_u32(&mut payload[4..8], reason.code());
        buf.extend(&payload);
    }
    pub fn window_update(&self, buf: &mut Buf, stream_id: u32, increment: u32)
    {
        write_header(buf, 4, WINDOW_UPDATE, 0, stream_id);
        let mut value = [0u8; 4];
        BigEndian::write_u32(&mut value, increment & 0x7fff_ffff);
        buf.extend(&value);
    }
}

#[cfg(test)]
mod test {
    use tk_bufstream::Buf;

    use super::{Frame, FrameDecoder, FrameWriter, HEADER_LEN};
    use crate::http2::{Reason, DEFAULT_MAX_FRAME_SIZE};

    #[test]
    fn settings() {
        let mut buf = Buf::new();
        let writer = FrameWriter::new();
        writer.settings(&mut buf, &[(2, 0), (3, 100)]);
        assert_eq!(&buf[..][..HEADER_LEN], &[0, 0, 12, 4, 0, 0, 0, 0, 0]);
        writer.settings_ack(&mut buf);
        let mut dec = FrameDecoder::new();
        assert_eq!(dec.decode(&mut buf).unwrap(), Some(Frame::Settings {
            ack: false, settings: vec![(2, 0), (3, 100)],
        }));
        assert_eq!(dec.decode(&mut buf).unwrap(), Some(Frame::Settings {
            ack: true, settings: vec![],
        }));
        assert_eq!(dec.decode(&mut buf).unwrap(), None);
    }

    #[test]
    fn partial_frame() {
        let mut buf = Buf::new();
        FrameWriter::new().window_update(&mut buf, 1, 10);
        let full = buf[..].to_vec();
        let mut input = Buf::new();
        input.extend(&full[..7]);
        let mut dec = FrameDecoder::new();
        assert_eq!(dec.decode(&mut input).unwrap(), None);
        input.extend(&full[7..]);
        assert_eq!(dec.decode(&mut input).unwrap(),
                   Some(Frame::WindowUpdate { stream_id: 1, increment: 10 }));
    }

    #[test]
    fn headers_with_continuation() {
        let block = vec![7u8; DEFAULT_MAX_FRAME_SIZE as usize + 100];
        let mut buf = Buf::new();
        FrameWriter::new().headers(&mut buf, 3, &block, true);
        // HEADERS + CONTINUATION
        assert_eq!(buf.len(), 2 * HEADER_LEN + block.len());
        let mut dec = FrameDecoder::new();
        assert_eq!(dec.decode(&mut buf).unwrap(), Some(Frame::Headers {
            stream_id: 3, block: block, end_stream: true,
        }));
        assert_eq!(buf.len(), 0);
    }

    #[test]
    fn interrupted_header_block() {
        let mut buf = Buf::new();
        let writer = FrameWriter::new();
        let block = vec![1u8; DEFAULT_MAX_FRAME_SIZE as usize + 1];
        writer.headers(&mut buf, 1, &block, false);
        // drop the CONTINUATION and put a DATA frame instead
        let first = buf[..][..HEADER_LEN + DEFAULT_MAX_FRAME_SIZE as usize]
            .to_vec();
        let mut input = Buf::new();
        input.extend(&first);
        writer.data(&mut input, 1, b"x", true);
        let mut dec = FrameDecoder::new();
        assert!(dec.decode(&mut input).is_err());
    }

    #[test]
    fn padded_data() {
        let mut buf = Buf::new();
        // length 6, DATA, PADDED | END_STREAM, stream 1, pad 2
        buf.extend(&[0, 0, 6, 0, 0x9, 0, 0, 0, 1, 2, b'a', b'b', b'c', 0, 0]);
        let mut dec = FrameDecoder::new();
        assert_eq!(dec.decode(&mut buf).unwrap(), Some(Frame::Data {
            stream_id: 1, data: "abc".into(), end_stream: true,
        }));
    }

    #[test]
    fn data_split_and_control() {
        let mut buf = Buf::new();
        let writer = FrameWriter::new();
        let body = vec![b'z'; DEFAULT_MAX_FRAME_SIZE as usize * 2];
        writer.data(&mut buf, 5, &body, true);
        writer.rst_stream(&mut buf, 5, Reason::Cancel);
        writer.goaway(&mut buf, 5, Reason::NoError);
        writer.ping_ack(&mut buf, b"12345678");
        let mut dec = FrameDecoder::new();
        match dec.decode(&mut buf).unwrap() {
            Some(Frame::Data { stream_id: 5, ref data, end_stream: false }) => {
                assert_eq!(data.len(), DEFAULT_MAX_FRAME_SIZE as usize);
            }
            other => panic!("unexpected {:?}", other),
        }
        match dec.decode(&mut buf).unwrap() {
            Some(Frame::Data { stream_id: 5, end_stream: true, .. }) => {}
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(dec.decode(&mut buf).unwrap(), Some(Frame::RstStream {
            stream_id: 5, reason: Reason::Cancel,
        }));
        assert_eq!(dec.decode(&mut buf).unwrap(), Some(Frame::GoAway {
            last_stream_id: 5, reason: Reason::NoError,
        }));
        assert_eq!(dec.decode(&mut buf).unwrap(), Some(Frame::Ping {
            ack: true, payload: *b"12345678",
        }));
    }
}
