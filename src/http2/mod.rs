//! HTTP/2 framing used by both connection drivers
mod frame;
mod hpack;

pub use self::frame::{Frame, FrameDecoder, FrameWriter};
pub use self::hpack::{HeaderDecoder, HeaderEncoder};

use tk_bufstream::Buf;

use crate::error::Error;

/// Client connection preface
pub const CONNECTION_PREFACE: &'static [u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// Frame size every peer must accept
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 16_384;
/// Largest frame size a peer may announce
pub const MAX_ALLOWED_FRAME_SIZE: u32 = 16_777_215;

pub const SETTINGS_HEADER_TABLE_SIZE: u16 = 0x1;
pub const SETTINGS_ENABLE_PUSH: u16 = 0x2;
pub const SETTINGS_MAX_CONCURRENT_STREAMS: u16 = 0x3;
pub const SETTINGS_INITIAL_WINDOW_SIZE: u16 = 0x4;
pub const SETTINGS_MAX_FRAME_SIZE: u16 = 0x5;

/// Error codes of RST_STREAM and GOAWAY frames
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reason {
    NoError,
    ProtocolError,
    InternalError,
    StreamClosed,
    RefusedStream,
    Cancel,
    CompressionError,
    Other(u32),
}

impl Reason {
    pub fn from_code(code: u32) -> Reason {
        use self::Reason::*;
        match code {
            0x0 => NoError,
            0x1 => ProtocolError,
            0x2 => InternalError,
            0x5 => StreamClosed,
            0x7 => RefusedStream,
            0x8 => Cancel,
            0x9 => CompressionError,
            x => Other(x),
        }
    }
    pub fn code(&self) -> u32 {
        use self::Reason::*;
        match *self {
            NoError => 0x0,
            ProtocolError => 0x1,
            InternalError => 0x2,
            StreamClosed => 0x5,
            RefusedStream => 0x7,
            Cancel => 0x8,
            CompressionError => 0x9,
            Other(x) => x,
        }
    }
}

/// Per-connection HTTP/2 state shared by client and server drivers
pub struct Codec {
    pub frames: FrameDecoder,
    pub writer: FrameWriter,
    pub encoder: HeaderEncoder,
    pub decoder: HeaderDecoder,
}

impl Codec {
    pub fn new() -> Codec {
        Codec {
            frames: FrameDecoder::new(),
            writer: FrameWriter::new(),
            encoder: HeaderEncoder::new(),
            decoder: HeaderDecoder::new(),
        }
    }
    /// Applies peer SETTINGS and acknowledges them
    ///
    /// Only the maximum frame size affects us, the rest is acknowledged
    /// and ignored.
    pub fn peer_settings(&mut self, buf: &mut Buf, settings: &[(u16, u32)])
        -> Result<(), Error>
    {
        for &(id, value) in settings {
            match id {
                SETTINGS_MAX_FRAME_SIZE => {
                    self.writer.set_max_frame_size(value)?;
                }
                SETTINGS_ENABLE_PUSH if value > 1 => {
                    return Err(Error::Protocol("invalid SETTINGS_ENABLE_PUSH"));
                }
                SETTINGS_INITIAL_WINDOW_SIZE if value > 0x7fff_ffff => {
                    return Err(Error::Protocol(
                        "invalid SETTINGS_INITIAL_WINDOW_SIZE"));
                }
                _ => {}
            }
        }
        self.writer.settings_ack(buf);
        Ok(())
    }
    /// Returns flow control credit for received DATA
    pub fn credit(&self, buf: &mut Buf, stream_id: u32, len: usize,
        end_stream: bool)
    {
        if len == 0 {
            return;
        }
        self.writer.window_update(buf, 0, len as u32);
        if !end_stream {
            self.writer.window_update(buf, stream_id, len as u32);
        }
    }
}

/// Checks whether `data` is (a prefix of) the client preface
///
/// Returns `Some(true)` on a full match, `Some(false)` on mismatch and
/// `None` if more bytes are needed to decide.
pub fn match_preface(data: &[u8]) -> Option<bool> {
    let n = ::std::cmp::min(data.len(), CONNECTION_PREFACE.len());
    if data[..n] != CONNECTION_PREFACE[..n] {
        Some(false)
    } else if n == CONNECTION_PREFACE.len() {
        Some(true)
    } else {
        None
    }
}

#[cfg(test)]
mod test {
    use tk_bufstream::Buf;

    use super::{match_preface, Codec, Frame, FrameDecoder, Reason};
    use super::{CONNECTION_PREFACE, SETTINGS_MAX_FRAME_SIZE};

    #[test]
    fn preface() {
        assert_eq!(match_preface(b""), None);
        assert_eq!(match_preface(b"PRI * HT"), None);
        assert_eq!(match_preface(b"GET / HTTP/1.1\r\n"), Some(false));
        assert_eq!(match_preface(CONNECTION_PREFACE), Some(true));
    }

    #[test]
    fn reason() {
        assert_eq!(Reason::from_code(8), Reason::Cancel);
        assert_eq!(Reason::Other(0xd).code(), 0xd);
    }

    #[test]
    fn settings_are_acknowledged() {
        let mut codec = Codec::new();
        let mut buf = Buf::new();
        codec.peer_settings(&mut buf,
            &[(SETTINGS_MAX_FRAME_SIZE, 32768), (0x3, 10)]).unwrap();
        assert_eq!(FrameDecoder::new().decode(&mut buf).unwrap(),
            Some(Frame::Settings { ack: true, settings: vec![] }));
        assert!(codec.peer_settings(&mut buf,
            &[(SETTINGS_MAX_FRAME_SIZE, 10)]).is_err());
    }

    #[test]
    fn credit() {
        let codec = Codec::new();
        let mut buf = Buf::new();
        codec.credit(&mut buf, 1, 100, false);
        let mut dec = FrameDecoder::new();
        assert_eq!(dec.decode(&mut buf).unwrap(),
            Some(Frame::WindowUpdate { stream_id: 0, increment: 100 }));
        assert_eq!(dec.decode(&mut buf).unwrap(),
            Some(Frame::WindowUpdate { stream_id: 1, increment: 100 }));
        codec.credit(&mut buf, 1, 100, true);
        codec.credit(&mut buf, 1, 0, false);
        assert_eq!(dec.decode(&mut buf).unwrap(),
            Some(Frame::WindowUpdate { stream_id: 0, increment: 100 }));
        assert_eq!(dec.decode(&mut buf).unwrap(), None);
    }
}
