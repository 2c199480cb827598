use std::cmp::min;

use bytes::Bytes;
use httparse::{self, parse_chunk_size};
use tk_bufstream::Buf;

use crate::chunk::Chunk;
use crate::error::{Error, ErrorKind};


/// How the length of a HTTP/1.x body is determined
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    /// `Content-Length` or no body at all (zero)
    Fixed(u64),
    /// `Transfer-Encoding: chunked`
    Chunked,
    /// Response delimited by connection close
    Eof,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Fixed(u64),
    ChunkSize,
    ChunkData(u64),
    ChunkEnd,
    Trailers,
    Eof,
    Done,
}

/// Incremental body decoder working on the input buffer of a connection
///
/// Produces `Chunk`s as soon as bytes arrive, the final chunk (maybe empty)
/// has the `last` flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BodyDecoder {
    state: State,
}

fn take(buf: &mut Buf, n: usize) -> Bytes {
    let data = Bytes::from(&buf[..][..n]);
    buf.consume(n);
    data
}

fn need_more(eof: bool) -> Result<Option<Chunk>, Error> {
    if eof {
        Err(Error::Exchange(ErrorKind::ConnectionClosed))
    } else {
        Ok(None)
    }
}

impl BodyDecoder {
    pub fn new(kind: BodyKind) -> BodyDecoder {
        BodyDecoder {
            state: match kind {
                BodyKind::Fixed(n) => State::Fixed(n),
                BodyKind::Chunked => State::ChunkSize,
                BodyKind::Eof => State::Eof,
            },
        }
    }
    /// The last chunk has been returned
    pub fn is_done(&self) -> bool {
        self.state == State::Done
    }
    /// Decodes the next piece of the body from `buf`
    ///
    /// Returns `None` when more input is needed or the body is done. `eof`
    /// tells that no more input will ever arrive.
    pub fn decode(&mut self, buf: &mut Buf, eof: bool)
        -> Result<Option<Chunk>, Error>
    {
        use self::State::*;
        loop {
            match self.state {
                Done => return Ok(None),
                Fixed(0) => {
                    self.state = Done;
                    return Ok(Some(Chunk::end()));
                }
                Fixed(remaining) => {
                    if buf.len() == 0 {
                        return need_more(eof);
                    }
                    let n = min(remaining, buf.len() as u64);
                    let data = take(buf, n as usize);
                    if n == remaining {
                        self.state = Done;
                        return Ok(Some(Chunk::last(data)));
                    }
                    self.state = Fixed(remaining - n);
                    return Ok(Some(Chunk::new(data)));
                }
                ChunkSize => match parse_chunk_size(&buf[..])? {
                    httparse::Status::Complete((bytes, 0)) => {
                        buf.consume(bytes);
                        self.state = Trailers;
                    }
                    httparse::Status::Complete((bytes, size)) => {
                        buf.consume(bytes);
                        self.state = ChunkData(size);
                    }
                    httparse::Status::Partial => return need_more(eof),
                },
                ChunkData(remaining) => {
                    if buf.len() == 0 {
                        return need_more(eof);
                    }
                    let n = min(remaining, buf.len() as u64);
                    let data = take(buf, n as usize);
                    self.state = if n == remaining {
                        ChunkEnd
                    } else {
                        ChunkData(remaining - n)
                    };
                    return Ok(Some(Chunk::new(data)));
                }
                ChunkEnd => {
                    if buf.len() < 2 {
                        return need_more(eof);
                    }
                    if &buf[..][..2] != b"\r\n" {
                        return Err(Error::Protocol("bad chunk terminator"));
                    }
                    buf.consume(2);
                    self.state = ChunkSize;
                }
                Trailers => {
                    // trailer fields are skipped
                    let line = buf[..].windows(2).position(|w| w == b"\r\n");
                    match line {
                        Some(0) => {
                            buf.consume(2);
                            self.state = Done;
                            return Ok(Some(Chunk::end()));
                        }
                        Some(end) => buf.consume(end + 2),
                        None => return need_more(eof),
                    }
                }
                Eof => {
                    if buf.len() > 0 {
                        let n = buf.len();
                        return Ok(Some(Chunk::new(take(buf, n))));
                    }
                    if eof {
                        self.state = Done;
                        return Ok(Some(Chunk::end()));
                    }
                    return Ok(None);
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use tk_bufstream::Buf;

    use crate::chunk::Chunk;
    use super::{BodyDecoder, BodyKind};

    fn decode_all(dec: &mut BodyDecoder, buf: &mut Buf, eof: bool)
        -> Vec<Chunk>
    {
        let mut result = Vec::new();
        while let Some(chunk) = dec.decode(buf, eof).unwrap() {
            result.push(chunk);
        }
        result
    }

    #[test]
    fn fixed() {
        let mut dec = BodyDecoder::new(BodyKind::Fixed(5));
        let mut buf = Buf::new();
        buf.extend(b"hel");
        assert_eq!(decode_all(&mut dec, &mut buf, false),
                   vec![Chunk::new("hel")]);
        buf.extend(b"loGET");
        assert_eq!(decode_all(&mut dec, &mut buf, false),
                   vec![Chunk::last("lo")]);
        assert!(dec.is_done());
        assert_eq!(&buf[..], b"GET");
    }

    #[test]
    fn empty() {
        let mut dec = BodyDecoder::new(BodyKind::Fixed(0));
        let mut buf = Buf::new();
        assert_eq!(decode_all(&mut dec, &mut buf, false), vec![Chunk::end()]);
    }

    #[test]
    fn chunked() {
        let mut dec = BodyDecoder::new(BodyKind::Chunked);
        let mut buf = Buf::new();
        buf.extend(b"4\r\nhell\r\n");
        assert_eq!(decode_all(&mut dec, &mut buf, false),
                   vec![Chunk::new("hell")]);
        buf.extend(b"1\r\no\r\n0\r\n");
        assert_eq!(decode_all(&mut dec, &mut buf, false),
                   vec![Chunk::new("o")]);
        assert!(!dec.is_done());
        buf.extend(b"X-Trailer: 1\r\n\r\n");
        assert_eq!(decode_all(&mut dec, &mut buf, false), vec![Chunk::end()]);
        assert!(dec.is_done());
        assert_eq!(buf.len(), 0);
    }

    #[test]
    fn bad_chunk() {
        let mut dec = BodyDecoder::new(BodyKind::Chunked);
        let mut buf = Buf::new();
        buf.extend(b"zz\r\n");
        assert!(dec.decode(&mut buf, false).is_err());
    }

    #[test]
    fn until_eof() {
        let mut dec = BodyDecoder::new(BodyKind::Eof);
        let mut buf = Buf::new();
        buf.extend(b"abc");
        assert_eq!(decode_all(&mut dec, &mut buf, false),
                   vec![Chunk::new("abc")]);
        assert_eq!(decode_all(&mut dec, &mut buf, true), vec![Chunk::end()]);
    }

    #[test]
    fn truncated() {
        let mut dec = BodyDecoder::new(BodyKind::Fixed(10));
        let mut buf = Buf::new();
        buf.extend(b"abc");
        dec.decode(&mut buf, true).unwrap();
        assert!(dec.decode(&mut buf, true).is_err());
    }
}
