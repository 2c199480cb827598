use bytes::Bytes;
use futures::Poll;

use crate::error::ErrorKind;


/// A piece of a message body
///
/// Exactly one chunk of a body carries the `last` flag, nothing follows it.
/// The last chunk may be empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    data: Bytes,
    last: bool,
}

impl Chunk {
    /// A chunk in the middle of a body
    pub fn new<B: Into<Bytes>>(data: B) -> Chunk {
        Chunk { data: data.into(), last: false }
    }
    /// The final chunk of a body
    pub fn last<B: Into<Bytes>>(data: B) -> Chunk {
        Chunk { data: data.into(), last: true }
    }
    /// An empty final chunk
    pub fn end() -> Chunk {
        Chunk { data: Bytes::new(), last: true }
    }
    pub fn is_last(&self) -> bool {
        self.last
    }
    pub fn data(&self) -> &[u8] {
        &self.data[..]
    }
    pub fn bytes(&self) -> &Bytes {
        &self.data
    }
    pub fn into_bytes(self) -> Bytes {
        self.data
    }
    pub fn len(&self) -> usize {
        self.data.len()
    }
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Non-blocking source of body chunks
///
/// This is how a connection driver drains outbound bodies: it never blocks
/// the reactor thread and gets notified when more data arrives.
pub trait ChunkSource {
    /// Returns `Ready(Some(chunk))` for data, `Ready(None)` after the last
    /// chunk was taken, `NotReady` when nothing is queued yet and the
    /// cancellation cause as an error.
    fn poll_chunk(&mut self) -> Poll<Option<Chunk>, ErrorKind>;
}
