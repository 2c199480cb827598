//! Streaming body carrier between the network thread and handler threads
//!
//! The producer never blocks. Consumers block in `pull()` until a chunk
//! arrives, the body ends or the buffer is cancelled. The network side uses
//! the non-blocking `ChunkSource` implementation instead.
use std::collections::VecDeque;
use std::fmt;
use std::mem;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use futures::Async;
use futures::task::AtomicTask;

use crate::chunk::{Chunk, ChunkSource};
use crate::error::ErrorKind;


/// Outcome of pulling from a `StreamingMessageBuffer`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pull {
    /// Next chunk of the body
    Chunk(Chunk),
    /// The last chunk has already been taken
    End,
    /// The body will never complete
    Cancelled(ErrorKind),
}

impl Pull {
    /// Returns the chunk if any
    pub fn into_chunk(self) -> Option<Chunk> {
        match self {
            Pull::Chunk(chunk) => Some(chunk),
            _ => None,
        }
    }
}

struct State {
    primary: VecDeque<Chunk>,
    replay: Vec<Chunk>,
    end_of_message: bool,
    consumed_once: bool,
    queued_bytes: usize,
    cancelled: Option<ErrorKind>,
    listener: Option<Arc<AtomicTask>>,
}

struct Shared {
    state: Mutex<State>,
    available: Condvar,
}

/// Ordered, unbounded sequence of body chunks with an end marker
///
/// Cloning gives another handle to the same buffer.
#[derive(Clone)]
pub struct StreamingMessageBuffer {
    shared: Arc<Shared>,
}

impl State {
    fn take_front(&mut self) -> Option<Chunk> {
        let chunk = self.primary.pop_front()?;
        self.queued_bytes -= chunk.len();
        if chunk.is_last() {
            self.consumed_once = true;
        }
        Some(chunk)
    }
    fn try_pull(&mut self) -> Option<Pull> {
        if let Some(cause) = self.cancelled {
            return Some(Pull::Cancelled(cause));
        }
        if let Some(chunk) = self.take_front() {
            return Some(Pull::Chunk(chunk));
        }
        if self.end_of_message {
            self.consumed_once = true;
            return Some(Pull::End);
        }
        None
    }
}

impl StreamingMessageBuffer {
    /// Creates an empty buffer
    pub fn new() -> StreamingMessageBuffer {
        StreamingMessageBuffer {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    primary: VecDeque::new(),
                    replay: Vec::new(),
                    end_of_message: false,
                    consumed_once: false,
                    queued_bytes: 0,
                    cancelled: None,
                    listener: None,
                }),
                available: Condvar::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<State> {
        // every update happens under the lock, so a poisoned state is whole
        self.shared.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Task notified when anything is pushed or the buffer is cancelled
    ///
    /// This is how a connection driver learns that outbound data has been
    /// produced by a handler thread.
    pub(crate) fn set_listener(&self, task: Arc<AtomicTask>) {
        self.lock().listener = Some(task);
    }

    fn wake(&self, listener: Option<Arc<AtomicTask>>) {
        self.shared.available.notify_all();
        if let Some(task) = listener {
            task.notify();
        }
    }

    /// Appends a chunk, never blocks
    ///
    /// After the body has been consumed once, chunks are collected in the
    /// replay sequence and become visible all at once when the last chunk
    /// of the new pass arrives.
    pub fn push(&self, chunk: Chunk) -> Result<(), ErrorKind> {
        let listener = {
            let mut state = self.lock();
            if let Some(cause) = state.cancelled {
                return Err(cause);
            }
            if state.consumed_once {
                state.end_of_message = false;
                let last = chunk.is_last();
                state.replay.push(chunk);
                if !last {
                    return Ok(());
                }
                let replay = mem::replace(&mut state.replay, Vec::new());
                for chunk in replay {
                    state.queued_bytes += chunk.len();
                    state.primary.push_back(chunk);
                }
                state.end_of_message = true;
                state.consumed_once = false;
            } else {
                if state.end_of_message {
                    return Err(ErrorKind::ProtocolViolation);
                }
                if chunk.is_last() {
                    state.end_of_message = true;
                }
                state.queued_bytes += chunk.len();
                state.primary.push_back(chunk);
            }
            state.listener.clone()
        };
        self.wake(listener);
        Ok(())
    }

    /// Pushes an empty last chunk
    pub fn finish(&self) -> Result<(), ErrorKind> {
        self.push(Chunk::end())
    }

    /// Takes the next chunk, blocking until one is available
    ///
    /// Returns `Pull::End` without blocking when the last chunk was already
    /// taken.
    pub fn pull(&self) -> Pull {
        let mut state = self.lock();
        loop {
            if let Some(result) = state.try_pull() {
                if let Pull::Cancelled(cause) = result {
                    warn!("Body stream is cancelled: {}", cause);
                }
                return result;
            }
            state = self.shared.available.wait(state)
                .unwrap_or_else(|e| e.into_inner());
        }
    }

    /// Same as `pull` but gives up after `timeout`
    pub fn pull_timeout(&self, timeout: Duration) -> Option<Pull> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        loop {
            if let Some(result) = state.try_pull() {
                if let Pull::Cancelled(cause) = result {
                    warn!("Body stream is cancelled: {}", cause);
                }
                return Some(result);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            state = self.shared.available.wait_timeout(state, deadline - now)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|e| e.into_inner().0);
        }
    }

    /// Takes the next chunk if it's immediately available
    pub fn try_pull(&self) -> Option<Pull> {
        self.lock().try_pull()
    }

    /// Pulls every chunk up to and including the last one
    pub fn drain_all(&self) -> Result<Vec<Chunk>, ErrorKind> {
        let mut chunks = Vec::new();
        loop {
            match self.pull() {
                Pull::Chunk(chunk) => chunks.push(chunk),
                Pull::End => return Ok(chunks),
                Pull::Cancelled(cause) => return Err(cause),
            }
        }
    }

    /// Waits for the end of the body and returns the number of bytes queued
    ///
    /// Nothing is removed from the buffer.
    pub fn total_length(&self) -> Result<usize, ErrorKind> {
        let mut state = self.lock();
        loop {
            if let Some(cause) = state.cancelled {
                return Err(cause);
            }
            if state.end_of_message {
                return Ok(state.queued_bytes);
            }
            state = self.shared.available.wait(state)
                .unwrap_or_else(|e| e.into_inner());
        }
    }

    /// Copies the queued chunks without consuming them
    pub fn snapshot(&self) -> Vec<Chunk> {
        self.lock().primary.iter().cloned().collect()
    }

    /// No chunks are queued in the primary sequence
    pub fn is_empty(&self) -> bool {
        self.lock().primary.is_empty()
    }

    /// The last chunk of the current pass has been pushed
    pub fn is_end_of_message(&self) -> bool {
        self.lock().end_of_message
    }

    /// The current pass has been drained by a consumer
    pub fn is_consumed_once(&self) -> bool {
        self.lock().consumed_once
    }

    /// Bytes queued in the primary sequence
    pub fn queued_bytes(&self) -> usize {
        self.lock().queued_bytes
    }

    /// Cancels the buffer, waking every blocked consumer
    ///
    /// Returns false if the buffer was already cancelled, the first cause
    /// is kept.
    pub fn cancel(&self, cause: ErrorKind) -> bool {
        let listener = {
            let mut state = self.lock();
            if state.cancelled.is_some() {
                return false;
            }
            state.cancelled = Some(cause);
            state.listener.clone()
        };
        self.wake(listener);
        true
    }

    pub fn cancelled(&self) -> Option<ErrorKind> {
        self.lock().cancelled
    }
}

impl ChunkSource for StreamingMessageBuffer {
    fn poll_chunk(&mut self) -> Result<Async<Option<Chunk>>, ErrorKind> {
        match self.try_pull() {
            Some(Pull::Chunk(chunk)) => Ok(Async::Ready(Some(chunk))),
            Some(Pull::End) => Ok(Async::Ready(None)),
            Some(Pull::Cancelled(cause)) => Err(cause),
            None => Ok(Async::NotReady),
        }
    }
}

impl Default for StreamingMessageBuffer {
    fn default() -> StreamingMessageBuffer {
        StreamingMessageBuffer::new()
    }
}

impl fmt::Debug for StreamingMessageBuffer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("StreamingMessageBuffer")
            .field("chunks", &state.primary.len())
            .field("bytes", &state.queued_bytes)
            .field("end_of_message", &state.end_of_message)
            .field("consumed_once", &state.consumed_once)
            .field("cancelled", &state.cancelled)
            .finish()
    }
}

#[cfg(test)]
mod test {
    use std::thread;
    use std::time::Duration;

    use futures::Async;

    use crate::chunk::{Chunk, ChunkSource};
    use crate::error::ErrorKind;
    use super::{StreamingMessageBuffer, Pull};

    fn data(chunks: Vec<Chunk>) -> Vec<u8> {
        chunks.iter().flat_map(|c| c.data().to_vec()).collect()
    }

    #[test]
    fn fifo() {
        let buf = StreamingMessageBuffer::new();
        buf.push(Chunk::new("A")).unwrap();
        buf.push(Chunk::new("B")).unwrap();
        buf.push(Chunk::last("C")).unwrap();
        assert_eq!(buf.pull(), Pull::Chunk(Chunk::new("A")));
        assert_eq!(buf.pull(), Pull::Chunk(Chunk::new("B")));
        assert_eq!(buf.pull(), Pull::Chunk(Chunk::last("C")));
        assert_eq!(buf.pull(), Pull::End);
        assert_eq!(buf.pull(), Pull::End);
    }

    #[test]
    fn end_on_empty_buffer() {
        let buf = StreamingMessageBuffer::new();
        buf.finish().unwrap();
        assert_eq!(buf.pull(), Pull::Chunk(Chunk::end()));
        assert!(buf.is_empty());
        assert_eq!(buf.pull_timeout(Duration::from_millis(1)),
                   Some(Pull::End));
    }

    #[test]
    fn push_after_end() {
        let buf = StreamingMessageBuffer::new();
        buf.push(Chunk::last("x")).unwrap();
        assert_eq!(buf.push(Chunk::new("y")),
                   Err(ErrorKind::ProtocolViolation));
    }

    #[test]
    fn total_length_is_idempotent() {
        let buf = StreamingMessageBuffer::new();
        buf.push(Chunk::new("hello")).unwrap();
        buf.push(Chunk::new(", ")).unwrap();
        buf.push(Chunk::last("world")).unwrap();
        assert_eq!(buf.total_length(), Ok(12));
        assert_eq!(buf.total_length(), Ok(12));
        assert_eq!(buf.snapshot().len(), 3);
        assert_eq!(data(buf.drain_all().unwrap()), b"hello, world");
    }

    #[test]
    fn total_length_waits_for_end() {
        let buf = StreamingMessageBuffer::new();
        buf.push(Chunk::new("abc")).unwrap();
        let producer = buf.clone();
        let thread = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            producer.push(Chunk::last("de")).unwrap();
        });
        assert_eq!(buf.total_length(), Ok(5));
        thread.join().unwrap();
    }

    #[test]
    fn replay_after_consumption() {
        let buf = StreamingMessageBuffer::new();
        buf.push(Chunk::new("x")).unwrap();
        buf.push(Chunk::last("y")).unwrap();
        assert_eq!(data(buf.drain_all().unwrap()), b"xy");
        assert!(buf.is_consumed_once());

        buf.push(Chunk::new("A")).unwrap();
        buf.push(Chunk::new("B")).unwrap();
        // nothing is visible until the pass is complete
        assert!(buf.is_empty());
        assert!(!buf.is_end_of_message());
        assert_eq!(buf.try_pull(), None);
        buf.push(Chunk::last("C")).unwrap();
        assert!(buf.is_end_of_message());
        assert_eq!(buf.total_length(), Ok(3));
        assert_eq!(data(buf.drain_all().unwrap()), b"ABC");
    }

    #[test]
    fn replay_wakes_blocked_consumer() {
        let buf = StreamingMessageBuffer::new();
        buf.push(Chunk::last("first")).unwrap();
        buf.drain_all().unwrap();
        buf.push(Chunk::new("second ")).unwrap();
        let consumer = buf.clone();
        let thread = thread::spawn(move || consumer.drain_all());
        thread::sleep(Duration::from_millis(10));
        buf.push(Chunk::last("pass")).unwrap();
        assert_eq!(data(thread.join().unwrap().unwrap()), b"second pass");
    }

    #[test]
    fn cancel_unblocks_consumer() {
        let buf = StreamingMessageBuffer::new();
        let consumer = buf.clone();
        let thread = thread::spawn(move || consumer.pull());
        thread::sleep(Duration::from_millis(20));
        assert!(buf.cancel(ErrorKind::IdleTimeout));
        assert!(!buf.cancel(ErrorKind::ConnectionClosed));
        assert_eq!(thread.join().unwrap(),
                   Pull::Cancelled(ErrorKind::IdleTimeout));
        assert_eq!(buf.push(Chunk::new("late")),
                   Err(ErrorKind::IdleTimeout));
        assert_eq!(buf.total_length(), Err(ErrorKind::IdleTimeout));
    }

    #[test]
    fn application_cancel_interrupts_pull() {
        let buf = StreamingMessageBuffer::new();
        buf.push(Chunk::new("queued")).unwrap();
        assert_eq!(buf.pull(), Pull::Chunk(Chunk::new("queued")));
        let consumer = buf.clone();
        let thread = thread::spawn(move || consumer.drain_all());
        thread::sleep(Duration::from_millis(20));
        assert!(buf.cancel(ErrorKind::Interrupted));
        assert_eq!(thread.join().unwrap(), Err(ErrorKind::Interrupted));
        assert_eq!(buf.pull_timeout(Duration::from_millis(1)),
                   Some(Pull::Cancelled(ErrorKind::Interrupted)));
    }

    #[test]
    fn concurrent_ordering() {
        let buf = StreamingMessageBuffer::new();
        let producer = buf.clone();
        let thread = thread::spawn(move || {
            for i in 0..999u32 {
                producer.push(Chunk::new(i.to_string())).unwrap();
            }
            producer.push(Chunk::last("999")).unwrap();
        });
        let mut expected = 0u32;
        loop {
            match buf.pull() {
                Pull::Chunk(chunk) => {
                    assert_eq!(chunk.data(), expected.to_string().as_bytes());
                    expected += 1;
                }
                Pull::End => break,
                Pull::Cancelled(e) => panic!("cancelled: {}", e),
            }
        }
        assert_eq!(expected, 1000);
        thread.join().unwrap();
    }

    #[test]
    fn poll_chunk() {
        let mut buf = StreamingMessageBuffer::new();
        assert_eq!(buf.poll_chunk(), Ok(Async::NotReady));
        buf.push(Chunk::last("x")).unwrap();
        assert_eq!(buf.poll_chunk(), Ok(Async::Ready(Some(Chunk::last("x")))));
        assert_eq!(buf.poll_chunk(), Ok(Async::Ready(None)));
        buf.cancel(ErrorKind::ConnectionClosed);
        assert_eq!(buf.poll_chunk(), Err(ErrorKind::ConnectionClosed));
    }
}
