use std::io;
use std::time::Instant;

use futures::{Async, Future};
use tokio_core::reactor::{Handle, Timeout};


/// Reactor timer that follows the deadline of an `IdleTimeoutWatchdog`
///
/// The watchdog itself knows nothing about the event loop, this keeps one
/// `Timeout` registered for its current deadline so the connection task is
/// woken up when the deadline passes.
pub struct IdleTimer {
    handle: Handle,
    timeout: Option<(Timeout, Instant)>,
}

impl IdleTimer {
    pub fn new(handle: &Handle) -> IdleTimer {
        IdleTimer {
            handle: handle.clone(),
            timeout: None,
        }
    }
    /// Registers the current task for `deadline`
    ///
    /// Returns `true` if the deadline has already passed, so the caller
    /// must check the watchdog again instead of going to sleep.
    pub fn poll_deadline(&mut self, deadline: Option<Instant>)
        -> io::Result<bool>
    {
        let deadline = match deadline {
            Some(deadline) => deadline,
            None => {
                self.timeout = None;
                return Ok(false);
            }
        };
        match self.timeout {
            Some((ref mut timeout, ref mut at)) => {
                if *at != deadline {
                    timeout.reset(deadline);
                    *at = deadline;
                }
            }
            None => {
                let timeout = Timeout::new_at(deadline, &self.handle)?;
                self.timeout = Some((timeout, deadline));
            }
        }
        match self.timeout {
            Some((ref mut timeout, _)) => match timeout.poll()? {
                Async::Ready(()) => Ok(true),
                Async::NotReady => Ok(false),
            },
            None => Ok(false),
        }
    }
}
