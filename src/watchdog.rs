use std::time::{Duration, Instant};


/// State of the `IdleTimeoutWatchdog`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogState {
    Disarmed,
    Armed,
    Fired,
}

/// Per-connection idle timer, independent of any reactor
///
/// The owner feeds it the current time: `record_activity` on every read or
/// write and `poll_expired` whenever its reactor timer wakes up at
/// `deadline()`. Fires at most once per arming.
#[derive(Debug, Clone)]
pub struct IdleTimeoutWatchdog {
    timeout: Option<Duration>,
    last_activity: Instant,
    state: WatchdogState,
}

impl IdleTimeoutWatchdog {
    /// A zero timeout disables the watchdog, it never arms
    pub fn new(timeout: Option<Duration>, now: Instant)
        -> IdleTimeoutWatchdog
    {
        IdleTimeoutWatchdog {
            timeout: timeout.filter(|t| *t > Duration::new(0, 0)),
            last_activity: now,
            state: WatchdogState::Disarmed,
        }
    }
    pub fn state(&self) -> WatchdogState {
        self.state
    }
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
    pub fn is_enabled(&self) -> bool {
        self.timeout.is_some()
    }
    /// Starts counting from `now`
    ///
    /// Also used to rearm after the watchdog has fired or was disarmed.
    pub fn arm(&mut self, now: Instant) {
        if self.timeout.is_some() {
            self.last_activity = now;
            self.state = WatchdogState::Armed;
        }
    }
    /// Resets the idle timestamp, doesn't change the state
    pub fn record_activity(&mut self, now: Instant) {
        if now > self.last_activity {
            self.last_activity = now;
        }
    }
    /// Time at which the watchdog fires unless more activity is recorded
    pub fn deadline(&self) -> Option<Instant> {
        match (self.state, self.timeout) {
            (WatchdogState::Armed, Some(timeout)) => {
                Some(self.last_activity + timeout)
            }
            _ => None,
        }
    }
    /// Moves to `Fired` and returns true if the connection has been idle
    /// for at least the timeout
    pub fn poll_expired(&mut self, now: Instant) -> bool {
        match self.deadline() {
            Some(deadline) if now >= deadline => {
                self.state = WatchdogState::Fired;
                true
            }
            _ => false,
        }
    }
    pub fn disarm(&mut self) {
        self.state = WatchdogState::Disarmed;
    }
}

#[cfg(test)]
mod test {
    use std::time::{Duration, Instant};
    use super::{IdleTimeoutWatchdog, WatchdogState};

    fn ms(x: u64) -> Duration {
        Duration::from_millis(x)
    }

    #[test]
    fn fires_once() {
        let start = Instant::now();
        let mut dog = IdleTimeoutWatchdog::new(Some(ms(100)), start);
        assert_eq!(dog.state(), WatchdogState::Disarmed);
        assert!(!dog.poll_expired(start + ms(500)));
        dog.arm(start);
        assert_eq!(dog.deadline(), Some(start + ms(100)));
        assert!(!dog.poll_expired(start + ms(99)));
        assert!(dog.poll_expired(start + ms(100)));
        assert_eq!(dog.state(), WatchdogState::Fired);
        assert!(!dog.poll_expired(start + ms(300)));
        assert_eq!(dog.deadline(), None);
    }

    #[test]
    fn activity_postpones() {
        let start = Instant::now();
        let mut dog = IdleTimeoutWatchdog::new(Some(ms(100)), start);
        dog.arm(start);
        dog.record_activity(start + ms(80));
        assert!(!dog.poll_expired(start + ms(150)));
        assert_eq!(dog.state(), WatchdogState::Armed);
        assert!(dog.poll_expired(start + ms(180)));
    }

    #[test]
    fn rearm_after_fire() {
        let start = Instant::now();
        let mut dog = IdleTimeoutWatchdog::new(Some(ms(10)), start);
        dog.arm(start);
        assert!(dog.poll_expired(start + ms(10)));
        dog.arm(start + ms(20));
        assert_eq!(dog.state(), WatchdogState::Armed);
        assert!(dog.poll_expired(start + ms(30)));
        dog.disarm();
        assert_eq!(dog.deadline(), None);
    }

    #[test]
    fn zero_disables() {
        let start = Instant::now();
        let mut dog = IdleTimeoutWatchdog::new(Some(ms(0)), start);
        dog.arm(start);
        assert!(!dog.is_enabled());
        assert_eq!(dog.state(), WatchdogState::Disarmed);
        assert!(!dog.poll_expired(start + ms(1000)));
    }
}
