//! Heartbeat scheduling and liveness detection.
//!
//! On activation the manager derives its timers from the negotiated
//! timeout: heartbeats go out every third of the window, and silence for a
//! full window is fatal. Heartbeats are elided when real traffic is already
//! queued: flushing data signals liveness just as well.
//!
//! The clock is injected on every tick so schedules are testable without
//! sleeping.

use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::channel::Channel;
use crate::error::{Result, TransportError};

/// What a scheduler tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PingEvent {
    /// Nothing was due.
    Idle,
    /// A heartbeat was sent (or elided in favor of queued data).
    Sent,
    /// Nothing arrived for a full timeout window; the caller must treat
    /// the channel as dead and close it.
    LivenessExpired,
}

/// Drives outbound heartbeats and inbound-silence detection for one
/// channel.
#[derive(Debug)]
pub struct PingManager {
    send_interval: Duration,
    receive_timeout: Duration,
    next_send: Instant,
    receive_deadline: Instant,
}

impl PingManager {
    pub fn new(negotiated_timeout: Duration, now: Instant) -> Self {
        let send_interval = negotiated_timeout / 3;
        PingManager {
            send_interval,
            receive_timeout: negotiated_timeout,
            next_send: now + send_interval,
            receive_deadline: now + negotiated_timeout,
        }
    }

    pub fn send_interval(&self) -> Duration {
        self.send_interval
    }

    /// Run one scheduler tick against the channel.
    pub fn tick(&mut self, now: Instant, channel: &mut Channel) -> Result<PingEvent> {
        match self.evaluate_with(now, || channel.take_received()) {
            PingEvent::LivenessExpired => {
                warn!("liveness timeout: no traffic within the negotiated window");
                Err(TransportError::LivenessTimeout)
            }
            PingEvent::Sent => {
                channel.ping()?;
                Ok(PingEvent::Sent)
            }
            PingEvent::Idle => Ok(PingEvent::Idle),
        }
    }

    /// Pure scheduling decision; `received` reports whether any message or
    /// heartbeat arrived since the previous deadline check.
    pub fn evaluate(&mut self, now: Instant, received: bool) -> PingEvent {
        self.evaluate_with(now, || received)
    }

    /// The received flag is consulted (and thereby consumed) only when
    /// the liveness deadline has actually arrived, so traffic observed
    /// early in a window still counts at its end.
    fn evaluate_with(&mut self, now: Instant, received: impl FnOnce() -> bool) -> PingEvent {
        if now >= self.receive_deadline {
            if received() {
                self.receive_deadline = now + self.receive_timeout;
            } else {
                return PingEvent::LivenessExpired;
            }
        }
        if now >= self.next_send {
            self.next_send = now + self.send_interval;
            debug!("heartbeat due");
            return PingEvent::Sent;
        }
        PingEvent::Idle
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(30);

    #[test]
    fn send_interval_is_a_third_of_the_window() {
        let now = Instant::now();
        let mgr = PingManager::new(TIMEOUT, now);
        assert_eq!(mgr.send_interval(), Duration::from_secs(10));
    }

    #[test]
    fn heartbeats_fire_on_schedule() {
        let start = Instant::now();
        let mut mgr = PingManager::new(TIMEOUT, start);
        assert_eq!(mgr.evaluate(start + Duration::from_secs(1), false), PingEvent::Idle);
        assert_eq!(
            mgr.evaluate(start + Duration::from_secs(10), false),
            PingEvent::Sent
        );
        // not due again until another interval passes
        assert_eq!(
            mgr.evaluate(start + Duration::from_secs(11), false),
            PingEvent::Idle
        );
        assert_eq!(
            mgr.evaluate(start + Duration::from_secs(21), false),
            PingEvent::Sent
        );
    }

    #[test]
    fn silence_for_a_full_window_expires() {
        let start = Instant::now();
        let mut mgr = PingManager::new(TIMEOUT, start);
        // traffic arrived before the first deadline: window resets
        assert_eq!(
            mgr.evaluate(start + TIMEOUT, true),
            PingEvent::Sent // a heartbeat is also overdue at this point
        );
        // a second full window with nothing received is fatal
        assert_eq!(
            mgr.evaluate(start + TIMEOUT + TIMEOUT, false),
            PingEvent::LivenessExpired
        );
    }

    #[test]
    fn received_traffic_keeps_resetting_the_deadline() {
        let start = Instant::now();
        let mut mgr = PingManager::new(TIMEOUT, start);
        let mut now = start;
        for _ in 0..5 {
            now += TIMEOUT;
            assert_ne!(mgr.evaluate(now, true), PingEvent::LivenessExpired);
        }
    }
}
