//! Heartbeat failure detector.
//!
//! Pure state machine; the connection task drives it from a timer and feeds
//! it incoming pongs.

use std::collections::VecDeque;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::envelope::{Ping, Pong};

/// Number of most recent pings kept, and the number of consecutive
/// unanswered pings after which the peer is declared dead.
pub const PING_HISTORY: usize = 4;

/// One emitted ping and, once answered, its conclusion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PingRecord {
    pub id: u64,
    /// Local send time, ms since the Unix epoch.
    pub created: u64,
    /// Remote timestamp carried by the pong.
    pub returned: Option<u64>,
    /// Local time the pong arrived.
    pub finished: Option<u64>,
}

impl PingRecord {
    /// No pong has concluded this ping yet.
    pub fn is_unanswered(&self) -> bool {
        self.finished.is_none()
    }

    /// Local send-to-arrival time, once answered.
    pub fn round_trip(&self) -> Option<Duration> {
        self.finished
            .map(|finished| Duration::from_millis(finished.saturating_sub(self.created)))
    }
}

/// Result of one timer tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// Send this ping.
    Send(Ping),
    /// The last [`PING_HISTORY`] pings, `ping` included, all went
    /// unanswered. `ping` is still sent before the connection is torn down.
    PeerDead { ping: Ping, unanswered: usize },
}

/// Ping producer and pong consumer for one connection.
///
/// Keeps the last [`PING_HISTORY`] pings. A tick that leaves the whole
/// history unanswered declares the peer dead.
#[derive(Debug, Default)]
pub struct LivenessMonitor {
    interval: Duration,
    history: VecDeque<PingRecord>,
    next_id: u64,
}

impl LivenessMonitor {
    /// Monitor ticking every `interval`; zero means disabled.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            history: VecDeque::with_capacity(PING_HISTORY),
            next_id: 0,
        }
    }

    /// Current interval; zero when disabled.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// True while the interval is non-zero.
    pub fn is_enabled(&self) -> bool {
        !self.interval.is_zero()
    }

    /// Change the interval. Zero disables the monitor and forgets history.
    pub fn set_interval(&mut self, interval: Duration) {
        self.interval = interval;
        if interval.is_zero() {
            self.history.clear();
        }
    }

    /// Emit the next ping, record it, trim the history, then check the
    /// threshold.
    pub fn tick(&mut self, now_ms: u64) -> Tick {
        self.next_id += 1;
        let ping = Ping {
            id: self.next_id,
            created: now_ms,
        };
        self.history.push_back(PingRecord {
            id: ping.id,
            created: now_ms,
            returned: None,
            finished: None,
        });
        while self.history.len() > PING_HISTORY {
            self.history.pop_front();
        }

        let unanswered = self.history.iter().filter(|p| p.is_unanswered()).count();
        if self.history.len() >= PING_HISTORY && unanswered == self.history.len() {
            Tick::PeerDead { ping, unanswered }
        } else {
            Tick::Send(ping)
        }
    }

    /// Conclude the ping matching `pong.id`. Unknown or already concluded
    /// ids are ignored; returns whether a ping was concluded.
    pub fn conclude(&mut self, pong: &Pong, now_ms: u64) -> bool {
        match self
            .history
            .iter_mut()
            .find(|p| p.id == pong.id && p.is_unanswered())
        {
            Some(record) => {
                record.returned = Some(pong.returned);
                record.finished = Some(now_ms);
                true
            }
            None => false,
        }
    }

    /// Recent pings, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &PingRecord> {
        self.history.iter()
    }
}

/// Wall clock in milliseconds since the Unix epoch.
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
