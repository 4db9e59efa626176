//! Ping emission and pong-liveness watchdog for one open connection.
//!
//! Two timers share a single interval:
//!
//! - the **ping** timer fires immediately on open and then every interval;
//! - the **pong check** timer fires one interval after open and then every
//!   interval. A connection is stale once a pong has been seen and the last
//!   one is more than two intervals old. Before the first pong nothing is
//!   ever stale.
//!
//! A [`Keepalive`] lives exactly as long as the session that created it, so
//! neither timer can fire against a closed socket.

use std::time::Duration;

use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at};

/// What the session should do after a timer fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepaliveTick {
    /// Send a ping frame and call [`Keepalive::record_ping`].
    SendPing,
    /// Check [`Keepalive::is_stale`].
    CheckPong,
}

/// Keepalive timers and ping/pong bookkeeping.
#[derive(Debug)]
pub struct Keepalive {
    interval: Duration,
    ping: Interval,
    pong_check: Interval,
    last_ping: Option<Instant>,
    last_pong: Option<Instant>,
}

impl Keepalive {
    /// Start both timers now.
    pub fn new(interval: Duration) -> Self {
        let now = Instant::now();

        let mut ping = interval_at(now, interval);
        ping.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut pong_check = interval_at(now + interval, interval);
        pong_check.set_missed_tick_behavior(MissedTickBehavior::Skip);

        Self {
            interval,
            ping,
            pong_check,
            last_ping: None,
            last_pong: None,
        }
    }

    /// Wait for the next timer to fire.
    ///
    /// Cancel-safe: dropping the future does not lose a tick.
    pub async fn tick(&mut self) -> KeepaliveTick {
        tokio::select! {
            _ = self.ping.tick() => KeepaliveTick::SendPing,
            _ = self.pong_check.tick() => KeepaliveTick::CheckPong,
        }
    }

    /// Record that a ping was written.
    pub fn record_ping(&mut self, now: Instant) {
        if let Some(last) = self.last_ping {
            tracing::trace!(since_last_ms = (now - last).as_millis() as u64, "ping");
        }
        self.last_ping = Some(now);
    }

    /// Record that a pong was received.
    pub fn record_pong(&mut self, now: Instant) {
        if let Some(last) = self.last_pong {
            tracing::trace!(since_last_ms = (now - last).as_millis() as u64, "pong");
        }
        self.last_pong = Some(now);
    }

    /// Whether the last pong is older than twice the interval.
    pub fn is_stale(&self, now: Instant) -> bool {
        match self.last_pong {
            Some(last) => now.saturating_duration_since(last) > self.interval * 2,
            None => false,
        }
    }

    /// Time since the last pong, if one was received.
    pub fn since_last_pong(&self, now: Instant) -> Option<Duration> {
        self.last_pong.map(|last| now.saturating_duration_since(last))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INTERVAL: Duration = Duration::from_millis(2_500);

    #[tokio::test(start_paused = true)]
    async fn ping_fires_immediately_then_checks_follow() {
        let start = Instant::now();
        let mut ka = Keepalive::new(INTERVAL);

        assert_eq!(ka.tick().await, KeepaliveTick::SendPing);
        assert_eq!(Instant::now(), start);

        // At one interval both timers are due; each is reported once.
        let mut seen = vec![ka.tick().await, ka.tick().await];
        seen.sort_by_key(|t| *t == KeepaliveTick::CheckPong);
        assert_eq!(seen, vec![KeepaliveTick::SendPing, KeepaliveTick::CheckPong]);
        assert_eq!(Instant::now(), start + INTERVAL);
    }

    #[tokio::test(start_paused = true)]
    async fn never_stale_before_first_pong() {
        let ka = Keepalive::new(INTERVAL);
        tokio::time::advance(INTERVAL * 10).await;
        assert!(!ka.is_stale(Instant::now()));
        assert!(ka.since_last_pong(Instant::now()).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn stale_after_two_intervals_without_pong() {
        let mut ka = Keepalive::new(INTERVAL);
        ka.record_pong(Instant::now());

        tokio::time::advance(INTERVAL * 2).await;
        assert!(!ka.is_stale(Instant::now()));

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(ka.is_stale(Instant::now()));

        ka.record_pong(Instant::now());
        assert!(!ka.is_stale(Instant::now()));
    }

    #[tokio::test(start_paused = true)]
    async fn records_last_ping() {
        let mut ka = Keepalive::new(INTERVAL);
        assert!(ka.last_ping.is_none());
        let now = Instant::now();
        ka.record_ping(now);
        assert_eq!(ka.last_ping, Some(now));
    }
}
