//! Connection Liveness
//!
//! Ping/pong health tracking for one gateway connection. The gateway sends
//! `ping { seq }` after a quiet interval and expects the matching
//! `pong { seq }` within a response window; enough consecutive misses mark
//! the connection dead and the gateway closes it.
//!
//! # Ping cycle
//!
//! 1. No traffic for `ping_interval` -> send `ping { seq }`
//! 2. Matching `pong { seq }` within `response_window` -> healthy, RTT sampled
//! 3. `max_missed_pongs` consecutive misses -> connection is dead
//!
//! Any inbound event counts as activity and defers the next ping; a busy
//! connection is never pinged.
//!
//! # Design Philosophy
//!
//! Each connection task owns its own [`LinkLiveness`] and drives it from a
//! timer tick in its event loop. There is no shared monitor and no lock;
//! the state machine is synchronous and the caller performs whatever IO a
//! verdict demands.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Liveness tuning knobs
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LivenessConfig {
    /// Quiet time before a ping goes out (default: 30 seconds)
    pub ping_interval: Duration,
    /// How long to wait for the matching pong (default: 10 seconds)
    pub response_window: Duration,
    /// Consecutive missed pongs before the connection is dead (default: 3)
    pub max_missed_pongs: u32,
    /// Whether liveness probing runs at all
    pub enabled: bool,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(30),
            response_window: Duration::from_secs(10),
            max_missed_pongs: 3,
            enabled: true,
        }
    }
}

impl LivenessConfig {
    /// Configuration with probing disabled
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }

    /// Set the ping interval
    #[must_use]
    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    /// Set the response window
    #[must_use]
    pub fn with_response_window(mut self, window: Duration) -> Self {
        self.response_window = window;
        self
    }

    /// Set the missed-pong threshold
    #[must_use]
    pub fn with_max_missed(mut self, max_missed: u32) -> Self {
        self.max_missed_pongs = max_missed;
        self
    }

    /// Configuration with timings shrunk for tests
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            ping_interval: Duration::from_millis(100),
            response_window: Duration::from_millis(50),
            max_missed_pongs: 2,
            enabled: true,
        }
    }

    /// How often the owning loop should call [`LinkLiveness::on_tick`]
    ///
    /// A quarter of the response window, floored at 10ms, so misses are
    /// noticed promptly without busy-polling.
    #[must_use]
    pub fn tick_interval(&self) -> Duration {
        (self.response_window / 4).max(Duration::from_millis(10))
    }
}

/// Health metrics for one link
#[derive(Clone, Debug)]
pub struct LinkHealth {
    /// Consecutive pongs that never arrived
    pub missed_pongs: u32,
    /// Round-trip time of the newest pong
    pub last_rtt: Option<Duration>,
    /// Smoothed round-trip time across all pongs
    pub avg_rtt: Option<Duration>,
    /// Fastest round trip seen so far
    pub min_rtt: Option<Duration>,
    /// Slowest round trip seen so far
    pub max_rtt: Option<Duration>,
    /// Lifetime count of pings sent
    pub pings_sent: u64,
    /// Lifetime count of pongs received
    pub pongs_received: u64,
    /// Most recent inbound traffic of any kind
    pub last_activity: Instant,
    /// Whether the link currently counts as alive
    pub healthy: bool,
}

impl Default for LinkHealth {
    fn default() -> Self {
        Self {
            missed_pongs: 0,
            last_rtt: None,
            avg_rtt: None,
            min_rtt: None,
            max_rtt: None,
            pings_sent: 0,
            pongs_received: 0,
            last_activity: Instant::now(),
            healthy: true,
        }
    }
}

impl LinkHealth {
    fn record_sample(&mut self, rtt: Duration) {
        self.last_rtt = Some(rtt);
        self.min_rtt = Some(self.min_rtt.map_or(rtt, |m| m.min(rtt)));
        self.max_rtt = Some(self.max_rtt.map_or(rtt, |m| m.max(rtt)));
        self.avg_rtt = Some(match self.avg_rtt {
            Some(avg) => smooth(avg, rtt),
            None => rtt,
        });
    }
}

/// Exponential moving average with a 0.2 weight on the newest sample
fn smooth(avg: Duration, sample: Duration) -> Duration {
    const WEIGHT: f64 = 0.2;
    let blended = WEIGHT * sample.as_nanos() as f64 + (1.0 - WEIGHT) * avg.as_nanos() as f64;
    Duration::from_nanos(blended as u64)
}

/// Verdict from one liveness tick
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LivenessTick {
    /// Nothing to do
    Idle,
    /// Send `ping { seq }` to the peer
    SendPing {
        /// Sequence number the pong must echo
        seq: u64,
    },
    /// The connection missed too many pongs and must be closed
    Dead {
        /// Consecutive misses at the time of death
        missed: u32,
    },
}

/// Liveness state machine for a single connection
///
/// Owned by the connection's event loop. Call [`record_activity`] for every
/// inbound event, [`record_pong`] for pongs, and [`on_tick`] from a timer
/// running at [`LivenessConfig::tick_interval`].
///
/// [`record_activity`]: Self::record_activity
/// [`record_pong`]: Self::record_pong
/// [`on_tick`]: Self::on_tick
#[derive(Debug)]
pub struct LinkLiveness {
    config: LivenessConfig,
    health: LinkHealth,
    /// Outstanding ping: sequence number and send time
    pending: Option<(u64, Instant)>,
    next_seq: u64,
}

impl LinkLiveness {
    /// Create the state machine for a fresh connection
    #[must_use]
    pub fn new(config: LivenessConfig) -> Self {
        Self {
            config,
            health: LinkHealth::default(),
            pending: None,
            next_seq: 1,
        }
    }

    /// Note inbound traffic, deferring the next ping
    pub fn record_activity(&mut self) {
        self.health.last_activity = Instant::now();
    }

    /// Process a pong from the peer
    ///
    /// Returns whether it matched the outstanding ping. A pong with the
    /// wrong sequence number is ignored, not fatal.
    pub fn record_pong(&mut self, seq: u64) -> bool {
        let Some((pending_seq, sent_at)) = self.pending else {
            return false;
        };
        if pending_seq != seq {
            return false;
        }

        let rtt = sent_at.elapsed();
        self.pending = None;
        self.health.pongs_received += 1;
        self.health.missed_pongs = 0;
        self.health.healthy = true;
        self.health.last_activity = Instant::now();
        self.health.record_sample(rtt);

        tracing::trace!(seq, rtt_ms = rtt.as_millis() as u64, "Pong received");
        true
    }

    /// Advance the state machine one tick
    pub fn on_tick(&mut self) -> LivenessTick {
        if !self.config.enabled {
            return LivenessTick::Idle;
        }

        // An outstanding ping past its window is a miss.
        if let Some((seq, sent_at)) = self.pending {
            if sent_at.elapsed() < self.config.response_window {
                return LivenessTick::Idle;
            }

            self.pending = None;
            self.health.missed_pongs += 1;
            tracing::debug!(
                seq,
                missed = self.health.missed_pongs,
                allowed = self.config.max_missed_pongs,
                "Pong overdue"
            );

            if self.health.missed_pongs >= self.config.max_missed_pongs {
                self.health.healthy = false;
                return LivenessTick::Dead {
                    missed: self.health.missed_pongs,
                };
            }
            // Fall through: the next ping goes out right away.
        } else if self.health.last_activity.elapsed() < self.config.ping_interval {
            return LivenessTick::Idle;
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        self.pending = Some((seq, Instant::now()));
        self.health.pings_sent += 1;
        LivenessTick::SendPing { seq }
    }

    /// Current health metrics
    #[must_use]
    pub fn health(&self) -> &LinkHealth {
        &self.health
    }

    /// Whether the connection is currently considered alive
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.health.healthy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sleep(duration: Duration) {
        std::thread::sleep(duration);
    }

    #[test]
    fn test_quiet_connection_gets_pinged() {
        let config = LivenessConfig::for_testing().with_ping_interval(Duration::from_millis(80));
        let interval = config.ping_interval;
        let mut liveness = LinkLiveness::new(config);

        assert_eq!(liveness.on_tick(), LivenessTick::Idle);

        sleep(interval + Duration::from_millis(10));
        assert!(matches!(liveness.on_tick(), LivenessTick::SendPing { seq: 1 }));
        assert_eq!(liveness.health().pings_sent, 1);
    }

    #[test]
    fn test_activity_defers_ping() {
        let config = LivenessConfig::for_testing();
        let interval = config.ping_interval;
        let mut liveness = LinkLiveness::new(config);

        sleep(interval / 2);
        liveness.record_activity();
        sleep(interval / 2 + Duration::from_millis(10));

        // Half the interval has passed since the last activity.
        assert_eq!(liveness.on_tick(), LivenessTick::Idle);
    }

    #[test]
    fn test_matching_pong_records_rtt() {
        let config = LivenessConfig::for_testing();
        let interval = config.ping_interval;
        let mut liveness = LinkLiveness::new(config);

        sleep(interval + Duration::from_millis(10));
        let LivenessTick::SendPing { seq } = liveness.on_tick() else {
            panic!("expected a ping");
        };

        sleep(Duration::from_millis(5));
        assert!(liveness.record_pong(seq));

        let health = liveness.health();
        assert_eq!(health.pongs_received, 1);
        assert_eq!(health.missed_pongs, 0);
        assert!(health.last_rtt.unwrap() >= Duration::from_millis(5));
        assert!(health.avg_rtt.is_some());
        assert!(health.healthy);
    }

    #[test]
    fn test_wrong_sequence_pong_ignored() {
        let config = LivenessConfig::for_testing();
        let interval = config.ping_interval;
        let mut liveness = LinkLiveness::new(config);

        sleep(interval + Duration::from_millis(10));
        let LivenessTick::SendPing { seq } = liveness.on_tick() else {
            panic!("expected a ping");
        };

        assert!(!liveness.record_pong(seq + 100));
        assert_eq!(liveness.health().pongs_received, 0);

        // The real pong still matches afterwards.
        assert!(liveness.record_pong(seq));
    }

    #[test]
    fn test_pong_without_pending_ping_ignored() {
        let mut liveness = LinkLiveness::new(LivenessConfig::for_testing());
        assert!(!liveness.record_pong(1));
    }

    #[test]
    fn test_missed_pongs_kill_connection() {
        let config = LivenessConfig::for_testing();
        let interval = config.ping_interval;
        let window = config.response_window;
        let max_missed = config.max_missed_pongs;
        let mut liveness = LinkLiveness::new(config);

        sleep(interval + Duration::from_millis(10));

        let mut verdict = liveness.on_tick();
        for round in 1..=max_missed {
            assert!(
                matches!(verdict, LivenessTick::SendPing { .. }),
                "round {round}: expected ping, got {verdict:?}"
            );
            sleep(window + Duration::from_millis(10));
            verdict = liveness.on_tick();
        }

        assert_eq!(verdict, LivenessTick::Dead { missed: max_missed });
        assert!(!liveness.is_healthy());
    }

    #[test]
    fn test_pong_resets_missed_count() {
        let config = LivenessConfig::for_testing();
        let interval = config.ping_interval;
        let window = config.response_window;
        let mut liveness = LinkLiveness::new(config);

        // Miss one pong.
        sleep(interval + Duration::from_millis(10));
        assert!(matches!(liveness.on_tick(), LivenessTick::SendPing { .. }));
        sleep(window + Duration::from_millis(10));

        // The miss is recorded and a fresh ping goes out immediately.
        let LivenessTick::SendPing { seq } = liveness.on_tick() else {
            panic!("expected a follow-up ping");
        };
        assert_eq!(liveness.health().missed_pongs, 1);

        // Answering it clears the strike.
        assert!(liveness.record_pong(seq));
        assert_eq!(liveness.health().missed_pongs, 0);
        assert!(liveness.is_healthy());
    }

    #[test]
    fn test_disabled_probing_stays_idle() {
        let mut liveness = LinkLiveness::new(LivenessConfig::disabled());
        sleep(Duration::from_millis(20));
        assert_eq!(liveness.on_tick(), LivenessTick::Idle);
        assert_eq!(liveness.health().pings_sent, 0);
    }

    #[test]
    fn test_rtt_average_tracks_latest_samples() {
        let mut health = LinkHealth::default();
        health.record_sample(Duration::from_millis(100));
        assert_eq!(health.avg_rtt, Some(Duration::from_millis(100)));

        health.record_sample(Duration::from_millis(200));
        let avg = health.avg_rtt.unwrap();
        assert!(avg > Duration::from_millis(100));
        assert!(avg < Duration::from_millis(200));
        assert_eq!(health.min_rtt, Some(Duration::from_millis(100)));
        assert_eq!(health.max_rtt, Some(Duration::from_millis(200)));
    }

    #[test]
    fn test_tick_interval_floor() {
        let config = LivenessConfig::default().with_response_window(Duration::from_millis(20));
        assert_eq!(config.tick_interval(), Duration::from_millis(10));

        let config = LivenessConfig::default();
        assert_eq!(config.tick_interval(), Duration::from_millis(2500));
    }
}
