//! Backoff schedule for a client that lost its host.
//!
//! Nothing here sleeps. The session arms an attempt with
//! [`ReconnectState::schedule`] and checks [`ReconnectState::due`] on every
//! tick, so the owning thread keeps draining events while it waits.

use std::time::{Duration, Instant};

use rand::Rng;

/// Backoff parameters. The delay before attempt `n` (from 0) is
/// `initial_delay * backoff_multiplier^n`, capped at `max_delay`, then
/// scaled by a random factor in `1 ± jitter`.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    pub initial_delay: Duration,
    pub backoff_multiplier: f64,
    pub max_delay: Duration,
    /// Attempts before the client gives up and stays disconnected.
    pub max_attempts: u32,
    /// Fraction in `0.0..=1.0`. Zero disables jitter.
    pub jitter: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_secs(30),
            max_attempts: 20,
            jitter: 0.25,
        }
    }
}

impl ReconnectConfig {
    /// Delay before attempt `attempt`, without jitter.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(secs)
    }

    fn jittered(&self, delay: Duration) -> Duration {
        let spread = self.jitter.clamp(0.0, 1.0);
        if spread == 0.0 {
            return delay;
        }
        let factor = rand::rng().random_range((1.0 - spread)..=(1.0 + spread));
        delay.mul_f64(factor).min(self.max_delay)
    }
}

/// Attempt counter plus the instant the next attempt is armed for.
#[derive(Debug)]
pub struct ReconnectState {
    config: ReconnectConfig,
    attempts: u32,
    armed_at: Option<Instant>,
}

impl ReconnectState {
    pub fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            attempts: 0,
            armed_at: None,
        }
    }

    /// Arm the next attempt relative to `now`. Returns `false`, leaving
    /// nothing armed, once `max_attempts` have been used.
    pub fn schedule(&mut self, now: Instant) -> bool {
        if self.attempts >= self.config.max_attempts {
            self.armed_at = None;
            tracing::warn!(attempts = self.attempts, "Giving up on reconnecting to host");
            return false;
        }
        let delay = self.config.jittered(self.config.base_delay(self.attempts));
        self.attempts += 1;
        self.armed_at = Some(now + delay);
        tracing::info!(attempt = self.attempts, ?delay, "Reconnect scheduled");
        true
    }

    /// True once the armed instant has passed. Firing disarms it.
    pub fn due(&mut self, now: Instant) -> bool {
        let fired = self.armed_at.is_some_and(|at| now >= at);
        if fired {
            self.armed_at = None;
        }
        fired
    }

    pub fn is_pending(&self) -> bool {
        self.armed_at.is_some()
    }

    /// Forget past attempts after the host answered.
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.armed_at = None;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn steady() -> ReconnectConfig {
        ReconnectConfig {
            jitter: 0.0,
            ..Default::default()
        }
    }

    #[test]
    fn test_delay_doubles_until_cap() {
        let config = steady();
        let delays: Vec<u64> = (0..7).map(|n| config.base_delay(n).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 30, 30]);
        assert_eq!(config.base_delay(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn test_schedule_stops_after_max_attempts() {
        let mut state = ReconnectState::new(ReconnectConfig {
            max_attempts: 2,
            ..steady()
        });
        let now = Instant::now();
        assert!(state.schedule(now));
        assert!(state.schedule(now));
        assert!(!state.schedule(now));
        assert!(!state.is_pending());
        assert_eq!(state.attempts(), 2);
    }

    #[test]
    fn test_armed_attempt_fires_once() {
        let mut state = ReconnectState::new(steady());
        let now = Instant::now();
        state.schedule(now);
        assert!(!state.due(now + Duration::from_millis(999)));
        assert!(state.due(now + Duration::from_secs(1)));
        assert!(!state.due(now + Duration::from_secs(5)));
    }

    #[test]
    fn test_second_attempt_waits_longer() {
        let mut state = ReconnectState::new(steady());
        let now = Instant::now();
        state.schedule(now);
        assert!(state.due(now + Duration::from_secs(1)));
        state.schedule(now);
        assert!(!state.due(now + Duration::from_secs(1)));
        assert!(state.due(now + Duration::from_secs(2)));
    }

    #[test]
    fn test_reset_starts_over() {
        let mut state = ReconnectState::new(steady());
        let now = Instant::now();
        state.schedule(now);
        state.schedule(now);
        state.reset();
        assert_eq!(state.attempts(), 0);
        assert!(!state.is_pending());
        state.schedule(now);
        assert!(state.due(now + Duration::from_secs(1)));
    }

    #[test]
    fn test_jitter_within_bounds() {
        let config = ReconnectConfig::default();
        for _ in 0..32 {
            let d = config.jittered(config.base_delay(0));
            assert!(d >= Duration::from_millis(750) && d <= Duration::from_millis(1250));
        }
    }
}
