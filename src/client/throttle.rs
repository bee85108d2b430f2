//! Outbound rate limiting.
//!
//! A token bucket sits between the dispatcher and the transport. Chat
//! traffic (PRIVMSG/NOTICE) drains tokens; protocol plumbing (PING,
//! PONG, registration commands) bypasses the bucket entirely so
//! keepalives are never queued behind chat.

use std::time::Duration;

use tokio::time::Instant;

use crate::message::Message;

/// Default burst size.
pub const DEFAULT_BURST: u32 = 3;

/// Default per-message interval once the burst is exhausted.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(2);

/// Token bucket throttle.
///
/// The bucket holds up to `burst` tokens and refills at one token per
/// `interval`. Within any window this admits at most
/// `burst + elapsed / interval` messages.
#[derive(Debug)]
pub struct Throttle {
    capacity: f64,
    refill_per_sec: f64,
    tokens: f64,
    last_refill: Instant,
}

impl Throttle {
    /// Create a throttle with the given burst and post-burst interval.
    pub fn new(burst: u32, interval: Duration) -> Self {
        Throttle {
            capacity: f64::from(burst.max(1)),
            refill_per_sec: 1.0 / interval.as_secs_f64().max(f64::EPSILON),
            tokens: f64::from(burst.max(1)),
            last_refill: Instant::now(),
        }
    }

    /// Whether a message is subject to throttling at all.
    pub fn applies_to(msg: &Message) -> bool {
        matches!(msg.command.as_str(), "PRIVMSG" | "NOTICE")
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill);
        self.tokens = (self.tokens + elapsed.as_secs_f64() * self.refill_per_sec)
            .min(self.capacity);
        self.last_refill = now;
    }

    /// Try to admit one message now. On success a token is consumed;
    /// otherwise the returned duration says how long until one is
    /// available.
    pub fn try_acquire(&mut self, now: Instant) -> Result<(), Duration> {
        self.refill(now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Ok(())
        } else {
            let missing = 1.0 - self.tokens;
            Err(Duration::from_secs_f64(missing / self.refill_per_sec))
        }
    }

    /// How long until a token is available, without consuming one.
    /// `None` means a message can go out now.
    pub fn delay_until_ready(&mut self, now: Instant) -> Option<Duration> {
        self.refill(now);
        if self.tokens >= 1.0 {
            None
        } else {
            let missing = 1.0 - self.tokens;
            Some(Duration::from_secs_f64(missing / self.refill_per_sec))
        }
    }

    /// Refill the bucket completely (new connection).
    pub fn reset(&mut self) {
        self.tokens = self.capacity;
        self.last_refill = Instant::now();
    }
}

impl Default for Throttle {
    fn default() -> Self {
        Throttle::new(DEFAULT_BURST, DEFAULT_INTERVAL)
    }
}
