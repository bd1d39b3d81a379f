//! Duplicate-submission suppression.
//!
//! Two intents with the same token, side, price and size inside the TTL
//! window are the same economic order. The key ignores time and market.

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::debug;

use crate::clock::{system_clock, Clock};
use crate::types::{OrderIntent, OrderSide};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum IdempotencyError {
    #[error("Idempotency TTL must be positive, got {0}ms")]
    InvalidTtl(i64),
}

pub struct IdempotencyGuard {
    ttl_ms: i64,
    /// key -> expiry timestamp (ms)
    entries: Mutex<HashMap<String, i64>>,
    clock: Arc<dyn Clock>,
}

impl IdempotencyGuard {
    pub fn new(ttl_ms: i64) -> Result<Self, IdempotencyError> {
        Self::with_clock(ttl_ms, system_clock())
    }

    pub fn with_clock(ttl_ms: i64, clock: Arc<dyn Clock>) -> Result<Self, IdempotencyError> {
        if ttl_ms <= 0 {
            return Err(IdempotencyError::InvalidTtl(ttl_ms));
        }
        Ok(Self {
            ttl_ms,
            entries: Mutex::new(HashMap::new()),
            clock,
        })
    }

    /// Deterministic fingerprint of an order's economic identity.
    ///
    /// Numbers use their shortest round-trip text, so `0.5` and `0.50`
    /// produce the same key.
    pub fn key(token_id: &str, side: OrderSide, price: f64, size: f64) -> String {
        let canonical = format!("{}|{}|{}|{}", token_id, side, price, size);
        hex::encode(Sha256::digest(canonical.as_bytes()))
    }

    /// True if an identical order was seen within the TTL. Otherwise the
    /// order is recorded and `false` is returned.
    pub fn is_duplicate(&self, token_id: &str, side: OrderSide, price: f64, size: f64) -> bool {
        let key = Self::key(token_id, side, price, size);
        let now = self.clock.now_ms();
        let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        entries.retain(|_, expires_at| *expires_at > now);

        if entries.contains_key(&key) {
            debug!(
                token_id = token_id,
                side = %side,
                price = price,
                size = size,
                "Duplicate intent"
            );
            return true;
        }
        entries.insert(key, now + self.ttl_ms);
        false
    }

    pub fn is_duplicate_intent(&self, intent: &OrderIntent) -> bool {
        self.is_duplicate(&intent.token_id, intent.side, intent.price, intent.size)
    }

    /// Live entries only.
    pub fn size(&self) -> usize {
        let now = self.clock.now_ms();
        self.entries
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .values()
            .filter(|expires_at| **expires_at > now)
            .count()
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap_or_else(|p| p.into_inner()).clear();
    }

    pub fn ttl_ms(&self) -> i64 {
        self.ttl_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    #[test]
    fn rejects_non_positive_ttl() {
        assert_eq!(
            IdempotencyGuard::new(0).err(),
            Some(IdempotencyError::InvalidTtl(0))
        );
        assert!(IdempotencyGuard::new(-5).is_err());
        assert!(IdempotencyGuard::new(1).is_ok());
    }

    #[test]
    fn duplicate_within_ttl_then_free_after() {
        let clock = ManualClock::new(1_000);
        let guard = IdempotencyGuard::with_clock(5_000, clock.clone()).unwrap();

        assert!(!guard.is_duplicate("tok", OrderSide::Buy, 0.5, 10.0));
        clock.advance(4_999);
        assert!(guard.is_duplicate("tok", OrderSide::Buy, 0.5, 10.0));
        assert_eq!(guard.size(), 1);

        clock.advance(1);
        assert_eq!(guard.size(), 0);
        assert!(!guard.is_duplicate("tok", OrderSide::Buy, 0.5, 10.0));
    }

    #[test]
    fn duplicate_check_does_not_extend_window() {
        let clock = ManualClock::new(0);
        let guard = IdempotencyGuard::with_clock(100, clock.clone()).unwrap();
        assert!(!guard.is_duplicate("tok", OrderSide::Buy, 0.5, 10.0));
        clock.set(90);
        assert!(guard.is_duplicate("tok", OrderSide::Buy, 0.5, 10.0));
        clock.set(100);
        assert!(!guard.is_duplicate("tok", OrderSide::Buy, 0.5, 10.0));
    }

    #[test]
    fn key_covers_every_field() {
        let guard = IdempotencyGuard::new(60_000).unwrap();
        assert!(!guard.is_duplicate("tok", OrderSide::Buy, 0.5, 10.0));
        assert!(!guard.is_duplicate("tok", OrderSide::Sell, 0.5, 10.0));
        assert!(!guard.is_duplicate("tok", OrderSide::Buy, 0.51, 10.0));
        assert!(!guard.is_duplicate("tok", OrderSide::Buy, 0.5, 11.0));
        assert!(!guard.is_duplicate("other", OrderSide::Buy, 0.5, 10.0));
        assert_eq!(guard.size(), 5);

        guard.clear();
        assert_eq!(guard.size(), 0);
        assert!(!guard.is_duplicate("tok", OrderSide::Buy, 0.5, 10.0));
    }

    #[test]
    fn key_is_stable_hex() {
        let a = IdempotencyGuard::key("tok", OrderSide::Buy, 0.5, 10.0);
        let b = IdempotencyGuard::key("tok", OrderSide::Buy, 0.50, 10.00);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
