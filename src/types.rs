//! Core types used throughout polycore
//!
//! Defines intents, executor results, signals and the per-tick market snapshot.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::error::ExecError;
use crate::orders::OrderState;

/// Outcome token direction on a binary market
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Up,
    Down,
}

impl Default for Direction {
    fn default() -> Self {
        Direction::Up
    }
}

impl Direction {
    /// Convert to Polymarket outcome index
    pub fn outcome_index(&self) -> u8 {
        match self {
            Direction::Up => 0,
            Direction::Down => 1,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Up => write!(f, "UP"),
            Direction::Down => write!(f, "DOWN"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn opposite(&self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

/// A proposed order prior to submission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderIntent {
    /// Condition ID of the market
    pub condition_id: String,
    /// Outcome token being traded
    pub token_id: String,
    pub side: OrderSide,
    pub direction: Direction,
    /// Share price (0.0 - 1.0)
    pub price: f64,
    /// Size in shares
    pub size: f64,
}

impl OrderIntent {
    /// Reject intents that must never reach an executor.
    pub fn validate(&self) -> Result<(), ExecError> {
        if !self.price.is_finite() || self.price <= 0.0 {
            return Err(ExecError::InvalidPrice(self.price));
        }
        if !self.size.is_finite() || self.size <= 0.0 {
            return Err(ExecError::InvalidSize(self.size));
        }
        Ok(())
    }

    pub fn notional(&self) -> f64 {
        self.price * self.size
    }
}

/// Normalized result returned by an executor for one submission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderResult {
    pub client_order_id: String,
    pub exchange_order_id: Option<String>,
    pub final_state: OrderState,
    /// Shares filled so far
    pub total_filled: f64,
    pub avg_fill_price: Option<f64>,
    #[serde(default)]
    pub trade_id: Option<String>,
    /// Fee charged by the venue in USDC, when reported
    #[serde(default)]
    pub fee: Option<f64>,
}

impl OrderResult {
    /// True when the venue reports shares actually changed hands.
    pub fn has_fill(&self) -> bool {
        self.total_filled > 0.0
            || matches!(
                self.final_state,
                OrderState::Filled | OrderState::PartiallyFilled
            )
    }
}

/// Entry decision produced by a signal detector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    /// Unique signal ID
    pub id: String,
    pub condition_id: String,
    pub token_id: String,
    pub direction: Direction,
    /// Confidence level (0.0 - 1.0)
    pub confidence: f64,
    /// Strategy that generated this signal
    pub strategy_id: String,
    /// Creation timestamp in milliseconds
    pub created_at_ms: i64,
}

/// Immutable per-tick market snapshot
#[derive(Debug, Clone, Default)]
pub struct TickContext {
    /// Tick timestamp in milliseconds
    pub now_ms: i64,
    spot_prices: HashMap<String, f64>,
    spreads: HashMap<String, f64>,
    seconds_to_expiry: HashMap<String, i64>,
    pending_orders: HashMap<String, usize>,
    /// Available balance in USDC
    pub balance: f64,
    /// Open exposure in USDC
    pub exposure: f64,
    /// Realized + unrealized PnL for the current day
    pub daily_pnl: f64,
    /// Set by the caller when every position must be flattened
    pub emergency: Option<String>,
}

impl TickContext {
    pub fn new(now_ms: i64) -> Self {
        Self {
            now_ms,
            ..Default::default()
        }
    }

    pub fn with_spot(mut self, token_id: impl Into<String>, price: f64) -> Self {
        self.spot_prices.insert(token_id.into(), price);
        self
    }

    pub fn with_spread(mut self, token_id: impl Into<String>, spread: f64) -> Self {
        self.spreads.insert(token_id.into(), spread);
        self
    }

    pub fn with_expiry(mut self, condition_id: impl Into<String>, seconds: i64) -> Self {
        self.seconds_to_expiry.insert(condition_id.into(), seconds);
        self
    }

    pub fn with_pending(mut self, condition_id: impl Into<String>, count: usize) -> Self {
        self.pending_orders.insert(condition_id.into(), count);
        self
    }

    pub fn with_balance(mut self, balance: f64) -> Self {
        self.balance = balance;
        self
    }

    pub fn with_exposure(mut self, exposure: f64) -> Self {
        self.exposure = exposure;
        self
    }

    pub fn with_daily_pnl(mut self, pnl: f64) -> Self {
        self.daily_pnl = pnl;
        self
    }

    pub fn with_emergency(mut self, reason: impl Into<String>) -> Self {
        self.emergency = Some(reason.into());
        self
    }

    /// Last traded or mid price for a token; `None` when missing or non-positive.
    pub fn spot_price(&self, token_id: &str) -> Option<f64> {
        self.spot_prices
            .get(token_id)
            .copied()
            .filter(|p| p.is_finite() && *p > 0.0)
    }

    pub fn spread(&self, token_id: &str) -> Option<f64> {
        self.spreads.get(token_id).copied()
    }

    /// Widest quoted spread across all tokens in the snapshot.
    pub fn widest_spread(&self) -> Option<f64> {
        self.spreads
            .values()
            .copied()
            .filter(|s| s.is_finite())
            .fold(None, |acc, s| Some(acc.map_or(s, |a: f64| a.max(s))))
    }

    pub fn seconds_to_expiry(&self, condition_id: &str) -> Option<i64> {
        self.seconds_to_expiry.get(condition_id).copied()
    }

    pub fn pending_orders_for(&self, condition_id: &str) -> usize {
        self.pending_orders.get(condition_id).copied().unwrap_or(0)
    }

    pub fn total_pending_orders(&self) -> usize {
        self.pending_orders.values().sum()
    }
}
