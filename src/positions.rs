//! Open positions as a persistent value.
//!
//! `open` and `close` never touch the receiver; they return the next
//! generation of the book. The engine swaps its single reference between
//! tick phases.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Share quantities closer than this count as equal.
const SIZE_EPSILON: f64 = 1e-9;

use crate::types::{Direction, OrderSide};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub condition_id: String,
    pub token_id: String,
    pub direction: Direction,
    /// Side of the entry order; the exit goes the opposite way
    pub side: OrderSide,
    /// Average entry share price
    pub entry_price: f64,
    /// Shares held
    pub size: f64,
    /// Fee paid on entry (USDC)
    pub entry_fee: f64,
    pub opened_at_ms: i64,
    /// Entry order that created the position
    pub client_order_id: String,
}

impl Position {
    pub fn notional(&self) -> f64 {
        self.entry_price * self.size
    }

    /// Side of the order that closes this position.
    pub fn exit_side(&self) -> OrderSide {
        self.side.opposite()
    }

    /// +1 for bought shares, -1 for sold ones.
    fn sign(&self) -> f64 {
        match self.side {
            OrderSide::Buy => 1.0,
            OrderSide::Sell => -1.0,
        }
    }

    /// Return on the entry price if closed at `price`.
    pub fn roi_at(&self, price: f64) -> f64 {
        if self.entry_price <= 0.0 {
            return 0.0;
        }
        self.sign() * (price - self.entry_price) / self.entry_price
    }

    pub fn pnl_at(&self, price: f64) -> f64 {
        self.sign() * (price - self.entry_price) * self.size
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosedPosition {
    pub position: Position,
    pub exit_price: f64,
    pub exit_fee: f64,
    pub closed_at_ms: i64,
    /// PnL before fees
    pub gross_pnl: f64,
    /// Entry fee + exit fee
    pub fee: f64,
    pub net_pnl: f64,
}

impl ClosedPosition {
    pub fn hold_ms(&self) -> i64 {
        self.closed_at_ms - self.position.opened_at_ms
    }
}

/// Open positions keyed by outcome token
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PositionBook {
    positions: BTreeMap<String, Position>,
}

impl PositionBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next generation with `position` added. An existing position on the
    /// same token is averaged in.
    pub fn open(&self, position: Position) -> PositionBook {
        let mut positions = self.positions.clone();
        let merged = match positions.get(&position.token_id) {
            Some(existing) => {
                let size = existing.size + position.size;
                let entry_price = (existing.notional() + position.notional()) / size;
                Position {
                    entry_price,
                    size,
                    entry_fee: existing.entry_fee + position.entry_fee,
                    ..existing.clone()
                }
            }
            None => position,
        };
        positions.insert(merged.token_id.clone(), merged);
        PositionBook { positions }
    }

    /// Next generation without the position on `token_id`, plus its realized
    /// result. `None` when no such position is open.
    pub fn close(
        &self,
        token_id: &str,
        exit_price: f64,
        exit_fee: f64,
        now_ms: i64,
    ) -> Option<(PositionBook, ClosedPosition)> {
        let size = self.positions.get(token_id)?.size;
        self.reduce(token_id, size, exit_price, exit_fee, now_ms)
    }

    /// Next generation with `size` shares of the `token_id` position closed.
    ///
    /// The realized part carries a pro-rata share of the entry fee; the rest
    /// stays open with the remaining shares and fee. A `size` at or above the
    /// held size closes the whole position. `None` when no such position is
    /// open or `size` is not positive.
    pub fn reduce(
        &self,
        token_id: &str,
        size: f64,
        exit_price: f64,
        exit_fee: f64,
        now_ms: i64,
    ) -> Option<(PositionBook, ClosedPosition)> {
        let held = self.positions.get(token_id)?;
        if !(size > 0.0) {
            return None;
        }
        let mut positions = self.positions.clone();

        let position = if size < held.size - SIZE_EPSILON {
            let closed_fee = held.entry_fee * size / held.size;
            positions.insert(
                token_id.to_string(),
                Position {
                    size: held.size - size,
                    entry_fee: held.entry_fee - closed_fee,
                    ..held.clone()
                },
            );
            Position {
                size,
                entry_fee: closed_fee,
                ..held.clone()
            }
        } else {
            positions.remove(token_id);
            held.clone()
        };

        let gross_pnl = position.pnl_at(exit_price);
        let fee = position.entry_fee + exit_fee;
        let closed = ClosedPosition {
            exit_price,
            exit_fee,
            closed_at_ms: now_ms,
            gross_pnl,
            fee,
            net_pnl: gross_pnl - fee,
            position,
        };
        Some((PositionBook { positions }, closed))
    }

    pub fn get(&self, token_id: &str) -> Option<&Position> {
        self.positions.get(token_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Position> {
        self.positions.values()
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Entry notional across all open positions (USDC).
    pub fn exposure(&self) -> f64 {
        self.positions.values().map(Position::notional).sum()
    }

    pub fn has_market(&self, condition_id: &str) -> bool {
        self.positions
            .values()
            .any(|p| p.condition_id == condition_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn position(token: &str, price: f64, size: f64) -> Position {
        Position {
            condition_id: "cond".to_string(),
            token_id: token.to_string(),
            direction: Direction::Up,
            side: OrderSide::Buy,
            entry_price: price,
            size,
            entry_fee: 0.1,
            opened_at_ms: 1_000,
            client_order_id: "c-1".to_string(),
        }
    }

    #[test]
    fn open_returns_new_generation() {
        let empty = PositionBook::new();
        let book = empty.open(position("tok", 0.5, 10.0));
        assert!(empty.is_empty());
        assert_eq!(book.len(), 1);
        assert!((book.exposure() - 5.0).abs() < 1e-12);
        assert!(book.has_market("cond"));
    }

    #[test]
    fn open_averages_into_existing_token() {
        let book = PositionBook::new()
            .open(position("tok", 0.4, 10.0))
            .open(position("tok", 0.6, 10.0));
        let p = book.get("tok").unwrap();
        assert_eq!(book.len(), 1);
        assert!((p.size - 20.0).abs() < 1e-12);
        assert!((p.entry_price - 0.5).abs() < 1e-12);
        assert!((p.entry_fee - 0.2).abs() < 1e-12);
    }

    #[test]
    fn close_realizes_pnl_and_fees() {
        let book = PositionBook::new().open(position("tok", 0.5, 10.0));
        let (next, closed) = book.close("tok", 0.6, 0.05, 61_000).unwrap();

        assert!(next.is_empty());
        assert_eq!(book.len(), 1);
        assert!((closed.gross_pnl - 1.0).abs() < 1e-9);
        assert!((closed.fee - 0.15).abs() < 1e-12);
        assert!((closed.net_pnl - 0.85).abs() < 1e-9);
        assert_eq!(closed.hold_ms(), 60_000);
        assert!(book.close("missing", 0.5, 0.0, 0).is_none());
    }

    #[test]
    fn reduce_keeps_the_unfilled_remainder_open() {
        let book = PositionBook::new().open(position("tok", 0.5, 10.0));
        let (next, closed) = book.reduce("tok", 4.0, 0.6, 0.02, 9_000).unwrap();

        assert!((closed.position.size - 4.0).abs() < 1e-12);
        assert!((closed.gross_pnl - 0.4).abs() < 1e-9);
        assert!((closed.position.entry_fee - 0.04).abs() < 1e-12);
        assert!((closed.fee - 0.06).abs() < 1e-12);

        let left = next.get("tok").unwrap();
        assert!((left.size - 6.0).abs() < 1e-12);
        assert!((left.entry_fee - 0.06).abs() < 1e-12);
        assert!((left.entry_price - 0.5).abs() < 1e-12);
        assert!(book.reduce("tok", 0.0, 0.6, 0.0, 0).is_none());

        let (empty, rest) = next.reduce("tok", 6.0, 0.6, 0.0, 10_000).unwrap();
        assert!(empty.is_empty());
        assert!((rest.gross_pnl - 0.6).abs() < 1e-9);
    }

    #[test]
    fn sold_entries_profit_when_price_falls() {
        let p = Position {
            side: OrderSide::Sell,
            ..position("tok", 0.5, 10.0)
        };
        assert_eq!(p.exit_side(), OrderSide::Buy);
        assert!((p.roi_at(0.4) - 0.2).abs() < 1e-9);
        assert!((p.pnl_at(0.4) - 1.0).abs() < 1e-9);
        assert!((p.pnl_at(0.6) + 1.0).abs() < 1e-9);
    }

    #[test]
    fn roi_is_relative_to_entry() {
        let p = position("tok", 0.5, 10.0);
        assert!((p.roi_at(0.6) - 0.2).abs() < 1e-9);
        assert!((p.roi_at(0.4) + 0.2).abs() < 1e-9);
    }
}
