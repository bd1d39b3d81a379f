//! Authoritative in-memory table of submitted orders.
//!
//! Orders are indexed by client order id and by market (condition id).
//! Entries are replaced on every change, never edited in place, and removed
//! only by [`OrderRegistry::cleanup`] once they have been terminal long enough.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use super::state::OrderState;
use super::OrderError;
use crate::clock::{system_clock, Clock};
use crate::types::OrderSide;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingOrder {
    pub client_order_id: String,
    pub condition_id: String,
    pub token_id: String,
    pub side: OrderSide,
    pub original_size: f64,
    pub price: f64,
    pub submitted_at_ms: i64,
    pub state: OrderState,
    pub exchange_order_id: Option<String>,
}

pub struct OrderRegistry {
    orders: HashMap<String, PendingOrder>,
    by_market: HashMap<String, Vec<String>>,
    /// When each order reached a terminal state
    terminal_at: HashMap<String, i64>,
    clock: Arc<dyn Clock>,
}

impl OrderRegistry {
    pub fn new() -> Self {
        Self::with_clock(system_clock())
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            orders: HashMap::new(),
            by_market: HashMap::new(),
            terminal_at: HashMap::new(),
            clock,
        }
    }

    /// Insert a new order. A repeated id is a caller bug.
    pub fn track(&mut self, order: PendingOrder) -> Result<(), OrderError> {
        if self.orders.contains_key(&order.client_order_id) {
            return Err(OrderError::DuplicateOrder(order.client_order_id));
        }
        let id = order.client_order_id.clone();
        if order.state.is_terminal() {
            self.terminal_at.insert(id.clone(), self.clock.now_ms());
        }
        self.by_market
            .entry(order.condition_id.clone())
            .or_default()
            .push(id.clone());
        debug!(order_id = %id, market = %order.condition_id, state = %order.state, "Order tracked");
        self.orders.insert(id, order);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&PendingOrder> {
        self.orders.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.orders.contains_key(id)
    }

    /// Move an order to `state`.
    ///
    /// Returns `Ok(false)` for unknown ids and for orders already terminal,
    /// `Ok(true)` when the state was replaced.
    pub fn update_state(&mut self, id: &str, state: OrderState) -> Result<bool, OrderError> {
        let Some(current) = self.orders.get(id) else {
            return Ok(false);
        };
        if current.state.is_terminal() {
            return Ok(false);
        }
        if !current.state.can_transition_to(state) {
            warn!(
                order_id = %id,
                from = %current.state,
                to = %state,
                "Rejected order state transition"
            );
            return Err(OrderError::InvalidTransition {
                id: id.to_string(),
                from: current.state,
                to: state,
            });
        }

        let replaced = PendingOrder {
            state,
            ..current.clone()
        };
        if state.is_terminal() {
            self.terminal_at.insert(id.to_string(), self.clock.now_ms());
        }
        self.orders.insert(id.to_string(), replaced);
        Ok(true)
    }

    /// Attach the venue's id once known. No-op on unknown ids.
    pub fn update_exchange_order_id(
        &mut self,
        id: &str,
        exchange_order_id: impl Into<String>,
    ) -> bool {
        let Some(current) = self.orders.get(id) else {
            return false;
        };
        let replaced = PendingOrder {
            exchange_order_id: Some(exchange_order_id.into()),
            ..current.clone()
        };
        self.orders.insert(id.to_string(), replaced);
        true
    }

    pub fn by_market(&self, condition_id: &str) -> Vec<&PendingOrder> {
        self.by_market
            .get(condition_id)
            .map(|ids| ids.iter().filter_map(|id| self.orders.get(id)).collect())
            .unwrap_or_default()
    }

    /// Non-terminal orders per market.
    pub fn active_by_market(&self) -> HashMap<String, usize> {
        let mut counts = HashMap::new();
        for order in self.orders.values().filter(|o| !o.state.is_terminal()) {
            *counts.entry(order.condition_id.clone()).or_insert(0) += 1;
        }
        counts
    }

    pub fn active_count(&self) -> usize {
        self.orders
            .values()
            .filter(|o| !o.state.is_terminal())
            .count()
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    /// Remove every order that has been terminal for at least `ttl_ms`.
    pub fn cleanup(&mut self, ttl_ms: i64) -> usize {
        let now = self.clock.now_ms();
        let expired: Vec<String> = self
            .terminal_at
            .iter()
            .filter(|(_, at)| now - **at >= ttl_ms)
            .map(|(id, _)| id.clone())
            .collect();

        for id in &expired {
            self.terminal_at.remove(id);
            if let Some(order) = self.orders.remove(id) {
                if let Some(ids) = self.by_market.get_mut(&order.condition_id) {
                    ids.retain(|other| other != id);
                    if ids.is_empty() {
                        self.by_market.remove(&order.condition_id);
                    }
                }
            }
        }

        if !expired.is_empty() {
            debug!(count = expired.len(), "Cleaned up terminal orders");
        }
        expired.len()
    }
}

impl Default for OrderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn order(id: &str, market: &str) -> PendingOrder {
        PendingOrder {
            client_order_id: id.to_string(),
            condition_id: market.to_string(),
            token_id: format!("{}-up", market),
            side: OrderSide::Buy,
            original_size: 10.0,
            price: 0.5,
            submitted_at_ms: 0,
            state: OrderState::Submitted,
            exchange_order_id: None,
        }
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let mut reg = OrderRegistry::new();
        reg.track(order("a", "m1")).unwrap();
        let err = reg.track(order("a", "m1")).unwrap_err();
        assert!(matches!(err, OrderError::DuplicateOrder(ref id) if id == "a"));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn update_state_follows_edges() {
        let mut reg = OrderRegistry::new();
        reg.track(order("a", "m1")).unwrap();

        assert!(reg.update_state("a", OrderState::Open).unwrap());
        assert!(reg.update_state("a", OrderState::Created).is_err());
        assert!(reg.update_state("a", OrderState::Filled).unwrap());
        // terminal: further mutation is a no-op
        assert!(!reg.update_state("a", OrderState::Cancelled).unwrap());
        assert_eq!(reg.get("a").unwrap().state, OrderState::Filled);
        // unknown ids are ignored
        assert!(!reg.update_state("missing", OrderState::Open).unwrap());
    }

    #[test]
    fn market_index_and_counts() {
        let mut reg = OrderRegistry::new();
        reg.track(order("a", "m1")).unwrap();
        reg.track(order("b", "m1")).unwrap();
        reg.track(order("c", "m2")).unwrap();
        reg.update_state("c", OrderState::Cancelled).unwrap();

        assert_eq!(reg.by_market("m1").len(), 2);
        assert_eq!(reg.by_market("m2").len(), 1);
        assert!(reg.by_market("m3").is_empty());
        assert_eq!(reg.active_count(), 2);
        assert_eq!(reg.active_by_market().get("m1"), Some(&2));
        assert_eq!(reg.active_by_market().get("m2"), None);
    }

    #[test]
    fn exchange_id_replaces_entry() {
        let mut reg = OrderRegistry::new();
        reg.track(order("a", "m1")).unwrap();
        assert!(reg.update_exchange_order_id("a", "0xabc"));
        assert!(!reg.update_exchange_order_id("zzz", "0xdef"));
        assert_eq!(
            reg.get("a").unwrap().exchange_order_id.as_deref(),
            Some("0xabc")
        );
    }

    #[test]
    fn cleanup_respects_ttl_boundary() {
        let clock = ManualClock::new(0);
        let mut reg = OrderRegistry::with_clock(clock.clone());
        reg.track(order("a", "m1")).unwrap();
        reg.update_state("a", OrderState::Open).unwrap();
        reg.update_state("a", OrderState::Filled).unwrap();

        clock.set(4_999);
        assert_eq!(reg.cleanup(5_000), 0);
        assert!(reg.contains("a"));

        clock.set(5_000);
        assert_eq!(reg.cleanup(5_000), 1);
        assert!(!reg.contains("a"));
        assert!(reg.by_market("m1").is_empty());

        // the id is free again
        reg.track(order("a", "m1")).unwrap();
    }

    #[test]
    fn cleanup_keeps_active_orders() {
        let clock = ManualClock::new(0);
        let mut reg = OrderRegistry::with_clock(clock.clone());
        reg.track(order("a", "m1")).unwrap();
        clock.set(1_000_000);
        assert_eq!(reg.cleanup(1), 0);
        assert_eq!(reg.active_count(), 1);
    }
}
