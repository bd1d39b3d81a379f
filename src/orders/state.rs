//! Order lifecycle state machine.
//!
//! ```text
//! Created --submitted--> Submitted --opened--> Open --partial_fill--> PartiallyFilled
//!                            |                  |  \                     |    |
//!                            |                  |   --filled--> Filled <-    |
//!                            +--cancelled/rejected--> Cancelled <------------+
//!                                               +--expired--> Expired <------+
//! ```
//!
//! Filled, Cancelled and Expired are terminal. Events reaching a terminal
//! order are ignored so redelivered notifications cannot reopen it.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderState {
    Created,
    Submitted,
    Open,
    PartiallyFilled,
    Filled,
    Cancelled,
    Expired,
}

impl OrderState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderState::Filled | OrderState::Cancelled | OrderState::Expired
        )
    }

    /// Whether `next` is reachable from `self` in a single edge.
    pub fn can_transition_to(&self, next: OrderState) -> bool {
        use OrderState::*;
        matches!(
            (self, next),
            (Created, Submitted)
                | (Submitted, Open)
                | (Open | PartiallyFilled, PartiallyFilled)
                | (Open | PartiallyFilled, Filled)
                | (Submitted | Open | PartiallyFilled, Cancelled)
                | (Open | PartiallyFilled, Expired)
        )
    }

    /// Resolve the outcome of delivering `event` to an order in this state.
    pub fn apply(&self, event: &OrderEvent) -> Transition {
        if self.is_terminal() {
            return Transition::Ignored;
        }
        let target = event.target_state();
        if self.can_transition_to(target) {
            Transition::Applied(target)
        } else {
            Transition::Invalid {
                from: *self,
                to: target,
            }
        }
    }
}

impl fmt::Display for OrderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OrderState::Created => "CREATED",
            OrderState::Submitted => "SUBMITTED",
            OrderState::Open => "OPEN",
            OrderState::PartiallyFilled => "PARTIALLY_FILLED",
            OrderState::Filled => "FILLED",
            OrderState::Cancelled => "CANCELLED",
            OrderState::Expired => "EXPIRED",
        };
        f.write_str(s)
    }
}

/// Exchange-side notifications about an order
#[derive(Debug, Clone, PartialEq)]
pub enum OrderEvent {
    Submitted,
    Opened,
    PartialFill { size: f64, price: f64 },
    Filled { size: f64, price: f64 },
    Cancelled { reason: String },
    Rejected { reason: String },
    Expired,
}

impl OrderEvent {
    pub fn target_state(&self) -> OrderState {
        match self {
            OrderEvent::Submitted => OrderState::Submitted,
            OrderEvent::Opened => OrderState::Open,
            OrderEvent::PartialFill { .. } => OrderState::PartiallyFilled,
            OrderEvent::Filled { .. } => OrderState::Filled,
            OrderEvent::Cancelled { .. } | OrderEvent::Rejected { .. } => OrderState::Cancelled,
            OrderEvent::Expired => OrderState::Expired,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            OrderEvent::Submitted => "submitted",
            OrderEvent::Opened => "opened",
            OrderEvent::PartialFill { .. } => "partial_fill",
            OrderEvent::Filled { .. } => "filled",
            OrderEvent::Cancelled { .. } => "cancelled",
            OrderEvent::Rejected { .. } => "rejected",
            OrderEvent::Expired => "expired",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Applied(OrderState),
    /// Order already terminal; nothing happens
    Ignored,
    Invalid { from: OrderState, to: OrderState },
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [OrderState; 7] = [
        OrderState::Created,
        OrderState::Submitted,
        OrderState::Open,
        OrderState::PartiallyFilled,
        OrderState::Filled,
        OrderState::Cancelled,
        OrderState::Expired,
    ];

    #[test]
    fn happy_path() {
        let s = OrderState::Created;
        let s = match s.apply(&OrderEvent::Submitted) {
            Transition::Applied(next) => next,
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(s, OrderState::Submitted);
        assert_eq!(s.apply(&OrderEvent::Opened), Transition::Applied(OrderState::Open));
        assert_eq!(
            OrderState::Open.apply(&OrderEvent::PartialFill {
                size: 1.0,
                price: 0.5
            }),
            Transition::Applied(OrderState::PartiallyFilled)
        );
        assert_eq!(
            OrderState::PartiallyFilled.apply(&OrderEvent::Filled {
                size: 1.0,
                price: 0.5
            }),
            Transition::Applied(OrderState::Filled)
        );
    }

    #[test]
    fn terminal_states_ignore_everything() {
        let events = [
            OrderEvent::Opened,
            OrderEvent::Filled {
                size: 1.0,
                price: 0.5,
            },
            OrderEvent::Cancelled {
                reason: "late".into(),
            },
            OrderEvent::Expired,
        ];
        for state in ALL.iter().filter(|s| s.is_terminal()) {
            for event in &events {
                assert_eq!(state.apply(event), Transition::Ignored);
            }
        }
    }

    #[test]
    fn rejected_maps_to_cancelled() {
        assert_eq!(
            OrderState::Submitted.apply(&OrderEvent::Rejected {
                reason: "min size".into()
            }),
            Transition::Applied(OrderState::Cancelled)
        );
    }

    #[test]
    fn invalid_edges_are_reported() {
        assert_eq!(
            OrderState::Submitted.apply(&OrderEvent::Filled {
                size: 1.0,
                price: 0.5
            }),
            Transition::Invalid {
                from: OrderState::Submitted,
                to: OrderState::Filled
            }
        );
        assert!(matches!(
            OrderState::Submitted.apply(&OrderEvent::Expired),
            Transition::Invalid { .. }
        ));
        assert!(!OrderState::Created.can_transition_to(OrderState::Open));
    }

    #[test]
    fn terminal_set() {
        let terminal: Vec<_> = ALL.iter().filter(|s| s.is_terminal()).collect();
        assert_eq!(
            terminal,
            vec![&OrderState::Filled, &OrderState::Cancelled, &OrderState::Expired]
        );
    }
}
