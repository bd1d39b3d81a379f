//! Order lifecycle: state machine, registry and event-driven tracker.

pub mod registry;
pub mod state;
pub mod tracker;

pub use registry::{OrderRegistry, PendingOrder};
pub use state::{OrderEvent, OrderState, Transition};
pub use tracker::{
    FillUpdate, OrderOutcome, OrderTracker, TrackOptions, TrackerError,
};

use thiserror::Error;

/// Internal invariant violations in the order book-keeping
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OrderError {
    #[error("Duplicate client order id: {0}")]
    DuplicateOrder(String),

    #[error("Invalid state transition for order {id}: {from} -> {to}")]
    InvalidTransition {
        id: String,
        from: OrderState,
        to: OrderState,
    },
}
