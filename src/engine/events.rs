//! Observable engine events, fanned out over a broadcast channel.

use serde::Serialize;

use super::lifecycle::LifecycleState;
use crate::error::Diagnostic;
use crate::pipeline::ExitReason;
use crate::positions::{ClosedPosition, Position};
use crate::types::OrderSide;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    StateChanged {
        from: LifecycleState,
        to: LifecycleState,
    },
    GuardBlocked {
        guard: String,
        reason: String,
        recoverable: bool,
        current_value: Option<f64>,
        threshold: Option<f64>,
    },
    OrderPlaced {
        client_order_id: String,
        token_id: String,
        side: OrderSide,
        requested_price: f64,
        fill_price: f64,
        size: f64,
    },
    PositionOpened {
        position: Position,
    },
    PositionClosed {
        closed: ClosedPosition,
        reason: ExitReason,
    },
    ErrorOccurred {
        diagnostic: Diagnostic,
    },
    TickDropped {
        now_ms: i64,
    },
}

impl EngineEvent {
    pub fn name(&self) -> &'static str {
        match self {
            EngineEvent::StateChanged { .. } => "state_changed",
            EngineEvent::GuardBlocked { .. } => "guard_blocked",
            EngineEvent::OrderPlaced { .. } => "order_placed",
            EngineEvent::PositionOpened { .. } => "position_opened",
            EngineEvent::PositionClosed { .. } => "position_closed",
            EngineEvent::ErrorOccurred { .. } => "error_occurred",
            EngineEvent::TickDropped { .. } => "tick_dropped",
        }
    }
}
