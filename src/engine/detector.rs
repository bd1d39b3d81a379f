//! Entry signal source plugged into the engine.

use anyhow::Result;

use crate::types::{OrderIntent, Signal, TickContext};

/// Strategy boundary. Errors and panics are caught by the engine and
/// reported as `DETECTOR_THREW`; they never abort the tick loop.
pub trait SignalDetector: Send + Sync {
    fn detect_entry(&self, ctx: &TickContext) -> Result<Option<Signal>>;

    /// Size and price the signal. The result is validated before submission.
    fn to_order(&self, signal: &Signal, ctx: &TickContext) -> Result<OrderIntent>;
}
