//! Exit policies for open positions.
//!
//! An [`ExitPipeline`] triggers if ANY policy triggers; the first reason wins
//! and later policies are not consulted.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::positions::Position;
use crate::types::TickContext;

/// Absolute tolerance on ROI thresholds, so 0.6 vs 0.5 counts as +20%.
const ROI_EPSILON: f64 = 1e-9;

pub struct ExitContext<'a> {
    pub position: &'a Position,
    pub tick: &'a TickContext,
    /// Spot price of the position's token, if quoted
    pub current_price: Option<f64>,
}

impl ExitContext<'_> {
    pub fn roi(&self) -> Option<f64> {
        self.current_price.map(|p| self.position.roi_at(p))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExitReason {
    TakeProfit { roi: f64 },
    StopLoss { loss: f64 },
    TimeExit { remaining_secs: i64 },
    Emergency { reason: String },
}

impl ExitReason {
    pub fn kind(&self) -> &'static str {
        match self {
            ExitReason::TakeProfit { .. } => "take_profit",
            ExitReason::StopLoss { .. } => "stop_loss",
            ExitReason::TimeExit { .. } => "time_exit",
            ExitReason::Emergency { .. } => "emergency",
        }
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitReason::TakeProfit { roi } => write!(f, "TAKE_PROFIT ({:+.2}%)", roi * 100.0),
            ExitReason::StopLoss { loss } => write!(f, "STOP_LOSS (-{:.2}%)", loss * 100.0),
            ExitReason::TimeExit { remaining_secs } => {
                write!(f, "TIME_EXIT ({}s to expiry)", remaining_secs)
            }
            ExitReason::Emergency { reason } => write!(f, "EMERGENCY ({})", reason),
        }
    }
}

pub trait ExitPolicy: Send + Sync {
    fn name(&self) -> &str;

    /// `Some` if the position should be closed now.
    fn evaluate(&self, ctx: &ExitContext<'_>) -> Option<ExitReason>;
}

/// Ordered OR-chain of exit policies. Empty pipelines never exit.
#[derive(Clone, Default)]
pub struct ExitPipeline {
    policies: Vec<Arc<dyn ExitPolicy>>,
}

impl ExitPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// New pipeline with `policy` appended. The receiver is unchanged.
    pub fn with(&self, policy: impl ExitPolicy + 'static) -> Self {
        let mut policies = self.policies.clone();
        policies.push(Arc::new(policy));
        Self { policies }
    }

    pub fn evaluate(&self, ctx: &ExitContext<'_>) -> Option<ExitReason> {
        self.policies.iter().find_map(|p| p.evaluate(ctx))
    }

    /// Fall back to the standard preset when nothing was configured.
    pub fn require_exits(self) -> Self {
        if self.policies.is_empty() {
            Self::standard()
        } else {
            self
        }
    }

    pub fn names(&self) -> Vec<String> {
        self.policies.iter().map(|p| p.name().to_string()).collect()
    }

    pub fn describe(&self) -> String {
        if self.policies.is_empty() {
            return "(no exits)".to_string();
        }
        self.names().join(" OR ")
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }

    pub fn standard() -> Self {
        Self::new()
            .with(EmergencyExit::new())
            .with(StopLoss::new(0.15))
            .with(TakeProfit::new(0.20))
            .with(TimeExit::new(60))
    }

    pub fn scalper() -> Self {
        Self::new()
            .with(EmergencyExit::new().with_max_spread(0.10))
            .with(StopLoss::new(0.05))
            .with(TakeProfit::new(0.05))
            .with(TimeExit::new(120))
    }

    /// Ride to resolution unless told to flatten.
    pub fn hold_to_expiry() -> Self {
        Self::new().with(EmergencyExit::new())
    }

    pub fn preset(name: &str) -> Option<Self> {
        match name {
            "standard" => Some(Self::standard()),
            "scalper" => Some(Self::scalper()),
            "hold_to_expiry" => Some(Self::hold_to_expiry()),
            _ => None,
        }
    }
}

impl fmt::Debug for ExitPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExitPipeline")
            .field("policies", &self.names())
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────
// Policies
// ─────────────────────────────────────────────────────────────────

/// Exit once ROI reaches `target_roi` (0.2 = +20%)
#[derive(Debug, Clone)]
pub struct TakeProfit {
    target_roi: f64,
}

impl TakeProfit {
    pub fn new(target_roi: f64) -> Self {
        Self { target_roi }
    }
}

impl ExitPolicy for TakeProfit {
    fn name(&self) -> &str {
        "take_profit"
    }

    fn evaluate(&self, ctx: &ExitContext<'_>) -> Option<ExitReason> {
        let roi = ctx.roi()?;
        (roi + ROI_EPSILON >= self.target_roi).then_some(ExitReason::TakeProfit { roi })
    }
}

/// Exit once the loss reaches `max_loss` of the entry price (0.1 = -10%)
#[derive(Debug, Clone)]
pub struct StopLoss {
    max_loss: f64,
}

impl StopLoss {
    pub fn new(max_loss: f64) -> Self {
        Self {
            max_loss: max_loss.abs(),
        }
    }
}

impl ExitPolicy for StopLoss {
    fn name(&self) -> &str {
        "stop_loss"
    }

    fn evaluate(&self, ctx: &ExitContext<'_>) -> Option<ExitReason> {
        let roi = ctx.roi()?;
        (roi - ROI_EPSILON <= -self.max_loss).then_some(ExitReason::StopLoss { loss: -roi })
    }
}

/// Exit when the market is within `min_remaining_secs` of expiry
#[derive(Debug, Clone)]
pub struct TimeExit {
    min_remaining_secs: i64,
}

impl TimeExit {
    pub fn new(min_remaining_secs: i64) -> Self {
        Self { min_remaining_secs }
    }
}

impl ExitPolicy for TimeExit {
    fn name(&self) -> &str {
        "time_exit"
    }

    fn evaluate(&self, ctx: &ExitContext<'_>) -> Option<ExitReason> {
        let remaining_secs = ctx.tick.seconds_to_expiry(&ctx.position.condition_id)?;
        (remaining_secs <= self.min_remaining_secs)
            .then_some(ExitReason::TimeExit { remaining_secs })
    }
}

/// Flatten on the caller's emergency flag or, optionally, a spread blowout
#[derive(Debug, Clone, Default)]
pub struct EmergencyExit {
    max_spread: Option<f64>,
}

impl EmergencyExit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_spread(mut self, max_spread: f64) -> Self {
        self.max_spread = Some(max_spread);
        self
    }
}

impl ExitPolicy for EmergencyExit {
    fn name(&self) -> &str {
        "emergency"
    }

    fn evaluate(&self, ctx: &ExitContext<'_>) -> Option<ExitReason> {
        if let Some(reason) = &ctx.tick.emergency {
            return Some(ExitReason::Emergency {
                reason: reason.clone(),
            });
        }
        let max_spread = self.max_spread?;
        let spread = ctx.tick.spread(&ctx.position.token_id)?;
        (spread > max_spread).then(|| ExitReason::Emergency {
            reason: format!("spread {:.4} > {:.4}", spread, max_spread),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Direction, OrderSide};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn position() -> Position {
        Position {
            condition_id: "cond".to_string(),
            token_id: "tok".to_string(),
            direction: Direction::Up,
            side: OrderSide::Buy,
            entry_price: 0.5,
            size: 10.0,
            entry_fee: 0.0,
            opened_at_ms: 0,
            client_order_id: "c-1".to_string(),
        }
    }

    struct Fixed {
        reason: Option<ExitReason>,
        calls: Arc<AtomicUsize>,
    }

    impl ExitPolicy for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        fn evaluate(&self, _ctx: &ExitContext<'_>) -> Option<ExitReason> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.reason.clone()
        }
    }

    fn fixed(reason: Option<ExitReason>) -> (Fixed, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            Fixed {
                reason,
                calls: calls.clone(),
            },
            calls,
        )
    }

    #[test]
    fn first_trigger_wins_and_later_policies_are_skipped() {
        let a = ExitReason::Emergency {
            reason: "a".to_string(),
        };
        let b = ExitReason::Emergency {
            reason: "b".to_string(),
        };
        let (none, none_calls) = fixed(None);
        let (first, first_calls) = fixed(Some(a.clone()));
        let (second, second_calls) = fixed(Some(b));
        let pipeline = ExitPipeline::new().with(none).with(first).with(second);

        let pos = position();
        let tick = TickContext::new(0);
        let ctx = ExitContext {
            position: &pos,
            tick: &tick,
            current_price: None,
        };

        assert_eq!(pipeline.evaluate(&ctx), Some(a));
        assert_eq!(none_calls.load(Ordering::SeqCst), 1);
        assert_eq!(first_calls.load(Ordering::SeqCst), 1);
        assert_eq!(second_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn empty_never_exits_and_require_substitutes_standard() {
        let pos = position();
        let tick = TickContext::new(0).with_emergency("halt");
        let ctx = ExitContext {
            position: &pos,
            tick: &tick,
            current_price: Some(0.9),
        };
        assert_eq!(ExitPipeline::new().evaluate(&ctx), None);
        assert_eq!(
            ExitPipeline::new().require_exits().describe(),
            "emergency OR stop_loss OR take_profit OR time_exit"
        );
        assert_eq!(ExitPipeline::hold_to_expiry().names(), vec!["emergency"]);
    }

    #[test]
    fn take_profit_triggers_at_exact_target() {
        let pos = position();
        let tick = TickContext::new(0);
        let at = |price: f64| ExitContext {
            position: &pos,
            tick: &tick,
            current_price: Some(price),
        };

        let reason = TakeProfit::new(0.20).evaluate(&at(0.60));
        assert!(matches!(reason, Some(ExitReason::TakeProfit { roi }) if (roi - 0.2).abs() < 1e-9));
        assert_eq!(TakeProfit::new(0.20).evaluate(&at(0.59)), None);
        assert_eq!(
            TakeProfit::new(0.20).evaluate(&ExitContext {
                position: &pos,
                tick: &tick,
                current_price: None,
            }),
            None
        );
    }

    #[test]
    fn stop_loss_reports_positive_loss() {
        let pos = position();
        let tick = TickContext::new(0);
        let ctx = ExitContext {
            position: &pos,
            tick: &tick,
            current_price: Some(0.40),
        };
        match StopLoss::new(0.15).evaluate(&ctx) {
            Some(ExitReason::StopLoss { loss }) => assert!((loss - 0.2).abs() < 1e-9),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(StopLoss::new(0.25).evaluate(&ctx), None);
    }

    #[test]
    fn time_exit_uses_market_expiry() {
        let pos = position();
        let tick = TickContext::new(0).with_expiry("cond", 45);
        let ctx = ExitContext {
            position: &pos,
            tick: &tick,
            current_price: None,
        };
        assert_eq!(
            TimeExit::new(60).evaluate(&ctx),
            Some(ExitReason::TimeExit { remaining_secs: 45 })
        );
        assert_eq!(TimeExit::new(30).evaluate(&ctx), None);
    }

    #[test]
    fn emergency_on_flag_or_spread() {
        let pos = position();
        let wide = TickContext::new(0).with_spread("tok", 0.2);
        let ctx = ExitContext {
            position: &pos,
            tick: &wide,
            current_price: Some(0.5),
        };
        assert_eq!(EmergencyExit::new().evaluate(&ctx), None);
        assert!(matches!(
            EmergencyExit::new().with_max_spread(0.1).evaluate(&ctx),
            Some(ExitReason::Emergency { .. })
        ));

        let flagged = TickContext::new(0).with_emergency("kill switch");
        let ctx = ExitContext {
            position: &pos,
            tick: &flagged,
            current_price: None,
        };
        assert_eq!(
            EmergencyExit::new().evaluate(&ctx),
            Some(ExitReason::Emergency {
                reason: "kill switch".to_string()
            })
        );
    }

    #[test]
    fn reasons_display_and_serialize() {
        let reason = ExitReason::TakeProfit { roi: 0.2 };
        assert_eq!(reason.kind(), "take_profit");
        assert_eq!(reason.to_string(), "TAKE_PROFIT (+20.00%)");
        let json = serde_json::to_value(&reason).unwrap();
        assert_eq!(json["kind"], "take_profit");
    }
}
