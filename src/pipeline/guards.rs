//! Pre-trade guards.
//!
//! Every entry passes through a [`GuardPipeline`] before the detector is
//! consulted. Guards run in insertion order and the first block
//! short-circuits the rest.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::positions::PositionBook;
use crate::types::TickContext;

/// State available to guards on each evaluation.
pub struct GuardContext<'a> {
    pub tick: &'a TickContext,
    pub positions: &'a PositionBook,
    /// Non-terminal orders known to the tracker
    pub active_orders: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum GuardVerdict {
    Allow,
    Block {
        guard: String,
        reason: String,
        /// Whether the condition can clear on its own
        recoverable: bool,
        current_value: Option<f64>,
        threshold: Option<f64>,
    },
}

impl GuardVerdict {
    pub fn block(guard: &str, reason: impl Into<String>, recoverable: bool) -> Self {
        GuardVerdict::Block {
            guard: guard.to_string(),
            reason: reason.into(),
            recoverable,
            current_value: None,
            threshold: None,
        }
    }

    /// Attach the measured value and the limit it crossed.
    pub fn with_values(self, current: f64, limit: f64) -> Self {
        match self {
            GuardVerdict::Block {
                guard,
                reason,
                recoverable,
                ..
            } => GuardVerdict::Block {
                guard,
                reason,
                recoverable,
                current_value: Some(current),
                threshold: Some(limit),
            },
            allow => allow,
        }
    }

    pub fn is_allow(&self) -> bool {
        matches!(self, GuardVerdict::Allow)
    }
}

pub trait GuardPolicy: Send + Sync {
    /// Human-readable name for logging and diagnostics.
    fn name(&self) -> &str;

    fn check(&self, ctx: &GuardContext<'_>) -> GuardVerdict;
}

/// Ordered AND-chain of guards. Empty pipelines allow everything.
#[derive(Clone, Default)]
pub struct GuardPipeline {
    guards: Vec<Arc<dyn GuardPolicy>>,
}

impl GuardPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// New pipeline with `guard` appended. The receiver is unchanged.
    pub fn with(&self, guard: impl GuardPolicy + 'static) -> Self {
        let mut guards = self.guards.clone();
        guards.push(Arc::new(guard));
        Self { guards }
    }

    pub fn evaluate(&self, ctx: &GuardContext<'_>) -> GuardVerdict {
        for guard in &self.guards {
            let verdict = guard.check(ctx);
            if !verdict.is_allow() {
                return verdict;
            }
        }
        GuardVerdict::Allow
    }

    /// Fall back to the standard preset when nothing was configured.
    pub fn require_guards(self) -> Self {
        if self.guards.is_empty() {
            Self::standard()
        } else {
            self
        }
    }

    pub fn names(&self) -> Vec<String> {
        self.guards.iter().map(|g| g.name().to_string()).collect()
    }

    pub fn describe(&self) -> String {
        if self.guards.is_empty() {
            return "(no guards)".to_string();
        }
        self.names().join(" AND ")
    }

    pub fn len(&self) -> usize {
        self.guards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.guards.is_empty()
    }

    pub fn standard() -> Self {
        Self::new()
            .with(MaxOpenPositions::new(1))
            .with(MinBalance::new(10.0))
            .with(DailyLossLimit::new(50.0))
            .with(NoPendingOrders)
    }

    pub fn conservative() -> Self {
        Self::new()
            .with(MaxOpenPositions::new(1))
            .with(MaxExposure::new(100.0))
            .with(MinBalance::new(50.0))
            .with(DailyLossLimit::new(20.0))
            .with(MaxSpread::new(0.05))
            .with(NoPendingOrders)
    }

    pub fn permissive() -> Self {
        Self::new()
    }

    pub fn preset(name: &str) -> Option<Self> {
        match name {
            "standard" => Some(Self::standard()),
            "conservative" => Some(Self::conservative()),
            "permissive" => Some(Self::permissive()),
            _ => None,
        }
    }
}

impl fmt::Debug for GuardPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GuardPipeline")
            .field("guards", &self.names())
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────
// Guards
// ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct MaxOpenPositions {
    max: usize,
}

impl MaxOpenPositions {
    pub fn new(max: usize) -> Self {
        Self { max }
    }
}

impl GuardPolicy for MaxOpenPositions {
    fn name(&self) -> &str {
        "max_open_positions"
    }

    fn check(&self, ctx: &GuardContext<'_>) -> GuardVerdict {
        let open = ctx.positions.len();
        if open >= self.max {
            return GuardVerdict::block(
                self.name(),
                format!("{} open positions, limit {}", open, self.max),
                true,
            )
            .with_values(open as f64, self.max as f64);
        }
        GuardVerdict::Allow
    }
}

/// Blocks once open notional reaches the limit. Uses the larger of the
/// caller-reported exposure and the engine's own book.
#[derive(Debug, Clone)]
pub struct MaxExposure {
    max_usdc: f64,
}

impl MaxExposure {
    pub fn new(max_usdc: f64) -> Self {
        Self { max_usdc }
    }
}

impl GuardPolicy for MaxExposure {
    fn name(&self) -> &str {
        "max_exposure"
    }

    fn check(&self, ctx: &GuardContext<'_>) -> GuardVerdict {
        let exposure = ctx.tick.exposure.max(ctx.positions.exposure());
        if exposure >= self.max_usdc {
            return GuardVerdict::block(
                self.name(),
                format!("exposure ${:.2} at limit ${:.2}", exposure, self.max_usdc),
                true,
            )
            .with_values(exposure, self.max_usdc);
        }
        GuardVerdict::Allow
    }
}

#[derive(Debug, Clone)]
pub struct MinBalance {
    min_usdc: f64,
}

impl MinBalance {
    pub fn new(min_usdc: f64) -> Self {
        Self { min_usdc }
    }
}

impl GuardPolicy for MinBalance {
    fn name(&self) -> &str {
        "min_balance"
    }

    fn check(&self, ctx: &GuardContext<'_>) -> GuardVerdict {
        if ctx.tick.balance < self.min_usdc {
            return GuardVerdict::block(
                self.name(),
                format!(
                    "balance ${:.2} below minimum ${:.2}",
                    ctx.tick.balance, self.min_usdc
                ),
                true,
            )
            .with_values(ctx.tick.balance, self.min_usdc);
        }
        GuardVerdict::Allow
    }
}

/// Halts entries for the rest of the day once the loss limit is hit.
#[derive(Debug, Clone)]
pub struct DailyLossLimit {
    max_loss_usdc: f64,
}

impl DailyLossLimit {
    pub fn new(max_loss_usdc: f64) -> Self {
        Self {
            max_loss_usdc: max_loss_usdc.abs(),
        }
    }
}

impl GuardPolicy for DailyLossLimit {
    fn name(&self) -> &str {
        "daily_loss_limit"
    }

    fn check(&self, ctx: &GuardContext<'_>) -> GuardVerdict {
        let limit = -self.max_loss_usdc;
        if ctx.tick.daily_pnl <= limit {
            return GuardVerdict::block(
                self.name(),
                format!("daily PnL ${:.2}, limit ${:.2}", ctx.tick.daily_pnl, limit),
                false,
            )
            .with_values(ctx.tick.daily_pnl, limit);
        }
        GuardVerdict::Allow
    }
}

#[derive(Debug, Clone)]
pub struct MaxSpread {
    max_spread: f64,
}

impl MaxSpread {
    pub fn new(max_spread: f64) -> Self {
        Self { max_spread }
    }
}

impl GuardPolicy for MaxSpread {
    fn name(&self) -> &str {
        "max_spread"
    }

    fn check(&self, ctx: &GuardContext<'_>) -> GuardVerdict {
        match ctx.tick.widest_spread() {
            Some(spread) if spread > self.max_spread => GuardVerdict::block(
                self.name(),
                format!("spread {:.4} wider than {:.4}", spread, self.max_spread),
                true,
            )
            .with_values(spread, self.max_spread),
            _ => GuardVerdict::Allow,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct NoPendingOrders;

impl GuardPolicy for NoPendingOrders {
    fn name(&self) -> &str {
        "no_pending_orders"
    }

    fn check(&self, ctx: &GuardContext<'_>) -> GuardVerdict {
        let pending = ctx.tick.total_pending_orders() + ctx.active_orders;
        if pending > 0 {
            return GuardVerdict::block(
                self.name(),
                format!("{} orders still pending", pending),
                true,
            )
            .with_values(pending as f64, 0.0);
        }
        GuardVerdict::Allow
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::positions::Position;
    use crate::types::{Direction, OrderSide};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        name: &'static str,
        block: bool,
        calls: Arc<AtomicUsize>,
    }

    impl GuardPolicy for Counting {
        fn name(&self) -> &str {
            self.name
        }

        fn check(&self, _ctx: &GuardContext<'_>) -> GuardVerdict {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.block {
                GuardVerdict::block(self.name, "blocked", true)
            } else {
                GuardVerdict::Allow
            }
        }
    }

    fn counting(name: &'static str, block: bool) -> (Counting, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            Counting {
                name,
                block,
                calls: calls.clone(),
            },
            calls,
        )
    }

    fn ctx<'a>(tick: &'a TickContext, book: &'a PositionBook) -> GuardContext<'a> {
        GuardContext {
            tick,
            positions: book,
            active_orders: 0,
        }
    }

    #[test]
    fn first_block_short_circuits() {
        let (a, a_calls) = counting("a", false);
        let (b, b_calls) = counting("b", true);
        let (c, c_calls) = counting("c", false);
        let pipeline = GuardPipeline::new().with(a).with(b).with(c);

        let tick = TickContext::new(0);
        let book = PositionBook::new();
        let verdict = pipeline.evaluate(&ctx(&tick, &book));

        assert!(matches!(verdict, GuardVerdict::Block { ref guard, .. } if guard == "b"));
        assert_eq!(a_calls.load(Ordering::SeqCst), 1);
        assert_eq!(b_calls.load(Ordering::SeqCst), 1);
        assert_eq!(c_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn with_does_not_mutate_receiver() {
        let base = GuardPipeline::new();
        let extended = base.with(NoPendingOrders);
        assert!(base.is_empty());
        assert_eq!(extended.names(), vec!["no_pending_orders"]);
    }

    #[test]
    fn empty_allows_and_require_substitutes_standard() {
        let tick = TickContext::new(0);
        let book = PositionBook::new();
        assert!(GuardPipeline::permissive().evaluate(&ctx(&tick, &book)).is_allow());
        assert_eq!(GuardPipeline::permissive().describe(), "(no guards)");

        let required = GuardPipeline::new().require_guards();
        assert_eq!(required.names(), GuardPipeline::standard().names());

        let kept = GuardPipeline::new().with(NoPendingOrders).require_guards();
        assert_eq!(kept.len(), 1);
    }

    #[test]
    fn describe_lists_evaluation_order() {
        assert_eq!(
            GuardPipeline::standard().describe(),
            "max_open_positions AND min_balance AND daily_loss_limit AND no_pending_orders"
        );
        assert!(GuardPipeline::preset("conservative").is_some());
        assert!(GuardPipeline::preset("yolo").is_none());
    }

    #[test]
    fn max_open_positions_blocks_at_limit() {
        let tick = TickContext::new(0);
        let book = PositionBook::new().open(Position {
            condition_id: "cond".to_string(),
            token_id: "tok".to_string(),
            direction: Direction::Up,
            side: OrderSide::Buy,
            entry_price: 0.5,
            size: 10.0,
            entry_fee: 0.0,
            opened_at_ms: 0,
            client_order_id: "c".to_string(),
        });
        let verdict = MaxOpenPositions::new(1).check(&ctx(&tick, &book));
        assert_eq!(
            verdict,
            GuardVerdict::Block {
                guard: "max_open_positions".to_string(),
                reason: "1 open positions, limit 1".to_string(),
                recoverable: true,
                current_value: Some(1.0),
                threshold: Some(1.0),
            }
        );
        assert!(!MaxExposure::new(5.0).check(&ctx(&tick, &book)).is_allow());
        assert!(MaxExposure::new(5.01).check(&ctx(&tick, &book)).is_allow());
    }

    #[test]
    fn balance_loss_and_spread_guards() {
        let book = PositionBook::new();
        let tick = TickContext::new(0)
            .with_balance(5.0)
            .with_daily_pnl(-50.0)
            .with_spread("tok", 0.10);

        assert!(!MinBalance::new(10.0).check(&ctx(&tick, &book)).is_allow());
        match DailyLossLimit::new(50.0).check(&ctx(&tick, &book)) {
            GuardVerdict::Block { recoverable, .. } => assert!(!recoverable),
            GuardVerdict::Allow => panic!("expected block"),
        }
        assert!(!MaxSpread::new(0.05).check(&ctx(&tick, &book)).is_allow());
        assert!(MaxSpread::new(0.20).check(&ctx(&tick, &book)).is_allow());
    }

    #[test]
    fn pending_orders_from_context_or_tracker() {
        let book = PositionBook::new();
        let tick = TickContext::new(0);
        assert!(NoPendingOrders.check(&ctx(&tick, &book)).is_allow());

        let busy = GuardContext {
            tick: &tick,
            positions: &book,
            active_orders: 1,
        };
        assert!(!NoPendingOrders.check(&busy).is_allow());

        let tick = TickContext::new(0).with_pending("cond", 2);
        assert!(!NoPendingOrders.check(&ctx(&tick, &book)).is_allow());
    }
}
