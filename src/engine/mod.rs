//! Tick engine
//!
//! One call to [`TickEngine::tick`] per scheduler tick. Each tick advances
//! the lifecycle, manages exits for open positions, then considers a single
//! new entry. At most one tick runs at a time; an overlapping call is
//! dropped, never queued.
//!
//! Strategy code (detector, guards, exit policies, journal, executor) is
//! untrusted: its errors and panics become diagnostics on the event stream.

pub mod detector;
pub mod events;
pub mod journal;
pub mod lifecycle;
pub mod watchdog;

pub use detector::SignalDetector;
pub use events::EngineEvent;
pub use journal::{
    CsvTradeJournal, FileJournal, Journal, JournalEntry, JournalSet, MemoryJournal, TradeRecord,
};
pub use lifecycle::{Command, Lifecycle, LifecycleState};
pub use watchdog::{FeedWatchdog, NoopWatchdog, Watchdog};

use futures_util::FutureExt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, Mutex as AsyncMutex};
use tracing::{debug, error, info, warn};

use crate::clock::{system_clock, Clock};
use crate::error::{panic_message, Diagnostic, DiagnosticCode, ErrorCategory, ExecError};
use crate::execution::{Executor, IdempotencyError, IdempotencyGuard, RetryConfig, RetryingExecutor};
use crate::fees::FeeModel;
use crate::orders::{
    OrderRegistry, OrderState, OrderTracker, PendingOrder, TrackOptions, TrackerError,
};
use crate::pipeline::{
    ExitContext, ExitPipeline, ExitReason, GuardContext, GuardPipeline, GuardVerdict,
};
use crate::positions::{ClosedPosition, Position, PositionBook};
use crate::types::{OrderIntent, OrderResult, TickContext};

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Ticks spent in WarmingUp before trading starts
    pub warm_up_ticks: u32,
    /// Window in which identical intents are suppressed
    pub idempotency_ttl_ms: i64,
    /// How long terminal orders stay in the registry
    pub order_ttl_ms: i64,
    /// Synthesize expiry for orders still working after this long
    pub order_timeout_ms: Option<u64>,
    /// Warn when fills deviate from the requested price by more than this
    pub max_slippage_bps: Option<f64>,
    /// Broadcast buffer; slow subscribers lag past this many events
    pub event_capacity: usize,
    pub retry: RetryConfig,
    pub fees: FeeModel,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            warm_up_ticks: 3,
            idempotency_ttl_ms: 30_000,
            order_ttl_ms: 300_000,
            order_timeout_ms: None,
            max_slippage_bps: Some(50.0),
            event_capacity: 1024,
            retry: RetryConfig::default(),
            fees: FeeModel::default(),
        }
    }
}

/// What one tick did
#[derive(Debug, Clone, Default)]
pub struct TickReport {
    /// Another tick was in flight; nothing ran
    pub dropped: bool,
    pub state: Option<LifecycleState>,
    pub opened: Vec<Position>,
    pub closed: Vec<(ClosedPosition, ExitReason)>,
    pub blocked: Option<GuardVerdict>,
    pub diagnostics: Vec<Diagnostic>,
}

impl TickReport {
    pub fn has_code(&self, code: DiagnosticCode) -> bool {
        self.diagnostics.iter().any(|d| d.code == code)
    }
}

struct EngineState {
    lifecycle: Lifecycle,
    positions: PositionBook,
    ticks: u64,
}

pub struct TickEngine {
    config: EngineConfig,
    executor: Box<dyn Executor>,
    detector: Box<dyn SignalDetector>,
    guards: GuardPipeline,
    exits: ExitPipeline,
    journal: Option<Arc<dyn Journal>>,
    watchdog: Arc<dyn Watchdog>,
    tracker: OrderTracker,
    idempotency: IdempotencyGuard,
    events: broadcast::Sender<EngineEvent>,
    commands: Mutex<Vec<Command>>,
    state: AsyncMutex<EngineState>,
}

impl TickEngine {
    /// Engine with the standard guard and exit presets, no journal and no
    /// watchdog. `executor` is wrapped in a [`RetryingExecutor`].
    pub fn new(
        config: EngineConfig,
        executor: impl Executor + 'static,
        detector: impl SignalDetector + 'static,
    ) -> Result<Self, IdempotencyError> {
        Self::with_clock(config, executor, detector, system_clock())
    }

    pub fn with_clock(
        config: EngineConfig,
        executor: impl Executor + 'static,
        detector: impl SignalDetector + 'static,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, IdempotencyError> {
        let idempotency = IdempotencyGuard::with_clock(config.idempotency_ttl_ms, clock.clone())?;
        let tracker = OrderTracker::new(OrderRegistry::with_clock(clock));
        let (events, _) = broadcast::channel(config.event_capacity.max(1));

        Ok(Self {
            executor: Box::new(RetryingExecutor::new(executor, config.retry.clone())),
            detector: Box::new(detector),
            guards: GuardPipeline::new().require_guards(),
            exits: ExitPipeline::new().require_exits(),
            journal: None,
            watchdog: Arc::new(NoopWatchdog),
            tracker,
            idempotency,
            events,
            commands: Mutex::new(Vec::new()),
            state: AsyncMutex::new(EngineState {
                lifecycle: Lifecycle::new(config.warm_up_ticks),
                positions: PositionBook::new(),
                ticks: 0,
            }),
            config,
        })
    }

    /// Replace the guard pipeline. An empty pipeline allows every entry.
    pub fn with_guards(mut self, guards: GuardPipeline) -> Self {
        self.guards = guards;
        self
    }

    /// Replace the exit pipeline. An empty pipeline never exits.
    pub fn with_exits(mut self, exits: ExitPipeline) -> Self {
        self.exits = exits;
        self
    }

    pub fn with_journal(mut self, journal: impl Journal + 'static) -> Self {
        self.journal = Some(Arc::new(journal));
        self
    }

    pub fn with_watchdog(mut self, watchdog: impl Watchdog + 'static) -> Self {
        self.watchdog = Arc::new(watchdog);
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    pub fn tracker(&self) -> &OrderTracker {
        &self.tracker
    }

    pub fn guards(&self) -> &GuardPipeline {
        &self.guards
    }

    pub fn exits(&self) -> &ExitPipeline {
        &self.exits
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Current position book. Waits for an in-flight tick to finish.
    pub async fn positions(&self) -> PositionBook {
        self.state.lock().await.positions.clone()
    }

    pub async fn lifecycle_state(&self) -> LifecycleState {
        self.state.lock().await.lifecycle.state()
    }

    pub async fn tick_count(&self) -> u64 {
        self.state.lock().await.ticks
    }

    pub fn pause(&self) {
        self.command(Command::Pause);
    }

    pub fn resume(&self) {
        self.command(Command::Resume);
    }

    /// Keep managing exits but open nothing new.
    pub fn closing_only(&self) {
        self.command(Command::ClosingOnly);
    }

    pub fn stop(&self) {
        self.command(Command::Stop);
    }

    fn command(&self, command: Command) {
        info!(command = ?command, "Operator command queued");
        self.commands
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(command);
    }

    /// Release tracker timers and waiters.
    pub fn shutdown(&self) {
        self.tracker.dispose();
    }

    // ─────────────────────────────────────────────────────────────
    // Tick
    // ─────────────────────────────────────────────────────────────

    /// Run one tick against `ctx`.
    ///
    /// Fill accounting: an order that ends `Cancelled` or `Expired` with no
    /// fill is not a trade. Any other result is, sized by `total_filled`. A
    /// result still `Submitted` or `Open` with nothing filled yet opens (or
    /// closes) the full intent size at the intent price, as venues that
    /// acknowledge before reporting fills are trusted to fill. An exit that
    /// fills only part of the position closes that part and leaves the rest
    /// open for the next tick, with an `EXIT_PARTIALLY_FILLED` warning.
    pub async fn tick(&self, ctx: TickContext) -> TickReport {
        let Ok(mut state) = self.state.try_lock() else {
            warn!(now_ms = ctx.now_ms, "Tick already in flight, dropping");
            self.emit(EngineEvent::TickDropped { now_ms: ctx.now_ms });
            return TickReport {
                dropped: true,
                ..Default::default()
            };
        };

        state.ticks += 1;
        let mut report = TickReport::default();
        self.run_tick(&mut state, &ctx, &mut report).await;

        let evicted = self.tracker.cleanup(self.config.order_ttl_ms);
        if evicted > 0 {
            debug!(evicted = evicted, "Evicted terminal orders");
        }
        report
    }

    async fn run_tick(&self, state: &mut EngineState, ctx: &TickContext, report: &mut TickReport) {
        self.watchdog.touch();
        let stale = self.watchdog.should_block_entries();

        let commands = std::mem::take(
            &mut *self.commands.lock().unwrap_or_else(|p| p.into_inner()),
        );
        for command in commands {
            if let Some(change) = state.lifecycle.apply(command) {
                self.state_changed(change);
            }
        }
        for change in state.lifecycle.advance() {
            self.state_changed(change);
        }

        let lifecycle = state.lifecycle.state();
        report.state = Some(lifecycle);
        if !lifecycle.allows_entries() && !lifecycle.allows_exits() {
            debug!(state = %lifecycle, "Trading disabled this tick");
            return;
        }

        if lifecycle.allows_exits() && !state.positions.is_empty() {
            let book = state.positions.clone();
            state.positions = self.run_exits(book, ctx, report).await;
        }

        if !lifecycle.allows_entries() {
            return;
        }
        if stale {
            self.diagnose(
                report,
                ctx.now_ms,
                Diagnostic::warning(
                    DiagnosticCode::StaleData,
                    "market data stale, entries skipped",
                ),
            )
            .await;
            return;
        }

        let book = state.positions.clone();
        state.positions = self.run_entry(book, ctx, report).await;
    }

    fn state_changed(&self, (from, to): (LifecycleState, LifecycleState)) {
        info!(from = %from, to = %to, "Engine state changed");
        self.emit(EngineEvent::StateChanged { from, to });
    }

    // ─────────────────────────────────────────────────────────────
    // Exits
    // ─────────────────────────────────────────────────────────────

    async fn run_exits(
        &self,
        mut book: PositionBook,
        ctx: &TickContext,
        report: &mut TickReport,
    ) -> PositionBook {
        let open: Vec<Position> = book.iter().cloned().collect();
        for position in open {
            let current_price = ctx.spot_price(&position.token_id);
            let exit_ctx = ExitContext {
                position: &position,
                tick: ctx,
                current_price,
            };
            let reason = match catch_unwind(AssertUnwindSafe(|| self.exits.evaluate(&exit_ctx))) {
                Ok(Some(reason)) => reason,
                Ok(None) => continue,
                Err(payload) => {
                    let message = format!(
                        "exit policy panicked for {}: {}",
                        position.token_id,
                        panic_message(payload.as_ref())
                    );
                    self.diagnose(
                        report,
                        ctx.now_ms,
                        Diagnostic::fatal(DiagnosticCode::ExitPolicyThrew, message),
                    )
                    .await;
                    continue;
                }
            };
            book = self
                .close_position(book, &position, current_price, reason, ctx, report)
                .await;
        }
        book
    }

    async fn close_position(
        &self,
        book: PositionBook,
        position: &Position,
        current_price: Option<f64>,
        reason: ExitReason,
        ctx: &TickContext,
        report: &mut TickReport,
    ) -> PositionBook {
        let price = match current_price {
            Some(price) => price,
            None => {
                let message = format!(
                    "no spot price for {}, exiting at entry price {:.4}",
                    position.token_id, position.entry_price
                );
                self.diagnose(
                    report,
                    ctx.now_ms,
                    Diagnostic::warning(DiagnosticCode::SpotPriceFallback, message),
                )
                .await;
                position.entry_price
            }
        };

        let intent = OrderIntent {
            condition_id: position.condition_id.clone(),
            token_id: position.token_id.clone(),
            side: position.exit_side(),
            direction: position.direction,
            price,
            size: position.size,
        };
        info!(
            token_id = %position.token_id,
            reason = %reason,
            price = price,
            size = position.size,
            "🚪 Exit triggered"
        );

        if let Err(e) = intent.validate() {
            self.diagnose(
                report,
                ctx.now_ms,
                Diagnostic::from_exec(DiagnosticCode::InvalidIntent, &e),
            )
            .await;
            return book;
        }
        if self.idempotency.is_duplicate_intent(&intent) {
            let message = format!("exit for {} already submitted", intent.token_id);
            self.diagnose(
                report,
                ctx.now_ms,
                Diagnostic::warning(DiagnosticCode::DuplicateIntent, message),
            )
            .await;
            return book;
        }
        self.journal(
            report,
            JournalEntry::ExitSignal {
                at_ms: ctx.now_ms,
                reason: reason.clone(),
                intent: intent.clone(),
            },
        )
        .await;

        let result = match self.submit(&intent).await {
            Ok(result) => result,
            Err(e) => {
                self.diagnose(
                    report,
                    ctx.now_ms,
                    Diagnostic::from_exec(DiagnosticCode::ExitSubmitFailed, &e),
                )
                .await;
                return book;
            }
        };
        self.track(&intent, &result, ctx, report).await;
        if Self::not_filled(&result) {
            let message = format!(
                "exit order {} ended {}",
                result.client_order_id, result.final_state
            );
            self.diagnose(
                report,
                ctx.now_ms,
                Diagnostic::new(DiagnosticCode::ExitNotFilled, ErrorCategory::Domain, message),
            )
            .await;
            return book;
        }

        let exit_price = Self::fill_price(&result, price);
        let exit_size = Self::exit_size(&result, position.size);
        let exit_fee = result
            .fee
            .unwrap_or_else(|| self.config.fees.fee(exit_price, exit_size));
        let Some((next, closed)) =
            book.reduce(&position.token_id, exit_size, exit_price, exit_fee, ctx.now_ms)
        else {
            let message = format!("position {} vanished before close", position.token_id);
            self.diagnose(
                report,
                ctx.now_ms,
                Diagnostic::fatal(DiagnosticCode::PositionMissing, message),
            )
            .await;
            return book;
        };
        if let Some(left) = next.get(&position.token_id) {
            let message = format!(
                "exit order {} filled {} of {} shares of {}; {} stay open",
                result.client_order_id, exit_size, position.size, position.token_id, left.size
            );
            self.diagnose(
                report,
                ctx.now_ms,
                Diagnostic::warning(DiagnosticCode::ExitPartiallyFilled, message),
            )
            .await;
        }

        info!(
            token_id = %closed.position.token_id,
            entry = closed.position.entry_price,
            exit = closed.exit_price,
            gross_pnl = closed.gross_pnl,
            fee = closed.fee,
            net_pnl = closed.net_pnl,
            reason = reason.kind(),
            "💰 Position closed"
        );
        self.emit(EngineEvent::PositionClosed {
            closed: closed.clone(),
            reason: reason.clone(),
        });
        self.journal(
            report,
            JournalEntry::PositionClosed {
                at_ms: ctx.now_ms,
                closed: closed.clone(),
                reason: reason.clone(),
            },
        )
        .await;
        self.check_slippage(report, ctx, &intent, exit_price).await;
        report.closed.push((closed, reason));
        next
    }

    // ─────────────────────────────────────────────────────────────
    // Entry
    // ─────────────────────────────────────────────────────────────

    async fn run_entry(
        &self,
        book: PositionBook,
        ctx: &TickContext,
        report: &mut TickReport,
    ) -> PositionBook {
        let guard_ctx = GuardContext {
            tick: ctx,
            positions: &book,
            active_orders: self.tracker.active_count(),
        };
        let verdict = match catch_unwind(AssertUnwindSafe(|| self.guards.evaluate(&guard_ctx))) {
            Ok(verdict) => verdict,
            Err(payload) => {
                let message = format!(
                    "guard pipeline panicked: {}",
                    panic_message(payload.as_ref())
                );
                self.diagnose(
                    report,
                    ctx.now_ms,
                    Diagnostic::fatal(DiagnosticCode::GuardThrew, message),
                )
                .await;
                return book;
            }
        };

        if let GuardVerdict::Block {
            guard,
            reason,
            recoverable,
            current_value,
            threshold,
        } = &verdict
        {
            warn!(
                guard = %guard,
                reason = %reason,
                recoverable = *recoverable,
                "🚫 Entry blocked by guard"
            );
            self.emit(EngineEvent::GuardBlocked {
                guard: guard.clone(),
                reason: reason.clone(),
                recoverable: *recoverable,
                current_value: *current_value,
                threshold: *threshold,
            });
            self.journal(
                report,
                JournalEntry::GuardBlocked {
                    at_ms: ctx.now_ms,
                    verdict: verdict.clone(),
                },
            )
            .await;
            report.blocked = Some(verdict.clone());
            return book;
        }

        let signal = match catch_unwind(AssertUnwindSafe(|| self.detector.detect_entry(ctx))) {
            Ok(Ok(Some(signal))) => signal,
            Ok(Ok(None)) => {
                debug!(now_ms = ctx.now_ms, "No entry signal");
                return book;
            }
            Ok(Err(e)) => {
                self.detector_failed(report, ctx, format!("detect_entry failed: {:#}", e)).await;
                return book;
            }
            Err(payload) => {
                let message = format!("detect_entry panicked: {}", panic_message(payload.as_ref()));
                self.detector_failed(report, ctx, message).await;
                return book;
            }
        };

        let intent = match catch_unwind(AssertUnwindSafe(|| self.detector.to_order(&signal, ctx))) {
            Ok(Ok(intent)) => intent,
            Ok(Err(e)) => {
                self.detector_failed(report, ctx, format!("to_order failed: {:#}", e)).await;
                return book;
            }
            Err(payload) => {
                let message = format!("to_order panicked: {}", panic_message(payload.as_ref()));
                self.detector_failed(report, ctx, message).await;
                return book;
            }
        };

        if let Err(e) = intent.validate() {
            self.diagnose(
                report,
                ctx.now_ms,
                Diagnostic::from_exec(DiagnosticCode::InvalidIntent, &e),
            )
            .await;
            return book;
        }
        if self.idempotency.is_duplicate_intent(&intent) {
            let message = format!(
                "{} {} x{} @ {} already submitted",
                intent.side, intent.token_id, intent.size, intent.price
            );
            self.diagnose(
                report,
                ctx.now_ms,
                Diagnostic::warning(DiagnosticCode::DuplicateIntent, message),
            )
            .await;
            return book;
        }

        info!(
            signal_id = %signal.id,
            strategy = %signal.strategy_id,
            token_id = %intent.token_id,
            direction = %intent.direction,
            confidence = signal.confidence,
            price = intent.price,
            size = intent.size,
            "🎯 Entry signal"
        );

        let result = match self.submit(&intent).await {
            Ok(result) => result,
            Err(e) => {
                self.diagnose(
                    report,
                    ctx.now_ms,
                    Diagnostic::from_exec(DiagnosticCode::EntrySubmitFailed, &e),
                )
                .await;
                return book;
            }
        };
        self.track(&intent, &result, ctx, report).await;
        if Self::not_filled(&result) {
            let message = format!(
                "entry order {} ended {}",
                result.client_order_id, result.final_state
            );
            self.diagnose(
                report,
                ctx.now_ms,
                Diagnostic::new(DiagnosticCode::EntryNotFilled, ErrorCategory::Domain, message),
            )
            .await;
            return book;
        }

        let fill_price = Self::fill_price(&result, intent.price);
        let size = if result.total_filled > 0.0 {
            result.total_filled
        } else {
            intent.size
        };
        let entry_fee = result
            .fee
            .unwrap_or_else(|| self.config.fees.fee(fill_price, size));

        self.emit(EngineEvent::OrderPlaced {
            client_order_id: result.client_order_id.clone(),
            token_id: intent.token_id.clone(),
            side: intent.side,
            requested_price: intent.price,
            fill_price,
            size,
        });

        let position = Position {
            condition_id: intent.condition_id.clone(),
            token_id: intent.token_id.clone(),
            direction: intent.direction,
            side: intent.side,
            entry_price: fill_price,
            size,
            entry_fee,
            opened_at_ms: ctx.now_ms,
            client_order_id: result.client_order_id.clone(),
        };
        let next = book.open(position.clone());
        info!(
            token_id = %position.token_id,
            direction = %position.direction,
            entry = position.entry_price,
            size = position.size,
            fee = position.entry_fee,
            "✅ Position opened"
        );
        self.emit(EngineEvent::PositionOpened {
            position: position.clone(),
        });

        self.journal(
            report,
            JournalEntry::EntrySignal {
                at_ms: ctx.now_ms,
                signal,
                intent: intent.clone(),
            },
        )
        .await;
        self.journal(
            report,
            JournalEntry::OrderSubmitted {
                at_ms: ctx.now_ms,
                intent: intent.clone(),
                result,
            },
        )
        .await;
        self.journal(
            report,
            JournalEntry::PositionOpened {
                at_ms: ctx.now_ms,
                position: position.clone(),
            },
        )
        .await;

        self.check_slippage(report, ctx, &intent, fill_price).await;
        report.opened.push(position);
        next
    }

    async fn detector_failed(&self, report: &mut TickReport, ctx: &TickContext, message: String) {
        self.diagnose(
            report,
            ctx.now_ms,
            Diagnostic::new(DiagnosticCode::DetectorThrew, ErrorCategory::Domain, message),
        )
        .await;
    }

    // ─────────────────────────────────────────────────────────────
    // Orders
    // ─────────────────────────────────────────────────────────────

    async fn submit(&self, intent: &OrderIntent) -> Result<OrderResult, ExecError> {
        match AssertUnwindSafe(self.executor.submit(intent)).catch_unwind().await {
            Ok(result) => result,
            Err(payload) => Err(ExecError::Panicked(panic_message(payload.as_ref()))),
        }
    }

    /// Shares an exit actually closed. Venues that report no fill quantity
    /// are taken to have closed the whole position.
    fn exit_size(result: &OrderResult, held: f64) -> f64 {
        if result.total_filled > 0.0 {
            result.total_filled.min(held)
        } else {
            held
        }
    }

    fn not_filled(result: &OrderResult) -> bool {
        !result.has_fill()
            && matches!(
                result.final_state,
                OrderState::Cancelled | OrderState::Expired
            )
    }

    fn fill_price(result: &OrderResult, fallback: f64) -> f64 {
        result
            .avg_fill_price
            .filter(|p| p.is_finite() && *p > 0.0)
            .unwrap_or(fallback)
    }

    async fn track(
        &self,
        intent: &OrderIntent,
        result: &OrderResult,
        ctx: &TickContext,
        report: &mut TickReport,
    ) {
        if let Err(e) = self.apply_result(intent, result, ctx.now_ms) {
            let message = format!("order {}: {}", result.client_order_id, e);
            self.diagnose(
                report,
                ctx.now_ms,
                Diagnostic::fatal(DiagnosticCode::OrderTrackingFailed, message),
            )
            .await;
        }
    }

    /// Register the order and replay the executor's reported outcome through
    /// the state machine.
    fn apply_result(
        &self,
        intent: &OrderIntent,
        result: &OrderResult,
        now_ms: i64,
    ) -> Result<(), TrackerError> {
        let id = result.client_order_id.as_str();
        let order = PendingOrder {
            client_order_id: id.to_string(),
            condition_id: intent.condition_id.clone(),
            token_id: intent.token_id.clone(),
            side: intent.side,
            original_size: intent.size,
            price: intent.price,
            submitted_at_ms: now_ms,
            state: OrderState::Submitted,
            exchange_order_id: result.exchange_order_id.clone(),
        };
        let options = match self.config.order_timeout_ms {
            Some(ms) => TrackOptions::new().timeout(Duration::from_millis(ms)),
            None => TrackOptions::new(),
        };
        self.tracker.track(order, options)?;

        let price = Self::fill_price(result, intent.price);
        let filled = result.total_filled;
        match result.final_state {
            OrderState::Created | OrderState::Submitted => {}
            OrderState::Open => {
                self.tracker.mark_open(id)?;
            }
            OrderState::PartiallyFilled => {
                self.tracker.mark_open(id)?;
                self.tracker.record_partial_fill(id, filled, price)?;
            }
            OrderState::Filled => {
                let size = if filled > 0.0 { filled } else { intent.size };
                self.tracker.mark_open(id)?;
                self.tracker.record_fill(id, size, price)?;
            }
            OrderState::Cancelled => {
                if filled > 0.0 {
                    self.tracker.mark_open(id)?;
                    self.tracker.record_partial_fill(id, filled, price)?;
                }
                self.tracker.mark_cancelled(id, "cancelled by venue")?;
            }
            OrderState::Expired => {
                self.tracker.mark_open(id)?;
                if filled > 0.0 {
                    self.tracker.record_partial_fill(id, filled, price)?;
                }
                self.tracker.mark_expired(id)?;
            }
        }
        Ok(())
    }

    async fn check_slippage(
        &self,
        report: &mut TickReport,
        ctx: &TickContext,
        intent: &OrderIntent,
        fill_price: f64,
    ) {
        let Some(max_bps) = self.config.max_slippage_bps else {
            return;
        };
        let slippage_bps = (fill_price - intent.price).abs() / intent.price * 10_000.0;
        if slippage_bps > max_bps {
            let message = format!(
                "{} {} filled at {:.4} vs {:.4} requested ({:.1} bps > {:.1} bps)",
                intent.side, intent.token_id, fill_price, intent.price, slippage_bps, max_bps
            );
            self.diagnose(
                report,
                ctx.now_ms,
                Diagnostic::warning(DiagnosticCode::SlippageWarning, message),
            )
            .await;
        }
    }

    // ─────────────────────────────────────────────────────────────
    // Events, diagnostics, journal
    // ─────────────────────────────────────────────────────────────

    fn emit(&self, event: EngineEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    async fn diagnose(&self, report: &mut TickReport, at_ms: i64, diagnostic: Diagnostic) {
        match diagnostic.category {
            ErrorCategory::Fatal => {
                error!(
                    code = %diagnostic.code,
                    message = %diagnostic.message,
                    "Engine invariant violated"
                )
            }
            ErrorCategory::Warning => {
                warn!(code = %diagnostic.code, message = %diagnostic.message, "Engine warning")
            }
            ErrorCategory::Retryable | ErrorCategory::Domain => {
                warn!(
                    code = %diagnostic.code,
                    category = %diagnostic.category,
                    message = %diagnostic.message,
                    "Engine error"
                )
            }
        }
        self.emit(EngineEvent::ErrorOccurred {
            diagnostic: diagnostic.clone(),
        });
        self.journal(
            report,
            JournalEntry::Error {
                at_ms,
                diagnostic: diagnostic.clone(),
            },
        )
        .await;
        report.diagnostics.push(diagnostic);
    }

    /// Best effort. Failures are reported but never journaled themselves.
    async fn journal(&self, report: &mut TickReport, entry: JournalEntry) {
        let Some(journal) = &self.journal else {
            return;
        };
        let detail = match AssertUnwindSafe(journal.record(&entry)).catch_unwind().await {
            Ok(Ok(())) => return,
            Ok(Err(e)) => format!("{:#}", e),
            Err(payload) => format!("journal panicked: {}", panic_message(payload.as_ref())),
        };
        warn!(entry = entry.name(), error = %detail, "Journal write failed");
        let diagnostic = Diagnostic::warning(
            DiagnosticCode::JournalWriteFailed,
            format!("{}: {}", entry.name(), detail),
        );
        self.emit(EngineEvent::ErrorOccurred {
            diagnostic: diagnostic.clone(),
        });
        report.diagnostics.push(diagnostic);
    }
}
