//! Order tracking on top of the registry.
//!
//! Turns exchange notifications into registry updates, runs the caller's
//! callbacks and settles `wait_for_order` futures. An order may carry a
//! timeout; when it elapses the tracker synthesizes an expiry.
//!
//! Callbacks run outside the internal lock, each behind its own
//! `catch_unwind`, and waiters are settled after every callback has run.

use std::collections::HashMap;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::registry::{OrderRegistry, PendingOrder};
use super::state::{OrderEvent, OrderState, Transition};
use super::OrderError;
use crate::error::panic_message;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TrackerError {
    #[error("Order not found: {0}")]
    NotFound(String),

    #[error("Tracker disposed")]
    Disposed,

    #[error(transparent)]
    Order(#[from] OrderError),
}

/// Fill notification passed to `on_fill`
#[derive(Debug, Clone, PartialEq)]
pub struct FillUpdate {
    pub client_order_id: String,
    pub fill_size: f64,
    pub fill_price: f64,
    pub total_filled: f64,
    pub avg_fill_price: Option<f64>,
    pub state: OrderState,
}

/// Terminal summary of an order
#[derive(Debug, Clone, PartialEq)]
pub struct OrderOutcome {
    pub client_order_id: String,
    pub final_state: OrderState,
    pub total_filled: f64,
    pub avg_fill_price: Option<f64>,
    /// Cancel/reject/expiry reason
    pub reason: Option<String>,
}

pub type FillCallback = Arc<dyn Fn(&FillUpdate) + Send + Sync>;
pub type CompleteCallback = Arc<dyn Fn(&OrderOutcome) + Send + Sync>;
pub type CancelCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Per-order callbacks and timeout
#[derive(Clone, Default)]
pub struct TrackOptions {
    timeout: Option<Duration>,
    on_fill: Option<FillCallback>,
    on_complete: Option<CompleteCallback>,
    on_cancel: Option<CancelCallback>,
}

impl TrackOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn on_fill(mut self, f: impl Fn(&FillUpdate) + Send + Sync + 'static) -> Self {
        self.on_fill = Some(Arc::new(f));
        self
    }

    /// Called once when the order is fully filled.
    pub fn on_complete(mut self, f: impl Fn(&OrderOutcome) + Send + Sync + 'static) -> Self {
        self.on_complete = Some(Arc::new(f));
        self
    }

    /// Called once with the reason when the order is cancelled, rejected or expires.
    pub fn on_cancel(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_cancel = Some(Arc::new(f));
        self
    }
}

type Waiter = oneshot::Sender<Result<OrderOutcome, TrackerError>>;

struct Handle {
    options: TrackOptions,
    total_filled: f64,
    filled_notional: f64,
    waiters: Vec<Waiter>,
    timer: Option<JoinHandle<()>>,
    outcome: Option<OrderOutcome>,
}

impl Handle {
    fn new(options: TrackOptions) -> Self {
        Self {
            options,
            total_filled: 0.0,
            filled_notional: 0.0,
            waiters: Vec::new(),
            timer: None,
            outcome: None,
        }
    }

    fn avg_fill_price(&self) -> Option<f64> {
        (self.total_filled > 0.0).then(|| self.filled_notional / self.total_filled)
    }
}

struct Inner {
    registry: OrderRegistry,
    handles: HashMap<String, Handle>,
    disposed: bool,
}

/// Work collected under the lock and executed after releasing it.
#[derive(Default)]
struct Dispatch {
    fill: Option<(FillCallback, FillUpdate)>,
    complete: Option<(CompleteCallback, OrderOutcome)>,
    cancel: Option<(CancelCallback, String)>,
    settle: Option<(Vec<Waiter>, OrderOutcome)>,
}

#[derive(Clone)]
pub struct OrderTracker {
    inner: Arc<Mutex<Inner>>,
}

impl OrderTracker {
    pub fn new(registry: OrderRegistry) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                registry,
                handles: HashMap::new(),
                disposed: false,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register an order. Duplicate ids fail with [`OrderError::DuplicateOrder`].
    ///
    /// An order registered already terminal is settled on the spot, so
    /// `wait_for_order` resolves immediately. A `Filled` order counts as
    /// filled in full at its limit price.
    pub fn track(&self, order: PendingOrder, options: TrackOptions) -> Result<(), TrackerError> {
        let id = order.client_order_id.clone();
        let timeout = options.timeout;
        let settled = order.state.is_terminal().then(|| Self::settled_outcome(&order));

        let mut inner = self.lock();
        if inner.disposed {
            return Err(TrackerError::Disposed);
        }
        inner.registry.track(order)?;
        let mut handle = Handle::new(options);
        match settled {
            Some((outcome, filled, notional)) => {
                debug!(
                    order_id = %id,
                    state = %outcome.final_state,
                    "Tracking order already terminal"
                );
                handle.total_filled = filled;
                handle.filled_notional = notional;
                handle.outcome = Some(outcome);
            }
            None => {
                if let Some(timeout) = timeout {
                    handle.timer = self.spawn_timer(id.clone(), timeout);
                }
            }
        }
        inner.handles.insert(id, handle);
        Ok(())
    }

    fn settled_outcome(order: &PendingOrder) -> (OrderOutcome, f64, f64) {
        let filled = if order.state == OrderState::Filled {
            order.original_size
        } else {
            0.0
        };
        let outcome = OrderOutcome {
            client_order_id: order.client_order_id.clone(),
            final_state: order.state,
            total_filled: filled,
            avg_fill_price: (filled > 0.0).then_some(order.price),
            reason: None,
        };
        (outcome, filled, filled * order.price)
    }

    fn spawn_timer(&self, id: String, timeout: Duration) -> Option<JoinHandle<()>> {
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(rt) => rt,
            Err(_) => {
                warn!(order_id = %id, "No tokio runtime; order timeout disabled");
                return None;
            }
        };
        let weak: Weak<Mutex<Inner>> = Arc::downgrade(&self.inner);
        Some(runtime.spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(inner) = weak.upgrade() {
                OrderTracker { inner }.expire_on_timeout(&id);
            }
        }))
    }

    fn expire_on_timeout(&self, id: &str) {
        let state = match self.lock().registry.get(id) {
            Some(order) => order.state,
            None => return,
        };
        // Never acknowledged: there is no Submitted -> Expired edge, cancel instead.
        let event = if state == OrderState::Submitted {
            OrderEvent::Cancelled {
                reason: "expired".to_string(),
            }
        } else {
            OrderEvent::Expired
        };
        info!(order_id = %id, state = %state, "Order timed out");
        if let Err(e) = self.handle_event(id, event) {
            warn!(order_id = %id, error = %e, "Failed to expire order");
        }
    }

    /// Apply an exchange notification. Unknown ids and terminal orders are ignored.
    pub fn handle_event(&self, id: &str, event: OrderEvent) -> Result<Transition, TrackerError> {
        let mut dispatch = Dispatch::default();
        let transition = {
            let mut inner = self.lock();
            if inner.disposed {
                return Ok(Transition::Ignored);
            }
            let Some(current) = inner.registry.get(id).map(|o| o.state) else {
                debug!(order_id = %id, event = event.name(), "Event for unknown order ignored");
                return Ok(Transition::Ignored);
            };

            let transition = current.apply(&event);
            let next = match transition {
                Transition::Applied(next) => next,
                Transition::Ignored => {
                    debug!(
                        order_id = %id,
                        state = %current,
                        event = event.name(),
                        "Event for terminal order ignored"
                    );
                    return Ok(transition);
                }
                Transition::Invalid { from, to } => {
                    return Err(OrderError::InvalidTransition {
                        id: id.to_string(),
                        from,
                        to,
                    }
                    .into());
                }
            };
            inner.registry.update_state(id, next)?;

            if let Some(handle) = inner.handles.get_mut(id) {
                Self::collect(id, handle, &event, next, &mut dispatch);
            }
            transition
        };

        Self::run(id, dispatch);
        Ok(transition)
    }

    fn collect(
        id: &str,
        handle: &mut Handle,
        event: &OrderEvent,
        next: OrderState,
        out: &mut Dispatch,
    ) {
        let mut reason = None;
        match event {
            OrderEvent::PartialFill { size, price } | OrderEvent::Filled { size, price } => {
                handle.total_filled += size;
                handle.filled_notional += size * price;
                if let Some(cb) = &handle.options.on_fill {
                    out.fill = Some((
                        cb.clone(),
                        FillUpdate {
                            client_order_id: id.to_string(),
                            fill_size: *size,
                            fill_price: *price,
                            total_filled: handle.total_filled,
                            avg_fill_price: handle.avg_fill_price(),
                            state: next,
                        },
                    ));
                }
            }
            OrderEvent::Cancelled { reason: r } | OrderEvent::Rejected { reason: r } => {
                reason = Some(r.clone());
            }
            OrderEvent::Expired => reason = Some("expired".to_string()),
            OrderEvent::Submitted | OrderEvent::Opened => {}
        }

        if !next.is_terminal() {
            return;
        }

        if let Some(timer) = handle.timer.take() {
            timer.abort();
        }
        let outcome = OrderOutcome {
            client_order_id: id.to_string(),
            final_state: next,
            total_filled: handle.total_filled,
            avg_fill_price: handle.avg_fill_price(),
            reason: reason.clone(),
        };
        handle.outcome = Some(outcome.clone());

        if next == OrderState::Filled {
            if let Some(cb) = &handle.options.on_complete {
                out.complete = Some((cb.clone(), outcome.clone()));
            }
        } else if let Some(cb) = &handle.options.on_cancel {
            out.cancel = Some((cb.clone(), reason.unwrap_or_default()));
        }
        out.settle = Some((std::mem::take(&mut handle.waiters), outcome));
    }

    fn run(id: &str, dispatch: Dispatch) {
        if let Some((cb, update)) = dispatch.fill {
            Self::isolate(id, "on_fill", || cb(&update));
        }
        if let Some((cb, outcome)) = dispatch.complete {
            Self::isolate(id, "on_complete", || cb(&outcome));
        }
        if let Some((cb, reason)) = dispatch.cancel {
            Self::isolate(id, "on_cancel", || cb(&reason));
        }
        if let Some((waiters, outcome)) = dispatch.settle {
            for waiter in waiters {
                let _ = waiter.send(Ok(outcome.clone()));
            }
        }
    }

    fn isolate(id: &str, callback: &str, f: impl FnOnce()) {
        if let Err(payload) = catch_unwind(AssertUnwindSafe(f)) {
            warn!(
                order_id = %id,
                callback = callback,
                panic = %panic_message(payload.as_ref()),
                "Order callback panicked"
            );
        }
    }

    pub fn mark_open(&self, id: &str) -> Result<Transition, TrackerError> {
        self.handle_event(id, OrderEvent::Opened)
    }

    pub fn record_partial_fill(
        &self,
        id: &str,
        size: f64,
        price: f64,
    ) -> Result<Transition, TrackerError> {
        self.handle_event(id, OrderEvent::PartialFill { size, price })
    }

    pub fn record_fill(&self, id: &str, size: f64, price: f64) -> Result<Transition, TrackerError> {
        self.handle_event(id, OrderEvent::Filled { size, price })
    }

    pub fn mark_cancelled(&self, id: &str, reason: &str) -> Result<Transition, TrackerError> {
        self.handle_event(
            id,
            OrderEvent::Cancelled {
                reason: reason.to_string(),
            },
        )
    }

    pub fn mark_rejected(&self, id: &str, reason: &str) -> Result<Transition, TrackerError> {
        warn!(order_id = %id, reason = reason, "Order rejected");
        self.handle_event(
            id,
            OrderEvent::Rejected {
                reason: reason.to_string(),
            },
        )
    }

    pub fn mark_expired(&self, id: &str) -> Result<Transition, TrackerError> {
        self.handle_event(id, OrderEvent::Expired)
    }

    /// Resolves once the order reaches a terminal state.
    ///
    /// The waiter is registered when this is called, not when first polled.
    pub fn wait_for_order(
        &self,
        id: &str,
    ) -> impl Future<Output = Result<OrderOutcome, TrackerError>> + Send + 'static {
        let registered = self.register_waiter(id);
        async move {
            match registered {
                Ok(rx) => rx.await.unwrap_or(Err(TrackerError::Disposed)),
                Err(e) => Err(e),
            }
        }
    }

    fn register_waiter(
        &self,
        id: &str,
    ) -> Result<oneshot::Receiver<Result<OrderOutcome, TrackerError>>, TrackerError> {
        let mut inner = self.lock();
        if inner.disposed {
            return Err(TrackerError::Disposed);
        }
        let handle = inner
            .handles
            .get_mut(id)
            .ok_or_else(|| TrackerError::NotFound(id.to_string()))?;
        let (tx, rx) = oneshot::channel();
        match &handle.outcome {
            Some(outcome) => {
                let _ = tx.send(Ok(outcome.clone()));
            }
            None => handle.waiters.push(tx),
        }
        Ok(rx)
    }

    pub fn get(&self, id: &str) -> Option<PendingOrder> {
        self.lock().registry.get(id).cloned()
    }

    /// Accumulated fill size and size-weighted average price.
    pub fn fill_summary(&self, id: &str) -> Option<(f64, Option<f64>)> {
        self.lock()
            .handles
            .get(id)
            .map(|h| (h.total_filled, h.avg_fill_price()))
    }

    pub fn set_exchange_order_id(&self, id: &str, exchange_order_id: &str) -> bool {
        self.lock()
            .registry
            .update_exchange_order_id(id, exchange_order_id)
    }

    pub fn by_market(&self, condition_id: &str) -> Vec<PendingOrder> {
        self.lock()
            .registry
            .by_market(condition_id)
            .into_iter()
            .cloned()
            .collect()
    }

    pub fn active_count(&self) -> usize {
        self.lock().registry.active_count()
    }

    pub fn active_by_market(&self) -> HashMap<String, usize> {
        self.lock().registry.active_by_market()
    }

    /// Evict orders terminal for at least `ttl_ms`, along with their handles.
    pub fn cleanup(&self, ttl_ms: i64) -> usize {
        let mut inner = self.lock();
        let removed = inner.registry.cleanup(ttl_ms);
        if removed > 0 {
            let Inner {
                registry, handles, ..
            } = &mut *inner;
            handles.retain(|id, _| registry.contains(id));
        }
        removed
    }

    /// Reject every outstanding waiter and stop every timer.
    pub fn dispose(&self) {
        let waiters: Vec<Waiter> = {
            let mut inner = self.lock();
            if inner.disposed {
                return;
            }
            inner.disposed = true;
            inner
                .handles
                .values_mut()
                .flat_map(|handle| {
                    if let Some(timer) = handle.timer.take() {
                        timer.abort();
                    }
                    std::mem::take(&mut handle.waiters)
                })
                .collect()
        };
        debug!(waiters = waiters.len(), "Order tracker disposed");
        for waiter in waiters {
            let _ = waiter.send(Err(TrackerError::Disposed));
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.lock().disposed
    }
}

impl Default for OrderTracker {
    fn default() -> Self {
        Self::new(OrderRegistry::new())
    }
}
