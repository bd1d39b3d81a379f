//! Simulated executor.
//!
//! Every order fills immediately at the requested price moved against the
//! trader by `slippage_bps`, with the taker fee curve applied. An optional
//! transient failure rate exercises the retry path.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tracing::{debug, info};

use super::Executor;
use crate::error::ExecError;
use crate::fees::FeeModel;
use crate::orders::OrderState;
use crate::types::{OrderIntent, OrderResult, OrderSide};

#[derive(Debug, Clone, Deserialize)]
pub struct PaperExecutorConfig {
    /// Starting virtual balance (USDC)
    pub initial_balance: f64,
    /// Simulated slippage in basis points (e.g., 5 = 0.05%)
    pub slippage_bps: f64,
    /// Probability in [0, 1] that a submit fails with a transport error
    pub failure_rate: f64,
}

impl Default for PaperExecutorConfig {
    fn default() -> Self {
        Self {
            initial_balance: 1000.0,
            slippage_bps: 5.0,
            failure_rate: 0.0,
        }
    }
}

pub struct PaperExecutor {
    config: PaperExecutorConfig,
    fees: FeeModel,
    balance: Mutex<f64>,
    next_id: AtomicU64,
}

impl PaperExecutor {
    pub fn new(config: PaperExecutorConfig) -> Self {
        Self {
            balance: Mutex::new(config.initial_balance),
            config,
            fees: FeeModel::default(),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn with_fee_model(mut self, fees: FeeModel) -> Self {
        self.fees = fees;
        self
    }

    pub fn balance(&self) -> f64 {
        *self.balance.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn fill_price(&self, intent: &OrderIntent) -> f64 {
        let slippage_mult = self.config.slippage_bps / 10_000.0;
        let price = match intent.side {
            OrderSide::Buy => intent.price * (1.0 + slippage_mult),
            OrderSide::Sell => intent.price * (1.0 - slippage_mult),
        };
        price.clamp(0.01, 0.99)
    }
}

#[async_trait]
impl Executor for PaperExecutor {
    async fn submit(&self, intent: &OrderIntent) -> Result<OrderResult, ExecError> {
        intent.validate()?;

        if self.config.failure_rate > 0.0 && rand::random::<f64>() < self.config.failure_rate {
            debug!(token_id = %intent.token_id, "Simulated transport failure");
            return Err(ExecError::Transport("simulated connection reset".to_string()));
        }

        let fill_price = self.fill_price(intent);
        let notional = fill_price * intent.size;
        let fee = self.fees.fee(fill_price, intent.size);

        {
            let mut balance = self.balance.lock().unwrap_or_else(|p| p.into_inner());
            match intent.side {
                OrderSide::Buy => {
                    if *balance < notional + fee {
                        return Err(ExecError::InsufficientBalance(format!(
                            "need {:.2}, have {:.2}",
                            notional + fee,
                            *balance
                        )));
                    }
                    *balance -= notional + fee;
                }
                OrderSide::Sell => *balance += notional - fee,
            }
        }

        let n = self.next_id.fetch_add(1, Ordering::Relaxed);
        let client_order_id = uuid::Uuid::new_v4().to_string();
        info!(
            token_id = %intent.token_id,
            side = %intent.side,
            size = intent.size,
            requested = intent.price,
            fill_price = fill_price,
            fee = fee,
            "📝 [PAPER] Order filled"
        );

        Ok(OrderResult {
            client_order_id,
            exchange_order_id: Some(format!("paper-{}", n)),
            final_state: OrderState::Filled,
            total_filled: intent.size,
            avg_fill_price: Some(fill_price),
            trade_id: Some(format!("paper-trade-{}", n)),
            fee: Some(fee),
        })
    }

    async fn cancel(&self, client_order_id: &str) -> Result<(), ExecError> {
        // Paper orders fill on submit; nothing is ever resting.
        Err(ExecError::OrderNotFound(client_order_id.to_string()))
    }
}
