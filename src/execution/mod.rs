//! Order submission: executor boundary, retry decorator, duplicate suppression
//! and a paper executor.

pub mod idempotency;
pub mod paper;
pub mod retry;

pub use idempotency::{IdempotencyError, IdempotencyGuard};
pub use paper::{PaperExecutor, PaperExecutorConfig};
pub use retry::{RetryConfig, RetryingExecutor};

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::ExecError;
use crate::types::{OrderIntent, OrderResult};

/// Venue adapter. All exchange-specific translation happens behind this trait.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn submit(&self, intent: &OrderIntent) -> Result<OrderResult, ExecError>;

    async fn cancel(&self, client_order_id: &str) -> Result<(), ExecError>;
}

#[async_trait]
impl<E: Executor + ?Sized> Executor for Arc<E> {
    async fn submit(&self, intent: &OrderIntent) -> Result<OrderResult, ExecError> {
        (**self).submit(intent).await
    }

    async fn cancel(&self, client_order_id: &str) -> Result<(), ExecError> {
        (**self).cancel(client_order_id).await
    }
}
