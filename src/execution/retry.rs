//! Retry decorator for order submission.
//!
//! Retryable failures back off exponentially with multiplicative jitter;
//! non-retryable ones return at once. Cancels are passed straight through:
//! retrying a cancel could race a fill.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, error, warn};

use super::Executor;
use crate::error::ExecError;
use crate::types::{OrderIntent, OrderResult};

#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// Total submit calls allowed; 0 and 1 both mean a single call
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Relative jitter amplitude (0.2 = +/-20%)
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 200,
            max_delay_ms: 5_000,
            jitter_factor: 0.2,
        }
    }
}

impl RetryConfig {
    /// Delay in ms after a retryable failure on 0-indexed `attempt`, for a
    /// uniform sample `unit` in [0, 1].
    pub fn backoff_delay_ms(&self, attempt: u32, unit: f64) -> f64 {
        let capped = attempt.min(32);
        let exp = (self.base_delay_ms as f64) * 2f64.powi(capped as i32);
        let bounded = exp.min(self.max_delay_ms as f64);
        let jitter_factor = self.jitter_factor.clamp(0.0, 1.0);
        let jitter = 1.0 + (unit.clamp(0.0, 1.0) - 0.5) * 2.0 * jitter_factor;
        bounded * jitter
    }

    /// Backoff delay floored by a server-advised wait.
    pub fn delay_for(&self, attempt: u32, retry_after_ms: Option<u64>, unit: f64) -> Duration {
        let computed = self.backoff_delay_ms(attempt, unit).max(0.0);
        let floored = match retry_after_ms {
            Some(after) => computed.max(after as f64),
            None => computed,
        };
        Duration::from_micros((floored * 1_000.0).round() as u64)
    }
}

pub struct RetryingExecutor<E> {
    inner: E,
    config: RetryConfig,
    jitter_source: Box<dyn Fn() -> f64 + Send + Sync>,
}

impl<E: Executor> RetryingExecutor<E> {
    pub fn new(inner: E, config: RetryConfig) -> Self {
        Self {
            inner,
            config,
            jitter_source: Box::new(rand::random::<f64>),
        }
    }

    /// Replace the uniform [0, 1] sampler used for jitter.
    pub fn with_jitter_source(mut self, source: impl Fn() -> f64 + Send + Sync + 'static) -> Self {
        self.jitter_source = Box::new(source);
        self
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    pub fn inner(&self) -> &E {
        &self.inner
    }
}

#[async_trait]
impl<E: Executor> Executor for RetryingExecutor<E> {
    async fn submit(&self, intent: &OrderIntent) -> Result<OrderResult, ExecError> {
        let mut result = self.inner.submit(intent).await;
        let max_attempts = self.config.max_attempts.max(1);

        for attempt in 1..max_attempts {
            let err = match result {
                Ok(ok) => return Ok(ok),
                Err(e) => e,
            };
            if !err.is_retryable() {
                debug!(token_id = %intent.token_id, error = %err, "Non-retryable submit error");
                return Err(err);
            }

            let delay = self
                .config
                .delay_for(attempt - 1, err.retry_after_ms(), (self.jitter_source)());
            warn!(
                token_id = %intent.token_id,
                attempt = attempt,
                max_attempts = max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Submit failed, retrying with backoff"
            );
            tokio::time::sleep(delay).await;
            result = self.inner.submit(intent).await;
        }

        if let Err(e) = &result {
            error!(
                token_id = %intent.token_id,
                attempts = max_attempts,
                error = %e,
                "Submit failed"
            );
        }
        result
    }

    async fn cancel(&self, client_order_id: &str) -> Result<(), ExecError> {
        self.inner.cancel(client_order_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orders::OrderState;
    use crate::types::{Direction, OrderSide};
    use mockall::{mock, Sequence};

    mock! {
        pub Venue {}

        #[async_trait]
        impl Executor for Venue {
            async fn submit(&self, intent: &OrderIntent) -> Result<OrderResult, ExecError>;
            async fn cancel(&self, client_order_id: &str) -> Result<(), ExecError>;
        }
    }

    fn intent() -> OrderIntent {
        OrderIntent {
            condition_id: "cond".to_string(),
            token_id: "tok".to_string(),
            side: OrderSide::Buy,
            direction: Direction::Up,
            price: 0.5,
            size: 10.0,
        }
    }

    fn filled() -> OrderResult {
        OrderResult {
            client_order_id: "c-1".to_string(),
            exchange_order_id: Some("x-1".to_string()),
            final_state: OrderState::Filled,
            total_filled: 10.0,
            avg_fill_price: Some(0.5),
            trade_id: None,
            fee: None,
        }
    }

    fn config(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            base_delay_ms: 100,
            max_delay_ms: 1_000,
            jitter_factor: 0.5,
        }
    }

    #[test]
    fn jitter_is_symmetric_around_base() {
        let cfg = config(3);
        assert!((cfg.backoff_delay_ms(0, 0.0) - 50.0).abs() < 1e-9);
        assert!((cfg.backoff_delay_ms(0, 1.0) - 150.0).abs() < 1e-9);
        assert!((cfg.backoff_delay_ms(0, 0.5) - 100.0).abs() < 1e-9);
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let cfg = config(10);
        assert!((cfg.backoff_delay_ms(1, 0.5) - 200.0).abs() < 1e-9);
        assert!((cfg.backoff_delay_ms(3, 0.5) - 800.0).abs() < 1e-9);
        assert!((cfg.backoff_delay_ms(4, 0.5) - 1_000.0).abs() < 1e-9);
        assert!((cfg.backoff_delay_ms(40, 0.5) - 1_000.0).abs() < 1e-9);
    }

    #[test]
    fn retry_after_floors_delay() {
        let cfg = config(3);
        assert_eq!(cfg.delay_for(0, Some(2_000), 0.5), Duration::from_millis(2_000));
        assert_eq!(cfg.delay_for(0, Some(10), 0.5), Duration::from_millis(100));
        assert_eq!(cfg.delay_for(0, None, 0.5), Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_or_one_attempts_call_once() {
        for max_attempts in [0, 1] {
            let mut venue = MockVenue::new();
            venue
                .expect_submit()
                .times(1)
                .returning(|_| Err(ExecError::Transport("reset".into())));
            let exec = RetryingExecutor::new(venue, config(max_attempts));
            assert!(exec.submit(&intent()).await.is_err());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_first_success() {
        let mut venue = MockVenue::new();
        let mut seq = Sequence::new();
        venue
            .expect_submit()
            .times(2)
            .in_sequence(&mut seq)
            .returning(|_| Err(ExecError::Timeout { elapsed_ms: 50 }));
        venue
            .expect_submit()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(filled()));

        let exec = RetryingExecutor::new(venue, config(5)).with_jitter_source(|| 0.5);
        let result = exec.submit(&intent()).await;
        tokio_test::assert_ok!(&result);
        assert_eq!(result.unwrap().client_order_id, "c-1");
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_short_circuits() {
        let mut venue = MockVenue::new();
        venue
            .expect_submit()
            .times(1)
            .returning(|_| Err(ExecError::InvalidSize(0.0)));
        let exec = RetryingExecutor::new(venue, config(5));
        let result = exec.submit(&intent()).await;
        assert_eq!(result, Err(ExecError::InvalidSize(0.0)));
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts_with_last_error() {
        let mut venue = MockVenue::new();
        let mut seq = Sequence::new();
        venue
            .expect_submit()
            .times(2)
            .in_sequence(&mut seq)
            .returning(|_| Err(ExecError::Transport("reset".into())));
        venue
            .expect_submit()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(ExecError::ExchangeUnavailable("503".into())));

        let exec = RetryingExecutor::new(venue, config(3));
        let result = exec.submit(&intent()).await;
        assert_eq!(result, Err(ExecError::ExchangeUnavailable("503".into())));
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_waits_at_least_retry_after() {
        let mut venue = MockVenue::new();
        let mut seq = Sequence::new();
        venue
            .expect_submit()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| {
                Err(ExecError::RateLimited {
                    message: "429".into(),
                    retry_after_ms: Some(3_000),
                })
            });
        venue
            .expect_submit()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(filled()));

        let exec = RetryingExecutor::new(venue, config(2)).with_jitter_source(|| 0.0);
        let started = tokio::time::Instant::now();
        tokio_test::assert_ok!(exec.submit(&intent()).await);
        assert!(started.elapsed() >= Duration::from_millis(3_000));
    }

    #[tokio::test]
    async fn cancel_is_never_retried() {
        let mut venue = MockVenue::new();
        venue
            .expect_cancel()
            .times(1)
            .returning(|_| Err(ExecError::Transport("reset".into())));
        let exec = RetryingExecutor::new(venue, config(5));
        tokio_test::assert_err!(exec.cancel("c-1").await);
    }
}
