//! polycore
//!
//! Tick-driven execution core for Polymarket binary-outcome trading:
//! order lifecycle tracking, retrying submission with idempotency, guard and
//! exit pipelines, and the engine that ties them together.

pub mod clock;
pub mod config;
pub mod demo;
pub mod engine;
pub mod error;
pub mod execution;
pub mod fees;
pub mod orders;
pub mod pipeline;
pub mod positions;
pub mod telemetry;
pub mod types;

pub use engine::{EngineConfig, EngineEvent, SignalDetector, TickEngine, TickReport};
pub use error::{Diagnostic, DiagnosticCode, ErrorCategory, ExecError};
pub use execution::{Executor, IdempotencyGuard, RetryingExecutor};
pub use types::{Direction, OrderIntent, OrderResult, OrderSide, Signal, TickContext};
