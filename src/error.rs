//! Error taxonomy and diagnostics
//!
//! Executor failures are classified as retryable, domain or fatal. Everything
//! the engine reports ends up as a [`Diagnostic`] with a stable code.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors surfaced by executors and by the submission path
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExecError {
    // Retryable transport / exchange errors
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Request timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    #[error("Rate limited: {message}")]
    RateLimited {
        message: String,
        /// Server-advised wait before the next attempt
        retry_after_ms: Option<u64>,
    },

    #[error("Exchange unavailable: {0}")]
    ExchangeUnavailable(String),

    // Domain errors, never retried
    #[error("Order not found: {0}")]
    OrderNotFound(String),

    #[error("Invalid price: {0}")]
    InvalidPrice(f64),

    #[error("Invalid size: {0}")]
    InvalidSize(f64),

    #[error("Order rejected: {0}")]
    Rejected(String),

    #[error("Insufficient balance: {0}")]
    InsufficientBalance(String),

    #[error("Duplicate intent suppressed: {0}")]
    DuplicateIntent(String),

    // Internal invariant violations
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Executor panicked: {0}")]
    Panicked(String),
}

impl ExecError {
    /// Whether the retrying executor may try again after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ExecError::Transport(_)
                | ExecError::Timeout { .. }
                | ExecError::RateLimited { .. }
                | ExecError::ExchangeUnavailable(_)
        )
    }

    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            ExecError::RateLimited { retry_after_ms, .. } => *retry_after_ms,
            _ => None,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            e if e.is_retryable() => ErrorCategory::Retryable,
            ExecError::Internal(_) | ExecError::Panicked(_) => ErrorCategory::Fatal,
            _ => ErrorCategory::Domain,
        }
    }
}

/// Coarse classification carried by every diagnostic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Transport or exchange hiccup, eligible for backoff
    Retryable,
    /// Bad input or business rule, surfaced immediately
    Domain,
    /// Internal invariant violated
    Fatal,
    /// Degraded but non-failing condition
    Warning,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Retryable => write!(f, "retryable"),
            ErrorCategory::Domain => write!(f, "domain"),
            ErrorCategory::Fatal => write!(f, "fatal"),
            ErrorCategory::Warning => write!(f, "warning"),
        }
    }
}

/// Stable diagnostic codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiagnosticCode {
    EntrySubmitFailed,
    ExitSubmitFailed,
    EntryNotFilled,
    ExitNotFilled,
    ExitPartiallyFilled,
    InvalidIntent,
    DuplicateIntent,
    DetectorThrew,
    GuardThrew,
    ExitPolicyThrew,
    SpotPriceFallback,
    StaleData,
    SlippageWarning,
    JournalWriteFailed,
    OrderTrackingFailed,
    PositionMissing,
}

impl DiagnosticCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiagnosticCode::EntrySubmitFailed => "ENTRY_SUBMIT_FAILED",
            DiagnosticCode::ExitSubmitFailed => "EXIT_SUBMIT_FAILED",
            DiagnosticCode::EntryNotFilled => "ENTRY_NOT_FILLED",
            DiagnosticCode::ExitNotFilled => "EXIT_NOT_FILLED",
            DiagnosticCode::ExitPartiallyFilled => "EXIT_PARTIALLY_FILLED",
            DiagnosticCode::InvalidIntent => "INVALID_INTENT",
            DiagnosticCode::DuplicateIntent => "DUPLICATE_INTENT",
            DiagnosticCode::DetectorThrew => "DETECTOR_THREW",
            DiagnosticCode::GuardThrew => "GUARD_THREW",
            DiagnosticCode::ExitPolicyThrew => "EXIT_POLICY_THREW",
            DiagnosticCode::SpotPriceFallback => "SPOT_PRICE_FALLBACK",
            DiagnosticCode::StaleData => "STALE_DATA",
            DiagnosticCode::SlippageWarning => "SLIPPAGE_WARNING",
            DiagnosticCode::JournalWriteFailed => "JOURNAL_WRITE_FAILED",
            DiagnosticCode::OrderTrackingFailed => "ORDER_TRACKING_FAILED",
            DiagnosticCode::PositionMissing => "POSITION_MISSING",
        }
    }
}

impl fmt::Display for DiagnosticCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured failure report emitted on the event stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub code: DiagnosticCode,
    pub message: String,
    pub category: ErrorCategory,
}

impl Diagnostic {
    pub fn new(code: DiagnosticCode, category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            category,
        }
    }

    pub fn warning(code: DiagnosticCode, message: impl Into<String>) -> Self {
        Self::new(code, ErrorCategory::Warning, message)
    }

    pub fn fatal(code: DiagnosticCode, message: impl Into<String>) -> Self {
        Self::new(code, ErrorCategory::Fatal, message)
    }

    /// Diagnostic for an executor error, keeping its own classification.
    pub fn from_exec(code: DiagnosticCode, err: &ExecError) -> Self {
        Self::new(code, err.category(), err.to_string())
    }

    pub fn is_fatal(&self) -> bool {
        self.category == ErrorCategory::Fatal
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}/{}] {}", self.code, self.category, self.message)
    }
}

/// Render a caught panic payload as text.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(ExecError::Transport("reset".into()).is_retryable());
        assert!(ExecError::Timeout { elapsed_ms: 10 }.is_retryable());
        assert!(!ExecError::OrderNotFound("x".into()).is_retryable());
        assert!(!ExecError::InvalidPrice(0.0).is_retryable());

        assert_eq!(
            ExecError::ExchangeUnavailable("503".into()).category(),
            ErrorCategory::Retryable
        );
        assert_eq!(
            ExecError::Rejected("post-only cross".into()).category(),
            ErrorCategory::Domain
        );
        assert_eq!(
            ExecError::Internal("bad".into()).category(),
            ErrorCategory::Fatal
        );
    }

    #[test]
    fn rate_limit_carries_retry_after() {
        let err = ExecError::RateLimited {
            message: "429".into(),
            retry_after_ms: Some(750),
        };
        assert!(err.is_retryable());
        assert_eq!(err.retry_after_ms(), Some(750));
        assert_eq!(ExecError::Transport("x".into()).retry_after_ms(), None);
    }

    #[test]
    fn codes_serialize_as_stable_strings() {
        let json = serde_json::to_string(&DiagnosticCode::JournalWriteFailed).unwrap();
        assert_eq!(json, "\"JOURNAL_WRITE_FAILED\"");
        assert_eq!(DiagnosticCode::SlippageWarning.as_str(), "SLIPPAGE_WARNING");
    }

    #[test]
    fn panic_payloads_render() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(payload.as_ref()), "owned");
    }
}
