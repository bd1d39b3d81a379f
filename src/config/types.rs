//! Configuration sections

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct BotConfig {
    /// Version tag for logs and journals
    pub tag: String,
    /// Scheduler period in milliseconds
    pub tick_interval_ms: u64,
    /// Stop after this many ticks (0 = run until Ctrl-C)
    pub max_ticks: u64,
    /// Emit JSON logs instead of pretty output
    pub json_logs: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineSection {
    pub warm_up_ticks: u32,
    pub idempotency_ttl_ms: i64,
    pub order_ttl_ms: i64,
    /// Order timeout in milliseconds (0 = none)
    pub order_timeout_ms: u64,
    /// Slippage warning threshold in bps (0 = disabled)
    pub max_slippage_bps: f64,
    pub event_capacity: usize,
    /// Feed silence before entries are skipped (0 = no watchdog)
    pub stale_after_ms: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GuardsConfig {
    /// standard | conservative | permissive | custom
    pub preset: String,
    /// The limits below are only read by the `custom` preset; 0 disables a guard
    pub max_open_positions: usize,
    pub max_exposure_usdc: f64,
    pub min_balance_usdc: f64,
    pub daily_loss_limit_usdc: f64,
    pub max_spread: f64,
    pub no_pending_orders: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExitsConfig {
    /// standard | scalper | hold_to_expiry | custom
    pub preset: String,
    /// The thresholds below are only read by the `custom` preset; 0 disables
    pub take_profit_roi: f64,
    pub stop_loss: f64,
    pub time_exit_secs: i64,
    pub emergency_max_spread: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PersistenceConfig {
    /// Data directory
    pub data_dir: String,
    /// Write the JSON-lines decision journal
    pub journal_enabled: bool,
    /// Write closed trades to CSV
    pub csv_enabled: bool,
}

/// Synthetic market used by the paper session
#[derive(Debug, Clone, Deserialize)]
pub struct DemoConfig {
    /// Number of binary markets to simulate
    pub markets: usize,
    /// Shares per entry
    pub order_size: f64,
    /// Enter when a token trades this far below fair value (0.5)
    pub entry_edge: f64,
    /// Per-tick price noise (standard deviation)
    pub volatility: f64,
    /// Market lifetime in seconds
    pub market_duration_secs: i64,
    /// RNG seed for reproducible sessions (0 = random)
    pub seed: u64,
}
