//! Configuration management for polycore
//!
//! Defaults, then `config/default.*` and `config/local.*`, then `POLYCORE__*`
//! environment variables (`.env` is loaded first).

mod types;

pub use types::*;

use anyhow::{anyhow, Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;

use crate::engine::EngineConfig;
use crate::execution::{PaperExecutorConfig, RetryConfig};
use crate::fees::FeeModel;
use crate::pipeline::{
    DailyLossLimit, EmergencyExit, ExitPipeline, GuardPipeline, MaxExposure, MaxOpenPositions,
    MaxSpread, MinBalance, NoPendingOrders, StopLoss, TakeProfit, TimeExit,
};

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub bot: BotConfig,
    pub engine: EngineSection,
    pub retry: RetryConfig,
    pub guards: GuardsConfig,
    pub exits: ExitsConfig,
    pub fees: FeeModel,
    pub paper: PaperExecutorConfig,
    pub persistence: PersistenceConfig,
    pub demo: DemoConfig,
}

impl AppConfig {
    /// Load configuration from file and environment
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_builder(
            Self::defaults()?
                .add_source(File::with_name("config/default").required(false))
                .add_source(File::with_name("config/local").required(false))
                .add_source(Environment::with_prefix("POLYCORE").separator("__")),
        )
    }

    /// Built-in defaults only; no files, no environment.
    pub fn defaults_only() -> Result<Self> {
        Self::from_builder(Self::defaults()?)
    }

    fn from_builder(builder: config::ConfigBuilder<config::builder::DefaultState>) -> Result<Self> {
        let config = builder.build().context("Failed to build configuration")?;
        let app_config: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;
        Ok(app_config)
    }

    fn defaults() -> Result<config::ConfigBuilder<config::builder::DefaultState>> {
        let builder = Config::builder()
            .set_default("bot.tag", env!("CARGO_PKG_VERSION"))?
            .set_default("bot.tick_interval_ms", 1000)?
            .set_default("bot.max_ticks", 0)?
            .set_default("bot.json_logs", false)?
            // Engine defaults
            .set_default("engine.warm_up_ticks", 3)?
            .set_default("engine.idempotency_ttl_ms", 30_000)?
            .set_default("engine.order_ttl_ms", 300_000)?
            .set_default("engine.order_timeout_ms", 0)?
            .set_default("engine.max_slippage_bps", 50.0)?
            .set_default("engine.event_capacity", 1024)?
            .set_default("engine.stale_after_ms", 10_000)?
            // Retry defaults
            .set_default("retry.max_attempts", 3)?
            .set_default("retry.base_delay_ms", 200)?
            .set_default("retry.max_delay_ms", 5000)?
            .set_default("retry.jitter_factor", 0.2)?
            // Guard defaults
            .set_default("guards.preset", "standard")?
            .set_default("guards.max_open_positions", 1)?
            .set_default("guards.max_exposure_usdc", 0.0)?
            .set_default("guards.min_balance_usdc", 10.0)?
            .set_default("guards.daily_loss_limit_usdc", 50.0)?
            .set_default("guards.max_spread", 0.0)?
            .set_default("guards.no_pending_orders", true)?
            // Exit defaults
            .set_default("exits.preset", "standard")?
            .set_default("exits.take_profit_roi", 0.20)?
            .set_default("exits.stop_loss", 0.15)?
            .set_default("exits.time_exit_secs", 60)?
            .set_default("exits.emergency_max_spread", 0.0)?
            // Fee defaults
            .set_default("fees.coefficient", crate::fees::DEFAULT_FEE_COEFFICIENT)?
            // Paper executor defaults
            .set_default("paper.initial_balance", 1000.0)?
            .set_default("paper.slippage_bps", 5.0)?
            .set_default("paper.failure_rate", 0.0)?
            // Persistence defaults
            .set_default("persistence.data_dir", "./data")?
            .set_default("persistence.journal_enabled", true)?
            .set_default("persistence.csv_enabled", true)?
            // Demo market defaults
            .set_default("demo.markets", 2)?
            .set_default("demo.order_size", 10.0)?
            .set_default("demo.entry_edge", 0.04)?
            .set_default("demo.volatility", 0.01)?
            .set_default("demo.market_duration_secs", 900)?
            .set_default("demo.seed", 0)?;
        Ok(builder)
    }

    /// Engine settings; zero timeouts and thresholds mean "off".
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            warm_up_ticks: self.engine.warm_up_ticks,
            idempotency_ttl_ms: self.engine.idempotency_ttl_ms,
            order_ttl_ms: self.engine.order_ttl_ms,
            order_timeout_ms: (self.engine.order_timeout_ms > 0)
                .then_some(self.engine.order_timeout_ms),
            max_slippage_bps: (self.engine.max_slippage_bps > 0.0)
                .then_some(self.engine.max_slippage_bps),
            event_capacity: self.engine.event_capacity,
            retry: self.retry.clone(),
            fees: self.fees,
        }
    }

    pub fn guard_pipeline(&self) -> Result<GuardPipeline> {
        let g = &self.guards;
        if g.preset != "custom" {
            return GuardPipeline::preset(&g.preset)
                .ok_or_else(|| anyhow!("unknown guard preset '{}'", g.preset));
        }

        let mut pipeline = GuardPipeline::new();
        if g.max_open_positions > 0 {
            pipeline = pipeline.with(MaxOpenPositions::new(g.max_open_positions));
        }
        if g.max_exposure_usdc > 0.0 {
            pipeline = pipeline.with(MaxExposure::new(g.max_exposure_usdc));
        }
        if g.min_balance_usdc > 0.0 {
            pipeline = pipeline.with(MinBalance::new(g.min_balance_usdc));
        }
        if g.daily_loss_limit_usdc > 0.0 {
            pipeline = pipeline.with(DailyLossLimit::new(g.daily_loss_limit_usdc));
        }
        if g.max_spread > 0.0 {
            pipeline = pipeline.with(MaxSpread::new(g.max_spread));
        }
        if g.no_pending_orders {
            pipeline = pipeline.with(NoPendingOrders);
        }
        Ok(pipeline)
    }

    pub fn exit_pipeline(&self) -> Result<ExitPipeline> {
        let e = &self.exits;
        if e.preset != "custom" {
            return ExitPipeline::preset(&e.preset)
                .ok_or_else(|| anyhow!("unknown exit preset '{}'", e.preset));
        }

        let emergency = if e.emergency_max_spread > 0.0 {
            EmergencyExit::new().with_max_spread(e.emergency_max_spread)
        } else {
            EmergencyExit::new()
        };
        let mut pipeline = ExitPipeline::new().with(emergency);
        if e.stop_loss > 0.0 {
            pipeline = pipeline.with(StopLoss::new(e.stop_loss));
        }
        if e.take_profit_roi > 0.0 {
            pipeline = pipeline.with(TakeProfit::new(e.take_profit_roi));
        }
        if e.time_exit_secs > 0 {
            pipeline = pipeline.with(TimeExit::new(e.time_exit_secs));
        }
        Ok(pipeline)
    }

    /// Generate a digest of the config for logging
    pub fn digest(&self) -> String {
        format!(
            "bot={} tick={}ms warm_up={} guards={} exits={} retry={}x{}ms balance={:.2}",
            self.bot.tag,
            self.bot.tick_interval_ms,
            self.engine.warm_up_ticks,
            self.guards.preset,
            self.exits.preset,
            self.retry.max_attempts,
            self.retry.base_delay_ms,
            self.paper.initial_balance
        )
    }
}

impl std::fmt::Display for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.digest())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_deserialize() {
        let cfg = AppConfig::defaults_only().unwrap();
        assert_eq!(cfg.engine.warm_up_ticks, 3);
        assert_eq!(cfg.retry.max_attempts, 3);
        assert_eq!(cfg.paper.initial_balance, 1000.0);
        assert!(cfg.persistence.journal_enabled);
        assert!(cfg.digest().contains("guards=standard"));
    }

    #[test]
    fn zero_values_switch_engine_options_off() {
        let mut cfg = AppConfig::defaults_only().unwrap();
        let engine = cfg.engine_config();
        assert_eq!(engine.order_timeout_ms, None);
        assert_eq!(engine.max_slippage_bps, Some(50.0));

        cfg.engine.max_slippage_bps = 0.0;
        cfg.engine.order_timeout_ms = 2_500;
        let engine = cfg.engine_config();
        assert_eq!(engine.max_slippage_bps, None);
        assert_eq!(engine.order_timeout_ms, Some(2_500));
    }

    #[test]
    fn presets_resolve_by_name() {
        let mut cfg = AppConfig::defaults_only().unwrap();
        assert_eq!(cfg.guard_pipeline().unwrap().len(), 4);
        assert_eq!(cfg.exit_pipeline().unwrap().len(), 4);

        cfg.guards.preset = "yolo".to_string();
        assert!(cfg.guard_pipeline().is_err());
        cfg.exits.preset = "hold_to_expiry".to_string();
        assert_eq!(cfg.exit_pipeline().unwrap().names(), vec!["emergency".to_string()]);
    }

    #[test]
    fn custom_presets_skip_disabled_limits() {
        let mut cfg = AppConfig::defaults_only().unwrap();
        cfg.guards.preset = "custom".to_string();
        cfg.guards.max_spread = 0.05;
        cfg.guards.no_pending_orders = false;
        // max_open_positions, min_balance, daily_loss, max_spread
        assert_eq!(cfg.guard_pipeline().unwrap().len(), 4);

        cfg.exits.preset = "custom".to_string();
        cfg.exits.time_exit_secs = 0;
        assert_eq!(cfg.exit_pipeline().unwrap().len(), 3);
    }
}
