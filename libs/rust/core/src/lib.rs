//! Core settlement engine for the federated-learning model marketplace.

use anyhow::{ensure, Result};
use once_cell::sync::OnceCell;
use serde::Deserialize;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

static TRACING_INIT: OnceCell<()> = OnceCell::new();

/// Installs the global subscriber once. `RUST_LOG` wins over `default_level`;
/// `FLM_JSON_LOG=1` switches to flattened JSON lines.
pub fn init_tracing(service: &str, default_level: &str) -> Result<()> {
    TRACING_INIT.get_or_try_init(|| -> Result<()> {
        let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
        let json = std::env::var("FLM_JSON_LOG").ok().map(|v| v == "1" || v.eq_ignore_ascii_case("true")).unwrap_or(false);
        let registry = tracing_subscriber::registry().with(env_filter);
        if json {
            registry.with(fmt::layer().json().flatten_event(true).with_current_span(true).with_span_list(false)).try_init()?;
        } else {
            registry.with(fmt::layer().with_target(true).with_thread_ids(false).with_line_number(true)).try_init()?;
        }
        Ok(())
    })?;
    info!(service, "tracing initialized");
    Ok(())
}

#[derive(Debug, Deserialize, Clone)]
pub struct MarketConfig {
    pub service_name: String,
    pub log_level: String,
    pub settlement: SettlementPolicy,
    /// YAML call script replayed by the node at startup.
    pub replay_file: Option<PathBuf>,
}

/// Layers defaults, the optional YAML file named by `FLM_CONFIG_FILE`, and
/// `FLM__*` environment overrides (e.g. `FLM__SETTLEMENT__VALIDATION_BPS`).
/// `FLM_REPLAY_FILE` sets `replay_file` directly.
pub fn load_config(service: &str) -> Result<MarketConfig> {
    let defaults = SettlementPolicy::default();
    let mut builder = config::Config::builder()
        .set_default("service_name", service)?
        .set_default("log_level", "info")?
        .set_default("settlement.validation_bps", defaults.validation_bps as i64)?
        .set_default("settlement.orchestration_bps", defaults.orchestration_bps as i64)?
        .set_default("settlement.contribution_bps", defaults.contribution_bps as i64)?;
    if let Ok(file) = std::env::var("FLM_CONFIG_FILE") {
        builder = builder.add_source(config::File::with_name(&file).required(false));
    }
    builder = builder.add_source(config::Environment::with_prefix("FLM").separator("__"));
    if let Ok(path) = std::env::var("FLM_REPLAY_FILE") {
        builder = builder.set_override("replay_file", path)?;
    }
    let cfg: MarketConfig = builder.build()?.try_deserialize()?;
    ensure!(cfg.settlement.is_valid(), "settlement shares exceed the deposit: {} bps", cfg.settlement.total_bps());
    Ok(cfg)
}

pub mod error;
pub mod lifecycle;
pub mod roles;
pub mod ledger;
pub mod contribution;
pub mod settlement;
pub mod marketplace;
pub mod replay;
mod metrics_ext;

pub use error::{MarketError, MarketResult};
pub use lifecycle::{ModelLifecycle, ModelState};
pub use roles::{Role, RoleRegistry};
pub use ledger::{Iteration, MetricLedger, Mse};
pub use contribution::{calculate_contributions, contribution_percentage, mse_difference, split_percentages, ContributionReport, Percentage, TrainerShare};
pub use settlement::{format_units, parse_units, Amount, Escrow, PaymentKind, Payout, SettlementPolicy, UNIT};
pub use marketplace::{Marketplace, ModelId, ModelRecord};
pub use replay::{parse_script, CallOutcome, MarketCall, TokenAmount};
pub use metrics_ext::{MarketMetrics, MARKET_METRICS};
