//! Layered configuration for the FleetGuard control plane.
//!
//! Configuration is loaded in layers with increasing priority:
//! 1. Compiled-in defaults (conservative limits, localhost bind address)
//! 2. TOML configuration file (if provided)
//! 3. Environment variable overrides (prefix `FG_`, nested with `__`)
//!
//! All risk thresholds are static: they are read once at startup and never
//! mutated at runtime. Operators change limits by editing configuration and
//! restarting the process.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;

// ── Default value functions ────────────────────────────────────────────

/// Default fleet-wide daily loss limit: 5 000 USD.
fn default_max_daily_loss_usd() -> f64 {
    5_000.0
}

/// Default per-unit drawdown limit: 10 %.
fn default_max_drawdown_pct() -> f64 {
    10.0
}

/// Default per-unit daily loss limit: 5 % of nominal equity.
fn default_max_daily_loss_pct() -> f64 {
    5.0
}

/// Default per-unit order rate: 10 orders per minute.
fn default_max_orders_per_minute() -> u32 {
    10
}

/// Default per-unit order rate: 200 orders per hour.
fn default_max_orders_per_hour() -> u32 {
    200
}

/// Default per-unit position size limit: 1 000 units of notional.
fn default_max_position_size() -> f64 {
    1_000.0
}

/// Default PnL snapshot period: 60 s.
fn default_snapshot_secs() -> u64 {
    60
}

/// Default velocity cleanup period: 5 min.
fn default_velocity_cleanup_secs() -> u64 {
    300
}

/// Default reconciliation period: 1 h.
fn default_reconciliation_secs() -> u64 {
    3_600
}

/// Default nominal equity per unit: 100 000 USD.
fn default_nominal_equity_usd() -> f64 {
    100_000.0
}

/// Default audit journal path.
fn default_audit_journal_path() -> PathBuf {
    PathBuf::from("data/audit.jsonl")
}

/// Default trade-ledger fills path.
fn default_fills_path() -> PathBuf {
    PathBuf::from("data/fills.jsonl")
}

/// Default HTTP bind address.
fn default_bind_addr() -> String {
    "127.0.0.1:8080".to_string()
}

// ── Configuration structs ──────────────────────────────────────────────

/// Top-level application configuration.
///
/// Aggregates fleet-wide limits, per-unit limits, assessment schedules,
/// the fleet roster, and the audit/ledger/server settings into a single
/// loadable unit.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Fleet-wide risk limits.
    pub limits: LimitsConfig,
    /// Per-unit risk limits, applied to every unit uniformly.
    pub unit_limits: UnitLimitsConfig,
    /// Periods of the three background assessments.
    pub schedule: ScheduleConfig,
    /// Fleet roster and equity assumptions.
    pub fleet: FleetConfig,
    /// Audit journal settings.
    pub audit: AuditConfig,
    /// Trade-ledger settings.
    pub ledger: LedgerConfig,
    /// HTTP server settings.
    pub server: ServerConfig,
}

/// Fleet-wide risk limits.
#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    /// Maximum tolerable realized loss for the current day, in USD.
    /// A global halt is triggered when daily PnL falls below the negation
    /// of this value.
    #[serde(default = "default_max_daily_loss_usd")]
    pub max_daily_loss_usd: f64,
}

/// Per-unit risk limits.
#[derive(Debug, Clone, Deserialize)]
pub struct UnitLimitsConfig {
    /// Maximum drawdown from peak, in percent (reserved).
    #[serde(default = "default_max_drawdown_pct")]
    pub max_drawdown_pct: f64,
    /// Maximum daily loss as a percentage of nominal equity.
    #[serde(default = "default_max_daily_loss_pct")]
    pub max_daily_loss_pct: f64,
    /// Maximum orders one unit may submit per minute.
    #[serde(default = "default_max_orders_per_minute")]
    pub max_orders_per_minute: u32,
    /// Maximum orders one unit may submit per hour.
    #[serde(default = "default_max_orders_per_hour")]
    pub max_orders_per_hour: u32,
    /// Maximum position size per unit (notional units).
    #[serde(default = "default_max_position_size")]
    pub max_position_size: f64,
}

/// Periods of the three independent background assessments.
#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleConfig {
    /// PnL snapshot period in seconds.
    #[serde(default = "default_snapshot_secs")]
    pub snapshot_secs: u64,
    /// Velocity counter cleanup period in seconds.
    #[serde(default = "default_velocity_cleanup_secs")]
    pub velocity_cleanup_secs: u64,
    /// Reconciliation period in seconds.
    #[serde(default = "default_reconciliation_secs")]
    pub reconciliation_secs: u64,
}

/// Fleet roster and equity assumptions.
#[derive(Debug, Clone, Deserialize)]
pub struct FleetConfig {
    /// Unit ids of the deployed fleet. Used by the static unit registry;
    /// deployments with a live orchestrator replace that collaborator.
    #[serde(default)]
    pub units: Vec<String>,
    /// Nominal equity per unit, in USD. The base for per-unit
    /// loss-percentage calculations; deliberately a fixed figure rather
    /// than live account equity.
    #[serde(default = "default_nominal_equity_usd")]
    pub nominal_equity_usd: f64,
}

/// Audit journal settings.
#[derive(Debug, Clone, Deserialize)]
pub struct AuditConfig {
    /// Path of the append-only JSON-lines audit journal.
    #[serde(default = "default_audit_journal_path")]
    pub journal_path: PathBuf,
}

/// Trade-ledger settings.
#[derive(Debug, Clone, Deserialize)]
pub struct LedgerConfig {
    /// Path of the JSON-lines fills file written by the execution layer.
    #[serde(default = "default_fills_path")]
    pub fills_path: PathBuf,
}

/// HTTP server settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address for the control API (`host:port`).
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

impl AppConfig {
    /// Load configuration using layered sources.
    ///
    /// 1. Compiled-in conservative defaults.
    /// 2. TOML file at `config_path` (if `Some`).
    /// 3. Environment variable overrides with prefix `FG_` and `__` as the
    ///    nesting separator (e.g., `FG_LIMITS__MAX_DAILY_LOSS_USD=2500`).
    ///
    /// After loading, validates that the limits are internally coherent.
    pub fn load(config_path: Option<PathBuf>) -> Result<Self> {
        let mut builder = Config::builder()
            // ── Layer 1: compiled-in defaults ───────────────────────
            .set_default("limits.max_daily_loss_usd", 5_000.0)?
            .set_default("unit_limits.max_drawdown_pct", 10.0)?
            .set_default("unit_limits.max_daily_loss_pct", 5.0)?
            .set_default("unit_limits.max_orders_per_minute", 10i64)?
            .set_default("unit_limits.max_orders_per_hour", 200i64)?
            .set_default("unit_limits.max_position_size", 1_000.0)?
            .set_default("schedule.snapshot_secs", 60i64)?
            .set_default("schedule.velocity_cleanup_secs", 300i64)?
            .set_default("schedule.reconciliation_secs", 3_600i64)?
            .set_default("fleet.units", Vec::<String>::new())?
            .set_default("fleet.nominal_equity_usd", 100_000.0)?
            .set_default("audit.journal_path", "data/audit.jsonl")?
            .set_default("ledger.fills_path", "data/fills.jsonl")?
            .set_default("server.bind_addr", "127.0.0.1:8080")?;

        // ── Layer 2: TOML file ─────────────────────────────────────
        if let Some(path) = config_path {
            let path_str = path.to_str().context("config path is not valid UTF-8")?;
            builder = builder.add_source(File::with_name(path_str).required(true));
        }

        // ── Layer 3: env var overrides (FG_ prefix) ────────────────
        // The prefix separator must be set explicitly to `_` because the
        // `config` crate defaults it to the nesting separator when one is
        // provided. Without this, `FG_LIMITS__MAX_DAILY_LOSS_USD` would be
        // matched against prefix `fg__` (double underscore) instead of
        // `fg_` (single underscore).
        builder = builder.add_source(
            Environment::with_prefix("FG")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let cfg: AppConfig = builder
            .build()
            .context("failed to build configuration")?
            .try_deserialize()
            .context("failed to deserialize configuration")?;

        cfg.validate()?;

        Ok(cfg)
    }

    /// Validate configuration invariants.
    fn validate(&self) -> Result<()> {
        if self.limits.max_daily_loss_usd <= 0.0 {
            bail!("limits.max_daily_loss_usd must be positive");
        }
        if self.unit_limits.max_daily_loss_pct <= 0.0 || self.unit_limits.max_daily_loss_pct > 100.0
        {
            bail!("unit_limits.max_daily_loss_pct must be in (0, 100]");
        }
        if self.unit_limits.max_drawdown_pct <= 0.0 || self.unit_limits.max_drawdown_pct > 100.0 {
            bail!("unit_limits.max_drawdown_pct must be in (0, 100]");
        }
        if self.unit_limits.max_orders_per_minute == 0 {
            bail!("unit_limits.max_orders_per_minute must be at least 1");
        }
        if self.unit_limits.max_orders_per_hour < self.unit_limits.max_orders_per_minute {
            bail!("unit_limits.max_orders_per_hour must be >= max_orders_per_minute");
        }
        if self.fleet.nominal_equity_usd <= 0.0 {
            bail!("fleet.nominal_equity_usd must be positive");
        }
        if self.schedule.snapshot_secs == 0
            || self.schedule.velocity_cleanup_secs == 0
            || self.schedule.reconciliation_secs == 0
        {
            bail!("schedule periods must be at least 1 second");
        }
        Ok(())
    }
}
