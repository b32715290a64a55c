//! Static risk thresholds for the fleet.
//!
//! Limits are read once at startup from configuration and never change at
//! runtime. [`GlobalLimits`] applies to the aggregate; [`PerUnitLimits`]
//! applies to every trading unit uniformly.

use std::time::Duration;

/// Fleet-wide thresholds and assessment periods.
#[derive(Debug, Clone)]
pub struct GlobalLimits {
    /// Maximum tolerable realized loss for the current day, in USD. The
    /// global scope is halted when daily PnL falls below the negation of
    /// this value.
    pub max_daily_loss_usd: f64,
    /// Period of the PnL snapshot assessment.
    pub snapshot_period: Duration,
    /// Period of the velocity counter cleanup pass.
    pub velocity_cleanup_period: Duration,
    /// Period of the reconciliation cycle.
    pub reconciliation_period: Duration,
}

impl Default for GlobalLimits {
    fn default() -> Self {
        Self {
            max_daily_loss_usd: 5_000.0,
            snapshot_period: Duration::from_secs(60),
            velocity_cleanup_period: Duration::from_secs(300),
            reconciliation_period: Duration::from_secs(3_600),
        }
    }
}

/// Thresholds applied to each trading unit independently.
#[derive(Debug, Clone)]
pub struct PerUnitLimits {
    /// Maximum drawdown from peak, in percent (reserved for future use).
    pub max_drawdown_pct: f64,
    /// Maximum daily loss as a percentage of nominal equity.
    pub max_daily_loss_pct: f64,
    /// Maximum orders one unit may submit per minute.
    pub max_orders_per_minute: u32,
    /// Maximum orders one unit may submit per hour.
    pub max_orders_per_hour: u32,
    /// Maximum position size per unit, in notional units (reserved for the
    /// position reconciliation collaborator).
    pub max_position_size: f64,
}

impl Default for PerUnitLimits {
    fn default() -> Self {
        Self {
            max_drawdown_pct: 10.0,
            max_daily_loss_pct: 5.0,
            max_orders_per_minute: 10,
            max_orders_per_hour: 200,
            max_position_size: 1_000.0,
        }
    }
}
