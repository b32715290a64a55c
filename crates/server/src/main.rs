//! FleetGuard server binary.
//!
//! Entry point for the risk-control plane. Loads configuration,
//! initializes tracing, wires the governor to its collaborators, starts
//! the three assessment schedules, and serves the control API.

mod server;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;

use fg_control::{
    GlobalLimits, JsonlAuditSink, JsonlTradeLedger, PerUnitLimits, RiskGovernor,
    StaticUnitRegistry, Supervisor,
};
use fg_core::config::AppConfig;
use fg_core::types::UnitId;

/// FleetGuard risk-control plane
#[derive(Parser, Debug)]
#[command(name = "fg-server", about = "FleetGuard risk-control plane")]
struct Args {
    /// Path to TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = AppConfig::load(args.config)?;

    fg_core::logging::init_tracing(true);

    tracing::info!(
        units = ?config.fleet.units,
        max_daily_loss_usd = config.limits.max_daily_loss_usd,
        bind = %config.server.bind_addr,
        "starting fleetguard"
    );

    let global_limits = GlobalLimits {
        max_daily_loss_usd: config.limits.max_daily_loss_usd,
        snapshot_period: Duration::from_secs(config.schedule.snapshot_secs),
        velocity_cleanup_period: Duration::from_secs(config.schedule.velocity_cleanup_secs),
        reconciliation_period: Duration::from_secs(config.schedule.reconciliation_secs),
    };
    let unit_limits = PerUnitLimits {
        max_drawdown_pct: config.unit_limits.max_drawdown_pct,
        max_daily_loss_pct: config.unit_limits.max_daily_loss_pct,
        max_orders_per_minute: config.unit_limits.max_orders_per_minute,
        max_orders_per_hour: config.unit_limits.max_orders_per_hour,
        max_position_size: config.unit_limits.max_position_size,
    };

    let audit = Arc::new(JsonlAuditSink::new(config.audit.journal_path.clone())?);
    let trade_ledger = Arc::new(JsonlTradeLedger::new(config.ledger.fills_path.clone()));
    let registry = Arc::new(StaticUnitRegistry::new(
        config.fleet.units.iter().cloned().map(UnitId::new).collect(),
    ));

    let governor = Arc::new(RiskGovernor::new(
        global_limits,
        unit_limits,
        config.fleet.nominal_equity_usd,
        trade_ledger,
        registry,
        audit,
    ));

    let mut supervisor = Supervisor::new(governor.clone());
    supervisor.start();

    let cancel = CancellationToken::new();
    let server_governor = governor.clone();
    let server_cancel = cancel.clone();
    let bind_addr = config.server.bind_addr.clone();
    let server_task = tokio::spawn(async move {
        if let Err(err) = server::run_server(server_governor, &bind_addr, server_cancel).await {
            tracing::error!(error = %err, "control API server failed");
        }
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received SIGINT, shutting down");
        }
        _ = cancel.cancelled() => {
            tracing::info!("cancellation token triggered");
        }
    }

    cancel.cancel();
    supervisor.stop().await;
    let _ = server_task.await;

    tracing::info!("fleetguard stopped");
    Ok(())
}
