//! Periodic assessment supervisor.
//!
//! Drives the three independent assessments — PnL snapshot, velocity
//! cleanup, and reconciliation — on their own timers. Independent tasks,
//! not one sequential loop: a slow reconciliation run cannot stall the
//! snapshot or the cleanup. Each tick catches and logs its own errors, so
//! one failing job never crashes the process or touches the other two
//! schedules, let alone the admission gate.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::governor::RiskGovernor;

/// Owns the three periodic assessment tasks.
pub struct Supervisor {
    governor: Arc<RiskGovernor>,
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl Supervisor {
    /// Create a supervisor over the governor. No tasks run until
    /// [`start`](Self::start) is called.
    pub fn new(governor: Arc<RiskGovernor>) -> Self {
        Self {
            governor,
            cancel: CancellationToken::new(),
            handles: Vec::new(),
        }
    }

    /// Spawn the three schedules. Calling `start` while already running is
    /// a logged no-op.
    pub fn start(&mut self) {
        if self.governor.is_running() {
            tracing::warn!("supervisor already running, ignoring start");
            return;
        }
        self.cancel = CancellationToken::new();
        self.governor.set_running(true);

        let limits = self.governor.global_limits();
        let snapshot_period = limits.snapshot_period;
        let cleanup_period = limits.velocity_cleanup_period;
        let reconciliation_period = limits.reconciliation_period;

        tracing::info!(
            snapshot_secs = snapshot_period.as_secs(),
            cleanup_secs = cleanup_period.as_secs(),
            reconciliation_secs = reconciliation_period.as_secs(),
            "risk assessment schedules started"
        );

        // ── 1. PnL snapshot ──────────────────────────────────────────
        let governor = self.governor.clone();
        let cancel = self.cancel.clone();
        self.handles.push(tokio::spawn(async move {
            let mut interval = make_interval(snapshot_period);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        if let Err(err) = governor.run_snapshot().await {
                            tracing::error!(error = %err, "snapshot assessment failed");
                        }
                    }
                }
            }
        }));

        // ── 2. Velocity cleanup ──────────────────────────────────────
        let governor = self.governor.clone();
        let cancel = self.cancel.clone();
        self.handles.push(tokio::spawn(async move {
            let mut interval = make_interval(cleanup_period);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => governor.run_velocity_cleanup(),
                }
            }
        }));

        // ── 3. Reconciliation ────────────────────────────────────────
        let governor = self.governor.clone();
        let cancel = self.cancel.clone();
        self.handles.push(tokio::spawn(async move {
            let mut interval = make_interval(reconciliation_period);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        if let Err(err) = governor.run_reconciliation().await {
                            tracing::error!(error = %err, "reconciliation cycle failed");
                        }
                    }
                }
            }
        }));
    }

    /// Cancel all schedules and wait for them to stop.
    pub async fn stop(&mut self) {
        self.cancel.cancel();
        for handle in self.handles.drain(..) {
            let _ = handle.await;
        }
        self.governor.set_running(false);
        tracing::info!("risk assessment schedules stopped");
    }
}

/// Interval that fires immediately, then every `period`. No catch-up
/// bursts if a tick is missed.
fn make_interval(period: Duration) -> tokio::time::Interval {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}
