//! The risk governor: latching halt/resume state machine, synchronous
//! admission gate, and the periodic risk assessments.
//!
//! [`RiskGovernor`] is the single authority over whether the fleet, or any
//! one unit, may trade. It is built once at process start and passed by
//! reference to every call site; tests build fresh instances.
//!
//! ## Latching
//!
//! Halts latch: an automatic assessment can move a scope from ACTIVE to
//! HALTED at any time, but only an explicit resume carrying an operator
//! identity moves it back. Conditions improving never un-halt anything.
//!
//! ## Lock discipline
//!
//! All mutable control state sits behind one `std::sync::Mutex`, held only
//! for in-memory reads and writes. Ledger queries and audit writes happen
//! outside the lock: read a snapshot, release, perform I/O, re-acquire
//! briefly to apply the decision. A decision may therefore be based on an
//! infinitesimally stale snapshot, which is accepted.
//!
//! A poisoned state lock makes the admission gate fail closed: when the
//! risk state is unknown, no order is allowed.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;

use fg_core::types::{OrderSide, UnitId};

use crate::audit::{AuditEvent, AuditSink};
use crate::ledger::TradeLedger;
use crate::limits::{GlobalLimits, PerUnitLimits};
use crate::registry::UnitRegistry;
use crate::velocity::{VelocityBook, VelocityVerdict};
use crate::violations::{Severity, Violation, ViolationKind, ViolationLog};

/// Consecutive minute-rate breaches that escalate a unit to HALTED.
const BURST_HALT_THRESHOLD: u32 = 3;

/// Actor id for transitions originated by the control plane itself.
const SYSTEM_ACTOR: &str = "risk-governor";

/// Violations returned by `status()`.
const STATUS_RECENT_VIOLATIONS: usize = 50;

/// Reason an order was denied by the admission gate.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AdmissionDenied {
    /// The whole fleet is halted.
    #[error("Global halt: {reason}")]
    GlobalHalt { reason: String },
    /// This unit is halted.
    #[error("Unit halted: {unit}")]
    UnitHalted { unit: UnitId },
    /// A velocity breach's cooldown window is still open.
    #[error("Cooldown until {until}")]
    Cooldown { until: DateTime<Utc> },
    /// This order breached the minute rate.
    #[error("Order velocity limit exceeded: {count} orders in the last minute, limit {limit}")]
    VelocityLimit { count: u32, limit: u32 },
    /// This order breached the hourly rate.
    #[error("Hourly order limit exceeded: {count} orders in the last hour, limit {limit}")]
    HourlyLimit { count: u32, limit: u32 },
    /// The gate could not evaluate the order; denied because the safety
    /// property dominates availability.
    #[error("Admission check failed: {reason}")]
    CheckFailed { reason: String },
}

/// Outcome of an admission-gate evaluation.
#[derive(Debug, Clone, Serialize)]
pub struct AdmissionDecision {
    /// Whether the order may proceed.
    pub allowed: bool,
    /// Machine-readable denial reason; `None` when allowed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl AdmissionDecision {
    fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    fn deny(denied: AdmissionDenied) -> Self {
        Self {
            allowed: false,
            reason: Some(denied.to_string()),
        }
    }
}

/// Mutable control-plane state. Lives behind the governor's state lock for
/// the whole process lifetime; created once with zero/ACTIVE defaults.
///
/// Invariant: `global_halt == true` iff `halt_reason.is_some()`. Both are
/// only ever written together.
#[derive(Debug)]
struct ControlState {
    global_halt: bool,
    halt_reason: Option<String>,
    halted_units: HashSet<UnitId>,
    daily_pnl: f64,
    last_snapshot_at: Option<DateTime<Utc>>,
    last_reconciliation_at: Option<DateTime<Utc>>,
    violations: ViolationLog,
}

impl ControlState {
    fn new() -> Self {
        Self {
            global_halt: false,
            halt_reason: None,
            halted_units: HashSet::new(),
            daily_pnl: 0.0,
            last_snapshot_at: None,
            last_reconciliation_at: None,
            violations: ViolationLog::new(),
        }
    }
}

/// Snapshot of the control plane for the status query.
#[derive(Debug, Clone, Serialize)]
pub struct GovernorStatus {
    pub global_halt: bool,
    pub halt_reason: Option<String>,
    pub halted_units: Vec<UnitId>,
    pub daily_pnl: f64,
    pub max_daily_loss_usd: f64,
    pub last_snapshot_at: Option<DateTime<Utc>>,
    pub last_reconciliation_at: Option<DateTime<Utc>>,
    pub recent_violations: Vec<Violation>,
    pub is_running: bool,
}

/// The fleet's risk-control plane.
pub struct RiskGovernor {
    global_limits: GlobalLimits,
    unit_limits: PerUnitLimits,
    /// Fixed equity base for per-unit loss percentages. Deliberately
    /// nominal, not live account equity.
    nominal_equity_usd: f64,
    state: Mutex<ControlState>,
    velocity: VelocityBook,
    trade_ledger: Arc<dyn TradeLedger>,
    units: Arc<dyn UnitRegistry>,
    audit: Arc<dyn AuditSink>,
    running: AtomicBool,
}

impl RiskGovernor {
    /// Build a governor over the given limits and collaborators.
    pub fn new(
        global_limits: GlobalLimits,
        unit_limits: PerUnitLimits,
        nominal_equity_usd: f64,
        trade_ledger: Arc<dyn TradeLedger>,
        units: Arc<dyn UnitRegistry>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            global_limits,
            unit_limits,
            nominal_equity_usd,
            state: Mutex::new(ControlState::new()),
            velocity: VelocityBook::new(),
            trade_ledger,
            units,
            audit,
            running: AtomicBool::new(false),
        }
    }

    /// The configured fleet-wide limits (the scheduler reads the periods).
    pub fn global_limits(&self) -> &GlobalLimits {
        &self.global_limits
    }

    fn lock_state(&self) -> Result<MutexGuard<'_, ControlState>> {
        self.state
            .lock()
            .map_err(|_| anyhow!("control state lock poisoned"))
    }

    // ── Admission gate ───────────────────────────────────────────────

    /// Admission gate: evaluate and record one order attempt.
    ///
    /// Mutates the unit's velocity counters and may itself halt the unit
    /// (burst escalation). Any internal failure fails closed: the order is
    /// denied with a machine-readable reason.
    pub fn record_order(
        &self,
        unit: &UnitId,
        instrument: &str,
        side: OrderSide,
    ) -> AdmissionDecision {
        self.record_order_at(unit, instrument, side, Utc::now())
    }

    /// Gate evaluation against a specific instant (for testing).
    pub fn record_order_at(
        &self,
        unit: &UnitId,
        instrument: &str,
        side: OrderSide,
        now: DateTime<Utc>,
    ) -> AdmissionDecision {
        match self.evaluate_order(unit, now) {
            Ok(decision) => {
                if let Some(reason) = &decision.reason {
                    tracing::info!(%unit, instrument, %side, reason = %reason, "order denied");
                }
                decision
            }
            Err(err) => {
                tracing::error!(%unit, instrument, error = %err, "admission evaluation failed, denying order");
                AdmissionDecision::deny(AdmissionDenied::CheckFailed {
                    reason: err.to_string(),
                })
            }
        }
    }

    fn evaluate_order(&self, unit: &UnitId, now: DateTime<Utc>) -> Result<AdmissionDecision> {
        // Halt checks under the state lock.
        {
            let state = self.lock_state()?;
            if state.global_halt {
                let reason = state
                    .halt_reason
                    .clone()
                    .unwrap_or_else(|| "unspecified".to_string());
                return Ok(AdmissionDecision::deny(AdmissionDenied::GlobalHalt {
                    reason,
                }));
            }
            if state.halted_units.contains(unit) {
                return Ok(AdmissionDecision::deny(AdmissionDenied::UnitHalted {
                    unit: unit.clone(),
                }));
            }
        }

        // Velocity: atomic increment-then-compare per unit.
        match self.velocity.record_at(unit, &self.unit_limits, now) {
            VelocityVerdict::Ok => Ok(AdmissionDecision::allow()),
            VelocityVerdict::CooldownActive { until } => {
                Ok(AdmissionDecision::deny(AdmissionDenied::Cooldown { until }))
            }
            VelocityVerdict::MinuteBreach {
                count,
                limit,
                burst_count,
                cooldown_until,
            } => {
                if burst_count >= BURST_HALT_THRESHOLD {
                    let reason = format!(
                        "order velocity burst escalation: {} consecutive minute-rate breaches",
                        burst_count
                    );
                    self.apply_unit_halt(
                        unit,
                        &reason,
                        Some(Violation {
                            timestamp: now,
                            kind: ViolationKind::OrderVelocity,
                            unit_id: Some(unit.clone()),
                            severity: Severity::Halt,
                            message: reason.clone(),
                            action_taken: "unit halted".to_string(),
                        }),
                        now,
                    )?;
                } else {
                    self.push_violation(Violation {
                        timestamp: now,
                        kind: ViolationKind::OrderVelocity,
                        unit_id: Some(unit.clone()),
                        severity: Severity::Warning,
                        message: format!(
                            "minute rate breached: {} orders, limit {}",
                            count, limit
                        ),
                        action_taken: format!("denied; cooldown until {}", cooldown_until),
                    })?;
                }
                Ok(AdmissionDecision::deny(AdmissionDenied::VelocityLimit {
                    count,
                    limit,
                }))
            }
            VelocityVerdict::HourBreach { count, limit } => {
                self.push_violation(Violation {
                    timestamp: now,
                    kind: ViolationKind::OrderVelocity,
                    unit_id: Some(unit.clone()),
                    severity: Severity::Warning,
                    message: format!("hourly rate breached: {} orders, limit {}", count, limit),
                    action_taken: "denied".to_string(),
                })?;
                Ok(AdmissionDecision::deny(AdmissionDenied::HourlyLimit {
                    count,
                    limit,
                }))
            }
        }
    }

    /// Read-only admission check for display and status use. Consults the
    /// halt flags and cooldown state without touching any counter.
    pub fn is_unit_allowed(&self, unit: &UnitId) -> AdmissionDecision {
        self.is_unit_allowed_at(unit, Utc::now())
    }

    /// Read-only admission check against a specific instant (for testing).
    pub fn is_unit_allowed_at(&self, unit: &UnitId, now: DateTime<Utc>) -> AdmissionDecision {
        let result = (|| -> Result<AdmissionDecision> {
            {
                let state = self.lock_state()?;
                if state.global_halt {
                    let reason = state
                        .halt_reason
                        .clone()
                        .unwrap_or_else(|| "unspecified".to_string());
                    return Ok(AdmissionDecision::deny(AdmissionDenied::GlobalHalt {
                        reason,
                    }));
                }
                if state.halted_units.contains(unit) {
                    return Ok(AdmissionDecision::deny(AdmissionDenied::UnitHalted {
                        unit: unit.clone(),
                    }));
                }
            }
            if let Some(until) = self.velocity.cooldown_until(unit, now) {
                return Ok(AdmissionDecision::deny(AdmissionDenied::Cooldown { until }));
            }
            Ok(AdmissionDecision::allow())
        })();

        result.unwrap_or_else(|err| {
            tracing::error!(%unit, error = %err, "status check failed, reporting not allowed");
            AdmissionDecision::deny(AdmissionDenied::CheckFailed {
                reason: err.to_string(),
            })
        })
    }

    // ── Halt / resume state machine ──────────────────────────────────

    /// Halt one unit. Idempotent: a no-op if the unit is already halted.
    pub fn halt_unit(&self, unit: &UnitId, reason: &str) -> Result<()> {
        self.apply_unit_halt(unit, reason, None, Utc::now())?;
        Ok(())
    }

    /// Halt the whole fleet. Idempotent: a no-op if already halted; the
    /// original halt reason is kept (latching).
    pub fn trigger_global_halt(&self, reason: &str) -> Result<()> {
        self.apply_global_halt(reason, None, Utc::now())?;
        Ok(())
    }

    /// Resume one unit, attributed to `operator_id`. Clears the unit's
    /// cooldown and burst count. Idempotent: resuming an active unit is a
    /// no-op and emits no audit record.
    pub fn resume_unit(&self, unit: &UnitId, operator_id: &str) -> Result<()> {
        self.resume_unit_at(unit, operator_id, Utc::now())
    }

    /// Unit resume against a specific instant (for testing).
    pub fn resume_unit_at(
        &self,
        unit: &UnitId,
        operator_id: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let was_halted = {
            let mut state = self.lock_state()?;
            state.halted_units.remove(unit)
        };
        if !was_halted {
            return Ok(());
        }

        self.velocity.clear_cooldown(unit);
        tracing::warn!(%unit, operator_id, "unit resumed");
        self.audit.emit(&AuditEvent::user(
            "UNIT_RESUME",
            "unit",
            unit.as_str(),
            operator_id,
            json!({ "previous": "HALTED", "next": "ACTIVE" }),
            now,
        ))?;
        Ok(())
    }

    /// Resume the whole fleet, attributed to `operator_id`. Idempotent: a
    /// no-op when not halted, emitting no audit record.
    pub fn resume_global(&self, operator_id: &str) -> Result<()> {
        self.resume_global_at(operator_id, Utc::now())
    }

    /// Global resume against a specific instant (for testing).
    pub fn resume_global_at(&self, operator_id: &str, now: DateTime<Utc>) -> Result<()> {
        let previous_reason = {
            let mut state = self.lock_state()?;
            if !state.global_halt {
                return Ok(());
            }
            state.global_halt = false;
            state.halt_reason.take()
        };

        tracing::warn!(operator_id, "global halt cleared, trading re-enabled");
        self.audit.emit(&AuditEvent::user(
            "GLOBAL_RESUME",
            "fleet",
            "global",
            operator_id,
            json!({
                "previous": "HALTED",
                "next": "ACTIVE",
                "cleared_reason": previous_reason,
            }),
            now,
        ))?;
        Ok(())
    }

    /// Latch the global scope to HALTED. Returns `false` if it was already
    /// halted (no audit or violation emitted).
    fn apply_global_halt(
        &self,
        reason: &str,
        violation: Option<Violation>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        {
            let mut state = self.lock_state()?;
            if state.global_halt {
                return Ok(false);
            }
            state.global_halt = true;
            state.halt_reason = Some(reason.to_string());
            if let Some(violation) = violation {
                state.violations.push(violation);
            }
        }

        tracing::error!(reason, "GLOBAL HALT — all order admission denied");
        self.audit.emit(&AuditEvent::system(
            "GLOBAL_HALT",
            "fleet",
            "global",
            SYSTEM_ACTOR,
            json!({ "previous": "ACTIVE", "next": "HALTED", "reason": reason }),
            now,
        ))?;
        Ok(true)
    }

    /// Latch one unit to HALTED. Returns `false` if it was already halted.
    fn apply_unit_halt(
        &self,
        unit: &UnitId,
        reason: &str,
        violation: Option<Violation>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        {
            let mut state = self.lock_state()?;
            if !state.halted_units.insert(unit.clone()) {
                return Ok(false);
            }
            if let Some(violation) = violation {
                state.violations.push(violation);
            }
        }

        tracing::error!(%unit, reason, "unit halted");
        self.audit.emit(&AuditEvent::system(
            "UNIT_HALT",
            "unit",
            unit.as_str(),
            SYSTEM_ACTOR,
            json!({ "previous": "ACTIVE", "next": "HALTED", "reason": reason }),
            now,
        ))?;
        Ok(true)
    }

    fn push_violation(&self, violation: Violation) -> Result<()> {
        let mut state = self.lock_state()?;
        state.violations.push(violation);
        Ok(())
    }

    // ── Periodic assessments ─────────────────────────────────────────

    /// One PnL snapshot cycle: recompute daily realized PnL globally and
    /// per active unit, and enforce the loss limits.
    pub async fn run_snapshot(&self) -> Result<()> {
        self.run_snapshot_at(Utc::now()).await
    }

    /// Snapshot cycle against a specific instant (for testing).
    pub async fn run_snapshot_at(&self, now: DateTime<Utc>) -> Result<()> {
        let day_start = start_of_day(now);

        // Ledger I/O happens outside the state lock.
        let global_pnl = match self.trade_ledger.realized_pnl_since(day_start, None).await {
            Ok(pnl) => pnl,
            Err(err) => {
                // Stale-but-safe: keep the previous daily PnL rather than
                // assuming zero.
                tracing::warn!(error = %err, "trade ledger query failed, keeping previous daily PnL");
                return Ok(());
            }
        };

        let breach = {
            let mut state = self.lock_state()?;
            state.daily_pnl = global_pnl;
            state.last_snapshot_at = Some(now);
            !state.global_halt && global_pnl < -self.global_limits.max_daily_loss_usd
        };

        if breach {
            let reason = format!(
                "daily PnL {:.2} USD breached loss limit -{:.2} USD",
                global_pnl, self.global_limits.max_daily_loss_usd
            );
            self.apply_global_halt(
                &reason,
                Some(Violation {
                    timestamp: now,
                    kind: ViolationKind::DailyLoss,
                    unit_id: None,
                    severity: Severity::Halt,
                    message: reason.clone(),
                    action_taken: "global halt".to_string(),
                }),
                now,
            )?;
        }

        self.assess_units(day_start, now).await
    }

    /// Per-unit leg of the snapshot: loss percentage against nominal
    /// equity for every actively trading unit.
    async fn assess_units(&self, day_start: DateTime<Utc>, now: DateTime<Utc>) -> Result<()> {
        let units = match self.units.active_units().await {
            Ok(units) => units,
            Err(err) => {
                tracing::warn!(error = %err, "unit registry query failed, skipping per-unit assessment");
                return Ok(());
            }
        };

        for unit in units {
            let pnl = match self
                .trade_ledger
                .realized_pnl_since(day_start, Some(&unit))
                .await
            {
                Ok(pnl) => pnl,
                Err(err) => {
                    tracing::warn!(%unit, error = %err, "unit PnL query failed, skipping unit");
                    continue;
                }
            };

            if pnl >= 0.0 {
                continue;
            }
            let loss_pct = -pnl / self.nominal_equity_usd * 100.0;
            if loss_pct > self.unit_limits.max_daily_loss_pct {
                let reason = format!(
                    "daily loss {:.2}% of nominal equity breached limit {:.2}%",
                    loss_pct, self.unit_limits.max_daily_loss_pct
                );
                self.apply_unit_halt(
                    &unit,
                    &reason,
                    Some(Violation {
                        timestamp: now,
                        kind: ViolationKind::UnitDrawdown,
                        unit_id: Some(unit.clone()),
                        severity: Severity::Halt,
                        message: reason.clone(),
                        action_taken: "unit halted".to_string(),
                    }),
                    now,
                )?;
            }
        }
        Ok(())
    }

    /// One velocity cleanup cycle: zero counters of quiet units.
    pub fn run_velocity_cleanup(&self) {
        self.run_velocity_cleanup_at(Utc::now());
    }

    /// Cleanup cycle against a specific instant (for testing).
    pub fn run_velocity_cleanup_at(&self, now: DateTime<Utc>) {
        self.velocity.cleanup_at(now);
        tracing::debug!(
            tracked_units = self.velocity.tracked_units(),
            "velocity cleanup complete"
        );
    }

    /// One reconciliation cycle. Position-vs-broker reconciliation itself
    /// is performed by an external collaborator; this records the cycle.
    /// An isolated failure domain: errors here never touch halt state or
    /// the admission gate.
    pub async fn run_reconciliation(&self) -> Result<()> {
        self.run_reconciliation_at(Utc::now()).await
    }

    /// Reconciliation cycle against a specific instant (for testing).
    pub async fn run_reconciliation_at(&self, now: DateTime<Utc>) -> Result<()> {
        {
            let mut state = self.lock_state()?;
            state.last_reconciliation_at = Some(now);
        }
        tracing::info!("reconciliation cycle complete");
        self.audit.emit(&AuditEvent::system(
            "RECONCILIATION",
            "fleet",
            "global",
            SYSTEM_ACTOR,
            json!({ "status": "ok" }),
            now,
        ))?;
        Ok(())
    }

    // ── Status ───────────────────────────────────────────────────────

    /// Full status snapshot for the status query.
    pub fn status(&self) -> Result<GovernorStatus> {
        let state = self.lock_state()?;
        let mut halted_units: Vec<UnitId> = state.halted_units.iter().cloned().collect();
        halted_units.sort();
        Ok(GovernorStatus {
            global_halt: state.global_halt,
            halt_reason: state.halt_reason.clone(),
            halted_units,
            daily_pnl: state.daily_pnl,
            max_daily_loss_usd: self.global_limits.max_daily_loss_usd,
            last_snapshot_at: state.last_snapshot_at,
            last_reconciliation_at: state.last_reconciliation_at,
            recent_violations: state.violations.recent(STATUS_RECENT_VIOLATIONS),
            is_running: self.is_running(),
        })
    }

    /// The `n` most recent violations, newest first.
    pub fn recent_violations(&self, n: usize) -> Result<Vec<Violation>> {
        let state = self.lock_state()?;
        Ok(state.violations.recent(n))
    }

    /// Whether the periodic schedules are running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    pub(crate) fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }
}

/// Midnight UTC of the calendar day containing `now`.
fn start_of_day(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive()
        .and_hms_opt(0, 0, 0)
        .expect("midnight is a valid time")
        .and_utc()
}
