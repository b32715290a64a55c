//! Violation records and the bounded violation log.
//!
//! A [`Violation`] is the immutable record of one detected risk breach and
//! the action taken in response. The [`ViolationLog`] keeps a bounded
//! append-only history: when the cap is reached the oldest entries are
//! dropped in one batch rather than evicted one at a time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use fg_core::types::UnitId;

/// Category of a detected risk breach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ViolationKind {
    /// Fleet-wide daily loss limit breached.
    DailyLoss,
    /// One unit's daily loss percentage breached.
    UnitDrawdown,
    /// Order submission rate breached.
    OrderVelocity,
    /// Position size limit breached.
    PositionLimit,
    /// Position reconciliation mismatch.
    Reconciliation,
    /// Cross-unit correlation limit breached.
    Correlation,
}

/// Severity of a violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Warning,
    Critical,
    Halt,
}

/// Immutable record of one risk breach and the action taken.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Violation {
    /// When the breach was detected.
    pub timestamp: DateTime<Utc>,
    /// Breach category.
    #[serde(rename = "type")]
    pub kind: ViolationKind,
    /// The unit involved, if the breach is unit-scoped.
    pub unit_id: Option<UnitId>,
    /// Severity of the breach.
    pub severity: Severity,
    /// Human-readable description embedding the observed value and limit.
    pub message: String,
    /// What the control plane did about it.
    pub action_taken: String,
}

/// Bounded append-only violation history.
///
/// Appends are O(1) until the cap is hit; on overflow the log is trimmed in
/// one batch to the most recent `retain` entries before the new entry is
/// appended. Not internally synchronized: the log lives inside the control
/// state lock.
#[derive(Debug)]
pub struct ViolationLog {
    entries: Vec<Violation>,
    cap: usize,
    retain: usize,
}

impl ViolationLog {
    /// Default capacity before a trim is triggered.
    pub const DEFAULT_CAP: usize = 1_000;
    /// Entries retained by a trim.
    pub const DEFAULT_RETAIN: usize = 500;

    /// Create a log with the default bounds (cap 1000, retain 500).
    pub fn new() -> Self {
        Self::with_bounds(Self::DEFAULT_CAP, Self::DEFAULT_RETAIN)
    }

    /// Create a log with explicit bounds. `retain` must be below `cap`.
    pub fn with_bounds(cap: usize, retain: usize) -> Self {
        assert!(retain < cap, "retain must be below cap");
        Self {
            entries: Vec::new(),
            cap,
            retain,
        }
    }

    /// Append a violation, trimming the oldest entries first if the log is
    /// at capacity.
    pub fn push(&mut self, violation: Violation) {
        if self.entries.len() >= self.cap {
            let excess = self.entries.len() - self.retain;
            self.entries.drain(..excess);
            tracing::debug!(
                dropped = excess,
                retained = self.retain,
                "violation log trimmed"
            );
        }
        self.entries.push(violation);
    }

    /// Return the `n` most recent violations, newest first.
    pub fn recent(&self, n: usize) -> Vec<Violation> {
        self.entries.iter().rev().take(n).cloned().collect()
    }

    /// Number of entries currently held.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no violations have been recorded.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for ViolationLog {
    fn default() -> Self {
        Self::new()
    }
}
