//! Immutable audit trail for control-plane transitions.
//!
//! Every halt and resume, whatever its trigger, produces an [`AuditEvent`]
//! attributed to either the system or a human operator. The audit trail is
//! distinct from the violation log: violations record detected breaches,
//! audit events record state-changing actions.
//!
//! [`JsonlAuditSink`] writes one JSON event per line with an immediate
//! flush, and supports replay that skips corrupt lines with a warning.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who performed a state-changing action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActorType {
    /// The control plane itself (automatic assessment or gate escalation).
    System,
    /// A human operator.
    User,
}

/// Immutable, attributed record of one state-changing action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Action identifier, e.g. `GLOBAL_HALT`, `UNIT_RESUME`.
    pub event_type: String,
    /// Kind of entity acted on (`fleet` or `unit`).
    pub entity_type: String,
    /// Id of the entity acted on (`global` or a unit id).
    pub entity_id: String,
    /// Whether the system or an operator acted.
    pub actor_type: ActorType,
    /// System actor name or operator id.
    pub actor_id: String,
    /// Transition details (previous/next state, reason).
    pub payload: serde_json::Value,
    /// When the action happened.
    pub timestamp: DateTime<Utc>,
}

impl AuditEvent {
    /// Build a system-attributed event.
    pub fn system(
        event_type: &str,
        entity_type: &str,
        entity_id: &str,
        actor_id: &str,
        payload: serde_json::Value,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            event_type: event_type.to_string(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            actor_type: ActorType::System,
            actor_id: actor_id.to_string(),
            payload,
            timestamp,
        }
    }

    /// Build an operator-attributed event.
    pub fn user(
        event_type: &str,
        entity_type: &str,
        entity_id: &str,
        operator_id: &str,
        payload: serde_json::Value,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            event_type: event_type.to_string(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            actor_type: ActorType::User,
            actor_id: operator_id.to_string(),
            payload,
            timestamp,
        }
    }
}

/// Append-only destination for audit events.
///
/// Implementations must be cheap enough to call from the admission gate's
/// halt-escalation path; anything slow belongs behind a queue.
pub trait AuditSink: Send + Sync {
    /// Persist one event. An error here makes the calling gate evaluation
    /// fail closed.
    fn emit(&self, event: &AuditEvent) -> Result<()>;
}

/// Append-only JSON-lines audit journal.
///
/// Each line is one serialized [`AuditEvent`]. Writes are flushed
/// immediately for durability.
pub struct JsonlAuditSink {
    path: PathBuf,
    writer: parking_lot::Mutex<BufWriter<File>>,
}

impl JsonlAuditSink {
    /// Create or open a journal file at the given path.
    pub fn new(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("failed to create audit directory {}", parent.display())
                })?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("failed to open audit journal at {}", path.display()))?;

        Ok(Self {
            path,
            writer: parking_lot::Mutex::new(BufWriter::new(file)),
        })
    }

    /// Replay all events from the journal file.
    ///
    /// Corrupt lines are skipped with a warning log. Returns all
    /// successfully deserialized events in order.
    pub fn replay(&self) -> Result<Vec<AuditEvent>> {
        let file = File::open(&self.path)
            .with_context(|| format!("failed to open audit journal {}", self.path.display()))?;
        let reader = BufReader::new(file);
        let mut events = Vec::new();

        for (line_num, line) in reader.lines().enumerate() {
            let line = line.context("failed to read audit journal line")?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<AuditEvent>(&line) {
                Ok(event) => events.push(event),
                Err(e) => {
                    tracing::warn!(
                        line_num = line_num + 1,
                        error = %e,
                        "skipping corrupt audit journal line"
                    );
                }
            }
        }

        Ok(events)
    }
}

impl AuditSink for JsonlAuditSink {
    fn emit(&self, event: &AuditEvent) -> Result<()> {
        let json = serde_json::to_string(event).context("failed to serialize AuditEvent")?;
        let mut writer = self.writer.lock();
        writeln!(writer, "{}", json).context("failed to write to audit journal")?;
        writer.flush().context("failed to flush audit journal")?;
        Ok(())
    }
}

/// In-memory audit sink for tests and embedded use.
#[derive(Default)]
pub struct MemoryAuditSink {
    events: parking_lot::Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all events emitted so far.
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().clone()
    }
}

impl AuditSink for MemoryAuditSink {
    fn emit(&self, event: &AuditEvent) -> Result<()> {
        self.events.lock().push(event.clone());
        Ok(())
    }
}
