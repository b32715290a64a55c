//! # fg-control
//!
//! The FleetGuard risk-control plane. Monitors the trading fleet's
//! aggregate and per-unit daily profit/loss and order-submission rate, and
//! holds unilateral authority to halt trading independent of the units'
//! own decision logic.
//!
//! The plane is three cooperating pieces around one [`RiskGovernor`]:
//! a latching halt/resume state machine (global and per-unit), a periodic
//! risk-assessment pipeline driven by the [`Supervisor`], and a
//! synchronous admission gate with velocity-based rate limiting consulted
//! on every order attempt.

pub mod audit;
pub mod governor;
pub mod ledger;
pub mod limits;
pub mod registry;
pub mod scheduler;
pub mod velocity;
pub mod violations;

pub use audit::{ActorType, AuditEvent, AuditSink, JsonlAuditSink, MemoryAuditSink};
pub use governor::{AdmissionDecision, AdmissionDenied, GovernorStatus, RiskGovernor};
pub use ledger::{JsonlTradeLedger, TradeFill, TradeLedger};
pub use limits::{GlobalLimits, PerUnitLimits};
pub use registry::{StaticUnitRegistry, UnitRegistry};
pub use scheduler::Supervisor;
pub use velocity::{VelocityBook, VelocityRecord, VelocityVerdict};
pub use violations::{Severity, Violation, ViolationKind, ViolationLog};
