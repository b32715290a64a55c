//! # fg-core
//!
//! Shared types, configuration, and logging for the FleetGuard risk-control
//! plane.
//!
//! This crate provides the foundational building blocks used across the
//! workspace: trading-unit identifiers, the layered configuration loader,
//! and the tracing initialization used by the server binary.

pub mod config;
pub mod logging;
pub mod types;
