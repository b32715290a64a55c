//! Trade-ledger collaborator.
//!
//! The control plane never computes PnL itself; it queries an external
//! ledger of closed trades. [`TradeLedger`] is the seam, and
//! [`JsonlTradeLedger`] is a file-backed implementation reading the
//! JSON-lines fills file written by the execution layer.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use fg_core::types::UnitId;

/// Query interface over the external ledger of closed trades.
#[async_trait]
pub trait TradeLedger: Send + Sync {
    /// Sum of realized PnL for trades closed at or after `since`,
    /// optionally restricted to one unit.
    async fn realized_pnl_since(
        &self,
        since: DateTime<Utc>,
        unit: Option<&UnitId>,
    ) -> Result<f64>;
}

/// One closed trade as recorded by the execution layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeFill {
    /// Unit that executed the trade.
    pub unit_id: UnitId,
    /// Instrument traded.
    pub instrument: String,
    /// Realized PnL of the closed trade, in USD.
    pub realized_pnl: f64,
    /// When the trade was closed.
    pub closed_at: DateTime<Utc>,
}

/// File-backed trade ledger over a JSON-lines fills file.
///
/// Each line is one [`TradeFill`]. The file is re-read on every query;
/// fills files are small (one day of fleet activity) and the query runs
/// outside the control-state lock. Corrupt lines are skipped with a
/// warning.
pub struct JsonlTradeLedger {
    path: PathBuf,
}

impl JsonlTradeLedger {
    /// Create a ledger reading from the given fills file.
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

#[async_trait]
impl TradeLedger for JsonlTradeLedger {
    async fn realized_pnl_since(
        &self,
        since: DateTime<Utc>,
        unit: Option<&UnitId>,
    ) -> Result<f64> {
        let file = File::open(&self.path)
            .with_context(|| format!("failed to open fills file {}", self.path.display()))?;
        let reader = BufReader::new(file);

        let mut total = 0.0;
        for (line_num, line) in reader.lines().enumerate() {
            let line = line.context("failed to read fills line")?;
            if line.trim().is_empty() {
                continue;
            }
            let fill: TradeFill = match serde_json::from_str(&line) {
                Ok(fill) => fill,
                Err(e) => {
                    tracing::warn!(
                        line_num = line_num + 1,
                        error = %e,
                        "skipping corrupt fills line"
                    );
                    continue;
                }
            };
            if fill.closed_at < since {
                continue;
            }
            if let Some(unit) = unit {
                if fill.unit_id != *unit {
                    continue;
                }
            }
            total += fill.realized_pnl;
        }

        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::io::Write;

    fn fill(unit: &str, pnl: f64, closed_at: DateTime<Utc>) -> TradeFill {
        TradeFill {
            unit_id: UnitId::new(unit),
            instrument: "ES".to_string(),
            realized_pnl: pnl,
            closed_at,
        }
    }

    fn write_fills(fills: &[TradeFill]) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fills.jsonl");
        let mut f = File::create(&path).unwrap();
        for fill in fills {
            writeln!(f, "{}", serde_json::to_string(fill).unwrap()).unwrap();
        }
        (dir, path)
    }

    fn day(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 2, h, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_sums_fills_since_cutoff() {
        let (_dir, path) = write_fills(&[
            fill("U1", -300.0, day(1)),
            fill("U1", 120.0, day(10)),
            fill("U2", -50.0, day(12)),
        ]);
        let ledger = JsonlTradeLedger::new(path);

        // Cutoff excludes the first fill.
        let total = ledger.realized_pnl_since(day(9), None).await.unwrap();
        assert_eq!(total, 70.0);
    }

    #[tokio::test]
    async fn test_unit_filter() {
        let (_dir, path) = write_fills(&[
            fill("U1", 120.0, day(10)),
            fill("U2", -50.0, day(12)),
        ]);
        let ledger = JsonlTradeLedger::new(path);

        let u2 = UnitId::new("U2");
        let total = ledger.realized_pnl_since(day(0), Some(&u2)).await.unwrap();
        assert_eq!(total, -50.0);
    }

    #[tokio::test]
    async fn test_cutoff_is_inclusive() {
        let (_dir, path) = write_fills(&[fill("U1", 42.0, day(9))]);
        let ledger = JsonlTradeLedger::new(path);

        let total = ledger.realized_pnl_since(day(9), None).await.unwrap();
        assert_eq!(total, 42.0);
    }

    #[tokio::test]
    async fn test_corrupt_lines_skipped() {
        let (_dir, path) = write_fills(&[fill("U1", 10.0, day(10))]);
        {
            let mut f = std::fs::OpenOptions::new()
                .append(true)
                .open(&path)
                .unwrap();
            writeln!(f, "garbage").unwrap();
            writeln!(f, "{}", serde_json::to_string(&fill("U1", 5.0, day(11))).unwrap()).unwrap();
        }
        let ledger = JsonlTradeLedger::new(path);
        let total = ledger.realized_pnl_since(day(0), None).await.unwrap();
        assert_eq!(total, 15.0);
    }

    #[tokio::test]
    async fn test_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = JsonlTradeLedger::new(dir.path().join("absent.jsonl"));
        assert!(ledger.realized_pnl_since(day(0), None).await.is_err());
    }
}
