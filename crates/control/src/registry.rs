//! Active-unit registry collaborator.
//!
//! Per-unit PnL assessment only covers units with a live runtime instance
//! in a trading-enabled stage. The orchestrator owns that knowledge;
//! [`UnitRegistry`] is the seam, and [`StaticUnitRegistry`] is the
//! configuration-driven implementation used when no orchestrator is wired.

use anyhow::Result;
use async_trait::async_trait;

use fg_core::types::UnitId;

/// Query interface over the fleet orchestrator.
#[async_trait]
pub trait UnitRegistry: Send + Sync {
    /// Units with a live runtime instance in a trading-enabled stage.
    async fn active_units(&self) -> Result<Vec<UnitId>>;
}

/// Fixed roster loaded from configuration.
pub struct StaticUnitRegistry {
    units: Vec<UnitId>,
}

impl StaticUnitRegistry {
    /// Create a registry over a fixed set of units.
    pub fn new(units: Vec<UnitId>) -> Self {
        Self { units }
    }
}

#[async_trait]
impl UnitRegistry for StaticUnitRegistry {
    async fn active_units(&self) -> Result<Vec<UnitId>> {
        Ok(self.units.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_registry_returns_roster() {
        let registry = StaticUnitRegistry::new(vec![UnitId::new("U1"), UnitId::new("U2")]);
        let units = registry.active_units().await.unwrap();
        assert_eq!(units, vec![UnitId::new("U1"), UnitId::new("U2")]);
    }

    #[tokio::test]
    async fn test_empty_roster() {
        let registry = StaticUnitRegistry::new(Vec::new());
        assert!(registry.active_units().await.unwrap().is_empty());
    }
}
