//! Core identifier types for the FleetGuard control plane.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of a single trading unit in the fleet.
///
/// Unit ids are opaque strings assigned by the fleet orchestrator (e.g.
/// `"U1"`, `"momentum-eu-03"`). The control plane never interprets them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnitId(String);

impl UnitId {
    /// Create a unit id from any string-like value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UnitId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Side of an order submission, as reported to the admission gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => f.write_str("buy"),
            OrderSide::Sell => f.write_str("sell"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_id_display() {
        let id = UnitId::new("U1");
        assert_eq!(format!("{}", id), "U1");
        assert_eq!(id.as_str(), "U1");
    }

    #[test]
    fn test_unit_id_equality_and_hash() {
        use std::collections::HashSet;
        let mut set = HashSet::new();
        set.insert(UnitId::new("U1"));
        assert!(set.contains(&UnitId::from("U1")));
        assert!(!set.contains(&UnitId::from("U2")));
    }

    #[test]
    fn test_unit_id_serde_transparent() {
        let id = UnitId::new("momentum-eu-03");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"momentum-eu-03\"");
        let back: UnitId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn test_order_side_serde_lowercase() {
        assert_eq!(serde_json::to_string(&OrderSide::Buy).unwrap(), "\"buy\"");
        let side: OrderSide = serde_json::from_str("\"sell\"").unwrap();
        assert_eq!(side, OrderSide::Sell);
    }
}
