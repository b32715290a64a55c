//! Per-unit order-velocity tracking.
//!
//! Each unit gets a [`VelocityRecord`] created lazily on its first order.
//! Counters are coarse reset-on-cleanup windows, not exact sliding windows:
//! the periodic cleanup pass zeroes counters whose unit has been quiet long
//! enough. This approximation can undercount between cleanup runs and is
//! kept deliberately for reproducible behavior.
//!
//! The map is sharded ([`DashMap`]), so recording for one unit is atomic
//! with respect to concurrent recordings for the same unit without blocking
//! the rest of the fleet.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

use fg_core::types::UnitId;

use crate::limits::PerUnitLimits;

/// Cooldown applied after a minute-rate breach.
const COOLDOWN_SECS: i64 = 60;

/// Counters for one unit's recent order submissions.
#[derive(Debug, Clone)]
pub struct VelocityRecord {
    /// Orders recorded since the last minute-window reset.
    pub orders_last_minute: u32,
    /// Orders recorded since the last hour-window reset.
    pub orders_last_hour: u32,
    /// When the unit last submitted an order.
    pub last_order_at: DateTime<Utc>,
    /// Consecutive minute-rate breaches without a resume in between.
    pub burst_count: u32,
    /// Active denial window, if a breach triggered one. Cleared only by
    /// passage of wall-clock time or an explicit resume.
    pub cooldown_until: Option<DateTime<Utc>>,
}

impl VelocityRecord {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            orders_last_minute: 0,
            orders_last_hour: 0,
            last_order_at: now,
            burst_count: 0,
            cooldown_until: None,
        }
    }
}

/// Outcome of recording one order attempt against the velocity limits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VelocityVerdict {
    /// Within limits; the order may proceed.
    Ok,
    /// A previous breach's cooldown is still active. Counters untouched.
    CooldownActive { until: DateTime<Utc> },
    /// The minute rate was breached by this order. A fresh cooldown has
    /// been applied and the burst counter incremented.
    MinuteBreach {
        count: u32,
        limit: u32,
        burst_count: u32,
        cooldown_until: DateTime<Utc>,
    },
    /// The hourly rate was breached by this order.
    HourBreach { count: u32, limit: u32 },
}

/// Sharded per-unit velocity state.
///
/// Records are created on first order and never removed; the fleet roster
/// is configuration-bounded, so growth is bounded in practice. Cleanup only
/// zeroes stale counters.
#[derive(Debug, Default)]
pub struct VelocityBook {
    records: DashMap<UnitId, VelocityRecord>,
}

impl VelocityBook {
    /// Create an empty book.
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
        }
    }

    /// Record one order attempt for `unit` and evaluate the rate limits.
    ///
    /// Increment-then-compare is atomic per unit: the unit's shard lock is
    /// held for the whole evaluation.
    pub fn record(&self, unit: &UnitId, limits: &PerUnitLimits) -> VelocityVerdict {
        self.record_at(unit, limits, Utc::now())
    }

    /// Record an order at a specific instant (for testing).
    pub fn record_at(
        &self,
        unit: &UnitId,
        limits: &PerUnitLimits,
        now: DateTime<Utc>,
    ) -> VelocityVerdict {
        let mut rec = self
            .records
            .entry(unit.clone())
            .or_insert_with(|| VelocityRecord::new(now));

        if let Some(until) = rec.cooldown_until {
            if until > now {
                return VelocityVerdict::CooldownActive { until };
            }
            // Expired by passage of time.
            rec.cooldown_until = None;
        }

        rec.orders_last_minute += 1;
        rec.orders_last_hour += 1;
        rec.last_order_at = now;

        if rec.orders_last_minute > limits.max_orders_per_minute {
            rec.burst_count += 1;
            let until = now + Duration::seconds(COOLDOWN_SECS);
            rec.cooldown_until = Some(until);
            return VelocityVerdict::MinuteBreach {
                count: rec.orders_last_minute,
                limit: limits.max_orders_per_minute,
                burst_count: rec.burst_count,
                cooldown_until: until,
            };
        }

        if rec.orders_last_hour > limits.max_orders_per_hour {
            return VelocityVerdict::HourBreach {
                count: rec.orders_last_hour,
                limit: limits.max_orders_per_hour,
            };
        }

        VelocityVerdict::Ok
    }

    /// Return the active cooldown deadline for `unit`, if one is in effect
    /// at `now`. Read-only: expired cooldowns are not cleared here.
    pub fn cooldown_until(&self, unit: &UnitId, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.records
            .get(unit)
            .and_then(|rec| rec.cooldown_until)
            .filter(|until| *until > now)
    }

    /// Clear the cooldown and burst counter for `unit` (explicit resume).
    pub fn clear_cooldown(&self, unit: &UnitId) {
        if let Some(mut rec) = self.records.get_mut(unit) {
            rec.cooldown_until = None;
            rec.burst_count = 0;
        }
    }

    /// Periodic cleanup: zero counters for units that have been quiet.
    ///
    /// A unit quiet for over a minute loses its minute counter; quiet for
    /// over an hour also loses its hour counter and burst count. Records
    /// themselves are never removed.
    pub fn cleanup(&self) {
        self.cleanup_at(Utc::now());
    }

    /// Run the cleanup pass against a specific instant (for testing).
    pub fn cleanup_at(&self, now: DateTime<Utc>) {
        for mut rec in self.records.iter_mut() {
            let quiet = now - rec.last_order_at;
            if quiet > Duration::minutes(1) {
                rec.orders_last_minute = 0;
            }
            if quiet > Duration::hours(1) {
                rec.orders_last_hour = 0;
                rec.burst_count = 0;
            }
        }
    }

    /// Number of units with a velocity record.
    pub fn tracked_units(&self) -> usize {
        self.records.len()
    }

    /// Snapshot of one unit's record, if it exists.
    pub fn snapshot(&self, unit: &UnitId) -> Option<VelocityRecord> {
        self.records.get(unit).map(|rec| rec.value().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 2, 14, 0, 0).unwrap()
    }

    fn limits() -> PerUnitLimits {
        PerUnitLimits {
            max_orders_per_minute: 3,
            max_orders_per_hour: 100,
            ..PerUnitLimits::default()
        }
    }

    #[test]
    fn test_within_limits() {
        let book = VelocityBook::new();
        let unit = UnitId::new("U1");
        for _ in 0..3 {
            assert_eq!(book.record_at(&unit, &limits(), t0()), VelocityVerdict::Ok);
        }
        let rec = book.snapshot(&unit).unwrap();
        assert_eq!(rec.orders_last_minute, 3);
        assert_eq!(rec.orders_last_hour, 3);
        assert_eq!(rec.burst_count, 0);
    }

    #[test]
    fn test_minute_breach_starts_cooldown() {
        let book = VelocityBook::new();
        let unit = UnitId::new("U1");
        for _ in 0..3 {
            book.record_at(&unit, &limits(), t0());
        }
        // 4th order in the same minute breaches.
        match book.record_at(&unit, &limits(), t0()) {
            VelocityVerdict::MinuteBreach {
                count,
                limit,
                burst_count,
                cooldown_until,
            } => {
                assert_eq!(count, 4);
                assert_eq!(limit, 3);
                assert_eq!(burst_count, 1);
                assert_eq!(cooldown_until, t0() + Duration::seconds(60));
            }
            other => panic!("expected MinuteBreach, got {:?}", other),
        }
    }

    #[test]
    fn test_cooldown_denies_without_counting() {
        let book = VelocityBook::new();
        let unit = UnitId::new("U1");
        for _ in 0..4 {
            book.record_at(&unit, &limits(), t0());
        }
        let before = book.snapshot(&unit).unwrap().orders_last_minute;

        let later = t0() + Duration::seconds(30);
        match book.record_at(&unit, &limits(), later) {
            VelocityVerdict::CooldownActive { until } => {
                assert_eq!(until, t0() + Duration::seconds(60));
            }
            other => panic!("expected CooldownActive, got {:?}", other),
        }
        // Denied attempts during cooldown do not touch the counters.
        assert_eq!(book.snapshot(&unit).unwrap().orders_last_minute, before);
    }

    #[test]
    fn test_cooldown_expires_by_time() {
        let book = VelocityBook::new();
        let unit = UnitId::new("U1");
        for _ in 0..4 {
            book.record_at(&unit, &limits(), t0());
        }
        // Past the deadline the next record proceeds (and breaches again,
        // since the minute counter was never cleaned up).
        let later = t0() + Duration::seconds(61);
        match book.record_at(&unit, &limits(), later) {
            VelocityVerdict::MinuteBreach { burst_count, .. } => {
                assert_eq!(burst_count, 2);
            }
            other => panic!("expected MinuteBreach, got {:?}", other),
        }
    }

    #[test]
    fn test_hour_breach() {
        let book = VelocityBook::new();
        let unit = UnitId::new("U1");
        let lim = PerUnitLimits {
            max_orders_per_minute: 1_000,
            max_orders_per_hour: 5,
            ..PerUnitLimits::default()
        };
        for _ in 0..5 {
            assert_eq!(book.record_at(&unit, &lim, t0()), VelocityVerdict::Ok);
        }
        match book.record_at(&unit, &lim, t0()) {
            VelocityVerdict::HourBreach { count, limit } => {
                assert_eq!(count, 6);
                assert_eq!(limit, 5);
            }
            other => panic!("expected HourBreach, got {:?}", other),
        }
    }

    #[test]
    fn test_cleanup_zeroes_stale_minute_counter() {
        let book = VelocityBook::new();
        let unit = UnitId::new("U1");
        book.record_at(&unit, &limits(), t0());

        book.cleanup_at(t0() + Duration::seconds(90));
        let rec = book.snapshot(&unit).unwrap();
        assert_eq!(rec.orders_last_minute, 0);
        // Hour counter untouched until an hour of quiet.
        assert_eq!(rec.orders_last_hour, 1);
    }

    #[test]
    fn test_cleanup_zeroes_stale_hour_counter_and_burst() {
        let book = VelocityBook::new();
        let unit = UnitId::new("U1");
        for _ in 0..4 {
            book.record_at(&unit, &limits(), t0());
        }
        assert_eq!(book.snapshot(&unit).unwrap().burst_count, 1);

        book.cleanup_at(t0() + Duration::minutes(61));
        let rec = book.snapshot(&unit).unwrap();
        assert_eq!(rec.orders_last_minute, 0);
        assert_eq!(rec.orders_last_hour, 0);
        assert_eq!(rec.burst_count, 0);
    }

    #[test]
    fn test_cleanup_leaves_active_units_alone() {
        let book = VelocityBook::new();
        let unit = UnitId::new("U1");
        book.record_at(&unit, &limits(), t0());

        book.cleanup_at(t0() + Duration::seconds(30));
        assert_eq!(book.snapshot(&unit).unwrap().orders_last_minute, 1);
    }

    #[test]
    fn test_cleanup_never_removes_records() {
        let book = VelocityBook::new();
        book.record_at(&UnitId::new("U1"), &limits(), t0());
        book.record_at(&UnitId::new("U2"), &limits(), t0());

        book.cleanup_at(t0() + Duration::days(2));
        assert_eq!(book.tracked_units(), 2);
    }

    #[test]
    fn test_clear_cooldown_resets_burst() {
        let book = VelocityBook::new();
        let unit = UnitId::new("U1");
        for _ in 0..4 {
            book.record_at(&unit, &limits(), t0());
        }
        assert!(book.cooldown_until(&unit, t0()).is_some());

        book.clear_cooldown(&unit);
        assert!(book.cooldown_until(&unit, t0()).is_none());
        assert_eq!(book.snapshot(&unit).unwrap().burst_count, 0);
    }

    #[test]
    fn test_cooldown_until_is_read_only() {
        let book = VelocityBook::new();
        let unit = UnitId::new("U1");
        for _ in 0..4 {
            book.record_at(&unit, &limits(), t0());
        }
        // Query after expiry reports no cooldown but leaves the stored
        // deadline in place for the next mutating call to clear.
        let later = t0() + Duration::seconds(120);
        assert!(book.cooldown_until(&unit, later).is_none());
        assert!(book.snapshot(&unit).unwrap().cooldown_until.is_some());
    }

    #[test]
    fn test_units_tracked_independently() {
        let book = VelocityBook::new();
        let u1 = UnitId::new("U1");
        let u2 = UnitId::new("U2");
        for _ in 0..4 {
            book.record_at(&u1, &limits(), t0());
        }
        // U1's breach does not affect U2.
        assert_eq!(book.record_at(&u2, &limits(), t0()), VelocityVerdict::Ok);
    }
}
