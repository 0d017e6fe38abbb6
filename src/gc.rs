use crate::config::EngineConfig;
use crate::identifiers::VehicleId;
use crate::state::{TrackingStatus, VehicleState, VehicleTracker};
use chrono::{DateTime, Utc};

/// Lifecycle transitions made by one sweep.
#[derive(Debug, Default)]
pub struct SweepReport {
    /// Tracking -> Stale. State is kept for display.
    pub marked_stale: Vec<VehicleState>,
    /// Stale -> gone.
    pub evicted: Vec<VehicleState>,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.marked_stale.is_empty() && self.evicted.is_empty()
    }
}

/// Marks silent vehicles Stale and evicts those silent past the eviction window.
pub fn sweep_vehicles(tracker: &VehicleTracker, now: DateTime<Utc>, config: &EngineConfig) -> SweepReport {
    let stale_after = config.stale_after();
    let evict_after = config.evict_after();
    let mut report = SweepReport::default();
    let mut to_evict: Vec<VehicleId> = Vec::new();

    for mut r in tracker.vehicles().iter_mut() {
        if r.is_silent(now, evict_after) {
            to_evict.push(r.key().clone());
        } else if r.status == TrackingStatus::Tracking && r.is_silent(now, stale_after) {
            r.status = TrackingStatus::Stale;
            report.marked_stale.push(r.value().clone());
        }
    }

    // A report may have landed between the scan and here; re-check under the entry lock.
    for vehicle in to_evict {
        if let Some((_, state)) = tracker
            .vehicles()
            .remove_if(&vehicle, |_, s| s.is_silent(now, evict_after))
        {
            report.evicted.push(state);
        }
    }

    if !report.is_empty() {
        log::info!(
            "sweep: {} vehicle(s) marked stale, {} evicted",
            report.marked_stale.len(),
            report.evicted.len()
        );
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identifiers::RouteId;
    use crate::model::Coordinate;
    use crate::state::TelemetryReport;
    use chrono::{Duration, TimeZone};

    fn report(vehicle: &str, at: DateTime<Utc>) -> TelemetryReport {
        TelemetryReport {
            vehicle_id: VehicleId::new(vehicle),
            route_id: RouteId::new("R1"),
            coordinate: Coordinate::new(0.0, 0.0),
            speed_mps: 0.0,
            heading_deg: 0.0,
            timestamp: at,
        }
    }

    #[test]
    fn test_sweep_lifecycle() {
        let tracker = VehicleTracker::new();
        let config = EngineConfig {
            stale_after_secs: 300,
            evict_after_secs: 1800,
            ..Default::default()
        };
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();

        tracker.apply(&report("active", now - Duration::seconds(30)), now).unwrap();
        tracker.apply(&report("quiet", now - Duration::minutes(10)), now).unwrap();
        tracker.apply(&report("gone", now - Duration::hours(1)), now).unwrap();

        let first = sweep_vehicles(&tracker, now, &config);
        let stale: Vec<&str> = first.marked_stale.iter().map(|s| s.vehicle_id.as_str()).collect();
        let evicted: Vec<&str> = first.evicted.iter().map(|s| s.vehicle_id.as_str()).collect();
        assert_eq!(stale, vec!["quiet"]);
        assert_eq!(evicted, vec!["gone"]);

        assert_eq!(tracker.get("active").unwrap().status, TrackingStatus::Tracking);
        assert_eq!(tracker.get("quiet").unwrap().status, TrackingStatus::Stale);
        assert!(tracker.get("gone").is_none());

        // Already stale vehicles are not reported again.
        let second = sweep_vehicles(&tracker, now + Duration::seconds(10), &config);
        assert!(second.is_empty());

        let later = sweep_vehicles(&tracker, now + Duration::minutes(25), &config);
        let evicted: Vec<&str> = later.evicted.iter().map(|s| s.vehicle_id.as_str()).collect();
        assert_eq!(evicted, vec!["quiet"]);
    }

    #[test]
    fn test_stale_vehicle_resumes_on_report() {
        let tracker = VehicleTracker::new();
        let config = EngineConfig::default();
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();

        tracker.apply(&report("V1", now - Duration::minutes(10)), now).unwrap();
        sweep_vehicles(&tracker, now, &config);
        assert_eq!(tracker.get("V1").unwrap().status, TrackingStatus::Stale);

        let applied = tracker.apply(&report("V1", now), now).unwrap();
        assert_eq!(applied.previous, Some(TrackingStatus::Stale));
        assert_eq!(tracker.get("V1").unwrap().status, TrackingStatus::Tracking);
    }
}
