use crate::config::EngineConfig;
use crate::eta::SegmentFix;
use crate::geodesy::haversine_distance;
use crate::identifiers::{RouteId, StopId, VehicleId};
use crate::model::{Coordinate, OccupancyLevel};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackingStatus {
    Tracking,
    Stale,
}

/// Timestamped position report from a vehicle.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TelemetryReport {
    pub vehicle_id: VehicleId,
    pub route_id: RouteId,
    pub coordinate: Coordinate,
    #[serde(default)]
    pub speed_mps: f64,
    #[serde(default)]
    pub heading_deg: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    InvalidCoordinate,
    InvalidMotion,
    /// Dated further into the future than the allowed clock skew.
    InvalidTimestamp,
    /// Not newer than the state already stored for the vehicle.
    OutOfOrder,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReportOutcome {
    Accepted,
    Rejected(RejectReason),
}

/// Latest known state of one vehicle. Only telemetry mutates it.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct VehicleState {
    pub vehicle_id: VehicleId,
    pub route_id: RouteId,
    pub coordinate: Coordinate,
    pub speed_mps: f64,
    pub heading_deg: f64,
    pub occupancy: Option<OccupancyLevel>,
    pub last_update: DateTime<Utc>,
    pub status: TrackingStatus,
    pub segment: Option<SegmentFix>,
    // Last ETA pushed per watched stop; `None` means Unknown was pushed.
    #[serde(skip)]
    pub(crate) published_eta: HashMap<StopId, Option<u32>>,
}

impl VehicleState {
    pub fn new(
        vehicle_id: VehicleId,
        route_id: RouteId,
        coordinate: Coordinate,
        speed_mps: f64,
        heading_deg: f64,
        last_update: DateTime<Utc>,
    ) -> Self {
        Self {
            vehicle_id,
            route_id,
            coordinate,
            speed_mps,
            heading_deg,
            occupancy: None,
            last_update,
            status: TrackingStatus::Tracking,
            segment: None,
            published_eta: HashMap::new(),
        }
    }

    /// True when nothing has been heard for longer than `window`.
    pub fn is_silent(&self, now: DateTime<Utc>, window: Duration) -> bool {
        now.signed_duration_since(self.last_update) > window
    }

    /// Remembers `eta` as published for `stop` when it differs enough from
    /// the last published value. Returns whether it should go out.
    pub(crate) fn note_published_eta(&mut self, stop: &StopId, eta: Option<u32>, threshold_minutes: u32) -> bool {
        let changed = match (self.published_eta.get(stop), eta) {
            (None, _) => true,
            (Some(None), next) => next.is_some(),
            (Some(Some(_)), None) => true,
            (Some(Some(previous)), Some(next)) => previous.abs_diff(next) >= threshold_minutes,
        };
        if changed {
            self.published_eta.insert(stop.clone(), eta);
        }
        changed
    }

    fn from_report(report: &TelemetryReport) -> Self {
        Self::new(
            report.vehicle_id.clone(),
            report.route_id.clone(),
            report.coordinate,
            report.speed_mps,
            report.heading_deg,
            report.timestamp,
        )
    }

    fn apply(&mut self, report: &TelemetryReport) {
        if self.route_id != report.route_id {
            self.route_id = report.route_id.clone();
            self.published_eta.clear();
        }
        self.coordinate = report.coordinate;
        self.speed_mps = report.speed_mps;
        self.heading_deg = report.heading_deg;
        self.last_update = report.timestamp;
        self.status = TrackingStatus::Tracking;
        self.segment = None;
    }
}

/// Result of applying one accepted report.
#[derive(Debug)]
pub(crate) struct Applied {
    pub snapshot: VehicleState,
    /// Status before this report; `None` for a vehicle seen for the first time.
    pub previous: Option<TrackingStatus>,
}


/// Live vehicle table. Each vehicle's record is only touched under its own
/// map entry, so reports for different vehicles do not serialize on a
/// shared lock.
pub struct VehicleTracker {
    vehicles: DashMap<VehicleId, VehicleState>,
    max_clock_skew: Duration,
    accepted: AtomicU64,
    rejected: AtomicU64,
}

impl Default for VehicleTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl VehicleTracker {
    pub fn new() -> Self {
        Self::with_max_clock_skew(EngineConfig::default().max_clock_skew())
    }

    /// Reports dated more than `max_clock_skew` past the ingest clock are rejected.
    pub fn with_max_clock_skew(max_clock_skew: Duration) -> Self {
        Self {
            vehicles: DashMap::new(),
            max_clock_skew,
            accepted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        }
    }

    fn validate(&self, report: &TelemetryReport, now: DateTime<Utc>) -> Result<(), RejectReason> {
        if !report.coordinate.is_valid() {
            return Err(RejectReason::InvalidCoordinate);
        }
        if report.timestamp > now + self.max_clock_skew {
            return Err(RejectReason::InvalidTimestamp);
        }
        if !report.speed_mps.is_finite() || report.speed_mps < 0.0 || !report.heading_deg.is_finite()
        {
            return Err(RejectReason::InvalidMotion);
        }
        Ok(())
    }

    /// Applies `report` with last-write-wins on its timestamp. `now` is the
    /// ingest clock used to reject future-dated reports.
    pub(crate) fn apply(&self, report: &TelemetryReport, now: DateTime<Utc>) -> Result<Applied, RejectReason> {
        let result = self.validate(report, now).and_then(|_| {
            match self.vehicles.entry(report.vehicle_id.clone()) {
                Entry::Occupied(mut e) => {
                    let state = e.get_mut();
                    if report.timestamp <= state.last_update {
                        return Err(RejectReason::OutOfOrder);
                    }
                    let previous = Some(state.status);
                    state.apply(report);
                    Ok(Applied {
                        snapshot: state.clone(),
                        previous,
                    })
                }
                Entry::Vacant(e) => {
                    let state = VehicleState::from_report(report);
                    let snapshot = state.clone();
                    e.insert(state);
                    Ok(Applied {
                        snapshot,
                        previous: None,
                    })
                }
            }
        });

        match &result {
            Ok(_) => self.accepted.fetch_add(1, Ordering::Relaxed),
            Err(_) => self.rejected.fetch_add(1, Ordering::Relaxed),
        };
        result
    }

    /// Runs `f` on the vehicle's state only if it still holds the report
    /// stamped `at`. Returns `None` once a newer report has replaced it.
    ///
    /// The entry stays locked while `f` runs, so work done inside is ordered
    /// with the same vehicle's later reports.
    pub(crate) fn with_current<R>(
        &self,
        vehicle: &VehicleId,
        at: DateTime<Utc>,
        f: impl FnOnce(&mut VehicleState) -> R,
    ) -> Option<R> {
        let mut state = self.vehicles.get_mut(vehicle)?;
        (state.last_update == at).then(|| f(state.value_mut()))
    }

    pub(crate) fn set_occupancy(&self, vehicle: &VehicleId, level: OccupancyLevel) -> Option<VehicleState> {
        let mut state = self.vehicles.get_mut(vehicle)?;
        state.occupancy = Some(level);
        Some(state.clone())
    }

    pub fn get(&self, vehicle: &str) -> Option<VehicleState> {
        self.vehicles.get(vehicle).map(|r| r.value().clone())
    }

    pub fn len(&self) -> usize {
        self.vehicles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vehicles.is_empty()
    }

    /// Tracking vehicles within `radius_m` of `point`, nearest first.
    pub fn near(
        &self,
        point: Coordinate,
        radius_m: f64,
        now: DateTime<Utc>,
        stale_after: Duration,
    ) -> Vec<(VehicleState, f64)> {
        let mut nearby: Vec<(VehicleState, f64)> = self
            .vehicles
            .iter()
            .filter(|r| r.status == TrackingStatus::Tracking && !r.is_silent(now, stale_after))
            .filter_map(|r| {
                let d = haversine_distance(point, r.coordinate);
                (d <= radius_m).then(|| (r.value().clone(), d))
            })
            .collect();
        nearby.sort_by(|a, b| {
            a.1.total_cmp(&b.1)
                .then_with(|| a.0.vehicle_id.cmp(&b.0.vehicle_id))
        });
        nearby
    }

    pub fn accepted_reports(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }

    pub fn rejected_reports(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    pub(crate) fn vehicles(&self) -> &DashMap<VehicleId, VehicleState> {
        &self.vehicles
    }
}
