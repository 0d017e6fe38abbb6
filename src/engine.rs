use crate::config::EngineConfig;
use crate::error::TopologyError;
use crate::eta::{self, Eta, UnknownReason};
use crate::events::{TransitEvent, VehicleStatus};
use crate::fanout::{FanOut, GroupKey, Listener};
use crate::gc::{SweepReport, sweep_vehicles};
use crate::graph::NetworkGraph;
use crate::identifiers::{StopId, VehicleId};
use crate::model::{Coordinate, OccupancyLevel, Route, Stop, TopologyInput};
use crate::path::{self, Path};
use crate::state::{Applied, ReportOutcome, TelemetryReport, TrackingStatus, VehicleState, VehicleTracker};
use crate::store::GraphStore;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

/// Point-in-time counters.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    pub graph_generation: u64,
    pub tracked_vehicles: usize,
    pub accepted_reports: u64,
    pub rejected_reports: u64,
    pub dropped_events: u64,
    pub active_groups: usize,
}

/// The routing and live-tracking core.
///
/// Queries run against an immutable graph snapshot and never block each
/// other or a concurrent topology rebuild. Telemetry for different vehicles
/// is applied in parallel; event publication never waits on listeners.
pub struct TransitEngine {
    config: EngineConfig,
    graph: GraphStore,
    vehicles: VehicleTracker,
    fanout: FanOut,
}

impl TransitEngine {
    pub fn new(config: EngineConfig) -> Self {
        let fanout = FanOut::new(config.group_queue_capacity);
        let vehicles = VehicleTracker::with_max_clock_skew(config.max_clock_skew());
        Self {
            config,
            graph: GraphStore::new(),
            vehicles,
            fanout,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Validates `input` and swaps it in. On error the previous graph keeps serving.
    pub fn load_topology(&self, input: TopologyInput) -> Result<Arc<NetworkGraph>, TopologyError> {
        self.graph.rebuild(input)
    }

    pub fn graph(&self) -> Arc<NetworkGraph> {
        self.graph.snapshot()
    }

    // -- queries --

    pub fn shortest_path(&self, start: &str, end: &str, route: Option<&str>) -> Option<Path> {
        path::shortest_path(&self.graph(), start, end, route)
    }

    pub fn optimal_routes(&self, start: &str, end: &str, limit: usize) -> Vec<Path> {
        path::optimal_routes(&self.graph(), start, end, limit)
    }

    pub fn nearest_stops(&self, point: Coordinate, radius_m: f64, limit: usize) -> Vec<(Stop, f64)> {
        self.graph()
            .nearest_stops(point, radius_m, limit)
            .into_iter()
            .map(|(s, d)| (s.clone(), d))
            .collect()
    }

    pub fn route_stops(&self, route: &str) -> Vec<Stop> {
        self.graph().route_stops(route).into_iter().cloned().collect()
    }

    pub fn routes_through_stop(&self, stop: &str) -> Vec<Route> {
        self.graph()
            .routes_through_stop(stop)
            .into_iter()
            .cloned()
            .collect()
    }

    pub fn estimate_arrival(&self, vehicle: &str, stop: &str) -> Eta {
        self.estimate_arrival_at(vehicle, stop, Utc::now())
    }

    pub fn estimate_arrival_at(&self, vehicle: &str, stop: &str, now: DateTime<Utc>) -> Eta {
        let state = self.vehicles.get(vehicle);
        eta::estimate(&self.graph(), state.as_ref(), stop, now, &self.config)
    }

    pub fn vehicle(&self, vehicle: &str) -> Option<VehicleState> {
        self.vehicles.get(vehicle)
    }

    /// Tracking vehicles within `radius_m` of `point`, nearest first.
    pub fn vehicles_near(&self, point: Coordinate, radius_m: f64, now: DateTime<Utc>) -> Vec<(VehicleState, f64)> {
        self.vehicles.near(point, radius_m, now, self.config.stale_after())
    }

    // -- telemetry --

    /// Applies one position report and enqueues the resulting events.
    /// Rejections are counted and returned, never raised.
    pub fn report_position(&self, report: &TelemetryReport) -> ReportOutcome {
        self.report_position_at(report, Utc::now())
    }

    /// Same as [`report_position`](Self::report_position) with an explicit
    /// ingest clock. Freshness and the future-timestamp check use `now`.
    pub fn report_position_at(&self, report: &TelemetryReport, now: DateTime<Utc>) -> ReportOutcome {
        match self.vehicles.apply(report, now) {
            Ok(applied) => {
                self.publish_applied(&applied, now);
                ReportOutcome::Accepted
            }
            Err(reason) => {
                log::debug!(
                    "report from {} at {} rejected: {:?}",
                    report.vehicle_id,
                    report.timestamp,
                    reason
                );
                ReportOutcome::Rejected(reason)
            }
        }
    }

    fn publish_applied(&self, applied: &Applied, now: DateTime<Utc>) {
        let state = &applied.snapshot;
        let graph = self.graph();
        let fresh = !state.is_silent(now, self.config.stale_after());

        let fix = eta::infer_segment(
            &graph,
            state.route_id.as_str(),
            state.coordinate,
            self.config.projection_tolerance_factor,
        );
        // Path searches run before taking the vehicle's entry lock.
        let etas: Vec<(StopId, Option<u32>)> = self
            .fanout
            .eta_targets(&state.route_id)
            .into_iter()
            .map(|stop| {
                let eta = match &fix {
                    _ if !fresh => Eta::Unknown(UnknownReason::Stale),
                    Some(fix) => eta::estimate_from_fix(&graph, &state.route_id, fix, stop.as_str()),
                    None => Eta::Unknown(UnknownReason::NoPosition),
                };
                (stop, eta.minutes())
            })
            .collect();

        let published = self.vehicles.with_current(&state.vehicle_id, state.last_update, |current| {
            current.segment = fix;
            if !fresh {
                current.status = TrackingStatus::Stale;
            }

            let keys = vehicle_groups(current);
            if applied.previous != Some(current.status) {
                let event = TransitEvent::status(current, current.status.into(), current.last_update);
                self.fanout.publish_event(&keys, &event);
            }
            self.fanout.publish_event(&keys, &TransitEvent::location(current));
            for (stop, minutes) in etas {
                self.publish_eta(current, stop, minutes);
            }
        });
        if published.is_none() {
            log::debug!(
                "report from {} at {} superseded before publishing",
                state.vehicle_id,
                state.last_update
            );
        }
    }

    /// Records rider-reported crowding. Returns false for vehicles not being tracked.
    pub fn report_occupancy(&self, vehicle: &VehicleId, level: OccupancyLevel, at: DateTime<Utc>) -> bool {
        let Some(state) = self.vehicles.set_occupancy(vehicle, level) else {
            return false;
        };
        let event = TransitEvent::status(&state, state.status.into(), at);
        self.fanout.publish_event(&vehicle_groups(&state), &event);
        true
    }

    // Caller holds the vehicle's entry.
    fn publish_eta(&self, state: &mut VehicleState, stop: StopId, minutes: Option<u32>) {
        if !state.note_published_eta(&stop, minutes, self.config.eta_change_threshold_minutes) {
            return;
        }
        let key = GroupKey::StopEta {
            route: state.route_id.clone(),
            stop: stop.clone(),
        };
        self.fanout
            .publish_event(&[key], &TransitEvent::eta(state, stop, minutes));
    }

    /// Runs one staleness pass as of `now` and publishes the transitions.
    pub fn sweep(&self, now: DateTime<Utc>) -> SweepReport {
        let report = sweep_vehicles(&self.vehicles, now, &self.config);

        for state in &report.marked_stale {
            // Skipped when a report revived the vehicle after the scan.
            self.vehicles.with_current(&state.vehicle_id, state.last_update, |current| {
                if current.status != TrackingStatus::Stale {
                    return;
                }
                let event = TransitEvent::status(current, VehicleStatus::Stale, now);
                self.fanout.publish_event(&vehicle_groups(current), &event);
                for stop in self.fanout.eta_targets(&current.route_id) {
                    self.publish_eta(current, stop, None);
                }
            });
        }
        for state in &report.evicted {
            let event = TransitEvent::status(state, VehicleStatus::Evicted, now);
            self.fanout.publish_event(&vehicle_groups(state), &event);
        }
        report
    }

    // -- listeners --

    pub fn subscribe(&self, key: GroupKey) -> Listener {
        self.fanout.subscribe(key)
    }

    pub fn unsubscribe(&self, listener: Listener) {
        self.fanout.unsubscribe(listener)
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            graph_generation: self.graph().generation(),
            tracked_vehicles: self.vehicles.len(),
            accepted_reports: self.vehicles.accepted_reports(),
            rejected_reports: self.vehicles.rejected_reports(),
            dropped_events: self.fanout.dropped_events(),
            active_groups: self.fanout.group_count(),
        }
    }
}

fn vehicle_groups(state: &VehicleState) -> [GroupKey; 3] {
    [
        GroupKey::Operators,
        GroupKey::Route(state.route_id.clone()),
        GroupKey::Vehicle(state.vehicle_id.clone()),
    ]
}
