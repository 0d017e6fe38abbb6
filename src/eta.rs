//! Arrival estimates from a vehicle's last position and the route graph.

use crate::config::EngineConfig;
use crate::geodesy::{haversine_distance, project_onto_segment};
use crate::graph::NetworkGraph;
use crate::identifiers::{RouteId, StopId};
use crate::model::Coordinate;
use crate::path::shortest_path;
use crate::state::{TrackingStatus, VehicleState};
use chrono::{DateTime, Utc};
use serde::Serialize;

const PROJECTION_EPSILON_SECS: f64 = 1e-6;

/// Why an arrival time could not be produced.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownReason {
    NoTelemetry,
    Stale,
    NotOnRoute,
    NoPosition,
    NoPath,
}

/// Whole minutes to arrival, or a reason the estimate is unavailable.
/// `Unknown` is never the same as zero.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Eta {
    Minutes(u32),
    Unknown(UnknownReason),
}

impl Eta {
    pub fn minutes(&self) -> Option<u32> {
        match self {
            Eta::Minutes(m) => Some(*m),
            Eta::Unknown(_) => None,
        }
    }

    // Floors to whole minutes. The epsilon only absorbs projection noise,
    // e.g. 179.99999999 from a vehicle sitting exactly on a stop.
    fn from_seconds(secs: f64) -> Eta {
        let whole_secs = (secs.max(0.0) + PROJECTION_EPSILON_SECS).floor() as u64;
        let minutes = u32::try_from(whole_secs / 60).unwrap_or(u32::MAX);
        Eta::Minutes(minutes.max(1))
    }
}

/// Where on its route a vehicle was placed.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SegmentFix {
    OnConnection {
        from: StopId,
        to: StopId,
        sequence: u32,
        travel_time_secs: u32,
        fraction: f64,
        offset_m: f64,
    },
    /// No connection was close enough; snapped to the nearest route stop.
    AtStop { stop: StopId, distance_m: f64 },
}

/// Maps `position` onto the connection of `route` with the smallest
/// perpendicular offset, rejecting offsets beyond `tolerance_factor` times
/// the connection length. Falls back to the nearest stop of the route.
pub fn infer_segment(
    graph: &NetworkGraph,
    route: &str,
    position: Coordinate,
    tolerance_factor: f64,
) -> Option<SegmentFix> {
    let route_handle = graph.route_handle(route)?;

    let mut best: Option<(SegmentFix, f64)> = None;
    for &c in graph.route_connections(route_handle) {
        let conn = graph.connection_at(c);
        let edge = graph.edge_at(c);
        let proj = project_onto_segment(
            position,
            graph.stop_at(edge.from).coordinate,
            graph.stop_at(edge.to).coordinate,
        );
        if proj.offset_m > tolerance_factor * conn.distance_m {
            continue;
        }
        // Connections are visited in sequence order; strict `<` keeps the earlier one on ties.
        if best.as_ref().is_none_or(|(_, offset)| proj.offset_m < *offset) {
            best = Some((
                SegmentFix::OnConnection {
                    from: conn.from.clone(),
                    to: conn.to.clone(),
                    sequence: conn.sequence,
                    travel_time_secs: conn.travel_time_secs,
                    fraction: proj.fraction,
                    offset_m: proj.offset_m,
                },
                proj.offset_m,
            ));
        }
    }
    if let Some((fix, _)) = best {
        return Some(fix);
    }

    graph
        .route_stops(route)
        .into_iter()
        .map(|s| (s, haversine_distance(position, s.coordinate)))
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(s, d)| SegmentFix::AtStop {
            stop: s.id.clone(),
            distance_m: d,
        })
}

/// ETA from an already inferred position on `route`.
pub fn estimate_from_fix(
    graph: &NetworkGraph,
    route: &RouteId,
    fix: &SegmentFix,
    target: &str,
) -> Eta {
    if !graph.route_serves_stop(route.as_str(), target) {
        return Eta::Unknown(UnknownReason::NotOnRoute);
    }

    let (origin, head_start_secs) = match fix {
        SegmentFix::OnConnection {
            to,
            travel_time_secs,
            fraction,
            ..
        } => (to, f64::from(*travel_time_secs) * (1.0 - fraction)),
        SegmentFix::AtStop { stop, .. } => (stop, 0.0),
    };

    if origin.as_str() == target {
        return Eta::from_seconds(head_start_secs);
    }
    match shortest_path(graph, origin.as_str(), target, Some(route.as_str())) {
        Some(path) => Eta::from_seconds(head_start_secs + path.total_time_secs as f64),
        None => Eta::Unknown(UnknownReason::NoPath),
    }
}

/// ETA for `vehicle` to `target` as of `now`.
pub fn estimate(
    graph: &NetworkGraph,
    vehicle: Option<&VehicleState>,
    target: &str,
    now: DateTime<Utc>,
    config: &EngineConfig,
) -> Eta {
    let Some(state) = vehicle else {
        return Eta::Unknown(UnknownReason::NoTelemetry);
    };
    if state.status == TrackingStatus::Stale || state.is_silent(now, config.stale_after()) {
        return Eta::Unknown(UnknownReason::Stale);
    }
    if !graph.route_serves_stop(state.route_id.as_str(), target) {
        return Eta::Unknown(UnknownReason::NotOnRoute);
    }

    match infer_segment(
        graph,
        state.route_id.as_str(),
        state.coordinate,
        config.projection_tolerance_factor,
    ) {
        Some(fix) => estimate_from_fix(graph, &state.route_id, &fix, target),
        None => Eta::Unknown(UnknownReason::NoPosition),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identifiers::VehicleId;
    use crate::model::TopologyInput;
    use crate::test_support::{connection, line_topology, route, stop};
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap()
    }

    fn vehicle_at(id: &str, route: &str, position: Coordinate, at: DateTime<Utc>) -> VehicleState {
        VehicleState::new(VehicleId::new(id), RouteId::new(route), position, 8.0, 90.0, at)
    }

    #[test]
    fn test_scenario_vehicle_at_stop_b() {
        let graph = NetworkGraph::build(line_topology(), 1).unwrap();
        let b = graph.stop("B").unwrap().coordinate;
        let v1 = vehicle_at("V1", "R1", b, t0());

        let eta = estimate(&graph, Some(&v1), "C", t0(), &EngineConfig::default());
        assert_eq!(eta, Eta::Minutes(3));
    }

    #[test]
    fn test_scenario_stale_vehicle_is_unknown() {
        let graph = NetworkGraph::build(line_topology(), 1).unwrap();
        let a = graph.stop("A").unwrap().coordinate;
        let v2 = vehicle_at("V2", "R1", a, t0() - Duration::minutes(20));
        let config = EngineConfig {
            stale_after_secs: 300,
            ..Default::default()
        };

        for target in ["A", "B", "C"] {
            assert_eq!(
                estimate(&graph, Some(&v2), target, t0(), &config),
                Eta::Unknown(UnknownReason::Stale)
            );
        }
    }

    #[test]
    fn test_missing_vehicle_is_unknown() {
        let graph = NetworkGraph::build(line_topology(), 1).unwrap();
        assert_eq!(
            estimate(&graph, None, "C", t0(), &EngineConfig::default()),
            Eta::Unknown(UnknownReason::NoTelemetry)
        );
    }

    #[test]
    fn test_target_off_route_is_unknown() {
        let mut input = line_topology();
        input.stops.push(stop("D", 0.01, 0.0));
        input.connections.push(connection("A", "D", "R2", 1100.0, 240, 1));
        let graph = NetworkGraph::build(input, 1).unwrap();
        let v = vehicle_at("V1", "R1", Coordinate::new(0.0, 0.001), t0());

        assert_eq!(
            estimate(&graph, Some(&v), "D", t0(), &EngineConfig::default()),
            Eta::Unknown(UnknownReason::NotOnRoute)
        );
    }

    #[test]
    fn test_stop_already_passed_has_no_path() {
        let graph = NetworkGraph::build(line_topology(), 1).unwrap();
        // Two thirds of the way from B to C.
        let v = vehicle_at("V1", "R1", Coordinate::new(0.0, 0.0093), t0());

        assert_eq!(
            estimate(&graph, Some(&v), "A", t0(), &EngineConfig::default()),
            Eta::Unknown(UnknownReason::NoPath)
        );
    }

    #[test]
    fn test_midway_is_prorated() {
        let graph = NetworkGraph::build(line_topology(), 1).unwrap();
        // Halfway between A (0.0) and B (0.0045).
        let v = vehicle_at("V1", "R1", Coordinate::new(0.0, 0.00225), t0());
        let config = EngineConfig::default();

        // 60s left on A->B, then 180s B->C.
        assert_eq!(estimate(&graph, Some(&v), "C", t0(), &config), Eta::Minutes(4));
        // 60s to B.
        assert_eq!(estimate(&graph, Some(&v), "B", t0(), &config), Eta::Minutes(1));
    }

    #[test]
    fn test_seconds_floor_to_minutes() {
        assert_eq!(Eta::from_seconds(179.6), Eta::Minutes(2));
        assert_eq!(Eta::from_seconds(180.0), Eta::Minutes(3));
        assert_eq!(Eta::from_seconds(180.0 - 1e-9), Eta::Minutes(3));
        assert_eq!(Eta::from_seconds(119.999), Eta::Minutes(1));
        assert_eq!(Eta::from_seconds(59.0), Eta::Minutes(1));
        assert_eq!(Eta::from_seconds(-4.0), Eta::Minutes(1));
    }

    #[test]
    fn test_arrival_clamped_to_one_minute() {
        let graph = NetworkGraph::build(line_topology(), 1).unwrap();
        let c = graph.stop("C").unwrap().coordinate;
        let v = vehicle_at("V1", "R1", c, t0());

        assert_eq!(
            estimate(&graph, Some(&v), "C", t0(), &EngineConfig::default()),
            Eta::Minutes(1)
        );
    }

    #[test]
    fn test_infer_segment_prefers_lower_sequence_on_tie() {
        let graph = NetworkGraph::build(line_topology(), 1).unwrap();
        let b = graph.stop("B").unwrap().coordinate;

        match infer_segment(&graph, "R1", b, 2.0) {
            Some(SegmentFix::OnConnection { sequence, to, .. }) => {
                assert_eq!(sequence, 1);
                assert_eq!(to.as_str(), "B");
            }
            other => panic!("unexpected fix {other:?}"),
        }
    }

    #[test]
    fn test_far_vehicle_falls_back_to_nearest_stop() {
        let graph = NetworkGraph::build(line_topology(), 1).unwrap();
        // Roughly 5.5 km north of C, well beyond 2x any connection length.
        let far = Coordinate::new(0.05, 0.0117);

        match infer_segment(&graph, "R1", far, 2.0) {
            Some(SegmentFix::AtStop { stop, distance_m }) => {
                assert_eq!(stop.as_str(), "C");
                assert!(distance_m > 5_000.0);
            }
            other => panic!("unexpected fix {other:?}"),
        }

        let v = vehicle_at("V1", "R1", far, t0());
        assert_eq!(
            estimate(&graph, Some(&v), "C", t0(), &EngineConfig::default()),
            Eta::Minutes(1)
        );
    }

    #[test]
    fn test_route_without_stops_has_no_position() {
        let input = TopologyInput {
            stops: vec![stop("A", 0.0, 0.0)],
            routes: vec![route("R1")],
            connections: Vec::new(),
        };
        let graph = NetworkGraph::build(input, 1).unwrap();
        assert!(infer_segment(&graph, "R1", Coordinate::new(0.0, 0.0), 2.0).is_none());
        assert!(infer_segment(&graph, "R9", Coordinate::new(0.0, 0.0), 2.0).is_none());
    }
}
