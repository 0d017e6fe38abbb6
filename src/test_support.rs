//! Shared fixtures for unit tests.

use crate::identifiers::{RouteId, StopId};
use crate::model::{
    Connection, Coordinate, Direction, Route, RouteClass, Stop, StopCategory, TopologyInput,
};

pub fn stop(id: &str, lat: f64, lng: f64) -> Stop {
    Stop {
        id: StopId::new(id),
        name: format!("Stop {id}"),
        coordinate: Coordinate::new(lat, lng),
        category: StopCategory::Regular,
        facilities: Vec::new(),
    }
}

pub fn route(id: &str) -> Route {
    Route {
        id: RouteId::new(id),
        name: format!("Route {id}"),
        number: id.trim_start_matches('R').to_string(),
        direction: Direction::Outbound,
        class: RouteClass::City,
        frequency_minutes: 15,
    }
}

pub fn connection(
    from: &str,
    to: &str,
    route_id: &str,
    distance_m: f64,
    travel_time_secs: u32,
    sequence: u32,
) -> Connection {
    Connection {
        from: StopId::new(from),
        to: StopId::new(to),
        route_id: RouteId::new(route_id),
        distance_m,
        travel_time_secs,
        sequence,
    }
}

/// A -> B -> C along the equator on route R1; R2 exists with no connections.
///
/// A->B is 120s / 500m, B->C is 180s / 800m.
pub fn line_topology() -> TopologyInput {
    TopologyInput {
        stops: vec![
            stop("A", 0.0, 0.0),
            stop("B", 0.0, 0.0045),
            stop("C", 0.0, 0.0117),
        ],
        routes: vec![route("R1"), route("R2")],
        connections: vec![
            connection("A", "B", "R1", 500.0, 120, 1),
            connection("B", "C", "R1", 800.0, 180, 2),
        ],
    }
}

/// Small multi-route network with several competing A -> E paths.
///
/// ```text
///   R1: A -> B -> C -> E
///   R2: A -> D -> E
///   R3: B -> D, D -> C
///   R4: A -> E (slow direct)
/// ```
pub fn mesh_topology() -> TopologyInput {
    TopologyInput {
        stops: vec![
            stop("A", 0.0, 0.0),
            stop("B", 0.0, 0.005),
            stop("C", 0.0, 0.010),
            stop("D", 0.004, 0.006),
            stop("E", 0.0, 0.015),
        ],
        routes: vec![route("R1"), route("R2"), route("R3"), route("R4")],
        connections: vec![
            connection("A", "B", "R1", 550.0, 100, 1),
            connection("B", "C", "R1", 560.0, 100, 2),
            connection("C", "E", "R1", 555.0, 100, 3),
            connection("A", "D", "R2", 800.0, 150, 1),
            connection("D", "E", "R2", 1000.0, 150, 2),
            connection("B", "D", "R3", 450.0, 60, 1),
            connection("D", "C", "R3", 600.0, 80, 2),
            connection("A", "E", "R4", 1700.0, 600, 1),
        ],
    }
}
