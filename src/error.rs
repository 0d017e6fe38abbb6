use crate::identifiers::{RouteId, StopId};
use thiserror::Error;

/// Malformed or inconsistent topology input. Fatal to the load attempt
/// only; the previously active graph keeps serving.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TopologyError {
    #[error("duplicate stop id {0}")]
    DuplicateStop(StopId),
    #[error("duplicate route id {0}")]
    DuplicateRoute(RouteId),
    #[error("stop {stop} has an invalid coordinate ({lat}, {lng})")]
    InvalidCoordinate { stop: StopId, lat: f64, lng: f64 },
    #[error("connection #{index} references unknown stop {stop}")]
    UnknownStop { index: usize, stop: StopId },
    #[error("connection #{index} references unknown route {route}")]
    UnknownRoute { index: usize, route: RouteId },
    #[error("connection #{index} has non-positive distance {distance_m}")]
    NonPositiveDistance { index: usize, distance_m: f64 },
    #[error("connection #{index} has non-positive travel time")]
    NonPositiveTravelTime { index: usize },
    #[error("route {route} has more than one connection with sequence {sequence}")]
    DuplicateSequence { route: RouteId, sequence: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unrecognised group key {0:?}")]
pub struct GroupKeyParseError(pub String);
