//! Transit network routing and live vehicle tracking.
//!
//! A [`TransitEngine`] holds the stop/route graph, answers path and arrival
//! queries against it, applies vehicle telemetry and pushes location, ETA and
//! status events to listener groups.

pub mod config;
pub mod engine;
pub mod error;
pub mod eta;
pub mod events;
pub mod fanout;
pub mod gc;
pub mod geodesy;
pub mod graph;
pub mod identifiers;
pub mod loader;
pub mod model;
pub mod path;
pub mod state;
pub mod store;

#[cfg(test)]
mod test_support;

pub use config::{EngineConfig, ServiceConfig};
pub use engine::{EngineStats, TransitEngine};
pub use error::{GroupKeyParseError, TopologyError};
pub use eta::{Eta, SegmentFix, UnknownReason};
pub use events::{TransitEvent, VehicleStatus};
pub use fanout::{EventSink, GroupKey, Listener, SinkClosed};
pub use graph::NetworkGraph;
pub use identifiers::{RouteId, StopId, VehicleId};
pub use model::{
    Connection, Coordinate, Direction, OccupancyLevel, Route, RouteClass, Stop, StopCategory,
    TopologyInput,
};
pub use path::Path;
pub use state::{RejectReason, ReportOutcome, TelemetryReport, TrackingStatus, VehicleState};
