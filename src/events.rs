use crate::identifiers::{RouteId, StopId, VehicleId};
use crate::model::OccupancyLevel;
use crate::state::{TrackingStatus, VehicleState};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VehicleStatus {
    Tracking,
    Stale,
    Evicted,
}

impl From<TrackingStatus> for VehicleStatus {
    fn from(status: TrackingStatus) -> Self {
        match status {
            TrackingStatus::Tracking => VehicleStatus::Tracking,
            TrackingStatus::Stale => VehicleStatus::Stale,
        }
    }
}

/// Events pushed to listener groups, tagged by their wire name.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "event")]
pub enum TransitEvent {
    #[serde(rename = "bus:location")]
    Location {
        vehicle_id: VehicleId,
        route_id: RouteId,
        latitude: f64,
        longitude: f64,
        speed: f64,
        heading: f64,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename = "eta:update")]
    EtaUpdate {
        vehicle_id: VehicleId,
        route_id: RouteId,
        stop_id: StopId,
        /// `null` when the ETA became unknown.
        eta_minutes: Option<u32>,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename = "bus:status")]
    Status {
        vehicle_id: VehicleId,
        route_id: RouteId,
        status: VehicleStatus,
        occupancy: Option<OccupancyLevel>,
        timestamp: DateTime<Utc>,
    },
}

impl TransitEvent {
    pub fn location(state: &VehicleState) -> Self {
        TransitEvent::Location {
            vehicle_id: state.vehicle_id.clone(),
            route_id: state.route_id.clone(),
            latitude: state.coordinate.lat,
            longitude: state.coordinate.lng,
            speed: state.speed_mps,
            heading: state.heading_deg,
            timestamp: state.last_update,
        }
    }

    pub fn status(state: &VehicleState, status: VehicleStatus, timestamp: DateTime<Utc>) -> Self {
        TransitEvent::Status {
            vehicle_id: state.vehicle_id.clone(),
            route_id: state.route_id.clone(),
            status,
            occupancy: state.occupancy,
            timestamp,
        }
    }

    pub fn eta(state: &VehicleState, stop_id: StopId, eta_minutes: Option<u32>) -> Self {
        TransitEvent::EtaUpdate {
            vehicle_id: state.vehicle_id.clone(),
            route_id: state.route_id.clone(),
            stop_id,
            eta_minutes,
            timestamp: state.last_update,
        }
    }

    /// Serialized once and shared by every listener.
    pub fn to_payload(&self) -> serde_json::Result<Arc<str>> {
        serde_json::to_string(self).map(Arc::from)
    }
}
