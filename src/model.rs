use crate::identifiers::{RouteId, StopId};
use serde::{Deserialize, Serialize};

/// WGS84 position in decimal degrees.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinate {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StopCategory {
    #[default]
    Regular,
    Terminal,
    Interchange,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Stop {
    pub id: StopId,
    pub name: String,
    pub coordinate: Coordinate,
    #[serde(default)]
    pub category: StopCategory,
    /// Facility tags such as `shelter`, `bench` or `lighting`.
    #[serde(default)]
    pub facilities: Vec<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Inbound,
    Outbound,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteClass {
    #[default]
    City,
    Express,
    Local,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Route {
    pub id: RouteId,
    pub name: String,
    pub number: String,
    pub direction: Direction,
    #[serde(default)]
    pub class: RouteClass,
    /// Nominal minutes between vehicles.
    #[serde(default = "default_frequency")]
    pub frequency_minutes: u32,
}

fn default_frequency() -> u32 {
    15
}

/// Directed, weighted edge between two stops, owned by one route.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    pub from: StopId,
    pub to: StopId,
    pub route_id: RouteId,
    pub distance_m: f64,
    pub travel_time_secs: u32,
    pub sequence: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OccupancyLevel {
    Low,
    Medium,
    High,
}

/// Full record set handed over by the topology loader for one rebuild.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TopologyInput {
    pub stops: Vec<Stop>,
    pub routes: Vec<Route>,
    pub connections: Vec<Connection>,
}
