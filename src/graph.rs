//! Immutable network topology: stops, routes and directed connections laid
//! out in flat arrays with integer handles for adjacency.

use crate::error::TopologyError;
use crate::geodesy::haversine_distance;
use crate::identifiers::{RouteId, StopId};
use crate::model::{Connection, Coordinate, Route, Stop, TopologyInput};
use std::collections::{HashMap, HashSet};

#[derive(Clone, Copy, Debug)]
pub(crate) struct Edge {
    pub from: usize,
    pub to: usize,
    pub route: usize,
}

#[derive(Debug)]
pub struct NetworkGraph {
    generation: u64,
    stops: Vec<Stop>,
    stop_index: HashMap<StopId, usize>,
    routes: Vec<Route>,
    route_index: HashMap<RouteId, usize>,
    connections: Vec<Connection>,
    // Parallel to `connections`.
    edges: Vec<Edge>,
    // Stop handle -> connection handles leaving it.
    outgoing: Vec<Vec<usize>>,
    // Route handle -> connection handles sorted by sequence.
    by_route: Vec<Vec<usize>>,
}

impl NetworkGraph {
    pub fn empty() -> Self {
        Self {
            generation: 0,
            stops: Vec::new(),
            stop_index: HashMap::new(),
            routes: Vec::new(),
            route_index: HashMap::new(),
            connections: Vec::new(),
            edges: Vec::new(),
            outgoing: Vec::new(),
            by_route: Vec::new(),
        }
    }

    /// Validates `input` and builds the adjacency indices.
    pub fn build(input: TopologyInput, generation: u64) -> Result<Self, TopologyError> {
        let TopologyInput {
            stops,
            routes,
            connections,
        } = input;

        let mut stop_index = HashMap::with_capacity(stops.len());
        for (idx, stop) in stops.iter().enumerate() {
            if !stop.coordinate.is_valid() {
                return Err(TopologyError::InvalidCoordinate {
                    stop: stop.id.clone(),
                    lat: stop.coordinate.lat,
                    lng: stop.coordinate.lng,
                });
            }
            if stop_index.insert(stop.id.clone(), idx).is_some() {
                return Err(TopologyError::DuplicateStop(stop.id.clone()));
            }
        }

        let mut route_index = HashMap::with_capacity(routes.len());
        for (idx, route) in routes.iter().enumerate() {
            if route_index.insert(route.id.clone(), idx).is_some() {
                return Err(TopologyError::DuplicateRoute(route.id.clone()));
            }
        }

        let mut edges = Vec::with_capacity(connections.len());
        let mut seen_sequences: HashSet<(usize, u32)> = HashSet::with_capacity(connections.len());
        for (index, conn) in connections.iter().enumerate() {
            let from = *stop_index
                .get(&conn.from)
                .ok_or_else(|| TopologyError::UnknownStop {
                    index,
                    stop: conn.from.clone(),
                })?;
            let to = *stop_index
                .get(&conn.to)
                .ok_or_else(|| TopologyError::UnknownStop {
                    index,
                    stop: conn.to.clone(),
                })?;
            let route = *route_index
                .get(&conn.route_id)
                .ok_or_else(|| TopologyError::UnknownRoute {
                    index,
                    route: conn.route_id.clone(),
                })?;

            if !conn.distance_m.is_finite() || conn.distance_m <= 0.0 {
                return Err(TopologyError::NonPositiveDistance {
                    index,
                    distance_m: conn.distance_m,
                });
            }
            if conn.travel_time_secs == 0 {
                return Err(TopologyError::NonPositiveTravelTime { index });
            }
            if !seen_sequences.insert((route, conn.sequence)) {
                return Err(TopologyError::DuplicateSequence {
                    route: conn.route_id.clone(),
                    sequence: conn.sequence,
                });
            }

            edges.push(Edge { from, to, route });
        }

        let mut outgoing = vec![Vec::new(); stops.len()];
        let mut by_route = vec![Vec::new(); routes.len()];
        for (idx, edge) in edges.iter().enumerate() {
            outgoing[edge.from].push(idx);
            by_route[edge.route].push(idx);
        }

        // Deterministic neighbor order: destination id, then owning route, then sequence.
        for list in outgoing.iter_mut() {
            list.sort_by(|&a, &b| {
                let (ca, cb) = (&connections[a], &connections[b]);
                ca.to
                    .cmp(&cb.to)
                    .then_with(|| ca.route_id.cmp(&cb.route_id))
                    .then_with(|| ca.sequence.cmp(&cb.sequence))
            });
        }
        for list in by_route.iter_mut() {
            list.sort_by_key(|&c| connections[c].sequence);
        }

        log::info!(
            "built network graph: {} stops, {} routes, {} connections",
            stops.len(),
            routes.len(),
            connections.len()
        );

        Ok(Self {
            generation,
            stops,
            stop_index,
            routes,
            route_index,
            connections,
            edges,
            outgoing,
            by_route,
        })
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn with_generation(mut self, generation: u64) -> Self {
        self.generation = generation;
        self
    }

    pub fn stop_count(&self) -> usize {
        self.stops.len()
    }

    pub fn route_count(&self) -> usize {
        self.routes.len()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn stop(&self, id: &str) -> Option<&Stop> {
        self.stop_index.get(id).map(|&idx| &self.stops[idx])
    }

    pub fn route(&self, id: &str) -> Option<&Route> {
        self.route_index.get(id).map(|&idx| &self.routes[idx])
    }

    pub fn stops(&self) -> impl Iterator<Item = &Stop> {
        self.stops.iter()
    }

    pub fn routes(&self) -> impl Iterator<Item = &Route> {
        self.routes.iter()
    }

    /// Directed out-edges of `stop`, optionally restricted to one route.
    pub fn neighbors(&self, stop: &str, route: Option<&str>) -> Vec<(&Connection, &Stop)> {
        let Some(&from) = self.stop_index.get(stop) else {
            return Vec::new();
        };
        let route_filter = match route {
            Some(r) => match self.route_index.get(r) {
                Some(&idx) => Some(idx),
                None => return Vec::new(),
            },
            None => None,
        };

        self.outgoing[from]
            .iter()
            .filter(|&&c| route_filter.is_none_or(|r| self.edges[c].route == r))
            .map(|&c| (&self.connections[c], &self.stops[self.edges[c].to]))
            .collect()
    }

    /// Connections of `route` in sequence order.
    pub fn connections_for_route(&self, route: &str) -> Vec<&Connection> {
        match self.route_index.get(route) {
            Some(&idx) => self.by_route[idx]
                .iter()
                .map(|&c| &self.connections[c])
                .collect(),
            None => Vec::new(),
        }
    }

    /// Stops served by `route` in traversal order.
    pub fn route_stops(&self, route: &str) -> Vec<&Stop> {
        let Some(&idx) = self.route_index.get(route) else {
            return Vec::new();
        };

        let mut ordered: Vec<usize> = Vec::new();
        for &c in &self.by_route[idx] {
            let edge = self.edges[c];
            if ordered.last() != Some(&edge.from) {
                ordered.push(edge.from);
            }
            ordered.push(edge.to);
        }
        ordered.into_iter().map(|s| &self.stops[s]).collect()
    }

    pub fn route_serves_stop(&self, route: &str, stop: &str) -> bool {
        let (Some(&r), Some(&s)) = (self.route_index.get(route), self.stop_index.get(stop)) else {
            return false;
        };
        self.by_route[r]
            .iter()
            .any(|&c| self.edges[c].from == s || self.edges[c].to == s)
    }

    /// Distinct routes departing from `stop`, by route id.
    pub fn routes_through_stop(&self, stop: &str) -> Vec<&Route> {
        let Some(&idx) = self.stop_index.get(stop) else {
            return Vec::new();
        };
        let mut handles: Vec<usize> = self.outgoing[idx]
            .iter()
            .map(|&c| self.edges[c].route)
            .collect();
        handles.sort_by(|&a, &b| self.routes[a].id.cmp(&self.routes[b].id));
        handles.dedup();
        handles.into_iter().map(|r| &self.routes[r]).collect()
    }

    /// Stops within `radius_m` of `point` by straight-line distance, nearest first.
    pub fn nearest_stops(&self, point: Coordinate, radius_m: f64, limit: usize) -> Vec<(&Stop, f64)> {
        let mut nearby: Vec<(&Stop, f64)> = self
            .stops
            .iter()
            .map(|s| (s, haversine_distance(point, s.coordinate)))
            .filter(|(_, d)| *d <= radius_m)
            .collect();

        nearby.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.id.cmp(&b.0.id)));
        nearby.truncate(limit);
        nearby
    }

    pub(crate) fn stop_handle(&self, id: &str) -> Option<usize> {
        self.stop_index.get(id).copied()
    }

    pub(crate) fn route_handle(&self, id: &str) -> Option<usize> {
        self.route_index.get(id).copied()
    }

    pub(crate) fn stop_at(&self, handle: usize) -> &Stop {
        &self.stops[handle]
    }

    pub(crate) fn connection_at(&self, handle: usize) -> &Connection {
        &self.connections[handle]
    }

    pub(crate) fn edge_at(&self, handle: usize) -> Edge {
        self.edges[handle]
    }

    pub(crate) fn outgoing(&self, stop: usize) -> &[usize] {
        &self.outgoing[stop]
    }

    pub(crate) fn route_connections(&self, route: usize) -> &[usize] {
        &self.by_route[route]
    }
}
