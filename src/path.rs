//! Shortest-path and k-best route search over a graph snapshot.
//!
//! Travel time is the primary weight, cumulative distance breaks ties and
//! the stop-id sequence breaks whatever is left, so results are fully
//! deterministic for a given topology.

use crate::graph::NetworkGraph;
use crate::identifiers::StopId;
use crate::model::Connection;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Path {
    pub origin: StopId,
    pub connections: Vec<Connection>,
    pub total_time_secs: u64,
    pub total_distance_m: f64,
}

impl Path {
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Visited stops, origin included.
    pub fn stops(&self) -> Vec<&StopId> {
        let mut out = Vec::with_capacity(self.connections.len() + 1);
        out.push(&self.origin);
        out.extend(self.connections.iter().map(|c| &c.to));
        out
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct Cost {
    time: u64,
    distance: f64,
}

impl Cost {
    const ZERO: Cost = Cost {
        time: 0,
        distance: 0.0,
    };

    fn compare(&self, other: &Cost) -> Ordering {
        self.time
            .cmp(&other.time)
            .then_with(|| self.distance.total_cmp(&other.distance))
    }

    fn add(&self, conn: &Connection) -> Cost {
        Cost {
            time: self.time + u64::from(conn.travel_time_secs),
            distance: self.distance + conn.distance_m,
        }
    }
}

#[derive(Debug)]
struct QueueEntry {
    cost: Cost,
    stop: usize,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueueEntry {}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    // Reversed so the max-heap pops the cheapest entry first.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .cost
            .compare(&self.cost)
            .then_with(|| other.stop.cmp(&self.stop))
    }
}

#[derive(Default)]
struct SearchFilter {
    route: Option<usize>,
    banned_stops: HashSet<usize>,
    banned_connections: HashSet<usize>,
}

impl SearchFilter {
    fn allows(&self, graph: &NetworkGraph, conn: usize) -> bool {
        let edge = graph.edge_at(conn);
        self.route.is_none_or(|r| edge.route == r)
            && !self.banned_connections.contains(&conn)
            && !self.banned_stops.contains(&edge.to)
    }
}

/// Stop handles along `conns`, starting at `origin`.
fn stop_handles(graph: &NetworkGraph, origin: usize, conns: &[usize]) -> Vec<usize> {
    let mut out = Vec::with_capacity(conns.len() + 1);
    out.push(origin);
    out.extend(conns.iter().map(|&c| graph.edge_at(c).to));
    out
}

fn compare_stop_ids(graph: &NetworkGraph, a: &[usize], b: &[usize]) -> Ordering {
    let ids_a = a.iter().map(|&s| &graph.stop_at(s).id);
    let ids_b = b.iter().map(|&s| &graph.stop_at(s).id);
    ids_a.cmp(ids_b)
}

fn path_cost(graph: &NetworkGraph, conns: &[usize]) -> Cost {
    conns
        .iter()
        .fold(Cost::ZERO, |acc, &c| acc.add(graph.connection_at(c)))
}

/// Dijkstra from `source` to `target` over connection handles.
fn dijkstra(
    graph: &NetworkGraph,
    source: usize,
    target: usize,
    filter: &SearchFilter,
) -> Option<Vec<usize>> {
    if source == target {
        return Some(Vec::new());
    }

    let n = graph.stop_count();
    let mut best: Vec<Option<Cost>> = vec![None; n];
    let mut prev: Vec<Option<usize>> = vec![None; n];
    let mut settled = vec![false; n];
    let mut heap = BinaryHeap::new();

    best[source] = Some(Cost::ZERO);
    heap.push(QueueEntry {
        cost: Cost::ZERO,
        stop: source,
    });

    // Walks `prev` back to the source. Only valid for settled stops.
    let trail = |prev: &[Option<usize>], mut stop: usize| -> Vec<usize> {
        let mut stops = vec![stop];
        while let Some(c) = prev[stop] {
            stop = graph.edge_at(c).from;
            stops.push(stop);
        }
        stops.reverse();
        stops
    };

    while let Some(QueueEntry { cost, stop }) = heap.pop() {
        if settled[stop] {
            continue;
        }
        settled[stop] = true;
        if stop == target {
            break;
        }

        for &c in graph.outgoing(stop) {
            if !filter.allows(graph, c) {
                continue;
            }
            let next = graph.edge_at(c).to;
            if settled[next] {
                continue;
            }

            let candidate = cost.add(graph.connection_at(c));
            let improve = match best[next] {
                None => true,
                Some(current) => match candidate.compare(&current) {
                    Ordering::Less => true,
                    Ordering::Greater => false,
                    Ordering::Equal => {
                        let Some(existing) = prev[next] else {
                            continue;
                        };
                        let mut via_new = trail(&prev, stop);
                        let mut via_old = trail(&prev, graph.edge_at(existing).from);
                        via_new.push(next);
                        via_old.push(next);
                        compare_stop_ids(graph, &via_new, &via_old) == Ordering::Less
                    }
                },
            };

            if improve {
                best[next] = Some(candidate);
                prev[next] = Some(c);
                heap.push(QueueEntry {
                    cost: candidate,
                    stop: next,
                });
            }
        }
    }

    if !settled[target] {
        return None;
    }

    let mut conns = Vec::new();
    let mut stop = target;
    while let Some(c) = prev[stop] {
        conns.push(c);
        stop = graph.edge_at(c).from;
    }
    conns.reverse();
    Some(conns)
}

fn materialize(graph: &NetworkGraph, origin: usize, conns: &[usize]) -> Path {
    let cost = path_cost(graph, conns);
    Path {
        origin: graph.stop_at(origin).id.clone(),
        connections: conns
            .iter()
            .map(|&c| graph.connection_at(c).clone())
            .collect(),
        total_time_secs: cost.time,
        total_distance_m: cost.distance,
    }
}

/// Minimum-time path from `start` to `end`, optionally restricted to the
/// connections of one route. `None` means no directed walk exists, which
/// is an expected outcome rather than a fault.
///
/// A stop to itself yields an empty path with zero cost.
pub fn shortest_path(
    graph: &NetworkGraph,
    start: &str,
    end: &str,
    route: Option<&str>,
) -> Option<Path> {
    let source = graph.stop_handle(start)?;
    let target = graph.stop_handle(end)?;
    let filter = SearchFilter {
        route: match route {
            Some(r) => Some(graph.route_handle(r)?),
            None => None,
        },
        ..Default::default()
    };

    dijkstra(graph, source, target, &filter).map(|conns| materialize(graph, source, &conns))
}

/// Up to `limit` distinct simple paths ranked by (time, distance), using
/// Yen's algorithm seeded with the unconstrained shortest path.
pub fn optimal_routes(graph: &NetworkGraph, start: &str, end: &str, limit: usize) -> Vec<Path> {
    if limit == 0 {
        return Vec::new();
    }
    let (Some(source), Some(target)) = (graph.stop_handle(start), graph.stop_handle(end)) else {
        return Vec::new();
    };
    let Some(first) = dijkstra(graph, source, target, &SearchFilter::default()) else {
        return Vec::new();
    };

    let mut accepted: Vec<Vec<usize>> = vec![first];
    let mut candidates: Vec<(Cost, Vec<usize>)> = Vec::new();

    while accepted.len() < limit {
        let last = accepted[accepted.len() - 1].clone();
        let last_stops = stop_handles(graph, source, &last);

        for i in 0..last.len() {
            let spur = last_stops[i];
            let root = &last[..i];

            let mut filter = SearchFilter::default();
            for p in &accepted {
                if p.len() > i && &p[..i] == root {
                    filter.banned_connections.insert(p[i]);
                }
            }
            filter.banned_stops.extend(last_stops[..i].iter().copied());

            let Some(spur_path) = dijkstra(graph, spur, target, &filter) else {
                continue;
            };
            let mut total = root.to_vec();
            total.extend(spur_path);

            let known = accepted.iter().any(|p| *p == total)
                || candidates.iter().any(|(_, p)| *p == total);
            if !known {
                candidates.push((path_cost(graph, &total), total));
            }
        }

        let best = candidates
            .iter()
            .enumerate()
            .min_by(|(_, (ca, pa)), (_, (cb, pb))| {
                ca.compare(cb).then_with(|| {
                    compare_stop_ids(
                        graph,
                        &stop_handles(graph, source, pa),
                        &stop_handles(graph, source, pb),
                    )
                    .then_with(|| pa.cmp(pb))
                })
            })
            .map(|(idx, _)| idx);

        match best {
            Some(idx) => accepted.push(candidates.swap_remove(idx).1),
            None => break,
        }
    }

    log::debug!(
        "optimal_routes {} -> {}: {} path(s)",
        start,
        end,
        accepted.len()
    );

    accepted
        .iter()
        .map(|conns| materialize(graph, source, conns))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TopologyInput;
    use crate::test_support::{connection, line_topology, mesh_topology, route, stop};

    fn stop_names(path: &Path) -> Vec<&str> {
        path.stops().iter().map(|s| s.as_str()).collect()
    }

    /// Every simple path from `start` to `end` as (time, distance, stops).
    fn brute_force(graph: &NetworkGraph, start: &str, end: &str) -> Vec<(u64, f64, Vec<String>)> {
        fn walk(
            graph: &NetworkGraph,
            at: &str,
            end: &str,
            visited: &mut Vec<String>,
            time: u64,
            dist: f64,
            out: &mut Vec<(u64, f64, Vec<String>)>,
        ) {
            if at == end {
                out.push((time, dist, visited.clone()));
                return;
            }
            for (conn, next) in graph.neighbors(at, None) {
                if visited.iter().any(|v| v == next.id.as_str()) {
                    continue;
                }
                visited.push(next.id.to_string());
                walk(
                    graph,
                    next.id.as_str(),
                    end,
                    visited,
                    time + u64::from(conn.travel_time_secs),
                    dist + conn.distance_m,
                    out,
                );
                visited.pop();
            }
        }

        let mut out = Vec::new();
        let mut visited = vec![start.to_string()];
        walk(graph, start, end, &mut visited, 0, 0.0, &mut out);
        out.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.total_cmp(&b.1)));
        out
    }

    /// Deterministic pseudo-random graph: one route, unique sequences.
    fn generated_topology(seed: u64, stops: usize, edges: usize) -> TopologyInput {
        let mut state = seed;
        let mut next = move || {
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            (state >> 33) as usize
        };

        let names: Vec<String> = (0..stops).map(|i| format!("S{i}")).collect();
        let mut input = TopologyInput {
            stops: names
                .iter()
                .enumerate()
                .map(|(i, n)| stop(n, 0.0, i as f64 * 0.001))
                .collect(),
            routes: vec![route("R1")],
            connections: Vec::new(),
        };
        for seq in 0..edges {
            let from = next() % stops;
            let mut to = next() % stops;
            if to == from {
                to = (to + 1) % stops;
            }
            let time = 30 + (next() % 10) as u32 * 15;
            let dist = 100.0 + (next() % 20) as f64 * 25.0;
            input
                .connections
                .push(connection(&names[from], &names[to], "R1", dist, time, seq as u32));
        }
        input
    }

    #[test]
    fn test_scenario_route_constrained_path() {
        let graph = NetworkGraph::build(line_topology(), 1).unwrap();
        let path = shortest_path(&graph, "A", "C", Some("R1")).unwrap();

        assert_eq!(stop_names(&path), vec!["A", "B", "C"]);
        assert_eq!(path.total_time_secs, 300);
        assert_eq!(path.total_distance_m, 1300.0);
    }

    #[test]
    fn test_scenario_route_without_connections_is_not_found() {
        let graph = NetworkGraph::build(line_topology(), 1).unwrap();
        assert!(shortest_path(&graph, "A", "C", Some("R2")).is_none());
        assert!(shortest_path(&graph, "A", "C", Some("R404")).is_none());
    }

    #[test]
    fn test_no_reverse_walk_on_directed_graph() {
        let graph = NetworkGraph::build(line_topology(), 1).unwrap();
        assert!(shortest_path(&graph, "C", "A", None).is_none());
        assert!(shortest_path(&graph, "A", "nowhere", None).is_none());
    }

    #[test]
    fn test_self_path_is_empty() {
        let graph = NetworkGraph::build(line_topology(), 1).unwrap();
        let path = shortest_path(&graph, "B", "B", None).unwrap();
        assert!(path.is_empty());
        assert_eq!(path.total_time_secs, 0);
        assert_eq!(stop_names(&path), vec!["B"]);

        let routes = optimal_routes(&graph, "B", "B", 3);
        assert_eq!(routes.len(), 1);
        assert!(routes[0].is_empty());
    }

    #[test]
    fn test_self_path_is_not_rejected_even_with_route_filter() {
        let graph = NetworkGraph::build(line_topology(), 1).unwrap();
        let path = shortest_path(&graph, "A", "A", Some("R2")).unwrap();
        assert!(path.is_empty());
        assert_eq!(path.total_distance_m, 0.0);
    }

    #[test]
    fn test_time_tie_broken_by_distance() {
        let graph = NetworkGraph::build(mesh_topology(), 1).unwrap();
        let path = shortest_path(&graph, "A", "E", None).unwrap();

        // A-B-C-E and A-D-E both take 300s; the first is shorter.
        assert_eq!(stop_names(&path), vec!["A", "B", "C", "E"]);
        assert_eq!(path.total_time_secs, 300);
    }

    #[test]
    fn test_full_tie_broken_by_stop_ids() {
        let input = TopologyInput {
            stops: vec![
                stop("A", 0.0, 0.0),
                stop("M", 0.001, 0.001),
                stop("N", -0.001, 0.001),
                stop("Z", 0.0, 0.002),
            ],
            routes: vec![route("R1"), route("R2")],
            connections: vec![
                connection("A", "N", "R1", 100.0, 60, 1),
                connection("N", "Z", "R1", 100.0, 60, 2),
                connection("A", "M", "R2", 100.0, 60, 1),
                connection("M", "Z", "R2", 100.0, 60, 2),
            ],
        };
        let graph = NetworkGraph::build(input, 1).unwrap();
        let path = shortest_path(&graph, "A", "Z", None).unwrap();
        assert_eq!(stop_names(&path), vec!["A", "M", "Z"]);
    }

    #[test]
    fn test_shortest_matches_brute_force() {
        for seed in 1..40u64 {
            let graph = NetworkGraph::build(generated_topology(seed, 7, 16), 1).unwrap();
            for start in 0..7 {
                for end in 0..7 {
                    if start == end {
                        continue;
                    }
                    let (s, e) = (format!("S{start}"), format!("S{end}"));
                    let expected = brute_force(&graph, &s, &e);
                    match shortest_path(&graph, &s, &e, None) {
                        Some(path) => {
                            let (time, dist, _) = &expected[0];
                            assert_eq!(path.total_time_secs, *time, "seed {seed} {s}->{e}");
                            assert!((path.total_distance_m - dist).abs() < 1e-6);
                        }
                        None => assert!(expected.is_empty(), "seed {seed} {s}->{e}"),
                    }
                }
            }
        }
    }

    #[test]
    fn test_optimal_routes_ranked_and_distinct() {
        let graph = NetworkGraph::build(mesh_topology(), 1).unwrap();
        let routes = optimal_routes(&graph, "A", "E", 3);

        let names: Vec<Vec<&str>> = routes.iter().map(stop_names).collect();
        assert_eq!(
            names,
            vec![
                vec!["A", "B", "C", "E"],
                vec!["A", "D", "E"],
                vec!["A", "B", "D", "E"],
            ]
        );
        for pair in routes.windows(2) {
            let a = (pair[0].total_time_secs, pair[0].total_distance_m);
            let b = (pair[1].total_time_secs, pair[1].total_distance_m);
            assert!(a.0 < b.0 || (a.0 == b.0 && a.1 < b.1));
        }
    }

    #[test]
    fn test_optimal_routes_limits() {
        let graph = NetworkGraph::build(mesh_topology(), 1).unwrap();
        assert!(optimal_routes(&graph, "A", "E", 0).is_empty());
        assert_eq!(optimal_routes(&graph, "A", "E", 1).len(), 1);

        // Only six simple paths exist.
        let all = optimal_routes(&graph, "A", "E", 10);
        assert_eq!(all.len(), 6);
        assert_eq!(stop_names(&all[5]), vec!["A", "E"]);
        assert!(optimal_routes(&graph, "E", "A", 3).is_empty());
    }

    #[test]
    fn test_optimal_routes_match_brute_force_costs() {
        for seed in 1..25u64 {
            let graph = NetworkGraph::build(generated_topology(seed, 6, 14), 1).unwrap();
            let expected = brute_force(&graph, "S0", "S5");
            let found = optimal_routes(&graph, "S0", "S5", 3);

            assert_eq!(found.len(), expected.len().min(3), "seed {seed}");
            for (path, (time, dist, _)) in found.iter().zip(expected.iter()) {
                assert_eq!(path.total_time_secs, *time, "seed {seed}");
                assert!((path.total_distance_m - dist).abs() < 1e-6, "seed {seed}");
            }
            for (i, a) in found.iter().enumerate() {
                for b in &found[i + 1..] {
                    assert_ne!(a.connections, b.connections, "seed {seed}");
                }
            }
        }
    }
}
