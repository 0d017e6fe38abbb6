//! Listener groups with one bounded queue each.
//!
//! Publishing never blocks: a group's queue keeps the newest
//! `capacity` payloads and a listener that falls behind loses the oldest
//! ones. Each group is independent, so one slow group cannot hold up another.

use crate::error::GroupKeyParseError;
use crate::events::TransitEvent;
use crate::identifiers::{RouteId, StopId, VehicleId};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::task::JoinHandle;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum GroupKey {
    /// Every vehicle event.
    Operators,
    /// Location and status events for one route.
    Route(RouteId),
    /// Location and status events for one vehicle.
    Vehicle(VehicleId),
    /// ETA updates for one stop on one route.
    StopEta { route: RouteId, stop: StopId },
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupKey::Operators => write!(f, "operators"),
            GroupKey::Route(r) => write!(f, "route:{}", r),
            GroupKey::Vehicle(v) => write!(f, "vehicle:{}", v),
            GroupKey::StopEta { route, stop } => write!(f, "eta:{}:{}", route, stop),
        }
    }
}

impl FromStr for GroupKey {
    type Err = GroupKeyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || GroupKeyParseError(s.to_string());
        if s == "operators" {
            return Ok(GroupKey::Operators);
        }
        let (kind, rest) = s.split_once(':').ok_or_else(err)?;
        if rest.is_empty() {
            return Err(err());
        }
        match kind {
            "route" => Ok(GroupKey::Route(RouteId::new(rest))),
            "vehicle" => Ok(GroupKey::Vehicle(VehicleId::new(rest))),
            "eta" => match rest.split_once(':') {
                Some((route, stop)) if !route.is_empty() && !stop.is_empty() => Ok(GroupKey::StopEta {
                    route: RouteId::new(route),
                    stop: StopId::new(stop),
                }),
                _ => Err(err()),
            },
            _ => Err(err()),
        }
    }
}

/// Transport-provided destination for a listener's payloads.
pub trait EventSink: Send + 'static {
    /// Hands one payload to the transport. An error ends delivery.
    fn deliver(&mut self, payload: Arc<str>) -> Result<(), SinkClosed>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("event sink closed")]
pub struct SinkClosed;

impl EventSink for tokio::sync::mpsc::UnboundedSender<Arc<str>> {
    fn deliver(&mut self, payload: Arc<str>) -> Result<(), SinkClosed> {
        self.send(payload).map_err(|_| SinkClosed)
    }
}

struct Group {
    sender: broadcast::Sender<Arc<str>>,
    members: HashSet<u64>,
}

struct FanOutInner {
    groups: DashMap<GroupKey, Group>,
    // Route -> stops that currently have an ETA group.
    eta_targets: DashMap<RouteId, BTreeSet<StopId>>,
    next_listener: AtomicU64,
    capacity: usize,
    dropped: AtomicU64,
}

impl FanOutInner {
    fn leave(&self, listener: u64, key: &GroupKey) {
        let Entry::Occupied(mut e) = self.groups.entry(key.clone()) else {
            return;
        };
        e.get_mut().members.remove(&listener);
        if !e.get().members.is_empty() {
            return;
        }

        // Still holding the group entry, so a concurrent subscribe to this
        // key cannot re-register the stop in between.
        if let GroupKey::StopEta { route, stop } = key {
            if let Entry::Occupied(mut targets) = self.eta_targets.entry(route.clone()) {
                targets.get_mut().remove(stop);
                if targets.get().is_empty() {
                    targets.remove();
                }
            }
        }
        e.remove();
        log::debug!("group {} closed", key);
    }
}

#[derive(Clone)]
pub struct FanOut {
    inner: Arc<FanOutInner>,
}

impl FanOut {
    /// `capacity` is the queue length per group. The underlying channel
    /// rounds it up to a power of two.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(FanOutInner {
                groups: DashMap::new(),
                eta_targets: DashMap::new(),
                next_listener: AtomicU64::new(1),
                capacity: capacity.max(1),
                dropped: AtomicU64::new(0),
            }),
        }
    }

    /// Joins `key`, creating the group if this is its first listener.
    pub fn subscribe(&self, key: GroupKey) -> Listener {
        let id = self.inner.next_listener.fetch_add(1, Ordering::Relaxed);
        let receiver = match self.inner.groups.entry(key.clone()) {
            Entry::Occupied(mut e) => {
                e.get_mut().members.insert(id);
                e.get().sender.subscribe()
            }
            Entry::Vacant(e) => {
                let (sender, receiver) = broadcast::channel(self.inner.capacity);
                if let GroupKey::StopEta { route, stop } = &key {
                    self.inner
                        .eta_targets
                        .entry(route.clone())
                        .or_default()
                        .insert(stop.clone());
                }
                e.insert(Group {
                    sender,
                    members: HashSet::from([id]),
                });
                log::debug!("group {} opened", key);
                receiver
            }
        };

        Listener {
            id,
            key,
            receiver,
            fanout: Arc::downgrade(&self.inner),
            dropped: 0,
        }
    }

    /// Leaves the listener's group. Same as dropping the handle.
    pub fn unsubscribe(&self, listener: Listener) {
        drop(listener);
    }

    /// Enqueues `payload` for `key`. Returns how many listeners will see it.
    pub fn publish(&self, key: &GroupKey, payload: &Arc<str>) -> usize {
        match self.inner.groups.get(key) {
            Some(group) => group.sender.send(payload.clone()).unwrap_or(0),
            None => 0,
        }
    }

    /// Serializes `event` once and enqueues it for every key.
    pub fn publish_event(&self, keys: &[GroupKey], event: &TransitEvent) {
        if keys.iter().all(|k| !self.inner.groups.contains_key(k)) {
            return;
        }
        match event.to_payload() {
            Ok(payload) => {
                for key in keys {
                    self.publish(key, &payload);
                }
            }
            Err(e) => log::error!("failed to serialize event {:?}: {}", event, e),
        }
    }

    /// Stops with an open ETA group on `route`, by stop id.
    pub fn eta_targets(&self, route: &RouteId) -> Vec<StopId> {
        self.inner
            .eta_targets
            .get(route)
            .map(|stops| stops.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn group_count(&self) -> usize {
        self.inner.groups.len()
    }

    pub fn listener_count(&self, key: &GroupKey) -> usize {
        self.inner
            .groups
            .get(key)
            .map(|g| g.members.len())
            .unwrap_or(0)
    }

    /// Payloads lost to slow listeners across all groups.
    pub fn dropped_events(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }
}

/// Membership handle of one listener in one group. Dropping it leaves the group.
pub struct Listener {
    id: u64,
    key: GroupKey,
    receiver: broadcast::Receiver<Arc<str>>,
    fanout: Weak<FanOutInner>,
    dropped: u64,
}

impl Listener {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn group(&self) -> &GroupKey {
        &self.key
    }

    /// Payloads this listener lost by falling behind.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    fn note_lag(&mut self, skipped: u64) {
        self.dropped += skipped;
        if let Some(inner) = self.fanout.upgrade() {
            inner.dropped.fetch_add(skipped, Ordering::Relaxed);
        }
        log::warn!(
            "listener {} on {} fell behind, {} event(s) dropped",
            self.id,
            self.key,
            skipped
        );
    }

    /// Next payload, skipping over anything lost to lag. `None` once the
    /// fan-out itself is gone.
    pub async fn recv(&mut self) -> Option<Arc<str>> {
        loop {
            match self.receiver.recv().await {
                Ok(payload) => return Some(payload),
                Err(RecvError::Lagged(n)) => self.note_lag(n),
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Next queued payload without waiting.
    pub fn try_recv(&mut self) -> Option<Arc<str>> {
        loop {
            match self.receiver.try_recv() {
                Ok(payload) => return Some(payload),
                Err(TryRecvError::Lagged(n)) => self.note_lag(n),
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }

    /// Pumps payloads into `sink` on a background task until either side closes.
    pub fn forward_to<S: EventSink>(mut self, mut sink: S) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(payload) = self.recv().await {
                if sink.deliver(payload).is_err() {
                    log::debug!("sink for listener {} closed", self.id);
                    break;
                }
            }
        })
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        if let Some(inner) = self.fanout.upgrade() {
            inner.leave(self.id, &self.key);
        }
    }
}
