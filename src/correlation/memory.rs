//! Working memory of the correlation engine
//!
//! Three kinds of facts live here:
//!
//! - **Affliction**: one location monitor currently reports a service lost
//! - **FlapTracker**: recent lost/regained transitions of one (service, monitor) pair
//! - **WideSpreadOutage**: enough distinct monitors report the same service lost
//!
//! The memory only stores and expires facts; the rules deciding when facts
//! appear live in the engine.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use super::event::ServiceId;

/// Identifies one location monitor's view of one service
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MonitorKey {
    pub service: ServiceId,
    pub location_monitor_id: u32,
}

impl MonitorKey {
    pub fn new(service: ServiceId, location_monitor_id: u32) -> Self {
        Self {
            service,
            location_monitor_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Affliction {
    pub created: Instant,
}

/// Sliding window of transition instants for one pair
#[derive(Debug, Clone)]
pub struct FlapTracker {
    transitions: VecDeque<Instant>,
    last_transition: Instant,
    reported: bool,
}

impl FlapTracker {
    /// Tracker for a completed down/up cycle
    ///
    /// The lost transition is credited only if it still lies inside the window.
    pub fn for_cycle(lost_at: Instant, regained_at: Instant, window: Duration) -> Self {
        let mut tracker = Self {
            transitions: VecDeque::new(),
            last_transition: regained_at,
            reported: false,
        };

        if regained_at.saturating_duration_since(lost_at) < window {
            tracker.transitions.push_back(lost_at);
        }
        tracker.transitions.push_back(regained_at);
        tracker
    }

    pub fn record(&mut self, at: Instant, window: Duration) {
        self.transitions.push_back(at);
        self.last_transition = at;
        self.prune(at, window);
    }

    /// Drop transitions that left the window
    pub fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(oldest) = self.transitions.front()
            && now.saturating_duration_since(*oldest) >= window
        {
            self.transitions.pop_front();
        }
    }

    pub fn transition_count(&self) -> usize {
        self.transitions.len()
    }

    pub fn last_transition(&self) -> Instant {
        self.last_transition
    }

    pub fn is_expired(&self, now: Instant, window: Duration) -> bool {
        now.saturating_duration_since(self.last_transition) >= window
    }

    pub fn is_reported(&self) -> bool {
        self.reported
    }

    pub fn mark_reported(&mut self) {
        self.reported = true;
    }

    /// Start counting from scratch; expiry still follows the last transition
    pub fn reset(&mut self) {
        self.transitions.clear();
        self.reported = false;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WideSpreadOutage {
    pub since: Instant,
}

impl WideSpreadOutage {
    pub fn duration(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.since)
    }
}

/// Fact counts by kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct MemoryStats {
    pub afflictions: usize,
    pub flap_trackers: usize,
    pub wide_spread_outages: usize,
}

impl MemoryStats {
    pub fn total(&self) -> usize {
        self.afflictions + self.flap_trackers + self.wide_spread_outages
    }
}

#[derive(Debug, Default)]
pub struct WorkingMemory {
    /// Active lost afflictions per service, keyed by location monitor
    afflictions: HashMap<ServiceId, BTreeMap<u32, Affliction>>,
    flap_trackers: HashMap<MonitorKey, FlapTracker>,
    outages: HashMap<ServiceId, WideSpreadOutage>,
}

impl WorkingMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` if the pair already had an active affliction
    pub fn insert_affliction(&mut self, key: &MonitorKey, now: Instant) -> bool {
        let monitors = self.afflictions.entry(key.service.clone()).or_default();
        if monitors.contains_key(&key.location_monitor_id) {
            return false;
        }
        monitors.insert(key.location_monitor_id, Affliction { created: now });
        true
    }

    pub fn remove_affliction(&mut self, key: &MonitorKey) -> Option<Affliction> {
        let monitors = self.afflictions.get_mut(&key.service)?;
        let affliction = monitors.remove(&key.location_monitor_id);
        if monitors.is_empty() {
            self.afflictions.remove(&key.service);
        }
        affliction
    }

    pub fn affliction(&self, key: &MonitorKey) -> Option<&Affliction> {
        self.afflictions
            .get(&key.service)?
            .get(&key.location_monitor_id)
    }

    /// Distinct location monitors currently reporting `service` lost
    pub fn afflicted_monitors(&self, service: &ServiceId) -> usize {
        self.afflictions.get(service).map_or(0, BTreeMap::len)
    }

    pub fn flap_tracker_mut(&mut self, key: &MonitorKey) -> Option<&mut FlapTracker> {
        self.flap_trackers.get_mut(key)
    }

    pub fn flap_tracker(&self, key: &MonitorKey) -> Option<&FlapTracker> {
        self.flap_trackers.get(key)
    }

    pub fn insert_flap_tracker(&mut self, key: MonitorKey, tracker: FlapTracker) {
        self.flap_trackers.insert(key, tracker);
    }

    pub fn has_outage(&self, service: &ServiceId) -> bool {
        self.outages.contains_key(service)
    }

    pub fn insert_outage(&mut self, service: ServiceId, now: Instant) {
        self.outages.insert(service, WideSpreadOutage { since: now });
    }

    pub fn remove_outage(&mut self, service: &ServiceId) -> Option<WideSpreadOutage> {
        self.outages.remove(service)
    }

    /// Remove trackers idle for at least `window`, returning how many went
    pub fn expire_flap_trackers(&mut self, now: Instant, window: Duration) -> usize {
        let before = self.flap_trackers.len();
        self.flap_trackers
            .retain(|_, tracker| !tracker.is_expired(now, window));
        before - self.flap_trackers.len()
    }

    /// Remove afflictions at least `timeout` old, returning the services they belonged to
    pub fn expire_afflictions(&mut self, now: Instant, timeout: Duration) -> Vec<ServiceId> {
        let mut affected = vec![];

        self.afflictions.retain(|service, monitors| {
            let before = monitors.len();
            monitors.retain(|_, affliction| {
                now.saturating_duration_since(affliction.created) < timeout
            });
            if monitors.len() != before {
                affected.push(service.clone());
            }
            !monitors.is_empty()
        });

        affected.sort();
        affected
    }

    pub fn stats(&self) -> MemoryStats {
        MemoryStats {
            afflictions: self.afflictions.values().map(BTreeMap::len).sum(),
            flap_trackers: self.flap_trackers.len(),
            wide_spread_outages: self.outages.len(),
        }
    }

    /// Number of live facts of every kind
    pub fn size(&self) -> usize {
        self.stats().total()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }
}
