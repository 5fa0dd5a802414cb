//! Temporal correlation of location monitor signals
//!
//! The [`CorrelationEngine`] turns lost/regained reports of many location
//! monitors into a few higher-level events. Every signal runs through the
//! same rule sequence and all applicable rules fire:
//!
//! ```text
//! signal ─► 1. affliction bookkeeping  (create on lost, remove on regained)
//!        ─► 2. flap detection          (count transitions of the pair in the window)
//!        ─► 3. wide-spread detection   (distinct afflicted monitors >= threshold)
//! ```
//!
//! Duplicate lost signals and regains without an active affliction are
//! no-ops and never reach steps 2 and 3.
//!
//! Expiry of flap trackers (and of afflictions, if a timeout is configured)
//! happens lazily before every `correlate`/`memory_size` and in [`sweep`].
//! Events produced by expiry outside of `correlate` are queued and delivered
//! with the next result.
//!
//! The engine is not synchronized; [`crate::actors::correlator`] owns it and
//! serializes all access.
//!
//! [`sweep`]: CorrelationEngine::sweep

pub mod event;
pub mod memory;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, trace};

use crate::config::CorrelationConfig;

use self::event::{CorrelatedEvent, CorrelatedEventKind, ServiceId, Signal, SignalKind};
use self::memory::{FlapTracker, MemoryStats, MonitorKey, WorkingMemory};

/// What happens to a flap tracker once it reported flapping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlapPolicy {
    /// Keep counting, stay silent until the tracker expires
    #[default]
    Retain,
    /// Clear the window; another `flap_count` transitions report again
    Reset,
}

pub struct CorrelationEngine {
    config: CorrelationConfig,
    memory: WorkingMemory,
    /// Events produced by expiry, not yet handed out
    pending: Vec<CorrelatedEvent>,
}

impl CorrelationEngine {
    pub fn new(config: CorrelationConfig) -> Self {
        Self {
            config,
            memory: WorkingMemory::new(),
            pending: vec![],
        }
    }

    pub fn config(&self) -> &CorrelationConfig {
        &self.config
    }

    pub fn correlate(&mut self, signal: &Signal) -> Vec<CorrelatedEvent> {
        self.correlate_at(signal, Instant::now())
    }

    /// Apply `signal` observed at `now` and return the events it produced
    pub fn correlate_at(&mut self, signal: &Signal, now: Instant) -> Vec<CorrelatedEvent> {
        self.expire(now);
        let mut events = std::mem::take(&mut self.pending);

        let key = MonitorKey::new(signal.service_id(), signal.location_monitor_id);
        let window = self.config.flap_interval();

        match signal.kind {
            SignalKind::Lost => {
                if !self.memory.insert_affliction(&key, now) {
                    trace!(
                        "duplicate lost signal for {} from monitor {}",
                        key.service, key.location_monitor_id
                    );
                    return events;
                }

                if let Some(tracker) = self.memory.flap_tracker_mut(&key) {
                    tracker.record(now, window);
                }
            }
            SignalKind::Regained => {
                let Some(affliction) = self.memory.remove_affliction(&key) else {
                    trace!(
                        "regained signal for {} from monitor {} without active affliction",
                        key.service, key.location_monitor_id
                    );
                    return events;
                };

                match self.memory.flap_tracker_mut(&key) {
                    Some(tracker) => tracker.record(now, window),
                    None => self.memory.insert_flap_tracker(
                        key.clone(),
                        FlapTracker::for_cycle(affliction.created, now, window),
                    ),
                }
            }
        }

        events.extend(self.evaluate_flapping(&key, signal.timestamp));
        events.extend(self.evaluate_wide_spread(&key.service, now, signal.timestamp));
        events
    }

    /// Run expiry and hand out everything it produced
    pub fn sweep(&mut self) -> Vec<CorrelatedEvent> {
        self.sweep_at(Instant::now())
    }

    pub fn sweep_at(&mut self, now: Instant) -> Vec<CorrelatedEvent> {
        self.expire(now);
        std::mem::take(&mut self.pending)
    }

    /// Live facts of every kind, after expiry
    pub fn memory_size(&mut self) -> usize {
        self.memory_size_at(Instant::now())
    }

    pub fn memory_size_at(&mut self, now: Instant) -> usize {
        self.expire(now);
        self.memory.size()
    }

    pub fn stats(&mut self) -> MemoryStats {
        self.stats_at(Instant::now())
    }

    pub fn stats_at(&mut self, now: Instant) -> MemoryStats {
        self.expire(now);
        self.memory.stats()
    }

    pub fn memory(&self) -> &WorkingMemory {
        &self.memory
    }

    fn expire(&mut self, now: Instant) {
        let expired = self
            .memory
            .expire_flap_trackers(now, self.config.flap_interval());
        if expired > 0 {
            trace!("expired {expired} flap trackers");
        }

        let Some(timeout) = self.config.affliction_timeout() else {
            return;
        };

        let affected = self.memory.expire_afflictions(now, timeout);
        if affected.is_empty() {
            return;
        }

        trace!("expired afflictions of {} services", affected.len());
        for service in affected {
            if let Some(event) = self.evaluate_wide_spread(&service, now, Utc::now()) {
                self.pending.push(event);
            }
        }
    }

    fn evaluate_flapping(
        &mut self,
        key: &MonitorKey,
        timestamp: DateTime<Utc>,
    ) -> Option<CorrelatedEvent> {
        let flap_count = self.config.flap_count;
        if flap_count == 0 {
            return None;
        }

        let tracker = self.memory.flap_tracker_mut(key)?;
        if tracker.is_reported() || tracker.transition_count() < flap_count {
            return None;
        }

        debug!(
            "monitor {} saw {} transitions of {}",
            key.location_monitor_id,
            tracker.transition_count(),
            key.service
        );

        match self.config.flap_policy {
            FlapPolicy::Retain => tracker.mark_reported(),
            FlapPolicy::Reset => tracker.reset(),
        }

        Some(emit(
            CorrelatedEventKind::ServiceFlapping,
            &key.service,
            Some(key.location_monitor_id),
            timestamp,
        ))
    }

    fn evaluate_wide_spread(
        &mut self,
        service: &ServiceId,
        now: Instant,
        timestamp: DateTime<Utc>,
    ) -> Option<CorrelatedEvent> {
        let count = self.memory.afflicted_monitors(service);
        let threshold = self.config.wide_spread_threshold;
        let wide_spread = count > 0 && count >= threshold;

        match (wide_spread, self.memory.has_outage(service)) {
            (true, false) => {
                self.memory.insert_outage(service.clone(), now);
                Some(emit(
                    CorrelatedEventKind::WideSpreadOutage,
                    service,
                    None,
                    timestamp,
                ))
            }
            (false, true) => {
                if let Some(outage) = self.memory.remove_outage(service) {
                    debug!(
                        "wide-spread outage of {service} lasted {:?}",
                        outage.duration(now)
                    );
                }
                Some(emit(
                    CorrelatedEventKind::WideSpreadOutageResolved,
                    service,
                    None,
                    timestamp,
                ))
            }
            _ => None,
        }
    }
}

fn emit(
    kind: CorrelatedEventKind,
    service: &ServiceId,
    location_monitor_id: Option<u32>,
    timestamp: DateTime<Utc>,
) -> CorrelatedEvent {
    match location_monitor_id {
        Some(monitor) => info!("{} for {service} at monitor {monitor}", kind.uei()),
        None => info!("{} for {service}", kind.uei()),
    }
    CorrelatedEvent::new(kind, service, location_monitor_id, timestamp)
}
