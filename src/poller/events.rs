//! Property-change notifications published by the coordinator
//!
//! Listeners are invoked synchronously on the caller's thread, in
//! registration order. They must not block.

use std::sync::Arc;

use crate::ScanReport;

#[derive(Debug, Clone, PartialEq)]
pub enum PropertyChange {
    Started { old: bool, new: bool },
    Registered { old: bool, new: bool },
    /// Scan progress in `0.0..=1.0`
    PercentageComplete(f64),
    /// Terminal signal carrying the finished scan report
    ExitNecessary(ScanReport),
}

impl PropertyChange {
    pub fn name(&self) -> &'static str {
        match self {
            PropertyChange::Started { .. } => "started",
            PropertyChange::Registered { .. } => "registered",
            PropertyChange::PercentageComplete(_) => "percentageComplete",
            PropertyChange::ExitNecessary(_) => "exitNecessary",
        }
    }
}

pub trait PropertyChangeListener: Send + Sync {
    fn property_change(&self, change: &PropertyChange);
}

impl<F> PropertyChangeListener for F
where
    F: Fn(&PropertyChange) + Send + Sync,
{
    fn property_change(&self, change: &PropertyChange) {
        self(change)
    }
}

/// Identifies a registered listener so it can be removed again
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Default)]
pub(crate) struct Listeners {
    next_id: u64,
    entries: Vec<(ListenerId, Arc<dyn PropertyChangeListener>)>,
}

impl Listeners {
    pub(crate) fn add(&mut self, listener: Arc<dyn PropertyChangeListener>) -> ListenerId {
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        self.entries.push((id, listener));
        id
    }

    pub(crate) fn remove(&mut self, id: ListenerId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(entry_id, _)| *entry_id != id);
        self.entries.len() != before
    }

    /// Listeners in registration order
    pub(crate) fn snapshot(&self) -> Vec<Arc<dyn PropertyChangeListener>> {
        self.entries
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect()
    }
}
