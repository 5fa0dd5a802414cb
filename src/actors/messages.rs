//! Message types for the correlation actor
//!
//! Commands travel over an mpsc channel to the single actor owning the
//! engine; queries carry a oneshot sender for the answer. Correlated events
//! fan out over a broadcast channel.

use tokio::sync::oneshot;

use crate::correlation::event::{CorrelatedEvent, Signal};
use crate::correlation::memory::MemoryStats;

#[derive(Debug)]
pub enum CorrelationCommand {
    /// Correlate a signal and answer with the events it produced
    Correlate {
        signal: Signal,
        respond_to: oneshot::Sender<Vec<CorrelatedEvent>>,
    },

    /// Correlate a signal without waiting; events only go to subscribers
    Submit { signal: Signal },

    GetMemorySize {
        respond_to: oneshot::Sender<usize>,
    },

    GetStats {
        respond_to: oneshot::Sender<MemoryStats>,
    },

    /// Run expiry now instead of waiting for the next tick
    Sweep {
        respond_to: oneshot::Sender<Vec<CorrelatedEvent>>,
    },

    /// Gracefully shut down the actor
    Shutdown,
}
