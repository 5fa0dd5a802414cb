//! CorrelationActor - Serializes access to the correlation engine
//!
//! The actor is the only owner of the [`CorrelationEngine`], so every signal
//! is correlated under mutual exclusion without any lock. A ticker drives the
//! expiry sweep so that flap trackers and stale afflictions disappear even
//! when no signals arrive.
//!
//! ## Message Flow
//!
//! ```text
//! Correlate / Submit → engine.correlate → publish events → [subscribers]
//! Timer tick         → engine.sweep     → publish events → [subscribers]
//!     ↑
//!     └─── Queries (GetMemorySize, GetStats, Sweep), Shutdown
//! ```

use anyhow::{Context, Result};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, instrument, trace, warn};

use crate::config::CorrelationConfig;
use crate::correlation::CorrelationEngine;
use crate::correlation::event::{CorrelatedEvent, Signal};
use crate::correlation::memory::MemoryStats;

use super::messages::CorrelationCommand;

pub struct CorrelationActor {
    engine: CorrelationEngine,

    command_rx: mpsc::Receiver<CorrelationCommand>,

    /// Broadcast sender for correlated events
    event_tx: broadcast::Sender<CorrelatedEvent>,
}

impl CorrelationActor {
    pub fn new(
        config: CorrelationConfig,
        command_rx: mpsc::Receiver<CorrelationCommand>,
        event_tx: broadcast::Sender<CorrelatedEvent>,
    ) -> Self {
        Self {
            engine: CorrelationEngine::new(config),
            command_rx,
            event_tx,
        }
    }

    /// Run the actor's main loop until shutdown or until all handles are gone
    #[instrument(skip(self))]
    pub async fn run(mut self) {
        debug!("starting correlation actor");

        let mut ticker = interval(self.engine.config().sweep_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let events = self.engine.sweep();
                    self.publish(&events);
                }

                Some(cmd) = self.command_rx.recv() => {
                    match cmd {
                        CorrelationCommand::Correlate { signal, respond_to } => {
                            let events = self.engine.correlate(&signal);
                            self.publish(&events);
                            let _ = respond_to.send(events);
                        }

                        CorrelationCommand::Submit { signal } => {
                            let events = self.engine.correlate(&signal);
                            self.publish(&events);
                        }

                        CorrelationCommand::GetMemorySize { respond_to } => {
                            let _ = respond_to.send(self.engine.memory_size());
                        }

                        CorrelationCommand::GetStats { respond_to } => {
                            let _ = respond_to.send(self.engine.stats());
                        }

                        CorrelationCommand::Sweep { respond_to } => {
                            let events = self.engine.sweep();
                            self.publish(&events);
                            let _ = respond_to.send(events);
                        }

                        CorrelationCommand::Shutdown => {
                            debug!("received shutdown command");
                            let events = self.engine.sweep();
                            self.publish(&events);
                            break;
                        }
                    }
                }

                else => {
                    warn!("command channel closed, shutting down");
                    let events = self.engine.sweep();
                    self.publish(&events);
                    break;
                }
            }
        }

        debug!("correlation actor stopped");
    }

    fn publish(&self, events: &[CorrelatedEvent]) {
        for event in events {
            // no subscribers is fine
            if self.event_tx.send(event.clone()).is_err() {
                trace!("no subscribers for {}", event.uei);
            }
        }
    }
}

/// Handle for talking to a CorrelationActor
///
/// Cheap to clone; all clones feed the same engine.
#[derive(Clone)]
pub struct CorrelationHandle {
    sender: mpsc::Sender<CorrelationCommand>,
}

impl CorrelationHandle {
    /// Spawn a new correlation actor publishing to `event_tx`
    pub fn spawn(config: CorrelationConfig, event_tx: broadcast::Sender<CorrelatedEvent>) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(256);

        let actor = CorrelationActor::new(config, cmd_rx, event_tx);
        tokio::spawn(actor.run());

        Self { sender: cmd_tx }
    }

    pub async fn correlate(&self, signal: Signal) -> Result<Vec<CorrelatedEvent>> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(CorrelationCommand::Correlate {
                signal,
                respond_to: tx,
            })
            .await
            .context("failed to send Correlate command")?;

        rx.await.context("failed to receive response")
    }

    /// Fire-and-forget variant of [`correlate`](Self::correlate)
    pub async fn submit(&self, signal: Signal) -> Result<()> {
        self.sender
            .send(CorrelationCommand::Submit { signal })
            .await
            .context("failed to send Submit command")?;
        Ok(())
    }

    pub async fn memory_size(&self) -> Result<usize> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(CorrelationCommand::GetMemorySize { respond_to: tx })
            .await
            .context("failed to send GetMemorySize command")?;

        rx.await.context("failed to receive response")
    }

    pub async fn stats(&self) -> Result<MemoryStats> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(CorrelationCommand::GetStats { respond_to: tx })
            .await
            .context("failed to send GetStats command")?;

        rx.await.context("failed to receive response")
    }

    pub async fn sweep(&self) -> Result<Vec<CorrelatedEvent>> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(CorrelationCommand::Sweep { respond_to: tx })
            .await
            .context("failed to send Sweep command")?;

        rx.await.context("failed to receive response")
    }

    /// Gracefully shut down the actor
    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(CorrelationCommand::Shutdown)
            .await
            .context("failed to send Shutdown command")?;
        Ok(())
    }
}
