//! Actor plumbing for the correlation daemon
//!
//! ```text
//!   inbound signals ──► CorrelationHandle ──mpsc──► CorrelationActor ──► CorrelationEngine
//!                                                        │
//!                              sweep ticker ─────────────┤
//!                                                        ▼
//!                                          broadcast<CorrelatedEvent> ──► subscribers
//! ```
//!
//! ## Communication Patterns
//!
//! 1. **Commands**: mpsc command channel into the actor
//! 2. **Events**: correlated events are published on a broadcast channel
//! 3. **Request/Response**: oneshot channels for queries

pub mod correlator;
pub mod messages;
