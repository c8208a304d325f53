//! Background upload forwarding pipeline.

/// Store-backed fetch source and the two-phase upload handler.
pub mod dispatch;
/// Lifecycle manager and engine seams.
pub mod engine;
mod inflight;
/// Network result → storage write.
pub mod outcome;
mod poller;
/// Per-service forwarders and their registry.
pub mod provider;
/// Named task tracking with panic containment.
pub mod registry;
mod stats;
mod worker;
/// DB write queue and its single consumer.
pub mod writer;

pub use stats::StatsSnapshot;
