//! Owning service for the forwarding engine.

/// Contact logging plus engine start/stop.
pub mod service;
