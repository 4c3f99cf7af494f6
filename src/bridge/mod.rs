//! # Event Bridging
//!
//! Turns the foreign library's fd-based, edge-triggered queue notifications
//! into wakeups async tasks (or plain threads) can wait on.

pub mod event_bridge;

pub use event_bridge::{EventBridge, Readiness};
