#![allow(clippy::doc_markdown)] // Allow technical terms like librdkafka in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Kafka Bridge Core
//!
//! Host-side bridge between async Rust and a queue-based, single-threaded
//! native Kafka client library (librdkafka) whose state lives outside Rust's
//! memory model.
//!
//! ## Overview
//!
//! Producing and consuming are thin calls into the native library. The work
//! this crate does sits around those calls:
//!
//! - **Wakeups without polling**: the library's edge-triggered fd notifications
//!   become coalesced wakeups an async task can `await`
//! - **Context across the boundary**: callbacks carry only word-sized tokens;
//!   registries turn them back into host state
//! - **Deterministic teardown**: caches, partition queues and bridges are
//!   released in a fixed order, without leaks or use-after-free
//!
//! ## Module Organization
//!
//! - [`bridge`] - EventBridge: fd readiness to host wakeups
//! - [`registry`] - OpaqueRegistry and the process-wide GlobalHandleRegistry
//! - [`handle`] - Handle aggregate, TopicCache, PartitionQueueRegistry
//! - [`ffi`] - `extern "C"` callback trampolines
//! - [`foreign`] - the boundary trait and its implementations
//! - [`config`] - Bridge configuration
//! - [`error`] - Structured error handling
//! - [`logging`] - Structured logging setup
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use kafka_bridge::foreign::{mock::MockLibrary, ForeignLibrary};
//! use kafka_bridge::{BridgeConfig, Handle, Readiness};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let handle = Handle::open(BridgeConfig::from_env()?, |token| {
//!     Ok(Arc::new(MockLibrary::with_opaque("consumer-1", token)) as Arc<dyn ForeignLibrary>)
//! })?;
//!
//! let bridge = handle.attach_partition("orders", 3)?;
//! while bridge.wait().await == Readiness::Ready {
//!     // serve every event currently on the partition queue
//! }
//! handle.close()?;
//! # Ok(())
//! # }
//! ```

pub mod bridge;
pub mod config;
pub mod error;
pub mod ffi;
pub mod foreign;
pub mod handle;
pub mod logging;
pub mod registry;

pub use bridge::{EventBridge, Readiness};
pub use config::BridgeConfig;
pub use error::{BridgeError, BridgeResult};
pub use foreign::{ForeignError, ForeignLibrary, LogEvent, NativeQueue, NativeTopic};
pub use handle::{
    DeliveryContext, DeliveryReport, Handle, HandleCore, HandleState, PartitionQueueRegistry,
    TopicCache, TopicPartition,
};
pub use registry::{GlobalHandleRegistry, OpaqueRegistry, OpaqueToken, PointerToken, NO_CONTEXT};
