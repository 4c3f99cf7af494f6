//! # FFI Entry Points
//!
//! Callback functions handed to the native client. Everything here resolves
//! scalar tokens back to host state through the registries and then runs
//! ordinary Rust code.

pub mod trampolines;

#[cfg(feature = "librdkafka")]
pub mod rdkafka;

pub use trampolines::{delivery_report_trampoline, dispatch_delivery_report, RawDelivery};
