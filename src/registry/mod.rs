//! # Registry Infrastructure
//!
//! Maps that let foreign callbacks, which carry nothing but a scalar, find
//! their way back to host state.
//!
//! ```text
//! Registry Infrastructure
//! ├── GlobalHandleRegistry  (client opaque pointer -> owning handle, process-wide)
//! └── OpaqueRegistry        (per-handle token -> callback context)
//! ```

pub mod global;
pub mod opaque;

pub use global::{GlobalHandleRegistry, PointerToken};
pub use opaque::{OpaqueRegistry, OpaqueToken, NO_CONTEXT};
