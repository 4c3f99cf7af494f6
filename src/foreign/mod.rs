//! # Foreign Library Boundary
//!
//! The client library this crate bridges keeps its state outside Rust's
//! ownership model and talks to us through raw pointers and file
//! descriptors. Everything the bridge needs from it goes through
//! [`ForeignLibrary`], so the bridge logic never touches a raw symbol.
//!
//! Native objects are carried as [`NativeQueue`] and [`NativeTopic`]: plain
//! copyable pointer wrappers with identity semantics. Their lifetimes are
//! owned by whichever bridge component created them, never by the wrapper.

pub mod mock;

#[cfg(feature = "librdkafka")]
pub mod librdkafka;

use std::ffi::c_void;
use std::fmt;
use std::os::fd::RawFd;
use std::ptr::NonNull;

/// Sentinel fd that disables edge-triggered notification on a queue
pub const DISABLE_FD: RawFd = -1;

macro_rules! native_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name(NonNull<c_void>);

        // The pointee is only ever touched by the foreign library, which
        // serializes its own access; the wrapper is an identity token.
        unsafe impl Send for $name {}
        unsafe impl Sync for $name {}

        impl $name {
            /// Wrap a raw pointer, `None` when null
            pub fn from_raw(ptr: *mut c_void) -> Option<Self> {
                NonNull::new(ptr).map(Self)
            }

            pub fn as_ptr(self) -> *mut c_void {
                self.0.as_ptr()
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({:p})"), self.0)
            }
        }
    };
}

native_handle!(
    /// A foreign event queue (`rd_kafka_queue_t`)
    NativeQueue
);

native_handle!(
    /// A foreign topic object (`rd_kafka_topic_t`)
    NativeTopic
);

/// A log line emitted by the foreign library
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEvent {
    /// Instance name of the emitting client
    pub name: String,
    /// Facility tag, e.g. "BROKER" or "CGRPOP"
    pub tag: String,
    /// Log message
    pub message: String,
    /// Syslog severity (0 = emerg .. 7 = debug)
    pub level: i32,
}

impl fmt::Display for LogEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}][{}][{}] {}",
            self.name, self.tag, self.level, self.message
        )
    }
}

/// Error reported by the foreign library itself
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message} (code {code})")]
pub struct ForeignError {
    pub code: i32,
    pub message: String,
}

/// Calls the bridge makes into the foreign client library.
///
/// Implementations must be callable from any thread. None of these calls may
/// re-enter a bridge registry: the topic cache and partition queue registry
/// hold their own lock across them.
pub trait ForeignLibrary: Send + Sync {
    /// Instance name of the native client
    fn name(&self) -> String;

    /// Enable edge-triggered IO notification: on each 0 -> 1 transition of
    /// pending events in `queue`, `payload` is written to `fd`. Passing
    /// [`DISABLE_FD`] with an empty payload disables it.
    fn queue_io_event_enable(&self, queue: NativeQueue, fd: RawFd, payload: &[u8]);

    /// Create a native topic object for `name`
    fn topic_new(&self, name: &str) -> Result<NativeTopic, ForeignError>;

    fn topic_destroy(&self, topic: NativeTopic);

    /// Name the native topic object was created with
    fn topic_name(&self, topic: NativeTopic) -> String;

    /// The queue dedicated to one topic partition, if the partition is known
    fn queue_get_partition(&self, topic: &str, partition: i32) -> Option<NativeQueue>;

    /// Forward `src` into `dst`, or stop forwarding when `dst` is `None`
    fn queue_forward(&self, src: NativeQueue, dst: Option<NativeQueue>);

    fn queue_destroy(&self, queue: NativeQueue);

    /// Create a new, empty queue owned by the caller
    fn queue_new(&self) -> Result<NativeQueue, ForeignError>;

    /// The client's main event queue; the caller owns the returned reference
    fn queue_get_main(&self) -> Result<NativeQueue, ForeignError>;

    /// Route library logs to `queue` instead of the main queue
    fn set_log_queue(&self, queue: NativeQueue);

    /// Pop one log event from `queue` without blocking
    fn queue_poll_log(&self, queue: NativeQueue) -> Option<LogEvent>;
}
