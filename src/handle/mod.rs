//! # Client Handle
//!
//! The aggregate that owns everything one native client instance needs on
//! the host side: its global pointer token, callback contexts, topic cache,
//! partition queues and event bridges.
//!
//! ## Lifecycle
//!
//! ```text
//! UNINIT ──▶ CONFIGURED ──▶ READY ──▶ CLOSING ──▶ CLOSED
//!            (token         (native    (bridges stopped, topics
//!             registered)    client,    destroyed, token unregistered,
//!                            caches)    then released)
//! ```
//!
//! Transitions only move forward. Attach/detach and the other operations
//! are valid in READY only; afterwards they return `HandleClosed`.

pub mod log_forwarder;
pub mod partition_queues;
pub mod topic_cache;

pub use partition_queues::{PartitionQueueRegistry, TopicPartition};
pub use topic_cache::TopicCache;

use crate::bridge::EventBridge;
use crate::config::BridgeConfig;
use crate::error::{BridgeError, BridgeResult};
use crate::foreign::{ForeignError, ForeignLibrary, LogEvent, NativeQueue, NativeTopic};
use crate::logging::log_bridge_operation;
use crate::registry::{GlobalHandleRegistry, OpaqueRegistry, OpaqueToken, PointerToken};
use log_forwarder::LogForwarder;
use parking_lot::{Mutex, RwLock};
use std::any::Any;
use std::fmt;
use std::sync::{Arc, OnceLock};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Process-wide pointer token -> handle map used by callback trampolines
static GLOBAL_HANDLES: OnceLock<GlobalHandleRegistry<HandleCore>> = OnceLock::new();

fn global_handles() -> &'static GlobalHandleRegistry<HandleCore> {
    GLOBAL_HANDLES.get_or_init(GlobalHandleRegistry::new)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
    Uninit,
    Configured,
    Ready,
    Closing,
    Closed,
}

impl HandleState {
    pub fn as_str(self) -> &'static str {
        match self {
            HandleState::Uninit => "uninit",
            HandleState::Configured => "configured",
            HandleState::Ready => "ready",
            HandleState::Closing => "closing",
            HandleState::Closed => "closed",
        }
    }
}

impl fmt::Display for HandleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a produce request, delivered to the context it was sent with
pub struct DeliveryReport {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    /// Foreign error code, zero on success
    pub error_code: i32,
    /// Application value attached when the message was produced
    pub opaque: Option<Box<dyn Any + Send + Sync>>,
}

impl fmt::Debug for DeliveryReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeliveryReport")
            .field("topic", &self.topic)
            .field("partition", &self.partition)
            .field("offset", &self.offset)
            .field("error_code", &self.error_code)
            .field("opaque", &self.opaque.is_some())
            .finish()
    }
}

/// Host state parked in the opaque registry while a message is in flight
pub struct DeliveryContext {
    pub reports: mpsc::UnboundedSender<DeliveryReport>,
    pub opaque: Option<Box<dyn Any + Send + Sync>>,
}

/// Everything that only exists once the native client has been constructed
struct ReadyParts {
    foreign: Arc<dyn ForeignLibrary>,
    name: String,
    topics: TopicCache,
    partitions: PartitionQueueRegistry,
    bridges: Mutex<Vec<Arc<EventBridge>>>,
    owned_queues: Mutex<Vec<NativeQueue>>,
    log_forwarder: Mutex<Option<LogForwarder>>,
    /// Receiver of a forwarder started at open, until someone claims it
    log_receiver: Mutex<Option<mpsc::Receiver<LogEvent>>>,
}

/// Shared core of a [`Handle`], reachable from trampolines through the
/// global registry.
pub struct HandleCore {
    token_value: usize,
    token: Mutex<Option<PointerToken>>,
    state: RwLock<HandleState>,
    config: BridgeConfig,
    contexts: OpaqueRegistry<DeliveryContext>,
    ready: OnceLock<ReadyParts>,
}

impl fmt::Debug for HandleCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandleCore")
            .field("name", &self.name())
            .field("token", &self.token_value)
            .field("state", &*self.state.read())
            .finish()
    }
}

impl HandleCore {
    pub fn name(&self) -> &str {
        self.ready.get().map_or("<unnamed>", |ready| ready.name.as_str())
    }

    pub fn state(&self) -> HandleState {
        *self.state.read()
    }

    /// Trade a one-shot callback token back for its context
    pub fn take_context(&self, token: OpaqueToken) -> Option<DeliveryContext> {
        self.contexts.get(token)
    }

    /// Run `op` against the READY parts, holding off close until it returns
    fn with_ready<T>(&self, op: impl FnOnce(&ReadyParts) -> BridgeResult<T>) -> BridgeResult<T> {
        let state = self.state.read();
        match (*state, self.ready.get()) {
            (HandleState::Ready, Some(ready)) => op(ready),
            (HandleState::Closing | HandleState::Closed, _) => Err(BridgeError::HandleClosed {
                name: self.name().to_string(),
            }),
            (found, _) => Err(BridgeError::InvalidState {
                expected: "ready",
                found: found.as_str(),
            }),
        }
    }

    pub fn topic(&self, name: &str) -> BridgeResult<NativeTopic> {
        self.with_ready(|ready| ready.topics.get_or_create(name))
    }

    pub fn topic_name(&self, topic: NativeTopic) -> BridgeResult<String> {
        self.with_ready(|ready| ready.topics.name_of(topic))
    }

    fn close(&self) -> BridgeResult<()> {
        {
            let mut state = self.state.write();
            match *state {
                HandleState::Closing | HandleState::Closed => return Ok(()),
                _ => *state = HandleState::Closing,
            }
        }
        log_bridge_operation("close", "handle", Some(self.name()), "closing", None);

        let mut first_error: Option<BridgeError> = None;
        let mut record = |result: BridgeResult<()>| {
            if let Err(e) = result {
                warn!(error = %e, "Handle teardown step failed");
                first_error.get_or_insert(e);
            }
        };

        if let Some(ready) = self.ready.get() {
            if let Some(mut forwarder) = ready.log_forwarder.lock().take() {
                record(forwarder.stop());
            }
            ready.log_receiver.lock().take();

            let bridges: Vec<_> = ready.bridges.lock().drain(..).collect();
            for bridge in &bridges {
                record(bridge.stop());
            }
            for queue in ready.owned_queues.lock().drain(..) {
                ready.foreign.queue_destroy(queue);
            }

            record(ready.partitions.detach_all().map(|_| ()));

            let topics = ready.topics.destroy_all();
            debug!(topics = topics, "Topic cache destroyed");
        }

        let abandoned = self.contexts.clear();
        if abandoned > 0 {
            debug!(abandoned = abandoned, "Dropped undelivered callback contexts");
        }

        // Unregister strictly before the token's allocation is released
        if let Some(token) = self.token.lock().take() {
            global_handles().unregister(&token);
            drop(token);
        }

        *self.state.write() = HandleState::Closed;
        log_bridge_operation("close", "handle", Some(self.name()), "closed", None);

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// A client handle: the unique owner of one native client's host-side state.
///
/// Dropping the handle closes it.
pub struct Handle {
    core: Arc<HandleCore>,
}

impl Handle {
    /// Create a handle around a native client.
    ///
    /// `construct` is called once the global token is registered and must
    /// build the native client with that token as its opaque pointer, so
    /// callbacks fired during construction can already find the handle.
    pub fn open<F>(config: BridgeConfig, construct: F) -> BridgeResult<Self>
    where
        F: FnOnce(usize) -> Result<Arc<dyn ForeignLibrary>, ForeignError>,
    {
        config.validate()?;

        let token = PointerToken::allocate();
        let core = Arc::new(HandleCore {
            token_value: token.as_usize(),
            token: Mutex::new(None),
            state: RwLock::new(HandleState::Uninit),
            config,
            contexts: OpaqueRegistry::new(),
            ready: OnceLock::new(),
        });

        global_handles().register(&token, &core);
        *core.token.lock() = Some(token);
        *core.state.write() = HandleState::Configured;

        // From here on, Drop runs the full close path
        let handle = Handle { core };

        let foreign = construct(handle.core.token_value).map_err(|e| {
            crate::logging::log_error("handle", "construct", &e.to_string(), None);
            BridgeError::foreign("construct", e.message)
        })?;

        let name = foreign.name();
        let ready = ReadyParts {
            topics: TopicCache::new(Arc::clone(&foreign)),
            partitions: PartitionQueueRegistry::new(Arc::clone(&foreign), handle.core.config.clone()),
            bridges: Mutex::new(Vec::new()),
            owned_queues: Mutex::new(Vec::new()),
            log_forwarder: Mutex::new(None),
            log_receiver: Mutex::new(None),
            name,
            foreign,
        };
        if handle.core.ready.set(ready).is_err() {
            return Err(BridgeError::InvalidState {
                expected: "configured",
                found: "ready",
            });
        }
        *handle.core.state.write() = HandleState::Ready;

        if handle.core.config.forward_logs {
            let rx = handle.forward_logs()?;
            if let Some(ready) = handle.core.ready.get() {
                *ready.log_receiver.lock() = Some(rx);
            }
        }

        info!(
            handle = %handle.name(),
            token = handle.core.token_value,
            "✅ HANDLE READY"
        );
        log_bridge_operation("open", "handle", Some(handle.name()), "ready", None);
        Ok(handle)
    }

    /// Resolve the handle a client opaque pointer belongs to
    pub fn lookup(token: usize) -> Option<Arc<HandleCore>> {
        global_handles().lookup(token)
    }

    pub fn name(&self) -> &str {
        self.core.name()
    }

    pub fn state(&self) -> HandleState {
        self.core.state()
    }

    /// The opaque pointer value the native client was configured with
    pub fn token(&self) -> usize {
        self.core.token_value
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.core.config
    }

    pub fn core(&self) -> &Arc<HandleCore> {
        &self.core
    }

    /// Park a delivery context for a one-shot callback
    pub fn put_context(&self, context: DeliveryContext) -> BridgeResult<OpaqueToken> {
        self.core
            .with_ready(|_| Ok(self.core.contexts.put(context)))
    }

    pub fn take_context(&self, token: OpaqueToken) -> Option<DeliveryContext> {
        self.core.take_context(token)
    }

    /// Contexts parked and not yet consumed
    pub fn pending_contexts(&self) -> usize {
        self.core.contexts.len()
    }

    pub fn topic(&self, name: &str) -> BridgeResult<NativeTopic> {
        self.core.topic(name)
    }

    pub fn topic_name(&self, topic: NativeTopic) -> BridgeResult<String> {
        self.core.topic_name(topic)
    }

    /// Bridge a queue owned elsewhere; the bridge is stopped at close
    pub fn bridge_queue(&self, queue: NativeQueue) -> BridgeResult<Arc<EventBridge>> {
        self.core.with_ready(|ready| {
            let bridge = Arc::new(EventBridge::start_with_config(
                Arc::clone(&ready.foreign),
                queue,
                &self.core.config,
            )?);
            ready.bridges.lock().push(Arc::clone(&bridge));
            Ok(bridge)
        })
    }

    /// Bridge the client's main event queue. The queue reference is held
    /// by the handle and released after the bridge is stopped.
    pub fn enable_main_queue_events(&self) -> BridgeResult<Arc<EventBridge>> {
        self.core.with_ready(|ready| {
            let queue = ready
                .foreign
                .queue_get_main()
                .map_err(|e| BridgeError::foreign("queue_get_main", e.message))?;
            let bridge = match EventBridge::start_with_config(
                Arc::clone(&ready.foreign),
                queue,
                &self.core.config,
            ) {
                Ok(bridge) => Arc::new(bridge),
                Err(e) => {
                    ready.foreign.queue_destroy(queue);
                    return Err(e);
                }
            };
            ready.owned_queues.lock().push(queue);
            ready.bridges.lock().push(Arc::clone(&bridge));
            Ok(bridge)
        })
    }

    /// Route library logs to a dedicated queue and forward them to the
    /// returned channel. Only one forwarder exists per handle; when it was
    /// started at open (`forward_logs` in the config) the first call hands
    /// out its receiver.
    pub fn forward_logs(&self) -> BridgeResult<mpsc::Receiver<LogEvent>> {
        self.core.with_ready(|ready| {
            let mut slot = ready.log_forwarder.lock();
            if slot.is_some() {
                return ready
                    .log_receiver
                    .lock()
                    .take()
                    .ok_or(BridgeError::InvalidState {
                        expected: "logs not forwarded",
                        found: "logs forwarded",
                    });
            }
            let (forwarder, rx) = LogForwarder::start(Arc::clone(&ready.foreign), &self.core.config)?;
            *slot = Some(forwarder);
            Ok(rx)
        })
    }

    pub fn attach_partition(&self, topic: &str, partition: i32) -> BridgeResult<Arc<EventBridge>> {
        self.core
            .with_ready(|ready| ready.partitions.attach(topic, partition))
    }

    pub fn partition_bridge(&self, topic: &str, partition: i32) -> Option<Arc<EventBridge>> {
        self.core
            .with_ready(|ready| Ok(ready.partitions.lookup(topic, partition)))
            .ok()
            .flatten()
    }

    pub fn detach_partition(&self, topic: &str, partition: i32) -> BridgeResult<bool> {
        self.core
            .with_ready(|ready| ready.partitions.detach(topic, partition))
    }

    pub fn detach_all_partitions(&self) -> BridgeResult<usize> {
        self.core.with_ready(|ready| ready.partitions.detach_all())
    }

    /// Tear everything down. Idempotent; the first teardown error is
    /// returned after every step has run.
    pub fn close(&self) -> BridgeResult<()> {
        self.core.close()
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.core, f)
    }
}

impl Drop for Handle {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(handle = %self.name(), error = %e, "Handle close failed on drop");
        }
    }
}
