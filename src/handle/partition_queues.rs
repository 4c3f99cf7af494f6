//! # Partition Queue Registry
//!
//! Per (topic, partition) dedicated queues for assigned partitions. Attaching
//! a partition stops the client forwarding its events into the consumer
//! queue, so they land only on the partition's own queue, and bridges that
//! queue so a task can wait on just that partition.
//!
//! Teardown order per entry is fixed: the bridge is stopped strictly before
//! the native queue is released.

use crate::bridge::EventBridge;
use crate::config::BridgeConfig;
use crate::error::{BridgeError, BridgeResult};
use crate::foreign::ForeignLibrary;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Key for assigned partition queues
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicPartition {
    pub topic: String,
    pub partition: i32,
}

impl TopicPartition {
    pub fn new(topic: impl Into<String>, partition: i32) -> Self {
        Self {
            topic: topic.into(),
            partition,
        }
    }
}

impl fmt::Display for TopicPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.topic, self.partition)
    }
}

pub struct PartitionQueueRegistry {
    foreign: Arc<dyn ForeignLibrary>,
    config: BridgeConfig,
    entries: Mutex<HashMap<TopicPartition, Arc<EventBridge>>>,
}

impl fmt::Debug for PartitionQueueRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PartitionQueueRegistry")
            .field("assigned", &self.entries.lock().keys().collect::<Vec<_>>())
            .finish()
    }
}

impl PartitionQueueRegistry {
    pub fn new(foreign: Arc<dyn ForeignLibrary>, config: BridgeConfig) -> Self {
        Self {
            foreign,
            config,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Give `topic [partition]` its own queue and bridge.
    ///
    /// Attaching an already attached partition returns the existing bridge.
    /// The registry lock is held across the foreign calls, none of which
    /// re-enter this registry, so concurrent attaches of one partition can
    /// never bridge the same native queue twice.
    pub fn attach(&self, topic: &str, partition: i32) -> BridgeResult<Arc<EventBridge>> {
        let key = TopicPartition::new(topic, partition);
        let mut entries = self.entries.lock();
        if let Some(existing) = entries.get(&key) {
            debug!(partition = %key, "Partition queue already attached");
            return Ok(Arc::clone(existing));
        }

        let queue = self
            .foreign
            .queue_get_partition(topic, partition)
            .ok_or_else(|| BridgeError::PartitionQueueUnavailable {
                topic: topic.to_string(),
                partition,
            })?;

        // Forwarding stays on until the bridge exists; a failed start must
        // leave the partition's events flowing to the consumer queue
        let bridge = match EventBridge::start_with_config(Arc::clone(&self.foreign), queue, &self.config) {
            Ok(bridge) => Arc::new(bridge),
            Err(e) => {
                self.foreign.queue_destroy(queue);
                return Err(e);
            }
        };
        self.foreign.queue_forward(queue, None);

        entries.insert(key.clone(), Arc::clone(&bridge));
        debug!(partition = %key, queue = ?queue, "Partition queue attached");
        Ok(bridge)
    }

    pub fn lookup(&self, topic: &str, partition: i32) -> Option<Arc<EventBridge>> {
        self.entries
            .lock()
            .get(&TopicPartition::new(topic, partition))
            .cloned()
    }

    /// Detach a single partition. False when it was not attached.
    pub fn detach(&self, topic: &str, partition: i32) -> BridgeResult<bool> {
        let key = TopicPartition::new(topic, partition);
        let Some(bridge) = self.entries.lock().remove(&key) else {
            return Ok(false);
        };
        self.release(&key, bridge)?;
        Ok(true)
    }

    /// Detach every partition, e.g. on shutdown or a full revoke.
    ///
    /// Every entry is released even if some fail; the first error is returned.
    pub fn detach_all(&self) -> BridgeResult<usize> {
        let entries: Vec<_> = self.entries.lock().drain().collect();
        let count = entries.len();
        let mut first_error = None;

        for (key, bridge) in entries {
            if let Err(e) = self.release(&key, bridge) {
                first_error.get_or_insert(e);
            }
        }

        if count > 0 {
            info!(count = count, "Detached all partition queues");
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(count),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop the bridge, then release its queue; the queue is released even
    /// when stopping reports an error.
    fn release(&self, key: &TopicPartition, bridge: Arc<EventBridge>) -> BridgeResult<()> {
        let stopped = bridge.stop();
        self.foreign.queue_destroy(bridge.queue());
        if let Err(e) = &stopped {
            warn!(partition = %key, error = %e, "Partition bridge stop failed");
        }
        stopped
    }
}
