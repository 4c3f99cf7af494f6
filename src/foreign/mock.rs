//! # In-Process Foreign Library
//!
//! A stand-in for the native client that keeps librdkafka's observable queue
//! semantics: edge-triggered IO notification on the 0 -> 1 transition of a
//! queue's pending count, partition queues forwarding into the main queue
//! until told otherwise, and reference-counted queue handles. It also tracks
//! every native object it hands out so tests can assert nothing leaked.

use super::{ForeignError, ForeignLibrary, LogEvent, NativeQueue, NativeTopic, DISABLE_FD};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::ffi::c_void;
use std::os::fd::RawFd;
use tracing::trace;

#[derive(Debug, Default)]
struct MockQueue {
    refs: usize,
    pending: usize,
    logs: VecDeque<LogEvent>,
    io: Option<(RawFd, Vec<u8>)>,
    forward: Option<NativeQueue>,
}

#[derive(Debug, Default)]
struct MockState {
    next_id: usize,
    queues: HashMap<NativeQueue, MockQueue>,
    partitions: HashMap<(String, i32), NativeQueue>,
    hidden_partitions: HashSet<(String, i32)>,
    topics: HashMap<NativeTopic, String>,
    topics_created: usize,
    fail_topic_creation: bool,
    main_queue: Option<NativeQueue>,
    log_queue: Option<NativeQueue>,
    io_writes: usize,
}

impl MockState {
    fn alloc_ptr(&mut self) -> *mut c_void {
        self.next_id += 1;
        // Never dereferenced; only needs to be unique and non-null
        (self.next_id * 16) as *mut c_void
    }

    fn alloc_queue(&mut self, forward: Option<NativeQueue>) -> Option<NativeQueue> {
        let queue = NativeQueue::from_raw(self.alloc_ptr())?;
        self.queues.insert(
            queue,
            MockQueue {
                refs: 1,
                forward,
                ..MockQueue::default()
            },
        );
        Some(queue)
    }

    fn main_queue(&mut self) -> Option<NativeQueue> {
        if self.main_queue.is_none() {
            let queue = self.alloc_queue(None)?;
            // The client itself holds this reference
            self.main_queue = Some(queue);
        }
        self.main_queue
    }

    /// Follow forwarding to the queue that actually receives events
    fn resolve(&self, mut queue: NativeQueue) -> NativeQueue {
        while let Some(next) = self.queues.get(&queue).and_then(|q| q.forward) {
            queue = next;
        }
        queue
    }

    fn enqueue(&mut self, queue: NativeQueue, count: usize, log: Option<LogEvent>) {
        let target = self.resolve(queue);
        let Some(q) = self.queues.get_mut(&target) else {
            return;
        };
        let was_empty = q.pending == 0;
        q.pending += count;
        if let Some(log) = log {
            q.logs.push_back(log);
        }
        if was_empty && q.pending > 0 {
            if let Some((fd, payload)) = &q.io {
                // SAFETY: fd was registered by the bridge and stays open
                // until it disables notification
                let written = unsafe { libc::write(*fd, payload.as_ptr().cast(), payload.len()) };
                trace!(fd = *fd, written = written, "mock edge trigger");
                self.io_writes += 1;
            }
        }
    }
}

fn null_queue() -> ForeignError {
    ForeignError {
        code: -1,
        message: "null queue".to_string(),
    }
}

/// In-process implementation of [`ForeignLibrary`]
#[derive(Debug)]
pub struct MockLibrary {
    name: String,
    opaque: usize,
    state: Mutex<MockState>,
}

impl MockLibrary {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_opaque(name, 0)
    }

    /// A client configured with an opaque value, as the native client is
    /// configured with the handle's global token
    pub fn with_opaque(name: impl Into<String>, opaque: usize) -> Self {
        Self {
            name: name.into(),
            opaque,
            state: Mutex::new(MockState::default()),
        }
    }

    /// Opaque value the client hands back to callbacks
    pub fn opaque(&self) -> usize {
        self.opaque
    }

    /// Make subsequent topic creation fail
    pub fn fail_topic_creation(&self, fail: bool) {
        self.state.lock().fail_topic_creation = fail;
    }

    /// Make a partition unknown to the client
    pub fn hide_partition(&self, topic: &str, partition: i32) {
        self.state
            .lock()
            .hidden_partitions
            .insert((topic.to_string(), partition));
    }

    /// Deliver `count` events to `queue`, honouring forwarding
    pub fn produce(&self, queue: NativeQueue, count: usize) {
        self.state.lock().enqueue(queue, count, None);
    }

    /// Deliver `count` events to a partition's queue, creating it if needed
    pub fn produce_partition(&self, topic: &str, partition: i32, count: usize) {
        let mut state = self.state.lock();
        let key = (topic.to_string(), partition);
        let queue = match state.partitions.get(&key).copied() {
            Some(queue) => queue,
            None => {
                let Some(main) = state.main_queue() else {
                    return;
                };
                let Some(queue) = state.alloc_queue(Some(main)) else {
                    return;
                };
                // The client keeps its own reference to partition queues
                state.partitions.insert(key, queue);
                queue
            }
        };
        state.enqueue(queue, count, None);
    }

    /// Emit a log line the way the client does: to the log queue if one is
    /// set, else to the main queue
    pub fn emit_log(&self, tag: &str, level: i32, message: &str) {
        let mut state = self.state.lock();
        let log = LogEvent {
            name: self.name.clone(),
            tag: tag.to_string(),
            message: message.to_string(),
            level,
        };
        let log_queue = state.log_queue;
        let target = match log_queue {
            Some(queue) => Some(queue),
            None => state.main_queue(),
        };
        if let Some(queue) = target {
            state.enqueue(queue, 1, Some(log));
        }
    }

    /// Serve all pending events on `queue`, returning how many there were
    pub fn drain(&self, queue: NativeQueue) -> usize {
        let mut state = self.state.lock();
        let target = state.resolve(queue);
        state
            .queues
            .get_mut(&target)
            .map(|q| {
                q.logs.clear();
                std::mem::take(&mut q.pending)
            })
            .unwrap_or(0)
    }

    pub fn pending(&self, queue: NativeQueue) -> usize {
        self.state.lock().queues.get(&queue).map_or(0, |q| q.pending)
    }

    /// The client's main queue
    pub fn main_queue(&self) -> Option<NativeQueue> {
        self.state.lock().main_queue()
    }

    /// Whether IO notification is currently enabled on `queue`
    pub fn io_enabled(&self, queue: NativeQueue) -> bool {
        self.state
            .lock()
            .queues
            .get(&queue)
            .is_some_and(|q| q.io.is_some())
    }

    /// Forwarding target of `queue`; `None` when the queue is unknown
    pub fn forward_target(&self, queue: NativeQueue) -> Option<Option<NativeQueue>> {
        self.state.lock().queues.get(&queue).map(|q| q.forward)
    }

    /// Total bytes-written notifications performed
    pub fn io_writes(&self) -> usize {
        self.state.lock().io_writes
    }

    pub fn topics_created(&self) -> usize {
        self.state.lock().topics_created
    }

    pub fn live_topics(&self) -> usize {
        self.state.lock().topics.len()
    }

    /// Queue references held outside the client itself
    pub fn live_queue_refs(&self) -> usize {
        let state = self.state.lock();
        let internal: HashSet<NativeQueue> = state
            .partitions
            .values()
            .copied()
            .chain(state.main_queue)
            .collect();
        state
            .queues
            .iter()
            .map(|(queue, q)| {
                if internal.contains(queue) {
                    q.refs.saturating_sub(1)
                } else {
                    q.refs
                }
            })
            .sum()
    }
}

impl ForeignLibrary for MockLibrary {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn queue_io_event_enable(&self, queue: NativeQueue, fd: RawFd, payload: &[u8]) {
        let mut state = self.state.lock();
        if let Some(q) = state.queues.get_mut(&queue) {
            q.io = (fd != DISABLE_FD).then(|| (fd, payload.to_vec()));
        }
    }

    fn topic_new(&self, name: &str) -> Result<NativeTopic, ForeignError> {
        let mut state = self.state.lock();
        if state.fail_topic_creation || name.is_empty() {
            return Err(ForeignError {
                code: -186,
                message: "Local: Invalid argument or configuration".to_string(),
            });
        }
        let topic = NativeTopic::from_raw(state.alloc_ptr()).ok_or_else(|| ForeignError {
            code: -1,
            message: "null topic".to_string(),
        })?;
        state.topics.insert(topic, name.to_string());
        state.topics_created += 1;
        Ok(topic)
    }

    fn topic_destroy(&self, topic: NativeTopic) {
        self.state.lock().topics.remove(&topic);
    }

    fn topic_name(&self, topic: NativeTopic) -> String {
        self.state
            .lock()
            .topics
            .get(&topic)
            .cloned()
            .unwrap_or_default()
    }

    fn queue_get_partition(&self, topic: &str, partition: i32) -> Option<NativeQueue> {
        let mut state = self.state.lock();
        let key = (topic.to_string(), partition);
        if state.hidden_partitions.contains(&key) {
            return None;
        }
        if let Some(queue) = state.partitions.get(&key).copied() {
            if let Some(q) = state.queues.get_mut(&queue) {
                q.refs += 1;
            }
            return Some(queue);
        }
        let main = state.main_queue()?;
        let queue = state.alloc_queue(Some(main))?;
        if let Some(q) = state.queues.get_mut(&queue) {
            // One reference for the client, one for the caller
            q.refs += 1;
        }
        state.partitions.insert(key, queue);
        Some(queue)
    }

    fn queue_forward(&self, src: NativeQueue, dst: Option<NativeQueue>) {
        if let Some(q) = self.state.lock().queues.get_mut(&src) {
            q.forward = dst;
        }
    }

    fn queue_destroy(&self, queue: NativeQueue) {
        let mut state = self.state.lock();
        let remove = match state.queues.get_mut(&queue) {
            Some(q) => {
                q.refs = q.refs.saturating_sub(1);
                q.refs == 0
            }
            None => false,
        };
        if remove {
            state.queues.remove(&queue);
            state.partitions.retain(|_, q| *q != queue);
            if state.log_queue == Some(queue) {
                state.log_queue = None;
            }
        }
    }

    fn queue_new(&self) -> Result<NativeQueue, ForeignError> {
        self.state.lock().alloc_queue(None).ok_or_else(null_queue)
    }

    fn queue_get_main(&self) -> Result<NativeQueue, ForeignError> {
        let mut state = self.state.lock();
        let queue = state.main_queue().ok_or_else(null_queue)?;
        if let Some(q) = state.queues.get_mut(&queue) {
            q.refs += 1;
        }
        Ok(queue)
    }

    fn set_log_queue(&self, queue: NativeQueue) {
        self.state.lock().log_queue = Some(queue);
    }

    fn queue_poll_log(&self, queue: NativeQueue) -> Option<LogEvent> {
        let mut state = self.state.lock();
        let q = state.queues.get_mut(&queue)?;
        let log = q.logs.pop_front();
        q.pending = q.logs.len();
        log
    }
}
