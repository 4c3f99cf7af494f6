//! Forwards log events from the client's dedicated log queue into a channel.

use crate::bridge::{EventBridge, Readiness};
use crate::config::BridgeConfig;
use crate::error::{BridgeError, BridgeResult};
use crate::foreign::{ForeignLibrary, LogEvent, NativeQueue};
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

pub(crate) struct LogForwarder {
    foreign: Arc<dyn ForeignLibrary>,
    queue: NativeQueue,
    bridge: Arc<EventBridge>,
    thread: Option<JoinHandle<u64>>,
}

impl LogForwarder {
    /// Route library logs to a fresh queue and start forwarding them
    pub(crate) fn start(
        foreign: Arc<dyn ForeignLibrary>,
        config: &BridgeConfig,
    ) -> BridgeResult<(Self, mpsc::Receiver<LogEvent>)> {
        let queue = foreign
            .queue_new()
            .map_err(|e| BridgeError::foreign("queue_new", e.message))?;
        foreign.set_log_queue(queue);

        let bridge = match EventBridge::start_with_config(Arc::clone(&foreign), queue, config) {
            Ok(bridge) => Arc::new(bridge),
            Err(e) => {
                foreign.queue_destroy(queue);
                return Err(e);
            }
        };

        let (tx, rx) = mpsc::channel(config.log_channel_capacity);
        let thread = {
            let foreign = Arc::clone(&foreign);
            let bridge = Arc::clone(&bridge);
            std::thread::Builder::new()
                .name(format!("{}-logs", config.reader_thread_prefix))
                .spawn(move || forward_logs(foreign.as_ref(), queue, &bridge, &tx))
        };

        let thread = match thread {
            Ok(thread) => thread,
            Err(source) => {
                if let Err(e) = bridge.stop() {
                    warn!(error = %e, "Log bridge stop failed");
                }
                foreign.queue_destroy(queue);
                return Err(BridgeError::ReaderSpawn { source });
            }
        };

        Ok((
            Self {
                foreign,
                queue,
                bridge,
                thread: Some(thread),
            },
            rx,
        ))
    }

    /// Stop the bridge, wait for the forwarder to exit, then release the queue
    pub(crate) fn stop(&mut self) -> BridgeResult<()> {
        let stopped = self.bridge.stop();
        if let Some(thread) = self.thread.take() {
            match thread.join() {
                Ok(forwarded) => debug!(forwarded = forwarded, "Log forwarder exited"),
                Err(_) => warn!("Log forwarder thread panicked"),
            }
            self.foreign.queue_destroy(self.queue);
        }
        stopped
    }
}

/// Drain everything available after each wakeup; a wakeup says nothing about
/// how many events are queued. Draining once up front covers logs queued
/// before notification was enabled, which never produce an edge.
fn forward_logs(
    foreign: &dyn ForeignLibrary,
    queue: NativeQueue,
    bridge: &EventBridge,
    tx: &mpsc::Sender<LogEvent>,
) -> u64 {
    let mut forwarded = 0u64;
    loop {
        while let Some(event) = foreign.queue_poll_log(queue) {
            match tx.try_send(event) {
                Ok(()) => forwarded += 1,
                Err(TrySendError::Full(event)) => {
                    warn!(tag = %event.tag, "Log channel full, dropping log event");
                }
                // Nobody listens anymore; keep draining so the queue stays empty
                Err(TrySendError::Closed(_)) => {}
            }
        }
        if bridge.wait_blocking() == Readiness::Closed {
            return forwarded;
        }
    }
}
