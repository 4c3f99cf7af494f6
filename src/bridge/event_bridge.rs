//! # Event Bridge
//!
//! Wraps the foreign library's IO-event facility so async code is woken when
//! a foreign queue has events, without polling. A pipe is created and the
//! library is asked to write one byte to it whenever the queue goes from zero
//! to one pending event (edge triggered). A dedicated reader thread blocks on
//! the pipe and republishes each byte into a channel of capacity one, so any
//! burst of signals collapses into a single pending wakeup.
//!
//! ```text
//!  foreign thread ──write(1 byte)──▶ pipe ──read──▶ reader thread
//!                                                     │ try_send (drop if full)
//!                                                     ▼
//!                                   consumer ◀── mpsc(1) ◀──┘
//! ```
//!
//! A wakeup only means "at least one event arrived since the queue was last
//! drained"; consumers must serve everything available after each one.

use crate::config::BridgeConfig;
use crate::error::{BridgeError, BridgeResult};
use crate::foreign::{ForeignLibrary, NativeQueue, DISABLE_FD};
use futures::Stream;
use std::fs::File;
use std::io::{self, Read};
use std::os::fd::{AsRawFd, FromRawFd, IntoRawFd, OwnedFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::mpsc::{self, error::TryRecvError, error::TrySendError};
use tracing::{debug, warn};

/// Outcome of waiting on a bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// At least one event is available on the foreign queue
    Ready,
    /// The bridge was stopped; no further wakeups will arrive
    Closed,
}

/// Resources released exactly once by [`EventBridge::stop`]
struct Teardown {
    writer: File,
    reader_thread: JoinHandle<io::Result<()>>,
}

pub struct EventBridge {
    foreign: Arc<dyn ForeignLibrary>,
    queue: NativeQueue,
    reader_fd: RawFd,
    writer_fd: RawFd,
    notify_rx: tokio::sync::Mutex<mpsc::Receiver<()>>,
    stopped: AtomicBool,
    teardown: parking_lot::Mutex<Option<Teardown>>,
}

impl std::fmt::Debug for EventBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBridge")
            .field("queue", &self.queue)
            .field("reader_fd", &self.reader_fd)
            .field("writer_fd", &self.writer_fd)
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

impl EventBridge {
    /// Start bridging `queue` with default settings
    pub fn start(foreign: Arc<dyn ForeignLibrary>, queue: NativeQueue) -> BridgeResult<Self> {
        Self::start_with_config(foreign, queue, &BridgeConfig::default())
    }

    /// Hook up IO-based event triggering on `queue` and spawn the reader
    /// thread. If the pipe cannot be created nothing is enabled or spawned.
    pub fn start_with_config(
        foreign: Arc<dyn ForeignLibrary>,
        queue: NativeQueue,
        config: &BridgeConfig,
    ) -> BridgeResult<Self> {
        let (reader, writer) = create_pipe().map_err(BridgeError::pipe)?;
        let reader_fd = reader.as_raw_fd();
        let writer_fd = writer.as_raw_fd();

        // Buffered so that when nobody is waiting, the reader thread never
        // blocks and the foreign thread on the far side of the pipe never stalls.
        let (notify_tx, notify_rx) = mpsc::channel(1);

        foreign.queue_io_event_enable(queue, writer_fd, &[config.edge_payload]);

        let reader_thread = std::thread::Builder::new()
            .name(format!("{}-{}", config.reader_thread_prefix, reader_fd))
            .spawn(move || run_reader(reader, notify_tx));

        let reader_thread = match reader_thread {
            Ok(handle) => handle,
            Err(source) => {
                foreign.queue_io_event_enable(queue, DISABLE_FD, &[]);
                // The reader end was moved into the failed closure and dropped with it
                drop(writer);
                return Err(BridgeError::ReaderSpawn { source });
            }
        };

        debug!(
            queue = ?queue,
            reader_fd = reader_fd,
            writer_fd = writer_fd,
            "IO event bridge started"
        );

        Ok(Self {
            foreign,
            queue,
            reader_fd,
            writer_fd,
            notify_rx: tokio::sync::Mutex::new(notify_rx),
            stopped: AtomicBool::new(false),
            teardown: parking_lot::Mutex::new(Some(Teardown {
                writer,
                reader_thread,
            })),
        })
    }

    /// The foreign queue this bridge watches
    pub fn queue(&self) -> NativeQueue {
        self.queue
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Suspend until the queue signals readiness or the bridge is stopped
    pub async fn wait(&self) -> Readiness {
        if self.is_stopped() {
            return Readiness::Closed;
        }
        let mut rx = self.notify_rx.lock().await;
        match rx.recv().await {
            Some(()) if !self.is_stopped() => Readiness::Ready,
            _ => Readiness::Closed,
        }
    }

    /// Blocking form of [`wait`](Self::wait) for plain threads.
    ///
    /// Must not be called from within an async runtime.
    pub fn wait_blocking(&self) -> Readiness {
        if self.is_stopped() {
            return Readiness::Closed;
        }
        let mut rx = self.notify_rx.blocking_lock();
        match rx.blocking_recv() {
            Some(()) if !self.is_stopped() => Readiness::Ready,
            _ => Readiness::Closed,
        }
    }

    /// Take a pending wakeup without suspending. `None` when nothing is
    /// pending or another waiter currently holds the receiver.
    pub fn try_wait(&self) -> Option<Readiness> {
        if self.is_stopped() {
            return Some(Readiness::Closed);
        }
        let mut rx = self.notify_rx.try_lock().ok()?;
        match rx.try_recv() {
            Ok(()) => Some(Readiness::Ready),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Readiness::Closed),
        }
    }

    /// Wakeups as a stream that ends once the bridge is stopped
    pub fn notifications(self: &Arc<Self>) -> impl Stream<Item = ()> {
        futures::stream::unfold(Arc::clone(self), |bridge| async move {
            match bridge.wait().await {
                Readiness::Ready => Some(((), bridge)),
                Readiness::Closed => None,
            }
        })
    }

    /// Disable IO triggering, close the pipe and join the reader thread.
    ///
    /// Idempotent: only the first call tears anything down. A concurrent
    /// call blocks until that teardown has finished, so every return means
    /// the reader thread is gone. Close failures are returned, but the
    /// reader thread is always joined first.
    pub fn stop(&self) -> BridgeResult<()> {
        // Held until the join completes; the reader never takes this lock
        let mut teardown = self.teardown.lock();
        let Some(Teardown {
            writer,
            reader_thread,
        }) = teardown.take()
        else {
            return Ok(());
        };
        self.stopped.store(true, Ordering::Release);

        self.foreign
            .queue_io_event_enable(self.queue, DISABLE_FD, &[]);

        // Closing the only write end makes the reader's next read hit EOF
        let writer_result = close_fd(writer.into());

        let reader_result = match reader_thread.join() {
            Ok(result) => result.map_err(|e| BridgeError::pipe_close("reader", e)),
            Err(_) => Err(BridgeError::ReaderJoin { fd: self.reader_fd }),
        };

        drop(teardown);

        debug!(
            queue = ?self.queue,
            reader_fd = self.reader_fd,
            "IO event bridge stopped"
        );

        writer_result.map_err(|e| BridgeError::pipe_close("writer", e))?;
        reader_result
    }
}

impl Drop for EventBridge {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!(queue = ?self.queue, error = %e, "IO event bridge teardown failed on drop");
        }
    }
}

/// Reader thread body: republish each pipe byte as a coalesced wakeup.
/// Returns when the write end is closed, then closes the read end.
fn run_reader(mut reader: File, notify_tx: mpsc::Sender<()>) -> io::Result<()> {
    let fd = reader.as_raw_fd();
    let mut one_byte = [0u8; 1];
    loop {
        match reader.read(&mut one_byte) {
            Ok(0) => break,
            Ok(_) => match notify_tx.try_send(()) {
                // Full means a wakeup is already pending; the consumer will
                // see it the next time it looks at the channel.
                Ok(()) | Err(TrySendError::Full(())) => {}
                Err(TrySendError::Closed(())) => break,
            },
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            // Expected during teardown, not a fault
            Err(_) => break,
        }
    }
    debug!(reader_fd = fd, "IO reader thread exiting");
    close_fd(reader.into())
}

fn create_pipe() -> io::Result<(File, File)> {
    let mut fds: [libc::c_int; 2] = [-1, -1];
    // SAFETY: fds points at two writable c_ints
    if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: pipe() succeeded, both fds are fresh and owned by us
    let (reader, writer) = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };
    for fd in [&reader, &writer] {
        // SAFETY: fd is a valid open descriptor
        if unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_SETFD, libc::FD_CLOEXEC) } != 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok((File::from(reader), File::from(writer)))
}

/// Close an fd reporting the error, which `OwnedFd`'s drop would swallow
fn close_fd(fd: OwnedFd) -> io::Result<()> {
    let raw = fd.into_raw_fd();
    // SAFETY: raw came from an OwnedFd that we just consumed
    if unsafe { libc::close(raw) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foreign::mock::MockLibrary;
    use std::time::Duration;

    fn setup() -> (Arc<MockLibrary>, NativeQueue) {
        let lib = Arc::new(MockLibrary::new("mock#bridge"));
        let queue = lib.queue_new().unwrap();
        (lib, queue)
    }

    #[tokio::test]
    async fn test_signal_wakes_waiter() {
        let (lib, queue) = setup();
        let bridge = EventBridge::start(lib.clone(), queue).unwrap();
        assert!(lib.io_enabled(queue));

        lib.produce(queue, 1);
        let readiness = tokio::time::timeout(Duration::from_secs(5), bridge.wait())
            .await
            .expect("wakeup should arrive");
        assert_eq!(readiness, Readiness::Ready);

        bridge.stop().unwrap();
        assert!(!lib.io_enabled(queue));
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let (lib, queue) = setup();
        let bridge = EventBridge::start(lib, queue).unwrap();
        bridge.stop().unwrap();
        bridge.stop().unwrap();
        assert!(bridge.is_stopped());
        assert_eq!(bridge.wait().await, Readiness::Closed);
    }

    #[tokio::test]
    async fn test_try_wait_without_signal() {
        let (lib, queue) = setup();
        let bridge = EventBridge::start(lib, queue).unwrap();
        assert_eq!(bridge.try_wait(), None);
        bridge.stop().unwrap();
        assert_eq!(bridge.try_wait(), Some(Readiness::Closed));
    }

    #[test]
    fn test_drop_stops_bridge() {
        let (lib, queue) = setup();
        {
            let _bridge = EventBridge::start(lib.clone(), queue).unwrap();
            assert!(lib.io_enabled(queue));
        }
        assert!(!lib.io_enabled(queue));
    }

    #[test]
    fn test_wait_pending_until_stopped() {
        use tokio_test::{assert_pending, assert_ready_eq, task};

        let (lib, queue) = setup();
        let bridge = EventBridge::start(lib, queue).unwrap();

        let mut wait = task::spawn(bridge.wait());
        assert_pending!(wait.poll());

        // stop() joins the reader, whose exit closes the channel
        bridge.stop().unwrap();
        assert_ready_eq!(wait.poll(), Readiness::Closed);
    }

    #[test]
    fn test_concurrent_stop_returns_after_reader_exit() {
        let (lib, queue) = setup();
        let bridge = EventBridge::start(lib, queue).unwrap();

        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    bridge.stop().unwrap();
                    // The reader owns the only sender; it is gone once joined
                    let mut rx = bridge.notify_rx.blocking_lock();
                    assert!(matches!(rx.try_recv(), Err(TryRecvError::Disconnected)));
                });
            }
        });
        assert!(bridge.is_stopped());
    }
}
