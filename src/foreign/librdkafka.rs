//! [`ForeignLibrary`] backed by librdkafka through `rdkafka-sys`.

use super::{ForeignError, ForeignLibrary, LogEvent, NativeQueue, NativeTopic};
use rdkafka_sys::bindings as rd;
use std::ffi::{c_char, c_int, c_void, CStr, CString};
use std::os::fd::RawFd;
use std::ptr;

/// Owns an `rd_kafka_t`; the client is destroyed when this is dropped
pub struct LibRdKafka {
    rk: *mut rd::rd_kafka_t,
}

// librdkafka handles are thread-safe
unsafe impl Send for LibRdKafka {}
unsafe impl Sync for LibRdKafka {}

impl LibRdKafka {
    /// Take ownership of a client created with `rd_kafka_new`.
    ///
    /// # Safety
    /// `rk` must be a valid client handle not owned by anything else.
    pub unsafe fn from_raw(rk: *mut rd::rd_kafka_t) -> Option<Self> {
        (!rk.is_null()).then_some(Self { rk })
    }

    pub fn as_ptr(&self) -> *mut rd::rd_kafka_t {
        self.rk
    }
}

impl Drop for LibRdKafka {
    fn drop(&mut self) {
        // SAFETY: we own rk and nothing else references it past this point
        unsafe { rd::rd_kafka_destroy(self.rk) }
    }
}

fn cstr_to_string(ptr: *const c_char) -> String {
    if ptr.is_null() {
        return String::new();
    }
    // SAFETY: librdkafka returns NUL-terminated strings valid for this call
    unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned()
}

fn last_error() -> ForeignError {
    // SAFETY: plain thread-local error lookup
    let err = unsafe { rd::rd_kafka_last_error() };
    ForeignError {
        code: err as i32,
        message: cstr_to_string(unsafe { rd::rd_kafka_err2str(err) }),
    }
}

impl ForeignLibrary for LibRdKafka {
    fn name(&self) -> String {
        cstr_to_string(unsafe { rd::rd_kafka_name(self.rk) })
    }

    fn queue_io_event_enable(&self, queue: NativeQueue, fd: RawFd, payload: &[u8]) {
        let data = if payload.is_empty() {
            ptr::null()
        } else {
            payload.as_ptr().cast::<c_void>()
        };
        // SAFETY: librdkafka copies the payload before returning
        unsafe {
            rd::rd_kafka_queue_io_event_enable(queue.as_ptr().cast(), fd as c_int, data, payload.len())
        }
    }

    fn topic_new(&self, name: &str) -> Result<NativeTopic, ForeignError> {
        let cname = CString::new(name).map_err(|e| ForeignError {
            code: -1,
            message: e.to_string(),
        })?;
        // SAFETY: rk is valid, cname outlives the call, null conf means defaults
        let rkt = unsafe { rd::rd_kafka_topic_new(self.rk, cname.as_ptr(), ptr::null_mut()) };
        NativeTopic::from_raw(rkt.cast()).ok_or_else(last_error)
    }

    fn topic_destroy(&self, topic: NativeTopic) {
        unsafe { rd::rd_kafka_topic_destroy(topic.as_ptr().cast()) }
    }

    fn topic_name(&self, topic: NativeTopic) -> String {
        cstr_to_string(unsafe { rd::rd_kafka_topic_name(topic.as_ptr().cast()) })
    }

    fn queue_get_partition(&self, topic: &str, partition: i32) -> Option<NativeQueue> {
        let ctopic = CString::new(topic).ok()?;
        let rkq = unsafe { rd::rd_kafka_queue_get_partition(self.rk, ctopic.as_ptr(), partition) };
        NativeQueue::from_raw(rkq.cast())
    }

    fn queue_forward(&self, src: NativeQueue, dst: Option<NativeQueue>) {
        let dst = dst.map_or(ptr::null_mut(), |q| q.as_ptr().cast());
        unsafe { rd::rd_kafka_queue_forward(src.as_ptr().cast(), dst) }
    }

    fn queue_destroy(&self, queue: NativeQueue) {
        unsafe { rd::rd_kafka_queue_destroy(queue.as_ptr().cast()) }
    }

    fn queue_new(&self) -> Result<NativeQueue, ForeignError> {
        let rkq = unsafe { rd::rd_kafka_queue_new(self.rk) };
        NativeQueue::from_raw(rkq.cast()).ok_or_else(last_error)
    }

    fn queue_get_main(&self) -> Result<NativeQueue, ForeignError> {
        let rkq = unsafe { rd::rd_kafka_queue_get_main(self.rk) };
        NativeQueue::from_raw(rkq.cast()).ok_or_else(last_error)
    }

    fn set_log_queue(&self, queue: NativeQueue) {
        unsafe {
            rd::rd_kafka_set_log_queue(self.rk, queue.as_ptr().cast());
        }
    }

    fn queue_poll_log(&self, queue: NativeQueue) -> Option<LogEvent> {
        loop {
            // SAFETY: queue is a live queue owned by the caller; zero timeout
            let rkev = unsafe { rd::rd_kafka_queue_poll(queue.as_ptr().cast(), 0) };
            if rkev.is_null() {
                return None;
            }
            let is_log = unsafe { rd::rd_kafka_event_type(rkev) } == rd::RD_KAFKA_EVENT_LOG as _;
            let event = is_log.then(|| {
                let mut facility: *const c_char = ptr::null();
                let mut message: *const c_char = ptr::null();
                let mut level: c_int = 0;
                unsafe { rd::rd_kafka_event_log(rkev, &mut facility, &mut message, &mut level) };
                LogEvent {
                    name: self.name(),
                    tag: cstr_to_string(facility),
                    message: cstr_to_string(message),
                    level,
                }
            });
            unsafe { rd::rd_kafka_event_destroy(rkev) };
            if event.is_some() {
                return event;
            }
        }
    }
}
