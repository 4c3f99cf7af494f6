//! # librdkafka Callback Registration
//!
//! librdkafka reports deliveries through `dr_msg_cb`, handing back the
//! client opaque set on its configuration and the per-message opaque
//! (`_private`) given at produce time. [`configure_delivery_reports`] wires
//! both to a handle: call it on the `rd_kafka_conf_t` inside the
//! [`Handle::open`](crate::Handle::open) factory, with the token the factory
//! receives, before `rd_kafka_new`.
//!
//! ```rust,ignore
//! let handle = Handle::open(config, |token| unsafe {
//!     let conf = rd::rd_kafka_conf_new();
//!     configure_delivery_reports(conf, token);
//!     let rk = rd::rd_kafka_new(rd::rd_kafka_type_t::RD_KAFKA_PRODUCER, conf, errstr, len);
//!     LibRdKafka::from_raw(rk).map(|lib| Arc::new(lib) as Arc<dyn ForeignLibrary>).ok_or(..)
//! })?;
//! ```

use super::trampolines::{dispatch_delivery_report, RawDelivery};
use crate::foreign::NativeTopic;
use rdkafka_sys::bindings as rd;
use std::ffi::c_void;
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::error;

/// `dr_msg_cb` with librdkafka's exact signature
pub extern "C" fn delivery_report_callback(
    _rk: *mut rd::rd_kafka_t,
    rkmessage: *const rd::rd_kafka_message_t,
    opaque: *mut c_void,
) {
    if rkmessage.is_null() {
        return;
    }
    // SAFETY: librdkafka passes a message valid for the duration of the callback
    let message = unsafe { &*rkmessage };
    let delivery = RawDelivery {
        topic: NativeTopic::from_raw(message.rkt.cast()),
        partition: message.partition,
        offset: message.offset,
        error_code: message.err as i32,
    };
    let msg_token = message._private as usize;

    // Unwinding into librdkafka's frame is undefined behaviour
    let result = catch_unwind(AssertUnwindSafe(|| {
        dispatch_delivery_report(opaque as usize, msg_token, delivery)
    }));
    if result.is_err() {
        error!("Panic in librdkafka delivery report callback");
    }
}

/// Set the handle token as the client opaque and register
/// [`delivery_report_callback`].
///
/// # Safety
/// `conf` must be a valid configuration object not yet passed to `rd_kafka_new`.
pub unsafe fn configure_delivery_reports(conf: *mut rd::rd_kafka_conf_t, handle_token: usize) {
    rd::rd_kafka_conf_set_opaque(conf, handle_token as *mut c_void);
    rd::rd_kafka_conf_set_dr_msg_cb(
        conf,
        Some(delivery_report_callback as unsafe extern "C" fn(_, _, _)),
    );
}
