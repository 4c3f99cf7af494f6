//! # Callback Trampolines
//!
//! Plain `extern "C"` functions registered with the native client. They get
//! no per-instance state, only the scalars the client hands back: the
//! client's opaque pointer (resolved through the global handle registry) and
//! the per-message opaque (resolved through that handle's opaque registry).
//!
//! Unknown tokens are a caller contract violation; they are logged and
//! ignored rather than reported back across the boundary.

use crate::foreign::NativeTopic;
use crate::handle::{DeliveryReport, Handle};
use crate::registry::OpaqueToken;
use std::ffi::c_void;
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::{debug, error};

/// Delivery outcome as reported by the native client
#[derive(Debug, Clone, Copy)]
pub struct RawDelivery {
    pub topic: Option<NativeTopic>,
    pub partition: i32,
    pub offset: i64,
    pub error_code: i32,
}

/// Route a delivery report to the context registered for `msg_token`.
///
/// Returns true when the report reached a live context.
pub fn dispatch_delivery_report(handle_token: usize, msg_token: OpaqueToken, delivery: RawDelivery) -> bool {
    let Some(handle) = Handle::lookup(handle_token) else {
        debug!(handle_token = handle_token, "Delivery report for unknown handle");
        return false;
    };

    let Some(context) = handle.take_context(msg_token) else {
        debug!(
            handle = %handle.name(),
            msg_token = msg_token,
            "Delivery report without registered context"
        );
        return false;
    };

    let topic = match delivery.topic.map(|topic| handle.topic_name(topic)) {
        Some(Ok(name)) => name,
        Some(Err(e)) => {
            debug!(handle = %handle.name(), error = %e, "Delivery report topic unresolved");
            String::new()
        }
        None => String::new(),
    };

    let report = DeliveryReport {
        topic,
        partition: delivery.partition,
        offset: delivery.offset,
        error_code: delivery.error_code,
        opaque: context.opaque,
    };

    // A dropped receiver means the application stopped listening
    context.reports.send(report).is_ok()
}

/// Delivery report entry point for C hosts that unpack the message
/// themselves and pass its fields as scalars. librdkafka's own `dr_msg_cb`
/// is `ffi::rdkafka::delivery_report_callback` (feature `librdkafka`).
///
/// `rk_opaque` is the handle's pointer token and `msg_opaque` the token from
/// [`Handle::put_context`]; neither is dereferenced.
pub extern "C" fn delivery_report_trampoline(
    rk_opaque: *mut c_void,
    msg_opaque: *mut c_void,
    rkt: *mut c_void,
    partition: i32,
    offset: i64,
    error_code: i32,
) {
    let delivery = RawDelivery {
        topic: NativeTopic::from_raw(rkt),
        partition,
        offset,
        error_code,
    };
    // Unwinding across the foreign frame is undefined behaviour
    let result = catch_unwind(AssertUnwindSafe(|| {
        dispatch_delivery_report(rk_opaque as usize, msg_opaque as usize, delivery)
    }));
    if result.is_err() {
        error!("Panic in delivery report trampoline");
    }
}
