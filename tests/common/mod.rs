#![allow(dead_code)]

pub mod strategies;

use kafka_bridge::foreign::{mock::MockLibrary, ForeignLibrary};
use kafka_bridge::{BridgeConfig, EventBridge, Handle, Readiness};
use std::sync::Arc;
use std::time::Duration;

/// Upper bound for anything that should happen "promptly"
pub const PROMPT: Duration = Duration::from_secs(5);

/// Open a READY handle over a fresh mock client
pub fn open_handle(name: &str) -> (Arc<MockLibrary>, Handle) {
    let mut lib = None;
    let handle = Handle::open(BridgeConfig::default(), |token| {
        let mock = Arc::new(MockLibrary::with_opaque(name, token));
        lib = Some(Arc::clone(&mock));
        Ok(mock as Arc<dyn ForeignLibrary>)
    })
    .expect("mock handle should open");
    (lib.expect("constructor ran"), handle)
}

/// Wait for one wakeup, failing the test if none arrives promptly
pub async fn expect_ready(bridge: &EventBridge) {
    let readiness = tokio::time::timeout(PROMPT, bridge.wait())
        .await
        .expect("wakeup should arrive promptly");
    assert_eq!(readiness, Readiness::Ready);
}

/// Give the reader threads time to consume whatever is in their pipes
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(250)).await;
}
