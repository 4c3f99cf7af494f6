//! Handle Lifecycle Tests
//!
//! Full open -> use -> close cycles against the mock client, checking that
//! every native object the handle acquired is released on close.

mod common;

use common::{expect_ready, open_handle, settle, PROMPT};
use kafka_bridge::foreign::ForeignLibrary;
use kafka_bridge::{BridgeError, Handle, HandleState, Readiness};
use std::sync::Arc;

#[tokio::test]
async fn test_partition_attach_lookup_detach_all() {
    let (lib, handle) = open_handle("mock#consumer-attach");

    let bridge = handle.attach_partition("orders", 3).unwrap();
    let queue = bridge.queue();
    assert!(Arc::ptr_eq(
        &bridge,
        &handle.partition_bridge("orders", 3).unwrap()
    ));
    assert_eq!(lib.forward_target(queue), Some(None), "forwarding should be disabled");
    assert!(lib.io_enabled(queue));

    lib.produce_partition("orders", 3, 2);
    expect_ready(&bridge).await;
    assert_eq!(lib.pending(queue), 2);
    let main = lib.main_queue().unwrap();
    assert_eq!(lib.pending(main), 0, "partition events must not reach the main queue");

    assert_eq!(handle.detach_all_partitions().unwrap(), 1);
    assert!(handle.partition_bridge("orders", 3).is_none());
    assert!(bridge.is_stopped());
    assert_eq!(bridge.wait().await, Readiness::Closed);
    assert!(!lib.io_enabled(queue));
    assert_eq!(lib.live_queue_refs(), 0);

    handle.close().unwrap();
}

#[tokio::test]
async fn test_partial_revoke_leaves_other_partitions_attached() {
    let (lib, handle) = open_handle("mock#consumer-revoke");

    for partition in 0..4 {
        handle.attach_partition("orders", partition).unwrap();
    }
    assert!(handle.detach_partition("orders", 1).unwrap());
    assert!(!handle.detach_partition("orders", 1).unwrap());

    assert!(handle.partition_bridge("orders", 1).is_none());
    let survivor = handle.partition_bridge("orders", 2).unwrap();
    lib.produce_partition("orders", 2, 1);
    expect_ready(&survivor).await;

    handle.close().unwrap();
    assert!(survivor.is_stopped());
    assert_eq!(lib.live_queue_refs(), 0);
}

#[tokio::test]
async fn test_unknown_partition_is_reported() {
    let (lib, handle) = open_handle("mock#consumer-hidden");
    lib.hide_partition("orders", 7);

    let err = handle.attach_partition("orders", 7).unwrap_err();
    assert!(matches!(
        err,
        BridgeError::PartitionQueueUnavailable { ref topic, partition: 7 } if topic == "orders"
    ));
    assert!(handle.partition_bridge("orders", 7).is_none());
}

#[tokio::test]
async fn test_concurrent_topic_creation_yields_one_object() {
    let (lib, handle) = open_handle("mock#producer-race");
    let handle = Arc::new(handle);

    let tasks: Vec<_> = (0..16)
        .map(|_| {
            let handle = Arc::clone(&handle);
            tokio::task::spawn_blocking(move || handle.topic("payments").unwrap())
        })
        .collect();

    let mut objects = Vec::new();
    for task in tasks {
        objects.push(task.await.unwrap());
    }
    assert!(objects.windows(2).all(|pair| pair[0] == pair[1]));
    assert_eq!(lib.topics_created(), 1);
    assert_eq!(handle.topic_name(objects[0]).unwrap(), "payments");
}

#[tokio::test]
async fn test_topic_creation_failure_is_not_cached() {
    let (lib, handle) = open_handle("mock#producer-fail");
    lib.fail_topic_creation(true);

    let err = handle.topic("payments").unwrap_err();
    assert!(matches!(err, BridgeError::TopicCreation { ref topic, .. } if topic == "payments"));

    lib.fail_topic_creation(false);
    assert!(handle.topic("payments").is_ok());
    assert_eq!(lib.topics_created(), 1);
}

#[tokio::test]
async fn test_main_queue_events() {
    let (lib, handle) = open_handle("mock#consumer-main");
    let bridge = handle.enable_main_queue_events().unwrap();
    let main = lib.main_queue().unwrap();
    assert_eq!(bridge.queue(), main);

    // Unattached partitions still forward into the main queue
    lib.produce_partition("orders", 0, 1);
    expect_ready(&bridge).await;
    assert_eq!(lib.drain(main), 1);

    handle.close().unwrap();
    assert!(bridge.is_stopped());
    assert_eq!(lib.live_queue_refs(), 0);
}

#[tokio::test]
async fn test_bridge_queue_stopped_at_close() {
    let (lib, handle) = open_handle("mock#consumer-external");
    let queue = lib.queue_new().unwrap();
    let bridge = handle.bridge_queue(queue).unwrap();

    lib.produce(queue, 1);
    expect_ready(&bridge).await;

    handle.close().unwrap();
    assert!(bridge.is_stopped());
    assert!(!lib.io_enabled(queue));

    // The queue belongs to the caller, not the handle
    assert_eq!(lib.live_queue_refs(), 1);
    lib.queue_destroy(queue);
    assert_eq!(lib.live_queue_refs(), 0);
}

#[tokio::test]
async fn test_forwarded_logs_reach_channel() {
    let (lib, handle) = open_handle("mock#consumer-logs");
    let mut logs = handle.forward_logs().unwrap();

    lib.emit_log("BROKER", 6, "localhost:9092/bootstrap: Connected");
    lib.emit_log("CGRPOP", 7, "Group \"payments\" received op GET_ASSIGNMENT");

    let first = tokio::time::timeout(PROMPT, logs.recv())
        .await
        .expect("log should be forwarded")
        .unwrap();
    assert_eq!(first.tag, "BROKER");
    assert_eq!(first.name, "mock#consumer-logs");

    let second = tokio::time::timeout(PROMPT, logs.recv())
        .await
        .expect("log should be forwarded")
        .unwrap();
    assert_eq!(second.tag, "CGRPOP");
    assert_eq!(second.level, 7);

    handle.close().unwrap();
    // Forwarder gone, channel closes
    let end = tokio::time::timeout(PROMPT, logs.recv()).await.unwrap();
    assert!(end.is_none());
    assert_eq!(lib.live_queue_refs(), 0);
}

#[tokio::test]
async fn test_close_releases_everything() {
    let (lib, handle) = open_handle("mock#consumer-full");
    let token = handle.token();

    let main_bridge = handle.enable_main_queue_events().unwrap();
    let _logs = handle.forward_logs().unwrap();
    let partitions: Vec<_> = (0..3)
        .map(|p| handle.attach_partition("orders", p).unwrap())
        .collect();
    handle.topic("orders").unwrap();
    handle.topic("payments").unwrap();
    assert_eq!(lib.live_topics(), 2);

    lib.produce_partition("orders", 1, 4);
    expect_ready(&partitions[1]).await;

    handle.close().unwrap();

    assert_eq!(handle.state(), HandleState::Closed);
    assert!(Handle::lookup(token).is_none());
    assert!(main_bridge.is_stopped());
    assert!(partitions.iter().all(|bridge| bridge.is_stopped()));
    assert_eq!(lib.live_topics(), 0);
    assert_eq!(lib.live_queue_refs(), 0);

    // Everything past close is refused
    assert!(handle.topic("orders").unwrap_err().is_closed());
    assert!(handle.enable_main_queue_events().unwrap_err().is_closed());
    assert!(handle.forward_logs().unwrap_err().is_closed());
    assert!(handle.detach_all_partitions().unwrap_err().is_closed());
}

#[tokio::test]
async fn test_drop_closes_handle() {
    let (lib, handle) = open_handle("mock#consumer-drop");
    let token = handle.token();
    let bridge = handle.attach_partition("orders", 0).unwrap();
    handle.topic("orders").unwrap();

    drop(handle);
    settle().await;

    assert!(Handle::lookup(token).is_none());
    assert!(bridge.is_stopped());
    assert_eq!(lib.live_topics(), 0);
    assert_eq!(lib.live_queue_refs(), 0);
}

#[tokio::test]
async fn test_handles_do_not_share_state() {
    let (lib_a, a) = open_handle("mock#consumer-a");
    let (lib_b, b) = open_handle("mock#consumer-b");
    assert_ne!(a.token(), b.token());

    a.attach_partition("orders", 0).unwrap();
    assert!(b.partition_bridge("orders", 0).is_none());

    a.close().unwrap();
    assert_eq!(b.state(), HandleState::Ready);
    assert_eq!(Handle::lookup(b.token()).unwrap().name(), "mock#consumer-b");

    b.close().unwrap();
    assert_eq!(lib_a.live_queue_refs(), 0);
    assert_eq!(lib_b.live_queue_refs(), 0);
}
