//! Element operator registry tests: root replacement, tree id pool
//! exhaustion and recycling, crash cleanup and pending-request failure.

use reach_config::Config;
use reachd::broker::Broker;
use reachd::testing::{settle, FakeElementOperator, TestPlatform};
use reach_protocol::{
    AbilityDescriptor, CapabilitySet, ElementInfo, ErrorKind, SearchMode, ROOT_ELEMENT_ID,
};
use std::sync::Arc;
use std::time::Instant;

const READER_URI: &str = "com.example.reader/ScreenReader";
const WINDOW: i32 = 7;

async fn broker_with_channel(
    platform: &TestPlatform,
) -> (Arc<Broker>, Arc<reachd::channel::Channel>) {
    platform.packages.set_installed(vec![AbilityDescriptor::new(
        "com.example.reader",
        "ScreenReader",
    )
    .with_capabilities(CapabilitySet::RETRIEVE)]);
    let broker = Broker::start(Config::testing(), platform.deps()).await;
    broker
        .enable_ability(READER_URI.to_string(), CapabilitySet::RETRIEVE)
        .await
        .unwrap();
    settle().await;
    let channel = platform.host.client_for(READER_URI).unwrap().channel().unwrap();
    (broker, channel)
}

#[tokio::test]
async fn test_root_replacement_switches_operator_and_watch() {
    let platform = TestPlatform::new();
    let (broker, channel) = broker_with_channel(&platform).await;

    let first = FakeElementOperator::new();
    first.set_elements(vec![ElementInfo { element_id: 1, text: "first".into(), ..Default::default() }]);
    broker.register_element_operator(WINDOW, 1, first.clone()).await.unwrap();

    let second = FakeElementOperator::new();
    second.set_elements(vec![ElementInfo { element_id: 2, text: "second".into(), ..Default::default() }]);
    broker.register_element_operator(WINDOW, 2, second.clone()).await.unwrap();

    // The window now resolves to the replacement.
    let elements = channel
        .search_by_element_id(WINDOW, ROOT_ELEMENT_ID, SearchMode::Node)
        .await
        .unwrap();
    assert_eq!(elements[0].text, "second");
    assert!(first.calls().is_empty());

    // The old operator's death watch is gone: its crash does not touch the
    // replacement's registration.
    broker.peer_died(first.peer_id());
    settle().await;
    let elements = channel
        .search_by_element_id(WINDOW, ROOT_ELEMENT_ID, SearchMode::Node)
        .await
        .unwrap();
    assert_eq!(elements[0].text, "second");
}

#[tokio::test]
async fn test_same_peer_re_registration_is_noop() {
    let platform = TestPlatform::new();
    let (broker, _channel) = broker_with_channel(&platform).await;

    let operator = FakeElementOperator::new();
    broker.register_element_operator(WINDOW, 1, operator.clone()).await.unwrap();
    broker.register_element_operator(WINDOW, 1, operator.clone()).await.unwrap();

    let session = broker.accounts().current().unwrap();
    assert_eq!(session.elements().window_ids(), vec![WINDOW]);
}

#[tokio::test]
async fn test_tree_id_pool_exhaustion_fails_with_failed() {
    let platform = TestPlatform::new();
    let (broker, _channel) = broker_with_channel(&platform).await;
    let capacity = broker.config().broker.tree_id_capacity;

    let root = FakeElementOperator::new();
    broker.register_element_operator(WINDOW, 1, root).await.unwrap();

    // Exhaust the pool with one child registration per mount point.
    for node in 0..capacity as i64 {
        let child = FakeElementOperator::new();
        broker
            .register_child_tree(WINDOW, 0, WINDOW, child, node, 1)
            .await
            .unwrap();
    }
    let overflow = FakeElementOperator::new();
    let err = broker
        .register_child_tree(WINDOW, 0, WINDOW, overflow, 9999, 1)
        .await
        .unwrap_err();
    assert_eq!(err, ErrorKind::Failed);

    let session = broker.accounts().current().unwrap();
    assert_eq!(session.elements().free_tree_ids(), 0);
}

#[tokio::test]
async fn test_deregistration_recycles_tree_ids() {
    let platform = TestPlatform::new();
    let (broker, _channel) = broker_with_channel(&platform).await;

    let root = FakeElementOperator::new();
    broker.register_element_operator(WINDOW, 1, root).await.unwrap();
    let child = FakeElementOperator::new();
    let tree_id = broker
        .register_child_tree(WINDOW, 0, WINDOW, child, 42, 1)
        .await
        .unwrap();

    let session = broker.accounts().current().unwrap();
    let free_before = session.elements().free_tree_ids();
    broker
        .deregister_element_operator(WINDOW, Some(tree_id))
        .await
        .unwrap();
    assert_eq!(session.elements().free_tree_ids(), free_before + 1);

    // Deregistering it again finds nothing; the root entry survives.
    assert_eq!(session.elements().window_ids(), vec![WINDOW]);
}

#[tokio::test]
async fn test_duplicate_child_registration_reports_register_exist() {
    let platform = TestPlatform::new();
    let (broker, _channel) = broker_with_channel(&platform).await;

    let root = FakeElementOperator::new();
    broker.register_element_operator(WINDOW, 1, root).await.unwrap();
    let first = FakeElementOperator::new();
    let tree_id = broker
        .register_child_tree(WINDOW, 0, WINDOW, first, 42, 1)
        .await
        .unwrap();

    let session = broker.accounts().current().unwrap();
    let free_before = session.elements().free_tree_ids();

    let duplicate = FakeElementOperator::new();
    let err = broker
        .register_child_tree(WINDOW, 0, WINDOW, duplicate, 42, 1)
        .await
        .unwrap_err();
    assert_eq!(err, ErrorKind::RegisterExist);

    // The existing registration is intact and the provisional id returned.
    assert_eq!(session.elements().free_tree_ids(), free_before);
    assert!(session.elements().window(WINDOW).unwrap().operator(tree_id).is_some());
}

#[tokio::test]
async fn test_child_registration_without_parent_window_fails() {
    let platform = TestPlatform::new();
    let (broker, _channel) = broker_with_channel(&platform).await;

    let session = broker.accounts().current().unwrap();
    let free_before = session.elements().free_tree_ids();
    let orphan = FakeElementOperator::new();
    let err = broker
        .register_child_tree(1234, 0, 1235, orphan, 1, 1)
        .await
        .unwrap_err();
    assert_eq!(err, ErrorKind::NoWindowConnection);
    // The provisionally allocated id went back to the pool.
    assert_eq!(session.elements().free_tree_ids(), free_before);
}

#[tokio::test]
async fn test_operator_crash_cleans_up_like_deregistration() {
    let platform = TestPlatform::new();
    let (broker, channel) = broker_with_channel(&platform).await;

    let root = FakeElementOperator::new();
    broker.register_element_operator(WINDOW, 1, root.clone()).await.unwrap();
    let child = FakeElementOperator::new();
    let tree_id = broker
        .register_child_tree(WINDOW, 0, WINDOW, child.clone(), 42, 1)
        .await
        .unwrap();

    let session = broker.accounts().current().unwrap();
    let free_before = session.elements().free_tree_ids();

    broker.peer_died(child.peer_id());
    settle().await;
    assert_eq!(session.elements().free_tree_ids(), free_before + 1);

    // Root crash removes the whole window.
    broker.peer_died(root.peer_id());
    settle().await;
    assert!(session.elements().window_ids().is_empty());
    assert_eq!(
        channel
            .search_by_element_id(WINDOW, ROOT_ELEMENT_ID, SearchMode::Node)
            .await
            .unwrap_err(),
        ErrorKind::NoWindowConnection
    );

    // The explicit path racing after the crash is a silent no-op result.
    assert_eq!(
        broker.deregister_element_operator(WINDOW, Some(tree_id)).await.unwrap_err(),
        ErrorKind::NoWindowConnection
    );
}

#[tokio::test]
async fn test_deregistration_fails_pending_requests_immediately() {
    let platform = TestPlatform::new();
    let (broker, channel) = broker_with_channel(&platform).await;

    let operator = FakeElementOperator::silent();
    broker.register_element_operator(WINDOW, 1, operator).await.unwrap();

    let pending_channel = channel.clone();
    let start = Instant::now();
    let pending = tokio::spawn(async move {
        pending_channel
            .search_by_element_id(WINDOW, ROOT_ELEMENT_ID, SearchMode::Node)
            .await
    });
    settle().await;

    broker.deregister_element_operator(WINDOW, None).await.unwrap();
    let result = pending.await.unwrap();

    // The caller was answered well before its timeout would have expired.
    assert_eq!(result.unwrap_err(), ErrorKind::NoWindowConnection);
    assert!(start.elapsed().as_millis() < broker.config().broker.channel_timeout_ms as u128);
}

#[tokio::test]
async fn test_token_bookkeeping_per_tree() {
    let platform = TestPlatform::new();
    let (broker, _channel) = broker_with_channel(&platform).await;

    let root = FakeElementOperator::new();
    broker.register_element_operator(WINDOW, 11, root).await.unwrap();
    let child = FakeElementOperator::new();
    let tree_id = broker
        .register_child_tree(WINDOW, 0, WINDOW, child, 42, 22)
        .await
        .unwrap();

    let session = broker.accounts().current().unwrap();
    let elements = session.elements();
    let packed = reach_protocol::pack_element_id(tree_id, 5);
    assert!(elements.verify_token(22, WINDOW, packed).is_ok());
    assert_eq!(
        elements.verify_token(99, WINDOW, packed).unwrap_err(),
        ErrorKind::TokenMismatch
    );
    // Sentinel ids skip verification.
    assert!(elements.verify_token(99, WINDOW, ROOT_ELEMENT_ID).is_ok());
}

#[tokio::test]
async fn test_focus_and_touch_passthroughs_reach_the_root_operator() {
    let platform = TestPlatform::new();
    let (broker, _channel) = broker_with_channel(&platform).await;

    let operator = FakeElementOperator::new();
    broker.register_element_operator(WINDOW, 1, operator.clone()).await.unwrap();

    let session = broker.accounts().current().unwrap();
    session.elements().clear_focus(WINDOW).unwrap();
    session.elements().outside_touch(WINDOW);
    assert_eq!(operator.calls(), vec!["clear_focus", "outside_touch"]);

    assert_eq!(
        session.elements().clear_focus(1234).unwrap_err(),
        ErrorKind::NoWindowConnection
    );
}

#[tokio::test]
async fn test_dump_reports_sessions_connections_and_windows() {
    let platform = TestPlatform::new();
    let (broker, _channel) = broker_with_channel(&platform).await;
    let root = FakeElementOperator::new();
    broker.register_element_operator(WINDOW, 1, root).await.unwrap();

    let dump = broker.dump_text().await;
    assert!(dump.contains("account 100 (current)"));
    assert!(dump.contains(&format!("connected: {READER_URI}")));
    assert!(dump.contains("window 7"));
}
