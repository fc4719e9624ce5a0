//! Channel dispatch tests: capability gating, bounded waits, operator
//! routing across trees, global actions and event delivery.

use reach_config::Config;
use reachd::broker::Broker;
use reachd::channel::Channel;
use reachd::testing::{
    settle, FakeElementOperator, TestPlatform,
};
use reach_protocol::{
    pack_element_id, AbilityDescriptor, AccessibilityEvent, ActionType, CapabilitySet, ErrorKind,
    EventTypeSet, FocusDirection, FocusKind, GesturePath, GesturePoint, GlobalAction, SearchMode,
    WindowInfo, ROOT_ELEMENT_ID,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

const READER_URI: &str = "com.example.reader/ScreenReader";
const WINDOW: i32 = 7;

/// Boots a broker with the reader connected (retrieve only unless told
/// otherwise) and a responding root operator on window 7.
async fn connected_channel(
    platform: &TestPlatform,
    requested: CapabilitySet,
) -> (Arc<Broker>, Arc<Channel>, Arc<FakeElementOperator>) {
    platform.packages.set_installed(vec![AbilityDescriptor::new(
        "com.example.reader",
        "ScreenReader",
    )
    .with_capabilities(CapabilitySet::RETRIEVE | CapabilitySet::GESTURE)]);
    let broker = Broker::start(Config::testing(), platform.deps()).await;
    broker.enable_ability(READER_URI.to_string(), requested).await.unwrap();
    settle().await;

    let operator = FakeElementOperator::new();
    broker
        .register_element_operator(WINDOW, 11, operator.clone())
        .await
        .unwrap();

    let channel = platform.host.client_for(READER_URI).unwrap().channel().unwrap();
    (broker, channel, operator)
}

#[tokio::test]
async fn test_search_by_element_id_round_trips() {
    let platform = TestPlatform::new();
    let (_broker, channel, operator) =
        connected_channel(&platform, CapabilitySet::RETRIEVE).await;

    let elements = channel
        .search_by_element_id(WINDOW, ROOT_ELEMENT_ID, SearchMode::Subtree)
        .await
        .unwrap();
    assert_eq!(elements.len(), 1);
    assert_eq!(operator.calls().len(), 1);
}

#[tokio::test]
async fn test_gesture_without_grant_is_no_capability() {
    let platform = TestPlatform::new();
    // Static set declares gesture, but the connection only requested (and
    // was granted) retrieve.
    let (_broker, channel, _operator) =
        connected_channel(&platform, CapabilitySet::RETRIEVE).await;

    let path = GesturePath {
        points: vec![GesturePoint { x: 0.0, y: 0.0 }, GesturePoint { x: 10.0, y: 10.0 }],
        duration_ms: 50,
    };
    let err = channel.send_gesture(path).await.unwrap_err();
    assert_eq!(err, ErrorKind::NoCapability);
    assert!(platform.input.gestures().is_empty());
}

#[tokio::test]
async fn test_granted_gesture_reaches_input_dispatcher() {
    let platform = TestPlatform::new();
    let (_broker, channel, _operator) =
        connected_channel(&platform, CapabilitySet::RETRIEVE | CapabilitySet::GESTURE).await;

    let path = GesturePath {
        points: vec![GesturePoint { x: 0.0, y: 0.0 }, GesturePoint { x: 10.0, y: 10.0 }],
        duration_ms: 50,
    };
    channel.send_gesture(path).await.unwrap();
    assert_eq!(platform.input.gestures().len(), 1);

    // A one-point path never reaches the dispatcher.
    let invalid = GesturePath { points: vec![GesturePoint { x: 1.0, y: 1.0 }], duration_ms: 50 };
    assert_eq!(channel.send_gesture(invalid).await.unwrap_err(), ErrorKind::InvalidParam);
    assert_eq!(platform.input.gestures().len(), 1);
}

#[tokio::test]
async fn test_unregistered_window_is_no_window_connection() {
    let platform = TestPlatform::new();
    let (_broker, channel, _operator) =
        connected_channel(&platform, CapabilitySet::RETRIEVE).await;

    let err = channel
        .search_by_element_id(99, ROOT_ELEMENT_ID, SearchMode::Node)
        .await
        .unwrap_err();
    assert_eq!(err, ErrorKind::NoWindowConnection);
}

#[tokio::test]
async fn test_silent_operator_times_out_near_the_bound() {
    let platform = TestPlatform::new();
    let (broker, channel, operator) =
        connected_channel(&platform, CapabilitySet::RETRIEVE).await;
    operator.set_behavior(reachd::testing::OperatorBehavior::Silent);

    let bound_ms = broker.config().broker.channel_timeout_ms;
    let start = Instant::now();
    let err = channel
        .search_by_element_id(WINDOW, ROOT_ELEMENT_ID, SearchMode::Node)
        .await
        .unwrap_err();
    let elapsed = start.elapsed();

    assert_eq!(err, ErrorKind::TimedOut);
    assert!(
        elapsed.as_millis() as u64 >= bound_ms * 9 / 10,
        "timed out too early: {elapsed:?}"
    );
    // The abandoned correlation entry was swept.
    let session = broker.accounts().current().unwrap();
    assert_eq!(session.elements().requests().pending_count(), 0);
}

#[tokio::test]
async fn test_execute_action_reports_operator_verdict() {
    let platform = TestPlatform::new();
    let (_broker, channel, operator) =
        connected_channel(&platform, CapabilitySet::RETRIEVE).await;

    assert!(channel
        .execute_action(WINDOW, ROOT_ELEMENT_ID, ActionType::Click, HashMap::new())
        .await
        .unwrap());

    operator.set_action_succeeds(false);
    assert!(!channel
        .execute_action(WINDOW, ROOT_ELEMENT_ID, ActionType::Click, HashMap::new())
        .await
        .unwrap());

    // Setting text requires the text argument.
    let err = channel
        .execute_action(WINDOW, ROOT_ELEMENT_ID, ActionType::SetText, HashMap::new())
        .await
        .unwrap_err();
    assert_eq!(err, ErrorKind::InvalidParam);
}

#[tokio::test]
async fn test_focus_operations_resolve_elements() {
    let platform = TestPlatform::new();
    let (_broker, channel, _operator) =
        connected_channel(&platform, CapabilitySet::RETRIEVE).await;

    let focused = channel
        .find_focused_element(WINDOW, ROOT_ELEMENT_ID, FocusKind::Accessibility)
        .await
        .unwrap();
    assert!(focused.focused);

    let next = channel
        .focus_move_search(WINDOW, 5, FocusDirection::Forward)
        .await
        .unwrap();
    assert_eq!(next.element_id, 6);

    let cursor = channel.get_cursor_position(WINDOW, 5).await.unwrap();
    assert_eq!(cursor, 7);
}

#[tokio::test]
async fn test_window_enumeration_uses_the_provider() {
    let platform = TestPlatform::new();
    platform.windows.set_windows(vec![
        WindowInfo::application(WINDOW, 0),
        WindowInfo::application(8, 1),
    ]);
    let (_broker, channel, _operator) =
        connected_channel(&platform, CapabilitySet::RETRIEVE).await;

    assert_eq!(channel.get_windows(None).await.unwrap().len(), 2);
    assert_eq!(channel.get_windows(Some(1)).await.unwrap().len(), 1);
    assert_eq!(channel.get_window(WINDOW).await.unwrap().window_id, WINDOW);
    assert_eq!(
        channel.get_window(1234).await.unwrap_err(),
        ErrorKind::NoWindowConnection
    );
}

#[tokio::test]
async fn test_queries_route_to_child_tree_operators() {
    let platform = TestPlatform::new();
    let (broker, channel, root_operator) =
        connected_channel(&platform, CapabilitySet::RETRIEVE).await;

    let child_operator = FakeElementOperator::new();
    let tree_id = broker
        .register_child_tree(WINDOW, 0, WINDOW, child_operator.clone(), 42, 11)
        .await
        .unwrap();
    assert_eq!(child_operator.belong_tree(), Some(tree_id));
    assert_eq!(root_operator.child_links(), vec![(42, tree_id, WINDOW)]);

    // An element id carrying the child tree id routes past the root.
    let packed = pack_element_id(tree_id, 3);
    channel
        .search_by_element_id(WINDOW, packed, SearchMode::Node)
        .await
        .unwrap();
    assert_eq!(root_operator.calls().len(), 0);
    assert_eq!(child_operator.calls().len(), 1);

    // Upward traversal resolves the mount element.
    assert_eq!(
        channel.get_root_parent_id(WINDOW, tree_id).await.unwrap(),
        42
    );
}

#[tokio::test]
async fn test_composite_window_ids_translate_before_lookup() {
    let platform = TestPlatform::new();
    let (_broker, channel, operator) =
        connected_channel(&platform, CapabilitySet::RETRIEVE).await;
    // Outer id 70 resolves to the inner window the operator registered.
    platform.windows.map_inner_id(70, WINDOW);

    channel
        .search_by_element_id(70, ROOT_ELEMENT_ID, SearchMode::Node)
        .await
        .unwrap();
    assert_eq!(operator.calls().len(), 1);
}

#[tokio::test]
async fn test_global_actions_emit_fixed_key_sequences() {
    let platform = TestPlatform::new();
    let (_broker, channel, _operator) =
        connected_channel(&platform, CapabilitySet::RETRIEVE).await;

    channel.perform_global_action(GlobalAction::Home).unwrap();
    assert_eq!(platform.input.key_events().len(), 2);

    channel.perform_global_action(GlobalAction::TakeScreenshot).unwrap();
    assert_eq!(platform.input.key_events().len(), 6);
}

#[tokio::test]
async fn test_events_fan_out_by_interest_mask() {
    let platform = TestPlatform::new();
    let (broker, channel, _operator) =
        connected_channel(&platform, CapabilitySet::RETRIEVE).await;
    let client = platform.host.client_for(READER_URI).unwrap();

    broker.submit_event(AccessibilityEvent::new(
        EventTypeSet::VIEW_CLICKED,
        WINDOW,
        "com.example.app",
    ));
    settle().await;
    assert_eq!(client.events().len(), 1);

    // Narrow the filter to scroll events; clicks stop arriving.
    channel.set_event_filter(EventTypeSet::VIEW_SCROLLED).unwrap();
    broker.submit_event(AccessibilityEvent::new(
        EventTypeSet::VIEW_CLICKED,
        WINDOW,
        "com.example.app",
    ));
    settle().await;
    assert_eq!(client.events().len(), 1);

    // Bundle targeting filters by source application.
    channel.set_event_filter(EventTypeSet::all()).unwrap();
    channel.set_target_bundles(vec!["com.other.app".to_string()]).unwrap();
    broker.submit_event(AccessibilityEvent::new(
        EventTypeSet::VIEW_CLICKED,
        WINDOW,
        "com.example.app",
    ));
    settle().await;
    assert_eq!(client.events().len(), 1);
}

#[tokio::test]
async fn test_operations_after_disconnect_are_no_connection() {
    let platform = TestPlatform::new();
    let (broker, channel, _operator) =
        connected_channel(&platform, CapabilitySet::RETRIEVE).await;

    broker.disable_ability(READER_URI.to_string()).await.unwrap();
    settle().await;

    let err = channel
        .search_by_element_id(WINDOW, ROOT_ELEMENT_ID, SearchMode::Node)
        .await
        .unwrap_err();
    assert_eq!(err, ErrorKind::NoConnection);
    assert_eq!(
        channel.perform_global_action(GlobalAction::Back).unwrap_err(),
        ErrorKind::NoConnection
    );
}

#[tokio::test]
async fn test_empty_text_search_is_invalid_param() {
    let platform = TestPlatform::new();
    let (_broker, channel, _operator) =
        connected_channel(&platform, CapabilitySet::RETRIEVE).await;

    let err = channel
        .search_by_text(WINDOW, ROOT_ELEMENT_ID, String::new())
        .await
        .unwrap_err();
    assert_eq!(err, ErrorKind::InvalidParam);
}
