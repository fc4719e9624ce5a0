//! One live relationship between the broker and a running extension.
//!
//! An `AbilityConnection` exists from the moment the broker asks the
//! lifecycle host to start an extension until the disconnect (or crash)
//! completes. The capability grant is computed once at construction and is
//! immutable afterwards; a capability change means a full
//! disconnect/reconnect cycle, never in-place mutation.
//!
//! State transitions are driven from the broker's main queue; the struct
//! itself only guards its own fields.

use crate::channel::Channel;
use crate::platform::{AbilityClient, ConnectionToken};
use crate::queue::SerialQueue;
use reach_protocol::{
    AbilityDescriptor, AccessibilityEvent, AccountId, BrokerResult, CapabilitySet, ConnectionId,
    ConnectionKind, ErrorKind, EventTypeSet,
};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Lifecycle of one ability connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Constructed, connect not yet issued.
    Idle,
    /// Connect request in flight to the lifecycle host.
    Connecting,
    /// Command proxy live, channel handed to the peer.
    Connected,
    /// Disconnect requested, completion pending. A re-enable arriving now
    /// cancels the disconnect instead of racing a fresh connect.
    WaitingDisconnect,
    /// Terminal. The object stays only for in-flight completions to observe.
    Disconnected,
}

pub struct AbilityConnection {
    id: ConnectionId,
    kind: ConnectionKind,
    descriptor: AbilityDescriptor,
    granted: CapabilitySet,
    account_id: AccountId,
    token: ConnectionToken,
    queue: SerialQueue,
    state: Mutex<ConnectionState>,
    client: Mutex<Option<Arc<dyn AbilityClient>>>,
    channel: Mutex<Option<Arc<Channel>>>,
    event_filter: Mutex<EventTypeSet>,
    target_bundles: Mutex<Option<Vec<String>>>,
}

impl AbilityConnection {
    /// Computes the grant and builds the connection.
    ///
    /// Fails with [`ErrorKind::NoCapability`] when the grant would be empty:
    /// `granted = static ∩ requested` for extensions, `requested` verbatim
    /// for kinds whose behavior table says so.
    pub fn new(
        id: ConnectionId,
        kind: ConnectionKind,
        descriptor: AbilityDescriptor,
        requested: CapabilitySet,
        account_id: AccountId,
    ) -> BrokerResult<Arc<Self>> {
        let granted = if kind.traits_of().grant_requested_verbatim {
            requested
        } else {
            descriptor.static_capabilities & requested
        };
        if granted.is_empty() {
            return Err(ErrorKind::NoCapability);
        }
        let event_filter = descriptor.event_types;
        Ok(Arc::new(AbilityConnection {
            id,
            kind,
            queue: SerialQueue::new(format!("conn-{account_id}-{id}")),
            descriptor,
            granted,
            account_id,
            token: Uuid::new_v4(),
            state: Mutex::new(ConnectionState::Idle),
            client: Mutex::new(None),
            channel: Mutex::new(None),
            event_filter: Mutex::new(event_filter),
            target_bundles: Mutex::new(None),
        }))
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn kind(&self) -> ConnectionKind {
        self.kind
    }

    pub fn descriptor(&self) -> &AbilityDescriptor {
        &self.descriptor
    }

    pub fn uri(&self) -> String {
        self.descriptor.uri()
    }

    pub fn granted(&self) -> CapabilitySet {
        self.granted
    }

    pub fn account_id(&self) -> AccountId {
        self.account_id
    }

    pub fn token(&self) -> ConnectionToken {
        self.token
    }

    /// The serialized command-dispatch queue backing this connection's
    /// channel.
    pub fn queue(&self) -> &SerialQueue {
        &self.queue
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_state(&self, state: ConnectionState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn client(&self) -> Option<Arc<dyn AbilityClient>> {
        self.client.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn channel(&self) -> Option<Arc<Channel>> {
        self.channel.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Stores the live proxy and channel after a successful connect.
    pub fn attach(&self, client: Arc<dyn AbilityClient>, channel: Arc<Channel>) {
        *self.client.lock().unwrap_or_else(|e| e.into_inner()) = Some(client);
        *self.channel.lock().unwrap_or_else(|e| e.into_inner()) = Some(channel);
    }

    /// Drops proxy and channel, returning the proxy so the caller can
    /// remove its death watch. Safe to call twice.
    pub fn detach(&self) -> Option<Arc<dyn AbilityClient>> {
        *self.channel.lock().unwrap_or_else(|e| e.into_inner()) = None;
        self.client.lock().unwrap_or_else(|e| e.into_inner()).take()
    }

    /// Runtime event filter; starts as the descriptor's declared interest.
    pub fn event_filter(&self) -> EventTypeSet {
        *self.event_filter.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_event_filter(&self, filter: EventTypeSet) {
        *self.event_filter.lock().unwrap_or_else(|e| e.into_inner()) = filter;
    }

    /// Restricts delivery to events from the named bundles; `None` lifts
    /// the restriction.
    pub fn set_target_bundles(&self, bundles: Option<Vec<String>>) {
        *self.target_bundles.lock().unwrap_or_else(|e| e.into_inner()) = bundles;
    }

    /// Whether this connection should receive `event`.
    pub fn wants_event(&self, event: &AccessibilityEvent) -> bool {
        if !self.is_connected() {
            return false;
        }
        if !self.event_filter().intersects(event.event_type) {
            return false;
        }
        let bundles = self.target_bundles.lock().unwrap_or_else(|e| e.into_inner());
        match bundles.as_ref() {
            Some(list) => list.iter().any(|bundle| bundle == &event.bundle_name),
            None => true,
        }
    }
}

impl std::fmt::Debug for AbilityConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AbilityConnection")
            .field("id", &self.id)
            .field("uri", &self.uri())
            .field("kind", &self.kind)
            .field("state", &self.state())
            .field("granted", &self.granted.to_string())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reach_protocol::EventTypeSet;

    fn descriptor() -> AbilityDescriptor {
        AbilityDescriptor::new("com.example.reader", "ScreenReader")
            .with_capabilities(CapabilitySet::RETRIEVE | CapabilitySet::GESTURE)
    }

    #[tokio::test]
    async fn test_grant_is_intersection_for_extensions() {
        let conn = AbilityConnection::new(
            1,
            ConnectionKind::Extension,
            descriptor(),
            CapabilitySet::RETRIEVE | CapabilitySet::ZOOM,
            100,
        )
        .unwrap();
        assert_eq!(conn.granted(), CapabilitySet::RETRIEVE);
        assert!(conn.granted().is_subset_of(conn.descriptor().static_capabilities));
    }

    #[tokio::test]
    async fn test_empty_grant_is_rejected() {
        let err = AbilityConnection::new(
            1,
            ConnectionKind::Extension,
            descriptor(),
            CapabilitySet::ZOOM,
            100,
        )
        .unwrap_err();
        assert_eq!(err, ErrorKind::NoCapability);
    }

    #[tokio::test]
    async fn test_ui_test_kind_grants_verbatim() {
        let conn = AbilityConnection::new(
            2,
            ConnectionKind::UiTest,
            AbilityDescriptor::new("uitest", "Driver"),
            CapabilitySet::all(),
            100,
        )
        .unwrap();
        assert_eq!(conn.granted(), CapabilitySet::all());
    }

    #[tokio::test]
    async fn test_event_filter_gates_delivery() {
        let conn = AbilityConnection::new(
            3,
            ConnectionKind::Extension,
            descriptor().with_event_types(EventTypeSet::VIEW_CLICKED),
            CapabilitySet::RETRIEVE,
            100,
        )
        .unwrap();
        conn.set_state(ConnectionState::Connected);

        let clicked =
            AccessibilityEvent::new(EventTypeSet::VIEW_CLICKED, 4, "com.example.app");
        let scrolled =
            AccessibilityEvent::new(EventTypeSet::VIEW_SCROLLED, 4, "com.example.app");
        assert!(conn.wants_event(&clicked));
        assert!(!conn.wants_event(&scrolled));

        conn.set_target_bundles(Some(vec!["other.bundle".to_string()]));
        assert!(!conn.wants_event(&clicked));
    }
}
