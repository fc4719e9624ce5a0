//! External collaborator interfaces.
//!
//! The broker never talks to a transport, a package manager or an input
//! pipeline directly; everything below is injected at construction so tests
//! (and the demo platform) can substitute fakes. See `testing` for the
//! in-process implementations.

use crate::element::requests::OperatorCallback;
use crate::peers::PeerId;
use async_trait::async_trait;
use reach_protocol::{
    AbilityDescriptor, AccessibilityEvent, AccountId, ActionArguments, ActionType, DisplayId,
    ElementId, ErrorKind, FocusDirection, FocusKind, GesturePath, RequestId, SearchMode,
    SyntheticKeyEvent, TreeId, WindowId, WindowInfo,
};
use std::sync::Arc;
use uuid::Uuid;

/// Token correlating one connect request with its later disconnect.
pub type ConnectionToken = Uuid;

/// An opaque remote handle whose owning process can die underneath us.
///
/// Transport glue reports deaths through `Broker::peer_died`; the id is the
/// correlation key.
pub trait RemotePeer: Send + Sync {
    fn id(&self) -> PeerId;
}

/// Command proxy into one running accessibility extension.
///
/// Calls are one-way posts over the transport; failures surface later as
/// peer death, never as return values here.
pub trait AbilityClient: Send + Sync {
    fn peer(&self) -> Arc<dyn RemotePeer>;

    /// Hands the extension its channel endpoint after a successful connect.
    fn init(&self, channel: Arc<crate::channel::Channel>, connection_id: i32);

    /// Tells the extension its channel is going away.
    fn disconnect(&self, connection_id: i32);

    /// Delivers one accessibility event.
    fn on_event(&self, event: &AccessibilityEvent);
}

/// The platform service that starts and stops extension processes.
///
/// The broker only issues requests and reacts to completions; process
/// lifecycle and IPC live behind this trait.
#[async_trait]
pub trait AbilityHost: Send + Sync {
    /// Asks the platform to start the extension and hand back its command
    /// proxy. Resolves when the extension finished (or failed) connecting.
    async fn request_connect(
        &self,
        descriptor: &AbilityDescriptor,
        account_id: AccountId,
        token: ConnectionToken,
    ) -> Result<Arc<dyn AbilityClient>, ErrorKind>;

    /// Asks the platform to stop the extension previously connected under
    /// `token`. Resolves when the teardown completed.
    async fn request_disconnect(&self, token: ConnectionToken) -> Result<(), ErrorKind>;
}

/// Read access to installed accessibility-extension packages.
#[async_trait]
pub trait PackageRegistry: Send + Sync {
    async fn installed_descriptors(&self, account_id: AccountId) -> Vec<AbilityDescriptor>;
}

/// Read-only window/display enumeration.
pub trait WindowProvider: Send + Sync {
    fn list_windows(&self, display_id: Option<DisplayId>) -> Vec<WindowInfo>;

    fn window(&self, window_id: WindowId) -> Option<WindowInfo>;

    /// Translates an outer (composite-surface) window id into the inner id
    /// element operators are registered under. Plain ids map to themselves.
    fn to_real_window_id(&self, window_id: WindowId, focus: FocusKind) -> WindowId;
}

/// Synthetic input sink for gesture injection and global shortcuts.
pub trait InputDispatcher: Send + Sync {
    fn send_key_events(&self, events: &[SyntheticKeyEvent]);

    /// Plays a simulated gesture. Returns whether the platform accepted it.
    fn inject_gesture(&self, path: &GesturePath) -> bool;
}

/// An application-supplied operator answering introspection/action requests
/// for one window or tree.
///
/// Requests are one-way; the application answers through the
/// [`OperatorCallback`] using the request id.
pub trait ElementOperator: Send + Sync {
    fn peer(&self) -> Arc<dyn RemotePeer>;

    fn search_by_element_id(
        &self,
        element_id: ElementId,
        request_id: RequestId,
        callback: OperatorCallback,
        mode: SearchMode,
    );

    fn search_by_text(
        &self,
        element_id: ElementId,
        text: &str,
        request_id: RequestId,
        callback: OperatorCallback,
    );

    fn find_focused(
        &self,
        element_id: ElementId,
        focus: FocusKind,
        request_id: RequestId,
        callback: OperatorCallback,
    );

    fn focus_move(
        &self,
        element_id: ElementId,
        direction: FocusDirection,
        request_id: RequestId,
        callback: OperatorCallback,
    );

    fn execute_action(
        &self,
        element_id: ElementId,
        action: ActionType,
        arguments: &ActionArguments,
        request_id: RequestId,
        callback: OperatorCallback,
    );

    fn get_cursor_position(
        &self,
        element_id: ElementId,
        request_id: RequestId,
        callback: OperatorCallback,
    );

    /// Tells the operator which tree id it was registered under.
    fn set_belong_tree_id(&self, tree_id: TreeId);

    /// Tells a parent operator that `node_id` now hosts a child tree.
    fn set_child_tree_id_and_window_id(
        &self,
        node_id: ElementId,
        tree_id: TreeId,
        window_id: WindowId,
    );

    /// Clears accessibility focus inside this operator's surface.
    fn clear_focus(&self);

    /// Reports a touch that landed outside this operator's surface.
    fn outside_touch(&self);
}
