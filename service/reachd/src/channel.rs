//! Capability-checked command channel of one ability connection.
//!
//! Every operation follows the same shape: validate the connection and the
//! required capability synchronously, post the real work onto the
//! connection's serialized queue, then wait on a one-shot completion signal
//! with a bounded timeout. A timed-out call stops waiting locally; the
//! abandoned task may still run and its result is discarded because the
//! signal is single-use.
//!
//! Global-action shortcuts skip the queue entirely: they are a static
//! lookup into a table of synthetic key-event sequences.

use crate::account::session::AccountSession;
use crate::connection::AbilityConnection;
use crate::element::requests::{OperatorCallback, OperatorResponse};
use crate::platform::{ElementOperator, InputDispatcher, WindowProvider};
use once_cell::sync::Lazy;
use reach_protocol::{
    tree_id_of_element, ActionArguments, ActionType, BrokerResult, CapabilitySet, DisplayId,
    ElementId, ErrorKind, EventTypeSet, FocusDirection, FocusKind, GesturePath, GlobalAction,
    RequestId, SyntheticKeyEvent, TreeId, WindowId, WindowInfo,
};
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::debug;

// Platform key codes for the shortcut table.
const KEY_BACK: u32 = 2;
const KEY_HOME: u32 = 1;
const KEY_RECENTS: u32 = 2078;
const KEY_NOTIFICATION: u32 = 2718;
const KEY_POWER: u32 = 18;
const KEY_VOLUME_DOWN: u32 = 17;

/// Fixed translation of global actions into synthetic key sequences.
static GLOBAL_ACTIONS: Lazy<HashMap<GlobalAction, Vec<SyntheticKeyEvent>>> = Lazy::new(|| {
    let press = |key: u32| vec![SyntheticKeyEvent::down(key), SyntheticKeyEvent::up(key)];
    let mut table = HashMap::new();
    table.insert(GlobalAction::Back, press(KEY_BACK));
    table.insert(GlobalAction::Home, press(KEY_HOME));
    table.insert(GlobalAction::Recents, press(KEY_RECENTS));
    table.insert(GlobalAction::Notifications, press(KEY_NOTIFICATION));
    table.insert(GlobalAction::LockScreen, press(KEY_POWER));
    table.insert(
        GlobalAction::TakeScreenshot,
        vec![
            SyntheticKeyEvent::down(KEY_POWER),
            SyntheticKeyEvent::down(KEY_VOLUME_DOWN),
            SyntheticKeyEvent::up(KEY_VOLUME_DOWN),
            SyntheticKeyEvent::up(KEY_POWER),
        ],
    );
    table
});

/// Command façade bound to one ability connection.
pub struct Channel {
    connection: Weak<AbilityConnection>,
    session: Weak<AccountSession>,
    windows: Arc<dyn WindowProvider>,
    input: Arc<dyn InputDispatcher>,
    timeout: Duration,
}

impl Channel {
    pub fn new(
        connection: &Arc<AbilityConnection>,
        session: &Arc<AccountSession>,
        windows: Arc<dyn WindowProvider>,
        input: Arc<dyn InputDispatcher>,
        timeout: Duration,
    ) -> Self {
        Channel {
            connection: Arc::downgrade(connection),
            session: Arc::downgrade(session),
            windows,
            input,
            timeout,
        }
    }

    /// Rejects callers whose connection is gone or lacks `required`.
    fn ready(
        &self,
        required: CapabilitySet,
    ) -> BrokerResult<(Arc<AbilityConnection>, Arc<AccountSession>)> {
        let connection = self.connection.upgrade().ok_or(ErrorKind::NoConnection)?;
        if !connection.is_connected() {
            return Err(ErrorKind::NoConnection);
        }
        if !connection.granted().contains(required) {
            debug!(
                uri = %connection.uri(),
                granted = %connection.granted(),
                required = %required,
                "operation rejected for missing capability"
            );
            return Err(ErrorKind::NoCapability);
        }
        let session = self.session.upgrade().ok_or(ErrorKind::Unavailable)?;
        Ok((connection, session))
    }

    /// Queue an element-operator request and wait for the correlated
    /// response.
    async fn element_request(
        &self,
        label: &'static str,
        required: CapabilitySet,
        window_id: WindowId,
        element_id: ElementId,
        focus: FocusKind,
        dispatch: impl FnOnce(&Arc<dyn ElementOperator>, RequestId, OperatorCallback)
            + Send
            + 'static,
    ) -> BrokerResult<OperatorResponse> {
        let (connection, session) = self.ready(required)?;
        let windows = self.windows.clone();
        let (tx, rx) = oneshot::channel();
        let issued: Arc<OnceLock<RequestId>> = Arc::new(OnceLock::new());
        let issued_in_job = issued.clone();
        let job_session = session.clone();

        let posted = connection.queue().post(label, move || {
            let elements = job_session.elements();
            let real_window_id = windows.to_real_window_id(window_id, focus);
            let Some(window) = elements.window(real_window_id) else {
                let _ = tx.send(Err(ErrorKind::NoWindowConnection));
                return;
            };
            let tree_id: TreeId = tree_id_of_element(element_id);
            let Some(operator) = window.operator(tree_id) else {
                let _ = tx.send(Err(ErrorKind::NoWindowConnection));
                return;
            };
            let request_id = elements.requests().register(real_window_id, tree_id, tx);
            let _ = issued_in_job.set(request_id);
            let callback = OperatorCallback::new(elements.requests().clone());
            dispatch(&operator, request_id, callback);
        });
        if !posted {
            return Err(ErrorKind::Unavailable);
        }

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ErrorKind::Unavailable),
            Err(_) => {
                // Sweep our own correlation entry; a response racing in is
                // dropped by the table.
                if let Some(request_id) = issued.get() {
                    session.elements().requests().remove(*request_id);
                }
                debug!(label, window_id, "element request timed out");
                Err(ErrorKind::TimedOut)
            }
        }
    }

    /// Queue a self-contained computation (no operator round trip).
    async fn queued<T>(
        &self,
        label: &'static str,
        required: CapabilitySet,
        f: impl FnOnce() -> BrokerResult<T> + Send + 'static,
    ) -> BrokerResult<T>
    where
        T: Send + 'static,
    {
        let (connection, _session) = self.ready(required)?;
        let fut = connection.queue().call(label, f);
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result?,
            Err(_) => Err(ErrorKind::TimedOut),
        }
    }

    /// Search the UI tree by element id.
    pub async fn search_by_element_id(
        &self,
        window_id: WindowId,
        element_id: ElementId,
        mode: reach_protocol::SearchMode,
    ) -> BrokerResult<Vec<reach_protocol::ElementInfo>> {
        let response = self
            .element_request(
                "search_by_element_id",
                CapabilitySet::RETRIEVE,
                window_id,
                element_id,
                FocusKind::Invalid,
                move |operator, request_id, callback| {
                    operator.search_by_element_id(element_id, request_id, callback, mode);
                },
            )
            .await?;
        match response {
            OperatorResponse::Elements(elements) => Ok(elements),
            _ => Err(ErrorKind::Failed),
        }
    }

    /// Search the UI tree for elements whose text matches.
    pub async fn search_by_text(
        &self,
        window_id: WindowId,
        element_id: ElementId,
        text: String,
    ) -> BrokerResult<Vec<reach_protocol::ElementInfo>> {
        if text.is_empty() {
            return Err(ErrorKind::InvalidParam);
        }
        let response = self
            .element_request(
                "search_by_text",
                CapabilitySet::RETRIEVE,
                window_id,
                element_id,
                FocusKind::Invalid,
                move |operator, request_id, callback| {
                    operator.search_by_text(element_id, &text, request_id, callback);
                },
            )
            .await?;
        match response {
            OperatorResponse::Elements(elements) => Ok(elements),
            _ => Err(ErrorKind::Failed),
        }
    }

    /// Locate the focused element.
    pub async fn find_focused_element(
        &self,
        window_id: WindowId,
        element_id: ElementId,
        focus: FocusKind,
    ) -> BrokerResult<reach_protocol::ElementInfo> {
        let response = self
            .element_request(
                "find_focused_element",
                CapabilitySet::RETRIEVE,
                window_id,
                element_id,
                focus,
                move |operator, request_id, callback| {
                    operator.find_focused(element_id, focus, request_id, callback);
                },
            )
            .await?;
        match response {
            OperatorResponse::Element(element) => Ok(element),
            _ => Err(ErrorKind::Failed),
        }
    }

    /// Move focus from `element_id` in the given direction.
    pub async fn focus_move_search(
        &self,
        window_id: WindowId,
        element_id: ElementId,
        direction: FocusDirection,
    ) -> BrokerResult<reach_protocol::ElementInfo> {
        let response = self
            .element_request(
                "focus_move_search",
                CapabilitySet::RETRIEVE,
                window_id,
                element_id,
                FocusKind::Invalid,
                move |operator, request_id, callback| {
                    operator.focus_move(element_id, direction, request_id, callback);
                },
            )
            .await?;
        match response {
            OperatorResponse::Element(element) => Ok(element),
            _ => Err(ErrorKind::Failed),
        }
    }

    /// Ask the element to perform an action.
    pub async fn execute_action(
        &self,
        window_id: WindowId,
        element_id: ElementId,
        action: ActionType,
        arguments: ActionArguments,
    ) -> BrokerResult<bool> {
        if action == ActionType::SetText && !arguments.contains_key("text") {
            return Err(ErrorKind::InvalidParam);
        }
        let response = self
            .element_request(
                "execute_action",
                CapabilitySet::RETRIEVE,
                window_id,
                element_id,
                FocusKind::Invalid,
                move |operator, request_id, callback| {
                    operator.execute_action(element_id, action, &arguments, request_id, callback);
                },
            )
            .await?;
        match response {
            OperatorResponse::ActionDone(succeeded) => Ok(succeeded),
            _ => Err(ErrorKind::Failed),
        }
    }

    /// Text-cursor position inside an editable element.
    pub async fn get_cursor_position(
        &self,
        window_id: WindowId,
        element_id: ElementId,
    ) -> BrokerResult<i32> {
        let response = self
            .element_request(
                "get_cursor_position",
                CapabilitySet::RETRIEVE,
                window_id,
                element_id,
                FocusKind::Invalid,
                move |operator, request_id, callback| {
                    operator.get_cursor_position(element_id, request_id, callback);
                },
            )
            .await?;
        match response {
            OperatorResponse::Cursor(position) => Ok(position),
            _ => Err(ErrorKind::Failed),
        }
    }

    /// Enumerate windows, optionally restricted to one display.
    pub async fn get_windows(&self, display_id: Option<DisplayId>) -> BrokerResult<Vec<WindowInfo>> {
        let windows = self.windows.clone();
        self.queued("get_windows", CapabilitySet::RETRIEVE, move || {
            Ok(windows.list_windows(display_id))
        })
        .await
    }

    /// Fetch one window.
    pub async fn get_window(&self, window_id: WindowId) -> BrokerResult<WindowInfo> {
        let windows = self.windows.clone();
        self.queued("get_window", CapabilitySet::RETRIEVE, move || {
            windows.window(window_id).ok_or(ErrorKind::NoWindowConnection)
        })
        .await
    }

    /// Element a child tree hangs under, for upward traversal across trees.
    pub async fn get_root_parent_id(
        &self,
        window_id: WindowId,
        tree_id: TreeId,
    ) -> BrokerResult<ElementId> {
        let (_connection, session) = self.ready(CapabilitySet::RETRIEVE)?;
        let job_session = session.clone();
        self.queued("get_root_parent_id", CapabilitySet::RETRIEVE, move || {
            job_session.elements().root_parent_id(window_id, tree_id)
        })
        .await
    }

    /// Play a simulated gesture through the input dispatcher.
    pub async fn send_gesture(&self, path: GesturePath) -> BrokerResult<()> {
        if !path.is_valid() {
            return Err(ErrorKind::InvalidParam);
        }
        let input = self.input.clone();
        self.queued("send_gesture", CapabilitySet::GESTURE, move || {
            if input.inject_gesture(&path) {
                Ok(())
            } else {
                Err(ErrorKind::Failed)
            }
        })
        .await
    }

    /// Trigger a fixed platform shortcut. Static table lookup; bypasses the
    /// dispatch queue.
    pub fn perform_global_action(&self, action: GlobalAction) -> BrokerResult<()> {
        let (_connection, _session) = self.ready(CapabilitySet::empty())?;
        let events = GLOBAL_ACTIONS.get(&action).ok_or(ErrorKind::InvalidParam)?;
        self.input.send_key_events(events);
        Ok(())
    }

    /// Replace the connection's event-type interest mask.
    pub fn set_event_filter(&self, filter: EventTypeSet) -> BrokerResult<()> {
        let (connection, _session) = self.ready(CapabilitySet::empty())?;
        connection.set_event_filter(filter);
        Ok(())
    }

    /// Restrict event delivery to the named bundles (empty list clears the
    /// restriction).
    pub fn set_target_bundles(&self, bundles: Vec<String>) -> BrokerResult<()> {
        let (connection, _session) = self.ready(CapabilitySet::empty())?;
        connection.set_target_bundles(if bundles.is_empty() { None } else { Some(bundles) });
        Ok(())
    }
}
