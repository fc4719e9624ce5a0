//! In-process fakes for the platform interfaces.
//!
//! Used by the test suites and by the daemon's demo mode. Each fake records
//! enough of what happened for assertions and offers knobs for failure
//! injection (refused connects, held completions, silent operators).

use crate::broker::{PlatformDeps, SettingsFactory};
use crate::channel::Channel;
use crate::peers::PeerId;
use crate::platform::{
    AbilityClient, AbilityHost, ConnectionToken, ElementOperator, InputDispatcher,
    PackageRegistry, RemotePeer, WindowProvider,
};
use async_trait::async_trait;
use reach_config::{MemorySettings, SettingsStore};
use reach_protocol::{
    AbilityDescriptor, AccessibilityEvent, AccountId, ActionArguments, ActionType, DisplayId,
    ElementId, ElementInfo, ErrorKind, FocusDirection, FocusKind, GesturePath, RequestId,
    SearchMode, SyntheticKeyEvent, TreeId, WindowId, WindowInfo,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

static NEXT_PEER_ID: AtomicU64 = AtomicU64::new(1);

/// A remote peer with a process-unique id.
#[derive(Debug)]
pub struct FakePeer {
    id: PeerId,
}

impl FakePeer {
    pub fn fresh() -> Arc<Self> {
        Arc::new(FakePeer { id: PeerId(NEXT_PEER_ID.fetch_add(1, Ordering::Relaxed)) })
    }
}

impl RemotePeer for FakePeer {
    fn id(&self) -> PeerId {
        self.id
    }
}

/// Recording ability command proxy.
pub struct FakeAbilityClient {
    peer: Arc<FakePeer>,
    uri: String,
    channel: Mutex<Option<Arc<Channel>>>,
    init_count: AtomicUsize,
    disconnect_count: AtomicUsize,
    events: Mutex<Vec<AccessibilityEvent>>,
}

impl FakeAbilityClient {
    fn new(uri: String) -> Arc<Self> {
        Arc::new(FakeAbilityClient {
            peer: FakePeer::fresh(),
            uri,
            channel: Mutex::new(None),
            init_count: AtomicUsize::new(0),
            disconnect_count: AtomicUsize::new(0),
            events: Mutex::new(Vec::new()),
        })
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn peer_id(&self) -> PeerId {
        self.peer.id
    }

    /// The channel endpoint handed over at init.
    pub fn channel(&self) -> Option<Arc<Channel>> {
        self.channel.lock().unwrap().clone()
    }

    pub fn init_count(&self) -> usize {
        self.init_count.load(Ordering::SeqCst)
    }

    pub fn disconnect_count(&self) -> usize {
        self.disconnect_count.load(Ordering::SeqCst)
    }

    pub fn events(&self) -> Vec<AccessibilityEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl AbilityClient for FakeAbilityClient {
    fn peer(&self) -> Arc<dyn RemotePeer> {
        self.peer.clone()
    }

    fn init(&self, channel: Arc<Channel>, _connection_id: i32) {
        *self.channel.lock().unwrap() = Some(channel);
        self.init_count.fetch_add(1, Ordering::SeqCst);
    }

    fn disconnect(&self, _connection_id: i32) {
        self.disconnect_count.fetch_add(1, Ordering::SeqCst);
    }

    fn on_event(&self, event: &AccessibilityEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

/// How the fake host answers the next connect for a uri.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectMode {
    /// Resolve immediately with a fresh client.
    Immediate,
    /// Resolve immediately with the given error.
    Fail(ErrorKind),
    /// Park the completion until [`FakeAbilityHost::release_held`].
    Held,
}

struct HeldConnect {
    uri: String,
    release: oneshot::Sender<()>,
}

/// Scriptable ability lifecycle host.
pub struct FakeAbilityHost {
    default_mode: Mutex<ConnectMode>,
    per_uri: Mutex<HashMap<String, ConnectMode>>,
    held: Mutex<Vec<HeldConnect>>,
    clients: Mutex<HashMap<String, Arc<FakeAbilityClient>>>,
    connect_count: AtomicUsize,
    disconnect_count: AtomicUsize,
}

impl FakeAbilityHost {
    pub fn new() -> Arc<Self> {
        Arc::new(FakeAbilityHost {
            default_mode: Mutex::new(ConnectMode::Immediate),
            per_uri: Mutex::new(HashMap::new()),
            held: Mutex::new(Vec::new()),
            clients: Mutex::new(HashMap::new()),
            connect_count: AtomicUsize::new(0),
            disconnect_count: AtomicUsize::new(0),
        })
    }

    pub fn set_default_mode(&self, mode: ConnectMode) {
        *self.default_mode.lock().unwrap() = mode;
    }

    pub fn set_mode_for(&self, uri: &str, mode: ConnectMode) {
        self.per_uri.lock().unwrap().insert(uri.to_string(), mode);
    }

    /// Releases every held connect, letting them complete.
    pub fn release_held(&self) {
        for held in self.held.lock().unwrap().drain(..) {
            let _ = held.release.send(());
        }
    }

    pub fn held_uris(&self) -> Vec<String> {
        self.held.lock().unwrap().iter().map(|h| h.uri.clone()).collect()
    }

    /// The latest client created for `uri`.
    pub fn client_for(&self, uri: &str) -> Option<Arc<FakeAbilityClient>> {
        self.clients.lock().unwrap().get(uri).cloned()
    }

    pub fn connect_count(&self) -> usize {
        self.connect_count.load(Ordering::SeqCst)
    }

    pub fn disconnect_count(&self) -> usize {
        self.disconnect_count.load(Ordering::SeqCst)
    }

    fn mode_for(&self, uri: &str) -> ConnectMode {
        self.per_uri
            .lock()
            .unwrap()
            .get(uri)
            .copied()
            .unwrap_or(*self.default_mode.lock().unwrap())
    }
}

#[async_trait]
impl AbilityHost for FakeAbilityHost {
    async fn request_connect(
        &self,
        descriptor: &AbilityDescriptor,
        _account_id: AccountId,
        _token: ConnectionToken,
    ) -> Result<Arc<dyn AbilityClient>, ErrorKind> {
        let uri = descriptor.uri();
        self.connect_count.fetch_add(1, Ordering::SeqCst);
        match self.mode_for(&uri) {
            ConnectMode::Fail(kind) => return Err(kind),
            ConnectMode::Held => {
                let (tx, rx) = oneshot::channel();
                self.held.lock().unwrap().push(HeldConnect { uri: uri.clone(), release: tx });
                if rx.await.is_err() {
                    return Err(ErrorKind::Failed);
                }
            }
            ConnectMode::Immediate => {}
        }
        let client = FakeAbilityClient::new(uri.clone());
        self.clients.lock().unwrap().insert(uri, client.clone());
        Ok(client)
    }

    async fn request_disconnect(&self, _token: ConnectionToken) -> Result<(), ErrorKind> {
        self.disconnect_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Mutable installed-package list.
pub struct FakePackageRegistry {
    descriptors: Mutex<Vec<AbilityDescriptor>>,
}

impl FakePackageRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(FakePackageRegistry { descriptors: Mutex::new(Vec::new()) })
    }

    pub fn set_installed(&self, descriptors: Vec<AbilityDescriptor>) {
        *self.descriptors.lock().unwrap() = descriptors;
    }
}

#[async_trait]
impl PackageRegistry for FakePackageRegistry {
    async fn installed_descriptors(&self, _account_id: AccountId) -> Vec<AbilityDescriptor> {
        self.descriptors.lock().unwrap().clone()
    }
}

/// Mutable window list with an optional outer-to-inner id mapping.
pub struct FakeWindowProvider {
    windows: Mutex<Vec<WindowInfo>>,
    inner_ids: Mutex<HashMap<WindowId, WindowId>>,
}

impl FakeWindowProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(FakeWindowProvider {
            windows: Mutex::new(Vec::new()),
            inner_ids: Mutex::new(HashMap::new()),
        })
    }

    pub fn set_windows(&self, windows: Vec<WindowInfo>) {
        *self.windows.lock().unwrap() = windows;
    }

    pub fn map_inner_id(&self, outer: WindowId, inner: WindowId) {
        self.inner_ids.lock().unwrap().insert(outer, inner);
    }
}

impl WindowProvider for FakeWindowProvider {
    fn list_windows(&self, display_id: Option<DisplayId>) -> Vec<WindowInfo> {
        self.windows
            .lock()
            .unwrap()
            .iter()
            .filter(|w| display_id.map_or(true, |d| w.display_id == d))
            .cloned()
            .collect()
    }

    fn window(&self, window_id: WindowId) -> Option<WindowInfo> {
        self.windows.lock().unwrap().iter().find(|w| w.window_id == window_id).cloned()
    }

    fn to_real_window_id(&self, window_id: WindowId, _focus: FocusKind) -> WindowId {
        self.inner_ids.lock().unwrap().get(&window_id).copied().unwrap_or(window_id)
    }
}

/// Recording input sink.
pub struct FakeInputDispatcher {
    key_events: Mutex<Vec<SyntheticKeyEvent>>,
    gestures: Mutex<Vec<GesturePath>>,
    accept_gestures: AtomicBool,
}

impl FakeInputDispatcher {
    pub fn new() -> Arc<Self> {
        Arc::new(FakeInputDispatcher {
            key_events: Mutex::new(Vec::new()),
            gestures: Mutex::new(Vec::new()),
            accept_gestures: AtomicBool::new(true),
        })
    }

    pub fn key_events(&self) -> Vec<SyntheticKeyEvent> {
        self.key_events.lock().unwrap().clone()
    }

    pub fn gestures(&self) -> Vec<GesturePath> {
        self.gestures.lock().unwrap().clone()
    }

    pub fn set_accept_gestures(&self, accept: bool) {
        self.accept_gestures.store(accept, Ordering::SeqCst);
    }
}

impl InputDispatcher for FakeInputDispatcher {
    fn send_key_events(&self, events: &[SyntheticKeyEvent]) {
        self.key_events.lock().unwrap().extend_from_slice(events);
    }

    fn inject_gesture(&self, path: &GesturePath) -> bool {
        self.gestures.lock().unwrap().push(path.clone());
        self.accept_gestures.load(Ordering::SeqCst)
    }
}

/// How a fake operator answers requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorBehavior {
    /// Answer immediately with canned data.
    Respond,
    /// Never answer; callers run into their timeout.
    Silent,
}

/// Recording element operator.
pub struct FakeElementOperator {
    peer: Arc<FakePeer>,
    behavior: Mutex<OperatorBehavior>,
    elements: Mutex<Vec<ElementInfo>>,
    action_succeeds: AtomicBool,
    calls: Mutex<Vec<String>>,
    belong_tree: Mutex<Option<TreeId>>,
    child_links: Mutex<Vec<(ElementId, TreeId, WindowId)>>,
}

impl FakeElementOperator {
    pub fn new() -> Arc<Self> {
        Arc::new(FakeElementOperator {
            peer: FakePeer::fresh(),
            behavior: Mutex::new(OperatorBehavior::Respond),
            elements: Mutex::new(Vec::new()),
            action_succeeds: AtomicBool::new(true),
            calls: Mutex::new(Vec::new()),
            belong_tree: Mutex::new(None),
            child_links: Mutex::new(Vec::new()),
        })
    }

    pub fn silent() -> Arc<Self> {
        let operator = Self::new();
        operator.set_behavior(OperatorBehavior::Silent);
        operator
    }

    pub fn peer_id(&self) -> PeerId {
        self.peer.id
    }

    pub fn set_behavior(&self, behavior: OperatorBehavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    pub fn set_elements(&self, elements: Vec<ElementInfo>) {
        *self.elements.lock().unwrap() = elements;
    }

    pub fn set_action_succeeds(&self, succeeds: bool) {
        self.action_succeeds.store(succeeds, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn belong_tree(&self) -> Option<TreeId> {
        *self.belong_tree.lock().unwrap()
    }

    /// (node, tree, window) triples announced via child-tree linkage.
    pub fn child_links(&self) -> Vec<(ElementId, TreeId, WindowId)> {
        self.child_links.lock().unwrap().clone()
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }

    fn responding(&self) -> bool {
        *self.behavior.lock().unwrap() == OperatorBehavior::Respond
    }

    fn canned_elements(&self, element_id: ElementId) -> Vec<ElementInfo> {
        let canned = self.elements.lock().unwrap().clone();
        if canned.is_empty() {
            vec![ElementInfo { element_id, ..ElementInfo::default() }]
        } else {
            canned
        }
    }
}

impl ElementOperator for FakeElementOperator {
    fn peer(&self) -> Arc<dyn RemotePeer> {
        self.peer.clone()
    }

    fn search_by_element_id(
        &self,
        element_id: ElementId,
        request_id: RequestId,
        callback: crate::element::OperatorCallback,
        _mode: SearchMode,
    ) {
        self.record(format!("search_by_element_id({element_id})"));
        if self.responding() {
            callback.set_search_result(request_id, self.canned_elements(element_id));
        }
    }

    fn search_by_text(
        &self,
        element_id: ElementId,
        text: &str,
        request_id: RequestId,
        callback: crate::element::OperatorCallback,
    ) {
        self.record(format!("search_by_text({text})"));
        if self.responding() {
            callback.set_search_result(request_id, self.canned_elements(element_id));
        }
    }

    fn find_focused(
        &self,
        element_id: ElementId,
        _focus: FocusKind,
        request_id: RequestId,
        callback: crate::element::OperatorCallback,
    ) {
        self.record("find_focused");
        if self.responding() {
            callback.set_find_focus_result(
                request_id,
                ElementInfo { element_id, focused: true, ..ElementInfo::default() },
            );
        }
    }

    fn focus_move(
        &self,
        element_id: ElementId,
        _direction: FocusDirection,
        request_id: RequestId,
        callback: crate::element::OperatorCallback,
    ) {
        self.record("focus_move");
        if self.responding() {
            callback.set_find_focus_result(
                request_id,
                ElementInfo { element_id: element_id + 1, ..ElementInfo::default() },
            );
        }
    }

    fn execute_action(
        &self,
        element_id: ElementId,
        action: ActionType,
        _arguments: &ActionArguments,
        request_id: RequestId,
        callback: crate::element::OperatorCallback,
    ) {
        self.record(format!("execute_action({element_id}, {action:?})"));
        if self.responding() {
            callback.set_execute_action_result(request_id, self.action_succeeds.load(Ordering::SeqCst));
        }
    }

    fn get_cursor_position(
        &self,
        _element_id: ElementId,
        request_id: RequestId,
        callback: crate::element::OperatorCallback,
    ) {
        self.record("get_cursor_position");
        if self.responding() {
            callback.set_cursor_position_result(request_id, 7);
        }
    }

    fn set_belong_tree_id(&self, tree_id: TreeId) {
        *self.belong_tree.lock().unwrap() = Some(tree_id);
    }

    fn set_child_tree_id_and_window_id(
        &self,
        node_id: ElementId,
        tree_id: TreeId,
        window_id: WindowId,
    ) {
        self.child_links.lock().unwrap().push((node_id, tree_id, window_id));
    }

    fn clear_focus(&self) {
        self.record("clear_focus");
    }

    fn outside_touch(&self) {
        self.record("outside_touch");
    }
}

/// Bundle of fakes plus per-account in-memory settings, convertible into
/// [`PlatformDeps`].
pub struct TestPlatform {
    pub host: Arc<FakeAbilityHost>,
    pub packages: Arc<FakePackageRegistry>,
    pub windows: Arc<FakeWindowProvider>,
    pub input: Arc<FakeInputDispatcher>,
    settings: Arc<Mutex<HashMap<AccountId, Arc<MemorySettings>>>>,
}

impl TestPlatform {
    pub fn new() -> Self {
        TestPlatform {
            host: FakeAbilityHost::new(),
            packages: FakePackageRegistry::new(),
            windows: FakeWindowProvider::new(),
            input: FakeInputDispatcher::new(),
            settings: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Settings store of one account; same instance across switches.
    pub fn settings_for(&self, account_id: AccountId) -> Arc<MemorySettings> {
        self.settings
            .lock()
            .unwrap()
            .entry(account_id)
            .or_insert_with(MemorySettings::new)
            .clone()
    }

    pub fn deps(&self) -> PlatformDeps {
        let settings = self.settings.clone();
        let factory: SettingsFactory = Box::new(move |account_id| {
            settings
                .lock()
                .unwrap()
                .entry(account_id)
                .or_insert_with(MemorySettings::new)
                .clone() as Arc<dyn SettingsStore>
        });
        PlatformDeps {
            host: self.host.clone(),
            packages: self.packages.clone(),
            windows: self.windows.clone(),
            input: self.input.clone(),
            settings: factory,
        }
    }
}

impl Default for TestPlatform {
    fn default() -> Self {
        TestPlatform::new()
    }
}

/// Lets queued jobs and spawned completions land.
pub async fn settle() {
    tokio::time::sleep(std::time::Duration::from_millis(25)).await;
}
