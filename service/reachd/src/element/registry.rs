//! Registry of element operators per window and tree.
//!
//! Applications register a root operator per window and child operators for
//! embedded surfaces; extensions reach them through the Channel. The
//! registry owns the tree id pool, the death watches on operator peers and
//! the pending-request table, all mutated under its own short-held locks.

use crate::element::id_pool::TreeIdPool;
use crate::element::requests::RequestTable;
use crate::element::window::{WindowConnection, ROOT_TREE_ID};
use crate::peers::PeerWatcher;
use crate::platform::ElementOperator;
use reach_protocol::{
    tree_id_of_element, AccountId, BrokerResult, ElementId, ErrorKind, TreeId, WindowId,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use tracing::{debug, info, warn};

/// Per-account element operator registry.
pub struct ElementOperatorRegistry {
    weak_self: Weak<ElementOperatorRegistry>,
    account_id: AccountId,
    windows: Mutex<HashMap<WindowId, Arc<WindowConnection>>>,
    pool: Mutex<TreeIdPool>,
    watcher: PeerWatcher,
    requests: Arc<RequestTable>,
}

impl ElementOperatorRegistry {
    pub fn new(account_id: AccountId, tree_id_capacity: i32) -> Arc<Self> {
        Arc::new_cyclic(|weak_self| ElementOperatorRegistry {
            weak_self: weak_self.clone(),
            account_id,
            windows: Mutex::new(HashMap::new()),
            pool: Mutex::new(TreeIdPool::new(tree_id_capacity)),
            watcher: PeerWatcher::new(),
            requests: RequestTable::new(),
        })
    }

    pub fn requests(&self) -> &Arc<RequestTable> {
        &self.requests
    }

    pub fn watcher(&self) -> &PeerWatcher {
        &self.watcher
    }

    pub fn window(&self, window_id: WindowId) -> Option<Arc<WindowConnection>> {
        self.windows.lock().unwrap_or_else(|e| e.into_inner()).get(&window_id).cloned()
    }

    /// Registers (or replaces) the root operator for a window.
    ///
    /// Re-registration by the same peer is a no-op; a different peer
    /// replaces the previous registration, tearing down its death watch and
    /// failing its pending requests first.
    pub fn register_root(
        &self,
        window_id: WindowId,
        token: u32,
        operator: Arc<dyn ElementOperator>,
    ) -> BrokerResult<()> {
        let new_peer = operator.peer().id();
        let existing = self.window(window_id);

        if let Some(existing) = existing {
            let same_peer = existing
                .root_operator()
                .map(|root| root.peer().id() == new_peer)
                .unwrap_or(false);
            if same_peer {
                debug!(account = self.account_id, window_id, "root operator re-registered by same peer");
                return Ok(());
            }
            info!(account = self.account_id, window_id, "replacing root operator registration");
            self.teardown_window(window_id, &existing);
        }

        let connection = Arc::new(WindowConnection::new(window_id, token, operator));
        self.windows
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(window_id, connection);

        let registry = self.weak_self.clone();
        self.watcher.watch(new_peer, move || {
            crashed_window_cleanup(&registry, window_id, None);
        });
        info!(account = self.account_id, window_id, %new_peer, "root operator registered");
        Ok(())
    }

    /// Registers an operator for a child tree embedded in `parent_window_id`
    /// at `node_id`, returning the allocated tree id.
    pub fn register_child(
        &self,
        parent_window_id: WindowId,
        parent_tree_id: TreeId,
        window_id: WindowId,
        operator: Arc<dyn ElementOperator>,
        node_id: ElementId,
        token: u32,
    ) -> BrokerResult<TreeId> {
        let tree_id = match self.pool.lock().unwrap_or_else(|e| e.into_inner()).allocate() {
            Some(id) => id,
            None => {
                warn!(account = self.account_id, "tree id pool exhausted");
                return Err(ErrorKind::Failed);
            }
        };

        let parent = match self.window(parent_window_id) {
            Some(parent) => parent,
            None => {
                self.pool.lock().unwrap_or_else(|e| e.into_inner()).recycle(tree_id);
                return Err(ErrorKind::NoWindowConnection);
            }
        };

        if let Some(existing) = parent.link_child(parent_tree_id, node_id, tree_id) {
            self.pool.lock().unwrap_or_else(|e| e.into_inner()).recycle(tree_id);
            debug!(
                account = self.account_id,
                parent_window_id, parent_tree_id, node_id, existing,
                "child tree already registered at this mount point"
            );
            return Err(ErrorKind::RegisterExist);
        }

        // Let the parent route queries for node_id down into the new tree.
        if let Some(parent_operator) = parent.operator(parent_tree_id) {
            parent_operator.set_child_tree_id_and_window_id(node_id, tree_id, window_id);
        }
        operator.set_belong_tree_id(tree_id);

        let target = {
            let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());
            windows
                .entry(window_id)
                .or_insert_with(|| Arc::new(WindowConnection::empty(window_id)))
                .clone()
        };
        if !target.set_tree_operator(tree_id, operator.clone(), token, node_id) {
            self.pool.lock().unwrap_or_else(|e| e.into_inner()).recycle(tree_id);
            return Err(ErrorKind::RegisterExist);
        }

        let registry = self.weak_self.clone();
        let peer = operator.peer().id();
        self.watcher.watch(peer, move || {
            crashed_window_cleanup(&registry, window_id, Some(tree_id));
        });
        info!(
            account = self.account_id,
            parent_window_id, window_id, tree_id, %peer,
            "child tree operator registered"
        );
        Ok(tree_id)
    }

    /// Removes one tree (or, with `None`, the whole window). Pending
    /// requests scoped to the removed surface fail immediately with
    /// `NoWindowConnection`; tree ids return to the pool.
    ///
    /// Deregistering something already gone is a no-op result: the crash
    /// path and explicit deregistration may race.
    pub fn deregister(&self, window_id: WindowId, tree_id: Option<TreeId>) -> BrokerResult<()> {
        let connection = match self.window(window_id) {
            Some(connection) => connection,
            None => return Err(ErrorKind::NoWindowConnection),
        };

        match tree_id {
            Some(tree_id) => {
                self.requests.fail_scoped(window_id, Some(tree_id));
                if let Some(operator) = connection.remove_tree(tree_id) {
                    self.watcher.unwatch(operator.peer().id());
                }
                self.pool.lock().unwrap_or_else(|e| e.into_inner()).recycle(tree_id);
                if connection.is_empty() {
                    self.windows.lock().unwrap_or_else(|e| e.into_inner()).remove(&window_id);
                }
                debug!(account = self.account_id, window_id, tree_id, "tree deregistered");
            }
            None => {
                self.teardown_window(window_id, &connection);
                debug!(account = self.account_id, window_id, "window deregistered");
            }
        }
        Ok(())
    }

    fn teardown_window(&self, window_id: WindowId, connection: &Arc<WindowConnection>) {
        self.requests.fail_scoped(window_id, None);
        self.windows.lock().unwrap_or_else(|e| e.into_inner()).remove(&window_id);
        for (tree_id, operator) in connection.drain() {
            self.watcher.unwatch(operator.peer().id());
            if tree_id != ROOT_TREE_ID {
                self.pool.lock().unwrap_or_else(|e| e.into_inner()).recycle(tree_id);
            }
        }
    }

    /// Element the child tree hangs under, for upward traversal.
    pub fn root_parent_id(&self, window_id: WindowId, tree_id: TreeId) -> BrokerResult<ElementId> {
        let connection = self.window(window_id).ok_or(ErrorKind::NoWindowConnection)?;
        connection.root_parent(tree_id).ok_or(ErrorKind::NoWindowConnection)
    }

    /// Checks that `token` matches the grantee recorded for the tree owning
    /// `element_id`.
    pub fn verify_token(
        &self,
        token: u32,
        window_id: WindowId,
        element_id: ElementId,
    ) -> BrokerResult<()> {
        if element_id < 0 {
            return Ok(());
        }
        let tree_id = tree_id_of_element(element_id);
        let connection = self.window(window_id).ok_or(ErrorKind::NoWindowConnection)?;
        match connection.token(tree_id) {
            Some(expected) if expected == token => Ok(()),
            Some(_) => Err(ErrorKind::TokenMismatch),
            None => Err(ErrorKind::NoWindowConnection),
        }
    }

    /// Clears accessibility focus in the window's root surface.
    pub fn clear_focus(&self, window_id: WindowId) -> BrokerResult<()> {
        let connection = self.window(window_id).ok_or(ErrorKind::NoWindowConnection)?;
        let operator = connection.root_operator().ok_or(ErrorKind::NoWindowConnection)?;
        operator.clear_focus();
        Ok(())
    }

    /// Reports a touch outside the window's surface to its root operator.
    pub fn outside_touch(&self, window_id: WindowId) {
        if let Some(operator) = self.window(window_id).and_then(|c| c.root_operator()) {
            operator.outside_touch();
        }
    }

    pub fn window_ids(&self) -> Vec<WindowId> {
        let mut ids: Vec<WindowId> = self
            .windows
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .copied()
            .collect();
        ids.sort_unstable();
        ids
    }

    pub fn free_tree_ids(&self) -> usize {
        self.pool.lock().unwrap_or_else(|e| e.into_inner()).free_count()
    }
}

/// Crash-path cleanup shared by root and child watches. Runs from the death
/// callback; the registry may already be gone at account teardown.
fn crashed_window_cleanup(
    registry: &Weak<ElementOperatorRegistry>,
    window_id: WindowId,
    tree_id: Option<TreeId>,
) {
    if let Some(registry) = registry.upgrade() {
        warn!(account = registry.account_id, window_id, ?tree_id, "element operator peer died");
        // Whichever of crash and explicit deregistration runs second finds
        // nothing and that is fine.
        let _ = registry.deregister(window_id, tree_id);
    }
}
