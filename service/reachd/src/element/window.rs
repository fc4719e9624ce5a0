//! Per-window operator bookkeeping.
//!
//! One [`WindowConnection`] exists per registered window. Tree id `0` holds
//! the root operator; child trees (embedded surfaces) hang off allocated
//! ids, each with the token of the application that registered it and the
//! parent element the tree is mounted under.

use crate::platform::ElementOperator;
use reach_protocol::{ElementId, TreeId, WindowId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Tree id of the root operator within a window.
pub const ROOT_TREE_ID: TreeId = 0;

#[derive(Default)]
struct WindowTrees {
    operators: HashMap<TreeId, Arc<dyn ElementOperator>>,
    tokens: HashMap<TreeId, u32>,
    root_parents: HashMap<TreeId, ElementId>,
    /// (parent tree, mount node) -> child tree, for duplicate detection and
    /// upward traversal.
    children: HashMap<(TreeId, ElementId), TreeId>,
}

/// Operator handles registered for one window.
pub struct WindowConnection {
    window_id: WindowId,
    trees: Mutex<WindowTrees>,
}

impl WindowConnection {
    pub fn new(window_id: WindowId, token: u32, root: Arc<dyn ElementOperator>) -> Self {
        let mut trees = WindowTrees::default();
        trees.operators.insert(ROOT_TREE_ID, root);
        trees.tokens.insert(ROOT_TREE_ID, token);
        WindowConnection { window_id, trees: Mutex::new(trees) }
    }

    /// A window entry created by a child-tree registration before (or
    /// without) a root operator for that window.
    pub fn empty(window_id: WindowId) -> Self {
        WindowConnection { window_id, trees: Mutex::new(WindowTrees::default()) }
    }

    pub fn window_id(&self) -> WindowId {
        self.window_id
    }

    pub fn operator(&self, tree_id: TreeId) -> Option<Arc<dyn ElementOperator>> {
        self.trees.lock().unwrap_or_else(|e| e.into_inner()).operators.get(&tree_id).cloned()
    }

    pub fn root_operator(&self) -> Option<Arc<dyn ElementOperator>> {
        self.operator(ROOT_TREE_ID)
    }

    /// Installs a child tree operator. Returns `false` when the slot is
    /// already occupied.
    pub fn set_tree_operator(
        &self,
        tree_id: TreeId,
        operator: Arc<dyn ElementOperator>,
        token: u32,
        root_parent: ElementId,
    ) -> bool {
        let mut trees = self.trees.lock().unwrap_or_else(|e| e.into_inner());
        if trees.operators.contains_key(&tree_id) {
            return false;
        }
        trees.operators.insert(tree_id, operator);
        trees.tokens.insert(tree_id, token);
        trees.root_parents.insert(tree_id, root_parent);
        true
    }

    /// Records the (parent tree, mount node) -> child tree link. Returns the
    /// previously linked child when the mount point is already taken.
    pub fn link_child(
        &self,
        parent_tree: TreeId,
        node_id: ElementId,
        child_tree: TreeId,
    ) -> Option<TreeId> {
        let mut trees = self.trees.lock().unwrap_or_else(|e| e.into_inner());
        match trees.children.get(&(parent_tree, node_id)) {
            Some(existing) => Some(*existing),
            None => {
                trees.children.insert((parent_tree, node_id), child_tree);
                None
            }
        }
    }

    /// Removes one tree. Returns the removed operator, if any.
    pub fn remove_tree(&self, tree_id: TreeId) -> Option<Arc<dyn ElementOperator>> {
        let mut trees = self.trees.lock().unwrap_or_else(|e| e.into_inner());
        trees.tokens.remove(&tree_id);
        trees.root_parents.remove(&tree_id);
        trees.children.retain(|_, child| *child != tree_id);
        trees.operators.remove(&tree_id)
    }

    /// Removes every tree, returning the operators for watch teardown.
    pub fn drain(&self) -> Vec<(TreeId, Arc<dyn ElementOperator>)> {
        let mut trees = self.trees.lock().unwrap_or_else(|e| e.into_inner());
        trees.tokens.clear();
        trees.root_parents.clear();
        trees.children.clear();
        trees.operators.drain().collect()
    }

    pub fn token(&self, tree_id: TreeId) -> Option<u32> {
        self.trees.lock().unwrap_or_else(|e| e.into_inner()).tokens.get(&tree_id).copied()
    }

    /// Element the child tree is mounted under, for upward traversal.
    pub fn root_parent(&self, tree_id: TreeId) -> Option<ElementId> {
        self.trees.lock().unwrap_or_else(|e| e.into_inner()).root_parents.get(&tree_id).copied()
    }

    pub fn tree_ids(&self) -> Vec<TreeId> {
        let mut ids: Vec<TreeId> = self
            .trees
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .operators
            .keys()
            .copied()
            .collect();
        ids.sort_unstable();
        ids
    }

    pub fn is_empty(&self) -> bool {
        self.trees.lock().unwrap_or_else(|e| e.into_inner()).operators.is_empty()
    }
}
