//! UI element payloads and element-id packing.
//!
//! Element ids are 64-bit values whose high bits identify the UI tree that
//! owns the node. A query addressed to an element in an embedded surface is
//! routed to the child tree's operator purely from the id, without a separate
//! tree argument on the wire.

use crate::{ElementId, TreeId, WindowId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Bit position where the tree id starts inside an element id.
pub const TREE_ID_SHIFT: u32 = 40;

const NODE_MASK: i64 = (1 << TREE_ID_SHIFT) - 1;

/// Extracts the owning tree id from an element id. Returns `0` (root tree)
/// for negative sentinel ids.
pub fn tree_id_of_element(element_id: ElementId) -> TreeId {
    if element_id < 0 {
        return 0;
    }
    ((element_id as u64) >> TREE_ID_SHIFT) as TreeId
}

/// Packs a tree id and a per-tree node id into an element id.
pub fn pack_element_id(tree_id: TreeId, node_id: i64) -> ElementId {
    ((tree_id as i64) << TREE_ID_SHIFT) | (node_id & NODE_MASK)
}

/// Prefetch hint for element queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SearchMode {
    /// Only the addressed node.
    #[default]
    Node,
    /// The node and its direct children.
    Children,
    /// The node's whole subtree.
    Subtree,
}

/// Focus category used when resolving the focused element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FocusKind {
    /// No focus semantics; used where a focus argument is required but
    /// irrelevant to window resolution.
    Invalid,
    /// Input (keyboard) focus.
    Input,
    /// Accessibility focus placed by an extension.
    Accessibility,
}

/// Direction for focus-move search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FocusDirection {
    Up,
    Down,
    Left,
    Right,
    Forward,
    Backward,
}

/// Actions an extension may ask an element to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Click,
    LongClick,
    Focus,
    ClearFocus,
    AccessibilityFocus,
    ClearAccessibilityFocus,
    ScrollForward,
    ScrollBackward,
    SetText,
    Copy,
    Paste,
    Cut,
    Select,
}

/// Introspection payload describing one UI element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ElementInfo {
    pub element_id: ElementId,
    pub window_id: WindowId,
    /// Bundle name of the owning application.
    pub bundle_name: String,
    /// Component class, e.g. "Button".
    pub component_type: String,
    /// Visible text content.
    pub text: String,
    /// Actions the element supports.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<ActionType>,
    pub focusable: bool,
    pub focused: bool,
    /// Parent element id, `None` for a tree root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<ElementId>,
    /// Child element ids in layout order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub child_ids: Vec<ElementId>,
}

/// Free-form key/value arguments attached to an element action, e.g. the
/// replacement text for [`ActionType::SetText`].
pub type ActionArguments = HashMap<String, String>;
