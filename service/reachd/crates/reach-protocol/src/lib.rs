//! # Reach Protocol Library
//!
//! Shared types for the Reach accessibility platform. This crate defines the
//! vocabulary spoken between the broker daemon (`reachd`), accessibility
//! extensions, and the applications whose UI trees they introspect:
//!
//! - **Identifiers**: account, window, tree, element and request ids, and the
//!   packing scheme that embeds a tree id inside a 64-bit element id
//! - **Capabilities**: the permission bits an extension must be granted
//!   before the corresponding command is allowed
//! - **Events**: accessibility event types and the per-connection interest
//!   masks used to filter delivery
//! - **Element / window info**: the introspection result payloads
//! - **Actions**: element actions, simulated gestures and global shortcuts
//! - **Errors**: the result codes every broker operation resolves to
//!
//! Everything here is plain data. Behavior lives in `reachd`.

pub mod ability;
pub mod capability;
pub mod element;
pub mod error;
pub mod event;
pub mod gesture;
pub mod window;

pub use ability::{AbilityDescriptor, ConnectionKind};
pub use capability::CapabilitySet;
pub use element::{
    pack_element_id, tree_id_of_element, ActionArguments, ActionType, ElementInfo, FocusDirection,
    FocusKind, SearchMode,
};
pub use error::{BrokerResult, ErrorKind};
pub use event::{AccessibilityEvent, EventTypeSet};
pub use gesture::{GesturePath, GesturePoint, GlobalAction, KeyAction, SyntheticKeyEvent};
pub use window::{Rect, WindowInfo, WindowKind};

/// OS-level user account identifier.
pub type AccountId = i32;

/// Window identifier assigned by the window manager.
pub type WindowId = i32;

/// Display identifier.
pub type DisplayId = u64;

/// Tree identifier for a (possibly nested) UI surface within a window.
///
/// Valid ids are in `[1, TREE_ID_MAX]`; `0` marks "the root tree".
pub type TreeId = i32;

/// 64-bit element identifier. Bits `40..53` carry the owning tree id, the
/// low 40 bits the node id within that tree.
pub type ElementId = i64;

/// Correlation id for one in-flight element-operator request.
pub type RequestId = i32;

/// Per-account monotonically assigned id of one ability connection.
pub type ConnectionId = i32;

/// Element id value meaning "the root element of the target window".
pub const ROOT_ELEMENT_ID: ElementId = -1;

/// Window id value meaning "the currently active window".
pub const ACTIVE_WINDOW_ID: WindowId = -1;

/// Upper bound of the tree id pool (inclusive).
pub const TREE_ID_MAX: TreeId = 8191;
