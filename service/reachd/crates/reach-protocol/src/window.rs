//! Window metadata as consumed from the window/display provider.

use crate::{DisplayId, WindowId};
use serde::{Deserialize, Serialize};

/// Window category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowKind {
    Application,
    System,
}

/// Integer rectangle in screen coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

/// Read-only description of one window, as reported by the window provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowInfo {
    pub window_id: WindowId,
    /// Id of the inner surface for composite/embedded windows; equals
    /// `window_id` for plain windows.
    pub inner_window_id: WindowId,
    pub display_id: DisplayId,
    pub kind: WindowKind,
    pub focused: bool,
    pub active: bool,
    pub bounds: Rect,
}

impl WindowInfo {
    pub fn application(window_id: WindowId, display_id: DisplayId) -> Self {
        WindowInfo {
            window_id,
            inner_window_id: window_id,
            display_id,
            kind: WindowKind::Application,
            focused: false,
            active: false,
            bounds: Rect::default(),
        }
    }
}
