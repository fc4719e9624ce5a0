//! Simulated gestures, synthetic key events and global shortcuts.

use serde::{Deserialize, Serialize};

/// One point of a simulated gesture path, in screen coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GesturePoint {
    pub x: f32,
    pub y: f32,
}

/// A simulated gesture: a polyline swept over a duration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GesturePath {
    pub points: Vec<GesturePoint>,
    pub duration_ms: u64,
}

impl GesturePath {
    /// A gesture needs at least two points and a positive duration.
    pub fn is_valid(&self) -> bool {
        self.points.len() >= 2 && self.duration_ms > 0
    }
}

/// Key press direction for a synthetic key event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyAction {
    Down,
    Up,
}

/// One synthetic key event handed to the input dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyntheticKeyEvent {
    pub key_code: u32,
    pub action: KeyAction,
}

impl SyntheticKeyEvent {
    pub const fn down(key_code: u32) -> Self {
        SyntheticKeyEvent { key_code, action: KeyAction::Down }
    }

    pub const fn up(key_code: u32) -> Self {
        SyntheticKeyEvent { key_code, action: KeyAction::Up }
    }
}

/// Fixed platform shortcuts an extension may trigger without addressing a
/// window. Each maps to a static synthetic key-event sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GlobalAction {
    Back,
    Home,
    Recents,
    Notifications,
    LockScreen,
    TakeScreenshot,
}
