//! Accessibility events and per-connection interest masks.

use crate::{ElementId, WindowId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{BitAnd, BitOr};

/// A set of accessibility event types, used both to tag an event and as a
/// connection's delivery-interest mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventTypeSet(u32);

impl EventTypeSet {
    pub const VIEW_CLICKED: EventTypeSet = EventTypeSet(0x0000_0001);
    pub const VIEW_LONG_CLICKED: EventTypeSet = EventTypeSet(0x0000_0002);
    pub const VIEW_FOCUSED: EventTypeSet = EventTypeSet(0x0000_0004);
    pub const VIEW_TEXT_CHANGED: EventTypeSet = EventTypeSet(0x0000_0008);
    pub const PAGE_STATE_UPDATE: EventTypeSet = EventTypeSet(0x0000_0010);
    pub const PAGE_CONTENT_UPDATE: EventTypeSet = EventTypeSet(0x0000_0020);
    pub const VIEW_SCROLLED: EventTypeSet = EventTypeSet(0x0000_0040);
    pub const VIEW_SELECTED: EventTypeSet = EventTypeSet(0x0000_0080);
    pub const VIEW_HOVER_ENTER: EventTypeSet = EventTypeSet(0x0000_0100);
    pub const VIEW_HOVER_EXIT: EventTypeSet = EventTypeSet(0x0000_0200);
    pub const TOUCH_GUIDE_BEGIN: EventTypeSet = EventTypeSet(0x0000_0400);
    pub const TOUCH_GUIDE_END: EventTypeSet = EventTypeSet(0x0000_0800);
    pub const TOUCH_BEGIN: EventTypeSet = EventTypeSet(0x0000_1000);
    pub const TOUCH_END: EventTypeSet = EventTypeSet(0x0000_2000);
    pub const WINDOW_UPDATE: EventTypeSet = EventTypeSet(0x0000_4000);
    pub const ACCESSIBILITY_FOCUSED: EventTypeSet = EventTypeSet(0x0000_8000);

    pub const fn empty() -> Self {
        EventTypeSet(0)
    }

    pub const fn all() -> Self {
        EventTypeSet(0x0000_ffff)
    }

    pub const fn from_bits_truncate(bits: u32) -> Self {
        EventTypeSet(bits & Self::all().0)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn intersects(self, other: EventTypeSet) -> bool {
        self.0 & other.0 != 0
    }
}

impl BitAnd for EventTypeSet {
    type Output = EventTypeSet;

    fn bitand(self, rhs: Self) -> Self {
        EventTypeSet(self.0 & rhs.0)
    }
}

impl BitOr for EventTypeSet {
    type Output = EventTypeSet;

    fn bitor(self, rhs: Self) -> Self {
        EventTypeSet(self.0 | rhs.0)
    }
}

impl fmt::Display for EventTypeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// One accessibility event submitted by an application and fanned out to
/// interested connected abilities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessibilityEvent {
    /// Exactly one bit of the event-type space.
    pub event_type: EventTypeSet,
    /// Window the event originated in.
    pub window_id: WindowId,
    /// Source element, if any.
    pub element_id: Option<ElementId>,
    /// Bundle name of the emitting application.
    pub bundle_name: String,
    /// Free-form event payload (changed text, page id, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl AccessibilityEvent {
    pub fn new(event_type: EventTypeSet, window_id: WindowId, bundle_name: impl Into<String>) -> Self {
        AccessibilityEvent {
            event_type,
            window_id,
            element_id: None,
            bundle_name: bundle_name.into(),
            description: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interest_mask_filters_delivery() {
        let mask = EventTypeSet::VIEW_CLICKED | EventTypeSet::WINDOW_UPDATE;
        assert!(mask.intersects(EventTypeSet::VIEW_CLICKED));
        assert!(!mask.intersects(EventTypeSet::TOUCH_BEGIN));
    }

    #[test]
    fn test_all_covers_every_declared_type() {
        assert!(EventTypeSet::all().intersects(EventTypeSet::ACCESSIBILITY_FOCUSED));
        assert_eq!(EventTypeSet::from_bits_truncate(u32::MAX), EventTypeSet::all());
    }
}
