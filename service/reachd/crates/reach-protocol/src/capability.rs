//! Capability bits and capability sets.
//!
//! An ability declares a static capability set in its package manifest and
//! requests a subset when it is enabled. The broker grants the intersection;
//! the granted set is immutable for the lifetime of one connection.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{BitAnd, BitOr, Not};

/// A set of capability bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilitySet(u32);

impl CapabilitySet {
    /// Query UI tree contents and window lists.
    pub const RETRIEVE: CapabilitySet = CapabilitySet(0x0001);
    /// Receive touch-exploration guidance events.
    pub const TOUCH_GUIDE: CapabilitySet = CapabilitySet(0x0002);
    /// Observe key events before the focused application sees them.
    pub const KEY_EVENT_OBSERVER: CapabilitySet = CapabilitySet(0x0008);
    /// Control screen zoom.
    pub const ZOOM: CapabilitySet = CapabilitySet(0x0010);
    /// Inject simulated gestures and synthetic key events.
    pub const GESTURE: CapabilitySet = CapabilitySet(0x0020);

    const ALL_BITS: u32 = 0x003b;

    /// The empty set.
    pub const fn empty() -> Self {
        CapabilitySet(0)
    }

    /// Every defined capability.
    pub const fn all() -> Self {
        CapabilitySet(Self::ALL_BITS)
    }

    /// Builds a set from a raw bitmask, dropping undefined bits.
    pub const fn from_bits_truncate(bits: u32) -> Self {
        CapabilitySet(bits & Self::ALL_BITS)
    }

    /// Raw bitmask.
    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// True if every bit of `other` is present in `self`.
    pub const fn contains(self, other: CapabilitySet) -> bool {
        self.0 & other.0 == other.0
    }

    /// True if `self` is a subset of `other`.
    pub const fn is_subset_of(self, other: CapabilitySet) -> bool {
        self.0 & !other.0 == 0
    }

    pub fn insert(&mut self, other: CapabilitySet) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: CapabilitySet) {
        self.0 &= !other.0;
    }

    /// Names of the bits present, in declaration order.
    pub fn names(self) -> Vec<&'static str> {
        const TABLE: &[(CapabilitySet, &str)] = &[
            (CapabilitySet::RETRIEVE, "retrieve"),
            (CapabilitySet::TOUCH_GUIDE, "touch_guide"),
            (CapabilitySet::KEY_EVENT_OBSERVER, "key_event_observer"),
            (CapabilitySet::ZOOM, "zoom"),
            (CapabilitySet::GESTURE, "gesture"),
        ];
        TABLE
            .iter()
            .filter(|(bit, _)| self.contains(*bit))
            .map(|(_, name)| *name)
            .collect()
    }
}

impl BitAnd for CapabilitySet {
    type Output = CapabilitySet;

    fn bitand(self, rhs: Self) -> Self {
        CapabilitySet(self.0 & rhs.0)
    }
}

impl BitOr for CapabilitySet {
    type Output = CapabilitySet;

    fn bitor(self, rhs: Self) -> Self {
        CapabilitySet(self.0 | rhs.0)
    }
}

impl Not for CapabilitySet {
    type Output = CapabilitySet;

    fn not(self) -> Self {
        CapabilitySet(!self.0 & Self::ALL_BITS)
    }
}

impl fmt::Display for CapabilitySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "none");
        }
        write!(f, "{}", self.names().join("|"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intersection_grants_subset() {
        let declared = CapabilitySet::RETRIEVE | CapabilitySet::GESTURE;
        let requested = CapabilitySet::RETRIEVE | CapabilitySet::ZOOM;
        let granted = declared & requested;
        assert_eq!(granted, CapabilitySet::RETRIEVE);
        assert!(granted.is_subset_of(declared));
    }

    #[test]
    fn test_undefined_bits_are_dropped() {
        let set = CapabilitySet::from_bits_truncate(0xffff_ffff);
        assert_eq!(set, CapabilitySet::all());
    }

    #[test]
    fn test_display_joins_names() {
        let set = CapabilitySet::RETRIEVE | CapabilitySet::GESTURE;
        assert_eq!(set.to_string(), "retrieve|gesture");
        assert_eq!(CapabilitySet::empty().to_string(), "none");
    }

    #[test]
    fn test_remove_is_idempotent() {
        let mut set = CapabilitySet::all();
        set.remove(CapabilitySet::ZOOM);
        let snapshot = set;
        set.remove(CapabilitySet::ZOOM);
        assert_eq!(set, snapshot);
        assert!(!set.contains(CapabilitySet::ZOOM));
    }
}
