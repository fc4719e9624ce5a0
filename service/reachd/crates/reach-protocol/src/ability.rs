//! Ability descriptors and connection kinds.

use crate::capability::CapabilitySet;
use crate::event::EventTypeSet;
use serde::{Deserialize, Serialize};

/// Static description of an installed accessibility extension, as resolved
/// from the package registry. Identity is the `bundle_name/ability_name` uri.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbilityDescriptor {
    pub bundle_name: String,
    pub ability_name: String,
    /// Capabilities declared in the package manifest. The granted set of a
    /// live connection is always a subset of this.
    pub static_capabilities: CapabilitySet,
    /// Event types the ability declares interest in.
    pub event_types: EventTypeSet,
    /// Marks abilities whose connections should survive low-memory pressure.
    pub important: bool,
}

impl AbilityDescriptor {
    pub fn new(bundle_name: impl Into<String>, ability_name: impl Into<String>) -> Self {
        AbilityDescriptor {
            bundle_name: bundle_name.into(),
            ability_name: ability_name.into(),
            static_capabilities: CapabilitySet::empty(),
            event_types: EventTypeSet::all(),
            important: false,
        }
    }

    pub fn with_capabilities(mut self, capabilities: CapabilitySet) -> Self {
        self.static_capabilities = capabilities;
        self
    }

    pub fn with_event_types(mut self, event_types: EventTypeSet) -> Self {
        self.event_types = event_types;
        self
    }

    /// The unique key for this ability: `bundle_name/ability_name`.
    pub fn uri(&self) -> String {
        format!("{}/{}", self.bundle_name, self.ability_name)
    }
}

/// What sort of peer sits behind a connection. Behavior differences between
/// kinds are looked up from [`ConnectionKind::traits_of`], never branched on
/// ad hoc.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionKind {
    /// A normal installed accessibility extension.
    #[default]
    Extension,
    /// The UI-test driver: connects without an installed package entry and
    /// is granted its full requested set.
    UiTest,
}

/// Per-kind behavior table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KindTraits {
    /// Grant the requested set verbatim instead of intersecting with the
    /// declared static set.
    pub grant_requested_verbatim: bool,
    /// Treat the connection as important regardless of the descriptor flag.
    pub always_important: bool,
    /// The reconciliation loop owns this connection's lifecycle (it appears
    /// in the installed/enabled bookkeeping).
    pub managed_by_reconciler: bool,
}

impl ConnectionKind {
    pub const fn traits_of(self) -> KindTraits {
        match self {
            ConnectionKind::Extension => KindTraits {
                grant_requested_verbatim: false,
                always_important: false,
                managed_by_reconciler: true,
            },
            ConnectionKind::UiTest => KindTraits {
                grant_requested_verbatim: true,
                always_important: true,
                managed_by_reconciler: false,
            },
        }
    }
}
