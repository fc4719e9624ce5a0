//! One account's session: ability registry, element operator registry,
//! persisted settings and the derived accessibility state flags.

use crate::account::abilities::AbilityRegistry;
use crate::element::ElementOperatorRegistry;
use reach_config::{keys, SettingsStore};
use reach_protocol::{AccountId, CapabilitySet};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// Aggregated capability flags over the account's connected abilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StateFlags {
    /// Some ability is connected.
    pub enabled: bool,
    /// Some connected ability was granted touch exploration.
    pub touch_guide: bool,
    /// Some connected ability observes key events.
    pub key_event_observer: bool,
    /// Some connected ability may inject gestures.
    pub gesture: bool,
}

impl StateFlags {
    fn from_capabilities(connected_any: bool, caps: CapabilitySet) -> Self {
        StateFlags {
            enabled: connected_any,
            touch_guide: caps.contains(CapabilitySet::TOUCH_GUIDE),
            key_event_observer: caps.contains(CapabilitySet::KEY_EVENT_OBSERVER),
            gesture: caps.contains(CapabilitySet::GESTURE),
        }
    }
}

/// Per-account composition of registries and settings.
pub struct AccountSession {
    account_id: AccountId,
    settings: Arc<dyn SettingsStore>,
    abilities: AbilityRegistry,
    elements: Arc<ElementOperatorRegistry>,
    state: Mutex<StateFlags>,
}

impl AccountSession {
    pub fn new(
        account_id: AccountId,
        settings: Arc<dyn SettingsStore>,
        tree_id_capacity: i32,
    ) -> Arc<Self> {
        info!(account = account_id, "creating account session");
        Arc::new(AccountSession {
            account_id,
            settings,
            abilities: AbilityRegistry::new(account_id),
            elements: ElementOperatorRegistry::new(account_id, tree_id_capacity),
            state: Mutex::new(StateFlags::default()),
        })
    }

    pub fn account_id(&self) -> AccountId {
        self.account_id
    }

    pub fn settings(&self) -> &Arc<dyn SettingsStore> {
        &self.settings
    }

    pub fn abilities(&self) -> &AbilityRegistry {
        &self.abilities
    }

    pub fn elements(&self) -> &Arc<ElementOperatorRegistry> {
        &self.elements
    }

    pub fn state_flags(&self) -> StateFlags {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Recomputes the derived flags from the connected set. Returns the new
    /// flags when they changed.
    pub fn refresh_state_flags(&self) -> Option<StateFlags> {
        let counts = self.abilities.counts();
        let caps = self.abilities.aggregate_capabilities();
        let next = StateFlags::from_capabilities(counts.connected > 0, caps);

        let changed = {
            let mut current = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        };
        if !changed {
            return None;
        }
        debug!(account = self.account_id, ?next, "accessibility state changed");
        if let Err(err) = self.settings.put_bool(keys::ACCESSIBILITY_ENABLED, next.enabled) {
            tracing::warn!(account = self.account_id, error = %err, "failed to persist accessibility state");
        }
        Some(next)
    }

    /// Restores the enabled set from persisted settings. Requested
    /// capabilities are not persisted; a restored ability is re-enabled with
    /// its full declared set.
    pub fn load_enabled_from_settings(&self) {
        for uri in self.settings.get_string_list(keys::ENABLED_ABILITIES) {
            let Some(descriptor) = self.abilities.descriptor(&uri) else {
                debug!(account = self.account_id, uri, "persisted ability no longer installed");
                continue;
            };
            if self
                .abilities
                .add_enabled(&uri, descriptor.static_capabilities)
                .is_ok()
            {
                debug!(account = self.account_id, uri, "restored enabled ability");
            }
        }
    }

    /// Writes the current enabled set back to the settings store.
    pub fn persist_enabled(&self) {
        let uris = self.abilities.enabled_uris();
        if let Err(err) = self.settings.put_string_list(keys::ENABLED_ABILITIES, uris) {
            tracing::warn!(account = self.account_id, error = %err, "failed to persist enabled abilities");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reach_config::MemorySettings;
    use reach_protocol::{AbilityDescriptor, ConnectionKind};

    #[tokio::test]
    async fn test_flags_follow_connected_capabilities() {
        let session = AccountSession::new(100, MemorySettings::new(), 16);
        assert_eq!(session.state_flags(), StateFlags::default());

        let descriptor = AbilityDescriptor::new("com.example", "Reader")
            .with_capabilities(CapabilitySet::RETRIEVE | CapabilitySet::TOUCH_GUIDE);
        let conn = crate::connection::AbilityConnection::new(
            1,
            ConnectionKind::Extension,
            descriptor,
            CapabilitySet::RETRIEVE | CapabilitySet::TOUCH_GUIDE,
            100,
        )
        .unwrap();
        session.abilities().add_connected(conn);

        let flags = session.refresh_state_flags().unwrap();
        assert!(flags.enabled);
        assert!(flags.touch_guide);
        assert!(!flags.gesture);
        // Persisted for observers of the settings store.
        assert!(session.settings().get_bool(keys::ACCESSIBILITY_ENABLED, false));

        // No change, no notification.
        assert!(session.refresh_state_flags().is_none());
    }

    #[tokio::test]
    async fn test_enabled_set_round_trips_through_settings() {
        let settings = MemorySettings::new();
        let session = AccountSession::new(100, settings.clone(), 16);
        session.abilities().set_installed(vec![AbilityDescriptor::new("com.example", "Reader")
            .with_capabilities(CapabilitySet::RETRIEVE)]);
        session
            .abilities()
            .add_enabled("com.example/Reader", CapabilitySet::RETRIEVE)
            .unwrap();
        session.persist_enabled();

        let restored = AccountSession::new(100, settings, 16);
        restored.abilities().set_installed(vec![AbilityDescriptor::new("com.example", "Reader")
            .with_capabilities(CapabilitySet::RETRIEVE)]);
        restored.load_enabled_from_settings();
        assert!(restored.abilities().is_enabled("com.example/Reader"));
    }
}
