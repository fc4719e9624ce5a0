//! Per-account ability bookkeeping.
//!
//! Owns the installed / enabled / connecting / connected / waiting-
//! disconnect sets behind one short-held lock, plus the death watcher for
//! ability command proxies. The reconciliation pass in `broker` is the only
//! writer of connection membership; everything here is mechanical set
//! maintenance that upholds the uri-uniqueness invariant: at most one
//! non-disconnected connection per uri.

use crate::connection::AbilityConnection;
use crate::peers::PeerWatcher;
use reach_protocol::{
    AbilityDescriptor, AccountId, BrokerResult, CapabilitySet, ErrorKind,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::debug;

#[derive(Default)]
struct Sets {
    installed: Vec<AbilityDescriptor>,
    /// uri -> capabilities requested at enable time.
    enabled: HashMap<String, CapabilitySet>,
    connecting: HashMap<String, Arc<AbilityConnection>>,
    connected: HashMap<String, Arc<AbilityConnection>>,
    wait_disconnect: HashMap<String, Arc<AbilityConnection>>,
}

/// Registry of one account's abilities and their connections.
pub struct AbilityRegistry {
    account_id: AccountId,
    watcher: PeerWatcher,
    sets: Mutex<Sets>,
}

/// Snapshot of set sizes for the dump surface.
#[derive(Debug, Clone, Default)]
pub struct AbilityCounts {
    pub installed: usize,
    pub enabled: usize,
    pub connecting: usize,
    pub connected: usize,
    pub wait_disconnect: usize,
}

impl AbilityRegistry {
    pub fn new(account_id: AccountId) -> Self {
        AbilityRegistry {
            account_id,
            watcher: PeerWatcher::new(),
            sets: Mutex::new(Sets::default()),
        }
    }

    pub fn watcher(&self) -> &PeerWatcher {
        &self.watcher
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Sets> {
        self.sets.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ---- installed -------------------------------------------------------

    pub fn set_installed(&self, descriptors: Vec<AbilityDescriptor>) {
        debug!(account = self.account_id, count = descriptors.len(), "installed abilities updated");
        self.lock().installed = descriptors;
    }

    pub fn installed(&self) -> Vec<AbilityDescriptor> {
        self.lock().installed.clone()
    }

    pub fn descriptor(&self, uri: &str) -> Option<AbilityDescriptor> {
        self.lock().installed.iter().find(|d| d.uri() == uri).cloned()
    }

    /// Drops installed descriptors of `bundle_name`, returning their uris.
    pub fn remove_installed_bundle(&self, bundle_name: &str) -> Vec<String> {
        let mut sets = self.lock();
        let removed: Vec<String> = sets
            .installed
            .iter()
            .filter(|d| d.bundle_name == bundle_name)
            .map(|d| d.uri())
            .collect();
        sets.installed.retain(|d| d.bundle_name != bundle_name);
        removed
    }

    // ---- enabled ---------------------------------------------------------

    pub fn add_enabled(&self, uri: &str, requested: CapabilitySet) -> BrokerResult<()> {
        let mut sets = self.lock();
        if sets.enabled.contains_key(uri) {
            return Err(ErrorKind::ConnectionExists);
        }
        sets.enabled.insert(uri.to_string(), requested);
        Ok(())
    }

    pub fn remove_enabled(&self, uri: &str) -> BrokerResult<()> {
        match self.lock().enabled.remove(uri) {
            Some(_) => Ok(()),
            None => Err(ErrorKind::NotEnabled),
        }
    }

    pub fn is_enabled(&self, uri: &str) -> bool {
        self.lock().enabled.contains_key(uri)
    }

    pub fn requested_for(&self, uri: &str) -> Option<CapabilitySet> {
        self.lock().enabled.get(uri).copied()
    }

    pub fn enabled_uris(&self) -> Vec<String> {
        let mut uris: Vec<String> = self.lock().enabled.keys().cloned().collect();
        uris.sort();
        uris
    }

    // ---- connecting ------------------------------------------------------

    pub fn add_connecting(&self, connection: Arc<AbilityConnection>) {
        self.lock().connecting.insert(connection.uri(), connection);
    }

    pub fn remove_connecting(&self, uri: &str) -> Option<Arc<AbilityConnection>> {
        self.lock().connecting.remove(uri)
    }

    pub fn is_connecting(&self, uri: &str) -> bool {
        self.lock().connecting.contains_key(uri)
    }

    pub fn connecting_connection(&self, uri: &str) -> Option<Arc<AbilityConnection>> {
        self.lock().connecting.get(uri).cloned()
    }

    // ---- connected -------------------------------------------------------

    pub fn add_connected(&self, connection: Arc<AbilityConnection>) {
        self.lock().connected.insert(connection.uri(), connection);
    }

    pub fn is_connected(&self, uri: &str) -> bool {
        self.lock().connected.contains_key(uri)
    }

    pub fn connected_connection(&self, uri: &str) -> Option<Arc<AbilityConnection>> {
        self.lock().connected.get(uri).cloned()
    }

    pub fn connected_connections(&self) -> Vec<Arc<AbilityConnection>> {
        self.lock().connected.values().cloned().collect()
    }

    pub fn connecting_connections(&self) -> Vec<Arc<AbilityConnection>> {
        self.lock().connecting.values().cloned().collect()
    }

    pub fn wait_disconnect_connections(&self) -> Vec<Arc<AbilityConnection>> {
        self.lock().wait_disconnect.values().cloned().collect()
    }

    /// Moves `uri` from connecting to connected in one critical section.
    pub fn promote_connecting(&self, uri: &str) -> Option<Arc<AbilityConnection>> {
        let mut sets = self.lock();
        let connection = sets.connecting.remove(uri)?;
        sets.connected.insert(uri.to_string(), connection.clone());
        Some(connection)
    }

    /// Moves `uri` from connected into the waiting-disconnect holding set.
    pub fn park_for_disconnect(&self, uri: &str) -> Option<Arc<AbilityConnection>> {
        let mut sets = self.lock();
        let connection = sets.connected.remove(uri)?;
        sets.wait_disconnect.insert(uri.to_string(), connection.clone());
        Some(connection)
    }

    /// Cancels a pending disconnect, moving `uri` back to connected.
    pub fn unpark_to_connected(&self, uri: &str) -> Option<Arc<AbilityConnection>> {
        let mut sets = self.lock();
        let connection = sets.wait_disconnect.remove(uri)?;
        sets.connected.insert(uri.to_string(), connection.clone());
        Some(connection)
    }

    pub fn remove_wait_disconnect(&self, uri: &str) -> Option<Arc<AbilityConnection>> {
        self.lock().wait_disconnect.remove(uri)
    }

    pub fn is_waiting_disconnect(&self, uri: &str) -> bool {
        self.lock().wait_disconnect.contains_key(uri)
    }

    /// Removes `uri` from every connection set (crash cleanup). Only drops
    /// entries that still point at `connection`, so a crash notification
    /// racing a replacement leaves the replacement alone.
    pub fn remove_everywhere(&self, uri: &str, connection: &Arc<AbilityConnection>) {
        let mut sets = self.lock();
        let sets = &mut *sets;
        for map in [&mut sets.connecting, &mut sets.connected, &mut sets.wait_disconnect] {
            if map.get(uri).is_some_and(|held| Arc::ptr_eq(held, connection)) {
                map.remove(uri);
            }
        }
    }

    /// Union of the granted capabilities of every connected ability.
    pub fn aggregate_capabilities(&self) -> CapabilitySet {
        self.lock()
            .connected
            .values()
            .fold(CapabilitySet::empty(), |acc, conn| acc | conn.granted())
    }

    pub fn counts(&self) -> AbilityCounts {
        let sets = self.lock();
        AbilityCounts {
            installed: sets.installed.len(),
            enabled: sets.enabled.len(),
            connecting: sets.connecting.len(),
            connected: sets.connected.len(),
            wait_disconnect: sets.wait_disconnect.len(),
        }
    }

    /// True when no connection object for `uri` is live in any set —
    /// the uri-uniqueness precondition for creating a new one.
    pub fn has_no_live_connection(&self, uri: &str) -> bool {
        let sets = self.lock();
        !sets.connecting.contains_key(uri)
            && !sets.connected.contains_key(uri)
            && !sets.wait_disconnect.contains_key(uri)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reach_protocol::ConnectionKind;

    fn connection(uri_suffix: &str) -> Arc<AbilityConnection> {
        let descriptor = AbilityDescriptor::new("com.example", uri_suffix)
            .with_capabilities(CapabilitySet::RETRIEVE);
        AbilityConnection::new(1, ConnectionKind::Extension, descriptor, CapabilitySet::RETRIEVE, 100)
            .unwrap()
    }

    #[tokio::test]
    async fn test_enable_twice_reports_existing_entry() {
        let registry = AbilityRegistry::new(100);
        registry.add_enabled("com.example/A", CapabilitySet::RETRIEVE).unwrap();
        assert_eq!(
            registry.add_enabled("com.example/A", CapabilitySet::RETRIEVE),
            Err(ErrorKind::ConnectionExists)
        );
        // The original entry survives.
        assert!(registry.is_enabled("com.example/A"));
    }

    #[tokio::test]
    async fn test_disable_unknown_reports_not_enabled() {
        let registry = AbilityRegistry::new(100);
        assert_eq!(registry.remove_enabled("missing/uri"), Err(ErrorKind::NotEnabled));
    }

    #[tokio::test]
    async fn test_promote_and_park_keep_uri_unique() {
        let registry = AbilityRegistry::new(100);
        let conn = connection("A");
        let uri = conn.uri();
        registry.add_connecting(conn.clone());
        assert!(!registry.has_no_live_connection(&uri));

        registry.promote_connecting(&uri).unwrap();
        assert!(registry.is_connected(&uri));
        assert!(!registry.is_connecting(&uri));

        registry.park_for_disconnect(&uri).unwrap();
        assert!(registry.is_waiting_disconnect(&uri));
        assert!(!registry.is_connected(&uri));

        registry.unpark_to_connected(&uri).unwrap();
        assert!(registry.is_connected(&uri));
        assert!(!registry.is_waiting_disconnect(&uri));
    }

    #[tokio::test]
    async fn test_remove_everywhere_spares_replacement() {
        let registry = AbilityRegistry::new(100);
        let old = connection("A");
        let replacement = connection("A");
        registry.add_connected(replacement.clone());
        registry.remove_everywhere(&old.uri(), &old);
        assert!(registry.is_connected(&old.uri()));
    }

    #[tokio::test]
    async fn test_aggregate_capabilities_unions_connected() {
        let registry = AbilityRegistry::new(100);
        let a = AbilityConnection::new(
            1,
            ConnectionKind::Extension,
            AbilityDescriptor::new("com.example", "A")
                .with_capabilities(CapabilitySet::RETRIEVE),
            CapabilitySet::RETRIEVE,
            100,
        )
        .unwrap();
        let b = AbilityConnection::new(
            2,
            ConnectionKind::Extension,
            AbilityDescriptor::new("com.example", "B")
                .with_capabilities(CapabilitySet::GESTURE | CapabilitySet::TOUCH_GUIDE),
            CapabilitySet::GESTURE | CapabilitySet::TOUCH_GUIDE,
            100,
        )
        .unwrap();
        registry.add_connected(a);
        registry.add_connected(b);
        assert_eq!(
            registry.aggregate_capabilities(),
            CapabilitySet::RETRIEVE | CapabilitySet::GESTURE | CapabilitySet::TOUCH_GUIDE
        );
    }
}
