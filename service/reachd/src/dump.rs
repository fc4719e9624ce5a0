//! Read-only text dump of broker state.
//!
//! Exposes registry contents for the `reachd dump` command and operator
//! debugging; nothing here mutates state.

use crate::account::AccountSession;
use reach_protocol::AccountId;
use std::fmt::Write as _;
use std::sync::Arc;

/// Renders every session's registries into a human-readable report.
pub fn render(sessions: &[Arc<AccountSession>], current: Option<AccountId>) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "reach broker state");
    let _ = writeln!(
        out,
        "current account: {}",
        current.map_or_else(|| "none".to_string(), |id| id.to_string())
    );

    for session in sessions {
        let marker = if current == Some(session.account_id()) { " (current)" } else { "" };
        let _ = writeln!(out, "\naccount {}{marker}", session.account_id());

        let flags = session.state_flags();
        let _ = writeln!(
            out,
            "  state: enabled={} touch_guide={} key_event_observer={} gesture={}",
            flags.enabled, flags.touch_guide, flags.key_event_observer, flags.gesture
        );

        let counts = session.abilities().counts();
        let _ = writeln!(
            out,
            "  abilities: installed={} enabled={} connecting={} connected={} wait_disconnect={}",
            counts.installed,
            counts.enabled,
            counts.connecting,
            counts.connected,
            counts.wait_disconnect
        );
        for uri in session.abilities().enabled_uris() {
            let _ = writeln!(out, "    enabled: {uri}");
        }
        for connection in session.abilities().connecting_connections() {
            let _ = writeln!(out, "    connecting: {} (id {})", connection.uri(), connection.id());
        }
        let mut connected = session.abilities().connected_connections();
        connected.sort_by_key(|c| c.id());
        for connection in connected {
            let _ = writeln!(
                out,
                "    connected: {} (id {}, granted {})",
                connection.uri(),
                connection.id(),
                connection.granted()
            );
        }
        for connection in session.abilities().wait_disconnect_connections() {
            let _ = writeln!(out, "    waiting disconnect: {}", connection.uri());
        }

        let elements = session.elements();
        let _ = writeln!(
            out,
            "  windows: {} registered, {} tree ids free, {} requests pending",
            elements.window_ids().len(),
            elements.free_tree_ids(),
            elements.requests().pending_count()
        );
        for window_id in elements.window_ids() {
            if let Some(window) = elements.window(window_id) {
                let trees: Vec<String> =
                    window.tree_ids().iter().map(|id| id.to_string()).collect();
                let _ = writeln!(out, "    window {window_id}: trees [{}]", trees.join(", "));
            }
        }
    }
    out
}
