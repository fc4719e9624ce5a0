//! Result codes for broker operations.
//!
//! Every enumerated condition is a first-class result value; callers never
//! see a panic or an opaque transport failure in place of one of these.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result alias used across the broker surface.
pub type BrokerResult<T> = Result<T, ErrorKind>;

/// The error taxonomy of the Reach broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Error)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed caller input.
    #[error("invalid parameter")]
    InvalidParam,

    /// The ability uri is unknown to the package registry.
    #[error("ability is not installed")]
    NotInstalled,

    /// Disable requested for a uri that is not currently enabled.
    #[error("ability is not enabled")]
    NotEnabled,

    /// The requested capability is absent from the static or granted set.
    #[error("capability not granted")]
    NoCapability,

    /// No live ability connection exists for the target uri.
    #[error("no ability connection")]
    NoConnection,

    /// No element operator is registered for the target window/tree.
    #[error("no window connection")]
    NoWindowConnection,

    /// Enable requested for a uri that is already enabled. The existing
    /// entry is left intact.
    #[error("connection already exists")]
    ConnectionExists,

    /// An application re-registered an operator for a window/tree pair that
    /// already has one. The existing registration is left intact.
    #[error("operator already registered")]
    RegisterExist,

    /// The bounded wait for an element-operator response expired.
    #[error("operation timed out")]
    TimedOut,

    /// Pool exhaustion or an unexpected lower-layer failure.
    #[error("operation failed")]
    Failed,

    /// A required collaborator (task queue, downstream manager) is absent.
    #[error("required collaborator unavailable")]
    Unavailable,

    /// The caller token does not match the recorded grantee for the tree.
    #[error("token mismatch")]
    TokenMismatch,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_round_trips_through_json() {
        let kind = ErrorKind::NoWindowConnection;
        let json = serde_json::to_string(&kind).unwrap();
        assert_eq!(json, "\"no_window_connection\"");
        let back: ErrorKind = serde_json::from_str(&json).unwrap();
        assert_eq!(back, kind);
    }

    #[test]
    fn test_error_kind_display_is_lowercase_prose() {
        assert_eq!(ErrorKind::TimedOut.to_string(), "operation timed out");
        assert_eq!(ErrorKind::NoCapability.to_string(), "capability not granted");
    }
}
