//! Correlation of in-flight element-operator requests.
//!
//! Every introspection call forwarded to an application carries a generated
//! request id; the application answers through an [`OperatorCallback`] that
//! resolves the id back to the waiting caller. Entries leave the table on
//! response delivery, on deregistration of the owning window/tree, or when
//! the timed-out caller sweeps its own id.

use reach_protocol::{BrokerResult, ElementInfo, ErrorKind, RequestId, TreeId, WindowId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use tracing::{debug, trace};

const REQUEST_ID_MIN: RequestId = 1;
const REQUEST_ID_MAX: RequestId = 0xffff;

/// A completed element-operator exchange.
#[derive(Debug, Clone, PartialEq)]
pub enum OperatorResponse {
    /// Result of a search/query returning zero or more elements.
    Elements(Vec<ElementInfo>),
    /// Result of a focused-element or focus-move lookup.
    Element(ElementInfo),
    /// Result of an action execution.
    ActionDone(bool),
    /// Result of a cursor-position query.
    Cursor(i32),
}

struct PendingRequest {
    window_id: WindowId,
    tree_id: TreeId,
    responder: oneshot::Sender<BrokerResult<OperatorResponse>>,
}

/// Table of pending requests, shared by the operator registry and the
/// callbacks handed to applications.
pub struct RequestTable {
    next_id: AtomicI32,
    pending: Mutex<HashMap<RequestId, PendingRequest>>,
}

impl RequestTable {
    pub fn new() -> Arc<Self> {
        Arc::new(RequestTable {
            next_id: AtomicI32::new(REQUEST_ID_MIN),
            pending: Mutex::new(HashMap::new()),
        })
    }

    /// Issues the next request id, wrapping within `[1, 0xffff]`.
    pub fn next_request_id(&self) -> RequestId {
        loop {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            if id > REQUEST_ID_MAX {
                // Reset and retry; a brief surplus of resets is harmless.
                self.next_id.store(REQUEST_ID_MIN, Ordering::Relaxed);
                continue;
            }
            return id;
        }
    }

    /// Registers a pending request scoped to `(window_id, tree_id)`.
    pub fn register(
        &self,
        window_id: WindowId,
        tree_id: TreeId,
        responder: oneshot::Sender<BrokerResult<OperatorResponse>>,
    ) -> RequestId {
        let request_id = self.next_request_id();
        self.pending.lock().unwrap_or_else(|e| e.into_inner()).insert(
            request_id,
            PendingRequest { window_id, tree_id, responder },
        );
        trace!(request_id, window_id, tree_id, "registered element request");
        request_id
    }

    /// Delivers a response to the waiting caller. Unknown ids (already
    /// timed out, or swept by a deregistration) are ignored.
    pub fn deliver(&self, request_id: RequestId, response: OperatorResponse) {
        let entry = self.pending.lock().unwrap_or_else(|e| e.into_inner()).remove(&request_id);
        match entry {
            Some(pending) => {
                // The caller may have stopped waiting; the discarded send is
                // the documented late-response path.
                let _ = pending.responder.send(Ok(response));
            }
            None => trace!(request_id, "late or unknown element response dropped"),
        }
    }

    /// Drops one pending entry without answering it. Used by callers that
    /// timed out locally.
    pub fn remove(&self, request_id: RequestId) {
        self.pending.lock().unwrap_or_else(|e| e.into_inner()).remove(&request_id);
    }

    /// Fails every pending request scoped to the window (and tree, when
    /// given). Callers receive `NoWindowConnection` immediately instead of
    /// waiting out their timeout.
    pub fn fail_scoped(&self, window_id: WindowId, tree_id: Option<TreeId>) {
        let drained: Vec<PendingRequest> = {
            let mut guard = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            let matching: Vec<RequestId> = guard
                .iter()
                .filter(|(_, pending)| {
                    pending.window_id == window_id
                        && tree_id.map_or(true, |tree| pending.tree_id == tree)
                })
                .map(|(id, _)| *id)
                .collect();
            matching.into_iter().filter_map(|id| guard.remove(&id)).collect()
        };
        if !drained.is_empty() {
            debug!(window_id, ?tree_id, count = drained.len(), "failing pending element requests");
        }
        for pending in drained {
            let _ = pending.responder.send(Err(ErrorKind::NoWindowConnection));
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// Response handle given to an element operator alongside each request.
///
/// Cloneable and cheap; the application calls exactly one `set_*` method
/// per request id.
#[derive(Clone)]
pub struct OperatorCallback {
    requests: Arc<RequestTable>,
}

impl OperatorCallback {
    pub fn new(requests: Arc<RequestTable>) -> Self {
        OperatorCallback { requests }
    }

    pub fn set_search_result(&self, request_id: RequestId, elements: Vec<ElementInfo>) {
        self.requests.deliver(request_id, OperatorResponse::Elements(elements));
    }

    pub fn set_find_focus_result(&self, request_id: RequestId, element: ElementInfo) {
        self.requests.deliver(request_id, OperatorResponse::Element(element));
    }

    pub fn set_execute_action_result(&self, request_id: RequestId, succeeded: bool) {
        self.requests.deliver(request_id, OperatorResponse::ActionDone(succeeded));
    }

    pub fn set_cursor_position_result(&self, request_id: RequestId, position: i32) {
        self.requests.deliver(request_id, OperatorResponse::Cursor(position));
    }
}
