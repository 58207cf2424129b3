//! Explicit `connection_handle -> context` registries (§9 design note),
//! replacing the source's file-scope `rrsp_pool`/`rreq_pool` arrays.
//!
//! Grounded in the same `Mutex<HashMap<..>>` shape the teacher uses for its
//! transaction tracker: one lock guarding a small map, looked up by a
//! connection-scoped key on every GATT callback.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::rreq::RreqContext;
use crate::rrsp::RrspContext;
use crate::types::ConnectionId;

/// A registry mapping live connections to their per-role context. One
/// instance is created per role the application plays (server, client, or
/// both for a dual-role device).
pub struct ConnectionRegistry<T> {
    contexts: Mutex<HashMap<ConnectionId, Arc<T>>>,
}

impl<T> Default for ConnectionRegistry<T> {
    fn default() -> Self {
        ConnectionRegistry { contexts: Mutex::new(HashMap::new()) }
    }
}

impl<T> ConnectionRegistry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called from `on_connected` once the role's context has been created.
    pub fn insert(&self, conn: ConnectionId, context: Arc<T>) {
        self.contexts.lock().expect("registry mutex poisoned").insert(conn, context);
    }

    pub fn get(&self, conn: ConnectionId) -> Option<Arc<T>> {
        self.contexts.lock().expect("registry mutex poisoned").get(&conn).cloned()
    }

    /// Called from `on_disconnected`; the caller is responsible for any
    /// additional teardown (releasing pool buffers, cancelling timers,
    /// which happen as a side effect of the context's task/struct dropping).
    pub fn remove(&self, conn: ConnectionId) -> Option<Arc<T>> {
        self.contexts.lock().expect("registry mutex poisoned").remove(&conn)
    }
}

pub type RrspRegistry = ConnectionRegistry<RrspContext>;
pub type RreqRegistry = ConnectionRegistry<RreqContext>;
