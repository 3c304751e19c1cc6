//! Per-session storage: user globals and the last result of each function.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use uuid::Uuid;

pub const SESSION_COOKIE: &str = "funix_session";

#[derive(Debug, Default)]
pub struct SessionData {
    pub globals: HashMap<String, Value>,
    pub last_results: HashMap<Uuid, Value>,
}

/// Locked per session; concurrent calls in one session are last-writer-wins.
pub type SessionHandle = Arc<Mutex<SessionData>>;

#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: DashMap<String, SessionHandle>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_id() -> String {
        Uuid::new_v4().to_string()
    }

    /// The session's handle, created on first use.
    pub fn handle(&self, id: &str) -> SessionHandle {
        self.sessions
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(SessionData::default())))
            .clone()
    }

    pub fn record_result(&self, id: &str, function: Uuid, value: Value) {
        self.handle(id).lock().last_results.insert(function, value);
    }

    pub fn last_result(&self, id: &str, function: Uuid) -> Option<Value> {
        let session = self.sessions.get(id)?;
        let data = session.lock();
        data.last_results.get(&function).cloned()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
