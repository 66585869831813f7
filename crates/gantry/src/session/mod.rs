//! Per-session conversation history and turn records, cached in memory
//! over a pluggable store.

pub mod redis;
pub mod store;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

pub use store::{FileSessionStore, SessionStore};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TurnRecord {
    pub turn_id: String,
    pub input_messages: Vec<ChatMessage>,
    pub output_text: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Session {
    pub session_id: String,
    pub history: Vec<ChatMessage>,
    pub turns: Vec<TurnRecord>,
}

/// Mint a `prefix-<ms-hex>-<rand-hex>` identifier.
pub fn new_id(prefix: &str) -> String {
    let ms = chrono::Utc::now().timestamp_millis() as u64;
    format!("{}-{:x}-{:x}", prefix, ms, rand::random::<u64>())
}

/// Owns sessions. The backing store is the source of truth; the
/// in-memory map is a write-through cache. Writes for one session id are
/// serialized by a per-session lock; sessions are created lazily.
pub struct SessionManager {
    store: Option<Arc<dyn SessionStore>>,
    sessions: Mutex<HashMap<String, Session>>,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SessionManager {
    pub fn new(store: Option<Arc<dyn SessionStore>>) -> Self {
        Self {
            store,
            sessions: Mutex::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(None)
    }

    pub fn ensure_session_id(&self, preferred: &str) -> String {
        if !preferred.is_empty() {
            return preferred.to_string();
        }
        new_id("sess")
    }

    async fn session_lock(&self, session_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    pub async fn get_or_create(&self, session_id: &str) -> Session {
        {
            let sessions = self.sessions.lock().await;
            if let Some(s) = sessions.get(session_id) {
                return s.clone();
            }
        }
        let mut out = Session::default();
        let mut found = false;
        if let Some(store) = &self.store {
            if let Some(loaded) = store.load(session_id).await {
                out = loaded;
                found = true;
            }
        }
        if !found {
            out.session_id = session_id.to_string();
        }
        let mut sessions = self.sessions.lock().await;
        sessions.insert(session_id.to_string(), out.clone());
        out
    }

    pub async fn append_to_history(&self, session_id: &str, messages: Vec<ChatMessage>) {
        let lock = self.session_lock(session_id).await;
        let _guard = lock.lock().await;
        let snapshot = {
            let mut sessions = self.sessions.lock().await;
            let s = sessions.entry(session_id.to_string()).or_default();
            s.session_id = session_id.to_string();
            s.history.extend(messages);
            s.clone()
        };
        if let Some(store) = &self.store {
            store.save(&snapshot).await;
        }
    }

    pub async fn append_turn(&self, session_id: &str, turn: TurnRecord) {
        let lock = self.session_lock(session_id).await;
        let _guard = lock.lock().await;
        let snapshot = {
            let mut sessions = self.sessions.lock().await;
            let s = sessions.entry(session_id.to_string()).or_default();
            s.session_id = session_id.to_string();
            s.turns.push(turn);
            s.clone()
        };
        if let Some(store) = &self.store {
            store.save(&snapshot).await;
        }
    }
}
