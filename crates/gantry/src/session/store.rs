//! Session store backends.
//!
//! The file store keeps every session in one JSON document
//! `{"sessions": {"[ns:]<sid>": {...}}}` and persists atomically: write
//! to `<path>.tmp`, remove the target, rename. `reset_on_boot` re-mints
//! the namespace so keys from prior runs stay on disk but out of reach.

use super::Session;
use crate::config::SessionStoreConfig;
use crate::new_id;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load(&self, session_id: &str) -> Option<Session>;
    async fn save(&self, session: &Session);
}

/// Build the configured store. `memory` (or an unconfigured file store)
/// yields `None`: the manager's cache is then the only copy.
pub fn build_store(cfg: &SessionStoreConfig) -> Option<Arc<dyn SessionStore>> {
    let mut namespace = cfg.namespace.clone();
    if cfg.reset_on_boot || (namespace.is_empty() && cfg.store_type != "memory") {
        namespace = new_id("boot");
    }
    match cfg.store_type.as_str() {
        "file" if !cfg.file_path.is_empty() => Some(Arc::new(FileSessionStore::new(
            &cfg.file_path,
            &namespace,
        ))),
        "minimemory" | "redis" => Some(Arc::new(super::redis::RedisSessionStore::new(
            cfg.endpoint.clone(),
            cfg.password.clone(),
            cfg.db,
            namespace,
        ))),
        _ => None,
    }
}

pub struct FileSessionStore {
    path: PathBuf,
    namespace: String,
    map: Mutex<HashMap<String, Session>>,
}

impl FileSessionStore {
    pub fn new(path: impl AsRef<Path>, namespace: &str) -> Self {
        let mut store = Self {
            path: path.as_ref().to_path_buf(),
            namespace: namespace.to_string(),
            map: Mutex::new(HashMap::new()),
        };
        let loaded = store.load_all();
        store.map = Mutex::new(loaded);
        store
    }

    fn make_key(&self, session_id: &str) -> String {
        if self.namespace.is_empty() {
            session_id.to_string()
        } else {
            format!("{}:{}", self.namespace, session_id)
        }
    }

    fn key_in_namespace(&self, key: &str) -> bool {
        if self.namespace.is_empty() {
            return true;
        }
        key.strip_prefix(&self.namespace)
            .map(|rest| rest.starts_with(':'))
            .unwrap_or(false)
    }

    fn strip_namespace<'a>(&self, key: &'a str) -> &'a str {
        if self.namespace.is_empty() {
            return key;
        }
        key.strip_prefix(&self.namespace)
            .and_then(|rest| rest.strip_prefix(':'))
            .unwrap_or(key)
    }

    fn load_all(&self) -> HashMap<String, Session> {
        let mut map = HashMap::new();
        let Ok(text) = std::fs::read_to_string(&self.path) else {
            return map;
        };
        let Ok(doc) = serde_json::from_str::<Value>(&text) else {
            return map;
        };
        let Some(sessions) = doc.get("sessions").and_then(Value::as_object) else {
            return map;
        };
        for (key, value) in sessions {
            if key.is_empty() || !self.key_in_namespace(key) {
                continue;
            }
            let Ok(mut session) = serde_json::from_value::<Session>(value.clone()) else {
                continue;
            };
            if session.session_id.is_empty() {
                session.session_id = self.strip_namespace(key).to_string();
            }
            map.insert(key.clone(), session);
        }
        map
    }

    fn persist_all(&self, map: &HashMap<String, Session>) {
        let mut sessions = serde_json::Map::new();
        for (key, session) in map {
            if let Ok(v) = serde_json::to_value(session) {
                sessions.insert(key.clone(), v);
            }
        }
        let doc = serde_json::json!({ "sessions": sessions });

        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                let _ = std::fs::create_dir_all(dir);
            }
        }
        let tmp = self.path.with_extension("tmp");
        if std::fs::write(&tmp, doc.to_string()).is_err() {
            return;
        }
        let _ = std::fs::remove_file(&self.path);
        if std::fs::rename(&tmp, &self.path).is_err() {
            let _ = std::fs::remove_file(&tmp);
        }
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn load(&self, session_id: &str) -> Option<Session> {
        let map = self.map.lock().await;
        map.get(&self.make_key(session_id)).cloned()
    }

    async fn save(&self, session: &Session) {
        let mut map = self.map.lock().await;
        map.insert(self.make_key(&session.session_id), session.clone());
        self.persist_all(&map);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{ChatMessage, TurnRecord};
    use tempfile::TempDir;

    fn sample(id: &str) -> Session {
        Session {
            session_id: id.to_string(),
            history: vec![ChatMessage::new("user", "hello")],
            turns: vec![TurnRecord {
                turn_id: "turn-1".into(),
                input_messages: vec![ChatMessage::new("user", "hello")],
                output_text: Some("hi".into()),
            }],
        }
    }

    #[tokio::test]
    async fn save_then_load_roundtrips() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sessions.json");
        let store = FileSessionStore::new(&path, "ns");
        store.save(&sample("s1")).await;
        let loaded = store.load("s1").await.unwrap();
        assert_eq!(loaded.history.len(), 1);
        assert_eq!(loaded.turns[0].output_text.as_deref(), Some("hi"));
    }

    #[tokio::test]
    async fn survives_reopen_with_same_namespace() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sessions.json");
        {
            let store = FileSessionStore::new(&path, "ns");
            store.save(&sample("s1")).await;
        }
        let reopened = FileSessionStore::new(&path, "ns");
        assert!(reopened.load("s1").await.is_some());
    }

    #[tokio::test]
    async fn namespace_isolates_prior_runs() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sessions.json");
        {
            let store = FileSessionStore::new(&path, "boot-1");
            store.save(&sample("s1")).await;
        }
        let fresh = FileSessionStore::new(&path, "boot-2");
        assert!(fresh.load("s1").await.is_none());
        // prior data is still in the document, not deleted
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("boot-1:s1"));
    }

    #[tokio::test]
    async fn persist_leaves_no_tmp_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sessions.json");
        let store = FileSessionStore::new(&path, "");
        store.save(&sample("s1")).await;
        assert!(path.exists());
        assert!(!path.with_extension("tmp").exists());
    }

    #[tokio::test]
    async fn manager_writes_through_to_store() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sessions.json");
        let store: Arc<dyn SessionStore> = Arc::new(FileSessionStore::new(&path, ""));
        let mgr = crate::session::SessionManager::new(Some(store.clone()));
        mgr.append_turn(
            "s9",
            TurnRecord {
                turn_id: "t1".into(),
                ..Default::default()
            },
        )
        .await;
        // both the cache and the backing store see the turn
        let cached = mgr.get_or_create("s9").await;
        assert_eq!(cached.turns.last().unwrap().turn_id, "t1");
        let stored = store.load("s9").await.unwrap();
        assert_eq!(stored.turns.last().unwrap().turn_id, "t1");
    }
}
