//! Cookie-backed sessions stored through the cache subsystem.
//!
//! A session is a JSON object stored under `session:<id>` in the configured
//! cache store. The session middleware loads it from the request cookie,
//! exposes it on the context, and saves it back after the pipeline when it
//! was mutated (or newly created).

use crate::cache::repository::Repository;
use crate::cache::CacheError;
use crate::config::settings::SessionSettings;
use serde_json::{Map, Value};
use std::time::Duration;

/// Per-request session handle.
#[derive(Debug, Clone)]
pub struct Session {
    id: String,
    data: Map<String, Value>,
    dirty: bool,
    fresh: bool,
}

impl Session {
    fn new(id: String, data: Map<String, Value>, fresh: bool) -> Self {
        Self {
            id,
            data,
            dirty: false,
            fresh,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// True when this session was created for the current request and its
    /// cookie still has to be emitted.
    pub fn is_fresh(&self) -> bool {
        self.fresh
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(Value::as_str)
    }

    pub fn insert(&mut self, key: &str, value: Value) {
        self.data.insert(key.to_string(), value);
        self.dirty = true;
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let removed = self.data.remove(key);
        if removed.is_some() {
            self.dirty = true;
        }
        removed
    }

    pub fn clear(&mut self) {
        if !self.data.is_empty() {
            self.data.clear();
            self.dirty = true;
        }
    }

    pub fn data(&self) -> &Map<String, Value> {
        &self.data
    }
}

/// Loads and persists sessions against a cache repository.
pub struct SessionManager {
    repo: Repository,
    settings: SessionSettings,
}

impl SessionManager {
    pub fn new(repo: Repository, settings: SessionSettings) -> Self {
        Self { repo, settings }
    }

    pub fn cookie_name(&self) -> &str {
        &self.settings.cookie_name
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.settings.ttl_secs)
    }

    fn storage_key(id: &str) -> String {
        format!("session:{}", id)
    }

    /// Loads the session for `id`, or creates a fresh one when the id is
    /// missing, malformed, or expired.
    pub async fn load_or_create(&self, id: Option<&str>) -> Result<Session, CacheError> {
        if let Some(id) = id {
            if is_valid_session_id(id) {
                if let Some(data) = self
                    .repo
                    .get::<Map<String, Value>>(&Self::storage_key(id))
                    .await?
                {
                    return Ok(Session::new(id.to_string(), data, false));
                }
            }
        }
        let id = uuid::Uuid::new_v4().simple().to_string();
        Ok(Session::new(id, Map::new(), true))
    }

    /// Persists the session payload with the configured idle TTL.
    pub async fn save(&self, session: &Session) -> Result<(), CacheError> {
        self.repo
            .put(&Self::storage_key(session.id()), session.data(), self.ttl())
            .await
    }

    /// Drops the stored payload for `id`.
    pub async fn destroy(&self, id: &str) -> Result<bool, CacheError> {
        self.repo.forget(&Self::storage_key(id)).await
    }
}

fn is_valid_session_id(id: &str) -> bool {
    (16..=64).contains(&id.len()) && id.chars().all(|c| c.is_ascii_alphanumeric())
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("cookie", &self.settings.cookie_name)
            .field("ttl_secs", &self.settings.ttl_secs)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mutation_marks_dirty() {
        let mut session = Session::new("abc".repeat(8), Map::new(), true);
        assert!(!session.is_dirty());
        session.insert("user", serde_json::json!(7));
        assert!(session.is_dirty());
        assert_eq!(session.get("user"), Some(&serde_json::json!(7)));
    }

    #[test]
    fn session_id_shape_is_enforced_on_load() {
        assert!(is_valid_session_id(&"a".repeat(32)));
        assert!(!is_valid_session_id("short"));
        assert!(!is_valid_session_id(&"x/../../etc".repeat(4)));
    }
}
