//! Per-chatbot conversation identifiers.
//!
//! A session id is generated once per chatbot and then reused from local
//! storage. Storage problems never surface to the caller: when the id cannot
//! be persisted, a fresh ephemeral id is returned instead.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rand::Rng;
use tracing::{debug, warn};

use crate::error::SessionError;

const RANDOM_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const RANDOM_LEN: usize = 9;

/// Minimal string key/value storage (the shape of browser `localStorage`).
pub trait KeyValueStorage: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, SessionError>;
    fn set(&self, key: &str, value: &str) -> Result<(), SessionError>;
    fn remove(&self, key: &str) -> Result<(), SessionError>;
}

/// Storage key under which a chatbot's session id is kept.
pub fn storage_key(chatbot_id: &str) -> String {
    format!("chat_session_{}", chatbot_id)
}

/// Generate a new id of the form `session_<epoch millis>_<9 base-36 chars>`.
pub fn generate_session_id() -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..RANDOM_LEN)
        .map(|_| RANDOM_ALPHABET[rng.gen_range(0..RANDOM_ALPHABET.len())] as char)
        .collect();
    format!("session_{}_{}", crate::util::now_millis(), suffix)
}

/// Return the stored session id for `chatbot_id`, creating and persisting
/// one on first use.
pub fn get_session_id(storage: &dyn KeyValueStorage, chatbot_id: &str) -> String {
    let key = storage_key(chatbot_id);

    match storage.get(&key) {
        Ok(Some(existing)) if !existing.trim().is_empty() => return existing,
        Ok(_) => {}
        Err(e) => {
            warn!("Session storage unavailable, using ephemeral id: {}", e);
            return generate_session_id();
        }
    }

    let id = generate_session_id();
    if let Err(e) = storage.set(&key, &id) {
        warn!("Failed to persist session id for {}: {}", chatbot_id, e);
    } else {
        debug!("Created session {} for chatbot {}", id, chatbot_id);
    }
    id
}

/// Forget the stored session id so the next call starts a new conversation.
pub fn reset_session_id(storage: &dyn KeyValueStorage, chatbot_id: &str) {
    if let Err(e) = storage.remove(&storage_key(chatbot_id)) {
        warn!("Failed to reset session id for {}: {}", chatbot_id, e);
    }
}

/// Process-local storage.
#[derive(Default)]
pub struct MemoryStorage {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStorage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>, SessionError> {
        let values = self
            .values
            .lock()
            .map_err(|e| SessionError::Read(e.to_string()))?;
        Ok(values.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), SessionError> {
        let mut values = self
            .values
            .lock()
            .map_err(|e| SessionError::Write(e.to_string()))?;
        values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), SessionError> {
        let mut values = self
            .values
            .lock()
            .map_err(|e| SessionError::Write(e.to_string()))?;
        values.remove(key);
        Ok(())
    }
}

/// Storage backed by a single JSON object file, used by the terminal client.
pub struct FileStorage {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// `~/.chatrelay/session_ids.json`
    pub fn default_location() -> Self {
        Self::new(crate::config::get_data_dir().join("session_ids.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<HashMap<String, String>, SessionError> {
        if !self.path.exists() {
            return Ok(HashMap::new());
        }
        let content =
            std::fs::read_to_string(&self.path).map_err(|e| SessionError::Read(e.to_string()))?;
        if content.trim().is_empty() {
            return Ok(HashMap::new());
        }
        serde_json::from_str(&content).map_err(|e| SessionError::Read(e.to_string()))
    }

    fn write_all(&self, values: &HashMap<String, String>) -> Result<(), SessionError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| SessionError::Write(e.to_string()))?;
        }
        let json =
            serde_json::to_string_pretty(values).map_err(|e| SessionError::Write(e.to_string()))?;
        std::fs::write(&self.path, json).map_err(|e| SessionError::Write(e.to_string()))
    }
}

impl KeyValueStorage for FileStorage {
    fn get(&self, key: &str) -> Result<Option<String>, SessionError> {
        let _guard = self
            .lock
            .lock()
            .map_err(|e| SessionError::Read(e.to_string()))?;
        Ok(self.read_all()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), SessionError> {
        let _guard = self
            .lock
            .lock()
            .map_err(|e| SessionError::Write(e.to_string()))?;
        let mut values = self.read_all()?;
        values.insert(key.to_string(), value.to_string());
        self.write_all(&values)
    }

    fn remove(&self, key: &str) -> Result<(), SessionError> {
        let _guard = self
            .lock
            .lock()
            .map_err(|e| SessionError::Write(e.to_string()))?;
        let mut values = self.read_all()?;
        if values.remove(key).is_some() {
            self.write_all(&values)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct BrokenStorage;

    impl KeyValueStorage for BrokenStorage {
        fn get(&self, _key: &str) -> Result<Option<String>, SessionError> {
            Err(SessionError::Read("storage disabled".into()))
        }
        fn set(&self, _key: &str, _value: &str) -> Result<(), SessionError> {
            Err(SessionError::Write("storage disabled".into()))
        }
        fn remove(&self, _key: &str) -> Result<(), SessionError> {
            Err(SessionError::Write("storage disabled".into()))
        }
    }

    struct ReadOnlyStorage;

    impl KeyValueStorage for ReadOnlyStorage {
        fn get(&self, _key: &str) -> Result<Option<String>, SessionError> {
            Ok(None)
        }
        fn set(&self, _key: &str, _value: &str) -> Result<(), SessionError> {
            Err(SessionError::Write("quota exceeded".into()))
        }
        fn remove(&self, _key: &str) -> Result<(), SessionError> {
            Ok(())
        }
    }

    #[test]
    fn test_generated_id_shape() {
        let id = generate_session_id();
        let parts: Vec<&str> = id.split('_').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "session");
        assert!(parts[1].parse::<i64>().is_ok());
        assert_eq!(parts[2].len(), 9);
        assert!(parts[2]
            .chars()
            .all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()));
    }

    #[test]
    fn test_same_chatbot_same_id() {
        let storage = MemoryStorage::new();
        let first = get_session_id(&storage, "bot-1");
        let second = get_session_id(&storage, "bot-1");
        assert_eq!(first, second);
        assert_eq!(
            storage.get(&storage_key("bot-1")).unwrap(),
            Some(first.clone())
        );
    }

    #[test]
    fn test_different_chatbots_different_ids() {
        let storage = MemoryStorage::new();
        let a = get_session_id(&storage, "bot-a");
        let b = get_session_id(&storage, "bot-b");
        assert_ne!(a, b);
    }

    #[test]
    fn test_unavailable_storage_yields_ephemeral_id() {
        let id = get_session_id(&BrokenStorage, "bot-1");
        assert!(id.starts_with("session_"));
        let other = get_session_id(&ReadOnlyStorage, "bot-1");
        assert!(other.starts_with("session_"));
    }

    #[test]
    fn test_reset_starts_new_session() {
        let storage = MemoryStorage::new();
        let first = get_session_id(&storage, "bot-1");
        reset_session_id(&storage, "bot-1");
        assert_eq!(storage.get(&storage_key("bot-1")).unwrap(), None);
        let second = get_session_id(&storage, "bot-1");
        assert_ne!(first, second);
    }

    #[test]
    fn test_file_storage_persists_across_instances() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("session_ids.json");

        let first = get_session_id(&FileStorage::new(&path), "bot-1");
        let second = get_session_id(&FileStorage::new(&path), "bot-1");
        assert_eq!(first, second);
        assert!(path.exists());
    }

    #[test]
    fn test_file_storage_corrupt_file_is_ephemeral() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("session_ids.json");
        std::fs::write(&path, "not json").unwrap();

        let storage = FileStorage::new(&path);
        let a = get_session_id(&storage, "bot-1");
        let b = get_session_id(&storage, "bot-1");
        assert!(a.starts_with("session_"));
        assert_ne!(a, b);
    }
}
