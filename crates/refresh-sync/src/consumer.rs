//! Consumer configuration stores.
//!
//! The chat-serving consumer reads one key of its configuration (the live
//! alias id) at call time. Writes go through [`ConsumerConfigStore::compare_and_swap`]
//! so a concurrent manual edit is detected instead of overwritten.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Errors from a consumer configuration store.
#[derive(Debug, Error)]
pub enum ConsumerConfigError {
    #[error("Invalid consumer id: {0}")]
    InvalidId(String),

    #[error("Conflict on '{key}': expected {expected:?}, found {actual:?}")]
    Conflict {
        key: String,
        expected: Option<String>,
        actual: Option<String>,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// A consumer's configuration map with its version.
///
/// `version` increases by one on every successful write.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionedConfig {
    pub version: u64,
    pub values: BTreeMap<String, String>,
}

impl VersionedConfig {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Apply a compare-and-swap of one key in place.
    fn swap(
        &mut self,
        key: &str,
        expected: Option<&str>,
        new: &str,
    ) -> Result<(), ConsumerConfigError> {
        let actual = self.get(key);
        if actual != expected {
            return Err(ConsumerConfigError::Conflict {
                key: key.to_string(),
                expected: expected.map(str::to_string),
                actual: actual.map(str::to_string),
            });
        }
        self.values.insert(key.to_string(), new.to_string());
        self.version += 1;
        Ok(())
    }
}

/// Versioned single-key configuration store for the consuming service.
#[async_trait]
pub trait ConsumerConfigStore: Send + Sync {
    /// Current configuration. A consumer with no stored configuration reads
    /// as an empty map at version 0.
    async fn get_config(&self, consumer_id: &str) -> Result<VersionedConfig, ConsumerConfigError>;

    /// Set `key` to `new` only if its current value equals `expected_old`.
    ///
    /// Returns the configuration after the write, or
    /// [`ConsumerConfigError::Conflict`] if the value changed underneath.
    async fn compare_and_swap(
        &self,
        consumer_id: &str,
        key: &str,
        expected_old: Option<&str>,
        new: &str,
    ) -> Result<VersionedConfig, ConsumerConfigError>;
}

fn validate_id(consumer_id: &str) -> Result<(), ConsumerConfigError> {
    let valid = !consumer_id.is_empty()
        && consumer_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        && !consumer_id.starts_with('.');
    if valid {
        Ok(())
    } else {
        Err(ConsumerConfigError::InvalidId(consumer_id.to_string()))
    }
}

/// JSON document per consumer on local disk.
///
/// Writes go to a temp file that is renamed over the document, and are
/// serialized by an async mutex.
pub struct FileConsumerConfigStore {
    root: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl FileConsumerConfigStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, consumer_id: &str) -> Result<PathBuf, ConsumerConfigError> {
        validate_id(consumer_id)?;
        Ok(self.root.join(format!("{consumer_id}.json")))
    }

    async fn read(&self, path: &Path) -> Result<VersionedConfig, ConsumerConfigError> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(VersionedConfig::default()),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl ConsumerConfigStore for FileConsumerConfigStore {
    async fn get_config(&self, consumer_id: &str) -> Result<VersionedConfig, ConsumerConfigError> {
        let path = self.path_for(consumer_id)?;
        self.read(&path).await
    }

    async fn compare_and_swap(
        &self,
        consumer_id: &str,
        key: &str,
        expected_old: Option<&str>,
        new: &str,
    ) -> Result<VersionedConfig, ConsumerConfigError> {
        let path = self.path_for(consumer_id)?;
        let _guard = self.write_lock.lock().await;

        let mut config = self.read(&path).await?;
        config.swap(key, expected_old, new)?;

        tokio::fs::create_dir_all(&self.root).await?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(&config)?).await?;
        tokio::fs::rename(&tmp, &path).await?;

        debug!(consumer = consumer_id, key, version = config.version, "Consumer config written");
        Ok(config)
    }
}

/// In-memory store for tests and dry runs.
#[derive(Default)]
pub struct InMemoryConsumerConfigStore {
    configs: Mutex<HashMap<String, VersionedConfig>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl InMemoryConsumerConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed one key for a consumer.
    pub fn with_value(self, consumer_id: &str, key: &str, value: &str) -> Self {
        if let Ok(mut configs) = self.configs.lock() {
            let config = configs.entry(consumer_id.to_string()).or_default();
            config.values.insert(key.to_string(), value.to_string());
            config.version += 1;
        }
        self
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent write fail.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Change a value outside of compare-and-swap, as an operator would.
    pub fn overwrite(&self, consumer_id: &str, key: &str, value: &str) {
        if let Ok(mut configs) = self.configs.lock() {
            let config = configs.entry(consumer_id.to_string()).or_default();
            config.values.insert(key.to_string(), value.to_string());
            config.version += 1;
        }
    }

    fn lock(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<String, VersionedConfig>>, ConsumerConfigError>
    {
        self.configs
            .lock()
            .map_err(|e| ConsumerConfigError::Unavailable(e.to_string()))
    }
}

#[async_trait]
impl ConsumerConfigStore for InMemoryConsumerConfigStore {
    async fn get_config(&self, consumer_id: &str) -> Result<VersionedConfig, ConsumerConfigError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(ConsumerConfigError::Unavailable("injected read failure".into()));
        }
        Ok(self.lock()?.get(consumer_id).cloned().unwrap_or_default())
    }

    async fn compare_and_swap(
        &self,
        consumer_id: &str,
        key: &str,
        expected_old: Option<&str>,
        new: &str,
    ) -> Result<VersionedConfig, ConsumerConfigError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(ConsumerConfigError::Unavailable("injected write failure".into()));
        }
        let mut configs = self.lock()?;
        let config = configs.entry(consumer_id.to_string()).or_default();
        config.swap(key, expected_old, new)?;
        Ok(config.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_file_store_missing_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileConsumerConfigStore::new(dir.path());
        let config = store.get_config("chat").await.unwrap();
        assert_eq!(config.version, 0);
        assert!(config.values.is_empty());
    }

    #[tokio::test]
    async fn test_file_store_cas_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileConsumerConfigStore::new(dir.path());

        let written = store
            .compare_and_swap("chat", "alias_id", None, "alias-1")
            .await
            .unwrap();
        assert_eq!(written.version, 1);

        let written = store
            .compare_and_swap("chat", "alias_id", Some("alias-1"), "alias-2")
            .await
            .unwrap();
        assert_eq!(written.version, 2);

        let reread = FileConsumerConfigStore::new(dir.path())
            .get_config("chat")
            .await
            .unwrap();
        assert_eq!(reread.get("alias_id"), Some("alias-2"));
        assert!(!dir.path().join("chat.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_file_store_conflict_leaves_value() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileConsumerConfigStore::new(dir.path());
        store
            .compare_and_swap("chat", "alias_id", None, "manual")
            .await
            .unwrap();

        let err = store
            .compare_and_swap("chat", "alias_id", Some("alias-1"), "alias-2")
            .await
            .unwrap_err();
        assert!(matches!(err, ConsumerConfigError::Conflict { .. }));

        let config = store.get_config("chat").await.unwrap();
        assert_eq!(config.get("alias_id"), Some("manual"));
        assert_eq!(config.version, 1);
    }

    #[tokio::test]
    async fn test_file_store_rejects_path_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileConsumerConfigStore::new(dir.path());
        assert!(matches!(
            store.get_config("../etc/passwd").await,
            Err(ConsumerConfigError::InvalidId(_))
        ));
    }

    #[tokio::test]
    async fn test_memory_store_preserves_other_keys() {
        let store = InMemoryConsumerConfigStore::new()
            .with_value("chat", "alias_id", "a1")
            .with_value("chat", "model", "m-large");

        store
            .compare_and_swap("chat", "alias_id", Some("a1"), "a2")
            .await
            .unwrap();
        let config = store.get_config("chat").await.unwrap();
        assert_eq!(config.get("alias_id"), Some("a2"));
        assert_eq!(config.get("model"), Some("m-large"));
        assert_eq!(config.version, 3);
    }

    #[tokio::test]
    async fn test_memory_store_detects_manual_change() {
        let store = InMemoryConsumerConfigStore::new().with_value("chat", "alias_id", "a1");
        store.overwrite("chat", "alias_id", "hotfix");
        let err = store
            .compare_and_swap("chat", "alias_id", Some("a1"), "a2")
            .await
            .unwrap_err();
        match err {
            ConsumerConfigError::Conflict { actual, .. } => {
                assert_eq!(actual.as_deref(), Some("hotfix"))
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_memory_store_injected_write_failure() {
        let store = InMemoryConsumerConfigStore::new();
        store.fail_writes(true);
        assert!(store
            .compare_and_swap("chat", "alias_id", None, "a1")
            .await
            .is_err());
    }
}
