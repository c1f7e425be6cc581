//! State management for applied resources
//!
//! Records the last-applied state of every resource. The file-backed store
//! manages `.stackflow/state.json`; the executor is the only writer and
//! writes one record at a time after each successful provider call.

use crate::error::{CloudError, Result};
use crate::provider::Outputs;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

const STATE_VERSION: u32 = 1;
const STATE_DIR: &str = ".stackflow";
const STATE_FILE: &str = "state.json";
const STATE_TEMP: &str = "state.json.tmp";
const STATE_BACKUP: &str = "state.json.backup";
const LOCK_FILE: &str = "lock.json";

/// Global state containing every applied resource
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalState {
    /// State file version
    pub version: u32,

    /// Last modified timestamp
    pub updated_at: DateTime<Utc>,

    /// Records indexed by logical ID
    pub resources: BTreeMap<String, StateRecord>,
}

impl Default for GlobalState {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            updated_at: Utc::now(),
            resources: BTreeMap::new(),
        }
    }
}

impl GlobalState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or update a record
    pub fn set_record(&mut self, record: StateRecord) {
        self.resources.insert(record.logical_id.clone(), record);
        self.updated_at = Utc::now();
    }

    /// Remove a record
    pub fn remove_record(&mut self, logical_id: &str) -> Option<StateRecord> {
        let result = self.resources.remove(logical_id);
        if result.is_some() {
            self.updated_at = Utc::now();
        }
        result
    }

    /// Get a record by logical ID
    pub fn get(&self, logical_id: &str) -> Option<&StateRecord> {
        self.resources.get(logical_id)
    }

    pub fn contains(&self, logical_id: &str) -> bool {
        self.resources.contains_key(logical_id)
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &StateRecord)> {
        self.resources.iter()
    }
}

/// Last-applied state of a single resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateRecord {
    /// Logical ID from the declaration
    pub logical_id: String,

    /// Resource kind
    pub kind: String,

    /// Fully resolved properties sent to the provider
    pub applied_properties: serde_json::Value,

    /// Provider-specific resource ID
    pub provider_id: String,

    /// Outputs reported by the provider (IDs, ARNs, domain names, ...)
    #[serde(default)]
    pub outputs: Outputs,

    /// Logical IDs this resource depended on when applied
    #[serde(default)]
    pub dependencies: Vec<String>,

    /// When the resource was last created or updated
    pub last_applied_at: DateTime<Utc>,
}

impl StateRecord {
    pub fn new(
        logical_id: impl Into<String>,
        kind: impl Into<String>,
        provider_id: impl Into<String>,
    ) -> Self {
        Self {
            logical_id: logical_id.into(),
            kind: kind.into(),
            applied_properties: serde_json::Value::Object(Default::default()),
            provider_id: provider_id.into(),
            outputs: Outputs::new(),
            dependencies: Vec::new(),
            last_applied_at: Utc::now(),
        }
    }

    pub fn with_properties(mut self, properties: serde_json::Value) -> Self {
        self.applied_properties = properties;
        self
    }

    pub fn with_outputs(mut self, outputs: Outputs) -> Self {
        self.outputs = outputs;
        self
    }

    pub fn with_dependencies(mut self, dependencies: Vec<String>) -> Self {
        self.dependencies = dependencies;
        self
    }

    /// Look up an output attribute; `id` falls back to the provider ID
    pub fn output(&self, attribute: &str) -> Option<serde_json::Value> {
        match self.outputs.get(attribute) {
            Some(value) => Some(value.clone()),
            None if attribute == "id" => Some(serde_json::Value::String(self.provider_id.clone())),
            None => None,
        }
    }

    pub fn get_output<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.outputs
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}

/// Durable record of last-applied resource state
///
/// Every mutation is a complete read-modify-write of the stored set,
/// serialized inside the store so parallel branches never interleave.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Load the current state
    async fn load(&self) -> Result<GlobalState>;

    /// Insert or replace a record
    async fn put(&self, record: StateRecord) -> Result<()>;

    /// Remove a record (no-op if absent)
    async fn remove(&self, logical_id: &str) -> Result<()>;
}

/// In-memory state store, used for dry runs and tests
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    state: Mutex<GlobalState>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: GlobalState) -> Self {
        Self {
            state: Mutex::new(state),
        }
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn load(&self) -> Result<GlobalState> {
        Ok(self.state.lock().await.clone())
    }

    async fn put(&self, record: StateRecord) -> Result<()> {
        self.state.lock().await.set_record(record);
        Ok(())
    }

    async fn remove(&self, logical_id: &str) -> Result<()> {
        self.state.lock().await.remove_record(logical_id);
        Ok(())
    }
}

/// File-backed state store for reading/writing `.stackflow/state.json`
pub struct StateManager {
    /// Project root directory
    project_root: PathBuf,

    /// Serializes read-modify-write cycles within this process
    write_lock: Mutex<()>,
}

impl StateManager {
    pub fn new(project_root: impl AsRef<Path>) -> Self {
        Self {
            project_root: project_root.as_ref().to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    /// Get the state directory path
    fn state_dir(&self) -> PathBuf {
        self.project_root.join(STATE_DIR)
    }

    /// Get the state file path
    pub fn state_path(&self) -> PathBuf {
        self.state_dir().join(STATE_FILE)
    }

    /// Get the backup file path
    fn backup_path(&self) -> PathBuf {
        self.state_dir().join(STATE_BACKUP)
    }

    /// Get the lock file path
    fn lock_path(&self) -> PathBuf {
        self.state_dir().join(LOCK_FILE)
    }

    /// Ensure the state directory exists
    async fn ensure_state_dir(&self) -> Result<()> {
        let dir = self.state_dir();
        if !dir.exists() {
            fs::create_dir_all(&dir).await?;
            tracing::debug!("Created state directory: {}", dir.display());
        }
        Ok(())
    }

    async fn read(&self) -> Result<GlobalState> {
        let path = self.state_path();
        if !path.exists() {
            tracing::debug!("State file not found, returning empty state");
            return Ok(GlobalState::new());
        }

        let content = fs::read_to_string(&path).await?;
        let state: GlobalState = serde_json::from_str(&content)?;

        // Version check
        if state.version > STATE_VERSION {
            return Err(CloudError::StateError(format!(
                "State file version {} is newer than supported version {}",
                state.version, STATE_VERSION
            )));
        }

        tracing::debug!("Loaded state with {} resources", state.resources.len());
        Ok(state)
    }

    /// Save the whole state
    ///
    /// The previous file is kept as a backup and the new content replaces it
    /// through a rename, so readers never observe a half-written file.
    pub async fn save(&self, state: &GlobalState) -> Result<()> {
        self.ensure_state_dir().await?;

        let path = self.state_path();
        let temp = self.state_dir().join(STATE_TEMP);

        let content = serde_json::to_string_pretty(state)?;
        fs::write(&temp, content).await?;

        if path.exists() {
            fs::copy(&path, self.backup_path()).await?;
        }
        fs::rename(&temp, &path).await?;

        tracing::debug!("Saved state with {} resources", state.resources.len());
        Ok(())
    }

    /// Acquire a lock for exclusive access across processes
    ///
    /// The lock file is created with `create_new`, so only one process can
    /// hold it. A lock older than one hour is taken over.
    pub async fn acquire_lock(&self) -> Result<StateLock> {
        self.ensure_state_dir().await?;

        let lock_path = self.lock_path();
        let lock_info = LockInfo::current();

        if create_lock_file(&lock_path, &lock_info).await? {
            tracing::debug!("Acquired state lock");
            return Ok(StateLock::new(lock_path));
        }

        match read_lock_file(&lock_path).await? {
            Some(existing) if !existing.is_stale() => {
                return Err(CloudError::LockError(format!(
                    "State is locked by {} since {}",
                    existing.holder, existing.acquired_at
                )));
            }
            Some(existing) => {
                tracing::warn!("Removing stale lock from {}", existing.holder);
                match fs::remove_file(&lock_path).await {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
            }
            // Released between our attempt and the read
            None => {}
        }

        if create_lock_file(&lock_path, &lock_info).await? {
            tracing::debug!("Acquired state lock");
            return Ok(StateLock::new(lock_path));
        }
        Err(CloudError::LockError(
            "State lock was taken by another process".to_string(),
        ))
    }
}

/// Create the lock file; `false` when it already exists
async fn create_lock_file(path: &Path, lock_info: &LockInfo) -> Result<bool> {
    let content = serde_json::to_string_pretty(lock_info)?;
    let mut file = match fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await
    {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => return Ok(false),
        Err(e) => return Err(e.into()),
    };
    file.write_all(content.as_bytes()).await?;
    file.flush().await?;
    Ok(true)
}

/// Read the current lock holder; `None` when the file is gone
async fn read_lock_file(path: &Path) -> Result<Option<LockInfo>> {
    let content = match fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    // An empty or partial file belongs to a holder that is still writing it
    serde_json::from_str(&content).map(Some).map_err(|_| {
        CloudError::LockError("State lock is being acquired by another process".to_string())
    })
}

#[async_trait]
impl StateStore for StateManager {
    async fn load(&self) -> Result<GlobalState> {
        self.read().await
    }

    async fn put(&self, record: StateRecord) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut state = self.read().await?;
        tracing::debug!(logical_id = %record.logical_id, "Recording applied state");
        state.set_record(record);
        self.save(&state).await
    }

    async fn remove(&self, logical_id: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut state = self.read().await?;
        if state.remove_record(logical_id).is_some() {
            tracing::debug!(logical_id, "Removed state record");
            self.save(&state).await?;
        }
        Ok(())
    }
}

/// Lock information
#[derive(Debug, Serialize, Deserialize)]
struct LockInfo {
    holder: String,
    acquired_at: DateTime<Utc>,
}

impl LockInfo {
    fn current() -> Self {
        let host = std::env::var("HOSTNAME")
            .or_else(|_| std::env::var("HOST"))
            .unwrap_or_else(|_| "unknown".to_string());
        Self {
            holder: format!("{}:{}", host, std::process::id()),
            acquired_at: Utc::now(),
        }
    }

    fn is_stale(&self) -> bool {
        Utc::now().signed_duration_since(self.acquired_at) >= chrono::Duration::hours(1)
    }
}

/// RAII guard for state lock
pub struct StateLock {
    lock_path: PathBuf,
    released: bool,
}

impl StateLock {
    fn new(lock_path: PathBuf) -> Self {
        Self {
            lock_path,
            released: false,
        }
    }

    /// Release the lock
    pub async fn release(mut self) -> Result<()> {
        if !self.released {
            if self.lock_path.exists() {
                fs::remove_file(&self.lock_path).await?;
                tracing::debug!("Released state lock");
            }
            self.released = true;
        }
        Ok(())
    }
}

impl Drop for StateLock {
    fn drop(&mut self) {
        if !self.released && self.lock_path.exists() {
            // Synchronous cleanup in drop - not ideal but necessary
            let _ = std::fs::remove_file(&self.lock_path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn record(id: &str) -> StateRecord {
        StateRecord::new(id, "s3.bucket", format!("{id}-0001"))
            .with_properties(serde_json::json!({"versioned": false}))
            .with_outputs(
                [("arn".to_string(), serde_json::json!(format!("arn:local:{id}")))]
                    .into_iter()
                    .collect(),
            )
    }

    #[tokio::test]
    async fn test_state_put_load() {
        let temp_dir = tempdir().unwrap();
        let manager = StateManager::new(temp_dir.path());

        manager.put(record("site")).await.unwrap();

        let loaded = manager.load().await.unwrap();
        assert_eq!(loaded.len(), 1);
        let site = loaded.get("site").unwrap();
        assert_eq!(site.provider_id, "site-0001");
        assert_eq!(site.get_output::<String>("arn").as_deref(), Some("arn:local:site"));
    }

    #[tokio::test]
    async fn test_empty_state() {
        let temp_dir = tempdir().unwrap();
        let manager = StateManager::new(temp_dir.path());

        let state = manager.load().await.unwrap();
        assert!(state.is_empty());
    }

    #[tokio::test]
    async fn test_remove_and_backup() {
        let temp_dir = tempdir().unwrap();
        let manager = StateManager::new(temp_dir.path());

        manager.put(record("a")).await.unwrap();
        manager.put(record("b")).await.unwrap();
        manager.remove("a").await.unwrap();
        // 存在しないIDの削除は何もしない
        manager.remove("ghost").await.unwrap();

        let state = manager.load().await.unwrap();
        assert_eq!(state.resources.keys().collect::<Vec<_>>(), vec!["b"]);
        assert!(temp_dir.path().join(".stackflow/state.json.backup").exists());
        assert!(!temp_dir.path().join(".stackflow/state.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_newer_version_rejected() {
        let temp_dir = tempdir().unwrap();
        let manager = StateManager::new(temp_dir.path());

        let mut state = GlobalState::new();
        state.version = STATE_VERSION + 1;
        manager.save(&state).await.unwrap();

        let err = manager.load().await.unwrap_err();
        assert!(matches!(err, CloudError::StateError(_)));
    }

    #[tokio::test]
    async fn test_concurrent_puts_are_serialized() {
        let temp_dir = tempdir().unwrap();
        let manager = Arc::new(StateManager::new(temp_dir.path()));

        let mut handles = Vec::new();
        for i in 0..8 {
            let manager = manager.clone();
            handles.push(tokio::spawn(async move {
                manager.put(record(&format!("r{i}"))).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let state = manager.load().await.unwrap();
        assert_eq!(state.len(), 8);
    }

    #[tokio::test]
    async fn test_lock_is_exclusive() {
        let temp_dir = tempdir().unwrap();
        let manager = StateManager::new(temp_dir.path());

        let lock = manager.acquire_lock().await.unwrap();
        assert!(matches!(
            manager.acquire_lock().await,
            Err(CloudError::LockError(_))
        ));

        lock.release().await.unwrap();
        let again = manager.acquire_lock().await.unwrap();
        drop(again);
        assert!(!temp_dir.path().join(".stackflow/lock.json").exists());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_lock_has_single_holder_across_managers() {
        let temp_dir = tempdir().unwrap();

        // 別プロセス相当: StateManager ごとにプロセス内ミューテックスは共有されない
        let mut handles = Vec::new();
        for _ in 0..8 {
            let root = temp_dir.path().to_path_buf();
            handles.push(tokio::spawn(async move {
                StateManager::new(root).acquire_lock().await
            }));
        }

        let mut held = Vec::new();
        for handle in handles {
            match handle.await.unwrap() {
                Ok(lock) => held.push(lock),
                Err(e) => assert!(matches!(e, CloudError::LockError(_))),
            }
        }
        assert_eq!(held.len(), 1);
    }

    #[tokio::test]
    async fn test_stale_lock_is_taken_over() {
        let temp_dir = tempdir().unwrap();
        let manager = StateManager::new(temp_dir.path());
        manager.ensure_state_dir().await.unwrap();

        let stale = LockInfo {
            holder: "old-host:1".to_string(),
            acquired_at: Utc::now() - chrono::Duration::hours(2),
        };
        std::fs::write(
            manager.lock_path(),
            serde_json::to_string(&stale).unwrap(),
        )
        .unwrap();

        let lock = manager.acquire_lock().await.unwrap();
        let content = std::fs::read_to_string(manager.lock_path()).unwrap();
        let info: LockInfo = serde_json::from_str(&content).unwrap();
        assert_ne!(info.holder, "old-host:1");
        lock.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemoryStateStore::new();
        store.put(record("a")).await.unwrap();
        store.remove("a").await.unwrap();
        store.put(record("b")).await.unwrap();

        let state = store.load().await.unwrap();
        assert!(!state.contains("a"));
        assert!(state.contains("b"));
    }
}
