//! Test fixtures and backend helpers.
//!
//! Provides in-memory backends, including a "fleet" of independent
//! instances sharing one store, and helpers to plant raw objects the way
//! a crashed process would leave them.

use certblob_storage::{lock_key, BlobStorage, KeyMapper, LockConfig, LockRecord, StorageOptions};
use chrono::Utc;
use object_store::memory::InMemory;
use object_store::path::Path;
use object_store::{ObjectStore, PutPayload};
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::NamedTempFile;

/// Prefix used by fixtures unless told otherwise.
pub const TEST_PREFIX: &str = "caddy";

/// Lock timings short enough for tests.
///
/// Locks go stale after 500ms and are refreshed every 50ms.
pub fn fast_lock_config() -> LockConfig {
    LockConfig::default()
        .with_stale_after(Duration::from_millis(500))
        .with_refresh_interval(Duration::from_millis(50))
        .with_poll_interval(Duration::from_millis(10))
        .with_poll_jitter(Duration::from_millis(5))
}

/// Creates a private in-memory backend with fast lock timings.
pub fn memory_storage(prefix: &str) -> BlobStorage {
    BlobStorage::in_memory(StorageOptions::new(prefix).with_lock(fast_lock_config()))
        .expect("Failed to create in-memory storage")
}

/// Several backend instances sharing one in-memory store.
///
/// Each [`node`](MemoryFleet::node) behaves like a separate server
/// process: it has its own holder identity and its own lock bookkeeping.
pub struct MemoryFleet {
    store: Arc<InMemory>,
    prefix: String,
    lock: LockConfig,
    next_node: AtomicUsize,
}

impl MemoryFleet {
    /// Creates a fleet rooted at `prefix` with fast lock timings.
    pub fn new(prefix: &str) -> Self {
        Self {
            store: Arc::new(InMemory::new()),
            prefix: prefix.to_string(),
            lock: fast_lock_config(),
            next_node: AtomicUsize::new(0),
        }
    }

    /// Uses `lock` for nodes created afterwards.
    #[must_use]
    pub fn with_lock(mut self, lock: LockConfig) -> Self {
        self.lock = lock;
        self
    }

    /// Creates a new node named `node-<n>`.
    pub fn node(&self) -> BlobStorage {
        let n = self.next_node.fetch_add(1, Ordering::SeqCst);
        let store: Arc<dyn ObjectStore> = self.store.clone();
        BlobStorage::with_store(
            store,
            StorageOptions::new(self.prefix.as_str())
                .with_account("fleet")
                .with_container("memory")
                .with_lock(self.lock.clone().with_holder_id(format!("node-{n}"))),
        )
        .expect("Failed to create fleet node")
    }

    /// Returns the shared store.
    pub fn store(&self) -> Arc<InMemory> {
        Arc::clone(&self.store)
    }

    /// Returns the key mapper every node uses.
    pub fn mapper(&self) -> KeyMapper {
        KeyMapper::new(&self.prefix)
    }

    /// Writes raw bytes at a backend path, bypassing all nodes.
    pub async fn put_raw(&self, path: &str, bytes: &[u8]) {
        self.store
            .put(&Path::from(path), PutPayload::from(bytes.to_vec()))
            .await
            .expect("Failed to write raw object");
    }

    /// Reads raw bytes at a backend path, or `None` if absent.
    pub async fn get_raw(&self, path: &str) -> Option<Vec<u8>> {
        match self.store.get(&Path::from(path)).await {
            Ok(result) => Some(
                result
                    .bytes()
                    .await
                    .expect("Failed to read raw object")
                    .to_vec(),
            ),
            Err(object_store::Error::NotFound { .. }) => None,
            Err(e) => panic!("Failed to read raw object: {e}"),
        }
    }

    /// Leaves a lock for `key` as a crashed holder would: last refreshed
    /// `age` ago and never refreshed again.
    pub async fn plant_abandoned_lock(&self, key: &str, holder: &str, age: Duration) -> LockRecord {
        let mut record = LockRecord::new(holder);
        let age = chrono::Duration::from_std(age).expect("Lock age out of range");
        record.acquired_at = Utc::now() - age;
        record.updated_at = record.acquired_at;

        let path = self.mapper().key_prefix(&lock_key(key));
        let bytes = serde_json::to_vec(&record).expect("Failed to encode lock record");
        self.put_raw(&path, &bytes).await;
        record
    }
}

impl Default for MemoryFleet {
    fn default() -> Self {
        Self::new(TEST_PREFIX)
    }
}

/// Writes `json` to a temporary file, e.g. for CLI `--config` tests.
///
/// The file is removed when the returned handle is dropped.
pub fn temp_config_file(json: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("Failed to create temp file");
    file.write_all(json.as_bytes())
        .expect("Failed to write temp config");
    file.flush().expect("Failed to flush temp config");
    file
}
