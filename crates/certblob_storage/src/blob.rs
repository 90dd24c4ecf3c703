//! Object-storage backed certificate storage.

use crate::backend::CertStorage;
use crate::config::{AzureBlobConfig, LockConfig};
use crate::context::Context;
use crate::error::{StorageError, StorageResult};
use crate::lock::{is_lock_key, LockRecord, Locker};
use crate::namespace::KeyMapper;
use crate::types::{is_terminal_key, KeyInfo, SEPARATOR};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use object_store::azure::MicrosoftAzureBuilder;
use object_store::memory::InMemory;
use object_store::path::Path;
use object_store::{ObjectStore, PutPayload};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Settings for a [`BlobStorage`] built on an arbitrary object store.
#[derive(Debug, Clone, Default)]
pub struct StorageOptions {
    /// Virtual root directory for every key.
    pub prefix: String,
    /// Account name shown in diagnostics.
    pub account: String,
    /// Container name shown in diagnostics.
    pub container: String,
    /// Lock protocol settings.
    pub lock: LockConfig,
}

impl StorageOptions {
    /// Creates options rooted at `prefix`.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            ..Self::default()
        }
    }

    /// Sets the account label.
    pub fn with_account(mut self, account: impl Into<String>) -> Self {
        self.account = account.into();
        self
    }

    /// Sets the container label.
    pub fn with_container(mut self, container: impl Into<String>) -> Self {
        self.container = container.into();
        self
    }

    /// Sets the lock protocol settings.
    pub fn with_lock(mut self, lock: LockConfig) -> Self {
        self.lock = lock;
        self
    }
}

/// A [`CertStorage`] backed by a blob store.
///
/// Every logical key is stored under the configured prefix. Locks live
/// in the reserved `.locks/` directory below the prefix and never show up
/// in listings.
///
/// # Thread Safety
///
/// The backend is `Send + Sync`; share one instance (e.g. in an `Arc`)
/// across all tasks of a process.
///
/// # Example
///
/// ```rust
/// use certblob_storage::{BlobStorage, CertStorage, Context, StorageOptions};
///
/// # #[tokio::main]
/// # async fn main() {
/// let storage = BlobStorage::in_memory(StorageOptions::new("caddy")).unwrap();
/// let ctx = Context::background();
/// storage.store(&ctx, "certificates/a.crt", b"PEM").await.unwrap();
/// assert_eq!(storage.load(&ctx, "certificates/a.crt").await.unwrap(), b"PEM");
/// # }
/// ```
#[derive(Debug)]
pub struct BlobStorage {
    store: Arc<dyn ObjectStore>,
    mapper: KeyMapper,
    account: String,
    container: String,
    locker: Locker,
}

impl BlobStorage {
    /// Connects to an Azure Blob Storage container.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Config`] if the configuration is incomplete
    /// or the client cannot be built.
    pub fn azure(config: &AzureBlobConfig) -> StorageResult<Self> {
        config.validate()?;

        let mut builder = MicrosoftAzureBuilder::new().with_container_name(&config.container);
        if !config.account_name.is_empty() {
            builder = builder.with_account(&config.account_name);
        }
        if !config.account_key.is_empty() {
            builder = builder.with_access_key(config.account_key.expose());
        }
        if config.use_emulator {
            builder = builder.with_use_emulator(true);
        }
        if let Some(endpoint) = &config.endpoint {
            builder = builder.with_endpoint(endpoint.clone());
        }
        if config.allow_http {
            builder = builder.with_allow_http(true);
        }

        let store = builder.build().map_err(|e| {
            StorageError::Config(format!("failed to create Azure Blob client: {e}"))
        })?;

        debug!(
            account = %config.account_name,
            container = %config.container,
            prefix = %config.prefix,
            "Azure blob storage initialised"
        );

        Self::with_store(
            Arc::new(store),
            StorageOptions::new(config.prefix.clone())
                .with_account(config.account_name.clone())
                .with_container(config.container.clone())
                .with_lock(config.lock.clone()),
        )
    }

    /// Creates a backend over a private in-memory store.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Config`] if the lock settings are invalid.
    pub fn in_memory(options: StorageOptions) -> StorageResult<Self> {
        Self::with_store(Arc::new(InMemory::new()), options)
    }

    /// Creates a backend over an existing object store.
    ///
    /// Several instances may share one store; each acts as an independent
    /// lock holder, like separate processes of a fleet.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Config`] if the lock settings are invalid.
    pub fn with_store(store: Arc<dyn ObjectStore>, options: StorageOptions) -> StorageResult<Self> {
        options.lock.validate()?;
        let mapper = KeyMapper::new(&options.prefix);
        let locker = Locker::new(Arc::clone(&store), mapper.clone(), options.lock);
        Ok(Self {
            store,
            mapper,
            account: options.account,
            container: options.container,
            locker,
        })
    }

    /// Returns the normalized key prefix.
    pub fn prefix(&self) -> &str {
        self.mapper.prefix()
    }

    /// Returns the key mapper.
    pub fn mapper(&self) -> &KeyMapper {
        &self.mapper
    }

    /// Returns the identity written into lock records.
    pub fn holder_id(&self) -> &str {
        self.locker.holder()
    }

    /// Returns the keys whose locks this instance currently holds.
    pub fn held_locks(&self) -> Vec<String> {
        self.locker.held_keys()
    }

    /// Reads the lock record for `key`, if any.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::CorruptLock`] if the lock object cannot be
    /// decoded, or a transport/context error.
    pub async fn lock_record(&self, ctx: &Context, key: &str) -> StorageResult<Option<LockRecord>> {
        self.locker.record(ctx, key).await
    }

    /// Resolves a data key, rejecting the reserved lock namespace.
    fn resolve(&self, key: &str) -> StorageResult<Path> {
        let path = self.mapper.resolve(key)?;
        let logical = self.mapper.cut_key_prefix(path.as_ref());
        if is_lock_key(&logical) {
            return Err(StorageError::InvalidKey {
                key: key.to_string(),
                reason: "reserved for lock objects".into(),
            });
        }
        Ok(path)
    }

    /// Maps a listed backend path back to a logical key.
    ///
    /// Returns `None` for lock objects.
    fn logical_key(&self, location: &Path) -> Option<String> {
        let key = self.mapper.strip(location.as_ref()).unwrap_or_else(|| {
            warn!(path = %location, prefix = %self.mapper.prefix(), "listed path outside of prefix");
            location.to_string()
        });
        (!is_lock_key(&key)).then_some(key)
    }

    /// Returns the newest modification time below `path`, or `None` if
    /// nothing but lock objects lives there.
    async fn newest_child(&self, key: &str, path: &Path) -> StorageResult<Option<DateTime<Utc>>> {
        let mut newest: Option<DateTime<Utc>> = None;
        let mut stream = self.store.list(Some(path));
        while let Some(meta) = stream
            .try_next()
            .await
            .map_err(|e| StorageError::from_store(key, e))?
        {
            if self.logical_key(&meta.location).is_none() {
                continue;
            }
            newest = Some(match newest {
                Some(current) if current >= meta.last_modified => current,
                _ => meta.last_modified,
            });
        }
        Ok(newest)
    }
}

impl fmt::Display for BlobStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Azure Blob Storage Account: {}, Container: {}, Prefix: {}",
            self.account,
            self.container,
            self.mapper.prefix()
        )
    }
}

#[async_trait]
impl CertStorage for BlobStorage {
    #[instrument(skip(self, ctx, value), fields(key = %key, size = value.len()))]
    async fn store(&self, ctx: &Context, key: &str, value: &[u8]) -> StorageResult<()> {
        let path = self.resolve(key)?;
        debug!(path = %path, "store");
        let payload = PutPayload::from(value.to_vec());
        ctx.run(async {
            self.store
                .put(&path, payload)
                .await
                .map(|_| ())
                .map_err(|e| StorageError::from_store(key, e))
        })
        .await
    }

    #[instrument(skip(self, ctx), fields(key = %key))]
    async fn load(&self, ctx: &Context, key: &str) -> StorageResult<Vec<u8>> {
        if !is_terminal_key(key) {
            return Err(StorageError::NotFound {
                key: key.to_string(),
            });
        }
        let path = self.resolve(key)?;
        debug!(path = %path, "load");
        ctx.run(async {
            let result = self
                .store
                .get(&path)
                .await
                .map_err(|e| StorageError::from_store(key, e))?;
            let bytes = result
                .bytes()
                .await
                .map_err(|e| StorageError::from_store(key, e))?;
            Ok(bytes.to_vec())
        })
        .await
    }

    #[instrument(skip(self, ctx), fields(key = %key))]
    async fn delete(&self, ctx: &Context, key: &str) -> StorageResult<()> {
        let path = self.resolve(key)?;
        debug!(path = %path, "delete");
        ctx.run(async {
            match self.store.delete(&path).await {
                Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
                Err(e) => Err(StorageError::from_store(key, e)),
            }
        })
        .await
    }

    #[instrument(skip(self, ctx), fields(key = %key))]
    async fn try_exists(&self, ctx: &Context, key: &str) -> StorageResult<bool> {
        let path = self.resolve(key)?;
        ctx.run(async {
            if is_terminal_key(key) {
                match self.store.head(&path).await {
                    Ok(_) => return Ok(true),
                    Err(object_store::Error::NotFound { .. }) => {}
                    Err(e) => return Err(StorageError::from_store(key, e)),
                }
            }
            let mut stream = self.store.list(Some(&path));
            while let Some(meta) = stream
                .try_next()
                .await
                .map_err(|e| StorageError::from_store(key, e))?
            {
                if self.logical_key(&meta.location).is_some() {
                    return Ok(true);
                }
            }
            Ok(false)
        })
        .await
    }

    #[instrument(skip(self, ctx), fields(key = %key))]
    async fn try_stat(&self, ctx: &Context, key: &str) -> StorageResult<KeyInfo> {
        let path = self.resolve(key)?;
        ctx.run(async {
            if is_terminal_key(key) {
                match self.store.head(&path).await {
                    Ok(meta) => {
                        let size = meta.size as u64;
                        debug!(path = %path, size, "stat");
                        return Ok(KeyInfo {
                            key: key.to_string(),
                            modified: meta.last_modified,
                            size,
                            is_terminal: true,
                        });
                    }
                    Err(object_store::Error::NotFound { .. }) => {}
                    Err(e) => return Err(StorageError::from_store(key, e)),
                }
            }

            match self.newest_child(key, &path).await? {
                Some(modified) => Ok(KeyInfo {
                    key: key.to_string(),
                    modified,
                    size: 0,
                    is_terminal: is_terminal_key(key),
                }),
                None => Err(StorageError::NotFound {
                    key: key.to_string(),
                }),
            }
        })
        .await
    }

    #[instrument(skip(self, ctx), fields(prefix = %prefix))]
    async fn list(
        &self,
        ctx: &Context,
        prefix: &str,
        recursive: bool,
    ) -> StorageResult<Vec<String>> {
        let path = self.mapper.resolve(prefix)?;
        debug!(path = %path, "list");
        let root = (!path.as_ref().is_empty()).then_some(&path);

        ctx.run(async {
            let mut keys = Vec::new();
            if recursive {
                let mut stream = self.store.list(root);
                while let Some(meta) = stream
                    .try_next()
                    .await
                    .map_err(|e| StorageError::from_store(prefix, e))?
                {
                    keys.extend(self.logical_key(&meta.location));
                }
            } else {
                let listing = self
                    .store
                    .list_with_delimiter(root)
                    .await
                    .map_err(|e| StorageError::from_store(prefix, e))?;
                for meta in &listing.objects {
                    keys.extend(self.logical_key(&meta.location));
                }
                for dir in &listing.common_prefixes {
                    if let Some(key) = self.logical_key(dir) {
                        keys.push(format!("{key}{SEPARATOR}"));
                    }
                }
            }
            keys.sort();
            Ok(keys)
        })
        .await
    }

    #[instrument(skip(self, ctx), fields(key = %key))]
    async fn lock(&self, ctx: &Context, key: &str) -> StorageResult<()> {
        self.locker.lock(ctx, key).await
    }

    #[instrument(skip(self, ctx), fields(key = %key))]
    async fn try_lock(&self, ctx: &Context, key: &str) -> StorageResult<()> {
        self.locker.try_lock(ctx, key).await
    }

    #[instrument(skip(self, ctx), fields(key = %key))]
    async fn unlock(&self, ctx: &Context, key: &str) -> StorageResult<()> {
        self.locker.unlock(ctx, key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn storage(prefix: &str) -> BlobStorage {
        BlobStorage::in_memory(StorageOptions::new(prefix)).unwrap()
    }

    fn shared(store: &Arc<InMemory>, prefix: &str) -> BlobStorage {
        let store: Arc<dyn ObjectStore> = store.clone();
        BlobStorage::with_store(store, StorageOptions::new(prefix)).unwrap()
    }

    #[tokio::test]
    async fn store_then_load_round_trips() {
        let storage = storage("caddy");
        let ctx = Context::background();
        let payload = vec![0u8, 1, 2, 255, 10, 13];

        storage.store(&ctx, "certificates/a/a.key", &payload).await.unwrap();
        assert_eq!(storage.load(&ctx, "certificates/a/a.key").await.unwrap(), payload);
    }

    #[tokio::test]
    async fn store_overwrites() {
        let storage = storage("caddy");
        let ctx = Context::background();

        storage.store(&ctx, "k", b"one").await.unwrap();
        storage.store(&ctx, "k", b"two").await.unwrap();
        assert_eq!(storage.load(&ctx, "k").await.unwrap(), b"two");
    }

    #[tokio::test]
    async fn empty_payload_is_storable() {
        let storage = storage("caddy");
        let ctx = Context::background();

        storage.store(&ctx, "empty", b"").await.unwrap();
        assert!(storage.load(&ctx, "empty").await.unwrap().is_empty());
        assert!(storage.exists(&ctx, "empty").await);
    }

    #[tokio::test]
    async fn load_missing_is_not_found() {
        let storage = storage("caddy");
        let err = storage
            .load(&Context::background(), "nope")
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn delete_then_absent() {
        let storage = storage("caddy");
        let ctx = Context::background();

        storage.store(&ctx, "a/b", b"x").await.unwrap();
        storage.delete(&ctx, "a/b").await.unwrap();

        assert!(!storage.exists(&ctx, "a/b").await);
        assert!(storage.load(&ctx, "a/b").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn delete_missing_is_ok() {
        let storage = storage("caddy");
        storage
            .delete(&Context::background(), "never/stored")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn prefix_isolates_key_spaces() {
        let store = Arc::new(InMemory::new());
        let one = shared(&store, "one");
        let two = shared(&store, "two");
        let ctx = Context::background();

        one.store(&ctx, "k", b"1").await.unwrap();
        assert!(!two.exists(&ctx, "k").await);
        assert!(two.list(&ctx, "", true).await.unwrap().is_empty());

        let raw = store.get(&Path::from("one/k")).await.unwrap();
        assert_eq!(raw.bytes().await.unwrap().as_ref(), b"1");
    }

    #[tokio::test]
    async fn list_recursive_strips_prefix() {
        let storage = storage("caddy/certs");
        let ctx = Context::background();
        for key in ["a/b", "a/c", "a/d/e", "ab/x", "z"] {
            storage.store(&ctx, key, b"v").await.unwrap();
        }

        let keys = storage.list(&ctx, "a", true).await.unwrap();
        assert_eq!(keys, vec!["a/b", "a/c", "a/d/e"]);
    }

    #[tokio::test]
    async fn list_non_recursive_returns_one_level() {
        let storage = storage("caddy");
        let ctx = Context::background();
        for key in ["a/b", "a/c", "a/d/e", "a/d/f"] {
            storage.store(&ctx, key, b"v").await.unwrap();
        }

        let keys = storage.list(&ctx, "a", false).await.unwrap();
        assert_eq!(keys, vec!["a/b", "a/c", "a/d/"]);
    }

    #[tokio::test]
    async fn list_root_hides_locks() {
        let storage = storage("caddy");
        let ctx = Context::background();

        storage.store(&ctx, "certificates/a.crt", b"v").await.unwrap();
        storage.lock(&ctx, "certificates/a.crt").await.unwrap();

        assert_eq!(
            storage.list(&ctx, "", true).await.unwrap(),
            vec!["certificates/a.crt"]
        );
        assert_eq!(
            storage.list(&ctx, "", false).await.unwrap(),
            vec!["certificates/"]
        );
        storage.unlock(&ctx, "certificates/a.crt").await.unwrap();
    }

    #[tokio::test]
    async fn lock_namespace_is_reserved() {
        let storage = storage("caddy");
        let err = storage
            .store(&Context::background(), ".locks/x.lock", b"v")
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidKey { .. }));
    }

    #[tokio::test]
    async fn stat_reports_file_metadata() {
        let storage = storage("caddy");
        let ctx = Context::background();
        storage.store(&ctx, "certificates/a.crt", b"12345").await.unwrap();

        let info = storage.stat(&ctx, "certificates/a.crt").await;
        assert_eq!(info.key, "certificates/a.crt");
        assert_eq!(info.size, 5);
        assert!(info.is_terminal);
        assert!(info.modified > DateTime::<Utc>::default());
    }

    #[tokio::test]
    async fn stat_directory_is_not_terminal() {
        let storage = storage("caddy");
        let ctx = Context::background();
        storage.store(&ctx, "certificates/a.crt", b"12345").await.unwrap();

        let info = storage.stat(&ctx, "certificates/").await;
        assert_eq!(info.key, "certificates/");
        assert!(!info.is_terminal);
        assert_eq!(info.size, 0);

    }

    #[tokio::test]
    async fn stat_terminality_follows_trailing_separator() {
        let storage = storage("caddy");
        let ctx = Context::background();
        storage.store(&ctx, "certificates/a.crt", b"12345").await.unwrap();

        // A directory named without the separator still reports terminal.
        let info = storage.stat(&ctx, "certificates").await;
        assert_eq!(info.key, "certificates");
        assert_eq!(info.size, 0);
        assert!(info.is_terminal);
    }

    #[tokio::test]
    async fn stat_missing_is_zero_value() {
        let storage = storage("caddy");
        let ctx = Context::background();

        assert!(storage.stat(&ctx, "missing").await.is_zero());
        assert!(storage
            .try_stat(&ctx, "missing")
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn exists_sees_virtual_directories() {
        let storage = storage("caddy");
        let ctx = Context::background();
        storage.store(&ctx, "acme/ca/users/a.json", b"{}").await.unwrap();

        assert!(storage.exists(&ctx, "acme/ca").await);
        assert!(storage.exists(&ctx, "acme/ca/").await);
        assert!(!storage.exists(&ctx, "acme/c").await);
    }

    #[tokio::test]
    async fn exists_swallows_errors() {
        let storage = storage("caddy");
        let ctx = Context::background();
        assert!(!storage.exists(&ctx, "bad/../key").await);
        assert!(storage.try_exists(&ctx, "bad/../key").await.is_err());
    }

    #[tokio::test]
    async fn cancelled_context_aborts_operations() {
        let storage = storage("caddy");
        let ctx = Context::background();
        ctx.cancel();

        assert!(matches!(
            storage.store(&ctx, "k", b"v").await,
            Err(StorageError::Canceled)
        ));
        assert!(matches!(
            storage.load(&ctx, "k").await,
            Err(StorageError::Canceled)
        ));
        assert!(!storage.exists(&ctx, "k").await);
    }

    #[tokio::test]
    async fn fleet_instances_exclude_each_other() {
        let store = Arc::new(InMemory::new());
        let lock = LockConfig::default()
            .with_poll_interval(Duration::from_millis(10))
            .with_poll_jitter(Duration::ZERO);
        let a = BlobStorage::with_store(store.clone(), StorageOptions::new("caddy").with_lock(lock.clone())).unwrap();
        let b = BlobStorage::with_store(store, StorageOptions::new("caddy").with_lock(lock)).unwrap();
        let ctx = Context::background();

        a.lock(&ctx, "issue_cert_example.com").await.unwrap();
        assert!(matches!(
            b.try_lock(&ctx, "issue_cert_example.com").await,
            Err(StorageError::LockContention { .. })
        ));
        a.unlock(&ctx, "issue_cert_example.com").await.unwrap();
        b.try_lock(&ctx, "issue_cert_example.com").await.unwrap();
        assert_eq!(b.held_locks(), vec!["issue_cert_example.com".to_string()]);

        let record = b
            .lock_record(&ctx, "issue_cert_example.com")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.holder, b.holder_id());
    }

    #[test]
    fn display_omits_secret() {
        let storage = BlobStorage::in_memory(
            StorageOptions::new("caddy")
                .with_account("acct")
                .with_container("certs"),
        )
        .unwrap();
        assert_eq!(
            storage.to_string(),
            "Azure Blob Storage Account: acct, Container: certs, Prefix: caddy"
        );
    }

    #[test]
    fn azure_requires_container() {
        let config = AzureBlobConfig::new("acct", crate::AccountKey::new("a2V5"), "");
        assert!(matches!(
            BlobStorage::azure(&config),
            Err(StorageError::Config(_))
        ));
    }

    #[test]
    fn azure_builds_from_config() {
        let config = AzureBlobConfig::new("acct", crate::AccountKey::new("a2V5"), "certs")
            .with_prefix("/caddy/");
        let storage = BlobStorage::azure(&config).unwrap();
        assert_eq!(storage.prefix(), "caddy");
        assert_eq!(
            storage.to_string(),
            "Azure Blob Storage Account: acct, Container: certs, Prefix: caddy"
        );
    }
}
