//! Distributed lock protocol on top of conditional object writes.
//!
//! A lock for logical key `k` is a small JSON object stored at
//! `<prefix>/.locks/<k>.lock`. Acquisition relies on two conditional
//! writes offered by the blob store:
//!
//! - `PutMode::Create` (create-if-absent) for a fresh acquisition
//! - `PutMode::Update` (compare-and-swap on the object's e-tag) to take
//!   over a lock whose record has not been refreshed within the
//!   staleness threshold
//!
//! Only one writer can win either race. While a lock is held, a
//! background task rewrites its `updated_at` timestamp every refresh
//! interval so that live holders are never mistaken for crashed ones.

use crate::config::LockConfig;
use crate::context::Context;
use crate::error::{StorageError, StorageResult};
use crate::namespace::{normalize, KeyMapper};
use crate::types::SEPARATOR;
use chrono::{DateTime, Utc};
use object_store::path::Path;
use object_store::{ObjectStore, PutMode, PutOptions, PutPayload, UpdateVersion};
use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Directory (relative to the prefix) holding lock objects.
pub const LOCK_DIR: &str = ".locks";
/// Suffix appended to lock object names.
pub const LOCK_SUFFIX: &str = ".lock";

/// Returns the logical key of the lock object guarding `key`.
pub fn lock_key(key: &str) -> String {
    format!(
        "{LOCK_DIR}{SEPARATOR}{}{LOCK_SUFFIX}",
        key.trim_matches(SEPARATOR)
    )
}

/// Returns true if the normalized logical `key` lies in the lock namespace.
pub fn is_lock_key(key: &str) -> bool {
    key == LOCK_DIR
        || key
            .strip_prefix(LOCK_DIR)
            .is_some_and(|rest| rest.starts_with(SEPARATOR))
}

/// Payload of a lock object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    /// Identity of the backend instance that owns the lock.
    pub holder: String,
    /// Unique id of this acquisition.
    pub token: Uuid,
    /// When the lock was acquired.
    pub acquired_at: DateTime<Utc>,
    /// When the holder last refreshed the lock.
    pub updated_at: DateTime<Utc>,
}

impl LockRecord {
    /// Creates a record for a new acquisition by `holder`.
    pub fn new(holder: &str) -> Self {
        let now = Utc::now();
        Self {
            holder: holder.to_string(),
            token: Uuid::new_v4(),
            acquired_at: now,
            updated_at: now,
        }
    }

    /// Time since the last refresh. Zero if `updated_at` is in the future.
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.updated_at).to_std().unwrap_or(Duration::ZERO)
    }

    /// Returns true if the holder has not refreshed within `stale_after`.
    pub fn is_stale(&self, now: DateTime<Utc>, stale_after: Duration) -> bool {
        self.age(now) > stale_after
    }

    fn placeholder(modified: DateTime<Utc>) -> Self {
        Self {
            holder: "<unknown>".to_string(),
            token: Uuid::nil(),
            acquired_at: modified,
            updated_at: modified,
        }
    }
}

/// Lock object read back from the store, with the version needed to
/// overwrite it conditionally.
#[derive(Debug)]
struct Observed {
    record: LockRecord,
    version: UpdateVersion,
}

/// Outcome of one acquisition attempt.
#[derive(Debug)]
enum Attempt {
    Acquired,
    Held(LockRecord),
}

#[derive(Debug)]
struct HeldLock {
    key: String,
    token: Uuid,
    refresher: JoinHandle<()>,
}

impl Drop for HeldLock {
    fn drop(&mut self) {
        self.refresher.abort();
    }
}

/// Runs the lock protocol for one backend instance.
#[derive(Debug)]
pub(crate) struct Locker {
    store: Arc<dyn ObjectStore>,
    mapper: KeyMapper,
    config: LockConfig,
    holder: String,
    /// Locks owned by this instance, keyed by lock object path.
    held: Mutex<HashMap<Path, HeldLock>>,
}

impl Locker {
    pub(crate) fn new(store: Arc<dyn ObjectStore>, mapper: KeyMapper, config: LockConfig) -> Self {
        let holder = config.resolve_holder_id();
        Self {
            store,
            mapper,
            config,
            holder,
            held: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn holder(&self) -> &str {
        &self.holder
    }

    pub(crate) fn held_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.held.lock().values().map(|h| h.key.clone()).collect();
        keys.sort();
        keys
    }

    /// Blocks until the lock for `key` is acquired or `ctx` ends.
    pub(crate) async fn lock(&self, ctx: &Context, key: &str) -> StorageResult<()> {
        loop {
            match self.attempt(ctx, key).await? {
                Attempt::Acquired => return Ok(()),
                Attempt::Held(record) => {
                    debug!(
                        key = %key,
                        holder = %record.holder,
                        "lock busy, waiting"
                    );
                    ctx.sleep(self.poll_delay()).await?;
                }
            }
        }
    }

    /// Makes a single acquisition attempt.
    pub(crate) async fn try_lock(&self, ctx: &Context, key: &str) -> StorageResult<()> {
        match self.attempt(ctx, key).await? {
            Attempt::Acquired => Ok(()),
            Attempt::Held(record) => Err(StorageError::LockContention {
                key: key.to_string(),
                holder: record.holder,
            }),
        }
    }

    /// Releases the lock for `key` if this instance owns it or it is stale.
    pub(crate) async fn unlock(&self, ctx: &Context, key: &str) -> StorageResult<()> {
        let lock_key = lock_key(key);
        let path = self.mapper.resolve(&lock_key)?;

        // The local entry and its refresher stay until the release is
        // settled, so a failed unlock can be retried.
        let token = self.held.lock().get(&path).map(|held| held.token);

        let Some(observed) = self.read(ctx, &lock_key, &path).await? else {
            if self.held.lock().remove(&path).is_some() {
                warn!(key = %key, "held lock was already removed from the store");
            } else {
                debug!(key = %key, "unlock of unlocked key");
            }
            return Ok(());
        };

        let record = observed.record;
        let owned = token == Some(record.token);
        if !owned && token.is_some() {
            warn!(key = %key, holder = %record.holder, "held lock was taken over");
            self.held.lock().remove(&path);
        }
        if !owned && !record.is_stale(Utc::now(), self.config.stale_after) {
            warn!(
                key = %key,
                holder = %record.holder,
                "lock is held by another holder, leaving it in place"
            );
            return Ok(());
        }

        ctx.run(async {
            match self.store.delete(&path).await {
                Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
                Err(e) => Err(StorageError::from_store(&lock_key, e)),
            }
        })
        .await?;

        if owned {
            self.held.lock().remove(&path);
            info!(key = %key, "lock released");
        } else {
            info!(key = %key, holder = %record.holder, "expired lock removed");
        }
        Ok(())
    }

    /// Reads the current lock record for `key`, failing on undecodable payloads.
    pub(crate) async fn record(&self, ctx: &Context, key: &str) -> StorageResult<Option<LockRecord>> {
        let lock_key = lock_key(key);
        let path = self.mapper.resolve(&lock_key)?;
        let Some((bytes, _, _)) = self.read_raw(ctx, &lock_key, &path).await? else {
            return Ok(None);
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| StorageError::CorruptLock {
                key: key.to_string(),
                reason: e.to_string(),
            })
    }

    async fn attempt(&self, ctx: &Context, key: &str) -> StorageResult<Attempt> {
        let lock_key = lock_key(key);
        let path = self.mapper.resolve(&lock_key)?;

        loop {
            if let Some(err) = ctx.err() {
                return Err(err);
            }

            let record = LockRecord::new(&self.holder);
            if let Some(version) = self
                .put_record(ctx, &lock_key, &path, &record, PutMode::Create)
                .await?
            {
                info!(key = %key, holder = %self.holder, "lock acquired");
                self.hold(key, path, record, version);
                return Ok(Attempt::Acquired);
            }

            let Some(current) = self.read(ctx, &lock_key, &path).await? else {
                // Released between our create and read.
                continue;
            };

            if !current.record.is_stale(Utc::now(), self.config.stale_after) {
                return Ok(Attempt::Held(current.record));
            }

            warn!(
                key = %key,
                holder = %current.record.holder,
                age = ?current.record.age(Utc::now()),
                "lock is stale, taking over"
            );
            if let Some(version) = self
                .put_record(ctx, &lock_key, &path, &record, PutMode::Update(current.version))
                .await?
            {
                info!(
                    key = %key,
                    holder = %self.holder,
                    previous = %current.record.holder,
                    "stale lock taken over"
                );
                self.hold(key, path, record, version);
                return Ok(Attempt::Acquired);
            }
            // Another contender changed the record first; look again.
        }
    }

    /// Performs a conditional write of `record`.
    ///
    /// Returns the new version on success and `None` if the condition
    /// failed. The write is never abandoned half-way: if `ctx` ended while
    /// it was in flight, a successful write is rolled back before the
    /// context error is returned.
    async fn put_record(
        &self,
        ctx: &Context,
        lock_key: &str,
        path: &Path,
        record: &LockRecord,
        mode: PutMode,
    ) -> StorageResult<Option<UpdateVersion>> {
        let payload = PutPayload::from(serde_json::to_vec(record)?);
        let is_update = matches!(mode, PutMode::Update(_));
        let opts = PutOptions {
            mode,
            ..PutOptions::default()
        };

        match self.store.put_opts(path, payload, opts).await {
            Ok(put) => {
                if let Some(err) = ctx.err() {
                    if let Err(e) = self.store.delete(path).await {
                        error!(key = %lock_key, error = %e, "failed to roll back lock after cancellation");
                    }
                    return Err(err);
                }
                Ok(Some(UpdateVersion {
                    e_tag: put.e_tag,
                    version: put.version,
                }))
            }
            Err(object_store::Error::AlreadyExists { .. })
            | Err(object_store::Error::Precondition { .. }) => Ok(None),
            Err(object_store::Error::NotFound { .. }) if is_update => Ok(None),
            Err(e) => Err(StorageError::from_store(lock_key, e)),
        }
    }

    /// Reads the lock object, tolerating undecodable payloads.
    ///
    /// A payload that does not decode is treated as last refreshed at the
    /// object's modification time, so garbage left by a crash still expires.
    async fn read(&self, ctx: &Context, lock_key: &str, path: &Path) -> StorageResult<Option<Observed>> {
        let Some((bytes, version, modified)) = self.read_raw(ctx, lock_key, path).await? else {
            return Ok(None);
        };
        let record = match serde_json::from_slice::<LockRecord>(&bytes) {
            Ok(record) => record,
            Err(e) => {
                warn!(key = %lock_key, error = %e, "undecodable lock record");
                LockRecord::placeholder(modified)
            }
        };
        Ok(Some(Observed { record, version }))
    }

    async fn read_raw(
        &self,
        ctx: &Context,
        lock_key: &str,
        path: &Path,
    ) -> StorageResult<Option<(bytes::Bytes, UpdateVersion, DateTime<Utc>)>> {
        let result = ctx
            .run(async {
                let got = self
                    .store
                    .get(path)
                    .await
                    .map_err(|e| StorageError::from_store(lock_key, e))?;
                let version = UpdateVersion {
                    e_tag: got.meta.e_tag.clone(),
                    version: got.meta.version.clone(),
                };
                let modified = got.meta.last_modified;
                let bytes = got
                    .bytes()
                    .await
                    .map_err(|e| StorageError::from_store(lock_key, e))?;
                Ok((bytes, version, modified))
            })
            .await;

        match result {
            Ok(found) => Ok(Some(found)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn hold(&self, key: &str, path: Path, record: LockRecord, version: UpdateVersion) {
        let token = record.token;
        let refresher = tokio::spawn(refresh(
            Arc::clone(&self.store),
            key.to_string(),
            path.clone(),
            record,
            version,
            self.config.refresh_interval,
        ));
        let held = HeldLock {
            key: normalize(key),
            token,
            refresher,
        };
        let previous = self.held.lock().insert(path, held);
        if previous.is_some() {
            warn!(key = %key, "replaced a local lock entry that had been lost");
        }
    }

    fn poll_delay(&self) -> Duration {
        let max = u64::try_from(self.config.poll_jitter.as_millis()).unwrap_or(u64::MAX);
        let jitter = if max == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=max)
        };
        self.config.poll_interval + Duration::from_millis(jitter)
    }
}

/// Keeps a held lock fresh until aborted or until the record is changed
/// by someone else.
async fn refresh(
    store: Arc<dyn ObjectStore>,
    key: String,
    path: Path,
    mut record: LockRecord,
    mut version: UpdateVersion,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        ticker.tick().await;
        record.updated_at = Utc::now();

        let payload = match serde_json::to_vec(&record) {
            Ok(bytes) => PutPayload::from(bytes),
            Err(e) => {
                error!(key = %key, error = %e, "failed to encode lock record");
                return;
            }
        };
        let opts = PutOptions {
            mode: PutMode::Update(version.clone()),
            ..PutOptions::default()
        };

        match store.put_opts(&path, payload, opts).await {
            Ok(put) => {
                version = UpdateVersion {
                    e_tag: put.e_tag,
                    version: put.version,
                };
                debug!(key = %key, "lock refreshed");
            }
            Err(object_store::Error::Precondition { .. })
            | Err(object_store::Error::NotFound { .. }) => {
                error!(key = %key, "lock lost: record was changed or removed by another holder");
                return;
            }
            Err(e) => {
                warn!(key = %key, error = %e, "lock refresh failed, will retry");
            }
        }
    }
}
