//! Backend configuration.

use crate::error::{StorageError, StorageResult};
use serde::Deserialize;
use std::fmt;
use std::time::Duration;
use uuid::Uuid;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Environment variable holding the storage account name.
pub const ENV_ACCOUNT_NAME: &str = "AZURE_ACCOUNT_NAME";
/// Environment variable holding the storage account key.
pub const ENV_ACCOUNT_KEY: &str = "AZURE_ACCOUNT_KEY";
/// Environment variable holding the container name.
pub const ENV_CONTAINER: &str = "AZURE_CONTAINER";
/// Environment variable holding the key prefix.
pub const ENV_PREFIX: &str = "AZURE_PREFIX";

/// Shared-key credential for a storage account.
///
/// The key is wiped from memory on drop and never printed.
#[derive(Clone, Default, PartialEq, Eq, Zeroize, ZeroizeOnDrop, Deserialize)]
#[serde(transparent)]
pub struct AccountKey(String);

impl AccountKey {
    /// Wraps a base64 account key.
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Returns the key material.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Returns true if no key is set.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for AccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccountKey(<redacted>)")
    }
}

/// Timing and identity settings for the distributed lock protocol.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// A lock whose record was not refreshed for this long may be stolen.
    #[serde(with = "millis", rename = "stale_after_ms")]
    pub stale_after: Duration,
    /// How often a held lock's record is rewritten.
    #[serde(with = "millis", rename = "refresh_interval_ms")]
    pub refresh_interval: Duration,
    /// Wait between acquisition attempts while the lock is contended.
    #[serde(with = "millis", rename = "poll_interval_ms")]
    pub poll_interval: Duration,
    /// Upper bound of the random delay added to each poll.
    #[serde(with = "millis", rename = "poll_jitter_ms")]
    pub poll_jitter: Duration,
    /// Identity written into lock records. Generated when unset.
    pub holder_id: Option<String>,
}

impl LockConfig {
    /// Sets the staleness threshold.
    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    /// Sets the refresh interval.
    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval;
        self
    }

    /// Sets the poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets the poll jitter.
    pub fn with_poll_jitter(mut self, jitter: Duration) -> Self {
        self.poll_jitter = jitter;
        self
    }

    /// Sets a fixed holder identity.
    pub fn with_holder_id(mut self, holder_id: impl Into<String>) -> Self {
        self.holder_id = Some(holder_id.into());
        self
    }

    /// Returns the configured holder id, or generates a unique one.
    pub fn resolve_holder_id(&self) -> String {
        match &self.holder_id {
            Some(id) if !id.is_empty() => id.clone(),
            _ => {
                let host = std::env::var("HOSTNAME")
                    .ok()
                    .filter(|h| !h.is_empty())
                    .unwrap_or_else(|| "certblob".to_string());
                format!("{}-{}", host, Uuid::new_v4())
            }
        }
    }

    /// Checks that the timings are usable.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Config`] if the poll interval is zero or the
    /// refresh interval is not shorter than the staleness threshold.
    pub fn validate(&self) -> StorageResult<()> {
        if self.poll_interval.is_zero() {
            return Err(StorageError::Config(
                "lock poll interval must be greater than zero".into(),
            ));
        }
        if self.refresh_interval.is_zero() || self.refresh_interval >= self.stale_after {
            return Err(StorageError::Config(format!(
                "lock refresh interval ({:?}) must be non-zero and shorter than the staleness threshold ({:?})",
                self.refresh_interval, self.stale_after
            )));
        }
        Ok(())
    }
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            stale_after: Duration::from_secs(120),
            refresh_interval: Duration::from_secs(5),
            poll_interval: Duration::from_secs(1),
            poll_jitter: Duration::from_millis(250),
            holder_id: None,
        }
    }
}

/// Configuration for an Azure Blob Storage backend.
///
/// Field names match the JSON module configuration (`account_name`,
/// `account_key`, `container`, `prefix`).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AzureBlobConfig {
    /// Storage account name.
    pub account_name: String,
    /// Shared key for the account.
    pub account_key: AccountKey,
    /// Container holding the certificate data.
    pub container: String,
    /// Virtual root directory inside the container.
    pub prefix: String,
    /// Overrides the `https://<account>.blob.core.windows.net` endpoint.
    pub endpoint: Option<String>,
    /// Talk to a local Azurite emulator.
    pub use_emulator: bool,
    /// Permit plain-HTTP endpoints.
    pub allow_http: bool,
    /// Lock protocol settings.
    pub lock: LockConfig,
}

impl AzureBlobConfig {
    /// Creates a configuration for `container` in `account_name`.
    pub fn new(
        account_name: impl Into<String>,
        account_key: AccountKey,
        container: impl Into<String>,
    ) -> Self {
        Self {
            account_name: account_name.into(),
            account_key,
            container: container.into(),
            ..Self::default()
        }
    }

    /// Sets the key prefix.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Sets a custom endpoint.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Targets the Azurite emulator.
    pub fn with_emulator(mut self) -> Self {
        self.use_emulator = true;
        self.allow_http = true;
        self
    }

    /// Sets the lock protocol settings.
    pub fn with_lock(mut self, lock: LockConfig) -> Self {
        self.lock = lock;
        self
    }

    /// Fills empty fields from the process environment.
    pub fn resolve_env(self) -> Self {
        self.resolve_env_with(|name| std::env::var(name).ok())
    }

    /// Fills empty fields using `lookup`. Explicit settings are kept.
    pub fn resolve_env_with<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if self.account_name.is_empty() {
            if let Some(v) = lookup(ENV_ACCOUNT_NAME) {
                self.account_name = v;
            }
        }
        if self.account_key.is_empty() {
            if let Some(v) = lookup(ENV_ACCOUNT_KEY) {
                self.account_key = AccountKey::new(v);
            }
        }
        if self.container.is_empty() {
            if let Some(v) = lookup(ENV_CONTAINER) {
                self.container = v;
            }
        }
        if self.prefix.is_empty() {
            if let Some(v) = lookup(ENV_PREFIX) {
                self.prefix = v;
            }
        }
        self
    }

    /// Checks that a backend can be built from this configuration.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Config`] naming the first missing or
    /// inconsistent setting.
    pub fn validate(&self) -> StorageResult<()> {
        if !self.use_emulator {
            if self.account_name.is_empty() {
                return Err(StorageError::Config(format!(
                    "account name is required (set account_name or {ENV_ACCOUNT_NAME})"
                )));
            }
            if self.account_key.is_empty() {
                return Err(StorageError::Config(format!(
                    "account key is required (set account_key or {ENV_ACCOUNT_KEY})"
                )));
            }
        }
        if self.container.is_empty() {
            return Err(StorageError::Config(format!(
                "container is required (set container or {ENV_CONTAINER})"
            )));
        }
        self.lock.validate()
    }
}

mod millis {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
