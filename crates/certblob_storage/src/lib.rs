//! # certblob Storage
//!
//! Object-storage backend for TLS certificate data.
//!
//! An automatic certificate manager persists certificates, private keys,
//! account metadata and issuance locks through the [`CertStorage`] trait.
//! [`BlobStorage`] implements it on top of a blob store (Azure Blob
//! Storage in production, an in-memory store in tests) so that a fleet of
//! servers can share one certificate state.
//!
//! ## Design Principles
//!
//! - Backends are opaque byte stores addressed by logical keys
//! - All keys live under a fixed prefix ([`KeyMapper`])
//! - Exclusion across processes comes from a lock protocol built on
//!   conditional writes, never from in-process mutexes
//! - Every call takes a [`Context`] carrying cancellation and a deadline
//!
//! ## Example
//!
//! ```rust
//! use certblob_storage::{BlobStorage, CertStorage, Context, StorageOptions};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let storage = BlobStorage::in_memory(StorageOptions::new("caddy")).unwrap();
//! let ctx = Context::background();
//!
//! storage.lock(&ctx, "issue_cert_example.com").await.unwrap();
//! storage
//!     .store(&ctx, "certificates/example.com/example.com.crt", b"PEM")
//!     .await
//!     .unwrap();
//! storage.unlock(&ctx, "issue_cert_example.com").await.unwrap();
//!
//! let keys = storage.list(&ctx, "certificates", true).await.unwrap();
//! assert_eq!(keys, vec!["certificates/example.com/example.com.crt"]);
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod blob;
mod config;
mod context;
mod error;
mod lock;
mod namespace;
mod types;

pub use backend::CertStorage;
pub use blob::{BlobStorage, StorageOptions};
pub use config::{
    AccountKey, AzureBlobConfig, LockConfig, ENV_ACCOUNT_KEY, ENV_ACCOUNT_NAME, ENV_CONTAINER,
    ENV_PREFIX,
};
pub use context::Context;
pub use error::{StorageError, StorageResult};
pub use lock::{is_lock_key, lock_key, LockRecord, LOCK_DIR, LOCK_SUFFIX};
pub use namespace::KeyMapper;
pub use types::{is_terminal_key, KeyInfo, SEPARATOR};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
