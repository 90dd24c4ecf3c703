//! # certblob Testkit
//!
//! Test utilities for certblob storage backends.
//!
//! This crate provides:
//! - In-memory fixtures, including a multi-node "fleet" sharing one store
//! - Property-based test generators using proptest
//! - Reusable checks for the storage contract
//! - Lock contention stress testing
//!
//! ## Usage
//!
//! ```rust,ignore
//! use certblob_testkit::prelude::*;
//!
//! #[tokio::test]
//! async fn my_backend_honours_the_contract() {
//!     let storage = memory_storage("caddy");
//!     check_storage_contract(&storage, "contract").await;
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod contract;
pub mod fixtures;
pub mod generators;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::contract::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::stress::*;
}

pub use contract::*;
pub use fixtures::*;
pub use generators::*;
pub use stress::*;
