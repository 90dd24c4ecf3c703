//! CLI command implementations.

pub mod config;
pub mod info;
pub mod list;
pub mod lock;
pub mod object;
