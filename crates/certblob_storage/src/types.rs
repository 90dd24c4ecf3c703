//! Shared value types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Path separator used by logical keys and backend paths.
pub const SEPARATOR: char = '/';

/// Read-only snapshot of a stored key.
///
/// The zero value (`KeyInfo::default()`) is what lenient `stat` calls
/// return when the backend could not be queried.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct KeyInfo {
    /// The logical key.
    pub key: String,
    /// Last modification time reported by the backend.
    pub modified: DateTime<Utc>,
    /// Payload size in bytes. Zero for virtual directories.
    pub size: u64,
    /// False for virtual directories (keys ending with the separator).
    pub is_terminal: bool,
}

impl KeyInfo {
    /// Returns true if this is the zero value.
    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }
}

/// Returns true if `key` names a leaf rather than a virtual directory.
pub fn is_terminal_key(key: &str) -> bool {
    !key.ends_with(SEPARATOR)
}
