//! Property-based test generators using proptest.
//!
//! Provides strategies for logical keys, prefixes and payloads that keep
//! the invariants a valid key must satisfy.

use proptest::prelude::*;
use std::collections::BTreeSet;

/// Strategy for a single key segment.
///
/// Segments are non-empty, never `.` or `..`, and look like the names a
/// certificate manager produces (`example.com`, `acme-v02.api`, ...).
pub fn segment_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z0-9_][a-z0-9_.-]{0,23}").expect("Invalid regex")
}

/// Strategy for valid (normalized) logical keys.
pub fn logical_key_strategy() -> impl Strategy<Value = String> {
    prop::collection::vec(segment_strategy(), 1..5).prop_map(|segments| segments.join("/"))
}

/// Strategy for backend prefixes, including the empty prefix and
/// prefixes with stray separators.
pub fn prefix_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        1 => Just(String::new()),
        3 => logical_key_strategy(),
        1 => logical_key_strategy().prop_map(|p| format!("/{p}/")),
    ]
}

/// Strategy for payloads (arbitrary bytes, including empty).
pub fn payload_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..2048)
}

/// Strategy for a set of distinct keys below `root`.
pub fn key_set_strategy(root: &'static str, max: usize) -> impl Strategy<Value = BTreeSet<String>> {
    prop::collection::btree_set(logical_key_strategy(), 1..max.max(2))
        .prop_map(move |keys| keys.into_iter().map(|k| format!("{root}/{k}")).collect())
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use certblob_storage::KeyMapper;

    proptest! {
        #![proptest_config(PropTestConfig::quick().to_proptest_config())]

        #[test]
        fn keys_are_normalized(key in logical_key_strategy()) {
            prop_assert!(!key.starts_with('/'));
            prop_assert!(!key.ends_with('/'));
            prop_assert!(!key.contains("//"));
            prop_assert!(key.split('/').all(|s| s != "." && s != ".."));
        }

        #[test]
        fn keys_resolve(prefix in prefix_strategy(), key in logical_key_strategy()) {
            prop_assert!(KeyMapper::new(&prefix).resolve(&key).is_ok());
        }

        #[test]
        fn key_sets_share_root(keys in key_set_strategy("a", 8)) {
            prop_assert!(keys.iter().all(|k| k.starts_with("a/")));
        }
    }
}
