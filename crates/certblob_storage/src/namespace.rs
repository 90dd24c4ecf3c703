//! Mapping between logical keys and backend paths.

use crate::error::{StorageError, StorageResult};
use crate::types::SEPARATOR;
use object_store::path::Path;

/// Translates logical keys to backend paths under a fixed prefix.
///
/// The prefix is normalized once at construction: leading, trailing and
/// repeated separators are removed. Keys get the same treatment, so
/// `a//b/` and `a/b` resolve to the same backend path.
///
/// A key is *valid* when it is already normalized. For every valid key
/// `cut_key_prefix(key_prefix(k)) == k`.
///
/// # Example
///
/// ```rust
/// use certblob_storage::KeyMapper;
///
/// let mapper = KeyMapper::new("/caddy/");
/// assert_eq!(mapper.key_prefix("certificates/a.crt"), "caddy/certificates/a.crt");
/// assert_eq!(mapper.cut_key_prefix("caddy/certificates/a.crt"), "certificates/a.crt");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct KeyMapper {
    prefix: String,
}

impl KeyMapper {
    /// Creates a mapper rooted at `prefix`.
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: normalize(prefix),
        }
    }

    /// Returns the normalized prefix.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Joins the prefix and `key`.
    pub fn key_prefix(&self, key: &str) -> String {
        let key = normalize(key);
        match (self.prefix.is_empty(), key.is_empty()) {
            (true, _) => key,
            (false, true) => self.prefix.clone(),
            (false, false) => format!("{}{}{}", self.prefix, SEPARATOR, key),
        }
    }

    /// Removes the prefix from `path`, or returns `None` if `path` lies
    /// outside of it.
    pub fn strip(&self, path: &str) -> Option<String> {
        if self.prefix.is_empty() {
            return Some(path.to_string());
        }
        if path == self.prefix {
            return Some(String::new());
        }
        path.strip_prefix(self.prefix.as_str())
            .and_then(|rest| rest.strip_prefix(SEPARATOR))
            .map(str::to_string)
    }

    /// Removes the prefix from `path`.
    ///
    /// Paths outside the prefix are returned unchanged.
    pub fn cut_key_prefix(&self, path: &str) -> String {
        self.strip(path).unwrap_or_else(|| path.to_string())
    }

    /// Resolves `key` to a parsed backend path.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidKey`] if a segment is not a legal
    /// object name (`.`, `..`, or containing reserved characters).
    pub fn resolve(&self, key: &str) -> StorageResult<Path> {
        Path::parse(self.key_prefix(key)).map_err(|e| StorageError::InvalidKey {
            key: key.to_string(),
            reason: e.to_string(),
        })
    }
}

/// Strips leading, trailing and repeated separators.
pub(crate) fn normalize(raw: &str) -> String {
    raw.split(SEPARATOR)
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn prefix_is_normalized() {
        assert_eq!(KeyMapper::new("//caddy//certs/").prefix(), "caddy/certs");
        assert_eq!(KeyMapper::new("").prefix(), "");
        assert_eq!(KeyMapper::new("/").prefix(), "");
    }

    #[test]
    fn join_collapses_separators() {
        let mapper = KeyMapper::new("caddy");
        assert_eq!(mapper.key_prefix("a//b"), "caddy/a/b");
        assert_eq!(mapper.key_prefix("/a/b/"), "caddy/a/b");
        assert_eq!(mapper.key_prefix(""), "caddy");
    }

    #[test]
    fn empty_prefix_is_identity() {
        let mapper = KeyMapper::new("");
        assert_eq!(mapper.key_prefix("a/b"), "a/b");
        assert_eq!(mapper.cut_key_prefix("a/b"), "a/b");
    }

    #[test]
    fn strip_requires_segment_boundary() {
        let mapper = KeyMapper::new("caddy");
        assert_eq!(mapper.strip("caddy/a"), Some("a".to_string()));
        assert_eq!(mapper.strip("caddy"), Some(String::new()));
        assert_eq!(mapper.strip("caddyx/a"), None);
        assert_eq!(mapper.strip("other/a"), None);
    }

    #[test]
    fn cut_falls_back_to_input() {
        let mapper = KeyMapper::new("caddy");
        assert_eq!(mapper.cut_key_prefix("other/a"), "other/a");
    }

    #[test]
    fn resolve_rejects_dot_segments() {
        let mapper = KeyMapper::new("caddy");
        assert!(mapper.resolve("certificates/../acme").is_err());
        assert!(mapper.resolve("./a").is_err());
        let path = mapper.resolve("certificates/example.com/example.com.crt").unwrap();
        assert_eq!(path.as_ref(), "caddy/certificates/example.com/example.com.crt");
    }

    fn segment() -> impl Strategy<Value = String> {
        "[a-z0-9_-][a-z0-9_.-]{0,15}".prop_filter("no dot segments", |s| s != "." && s != "..")
    }

    fn valid_key() -> impl Strategy<Value = String> {
        prop::collection::vec(segment(), 1..5).prop_map(|parts| parts.join("/"))
    }

    proptest! {
        #[test]
        fn prop_round_trip(prefix in valid_key(), key in valid_key()) {
            let mapper = KeyMapper::new(&prefix);
            prop_assert_eq!(mapper.cut_key_prefix(&mapper.key_prefix(&key)), key);
        }

        #[test]
        fn prop_round_trip_without_prefix(key in valid_key()) {
            let mapper = KeyMapper::new("");
            prop_assert_eq!(mapper.cut_key_prefix(&mapper.key_prefix(&key)), key);
        }

        #[test]
        fn prop_resolved_path_matches_join(prefix in valid_key(), key in valid_key()) {
            let mapper = KeyMapper::new(&prefix);
            let path = mapper.resolve(&key).unwrap();
            let joined = mapper.key_prefix(&key);
            prop_assert_eq!(path.as_ref(), joined.as_str());
        }
    }
}
