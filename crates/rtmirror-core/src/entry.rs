//! Remote entries and key ordering
//!
//! The remote keyspace orders children by key the same way the Realtime
//! Database orders `$key`: keys that parse as 32-bit integers sort first,
//! numerically, and every other key follows in lexicographic order.

use std::cmp::Ordering;
use std::fmt;

use serde_json::Value;

/// A raw child of the remote keyspace
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteEntry {
    /// Child key, unique and sortable within the keyspace
    pub key: String,
    /// Child value as delivered by the remote
    pub value: Value,
}

impl RemoteEntry {
    /// Create a new entry
    pub fn new(key: impl Into<String>, value: Value) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }
}

/// Parse a key the way the remote does when deciding if it is numeric.
///
/// Leading `+`, leading zeros and `-0` are not canonical integers and
/// therefore sort as strings.
fn integer_key(key: &str) -> Option<i32> {
    let digits = key.strip_prefix('-').unwrap_or(key);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if digits.len() > 1 && digits.starts_with('0') {
        return None;
    }
    if key == "-0" {
        return None;
    }
    key.parse().ok()
}

/// Compare two remote keys
pub fn compare_keys(a: &str, b: &str) -> Ordering {
    match (integer_key(a), integer_key(b)) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.cmp(b),
    }
}

/// True when `key` sorts strictly after `bound` (or there is no bound)
pub fn is_after(key: &str, bound: Option<&str>) -> bool {
    match bound {
        Some(bound) => compare_keys(key, bound) == Ordering::Greater,
        None => true,
    }
}

/// A key that orders by [`compare_keys`], usable as a `BTreeMap` key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OrderedKey(pub String);

impl OrderedKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Ord for OrderedKey {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_keys(&self.0, &other.0)
    }
}

impl PartialOrd for OrderedKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for OrderedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OrderedKey {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

impl From<String> for OrderedKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_keys_sort_first_numerically() {
        let mut keys = vec!["b", "10", "a", "2", "-5"];
        keys.sort_by(|a, b| compare_keys(a, b));
        assert_eq!(keys, vec!["-5", "2", "10", "a", "b"]);
    }

    #[test]
    fn test_non_canonical_integers_are_strings() {
        assert_eq!(integer_key("007"), None);
        assert_eq!(integer_key("+7"), None);
        assert_eq!(integer_key("-0"), None);
        assert_eq!(integer_key("0"), Some(0));
        // Out of i32 range sorts as a string
        assert_eq!(integer_key("99999999999"), None);
        assert_eq!(compare_keys("99999999999", "5"), Ordering::Greater);
    }

    #[test]
    fn test_push_ids_sort_lexicographically() {
        assert_eq!(
            compare_keys("-NaBcD0000000001", "-NaBcD0000000002"),
            Ordering::Less
        );
    }

    #[test]
    fn test_is_after() {
        assert!(is_after("k2", None));
        assert!(is_after("k2", Some("k1")));
        assert!(!is_after("k1", Some("k1")));
        assert!(!is_after("k0", Some("k1")));
    }

    #[test]
    fn test_ordered_key_in_btree() {
        let mut map = std::collections::BTreeMap::new();
        map.insert(OrderedKey::from("x"), 1);
        map.insert(OrderedKey::from("3"), 2);
        map.insert(OrderedKey::from("12"), 3);
        let keys: Vec<_> = map.keys().map(|k| k.as_str()).collect();
        assert_eq!(keys, vec!["3", "12", "x"]);
    }
}
