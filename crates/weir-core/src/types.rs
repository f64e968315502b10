use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Identifier for keyed engine records: element instances, process instances,
/// process definitions, jobs, and incidents.
///
/// Keys are allocated sequentially per partition so that reprocessing the
/// same command log yields the same keys.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Key(pub i64);

impl Key {
    /// Marker for a key that has not been assigned yet. Commands that create
    /// a new element instance carry this until the engine allocates one.
    pub const UNSET: Key = Key(-1);

    /// Whether the key has been assigned
    #[inline]
    pub fn is_set(self) -> bool {
        self.0 >= 0
    }
}

impl std::fmt::Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Allocates record keys in ascending order.
#[derive(Debug)]
pub struct KeyGenerator {
    next: i64,
}

impl KeyGenerator {
    /// Create a generator starting at the given key
    pub fn new(start: i64) -> Self {
        Self { next: start }
    }

    /// Return the next key and advance
    pub fn next_key(&mut self) -> Key {
        let key = Key(self.next);
        self.next += 1;
        key
    }
}

impl Default for KeyGenerator {
    fn default() -> Self {
        Self::new(1)
    }
}

/// A scoped variable document
///
/// Every element instance owns one of these; lookups fall through to the
/// enclosing flow scope at read time. The document is always a JSON object;
/// merging is a shallow top-level merge where later writes win.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Variables {
    value: Map<String, Value>,
}

impl Variables {
    /// Create an empty document
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a document from a JSON value. Non-object values (including
    /// null) yield an empty document.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(map) => Self { value: map },
            _ => Self::default(),
        }
    }

    /// Look up a top-level variable by name
    #[inline]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.value.get(name)
    }

    /// Set a top-level variable
    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.value.insert(name.into(), value);
    }

    /// Shallow-merge another document into this one
    pub fn merge(&mut self, other: &Variables) {
        for (name, value) in &other.value {
            self.value.insert(name.clone(), value.clone());
        }
    }

    /// Whether the document has no variables
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }

    /// Number of top-level variables
    #[inline]
    pub fn len(&self) -> usize {
        self.value.len()
    }

    /// View the document as a JSON value
    pub fn as_value(&self) -> Value {
        Value::Object(self.value.clone())
    }

    /// Serialized size in bytes, used to enforce record size limits
    pub fn approximate_size(&self) -> usize {
        serde_json::to_string(&self.value).map(|s| s.len()).unwrap_or(0)
    }

    /// Iterate over top-level entries
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.value.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_key_generator_is_monotonic() {
        let mut keys = KeyGenerator::new(10);
        assert_eq!(keys.next_key(), Key(10));
        assert_eq!(keys.next_key(), Key(11));
        assert_eq!(keys.next_key(), Key(12));
    }

    #[test]
    fn test_unset_key() {
        assert!(!Key::UNSET.is_set());
        assert!(Key(0).is_set());
        assert!(Key(42).is_set());
    }

    #[test]
    fn test_variables_from_value() {
        let vars = Variables::from_value(json!({"order": 7, "open": true}));
        assert_eq!(vars.get("order"), Some(&json!(7)));
        assert_eq!(vars.get("open"), Some(&json!(true)));
        assert_eq!(vars.len(), 2);

        // non-objects collapse to an empty document
        let empty = Variables::from_value(json!("just a string"));
        assert!(empty.is_empty());
    }

    #[test]
    fn test_variables_merge_later_writes_win() {
        let mut target = Variables::from_value(json!({"a": 1, "b": 2}));
        let update = Variables::from_value(json!({"b": 20, "c": 3}));

        target.merge(&update);

        assert_eq!(target.get("a"), Some(&json!(1)));
        assert_eq!(target.get("b"), Some(&json!(20)));
        assert_eq!(target.get("c"), Some(&json!(3)));
    }

    #[test]
    fn test_variables_serialization_round_trip() {
        let vars = Variables::from_value(json!({"nested": {"deep": [1, 2, 3]}}));
        let serialized = serde_json::to_string(&vars).unwrap();
        let deserialized: Variables = serde_json::from_str(&serialized).unwrap();
        assert_eq!(vars, deserialized);
    }

    #[test]
    fn test_approximate_size_grows_with_content() {
        let small = Variables::from_value(json!({"a": 1}));
        let large = Variables::from_value(json!({"a": "x".repeat(1024)}));
        assert!(large.approximate_size() > small.approximate_size());
    }
}
