//! Ordered documents.

use crate::value::Value;
use std::fmt;

/// An ordered mapping from string keys to values.
///
/// Iteration order is insertion order, and it is the order elements are
/// written on the wire. Keys are unique: inserting an existing key replaces
/// the value in place without moving it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Document {
    entries: Vec<(String, Value)>,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
        }
    }

    /// Inserts `value` under `key`, returning the value it replaced.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        let key = key.into();
        let value = value.into();
        match self.position(&key) {
            Some(idx) => Some(std::mem::replace(&mut self.entries[idx].1, value)),
            None => {
                self.entries.push((key, value));
                None
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.position(key).map(|idx| &self.entries[idx].1)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Value> {
        self.position(key).map(move |idx| &mut self.entries[idx].1)
    }

    /// Removes `key`, keeping the relative order of the remaining entries.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.position(key).map(|idx| self.entries.remove(idx).1)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.position(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.entries.iter().map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Returns the first key, which names the command for command documents.
    pub fn first_key(&self) -> Option<&str> {
        self.entries.first().map(|(k, _)| k.as_str())
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    pub fn get_i32(&self, key: &str) -> Option<i32> {
        match self.get(key) {
            Some(Value::Int32(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(Value::as_i64)
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(Value::as_f64)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(Value::as_bool)
    }

    pub fn get_document(&self, key: &str) -> Option<&Document> {
        self.get(key).and_then(Value::as_document)
    }

    pub fn get_array(&self, key: &str) -> Option<&[Value]> {
        self.get(key).and_then(Value::as_array)
    }

    /// Appends every entry of `other`, replacing values of keys already present.
    pub fn merge(&mut self, other: Document) {
        for (key, value) in other {
            self.insert(key, value);
        }
    }

    fn position(&self, key: &str) -> Option<usize> {
        self.entries.iter().position(|(k, _)| k == key)
    }
}

impl FromIterator<(String, Value)> for Document {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        let mut document = Document::new();
        for (key, value) in iter {
            document.insert(key, value);
        }
        document
    }
}

impl IntoIterator for Document {
    type Item = (String, Value);
    type IntoIter = std::vec::IntoIter<(String, Value)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl fmt::Display for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

/// Builds a [`Document`] from `key => value` pairs.
///
/// ```
/// use docwire_bson::doc;
///
/// let cmd = doc! { "ismaster" => 1, "comment" => "health check" };
/// assert_eq!(cmd.first_key(), Some("ismaster"));
/// ```
#[macro_export]
macro_rules! doc {
    () => {
        $crate::Document::new()
    };
    ( $( $key:expr => $value:expr ),+ $(,)? ) => {{
        let mut document = $crate::Document::new();
        $( document.insert($key, $value); )+
        document
    }};
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc;

    #[test]
    fn test_insertion_order_preserved() {
        let doc = doc! { "b" => 1, "a" => 2, "c" => 3 };
        let keys: Vec<&str> = doc.keys().collect();
        assert_eq!(keys, vec!["b", "a", "c"]);
    }

    #[test]
    fn test_insert_replaces_in_place() {
        let mut doc = doc! { "x" => 1, "y" => 2 };
        let previous = doc.insert("x", "replaced");
        assert_eq!(previous, Some(Value::Int32(1)));
        assert_eq!(doc.len(), 2);
        assert_eq!(doc.first_key(), Some("x"));
        assert_eq!(doc.get_str("x"), Some("replaced"));
    }

    #[test]
    fn test_remove_keeps_order() {
        let mut doc = doc! { "a" => 1, "b" => 2, "c" => 3 };
        assert_eq!(doc.remove("b"), Some(Value::Int32(2)));
        assert_eq!(doc.remove("missing"), None);
        let keys: Vec<&str> = doc.keys().collect();
        assert_eq!(keys, vec!["a", "c"]);
    }

    #[test]
    fn test_typed_getters() {
        let doc = doc! {
            "s" => "str",
            "i" => 5,
            "l" => 6i64,
            "d" => 1.5,
            "b" => true,
            "doc" => doc! { "inner" => 1 },
            "arr" => vec![Value::Int32(1), Value::Int32(2)],
        };
        assert_eq!(doc.get_str("s"), Some("str"));
        assert_eq!(doc.get_i32("i"), Some(5));
        assert_eq!(doc.get_i64("i"), Some(5));
        assert_eq!(doc.get_i64("l"), Some(6));
        assert_eq!(doc.get_f64("d"), Some(1.5));
        assert_eq!(doc.get_bool("b"), Some(true));
        assert_eq!(doc.get_document("doc").and_then(|d| d.get_i32("inner")), Some(1));
        assert_eq!(doc.get_array("arr").map(|a| a.len()), Some(2));
        assert_eq!(doc.get_str("i"), None);
    }

    #[test]
    fn test_merge() {
        let mut doc = doc! { "getlasterror" => 1 };
        doc.merge(doc! { "w" => 2, "getlasterror" => 1.0 });
        assert_eq!(doc.first_key(), Some("getlasterror"));
        assert_eq!(doc.get("getlasterror"), Some(&Value::Double(1.0)));
        assert_eq!(doc.get_i32("w"), Some(2));
    }

    #[test]
    fn test_from_iterator_dedups() {
        let doc: Document = vec![
            ("a".to_string(), Value::Int32(1)),
            ("a".to_string(), Value::Int32(2)),
        ]
        .into_iter()
        .collect();
        assert_eq!(doc.len(), 1);
        assert_eq!(doc.get_i32("a"), Some(2));
    }

    #[test]
    fn test_display() {
        let doc = doc! { "ok" => 1.0, "msg" => "hi" };
        let rendered = doc.to_string();
        assert!(rendered.contains("\"msg\":\"hi\""));
    }
}
