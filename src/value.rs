use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

use serde_json::Value as JsonValue;

/// Canonical, totally-ordered encoding of a JSON value, used as an index
/// bucket key and for `$sort`/`$gt`/`$lt` comparisons.
///
/// Kind order: null < boolean < number < string < array < object. Within a
/// kind, numbers compare numerically and strings compare lexicographically
/// (byte order) — arrays and objects compare by their canonical JSON
/// serialization, since they index as a whole rather than per element.
#[derive(Debug, Clone)]
pub enum IndexKey {
    Null,
    Boolean(bool),
    Number(f64),
    String(String),
    Array(String),
    Object(String),
}

impl Eq for IndexKey {}

impl Hash for IndexKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            IndexKey::Null => {}
            IndexKey::Boolean(b) => b.hash(state),
            IndexKey::Number(f) => f.to_bits().hash(state),
            IndexKey::String(s) => s.hash(state),
            IndexKey::Array(s) => s.hash(state),
            IndexKey::Object(s) => s.hash(state),
        }
    }
}

impl PartialEq for IndexKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl PartialOrd for IndexKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for IndexKey {
    fn cmp(&self, other: &Self) -> Ordering {
        use IndexKey::*;
        match (self, other) {
            (Null, Null) => Ordering::Equal,
            (Null, _) => Ordering::Less,
            (_, Null) => Ordering::Greater,

            (Boolean(a), Boolean(b)) => a.cmp(b),
            (Boolean(_), _) => Ordering::Less,
            (_, Boolean(_)) => Ordering::Greater,

            (Number(a), Number(b)) => a.total_cmp(b),
            (Number(_), _) => Ordering::Less,
            (_, Number(_)) => Ordering::Greater,

            (String(a), String(b)) => a.cmp(b),
            (String(_), _) => Ordering::Less,
            (_, String(_)) => Ordering::Greater,

            (Array(a), Array(b)) => a.cmp(b),
            (Array(_), _) => Ordering::Less,
            (_, Array(_)) => Ordering::Greater,

            (Object(a), Object(b)) => a.cmp(b),
        }
    }
}

impl IndexKey {
    /// Build the canonical key for a resolved field value.
    pub fn from_json(value: &JsonValue) -> Self {
        match value {
            JsonValue::Null => IndexKey::Null,
            JsonValue::Bool(b) => IndexKey::Boolean(*b),
            JsonValue::Number(n) => IndexKey::Number(n.as_f64().unwrap_or(0.0)),
            JsonValue::String(s) => IndexKey::String(s.clone()),
            JsonValue::Array(_) => IndexKey::Array(canonical_string(value)),
            JsonValue::Object(_) => IndexKey::Object(canonical_string(value)),
        }
    }

    /// The exact string used as the bucket key when an index is persisted to
    /// `data/indexes/<collection>_<field>.json` — the canonical JSON
    /// encoding of the original value (`6.1`).
    pub fn bucket_key_string(&self) -> String {
        match self {
            IndexKey::Null => "null".to_string(),
            IndexKey::Boolean(b) => b.to_string(),
            IndexKey::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    (*n as i64).to_string()
                } else {
                    canonical_string(&JsonValue::from(*n))
                }
            }
            IndexKey::String(s) => canonical_string(&JsonValue::String(s.clone())),
            IndexKey::Array(s) | IndexKey::Object(s) => s.clone(),
        }
    }

    pub fn matches_json(&self, json: &JsonValue) -> bool {
        self == &IndexKey::from_json(json)
    }
}

fn canonical_string(v: &JsonValue) -> String {
    serde_json::to_string(v).unwrap_or_default()
}

/// Resolve a dot-separated field path against a document root.
///
/// Stepping into a non-object (including `null`) or a missing key yields
/// the "missing" result (`None`), distinct from a present `null` value at
/// the end of the path.
pub fn resolve_path<'a>(root: &'a JsonValue, path: &str) -> Option<&'a JsonValue> {
    let mut current = root;
    for part in path.split('.') {
        match current {
            JsonValue::Object(map) => current = map.get(part)?,
            _ => return None,
        }
    }
    Some(current)
}

/// Assign `value` at a dot-separated field path, creating intermediate
/// objects as needed. Overwrites any non-object value found along the way.
pub fn set_path(root: &mut JsonValue, path: &str, value: JsonValue) {
    let parts: Vec<&str> = path.split('.').collect();
    let mut current = root;
    for part in &parts[..parts.len() - 1] {
        if !current.is_object() {
            *current = JsonValue::Object(serde_json::Map::new());
        }
        let map = current.as_object_mut().expect("just ensured object");
        current = map
            .entry(part.to_string())
            .or_insert_with(|| JsonValue::Object(serde_json::Map::new()));
    }
    if !current.is_object() {
        *current = JsonValue::Object(serde_json::Map::new());
    }
    if let JsonValue::Object(map) = current {
        map.insert(parts[parts.len() - 1].to_string(), value);
    }
}

/// Remove the field at a dot-separated path. A no-op if any segment along
/// the way is missing or not an object.
pub fn remove_path(root: &mut JsonValue, path: &str) {
    let parts: Vec<&str> = path.split('.').collect();
    if parts.len() == 1 {
        if let JsonValue::Object(map) = root {
            map.remove(path);
        }
        return;
    }
    let mut current = &mut *root;
    for part in &parts[..parts.len() - 1] {
        match current {
            JsonValue::Object(map) => match map.get_mut(*part) {
                Some(v) => current = v,
                None => return,
            },
            _ => return,
        }
    }
    if let JsonValue::Object(map) = current {
        map.remove(parts[parts.len() - 1]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn type_ordering() {
        let null = IndexKey::Null;
        let boolean = IndexKey::Boolean(true);
        let number = IndexKey::Number(42.0);
        let string = IndexKey::String("hello".into());
        let array = IndexKey::Array("[1,2]".into());
        let object = IndexKey::Object("{\"a\":1}".into());
        assert!(null < boolean);
        assert!(boolean < number);
        assert!(number < string);
        assert!(string < array);
        assert!(array < object);
    }

    #[test]
    fn number_ordering_is_numeric() {
        let a = IndexKey::from_json(&json!(9));
        let b = IndexKey::from_json(&json!(10));
        assert!(a < b);
    }

    #[test]
    fn string_ordering_is_lexicographic_not_date_aware() {
        // "2024-1-1" is not a valid zero-padded date and must still sort
        // purely as text, confirming there is no date-detection magic here.
        let a = IndexKey::from_json(&json!("2024-09-01"));
        let b = IndexKey::from_json(&json!("2024-10-01"));
        // lexicographically "09" < "10" so this happens to agree with date
        // order, but the comparator never parses dates.
        assert!(a < b);
    }

    #[test]
    fn integer_and_float_with_same_value_are_equal() {
        assert_eq!(IndexKey::from_json(&json!(5)), IndexKey::from_json(&json!(5.0)));
    }

    #[test]
    fn array_and_object_key_by_canonical_serialization() {
        let a = IndexKey::from_json(&json!([1, 2, 3]));
        let b = IndexKey::from_json(&json!([1, 2, 3]));
        assert_eq!(a, b);
        assert_eq!(a.bucket_key_string(), "[1,2,3]");
    }

    #[test]
    fn resolve_path_dot_notation() {
        let doc = json!({"user": {"address": {"city": "NYC"}}});
        assert_eq!(resolve_path(&doc, "user.address.city"), Some(&json!("NYC")));
        assert_eq!(resolve_path(&doc, "user.address.zip"), None);
    }

    #[test]
    fn resolve_path_through_null_is_missing() {
        let doc = json!({"a": null});
        assert_eq!(resolve_path(&doc, "a.b"), None);
        assert_eq!(resolve_path(&doc, "a"), Some(&JsonValue::Null));
    }

    #[test]
    fn set_path_creates_intermediate_objects() {
        let mut doc = json!({});
        set_path(&mut doc, "a.b.c", json!(1));
        assert_eq!(doc, json!({"a": {"b": {"c": 1}}}));
    }

    #[test]
    fn set_path_overwrites_existing_scalar() {
        let mut doc = json!({"a": 1});
        set_path(&mut doc, "a.b", json!(2));
        assert_eq!(doc, json!({"a": {"b": 2}}));
    }

    #[test]
    fn remove_path_nested() {
        let mut doc = json!({"a": {"b": 1, "c": 2}});
        remove_path(&mut doc, "a.b");
        assert_eq!(doc, json!({"a": {"c": 2}}));
    }

    #[test]
    fn remove_path_missing_is_noop() {
        let mut doc = json!({"a": 1});
        remove_path(&mut doc, "x.y");
        assert_eq!(doc, json!({"a": 1}));
    }
}
