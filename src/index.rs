use std::collections::BTreeMap;
use std::ops::Bound;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::document::{Document, DocumentId};
use crate::value::IndexKey;

/// A single-field secondary index: an inverted map from the canonical key of
/// a document's value at `field` to the set of document identifiers whose
/// value resolves to that key. Documents whose field is missing are absent
/// from every bucket.
///
/// Invariant upheld by every mutating method here: no bucket is ever left
/// as an empty `Vec` — an emptied bucket is removed from the map entirely.
#[derive(Debug, Clone)]
pub struct FieldIndex {
    pub field: String,
    pub created: String,
    pub updated: String,
    tree: BTreeMap<IndexKey, Vec<DocumentId>>,
}

impl FieldIndex {
    pub fn new(field: impl Into<String>, created: impl Into<String>) -> Self {
        let created = created.into();
        Self {
            field: field.into(),
            updated: created.clone(),
            created,
            tree: BTreeMap::new(),
        }
    }

    /// Build an index by scanning the current documents of a collection.
    /// Documents whose field resolves to missing are not indexed.
    pub fn build(field: &str, documents: &[Document], now: impl Into<String>) -> Self {
        let mut index = Self::new(field, now);
        for doc in documents {
            if let Some(value) = doc.get_field(field) {
                index.insert(doc.id.clone(), value);
            }
        }
        index
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    pub fn bucket_count(&self) -> usize {
        self.tree.len()
    }

    pub fn insert(&mut self, id: DocumentId, value: &Value) {
        let key = IndexKey::from_json(value);
        self.tree.entry(key).or_default().push(id);
    }

    /// Remove `id` from the bucket holding `value`, dropping the bucket if
    /// it becomes empty. A no-op if `id` isn't present there.
    pub fn remove(&mut self, id: &DocumentId, value: &Value) {
        let key = IndexKey::from_json(value);
        if let Some(bucket) = self.tree.get_mut(&key) {
            bucket.retain(|existing| existing != id);
            if bucket.is_empty() {
                self.tree.remove(&key);
            }
        }
    }

    /// Remove `id` from every bucket regardless of key, cleaning any bucket
    /// that becomes empty. Used when a document is deleted or when its value
    /// under this field is being replaced and the prior value isn't known.
    pub fn remove_everywhere(&mut self, id: &DocumentId) {
        self.tree.retain(|_, bucket| {
            bucket.retain(|existing| existing != id);
            !bucket.is_empty()
        });
    }

    /// `updateIndexForDocument`: remove `doc.id` from every bucket, then
    /// reinsert under the document's current value (unless missing).
    pub fn update_for_document(&mut self, doc: &Document) {
        self.remove_everywhere(&doc.id);
        if let Some(value) = doc.get_field(&self.field) {
            self.insert(doc.id.clone(), value);
        }
    }

    pub fn find_eq(&self, value: &Value) -> Vec<DocumentId> {
        let key = IndexKey::from_json(value);
        self.tree.get(&key).cloned().unwrap_or_default()
    }

    pub fn find_ne(&self, value: &Value) -> Vec<DocumentId> {
        let key = IndexKey::from_json(value);
        self.tree
            .iter()
            .filter(|(k, _)| **k != key)
            .flat_map(|(_, ids)| ids.iter().cloned())
            .collect()
    }

    pub fn find_in(&self, values: &[Value]) -> Vec<DocumentId> {
        let mut out = Vec::new();
        for value in values {
            out.extend(self.find_eq(value));
        }
        out
    }

    pub fn find_nin(&self, values: &[Value]) -> Vec<DocumentId> {
        let keys: Vec<IndexKey> = values.iter().map(IndexKey::from_json).collect();
        self.tree
            .iter()
            .filter(|(k, _)| !keys.contains(k))
            .flat_map(|(_, ids)| ids.iter().cloned())
            .collect()
    }

    /// Range scan for `$gt`/`$gte`/`$lt`/`$lte`.
    pub fn find_range(&self, lower: Bound<&Value>, upper: Bound<&Value>) -> Vec<DocumentId> {
        let lower = bound_key(lower);
        let upper = bound_key(upper);
        self.tree
            .range((lower, upper))
            .flat_map(|(_, ids)| ids.iter().cloned())
            .collect()
    }

    pub fn all_ids(&self) -> Vec<DocumentId> {
        self.tree.values().flatten().cloned().collect()
    }

    /// Snapshot suitable for JSON persistence:
    /// `{ <canonical value-key>: [id, ...] }`.
    pub fn to_bucket_map(&self) -> serde_json::Map<String, Value> {
        let mut map = serde_json::Map::new();
        for (key, ids) in &self.tree {
            let bucket_key = key.bucket_key_string();
            map.insert(bucket_key, Value::Array(ids.iter().map(|id| Value::String(id.clone())).collect()));
        }
        map
    }

    /// Rebuild from a persisted bucket map. Bucket keys are opaque on
    /// reload (we only need the id lists back); a JSON-literal key is parsed
    /// back into a value where possible so range queries keep working after
    /// a restart, falling back to treating it as a bare string.
    pub fn from_bucket_map(
        field: impl Into<String>,
        created: String,
        updated: String,
        buckets: &serde_json::Map<String, Value>,
    ) -> Self {
        let mut tree: BTreeMap<IndexKey, Vec<DocumentId>> = BTreeMap::new();
        for (bucket_key, ids) in buckets {
            let value: Value = serde_json::from_str(bucket_key).unwrap_or_else(|_| Value::String(bucket_key.clone()));
            let key = IndexKey::from_json(&value);
            let ids: Vec<DocumentId> = ids
                .as_array()
                .into_iter()
                .flatten()
                .filter_map(|v| v.as_str().map(|s| s.to_string()))
                .collect();
            if !ids.is_empty() {
                tree.insert(key, ids);
            }
        }
        Self {
            field: field.into(),
            created,
            updated,
            tree,
        }
    }
}

fn bound_key(b: Bound<&Value>) -> Bound<IndexKey> {
    match b {
        Bound::Included(v) => Bound::Included(IndexKey::from_json(v)),
        Bound::Excluded(v) => Bound::Excluded(IndexKey::from_json(v)),
        Bound::Unbounded => Bound::Unbounded,
    }
}

/// On-disk shape of `data/indexes/<collection>_<field>.json`.
#[derive(Debug, Serialize, Deserialize)]
pub struct IndexFile {
    #[serde(rename = "collectionName")]
    pub collection_name: String,
    pub field: String,
    pub created: String,
    pub updated: String,
    pub index: serde_json::Map<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(id: &str, data: Value) -> Document {
        Document::new(id.to_string(), data).unwrap()
    }

    #[test]
    fn build_skips_missing_field() {
        let docs = vec![
            doc("1", json!({"a": 1})),
            doc("2", json!({"b": 2})),
        ];
        let idx = FieldIndex::build("a", &docs, "now");
        assert_eq!(idx.find_eq(&json!(1)), vec!["1".to_string()]);
        assert_eq!(idx.all_ids().len(), 1);
    }

    #[test]
    fn insert_and_find_eq() {
        let mut idx = FieldIndex::new("customerId", "now");
        idx.insert("1".into(), &json!("cust001"));
        idx.insert("2".into(), &json!("cust002"));
        assert_eq!(idx.find_eq(&json!("cust001")), vec!["1".to_string()]);
    }

    #[test]
    fn remove_drops_empty_bucket() {
        let mut idx = FieldIndex::new("a", "now");
        idx.insert("1".into(), &json!(1));
        idx.remove(&"1".to_string(), &json!(1));
        assert!(idx.is_empty());
        assert_eq!(idx.bucket_count(), 0);
    }

    #[test]
    fn update_for_document_moves_bucket() {
        let mut idx = FieldIndex::new("customerId", "now");
        let mut d = doc("2", json!({"customerId": "cust002"}));
        idx.update_for_document(&d);
        assert_eq!(idx.find_eq(&json!("cust002")), vec!["2".to_string()]);

        d.data["customerId"] = json!("cust001");
        idx.update_for_document(&d);
        assert!(idx.find_eq(&json!("cust002")).is_empty());
        assert_eq!(idx.find_eq(&json!("cust001")), vec!["2".to_string()]);
    }

    #[test]
    fn remove_everywhere_cleans_all_buckets() {
        let mut idx = FieldIndex::new("a", "now");
        idx.insert("1".into(), &json!(1));
        idx.insert("1".into(), &json!(2));
        idx.remove_everywhere(&"1".to_string());
        assert!(idx.is_empty());
    }

    #[test]
    fn range_query_is_numeric() {
        let mut idx = FieldIndex::new("total", "now");
        idx.insert("1".into(), &json!(100));
        idx.insert("2".into(), &json!(200));
        idx.insert("3".into(), &json!(300));
        let mut ids = idx.find_range(Bound::Excluded(&json!(100)), Bound::Unbounded);
        ids.sort();
        assert_eq!(ids, vec!["2".to_string(), "3".to_string()]);
    }

    #[test]
    fn in_and_nin() {
        let mut idx = FieldIndex::new("status", "now");
        idx.insert("1".into(), &json!("open"));
        idx.insert("2".into(), &json!("closed"));
        idx.insert("3".into(), &json!("open"));
        let mut in_ids = idx.find_in(&[json!("open")]);
        in_ids.sort();
        assert_eq!(in_ids, vec!["1".to_string(), "3".to_string()]);
        assert_eq!(idx.find_nin(&[json!("open")]), vec!["2".to_string()]);
    }

    #[test]
    fn build_equals_sequence_of_updates() {
        let docs = vec![
            doc("1", json!({"a": 1})),
            doc("2", json!({"a": 2})),
            doc("3", json!({"b": 9})),
        ];
        let built = FieldIndex::build("a", &docs, "now");

        let mut incremental = FieldIndex::new("a", "now");
        for d in &docs {
            incremental.update_for_document(d);
        }

        assert_eq!(built.bucket_count(), incremental.bucket_count());
        assert_eq!(built.all_ids().len(), incremental.all_ids().len());
    }
}
