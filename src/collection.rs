use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::document::{Document, DocumentId};
use crate::error::{Error, Result};
use crate::index::{FieldIndex, IndexFile};
use crate::query::{self, Query};
use crate::update;

/// `data/collections/<name>/metadata.json` (`6.1`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionMeta {
    pub name: String,
    pub created: String,
    #[serde(rename = "documentCount")]
    pub document_count: usize,
}

/// Snapshot of an index returned by `listIndexes`/`getIndex`, without the
/// full bucket map.
#[derive(Debug, Clone)]
pub struct IndexSummary {
    pub field: String,
    pub created: String,
    pub updated: String,
    pub bucket_count: usize,
}

/// Reject collection/field names that would collide with the `<collection>_<field>.json`
/// index filename convention (`6.1`): this crate enforces rather than escapes.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::BadRequest("name must not be empty".into()));
    }
    if name.contains(['_', '/', '\\']) || name.contains("..") {
        return Err(Error::BadRequest(format!(
            "'{name}' must not contain '_', '/', '\\\\', or '..'"
        )));
    }
    Ok(())
}

/// In-memory state for one collection, backed by one JSON file per document
/// plus one JSON file per field index. All mutation happens while the
/// engine holds this collection's `RwLock` exclusively (`5`).
pub struct Collection {
    name: String,
    dir: PathBuf,
    index_dir: PathBuf,
    created: String,
    documents: HashMap<DocumentId, Document>,
    indexes: HashMap<String, FieldIndex>,
}

impl Collection {
    /// Create a brand-new collection on disk.
    pub fn create(name: &str, collections_dir: &Path, index_dir: &Path) -> Result<Self> {
        validate_name(name)?;
        let dir = collections_dir.join(name);
        if dir.exists() {
            return Err(Error::AlreadyExists(name.to_string()));
        }
        fs::create_dir_all(&dir)?;
        let created = now();
        let col = Self {
            name: name.to_string(),
            dir,
            index_dir: index_dir.to_path_buf(),
            created,
            documents: HashMap::new(),
            indexes: HashMap::new(),
        };
        col.save_metadata()?;
        Ok(col)
    }

    /// Open a collection that already exists on disk, loading its documents
    /// and any previously persisted indexes.
    pub fn open(name: &str, collections_dir: &Path, index_dir: &Path) -> Result<Self> {
        let dir = collections_dir.join(name);
        let meta_path = dir.join("metadata.json");
        let meta_bytes = fs::read(&meta_path).map_err(|_| Error::NotFound(name.to_string()))?;
        let meta: CollectionMeta = serde_json::from_slice(&meta_bytes)?;

        let mut documents = HashMap::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.file_name().and_then(|f| f.to_str()) == Some("metadata.json") {
                continue;
            }
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let bytes = fs::read(&path)?;
            let data: Value = serde_json::from_slice(&bytes)?;
            let id = data
                .get("_id")
                .and_then(|v| v.as_str())
                .ok_or_else(|| Error::Internal(format!("document file {} missing _id", path.display())))?
                .to_string();
            documents.insert(id.clone(), Document::new(id, data)?);
        }

        let indexes = load_indexes_for(name, index_dir)?;

        Ok(Self {
            name: name.to_string(),
            dir,
            index_dir: index_dir.to_path_buf(),
            created: meta.created,
            documents,
            indexes,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn meta(&self) -> CollectionMeta {
        CollectionMeta {
            name: self.name.clone(),
            created: self.created.clone(),
            document_count: self.documents.len(),
        }
    }

    // -----------------------------------------------------------------
    // Document operations (`4.2`)
    // -----------------------------------------------------------------

    pub fn insert_document(&mut self, mut data: Value) -> Result<Value> {
        if !data.is_object() {
            return Err(Error::BadRequest("document must be a JSON object".into()));
        }
        let id = match data.get("_id").and_then(|v| v.as_str()) {
            Some(id) => id.to_string(),
            None => Uuid::new_v4().to_string(),
        };
        if self.documents.contains_key(&id) {
            return Err(Error::Duplicate(id));
        }
        data.as_object_mut()
            .expect("checked above")
            .insert("_id".to_string(), Value::String(id.clone()));

        let doc = Document::new(id.clone(), data.clone())?;
        self.write_document_file(&doc)?;
        self.documents.insert(id, doc.clone());
        self.save_metadata()?;

        for index in self.indexes.values_mut() {
            index.update_for_document(&doc);
        }
        self.save_all_indexes()?;

        Ok(data)
    }

    pub fn find_documents(&self, query_json: &Value) -> Result<Vec<Value>> {
        let query = query::parse_query(query_json)?;
        Ok(self
            .matching_documents(&query)
            .into_iter()
            .map(|d| d.data.clone())
            .collect())
    }

    /// Like `find_documents` but returns raw values for internal reuse by
    /// the aggregation pipeline's leading `$match` fast path.
    pub fn find_values(&self, query: &Query) -> Vec<Value> {
        self.matching_documents(query).into_iter().map(|d| d.data.clone()).collect()
    }

    fn matching_documents(&self, query: &Query) -> Vec<&Document> {
        let all_ids: Vec<DocumentId> = self.documents.keys().cloned().collect();
        let candidates = query::plan_candidate_ids(query, &self.indexes, &all_ids);
        candidates
            .into_iter()
            .filter_map(|id| self.documents.get(&id))
            .filter(|doc| query::matches_doc(query, doc))
            .collect()
    }

    pub fn update_document(&mut self, id: &str, update_spec: &Value) -> Result<Value> {
        let doc = self.documents.get(id).ok_or_else(|| Error::NotFound(id.to_string()))?;
        let mut data = doc.data.clone();
        update::apply_update(&mut data, update_spec)?;
        let new_doc = Document::new(id.to_string(), data.clone())?;

        self.write_document_file(&new_doc)?;
        self.documents.insert(id.to_string(), new_doc.clone());

        for index in self.indexes.values_mut() {
            index.update_for_document(&new_doc);
        }
        self.save_all_indexes()?;

        Ok(data)
    }

    pub fn delete_document(&mut self, id: &str) -> Result<()> {
        if !self.documents.contains_key(id) {
            return Err(Error::NotFound(id.to_string()));
        }
        // Index cleanup first, then the document itself, then metadata —
        // order matters for crash recovery (`7`).
        let id_owned = id.to_string();
        for index in self.indexes.values_mut() {
            index.remove_everywhere(&id_owned);
        }
        self.save_all_indexes()?;

        self.documents.remove(id);
        let path = self.document_path(id);
        if path.exists() {
            fs::remove_file(path)?;
        }
        self.save_metadata()?;
        Ok(())
    }

    // -----------------------------------------------------------------
    // Index operations (`4.4`)
    // -----------------------------------------------------------------

    pub fn create_index(&mut self, field: &str) -> Result<()> {
        validate_name(field)?;
        let docs: Vec<Document> = self.documents.values().cloned().collect();
        let index = FieldIndex::build(field, &docs, now());
        self.indexes.insert(field.to_string(), index);
        self.save_index(field)?;
        Ok(())
    }

    pub fn get_index(&self, field: &str) -> Option<IndexSummary> {
        self.indexes.get(field).map(summarize)
    }

    pub fn list_indexes(&self) -> Vec<IndexSummary> {
        self.indexes.values().map(summarize).collect()
    }

    pub fn delete_index(&mut self, field: &str) -> Result<()> {
        if self.indexes.remove(field).is_none() {
            return Err(Error::NotFound(format!("index on field '{field}'")));
        }
        let path = self.index_file_path(field);
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }

    /// Drop every index of this collection. Used when the collection itself
    /// is deleted.
    pub fn delete_all_indexes(&mut self) -> Result<()> {
        let fields: Vec<String> = self.indexes.keys().cloned().collect();
        for field in fields {
            self.delete_index(&field)?;
        }
        Ok(())
    }

    /// Rebuild an index from scratch, recovering from the at-most-one-side
    /// failure window described in `7`/`9`.
    pub fn rebuild_index(&mut self, field: &str) -> Result<()> {
        if !self.indexes.contains_key(field) {
            return Err(Error::NotFound(format!("index on field '{field}'")));
        }
        self.create_index(field)
    }

    // -----------------------------------------------------------------
    // Persistence helpers
    // -----------------------------------------------------------------

    fn document_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    fn write_document_file(&self, doc: &Document) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(&doc.data)?;
        fs::write(self.document_path(&doc.id), bytes)?;
        Ok(())
    }

    fn save_metadata(&self) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(&self.meta())?;
        fs::write(self.dir.join("metadata.json"), bytes)?;
        Ok(())
    }

    fn index_file_path(&self, field: &str) -> PathBuf {
        self.index_dir.join(format!("{}_{}.json", self.name, field))
    }

    fn save_index(&self, field: &str) -> Result<()> {
        let index = &self.indexes[field];
        fs::create_dir_all(&self.index_dir)?;
        let file = IndexFile {
            collection_name: self.name.clone(),
            field: field.to_string(),
            created: index.created.clone(),
            updated: now(),
            index: index.to_bucket_map(),
        };
        let bytes = serde_json::to_vec_pretty(&file)?;
        fs::write(self.index_file_path(field), bytes)?;
        Ok(())
    }

    fn save_all_indexes(&mut self) -> Result<()> {
        for field in self.indexes.keys().cloned().collect::<Vec<_>>() {
            if let Some(index) = self.indexes.get_mut(&field) {
                index.updated = now();
            }
            self.save_index(&field)?;
        }
        Ok(())
    }
}

fn summarize(index: &FieldIndex) -> IndexSummary {
    IndexSummary {
        field: index.field.clone(),
        created: index.created.clone(),
        updated: index.updated.clone(),
        bucket_count: index.bucket_count(),
    }
}

fn load_indexes_for(collection: &str, index_dir: &Path) -> Result<HashMap<String, FieldIndex>> {
    let mut indexes = HashMap::new();
    if !index_dir.exists() {
        return Ok(indexes);
    }
    let prefix = format!("{collection}_");
    for entry in fs::read_dir(index_dir)? {
        let entry = entry?;
        let path = entry.path();
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else { continue };
        let Some(field) = stem.strip_prefix(&prefix) else { continue };
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let bytes = fs::read(&path)?;
        let file: IndexFile = serde_json::from_slice(&bytes)?;
        let index = FieldIndex::from_bucket_map(field, file.created, file.updated, &file.index);
        indexes.insert(field.to_string(), index);
    }
    Ok(indexes)
}

fn now() -> String {
    Utc::now().to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn open_fresh(name: &str) -> (tempfile::TempDir, Collection) {
        let dir = tempdir().unwrap();
        let collections_dir = dir.path().join("collections");
        let index_dir = dir.path().join("indexes");
        let col = Collection::create(name, &collections_dir, &index_dir).unwrap();
        (dir, col)
    }

    #[test]
    fn insert_assigns_uuid_when_absent() {
        let (_dir, mut col) = open_fresh("orders");
        let doc = col.insert_document(json!({"total": 10})).unwrap();
        assert!(doc["_id"].as_str().unwrap().len() > 0);
    }

    #[test]
    fn insert_uses_supplied_id_and_rejects_duplicate() {
        let (_dir, mut col) = open_fresh("orders");
        col.insert_document(json!({"_id": "a", "total": 10})).unwrap();
        let err = col.insert_document(json!({"_id": "a", "total": 20})).unwrap_err();
        assert!(matches!(err, Error::Duplicate(_)));
    }

    #[test]
    fn find_by_index_s1() {
        let (_dir, mut col) = open_fresh("orders");
        col.create_index("customerId").unwrap();
        col.insert_document(json!({"customerId": "cust001", "total": 129.99})).unwrap();
        col.insert_document(json!({"customerId": "cust002", "total": 549.97})).unwrap();

        let results = col.find_documents(&json!({"customerId": "cust001"})).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0]["customerId"], "cust001");
    }

    #[test]
    fn update_keeps_index_coherent_s2() {
        let (_dir, mut col) = open_fresh("orders");
        col.create_index("customerId").unwrap();
        col.insert_document(json!({"_id": "1", "customerId": "cust001", "total": 129.99})).unwrap();
        col.insert_document(json!({"_id": "2", "customerId": "cust002", "total": 549.97})).unwrap();

        col.update_document("2", &json!({"$set": {"customerId": "cust001"}})).unwrap();

        let cust001 = col.find_documents(&json!({"customerId": "cust001"})).unwrap();
        assert_eq!(cust001.len(), 2);
        let cust002 = col.find_documents(&json!({"customerId": "cust002"})).unwrap();
        assert!(cust002.is_empty());

        let idx = col.get_index("customerId").unwrap();
        assert_eq!(idx.bucket_count, 1);
    }

    #[test]
    fn delete_removes_from_index_s5() {
        let (_dir, mut col) = open_fresh("orders");
        col.create_index("customerId").unwrap();
        col.insert_document(json!({"_id": "1", "customerId": "cust001"})).unwrap();
        col.insert_document(json!({"_id": "2", "customerId": "cust001"})).unwrap();

        col.delete_document("1").unwrap();
        col.delete_document("2").unwrap();

        let idx = col.list_indexes();
        assert_eq!(idx.len(), 1);
        assert_eq!(idx[0].bucket_count, 0);
    }

    #[test]
    fn update_missing_document_errors() {
        let (_dir, mut col) = open_fresh("orders");
        let err = col.update_document("missing", &json!({"$set": {"a": 1}})).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn delete_missing_document_errors() {
        let (_dir, mut col) = open_fresh("orders");
        let err = col.delete_document("missing").unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn reopen_reloads_documents_and_indexes() {
        let dir = tempdir().unwrap();
        let collections_dir = dir.path().join("collections");
        let index_dir = dir.path().join("indexes");
        {
            let mut col = Collection::create("orders", &collections_dir, &index_dir).unwrap();
            col.create_index("customerId").unwrap();
            col.insert_document(json!({"_id": "1", "customerId": "cust001"})).unwrap();
        }
        let reopened = Collection::open("orders", &collections_dir, &index_dir).unwrap();
        assert_eq!(reopened.meta().document_count, 1);
        let idx = reopened.get_index("customerId").unwrap();
        assert_eq!(idx.bucket_count, 1);
    }

    #[test]
    fn create_rejects_invalid_name() {
        let dir = tempdir().unwrap();
        let err = Collection::create("bad_name", &dir.path().join("collections"), &dir.path().join("indexes"))
            .unwrap_err();
        assert!(matches!(err, Error::BadRequest(_)));
    }

    #[test]
    fn rebuild_index_recovers_from_stale_state() {
        let (_dir, mut col) = open_fresh("orders");
        col.create_index("status").unwrap();
        col.insert_document(json!({"_id": "1", "status": "open"})).unwrap();
        col.rebuild_index("status").unwrap();
        let idx = col.get_index("status").unwrap();
        assert_eq!(idx.bucket_count, 1);
    }

    #[test]
    fn document_count_matches_files_on_disk() {
        let (_dir, mut col) = open_fresh("orders");
        col.insert_document(json!({"a": 1})).unwrap();
        let second = col.insert_document(json!({"a": 2})).unwrap();
        let second_id = second["_id"].as_str().unwrap().to_string();
        col.delete_document(&second_id).unwrap();

        let on_disk = fs::read_dir(&col.dir)
            .unwrap()
            .filter(|e| {
                let p = e.as_ref().unwrap().path();
                p.file_name().and_then(|f| f.to_str()) != Some("metadata.json")
            })
            .count();
        assert_eq!(col.meta().document_count, on_disk);
        assert_eq!(on_disk, 1);
    }
}
