use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::collection::{Collection, CollectionMeta, IndexSummary};
use crate::error::{Error, Result};
use crate::pipeline::{Pipeline, StubLookup};

/// Invoked with each log line in addition to `eprintln!`, when verbose
/// logging is enabled. Lets an embedding application forward diagnostics to
/// its own logging stack instead of stderr.
pub type LogCallback = Arc<dyn Fn(&str) + Send + Sync>;

const SCHEMA_VERSION: u32 = 1;

/// `data/db_info.json` (`6.1`).
#[derive(Debug, Clone, Serialize, Deserialize)]
struct DbInfo {
    name: String,
    version: u32,
    created: String,
    collections: Vec<String>,
}

/// The top-level facade (`6.2`): owns one `Collection` per name behind its
/// own `RwLock`, so concurrent callers touching different collections never
/// block each other (`5`).
pub struct PocketDb {
    name: String,
    data_dir: PathBuf,
    collections: RwLock<HashMap<String, Arc<RwLock<Collection>>>>,
    verbose: bool,
    log_callback: Option<LogCallback>,
}

impl PocketDb {
    pub fn open(name: impl Into<String>, data_dir: impl AsRef<Path>) -> Result<Self> {
        Self::open_internal(name.into(), data_dir.as_ref().to_path_buf(), false, None)
    }

    pub fn open_verbose(name: impl Into<String>, data_dir: impl AsRef<Path>) -> Result<Self> {
        Self::open_internal(name.into(), data_dir.as_ref().to_path_buf(), true, None)
    }

    pub fn open_with_log(
        name: impl Into<String>,
        data_dir: impl AsRef<Path>,
        callback: LogCallback,
    ) -> Result<Self> {
        Self::open_internal(name.into(), data_dir.as_ref().to_path_buf(), true, Some(callback))
    }

    fn open_internal(
        name: String,
        data_dir: PathBuf,
        verbose: bool,
        log_callback: Option<LogCallback>,
    ) -> Result<Self> {
        let vlog = |msg: &str| {
            if verbose {
                eprintln!("[pocketdb] {msg}");
                if let Some(cb) = &log_callback {
                    cb(msg);
                }
            }
        };

        vlog(&format!("opening database '{name}' at {}", data_dir.display()));
        fs::create_dir_all(data_dir.join("collections"))?;
        fs::create_dir_all(data_dir.join("indexes"))?;

        let info_path = data_dir.join("db_info.json");
        let mut collection_names = Vec::new();
        if info_path.exists() {
            let bytes = fs::read(&info_path)?;
            let info: DbInfo = serde_json::from_slice(&bytes)?;
            collection_names = info.collections;
            vlog(&format!("found {} existing collection(s)", collection_names.len()));
        } else {
            let info = DbInfo {
                name: name.clone(),
                version: SCHEMA_VERSION,
                created: now(),
                collections: Vec::new(),
            };
            fs::write(&info_path, serde_json::to_vec_pretty(&info)?)?;
            vlog("initialized new database");
        }

        let mut collections = HashMap::new();
        for collection_name in &collection_names {
            let col = Collection::open(
                collection_name,
                &data_dir.join("collections"),
                &data_dir.join("indexes"),
            )?;
            collections.insert(collection_name.clone(), Arc::new(RwLock::new(col)));
        }

        vlog("database ready");
        Ok(Self {
            name,
            data_dir,
            collections: RwLock::new(collections),
            verbose,
            log_callback,
        })
    }

    fn vlog(&self, msg: &str) {
        if self.verbose {
            eprintln!("[pocketdb] {msg}");
            if let Some(cb) = &self.log_callback {
                cb(msg);
            }
        }
    }

    fn collections_dir(&self) -> PathBuf {
        self.data_dir.join("collections")
    }

    fn index_dir(&self) -> PathBuf {
        self.data_dir.join("indexes")
    }

    fn persist_db_info(&self) -> Result<()> {
        let collections = self.collections.read().unwrap();
        let mut names: Vec<String> = collections.keys().cloned().collect();
        names.sort();
        let info = DbInfo {
            name: self.name.clone(),
            version: SCHEMA_VERSION,
            created: now(),
            collections: names,
        };
        fs::write(self.data_dir.join("db_info.json"), serde_json::to_vec_pretty(&info)?)?;
        Ok(())
    }

    /// Fast path if the collection is already loaded; otherwise loads or
    /// creates it outside the write lock, then re-checks before inserting —
    /// avoids holding the registry lock across slow disk I/O.
    fn get_or_create_collection(&self, name: &str) -> Result<Arc<RwLock<Collection>>> {
        if let Some(col) = self.collections.read().unwrap().get(name) {
            return Ok(col.clone());
        }

        let loaded = match Collection::open(name, &self.collections_dir(), &self.index_dir()) {
            Ok(col) => col,
            Err(Error::NotFound(_)) => {
                Collection::create(name, &self.collections_dir(), &self.index_dir())?
            }
            Err(e) => return Err(e),
        };

        let mut collections = self.collections.write().unwrap();
        if let Some(existing) = collections.get(name) {
            return Ok(existing.clone());
        }
        let arc = Arc::new(RwLock::new(loaded));
        collections.insert(name.to_string(), arc.clone());
        drop(collections);
        self.persist_db_info()?;
        Ok(arc)
    }

    fn get_collection(&self, name: &str) -> Result<Arc<RwLock<Collection>>> {
        self.collections
            .read()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::NotFound(name.to_string()))
    }

    // -----------------------------------------------------------------
    // `6.2` operations
    // -----------------------------------------------------------------

    pub fn list_collections(&self) -> Vec<CollectionMeta> {
        self.collections
            .read()
            .unwrap()
            .values()
            .map(|c| c.read().unwrap().meta())
            .collect()
    }

    pub fn create_collection(&self, name: &str) -> Result<CollectionMeta> {
        if self.collections.read().unwrap().contains_key(name) {
            return Err(Error::AlreadyExists(name.to_string()));
        }
        self.vlog(&format!("creating collection '{name}'"));
        let col = self.get_or_create_collection(name)?;
        Ok(col.read().unwrap().meta())
    }

    pub fn delete_collection(&self, name: &str) -> Result<()> {
        let mut collections = self.collections.write().unwrap();
        let col = collections.remove(name).ok_or_else(|| Error::NotFound(name.to_string()))?;
        col.write().unwrap().delete_all_indexes()?;
        drop(collections);
        self.vlog(&format!("deleting collection '{name}'"));
        let dir = self.collections_dir().join(name);
        if dir.exists() {
            fs::remove_dir_all(dir)?;
        }
        self.persist_db_info()?;
        Ok(())
    }

    pub fn insert_document(&self, collection: &str, doc: Value) -> Result<Value> {
        let col = self.get_or_create_collection(collection)?;
        col.write().unwrap().insert_document(doc)
    }

    pub fn find_documents(&self, collection: &str, filter: &Value) -> Result<Vec<Value>> {
        let col = self.get_collection(collection)?;
        col.read().unwrap().find_documents(filter)
    }

    pub fn update_document(&self, collection: &str, id: &str, update_spec: &Value) -> Result<Value> {
        let col = self.get_collection(collection)?;
        col.write().unwrap().update_document(id, update_spec)
    }

    pub fn delete_document(&self, collection: &str, id: &str) -> Result<()> {
        let col = self.get_collection(collection)?;
        col.write().unwrap().delete_document(id)
    }

    pub fn list_indexes(&self, collection: &str) -> Result<Vec<IndexSummary>> {
        let col = self.get_collection(collection)?;
        Ok(col.read().unwrap().list_indexes())
    }

    pub fn get_index(&self, collection: &str, field: &str) -> Result<IndexSummary> {
        let col = self.get_collection(collection)?;
        let col = col.read().unwrap();
        col.get_index(field).ok_or_else(|| Error::NotFound(format!("index on field '{field}'")))
    }

    pub fn create_index(&self, collection: &str, field: &str) -> Result<()> {
        let col = self.get_or_create_collection(collection)?;
        self.vlog(&format!("creating index on '{collection}.{field}'"));
        col.write().unwrap().create_index(field)
    }

    pub fn delete_index(&self, collection: &str, field: &str) -> Result<()> {
        let col = self.get_collection(collection)?;
        col.write().unwrap().delete_index(field)
    }

    /// Recovery hook (`7`/`9`): discard and rebuild an index from the
    /// documents currently on disk, for when a prior mutation's index-update
    /// half failed.
    pub fn rebuild_index(&self, collection: &str, field: &str) -> Result<()> {
        let col = self.get_collection(collection)?;
        self.vlog(&format!("rebuilding index on '{collection}.{field}'"));
        col.write().unwrap().rebuild_index(field)
    }

    /// Run an aggregation pipeline (`4.5`). A leading `$match` stage is
    /// pushed down through the planner the same way `findDocuments` is, so
    /// an indexed pipeline prefix doesn't force a full collection scan.
    pub fn aggregate(&self, collection: &str, pipeline_spec: &Value) -> Result<Vec<Value>> {
        let col = self.get_collection(collection)?;
        let col = col.read().unwrap();
        let pipeline = Pipeline::parse(pipeline_spec)?;

        let seed = match pipeline.leading_match() {
            Some(query) => col.find_values(query),
            None => col.find_documents(&Value::Object(Default::default()))?,
        };
        let start = if pipeline.leading_match().is_some() { 1 } else { 0 };
        pipeline.execute_from(start, seed, &StubLookup)
    }
}

fn now() -> String {
    Utc::now().to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn temp_db() -> (tempfile::TempDir, PocketDb) {
        let dir = tempdir().unwrap();
        let db = PocketDb::open("test", dir.path()).unwrap();
        (dir, db)
    }

    #[test]
    fn create_list_delete_collection() {
        let (_dir, db) = temp_db();
        db.create_collection("orders").unwrap();
        assert_eq!(db.list_collections().len(), 1);
        db.delete_collection("orders").unwrap();
        assert_eq!(db.list_collections().len(), 0);
    }

    #[test]
    fn create_collection_twice_errors() {
        let (_dir, db) = temp_db();
        db.create_collection("orders").unwrap();
        let err = db.create_collection("orders").unwrap_err();
        assert!(matches!(err, Error::AlreadyExists(_)));
    }

    #[test]
    fn insert_auto_creates_collection() {
        let (_dir, db) = temp_db();
        let doc = db.insert_document("orders", json!({"total": 10})).unwrap();
        assert!(doc["_id"].is_string());
        assert_eq!(db.find_documents("orders", &json!({})).unwrap().len(), 1);
    }

    #[test]
    fn find_on_unknown_collection_errors() {
        let (_dir, db) = temp_db();
        let err = db.find_documents("missing", &json!({})).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn index_roundtrips_through_reopen() {
        let dir = tempdir().unwrap();
        {
            let db = PocketDb::open("test", dir.path()).unwrap();
            db.create_index("orders", "customerId").unwrap();
            db.insert_document("orders", json!({"customerId": "cust001"})).unwrap();
        }
        let db = PocketDb::open("test", dir.path()).unwrap();
        let results = db.find_documents("orders", &json!({"customerId": "cust001"})).unwrap();
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn aggregate_pipeline_with_leading_match() {
        let (_dir, db) = temp_db();
        db.create_index("orders", "customerId").unwrap();
        db.insert_document("orders", json!({"customerId": "cust001", "total": 10})).unwrap();
        db.insert_document("orders", json!({"customerId": "cust001", "total": 20})).unwrap();
        db.insert_document("orders", json!({"customerId": "cust002", "total": 99})).unwrap();

        let out = db
            .aggregate(
                "orders",
                &json!([
                    {"$match": {"customerId": "cust001"}},
                    {"$group": {"_id": "$customerId", "sum": {"$sum": "$total"}}}
                ]),
            )
            .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0]["sum"].as_f64(), Some(30.0));
    }

    #[test]
    fn rebuild_index_after_manual_mutation() {
        let (_dir, db) = temp_db();
        db.create_index("orders", "status").unwrap();
        db.insert_document("orders", json!({"status": "open"})).unwrap();
        db.rebuild_index("orders", "status").unwrap();
        let idx = db.get_index("orders", "status").unwrap();
        assert_eq!(idx.bucket_count, 1);
    }

    #[test]
    fn delete_index_then_get_errors() {
        let (_dir, db) = temp_db();
        db.create_index("orders", "status").unwrap();
        db.delete_index("orders", "status").unwrap();
        let err = db.get_index("orders", "status").unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
