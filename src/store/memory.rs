//! In-process stores with switches to make writes fail.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use serde_json::Value;

use super::{DocumentStore, PersistenceError, RecordStore, UploadOptions};

#[derive(Default)]
pub struct MemoryDocumentStore {
    pub files: Mutex<HashMap<String, Vec<u8>>>,
    pub fail_uploads: AtomicBool,
    pub downloads: AtomicUsize,
}

impl MemoryDocumentStore {
    pub fn with_file(path: &str, bytes: Vec<u8>) -> MemoryDocumentStore {
        let store = MemoryDocumentStore::default();
        store.files.lock().unwrap().insert(path.to_string(), bytes);
        store
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.files.lock().unwrap().get(path).cloned()
    }
}

impl DocumentStore for MemoryDocumentStore {
    async fn upload(
        &self,
        path: &str,
        bytes: Vec<u8>,
        options: UploadOptions,
    ) -> Result<(), PersistenceError> {
        if self.fail_uploads.load(Ordering::SeqCst) {
            return Err(PersistenceError::Unavailable("upload refused".to_string()));
        }
        let mut files = self.files.lock().unwrap();
        if !options.overwrite && files.contains_key(path) {
            return Err(PersistenceError::AlreadyExists(path.to_string()));
        }
        files.insert(path.to_string(), bytes);
        Ok(())
    }

    async fn download(&self, path: &str) -> Result<Vec<u8>, PersistenceError> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        self.file(path)
            .ok_or_else(|| PersistenceError::NotFound(path.to_string()))
    }

    async fn remove(&self, path: &str) -> Result<(), PersistenceError> {
        self.files
            .lock()
            .unwrap()
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| PersistenceError::NotFound(path.to_string()))
    }

    async fn create_signed_url(&self, path: &str, ttl: Duration) -> Result<String, PersistenceError> {
        Ok(format!("memory://{path}?ttl={}", ttl.as_secs()))
    }
}

#[derive(Default)]
pub struct MemoryRecordStore {
    pub records: Mutex<HashMap<(String, String), Value>>,
    pub fail_puts: AtomicBool,
}

impl MemoryRecordStore {
    pub fn record(&self, collection: &str, key: &str) -> Option<Value> {
        self.records
            .lock()
            .unwrap()
            .get(&(collection.to_string(), key.to_string()))
            .cloned()
    }
}

impl RecordStore for MemoryRecordStore {
    async fn get(&self, collection: &str, key: &str) -> Result<Option<Value>, PersistenceError> {
        Ok(self.record(collection, key))
    }

    async fn put(&self, collection: &str, key: &str, value: Value) -> Result<(), PersistenceError> {
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(PersistenceError::Unavailable("write refused".to_string()));
        }
        self.records
            .lock()
            .unwrap()
            .insert((collection.to_string(), key.to_string()), value);
        Ok(())
    }

    async fn delete(&self, collection: &str, key: &str) -> Result<bool, PersistenceError> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .remove(&(collection.to_string(), key.to_string()))
            .is_some())
    }
}
