use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde_json::Value;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use super::{
    DocumentStore, PersistenceError, RecordStore, UploadOptions, UrlSigner, check_path, unix_now,
};

/// Writes through a temporary file and a rename, so readers never see half a file.
async fn atomic_write(path: &Path, data: &[u8]) -> std::io::Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).await?;
    }
    let tmp_path = path.with_extension("tmp");
    {
        let mut file = fs::File::create(&tmp_path).await?;
        file.write_all(data).await?;
        file.sync_all().await?;
    }
    fs::rename(&tmp_path, path).await
}

/// Blobs kept as plain files under a root directory.
#[derive(Debug, Clone)]
pub struct FsDocumentStore {
    root: PathBuf,
    signer: UrlSigner,
}

impl FsDocumentStore {
    pub fn new(root: impl Into<PathBuf>, signer: UrlSigner) -> FsDocumentStore {
        FsDocumentStore {
            root: root.into(),
            signer,
        }
    }

    fn full_path(&self, path: &str) -> Result<PathBuf, PersistenceError> {
        Ok(self.root.join(check_path(path)?))
    }

    pub fn signer(&self) -> &UrlSigner {
        &self.signer
    }
}

impl DocumentStore for FsDocumentStore {
    async fn upload(
        &self,
        path: &str,
        bytes: Vec<u8>,
        options: UploadOptions,
    ) -> Result<(), PersistenceError> {
        let full = self.full_path(path)?;
        if !options.overwrite && fs::try_exists(&full).await? {
            return Err(PersistenceError::AlreadyExists(path.to_string()));
        }
        log::debug!(
            "Storing {} ({} bytes, {})",
            path,
            bytes.len(),
            options.content_type
        );
        atomic_write(&full, &bytes).await?;
        Ok(())
    }

    async fn download(&self, path: &str) -> Result<Vec<u8>, PersistenceError> {
        let full = self.full_path(path)?;
        match fs::read(&full).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(PersistenceError::NotFound(path.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn remove(&self, path: &str) -> Result<(), PersistenceError> {
        let full = self.full_path(path)?;
        match fs::remove_file(&full).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(PersistenceError::NotFound(path.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn create_signed_url(&self, path: &str, ttl: Duration) -> Result<String, PersistenceError> {
        let full = self.full_path(path)?;
        if !fs::try_exists(&full).await? {
            return Err(PersistenceError::NotFound(path.to_string()));
        }
        Ok(self.signer.sign(path, ttl, unix_now()))
    }
}

/// JSON records kept as `{root}/{collection}/{key}.json`.
#[derive(Debug, Clone)]
pub struct FsRecordStore {
    root: PathBuf,
}

impl FsRecordStore {
    pub fn new(root: impl Into<PathBuf>) -> FsRecordStore {
        FsRecordStore { root: root.into() }
    }

    fn record_path(&self, collection: &str, key: &str) -> Result<PathBuf, PersistenceError> {
        check_path(collection)?;
        if key.contains('/') {
            return Err(PersistenceError::InvalidPath(key.to_string()));
        }
        check_path(key)?;
        Ok(self.root.join(collection).join(format!("{key}.json")))
    }
}

impl RecordStore for FsRecordStore {
    async fn get(&self, collection: &str, key: &str) -> Result<Option<Value>, PersistenceError> {
        let path = self.record_path(collection, key)?;
        match fs::read(&path).await {
            Ok(data) => Ok(Some(serde_json::from_slice(&data)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, collection: &str, key: &str, value: Value) -> Result<(), PersistenceError> {
        let path = self.record_path(collection, key)?;
        let data = serde_json::to_vec_pretty(&value)?;
        atomic_write(&path, &data).await?;
        Ok(())
    }

    async fn delete(&self, collection: &str, key: &str) -> Result<bool, PersistenceError> {
        let path = self.record_path(collection, key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
