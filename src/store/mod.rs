//! The two external collaborators: a blob store for PDFs and a JSON record store.

mod fs;
#[cfg(test)]
pub mod memory;

pub use fs::{FsDocumentStore, FsRecordStore};

use std::future::Future;
use std::time::Duration;

use base64::prelude::*;
use rand::Rng;
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed record: {0}")]
    Json(#[from] serde_json::Error),
    #[error("`{0}` not found")]
    NotFound(String),
    #[error("`{0}` already exists")]
    AlreadyExists(String),
    #[error("invalid storage path `{0}`")]
    InvalidPath(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone)]
pub struct UploadOptions {
    pub content_type: String,
    pub overwrite: bool,
}

impl UploadOptions {
    pub fn pdf(overwrite: bool) -> UploadOptions {
        UploadOptions {
            content_type: "application/pdf".to_string(),
            overwrite,
        }
    }
}

/// Arbitrary-size blobs keyed by a relative path.
pub trait DocumentStore: Send + Sync {
    fn upload(
        &self,
        path: &str,
        bytes: Vec<u8>,
        options: UploadOptions,
    ) -> impl Future<Output = Result<(), PersistenceError>> + Send;

    fn download(&self, path: &str) -> impl Future<Output = Result<Vec<u8>, PersistenceError>> + Send;

    fn remove(&self, path: &str) -> impl Future<Output = Result<(), PersistenceError>> + Send;

    fn create_signed_url(
        &self,
        path: &str,
        ttl: Duration,
    ) -> impl Future<Output = Result<String, PersistenceError>> + Send;
}

/// JSON documents grouped in collections.
pub trait RecordStore: Send + Sync {
    fn get(
        &self,
        collection: &str,
        key: &str,
    ) -> impl Future<Output = Result<Option<Value>, PersistenceError>> + Send;

    fn put(
        &self,
        collection: &str,
        key: &str,
        value: Value,
    ) -> impl Future<Output = Result<(), PersistenceError>> + Send;

    /// Returns whether there was something to delete.
    fn delete(
        &self,
        collection: &str,
        key: &str,
    ) -> impl Future<Output = Result<bool, PersistenceError>> + Send;
}

/// Rejects absolute paths and anything that could climb out of the store.
pub fn check_path(path: &str) -> Result<&str, PersistenceError> {
    let ok = !path.is_empty()
        && !path.starts_with('/')
        && !path.contains('\\')
        && path
            .split('/')
            .all(|seg| !seg.is_empty() && seg != "." && seg != "..");
    if ok {
        Ok(path)
    } else {
        Err(PersistenceError::InvalidPath(path.to_string()))
    }
}

/// Builds and checks expiring read URLs of the form
/// `{base}/files/{path}?expires={unix}&token={digest}`.
#[derive(Debug, Clone)]
pub struct UrlSigner {
    base_url: String,
    secret: String,
}

impl UrlSigner {
    pub fn new(base_url: &str, secret: &str) -> UrlSigner {
        UrlSigner {
            base_url: base_url.trim_end_matches('/').to_string(),
            secret: secret.to_string(),
        }
    }

    /// Secret used when none is configured. It only lives as long as the process, so links
    /// handed out before a restart stop working.
    pub fn random_secret() -> String {
        let mut bytes = [0u8; 32];
        rand::rng().fill(&mut bytes);
        BASE64_URL_SAFE_NO_PAD.encode(bytes)
    }

    fn digest(&self, path: &str, expires: i64) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(self.secret.as_bytes());
        hasher.update([0]);
        hasher.update(path.as_bytes());
        hasher.update([0]);
        hasher.update(expires.to_string().as_bytes());
        hasher.finalize().into()
    }

    fn token(&self, path: &str, expires: i64) -> String {
        BASE64_URL_SAFE_NO_PAD.encode(self.digest(path, expires))
    }

    pub fn sign(&self, path: &str, ttl: Duration, now: i64) -> String {
        let expires = now + ttl.as_secs() as i64;
        format!(
            "{}/files/{}?expires={}&token={}",
            self.base_url,
            path,
            expires,
            self.token(path, expires)
        )
    }

    /// Checks a link. Nothing verifies under an empty secret.
    pub fn verify(&self, path: &str, expires: i64, token: &str, now: i64) -> bool {
        if self.secret.is_empty() || now > expires {
            return false;
        }
        let Ok(given) = BASE64_URL_SAFE_NO_PAD.decode(token) else {
            return false;
        };
        constant_time_eq(&self.digest(path, expires), &given)
    }
}

/// Compares two byte strings in a time that only depends on their length.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let diff = a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y));
    std::hint::black_box(diff) == 0
}

pub fn unix_now() -> i64 {
    time::OffsetDateTime::now_utc().unix_timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_path() {
        assert!(check_path("signed/r1.pdf").is_ok());
        for bad in ["", "/etc/passwd", "a/../b", "./a", "a//b", "a\\b", ".."] {
            assert!(check_path(bad).is_err(), "{bad}");
        }
    }

    #[test]
    fn test_signed_url() {
        let signer = UrlSigner::new("http://localhost:3000/", "s3cret");
        let url = signer.sign("signed/r1.pdf", Duration::from_secs(60), 1_000);
        assert!(url.starts_with("http://localhost:3000/files/signed/r1.pdf?expires=1060&token="));
        let token = url.rsplit_once("token=").unwrap().1;
        assert!(signer.verify("signed/r1.pdf", 1060, token, 1_000));
        assert!(signer.verify("signed/r1.pdf", 1060, token, 1_060));
        assert!(!signer.verify("signed/r1.pdf", 1060, token, 1_061));
        assert!(!signer.verify("signed/r2.pdf", 1060, token, 1_000));
        assert!(!signer.verify("signed/r1.pdf", 2060, token, 1_000));
        assert!(!UrlSigner::new("http://x", "other").verify("signed/r1.pdf", 1060, token, 1_000));
        assert!(!signer.verify("signed/r1.pdf", 1060, &token[1..], 1_000));
        assert!(!signer.verify("signed/r1.pdf", 1060, "not base64!", 1_000));
    }

    #[test]
    fn test_empty_secret_never_verifies() {
        let open = UrlSigner::new("http://localhost:3000", "");
        let url = open.sign("templates/t.pdf", Duration::from_secs(60), 1_000);
        let token = url.rsplit_once("token=").unwrap().1;
        assert!(!open.verify("templates/t.pdf", 1060, token, 1_000));
    }

    #[test]
    fn test_random_secret() {
        let a = UrlSigner::random_secret();
        assert_eq!(a.len(), 43);
        assert_ne!(a, UrlSigner::random_secret());
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"ab"));
    }
}
