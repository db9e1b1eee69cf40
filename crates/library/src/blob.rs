//! Object-store seam for album art and uploaded audio bytes.

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use bytes::Bytes;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("object {bucket}/{key} not found")]
    NotFound { bucket: String, key: String },
    #[error("invalid object name: {0}")]
    InvalidName(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("upload rejected: {0}")]
    Rejected(String),
}

impl BlobError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, BlobError::NotFound { .. })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Blob {
    pub data: Bytes,
    pub content_type: String,
}

pub trait BlobStore: Send + Sync {
    /// Stores `data` under `bucket/key`, replacing any previous object.
    fn put(&self, bucket: &str, key: &str, data: &[u8], content_type: &str)
        -> Result<(), BlobError>;

    fn get(&self, bucket: &str, key: &str) -> Result<Blob, BlobError>;
}

#[derive(Debug, Serialize, Deserialize)]
struct ObjectAttrs {
    content_type: String,
}

/// Objects as plain files under `<root>/<bucket>/`, each with a JSON sidecar
/// carrying its content type.
#[derive(Clone, Debug)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn object_path(&self, bucket: &str, key: &str) -> Result<PathBuf, BlobError> {
        if bucket.is_empty()
            || bucket.starts_with('.')
            || bucket.contains(|ch: char| ch == '/' || ch == '\\')
        {
            return Err(BlobError::InvalidName(bucket.to_string()));
        }
        let name = object_file_name(key);
        if name.is_empty() || name.starts_with('.') {
            return Err(BlobError::InvalidName(key.to_string()));
        }
        Ok(self.root.join(bucket).join(name))
    }
}

/// Standard base64 keys contain `/` and `+`; map them to the URL-safe
/// alphabet so every key is a single file name.
fn object_file_name(key: &str) -> String {
    key.chars()
        .map(|ch| match ch {
            '/' => '_',
            '+' => '-',
            '\\' => '_',
            other => other,
        })
        .collect()
}

fn attrs_path(object: &Path) -> PathBuf {
    let mut name = object.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".attrs.json");
    object.with_file_name(name)
}

fn write_atomic(path: &Path, data: &[u8]) -> Result<(), BlobError> {
    let mut tmp_name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);
    fs::write(&tmp, data)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

impl BlobStore for FsBlobStore {
    fn put(
        &self,
        bucket: &str,
        key: &str,
        data: &[u8],
        content_type: &str,
    ) -> Result<(), BlobError> {
        let path = self.object_path(bucket, key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        write_atomic(&path, data)?;
        let attrs = serde_json::to_vec(&ObjectAttrs {
            content_type: content_type.to_string(),
        })?;
        write_atomic(&attrs_path(&path), &attrs)?;
        Ok(())
    }

    fn get(&self, bucket: &str, key: &str) -> Result<Blob, BlobError> {
        let path = self.object_path(bucket, key)?;
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(BlobError::NotFound {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                })
            }
            Err(err) => return Err(err.into()),
        };
        let content_type = match fs::read(attrs_path(&path)) {
            Ok(bytes) => serde_json::from_slice::<ObjectAttrs>(&bytes)?.content_type,
            Err(err) if err.kind() == ErrorKind::NotFound => "application/octet-stream".to_string(),
            Err(err) => return Err(err.into()),
        };
        Ok(Blob {
            data: Bytes::from(data),
            content_type,
        })
    }
}

/// In-process object store that counts writes and can be told to reject them.
#[derive(Default)]
pub struct MemoryBlobStore {
    objects: Mutex<HashMap<(String, String), Blob>>,
    puts: AtomicUsize,
    reject_puts: AtomicBool,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `put` calls that reached the store, successful or not.
    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    pub fn set_reject_puts(&self, reject: bool) {
        self.reject_puts.store(reject, Ordering::SeqCst);
    }

}

impl BlobStore for MemoryBlobStore {
    fn put(
        &self,
        bucket: &str,
        key: &str,
        data: &[u8],
        content_type: &str,
    ) -> Result<(), BlobError> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        if self.reject_puts.load(Ordering::SeqCst) {
            return Err(BlobError::Rejected(format!("{}/{}", bucket, key)));
        }
        self.objects.lock().insert(
            (bucket.to_string(), key.to_string()),
            Blob {
                data: Bytes::copy_from_slice(data),
                content_type: content_type.to_string(),
            },
        );
        Ok(())
    }

    fn get(&self, bucket: &str, key: &str) -> Result<Blob, BlobError> {
        self.objects
            .lock()
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
            .ok_or_else(|| BlobError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fs_store_round_trips_content_type() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path().to_path_buf());
        store
            .put("album-art", "ab/c+d=", b"\xFF\xD8\xFFjpeg", "image/jpeg")
            .unwrap();
        let blob = store.get("album-art", "ab/c+d=").unwrap();
        assert_eq!(blob.data.as_ref(), b"\xFF\xD8\xFFjpeg");
        assert_eq!(blob.content_type, "image/jpeg");
        assert!(dir.path().join("album-art").join("ab_c-d=").exists());
    }

    #[test]
    fn fs_store_overwrites_existing_object() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path().to_path_buf());
        store.put("pieces", "k", b"one", "audio/mpeg").unwrap();
        store.put("pieces", "k", b"two", "audio/flac").unwrap();
        let blob = store.get("pieces", "k").unwrap();
        assert_eq!(blob.data.as_ref(), b"two");
        assert_eq!(blob.content_type, "audio/flac");
    }

    #[test]
    fn missing_object_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path().to_path_buf());
        assert!(store.get("pieces", "absent").unwrap_err().is_not_found());
        assert!(MemoryBlobStore::new()
            .get("pieces", "absent")
            .unwrap_err()
            .is_not_found());
    }

    #[test]
    fn traversal_names_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path().to_path_buf());
        assert!(matches!(
            store.put("../etc", "k", b"", "text/plain"),
            Err(BlobError::InvalidName(_))
        ));
        assert!(matches!(
            store.get("pieces", ".."),
            Err(BlobError::InvalidName(_))
        ));
    }

    #[test]
    fn memory_store_counts_rejected_puts() {
        let store = MemoryBlobStore::new();
        store.set_reject_puts(true);
        assert!(store.put("b", "k", b"x", "image/png").is_err());
        assert_eq!(store.put_count(), 1);
        assert!(matches!(store.get("b", "k"), Err(err) if err.is_not_found()));
    }
}
