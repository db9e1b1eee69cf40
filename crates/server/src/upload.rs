//! Spool-directory upload queue: each `*.json` file is one message listing
//! `{path, key}` entries whose bytes go to the piece bucket.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use library::{BlobError, BlobStore};
use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

const MESSAGE_EXT: &str = "json";
const REJECTED_EXT: &str = "rejected";

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct UploadEntry {
    #[serde(alias = "Path")]
    pub path: String,
    #[serde(alias = "Key")]
    pub key: String,
}

#[derive(Debug)]
pub struct SpoolMessage {
    pub file: PathBuf,
    pub entries: Vec<UploadEntry>,
}

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("blob error: {0}")]
    Blob(#[from] BlobError),
}

#[derive(Clone, Debug)]
pub struct SpoolQueue {
    dir: PathBuf,
}

impl SpoolQueue {
    pub fn open(dir: PathBuf) -> io::Result<Self> {
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Pending messages, oldest name first. Unparseable files are renamed
    /// aside and never delivered again.
    pub fn poll(&self) -> io::Result<Vec<SpoolMessage>> {
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.is_file() && path.extension().and_then(|ext| ext.to_str()) == Some(MESSAGE_EXT) {
                files.push(path);
            }
        }
        files.sort();

        let mut messages = Vec::with_capacity(files.len());
        for file in files {
            let bytes = match fs::read(&file) {
                Ok(bytes) => bytes,
                Err(err) => {
                    warn!("failed to read upload message {}: {}", file.display(), err);
                    continue;
                }
            };
            match serde_json::from_slice::<Vec<UploadEntry>>(&bytes) {
                Ok(entries) => messages.push(SpoolMessage { file, entries }),
                Err(err) => {
                    warn!("failed to parse upload message {}: {}", file.display(), err);
                    fs::rename(&file, file.with_extension(REJECTED_EXT))?;
                }
            }
        }
        Ok(messages)
    }

    pub fn ack(&self, message: &SpoolMessage) -> io::Result<()> {
        match fs::remove_file(&message.file) {
            Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
            _ => Ok(()),
        }
    }
}

/// Uploads every entry of `message`, stopping at the first failure.
pub fn upload_message<B: BlobStore>(
    blobs: &B,
    bucket: &str,
    message: &SpoolMessage,
) -> Result<usize, UploadError> {
    for entry in &message.entries {
        let path = PathBuf::from(&entry.path);
        let data = fs::read(&path).map_err(|source| UploadError::Read {
            path: path.clone(),
            source,
        })?;
        let content_type = mime_guess::from_path(&path).first_or_octet_stream();
        blobs.put(bucket, &entry.key, &data, content_type.essence_str())?;
        info!("uploaded {} from {}", entry.key, entry.path);
    }
    Ok(message.entries.len())
}

/// One pass over the spool. Messages are acknowledged only after all of
/// their entries uploaded; the rest are retried on the next pass.
pub fn drain_queue<B: BlobStore>(queue: &SpoolQueue, blobs: &B, bucket: &str) -> io::Result<usize> {
    let mut acked = 0;
    for message in queue.poll()? {
        match upload_message(blobs, bucket, &message) {
            Ok(_) => {
                queue.ack(&message)?;
                acked += 1;
            }
            Err(err) => warn!("upload of {} failed: {}", message.file.display(), err),
        }
    }
    Ok(acked)
}

pub async fn run_upload_worker<B>(queue: SpoolQueue, blobs: Arc<B>, bucket: String, poll: Duration)
where
    B: BlobStore + 'static,
{
    info!("upload worker polling {} every {}s", queue.dir().display(), poll.as_secs());
    let mut ticker = tokio::time::interval(poll);
    loop {
        ticker.tick().await;
        let queue = queue.clone();
        let blobs = Arc::clone(&blobs);
        let bucket = bucket.clone();
        match tokio::task::spawn_blocking(move || drain_queue(&queue, blobs.as_ref(), &bucket)).await {
            Ok(Ok(_)) => {}
            Ok(Err(err)) => warn!("upload spool scan failed: {}", err),
            Err(err) => warn!("upload worker join error: {}", err),
        }
    }
}
