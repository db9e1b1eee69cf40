//! Wires watcher, debouncer, synchronizer and upload worker together.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use library::{walk_target, BlobStore, Synchronizer, TagReader, TransactionalStore};
use notify::RecommendedWatcher;
use tokio::sync::mpsc::{channel, unbounded_channel, Receiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::debounce::{run_debouncer, SETTLE_WINDOW};
use crate::upload::{run_upload_worker, SpoolQueue};
use crate::watch::setup_watcher;

pub struct UploadOptions {
    pub queue: SpoolQueue,
    pub bucket: String,
    pub poll: Duration,
}

pub struct SyncPipeline {
    watcher: Option<RecommendedWatcher>,
    debouncer: JoinHandle<()>,
    synchronizer: JoinHandle<()>,
    uploader: Option<JoinHandle<()>>,
}

impl SyncPipeline {
    /// Starts every worker. With `full`, the whole target tree is touched
    /// once before waiting on the watcher.
    pub fn start<S, B, R>(
        synchronizer: Synchronizer<S, B, R>,
        blobs: Arc<B>,
        full: bool,
        upload: Option<UploadOptions>,
    ) -> Result<Self, notify::Error>
    where
        S: TransactionalStore + 'static,
        B: BlobStore + 'static,
        R: TagReader + 'static,
    {
        let root = synchronizer.root().to_path_buf();
        let (touch_tx, touch_rx) = unbounded_channel();
        let (settled_tx, settled_rx) = channel(1);

        let debouncer = tokio::spawn(run_debouncer(touch_rx, settled_tx, SETTLE_WINDOW));
        let synchronizer = tokio::spawn(run_synchronizer(settled_rx, synchronizer));

        if full {
            spawn_full_walk(root.clone(), touch_tx.clone());
        }
        let watcher = setup_watcher(&root, touch_tx)?;

        let uploader = upload.map(|options| {
            tokio::spawn(run_upload_worker(
                options.queue,
                blobs,
                options.bucket,
                options.poll,
            ))
        });

        Ok(Self {
            watcher: Some(watcher),
            debouncer,
            synchronizer,
            uploader,
        })
    }

    /// Stops watching and drops unsettled paths. The synchronizer exits once
    /// it has processed its current path and the one settled path that may
    /// already be queued behind it.
    pub async fn shutdown(mut self) {
        drop(self.watcher.take());
        if let Some(uploader) = self.uploader.take() {
            uploader.abort();
        }
        self.debouncer.abort();
        if let Err(err) = self.synchronizer.await {
            if !err.is_cancelled() {
                warn!("synchronizer join error: {}", err);
            }
        }
        info!("sync pipeline stopped");
    }
}

fn spawn_full_walk(root: PathBuf, touches: UnboundedSender<PathBuf>) {
    tokio::task::spawn_blocking(move || {
        let files = walk_target(&root);
        info!("full rescan found {} files under {}", files.len(), root.display());
        for path in files {
            if touches.send(path).is_err() {
                break;
            }
        }
    });
}

/// Processes settled paths strictly one at a time.
pub async fn run_synchronizer<S, B, R>(
    mut settled: Receiver<PathBuf>,
    mut synchronizer: Synchronizer<S, B, R>,
) where
    S: TransactionalStore + 'static,
    B: BlobStore + 'static,
    R: TagReader + 'static,
{
    while let Some(path) = settled.recv().await {
        let task = tokio::task::spawn_blocking(move || {
            synchronizer.process(&path);
            synchronizer
        });
        synchronizer = match task.await {
            Ok(synchronizer) => synchronizer,
            Err(err) => {
                error!("synchronizer worker failed: {}", err);
                return;
            }
        };
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use library::{
        ExtractedTags, MemoryBlobStore, MemoryStore, TransactionalStore as _,
    };
    use metadata::{AudioTags, MetadataError};

    use super::*;

    struct TitleFromName;

    impl TagReader for TitleFromName {
        fn extract(&self, path: &Path) -> Result<ExtractedTags, MetadataError> {
            let mut tags = AudioTags::default();
            tags.fields.title = path
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_default();
            Ok(ExtractedTags {
                tags,
                hash: path.to_string_lossy().into_owned(),
            })
        }
    }

    #[tokio::test]
    async fn settled_paths_are_synced_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let synchronizer = Synchronizer::new(
            dir.path().to_path_buf(),
            Arc::clone(&store),
            Arc::new(MemoryBlobStore::new()),
            TitleFromName,
            "album-art".to_string(),
        );
        for name in ["alpha song.mp3", "bravo song.mp3"] {
            fs::write(dir.path().join(name), b"x").unwrap();
        }

        let (tx, rx) = channel(1);
        let worker = tokio::spawn(run_synchronizer(rx, synchronizer));
        tx.send(dir.path().join("alpha song.mp3")).await.unwrap();
        tx.send(dir.path().join("bravo song.mp3")).await.unwrap();
        tx.send(dir.path().to_path_buf()).await.unwrap();
        drop(tx);
        worker.await.unwrap();

        assert_eq!(store.stats().unwrap().pieces, 2);
        let found = library::search(store.as_ref(), "bravo", 10).unwrap();
        assert_eq!(found[0].path, "bravo song.mp3");
    }
}
