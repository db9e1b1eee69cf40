//! Settled-path handling: extract tags, resolve art, replace the stored Piece.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use common::{relpath_from, Piece};
use metadata::{content_checksum, read_tags, AudioTags, MetadataError, TagFields};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::art::{resolve_album_art, ArtCache};
use crate::blob::BlobStore;
use crate::store::{replace_piece, Replacement, StoreError, TransactionalStore};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("{0} is a directory")]
    Directory(PathBuf),
    #[error("cannot read {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("tag extraction failed: {0}")]
    Metadata(#[from] MetadataError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Tags plus the metadata-invariant content hash of one file.
#[derive(Debug, Clone, Default)]
pub struct ExtractedTags {
    pub tags: AudioTags,
    pub hash: String,
}

pub trait TagReader: Send {
    fn extract(&self, path: &Path) -> Result<ExtractedTags, MetadataError>;
}

/// Reads real audio files with lofty and checksums their payload.
#[derive(Clone, Copy, Debug, Default)]
pub struct LoftyTagReader;

impl TagReader for LoftyTagReader {
    fn extract(&self, path: &Path) -> Result<ExtractedTags, MetadataError> {
        let tags = read_tags(path)?;
        let hash = content_checksum(path)?;
        Ok(ExtractedTags { tags, hash })
    }
}

/// Owns the album-art cache, so one synchronizer must serve all paths of a
/// run, one at a time.
pub struct Synchronizer<S, B, R> {
    root: PathBuf,
    store: Arc<S>,
    blobs: Arc<B>,
    reader: R,
    art_bucket: String,
    art_cache: ArtCache,
}

impl<S, B, R> Synchronizer<S, B, R>
where
    S: TransactionalStore,
    B: BlobStore,
    R: TagReader,
{
    pub fn new(root: PathBuf, store: Arc<S>, blobs: Arc<B>, reader: R, art_bucket: String) -> Self {
        Self {
            root,
            store,
            blobs,
            reader,
            art_bucket,
            art_cache: ArtCache::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn sync(&mut self, path: &Path) -> Result<Replacement, SyncError> {
        let meta = fs::metadata(path).map_err(|source| SyncError::Unreadable {
            path: path.to_path_buf(),
            source,
        })?;
        if meta.is_dir() {
            return Err(SyncError::Directory(path.to_path_buf()));
        }

        let ExtractedTags { tags, hash } = self.reader.extract(path)?;
        let picture = resolve_album_art(
            &mut self.art_cache,
            self.blobs.as_ref(),
            &self.art_bucket,
            path,
            tags.picture,
        );
        let piece = build_piece(tags.fields, picture, hash, self.piece_path(path));
        Ok(replace_piece(self.store.as_ref(), &piece)?)
    }

    /// Runs [`Synchronizer::sync`] and logs the outcome. Failures only affect
    /// this path.
    pub fn process(&mut self, path: &Path) -> Option<Replacement> {
        match self.sync(path) {
            Ok(replacement) => {
                info!(
                    "synced {} as piece {} ({} grams, {} retired)",
                    path.display(),
                    replacement.id,
                    replacement.grams,
                    replacement.retired.len()
                );
                Some(replacement)
            }
            Err(SyncError::Directory(_)) => {
                debug!("skipping directory {}", path.display());
                None
            }
            Err(err) => {
                warn!("sync failed for {}: {}", path.display(), err);
                None
            }
        }
    }

    fn piece_path(&self, path: &Path) -> String {
        relpath_from(&self.root, path).unwrap_or_else(|| path.to_string_lossy().into_owned())
    }
}

fn build_piece(fields: TagFields, picture: String, hash: String, path: String) -> Piece {
    Piece {
        format: fields.format,
        file_type: fields.file_type,
        title: fields.title,
        album: fields.album,
        artist: fields.artist,
        album_artist: fields.album_artist,
        composer: fields.composer,
        genre: fields.genre,
        year: fields.year,
        track: fields.track,
        total_tracks: fields.total_tracks,
        disc: fields.disc,
        total_discs: fields.total_discs,
        comment: fields.comment,
        picture,
        hash,
        path,
    }
}
