//! Album art discovery and de-duplicated upload.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use metadata::CoverArt;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::blob::BlobStore;

const ART_FILE_PREFIX: &str = "albumart";
const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArtImage {
    pub data: Vec<u8>,
    pub content_type: String,
}

/// Object key for an image: standard base64 of its SHA-256 digest.
pub fn art_key(data: &[u8]) -> String {
    STANDARD.encode(Sha256::digest(data))
}

fn art_content_type(path: &Path) -> Option<&'static str> {
    let name = path.file_name()?.to_str()?.to_ascii_lowercase();
    if !name.starts_with(ART_FILE_PREFIX) {
        return None;
    }
    if name.ends_with(".jpg") {
        Some("image/jpeg")
    } else if name.ends_with(".png") {
        Some("image/png")
    } else {
        None
    }
}

/// Picks the largest `AlbumArt*.jpg` / `AlbumArt*.png` in `dir`, matching
/// names case-insensitively.
pub fn find_album_art(dir: &Path) -> io::Result<Option<ArtImage>> {
    let mut best: Option<(u64, PathBuf, &'static str)> = None;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let Some(content_type) = art_content_type(&path) else {
            continue;
        };
        let meta = entry.metadata()?;
        if !meta.is_file() {
            continue;
        }
        let size = meta.len();
        let larger = match &best {
            Some((best_size, best_path, _)) => {
                size > *best_size || (size == *best_size && path < *best_path)
            }
            None => true,
        };
        if larger {
            best = Some((size, path, content_type));
        }
    }

    match best {
        Some((_, path, content_type)) => Ok(Some(ArtImage {
            data: fs::read(&path)?,
            content_type: content_type.to_string(),
        })),
        None => Ok(None),
    }
}

/// Which directories already resolved to an art key, and which keys are
/// known to exist in the object store. Lives as long as its synchronizer.
#[derive(Debug, Default)]
pub struct ArtCache {
    by_directory: HashMap<PathBuf, String>,
    uploaded: HashSet<String>,
}

impl ArtCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_directory(&self, dir: &Path) -> Option<&str> {
        self.by_directory.get(dir).map(String::as_str)
    }

    pub fn is_uploaded(&self, key: &str) -> bool {
        self.uploaded.contains(key)
    }

    fn record(&mut self, dir: Option<&Path>, key: &str) {
        self.uploaded.insert(key.to_string());
        if let Some(dir) = dir {
            self.by_directory.insert(dir.to_path_buf(), key.to_string());
        }
    }
}

/// Resolves the art key for the audio file at `file`.
///
/// Embedded pictures win. Otherwise the directory's cached key is reused, or
/// the directory is scanned for an art file. Returns an empty string when
/// there is no art or the upload failed.
pub fn resolve_album_art<B: BlobStore + ?Sized>(
    cache: &mut ArtCache,
    blobs: &B,
    bucket: &str,
    file: &Path,
    embedded: Option<CoverArt>,
) -> String {
    if let Some(cover) = embedded {
        let image = ArtImage {
            content_type: cover
                .mime
                .unwrap_or_else(|| FALLBACK_CONTENT_TYPE.to_string()),
            data: cover.data,
        };
        return upload_once(cache, blobs, bucket, None, image).unwrap_or_default();
    }

    let Some(dir) = file.parent() else {
        return String::new();
    };
    if let Some(key) = cache.for_directory(dir) {
        return key.to_string();
    }
    match find_album_art(dir) {
        Ok(Some(image)) => upload_once(cache, blobs, bucket, Some(dir), image).unwrap_or_default(),
        Ok(None) => String::new(),
        Err(err) => {
            warn!("album art scan failed for {}: {}", dir.display(), err);
            String::new()
        }
    }
}

fn upload_once<B: BlobStore + ?Sized>(
    cache: &mut ArtCache,
    blobs: &B,
    bucket: &str,
    dir: Option<&Path>,
    image: ArtImage,
) -> Option<String> {
    let key = art_key(&image.data);
    if cache.is_uploaded(&key) {
        debug!("album art {} already uploaded", key);
    } else if let Err(err) = blobs.put(bucket, &key, &image.data, &image.content_type) {
        warn!("album art upload failed for {}: {}", key, err);
        return None;
    }
    cache.record(dir, &key);
    Some(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::MemoryBlobStore;

    #[test]
    fn art_key_is_base64_sha256() {
        assert_eq!(
            art_key(b""),
            "47DEQpj8HBSa+/TImW+5JCeuQeRkm5NMpJWZG3hSuFU="
        );
    }

    #[test]
    fn largest_matching_file_wins() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("AlbumArtSmall.jpg"), vec![1u8; 10]).unwrap();
        fs::write(dir.path().join("albumart_large.PNG"), vec![2u8; 40]).unwrap();
        fs::write(dir.path().join("AlbumArt.gif"), vec![3u8; 90]).unwrap();
        fs::write(dir.path().join("cover.jpg"), vec![4u8; 90]).unwrap();

        let image = find_album_art(dir.path()).unwrap().unwrap();
        assert_eq!(image.data, vec![2u8; 40]);
        assert_eq!(image.content_type, "image/png");
    }

    #[test]
    fn directory_without_art_yields_none() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("folder.jpg"), b"x").unwrap();
        assert!(find_album_art(dir.path()).unwrap().is_none());
    }

    #[test]
    fn directory_art_is_uploaded_once() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("AlbumArt.jpg"), b"jpeg bytes").unwrap();
        let blobs = MemoryBlobStore::new();
        let mut cache = ArtCache::new();

        let first = resolve_album_art(
            &mut cache,
            &blobs,
            "album-art",
            &dir.path().join("01.mp3"),
            None,
        );
        let second = resolve_album_art(
            &mut cache,
            &blobs,
            "album-art",
            &dir.path().join("02.mp3"),
            None,
        );

        assert_eq!(first, art_key(b"jpeg bytes"));
        assert_eq!(first, second);
        assert_eq!(blobs.put_count(), 1);
        assert_eq!(cache.for_directory(dir.path()), Some(first.as_str()));
    }

    #[test]
    fn embedded_picture_skips_upload_when_known() {
        let blobs = MemoryBlobStore::new();
        let mut cache = ArtCache::new();
        let cover = || CoverArt {
            data: b"embedded".to_vec(),
            mime: Some("image/png".to_string()),
        };

        let first = resolve_album_art(&mut cache, &blobs, "a", Path::new("/m/x.flac"), Some(cover()));
        let second = resolve_album_art(&mut cache, &blobs, "a", Path::new("/n/y.flac"), Some(cover()));

        assert_eq!(first, second);
        assert_eq!(blobs.put_count(), 1);
        assert_eq!(blobs.get("a", &first).unwrap().content_type, "image/png");
        assert!(cache.for_directory(Path::new("/m")).is_none());
    }

    #[test]
    fn failed_upload_leaves_no_picture() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("AlbumArt.jpg"), b"jpeg").unwrap();
        let blobs = MemoryBlobStore::new();
        blobs.set_reject_puts(true);
        let mut cache = ArtCache::new();

        let key = resolve_album_art(&mut cache, &blobs, "a", &dir.path().join("t.mp3"), None);
        assert!(key.is_empty());
        assert!(cache.for_directory(dir.path()).is_none());

        blobs.set_reject_puts(false);
        let key = resolve_album_art(&mut cache, &blobs, "a", &dir.path().join("t.mp3"), None);
        assert_eq!(key, art_key(b"jpeg"));
    }
}
