use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Identity of a stored [`Piece`], assigned by the document store on insert.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PieceId(pub u64);

impl PieceId {
    pub fn to_be_bytes(self) -> [u8; 8] {
        self.0.to_be_bytes()
    }

    pub fn from_be_slice(bytes: &[u8]) -> Option<Self> {
        let array: [u8; 8] = bytes.try_into().ok()?;
        Some(PieceId(u64::from_be_bytes(array)))
    }
}

impl fmt::Display for PieceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stored metadata for one audio track.
///
/// Pieces are never edited in place: a new sync deletes every Piece sharing
/// its `hash` or its `path` and inserts a fresh one.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Piece {
    pub format: String,
    pub file_type: String,
    pub title: String,
    pub album: String,
    pub artist: String,
    pub album_artist: String,
    pub composer: String,
    pub genre: String,
    pub year: i32,
    pub track: u32,
    pub total_tracks: u32,
    pub disc: u32,
    pub total_discs: u32,
    pub comment: String,
    /// Object-store key of the album art, or empty.
    pub picture: String,
    /// Metadata-invariant checksum of the audio payload.
    pub hash: String,
    /// Slash-separated path relative to the watched tree.
    pub path: String,
}

impl Piece {
    /// Fields whose text feeds the gram index.
    pub fn indexed_fields(&self) -> [&str; 5] {
        [
            &self.title,
            &self.album,
            &self.artist,
            &self.album_artist,
            &self.composer,
        ]
    }

    /// Fields a search phrase is verified against.
    pub fn searchable_fields(&self) -> [&str; 4] {
        [&self.title, &self.album, &self.artist, &self.album_artist]
    }
}

/// One gram -> Piece association.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub key: Vec<u8>,
    pub value: PieceId,
}

pub fn relpath_from(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    Some(path_to_slash_string(rel))
}

fn path_to_slash_string(path: &Path) -> String {
    let parts: Vec<String> = path
        .components()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .collect();
    parts.join("/")
}
