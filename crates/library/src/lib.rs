//! Text indexing and ingestion for an audio collection: normalization, gram
//! tokenization, the transactional Piece store, album art handling, the
//! per-file synchronizer and phrase lookup.

pub mod art;
pub mod blob;
pub mod gram;
pub mod normalize;
pub mod query;
pub mod scan;
pub mod store;
pub mod sync;

pub use art::{art_key, find_album_art, resolve_album_art, ArtCache, ArtImage};
pub use blob::{Blob, BlobError, BlobStore, FsBlobStore, MemoryBlobStore};
pub use gram::{first_gram, index_grams, tokenize, GramSet, GRAM_SIZE_ASCII, GRAM_SIZE_NON_ASCII};
pub use normalize::normalize;
pub use query::{search, QueryError};
pub use scan::walk_target;
pub use store::{
    replace_piece, retire_matching, MemoryStore, PieceFilter, RedbStore, Replacement, StoreError,
    StoreStats, StoreTransaction, TransactionalStore,
};
pub use sync::{ExtractedTags, LoftyTagReader, SyncError, Synchronizer, TagReader};
