//! Document-store seam: Pieces and their gram index entries, mutated only
//! inside transactions.

use std::collections::BTreeSet;

use common::{IndexEntry, Piece, PieceId};
use redb::{CommitError, DatabaseError, StorageError, TableError, TransactionError};
use serde::Serialize;
use thiserror::Error;

use crate::gram::index_grams;

mod memory;
mod redb_store;

pub use memory::{MemoryStore, MemoryTransaction};
pub use redb_store::{RedbStore, RedbTransaction, INDEX_FORMAT_VERSION};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("db error: {0}")]
    Redb(#[from] redb::Error),
    #[error("bincode error: {0}")]
    Bincode(#[from] Box<bincode::ErrorKind>),
    #[error("key parse error: {0}")]
    KeyParse(String),
    #[error("transaction aborted: {0}")]
    Aborted(String),
}

impl From<DatabaseError> for StoreError {
    fn from(err: DatabaseError) -> Self {
        StoreError::Redb(err.into())
    }
}

impl From<TableError> for StoreError {
    fn from(err: TableError) -> Self {
        StoreError::Redb(err.into())
    }
}

impl From<TransactionError> for StoreError {
    fn from(err: TransactionError) -> Self {
        StoreError::Redb(err.into())
    }
}

impl From<StorageError> for StoreError {
    fn from(err: StorageError) -> Self {
        StoreError::Redb(err.into())
    }
}

impl From<CommitError> for StoreError {
    fn from(err: CommitError) -> Self {
        StoreError::Redb(err.into())
    }
}

/// Equality filters over the two uniqueness keys of a Piece.
#[derive(Clone, Copy, Debug)]
pub enum PieceFilter<'a> {
    Hash(&'a str),
    Path(&'a str),
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub pieces: u64,
    pub index_entries: u64,
}

/// A unit of work with read-your-writes visibility. Dropping it without
/// calling [`StoreTransaction::commit`] discards every change.
pub trait StoreTransaction {
    fn find_pieces(&mut self, filter: PieceFilter<'_>) -> Result<Vec<PieceId>, StoreError>;
    fn delete_piece(&mut self, id: PieceId) -> Result<(), StoreError>;
    fn index_entries_for(&mut self, piece: PieceId) -> Result<Vec<IndexEntry>, StoreError>;
    fn delete_index_entry(&mut self, entry: &IndexEntry) -> Result<(), StoreError>;
    fn insert_piece(&mut self, piece: &Piece) -> Result<PieceId, StoreError>;
    fn insert_index_entry(&mut self, entry: &IndexEntry) -> Result<(), StoreError>;
    fn commit(self) -> Result<(), StoreError>;
}

pub trait TransactionalStore: Send + Sync {
    type Transaction<'a>: StoreTransaction
    where
        Self: 'a;

    fn begin(&self) -> Result<Self::Transaction<'_>, StoreError>;

    /// Distinct Pieces indexed under `gram`, ordered by identity.
    fn pieces_for_gram(&self, gram: &[u8], limit: usize) -> Result<Vec<PieceId>, StoreError>;

    fn get_piece(&self, id: PieceId) -> Result<Option<Piece>, StoreError>;

    /// Removes every index entry, returning how many were removed.
    fn clear_index(&self) -> Result<u64, StoreError>;

    fn stats(&self) -> Result<StoreStats, StoreError>;
}

/// Deletes every Piece matching any of `filters` and returns the retired
/// identities, each once.
pub fn retire_matching<T: StoreTransaction>(
    txn: &mut T,
    filters: &[PieceFilter<'_>],
) -> Result<Vec<PieceId>, StoreError> {
    let mut retired = BTreeSet::new();
    for filter in filters {
        for id in txn.find_pieces(*filter)? {
            if retired.insert(id) {
                txn.delete_piece(id)?;
            }
        }
    }
    Ok(retired.into_iter().collect())
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Replacement {
    pub id: PieceId,
    pub retired: Vec<PieceId>,
    pub grams: usize,
}

/// Replaces whatever Pieces share `piece`'s hash or path with `piece` and
/// rebuilds the index entries, all in one transaction.
pub fn replace_piece<S: TransactionalStore>(
    store: &S,
    piece: &Piece,
) -> Result<Replacement, StoreError> {
    let mut txn = store.begin()?;

    let retired = retire_matching(
        &mut txn,
        &[PieceFilter::Hash(&piece.hash), PieceFilter::Path(&piece.path)],
    )?;
    for id in &retired {
        for entry in txn.index_entries_for(*id)? {
            txn.delete_index_entry(&entry)?;
        }
    }

    let id = txn.insert_piece(piece)?;
    let grams = index_grams(piece.indexed_fields());
    for gram in &grams {
        txn.insert_index_entry(&IndexEntry {
            key: gram.clone(),
            value: id,
        })?;
    }

    txn.commit()?;
    Ok(Replacement {
        id,
        retired,
        grams: grams.len(),
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::gram::GramSet;

    pub fn piece(title: &str, hash: &str, path: &str) -> Piece {
        Piece {
            title: title.to_string(),
            album: "Night Drive".to_string(),
            artist: "Lumen".to_string(),
            hash: hash.to_string(),
            path: path.to_string(),
            ..Piece::default()
        }
    }

    fn all_pieces_for<S: TransactionalStore>(store: &S, gram: &str) -> Vec<PieceId> {
        store.pieces_for_gram(gram.as_bytes(), usize::MAX).unwrap()
    }

    /// Every gram of the stored Piece resolves back to it, and nothing else does.
    pub fn assert_index_matches<S: TransactionalStore>(store: &S, id: PieceId, expected: &GramSet) {
        let mut txn = store.begin().unwrap();
        let stored: GramSet = txn
            .index_entries_for(id)
            .unwrap()
            .into_iter()
            .map(|entry| entry.key)
            .collect();
        drop(txn);
        assert_eq!(&stored, expected);
        for gram in expected {
            assert!(store.pieces_for_gram(gram, usize::MAX).unwrap().contains(&id));
        }
    }

    pub fn replacing_by_hash_retires_old_piece<S: TransactionalStore>(store: &S) {
        let first = replace_piece(store, &piece("Morning Song", "h1", "a/one.mp3")).unwrap();
        let second = replace_piece(store, &piece("Evening Tune", "h1", "b/copy.mp3")).unwrap();

        assert_eq!(second.retired, vec![first.id]);
        assert_eq!(store.get_piece(first.id).unwrap(), None);
        assert_eq!(store.get_piece(second.id).unwrap().unwrap().path, "b/copy.mp3");
        assert!(all_pieces_for(store, "morn").is_empty());
        assert_eq!(all_pieces_for(store, "even"), vec![second.id]);
        assert_eq!(store.stats().unwrap().pieces, 1);

        let expected = index_grams(["Evening Tune", "Night Drive", "Lumen", "", ""]);
        assert_index_matches(store, second.id, &expected);
        assert_eq!(store.stats().unwrap().index_entries, expected.len() as u64);
    }

    pub fn replacing_by_path_and_hash_retires_both<S: TransactionalStore>(store: &S) {
        let by_hash = replace_piece(store, &piece("Alpha Wave", "h1", "x.mp3")).unwrap();
        let by_path = replace_piece(store, &piece("Beta Wave", "h2", "y.mp3")).unwrap();
        let merged = replace_piece(store, &piece("Gamma Wave", "h1", "y.mp3")).unwrap();

        assert_eq!(merged.retired, vec![by_hash.id, by_path.id]);
        assert_eq!(store.stats().unwrap().pieces, 1);
        assert!(all_pieces_for(store, "alph").is_empty());
        assert!(all_pieces_for(store, "beta").is_empty());
        assert_eq!(all_pieces_for(store, "wave"), vec![merged.id]);
    }

    pub fn clear_index_keeps_pieces<S: TransactionalStore>(store: &S) {
        let stored = replace_piece(store, &piece("Clearwater", "h9", "c.mp3")).unwrap();
        let removed = store.clear_index().unwrap();
        assert_eq!(removed, stored.grams as u64);
        assert!(all_pieces_for(store, "clea").is_empty());
        assert!(store.get_piece(stored.id).unwrap().is_some());
        assert_eq!(store.stats().unwrap().index_entries, 0);
    }

    pub fn dropped_transaction_changes_nothing<S: TransactionalStore>(store: &S) {
        let kept = replace_piece(store, &piece("Keeper", "h1", "k.mp3")).unwrap();
        {
            let mut txn = store.begin().unwrap();
            retire_matching(&mut txn, &[PieceFilter::Hash("h1")]).unwrap();
            txn.insert_piece(&piece("Intruder", "h1", "k.mp3")).unwrap();
        }
        assert!(store.get_piece(kept.id).unwrap().is_some());
        assert_eq!(all_pieces_for(store, "keep"), vec![kept.id]);
        assert_eq!(store.stats().unwrap().pieces, 1);
    }

    pub fn gram_lookup_respects_limit<S: TransactionalStore>(store: &S) {
        let mut ids = Vec::new();
        for n in 0..3 {
            let stored = replace_piece(
                store,
                &piece("Shared Title", &format!("h{n}"), &format!("{n}.mp3")),
            )
            .unwrap();
            ids.push(stored.id);
        }
        assert_eq!(store.pieces_for_gram(b"shar", 2).unwrap(), ids[..2].to_vec());
        assert_eq!(all_pieces_for(store, "shar"), ids);
    }

    #[test]
    fn retire_matching_deduplicates_overlapping_filters() {
        let store = MemoryStore::new();
        let stored = replace_piece(&store, &piece("Solo", "h1", "s.mp3")).unwrap();
        let mut txn = store.begin().unwrap();
        let retired = retire_matching(
            &mut txn,
            &[PieceFilter::Hash("h1"), PieceFilter::Path("s.mp3")],
        )
        .unwrap();
        assert_eq!(retired, vec![stored.id]);
    }
}
