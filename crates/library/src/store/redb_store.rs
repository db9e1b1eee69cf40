use std::fs;
use std::path::Path;
use std::sync::Arc;

use common::{IndexEntry, Piece, PieceId};
use redb::{Database, ReadableTable, ReadableTableMetadata, TableDefinition, TableError, WriteTransaction};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{PieceFilter, StoreError, StoreStats, StoreTransaction, TransactionalStore};
use crate::gram::{GRAM_SIZE_ASCII, GRAM_SIZE_NON_ASCII};

/// Bumped whenever the gram widths or key layout change; a mismatch forces a
/// full reindex.
pub const INDEX_FORMAT_VERSION: u32 = 1;

const KEY_SEP: char = '\x1f';
const ID_LEN: usize = 8;
const EMPTY: &[u8] = &[];

const META_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("meta");
const PIECES_TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("pieces");
const PIECES_BY_HASH_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("pieces_by_hash");
const PIECES_BY_PATH_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("pieces_by_path");
const GRAM_INDEX_TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("gram_index");
const PIECE_GRAMS_TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("piece_grams");

const META_FORMAT_KEY: &str = "format";
const META_NEXT_ID_KEY: &str = "next_piece_id";

#[derive(Debug, Serialize, Deserialize)]
struct IndexFormat {
    version: u32,
    gram_ascii: u32,
    gram_non_ascii: u32,
}

impl IndexFormat {
    fn current() -> Self {
        Self {
            version: INDEX_FORMAT_VERSION,
            gram_ascii: GRAM_SIZE_ASCII as u32,
            gram_non_ascii: GRAM_SIZE_NON_ASCII as u32,
        }
    }

    fn matches_current(&self) -> bool {
        self.version == INDEX_FORMAT_VERSION
            && self.gram_ascii == GRAM_SIZE_ASCII as u32
            && self.gram_non_ascii == GRAM_SIZE_NON_ASCII as u32
    }
}

/// [`TransactionalStore`] backed by a redb database file.
#[derive(Clone)]
pub struct RedbStore {
    db: Arc<Database>,
}

impl RedbStore {
    /// Opens or creates the database. The flag is true when the stored index
    /// is missing or was written with a different format and the caller must
    /// run a full reindex.
    pub fn open(path: &Path) -> Result<(Self, bool), StoreError> {
        let db = open_or_create_db(path)?;
        let store = Self { db: Arc::new(db) };

        let needs_reindex = match read_format(&store.db)? {
            Some(format) if format.matches_current() => {
                info!("Loaded index from {:?}", path);
                false
            }
            Some(format) => {
                warn!(
                    "Index format mismatch ({:?}); clearing pieces and index",
                    format
                );
                store.reset()?;
                true
            }
            None => {
                warn!("Index missing; a full scan is required");
                store.reset()?;
                true
            }
        };

        Ok((store, needs_reindex))
    }

    fn reset(&self) -> Result<(), StoreError> {
        let write_txn = self.db.begin_write()?;
        clear_table(&write_txn, META_TABLE)?;
        clear_bytes_table(&write_txn, PIECES_TABLE)?;
        clear_table(&write_txn, PIECES_BY_HASH_TABLE)?;
        clear_table(&write_txn, PIECES_BY_PATH_TABLE)?;
        clear_bytes_table(&write_txn, GRAM_INDEX_TABLE)?;
        clear_bytes_table(&write_txn, PIECE_GRAMS_TABLE)?;
        {
            let mut meta = write_txn.open_table(META_TABLE)?;
            let bytes = encode_value(&IndexFormat::current())?;
            meta.insert(META_FORMAT_KEY, bytes.as_slice())?;
            write_txn.open_table(PIECES_TABLE)?;
            write_txn.open_table(PIECES_BY_HASH_TABLE)?;
            write_txn.open_table(PIECES_BY_PATH_TABLE)?;
            write_txn.open_table(GRAM_INDEX_TABLE)?;
            write_txn.open_table(PIECE_GRAMS_TABLE)?;
        }
        write_txn.commit()?;
        Ok(())
    }
}

pub struct RedbTransaction {
    txn: WriteTransaction,
}

impl StoreTransaction for RedbTransaction {
    fn find_pieces(&mut self, filter: PieceFilter<'_>) -> Result<Vec<PieceId>, StoreError> {
        let (definition, value) = match filter {
            PieceFilter::Hash(hash) => (PIECES_BY_HASH_TABLE, hash),
            PieceFilter::Path(path) => (PIECES_BY_PATH_TABLE, path),
        };
        let table = self.txn.open_table(definition)?;
        let prefix = prefix_key(value);
        let mut end = prefix.clone();
        end.push('\u{10ffff}');

        let mut ids = Vec::new();
        for entry in table.range(prefix.as_str()..end.as_str())? {
            let entry = entry?;
            ids.push(decode_id(entry.1.value())?);
        }
        Ok(ids)
    }

    fn delete_piece(&mut self, id: PieceId) -> Result<(), StoreError> {
        let piece: Piece = {
            let key = id.to_be_bytes();
            let mut pieces = self.txn.open_table(PIECES_TABLE)?;
            let removed = pieces.remove(key.as_slice())?;
            match removed {
                Some(value) => decode_value(value.value())?,
                None => return Ok(()),
            }
        };
        let mut by_hash = self.txn.open_table(PIECES_BY_HASH_TABLE)?;
        by_hash.remove(secondary_key(&piece.hash, id).as_str())?;
        let mut by_path = self.txn.open_table(PIECES_BY_PATH_TABLE)?;
        by_path.remove(secondary_key(&piece.path, id).as_str())?;
        Ok(())
    }

    fn index_entries_for(&mut self, piece: PieceId) -> Result<Vec<IndexEntry>, StoreError> {
        let table = self.txn.open_table(PIECE_GRAMS_TABLE)?;
        let start = piece.to_be_bytes();
        let mut end = start.to_vec();
        end.extend_from_slice(&[0xFF; GRAM_SIZE_NON_ASCII]);

        let mut entries = Vec::new();
        for entry in table.range(start.as_slice()..=end.as_slice())? {
            let entry = entry?;
            let key = entry.0.value();
            entries.push(IndexEntry {
                key: key[ID_LEN..].to_vec(),
                value: piece,
            });
        }
        Ok(entries)
    }

    fn delete_index_entry(&mut self, entry: &IndexEntry) -> Result<(), StoreError> {
        let mut grams = self.txn.open_table(GRAM_INDEX_TABLE)?;
        grams.remove(gram_key(&entry.key, entry.value).as_slice())?;
        let mut piece_grams = self.txn.open_table(PIECE_GRAMS_TABLE)?;
        piece_grams.remove(piece_gram_key(entry.value, &entry.key).as_slice())?;
        Ok(())
    }

    fn insert_piece(&mut self, piece: &Piece) -> Result<PieceId, StoreError> {
        let id = {
            let mut meta = self.txn.open_table(META_TABLE)?;
            let next: u64 = match meta.get(META_NEXT_ID_KEY)? {
                Some(value) => decode_value(value.value())?,
                None => 1,
            };
            let bytes = encode_value(&(next + 1))?;
            meta.insert(META_NEXT_ID_KEY, bytes.as_slice())?;
            PieceId(next)
        };

        let mut pieces = self.txn.open_table(PIECES_TABLE)?;
        let bytes = encode_value(piece)?;
        pieces.insert(id.to_be_bytes().as_slice(), bytes.as_slice())?;

        let id_bytes = id.to_be_bytes();
        let mut by_hash = self.txn.open_table(PIECES_BY_HASH_TABLE)?;
        by_hash.insert(secondary_key(&piece.hash, id).as_str(), id_bytes.as_slice())?;
        let mut by_path = self.txn.open_table(PIECES_BY_PATH_TABLE)?;
        by_path.insert(secondary_key(&piece.path, id).as_str(), id_bytes.as_slice())?;
        Ok(id)
    }

    fn insert_index_entry(&mut self, entry: &IndexEntry) -> Result<(), StoreError> {
        let mut grams = self.txn.open_table(GRAM_INDEX_TABLE)?;
        grams.insert(gram_key(&entry.key, entry.value).as_slice(), EMPTY)?;
        let mut piece_grams = self.txn.open_table(PIECE_GRAMS_TABLE)?;
        piece_grams.insert(piece_gram_key(entry.value, &entry.key).as_slice(), EMPTY)?;
        Ok(())
    }

    fn commit(self) -> Result<(), StoreError> {
        self.txn.commit()?;
        Ok(())
    }
}

impl TransactionalStore for RedbStore {
    type Transaction<'a> = RedbTransaction;

    fn begin(&self) -> Result<Self::Transaction<'_>, StoreError> {
        Ok(RedbTransaction {
            txn: self.db.begin_write()?,
        })
    }

    fn pieces_for_gram(&self, gram: &[u8], limit: usize) -> Result<Vec<PieceId>, StoreError> {
        let read_txn = self.db.begin_read()?;
        let table = match read_txn.open_table(GRAM_INDEX_TABLE) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let start = gram_key(gram, PieceId(0));
        let end = gram_key(gram, PieceId(u64::MAX));

        let mut ids = Vec::new();
        for entry in table.range(start.as_slice()..=end.as_slice())? {
            if ids.len() >= limit {
                break;
            }
            let entry = entry?;
            let key = entry.0.value();
            let id = PieceId::from_be_slice(&key[key.len() - ID_LEN..])
                .ok_or_else(|| StoreError::KeyParse(format!("{:?}", key)))?;
            ids.push(id);
        }
        Ok(ids)
    }

    fn get_piece(&self, id: PieceId) -> Result<Option<Piece>, StoreError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(PIECES_TABLE)?;
        let key = id.to_be_bytes();
        let piece = match table.get(key.as_slice())? {
            Some(value) => Some(decode_value(value.value())?),
            None => None,
        };
        Ok(piece)
    }

    fn clear_index(&self) -> Result<u64, StoreError> {
        let write_txn = self.db.begin_write()?;
        let removed = write_txn.open_table(GRAM_INDEX_TABLE)?.len()?;
        clear_bytes_table(&write_txn, GRAM_INDEX_TABLE)?;
        clear_bytes_table(&write_txn, PIECE_GRAMS_TABLE)?;
        write_txn.open_table(GRAM_INDEX_TABLE)?;
        write_txn.open_table(PIECE_GRAMS_TABLE)?;
        write_txn.commit()?;
        Ok(removed)
    }

    fn stats(&self) -> Result<StoreStats, StoreError> {
        let read_txn = self.db.begin_read()?;
        let pieces = read_txn.open_table(PIECES_TABLE)?.len()?;
        let index_entries = read_txn.open_table(GRAM_INDEX_TABLE)?.len()?;
        Ok(StoreStats {
            pieces,
            index_entries,
        })
    }
}

fn open_or_create_db(path: &Path) -> Result<Database, StoreError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    if path.exists() {
        Ok(Database::open(path)?)
    } else {
        Ok(Database::create(path)?)
    }
}

fn read_format(db: &Database) -> Result<Option<IndexFormat>, StoreError> {
    let read_txn = db.begin_read()?;
    let table = match read_txn.open_table(META_TABLE) {
        Ok(table) => table,
        Err(TableError::TableDoesNotExist(_)) => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    let format = match table.get(META_FORMAT_KEY)? {
        Some(value) => decode_value(value.value()).ok(),
        None => None,
    };
    Ok(format)
}

fn clear_table(
    txn: &WriteTransaction,
    table: TableDefinition<&str, &[u8]>,
) -> Result<(), StoreError> {
    match txn.delete_table(table) {
        Ok(_) => Ok(()),
        Err(TableError::TableDoesNotExist(_)) => Ok(()),
        Err(err) => Err(err.into()),
    }
}

fn clear_bytes_table(
    txn: &WriteTransaction,
    table: TableDefinition<&[u8], &[u8]>,
) -> Result<(), StoreError> {
    match txn.delete_table(table) {
        Ok(_) => Ok(()),
        Err(TableError::TableDoesNotExist(_)) => Ok(()),
        Err(err) => Err(err.into()),
    }
}

fn encode_value<T: Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
    Ok(bincode::serialize(value)?)
}

fn decode_value<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T, StoreError> {
    Ok(bincode::deserialize(bytes)?)
}

fn decode_id(bytes: &[u8]) -> Result<PieceId, StoreError> {
    PieceId::from_be_slice(bytes).ok_or_else(|| StoreError::KeyParse(format!("{:?}", bytes)))
}

fn prefix_key(value: &str) -> String {
    let mut key = String::with_capacity(value.len() + 1);
    key.push_str(value);
    key.push(KEY_SEP);
    key
}

fn secondary_key(value: &str, id: PieceId) -> String {
    format!("{}{:020}", prefix_key(value), id.0)
}

/// `len(gram) ‖ gram ‖ id`: the length byte keeps grams of different widths
/// from sharing a key prefix.
fn gram_key(gram: &[u8], id: PieceId) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + gram.len() + ID_LEN);
    key.push(gram.len() as u8);
    key.extend_from_slice(gram);
    key.extend_from_slice(&id.to_be_bytes());
    key
}

fn piece_gram_key(id: PieceId, gram: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(ID_LEN + gram.len());
    key.extend_from_slice(&id.to_be_bytes());
    key.extend_from_slice(gram);
    key
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::replace_piece;
    use crate::store::tests as shared;
    use tempfile::TempDir;

    fn temp_store() -> (TempDir, RedbStore) {
        let dir = tempfile::tempdir().unwrap();
        let (store, needs_reindex) = RedbStore::open(&dir.path().join("index/library.redb")).unwrap();
        assert!(needs_reindex);
        (dir, store)
    }

    #[test]
    fn replacing_by_hash_retires_old_piece() {
        let (_dir, store) = temp_store();
        shared::replacing_by_hash_retires_old_piece(&store);
    }

    #[test]
    fn replacing_by_path_and_hash_retires_both() {
        let (_dir, store) = temp_store();
        shared::replacing_by_path_and_hash_retires_both(&store);
    }

    #[test]
    fn clear_index_keeps_pieces() {
        let (_dir, store) = temp_store();
        shared::clear_index_keeps_pieces(&store);
    }

    #[test]
    fn dropped_transaction_changes_nothing() {
        let (_dir, store) = temp_store();
        shared::dropped_transaction_changes_nothing(&store);
    }

    #[test]
    fn gram_lookup_respects_limit() {
        let (_dir, store) = temp_store();
        shared::gram_lookup_respects_limit(&store);
    }

    #[test]
    fn reopening_keeps_data_and_skips_reindex() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("library.redb");
        let id = {
            let (store, _) = RedbStore::open(&path).unwrap();
            replace_piece(&store, &shared::piece("Persisted", "h1", "p.mp3")).unwrap().id
        };
        let (store, needs_reindex) = RedbStore::open(&path).unwrap();
        assert!(!needs_reindex);
        assert_eq!(store.pieces_for_gram(b"pers", 10).unwrap(), vec![id]);
    }

    #[test]
    fn format_mismatch_clears_everything() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("library.redb");
        {
            let (store, _) = RedbStore::open(&path).unwrap();
            replace_piece(&store, &shared::piece("Outdated", "h1", "o.mp3")).unwrap();
            let write_txn = store.db.begin_write().unwrap();
            {
                let mut meta = write_txn.open_table(META_TABLE).unwrap();
                let stale = IndexFormat {
                    version: INDEX_FORMAT_VERSION,
                    gram_ascii: 3,
                    gram_non_ascii: 6,
                };
                let bytes = encode_value(&stale).unwrap();
                meta.insert(META_FORMAT_KEY, bytes.as_slice()).unwrap();
            }
            write_txn.commit().unwrap();
        }
        let (store, needs_reindex) = RedbStore::open(&path).unwrap();
        assert!(needs_reindex);
        assert_eq!(store.stats().unwrap(), StoreStats::default());
    }

    #[test]
    fn gram_keys_of_different_widths_do_not_collide() {
        let ascii = gram_key(b"abcd", PieceId(1));
        let wide = gram_key("日本".as_bytes(), PieceId(1));
        assert_ne!(ascii[0], wide[0]);
        assert_eq!(ascii.len(), 1 + 4 + ID_LEN);
    }
}
