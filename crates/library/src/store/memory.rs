use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};

use common::{IndexEntry, Piece, PieceId};
use parking_lot::{Mutex, MutexGuard};

use super::{PieceFilter, StoreError, StoreStats, StoreTransaction, TransactionalStore};

#[derive(Clone, Debug, Default)]
struct MemoryState {
    next_id: u64,
    pieces: BTreeMap<PieceId, Piece>,
    index: BTreeSet<(Vec<u8>, PieceId)>,
}

/// In-process store. Transactions hold the lock for their whole lifetime and
/// stage changes on a copy, so they serialize and commit atomically.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    fail_commits: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent commit fail, for exercising abort paths.
    pub fn set_fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }
}

pub struct MemoryTransaction<'a> {
    guard: MutexGuard<'a, MemoryState>,
    staged: MemoryState,
    fail_commit: bool,
}

impl StoreTransaction for MemoryTransaction<'_> {
    fn find_pieces(&mut self, filter: PieceFilter<'_>) -> Result<Vec<PieceId>, StoreError> {
        let ids = self
            .staged
            .pieces
            .iter()
            .filter(|(_, piece)| match filter {
                PieceFilter::Hash(hash) => piece.hash == hash,
                PieceFilter::Path(path) => piece.path == path,
            })
            .map(|(id, _)| *id)
            .collect();
        Ok(ids)
    }

    fn delete_piece(&mut self, id: PieceId) -> Result<(), StoreError> {
        self.staged.pieces.remove(&id);
        Ok(())
    }

    fn index_entries_for(&mut self, piece: PieceId) -> Result<Vec<IndexEntry>, StoreError> {
        let entries = self
            .staged
            .index
            .iter()
            .filter(|(_, value)| *value == piece)
            .map(|(key, value)| IndexEntry {
                key: key.clone(),
                value: *value,
            })
            .collect();
        Ok(entries)
    }

    fn delete_index_entry(&mut self, entry: &IndexEntry) -> Result<(), StoreError> {
        self.staged.index.remove(&(entry.key.clone(), entry.value));
        Ok(())
    }

    fn insert_piece(&mut self, piece: &Piece) -> Result<PieceId, StoreError> {
        self.staged.next_id += 1;
        let id = PieceId(self.staged.next_id);
        self.staged.pieces.insert(id, piece.clone());
        Ok(id)
    }

    fn insert_index_entry(&mut self, entry: &IndexEntry) -> Result<(), StoreError> {
        self.staged.index.insert((entry.key.clone(), entry.value));
        Ok(())
    }

    fn commit(mut self) -> Result<(), StoreError> {
        if self.fail_commit {
            return Err(StoreError::Aborted("commit rejected".to_string()));
        }
        *self.guard = self.staged;
        Ok(())
    }
}

impl TransactionalStore for MemoryStore {
    type Transaction<'a> = MemoryTransaction<'a>;

    fn begin(&self) -> Result<Self::Transaction<'_>, StoreError> {
        let guard = self.state.lock();
        let staged = guard.clone();
        Ok(MemoryTransaction {
            guard,
            staged,
            fail_commit: self.fail_commits.load(Ordering::SeqCst),
        })
    }

    fn pieces_for_gram(&self, gram: &[u8], limit: usize) -> Result<Vec<PieceId>, StoreError> {
        let state = self.state.lock();
        let ids = state
            .index
            .range((gram.to_vec(), PieceId(0))..)
            .take_while(|(key, _)| key.as_slice() == gram)
            .map(|(_, id)| *id)
            .take(limit)
            .collect();
        Ok(ids)
    }

    fn get_piece(&self, id: PieceId) -> Result<Option<Piece>, StoreError> {
        Ok(self.state.lock().pieces.get(&id).cloned())
    }

    fn clear_index(&self) -> Result<u64, StoreError> {
        let mut state = self.state.lock();
        let removed = state.index.len() as u64;
        state.index.clear();
        Ok(removed)
    }

    fn stats(&self) -> Result<StoreStats, StoreError> {
        let state = self.state.lock();
        Ok(StoreStats {
            pieces: state.pieces.len() as u64,
            index_entries: state.index.len() as u64,
        })
    }
}
