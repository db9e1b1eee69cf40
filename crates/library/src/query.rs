//! Phrase lookup: leading-gram prefilter, then full substring verification.

use common::Piece;
use thiserror::Error;

use crate::gram::first_gram;
use crate::normalize::normalize;
use crate::store::{StoreError, TransactionalStore};

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("the query is too short")]
    TooShort,
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PreparedQuery {
    pub phrase: String,
    pub gram: Vec<u8>,
}

pub fn prepare(phrase: &str) -> Result<PreparedQuery, QueryError> {
    let phrase = normalize(phrase);
    let gram = first_gram(&phrase).ok_or(QueryError::TooShort)?.to_vec();
    Ok(PreparedQuery { phrase, gram })
}

/// Whether any searchable field of `piece` contains the normalized phrase.
pub fn matches(piece: &Piece, normalized_phrase: &str) -> bool {
    piece
        .searchable_fields()
        .iter()
        .any(|field| normalize(field).contains(normalized_phrase))
}

/// Finds Pieces whose title, album, artist or album artist contain `phrase`.
///
/// `limit` bounds the candidates read from the index, so fewer Pieces may
/// come back after verification.
pub fn search<S: TransactionalStore>(
    store: &S,
    phrase: &str,
    limit: usize,
) -> Result<Vec<Piece>, QueryError> {
    let query = prepare(phrase)?;
    let mut ids = store.pieces_for_gram(&query.gram, limit)?;
    ids.dedup();

    let mut found = Vec::with_capacity(ids.len());
    for id in ids {
        // Retired between the index read and this lookup.
        let Some(piece) = store.get_piece(id)? else {
            continue;
        };
        if matches(&piece, &query.phrase) {
            found.push(piece);
        }
    }
    Ok(found)
}
