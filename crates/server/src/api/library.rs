use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use ::library::{search, BlobStore, QueryError, TransactionalStore};
use serde::Deserialize;
use tracing::warn;

use crate::state::AppState;
use crate::utils::{json_error_response, run_blocking};

pub const MAX_LIST_LIMIT: i64 = 1_000_000;

#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    #[serde(default)]
    pub search: String,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct GetParams {
    pub bucket: String,
    pub name: String,
}

pub async fn list<S, B>(
    State(state): State<AppState<S, B>>,
    Query(params): Query<ListParams>,
) -> Response
where
    S: TransactionalStore + 'static,
    B: BlobStore + 'static,
{
    let limit = match params.limit {
        None => state.default_list_limit,
        Some(limit) if (0..=MAX_LIST_LIMIT).contains(&limit) => limit as usize,
        Some(limit) => {
            return json_error_response(
                StatusCode::BAD_REQUEST,
                format!("limit must be between 0 and {}, got {}", MAX_LIST_LIMIT, limit),
            )
        }
    };

    let store = Arc::clone(&state.store);
    let phrase = params.search;
    let result = match run_blocking(state.request_timeout, move || {
        search(store.as_ref(), &phrase, limit)
    })
    .await
    {
        Ok(result) => result,
        Err(response) => return response,
    };

    match result {
        Ok(pieces) => Json(pieces).into_response(),
        Err(QueryError::TooShort) => {
            json_error_response(StatusCode::BAD_REQUEST, QueryError::TooShort.to_string())
        }
        Err(err) => {
            warn!("list failed: {}", err);
            json_error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("library error: {}", err),
            )
        }
    }
}

pub async fn get_object<S, B>(
    State(state): State<AppState<S, B>>,
    Query(params): Query<GetParams>,
) -> Response
where
    S: TransactionalStore + 'static,
    B: BlobStore + 'static,
{
    let blobs = Arc::clone(&state.blobs);
    let result = match run_blocking(state.request_timeout, move || {
        blobs.get(&params.bucket, &params.name)
    })
    .await
    {
        Ok(result) => result,
        Err(response) => return response,
    };

    match result {
        Ok(blob) => {
            let content_type = HeaderValue::from_str(&blob.content_type)
                .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"));
            let mut response = Response::new(Body::from(blob.data));
            response
                .headers_mut()
                .insert(header::CONTENT_TYPE, content_type);
            response
        }
        Err(err) if err.is_not_found() => json_error_response(StatusCode::NOT_FOUND, err.to_string()),
        Err(err) => {
            warn!("object fetch failed: {}", err);
            json_error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("storage error: {}", err),
            )
        }
    }
}

pub async fn stats<S, B>(State(state): State<AppState<S, B>>) -> Response
where
    S: TransactionalStore + 'static,
    B: BlobStore + 'static,
{
    let store = Arc::clone(&state.store);
    match run_blocking(state.request_timeout, move || store.stats()).await {
        Ok(Ok(stats)) => Json(stats).into_response(),
        Ok(Err(err)) => json_error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("library error: {}", err),
        ),
        Err(response) => response,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use ::library::{replace_piece, MemoryBlobStore, MemoryStore};
    use common::Piece;

    use super::*;

    fn state() -> AppState<MemoryStore, MemoryBlobStore> {
        let store = MemoryStore::new();
        for (title, hash) in [("Sunday Morning", "h1"), ("Sunset Strip", "h2")] {
            let piece = Piece {
                title: title.to_string(),
                artist: "The Velvets".to_string(),
                hash: hash.to_string(),
                path: format!("{}.mp3", hash),
                ..Piece::default()
            };
            replace_piece(&store, &piece).unwrap();
        }
        AppState {
            store: Arc::new(store),
            blobs: Arc::new(MemoryBlobStore::new()),
            default_list_limit: 10,
            request_timeout: Duration::from_secs(5),
        }
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn params(search: &str, limit: Option<i64>) -> Query<ListParams> {
        Query(ListParams {
            search: search.to_string(),
            limit,
        })
    }

    #[tokio::test]
    async fn list_returns_verified_matches() {
        let response = list(State(state()), params("SUNSET", None)).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        let items = body.as_array().unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["title"], "Sunset Strip");
    }

    #[tokio::test]
    async fn list_keeps_leading_space_of_phrase() {
        let response = list(State(state()), params(" str", None)).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        let items = body.as_array().unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["title"], "Sunset Strip");

        let response = list(State(state()), params("  ", None)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn list_rejects_short_phrase_and_bad_limits() {
        let response = list(State(state()), params("sun", None)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"], "the query is too short");

        for limit in [-1, MAX_LIST_LIMIT + 1] {
            let response = list(State(state()), params("sunday", Some(limit))).await;
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        }

        let response = list(State(state()), params("velvets", Some(1))).await;
        assert_eq!(body_json(response).await.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn get_object_serves_content_type_or_404() {
        let state = state();
        state
            .blobs
            .put("album-art", "abc=", b"png bytes", "image/png")
            .unwrap();

        let response = get_object(
            State(state.clone()),
            Query(GetParams {
                bucket: "album-art".to_string(),
                name: "abc=".to_string(),
            }),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(bytes.as_ref(), b"png bytes");

        let missing = get_object(
            State(state),
            Query(GetParams {
                bucket: "album-art".to_string(),
                name: "nope".to_string(),
            }),
        )
        .await;
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn stats_counts_pieces() {
        let body = body_json(stats(State(state())).await).await;
        assert_eq!(body["pieces"], 2);
    }
}
