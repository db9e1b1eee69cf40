pub mod library;

use axum::response::Response;
use axum::routing::get;
use axum::Router;
use ::library::{BlobStore, TransactionalStore};

use crate::state::AppState;
use crate::utils::json_ok_response;

pub fn api_router<S, B>(state: AppState<S, B>) -> Router
where
    S: TransactionalStore + 'static,
    B: BlobStore + 'static,
{
    Router::new()
        .route("/api/list", get(library::list::<S, B>))
        .route("/api/get", get(library::get_object::<S, B>))
        .route("/api/stats", get(library::stats::<S, B>))
        .route("/health", get(health))
        .with_state(state)
}

async fn health() -> Response {
    json_ok_response()
}
