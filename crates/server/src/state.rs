use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

pub struct AppState<S, B> {
    pub store: Arc<S>,
    pub blobs: Arc<B>,
    pub default_list_limit: usize,
    pub request_timeout: Duration,
}

impl<S, B> Clone for AppState<S, B> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            blobs: Arc::clone(&self.blobs),
            default_list_limit: self.default_list_limit,
            request_timeout: self.request_timeout,
        }
    }
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}
