//! HTTP-01 challenge responder.
//!
//! While an order is in flight the CA fetches
//! `/.well-known/acme-challenge/<token>` from the configured bind address;
//! the responder answers from a shared token map and serves nothing else.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Pending token → key-authorization mapping, shared between the order
/// flow and the responder.
#[derive(Clone, Default)]
pub struct ChallengeSet {
    inner: Arc<tokio::sync::RwLock<HashMap<String, String>>>,
}

impl ChallengeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, token: String, key_authorization: String) {
        tracing::debug!(token = %token, "Registering http-01 challenge");
        self.inner.write().await.insert(token, key_authorization);
    }

    pub async fn remove(&self, token: &str) {
        self.inner.write().await.remove(token);
    }

    pub async fn response_for(&self, token: &str) -> Option<String> {
        self.inner.read().await.get(token).cloned()
    }

    pub async fn pending(&self) -> usize {
        self.inner.read().await.len()
    }
}

async fn serve_challenge(
    State(set): State<ChallengeSet>,
    Path(token): Path<String>,
) -> Response {
    match set.response_for(&token).await {
        Some(key_authorization) => (StatusCode::OK, key_authorization).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

fn router(set: ChallengeSet) -> Router {
    Router::new()
        .route("/.well-known/acme-challenge/{token}", get(serve_challenge))
        .with_state(set)
}

/// Serve challenges on an already-bound listener until `cancel` fires.
pub(crate) async fn serve(
    listener: TcpListener,
    set: ChallengeSet,
    cancel: CancellationToken,
) -> Result<(), std::io::Error> {
    axum::serve(listener, router(set))
        .with_graceful_shutdown(async move {
            cancel.cancelled().await;
        })
        .await
}
