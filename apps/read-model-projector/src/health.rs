//! Health and metrics endpoints

use axum::{Json, Router, extract::State, http::StatusCode, routing::get};
use document_store::DocumentStore;
use event_bus::ConsumerPool;
use serde::Serialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::warn;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn DocumentStore>,
    pub pool: Arc<ConsumerPool>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub store: &'static str,
    /// One state per consumer in the pool
    pub consumers: Vec<String>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// UP while the read-model store answers a ping, 503 otherwise
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let consumers = state
        .pool
        .states()
        .into_iter()
        .map(|s| s.to_string())
        .collect();

    match state.store.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(HealthResponse {
                status: "UP",
                store: "UP",
                consumers,
            }),
        ),
        Err(e) => {
            warn!(error = %e, "Read-model store health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "DOWN",
                    store: "DOWN",
                    consumers,
                }),
            )
        }
    }
}

async fn metrics() -> String {
    event_bus::render_metrics()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use document_store::{
        Document, Filter, InMemoryDocumentStore, StoreError, StoreResult, Update, UpdateResult,
    };
    use event_bus::{ConsumerConfig, HandlerRegistry, InMemoryBroker};

    struct UnreachableStore;

    #[async_trait]
    impl DocumentStore for UnreachableStore {
        async fn find_by_id(&self, _: &str, _: &str) -> StoreResult<Option<Document>> {
            Err(StoreError::MissingId)
        }

        async fn find_by_filter(&self, _: &str, _: &Filter) -> StoreResult<Vec<Document>> {
            Err(StoreError::MissingId)
        }

        async fn insert_if_absent(&self, _: &str, _: Document) -> StoreResult<bool> {
            Err(StoreError::MissingId)
        }

        async fn upsert(&self, _: &str, _: Document) -> StoreResult<()> {
            Err(StoreError::MissingId)
        }

        async fn update_first(&self, _: &str, _: &Filter, _: &Update) -> StoreResult<UpdateResult> {
            Err(StoreError::MissingId)
        }

        async fn update_multi(&self, _: &str, _: &Filter, _: &Update) -> StoreResult<UpdateResult> {
            Err(StoreError::MissingId)
        }

        async fn ping(&self) -> StoreResult<()> {
            Err(StoreError::MissingId)
        }
    }

    fn state(store: Arc<dyn DocumentStore>) -> AppState {
        let pool = ConsumerPool::new(
            Arc::new(InMemoryBroker::new(1)),
            Arc::new(HandlerRegistry::new()),
            ConsumerConfig::new("read-model-projector").with_concurrency(2),
        );
        AppState {
            store,
            pool: Arc::new(pool),
        }
    }

    #[tokio::test]
    async fn test_health_up_with_idle_pool() {
        let (status, Json(body)) = health(State(state(Arc::new(InMemoryDocumentStore::new())))).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.status, "UP");
        assert_eq!(body.consumers, ["STOPPED", "STOPPED"]);
    }

    #[tokio::test]
    async fn test_health_down_when_store_unreachable() {
        let (status, Json(body)) = health(State(state(Arc::new(UnreachableStore)))).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body.store, "DOWN");
    }
}
