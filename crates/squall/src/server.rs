//! HTTP entry points for long-running deployments.
//!
//! `POST /start` runs Stage A. `POST /messages` receives push deliveries of
//! the status envelope and runs Stage B. Push deliveries are acknowledged
//! with a 2xx unless the failure is transient, so malformed payloads and
//! FAILED envelopes are never redelivered.

use std::sync::Arc;

use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Json;
use serde_json::json;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::bus::PushMessage;
use crate::orchestrator::Orchestrator;
use squall_core::MetricsController;

#[derive(Clone)]
struct AppState {
    orchestrator: Arc<Orchestrator>,
}

/// Build the router.
pub fn router(orchestrator: Arc<Orchestrator>) -> Router {
    Router::new()
        .route("/start", post(start))
        .route("/messages", post(messages))
        .route("/metrics", get(metrics))
        .route("/health", get(health))
        .with_state(AppState { orchestrator })
}

/// Serve until `shutdown` is cancelled.
pub async fn serve(
    orchestrator: Arc<Orchestrator>,
    address: &str,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(address).await?;
    info!(address = %listener.local_addr()?, "Listening");
    axum::serve(listener, router(orchestrator))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    info!("Server stopped");
    Ok(())
}

async fn start(State(state): State<AppState>) -> Response {
    let outcome = state.orchestrator.start().await;
    let status = if outcome.is_success() {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    (status, Json(outcome)).into_response()
}

async fn messages(State(state): State<AppState>, body: Bytes) -> Response {
    let payload = match PushMessage::from_slice(&body).and_then(|push| push.payload()) {
        Ok(payload) => payload,
        Err(e) => {
            warn!(error = %e, "Dropping malformed push delivery");
            return (
                StatusCode::OK,
                Json(json!({ "dropped": true, "error": e.to_string() })),
            )
                .into_response();
        }
    };

    let outcome = state.orchestrator.on_message(&payload).await;
    let status = if outcome.should_redeliver() {
        warn!(state = %outcome.state, "Transient failure, asking for redelivery");
        StatusCode::INTERNAL_SERVER_ERROR
    } else {
        StatusCode::OK
    };
    (status, Json(outcome)).into_response()
}

async fn metrics() -> Response {
    match MetricsController::get() {
        Ok(controller) => controller.render().into_response(),
        Err(e) => (StatusCode::NOT_FOUND, e.to_string()).into_response(),
    }
}

async fn health() -> &'static str {
    "ok"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{ClusterDescriptor, InMemoryClusterService};
    use crate::config::PipelineConfig;
    use crate::envelope::{Column, StatusEnvelope, TableDescriptor};
    use crate::job::InMemoryJobService;
    use crate::operation::Fault;
    use crate::orchestrator::Services;
    use crate::warehouse::InMemoryWarehouse;
    use axum::body::Body;
    use axum::http::Request;
    use squall_core::StorageProvider;
    use tower::ServiceExt;

    struct Fixture {
        clusters: Arc<InMemoryClusterService>,
        warehouse: Arc<InMemoryWarehouse>,
        storage: StorageProvider,
        router: Router,
    }

    fn fixture() -> Fixture {
        let config = PipelineConfig::parse(
            "project_id: tarrieu\nregion: europe-west1\njob_bucket: jobs\njob_file: job.py\n\
             data_bucket: data\ndata_file: crimes.csv\ndataset: crimes\n",
        )
        .unwrap();
        let clusters = Arc::new(InMemoryClusterService::new());
        let warehouse = Arc::new(InMemoryWarehouse::new());
        let storage = StorageProvider::in_memory("data");
        let services = Services {
            clusters: clusters.clone(),
            jobs: Arc::new(InMemoryJobService::new()),
            warehouse: warehouse.clone(),
            storage: storage.clone(),
        };
        Fixture {
            clusters,
            warehouse,
            storage,
            router: router(Arc::new(Orchestrator::new(config, services))),
        }
    }

    fn app() -> Router {
        fixture().router
    }

    async fn success_push(fixture: &Fixture) -> Vec<u8> {
        fixture.clusters.seed(&ClusterDescriptor::new(
            "dataproc-cluster",
            "tarrieu",
            "europe-west1",
        ));
        fixture.storage.put("t1/part-00000.parquet", "x").await.unwrap();
        fixture.storage.put("t1/_SUCCESS", "").await.unwrap();
        let envelope =
            StatusEnvelope::success(vec![TableDescriptor::new("t1", vec![Column::new("a", "INT")])]);
        let push = PushMessage::wrap(&envelope.encode().unwrap(), "1");
        serde_json::to_vec(&push).unwrap()
    }

    async fn post_json(app: Router, uri: &str, body: Vec<u8>) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(uri)
                    .header("content-type", "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_start_endpoint() {
        let (status, body) = post_json(app(), "/start", Vec::new()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["state"], "AWAITING_COMPLETION");
        assert_eq!(body["cluster"], "created");
    }

    #[tokio::test]
    async fn test_malformed_push_is_acknowledged() {
        let (status, body) = post_json(app(), "/messages", b"garbage".to_vec()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["dropped"], true);
    }

    #[tokio::test]
    async fn test_failed_envelope_is_acknowledged() {
        let push = PushMessage::wrap(br#"{"status":"FAILED","tables":[]}"#, "1");
        let (status, body) =
            post_json(app(), "/messages", serde_json::to_vec(&push).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "FAILED");
        assert_eq!(body["state"], "FAILED");
    }

    #[tokio::test]
    async fn test_success_push_is_acknowledged() {
        let fixture = fixture();
        let body = success_push(&fixture).await;

        let (status, body) = post_json(fixture.router.clone(), "/messages", body).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["state"], "DONE");
        assert_eq!(body["loads"][0]["destination"], "tarrieu.crimes.t1");
        assert_eq!(fixture.clusters.cluster_count(), 0);
    }

    #[tokio::test]
    async fn test_transient_load_failure_is_redelivered() {
        let fixture = fixture();
        fixture
            .warehouse
            .fail_table("t1", Fault::Transport("503".into()));
        let body = success_push(&fixture).await;

        let (status, body) = post_json(fixture.router.clone(), "/messages", body).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["loads"][0]["error"]["retryable"], true);

        fixture.warehouse.clear_failures();
        let body = success_push(&fixture).await;
        let (status, body) = post_json(fixture.router.clone(), "/messages", body).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["loads"][0]["rows"], 1000);
    }

    #[tokio::test]
    async fn test_permanent_load_failure_is_acknowledged() {
        let fixture = fixture();
        fixture
            .warehouse
            .fail_table("t1", Fault::Provider("Not found: Dataset tarrieu:crimes".into()));
        let body = success_push(&fixture).await;

        let (status, body) = post_json(fixture.router.clone(), "/messages", body).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["loads"][0]["error"]["retryable"], false);
    }

    #[tokio::test]
    async fn test_metrics_endpoint_renders() {
        squall_core::init_metrics_test();
        let fixture = fixture();
        let body = success_push(&fixture).await;
        post_json(fixture.router.clone(), "/messages", body).await;

        let response = fixture
            .router
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let rendered = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(rendered.contains("squall_rows_loaded_total"), "{rendered}");
    }

    #[tokio::test]
    async fn test_health() {
        let response = app()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
