//! Axum router configuration with middleware.
//!
//! Management routes live under `/api/v1/`, trigger hooks under `/hooks/`.
//! Middleware: CORS, request tracing.

use axum::Router;
use axum::routing::{any, get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::http::handlers;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        // Workflows
        .route(
            "/workflows",
            post(handlers::workflow::register_workflow).get(handlers::workflow::list_workflows),
        )
        .route(
            "/workflows/{id}",
            get(handlers::workflow::get_workflow).delete(handlers::workflow::delete_workflow),
        )
        .route("/workflows/{id}/run", post(handlers::workflow::run_workflow))
        .route("/workflows/{id}/executions", get(handlers::workflow::list_executions))
        // Executions
        .route("/executions/{id}", get(handlers::execution::get_execution))
        .route("/executions/{id}/cancel", post(handlers::execution::cancel_execution))
        // Approvals
        .route("/approvals/pending", get(handlers::approval::list_pending))
        .route("/approvals/{id}/approve", post(handlers::approval::approve))
        .route("/approvals/{id}/reject", post(handlers::approval::reject));

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/hooks/{user_id}/{*path}", any(handlers::hook::receive_hook))
        .route("/health", get(health_check))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// GET /health
async fn health_check() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use chrono::Utc;
    use flowforge_core::repository::WorkflowRepository;
    use flowforge_core::workflow::queue::{ExecutionHandler, ExecutionRequest, QueueReceiver, RequestKind};
    use flowforge_types::config::EngineConfig;
    use flowforge_types::execution::{ApprovalStatus, ExecutionStatus, WorkflowApproval};
    use http_body_util::BodyExt;
    use serde_json::{Value, json};
    use std::sync::Arc;
    use tempfile::TempDir;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;
    use uuid::Uuid;

    struct TestApp {
        router: Router,
        state: AppState,
        receiver: Option<QueueReceiver>,
        _dir: TempDir,
    }

    async fn app() -> TestApp {
        app_with(EngineConfig::default()).await
    }

    async fn app_with(config: EngineConfig) -> TestApp {
        let dir = tempfile::tempdir().unwrap();
        let (state, receiver) = AppState::init(&config, dir.path().to_path_buf())
            .await
            .unwrap();
        TestApp {
            router: build_router(state.clone()),
            state,
            receiver: Some(receiver),
            _dir: dir,
        }
    }

    async fn send(app: &TestApp, method: &str, uri: &str, user: Option<&str>, body: Value) -> (StatusCode, Value) {
        let mut request = Request::builder().method(method).uri(uri);
        if let Some(user) = user {
            request = request.header("x-user-id", user);
        }
        let body = if body.is_null() {
            Body::empty()
        } else {
            request = request.header("content-type", "application/json");
            Body::from(body.to_string())
        };

        let response = app.router.clone().oneshot(request.body(body).unwrap()).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    fn definition(name: &str, triggers: Value) -> Value {
        json!({
            "name": name,
            "configuration": { "triggers": triggers },
            "tasks": [
                {
                    "name": "ingest",
                    "pluginRef": { "name": "echo", "version": "1.0.0", "namespace": "core" }
                },
                {
                    "name": "review",
                    "dependencies": ["ingest"],
                    "pluginRef": { "name": "echo", "version": "1.0.0", "namespace": "core" },
                    "manualApproval": { "enabled": true, "approvers": ["ops"] }
                }
            ]
        })
    }

    async fn register(app: &TestApp, user: &str, body: Value) -> Uuid {
        let (status, value) = send(app, "POST", "/api/v1/workflows", Some(user), body).await;
        assert_eq!(status, StatusCode::CREATED, "{value}");
        value["data"]["id"].as_str().unwrap().parse().unwrap()
    }

    async fn run(app: &TestApp, user: &str, workflow_id: Uuid) -> Uuid {
        let (status, value) = send(app, "POST", &format!("/api/v1/workflows/{workflow_id}/run"), Some(user), Value::Null).await;
        assert_eq!(status, StatusCode::ACCEPTED, "{value}");
        value["data"]["execution_id"].as_str().unwrap().parse().unwrap()
    }

    async fn pending_approval(app: &TestApp, workflow_id: Uuid, execution_id: Uuid) -> Uuid {
        let mut execution = app.state.repo.get_execution(&execution_id).await.unwrap().unwrap();
        execution.status = ExecutionStatus::Paused;
        execution.paused_at_task = Some("review".into());
        app.state.repo.update_execution(&execution).await.unwrap();

        let approval = WorkflowApproval {
            id: Uuid::now_v7(),
            workflow_id,
            execution_id,
            task_name: "review".into(),
            requested_by: "system".into(),
            requested_at: Utc::now(),
            status: ApprovalStatus::Pending,
            approver: None,
            decided_at: None,
            instructions: None,
        };
        app.state.repo.create_approval(&approval).await.unwrap();
        approval.id
    }

    struct Forward(mpsc::UnboundedSender<ExecutionRequest>);

    impl ExecutionHandler for Forward {
        async fn handle(&self, request: ExecutionRequest) {
            let _ = self.0.send(request);
        }
    }

    #[tokio::test]
    async fn health_check_responds() {
        let app = app().await;
        let (status, body) = send(&app, "GET", "/health", None, Value::Null).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn registration_requires_a_user_and_a_valid_graph() {
        let app = app().await;

        let (status, _) = send(&app, "POST", "/api/v1/workflows", None, definition("a", json!([]))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let cyclic = json!({
            "name": "loop",
            "tasks": [
                { "name": "a", "dependencies": ["b"], "pluginRef": { "name": "p", "version": "1.0.0", "namespace": "n" } },
                { "name": "b", "dependencies": ["a", "ghost"], "pluginRef": { "name": "p", "version": "1.0.0", "namespace": "n" } }
            ]
        });
        let (status, body) = send(&app, "POST", "/api/v1/workflows", Some("alice"), cyclic).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["errors"][0]["code"], "VALIDATION_ERROR");
        assert!(body["errors"][0]["details"].as_array().unwrap().len() >= 2, "{body}");

        let id = register(&app, "alice", definition("nightly", json!([]))).await;
        let (status, body) = send(&app, "GET", &format!("/api/v1/workflows/{id}"), Some("alice"), Value::Null).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["name"], "nightly");

        let (status, _) = send(&app, "GET", &format!("/api/v1/workflows/{id}"), Some("bob"), Value::Null).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn manual_run_creates_a_pending_execution_for_its_owner() {
        let app = app().await;
        let workflow_id = register(&app, "alice", definition("nightly", json!([]))).await;

        let (status, _) = send(&app, "POST", &format!("/api/v1/workflows/{workflow_id}/run"), Some("bob"), Value::Null).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let execution_id = run(&app, "alice", workflow_id).await;
        let (status, body) = send(&app, "GET", &format!("/api/v1/executions/{execution_id}"), Some("alice"), Value::Null).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["status"], "pending");
        assert_eq!(body["data"]["trigger"]["kind"], "Manual");
        assert!(body["data"]["tasks"].as_array().unwrap().is_empty());

        let (status, _) = send(&app, "GET", &format!("/api/v1/executions/{execution_id}"), Some("bob"), Value::Null).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn hooks_dispatch_registered_routes_only() {
        let app = app().await;
        let triggers = json!([{ "type": "Http", "properties": { "path": "orders/", "method": "POST" } }]);
        register(&app, "alice", definition("orders", triggers)).await;

        let (status, body) = send(&app, "POST", "/hooks/alice/orders", None, json!({"order": 7})).await;
        assert_eq!(status, StatusCode::ACCEPTED, "{body}");
        let execution_id: Uuid = body["data"]["execution_id"].as_str().unwrap().parse().unwrap();
        let execution = app.state.repo.get_execution(&execution_id).await.unwrap().unwrap();
        assert_eq!(execution.trigger.payload, json!({"order": 7}));

        let (status, _) = send(&app, "GET", "/hooks/alice/orders", None, Value::Null).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = send(&app, "POST", "/hooks/bob/orders", None, Value::Null).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = send(&app, "POST", "/hooks/alice/unknown", None, Value::Null).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn cancel_is_refused_once_finished() {
        let app = app().await;
        let workflow_id = register(&app, "alice", definition("nightly", json!([]))).await;
        let execution_id = run(&app, "alice", workflow_id).await;
        let uri = format!("/api/v1/executions/{execution_id}/cancel");

        let (status, _) = send(&app, "POST", &uri, Some("alice"), Value::Null).await;
        assert_eq!(status, StatusCode::OK);
        let execution = app.state.repo.get_execution(&execution_id).await.unwrap().unwrap();
        assert_eq!(execution.status, ExecutionStatus::Canceled);

        let (status, body) = send(&app, "POST", &uri, Some("alice"), Value::Null).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["errors"][0]["code"], "CONFLICT");
    }

    #[tokio::test]
    async fn approving_queues_a_resume() {
        let mut app = app().await;
        let workflow_id = register(&app, "alice", definition("gated", json!([]))).await;
        let execution_id = run(&app, "alice", workflow_id).await;
        let approval_id = pending_approval(&app, workflow_id, execution_id).await;

        let (_, body) = send(&app, "GET", "/api/v1/approvals/pending", Some("alice"), Value::Null).await;
        assert_eq!(body["data"].as_array().unwrap().len(), 1);
        let (_, body) = send(&app, "GET", "/api/v1/approvals/pending", Some("bob"), Value::Null).await;
        assert!(body["data"].as_array().unwrap().is_empty());

        let uri = format!("/api/v1/approvals/{approval_id}/approve");
        let (status, body) = send(&app, "POST", &uri, Some("alice"), json!({"approver": "mallory"})).await;
        assert_eq!(status, StatusCode::FORBIDDEN, "{body}");

        let (status, body) = send(&app, "POST", &uri, Some("alice"), json!({"approver": "ops"})).await;
        assert_eq!(status, StatusCode::ACCEPTED, "{body}");
        assert_eq!(body["data"]["approval"]["status"], "approved");
        assert_eq!(body["data"]["resume"], "queued");

        let (status, _) = send(&app, "POST", &uri, Some("alice"), json!({"approver": "ops"})).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        app.receiver
            .take()
            .unwrap()
            .spawn_workers(Arc::new(Forward(tx)), 1, cancel.clone());

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        cancel.cancel();
        assert_eq!((first.kind, first.execution_id), (RequestKind::Start, execution_id));
        assert_eq!((second.kind, second.execution_id), (RequestKind::Resume, execution_id));
    }

    #[tokio::test]
    async fn rejecting_fails_the_paused_execution() {
        let app = app().await;
        let workflow_id = register(&app, "alice", definition("gated", json!([]))).await;
        let execution_id = run(&app, "alice", workflow_id).await;
        let approval_id = pending_approval(&app, workflow_id, execution_id).await;

        let (status, _) = send(&app, "POST", &format!("/api/v1/approvals/{approval_id}/reject"), Some("bob"), json!({"approver": "ops"})).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = send(&app, "POST", &format!("/api/v1/approvals/{approval_id}/reject"), Some("alice"), json!({"approver": "ops"})).await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["data"]["execution_status"], "failed");

        let execution = app.state.repo.get_execution(&execution_id).await.unwrap().unwrap();
        assert_eq!(execution.message.as_deref(), Some("rejected by ops"));

        let (status, _) = send(&app, "POST", &format!("/api/v1/approvals/{}/approve", Uuid::now_v7()), Some("alice"), json!({"approver": "ops"})).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    fn single_slot_queue() -> EngineConfig {
        let mut config = EngineConfig::default();
        config.queue.capacity = 1;
        config
    }

    #[tokio::test]
    async fn full_queue_answers_service_unavailable() {
        let app = app_with(single_slot_queue()).await;
        let workflow_id = register(&app, "alice", definition("nightly", json!([]))).await;
        run(&app, "alice", workflow_id).await;

        let uri = format!("/api/v1/workflows/{workflow_id}/run");
        let (status, body) = tokio::time::timeout(
            std::time::Duration::from_millis(500),
            send(&app, "POST", &uri, Some("alice"), Value::Null),
        )
        .await
        .expect("run must not wait for queue capacity");
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE, "{body}");
        assert_eq!(body["errors"][0]["code"], "QUEUE_UNAVAILABLE");
    }

    #[tokio::test]
    async fn approval_on_a_full_queue_defers_the_resume() {
        let mut app = app_with(single_slot_queue()).await;
        let workflow_id = register(&app, "alice", definition("gated", json!([]))).await;
        let execution_id = run(&app, "alice", workflow_id).await;
        let approval_id = pending_approval(&app, workflow_id, execution_id).await;

        let uri = format!("/api/v1/approvals/{approval_id}/approve");
        let (status, body) = send(&app, "POST", &uri, Some("alice"), json!({"approver": "ops"})).await;
        assert_eq!(status, StatusCode::ACCEPTED, "{body}");
        assert_eq!(body["data"]["resume"], "deferred");

        let (tx, mut rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        app.receiver
            .take()
            .unwrap()
            .spawn_workers(Arc::new(Forward(tx)), 1, cancel.clone());

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        cancel.cancel();
        assert_eq!((first.kind, first.execution_id), (RequestKind::Start, execution_id));
        assert_eq!((second.kind, second.execution_id), (RequestKind::Resume, execution_id));
    }
}
