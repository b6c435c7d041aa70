//! HTTP server for the review studio.
//!
//! # Endpoints
//!
//! - `POST /api/create-pr` - Recreate a commit inside an existing fork
//! - `POST /api/create-pr/auto` - Recreate an upstream commit, resolving the fork
//! - `POST /api/queue` - Enqueue an operation (returns 201 Created)
//! - `GET /api/queue/operations/{id}` - One operation as JSON
//! - `POST /api/queue/process` - Run at most one queued operation
//! - `GET /api/queue/process` - Queue depth and rate-limit state
//! - `GET /health` - Returns 200 if the server is running
//!
//! The recreation endpoints stream server-sent events when the client
//! accepts `text/event-stream` and answer with a single JSON result
//! otherwise.

use std::sync::Arc;

use tower_http::trace::TraceLayer;

use crate::effects::{GitHubInterpreter, GitInterpreter};
use crate::queue::{OperationHandlers, OperationStore, QueueProcessor, SharedClock};
use crate::recreate::Recreator;

pub mod health;
pub mod queue;
pub mod recreate;

pub use health::health_handler;
pub use queue::{
    QueueApiError, enqueue_handler, operation_handler, process_handler, queue_status_handler,
};
pub use recreate::{create_pr_auto_handler, create_pr_handler};

/// The queue processor the server drives.
pub type Processor<H, G, S> = QueueProcessor<S, OperationHandlers<H, G, S>>;

/// Shared application state.
///
/// This is passed to all handlers via Axum's `State` extractor.
pub struct AppState<H, G, S> {
    inner: Arc<AppStateInner<H, G, S>>,
}

struct AppStateInner<H, G, S> {
    recreator: Arc<Recreator<H, G>>,
    processor: Processor<H, G, S>,
    clock: SharedClock,
}

// Derived `Clone` would demand `H: Clone` and friends.
impl<H, G, S> Clone for AppState<H, G, S> {
    fn clone(&self) -> Self {
        AppState {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<H, G, S> AppState<H, G, S>
where
    H: GitHubInterpreter,
    G: GitInterpreter,
    S: OperationStore,
{
    pub fn new(
        recreator: Arc<Recreator<H, G>>,
        processor: Processor<H, G, S>,
        clock: SharedClock,
    ) -> Self {
        AppState {
            inner: Arc::new(AppStateInner {
                recreator,
                processor,
                clock,
            }),
        }
    }

    pub fn recreator(&self) -> &Arc<Recreator<H, G>> {
        &self.inner.recreator
    }

    pub fn processor(&self) -> &Processor<H, G, S> {
        &self.inner.processor
    }

    pub fn store(&self) -> &Arc<S> {
        self.inner.processor.store()
    }

    pub fn clock(&self) -> &SharedClock {
        &self.inner.clock
    }
}

/// Builds the axum Router with all endpoints.
pub fn build_router<H, G, S>(app_state: AppState<H, G, S>) -> axum::Router
where
    H: GitHubInterpreter,
    G: GitInterpreter,
    S: OperationStore,
{
    use axum::routing::{get, post};

    axum::Router::new()
        .route("/api/create-pr", post(create_pr_handler::<H, G, S>))
        .route("/api/create-pr/auto", post(create_pr_auto_handler::<H, G, S>))
        .route("/api/queue", post(enqueue_handler::<H, G, S>))
        .route(
            "/api/queue/operations/{id}",
            get(operation_handler::<H, G, S>),
        )
        .route(
            "/api/queue/process",
            post(process_handler::<H, G, S>).get(queue_status_handler::<H, G, S>),
        )
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}

#[cfg(test)]
mod integration_tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode, header};
    use http_body_util::BodyExt;
    use serde_json::{Value, json};
    use tempfile::TempDir;
    use tower::ServiceExt;

    use crate::git::CherryPickResult;
    use crate::queue::{HandlerConfig, QueueConfig, SqliteOperationStore};
    use crate::test_utils::{FakeGit, FakeGitHub, TestClock, recreator_config, sha};
    use crate::types::{LeaseOwner, RepoId};

    const LOGIN: &str = "studio-bot";

    type TestState = AppState<FakeGitHub, FakeGit, SqliteOperationStore>;

    struct TestApp {
        state: TestState,
        github: Arc<FakeGitHub>,
        git: Arc<FakeGit>,
        _workspace: TempDir,
        _clone_cache: TempDir,
    }

    impl TestApp {
        fn router(&self) -> axum::Router {
            build_router(self.state.clone())
        }
    }

    fn seed(github: &FakeGitHub, repo: &RepoId) {
        github.add_repo(repo);
        github.add_commit(repo, &sha('5'), "Initial commit", &[]);
        github.add_commit(repo, &sha('1'), "Main work", &[sha('5')]);
        github.add_commit(repo, &sha('4'), "Fix widget overflow", &[sha('1')]);
        github.set_branch(repo, "main", &sha('1'));
    }

    fn test_app() -> TestApp {
        let github = Arc::new(FakeGitHub::new(LOGIN));
        seed(&github, &RepoId::new("acme", "widgets"));
        seed(&github, &RepoId::new(LOGIN, "widgets"));

        let git = Arc::new(FakeGit::new());
        let clock = Arc::new(TestClock::fixed());
        let workspace = TempDir::new().unwrap();
        let clone_cache = TempDir::new().unwrap();
        let store = Arc::new(SqliteOperationStore::new_in_memory().unwrap());

        let recreator = Arc::new(Recreator::new(
            Arc::clone(&github),
            Arc::clone(&git),
            recreator_config(workspace.path()),
        ));
        let handlers = Arc::new(OperationHandlers::new(
            Arc::clone(&recreator),
            Arc::clone(&store),
            clock.clone(),
            HandlerConfig {
                fork_organization: None,
                clone_cache: clone_cache.path().to_path_buf(),
            },
        ));
        let processor = QueueProcessor::new(store, handlers, clock.clone(), QueueConfig::default())
            .with_owner(LeaseOwner::new("server-test"));

        TestApp {
            state: AppState::new(recreator, processor, clock),
            github,
            git,
            _workspace: workspace,
            _clone_cache: clone_cache,
        }
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let body = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&body).unwrap()
    }

    fn manual_body() -> Value {
        json!({
            "repoUrl": "https://github.com/studio-bot/widgets",
            "commitHash": sha('4').as_str(),
            "parentCommitHash": sha('1').as_str(),
        })
    }

    // ─── Health endpoint tests ───

    #[tokio::test]
    async fn health_returns_200() {
        let app = test_app();

        let response = app.router().oneshot(get("/health")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "ok");
    }

    // ─── Recreation endpoint tests ───

    #[tokio::test]
    async fn create_pr_returns_result_json() {
        let app = test_app();

        let response = app
            .router()
            .oneshot(post_json("/api/create-pr", manual_body()))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["prUrl"], "https://github.com/studio-bot/widgets/pull/1");
        assert_eq!(body["forkUrl"], "https://github.com/studio-bot/widgets");
        assert_eq!(body["commitHash"], sha('4').as_str());
        assert!(body.get("eventType").is_none());
    }

    #[tokio::test]
    async fn missing_parent_is_rejected_before_any_side_effect() {
        let app = test_app();

        let response = app
            .router()
            .oneshot(post_json(
                "/api/create-pr",
                json!({
                    "repoUrl": "https://github.com/studio-bot/widgets",
                    "commitHash": sha('4').as_str(),
                }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["kind"], "invalid_input");
        assert!(body["error"].as_str().unwrap().contains("parentCommitHash"));
        assert!(app.github.effects().is_empty());
        assert!(app.git.effects().is_empty());
    }

    #[tokio::test]
    async fn malformed_body_is_a_json_400() {
        let app = test_app();

        let request = Request::builder()
            .method("POST")
            .uri("/api/create-pr/auto")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let response = app.router().oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["kind"], "invalid_input");
    }

    #[tokio::test]
    async fn cherry_pick_conflict_maps_to_409() {
        let app = test_app();
        app.git.set_cherry_pick(CherryPickResult::Conflict {
            conflicting_files: vec!["src/widget.rs".to_string()],
        });

        let response = app
            .router()
            .oneshot(post_json("/api/create-pr", manual_body()))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::CONFLICT);
        let body = body_json(response).await;
        assert_eq!(body["kind"], "conflict");
        assert!(body["error"].as_str().unwrap().contains("src/widget.rs"));
    }

    #[tokio::test]
    async fn json_recreation_outlives_a_dropped_request() {
        let app = test_app();
        let (reached, release) = app.git.hold("push");

        let request = tokio::spawn(
            app.router()
                .oneshot(post_json("/api/create-pr", manual_body())),
        );
        reached.notified().await;
        request.abort();
        assert!(request.await.unwrap_err().is_cancelled());

        release.notify_one();
        let fork = RepoId::new(LOGIN, "widgets");
        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            while app.github.pulls(&fork).is_empty() {
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("pull request opened after the client went away");
    }

    #[tokio::test]
    async fn event_stream_ends_with_one_result_frame() {
        let app = test_app();

        let mut request = post_json("/api/create-pr/auto", json!({
            "repoUrl": "https://github.com/acme/widgets",
            "commitHash": sha('4').as_str(),
        }));
        request
            .headers_mut()
            .insert(header::ACCEPT, "text/event-stream".parse().unwrap());
        let response = app.router().oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(
            response.headers()[header::CONTENT_TYPE]
                .to_str()
                .unwrap()
                .starts_with("text/event-stream")
        );

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8(body.to_vec()).unwrap();
        let frames: Vec<Value> = text
            .lines()
            .filter_map(|line| line.strip_prefix("data: "))
            .map(|data| serde_json::from_str(data).unwrap())
            .collect();

        assert!(frames.len() > 1);
        let (last, statuses) = frames.split_last().unwrap();
        assert!(statuses.iter().all(|f| f["eventType"] == "status"));
        assert_eq!(last["eventType"], "result");
        assert_eq!(last["success"], true);
        assert_eq!(last["forkUrl"], "https://github.com/studio-bot/widgets");
    }

    #[tokio::test]
    async fn event_stream_request_still_validates_as_json() {
        let app = test_app();

        let mut request = post_json("/api/create-pr/auto", json!({ "repoUrl": "not a url" }));
        request
            .headers_mut()
            .insert(header::ACCEPT, "text/event-stream".parse().unwrap());
        let response = app.router().oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["kind"], "invalid_input");
    }

    // ─── Queue endpoint tests ───

    #[tokio::test]
    async fn enqueue_then_fetch_operation() {
        let app = test_app();

        let response = app
            .router()
            .oneshot(post_json(
                "/api/queue",
                json!({
                    "type": "delete_fork",
                    "payload": { "fork": { "owner": LOGIN, "repo": "widgets" } },
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let id = body_json(response).await["id"].as_i64().unwrap();

        let response = app
            .router()
            .oneshot(get(&format!("/api/queue/operations/{id}")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["id"], id);
        assert_eq!(body["type"], "delete_fork");
        assert_eq!(body["status"], "queued");
    }

    #[tokio::test]
    async fn unknown_operation_type_is_rejected() {
        let app = test_app();

        let response = app
            .router()
            .oneshot(post_json(
                "/api/queue",
                json!({ "type": "launch_rockets", "payload": {} }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["kind"], "invalid_payload");
    }

    #[tokio::test]
    async fn missing_operation_is_404() {
        let app = test_app();

        let response = app
            .router()
            .oneshot(get("/api/queue/operations/999"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await["kind"], "not_found");
    }

    #[tokio::test]
    async fn process_on_empty_queue() {
        let app = test_app();

        let response = app
            .router()
            .oneshot(post_json("/api/queue/process", json!({})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_json(response).await,
            json!({ "processed": false, "reason": "queue_empty" })
        );
    }

    #[tokio::test]
    async fn process_runs_one_operation_then_rate_limits() {
        let app = test_app();
        app.router()
            .oneshot(post_json(
                "/api/queue",
                json!({
                    "type": "delete_fork",
                    "payload": { "fork": { "owner": LOGIN, "repo": "widgets" } },
                }),
            ))
            .await
            .unwrap();

        let response = app
            .router()
            .oneshot(post_json("/api/queue/process", json!({})))
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["processed"], true);
        assert_eq!(body["operation"]["type"], "delete_fork");
        assert_eq!(body["operation"]["status"], "completed");

        let response = app
            .router()
            .oneshot(post_json("/api/queue/process", json!({})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_json(response).await,
            json!({ "processed": false, "reason": "rate_limited", "waitSeconds": 60 })
        );

        let response = app.router().oneshot(get("/api/queue/process")).await.unwrap();
        let status = body_json(response).await;
        assert_eq!(status["canProcessNow"], false);
        assert_eq!(status["waitSeconds"], 60);
        assert_eq!(status["counts"]["completed"], 1);
    }

    #[tokio::test]
    async fn queue_status_on_fresh_server() {
        let app = test_app();

        let response = app.router().oneshot(get("/api/queue/process")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let status = body_json(response).await;
        assert_eq!(status["depth"], 0);
        assert_eq!(status["canProcessNow"], true);
        assert_eq!(status["waitSeconds"], 0);
        assert_eq!(status["minDelaySeconds"], 60);
    }
}
