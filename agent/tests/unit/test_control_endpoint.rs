use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use tower::ServiceExt;

use control_api::{PullResponse, StatusResponse, UpdateMethod};
use fleetsync::server::{router, InstanceOptions, ServerState};
use fleetsync::update::SelfUpdater;

use crate::common::{fail, git_tree, instance, ok, update_options, ScriptedRunner};

const SECRET: &str = "s3cret-value";

fn serve(runner: Arc<ScriptedRunner>, instance: InstanceOptions, scratch: &Path) -> Router {
    let updater = SelfUpdater::new(update_options(scratch, None), runner).unwrap();
    router(Arc::new(ServerState::new(instance, Arc::new(updater))))
}

fn app(runner: ScriptedRunner, tree: &Path, scratch: &Path, secret: &str) -> Router {
    serve(Arc::new(runner), instance(tree, secret), scratch)
}

fn updating_runner() -> ScriptedRunner {
    ScriptedRunner::new().git(
        &["rev-parse", "--short", "HEAD"],
        vec![ok("9f8e7d6\n"), ok("abc1234\n")],
    )
}

async fn body_bytes(response: axum::response::Response) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

#[tokio::test]
async fn test_health_needs_no_secret() {
    let tree = git_tree();
    let scratch = tempfile::TempDir::new().unwrap();
    let app = app(ScriptedRunner::new(), tree.path(), scratch.path(), SECRET);

    let response = app
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_pull_without_secret_is_forbidden() {
    let tree = git_tree();
    let scratch = tempfile::TempDir::new().unwrap();
    let runner = Arc::new(updating_runner());
    let app = serve(runner.clone(), instance(tree.path(), SECRET), scratch.path());

    let response = app
        .oneshot(Request::post("/deploy/pull").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert!(body_bytes(response).await.is_empty());
    assert!(runner.calls().is_empty());
}

#[tokio::test]
async fn test_pull_with_wrong_secret_is_forbidden() {
    let tree = git_tree();
    let scratch = tempfile::TempDir::new().unwrap();
    let app = app(updating_runner(), tree.path(), scratch.path(), SECRET);

    let response = app
        .oneshot(
            Request::post("/deploy/pull")
                .header("x-deploy-secret", "s3cret-valuf")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_empty_configured_secret_rejects_everything() {
    let tree = git_tree();
    let scratch = tempfile::TempDir::new().unwrap();
    let app = app(updating_runner(), tree.path(), scratch.path(), "");

    let response = app
        .oneshot(
            Request::post("/deploy/pull?secret=")
                .header("x-deploy-secret", "")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_pull_with_header_secret_updates() {
    let tree = git_tree();
    let scratch = tempfile::TempDir::new().unwrap();
    let app = app(updating_runner(), tree.path(), scratch.path(), SECRET);

    let response = app
        .oneshot(
            Request::post("/deploy/pull")
                .header("x-deploy-secret", SECRET)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let pull: PullResponse = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert!(pull.success);
    assert_eq!(pull.method, Some(UpdateMethod::Vcs));
    assert_eq!(pull.before.as_deref(), Some("9f8e7d6"));
    assert_eq!(pull.after.as_deref(), Some("abc1234"));
    assert_eq!(pull.updated, Some(true));
}

#[tokio::test]
async fn test_pull_with_bearer_and_form_secret() {
    let tree = git_tree();
    let scratch = tempfile::TempDir::new().unwrap();

    let bearer = app(updating_runner(), tree.path(), scratch.path(), SECRET)
        .oneshot(
            Request::post("/deploy/pull")
                .header(header::AUTHORIZATION, format!("Bearer {}", SECRET))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(bearer.status(), StatusCode::OK);

    let form = app(updating_runner(), tree.path(), scratch.path(), SECRET)
        .oneshot(
            Request::post("/deploy/pull")
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(Body::from(format!("secret={}", SECRET)))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(form.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_failed_pull_returns_error_payload() {
    let tree = git_tree();
    let scratch = tempfile::TempDir::new().unwrap();
    let runner = ScriptedRunner::new()
        .git(&["rev-parse"], vec![ok("9f8e7d6\n")])
        .git(&["reset"], vec![fail(128, "fatal: could not reset index file")]);
    let app = app(runner, tree.path(), scratch.path(), SECRET);

    let response = app
        .oneshot(
            Request::post(format!("/deploy/pull?secret={}", SECRET))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let pull: PullResponse = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert!(!pull.success);
    assert!(pull.error.unwrap().contains("could not reset index file"));
    assert!(pull.method.is_none());
}

#[tokio::test]
async fn test_status_reports_version_and_commit() {
    let tree = git_tree();
    std::fs::write(tree.path().join("VERSION"), "Version: 0.4.0\n").unwrap();
    let scratch = tempfile::TempDir::new().unwrap();
    let runner = ScriptedRunner::new().git(&["rev-parse"], vec![ok("abc1234\n")]);
    let app = app(runner, tree.path(), scratch.path(), SECRET);

    let response = app
        .oneshot(
            Request::get("/deploy/status")
                .header("x-deploy-secret", SECRET)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let status: StatusResponse = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(status.site_url, "https://bar.example");
    assert_eq!(status.version, "0.4.0");
    assert_eq!(status.commit, "abc1234");
    assert!(status.has_vcs);
    assert!(status.auto_update);
}

#[tokio::test]
async fn test_status_without_secret_is_forbidden() {
    let tree = git_tree();
    let scratch = tempfile::TempDir::new().unwrap();
    let app = app(ScriptedRunner::new(), tree.path(), scratch.path(), SECRET);

    let response = app
        .oneshot(Request::get("/deploy/status").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_workbench_refuses_pull() {
    let tree = git_tree();
    let scratch = tempfile::TempDir::new().unwrap();
    let runner = Arc::new(updating_runner());
    let mut workbench = instance(tree.path(), SECRET);
    workbench.is_workbench = true;
    let app = serve(runner.clone(), workbench, scratch.path());

    let response = app
        .oneshot(
            Request::post("/deploy/pull")
                .header("x-deploy-secret", SECRET)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CONFLICT);
    let pull: PullResponse = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert!(!pull.success);
    assert!(pull.error.unwrap().contains("workbench"));
    assert!(runner.calls().is_empty());
}

#[tokio::test]
async fn test_pull_on_dirty_tree_leaves_it_alone() {
    let tree = git_tree();
    let scratch = tempfile::TempDir::new().unwrap();
    let runner = Arc::new(
        ScriptedRunner::new().git(&["status"], vec![ok(" M wp-config.php\n?? notes.txt\n")]),
    );
    let app = serve(runner.clone(), instance(tree.path(), SECRET), scratch.path());

    let response = app
        .oneshot(
            Request::post("/deploy/pull")
                .header("x-deploy-secret", SECRET)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let pull: PullResponse = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert!(pull.error.unwrap().contains("1 uncommitted change(s)"));
    assert!(runner.git_calls("reset").is_empty());
}

#[tokio::test]
async fn test_pull_finishes_after_caller_hangs_up() {
    let tree = git_tree();
    let scratch = tempfile::TempDir::new().unwrap();
    let runner = Arc::new(
        ScriptedRunner::new()
            .git(&["reset"], vec![ok("HEAD is now at abc1234\n")])
            .with_delay(Duration::from_millis(1500)),
    );
    let app = serve(runner.clone(), instance(tree.path(), SECRET), scratch.path());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

    let client = reqwest::Client::builder()
        .timeout(Duration::from_millis(200))
        .build()
        .unwrap();
    let sent = client
        .post(format!("http://{}/deploy/pull", addr))
        .header("x-deploy-secret", SECRET)
        .send()
        .await;
    assert!(sent.unwrap_err().is_timeout());
    drop(client);

    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while runner.finished_git_calls("reset").is_empty() && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(runner.finished_git_calls("reset").len(), 1);

    // The commit read after the reset ran too, so the update completed
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(runner.finished_git_calls("rev-parse").len(), 2);
}
