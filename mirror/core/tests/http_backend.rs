//! Coordinator scenarios against a live HTTP server
//!
//! Every test stands up a wiremock server playing the agent backend and
//! drives it through `HttpBackend` and `RequestCoordinator`.

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::json;
use tokio_test::assert_ok;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use mirror_core::{
    AgentBackend, DiffView, HttpBackend, MirrorConfig, MirrorError, NextAction, PollOutcome,
    RequestCoordinator, StepKind, TurnRequest, TurnState,
};

fn config_for(server: &MockServer) -> MirrorConfig {
    let mut config = MirrorConfig::default();
    config.backend.base_url = format!("{}/api", server.uri());
    config.coordinator.debounce = Duration::from_millis(30);
    config.coordinator.poll_interval = Duration::from_millis(10);
    config.coordinator.max_poll_attempts = 20;
    config
}

fn coordinator_for(server: &MockServer) -> RequestCoordinator {
    let config = config_for(server);
    let backend = Arc::new(HttpBackend::new(&config.backend).unwrap());
    RequestCoordinator::new(backend, &config).0
}

fn sse(frames: &[serde_json::Value]) -> String {
    let mut body = String::new();
    for frame in frames {
        body.push_str("data: ");
        body.push_str(&frame.to_string());
        body.push_str("\n\n");
    }
    body.push_str("data: [DONE]\n\n");
    body
}

fn sse_response(body: String) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("content-type", "text/event-stream")
        .set_body_string(body)
}

// ============================================================================
// Streaming turns
// ============================================================================

#[tokio::test]
async fn test_streamed_turn_completes() {
    let server = MockServer::start().await;
    let body = sse(&[
        json!({"type": "step", "step": 1, "step_type": "thought", "content": "Looking at the test"}),
        json!({"type": "action", "step": 2, "content": "read file", "tool_name": "read_file",
               "tool_input": {"path": "tests/login.rs"}}),
        json!({"type": "observation", "step": 3, "content": {"lines": 42}}),
        json!({"type": "answer", "step": 4, "content": "Hello "}),
        json!({"type": "answer", "step": 5, "content": "world"}),
        json!({"type": "final", "final_answer": null, "suggestions": ["Run the tests"]}),
    ]);
    Mock::given(method("POST"))
        .and(path("/api/chat/stream"))
        .and(header("accept", "text/event-stream"))
        .and(body_partial_json(json!({"message": "why?", "repo": "acme/web"})))
        .respond_with(sse_response(body))
        .expect(1)
        .mount(&server)
        .await;

    let coordinator = coordinator_for(&server);
    let turn = coordinator
        .start_turn(TurnRequest::new("why?").with_repo("acme/web"))
        .wait()
        .await;

    assert_eq!(turn.state(), TurnState::Completed);
    assert_eq!(turn.visible_content(), "Hello \nworld");
    assert_eq!(turn.transcript().len(), 5);
    assert_eq!(turn.suggestions(), ["Run the tests".to_string()]);

    let action = turn.transcript().steps()[1].clone();
    assert_eq!(action.kind, StepKind::Action);
    assert_eq!(action.tool_name(), Some("read_file"));

    let observation = &turn.transcript().steps()[2];
    assert_eq!(observation.content, r#"{"lines":42}"#);
}

#[tokio::test]
async fn test_server_error_fails_turn() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat/stream"))
        .respond_with(ResponseTemplate::new(500).set_body_string("agent crashed"))
        .mount(&server)
        .await;

    let turn = coordinator_for(&server)
        .start_turn(TurnRequest::new("hi"))
        .wait()
        .await;

    assert_eq!(turn.state(), TurnState::Failed);
    let error = turn.error().unwrap();
    assert!(error.contains("500"), "unexpected error: {error}");
    assert!(error.contains("agent crashed"), "unexpected error: {error}");
}

#[tokio::test]
async fn test_error_frame_after_steps_keeps_transcript() {
    let server = MockServer::start().await;
    let body = sse(&[
        json!({"type": "thought", "step": 1, "content": "a"}),
        json!({"type": "action", "step": 2, "content": "b"}),
        json!({"type": "error", "error": "boom"}),
    ]);
    Mock::given(method("POST"))
        .respond_with(sse_response(body))
        .mount(&server)
        .await;

    let turn = coordinator_for(&server)
        .start_turn(TurnRequest::new("hi"))
        .wait()
        .await;

    assert_eq!(turn.state(), TurnState::Failed);
    assert_eq!(turn.visible_content(), "boom");
    assert_eq!(turn.transcript().len(), 2);
}

#[tokio::test]
async fn test_truncated_stream_fails_turn() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(sse_response(
            "data: {\"type\":\"thought\",\"step\":1,\"content\":\"a\"}\n\n".to_string(),
        ))
        .mount(&server)
        .await;

    let turn = coordinator_for(&server)
        .start_turn(TurnRequest::new("hi"))
        .wait()
        .await;

    assert_eq!(turn.state(), TurnState::Failed);
    assert_eq!(turn.error(), Some(mirror_core::coordinator::STREAM_ENDED_EARLY));
    assert_eq!(turn.transcript().len(), 1);
}

// ============================================================================
// Cached and debounced reads
// ============================================================================

#[tokio::test]
async fn test_cached_read_hits_server_once() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/issues"))
        .and(query_param("repo", "acme/web"))
        .and(query_param("state", "open"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"number": 7}])))
        .expect(1)
        .mount(&server)
        .await;

    let coordinator = coordinator_for(&server);
    let first = assert_ok!(coordinator.fetch_issues("acme/web", "open").await);
    let second = assert_ok!(coordinator.fetch_issues("acme/web", "open").await);

    assert_eq!(first, json!([{"number": 7}]));
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_not_found_is_transport_error_with_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/pulls"))
        .respond_with(ResponseTemplate::new(404).set_body_string("no such repo"))
        .expect(2)
        .mount(&server)
        .await;

    let coordinator = coordinator_for(&server);
    for _ in 0..2 {
        let err = coordinator
            .fetch_pull_requests("acme/missing", "open")
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(404));
    }
}

#[tokio::test]
async fn test_rapid_diff_requests_issue_one_call() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/diff"))
        .and(query_param("path", "src/b.rs"))
        .and(query_param("view", "split"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"hunks": []})))
        .expect(1)
        .mount(&server)
        .await;

    let config = config_for(&server);
    let backend = Arc::new(HttpBackend::new(&config.backend).unwrap());
    let (coordinator, mut diffs) = RequestCoordinator::new(backend, &config);

    coordinator.request_diff("abc123", "src/a.rs", DiffView::Split);
    coordinator.request_diff("abc123", "src/b.rs", DiffView::Split);

    let fetched = diffs.recv().await.unwrap();
    assert_eq!(fetched.result, Ok(json!({"hunks": []})));
    assert!(!fetched.from_cache);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(diffs.try_recv().is_err());
}

// ============================================================================
// Status polling
// ============================================================================

#[tokio::test]
async fn test_poll_until_indexed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/status/acme-web"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "indexing",
            "progress_items_processed": 10,
            "progress_total_items": 40,
        })))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/status/acme-web"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"status": "indexed", "message": "Done"})),
        )
        .mount(&server)
        .await;

    let coordinator = coordinator_for(&server);
    let handle = coordinator.spawn_status_poll("acme-web");
    let progress = handle.progress();
    let outcome = handle.outcome().await;

    match &outcome {
        PollOutcome::Ready(report) => assert_eq!(report.message.as_deref(), Some("Done")),
        other => panic!("expected Ready, got {other:?}"),
    }
    let last = progress.borrow().clone().unwrap();
    assert_eq!(last.progress.fraction(), Some(0.25));
}

#[tokio::test]
async fn test_poll_server_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/status/acme-web"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"status": "failed", "error": "clone failed"})),
        )
        .mount(&server)
        .await;

    let outcome = coordinator_for(&server)
        .spawn_status_poll("acme-web")
        .outcome()
        .await;
    assert_eq!(outcome.next_action(), NextAction::Report);
    assert!(matches!(outcome, PollOutcome::ServerFailed { ref message, .. } if message == "clone failed"));
}

#[tokio::test]
async fn test_poll_unreachable_backend_is_polling_failed() {
    let server = MockServer::start().await;
    let config = config_for(&server);
    drop(server);

    let backend = Arc::new(HttpBackend::new(&config.backend).unwrap());
    let outcome = RequestCoordinator::new(backend, &config)
        .0
        .spawn_status_poll("acme-web")
        .outcome()
        .await;

    match outcome {
        PollOutcome::PollingFailed { error, attempts } => {
            assert_eq!(attempts, 1);
            assert!(matches!(error, MirrorError::Transport { .. }));
        }
        other => panic!("expected PollingFailed, got {other:?}"),
    }
}

#[tokio::test]
async fn test_poll_ceiling_is_timeout() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "queued"})))
        .expect(20)
        .mount(&server)
        .await;

    let outcome = coordinator_for(&server)
        .spawn_status_poll("acme-web")
        .outcome()
        .await;
    assert_eq!(outcome, PollOutcome::Timeout { attempts: 20 });
}

#[tokio::test]
async fn test_status_target_is_one_path_segment() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/status/acme%2Fweb"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "ready"})))
        .expect(1)
        .mount(&server)
        .await;

    let backend = HttpBackend::new(&config_for(&server).backend).unwrap();
    let report = assert_ok!(backend.check_status("acme/web").await);
    assert_eq!(report.status, "ready");
}

#[tokio::test]
async fn test_shutdown_stops_status_poll() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "queued"})))
        .mount(&server)
        .await;

    let mut config = config_for(&server);
    config.coordinator.max_poll_attempts = 10_000;
    let backend = Arc::new(HttpBackend::new(&config.backend).unwrap());
    let (coordinator, _diffs) = RequestCoordinator::new(backend, &config);

    let handle = coordinator.spawn_status_poll("acme-web");
    tokio::time::sleep(Duration::from_millis(50)).await;
    coordinator.shutdown();

    let outcome = tokio::time::timeout(Duration::from_secs(5), handle.outcome()).await;
    assert!(matches!(outcome, Ok(PollOutcome::Cancelled { .. })));
}

#[tokio::test]
async fn test_backend_reports_name() {
    let server = MockServer::start().await;
    let backend = HttpBackend::new(&config_for(&server).backend).unwrap();
    assert_eq!(backend.name(), "http");
}
