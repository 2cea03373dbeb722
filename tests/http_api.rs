use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tower::ServiceExt;

use intake_handoff::config::AppConfig;
use intake_handoff::conversation::InMemoryConversationStore;
use intake_handoff::handoff::{
    DeliveryOutcome, HandoffError, HandoffNotifier, HandoffRequest, HandoffResult, HandoffWorker,
    NotifyFuture, RetryPolicy,
};
use intake_handoff::server::{create_router, AppState};

/// Stand-in for Slack: `#ghost` does not exist and `#down` always fails.
#[derive(Default)]
struct FakeSlack {
    posts: AtomicU32,
}

impl HandoffNotifier for FakeSlack {
    fn name(&self) -> &'static str {
        "fake-slack"
    }

    fn deliver<'a>(
        &'a self,
        request: &'a HandoffRequest,
    ) -> NotifyFuture<'a, HandoffResult<DeliveryOutcome>> {
        Box::pin(async move {
            match request.destination_channel.as_deref() {
                Some("#ghost") => Ok(DeliveryOutcome::Rejected {
                    reason: "channel_not_found".to_string(),
                }),
                Some("#down") => Err(HandoffError::Transient("503".to_string())),
                _ => {
                    let n = self.posts.fetch_add(1, Ordering::SeqCst) + 1;
                    Ok(DeliveryOutcome::Delivered {
                        external_ref: Some(format!("1700000000.{n:06}")),
                    })
                }
            }
        })
    }
}

struct TestApp {
    router: Router,
    worker: HandoffWorker,
    slack: Arc<FakeSlack>,
}

fn make_app() -> TestApp {
    let mut config = AppConfig::default();
    config.uploads.signing_secret = Some("integration-secret".to_string());
    config.handoff.retry = RetryPolicy::immediate(2);

    let slack = Arc::new(FakeSlack::default());
    let (state, worker) = AppState::from_parts(
        &config,
        Arc::new(InMemoryConversationStore::new()),
        slack.clone(),
    )
    .unwrap();

    TestApp {
        router: create_router(state),
        worker,
        slack,
    }
}

async fn send(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    send_request(router, request).await
}

async fn send_request(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn create_alice(router: &Router) -> String {
    let (status, body) = send(
        router,
        "POST",
        "/api/conversations",
        Some(json!({
            "participantName": "Alice",
            "participantEmail": "a@x.com",
            "initialMessage": "Hi, we need a new booking site by March. Budget is $8k."
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    body["id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_health() {
    let app = make_app();
    let (status, body) = send(&app.router, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_conversation_lifecycle_and_handoff() {
    let app = make_app();
    let id = create_alice(&app.router).await;

    let (status, message) = send(
        &app.router,
        "POST",
        &format!("/api/conversations/{id}/message"),
        Some(json!({
            "content": "It must work on mobile.",
            "attachments": [{"fileUrl": "https://cdn.example.com/uploads/brief.pdf", "fileName": "brief.pdf"}]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(message["role"], "user");
    assert_eq!(message["sequence"], 2);
    assert_eq!(message["conversationId"], id.as_str());

    let (status, conversation) =
        send(&app.router, "GET", &format!("/api/conversations/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(conversation["status"], "active");
    assert_eq!(conversation["messages"].as_array().unwrap().len(), 2);

    let (status, ended) = send(
        &app.router,
        "POST",
        &format!("/api/conversations/{id}/end-and-send"),
        Some(json!({"notes": "Warm lead"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ended["handoffQueued"], true);
    assert_eq!(ended["conversation"]["status"], "ended");
    let brief = &ended["conversation"]["intakeBrief"];
    assert!(brief["summary"].as_str().unwrap().contains("Alice"));
    assert!(!brief["constraints"].as_array().unwrap().is_empty());

    let (status, again) = send(
        &app.router,
        "POST",
        &format!("/api/conversations/{id}/end-and-send"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(again["handoffQueued"], false);
    assert_eq!(again["conversation"]["endedAt"], ended["conversation"]["endedAt"]);

    let (status, closed) = send(
        &app.router,
        "POST",
        &format!("/api/conversations/{id}/message"),
        Some(json!({"content": "one more thing"})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(closed["error"], "conversation_closed");

    let (status, queued) = send(&app.router, "GET", &format!("/api/handoff/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(queued["state"], "queued");

    app.worker.spawn().shutdown().await;

    let (status, delivered) = send(&app.router, "GET", &format!("/api/handoff/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(delivered["state"], "delivered");
    assert_eq!(delivered["externalRef"], "1700000000.000001");
    assert_eq!(app.slack.posts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_concurrent_end_calls_queue_one_handoff() {
    let app = make_app();
    let id = create_alice(&app.router).await;
    let uri = format!("/api/conversations/{id}/end-and-send");

    let calls = (0..6).map(|_| send(&app.router, "POST", &uri, None));
    let results = futures::future::join_all(calls).await;

    let queued = results
        .iter()
        .filter(|(status, body)| *status == StatusCode::OK && body["handoffQueued"] == true)
        .count();
    assert_eq!(queued, 1);
}

#[tokio::test]
async fn test_request_errors() {
    let app = make_app();

    let bad_json = Request::builder()
        .method("POST")
        .uri("/api/conversations")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, body) = send_request(&app.router, bad_json).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_json");

    let (status, body) = send(
        &app.router,
        "POST",
        "/api/conversations",
        Some(json!({"participantName": " ", "participantEmail": ""})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");
    assert!(!body["details"].as_array().unwrap().is_empty());

    let unknown = "00000000-0000-4000-8000-000000000000";
    let (status, body) = send(
        &app.router,
        "POST",
        &format!("/api/conversations/{unknown}/message"),
        Some(json!({"content": "hello"})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");

    let (status, _) = send(&app.router, "GET", "/api/conversations/not-a-uuid", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = send(
        &app.router,
        "POST",
        &format!("/api/conversations/{unknown}/end-and-send"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");

    let id = create_alice(&app.router).await;
    let bad_end = Request::builder()
        .method("POST")
        .uri(format!("/api/conversations/{id}/end-and-send"))
        .header("content-type", "application/json")
        .body(Body::from("[1,2"))
        .unwrap();
    let (status, body) = send_request(&app.router, bad_end).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_json");
}

#[tokio::test]
async fn test_json_bodies_do_not_need_a_content_type() {
    let app = make_app();

    let untyped = Request::builder()
        .method("POST")
        .uri("/api/conversations")
        .body(Body::from(json!({"participantName": "Alice"}).to_string()))
        .unwrap();
    let (status, conversation) = send_request(&app.router, untyped).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(conversation["participantName"], "Alice");

    let id = conversation["id"].as_str().unwrap();
    let text_plain = Request::builder()
        .method("POST")
        .uri(format!("/api/conversations/{id}/message"))
        .header("content-type", "text/plain")
        .body(Body::from(json!({"content": "Hello"}).to_string()))
        .unwrap();
    let (status, message) = send_request(&app.router, text_plain).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(message["sequence"], 1);
}

#[tokio::test]
async fn test_audit_trail_endpoint() {
    let app = make_app();
    let id = create_alice(&app.router).await;
    let uri = format!("/api/conversations/{id}/end-and-send");
    send(&app.router, "POST", &uri, None).await;
    send(&app.router, "POST", &uri, None).await;

    let (status, body) = send(&app.router, "GET", &format!("/api/conversations/{id}/audit"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["conversationId"], id.as_str());
    let actions: Vec<&str> = body["entries"]
        .as_array()
        .unwrap()
        .iter()
        .map(|entry| entry["action"].as_str().unwrap())
        .collect();
    assert_eq!(actions, vec!["created", "ended"]);
    assert_eq!(body["entries"][1]["details"]["handoffQueued"], true);

    let unknown = "00000000-0000-4000-8000-000000000000";
    let (status, _) = send(&app.router, "GET", &format!("/api/conversations/{unknown}/audit"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_presign_upload() {
    let app = make_app();

    let (status, link) = send(
        &app.router,
        "POST",
        "/api/uploads/presign",
        Some(json!({"fileName": "logo.svg", "contentType": "image/svg+xml", "contentLength": 4096})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(link["method"], "PUT");
    assert_eq!(link["headers"]["Content-Type"], "image/svg+xml");
    assert!(link["fileUrl"].as_str().unwrap().ends_with("/logo.svg"));

    let issued: chrono::DateTime<chrono::Utc> =
        serde_json::from_value(link["issuedAt"].clone()).unwrap();
    let expires: chrono::DateTime<chrono::Utc> =
        serde_json::from_value(link["expiresAt"].clone()).unwrap();
    assert_eq!(expires - issued, chrono::Duration::minutes(15));

    let (status, body) = send(
        &app.router,
        "POST",
        "/api/uploads/presign",
        Some(json!({"fileName": "huge.mov", "contentType": "video/quicktime", "contentLength": 26_214_401_u64})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");

    let (status, link) = send(
        &app.router,
        "POST",
        "/api/uploads/presign",
        Some(json!({"fileName": "empty.txt", "contentType": "text/plain", "contentLength": 0})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert!(link["headers"].get("Content-Length").is_none());
}

#[tokio::test]
async fn test_slack_handoff_endpoint() {
    let app = make_app();
    let conversation_id = "6f1c2d3e-4a5b-4c6d-8e7f-9a0b1c2d3e4f";
    let brief = json!({
        "summary": "Alice wants a booking site",
        "goals": ["Online booking"],
        "constraints": []
    });

    let (status, first) = send(
        &app.router,
        "POST",
        "/api/handoff/slack",
        Some(json!({"conversationId": conversation_id, "brief": brief})),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(first["accepted"], true);
    assert!(first["messageTs"].is_string());

    let (status, second) = send(
        &app.router,
        "POST",
        "/api/handoff/slack",
        Some(json!({"conversationId": conversation_id, "brief": brief})),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(second["messageTs"], first["messageTs"]);
    assert_eq!(app.slack.posts.load(Ordering::SeqCst), 1);

    let (status, rejected) = send(
        &app.router,
        "POST",
        "/api/handoff/slack",
        Some(json!({
            "conversationId": "1a2b3c4d-0000-4000-8000-000000000001",
            "brief": brief,
            "destinationChannel": "#ghost"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(rejected["accepted"], false);

    let (status, failed) = send(
        &app.router,
        "POST",
        "/api/handoff/slack",
        Some(json!({
            "conversationId": "1a2b3c4d-0000-4000-8000-000000000002",
            "brief": brief,
            "destinationChannel": "#down"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(failed["error"], "handoff_failed");

    let (status, body) = send(
        &app.router,
        "POST",
        "/api/handoff/slack",
        Some(json!({"conversationId": "nope", "brief": {"summary": ""}})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["details"].as_array().unwrap().len(), 2);
}
