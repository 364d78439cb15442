// Integration tests for the HTTP API
//
// Requests are driven straight through the router with tower's `oneshot`;
// no socket is bound.

use anyhow::Result;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use lark_voice::{
    create_router, AppState, ChatStore, DevTokenIssuer, DeviceProfile, LoopbackBackend,
    LoopbackConfig, OrchestratorConfig, SessionOrchestrator, VoiceBackend,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

struct TestApp {
    router: Router,
    primary: Arc<LoopbackBackend>,
    fallback: Arc<LoopbackBackend>,
    _dir: TempDir,
}

async fn test_app() -> Result<TestApp> {
    let dir = TempDir::new()?;
    let primary = Arc::new(LoopbackBackend::new("primary", LoopbackConfig::default()));
    let fallback = Arc::new(LoopbackBackend::new("fallback", LoopbackConfig::default()));

    let primary_backend: Arc<dyn VoiceBackend> = primary.clone();
    let fallback_backend: Arc<dyn VoiceBackend> = fallback.clone();

    let orchestrator = SessionOrchestrator::new(
        OrchestratorConfig::default(),
        primary_backend,
        fallback_backend,
        Arc::new(DevTokenIssuer::default()),
        &DeviceProfile::default(),
    )
    .await;
    let store = Arc::new(ChatStore::new(dir.path().join("chat")));

    Ok(TestApp {
        router: create_router(AppState::new(orchestrator, store)),
        primary,
        fallback,
        _dir: dir,
    })
}

async fn send(
    router: &Router,
    method: &str,
    uri: &str,
    body: Option<Value>,
) -> Result<(StatusCode, Value)> {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&body)?))?,
        None => builder.body(Body::empty())?,
    };

    let response = router.clone().oneshot(request).await?;
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
    };

    Ok((status, value))
}

#[tokio::test]
async fn test_health_check() -> Result<()> {
    let app = test_app().await?;

    let (status, body) = send(&app.router, "GET", "/health", None).await?;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!("OK"));
    Ok(())
}

#[tokio::test]
async fn test_connect_with_and_without_room() -> Result<()> {
    let app = test_app().await?;

    let (status, body) = send(
        &app.router,
        "POST",
        "/voice/connect",
        Some(json!({ "room_name": "kitchen" })),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["room_name"], "kitchen");
    assert_eq!(body["connection_state"], "connected");
    assert_eq!(body["active_backend"], "primary");

    let (status, body) = send(&app.router, "POST", "/voice/connect", None).await?;
    assert_eq!(status, StatusCode::OK);
    assert!(body["room_name"]
        .as_str()
        .unwrap_or_default()
        .starts_with("lark-room-"));
    Ok(())
}

#[tokio::test]
async fn test_voice_state_reports_fallback() -> Result<()> {
    let app = test_app().await?;
    app.primary.set_fail_connect(true);

    send(&app.router, "POST", "/voice/connect", None).await?;
    let (status, body) = send(&app.router, "GET", "/voice/state", None).await?;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["is_connected"], true);
    assert_eq!(body["is_using_fallback"], true);
    assert_eq!(body["active_backend"], "fallback");
    assert!(body["debug_info"]
        .as_array()
        .map_or(false, |lines| !lines.is_empty()));
    Ok(())
}

#[tokio::test]
async fn test_speak_failure_maps_to_bad_gateway() -> Result<()> {
    let app = test_app().await?;
    app.primary.set_fail_connect(true);
    app.fallback.set_fail_connect(true);

    let (status, body) = send(
        &app.router,
        "POST",
        "/voice/speak",
        Some(json!({ "text": "hello" })),
    )
    .await?;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"]["type"], "connection");
    assert_eq!(body["error"]["backend"], "fallback");
    Ok(())
}

#[tokio::test]
async fn test_speak_stop_and_disconnect() -> Result<()> {
    let app = test_app().await?;

    let (status, body) = send(
        &app.router,
        "POST",
        "/voice/speak",
        Some(json!({ "text": "hello", "voice": "alloy" })),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "spoken");
    assert_eq!(app.primary.spoken(), vec![("hello".to_string(), "ash".to_string())]);

    let (status, _) = send(&app.router, "POST", "/voice/stop", None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(app.primary.stop_calls(), 1);

    let (status, body) = send(&app.router, "POST", "/voice/disconnect", None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"]["connection_state"], "disconnected");
    assert_eq!(body["state"]["room_name"], "");
    Ok(())
}

#[tokio::test]
async fn test_microphone_denial_reports_false() -> Result<()> {
    let app = test_app().await?;
    app.primary.set_deny_microphone(true);

    let (status, body) = send(&app.router, "POST", "/voice/microphone", None).await?;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["granted"], false);
    Ok(())
}

#[tokio::test]
async fn test_chat_history_round_trip() -> Result<()> {
    let app = test_app().await?;

    let (status, body) = send(
        &app.router,
        "POST",
        "/chat/history",
        Some(json!({ "role": "user", "content": "hi", "timestamp": 1_000 })),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["saved"], true);

    let (status, _) = send(
        &app.router,
        "POST",
        "/chat/history",
        Some(json!({ "role": "assistant", "content": "" })),
    )
    .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(
        &app.router,
        "POST",
        "/chat/history",
        Some(json!({ "content": "who said this?", "timestamp": 2_000 })),
    )
    .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["type"], "storage_validation");
    assert_eq!(body["error"]["field"], "role");

    let (status, body) = send(&app.router, "GET", "/chat/history?limit=5", None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([{ "role": "user", "content": "hi", "timestamp": 1_000 }]));
    Ok(())
}

#[tokio::test]
async fn test_offline_queue_endpoints() -> Result<()> {
    let app = test_app().await?;

    let (status, body) = send(
        &app.router,
        "POST",
        "/chat/offline-queue",
        Some(json!({ "message": "" })),
    )
    .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["type"], "storage_validation");

    let (status, body) = send(
        &app.router,
        "POST",
        "/chat/offline-queue",
        Some(json!({ "message": "send later" })),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["message"], "send later");

    let (status, body) = send(&app.router, "GET", "/chat/offline-queue", None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().map(Vec::len), Some(1));

    let (status, _) = send(&app.router, "DELETE", "/chat/offline-queue", None).await?;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, body) = send(&app.router, "GET", "/chat/offline-queue", None).await?;
    assert_eq!(body, json!([]));
    Ok(())
}
