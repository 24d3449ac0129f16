//! HTTP endpoints the browser page drives.
//!
//! Validation failures are reported before connectivity, so a malformed request
//! gets a 400 whether or not the upstream socket is open.

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::extract::multipart::{Multipart, MultipartRejection};
use axum::response::Html;
use realtime_relay::SessionState;
use realtime_relay_types::builder;
use realtime_relay_utils::audio;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::error::{AppError, INVALID_EVENT_TYPE, NO_AUDIO, NO_MESSAGE};
use crate::state::AppState;

pub const STARTED: &str = "WebSocket connection started!";
pub const MESSAGE_SENT: &str = "Message sent!";
pub const TRUNCATION_SENT: &str = "Truncation event sent!";
pub const TRUNCATE_TYPE: &str = "conversation.item.truncate";
pub const AUDIO_FIELD: &str = "audio";

const INDEX_HTML: &str = include_str!("../../static/index.html");

#[derive(Debug, Serialize)]
pub struct InitSessionResponse {
    pub session_id: Option<String>,
    pub client_secret: String,
}

#[derive(Debug, Deserialize)]
struct SendRequest {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Serialize)]
pub struct ItemCreated {
    pub status: &'static str,
    pub event_id: String,
    pub item_id: String,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub state: SessionState,
}

pub async fn home() -> Html<&'static str> {
    Html(INDEX_HTML)
}

pub async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        state: state.manager.state().await,
    })
}

/// Mints an ephemeral session and hands its secret to the page.
pub async fn init_session(State(state): State<AppState>) -> Result<Json<InitSessionResponse>, AppError> {
    let credential = state.manager.init_session().await?;
    Ok(Json(InitSessionResponse {
        session_id: credential.session_id().map(str::to_string),
        client_secret: credential.client_secret().expose_secret().to_string(),
    }))
}

/// Always answers with the same text; without a credential nothing is started.
pub async fn start(State(state): State<AppState>) -> Result<&'static str, AppError> {
    state.manager.start().await?;
    Ok(STARTED)
}

pub async fn send(State(state): State<AppState>, body: Bytes) -> Result<&'static str, AppError> {
    let message = serde_json::from_slice::<SendRequest>(&body)
        .map(|request| request.message)
        .unwrap_or_default();
    if message.is_empty() {
        return Err(AppError::Validation(NO_MESSAGE));
    }

    let event = builder::text_response(&message);
    state.manager.send(&event).await?;
    info!(kind = event.kind(), event_id = event.event_id().unwrap_or("none"), "forwarded text message");
    Ok(MESSAGE_SENT)
}

/// Forwards a caller-built truncate event verbatim once its `type` checks out.
pub async fn truncate_audio(State(state): State<AppState>, body: Bytes) -> Result<&'static str, AppError> {
    let event = serde_json::from_slice::<Value>(&body).map_err(|_| AppError::Validation(INVALID_EVENT_TYPE))?;
    if event.get("type").and_then(Value::as_str) != Some(TRUNCATE_TYPE) {
        return Err(AppError::Validation(INVALID_EVENT_TYPE));
    }

    state.manager.send(&event).await?;
    info!(item_id = event.get("item_id").and_then(serde_json::Value::as_str).unwrap_or("unknown"), "forwarded truncation");
    Ok(TRUNCATION_SENT)
}

/// Transcodes an uploaded recording and appends it to the conversation as a user item.
pub async fn conversation_item_create(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<ItemCreated>, AppError> {
    let mut multipart = multipart.map_err(|_| AppError::Validation(NO_AUDIO))?;

    let mut upload = None;
    while let Some(field) = multipart.next_field().await? {
        if field.name() == Some(AUDIO_FIELD) {
            upload = Some(field.bytes().await?);
            break;
        }
    }
    let upload = upload.ok_or(AppError::Validation(NO_AUDIO))?;
    debug!(len = upload.len(), "received audio upload");

    let pcm = state.transcoder.transcode(upload.to_vec()).await?;
    debug!(len = pcm.len(), duration_ms = audio::pcm16_duration_ms(pcm.len()), "transcoded upload");

    let item = builder::create_audio_item(audio::encode(&pcm));
    state.manager.send(&item.event).await?;
    info!(kind = item.event.kind(), event_id = %item.event_id, item_id = %item.item_id, "forwarded audio item");

    Ok(Json(ItemCreated {
        status: "ok",
        event_id: item.event_id,
        item_id: item.item_id,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::*;
    use axum::http::StatusCode;
    use realtime_relay::testing::{CLIENT_SECRET, FakeVendor, IssueMode, SESSION_ID};
    use realtime_relay_utils::TranscodeError;
    use tower::ServiceExt;

    #[tokio::test]
    async fn home_serves_the_page() {
        let vendor = FakeVendor::start(IssueMode::Ok).await;
        let response = app(manager_for(&vendor), unused_transcoder())
            .oneshot(get("/"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_text(response).await.contains("<html"));
    }

    #[tokio::test]
    async fn status_reports_the_session_state() {
        let vendor = FakeVendor::start(IssueMode::Ok).await;
        let manager = manager_for(&vendor);
        let app = app(manager.clone(), unused_transcoder());

        let response = app.clone().oneshot(get("/status")).await.unwrap();
        assert_eq!(body_text(response).await, r#"{"state":"uninitialized"}"#);

        manager.init_session().await.unwrap();
        let response = app.oneshot(get("/status")).await.unwrap();
        assert_eq!(body_text(response).await, r#"{"state":"credentialed"}"#);
    }

    #[tokio::test]
    async fn init_session_returns_the_ephemeral_secret() {
        let vendor = FakeVendor::start(IssueMode::Ok).await;
        let response = app(manager_for(&vendor), unused_transcoder())
            .oneshot(json_post("/init_session", ""))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body: Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(body["session_id"], SESSION_ID);
        assert_eq!(body["client_secret"], CLIENT_SECRET);
    }

    #[tokio::test]
    async fn init_session_passes_vendor_errors_through() {
        let vendor = FakeVendor::start(IssueMode::Reject(401, "Incorrect API key provided")).await;
        let response = app(manager_for(&vendor), unused_transcoder())
            .oneshot(json_post("/init_session", ""))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = body_text(response).await;
        assert!(body.starts_with("Failed to create session: "));
        assert!(body.contains("Incorrect API key provided"));
    }

    #[tokio::test]
    async fn init_session_without_secret_is_a_server_error() {
        let vendor = FakeVendor::start(IssueMode::NoSecret).await;
        let response = app(manager_for(&vendor), unused_transcoder())
            .oneshot(json_post("/init_session", ""))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_text(response).await, "No client secret returned.");
    }

    #[tokio::test]
    async fn start_always_succeeds() {
        let vendor = FakeVendor::start(IssueMode::Ok).await;
        let manager = manager_for(&vendor);
        let response = app(manager.clone(), unused_transcoder())
            .oneshot(get("/start"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, STARTED);
        assert_eq!(manager.state().await, SessionState::Uninitialized);
    }

    #[tokio::test]
    async fn send_validates_before_checking_the_connection() {
        let vendor = FakeVendor::start(IssueMode::Ok).await;
        let app = app(manager_for(&vendor), unused_transcoder());

        for body in [r#"{"message":""}"#, r#"{}"#, "not json", r#"{"message":42}"#] {
            let response = app.clone().oneshot(json_post("/send", body)).await.unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "body: {body}");
            assert_eq!(body_text(response).await, NO_MESSAGE);
        }
    }

    #[tokio::test]
    async fn empty_messages_are_rejected_on_a_live_link() {
        let mut vendor = FakeVendor::start(IssueMode::Ok).await;
        let manager = manager_for(&vendor);
        connect(&manager).await;
        let app = app(manager, unused_transcoder());

        for body in [r#"{"message":""}"#, r#"{}"#] {
            let response = app.clone().oneshot(json_post("/send", body)).await.unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "body: {body}");
            assert_eq!(body_text(response).await, NO_MESSAGE);
        }
        assert!(vendor.try_received().is_none());

        // Events arrive in order, so the first one the vendor sees is the valid send.
        let response = app.oneshot(json_post("/send", r#"{"message":"ok"}"#)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let received = vendor.next_received().await.unwrap();
        assert_eq!(received["response"]["instructions"], "ok");
    }

    #[tokio::test]
    async fn send_without_connection_is_unavailable() {
        let vendor = FakeVendor::start(IssueMode::Ok).await;
        let manager = manager_for(&vendor);
        manager.init_session().await.unwrap();

        let response = app(manager, unused_transcoder())
            .oneshot(json_post("/send", r#"{"message":"hello"}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body_text(response).await, "WebSocket not connected.");
    }

    #[tokio::test]
    async fn send_forwards_instructions_upstream() {
        let mut vendor = FakeVendor::start(IssueMode::Ok).await;
        let manager = manager_for(&vendor);
        connect(&manager).await;

        let response = app(manager, unused_transcoder())
            .oneshot(json_post("/send", r#"{"message":"Explain lifetimes"}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, MESSAGE_SENT);

        let received = vendor.next_received().await.unwrap();
        assert_eq!(received["type"], "response.create");
        assert_eq!(received["response"]["modalities"], serde_json::json!(["text"]));
        assert_eq!(received["response"]["instructions"], "Explain lifetimes");
    }

    #[tokio::test]
    async fn truncate_rejects_other_event_types() {
        let vendor = FakeVendor::start(IssueMode::Ok).await;
        let manager = manager_for(&vendor);
        connect(&manager).await;
        let app = app(manager, unused_transcoder());

        for body in [
            r#"{"type":"response.create","item_id":"item_1","content_index":0,"audio_end_ms":1500}"#,
            r#"{"item_id":"item_1","audio_end_ms":1500}"#,
            "[]",
            "",
        ] {
            let response = app.clone().oneshot(json_post("/truncate_audio", body)).await.unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "body: {body}");
            assert_eq!(body_text(response).await, INVALID_EVENT_TYPE);
        }
    }

    #[tokio::test]
    async fn truncate_without_connection_is_unavailable() {
        let vendor = FakeVendor::start(IssueMode::Ok).await;
        let response = app(manager_for(&vendor), unused_transcoder())
            .oneshot(json_post(
                "/truncate_audio",
                r#"{"type":"conversation.item.truncate","item_id":"item_1","content_index":0,"audio_end_ms":1500}"#,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn truncate_is_forwarded_verbatim() {
        let mut vendor = FakeVendor::start(IssueMode::Ok).await;
        let manager = manager_for(&vendor);
        connect(&manager).await;

        let event = r#"{"event_id":"evt_7","type":"conversation.item.truncate","item_id":"item_1","content_index":0,"audio_end_ms":-20}"#;
        let response = app(manager, unused_transcoder())
            .oneshot(json_post("/truncate_audio", event))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, TRUNCATION_SENT);
        let received = vendor.next_received().await.unwrap();
        assert_eq!(received, serde_json::from_str::<Value>(event).unwrap());
    }

    #[tokio::test]
    async fn audio_upload_requires_the_audio_field() {
        let vendor = FakeVendor::start(IssueMode::Ok).await;
        let app = app(manager_for(&vendor), unused_transcoder());

        let response = app
            .clone()
            .oneshot(multipart_post("/conversation_item_create", "recording", b"webm"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_text(response).await, NO_AUDIO);

        let response = app
            .oneshot(json_post("/conversation_item_create", r#"{"audio":"AAAA"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_text(response).await, NO_AUDIO);
    }

    #[tokio::test]
    async fn undecodable_audio_never_reaches_the_vendor() {
        let mut vendor = FakeVendor::start(IssueMode::Ok).await;
        let manager = manager_for(&vendor);
        connect(&manager).await;

        let mut transcoder = MockTranscoder::new();
        transcoder.expect_transcode().times(1).returning(|_| {
            Err(TranscodeError::Failed {
                status: failed_status(),
                stderr: "pipe:0: Invalid data found when processing input".to_string(),
            })
        });

        let response = app(manager, transcoder)
            .oneshot(multipart_post("/conversation_item_create", AUDIO_FIELD, b"garbage"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_text(response).await;
        assert!(body.starts_with("Error processing audio"));
        assert!(body.contains("Invalid data found"));
        assert!(vendor.try_received().is_none());
    }

    #[tokio::test]
    async fn transcoded_audio_without_connection_is_unavailable() {
        let vendor = FakeVendor::start(IssueMode::Ok).await;
        let mut transcoder = MockTranscoder::new();
        transcoder
            .expect_transcode()
            .times(1)
            .returning(|_| Ok(vec![0u8; 480]));

        let response = app(manager_for(&vendor), transcoder)
            .oneshot(multipart_post("/conversation_item_create", AUDIO_FIELD, b"webm"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn audio_upload_is_forwarded_as_an_input_audio_item() {
        let mut vendor = FakeVendor::start(IssueMode::Ok).await;
        let manager = manager_for(&vendor);
        connect(&manager).await;

        let mut transcoder = MockTranscoder::new();
        transcoder
            .expect_transcode()
            .withf(|input| input.as_slice() == b"webm bytes")
            .times(1)
            .returning(|_| Ok(vec![1, 0, 2, 0]));

        let response = app(manager, transcoder)
            .oneshot(multipart_post("/conversation_item_create", AUDIO_FIELD, b"webm bytes"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body: Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(body["status"], "ok");
        let event_id = body["event_id"].as_str().unwrap();
        let item_id = body["item_id"].as_str().unwrap();
        assert_eq!(event_id.len(), 32);
        assert_eq!(item_id.len(), 32);

        let received = vendor.next_received().await.unwrap();
        assert_eq!(received["type"], "conversation.item.create");
        assert_eq!(received["event_id"], event_id);
        assert_eq!(received["item"]["id"], item_id);
        assert_eq!(received["item"]["role"], "user");
        assert_eq!(received["item"]["content"][0]["type"], "input_audio");
        assert_eq!(received["item"]["content"][0]["audio"], audio::encode(&[1, 0, 2, 0]));
    }

    #[cfg(unix)]
    fn failed_status() -> std::process::ExitStatus {
        use std::os::unix::process::ExitStatusExt;
        std::process::ExitStatus::from_raw(1 << 8)
    }

    #[cfg(windows)]
    fn failed_status() -> std::process::ExitStatus {
        use std::os::windows::process::ExitStatusExt;
        std::process::ExitStatus::from_raw(1)
    }
}
