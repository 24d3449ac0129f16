use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, Response};
use http_body_util::BodyExt;
use mockall::mock;
use realtime_relay::testing::FakeVendor;
use realtime_relay::{SessionManager, SessionState};
use realtime_relay_utils::{Transcode, TranscodeError};

use crate::routes::create_router;
use crate::state::AppState;

mock! {
    pub Transcoder {}

    #[async_trait]
    impl Transcode for Transcoder {
        async fn transcode(&self, input: Vec<u8>) -> Result<Vec<u8>, TranscodeError>;
    }
}

pub const TEST_UPLOAD_LIMIT: usize = 1024 * 1024;

pub fn manager_for(vendor: &FakeVendor) -> Arc<SessionManager> {
    Arc::new(SessionManager::new(vendor.config()).unwrap())
}

pub fn app(manager: Arc<SessionManager>, transcoder: MockTranscoder) -> Router {
    create_router(AppState::new(manager, Arc::new(transcoder)), TEST_UPLOAD_LIMIT)
}

/// A transcoder that fails the test if it is ever called.
pub fn unused_transcoder() -> MockTranscoder {
    let mut transcoder = MockTranscoder::new();
    transcoder.expect_transcode().never();
    transcoder
}

pub async fn connect(manager: &SessionManager) {
    manager.init_session().await.unwrap();
    assert!(manager.start().await.unwrap());

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while manager.state().await != SessionState::Connected {
        assert!(tokio::time::Instant::now() < deadline, "upstream never connected");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

pub async fn body_text(response: Response<Body>) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

pub fn json_post(uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

pub fn multipart_post(uri: &str, field: &str, bytes: &[u8]) -> Request<Body> {
    let boundary = "relay-test-boundary";
    let mut body = format!(
        "--{boundary}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"clip.webm\"\r\nContent-Type: audio/webm\r\n\r\n"
    )
    .into_bytes();
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", format!("multipart/form-data; boundary={boundary}"))
        .body(Body::from(body))
        .unwrap()
}
