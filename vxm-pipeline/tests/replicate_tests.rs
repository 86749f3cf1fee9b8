//! Integration tests for the Replicate client against a fake predictions API

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use vxm_pipeline::error::PipelineError;
use vxm_pipeline::reference::StemKind;
use vxm_pipeline::services::replicate::{CONVERSION_MODEL_VERSION, SEPARATION_MODEL_VERSION};
use vxm_pipeline::services::{
    ReplicateClient, SeparationService, ServiceOutput, VoiceConversionService, CONVERSION_PROFILE,
};

const AUDIO_URI: &str = "data:audio/wav;base64,UklGRg==";
const OUTPUT_URL: &str = "https://replicate.delivery/pbxt/out.wav";

/// Request seen by the fake create endpoint
#[derive(Debug, Clone)]
struct CreateRequest {
    authorization: Option<String>,
    prefer: Option<String>,
    body: Value,
}

#[derive(Clone)]
struct FakeReplicate {
    create_status: StatusCode,
    create_body: Value,
    polls: Arc<Mutex<VecDeque<Value>>>,
    poll_count: Arc<Mutex<usize>>,
    created: Arc<Mutex<Option<CreateRequest>>>,
}

impl FakeReplicate {
    fn new(create_status: StatusCode, create_body: Value, polls: Vec<Value>) -> Self {
        Self {
            create_status,
            create_body,
            polls: Arc::new(Mutex::new(polls.into())),
            poll_count: Arc::new(Mutex::new(0)),
            created: Arc::new(Mutex::new(None)),
        }
    }

    fn created(&self) -> CreateRequest {
        self.created.lock().unwrap().clone().expect("no prediction created")
    }

    fn poll_count(&self) -> usize {
        *self.poll_count.lock().unwrap()
    }
}

async fn create_prediction(
    State(fake): State<FakeReplicate>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    *fake.created.lock().unwrap() = Some(CreateRequest {
        authorization: header("authorization"),
        prefer: header("prefer"),
        body,
    });
    (fake.create_status, Json(fake.create_body.clone()))
}

async fn get_prediction(
    State(fake): State<FakeReplicate>,
    Path(id): Path<String>,
) -> Json<Value> {
    *fake.poll_count.lock().unwrap() += 1;
    let next = fake.polls.lock().unwrap().pop_front();
    Json(next.unwrap_or_else(|| json!({ "id": id, "status": "processing" })))
}

async fn spawn_server(fake: FakeReplicate) -> SocketAddr {
    let app = Router::new()
        .route("/v1/predictions", post(create_prediction))
        .route("/v1/predictions/:id", get(get_prediction))
        .with_state(fake);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn client_for(addr: SocketAddr) -> ReplicateClient {
    ReplicateClient::new("test-token".to_string())
        .unwrap()
        .with_base_url(format!("http://{}/", addr))
        .with_poll_interval(Duration::from_millis(10))
}

fn upstream_message(err: PipelineError) -> String {
    match err {
        PipelineError::Upstream(message) => message,
        other => panic!("expected upstream error, got {:?}", other),
    }
}

// =============================================================================
// Successful runs
// =============================================================================

#[tokio::test]
async fn test_convert_polls_until_succeeded_and_returns_locator() {
    let fake = FakeReplicate::new(
        StatusCode::CREATED,
        json!({ "id": "pred-1", "status": "starting" }),
        vec![
            json!({ "id": "pred-1", "status": "processing" }),
            json!({ "id": "pred-1", "status": "succeeded", "output": OUTPUT_URL }),
        ],
    );
    let addr = spawn_server(fake.clone()).await;

    let output = client_for(addr)
        .convert(AUDIO_URI, &CONVERSION_PROFILE)
        .await
        .unwrap();

    match output {
        ServiceOutput::Locator(url) => assert_eq!(url.as_str(), OUTPUT_URL),
        other => panic!("expected locator, got {:?}", other),
    }
    assert_eq!(fake.poll_count(), 2);

    let created = fake.created();
    assert_eq!(created.authorization.as_deref(), Some("Bearer test-token"));
    assert_eq!(created.prefer.as_deref(), Some("wait"));
    assert_eq!(created.body["version"], CONVERSION_MODEL_VERSION);
    assert_eq!(created.body["input"]["input_audio"], AUDIO_URI);
    assert_eq!(created.body["input"]["rvc_model"], "CUSTOM");
    assert_eq!(
        created.body["input"]["custom_rvc_model_download_url"],
        CONVERSION_PROFILE.voice_model_url
    );
}

#[tokio::test]
async fn test_run_follows_prediction_get_url() {
    // The create response is built after binding so it can carry the poll URL
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let fake = FakeReplicate::new(
        StatusCode::CREATED,
        json!({
            "id": "pred-2",
            "status": "processing",
            "urls": { "get": format!("http://{}/v1/predictions/elsewhere", addr) }
        }),
        vec![json!({ "id": "pred-2", "status": "succeeded", "output": [OUTPUT_URL] })],
    );
    let app = Router::new()
        .route("/v1/predictions", post(create_prediction))
        .route("/v1/predictions/:id", get(get_prediction))
        .with_state(fake.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let output = client_for(addr)
        .run(CONVERSION_MODEL_VERSION, json!({}))
        .await
        .unwrap();

    assert_eq!(output, json!([OUTPUT_URL]));
    assert_eq!(fake.poll_count(), 1);
}

#[tokio::test]
async fn test_separate_reads_named_stems_without_polling() {
    let fake = FakeReplicate::new(
        StatusCode::CREATED,
        json!({
            "id": "pred-3",
            "status": "succeeded",
            "output": {
                "vocals": "https://replicate.delivery/pbxt/vocals.wav",
                "drums": "https://replicate.delivery/pbxt/drums.wav",
                "bass": null,
                "piano": "https://replicate.delivery/pbxt/piano.wav"
            }
        }),
        Vec::new(),
    );
    let addr = spawn_server(fake.clone()).await;

    let stems = client_for(addr).separate(AUDIO_URI).await.unwrap();

    assert_eq!(stems.kinds(), vec![StemKind::Vocals, StemKind::Drums]);
    assert_eq!(fake.poll_count(), 0);
    let created = fake.created();
    assert_eq!(created.body["version"], SEPARATION_MODEL_VERSION);
    assert_eq!(created.body["input"]["audio"], AUDIO_URI);
}

// =============================================================================
// Failures
// =============================================================================

#[tokio::test]
async fn test_failed_prediction_surfaces_error_text() {
    let fake = FakeReplicate::new(
        StatusCode::CREATED,
        json!({ "id": "pred-4", "status": "starting" }),
        vec![json!({ "id": "pred-4", "status": "failed", "error": "CUDA out of memory" })],
    );
    let addr = spawn_server(fake).await;

    let err = client_for(addr)
        .convert(AUDIO_URI, &CONVERSION_PROFILE)
        .await
        .unwrap_err();

    let message = upstream_message(err);
    assert!(message.contains("pred-4"), "{}", message);
    assert!(message.contains("CUDA out of memory"), "{}", message);
}

#[tokio::test]
async fn test_canceled_prediction_without_error_is_upstream() {
    let fake = FakeReplicate::new(
        StatusCode::CREATED,
        json!({ "id": "pred-5", "status": "processing" }),
        vec![json!({ "id": "pred-5", "status": "canceled" })],
    );
    let addr = spawn_server(fake).await;

    let err = client_for(addr)
        .run(CONVERSION_MODEL_VERSION, json!({}))
        .await
        .unwrap_err();

    let message = upstream_message(err);
    assert!(message.contains("Canceled"), "{}", message);
}

#[tokio::test]
async fn test_succeeded_without_output_is_upstream() {
    let fake = FakeReplicate::new(
        StatusCode::CREATED,
        json!({ "id": "pred-6", "status": "succeeded" }),
        Vec::new(),
    );
    let addr = spawn_server(fake).await;

    let err = client_for(addr)
        .convert(AUDIO_URI, &CONVERSION_PROFILE)
        .await
        .unwrap_err();

    assert!(upstream_message(err).contains("without output"));
}

#[tokio::test]
async fn test_rejected_create_reports_status() {
    let fake = FakeReplicate::new(
        StatusCode::UNPROCESSABLE_ENTITY,
        json!({ "detail": "invalid version" }),
        Vec::new(),
    );
    let addr = spawn_server(fake.clone()).await;

    let err = client_for(addr)
        .convert(AUDIO_URI, &CONVERSION_PROFILE)
        .await
        .unwrap_err();

    let message = upstream_message(err);
    assert!(message.contains("422"), "{}", message);
    assert!(message.contains("invalid version"), "{}", message);
    assert_eq!(fake.poll_count(), 0);
}
