//! Integration tests for the HTTP surface
//!
//! Routes are exercised in-process with `oneshot` against a pipeline wired to
//! fake external services.

mod helpers;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::util::ServiceExt; // for `oneshot` method

use helpers::{age_file, wav_bytes, AudioConfig, FakeConversion, FakeSeparation, TestEnv};
use vxm_pipeline::reference::StemKind;
use vxm_pipeline::store::Reclaimer;
use vxm_pipeline::{build_router, AppState};

const CONVERTED_URL: &str = "https://replicate.delivery/pbxt/xyz/out.wav";
const BOUNDARY: &str = "vxm-test-boundary";

/// Test helper: pipeline with full stems and a locator-returning converter
async fn setup_env() -> TestEnv {
    TestEnv::new(
        FakeSeparation::with_stems(&[
            StemKind::Vocals,
            StemKind::Drums,
            StemKind::Bass,
            StemKind::Other,
        ]),
        FakeConversion::locator(CONVERTED_URL),
    )
    .await
}

/// Test helper: router over `env` with the given upload limit
fn setup_app(env: &TestEnv, max_upload_bytes: usize) -> Router {
    let reclaimer = Reclaimer::new(
        Arc::clone(&env.store),
        Duration::from_secs(3600),
        Duration::from_secs(600),
    );
    build_router(AppState::new(
        Arc::clone(&env.pipeline),
        reclaimer,
        max_upload_bytes,
    ))
}

/// Test helper: Extract JSON body from response
async fn extract_json(body: Body) -> Value {
    let bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .expect("Should read body");
    serde_json::from_slice(&bytes).expect("Should parse JSON")
}

fn json_request(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get_request(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

/// Test helper: multipart/form-data with an `audio` file and optional text fields
fn multipart_request(
    uri: &str,
    file_name: &str,
    bytes: &[u8],
    fields: &[(&str, &str)],
) -> Request<Body> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
                BOUNDARY, name, value
            )
            .as_bytes(),
        );
    }
    body.extend_from_slice(
        format!(
            "--{}\r\nContent-Disposition: form-data; name=\"audio\"; filename=\"{}\"\r\nContent-Type: application/octet-stream\r\n\r\n",
            BOUNDARY, file_name
        )
        .as_bytes(),
    );
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());

    Request::builder()
        .method("POST")
        .uri(uri)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(body))
        .unwrap()
}

fn song() -> Vec<u8> {
    wav_bytes(&AudioConfig {
        duration_seconds: 0.25,
        ..Default::default()
    })
}

// =============================================================================
// Health
// =============================================================================

#[tokio::test]
async fn test_health_endpoint() {
    let env = setup_env().await;
    let app = setup_app(&env, 1 << 20);

    let response = app.oneshot(get_request("/health")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = extract_json(response.into_body()).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["module"], "vxm-pipeline");
    assert!(body["version"].is_string());
    assert!(body["uptime_seconds"].is_u64());
    assert_eq!(body["artifact_ttl_seconds"], 3600);
    assert_eq!(body["max_upload_bytes"], 1 << 20);
}

// =============================================================================
// Retrieval
// =============================================================================

#[tokio::test]
async fn test_audio_retrieval_headers() {
    let env = setup_env().await;
    std::fs::write(env.artifact_dir().join("clip.mp3"), b"ID3 bytes").unwrap();
    let app = setup_app(&env, 1 << 20);

    let response = app
        .oneshot(get_request("/api/audio?file=clip.mp3"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers();
    assert_eq!(headers[header::CONTENT_TYPE], "audio/mpeg");
    assert_eq!(headers[header::CACHE_CONTROL], "no-store");
    assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&bytes[..], b"ID3 bytes");
}

#[tokio::test]
async fn test_audio_retrieval_cannot_escape_store() {
    let env = setup_env().await;
    std::fs::write(env.artifact_dir().join("passwd"), b"stored artifact").unwrap();
    let app = setup_app(&env, 1 << 20);

    let response = app
        .oneshot(get_request("/api/audio?file=..%2F..%2Fetc%2Fpasswd"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&bytes[..], b"stored artifact");
}

#[tokio::test]
async fn test_audio_retrieval_errors() {
    let env = setup_env().await;
    let app = setup_app(&env, 1 << 20);

    let response = app
        .clone()
        .oneshot(get_request("/api/audio?file=missing.wav"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = extract_json(response.into_body()).await;
    assert_eq!(body["error"]["code"], "NOT_FOUND");

    let response = app.oneshot(get_request("/api/audio")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

// =============================================================================
// Upload
// =============================================================================

#[tokio::test]
async fn test_upload_then_reupload_is_cached() {
    let env = setup_env().await;
    let app = setup_app(&env, 1 << 20);
    let bytes = song();

    let response = app
        .clone()
        .oneshot(multipart_request("/api/upload-audio", "Song.wav", &bytes, &[]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let first = extract_json(response.into_body()).await;
    assert_eq!(first["success"], true);
    assert_eq!(first["cached"], false);
    let filename = first["filename"].as_str().unwrap().to_string();
    assert_eq!(
        first["audioUrl"],
        format!("/api/audio?file={}", filename).as_str()
    );

    let response = app
        .oneshot(multipart_request("/api/upload-audio", "other.wav", &bytes, &[]))
        .await
        .unwrap();
    let second = extract_json(response.into_body()).await;
    assert_eq!(second["cached"], true);
    assert_eq!(second["filename"], filename.as_str());
    assert_eq!(env.artifacts(), vec![filename]);
}

#[tokio::test]
async fn test_upload_rejects_non_audio() {
    let env = setup_env().await;
    let app = setup_app(&env, 1 << 20);

    let response = app
        .oneshot(multipart_request(
            "/api/upload-audio",
            "notes.pdf",
            b"%PDF-1.7\nnot audio at all",
            &[],
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = extract_json(response.into_body()).await;
    assert_eq!(body["error"]["code"], "BAD_REQUEST");
    assert!(env.artifacts().is_empty());
}

#[tokio::test]
async fn test_upload_over_limit_is_rejected() {
    let env = setup_env().await;
    let app = setup_app(&env, 1024);

    let response = app
        .oneshot(multipart_request("/api/upload-audio", "big.wav", &song(), &[]))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert!(env.artifacts().is_empty());
}

#[tokio::test]
async fn test_upload_without_audio_field() {
    let env = setup_env().await;
    let app = setup_app(&env, 1 << 20);

    let body = format!(
        "--{b}\r\nContent-Disposition: form-data; name=\"separate\"\r\n\r\ntrue\r\n--{b}--\r\n",
        b = BOUNDARY
    );
    let request = Request::builder()
        .method("POST")
        .uri("/api/upload-audio")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(body))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_process_with_separation_returns_every_step() {
    let env = TestEnv::new(
        FakeSeparation::with_stems(&[
            StemKind::Vocals,
            StemKind::Drums,
            StemKind::Bass,
            StemKind::Other,
        ]),
        FakeConversion::streaming(),
    )
    .await;
    let app = setup_app(&env, 1 << 20);

    let response = app
        .oneshot(multipart_request(
            "/api/process",
            "track.wav",
            &song(),
            &[("separate", "true")],
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = extract_json(response.into_body()).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["degraded"], false);
    assert!(body["convertedUrl"]
        .as_str()
        .unwrap()
        .starts_with("/api/audio?file=converted-"));
    assert_eq!(body["instrumentalUrl"]["type"], "multi");
    assert_eq!(body["instrumentalUrl"]["stems"].as_array().unwrap().len(), 3);
    assert!(body["vocalsUrl"]
        .as_str()
        .unwrap()
        .starts_with("/api/audio?file=vocals-"));
    assert_eq!(body["resultUrl"], body["combinedUrl"]);
    assert!(body["combinedUrl"]
        .as_str()
        .unwrap()
        .starts_with("/api/audio?file=combined-"));
}

#[tokio::test]
async fn test_process_without_separation() {
    let env = setup_env().await;
    let app = setup_app(&env, 1 << 20);

    let response = app
        .oneshot(multipart_request("/api/process", "track.wav", &song(), &[]))
        .await
        .unwrap();

    let body = extract_json(response.into_body()).await;
    assert_eq!(body["resultUrl"], CONVERTED_URL);
    assert!(body.get("vocalsUrl").is_none());
    assert!(body.get("combinedUrl").is_none());
    assert_eq!(env.separation.calls(), 0);
}

// =============================================================================
// Stage endpoints
// =============================================================================

#[tokio::test]
async fn test_separate_vocals_requires_input() {
    let env = setup_env().await;
    let app = setup_app(&env, 1 << 20);

    let response = app
        .oneshot(json_request("/api/separate-vocals", json!({})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = extract_json(response.into_body()).await;
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("is required"));
}

#[tokio::test]
async fn test_separate_vocals_by_filename() {
    let env = setup_env().await;
    let ingest = env
        .pipeline
        .ingest(vxm_pipeline::orchestrator::Upload::new(song()))
        .await
        .unwrap();
    let app = setup_app(&env, 1 << 20);

    let response = app
        .clone()
        .oneshot(json_request(
            "/api/separate-vocals",
            json!({ "filename": ingest.filename }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let first = extract_json(response.into_body()).await;
    assert_eq!(first["cached"], false);

    let response = app
        .oneshot(json_request(
            "/api/separate-vocals",
            json!({ "audioUrl": ingest.reference.to_string() }),
        ))
        .await
        .unwrap();
    let second = extract_json(response.into_body()).await;
    assert_eq!(second["cached"], true);
    assert_eq!(second["vocalsUrl"], first["vocalsUrl"]);
}

#[tokio::test]
async fn test_separate_unknown_artifact_is_not_found() {
    let env = setup_env().await;
    let app = setup_app(&env, 1 << 20);

    let response = app
        .oneshot(json_request(
            "/api/separate-vocals",
            json!({ "filename": "does-not-exist.mp3" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_convert_voice_returns_locator() {
    let env = setup_env().await;
    let app = setup_app(&env, 1 << 20);

    let response = app
        .oneshot(json_request(
            "/api/convert-voice",
            json!({ "audioUrl": "https://cdn.example.com/vocals.wav" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = extract_json(response.into_body()).await;
    assert_eq!(body["convertedUrl"], CONVERTED_URL);
    assert_eq!(body["cached"], false);
}

#[tokio::test]
async fn test_combine_audio_without_instrumental_echoes_vocals() {
    let env = setup_env().await;
    let app = setup_app(&env, 1 << 20);

    let response = app
        .oneshot(json_request(
            "/api/combine-audio",
            json!({ "vocalsUrl": CONVERTED_URL, "instrumentalUrl": null }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = extract_json(response.into_body()).await;
    assert_eq!(body["combinedUrl"], CONVERTED_URL);
}

#[tokio::test]
async fn test_combine_audio_rejects_malformed_instrumental() {
    let env = setup_env().await;
    let app = setup_app(&env, 1 << 20);

    let response = app
        .oneshot(json_request(
            "/api/combine-audio",
            json!({ "vocalsUrl": "/api/audio?file=v.wav", "instrumentalUrl": {"type": "single"} }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

// =============================================================================
// Maintenance
// =============================================================================

#[tokio::test]
async fn test_sweep_endpoint_reclaims_stale_artifacts() {
    let env = setup_env().await;
    let stale = env.artifact_dir().join("stale.wav");
    std::fs::write(&stale, b"old").unwrap();
    age_file(&stale, Duration::from_secs(2 * 3600));
    std::fs::write(env.artifact_dir().join("fresh.wav"), b"new").unwrap();
    let app = setup_app(&env, 1 << 20);

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/maintenance/sweep")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = extract_json(response.into_body()).await;
    assert_eq!(body["removed"], 1);
    assert_eq!(body["maxAgeSecs"], 3600);
    assert_eq!(env.artifacts(), vec!["fresh.wav".to_string()]);
}
