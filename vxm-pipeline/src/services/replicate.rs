//! Replicate predictions client
//!
//! Creates a prediction with `Prefer: wait`, then polls its `urls.get`
//! endpoint until it reaches a terminal status. There is no overall deadline:
//! once issued, a prediction is awaited to completion.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

use super::{
    ConversionProfile, SeparatedStems, SeparationService, ServiceOutput, VoiceConversionService,
};
use crate::error::{PipelineError, PipelineResult};
use crate::reference::StemKind;

const REPLICATE_BASE_URL: &str = "https://api.replicate.com";
const USER_AGENT: &str = concat!("vxm-pipeline/", env!("CARGO_PKG_VERSION"));
const POLL_INTERVAL_MS: u64 = 1000;

/// Demucs source separation model version
pub const SEPARATION_MODEL_VERSION: &str =
    "5a7041cc9b82e5a558fea6b3d7b12dea89625e89da33f0447bd727c2d0ab9e77";

/// RVC v2 voice conversion model version
pub const CONVERSION_MODEL_VERSION: &str =
    "d18e2e0a6a6d3af183cc09622cebba8555ec9a9e66983261fc64c8b1572b7dce";

#[derive(Debug, Serialize)]
struct CreatePrediction<'a> {
    version: &'a str,
    input: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Prediction {
    pub id: String,
    pub status: PredictionStatus,
    #[serde(default)]
    pub output: Option<Value>,
    #[serde(default)]
    pub error: Option<Value>,
    #[serde(default)]
    pub urls: Option<PredictionUrls>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PredictionUrls {
    pub get: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PredictionStatus {
    Starting,
    Processing,
    Succeeded,
    Failed,
    Canceled,
}

impl PredictionStatus {
    fn is_terminal(&self) -> bool {
        matches!(
            self,
            PredictionStatus::Succeeded | PredictionStatus::Failed | PredictionStatus::Canceled
        )
    }
}

/// Replicate API client
pub struct ReplicateClient {
    http_client: reqwest::Client,
    base_url: String,
    api_token: String,
    poll_interval: Duration,
}

impl ReplicateClient {
    pub fn new(api_token: String) -> PipelineResult<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| PipelineError::Internal(format!("HTTP client init failed: {}", e)))?;

        Ok(Self {
            http_client,
            base_url: REPLICATE_BASE_URL.to_string(),
            api_token,
            poll_interval: Duration::from_millis(POLL_INTERVAL_MS),
        })
    }

    /// Point the client at a different API host
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Run one prediction to completion and return its output value
    pub async fn run(&self, version: &str, input: Value) -> PipelineResult<Value> {
        let url = format!("{}/v1/predictions", self.base_url);
        tracing::debug!(version = %version, "Creating Replicate prediction");

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(&self.api_token)
            .header("Prefer", "wait")
            .json(&CreatePrediction { version, input })
            .send()
            .await
            .map_err(|e| PipelineError::Upstream(format!("Replicate request failed: {}", e)))?;

        let mut prediction = Self::parse_prediction(response).await?;
        tracing::info!(prediction_id = %prediction.id, status = ?prediction.status, "Replicate prediction created");

        while !prediction.status.is_terminal() {
            let poll_url = prediction
                .urls
                .as_ref()
                .and_then(|u| u.get.clone())
                .unwrap_or_else(|| format!("{}/v1/predictions/{}", self.base_url, prediction.id));

            tokio::time::sleep(self.poll_interval).await;

            let response = self
                .http_client
                .get(&poll_url)
                .bearer_auth(&self.api_token)
                .send()
                .await
                .map_err(|e| PipelineError::Upstream(format!("Replicate poll failed: {}", e)))?;

            prediction = Self::parse_prediction(response).await?;
            tracing::debug!(prediction_id = %prediction.id, status = ?prediction.status, "Replicate prediction polled");
        }

        match prediction.status {
            PredictionStatus::Succeeded => prediction.output.ok_or_else(|| {
                PipelineError::Upstream(format!(
                    "Replicate prediction {} succeeded without output",
                    prediction.id
                ))
            }),
            status => {
                let message = prediction
                    .error
                    .map(|e| match e {
                        Value::String(s) => s,
                        other => other.to_string(),
                    })
                    .unwrap_or_else(|| format!("prediction {:?}", status));
                Err(PipelineError::Upstream(format!(
                    "Replicate prediction {} failed: {}",
                    prediction.id, message
                )))
            }
        }
    }

    async fn parse_prediction(response: reqwest::Response) -> PipelineResult<Prediction> {
        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(PipelineError::Upstream(format!(
                "Replicate API error {}: {}",
                status.as_u16(),
                error_text
            )));
        }

        response
            .json()
            .await
            .map_err(|e| PipelineError::Upstream(format!("Replicate response parse error: {}", e)))
    }
}

/// Interpret a single output value as a locator
pub fn output_locator(value: &Value) -> PipelineResult<reqwest::Url> {
    let raw = match value {
        Value::String(s) => s.as_str(),
        Value::Array(items) => items.iter().find_map(Value::as_str).ok_or_else(|| {
            PipelineError::Upstream("Replicate returned an empty output list".to_string())
        })?,
        other => {
            return Err(PipelineError::Upstream(format!(
                "Unexpected Replicate output: {}",
                other
            )))
        }
    };

    reqwest::Url::parse(raw)
        .map_err(|e| PipelineError::Upstream(format!("Invalid output URL {}: {}", raw, e)))
}

/// Interpret a separation output object as named stems
///
/// Unknown keys and null values are skipped.
pub fn parse_stems(output: &Value) -> PipelineResult<SeparatedStems> {
    let object = output.as_object().ok_or_else(|| {
        PipelineError::Upstream(format!("Unexpected separation output: {}", output))
    })?;

    let mut stems = SeparatedStems::new();
    for (key, value) in object {
        if value.is_null() {
            continue;
        }
        let Ok(kind) = key.parse::<StemKind>() else {
            tracing::debug!(stem = %key, "Ignoring unknown stem");
            continue;
        };
        stems = stems.with(kind, ServiceOutput::Locator(output_locator(value)?));
    }

    Ok(stems)
}

#[async_trait]
impl SeparationService for ReplicateClient {
    async fn separate(&self, audio_uri: &str) -> PipelineResult<SeparatedStems> {
        let output = self
            .run(SEPARATION_MODEL_VERSION, json!({ "audio": audio_uri }))
            .await?;
        let stems = parse_stems(&output)?;
        tracing::info!(stems = ?stems.kinds(), "Separation output received");
        Ok(stems)
    }
}

#[async_trait]
impl VoiceConversionService for ReplicateClient {
    async fn convert(
        &self,
        audio_uri: &str,
        profile: &ConversionProfile,
    ) -> PipelineResult<ServiceOutput> {
        let input = json!({
            "input_audio": audio_uri,
            "rvc_model": "CUSTOM",
            "custom_rvc_model_download_url": profile.voice_model_url,
            "pitch_change": profile.pitch_change,
            "index_rate": profile.index_rate,
            "filter_radius": profile.filter_radius,
            "rms_mix_rate": profile.rms_mix_rate,
            "protect": profile.protect,
        });

        let output = self.run(CONVERSION_MODEL_VERSION, input).await?;
        Ok(ServiceOutput::Locator(output_locator(&output)?))
    }
}
