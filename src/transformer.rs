use async_trait::async_trait;
use base64::Engine;
use bytes::Bytes;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{error, info, warn};

use crate::config::ImageConfig;
use crate::cost::CostEstimator;
use crate::deadline::degrade;
use crate::error::ProviderError;
use crate::models::{ImageDimensions, RoomAnalysis, RoomSize, TransformResult};
use crate::prompts::BuiltPrompt;

// Fixed generation parameters; these do not vary per request.
const STRENGTH: f64 = 0.75;
const NUM_INFERENCE_STEPS: u32 = 28;
const GUIDANCE_SCALE: f64 = 7.5;

/// Everything one transform call needs. Owned so the call can outlive the
/// request that started it.
#[derive(Debug, Clone)]
pub struct TransformJob {
    pub image: Bytes,
    pub room_size: RoomSize,
    pub analysis: RoomAnalysis,
    pub dimensions: Option<ImageDimensions>,
    pub prompt: BuiltPrompt,
}

/// Turns a room photo into a staged rendering.
#[async_trait]
pub trait ImageTransformer: Send + Sync {
    async fn transform(&self, job: TransformJob) -> Result<TransformResult, ProviderError>;
}

/// Image-to-image client for a fal-style synchronous endpoint. Without a
/// credential it runs in offline mode and returns the placeholder asset.
pub struct FluxTransformer {
    client: Client,
    api_key: Option<String>,
    endpoint: String,
    fallback_url: String,
    estimator: CostEstimator,
}

impl FluxTransformer {
    pub fn new(config: &ImageConfig, estimator: CostEstimator) -> Self {
        Self {
            client: Client::new(),
            api_key: config.api_key.clone(),
            endpoint: format!(
                "{}/{}",
                config.base_url.trim_end_matches('/'),
                config.model_path.trim_start_matches('/')
            ),
            fallback_url: config.fallback_url.clone(),
            estimator,
        }
    }

    fn placeholder(&self, cost: f64) -> TransformResult {
        TransformResult { url: self.fallback_url.clone(), cost, timed_out: false }
    }

    async fn perform_api_call(&self, api_key: &str, job: &TransformJob) -> Result<TransformResult, ProviderError> {
        let data_url = format!(
            "data:image/jpeg;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(&job.image)
        );

        let request_body = json!({
            "image_url": data_url,
            "prompt": job.prompt.prompt,
            "strength": STRENGTH,
            "num_inference_steps": NUM_INFERENCE_STEPS,
            "guidance_scale": GUIDANCE_SCALE,
        });

        info!(
            "🎯 Staging {} (size {}, preset {}) via {}",
            job.analysis.room_type, job.room_size, job.prompt.preset, self.endpoint
        );

        let response = self.client
            .post(&self.endpoint)
            .header("Authorization", format!("Key {}", api_key))
            .json(&request_body)
            .send()
            .await
            .map_err(|e| ProviderError::Http(e.to_string()))?;

        let status = response.status();
        info!("📥 Response status: {}", status);
        let response_text = response.text().await
            .map_err(|e| ProviderError::Http(e.to_string()))?;

        // From here on the call was made, so the input-size cost is owed
        // even when no image comes back.
        let owed = self.estimator.estimate_image_cost(job.dimensions);

        let parsed: FluxResponse = match serde_json::from_str(&response_text) {
            Ok(parsed) => parsed,
            Err(e) => {
                error!("❌ Unparsable image response ({}): {}", status, e);
                return Ok(self.placeholder(owed));
            }
        };

        if let Some(reason) = parsed.provider_error() {
            error!("❌ Image provider reported error ({}): {}", status, reason);
            return Ok(self.placeholder(owed));
        }
        if !status.is_success() {
            error!("❌ Image provider returned status {} without error detail", status);
            return Ok(self.placeholder(owed));
        }

        let Some(image) = parsed.images.into_iter().find(|i| i.url.is_some()) else {
            warn!("⚠️ No image in provider response, falling back to placeholder");
            return Ok(self.placeholder(owed));
        };

        let billed = match (image.width, image.height) {
            (Some(w), Some(h)) => ImageDimensions::new(w, h),
            _ => None,
        }
        .or(job.dimensions);
        let cost = self.estimator.estimate_image_cost(billed);
        let url = image.url.unwrap_or_else(|| self.fallback_url.clone());

        info!("✅ Staged image generated (${:.6})", cost);
        Ok(TransformResult { url, cost, timed_out: false })
    }
}

#[async_trait]
impl ImageTransformer for FluxTransformer {
    async fn transform(&self, job: TransformJob) -> Result<TransformResult, ProviderError> {
        let Some(api_key) = self.api_key.as_deref() else {
            warn!("Image API key not configured, returning placeholder");
            return Ok(self.placeholder(0.0));
        };
        Ok(degrade("image_transformer", self.placeholder(0.0), self.perform_api_call(api_key, &job)).await)
    }
}

// --- Response Parsing Helpers ---

#[derive(Debug, Deserialize)]
struct FluxResponse {
    #[serde(default)]
    images: Vec<FluxImage>,
    #[serde(default)]
    error: Option<Value>,
    #[serde(default)]
    detail: Option<Value>,
}

impl FluxResponse {
    fn provider_error(&self) -> Option<String> {
        [&self.error, &self.detail]
            .into_iter()
            .flatten()
            .find(|v| !v.is_null())
            .map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
    }
}

#[derive(Debug, Deserialize)]
struct FluxImage {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    width: Option<u32>,
    #[serde(default)]
    height: Option<u32>,
}
