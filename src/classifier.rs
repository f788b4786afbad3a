use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::config::VisionConfig;
use crate::cost::{CostEstimator, VisionUsage};
use crate::deadline::degrade;
use crate::error::ProviderError;
use crate::models::{RoomAnalysis, RoomType};

const CLASSIFY_INSTRUCTION: &str = r#"Analyze this room image. Respond with JSON only:
{
  "roomType": "living room|bedroom|kitchen|bathroom|dining room|office",
  "features": ["list of notable features"],
  "currentStyle": "description of current style"
}"#;

/// Classifies the room in an uploaded photo.
#[async_trait]
pub trait RoomClassifier: Send + Sync {
    async fn classify(&self, image: &[u8]) -> Result<RoomAnalysis, ProviderError>;
}

/// Chat-completion vision client. Without a credential it runs in offline
/// mode and always answers with the default analysis.
pub struct VisionClassifier {
    client: Client,
    api_key: Option<String>,
    base_url: String,
    model: String,
    estimator: CostEstimator,
}

impl VisionClassifier {
    pub fn new(config: &VisionConfig, estimator: CostEstimator) -> Self {
        Self {
            client: Client::new(),
            api_key: config.api_key.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            estimator,
        }
    }

    async fn perform_api_call(&self, api_key: &str, image: &[u8]) -> Result<RoomAnalysis, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        let data_url = format!(
            "data:image/jpeg;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(image)
        );

        let request_body = json!({
            "model": self.model,
            "messages": [{
                "role": "user",
                "content": [
                    { "type": "image_url", "image_url": { "url": data_url } },
                    { "type": "text", "text": CLASSIFY_INSTRUCTION }
                ]
            }]
        });

        info!("🔗 Classifying room via {} ({} image bytes)", url, image.len());

        let response = self.client
            .post(&url)
            .bearer_auth(api_key)
            .json(&request_body)
            .send()
            .await
            .map_err(|e| ProviderError::Http(e.to_string()))?;

        let status = response.status();
        let response_text = response.text().await
            .map_err(|e| ProviderError::Http(e.to_string()))?;

        if !status.is_success() {
            return Err(ProviderError::Http(format!("status={} body={}", status, response_text)));
        }

        let parsed: ChatResponse = serde_json::from_str(&response_text)
            .map_err(|e| ProviderError::Malformed(format!("chat body: {}", e)))?;

        let content = parsed.choices.first()
            .and_then(|c| c.message.content.as_deref())
            .ok_or_else(|| ProviderError::Malformed("no message content".into()))?;

        let reply: ClassifierReply = serde_json::from_str(strip_code_fence(content))
            .map_err(|e| ProviderError::Malformed(format!("classifier reply: {}", e)))?;

        let room_type = reply.room_type.as_deref()
            .and_then(RoomType::from_label)
            .unwrap_or_default();
        let usage = parsed.usage.as_ref().and_then(VisionUsage::from_json);
        let cost = self.estimator.estimate_vision_cost(usage);

        debug!(current_style = ?reply.current_style, "Classifier reply parsed");
        info!("✅ Room classified as '{}' ({} features, ${:.6})", room_type, reply.features.len(), cost);

        Ok(RoomAnalysis { room_type, features: reply.features, cost })
    }
}

#[async_trait]
impl RoomClassifier for VisionClassifier {
    async fn classify(&self, image: &[u8]) -> Result<RoomAnalysis, ProviderError> {
        let Some(api_key) = self.api_key.as_deref() else {
            warn!("Vision API key not configured, using default room type");
            return Ok(RoomAnalysis::default());
        };
        Ok(degrade("room_classifier", RoomAnalysis::default(), self.perform_api_call(api_key, image)).await)
    }
}

/// Models often wrap JSON replies in a Markdown fence.
fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

// --- Response Parsing Helpers ---

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct Choice { message: Message }

#[derive(Debug, Deserialize)]
struct Message { #[serde(default)] content: Option<String> }

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClassifierReply {
    #[serde(default)]
    room_type: Option<String>,
    #[serde(default)]
    features: Vec<String>,
    #[serde(default)]
    current_style: Option<String>,
}
