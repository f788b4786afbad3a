//! Per-call api cost estimation from provider usage metadata.
//!
//! Both estimators are total: bad or missing input falls back to a
//! configured constant, so a caller always gets a finite, non-negative number.

use serde_json::Value;

use crate::models::ImageDimensions;

/// Per-unit rates. Defaults match published list prices of the default models.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CostRates {
    /// USD per 1M input tokens of the vision model.
    pub vision_input_per_mtok: f64,
    /// USD per 1M output tokens of the vision model.
    pub vision_output_per_mtok: f64,
    /// Flat USD charged per classify call when usage is unknown.
    pub vision_fallback: f64,
    /// USD per output megapixel of the image model.
    pub image_per_megapixel: f64,
    /// Megapixels assumed when dimensions are unknown.
    pub image_default_megapixels: f64,
}

impl Default for CostRates {
    fn default() -> Self {
        Self {
            vision_input_per_mtok: 0.25,
            vision_output_per_mtok: 1.25,
            vision_fallback: 0.0005,
            image_per_megapixel: 0.025,
            image_default_megapixels: 1.0,
        }
    }
}

/// Token counts reported by a chat-completion response.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VisionUsage {
    pub input_tokens: f64,
    pub output_tokens: f64,
}

impl VisionUsage {
    /// Reads `prompt_tokens` / `completion_tokens` (or the `input_tokens` /
    /// `output_tokens` spelling). `None` if either is absent or not a number.
    pub fn from_json(usage: &Value) -> Option<Self> {
        let field = |a: &str, b: &str| usage.get(a).or_else(|| usage.get(b)).and_then(Value::as_f64);
        Some(Self {
            input_tokens: field("prompt_tokens", "input_tokens")?,
            output_tokens: field("completion_tokens", "output_tokens")?,
        })
    }

    fn is_valid(&self) -> bool {
        [self.input_tokens, self.output_tokens].iter().all(|n| n.is_finite() && *n >= 0.0)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CostEstimator {
    rates: CostRates,
}

impl CostEstimator {
    pub fn new(rates: CostRates) -> Self {
        Self { rates }
    }

    pub fn rates(&self) -> &CostRates {
        &self.rates
    }

    pub fn estimate_vision_cost(&self, usage: Option<VisionUsage>) -> f64 {
        match usage {
            Some(u) if u.is_valid() => round6(
                u.input_tokens / 1e6 * self.rates.vision_input_per_mtok
                    + u.output_tokens / 1e6 * self.rates.vision_output_per_mtok,
            ),
            _ => self.rates.vision_fallback,
        }
    }

    pub fn estimate_image_cost(&self, dimensions: Option<ImageDimensions>) -> f64 {
        let megapixels = dimensions
            .filter(|d| d.width > 0 && d.height > 0)
            .map(|d| d.megapixels())
            .unwrap_or(self.rates.image_default_megapixels);
        round6(megapixels * self.rates.image_per_megapixel)
    }
}

pub fn round6(value: f64) -> f64 {
    if !value.is_finite() {
        return 0.0;
    }
    (value * 1e6).round() / 1e6
}
