use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::cost::CostRates;
use crate::deadline::DEFAULT_DEADLINE;

pub const DEFAULT_FALLBACK_IMAGE: &str = "/demo-after.jpg";

#[derive(Debug, Clone)]
pub struct VisionConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://openrouter.ai/api/v1".into(),
            model: "anthropic/claude-3-haiku".into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ImageConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model_path: String,
    pub fallback_url: String,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://fal.run".into(),
            model_path: "fal-ai/flux/dev/image-to-image".into(),
            fallback_url: DEFAULT_FALLBACK_IMAGE.into(),
        }
    }
}

/// Credentials for the hosted REST row store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub url: String,
    pub service_key: String,
}

/// Process configuration, read once at startup.
///
/// | Env Var                          | Default                          |
/// |----------------------------------|----------------------------------|
/// | `PORT`                           | `8080`                           |
/// | `OPENROUTER_API_KEY`             | unset (offline classifier)       |
/// | `OPENROUTER_API_BASE`            | `https://openrouter.ai/api/v1`   |
/// | `VISION_MODEL`                   | `anthropic/claude-3-haiku`       |
/// | `FAL_API_KEY`                    | unset (offline transformer)      |
/// | `FAL_API_BASE`                   | `https://fal.run`                |
/// | `IMAGE_MODEL_PATH`               | `fal-ai/flux/dev/image-to-image` |
/// | `FALLBACK_IMAGE_PATH`            | `/demo-after.jpg`                |
/// | `VISION_INPUT_COST_PER_MTOK`     | `0.25`                           |
/// | `VISION_OUTPUT_COST_PER_MTOK`    | `1.25`                           |
/// | `VISION_FALLBACK_COST`           | `0.0005`                         |
/// | `IMAGE_COST_PER_MEGAPIXEL`       | `0.025`                          |
/// | `IMAGE_DEFAULT_MEGAPIXELS`       | `1.0`                            |
/// | `GENERATION_TIMEOUT_MS`          | `20000`                          |
/// | `ADMIN_API_KEY`                  | unset (stats unprotected)        |
/// | `SUPABASE_URL` / `SUPABASE_SERVICE_KEY` | unset (in-memory store)   |
/// | `ANALYTICS_FALLBACK_CAPACITY`    | `1000`                           |
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub vision: VisionConfig,
    pub image: ImageConfig,
    pub rates: CostRates,
    pub generation_timeout: Duration,
    pub admin_key: Option<String>,
    pub store: Option<StoreConfig>,
    pub analytics_fallback_capacity: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            vision: VisionConfig::default(),
            image: ImageConfig::default(),
            rates: CostRates::default(),
            generation_timeout: DEFAULT_DEADLINE,
            admin_key: None,
            store: None,
            analytics_fallback_capacity: 1000,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the config from any name -> value lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let text = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = Self::default();
        let rates = defaults.rates;

        let store = match (text("SUPABASE_URL"), text("SUPABASE_SERVICE_KEY")) {
            (Some(url), Some(service_key)) => Some(StoreConfig { url, service_key }),
            _ => None,
        };

        Self {
            port: parse_or(text("PORT"), "PORT", defaults.port),
            vision: VisionConfig {
                api_key: text("OPENROUTER_API_KEY"),
                base_url: text("OPENROUTER_API_BASE").unwrap_or(defaults.vision.base_url),
                model: text("VISION_MODEL").unwrap_or(defaults.vision.model),
            },
            image: ImageConfig {
                api_key: text("FAL_API_KEY"),
                base_url: text("FAL_API_BASE").unwrap_or(defaults.image.base_url),
                model_path: text("IMAGE_MODEL_PATH").unwrap_or(defaults.image.model_path),
                fallback_url: text("FALLBACK_IMAGE_PATH").unwrap_or(defaults.image.fallback_url),
            },
            rates: CostRates {
                vision_input_per_mtok: parse_rate(text("VISION_INPUT_COST_PER_MTOK"), "VISION_INPUT_COST_PER_MTOK", rates.vision_input_per_mtok),
                vision_output_per_mtok: parse_rate(text("VISION_OUTPUT_COST_PER_MTOK"), "VISION_OUTPUT_COST_PER_MTOK", rates.vision_output_per_mtok),
                vision_fallback: parse_rate(text("VISION_FALLBACK_COST"), "VISION_FALLBACK_COST", rates.vision_fallback),
                image_per_megapixel: parse_rate(text("IMAGE_COST_PER_MEGAPIXEL"), "IMAGE_COST_PER_MEGAPIXEL", rates.image_per_megapixel),
                image_default_megapixels: parse_rate(text("IMAGE_DEFAULT_MEGAPIXELS"), "IMAGE_DEFAULT_MEGAPIXELS", rates.image_default_megapixels),
            },
            generation_timeout: Duration::from_millis(parse_or(
                text("GENERATION_TIMEOUT_MS"),
                "GENERATION_TIMEOUT_MS",
                defaults.generation_timeout.as_millis() as u64,
            )),
            admin_key: text("ADMIN_API_KEY"),
            store,
            analytics_fallback_capacity: parse_or(
                text("ANALYTICS_FALLBACK_CAPACITY"),
                "ANALYTICS_FALLBACK_CAPACITY",
                defaults.analytics_fallback_capacity,
            ),
        }
    }
}

fn parse_or<T: FromStr + Copy>(raw: Option<String>, name: &str, default: T) -> T {
    match raw {
        None => default,
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            warn!("Ignoring unparsable {}={:?}, using default", name, raw);
            default
        }),
    }
}

/// Rates must be finite and non-negative.
fn parse_rate(raw: Option<String>, name: &str, default: f64) -> f64 {
    let value = parse_or(raw, name, default);
    if value.is_finite() && value >= 0.0 {
        value
    } else {
        warn!("Ignoring out-of-range {}={}, using default", name, value);
        default
    }
}
