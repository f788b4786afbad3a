use std::fmt;
use std::io::Cursor;
use std::str::FromStr;

use bytes::Bytes;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use uuid::Uuid;

/// Coarse room-area bucket chosen by the user.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoomSize {
    S,
    M,
    L,
}

impl RoomSize {
    pub const ALL: [RoomSize; 3] = [RoomSize::S, RoomSize::M, RoomSize::L];

    pub fn as_str(self) -> &'static str {
        match self {
            RoomSize::S => "S",
            RoomSize::M => "M",
            RoomSize::L => "L",
        }
    }

    /// Furniture density language used in the staging prompt.
    pub fn density_prompt(self) -> &'static str {
        match self {
            RoomSize::S => "minimal furniture, compact layout, space-efficient design",
            RoomSize::M => "moderate furniture arrangement, balanced layout",
            RoomSize::L => "spacious layout, multiple furniture groupings, generous spacing",
        }
    }

    pub fn renovation_costs(self) -> RenovationCosts {
        match self {
            RoomSize::S => RenovationCosts { low: 80_000, mid: 150_000, high: 300_000 },
            RoomSize::M => RenovationCosts { low: 120_000, mid: 300_000, high: 600_000 },
            RoomSize::L => RenovationCosts { low: 250_000, mid: 600_000, high: 1_200_000 },
        }
    }
}

impl fmt::Display for RoomSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RoomSize {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "S" => Ok(RoomSize::S),
            "M" => Ok(RoomSize::M),
            "L" => Ok(RoomSize::L),
            other => Err(format!("invalid room size: {other}")),
        }
    }
}

/// Renovation budget bands for one size tier.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct RenovationCosts {
    #[serde(rename = "LOW")]
    pub low: u64,
    #[serde(rename = "MID")]
    pub mid: u64,
    #[serde(rename = "HIGH")]
    pub high: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RoomType {
    #[default]
    #[serde(rename = "living room")]
    LivingRoom,
    #[serde(rename = "bedroom")]
    Bedroom,
    #[serde(rename = "kitchen")]
    Kitchen,
    #[serde(rename = "bathroom")]
    Bathroom,
    #[serde(rename = "dining room")]
    DiningRoom,
    #[serde(rename = "office")]
    Office,
}

impl RoomType {
    pub const ALL: [RoomType; 6] = [
        RoomType::LivingRoom,
        RoomType::Bedroom,
        RoomType::Kitchen,
        RoomType::Bathroom,
        RoomType::DiningRoom,
        RoomType::Office,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RoomType::LivingRoom => "living room",
            RoomType::Bedroom => "bedroom",
            RoomType::Kitchen => "kitchen",
            RoomType::Bathroom => "bathroom",
            RoomType::DiningRoom => "dining room",
            RoomType::Office => "office",
        }
    }

    /// Case-insensitive match against the closed category set.
    pub fn from_label(label: &str) -> Option<Self> {
        let wanted = label.trim();
        Self::ALL.into_iter().find(|t| t.as_str().eq_ignore_ascii_case(wanted))
    }
}

impl fmt::Display for RoomType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct ImageDimensions {
    pub width: u32,
    pub height: u32,
}

impl ImageDimensions {
    /// `None` when either side is zero.
    pub fn new(width: u32, height: u32) -> Option<Self> {
        (width > 0 && height > 0).then_some(Self { width, height })
    }

    /// Reads dimensions from the image header without decoding pixels.
    pub fn from_image_header(bytes: &[u8]) -> Option<Self> {
        let reader = image::ImageReader::new(Cursor::new(bytes)).with_guessed_format().ok()?;
        let (width, height) = reader.into_dimensions().ok()?;
        Self::new(width, height)
    }

    pub fn megapixels(&self) -> f64 {
        (self.width as f64 * self.height as f64) / 1_000_000.0
    }
}

/// Output of the room classifier.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RoomAnalysis {
    pub room_type: RoomType,
    pub features: Vec<String>,
    pub cost: f64,
}

impl Default for RoomAnalysis {
    fn default() -> Self {
        Self { room_type: RoomType::LivingRoom, features: Vec::new(), cost: 0.0 }
    }
}

/// Output of the image transformer (or its timeout substitute).
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TransformResult {
    pub url: String,
    pub cost: f64,
    pub timed_out: bool,
}

/// One pipeline invocation's input. Owned by the caller and moved in.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub image: Bytes,
    pub room_size: RoomSize,
    pub user_id: String,
    pub dimensions: Option<ImageDimensions>,
    pub preset: Option<String>,
}

/// What the pipeline hands back on success.
#[derive(Debug, Serialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StagingResult {
    pub generation_id: Uuid,
    pub url: String,
    pub room_type: RoomType,
    pub features: Vec<String>,
    pub preset: String,
    pub costs: RenovationCosts,
    pub duration_ms: u64,
    pub timed_out: bool,
    pub api_cost: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Upload,
    GenerateStart,
    GenerateSuccess,
    GenerateFail,
    GenerateTimeout,
    Share,
    Feedback,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::Upload => "upload",
            EventType::GenerateStart => "generate_start",
            EventType::GenerateSuccess => "generate_success",
            EventType::GenerateFail => "generate_fail",
            EventType::GenerateTimeout => "generate_timeout",
            EventType::Share => "share",
            EventType::Feedback => "feedback",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct AnalyticsEvent {
    pub event_type: EventType,
    pub metadata: serde_json::Value,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
}

/// One pipeline invocation's outcome, written exactly once per invocation.
#[skip_serializing_none]
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct GenerationOutcome {
    pub generation_id: Option<Uuid>,
    pub user_id: String,
    pub room_size: RoomSize,
    pub room_type: RoomType,
    pub duration_ms: u64,
    pub success: bool,
    pub error_message: Option<String>,
    pub api_cost: f64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct FeedbackRecord {
    pub user_id: String,
    pub generation_id: Option<String>,
    pub rating: u8,
    pub comment: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct QuotaStatus {
    pub allowed: bool,
    pub remaining: u32,
}

/// Quota row key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QuotaKey {
    pub user_id: String,
    pub day: NaiveDate,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn room_size_parses_only_known_tiers() {
        assert_eq!("M".parse::<RoomSize>(), Ok(RoomSize::M));
        assert!("X".parse::<RoomSize>().is_err());
        assert!("s".parse::<RoomSize>().is_err());
    }

    #[test]
    fn renovation_costs_serialize_with_band_names() {
        let json = serde_json::to_value(RoomSize::S.renovation_costs()).unwrap();
        assert_eq!(json, serde_json::json!({ "LOW": 80000, "MID": 150000, "HIGH": 300000 }));
    }

    #[test]
    fn room_type_labels_match_case_insensitively() {
        assert_eq!(RoomType::from_label(" Dining Room "), Some(RoomType::DiningRoom));
        assert_eq!(RoomType::from_label("garage"), None);
        assert_eq!(serde_json::to_value(RoomType::LivingRoom).unwrap(), "living room");
    }

    #[test]
    fn event_type_serializes_snake_case() {
        assert_eq!(serde_json::to_value(EventType::GenerateTimeout).unwrap(), "generate_timeout");
        assert_eq!(EventType::GenerateTimeout.as_str(), "generate_timeout");
    }

    #[test]
    fn dimensions_reject_zero_sides() {
        assert_eq!(ImageDimensions::new(0, 10), None);
        assert_eq!(ImageDimensions::new(2000, 500).unwrap().megapixels(), 1.0);
    }

    #[test]
    fn header_sniffing_reads_png_size() {
        // 1x1 transparent PNG
        let png: [u8; 67] = [
            0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48,
            0x44, 0x52, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00,
            0x00, 0x1F, 0x15, 0xC4, 0x89, 0x00, 0x00, 0x00, 0x0A, 0x49, 0x44, 0x41, 0x54, 0x78,
            0x9C, 0x63, 0x00, 0x01, 0x00, 0x00, 0x05, 0x00, 0x01, 0x0D, 0x0A, 0x2D, 0xB4, 0x00,
            0x00, 0x00, 0x00, 0x49, 0x45, 0x4E, 0x44, 0xAE, 0x42, 0x60, 0x82,
        ];
        assert_eq!(ImageDimensions::from_image_header(&png), ImageDimensions::new(1, 1));
        assert_eq!(ImageDimensions::from_image_header(b"not an image"), None);
    }
}
