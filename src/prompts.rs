//! Style presets and staging prompt construction.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::models::{RoomSize, RoomType};

pub const NEGATIVE_PROMPT: &str = "low resolution, blurry, distorted geometry, warped perspective, \
cluttered scene, oversaturated colors, cartoonish style, noisy texture, poor lighting, watermark, \
text artifacts";

const STRUCTURE_RULES: &str =
    "Maintain original room layout and window positions. Do not alter structural walls or windows.";

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum StylePreset {
    #[default]
    DefaultPremium,
    LuxuryClassic,
    ModernLuxury,
}

impl StylePreset {
    pub const ALL: [StylePreset; 3] =
        [StylePreset::DefaultPremium, StylePreset::LuxuryClassic, StylePreset::ModernLuxury];

    pub fn id(self) -> &'static str {
        match self {
            StylePreset::DefaultPremium => "default_premium",
            StylePreset::LuxuryClassic => "luxury_classic",
            StylePreset::ModernLuxury => "modern_luxury",
        }
    }

    /// Unknown or missing ids resolve to the default preset.
    pub fn resolve(raw: Option<&str>) -> Self {
        raw.and_then(|id| Self::ALL.into_iter().find(|p| p.id() == id)).unwrap_or_default()
    }

    fn scene(self, room_type: RoomType) -> String {
        match self {
            StylePreset::DefaultPremium => format!(
                "Create a high-end real-estate visual of a {room_type}, featuring balanced composition, \
clean architecture, warm natural light, premium materials, realistic textures, and polished editorial quality. \
Maintain accurate proportions, inviting atmosphere, and market-ready presentation."
            ),
            StylePreset::LuxuryClassic => format!(
                "Create an elegant luxury real-estate visual of a {room_type} in a timeless style: refined symmetry, \
marble and natural stone surfaces, brass accents, layered ambient lighting, rich but neutral palette, soft shadows, \
and sophisticated hotel-like atmosphere. Ultra-realistic, premium editorial finish."
            ),
            StylePreset::ModernLuxury => format!(
                "Create a modern luxury real-estate visual of a {room_type} with minimalist architecture, \
floor-to-ceiling glass, seamless lines, curated designer furniture, indirect architectural lighting, muted neutral \
tones, and cinematic daylight. Clean, upscale, ultra-realistic, magazine-grade quality."
            ),
        }
    }
}

impl fmt::Display for StylePreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltPrompt {
    pub preset: StylePreset,
    pub prompt: String,
    pub negative_prompt: &'static str,
}

pub fn build_prompt(preset: Option<&str>, room_type: RoomType, size: RoomSize) -> BuiltPrompt {
    let preset = StylePreset::resolve(preset);
    let prompt = format!(
        "{} Requirements: {}. {}",
        preset.scene(room_type),
        size.density_prompt(),
        STRUCTURE_RULES
    );
    BuiltPrompt { preset, prompt, negative_prompt: NEGATIVE_PROMPT }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn same_inputs_give_identical_prompts() {
        for size in RoomSize::ALL {
            for preset in StylePreset::ALL {
                let a = build_prompt(Some(preset.id()), RoomType::Kitchen, size);
                let b = build_prompt(Some(preset.id()), RoomType::Kitchen, size);
                assert_eq!(a, b);
                assert_eq!(a.preset, preset);
            }
        }
    }

    #[test]
    fn unknown_preset_resolves_to_default() {
        let unknown = build_prompt(Some("nonexistent"), RoomType::Bedroom, RoomSize::M);
        let default = build_prompt(Some("default_premium"), RoomType::Bedroom, RoomSize::M);
        assert_eq!(unknown, default);
        assert_eq!(build_prompt(None, RoomType::Bedroom, RoomSize::M), default);
    }

    #[test]
    fn prompt_carries_room_density_and_structure_rules() {
        let built = build_prompt(Some("modern_luxury"), RoomType::Office, RoomSize::S);
        assert!(built.prompt.contains("of a office"));
        assert!(built.prompt.contains("minimal furniture, compact layout"));
        assert!(built.prompt.contains("Do not alter structural walls or windows"));
        assert_eq!(built.negative_prompt, NEGATIVE_PROMPT);

        let large = build_prompt(None, RoomType::LivingRoom, RoomSize::L);
        assert!(large.prompt.contains("spacious layout, multiple furniture groupings"));
    }

    #[test]
    fn presets_produce_distinct_templates() {
        let a = build_prompt(Some("luxury_classic"), RoomType::Bathroom, RoomSize::M);
        let b = build_prompt(Some("modern_luxury"), RoomType::Bathroom, RoomSize::M);
        assert_ne!(a.prompt, b.prompt);
    }
}
