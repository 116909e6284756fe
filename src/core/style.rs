use serde::Serialize;
use serde_json::{json, Value};

pub const VAN_GOGH_PROMPT: &str = "A masterpiece oil painting in the style of Vincent Van Gogh, The Starry Night. Portrait of the subject in the input image. Vibrant, bright, and rich colors. High contrast. Thick impasto brushstrokes. The background is the swirling blue and yellow sky. Maintain exact facial features and identity.";

pub const VAN_GOGH_NEGATIVE_PROMPT: &str = "dull, faded, washed out, dark, low contrast, blurry, flat, cartoon, change ethnicity, deformed, ugly";

pub const VAN_GOGH_INSTRUCTION: &str = "Re-render this photo exactly in the iconic oil painting style of Vincent van Gogh. Use thick, visible impasto brushstrokes, swirling patterns in the background, and a color palette inspired by 'The Starry Night' and 'Sunflowers' (deep blues, vibrant yellows, and warm oranges). Transform the subject's features into artistic oil paint textures while maintaining recognizable form.";

/// Prompt and sampler settings sent along with the photo.
#[derive(Debug, Clone, Serialize)]
pub struct StylePreset {
    pub prompt: String,
    pub negative_prompt: String,
    pub instruction: String,
    pub strength: f64,
    pub guidance_scale: f64,
    pub num_inference_steps: u32,
    pub image_resolution: u32,
    pub condition_scale: f64,
}

impl StylePreset {
    pub fn van_gogh() -> Self {
        StylePreset {
            prompt: VAN_GOGH_PROMPT.to_string(),
            negative_prompt: VAN_GOGH_NEGATIVE_PROMPT.to_string(),
            instruction: VAN_GOGH_INSTRUCTION.to_string(),
            // high strength keeps the structure, high guidance keeps colors saturated
            strength: 0.85,
            guidance_scale: 15.0,
            num_inference_steps: 40,
            image_resolution: 512,
            condition_scale: 0.5,
        }
    }

    /// A caller-supplied prompt replaces both the diffusion prompt and the
    /// instruction given to chat-style models.
    pub fn with_prompt(mut self, prompt: Option<&str>) -> Self {
        if let Some(prompt) = prompt.map(str::trim).filter(|p| !p.is_empty()) {
            self.prompt = prompt.to_string();
            self.instruction = prompt.to_string();
        }
        self
    }

    pub fn replicate_input(&self, image: &str) -> Value {
        json!({
            "image": image,
            "prompt": self.prompt,
            "negative_prompt": self.negative_prompt,
            "strength": self.strength,
            "guidance_scale": self.guidance_scale,
            "num_inference_steps": self.num_inference_steps,
            "image_resolution": self.image_resolution,
            "condition_scale": self.condition_scale,
        })
    }
}

impl Default for StylePreset {
    fn default() -> Self {
        StylePreset::van_gogh()
    }
}
