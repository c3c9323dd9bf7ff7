use tracing::{error, info, warn};

use crate::backoff::{retry_with_backoff, BackoffPolicy};
use crate::error::ImageGenerationError;
use crate::gemini::{ContentPart, GenerativeBackend};
use crate::models::{ConceptDetails, EmbeddedImage};

pub fn build_image_prompt(concept: &ConceptDetails) -> String {
    format!(
        "High quality amigurumi crochet toy photography. Professional studio lighting.\n\
         Character: {}.\n\
         Details: {}.\n\
         Colors: {}.\n\n\
         Style requirements:\n\
         - Consistent, professional handcrafted amigurumi look.\n\
         - Clearly visible crochet stitch texture, no smooth or plastic surfaces.\n\
         - Soft matte yarn texture.\n\
         - Neutral light background.\n\
         - Full body shot.\n\n\
         No text, no watermarks, no hands.",
        concept.name, concept.description, concept.color_scheme
    )
}

async fn request_image(backend: &dyn GenerativeBackend, prompt: &str) -> Result<EmbeddedImage, ImageGenerationError> {
    let parts = backend.generate_content(prompt).await?.ok_or(ImageGenerationError::NoContent)?;
    let mut texts = Vec::new();
    for part in parts {
        match part {
            ContentPart::Image(image) => return Ok(image),
            ContentPart::Text(text) => texts.push(text),
            ContentPart::Other => {}
        }
    }
    if !texts.is_empty() {
        warn!("Image response carried only text: {}", texts.join(" "));
    }
    Err(ImageGenerationError::NoImageData)
}

/// Renders one concept, retrying rate-limited attempts per `policy`.
pub async fn generate_concept_image(
    backend: &dyn GenerativeBackend,
    concept: &ConceptDetails,
    policy: BackoffPolicy,
) -> Result<EmbeddedImage, ImageGenerationError> {
    let prompt = build_image_prompt(concept);
    info!("🎯 Generating image for '{}'", concept.name);

    let result = retry_with_backoff(policy, || request_image(backend, &prompt)).await;
    match &result {
        Ok(image) => info!("✅ Image for '{}' generated: {}", concept.name, image),
        Err(e) => error!("❌ Error generating image for concept '{}': {}", concept.name, e),
    }
    result
}
