use serde_json::json;
use tracing::{error, info};

use crate::error::GenerationError;
use crate::gemini::{GenerativeBackend, StructuredRequest};
use crate::models::{Concept, ConceptDetails, GenerationMode, GenerationParams, CONCEPT_BATCH_SIZE};

const SYSTEM_INSTRUCTION: &str = "You are an expert amigurumi designer. You specialize in synthesizing styles \
from multiple references to create perfectly cohesive new collections.";

/// Response schema: an array of records carrying every concept text field.
pub fn concept_schema() -> serde_json::Value {
    json!({
        "type": "ARRAY",
        "items": {
            "type": "OBJECT",
            "properties": {
                "name": { "type": "STRING" },
                "description": { "type": "STRING" },
                "colorScheme": { "type": "STRING" },
                "size": { "type": "STRING" },
                "yarn": { "type": "STRING" },
                "hook": { "type": "STRING" }
            },
            "required": ["name", "description", "colorScheme", "size", "yarn", "hook"]
        }
    })
}

fn design_language_rule() -> &'static str {
    "STRICT DESIGN RULE: 60% COLLECTIVE SIMILARITY\n\
     Study ALL attached sample images together and extract their shared design language:\n\
     1. Stitch style and density (tight, fluffy, chunky).\n\
     2. Facial character: eye placement, face proportions, overall vibe (minimalist, detailed, chibi).\n\
     3. Proportions: the signature body-to-head ratio used across the samples.\n\
     4. Color harmony: the kinds of palettes the samples prefer.\n\
     Every new design must be 60% this synthesized design DNA. The remaining 40% is the new item's \
     distinguishing features or accessories. The collection must read as the same artist's portfolio."
}

pub fn build_concept_prompt(params: &GenerationParams) -> String {
    let rule = design_language_rule();
    let style = &params.style;
    let colors = params.color_count;
    match params.mode {
        GenerationMode::Diverse => format!(
            "You are a master amigurumi artist and brand manager.\n\
             Create a collection of {CONCEPT_BATCH_SIZE} distinct characters belonging to the same product line \
             defined by the sample images.\n\n{rule}\n\n\
             THEME: \"{style}\"\n\
             - All {CONCEPT_BATCH_SIZE} concepts must follow the theme \"{style}\".\n\
             - The characters change, the crochet language stays a synthesis of the samples.\n\
             - All items must look like they come from the same workshop.\n\n\
             COLOR_COUNT: {colors}\n\n\
             Return a JSON array of {CONCEPT_BATCH_SIZE} items."
        ),
        GenerationMode::Specific => {
            let character = &params.character;
            format!(
                "You are a master amigurumi artist.\n\
                 Create {CONCEPT_BATCH_SIZE} unique variations of one character: {character}.\n\n{rule}\n\n\
                 THEME: \"{style}\"\n\
                 - Every design is a {character} that inherits the design DNA synthesized from all samples.\n\
                 - Apply the theme \"{style}\" while keeping the {character} recognizable and consistent.\n\n\
                 TARGET CHARACTER: {character}\n\
                 COLOR_COUNT: {colors}\n\n\
                 Return a JSON array of {CONCEPT_BATCH_SIZE} items."
            )
        }
    }
}

/// Parses the model payload into a full batch. Anything but exactly
/// `CONCEPT_BATCH_SIZE` well-formed records is an error.
pub fn parse_concepts(payload: &str) -> Result<Vec<Concept>, GenerationError> {
    let details: Vec<ConceptDetails> =
        serde_json::from_str(payload).map_err(|e| GenerationError::Malformed(e.to_string()))?;
    if details.len() != CONCEPT_BATCH_SIZE {
        return Err(GenerationError::WrongCount { expected: CONCEPT_BATCH_SIZE, actual: details.len() });
    }
    Ok(details.into_iter().map(Concept::new).collect())
}

/// Turns reference images and parameters into a batch of concepts without images.
pub async fn generate_concepts(
    backend: &dyn GenerativeBackend,
    params: &GenerationParams,
) -> Result<Vec<Concept>, GenerationError> {
    info!(
        "🧶 Generating {} concepts ({:?} mode, style '{}') from {} references",
        CONCEPT_BATCH_SIZE,
        params.mode,
        params.style,
        params.images.len()
    );

    let request = StructuredRequest {
        images: params.images.clone(),
        prompt: build_concept_prompt(params),
        system_instruction: SYSTEM_INSTRUCTION.to_string(),
        schema: concept_schema(),
    };

    let result = match backend.generate_structured(request).await {
        Ok(Some(text)) => parse_concepts(&text),
        Ok(None) => Err(GenerationError::EmptyResponse),
        Err(e) => Err(e.into()),
    };

    match &result {
        Ok(concepts) => info!("✅ Generated {} concepts", concepts.len()),
        Err(e) => error!("❌ Error generating concepts: {}", e),
    }
    result
}
