use std::fmt;

use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const CONCEPT_BATCH_SIZE: usize = 10;
pub const DEFAULT_COLOR_COUNT: u32 = 3;
pub const DEFAULT_STYLE: &str = "Kawaii, Soft, Round";

pub const CONCEPT_PRESETS: [&str; 8] = [
    "Valentine's Day",
    "Amigurumi Classic",
    "Spring / Easter",
    "Christmas / Holiday",
    "Couple / Best Friend",
    "Scandinavian Minimalist",
    "Modern Art Toy",
    "Baby Concept (Newborn Safe)",
];

/// An image carried inline as a `data:<mime>;base64,<payload>` reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EmbeddedImage {
    pub mime_type: String,
    pub data: String,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("not a base64 data URL: {0}")]
pub struct InvalidDataUrl(String);

impl EmbeddedImage {
    pub fn new(mime_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self { mime_type: mime_type.into(), data: data.into() }
    }

    pub fn parse(url: &str) -> Result<Self, InvalidDataUrl> {
        let rest = url
            .strip_prefix("data:")
            .ok_or_else(|| InvalidDataUrl(preview(url)))?;
        let (mime_type, data) = rest
            .split_once(";base64,")
            .ok_or_else(|| InvalidDataUrl(preview(url)))?;
        Ok(Self::new(mime_type, data))
    }

    pub fn is_image(&self) -> bool {
        self.mime_type.starts_with("image/")
    }

    /// File extension derived from the media subtype, `png` when undeclared.
    pub fn extension(&self) -> &str {
        self.mime_type
            .split_once('/')
            .map(|(_, subtype)| subtype)
            .filter(|subtype| !subtype.is_empty())
            .unwrap_or("png")
    }

    pub fn decode(&self) -> Result<Vec<u8>, base64::DecodeError> {
        base64::engine::general_purpose::STANDARD.decode(self.data.as_bytes())
    }

    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.data)
    }
}

impl fmt::Display for EmbeddedImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} image ({})", self.mime_type, preview(&self.data))
    }
}

impl TryFrom<String> for EmbeddedImage {
    type Error = InvalidDataUrl;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<EmbeddedImage> for String {
    fn from(image: EmbeddedImage) -> Self {
        image.to_data_url()
    }
}

/// Short log-friendly preview of a potentially huge base64 string.
pub fn preview(data: &str) -> String {
    if data.len() > 50 {
        let cut = (0..=50).rev().find(|i| data.is_char_boundary(*i)).unwrap_or(0);
        format!("{}...[{} chars total]", &data[..cut], data.len())
    } else {
        data.to_string()
    }
}

/// The descriptive text of a concept, exactly as the concept model returns it
/// and as it is written to `info.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConceptDetails {
    pub name: String,
    pub description: String,
    pub color_scheme: String,
    pub size: String,
    pub yarn: String,
    pub hook: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Concept {
    pub id: Uuid,
    #[serde(flatten)]
    pub details: ConceptDetails,
    pub image_url: Option<EmbeddedImage>,
    pub is_generating_image: bool,
}

impl Concept {
    pub fn new(details: ConceptDetails) -> Self {
        Self { id: Uuid::new_v4(), details, image_url: None, is_generating_image: false }
    }

    pub fn needs_image(&self) -> bool {
        self.image_url.is_none() && !self.is_generating_image
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationMode {
    #[default]
    Diverse,
    Specific,
}

/// Body of `POST /api/run/generate`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default = "default_color_count")]
    pub color_count: u32,
    #[serde(default = "default_style")]
    pub style: String,
    #[serde(default)]
    pub mode: GenerationMode,
    #[serde(default)]
    pub character: String,
}

fn default_color_count() -> u32 {
    DEFAULT_COLOR_COUNT
}

fn default_style() -> String {
    DEFAULT_STYLE.to_string()
}

/// Validated inputs of one generation run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationParams {
    pub images: Vec<EmbeddedImage>,
    pub color_count: u32,
    pub style: String,
    pub mode: GenerationMode,
    pub character: String,
}

impl TryFrom<GenerateRequest> for GenerationParams {
    type Error = String;

    fn try_from(req: GenerateRequest) -> Result<Self, Self::Error> {
        if req.images.is_empty() {
            return Err("at least one reference image is required".into());
        }
        let images = req
            .images
            .iter()
            .enumerate()
            .map(|(i, url)| match EmbeddedImage::parse(url) {
                Ok(img) if img.is_image() => Ok(img),
                Ok(img) => Err(format!("reference image {i} has non-image type '{}'", img.mime_type)),
                Err(e) => Err(format!("reference image {i}: {e}")),
            })
            .collect::<Result<Vec<_>, _>>()?;
        if req.color_count == 0 {
            return Err("colorCount must be a positive integer".into());
        }
        let character = req.character.trim().to_string();
        if req.mode == GenerationMode::Specific && character.is_empty() {
            return Err("a target character is required in specific mode".into());
        }
        Ok(Self { images, color_count: req.color_count, style: req.style, mode: req.mode, character })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    #[default]
    Idle,
    GeneratingConcepts,
    Complete,
    Error,
}

/// The state of one upload → results cycle. Owned by the orchestrator.
#[derive(Debug, Clone, Default)]
pub struct GenerationRun {
    /// Changes on every `generate` and `reset`; stale concept results compare against it.
    pub run_id: Uuid,
    pub status: RunStatus,
    pub params: Option<GenerationParams>,
    pub concepts: Vec<Concept>,
    pub error: Option<String>,
    /// Set while a bulk image pass for this run is active. At most one per run.
    pub image_pass: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl GenerationRun {
    pub fn touch(&mut self) {
        self.updated_at = Some(Utc::now());
    }

    pub fn snapshot(&self) -> RunSnapshot {
        RunSnapshot {
            status: self.status,
            input: self.params.as_ref().map(|p| InputSummary {
                reference_count: p.images.len(),
                color_count: p.color_count,
                style: p.style.clone(),
                mode: p.mode,
                character: (!p.character.is_empty()).then(|| p.character.clone()),
            }),
            pending_images: self.concepts.iter().filter(|c| c.image_url.is_none()).count(),
            concepts: self.concepts.clone(),
            error: self.error.clone(),
            image_pass: self.image_pass,
            started_at: self.started_at,
            updated_at: self.updated_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InputSummary {
    pub reference_count: usize,
    pub color_count: u32,
    pub style: String,
    pub mode: GenerationMode,
    pub character: Option<String>,
}

/// Read-only view of the run handed to the presentation layer.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSnapshot {
    pub status: RunStatus,
    pub input: Option<InputSummary>,
    pub concepts: Vec<Concept>,
    pub pending_images: usize,
    pub error: Option<String>,
    pub image_pass: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Presets {
    pub default_color_count: u32,
    pub default_style: &'static str,
    pub presets: &'static [&'static str],
}

impl Default for Presets {
    fn default() -> Self {
        Self { default_color_count: DEFAULT_COLOR_COUNT, default_style: DEFAULT_STYLE, presets: &CONCEPT_PRESETS }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn request(images: Vec<&str>, mode: GenerationMode, character: &str) -> GenerateRequest {
        GenerateRequest {
            images: images.into_iter().map(String::from).collect(),
            color_count: 3,
            style: "Kawaii".into(),
            mode,
            character: character.into(),
        }
    }

    #[test]
    fn parses_data_url() {
        let img = EmbeddedImage::parse("data:image/webp;base64,UklGRg==").unwrap();
        assert_eq!(img, EmbeddedImage::new("image/webp", "UklGRg=="));
        assert_eq!(img.extension(), "webp");
        assert_eq!(img.to_data_url(), "data:image/webp;base64,UklGRg==");
    }

    #[test]
    fn rejects_plain_urls() {
        assert!(EmbeddedImage::parse("https://example.com/a.png").is_err());
        assert!(EmbeddedImage::parse("data:image/png,rawdata").is_err());
    }

    #[test]
    fn extension_defaults_to_png() {
        assert_eq!(EmbeddedImage::new("", "AA==").extension(), "png");
        assert_eq!(EmbeddedImage::new("image/", "AA==").extension(), "png");
        assert_eq!(EmbeddedImage::new("image/jpeg", "AA==").extension(), "jpeg");
    }

    #[test]
    fn concept_serializes_camel_case_with_data_url() {
        let mut concept = Concept::new(ConceptDetails {
            name: "Bunny".into(),
            description: "A bunny".into(),
            color_scheme: "Pink".into(),
            size: "10cm".into(),
            yarn: "Cotton".into(),
            hook: "2.5mm".into(),
        });
        concept.image_url = Some(EmbeddedImage::new("image/png", "AA=="));
        let json = serde_json::to_value(&concept).unwrap();
        assert_eq!(json["colorScheme"], "Pink");
        assert_eq!(json["imageUrl"], "data:image/png;base64,AA==");
        assert_eq!(json["isGeneratingImage"], false);
    }

    #[test]
    fn request_defaults_apply() {
        let req: GenerateRequest = serde_json::from_str(r#"{"images":["data:image/png;base64,AA=="]}"#).unwrap();
        assert_eq!(req.color_count, DEFAULT_COLOR_COUNT);
        assert_eq!(req.style, DEFAULT_STYLE);
        assert_eq!(req.mode, GenerationMode::Diverse);
    }

    #[test]
    fn validation_rejects_empty_image_list() {
        let err = GenerationParams::try_from(request(vec![], GenerationMode::Diverse, "")).unwrap_err();
        assert!(err.contains("reference image"));
    }

    #[test]
    fn validation_requires_character_in_specific_mode() {
        let req = request(vec!["data:image/png;base64,AA=="], GenerationMode::Specific, "   ");
        assert!(GenerationParams::try_from(req).is_err());

        let req = request(vec!["data:image/png;base64,AA=="], GenerationMode::Specific, " Fox ");
        assert_eq!(GenerationParams::try_from(req).unwrap().character, "Fox");
    }

    #[test]
    fn validation_rejects_non_image_payloads() {
        let req = request(vec!["data:text/plain;base64,AA=="], GenerationMode::Diverse, "");
        assert!(GenerationParams::try_from(req).unwrap_err().contains("text/plain"));
    }

    #[test]
    fn preview_truncates_long_payloads() {
        let long = "A".repeat(120);
        assert_eq!(preview(&long), format!("{}...[120 chars total]", "A".repeat(50)));
        assert_eq!(preview("short"), "short");
    }

    #[test]
    fn image_display_stays_short() {
        let image = EmbeddedImage::new("image/png", "B".repeat(4000));
        assert_eq!(image.to_string(), format!("image/png image ({}...[4000 chars total])", "B".repeat(50)));
    }
}
