use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tracing::{error, info};

use crate::backoff::RateLimited;
use crate::config::GeminiSettings;
use crate::models::{preview, EmbeddedImage};

#[derive(Debug, Error)]
pub enum GeminiError {
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("Gemini API error {code} ({}): {message}", .status.as_deref().unwrap_or("UNKNOWN"))]
    Api { code: u16, status: Option<String>, message: String },
    #[error("parse error: {0}")]
    Parse(String),
}

impl RateLimited for GeminiError {
    fn is_rate_limited(&self) -> bool {
        match self {
            GeminiError::Api { code, status, .. } => {
                *code == 429 || status.as_deref() == Some("RESOURCE_EXHAUSTED")
            }
            _ => false,
        }
    }
}

/// A multimodal request constrained to a JSON response schema.
#[derive(Debug, Clone)]
pub struct StructuredRequest {
    pub images: Vec<EmbeddedImage>,
    pub prompt: String,
    pub system_instruction: String,
    pub schema: serde_json::Value,
}

/// One fragment of a content response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentPart {
    Text(String),
    Image(EmbeddedImage),
    Other,
}

/// The two calls the generators need from the AI backend.
#[async_trait]
pub trait GenerativeBackend: Send + Sync {
    /// Returns the response text, or `None` when the model produced no text.
    async fn generate_structured(&self, request: StructuredRequest) -> Result<Option<String>, GeminiError>;

    /// Returns the parts of the first candidate, or `None` when it has no content.
    async fn generate_content(&self, prompt: &str) -> Result<Option<Vec<ContentPart>>, GeminiError>;
}

// Helper function to truncate base64 data in JSON for cleaner logging
fn truncate_base64_in_json(value: &mut serde_json::Value) {
    match value {
        serde_json::Value::Object(map) => {
            for (key, val) in map.iter_mut() {
                match val {
                    serde_json::Value::String(s) if key == "data" && s.len() > 100 => {
                        *val = serde_json::Value::String(preview(s));
                    }
                    _ => truncate_base64_in_json(val),
                }
            }
        }
        serde_json::Value::Array(arr) => arr.iter_mut().for_each(truncate_base64_in_json),
        _ => {}
    }
}

fn loggable(value: &serde_json::Value) -> String {
    let mut copy = value.clone();
    truncate_base64_in_json(&mut copy);
    serde_json::to_string(&copy).unwrap_or_default()
}

pub struct GeminiClient {
    client: Client,
    api_key: String,
    base_url: String,
    concept_model: String,
    image_model: String,
}

impl GeminiClient {
    pub fn new(settings: &GeminiSettings) -> Self {
        Self {
            client: Client::new(),
            api_key: settings.api_key.clone(),
            base_url: settings.api_base.trim_end_matches('/').to_string(),
            concept_model: settings.concept_model.clone(),
            image_model: settings.image_model.clone(),
        }
    }

    async fn perform_api_call(&self, model: &str, request_body: serde_json::Value) -> Result<GeminiResponse, GeminiError> {
        let url = format!("{}/models/{}:generateContent?key={}", self.base_url, model, self.api_key);

        info!("🔗 Making request to: {}", url.replace(&self.api_key, "***"));
        info!("📤 Request body: {}", loggable(&request_body));

        let response = self.client
            .post(&url)
            .json(&request_body)
            .send()
            .await
            .map_err(|e| GeminiError::Http(e.to_string()))?;

        let status = response.status();
        info!("📥 Response status: {}", status);

        let response_text = response.text().await.map_err(|e| GeminiError::Http(e.to_string()))?;

        if !status.is_success() {
            error!("❌ API Error response: {}", response_text);
            return Err(api_error(status.as_u16(), &response_text));
        }

        match serde_json::from_str::<serde_json::Value>(&response_text) {
            Ok(value) => info!("📥 Raw Gemini API response: {}", loggable(&value)),
            Err(_) => info!("📥 Raw Gemini API response: {}", preview(&response_text)),
        }

        serde_json::from_str(&response_text).map_err(|e| GeminiError::Parse(e.to_string()))
    }
}

#[async_trait]
impl GenerativeBackend for GeminiClient {
    async fn generate_structured(&self, request: StructuredRequest) -> Result<Option<String>, GeminiError> {
        let mut parts: Vec<serde_json::Value> = request
            .images
            .iter()
            .map(|img| json!({ "inlineData": { "mimeType": img.mime_type, "data": img.data } }))
            .collect();
        parts.push(json!({ "text": request.prompt }));

        let request_body = json!({
            "systemInstruction": { "parts": [{ "text": request.system_instruction }] },
            "contents": [{ "role": "user", "parts": parts }],
            "generationConfig": {
                "responseMimeType": "application/json",
                "responseSchema": request.schema
            }
        });

        info!("Generating structured content with {} reference images...", request.images.len());
        let parsed = self.perform_api_call(&self.concept_model, request_body).await?;
        Ok(parsed.text())
    }

    async fn generate_content(&self, prompt: &str) -> Result<Option<Vec<ContentPart>>, GeminiError> {
        let request_body = json!({
            "contents": [{
                "parts": [{ "text": prompt }]
            }],
            "generationConfig": {
                "responseModalities": ["TEXT", "IMAGE"],
                "candidateCount": 1
            }
        });

        info!("Generating image with Gemini API...");
        let parsed = self.perform_api_call(&self.image_model, request_body).await?;
        Ok(parsed.into_first_parts())
    }
}

fn api_error(code: u16, body: &str) -> GeminiError {
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(ErrorEnvelope { error }) => GeminiError::Api {
            code: error.code.unwrap_or(code),
            status: error.status,
            message: error.message.unwrap_or_else(|| body.to_string()),
        },
        Err(_) => GeminiError::Api { code, status: None, message: body.to_string() },
    }
}

// --- Response Parsing Helpers ---

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: Option<u16>,
    status: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    parts: Option<Vec<Part>>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Part {
    Inline {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
    Text { text: String },
    Other(serde::de::IgnoredAny),
}

#[derive(Debug, Deserialize)]
struct InlineData {
    #[serde(default)]
    data: String,
    #[serde(rename = "mimeType", default)]
    mime_type: String,
}

impl GeminiResponse {
    /// Concatenated text of the first candidate, like the SDK's `response.text`.
    fn text(&self) -> Option<String> {
        let parts = self.candidates.first()?.content.as_ref()?.parts.as_ref()?;
        let text: String = parts
            .iter()
            .filter_map(|p| match p {
                Part::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect();
        (!text.is_empty()).then_some(text)
    }

    fn into_first_parts(self) -> Option<Vec<ContentPart>> {
        let parts = self.candidates.into_iter().next()?.content?.parts?;
        Some(
            parts
                .into_iter()
                .map(|p| match p {
                    Part::Inline { inline_data } if !inline_data.data.is_empty() => {
                        info!("🎯 Found image data with mime type: {}", inline_data.mime_type);
                        ContentPart::Image(EmbeddedImage::new(inline_data.mime_type, inline_data.data))
                    }
                    Part::Text { text } => ContentPart::Text(text),
                    _ => ContentPart::Other,
                })
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn classifies_rate_limit_errors() {
        assert!(api_error(429, "").is_rate_limited());
        let exhausted = api_error(
            400,
            r#"{"error":{"code":400,"status":"RESOURCE_EXHAUSTED","message":"quota"}}"#,
        );
        assert!(exhausted.is_rate_limited());
        assert!(!api_error(500, r#"{"error":{"code":500,"status":"INTERNAL"}}"#).is_rate_limited());
        assert!(!GeminiError::Http("connection reset".into()).is_rate_limited());
    }

    #[test]
    fn api_error_prefers_envelope_fields() {
        match api_error(503, r#"{"error":{"code":429,"status":"RESOURCE_EXHAUSTED","message":"slow down"}}"#) {
            GeminiError::Api { code, status, message } => {
                assert_eq!(code, 429);
                assert_eq!(status.as_deref(), Some("RESOURCE_EXHAUSTED"));
                assert_eq!(message, "slow down");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn extracts_structured_text() {
        let resp: GeminiResponse = serde_json::from_str(
            r#"{"candidates":[{"content":{"parts":[{"text":"[{\"a\":"},{"text":"1}]"}]}}]}"#,
        )
        .unwrap();
        assert_eq!(resp.text().as_deref(), Some(r#"[{"a":1}]"#));

        let empty: GeminiResponse = serde_json::from_str(r#"{"candidates":[]}"#).unwrap();
        assert_eq!(empty.text(), None);
    }

    #[test]
    fn extracts_image_parts() {
        let resp: GeminiResponse = serde_json::from_str(
            r#"{"candidates":[{"content":{"parts":[
                {"text":"here you go"},
                {"inlineData":{"mimeType":"image/png","data":"iVBORw0KGgo="}}
            ]}}]}"#,
        )
        .unwrap();
        assert_eq!(
            resp.into_first_parts(),
            Some(vec![
                ContentPart::Text("here you go".into()),
                ContentPart::Image(EmbeddedImage::new("image/png", "iVBORw0KGgo=")),
            ])
        );
    }

    #[test]
    fn unknown_parts_are_ignored() {
        let resp: GeminiResponse = serde_json::from_str(
            r#"{"candidates":[{"content":{"parts":[
                {"functionCall":{"name":"noop","args":{}}},
                {"inlineData":{"mimeType":"image/jpeg","data":"/9j/AAAA"}}
            ]}}]}"#,
        )
        .unwrap();
        assert_eq!(
            resp.into_first_parts(),
            Some(vec![ContentPart::Other, ContentPart::Image(EmbeddedImage::new("image/jpeg", "/9j/AAAA"))])
        );
    }

    #[test]
    fn missing_content_yields_none() {
        let resp: GeminiResponse = serde_json::from_str(r#"{"candidates":[{"finishReason":"SAFETY"}]}"#).unwrap();
        assert_eq!(resp.into_first_parts(), None);
    }

    #[test]
    fn truncates_inline_data_for_logs() {
        let body = json!({ "parts": [{ "inlineData": { "data": "A".repeat(500) } }] });
        let logged = loggable(&body);
        assert!(logged.contains("[500 chars total]"));
        assert!(logged.len() < 200);
    }
}
