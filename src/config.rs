use std::time::Duration;

use anyhow::Context;

use crate::backoff::BackoffPolicy;

const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_CONCEPT_MODEL: &str = "gemini-3-flash-preview";
const DEFAULT_IMAGE_MODEL: &str = "gemini-2.5-flash-image";

#[derive(Debug, Clone)]
pub struct GeminiSettings {
    pub api_key: String,
    pub api_base: String,
    pub concept_model: String,
    pub image_model: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub gemini: GeminiSettings,
    pub image_backoff: BackoffPolicy,
    pub port: u16,
    pub max_upload_bytes: usize,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let api_key = lookup("GEMINI_API_KEY")
            .filter(|k| !k.trim().is_empty())
            .context("GEMINI_API_KEY must be set")?;
        let text_or = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let defaults = BackoffPolicy::default();
        let retries = parse_or(&lookup, "IMAGE_RETRY_LIMIT", defaults.retries)?;
        let delay_ms = parse_or(&lookup, "IMAGE_RETRY_DELAY_MS", defaults.initial_delay.as_millis() as u64)?;

        Ok(Self {
            gemini: GeminiSettings {
                api_key,
                api_base: text_or("GEMINI_API_BASE", DEFAULT_API_BASE),
                concept_model: text_or("GEMINI_CONCEPT_MODEL", DEFAULT_CONCEPT_MODEL),
                image_model: text_or("GEMINI_IMAGE_MODEL", DEFAULT_IMAGE_MODEL),
            },
            image_backoff: BackoffPolicy { retries, initial_delay: Duration::from_millis(delay_ms) },
            port: parse_or(&lookup, "PORT", 8080)?,
            max_upload_bytes: parse_or(&lookup, "MAX_UPLOAD_BYTES", 64 * 1024 * 1024)?,
        })
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().with_context(|| format!("invalid {key}: {raw}")),
        None => Ok(default),
    }
}
