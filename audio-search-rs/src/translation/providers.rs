//! Translation / language-detection backends.
//!
//! Each provider speaks its own wire format; callers only see
//! [`TranslationProvider`]. Provider selection and key validation happen once,
//! in [`build_provider`], so misconfiguration fails at startup.

use crate::config::TranslationSettings;
use crate::error::{AudioSearchError, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

const GOOGLE_TRANSLATE_URL: &str = "https://translation.googleapis.com/language/translate/v2";
const GOOGLE_WEB_URL: &str = "https://translate.googleapis.com/translate_a/single";
const DEEPL_TRANSLATE_URL: &str = "https://api-free.deepl.com/v2/translate";

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Rate limit exceeded")]
    RateLimited,
    #[error("Request timeout")]
    Timeout,
    #[error("HTTP error {status}: {message}")]
    Http { status: u16, message: String },
    #[error("Translation API request failed: {0}")]
    Network(String),
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub lang_code: Option<String>,
    pub confidence: f32,
}

#[async_trait]
pub trait TranslationProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn detect(&self, text: &str) -> std::result::Result<Detection, ProviderError>;

    /// `source` is a language code or `"auto"`.
    async fn translate(
        &self,
        text: &str,
        source: &str,
        target: &str,
    ) -> std::result::Result<String, ProviderError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    /// Google Cloud Translation v2 (API key required).
    Google,
    /// Keyless Google web endpoint.
    GoogleWeb,
    /// DeepL (auth key required).
    DeepL,
}

impl ProviderKind {
    pub fn parse(name: &str) -> Result<Self> {
        match name.trim().to_lowercase().as_str() {
            "google" => Ok(ProviderKind::Google),
            "googletrans" => Ok(ProviderKind::GoogleWeb),
            "deepl" => Ok(ProviderKind::DeepL),
            "" => Err(AudioSearchError::Config(
                "Translation provider is required.".into(),
            )),
            other => Err(AudioSearchError::Config(format!(
                "Unsupported translation provider: {other}. Supported: [\"deepl\", \"google\", \"googletrans\"]"
            ))),
        }
    }
}

pub fn build_provider(settings: &TranslationSettings) -> Result<Arc<dyn TranslationProvider>> {
    let kind = ProviderKind::parse(&settings.provider)?;
    let api_key = settings
        .api_key
        .as_deref()
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(str::to_string);
    if api_key.is_none() && matches!(kind, ProviderKind::Google | ProviderKind::DeepL) {
        return Err(AudioSearchError::Config(format!(
            "API key is required for provider: {}",
            settings.provider.trim().to_lowercase()
        )));
    }

    let client = Client::builder()
        .timeout(Duration::from_millis(settings.timeout_ms))
        .build()
        .map_err(|e| AudioSearchError::Config(format!("HTTP client: {e}")))?;
    let base_url = settings
        .api_url
        .as_deref()
        .map(|u| u.trim_end_matches('/').to_string());

    let provider: Arc<dyn TranslationProvider> = match kind {
        ProviderKind::Google => {
            let translate_url = base_url.unwrap_or_else(|| GOOGLE_TRANSLATE_URL.to_string());
            Arc::new(GoogleCloudProvider {
                client,
                detect_url: format!("{translate_url}/detect"),
                translate_url,
                api_key: api_key.unwrap_or_default(),
            })
        }
        ProviderKind::GoogleWeb => Arc::new(GoogleWebProvider {
            client,
            url: base_url.unwrap_or_else(|| GOOGLE_WEB_URL.to_string()),
        }),
        ProviderKind::DeepL => Arc::new(DeepLProvider {
            client,
            translate_url: base_url.unwrap_or_else(|| DEEPL_TRANSLATE_URL.to_string()),
            auth_key: api_key.unwrap_or_default(),
        }),
    };
    info!(provider = provider.name(), "Translation provider configured");
    Ok(provider)
}

async fn send_json<T: DeserializeOwned>(request: RequestBuilder) -> std::result::Result<T, ProviderError> {
    let response = request.send().await.map_err(|e| {
        if e.is_timeout() {
            ProviderError::Timeout
        } else {
            ProviderError::Network(e.to_string())
        }
    })?;

    let status = response.status();
    if status.as_u16() == 429 {
        return Err(ProviderError::RateLimited);
    }
    if !status.is_success() {
        let message = response.text().await.unwrap_or_default();
        return Err(ProviderError::Http {
            status: status.as_u16(),
            message,
        });
    }
    response
        .json::<T>()
        .await
        .map_err(|e| ProviderError::InvalidResponse(e.to_string()))
}

// ---------------- Google Cloud Translation v2 ----------------

pub struct GoogleCloudProvider {
    client: Client,
    translate_url: String,
    detect_url: String,
    api_key: String,
}

#[derive(Serialize)]
struct GoogleTranslateRequest<'a> {
    q: &'a str,
    target: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    source: Option<&'a str>,
}

#[derive(Deserialize)]
struct GoogleEnvelope<T> {
    data: T,
}

#[derive(Deserialize)]
struct GoogleTranslations {
    #[serde(default)]
    translations: Vec<GoogleTranslation>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoogleTranslation {
    #[serde(default)]
    translated_text: String,
}

#[derive(Deserialize)]
struct GoogleDetections {
    #[serde(default)]
    detections: Vec<Vec<GoogleDetection>>,
}

#[derive(Deserialize)]
struct GoogleDetection {
    language: Option<String>,
    confidence: Option<f32>,
}

#[async_trait]
impl TranslationProvider for GoogleCloudProvider {
    fn name(&self) -> &str {
        "google"
    }

    async fn detect(&self, text: &str) -> std::result::Result<Detection, ProviderError> {
        let request = self
            .client
            .post(&self.detect_url)
            .query(&[("key", self.api_key.as_str())])
            .json(&serde_json::json!({ "q": text }));
        let envelope: GoogleEnvelope<GoogleDetections> = send_json(request).await?;
        let detection = envelope
            .data
            .detections
            .into_iter()
            .next()
            .and_then(|d| d.into_iter().next())
            .ok_or_else(|| {
                ProviderError::InvalidResponse("No detections returned from Google API.".into())
            })?;
        Ok(Detection {
            lang_code: detection.language,
            confidence: detection.confidence.unwrap_or(0.0),
        })
    }

    async fn translate(
        &self,
        text: &str,
        source: &str,
        target: &str,
    ) -> std::result::Result<String, ProviderError> {
        let body = GoogleTranslateRequest {
            q: text,
            target,
            source: (source != "auto").then_some(source),
        };
        let request = self
            .client
            .post(&self.translate_url)
            .query(&[("key", self.api_key.as_str())])
            .json(&body);
        let envelope: GoogleEnvelope<GoogleTranslations> = send_json(request).await?;
        envelope
            .data
            .translations
            .into_iter()
            .next()
            .map(|t| t.translated_text.trim().to_string())
            .ok_or_else(|| {
                ProviderError::InvalidResponse("No translations returned from Google API.".into())
            })
    }
}

// ---------------- Keyless Google web endpoint ----------------

pub struct GoogleWebProvider {
    client: Client,
    url: String,
}

impl GoogleWebProvider {
    /// Response is a positional array: `[[[translated, original, ..], ..], null, "<src>", .., .., .., <confidence>]`.
    async fn call(
        &self,
        text: &str,
        source: &str,
        target: &str,
    ) -> std::result::Result<(String, Detection), ProviderError> {
        let request = self.client.get(&self.url).query(&[
            ("client", "gtx"),
            ("sl", source),
            ("tl", target),
            ("dt", "t"),
            ("q", text),
        ]);
        let value: serde_json::Value = send_json(request).await?;

        let segments = value
            .get(0)
            .and_then(|v| v.as_array())
            .ok_or_else(|| ProviderError::InvalidResponse("missing translation segments".into()))?;
        let translated: String = segments
            .iter()
            .filter_map(|seg| seg.get(0).and_then(|s| s.as_str()))
            .collect();
        let detection = Detection {
            lang_code: value.get(2).and_then(|v| v.as_str()).map(str::to_string),
            confidence: value.get(6).and_then(|v| v.as_f64()).unwrap_or(0.0) as f32,
        };
        Ok((translated.trim().to_string(), detection))
    }
}

#[async_trait]
impl TranslationProvider for GoogleWebProvider {
    fn name(&self) -> &str {
        "googletrans"
    }

    async fn detect(&self, text: &str) -> std::result::Result<Detection, ProviderError> {
        let (_, detection) = self.call(text, "auto", "en").await?;
        Ok(detection)
    }

    async fn translate(
        &self,
        text: &str,
        source: &str,
        target: &str,
    ) -> std::result::Result<String, ProviderError> {
        let (translated, _) = self.call(text, source, target).await?;
        Ok(translated)
    }
}

// ---------------- DeepL ----------------

pub struct DeepLProvider {
    client: Client,
    translate_url: String,
    auth_key: String,
}

#[derive(Serialize)]
struct DeepLRequest<'a> {
    text: [&'a str; 1],
    target_lang: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    source_lang: Option<String>,
    auth_key: &'a str,
}

#[derive(Deserialize)]
struct DeepLResponse {
    #[serde(default)]
    translations: Vec<DeepLTranslation>,
}

#[derive(Deserialize)]
struct DeepLTranslation {
    detected_source_language: Option<String>,
    #[serde(default)]
    text: String,
}

impl DeepLProvider {
    async fn call(
        &self,
        text: &str,
        source: Option<&str>,
        target: &str,
    ) -> std::result::Result<DeepLTranslation, ProviderError> {
        let body = DeepLRequest {
            text: [text],
            target_lang: target.to_uppercase(),
            source_lang: source.map(str::to_uppercase),
            auth_key: &self.auth_key,
        };
        debug!(url = %self.translate_url, "DeepL request");
        let response: DeepLResponse =
            send_json(self.client.post(&self.translate_url).json(&body)).await?;
        response.translations.into_iter().next().ok_or_else(|| {
            ProviderError::InvalidResponse("No translations returned from DeepL API.".into())
        })
    }
}

#[async_trait]
impl TranslationProvider for DeepLProvider {
    fn name(&self) -> &str {
        "deepl"
    }

    /// DeepL has no detect endpoint; translating to English reports the source.
    async fn detect(&self, text: &str) -> std::result::Result<Detection, ProviderError> {
        let translation = self.call(text, None, "en").await?;
        Ok(Detection {
            lang_code: translation.detected_source_language,
            confidence: 0.0,
        })
    }

    async fn translate(
        &self,
        text: &str,
        source: &str,
        target: &str,
    ) -> std::result::Result<String, ProviderError> {
        let source = (source != "auto").then_some(source);
        let translation = self.call(text, source, target).await?;
        Ok(translation.text.trim().to_string())
    }
}
