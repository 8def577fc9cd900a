//! Language resolution: detect the query language and translate to English.
//!
//! Provider failures never escape this module. They degrade to "search with
//! the original text" plus a user-facing warning.

pub mod cache;
pub mod glossary;
pub mod providers;

use crate::config::TranslationSettings;
use crate::error::Result;
use cache::TtlLruCache;
use providers::{build_provider, ProviderError, TranslationProvider};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub use glossary::apply_vietnamese_glossary;

pub const MAX_TRANSLATED_CHARS: usize = 500;
const LOW_CONFIDENCE: f32 = 0.7;

pub const RATE_LIMIT_WARNING: &str =
    "Translation rate limit reached. Searching with original text may yield less accurate results.";
pub const UNAVAILABLE_WARNING: &str =
    "Translation unavailable. Searching with original text may yield less accurate results.";
pub const GLOSSARY_WARNING: &str = "Translation unavailable. Using Vietnamese keyword fallback.";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LanguageDetection {
    pub lang_code: String,
    pub confidence: f32,
    pub is_english: bool,
}

impl LanguageDetection {
    fn english_default() -> Self {
        Self {
            lang_code: "en".into(),
            confidence: 0.0,
            is_english: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TranslationFailure {
    RateLimited,
    Unavailable(String),
}

impl From<&ProviderError> for TranslationFailure {
    fn from(err: &ProviderError) -> Self {
        match err {
            ProviderError::RateLimited => TranslationFailure::RateLimited,
            other => TranslationFailure::Unavailable(other.to_string()),
        }
    }
}

impl TranslationFailure {
    /// Every non-rate-limit failure shares one message.
    pub fn warning(&self) -> &'static str {
        match self {
            TranslationFailure::RateLimited => RATE_LIMIT_WARNING,
            TranslationFailure::Unavailable(_) => UNAVAILABLE_WARNING,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TranslationOutcome {
    Translated(String),
    Failed(TranslationFailure),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessedQuery {
    pub english_text: String,
    pub original_text: String,
    pub lang_code: String,
    pub was_translated: bool,
    pub translation_warning: Option<String>,
}

impl ProcessedQuery {
    fn untranslated(text: &str, lang_code: &str, warning: Option<&str>) -> Self {
        Self {
            english_text: text.to_string(),
            original_text: text.to_string(),
            lang_code: lang_code.to_string(),
            was_translated: false,
            translation_warning: warning.map(str::to_string),
        }
    }
}

type TranslationKey = (String, String, String);

pub struct LanguageResolver {
    provider: Arc<dyn TranslationProvider>,
    allowed_langs: Option<HashSet<String>>,
    translation_cache: TtlLruCache<TranslationKey, String>,
    language_cache: TtlLruCache<String, LanguageDetection>,
}

impl LanguageResolver {
    pub fn from_settings(settings: &TranslationSettings) -> Result<Self> {
        let provider = build_provider(settings)?;
        Ok(Self::new(provider, settings))
    }

    pub fn new(provider: Arc<dyn TranslationProvider>, settings: &TranslationSettings) -> Self {
        let allowed_langs = settings.allowed_langs.as_ref().and_then(|langs| {
            let set: HashSet<String> = langs
                .iter()
                .map(|l| l.trim().to_lowercase())
                .filter(|l| !l.is_empty())
                .collect();
            (!set.is_empty()).then_some(set)
        });
        let ttl = Duration::from_secs(settings.cache_ttl_secs);
        Self {
            provider,
            allowed_langs,
            translation_cache: TtlLruCache::new("translation", settings.cache_capacity, ttl),
            language_cache: TtlLruCache::new("language", settings.cache_capacity, ttl),
        }
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Never fails: provider errors fall back to English with zero confidence.
    pub async fn detect_language(&self, text: &str) -> LanguageDetection {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return LanguageDetection::english_default();
        }
        if let Some(cached) = self.language_cache.get(&trimmed.to_string()) {
            return cached;
        }

        match self.provider.detect(trimmed).await {
            Ok(detection) => {
                let lang_code = detection
                    .lang_code
                    .map(|c| c.trim().to_lowercase())
                    .filter(|c| !c.is_empty())
                    .unwrap_or_else(|| "en".to_string());
                let confidence = detection.confidence.clamp(0.0, 1.0);
                if confidence > 0.0 && confidence < LOW_CONFIDENCE {
                    warn!(lang = %lang_code, confidence, "Low-confidence language detection");
                }
                let result = LanguageDetection {
                    is_english: lang_code == "en",
                    lang_code,
                    confidence,
                };
                self.language_cache
                    .insert(trimmed.to_string(), result.clone());
                result
            }
            Err(e) => {
                warn!(error = %e, "Language detection failed, defaulting to English");
                LanguageDetection::english_default()
            }
        }
    }

    pub async fn translate(&self, text: &str, source_lang: &str, target_lang: &str) -> TranslationOutcome {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return TranslationOutcome::Translated(text.to_string());
        }
        let source = match source_lang.trim().to_lowercase() {
            s if s.is_empty() => "auto".to_string(),
            s => s,
        };
        let target = match target_lang.trim().to_lowercase() {
            t if t.is_empty() => "en".to_string(),
            t => t,
        };
        if source != "auto" && source == target {
            return TranslationOutcome::Translated(text.to_string());
        }

        let key = (source.clone(), target.clone(), trimmed.to_string());
        if let Some(cached) = self.translation_cache.get(&key) {
            return TranslationOutcome::Translated(cached);
        }

        match self.provider.translate(trimmed, &source, &target).await {
            Ok(translated) => {
                self.translation_cache.insert(key, translated.clone());
                TranslationOutcome::Translated(translated)
            }
            Err(e) => {
                warn!(lang = %source, error = %e, "Translation failed");
                TranslationOutcome::Failed(TranslationFailure::from(&e))
            }
        }
    }

    pub async fn detect_and_translate(&self, text: &str) -> ProcessedQuery {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return ProcessedQuery::untranslated(text, "en", None);
        }
        if glossary::is_non_textual(trimmed) {
            return ProcessedQuery::untranslated(text, "und", None);
        }

        // short foreign text is easily misdetected as English
        let force_translation = glossary::contains_non_ascii_letters(trimmed);

        let detection_text = glossary::extract_dominant_text(trimmed);
        let detection = self.detect_language(&detection_text).await;
        let mut lang_code = detection.lang_code.clone();

        if force_translation && detection.is_english {
            if let Some(inferred) = glossary::infer_language_from_characters(trimmed) {
                info!(
                    detected = %detection.lang_code,
                    inferred,
                    text = %glossary::truncate_chars(trimmed, 50),
                    "Overriding language detection"
                );
                lang_code = inferred.to_string();
            }
        }

        if detection.is_english && !force_translation {
            return ProcessedQuery::untranslated(text, &lang_code, None);
        }

        if let Some(allowed) = &self.allowed_langs {
            // diacritic-light Vietnamese fragments rarely detect as "vi"
            let vi_only = allowed.len() == 1 && allowed.contains("vi");
            if force_translation && vi_only && !allowed.contains(&lang_code) {
                lang_code = "vi".to_string();
            }
            if !allowed.contains(&lang_code) {
                return ProcessedQuery::untranslated(text, &lang_code, None);
            }
        }

        let source = if force_translation && lang_code == "en" {
            "auto"
        } else {
            lang_code.as_str()
        };

        match self.translate(trimmed, source, "en").await {
            TranslationOutcome::Translated(translated) => {
                let mut english_text = if translated.is_empty() {
                    text.to_string()
                } else {
                    translated
                };
                let len = english_text.chars().count();
                if len > MAX_TRANSLATED_CHARS {
                    info!(len, "Translated text exceeded {MAX_TRANSLATED_CHARS} characters; truncating");
                    english_text = glossary::truncate_chars(&english_text, MAX_TRANSLATED_CHARS);
                }
                ProcessedQuery {
                    english_text,
                    original_text: text.to_string(),
                    lang_code,
                    was_translated: true,
                    translation_warning: None,
                }
            }
            TranslationOutcome::Failed(failure) => {
                if force_translation && lang_code == "vi" {
                    let hint = apply_vietnamese_glossary(trimmed);
                    if !hint.is_empty() {
                        info!(hint = %hint, "Using Vietnamese glossary fallback");
                        return ProcessedQuery {
                            english_text: hint,
                            original_text: text.to_string(),
                            lang_code,
                            was_translated: true,
                            translation_warning: Some(GLOSSARY_WARNING.to_string()),
                        };
                    }
                }
                ProcessedQuery::untranslated(text, &lang_code, Some(failure.warning()))
            }
        }
    }
}
