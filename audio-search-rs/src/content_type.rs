//! Song vs. sound-effect routing.
//!
//! Detection is a plain case-insensitive substring count over two keyword
//! lists; multi-word keywords ("sound effect") match as substrings, not tokens.

use crate::error::{AudioSearchError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Song,
    Sfx,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Song => "song",
            ContentType::Sfx => "sfx",
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentType {
    type Err = AudioSearchError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "song" => Ok(ContentType::Song),
            "sfx" => Ok(ContentType::Sfx),
            other => Err(AudioSearchError::Usage(format!(
                "Unsupported content type: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContentTypeDetection {
    pub content_type: ContentType,
    pub confidence: f32,
    pub matched_keywords: Vec<String>,
}

/// Anything that can classify an English query as song or sfx.
pub trait ContentClassifier: Send + Sync {
    fn detect(&self, english_text: &str) -> ContentTypeDetection;
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct KeywordConfig {
    #[serde(default)]
    pub music_keywords: Vec<String>,
    #[serde(default)]
    pub sfx_keywords: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct KeywordContentDetector {
    music_keywords: Vec<String>,
    sfx_keywords: Vec<String>,
}

impl KeywordContentDetector {
    pub fn new(config: KeywordConfig) -> Self {
        let lower = |v: Vec<String>| v.into_iter().map(|k| k.to_lowercase()).collect();
        let detector = Self {
            music_keywords: lower(config.music_keywords),
            sfx_keywords: lower(config.sfx_keywords),
        };
        info!(
            music = detector.music_keywords.len(),
            sfx = detector.sfx_keywords.len(),
            "Content type detector initialized"
        );
        detector
    }

    /// Load the keyword file. A missing or malformed file is a startup error.
    pub fn from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(AudioSearchError::Config(format!(
                "Keywords config not found: {}",
                path.display()
            )));
        }
        let raw = std::fs::read_to_string(path)?;
        let config: KeywordConfig = serde_json::from_str(&raw).map_err(|e| {
            AudioSearchError::Config(format!("Malformed keywords config {}: {e}", path.display()))
        })?;
        Ok(Self::new(config))
    }
}

impl ContentClassifier for KeywordContentDetector {
    fn detect(&self, english_text: &str) -> ContentTypeDetection {
        let text = english_text.to_lowercase();
        let music: Vec<&String> = self
            .music_keywords
            .iter()
            .filter(|kw| text.contains(kw.as_str()))
            .collect();
        let sfx: Vec<&String> = self
            .sfx_keywords
            .iter()
            .filter(|kw| text.contains(kw.as_str()))
            .collect();

        // ties (including 0/0) go to song
        let content_type = if sfx.len() > music.len() {
            ContentType::Sfx
        } else {
            ContentType::Song
        };

        let total = music.len() + sfx.len();
        let confidence = if total == 0 {
            0.0
        } else {
            music.len().max(sfx.len()) as f32 / total as f32
        };

        let mut matched_keywords: Vec<String> =
            music.into_iter().chain(sfx).cloned().collect();
        matched_keywords.sort();
        matched_keywords.dedup();

        ContentTypeDetection {
            content_type,
            confidence,
            matched_keywords,
        }
    }
}
