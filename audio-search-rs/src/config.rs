//! Service configuration: an optional TOML file layered under CLI/env overrides.

use crate::error::{AudioSearchError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Hard ceiling on results per query.
pub const TOP_K_LIMIT: usize = 100;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub audio_dir: PathBuf,
    /// General/sfx corpus; `<dir>/sfx` is preferred when it exists.
    pub embeddings_dir: PathBuf,
    pub music_embeddings_dir: PathBuf,
    pub host: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
    pub default_top_k: usize,
    pub max_top_k: usize,
    pub keywords_path: PathBuf,
    pub example_prompts_path: PathBuf,
    pub model: ModelSettings,
    pub translation: TranslationSettings,
    pub rerank: RerankSettings,
    pub query: QuerySettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            audio_dir: PathBuf::from("data/audio"),
            embeddings_dir: PathBuf::from("data/embeddings"),
            music_embeddings_dir: PathBuf::from("data/embeddings/music"),
            host: "0.0.0.0".into(),
            port: 8000,
            cors_origins: vec![
                "http://localhost:3000".into(),
                "http://localhost:8000".into(),
                "http://localhost:5173".into(),
            ],
            default_top_k: 5,
            max_top_k: TOP_K_LIMIT,
            keywords_path: PathBuf::from("config/detection_keywords.json"),
            example_prompts_path: PathBuf::from("config/example_prompts.json"),
            model: ModelSettings::default(),
            translation: TranslationSettings::default(),
            rerank: RerankSettings::default(),
            query: QuerySettings::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    /// `hash` or `tract`
    pub backend: String,
    /// `auto`, `cuda`, `mps` or `cpu`
    pub device: String,
    pub accelerator_memory_gb: Option<f32>,
    pub general_audio_model: Option<PathBuf>,
    pub general_text_model: Option<PathBuf>,
    pub general_tokenizer: Option<PathBuf>,
    pub music_audio_model: Option<PathBuf>,
    pub music_text_model: Option<PathBuf>,
    pub music_tokenizer: Option<PathBuf>,
    /// Load a separate music model; without it songs use the general one.
    pub enable_music_model: bool,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            backend: "hash".into(),
            device: "auto".into(),
            accelerator_memory_gb: None,
            general_audio_model: None,
            general_text_model: None,
            general_tokenizer: None,
            music_audio_model: None,
            music_text_model: None,
            music_tokenizer: None,
            enable_music_model: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranslationSettings {
    /// `googletrans`, `google` or `deepl`
    pub provider: String,
    pub api_key: Option<String>,
    pub api_url: Option<String>,
    /// Source languages eligible for translation; `None` allows all.
    pub allowed_langs: Option<Vec<String>>,
    pub timeout_ms: u64,
    pub cache_ttl_secs: u64,
    pub cache_capacity: usize,
}

impl Default for TranslationSettings {
    fn default() -> Self {
        Self {
            provider: "googletrans".into(),
            api_key: None,
            api_url: None,
            allowed_langs: None,
            timeout_ms: 2000,
            cache_ttl_secs: 3600,
            cache_capacity: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RerankSettings {
    pub enabled: bool,
    pub weight: f32,
}

impl Default for RerankSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            weight: 0.35,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QuerySettings {
    pub enable_synonyms: bool,
    pub enable_templates: bool,
}

impl Default for QuerySettings {
    fn default() -> Self {
        Self {
            enable_synonyms: true,
            enable_templates: true,
        }
    }
}

impl Settings {
    /// Read settings from `path`, or defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let settings = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|e| {
                    AudioSearchError::Config(format!("Cannot read {}: {e}", path.display()))
                })?;
                Self::from_toml(&raw)?
            }
            None => Self::default(),
        };
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| AudioSearchError::Config(format!("Invalid settings: {e}")))
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.rerank.weight) {
            return Err(AudioSearchError::Config(format!(
                "rerank.weight must be within [0, 1], got {}",
                self.rerank.weight
            )));
        }
        if self.max_top_k == 0 || self.max_top_k > TOP_K_LIMIT {
            return Err(AudioSearchError::Config(format!(
                "max_top_k must be within 1..={TOP_K_LIMIT}, got {}",
                self.max_top_k
            )));
        }
        if self.default_top_k == 0 || self.default_top_k > self.max_top_k {
            return Err(AudioSearchError::Config(format!(
                "default_top_k ({}) must be within 1..={}",
                self.default_top_k, self.max_top_k
            )));
        }
        if self.translation.provider.trim().is_empty() {
            return Err(AudioSearchError::Config(
                "Translation provider is required.".into(),
            ));
        }
        Ok(())
    }

    /// The general corpus directory actually used: `<embeddings_dir>/sfx`
    /// when present, the directory itself otherwise.
    pub fn general_embeddings_dir(&self) -> PathBuf {
        let sfx = self.embeddings_dir.join("sfx");
        if sfx.is_dir() {
            sfx
        } else {
            self.embeddings_dir.clone()
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
