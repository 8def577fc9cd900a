//! Query → ranked results: resolve language, pick content type, enhance,
//! embed, search.
//!
//! Inference and index search run on the blocking pool so concurrent
//! requests keep making progress on their network-bound stages.

use crate::config::{Settings, TOP_K_LIMIT};
use crate::content_type::{ContentClassifier, ContentType, KeywordContentDetector};
use crate::embedding::EmbeddingProvider;
use crate::error::{AudioSearchError, Result};
use crate::index::{SearchResult, SimilarityIndex};
use crate::query::QueryEnhancer;
use crate::translation::LanguageResolver;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info};

pub const MAX_QUERY_CHARS: usize = 500;

#[derive(Debug, Error, PartialEq)]
pub enum PipelineError {
    #[error("{0}")]
    InvalidRequest(String),
    /// Details are logged, never returned.
    #[error("Search service failure")]
    SearchFailed,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default)]
    pub top_k: Option<usize>,
    #[serde(default)]
    pub content_type: Option<ContentType>,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            top_k: None,
            content_type: None,
        }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = Some(top_k);
        self
    }

    pub fn with_content_type(mut self, content_type: ContentType) -> Self {
        self.content_type = Some(content_type);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AudioResult {
    pub filename: String,
    pub similarity: f32,
    pub audio_url: String,
    pub content_type: ContentType,
    pub folder: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResponse {
    pub results: Vec<AudioResult>,
    /// English text actually searched.
    pub resolved_query: String,
    pub num_results: usize,
    pub content_type: ContentType,
    pub original_query: String,
    pub was_translated: bool,
    pub translation_warning: Option<String>,
}

/// Parent folder of a `/audio/...` URL, empty for top-level files.
pub fn folder_of(audio_url: &str) -> String {
    audio_url
        .strip_prefix("/audio/")
        .and_then(|rest| rest.rsplit_once('/'))
        .map(|(folder, _)| folder.to_string())
        .unwrap_or_default()
}

pub struct SearchPipeline {
    resolver: Arc<LanguageResolver>,
    classifier: Arc<dyn ContentClassifier>,
    enhancer: QueryEnhancer,
    embeddings: Arc<EmbeddingProvider>,
    index: Arc<SimilarityIndex>,
    default_top_k: usize,
    max_top_k: usize,
}

impl SearchPipeline {
    pub fn new(
        resolver: Arc<LanguageResolver>,
        classifier: Arc<dyn ContentClassifier>,
        enhancer: QueryEnhancer,
        embeddings: Arc<EmbeddingProvider>,
        index: Arc<SimilarityIndex>,
    ) -> Self {
        Self {
            resolver,
            classifier,
            enhancer,
            embeddings,
            index,
            default_top_k: 5,
            max_top_k: TOP_K_LIMIT,
        }
    }

    pub fn with_top_k_limits(mut self, default_top_k: usize, max_top_k: usize) -> Self {
        self.default_top_k = default_top_k;
        self.max_top_k = max_top_k;
        self
    }

    /// Wire every component from settings. Configuration and corpus problems
    /// are returned here so the service never starts half-configured.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let resolver = LanguageResolver::from_settings(&settings.translation)?;
        let classifier = KeywordContentDetector::from_path(&settings.keywords_path)?;
        let enhancer = QueryEnhancer::new(
            settings.query.enable_synonyms,
            settings.query.enable_templates,
        );
        let embeddings = EmbeddingProvider::from_settings(&settings.model)?;

        let mut index = SimilarityIndex::new(&settings.audio_dir, settings.rerank.clone());
        index.load_general_corpus(&settings.general_embeddings_dir())?;
        if index.load_music_corpus(&settings.music_embeddings_dir) {
            info!("Music index loaded");
        }

        Ok(Self::new(
            Arc::new(resolver),
            Arc::new(classifier),
            enhancer,
            Arc::new(embeddings),
            Arc::new(index),
        )
        .with_top_k_limits(settings.default_top_k, settings.max_top_k))
    }

    pub fn resolver(&self) -> &Arc<LanguageResolver> {
        &self.resolver
    }

    pub fn model_loaded(&self) -> bool {
        self.embeddings.is_loaded()
    }

    pub fn validate(&self, request: &SearchRequest) -> std::result::Result<usize, PipelineError> {
        let chars = request.query.chars().count();
        if chars == 0 || chars > MAX_QUERY_CHARS {
            return Err(PipelineError::InvalidRequest(format!(
                "query must be between 1 and {MAX_QUERY_CHARS} characters"
            )));
        }
        let top_k = request.top_k.unwrap_or(self.default_top_k);
        if top_k == 0 || top_k > self.max_top_k {
            return Err(PipelineError::InvalidRequest(format!(
                "top_k must be between 1 and {}",
                self.max_top_k
            )));
        }
        Ok(top_k)
    }

    pub async fn search(&self, request: SearchRequest) -> std::result::Result<SearchResponse, PipelineError> {
        let top_k = self.validate(&request)?;
        self.run(request, top_k).await.map_err(|e| {
            error!(error = %e, "Search request failed");
            PipelineError::SearchFailed
        })
    }

    async fn run(&self, request: SearchRequest, top_k: usize) -> Result<SearchResponse> {
        let processed = self.resolver.detect_and_translate(&request.query).await;
        let english = processed.english_text.clone();

        let content_type = match request.content_type {
            Some(explicit) => explicit,
            None => {
                let detection = self.classifier.detect(&english);
                info!(
                    content_type = %detection.content_type,
                    confidence = detection.confidence,
                    keywords = ?detection.matched_keywords,
                    "Detected content type"
                );
                detection.content_type
            }
        };

        let enhanced = self.enhancer.process_query(&english, content_type);
        if !enhanced.applied.is_empty() {
            info!(applied = %enhanced.applied.join(", "), "Query enhancements applied");
        }

        let embeddings = self.embeddings.clone();
        let variants = enhanced.variants;
        let query_vector = tokio::task::spawn_blocking(move || {
            embeddings.embed_query(&variants, content_type)
        })
        .await
        .map_err(|e| AudioSearchError::Model(format!("embedding task failed: {e}")))??;

        let index = self.index.clone();
        let hits: Vec<SearchResult> = tokio::task::spawn_blocking(move || {
            index.search_by_content_type(&query_vector, content_type, top_k)
        })
        .await
        .map_err(|e| AudioSearchError::Model(format!("search task failed: {e}")))??;

        let results: Vec<AudioResult> = hits
            .into_iter()
            .map(|hit| AudioResult {
                folder: folder_of(&hit.audio_url),
                filename: hit.filename,
                similarity: hit.similarity,
                audio_url: hit.audio_url,
                content_type,
            })
            .collect();

        Ok(SearchResponse {
            num_results: results.len(),
            results,
            resolved_query: english,
            content_type,
            original_query: processed.original_text,
            was_translated: processed.was_translated,
            translation_warning: processed.translation_warning,
        })
    }
}
