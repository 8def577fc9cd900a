#![allow(dead_code)]

use async_trait::async_trait;
use audio_search::config::{RerankSettings, TranslationSettings};
use audio_search::content_type::{ContentClassifier, ContentTypeDetection, KeywordContentDetector};
use audio_search::embedding::{Device, EmbeddingBackend, EmbeddingProvider, HashBackend};
use audio_search::indexer::{run_index_job, IndexJob};
use audio_search::translation::providers::{Detection, ProviderError, TranslationProvider};
use audio_search::{ContentType, LanguageResolver, QueryEnhancer, SearchPipeline, SimilarityIndex};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub const CORPUS: &[&str] = &[
    "weather/rain_heavy.wav",
    "weather/thunder_storm.wav",
    "animals/dog_bark.wav",
    "piano_melody.wav",
    "explosion_blast.wav",
];

/// Half a second of a sine tone, 16-bit mono.
pub fn write_sine_wav(path: &Path, freq: f32) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 16_000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    for i in 0..8_000 {
        let t = i as f32 / 16_000.0;
        let s = (t * freq * 2.0 * std::f32::consts::PI).sin();
        writer.write_sample((s * i16::MAX as f32 * 0.5) as i16).unwrap();
    }
    writer.finalize().unwrap();
}

pub fn write_corpus(audio_dir: &Path) {
    for (i, rel) in CORPUS.iter().enumerate() {
        write_sine_wav(&audio_dir.join(rel), 220.0 * (i + 1) as f32);
    }
}

pub fn hash_provider() -> EmbeddingProvider {
    let mut provider = EmbeddingProvider::new(Device::Cpu, 0.0);
    provider
        .load_model(|d| Ok(Box::new(HashBackend::new("general", d)) as Box<dyn EmbeddingBackend>))
        .unwrap();
    provider
}

pub fn keywords_path() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("config/detection_keywords.json")
}

pub fn prompts_path() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("config/example_prompts.json")
}

/// Audio tree plus an indexed sfx corpus, both inside one temp dir.
pub struct Corpus {
    pub dir: tempfile::TempDir,
    pub audio_dir: PathBuf,
    pub embeddings_dir: PathBuf,
}

pub fn indexed_corpus() -> Corpus {
    let dir = tempfile::tempdir().unwrap();
    let audio_dir = dir.path().join("audio");
    let embeddings_dir = dir.path().join("embeddings").join("sfx");
    write_corpus(&audio_dir);
    let job = IndexJob {
        audio_dir: audio_dir.clone(),
        output_dir: Some(embeddings_dir.clone()),
        content_type: ContentType::Sfx,
        compute_musicness: None,
    };
    run_index_job(&hash_provider(), &job).unwrap().unwrap();
    Corpus {
        dir,
        audio_dir,
        embeddings_dir,
    }
}

pub fn load_index(corpus: &Corpus) -> SimilarityIndex {
    let mut index = SimilarityIndex::new(&corpus.audio_dir, RerankSettings::default());
    index.load_general_corpus(&corpus.embeddings_dir).unwrap();
    index
}

/// Provider with fixed answers: unknown text detects as English and fails
/// to translate.
#[derive(Default)]
pub struct FakeTranslator {
    pub detections: HashMap<String, (String, f32)>,
    pub translations: HashMap<String, String>,
    pub rate_limited: bool,
    pub translate_calls: AtomicUsize,
}

impl FakeTranslator {
    pub fn detects(mut self, text: &str, lang: &str, confidence: f32) -> Self {
        self.detections
            .insert(text.to_string(), (lang.to_string(), confidence));
        self
    }

    pub fn translates(mut self, text: &str, to: &str) -> Self {
        self.translations.insert(text.to_string(), to.to_string());
        self
    }

    pub fn rate_limited(mut self) -> Self {
        self.rate_limited = true;
        self
    }
}

#[async_trait]
impl TranslationProvider for FakeTranslator {
    fn name(&self) -> &str {
        "fake"
    }

    async fn detect(&self, text: &str) -> Result<Detection, ProviderError> {
        let (lang, confidence) = self
            .detections
            .get(text)
            .cloned()
            .unwrap_or_else(|| ("en".to_string(), 0.99));
        Ok(Detection {
            lang_code: Some(lang),
            confidence,
        })
    }

    async fn translate(&self, text: &str, _source: &str, target: &str) -> Result<String, ProviderError> {
        self.translate_calls.fetch_add(1, Ordering::SeqCst);
        if self.rate_limited {
            return Err(ProviderError::RateLimited);
        }
        if let Some(out) = self.translations.get(text) {
            return Ok(out.clone());
        }
        if target != "en" {
            return Ok(format!("{} {text}", target.to_uppercase()));
        }
        Err(ProviderError::Network("no scripted translation".into()))
    }
}

/// Counts calls and always answers `song`.
#[derive(Default)]
pub struct CountingClassifier {
    pub calls: AtomicUsize,
}

impl ContentClassifier for CountingClassifier {
    fn detect(&self, _english_text: &str) -> ContentTypeDetection {
        self.calls.fetch_add(1, Ordering::SeqCst);
        ContentTypeDetection {
            content_type: ContentType::Song,
            confidence: 1.0,
            matched_keywords: vec!["music".into()],
        }
    }
}

pub fn pipeline_with(
    corpus: &Corpus,
    translator: FakeTranslator,
    classifier: Arc<dyn ContentClassifier>,
) -> SearchPipeline {
    let resolver = LanguageResolver::new(Arc::new(translator), &TranslationSettings::default());
    SearchPipeline::new(
        Arc::new(resolver),
        classifier,
        QueryEnhancer::default(),
        Arc::new(hash_provider()),
        Arc::new(load_index(corpus)),
    )
}

pub fn keyword_classifier() -> Arc<dyn ContentClassifier> {
    Arc::new(KeywordContentDetector::from_path(&keywords_path()).unwrap())
}
