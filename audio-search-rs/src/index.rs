//! Flat inner-product vector index and the two-corpus similarity search
//! built on it.
//!
//! `.asvi` layout (little endian):
//! magic `ASVI` | version u16 | dim u32 | count u64 | count*dim f32 rows

use crate::config::RerankSettings;
use crate::content_type::ContentType;
use crate::embedding::EMBEDDING_DIM;
use crate::error::{AudioSearchError, Result};
use crate::npz::NpzReader;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Component, Path, PathBuf};
use tracing::{error, info, warn};

pub const ASVI_MAGIC: [u8; 4] = *b"ASVI";
pub const ASVI_VERSION: u16 = 1;
pub const INDEX_FILE: &str = "index.asvi";
pub const METADATA_FILE: &str = "metadata.json";
pub const EMBEDDINGS_FILE: &str = "embeddings.npz";
pub const CONTENT_SCORES_FILE: &str = "content_scores.npz";
const NORM_EPS: f32 = 1e-8;

/// Unit-normalised vectors searched by exhaustive inner product.
#[derive(Debug, Clone, PartialEq)]
pub struct FlatIndex {
    vectors: Array2<f32>,
}

impl FlatIndex {
    /// Normalises every row to unit length; rows must be `EMBEDDING_DIM` wide.
    pub fn build(mut embeddings: Array2<f32>) -> Result<Self> {
        if embeddings.ncols() != EMBEDDING_DIM {
            let msg = format!(
                "Embeddings must have dimension {EMBEDDING_DIM}, got {}",
                embeddings.ncols()
            );
            error!("{msg}");
            return Err(AudioSearchError::Usage(msg));
        }
        info!(
            vectors = embeddings.nrows(),
            dim = EMBEDDING_DIM,
            "Building flat index"
        );
        embeddings
            .axis_iter_mut(Axis(0))
            .into_par_iter()
            .for_each(|mut row| {
                let norm = row.dot(&row).sqrt();
                row.mapv_inplace(|x| x / (norm + NORM_EPS));
            });
        Ok(Self {
            vectors: embeddings,
        })
    }

    pub fn from_rows(rows: &[Vec<f32>]) -> Result<Self> {
        let dim = rows.first().map_or(EMBEDDING_DIM, Vec::len);
        let flat: Vec<f32> = rows.iter().flatten().copied().collect();
        let array = Array2::from_shape_vec((rows.len(), dim), flat)
            .map_err(|e| AudioSearchError::Usage(format!("ragged embedding rows: {e}")))?;
        Self::build(array)
    }

    pub fn len(&self) -> usize {
        self.vectors.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dim(&self) -> usize {
        self.vectors.ncols()
    }

    pub fn vectors(&self) -> ArrayView2<'_, f32> {
        self.vectors.view()
    }

    /// Top `k` rows by inner product, best first; ties keep row order.
    pub fn search(&self, query: ArrayView1<f32>, k: usize) -> Vec<(usize, f32)> {
        let scores: Array1<f32> = self.vectors.dot(&query);
        let mut ranked: Vec<(usize, f32)> = scores.iter().copied().enumerate().collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(k);
        ranked
    }

    /// Written to a temp file first, then renamed into place.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let temp_path = path.with_extension("asvi.tmp");
        {
            let mut w = BufWriter::new(File::create(&temp_path)?);
            w.write_all(&ASVI_MAGIC)?;
            w.write_all(&ASVI_VERSION.to_le_bytes())?;
            w.write_all(&(self.dim() as u32).to_le_bytes())?;
            w.write_all(&(self.len() as u64).to_le_bytes())?;
            for v in self.vectors.iter() {
                w.write_all(&v.to_le_bytes())?;
            }
            w.flush()?;
        }
        std::fs::rename(&temp_path, path)?;
        info!(
            path = %path.display(),
            vectors = self.len(),
            "Index saved"
        );
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let mut r = BufReader::new(File::open(path)?);
        let invalid = |msg: String| {
            AudioSearchError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("{}: {msg}", path.display()),
            ))
        };
        let mut magic = [0u8; 4];
        r.read_exact(&mut magic)?;
        if magic != ASVI_MAGIC {
            return Err(invalid("not an index file".into()));
        }
        let mut u16_buf = [0u8; 2];
        r.read_exact(&mut u16_buf)?;
        let version = u16::from_le_bytes(u16_buf);
        if version != ASVI_VERSION {
            return Err(invalid(format!("unsupported index version {version}")));
        }
        let mut u32_buf = [0u8; 4];
        r.read_exact(&mut u32_buf)?;
        let dim = u32::from_le_bytes(u32_buf) as usize;
        let mut u64_buf = [0u8; 8];
        r.read_exact(&mut u64_buf)?;
        let count = usize::try_from(u64::from_le_bytes(u64_buf))
            .map_err(|_| invalid("vector count does not fit in memory".into()))?;
        if dim != EMBEDDING_DIM {
            return Err(invalid(format!("index dimension {dim}, expected {EMBEDDING_DIM}")));
        }

        let expected = count
            .checked_mul(dim)
            .and_then(|n| n.checked_mul(4))
            .ok_or_else(|| invalid(format!("vector count {count} is out of range")))?;
        let mut body = Vec::new();
        r.read_to_end(&mut body)?;
        if body.len() != expected {
            return Err(invalid(format!(
                "expected {expected} bytes of vectors, found {}",
                body.len()
            )));
        }
        let data: Vec<f32> = body
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        let vectors = Array2::from_shape_vec((count, dim), data)
            .map_err(|e| invalid(e.to_string()))?;
        info!(path = %path.display(), vectors = count, "Index loaded");
        Ok(Self { vectors })
    }
}

/// Parallel per-entry metadata written next to each index.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CorpusMetadata {
    #[serde(default)]
    pub filenames: Vec<String>,
    #[serde(default)]
    pub file_paths: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<CorpusSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CorpusSummary {
    pub num_files: usize,
    pub embedding_dim: usize,
}

impl CorpusMetadata {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            let msg = format!("Metadata file not found: {}", path.display());
            error!("{msg}");
            return Err(AudioSearchError::Corpus(msg));
        }
        let raw = std::fs::read_to_string(path)?;
        let meta: Self = serde_json::from_str(&raw).map_err(|e| {
            AudioSearchError::Corpus(format!("Invalid JSON in metadata file {}: {e}", path.display()))
        })?;
        info!(files = meta.filenames.len(), "Metadata loaded");
        Ok(meta)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

/// Read the `embeddings` array of an `embeddings.npz` file.
pub fn load_embeddings(path: &Path) -> Result<Array2<f32>> {
    if !path.exists() {
        let msg = format!("Embeddings file not found: {}", path.display());
        error!("{msg}");
        return Err(AudioSearchError::Corpus(msg));
    }
    let mut npz = NpzReader::open(path)?;
    if !npz.contains("embeddings") {
        return Err(AudioSearchError::Corpus(format!(
            "'embeddings' key not found in {}",
            path.display()
        )));
    }
    let arr = npz.read_f32("embeddings")?;
    let (rows, cols) = match arr.shape.as_slice() {
        [rows, cols] => (*rows, *cols),
        other => {
            return Err(AudioSearchError::Corpus(format!(
                "Embeddings must be 2D array, got {}D",
                other.len()
            )))
        }
    };
    info!(rows, cols, "Embeddings loaded");
    Array2::from_shape_vec((rows, cols), arr.data)
        .map_err(|e| AudioSearchError::Corpus(e.to_string()))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub filename: String,
    pub similarity: f32,
    pub audio_url: String,
}

/// General (sfx) and optional music corpora, read-only while serving.
pub struct SimilarityIndex {
    audio_dir: PathBuf,
    rerank: RerankSettings,
    general: Option<FlatIndex>,
    general_meta: CorpusMetadata,
    musicness: Option<Vec<f32>>,
    music: Option<FlatIndex>,
    music_meta: CorpusMetadata,
}

struct Target<'a> {
    index: Option<&'a FlatIndex>,
    meta: &'a CorpusMetadata,
    musicness: Option<&'a [f32]>,
    weight: f32,
}

impl SimilarityIndex {
    pub fn new(audio_dir: impl Into<PathBuf>, rerank: RerankSettings) -> Self {
        Self {
            audio_dir: audio_dir.into(),
            rerank,
            general: None,
            general_meta: CorpusMetadata::default(),
            musicness: None,
            music: None,
            music_meta: CorpusMetadata::default(),
        }
    }

    pub fn build_index(&mut self, embeddings: Array2<f32>) -> Result<()> {
        let index = FlatIndex::build(embeddings)?;
        info!(vectors = index.len(), "General index built");
        self.general = Some(index);
        Ok(())
    }

    pub fn build_music_index(&mut self, embeddings: Array2<f32>, metadata: CorpusMetadata) -> Result<()> {
        let index = FlatIndex::build(embeddings)?;
        info!(vectors = index.len(), "Music index built");
        self.music = Some(index);
        self.music_meta = metadata;
        Ok(())
    }

    pub fn set_metadata(&mut self, metadata: CorpusMetadata) {
        self.general_meta = metadata;
    }

    pub fn set_musicness(&mut self, scores: Option<Vec<f32>>) {
        self.musicness = scores;
    }

    pub fn is_built(&self) -> bool {
        self.general.is_some()
    }

    pub fn has_music_index(&self) -> bool {
        self.music.is_some()
    }

    pub fn len(&self) -> usize {
        self.general.as_ref().map_or(0, FlatIndex::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn save_index(&self, path: &Path) -> Result<()> {
        let index = self.general.as_ref().ok_or_else(|| {
            AudioSearchError::NotBuilt("Cannot save index: index has not been built yet.".into())
        })?;
        index.save(path)
    }

    /// On failure the previously loaded index is dropped.
    pub fn load_index(&mut self, path: &Path) -> Result<()> {
        match FlatIndex::load(path) {
            Ok(index) => {
                self.general = Some(index);
                Ok(())
            }
            Err(e) => {
                error!(path = %path.display(), error = %e, "Failed to load index");
                self.general = None;
                Err(e)
            }
        }
    }

    /// Load the general corpus from `dir`: the saved index when usable,
    /// else rebuilt from `embeddings.npz`. Metadata is required; content
    /// scores are optional.
    pub fn load_general_corpus(&mut self, dir: &Path) -> Result<()> {
        let index_path = dir.join(INDEX_FILE);
        if index_path.exists() {
            if let Err(e) = self.load_index(&index_path) {
                warn!(
                    path = %index_path.display(),
                    error = %e,
                    "Failed to load existing index. Rebuilding from embeddings."
                );
            }
        }
        if self.general.is_none() {
            self.build_index(load_embeddings(&dir.join(EMBEDDINGS_FILE))?)?;
        }
        self.general_meta = CorpusMetadata::load(&dir.join(METADATA_FILE))?;
        if self.general_meta.filenames.len() != self.len() {
            warn!(
                index = self.len(),
                metadata = self.general_meta.filenames.len(),
                "Index and metadata sizes differ"
            );
        }
        self.musicness = load_content_scores(&dir.join(CONTENT_SCORES_FILE));
        Ok(())
    }

    /// Returns false (after logging) when the music corpus is unavailable.
    pub fn load_music_corpus(&mut self, dir: &Path) -> bool {
        let index_path = dir.join(INDEX_FILE);
        let metadata_path = dir.join(METADATA_FILE);
        if !index_path.exists() || !metadata_path.exists() {
            warn!(dir = %dir.display(), "Music index or metadata not found");
            return false;
        }
        match FlatIndex::load(&index_path).and_then(|index| Ok((index, CorpusMetadata::load(&metadata_path)?))) {
            Ok((index, meta)) => {
                self.music = Some(index);
                self.music_meta = meta;
                true
            }
            Err(e) => {
                error!(error = %e, "Failed to load music index");
                self.music = None;
                self.music_meta = CorpusMetadata::default();
                false
            }
        }
    }

    /// Raw-similarity search of the general corpus.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchResult>> {
        let results = self.search_target(
            Target {
                index: self.general.as_ref(),
                meta: &self.general_meta,
                musicness: None,
                weight: 0.0,
            },
            query,
            k,
            ContentType::Sfx,
        )?;
        match results.first() {
            Some(top) => info!(count = results.len(), top = top.similarity, "Returning results"),
            None => info!("Returning 0 results"),
        }
        Ok(results)
    }

    /// Route to the music or general corpus and blend with musicness when
    /// re-ranking applies.
    pub fn search_by_content_type(
        &self,
        query: &[f32],
        content_type: ContentType,
        k: usize,
    ) -> Result<Vec<SearchResult>> {
        let rerank_weight = if self.rerank.enabled {
            self.rerank.weight
        } else {
            0.0
        };
        let general = Target {
            index: self.general.as_ref(),
            meta: &self.general_meta,
            musicness: self.musicness.as_deref(),
            weight: rerank_weight,
        };
        let target = match (content_type, &self.music) {
            (ContentType::Song, Some(music)) => Target {
                index: Some(music),
                meta: &self.music_meta,
                musicness: None,
                weight: 0.0,
            },
            (ContentType::Song, None) => {
                warn!("Music index unavailable; falling back to general audio index.");
                general
            }
            (ContentType::Sfx, _) => general,
        };
        self.search_target(target, query, k, content_type)
    }

    fn search_target(
        &self,
        target: Target<'_>,
        query: &[f32],
        k: usize,
        content_type: ContentType,
    ) -> Result<Vec<SearchResult>> {
        let index = target.index.ok_or_else(|| {
            let msg = "Index has not been built. Call build_index() first.";
            error!("{msg}");
            AudioSearchError::NotBuilt(msg.into())
        })?;
        if query.len() != EMBEDDING_DIM {
            let msg = format!(
                "Query embedding must have dimension {EMBEDDING_DIM}, got {}",
                query.len()
            );
            error!("{msg}");
            return Err(AudioSearchError::Usage(msg));
        }
        if index.is_empty() {
            warn!("Index is empty; returning no results");
            return Ok(Vec::new());
        }
        let mut k = k;
        if k > index.len() {
            info!(k, size = index.len(), "Requested k exceeds index size; reducing k");
            k = index.len();
        }

        let norm = query.iter().map(|x| x * x).sum::<f32>().sqrt();
        let normalized: Array1<f32> = query.iter().map(|x| x / (norm + NORM_EPS)).collect();
        let hits = index.search(normalized.view(), k);

        let filenames = &target.meta.filenames;
        let file_paths = &target.meta.file_paths;
        let musicness = target
            .musicness
            .filter(|m| target.weight > 0.0 && m.len() >= filenames.len());

        let mut scored: Vec<(f32, SearchResult)> = Vec::with_capacity(hits.len());
        for (idx, score) in hits {
            let Some(filename) = filenames.get(idx) else {
                warn!(idx, "Invalid index returned from search");
                continue;
            };
            let file_path = file_paths.get(idx).unwrap_or(filename);
            let similarity = ((score + 1.0) / 2.0).clamp(0.0, 1.0);
            let rank_score = match musicness.and_then(|m| m.get(idx)) {
                Some(&m) => {
                    let m = m.clamp(0.0, 1.0);
                    let target_score = match content_type {
                        ContentType::Song => m,
                        ContentType::Sfx => 1.0 - m,
                    };
                    (1.0 - target.weight) * similarity + target.weight * target_score
                }
                None => similarity,
            };
            scored.push((
                rank_score,
                SearchResult {
                    filename: filename.clone(),
                    similarity,
                    audio_url: self.build_audio_url(file_path, filename),
                },
            ));
        }
        if musicness.is_some() {
            info!(weight = target.weight, content_type = %content_type, "Applied content re-ranking");
        }
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));
        Ok(scored.into_iter().map(|(_, r)| r).collect())
    }

    /// `/audio/<path relative to the audio root>`, or `/audio/<filename>`
    /// when the path lies outside it.
    fn build_audio_url(&self, file_path: &str, filename: &str) -> String {
        let path = Path::new(file_path);
        if !path.is_absolute() {
            if path.components().any(|c| c == Component::ParentDir) {
                return format!("/audio/{filename}");
            }
            return format!("/audio/{}", posix(path));
        }
        let resolved = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        let root = std::fs::canonicalize(&self.audio_dir).unwrap_or_else(|_| self.audio_dir.clone());
        match resolved.strip_prefix(&root) {
            Ok(rel) => format!("/audio/{}", posix(rel)),
            Err(_) => format!("/audio/{filename}"),
        }
    }
}

/// Forward-slash form of the normal components of `path`.
pub(crate) fn posix(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Optional `musicness` scores; any problem is logged and ignored.
fn load_content_scores(path: &Path) -> Option<Vec<f32>> {
    if !path.exists() {
        return None;
    }
    let loaded = NpzReader::open(path).and_then(|mut npz| {
        if !npz.contains("musicness") {
            return Ok(None);
        }
        npz.read_f32("musicness").map(|a| Some(a.data))
    });
    match loaded {
        Ok(Some(scores)) => {
            info!(path = %path.display(), entries = scores.len(), "Loaded content scores");
            Some(scores)
        }
        Ok(None) => {
            warn!("content_scores.npz missing 'musicness' array");
            None
        }
        Err(e) => {
            warn!(error = %e, "Failed to load content scores");
            None
        }
    }
}
