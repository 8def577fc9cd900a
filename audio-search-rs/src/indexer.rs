//! Offline corpus indexing: embed every audio file under a directory and
//! write the artifacts the search service loads at startup.

use crate::audio::expand_audio_files;
use crate::content_type::ContentType;
use crate::embedding::{average_embeddings, dot, l2_normalize, EmbeddingProvider, EMBEDDING_DIM};
use crate::error::Result;
use crate::index::{
    posix, CorpusMetadata, CorpusSummary, FlatIndex, CONTENT_SCORES_FILE, EMBEDDINGS_FILE,
    INDEX_FILE, METADATA_FILE,
};
use crate::npz::NpzWriter;
use ndarray::ArrayView2;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

pub const BATCH_SIZE: usize = 16;
pub const PROGRESS_INTERVAL: usize = 10;
pub const MUSIC_PROMPTS: &[&str] = &["music track", "song with vocals", "instrumental music", "melody"];
pub const SFX_PROMPTS: &[&str] = &["sound effect", "ambient noise", "sound of something", "fx sound"];

#[derive(Debug, Clone)]
pub struct IndexJob {
    pub audio_dir: PathBuf,
    /// Defaults to `data/embeddings/<content type>`.
    pub output_dir: Option<PathBuf>,
    pub content_type: ContentType,
    /// Defaults to true for everything but songs.
    pub compute_musicness: Option<bool>,
}

impl IndexJob {
    pub fn output_dir(&self) -> PathBuf {
        self.output_dir
            .clone()
            .unwrap_or_else(|| Path::new("data/embeddings").join(self.content_type.as_str()))
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct IndexSummary {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub output_dir: PathBuf,
    pub musicness_written: bool,
}

struct Progress {
    done: usize,
    total: usize,
}

impl Progress {
    fn advance(&mut self, n: usize) {
        self.done += n;
        if self.done % PROGRESS_INTERVAL == 0 || self.done == self.total {
            info!("Processed {}/{} files", self.done, self.total);
        }
    }
}

/// Returns `None` when the directory holds no supported audio.
pub fn run_index_job(provider: &EmbeddingProvider, job: &IndexJob) -> Result<Option<IndexSummary>> {
    let files = expand_audio_files(&job.audio_dir)?;
    if files.is_empty() {
        warn!(dir = %job.audio_dir.display(), "No audio files found");
        return Ok(None);
    }
    let audio_root = std::fs::canonicalize(&job.audio_dir)?;

    let mut progress = Progress {
        done: 0,
        total: files.len(),
    };
    let mut rows: Vec<Vec<f32>> = Vec::with_capacity(files.len());
    let mut successful: Vec<PathBuf> = Vec::with_capacity(files.len());
    let mut failed = 0usize;

    for batch in files.chunks(BATCH_SIZE) {
        match provider.embed_audio_files(batch, job.content_type) {
            Ok(embeddings) => {
                rows.extend(embeddings);
                successful.extend_from_slice(batch);
                progress.advance(batch.len());
            }
            Err(e) => {
                warn!(error = %e, "Batch embedding failed, falling back to per-file processing");
                for path in batch {
                    match provider.embed_audio_files(std::slice::from_ref(path), job.content_type) {
                        Ok(mut one) => {
                            rows.append(&mut one);
                            successful.push(path.clone());
                        }
                        Err(e) => {
                            failed += 1;
                            error!(path = %path.display(), error = %e, "Skipping file");
                        }
                    }
                    progress.advance(1);
                }
            }
        }
    }
    if rows.is_empty() {
        warn!("No embeddings generated successfully; output will be empty.");
    }

    let filenames: Vec<String> = successful
        .iter()
        .map(|p| {
            p.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default()
        })
        .collect();
    let file_paths: Vec<String> = successful
        .iter()
        .map(|p| match std::fs::canonicalize(p) {
            Ok(abs) => match abs.strip_prefix(&audio_root) {
                Ok(rel) => posix(rel),
                Err(_) => p.to_string_lossy().into_owned(),
            },
            Err(_) => p.to_string_lossy().into_owned(),
        })
        .collect();

    let output_dir = job.output_dir();
    std::fs::create_dir_all(&output_dir)?;

    let flat: Vec<f32> = rows.iter().flatten().copied().collect();
    let mut npz = NpzWriter::create(&output_dir.join(EMBEDDINGS_FILE))?;
    npz.add_f32("embeddings", &[rows.len(), EMBEDDING_DIM], &flat)?;
    npz.add_strings("filenames", &filenames)?;
    npz.finish()?;
    info!(path = %output_dir.join(EMBEDDINGS_FILE).display(), "Saved embeddings");

    let metadata = CorpusMetadata {
        metadata: Some(CorpusSummary {
            num_files: filenames.len(),
            embedding_dim: if rows.is_empty() { 0 } else { EMBEDDING_DIM },
        }),
        filenames,
        file_paths,
    };
    metadata.save(&output_dir.join(METADATA_FILE))?;
    info!(path = %output_dir.join(METADATA_FILE).display(), "Saved metadata");

    let index = if rows.is_empty() {
        FlatIndex::build(ndarray::Array2::zeros((0, EMBEDDING_DIM)))?
    } else {
        FlatIndex::from_rows(&rows)?
    };
    index.save(&output_dir.join(INDEX_FILE))?;

    let compute = job
        .compute_musicness
        .unwrap_or(job.content_type != ContentType::Song);
    let mut musicness_written = false;
    if compute && !index.is_empty() {
        let scores = compute_musicness(index.vectors(), provider, job.content_type)?;
        let mut npz = NpzWriter::create(&output_dir.join(CONTENT_SCORES_FILE))?;
        npz.add_f32("musicness", &[scores.len()], &scores)?;
        npz.finish()?;
        info!(path = %output_dir.join(CONTENT_SCORES_FILE).display(), "Saved content scores");
        musicness_written = true;
    }

    let summary = IndexSummary {
        total: files.len(),
        successful: successful.len(),
        failed,
        output_dir,
        musicness_written,
    };
    info!(
        total = summary.total,
        successful = summary.successful,
        failed = summary.failed,
        output = %summary.output_dir.display(),
        "Embedding generation summary"
    );
    Ok(Some(summary))
}

/// How music-like each (unit-normalised) row is, in [0, 1]:
/// `((e·m) - (e·s) + 2) / 4` against the averaged music and sfx prompts.
pub fn compute_musicness(
    normalized: ArrayView2<'_, f32>,
    provider: &EmbeddingProvider,
    content_type: ContentType,
) -> Result<Vec<f32>> {
    let prompts: Vec<String> = MUSIC_PROMPTS
        .iter()
        .chain(SFX_PROMPTS)
        .map(|p| p.to_string())
        .collect();
    let mut text = provider.embed_batch(&prompts, content_type)?;
    text.iter_mut().for_each(|v| l2_normalize(v));
    let sfx = text.split_off(MUSIC_PROMPTS.len());
    let music_vector = average_embeddings(&text)?;
    let sfx_vector = average_embeddings(&sfx)?;

    Ok(normalized
        .rows()
        .into_iter()
        .map(|row| {
            let row = row.to_vec();
            let diff = dot(&row, &music_vector) - dot(&row, &sfx_vector);
            ((diff + 2.0) / 4.0).clamp(0.0, 1.0)
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{Device, EmbeddingBackend, HashBackend};

    fn provider() -> EmbeddingProvider {
        let mut p = EmbeddingProvider::new(Device::Cpu, 0.0);
        p.load_model(|d| Ok(Box::new(HashBackend::new("general", d)) as Box<dyn EmbeddingBackend>))
            .unwrap();
        p
    }

    #[test]
    fn default_output_dir_follows_content_type() {
        let job = IndexJob {
            audio_dir: "x".into(),
            output_dir: None,
            content_type: ContentType::Song,
            compute_musicness: None,
        };
        assert_eq!(job.output_dir(), Path::new("data/embeddings/song"));
    }

    #[test]
    fn musicness_is_bounded() {
        let p = provider();
        let rows = p
            .embed_batch(&["music track melody".into(), "sound effect".into()], ContentType::Sfx)
            .unwrap();
        let index = FlatIndex::from_rows(&rows).unwrap();
        let scores = compute_musicness(index.vectors(), &p, ContentType::Sfx).unwrap();
        assert_eq!(scores.len(), 2);
        assert!(scores.iter().all(|s| (0.0..=1.0).contains(s)));
        assert!(scores[0] > scores[1]);
    }

    #[test]
    fn empty_directory_produces_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let job = IndexJob {
            audio_dir: dir.path().to_path_buf(),
            output_dir: Some(dir.path().join("out")),
            content_type: ContentType::Sfx,
            compute_musicness: None,
        };
        assert_eq!(run_index_job(&provider(), &job).unwrap(), None);
        assert!(!dir.path().join("out").exists());
    }
}
