//! Text/audio embedding models and the provider that routes between them.
//!
//! Two model families are kept: "general" (sound effects and fallback) and
//! "music" (songs). Vectors from different families are not comparable.

use crate::audio::{self, N_MELS, TARGET_SAMPLE_RATE};
use crate::config::ModelSettings;
use crate::content_type::ContentType;
use crate::error::{AudioSearchError, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, RwLock};
use tracing::{debug, error, info, warn};

pub const EMBEDDING_DIM: usize = 512;
/// Below this much accelerator memory only one model may live on it.
pub const SWAP_THRESHOLD_GB: f32 = 4.0;
pub const MAX_LOAD_ATTEMPTS: u32 = 3;
const NORM_EPS: f32 = 1e-8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Device {
    Cuda,
    Mps,
    Cpu,
}

impl Device {
    pub fn as_str(&self) -> &'static str {
        match self {
            Device::Cuda => "cuda",
            Device::Mps => "mps",
            Device::Cpu => "cpu",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "cuda" => Ok(Device::Cuda),
            "mps" => Ok(Device::Mps),
            "cpu" => Ok(Device::Cpu),
            other => Err(AudioSearchError::Config(format!("Unknown device: {other}"))),
        }
    }
}

/// Pick a device: explicit override, else cuda → mps → cpu.
pub fn detect_device(requested: &str) -> Result<Device> {
    let requested = requested.trim();
    if !requested.is_empty() && !requested.eq_ignore_ascii_case("auto") {
        let device = Device::parse(requested)?;
        info!(device = device.as_str(), "Using device override");
        return Ok(device);
    }
    let device = if Path::new("/proc/driver/nvidia/version").exists() {
        Device::Cuda
    } else if cfg!(all(target_os = "macos", target_arch = "aarch64")) {
        Device::Mps
    } else {
        Device::Cpu
    };
    info!(device = device.as_str(), "Auto-detected device");
    Ok(device)
}

/// A loaded CLAP-style model able to embed both modalities into one space.
pub trait EmbeddingBackend: Send + Sync {
    fn embed_text(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>>;
    fn embed_audio(&self, path: &Path) -> Result<Vec<f32>>;
    /// All-or-nothing: any failing file fails the whole batch.
    fn embed_audio_batch(&self, paths: &[PathBuf]) -> Result<Vec<Vec<f32>>> {
        paths.iter().map(|p| self.embed_audio(p)).collect()
    }
    fn model_name(&self) -> &str;
    fn device(&self) -> Device;
    fn transfer_to(&mut self, device: Device) -> Result<()>;
}

/// In-place L2 normalisation with an epsilon-guarded divisor.
pub fn l2_normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    let denom = norm.max(NORM_EPS);
    for x in v.iter_mut() {
        *x /= denom;
    }
}

pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Mean of the vectors, renormalised to unit length. A single vector is
/// returned unchanged.
pub fn average_embeddings(vectors: &[Vec<f32>]) -> Result<Vec<f32>> {
    let first = vectors
        .first()
        .ok_or_else(|| AudioSearchError::Usage("Cannot average an empty embedding list".into()))?;
    if vectors.len() == 1 {
        return Ok(first.clone());
    }
    let dim = first.len();
    if let Some(bad) = vectors.iter().find(|v| v.len() != dim) {
        return Err(AudioSearchError::Usage(format!(
            "Embedding dimension mismatch: {} vs {dim}",
            bad.len()
        )));
    }
    let mut mean = vec![0f32; dim];
    for v in vectors {
        for (m, x) in mean.iter_mut().zip(v) {
            *m += x;
        }
    }
    let n = vectors.len() as f32;
    mean.iter_mut().for_each(|m| *m /= n);
    l2_normalize(&mut mean);
    Ok(mean)
}

// ---------------- Hash backend ----------------

fn fnv1a(bytes: &[u8], salt: u64) -> u64 {
    let mut hash = 0xcbf2_9ce4_8422_2325u64 ^ salt;
    for b in bytes {
        hash ^= *b as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Deterministic backend without model files. Text is feature-hashed
/// (unigrams and bigrams, FNV-1a). Audio combines the hashed file-name
/// tokens with a seeded random projection of log-mel statistics, so
/// descriptively named corpora rank sensibly.
pub struct HashBackend {
    name: String,
    salt: u64,
    projection: Vec<f32>,
    device: Device,
}

const NAME_WEIGHT: f32 = 0.8;

impl HashBackend {
    pub fn new(family: &str, device: Device) -> Self {
        let salt = fnv1a(family.as_bytes(), 0);
        let mut rng = StdRng::seed_from_u64(salt);
        let projection = (0..2 * N_MELS * EMBEDDING_DIM)
            .map(|_| rng.gen_range(-1.0f32..1.0))
            .collect();
        Self {
            name: format!("hash-{family}-{EMBEDDING_DIM}"),
            salt,
            projection,
            device,
        }
    }

    fn hash_tokens(&self, tokens: &[String]) -> Vec<f32> {
        let mut v = vec![0f32; EMBEDDING_DIM];
        let mut add = |feature: &str, weight: f32| {
            let h = fnv1a(feature.as_bytes(), self.salt);
            let idx = (h % EMBEDDING_DIM as u64) as usize;
            let sign = if (h >> 63) == 0 { 1.0 } else { -1.0 };
            v[idx] += sign * weight;
        };
        for t in tokens {
            add(t, 1.0);
        }
        for pair in tokens.windows(2) {
            add(&format!("{} {}", pair[0], pair[1]), 0.5);
        }
        l2_normalize(&mut v);
        v
    }

    fn acoustic_features(&self, path: &Path) -> Result<Vec<f32>> {
        let pcm = audio::load_audio(path, TARGET_SAMPLE_RATE)?;
        let frames = audio::log_mel_spectrogram(&pcm, TARGET_SAMPLE_RATE);
        if frames.is_empty() {
            return Err(AudioSearchError::Model(format!(
                "Audio too short to embed: {}",
                path.display()
            )));
        }
        let n = frames.len() as f32;
        let mut stats = vec![0f32; 2 * N_MELS];
        for frame in &frames {
            for (m, v) in frame.iter().enumerate() {
                stats[m] += v / n;
            }
        }
        for frame in &frames {
            for (m, v) in frame.iter().enumerate() {
                stats[N_MELS + m] += (v - stats[m]).powi(2) / n;
            }
        }
        for s in &mut stats[N_MELS..] {
            *s = s.sqrt();
        }
        let mut out = vec![0f32; EMBEDDING_DIM];
        for (i, s) in stats.iter().enumerate() {
            let row = &self.projection[i * EMBEDDING_DIM..(i + 1) * EMBEDDING_DIM];
            for (o, w) in out.iter_mut().zip(row) {
                *o += s * w;
            }
        }
        l2_normalize(&mut out);
        Ok(out)
    }
}

impl EmbeddingBackend for HashBackend {
    fn embed_text(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.hash_tokens(&tokenize(t))).collect())
    }

    fn embed_audio(&self, path: &Path) -> Result<Vec<f32>> {
        let acoustic = self.acoustic_features(path)?;
        let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
        let named = self.hash_tokens(&tokenize(stem));
        let mut v: Vec<f32> = named
            .iter()
            .zip(&acoustic)
            .map(|(n, a)| NAME_WEIGHT * n + (1.0 - NAME_WEIGHT) * a)
            .collect();
        l2_normalize(&mut v);
        Ok(v)
    }

    fn model_name(&self) -> &str {
        &self.name
    }

    fn device(&self) -> Device {
        self.device
    }

    fn transfer_to(&mut self, device: Device) -> Result<()> {
        self.device = device;
        Ok(())
    }
}

// ---------------- Tract (ONNX) backend ----------------

#[cfg(feature = "tract")]
mod tract_backend {
    use super::{l2_normalize, Device, EmbeddingBackend, EMBEDDING_DIM};
    use crate::audio::{self, N_MELS, TARGET_SAMPLE_RATE};
    use crate::error::{AudioSearchError, Result};
    use std::path::Path;
    use tokenizers::Tokenizer;
    use tract_onnx::prelude::*;

    type Plan = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

    fn model_err(e: impl std::fmt::Display) -> AudioSearchError {
        AudioSearchError::Model(e.to_string())
    }

    fn load_plan(path: &Path) -> Result<Plan> {
        tract_onnx::onnx()
            .model_for_path(path)
            .map_err(model_err)?
            .into_optimized()
            .map_err(model_err)?
            .into_runnable()
            .map_err(model_err)
    }

    pub struct TractBackend {
        audio_model: Plan,
        text_model: Plan,
        tokenizer: Tokenizer,
        name: String,
        device: Device,
    }

    impl TractBackend {
        pub fn from_paths(audio: &Path, text: &Path, tokenizer: &Path, family: &str) -> Result<Self> {
            let tokenizer = Tokenizer::from_file(tokenizer).map_err(model_err)?;
            Ok(Self {
                audio_model: load_plan(audio)?,
                text_model: load_plan(text)?,
                tokenizer,
                name: format!("clap-tract-{family}"),
                device: Device::Cpu,
            })
        }

        fn rows(&self, outputs: TVec<TValue>, batch: usize) -> Result<Vec<Vec<f32>>> {
            let out = outputs
                .first()
                .ok_or_else(|| model_err("model produced no outputs"))?;
            let view = out.to_array_view::<f32>().map_err(model_err)?;
            let flat: Vec<f32> = view.iter().copied().collect();
            if flat.len() != batch * EMBEDDING_DIM {
                return Err(model_err(format!(
                    "unexpected output size {} for batch {batch}",
                    flat.len()
                )));
            }
            Ok(flat
                .chunks(EMBEDDING_DIM)
                .map(|row| {
                    let mut row = row.to_vec();
                    l2_normalize(&mut row);
                    row
                })
                .collect())
        }
    }

    impl EmbeddingBackend for TractBackend {
        fn embed_text(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
            if texts.is_empty() {
                return Ok(Vec::new());
            }
            let encodings = self
                .tokenizer
                .encode_batch(texts.to_vec(), true)
                .map_err(model_err)?;
            let max_len = encodings.iter().map(|e| e.get_ids().len()).max().unwrap_or(0);
            let batch = texts.len();
            let mut ids = tract_ndarray::Array2::<i64>::zeros((batch, max_len));
            let mut mask = tract_ndarray::Array2::<i64>::zeros((batch, max_len));
            for (i, enc) in encodings.iter().enumerate() {
                for (j, (id, m)) in enc.get_ids().iter().zip(enc.get_attention_mask()).enumerate() {
                    ids[[i, j]] = *id as i64;
                    mask[[i, j]] = *m as i64;
                }
            }
            let outputs = self
                .text_model
                .run(tvec!(Tensor::from(ids).into(), Tensor::from(mask).into()))
                .map_err(model_err)?;
            self.rows(outputs, batch)
        }

        fn embed_audio(&self, path: &Path) -> Result<Vec<f32>> {
            let pcm = audio::load_audio(path, TARGET_SAMPLE_RATE)?;
            let frames = audio::log_mel_spectrogram(&pcm, TARGET_SAMPLE_RATE);
            let mut tensor = tract_ndarray::Array4::<f32>::zeros((1, 1, frames.len(), N_MELS));
            for (f, frame) in frames.iter().enumerate() {
                for (m, v) in frame.iter().enumerate() {
                    tensor[[0, 0, f, m]] = *v;
                }
            }
            let outputs = self
                .audio_model
                .run(tvec!(Tensor::from(tensor).into()))
                .map_err(model_err)?;
            self.rows(outputs, 1)?
                .pop()
                .ok_or_else(|| model_err("empty audio embedding"))
        }

        fn model_name(&self) -> &str {
            &self.name
        }

        fn device(&self) -> Device {
            self.device
        }

        fn transfer_to(&mut self, device: Device) -> Result<()> {
            // tract executes on the CPU; placement is tracked for bookkeeping only
            self.device = device;
            Ok(())
        }
    }
}

#[cfg(feature = "tract")]
pub use tract_backend::TractBackend;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelRole {
    General,
    Music,
}

impl ModelRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelRole::General => "general",
            ModelRole::Music => "music",
        }
    }
}

/// Construct the backend named by `settings.backend` for one model family.
pub fn build_backend(
    settings: &ModelSettings,
    role: ModelRole,
    device: Device,
) -> Result<Box<dyn EmbeddingBackend>> {
    match settings.backend.trim().to_lowercase().as_str() {
        "hash" => Ok(Box::new(HashBackend::new(role.as_str(), device))),
        #[cfg(feature = "tract")]
        "tract" => {
            let (audio, text, tokenizer) = match role {
                ModelRole::General => (
                    &settings.general_audio_model,
                    &settings.general_text_model,
                    &settings.general_tokenizer,
                ),
                ModelRole::Music => (
                    &settings.music_audio_model,
                    &settings.music_text_model,
                    &settings.music_tokenizer,
                ),
            };
            match (audio, text, tokenizer) {
                (Some(a), Some(t), Some(tok)) => {
                    let mut backend = TractBackend::from_paths(a, t, tok, role.as_str())?;
                    backend.transfer_to(device)?;
                    Ok(Box::new(backend))
                }
                _ => Err(AudioSearchError::Config(format!(
                    "tract backend needs audio, text and tokenizer paths for the {} model",
                    role.as_str()
                ))),
            }
        }
        #[cfg(not(feature = "tract"))]
        "tract" => Err(AudioSearchError::Config(
            "tract backend requested but the `tract` feature is not enabled".into(),
        )),
        other => Err(AudioSearchError::Config(format!(
            "Unknown model backend: {other}"
        ))),
    }
}

type Slot = RwLock<Box<dyn EmbeddingBackend>>;

/// Owns both models and their accelerator placement.
pub struct EmbeddingProvider {
    device: Device,
    accelerator_memory_gb: f32,
    general: Option<Slot>,
    music: Option<Slot>,
    /// Which model currently occupies the accelerator. Held for the whole
    /// swap-and-embed sequence when models have to share it.
    placement: Mutex<Option<ModelRole>>,
}

impl EmbeddingProvider {
    pub fn new(device: Device, accelerator_memory_gb: f32) -> Self {
        info!(
            device = device.as_str(),
            memory_gb = accelerator_memory_gb,
            "Embedding provider initialized"
        );
        Self {
            device,
            accelerator_memory_gb,
            general: None,
            music: None,
            placement: Mutex::new(None),
        }
    }

    /// Detect the device and load the configured models.
    pub fn from_settings(settings: &ModelSettings) -> Result<Self> {
        let device = detect_device(&settings.device)?;
        let memory = if device == Device::Cuda {
            settings.accelerator_memory_gb.unwrap_or(0.0)
        } else {
            0.0
        };
        let mut provider = Self::new(device, memory);
        provider.load_model(|d| build_backend(settings, ModelRole::General, d))?;
        if settings.enable_music_model {
            provider.load_music_model(|d| build_backend(settings, ModelRole::Music, d))?;
        }
        Ok(provider)
    }

    /// Models must share the accelerator one at a time.
    pub fn swaps_models(&self) -> bool {
        self.device == Device::Cuda && self.accelerator_memory_gb < SWAP_THRESHOLD_GB
    }

    pub fn device(&self) -> Device {
        self.device
    }

    pub fn is_loaded(&self) -> bool {
        self.general.is_some()
    }

    pub fn has_music_model(&self) -> bool {
        self.music.is_some()
    }

    pub fn load_model<F>(&mut self, loader: F) -> Result<()>
    where
        F: FnMut(Device) -> Result<Box<dyn EmbeddingBackend>>,
    {
        let backend = load_with_retries(ModelRole::General, self.device, loader)?;
        self.general = Some(RwLock::new(backend));
        *lock(&self.placement)? = Some(ModelRole::General);
        Ok(())
    }

    /// The music model starts on the CPU when it cannot share the accelerator.
    pub fn load_music_model<F>(&mut self, loader: F) -> Result<()>
    where
        F: FnMut(Device) -> Result<Box<dyn EmbeddingBackend>>,
    {
        let device = if self.swaps_models() {
            Device::Cpu
        } else {
            self.device
        };
        let backend = load_with_retries(ModelRole::Music, device, loader)?;
        self.music = Some(RwLock::new(backend));
        Ok(())
    }

    pub fn model_name(&self, content_type: ContentType) -> Result<String> {
        let (_, slot) = self.select(content_type)?;
        let backend = read(slot)?;
        Ok(backend.model_name().to_string())
    }

    fn select(&self, content_type: ContentType) -> Result<(ModelRole, &Slot)> {
        let general = self.general.as_ref().ok_or_else(|| {
            error!("CLAP model is not loaded");
            AudioSearchError::NotBuilt("CLAP model is not loaded. Call load_model() first.".into())
        })?;
        Ok(match (content_type, &self.music) {
            (ContentType::Song, Some(music)) => (ModelRole::Music, music),
            _ => (ModelRole::General, general),
        })
    }

    fn slot(&self, role: ModelRole) -> Option<&Slot> {
        match role {
            ModelRole::General => self.general.as_ref(),
            ModelRole::Music => self.music.as_ref(),
        }
    }

    /// Move `target` onto the accelerator, evicting the other model first.
    fn ensure_on_accelerator(&self, occupant: &mut Option<ModelRole>, target: ModelRole) -> Result<()> {
        if *occupant == Some(target) {
            return Ok(());
        }
        let other = match target {
            ModelRole::General => ModelRole::Music,
            ModelRole::Music => ModelRole::General,
        };
        if let Some(slot) = self.slot(other) {
            write(slot)?.transfer_to(Device::Cpu)?;
        }
        if let Some(slot) = self.slot(target) {
            write(slot)?.transfer_to(self.device)?;
        }
        info!(model = target.as_str(), "Swapped model onto accelerator");
        *occupant = Some(target);
        Ok(())
    }

    fn with_model<T>(
        &self,
        content_type: ContentType,
        f: impl FnOnce(&dyn EmbeddingBackend) -> Result<T>,
    ) -> Result<T> {
        let (role, slot) = self.select(content_type)?;
        if self.swaps_models() {
            let mut occupant = lock(&self.placement)?;
            self.ensure_on_accelerator(&mut occupant, role)?;
            let backend = read(slot)?;
            f(&**backend)
        } else {
            let backend = read(slot)?;
            f(&**backend)
        }
    }

    pub fn embed(&self, text: &str, content_type: ContentType) -> Result<Vec<f32>> {
        debug!(content_type = %content_type, "Generating text embedding");
        let mut rows = self.embed_batch(&[text.to_string()], content_type)?;
        rows.pop()
            .ok_or_else(|| AudioSearchError::Model("backend returned no embedding".into()))
    }

    pub fn embed_batch(&self, texts: &[String], content_type: ContentType) -> Result<Vec<Vec<f32>>> {
        let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
        let rows = self.with_model(content_type, |m| m.embed_text(&refs))?;
        if rows.len() != texts.len() {
            return Err(AudioSearchError::Model(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                rows.len()
            )));
        }
        debug!(count = rows.len(), "Generated text embeddings");
        Ok(rows)
    }

    /// One vector for a query: single-shot for one variant, averaged and
    /// renormalised for several.
    pub fn embed_query(&self, variants: &[String], content_type: ContentType) -> Result<Vec<f32>> {
        match variants {
            [] => Err(AudioSearchError::Usage("No query text to embed".into())),
            [single] => self.embed(single, content_type),
            many => average_embeddings(&self.embed_batch(many, content_type)?),
        }
    }

    /// Audio embeddings from the model serving `content_type`.
    pub fn embed_audio_files(
        &self,
        paths: &[PathBuf],
        content_type: ContentType,
    ) -> Result<Vec<Vec<f32>>> {
        info!(files = paths.len(), "Generating audio embeddings");
        self.with_model(content_type, |m| m.embed_audio_batch(paths))
    }

    pub fn accelerator_occupant(&self) -> Option<ModelRole> {
        lock(&self.placement).ok().and_then(|g| *g)
    }
}

fn load_with_retries<F>(role: ModelRole, device: Device, mut loader: F) -> Result<Box<dyn EmbeddingBackend>>
where
    F: FnMut(Device) -> Result<Box<dyn EmbeddingBackend>>,
{
    let mut last_error = None;
    for attempt in 1..=MAX_LOAD_ATTEMPTS {
        info!(
            model = role.as_str(),
            attempt,
            max = MAX_LOAD_ATTEMPTS,
            device = device.as_str(),
            "Loading CLAP model"
        );
        match loader(device) {
            Ok(backend) => {
                info!(model = role.as_str(), name = backend.model_name(), "CLAP model loaded");
                return Ok(backend);
            }
            Err(e) => {
                error!(model = role.as_str(), attempt, max = MAX_LOAD_ATTEMPTS, error = %e, "Failed to load CLAP model");
                if attempt < MAX_LOAD_ATTEMPTS {
                    warn!("Retrying model load...");
                }
                last_error = Some(e);
            }
        }
    }
    let last = last_error.map(|e| e.to_string()).unwrap_or_default();
    Err(AudioSearchError::Model(format!(
        "Failed to load {} CLAP model after {MAX_LOAD_ATTEMPTS} attempts. Last error: {last}",
        role.as_str()
    )))
}

fn lock<T>(m: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    m.lock()
        .map_err(|_| AudioSearchError::Model("model placement lock poisoned".into()))
}

fn read(slot: &Slot) -> Result<std::sync::RwLockReadGuard<'_, Box<dyn EmbeddingBackend>>> {
    slot.read()
        .map_err(|_| AudioSearchError::Model("model lock poisoned".into()))
}

fn write(slot: &Slot) -> Result<std::sync::RwLockWriteGuard<'_, Box<dyn EmbeddingBackend>>> {
    slot.write()
        .map_err(|_| AudioSearchError::Model("model lock poisoned".into()))
}
