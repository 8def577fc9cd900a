//! Audio loading and feature extraction for the corpus side of the index.

use crate::error::{AudioSearchError, Result};
use rustfft::{num_complex::Complex, FftPlanner};
use std::fs::File;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

pub const SUPPORTED_EXTS: &[&str] = &[".wav", ".mp3", ".flac", ".ogg", ".m4a"];

/// Sample rate the CLAP audio encoders expect.
pub const TARGET_SAMPLE_RATE: u32 = 48_000;
pub const N_MELS: usize = 64;
const N_FFT: usize = 1024;

/// Decode a file to mono f32 PCM at `target_sr`. WAV goes through hound,
/// everything else through symphonia.
pub fn load_audio(path: &Path, target_sr: u32) -> Result<Vec<f32>> {
    let (pcm, sr) = if has_ext(path, "wav") {
        decode_wav(path)?
    } else {
        decode_with_symphonia(path)?
    };
    if pcm.is_empty() {
        return Err(AudioSearchError::Model(format!(
            "No audio samples decoded from {}",
            path.display()
        )));
    }
    Ok(linear_resample(&pcm, sr, target_sr))
}

fn decode_wav(path: &Path) -> Result<(Vec<f32>, u32)> {
    let reader = hound::WavReader::open(path)
        .map_err(|e| AudioSearchError::Model(format!("{}: {e}", path.display())))?;
    let spec = reader.spec();
    let chans = spec.channels.max(1) as usize;
    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| AudioSearchError::Model(e.to_string()))?,
        hound::SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample.saturating_sub(1) as u32)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| AudioSearchError::Model(e.to_string()))?
        }
    };
    let mono = samples
        .chunks(chans)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect();
    Ok((mono, spec.sample_rate))
}

fn decode_with_symphonia(path: &Path) -> Result<(Vec<f32>, u32)> {
    use symphonia::core::audio::{AudioBufferRef, Signal};
    use symphonia::core::codecs::DecoderOptions;
    use symphonia::core::errors::Error as SymphoniaError;
    use symphonia::core::formats::FormatOptions;
    use symphonia::core::io::MediaSourceStream;
    use symphonia::core::meta::MetadataOptions;
    use symphonia::core::probe::Hint;

    let model_err = |e: SymphoniaError| AudioSearchError::Model(format!("{}: {e}", path.display()));

    let file = File::open(path)?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());
    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }
    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(model_err)?;
    let mut format = probed.format;
    let track = format
        .default_track()
        .cloned()
        .ok_or_else(|| AudioSearchError::Model(format!("{}: no audio track", path.display())))?;
    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(model_err)?;

    let mut pcm: Vec<f32> = Vec::new();
    let mut src_sr = track.codec_params.sample_rate.unwrap_or(TARGET_SAMPLE_RATE);
    while let Ok(packet) = format.next_packet() {
        if packet.track_id() != track.id {
            continue;
        }
        match decoder.decode(&packet) {
            Ok(AudioBufferRef::F32(buf)) => {
                src_sr = buf.spec().rate;
                let chans = buf.spec().channels.count();
                for f in 0..buf.frames() {
                    let acc: f32 = (0..chans).map(|c| buf.chan(c)[f]).sum();
                    pcm.push(acc / chans as f32);
                }
            }
            Ok(AudioBufferRef::S16(buf)) => {
                src_sr = buf.spec().rate;
                let chans = buf.spec().channels.count();
                for f in 0..buf.frames() {
                    let acc: f32 = (0..chans)
                        .map(|c| buf.chan(c)[f] as f32 / i16::MAX as f32)
                        .sum();
                    pcm.push(acc / chans as f32);
                }
            }
            Ok(AudioBufferRef::S32(buf)) => {
                src_sr = buf.spec().rate;
                let chans = buf.spec().channels.count();
                for f in 0..buf.frames() {
                    let acc: f32 = (0..chans)
                        .map(|c| buf.chan(c)[f] as f32 / i32::MAX as f32)
                        .sum();
                    pcm.push(acc / chans as f32);
                }
            }
            Ok(AudioBufferRef::U8(buf)) => {
                src_sr = buf.spec().rate;
                let chans = buf.spec().channels.count();
                for f in 0..buf.frames() {
                    let acc: f32 = (0..chans)
                        .map(|c| (buf.chan(c)[f] as f32 / 255.0) * 2.0 - 1.0)
                        .sum();
                    pcm.push(acc / chans as f32);
                }
            }
            Err(SymphoniaError::DecodeError(_)) => continue,
            Err(e) => return Err(model_err(e)),
            // other sample formats are rare in the corpus
            Ok(_) => {}
        }
    }
    Ok((pcm, src_sr))
}

/// Simple linear resampler (mono)
pub fn linear_resample(input: &[f32], src_sr: u32, dst_sr: u32) -> Vec<f32> {
    if src_sr == dst_sr || input.is_empty() {
        return input.to_vec();
    }
    let ratio = dst_sr as f32 / src_sr as f32;
    let out_len = (input.len() as f32 * ratio).ceil() as usize;
    let mut out = Vec::with_capacity(out_len);
    for i in 0..out_len {
        let src_pos = i as f32 / ratio;
        let idx0 = (src_pos.floor() as usize).min(input.len() - 1);
        if idx0 + 1 >= input.len() {
            out.push(input[idx0]);
            continue;
        }
        let frac = src_pos - idx0 as f32;
        out.push(input[idx0] * (1.0 - frac) + input[idx0 + 1] * frac);
    }
    out
}

fn build_mel_filterbank(
    sr: f32,
    n_fft: usize,
    n_mels: usize,
    fmin: f32,
    fmax: f32,
) -> Vec<Vec<f32>> {
    fn hz_to_mel(hz: f32) -> f32 {
        2595.0 * (1.0 + hz / 700.0).log10()
    }
    fn mel_to_hz(m: f32) -> f32 {
        700.0 * (10f32.powf(m / 2595.0) - 1.0)
    }
    let mel_min = hz_to_mel(fmin);
    let mel_max = hz_to_mel(fmax);
    let spec_bins = n_fft / 2 + 1;
    let bins: Vec<usize> = (0..(n_mels + 2))
        .map(|i| mel_to_hz(mel_min + i as f32 * (mel_max - mel_min) / (n_mels + 1) as f32))
        .map(|hz| (((n_fft + 1) as f32 * hz / sr).floor() as usize).min(spec_bins - 1))
        .collect();
    let mut fb = vec![vec![0.0; spec_bins]; n_mels];
    for m in 1..=n_mels {
        let (lo, mid, hi) = (bins[m - 1], bins[m], bins[m + 1]);
        for k in lo..mid {
            fb[m - 1][k] = (k - lo) as f32 / (mid - lo) as f32;
        }
        for k in mid..hi {
            fb[m - 1][k] = (hi - k) as f32 / (hi - mid) as f32;
        }
    }
    fb
}

/// Log-mel spectrogram with 10ms hop, returned as frames of `N_MELS` values.
pub fn log_mel_spectrogram(pcm: &[f32], sample_rate: u32) -> Vec<[f32; N_MELS]> {
    if pcm.len() < N_FFT {
        // pad short clips to one full window
        if pcm.is_empty() {
            return Vec::new();
        }
        let mut padded = pcm.to_vec();
        padded.resize(N_FFT, 0.0);
        return log_mel_spectrogram(&padded, sample_rate);
    }
    let hop = ((sample_rate as f32 * 0.01) as usize).max(1);
    let window: Vec<f32> = (0..N_FFT)
        .map(|i| 0.5 - 0.5 * (2.0 * std::f32::consts::PI * i as f32 / N_FFT as f32).cos())
        .collect();
    let mel_fb = build_mel_filterbank(
        sample_rate as f32,
        N_FFT,
        N_MELS,
        50.0,
        sample_rate as f32 / 2.0 - 100.0,
    );
    let fft = FftPlanner::new().plan_fft_forward(N_FFT);

    let mut frames = Vec::new();
    let mut idx = 0usize;
    while idx + N_FFT <= pcm.len() {
        let mut buf: Vec<Complex<f32>> = pcm[idx..idx + N_FFT]
            .iter()
            .zip(&window)
            .map(|(s, w)| Complex { re: s * w, im: 0.0 })
            .collect();
        fft.process(&mut buf);
        let power: Vec<f32> = buf[..N_FFT / 2 + 1].iter().map(|c| c.norm_sqr()).collect();
        let mut frame = [0f32; N_MELS];
        for (slot, row) in frame.iter_mut().zip(&mel_fb) {
            let acc: f32 = row.iter().zip(&power).map(|(w, p)| w * p).sum();
            *slot = (acc + 1e-10).ln();
        }
        frames.push(frame);
        idx += hop;
    }
    frames
}

/// Recursively collect supported audio files, sorted for stable index order.
pub fn expand_audio_files(root: &Path) -> Result<Vec<PathBuf>> {
    if !root.exists() {
        return Err(AudioSearchError::Usage(format!(
            "Path not found: {}",
            root.display()
        )));
    }
    if root.is_file() {
        return Ok(if is_supported(root) {
            vec![root.to_path_buf()]
        } else {
            Vec::new()
        });
    }
    let mut out = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(|e| AudioSearchError::Io(e.into()))?;
        if entry.file_type().is_file() && is_supported(entry.path()) {
            out.push(entry.into_path());
        }
    }
    Ok(out)
}

pub fn is_supported(p: &Path) -> bool {
    p.extension()
        .and_then(|s| s.to_str())
        .map(|ext| {
            let ext = format!(".{}", ext).to_lowercase();
            SUPPORTED_EXTS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

fn has_ext(p: &Path, ext: &str) -> bool {
    p.extension()
        .and_then(|s| s.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(ext))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_sine(path: &Path, freq: f32, sr: u32, secs: f32) {
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: sr,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut w = hound::WavWriter::create(path, spec).unwrap();
        for i in 0..(sr as f32 * secs) as usize {
            let v = (2.0 * std::f32::consts::PI * freq * i as f32 / sr as f32).sin();
            let s = (v * i16::MAX as f32 * 0.5) as i16;
            w.write_sample(s).unwrap();
            w.write_sample(s).unwrap();
        }
        w.finalize().unwrap();
    }

    #[test]
    fn wav_is_downmixed_and_resampled() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        write_sine(&path, 440.0, 16_000, 0.5);
        let pcm = load_audio(&path, TARGET_SAMPLE_RATE).unwrap();
        assert_eq!(pcm.len(), 24_000);
        assert!(pcm.iter().all(|s| s.abs() <= 0.51));
    }

    #[test]
    fn resample_is_identity_at_same_rate() {
        let input = vec![0.1, 0.2, 0.3];
        assert_eq!(linear_resample(&input, 8000, 8000), input);
        assert_eq!(linear_resample(&input, 8000, 16000).len(), 6);
    }

    #[test]
    fn short_clips_still_produce_a_frame() {
        let frames = log_mel_spectrogram(&[0.5; 100], TARGET_SAMPLE_RATE);
        assert_eq!(frames.len(), 1);
        assert!(frames[0].iter().all(|v| v.is_finite()));
        assert!(log_mel_spectrogram(&[], TARGET_SAMPLE_RATE).is_empty());
    }

    #[test]
    fn expands_supported_files_only() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        write_sine(&dir.path().join("sub/b.wav"), 220.0, 8000, 0.1);
        write_sine(&dir.path().join("a.WAV"), 220.0, 8000, 0.1);
        std::fs::write(dir.path().join("notes.txt"), "x").unwrap();
        let files = expand_audio_files(dir.path()).unwrap();
        assert_eq!(files.len(), 2);
        assert!(files[0].ends_with("a.WAV"));
        assert!(expand_audio_files(&dir.path().join("missing")).is_err());
    }
}
