//! Minimal `.npz` (zip of `.npy` arrays) reader and writer.
//!
//! Supports little-endian `f4`/`f8` numeric arrays and fixed-width unicode
//! (`<U`) string arrays, C order only. That covers the corpus artifacts
//! (`embeddings.npz`, `content_scores.npz`).

use crate::error::{AudioSearchError, Result};
use lazy_static::lazy_static;
use regex::Regex;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

const MAGIC: &[u8] = b"\x93NUMPY";

lazy_static! {
    static ref DESCR: Regex = Regex::new(r"'descr'\s*:\s*'([^']+)'").expect("descr pattern");
    static ref FORTRAN: Regex =
        Regex::new(r"'fortran_order'\s*:\s*(True|False)").expect("fortran pattern");
    static ref SHAPE: Regex = Regex::new(r"'shape'\s*:\s*\(([^)]*)\)").expect("shape pattern");
}

fn corrupt(name: &str, msg: impl std::fmt::Display) -> AudioSearchError {
    AudioSearchError::Corpus(format!("{name}: {msg}"))
}

fn element_count(name: &str, shape: &[usize]) -> Result<usize> {
    shape
        .iter()
        .try_fold(1usize, |acc, &d| acc.checked_mul(d))
        .ok_or_else(|| corrupt(name, format!("shape {shape:?} is out of range")))
}

struct Header {
    descr: String,
    shape: Vec<usize>,
}

fn parse_header(name: &str, bytes: &[u8]) -> Result<(Header, usize)> {
    if bytes.len() < 10 || &bytes[..6] != MAGIC {
        return Err(corrupt(name, "not a .npy array"));
    }
    let (len, start) = match bytes[6] {
        1 => (u16::from_le_bytes([bytes[8], bytes[9]]) as usize, 10),
        2 | 3 if bytes.len() >= 12 => (
            u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize,
            12,
        ),
        v => return Err(corrupt(name, format!("unsupported .npy version {v}"))),
    };
    let text = bytes
        .get(start..start + len)
        .and_then(|h| std::str::from_utf8(h).ok())
        .ok_or_else(|| corrupt(name, "truncated header"))?;

    let descr = DESCR
        .captures(text)
        .map(|c| c[1].to_string())
        .ok_or_else(|| corrupt(name, "missing descr"))?;
    if FORTRAN.captures(text).is_some_and(|c| &c[1] == "True") {
        return Err(corrupt(name, "fortran-ordered arrays are not supported"));
    }
    let shape = SHAPE
        .captures(text)
        .ok_or_else(|| corrupt(name, "missing shape"))?[1]
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<usize>().map_err(|e| corrupt(name, e)))
        .collect::<Result<Vec<_>>>()?;
    Ok((Header { descr, shape }, start + len))
}

fn encode_header(descr: &str, shape: &[usize]) -> Vec<u8> {
    let shape = match shape {
        [n] => format!("({n},)"),
        dims => format!(
            "({})",
            dims.iter().map(|d| d.to_string()).collect::<Vec<_>>().join(", ")
        ),
    };
    let mut dict = format!("{{'descr': '{descr}', 'fortran_order': False, 'shape': {shape}, }}");
    // magic + version + u16 length + dict + '\n' must align to 64 bytes
    let unpadded = MAGIC.len() + 2 + 2 + dict.len() + 1;
    dict.push_str(&" ".repeat((64 - unpadded % 64) % 64));
    dict.push('\n');

    let mut out = Vec::with_capacity(10 + dict.len());
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&[1, 0]);
    out.extend_from_slice(&(dict.len() as u16).to_le_bytes());
    out.extend_from_slice(dict.as_bytes());
    out
}

/// A numeric array widened/narrowed to f32.
#[derive(Debug, Clone, PartialEq)]
pub struct F32Array {
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

pub struct NpzReader {
    archive: ZipArchive<BufReader<File>>,
    label: String,
}

impl NpzReader {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let archive = ZipArchive::new(BufReader::new(file))
            .map_err(|e| corrupt(&path.display().to_string(), e))?;
        Ok(Self {
            archive,
            label: path.display().to_string(),
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.archive.index_for_name(&format!("{name}.npy")).is_some()
    }

    fn raw(&mut self, name: &str) -> Result<Vec<u8>> {
        let entry_name = format!("{name}.npy");
        let mut entry = self
            .archive
            .by_name(&entry_name)
            .map_err(|_| corrupt(&self.label, format!("missing array '{name}'")))?;
        let mut buf = Vec::with_capacity(entry.size() as usize);
        entry.read_to_end(&mut buf)?;
        Ok(buf)
    }

    pub fn read_f32(&mut self, name: &str) -> Result<F32Array> {
        let bytes = self.raw(name)?;
        let (header, offset) = parse_header(name, &bytes)?;
        let count = element_count(name, &header.shape)?;
        let body = &bytes[offset..];
        let data: Vec<f32> = match header.descr.as_str() {
            "<f4" => body
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect(),
            "<f8" => body
                .chunks_exact(8)
                .map(|c| {
                    f64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]) as f32
                })
                .collect(),
            other => return Err(corrupt(name, format!("expected a float array, got {other}"))),
        };
        if data.len() != count {
            return Err(corrupt(
                name,
                format!("expected {count} values, found {}", data.len()),
            ));
        }
        Ok(F32Array {
            shape: header.shape,
            data,
        })
    }

    pub fn read_strings(&mut self, name: &str) -> Result<Vec<String>> {
        let bytes = self.raw(name)?;
        let (header, offset) = parse_header(name, &bytes)?;
        let width: usize = header
            .descr
            .strip_prefix("<U")
            .and_then(|w| w.parse().ok())
            .ok_or_else(|| corrupt(name, format!("expected a unicode array, got {}", header.descr)))?;
        let count = element_count(name, &header.shape)?;
        let body = &bytes[offset..];
        if width == 0 {
            return Ok(vec![String::new(); count]);
        }
        let needed = count
            .checked_mul(width)
            .and_then(|n| n.checked_mul(4))
            .ok_or_else(|| corrupt(name, "string array size is out of range"))?;
        if body.len() < needed {
            return Err(corrupt(name, "truncated string data"));
        }
        body.chunks_exact(width * 4)
            .take(count)
            .map(|item| {
                item.chunks_exact(4)
                    .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                    .take_while(|cp| *cp != 0)
                    .map(|cp| char::from_u32(cp).ok_or_else(|| corrupt(name, "invalid code point")))
                    .collect::<Result<String>>()
            })
            .collect()
    }
}

pub struct NpzWriter {
    zip: ZipWriter<BufWriter<File>>,
}

impl NpzWriter {
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path)?;
        Ok(Self {
            zip: ZipWriter::new(BufWriter::new(file)),
        })
    }

    fn add(&mut self, name: &str, header: Vec<u8>, body: &[u8]) -> Result<()> {
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        self.zip
            .start_file(format!("{name}.npy"), options)
            .map_err(|e| corrupt(name, e))?;
        self.zip.write_all(&header)?;
        self.zip.write_all(body)?;
        Ok(())
    }

    pub fn add_f32(&mut self, name: &str, shape: &[usize], data: &[f32]) -> Result<()> {
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(AudioSearchError::Usage(format!(
                "{name}: shape {shape:?} does not match {} values",
                data.len()
            )));
        }
        let body: Vec<u8> = data.iter().flat_map(|v| v.to_le_bytes()).collect();
        self.add(name, encode_header("<f4", shape), &body)
    }

    pub fn add_strings(&mut self, name: &str, items: &[String]) -> Result<()> {
        let width = items
            .iter()
            .map(|s| s.chars().count())
            .max()
            .unwrap_or(0)
            .max(1);
        let mut body = Vec::with_capacity(items.len() * width * 4);
        for item in items {
            let mut n = 0;
            for c in item.chars() {
                body.extend_from_slice(&(c as u32).to_le_bytes());
                n += 1;
            }
            body.resize(body.len() + (width - n) * 4, 0);
        }
        self.add(name, encode_header(&format!("<U{width}"), &[items.len()]), &body)
    }

    pub fn finish(self) -> Result<()> {
        let mut inner = self.zip.finish().map_err(|e| corrupt("npz", e))?;
        inner.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_is_64_byte_aligned() {
        let h = encode_header("<f4", &[3, 512]);
        assert_eq!(h.len() % 64, 0);
        assert_eq!(*h.last().unwrap(), b'\n');
        let (header, offset) = parse_header("x", &h).unwrap();
        assert_eq!(header.descr, "<f4");
        assert_eq!(header.shape, vec![3, 512]);
        assert_eq!(offset, h.len());
    }

    #[test]
    fn one_dimensional_shape_keeps_trailing_comma() {
        let h = encode_header("<U5", &[2]);
        let text = String::from_utf8_lossy(&h);
        assert!(text.contains("'shape': (2,)"));
        assert_eq!(parse_header("x", &h).unwrap().0.shape, vec![2]);
    }

    #[test]
    fn arrays_survive_a_write_read_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("embeddings.npz");
        let names = vec!["rain.wav".to_string(), "sấm.mp3".to_string()];
        let mut w = NpzWriter::create(&path).unwrap();
        w.add_f32("embeddings", &[2, 3], &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0])
            .unwrap();
        w.add_strings("filenames", &names).unwrap();
        w.finish().unwrap();

        let mut r = NpzReader::open(&path).unwrap();
        assert!(r.contains("embeddings"));
        assert!(!r.contains("musicness"));
        let arr = r.read_f32("embeddings").unwrap();
        assert_eq!(arr.shape, vec![2, 3]);
        assert_eq!(arr.data[5], 6.0);
        assert_eq!(r.read_strings("filenames").unwrap(), names);
        assert!(matches!(
            r.read_f32("filenames"),
            Err(AudioSearchError::Corpus(_))
        ));
    }

    #[test]
    fn reads_float64_arrays() {
        let header = encode_header("<f8", &[2]);
        let mut bytes = header.clone();
        bytes.extend_from_slice(&0.25f64.to_le_bytes());
        bytes.extend_from_slice(&0.75f64.to_le_bytes());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scores.npz");
        let mut zip = ZipWriter::new(File::create(&path).unwrap());
        zip.start_file("musicness.npy", SimpleFileOptions::default())
            .unwrap();
        zip.write_all(&bytes).unwrap();
        zip.finish().unwrap();

        let arr = NpzReader::open(&path).unwrap().read_f32("musicness").unwrap();
        assert_eq!(arr.data, vec![0.25, 0.75]);
    }

    #[test]
    fn rejects_non_npy_payloads() {
        assert!(parse_header("x", b"PK\x03\x04garbage").is_err());
    }

    #[test]
    fn overflowing_shapes_are_rejected() {
        let mut bytes = encode_header("<f4", &[usize::MAX, 2]);
        bytes.extend_from_slice(&1.0f32.to_le_bytes());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.npz");
        let mut zip = ZipWriter::new(File::create(&path).unwrap());
        zip.start_file("embeddings.npy", SimpleFileOptions::default())
            .unwrap();
        zip.write_all(&bytes).unwrap();
        zip.finish().unwrap();

        let mut r = NpzReader::open(&path).unwrap();
        assert!(matches!(
            r.read_f32("embeddings"),
            Err(AudioSearchError::Corpus(_))
        ));
    }
}
