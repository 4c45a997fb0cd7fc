//! Content fingerprints for cache keys.
//!
//! Fingerprints combine a SHA-256 digest of the content bytes with a short
//! digest of the option subset that actually affects the output. Options
//! outside that subset never invalidate a cached entry.
//!
//! Images are canonicalized to RGB8 PNG before hashing so pixel-identical
//! images fingerprint identically regardless of their in-memory
//! representation.

use crate::error::Result;
use crate::types::JobOptions;
use image::DynamicImage;
use sha2::{Digest, Sha256};
use std::io::{Cursor, Read};
use std::path::Path;

/// Chunk size for streaming file digests.
const HASH_CHUNK_SIZE: usize = 64 * 1024;

/// Length of the short option-subset digest, in hex chars.
const OPTIONS_HASH_LEN: usize = 16;

/// SHA-256 hex digest of everything readable from `reader`, chunked so large
/// inputs never sit in memory whole. The digest is independent of chunking.
pub fn hash_reader<R: Read>(mut reader: R) -> Result<String> {
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; HASH_CHUNK_SIZE];
    loop {
        let read = reader.read(&mut buf)?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// SHA-256 hex digest of a file's bytes.
pub fn hash_file(path: &Path) -> Result<String> {
    let file = std::fs::File::open(path)?;
    hash_reader(file)
}

/// SHA-256 hex digest of an image, canonicalized to RGB8 PNG bytes.
pub fn hash_image(image: &DynamicImage) -> Result<String> {
    let canonical = DynamicImage::ImageRgb8(image.to_rgb8());
    let mut buf = Vec::new();
    canonical.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;

    let mut hasher = Sha256::new();
    hasher.update(&buf);
    Ok(hex::encode(hasher.finalize()))
}

/// Short digest of a canonical `key=value` mapping: pairs sorted by key,
/// joined with `&`, hashed, truncated.
fn hash_option_pairs(pairs: &[(&str, String)]) -> String {
    let mut sorted: Vec<(&str, String)> = pairs.to_vec();
    sorted.sort_by_key(|(key, _)| *key);

    let canonical = sorted
        .iter()
        .map(|(key, value)| format!("{}={}", key, value))
        .collect::<Vec<_>>()
        .join("&");

    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())[..OPTIONS_HASH_LEN].to_string()
}

/// Option digest for the page cache: only the options that change OCR output.
pub fn page_options_hash(options: &JobOptions) -> String {
    hash_option_pairs(&[
        ("engine", options.engine.clone()),
        ("lang", options.language.clone()),
        ("psm", options.psm.to_string()),
        ("oem", options.oem.to_string()),
        ("preprocess", options.preprocess.as_str().to_string()),
    ])
}

/// Option digest for the file cache: only the extraction mode matters.
pub fn file_options_hash(options: &JobOptions) -> String {
    hash_option_pairs(&[("mode", options.mode.as_str().to_string())])
}

/// Cache key for one rendered page under one option subset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageFingerprint {
    pub image_hash: String,
    pub options_hash: String,
}

impl PageFingerprint {
    pub fn new(image: &DynamicImage, options: &JobOptions) -> Result<Self> {
        Ok(Self {
            image_hash: hash_image(image)?,
            options_hash: page_options_hash(options),
        })
    }

    pub fn cache_key(&self) -> String {
        format!("p:{}:{}", self.image_hash, self.options_hash)
    }
}

/// Cache key for a whole file under one option subset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileFingerprint {
    pub file_hash: String,
    pub options_hash: String,
}

impl FileFingerprint {
    pub fn new(path: &Path, options: &JobOptions) -> Result<Self> {
        Ok(Self {
            file_hash: hash_file(path)?,
            options_hash: file_options_hash(options),
        })
    }

    pub fn cache_key(&self) -> String {
        format!("f:{}:{}", self.file_hash, self.options_hash)
    }
}
