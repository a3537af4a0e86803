//! Trim catalog loading.
//!
//! The catalog is a JSON list of entries:
//!
//! ```json
//! [{
//!   "pattern": "by\\s*the\\s*numbers",
//!   "pattern_opt": "IGNORECASE",
//!   "image": "btn.png",
//!   "check_areas": [{"start": [0, 300], "size": [640, 60]}]
//! }]
//! ```
//!
//! `pattern_opt` is a flag name or a list of them. Image paths that do not
//! exist as given are resolved against the catalog's directory.

use super::frame::{crop_area, CheckArea};
use crate::pattern::{compile_pattern, PatternError};
use image::imageops::FilterType;
use image::GrayImage;
use regex::Regex;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read trim catalog {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse trim catalog: {0}")]
    Json(#[from] serde_json::Error),

    #[error("bad pattern in trim catalog: {0}")]
    Pattern(#[from] PatternError),

    #[error("{0}: No such file")]
    ImageNotFound(PathBuf),

    #[error("failed to decode reference image {path}: {source}")]
    Image {
        path: PathBuf,
        source: image::ImageError,
    },

    #[error("reference image {0} is empty")]
    EmptyImage(PathBuf),

    #[error("trim entry for {0} has no check areas")]
    NoCheckAreas(String),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PatternFlags {
    One(String),
    Many(Vec<String>),
}

impl Default for PatternFlags {
    fn default() -> Self {
        PatternFlags::Many(Vec::new())
    }
}

impl PatternFlags {
    fn into_vec(self) -> Vec<String> {
        match self {
            PatternFlags::One(flag) => vec![flag],
            PatternFlags::Many(flags) => flags,
        }
    }
}

#[derive(Debug, Deserialize)]
struct CatalogEntry {
    pattern: String,
    #[serde(default)]
    pattern_opt: PatternFlags,
    image: PathBuf,
    check_areas: Vec<CheckArea>,
}

/// One trim rule: which titles it applies to and what the idle screen looks like.
#[derive(Debug, Clone)]
pub struct TrimConfig {
    pattern: Regex,
    check_areas: Vec<CheckArea>,
    /// Reference image cropped to each check area, in order
    reference_regions: Vec<GrayImage>,
}

impl TrimConfig {
    /// Build a rule from an already decoded reference frame.
    pub fn new(pattern: Regex, reference: &GrayImage, check_areas: Vec<CheckArea>) -> Self {
        let reference_regions = check_areas.iter().map(|a| crop_area(reference, a)).collect();
        Self {
            pattern,
            check_areas,
            reference_regions,
        }
    }

    pub fn matches(&self, title: &str) -> bool {
        self.pattern.is_match(title)
    }

    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }

    pub fn check_areas(&self) -> &[CheckArea] {
        &self.check_areas
    }

    pub fn reference_regions(&self) -> &[GrayImage] {
        &self.reference_regions
    }
}

/// Load every entry of the catalog at `path`.
///
/// Reference images are converted to greyscale and scaled to
/// `frame_width` x `frame_height` so they line up with sampled frames.
pub fn load_catalog(
    path: &Path,
    frame_width: u32,
    frame_height: u32,
) -> Result<Vec<TrimConfig>, CatalogError> {
    let content = fs::read_to_string(path).map_err(|source| CatalogError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let entries: Vec<CatalogEntry> = serde_json::from_str(&content)?;
    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));

    let mut configs = Vec::with_capacity(entries.len());
    for entry in entries {
        if entry.check_areas.is_empty() {
            return Err(CatalogError::NoCheckAreas(entry.pattern));
        }
        let pattern = compile_pattern(&entry.pattern, &entry.pattern_opt.into_vec())?;
        let image_path = resolve_image_path(&entry.image, base_dir)?;
        let reference = load_reference_image(&image_path, frame_width, frame_height)?;
        debug!(pattern = %entry.pattern, image = %image_path.display(), "loaded trim rule");
        configs.push(TrimConfig::new(pattern, &reference, entry.check_areas));
    }
    Ok(configs)
}

fn resolve_image_path(image: &Path, base_dir: &Path) -> Result<PathBuf, CatalogError> {
    if image.exists() {
        return Ok(image.to_path_buf());
    }
    let relative = base_dir.join(image);
    if relative.exists() {
        Ok(relative)
    } else {
        Err(CatalogError::ImageNotFound(relative))
    }
}

/// Decode an image file into a greyscale frame of the given size.
pub fn load_reference_image(
    path: &Path,
    width: u32,
    height: u32,
) -> Result<GrayImage, CatalogError> {
    let decoded = image::open(path).map_err(|source| CatalogError::Image {
        path: path.to_path_buf(),
        source,
    })?;
    let mut gray = decoded.to_luma8();
    if gray.width() != width || gray.height() != height {
        gray = image::imageops::resize(&gray, width, height, FilterType::Triangle);
    }
    if gray.width() == 0 || gray.height() == 0 {
        return Err(CatalogError::EmptyImage(path.to_path_buf()));
    }
    Ok(gray)
}
