//! Intro trimming
//!
//! Finds the second at which a recording leaves its "waiting" screen by
//! sampling frames and comparing check areas against a reference image.

pub mod catalog;
pub mod frame;
pub mod sampler;
pub mod search;
pub mod ssim;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info};
use vodkeeper_config::TrimmerConfig;

pub use catalog::{load_catalog, load_reference_image, CatalogError, TrimConfig};
pub use frame::{crop_area, frame_from_raw, CheckArea, Region};
pub use sampler::{FfmpegFrameSampler, FrameSampler};
pub use search::{search_with, BoundarySearch, SearchParams, SearchStep};
pub use ssim::ssim;

/// Error type for intro search.
#[derive(Debug, Error)]
pub enum TrimError {
    #[error("{0} not found")]
    NotFound(PathBuf),

    #[error("frame extraction at {seconds}s failed: {message}")]
    Extract { seconds: u32, message: String },

    #[error("sampled frame does not line up with check area {index}")]
    RegionMismatch { index: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Holds the trim rules and runs the boundary search.
pub struct IntroTrimmer {
    configs: Vec<TrimConfig>,
    sampler: Arc<dyn FrameSampler>,
    params: SearchParams,
    similarity_threshold: f64,
}

impl IntroTrimmer {
    pub fn new(
        configs: Vec<TrimConfig>,
        sampler: Arc<dyn FrameSampler>,
        params: SearchParams,
        similarity_threshold: f64,
    ) -> Self {
        Self {
            configs,
            sampler,
            params,
            similarity_threshold,
        }
    }

    /// Build from settings, loading the catalog if one is configured.
    ///
    /// Without a catalog the trimmer has no rules and never trims.
    pub fn from_settings(
        settings: &TrimmerConfig,
        catalog: Option<&Path>,
        sampler: Arc<dyn FrameSampler>,
    ) -> Result<Self, CatalogError> {
        let configs = match catalog {
            Some(path) => load_catalog(path, settings.frame_width, settings.frame_height)?,
            None => Vec::new(),
        };
        info!(rules = configs.len(), "intro trimmer ready");
        Ok(Self::new(
            configs,
            sampler,
            SearchParams {
                initial_gap: settings.initial_gap_secs,
                tolerance: settings.tolerance_secs,
                max_iterations: settings.max_iterations,
            },
            settings.similarity_threshold,
        ))
    }

    /// First rule whose pattern matches `title`.
    pub fn get_config(&self, title: &str) -> Option<&TrimConfig> {
        self.configs.iter().find(|c| c.matches(title))
    }

    pub fn rule_count(&self) -> usize {
        self.configs.len()
    }

    /// Average similarity of the frame at `seconds` against the rule's regions.
    pub async fn similarity(
        &self,
        file: &Path,
        seconds: u32,
        config: &TrimConfig,
    ) -> Result<f64, TrimError> {
        let frame = self.sampler.sample(file, seconds).await?;
        let mut scores = Vec::with_capacity(config.check_areas().len());
        for (index, (area, reference)) in config
            .check_areas()
            .iter()
            .zip(config.reference_regions())
            .enumerate()
        {
            let region = crop_area(&frame, area);
            let score = ssim(reference, &region).ok_or(TrimError::RegionMismatch { index })?;
            scores.push(score);
        }
        let average = scores.iter().sum::<f64>() / scores.len().max(1) as f64;
        debug!(seconds, average, ?scores, "similarity");
        Ok(average)
    }

    /// True when the frame at `seconds` still shows the idle screen.
    pub async fn is_idle(
        &self,
        file: &Path,
        seconds: u32,
        config: &TrimConfig,
    ) -> Result<bool, TrimError> {
        Ok(self.similarity(file, seconds, config).await? >= self.similarity_threshold)
    }

    /// Seconds at which the real content of `file` starts.
    ///
    /// # Returns
    /// * `Ok(None)` - no rule matches `title`; do not trim
    /// * `Ok(Some(secs))` - trim offset
    /// * `Err(TrimError)` - a frame could not be sampled
    pub async fn find_intro(&self, file: &Path, title: &str) -> Result<Option<u32>, TrimError> {
        let Some(config) = self.get_config(title) else {
            return Ok(None);
        };
        let started = Instant::now();
        let mut search = BoundarySearch::new(self.params);
        let mut t = search.start();
        let found = loop {
            let seconds = t.max(0) as u32;
            let idle = self.is_idle(file, seconds, config).await?;
            debug!(seconds, idle, "probe");
            match search.record(idle) {
                SearchStep::Probe(next) => t = next,
                SearchStep::Done(found) => break found.max(0) as u32,
            }
        };
        info!(
            file = %file.display(),
            seconds = found,
            iterations = search.iterations(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "found intro"
        );
        Ok(Some(found))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use image::{GrayImage, Luma};
    use regex::Regex;
    use std::sync::Mutex;

    /// Serves the idle frame before `boundary` seconds and a blank one after.
    pub(crate) struct StepSampler {
        pub(crate) boundary: u32,
        pub(crate) idle: GrayImage,
        pub(crate) content: GrayImage,
        pub(crate) calls: Mutex<Vec<u32>>,
    }

    impl StepSampler {
        pub(crate) fn new(boundary: u32) -> Self {
            Self {
                boundary,
                idle: idle_frame(),
                content: GrayImage::from_pixel(64, 36, Luma([0])),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl FrameSampler for StepSampler {
        async fn sample(&self, _file: &Path, seconds: u32) -> Result<GrayImage, TrimError> {
            self.calls.lock().unwrap().push(seconds);
            Ok(if seconds < self.boundary {
                self.idle.clone()
            } else {
                self.content.clone()
            })
        }
    }

    pub(crate) struct BrokenSampler;

    #[async_trait]
    impl FrameSampler for BrokenSampler {
        async fn sample(&self, _file: &Path, seconds: u32) -> Result<GrayImage, TrimError> {
            Err(TrimError::Extract {
                seconds,
                message: "Invalid data found when processing input".to_string(),
            })
        }
    }

    pub(crate) fn idle_frame() -> GrayImage {
        GrayImage::from_fn(64, 36, |x, y| Luma([((x * 4 + y * 3) % 256) as u8]))
    }

    pub(crate) fn btn_rule() -> TrimConfig {
        TrimConfig::new(
            Regex::new("(?i)by the numbers").unwrap(),
            &idle_frame(),
            vec![
                CheckArea {
                    start: [0, 0],
                    size: [32, 18],
                },
                CheckArea {
                    start: [40, 20],
                    size: [100, 100],
                },
            ],
        )
    }

    #[tokio::test]
    async fn test_no_rule_means_no_trim() {
        let sampler = Arc::new(StepSampler::new(944));
        let trimmer = IntroTrimmer::new(
            vec![btn_rule()],
            sampler.clone(),
            SearchParams::default(),
            0.6,
        );
        let result = trimmer
            .find_intro(Path::new("a.mkv"), "Just chatting")
            .await
            .unwrap();
        assert_eq!(result, None);
        assert!(sampler.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_finds_boundary_with_images() {
        let sampler = Arc::new(StepSampler::new(944));
        let trimmer = IntroTrimmer::new(
            vec![btn_rule()],
            sampler.clone(),
            SearchParams::default(),
            0.6,
        );
        let found = trimmer
            .find_intro(Path::new("a.mkv"), "Lore By The Numbers")
            .await
            .unwrap();
        assert_eq!(found, Some(947));
        assert_eq!(
            *sampler.calls.lock().unwrap(),
            vec![300, 600, 900, 1200, 1050, 975, 938, 956, 947]
        );
    }

    #[tokio::test]
    async fn test_sampler_failure_propagates() {
        let trimmer = IntroTrimmer::new(
            vec![btn_rule()],
            Arc::new(BrokenSampler),
            SearchParams::default(),
            0.6,
        );
        let result = trimmer
            .find_intro(Path::new("a.mkv"), "by the numbers")
            .await;
        assert!(matches!(result, Err(TrimError::Extract { seconds: 300, .. })));
    }

    #[tokio::test]
    async fn test_wrong_frame_size_is_mismatch() {
        let sampler = Arc::new(StepSampler {
            boundary: 100,
            idle: GrayImage::from_pixel(8, 8, Luma([1])),
            content: GrayImage::from_pixel(8, 8, Luma([1])),
            calls: Mutex::new(Vec::new()),
        });
        let trimmer = IntroTrimmer::new(vec![btn_rule()], sampler, SearchParams::default(), 0.6);
        let result = trimmer.find_intro(Path::new("a.mkv"), "by the numbers").await;
        assert!(matches!(result, Err(TrimError::RegionMismatch { index: 0 })));
    }
}
