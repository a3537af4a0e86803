//! Core configuration structures and loading logic

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Error type for configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
    /// A value parsed but is not usable
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Failed to read config file: {}", e),
            ConfigError::Parse(e) => write!(f, "Failed to parse config: {}", e),
            ConfigError::Invalid(msg) => write!(f, "Invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

/// Filesystem locations
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PathsConfig {
    /// Directory the recorder writes raw files into
    #[serde(default = "default_source_dir")]
    pub source_dir: PathBuf,
    /// Root of the per-user output directories
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// Scratch directory for in-progress transcodes
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,
    /// Persisted job list
    #[serde(default = "default_jobs_file")]
    pub jobs_file: PathBuf,
    /// Intro trim catalog (JSON); trimming is disabled when unset
    #[serde(default)]
    pub trim_catalog: Option<PathBuf>,
}

fn default_source_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_temp_dir() -> PathBuf {
    PathBuf::from("/tmp/vodkeeper")
}

fn default_jobs_file() -> PathBuf {
    PathBuf::from("data/jobs.json")
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            source_dir: default_source_dir(),
            output_dir: default_output_dir(),
            temp_dir: default_temp_dir(),
            jobs_file: default_jobs_file(),
            trim_catalog: None,
        }
    }
}

/// Routing rules deciding copy vs. transcode vs. ignore
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoutingConfig {
    /// Titles matching this pattern are re-encoded to HEVC (empty = never)
    #[serde(default)]
    pub hevc_pattern: String,
    /// Regex flags for `hevc_pattern` (e.g. "IGNORECASE")
    #[serde(default)]
    pub hevc_pattern_flags: Vec<String>,
    /// Titles matching this pattern are container-copied (empty = never)
    #[serde(default = "default_copy_pattern")]
    pub copy_pattern: String,
    /// Regex flags for `copy_pattern`
    #[serde(default)]
    pub copy_pattern_flags: Vec<String>,
    /// strftime format of the file name prefix, must not contain `_`
    #[serde(default = "default_time_format")]
    pub time_format: String,
}

fn default_copy_pattern() -> String {
    ".*".to_string()
}

fn default_time_format() -> String {
    "%y%m%d-%H%M".to_string()
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            hevc_pattern: String::new(),
            hevc_pattern_flags: Vec::new(),
            copy_pattern: default_copy_pattern(),
            copy_pattern_flags: Vec::new(),
            time_format: default_time_format(),
        }
    }
}

/// Intro search tuning
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrimmerConfig {
    /// First forward step of the search, in seconds
    #[serde(default = "default_initial_gap_secs")]
    pub initial_gap_secs: i64,
    /// Search stops once the step is at most this many seconds
    #[serde(default = "default_tolerance_secs")]
    pub tolerance_secs: i64,
    /// Hard bound on sampled frames per search
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Average similarity at or above which a frame counts as idle
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
    /// Width sampled frames are scaled to
    #[serde(default = "default_frame_width")]
    pub frame_width: u32,
    /// Height sampled frames are scaled to
    #[serde(default = "default_frame_height")]
    pub frame_height: u32,
}

fn default_initial_gap_secs() -> i64 {
    300
}

fn default_tolerance_secs() -> i64 {
    10
}

fn default_max_iterations() -> u32 {
    20
}

fn default_similarity_threshold() -> f64 {
    0.6
}

fn default_frame_width() -> u32 {
    640
}

fn default_frame_height() -> u32 {
    360
}

impl Default for TrimmerConfig {
    fn default() -> Self {
        Self {
            initial_gap_secs: default_initial_gap_secs(),
            tolerance_secs: default_tolerance_secs(),
            max_iterations: default_max_iterations(),
            similarity_threshold: default_similarity_threshold(),
            frame_width: default_frame_width(),
            frame_height: default_frame_height(),
        }
    }
}

/// External tool invocation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EncoderConfig {
    #[serde(default = "default_ffmpeg_bin")]
    pub ffmpeg_bin: String,
    #[serde(default = "default_ffprobe_bin")]
    pub ffprobe_bin: String,
    /// Log transcode progress every N seconds of output
    #[serde(default = "default_progress_every_secs")]
    pub progress_every_secs: u64,
    /// Allowed shortfall of the encode vs. the source before deletion is refused
    #[serde(default = "default_duration_tolerance_secs")]
    pub duration_tolerance_secs: u64,
    /// Jobs allowed to run at the same time
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: u32,
}

fn default_ffmpeg_bin() -> String {
    "ffmpeg".to_string()
}

fn default_ffprobe_bin() -> String {
    "ffprobe".to_string()
}

fn default_progress_every_secs() -> u64 {
    30
}

fn default_duration_tolerance_secs() -> u64 {
    5
}

fn default_max_concurrent_jobs() -> u32 {
    1
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            ffmpeg_bin: default_ffmpeg_bin(),
            ffprobe_bin: default_ffprobe_bin(),
            progress_every_secs: default_progress_every_secs(),
            duration_tolerance_secs: default_duration_tolerance_secs(),
            max_concurrent_jobs: default_max_concurrent_jobs(),
        }
    }
}

/// Retention scheduler settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CleanerConfig {
    /// Run the retention scheduler on `paths.source_dir`
    #[serde(default)]
    pub enabled: bool,
    /// Days after the file timestamp at which a file is deleted
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
    /// Hours before deletion at which a warning is sent
    #[serde(default = "default_warn_at_hours")]
    pub warn_at_hours: Vec<u32>,
    /// File extensions tracked, without the dot
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    /// Longest single sleep of the deletion loop (40 days)
    #[serde(default = "default_max_sleep_secs")]
    pub max_sleep_secs: u64,
    /// Period of the warning loop
    #[serde(default = "default_warning_interval_secs")]
    pub warning_interval_secs: u64,
}

fn default_retention_days() -> u32 {
    7
}

fn default_warn_at_hours() -> Vec<u32> {
    vec![48, 24, 12]
}

fn default_extensions() -> Vec<String> {
    vec!["flv".to_string()]
}

fn default_max_sleep_secs() -> u64 {
    3_456_000
}

fn default_warning_interval_secs() -> u64 {
    3600
}

impl Default for CleanerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            retention_days: default_retention_days(),
            warn_at_hours: default_warn_at_hours(),
            extensions: default_extensions(),
            max_sleep_secs: default_max_sleep_secs(),
            warning_interval_secs: default_warning_interval_secs(),
        }
    }
}

/// HTTP job API
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    /// `host:port` to listen on
    #[serde(default = "default_listen_address")]
    pub listen_address: String,
}

fn default_listen_address() -> String {
    "127.0.0.1:3626".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_address: default_listen_address(),
        }
    }
}

/// Notification delivery
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NotificationsConfig {
    /// When false, all notifications go to the no-op sink
    #[serde(default = "default_notifications_enabled")]
    pub enabled: bool,
}

fn default_notifications_enabled() -> bool {
    true
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            enabled: default_notifications_enabled(),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub routing: RoutingConfig,
    #[serde(default)]
    pub trimmer: TrimmerConfig,
    #[serde(default)]
    pub encoder: EncoderConfig,
    #[serde(default)]
    pub cleaner: CleanerConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub notifications: NotificationsConfig,
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Parses the config.toml file and handles missing optional fields with defaults.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Recognised variables:
    /// - VODKEEPER_SOURCE_DIR, VODKEEPER_OUTPUT_DIR, VODKEEPER_TEMP_DIR,
    ///   VODKEEPER_JOBS_FILE, VODKEEPER_TRIM_CATALOG -> paths.*
    /// - VODKEEPER_HEVC_PATTERN, VODKEEPER_COPY_PATTERN, VODKEEPER_TIME_FORMAT -> routing.*
    /// - VODKEEPER_CLEAN_DAYS -> cleaner.retention_days
    /// - VODKEEPER_WARN_AT (comma separated hours) -> cleaner.warn_at_hours
    /// - VODKEEPER_ENABLE_CLEANER -> cleaner.enabled
    /// - VODKEEPER_LISTEN_ADDRESS -> server.listen_address
    ///
    /// Values that fail to parse leave the existing setting untouched.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("VODKEEPER_SOURCE_DIR") {
            self.paths.source_dir = PathBuf::from(val);
        }
        if let Ok(val) = env::var("VODKEEPER_OUTPUT_DIR") {
            self.paths.output_dir = PathBuf::from(val);
        }
        if let Ok(val) = env::var("VODKEEPER_TEMP_DIR") {
            self.paths.temp_dir = PathBuf::from(val);
        }
        if let Ok(val) = env::var("VODKEEPER_JOBS_FILE") {
            self.paths.jobs_file = PathBuf::from(val);
        }
        if let Ok(val) = env::var("VODKEEPER_TRIM_CATALOG") {
            self.paths.trim_catalog = Some(PathBuf::from(val));
        }

        if let Ok(val) = env::var("VODKEEPER_HEVC_PATTERN") {
            self.routing.hevc_pattern = val;
        }
        if let Ok(val) = env::var("VODKEEPER_COPY_PATTERN") {
            self.routing.copy_pattern = val;
        }
        if let Ok(val) = env::var("VODKEEPER_TIME_FORMAT") {
            self.routing.time_format = val;
        }

        if let Ok(val) = env::var("VODKEEPER_CLEAN_DAYS") {
            if let Ok(days) = val.parse::<u32>() {
                self.cleaner.retention_days = days;
            }
        }

        if let Ok(val) = env::var("VODKEEPER_WARN_AT") {
            if let Some(hours) = parse_hours_list(&val) {
                self.cleaner.warn_at_hours = hours;
            }
        }

        if let Ok(val) = env::var("VODKEEPER_ENABLE_CLEANER") {
            // Accept "true", "1", "yes" as true; "false", "0", "no" as false
            match val.to_lowercase().as_str() {
                "true" | "1" | "yes" => self.cleaner.enabled = true,
                "false" | "0" | "no" => self.cleaner.enabled = false,
                _ => {}
            }
        }

        if let Ok(val) = env::var("VODKEEPER_LISTEN_ADDRESS") {
            self.server.listen_address = val;
        }
    }

    /// Reject settings the daemon cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.routing.time_format.contains('_') {
            return Err(ConfigError::Invalid(format!(
                "time_format must not contain '_': {}",
                self.routing.time_format
            )));
        }
        if self.trimmer.tolerance_secs <= 0 {
            return Err(ConfigError::Invalid(
                "trimmer.tolerance_secs must be positive".to_string(),
            ));
        }
        if self.trimmer.frame_width == 0 || self.trimmer.frame_height == 0 {
            return Err(ConfigError::Invalid(
                "trimmer frame size must be non-zero".to_string(),
            ));
        }
        if self.encoder.max_concurrent_jobs == 0 {
            return Err(ConfigError::Invalid(
                "encoder.max_concurrent_jobs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Load configuration from file, apply environment overrides and validate
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }
}

/// Parse "48,24, 12" into hours. Returns None on any bad entry.
fn parse_hours_list(s: &str) -> Option<Vec<u32>> {
    let hours: Result<Vec<u32>, _> = s
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(str::parse::<u32>)
        .collect();
    match hours {
        Ok(h) if !h.is_empty() => Some(h),
        _ => None,
    }
}
