//! Encoding modules for vodkeeper
//!
//! The transcoder is an external black box; this module only knows argument
//! profiles and exit codes.

pub mod ffmpeg;
pub mod progress;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

pub use ffmpeg::{trim_args, transcode_args, FfmpegTranscoder};
pub use progress::{ProgressParser, ProgressReport, ProgressThrottle};

/// Error type for encoding operations
#[derive(Debug, Error)]
pub enum EncodeError {
    /// ffmpeg exited with non-zero status
    #[error("ffmpeg exit code: {0}")]
    FfmpegFailed(i32),

    /// ffmpeg was terminated by a signal
    #[error("ffmpeg process was terminated by signal")]
    FfmpegTerminated,

    /// IO error spawning or talking to ffmpeg
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Argument profile handed to the transcoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncodeProfile {
    /// Container copy into MP4, audio re-encoded to AAC
    Copy,
    /// Full HEVC re-encode into Matroska
    Hevc,
}

impl EncodeProfile {
    /// Codec flags for this profile.
    pub fn codec_args(&self) -> &'static [&'static str] {
        match self {
            EncodeProfile::Copy => &[
                "-c:v",
                "copy",
                "-f",
                "mp4",
                "-c:a",
                "aac",
                "-err_detect",
                "ignore_err",
            ],
            EncodeProfile::Hevc => &[
                "-c:v",
                "libx265",
                "-x265-params",
                "crf=23:pools=4",
                "-preset:v",
                "fast",
                "-c:a",
                "aac",
            ],
        }
    }

    /// Output file extension, including the dot.
    pub fn extension(&self) -> &'static str {
        match self {
            EncodeProfile::Copy => ".mp4",
            EncodeProfile::Hevc => ".mkv",
        }
    }
}

impl std::fmt::Display for EncodeProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EncodeProfile::Copy => write!(f, "copy"),
            EncodeProfile::Hevc => write!(f, "hevc"),
        }
    }
}

/// External transcode tool.
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Human-readable invocation, stored on the job for audit.
    fn command_line(&self, input: &Path, output: &Path, profile: EncodeProfile) -> String;

    /// Transcode `input` into `output` with the given profile.
    async fn transcode(
        &self,
        input: &Path,
        output: &Path,
        profile: EncodeProfile,
    ) -> Result<(), EncodeError>;

    /// Write `input` minus its first `start_seconds` into `output`.
    async fn trim(&self, input: &Path, output: &Path, start_seconds: u32) -> Result<(), EncodeError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&EncodeProfile::Hevc).unwrap(), "\"hevc\"");
        let p: EncodeProfile = serde_json::from_str("\"copy\"").unwrap();
        assert_eq!(p, EncodeProfile::Copy);
    }

    #[test]
    fn test_extensions() {
        assert_eq!(EncodeProfile::Copy.extension(), ".mp4");
        assert_eq!(EncodeProfile::Hevc.extension(), ".mkv");
    }
}
