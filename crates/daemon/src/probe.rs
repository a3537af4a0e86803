//! Video duration probing via ffprobe.
//!
//! Only the duration of the first video stream is extracted; it is what the
//! runner compares before deleting a source.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;

/// Error type for probe operations.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// ffprobe exited unsuccessfully.
    #[error("ffprobe failed on {path}: {message}")]
    FfprobeFailed { path: PathBuf, message: String },

    /// Output could not be parsed or carried no video duration.
    #[error("Failed to parse ffprobe output: {0}")]
    ParseError(String),

    /// IO error spawning ffprobe.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Returns the playable duration of a media file.
#[async_trait]
pub trait VideoProbe: Send + Sync {
    async fn duration(&self, path: &Path) -> Result<Duration, ProbeError>;
}

/// [`VideoProbe`] backed by the ffprobe binary.
#[derive(Debug, Clone)]
pub struct FfprobeProbe {
    bin: String,
}

impl FfprobeProbe {
    pub fn new(bin: impl Into<String>) -> Self {
        Self { bin: bin.into() }
    }

    /// Build the ffprobe invocation for `path`.
    pub fn build_command(&self, path: &Path) -> Command {
        let mut cmd = Command::new(&self.bin);
        cmd.args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_streams",
            "-sexagesimal",
        ])
        .arg(path)
        .stdin(Stdio::null())
        .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl VideoProbe for FfprobeProbe {
    async fn duration(&self, path: &Path) -> Result<Duration, ProbeError> {
        let output = self.build_command(path).output().await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ProbeError::FfprobeFailed {
                path: path.to_path_buf(),
                message: format!("exit status {}: {}", output.status, stderr.trim()),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_ffprobe_duration(&stdout)
    }
}

/// Raw ffprobe JSON structures for parsing.
mod ffprobe_json {
    use serde::Deserialize;
    use std::collections::HashMap;

    #[derive(Debug, Deserialize)]
    pub struct FfprobeOutput {
        pub streams: Option<Vec<Stream>>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Stream {
        pub codec_type: Option<String>,
        pub duration: Option<String>,
        #[serde(default)]
        pub tags: HashMap<String, String>,
    }
}

/// Extract the first video stream's duration from ffprobe JSON.
///
/// Uses the stream `duration`, falling back to the `DURATION` tag that
/// Matroska muxers write instead.
pub fn parse_ffprobe_duration(json_str: &str) -> Result<Duration, ProbeError> {
    let parsed: ffprobe_json::FfprobeOutput =
        serde_json::from_str(json_str).map_err(|e| ProbeError::ParseError(e.to_string()))?;

    let stream = parsed
        .streams
        .unwrap_or_default()
        .into_iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .ok_or_else(|| ProbeError::ParseError("no video stream".to_string()))?;

    let raw = stream
        .duration
        .or_else(|| stream.tags.get("DURATION").cloned())
        .ok_or_else(|| ProbeError::ParseError("video stream has no duration".to_string()))?;

    parse_sexagesimal(&raw)
        .ok_or_else(|| ProbeError::ParseError(format!("unreadable duration: {}", raw)))
}

/// Parse `H:MM:SS.fraction` (or plain seconds) into a Duration.
pub fn parse_sexagesimal(s: &str) -> Option<Duration> {
    let s = s.trim();
    let mut parts = s.rsplitn(3, ':');
    let seconds: f64 = parts.next()?.parse().ok()?;
    let minutes: u64 = match parts.next() {
        Some(m) => m.parse().ok()?,
        None => 0,
    };
    let hours: u64 = match parts.next() {
        Some(h) => h.parse().ok()?,
        None => 0,
    };
    if !seconds.is_finite() || seconds < 0.0 {
        return None;
    }
    let whole = Duration::from_secs(hours * 3600 + minutes * 60);
    Some(whole + Duration::from_secs_f64(seconds))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_duration_from_stream_field() {
        let json = r#"{
            "streams": [
                {"codec_type": "audio", "duration": "0:00:01.000000"},
                {"codec_type": "video", "duration": "1:02:03.500000"}
            ]
        }"#;
        let d = parse_ffprobe_duration(json).unwrap();
        assert_eq!(d, Duration::from_millis(3_723_500));
    }

    #[test]
    fn test_duration_falls_back_to_tag() {
        let json = r#"{
            "streams": [
                {"codec_type": "video", "tags": {"DURATION": "2:00:00.250000000"}}
            ]
        }"#;
        let d = parse_ffprobe_duration(json).unwrap();
        assert_eq!(d, Duration::from_millis(7_200_250));
    }

    #[test]
    fn test_no_video_stream_is_error() {
        let json = r#"{"streams": [{"codec_type": "audio", "duration": "0:01:00.0"}]}"#;
        assert!(matches!(
            parse_ffprobe_duration(json),
            Err(ProbeError::ParseError(_))
        ));
    }

    #[test]
    fn test_garbage_is_error() {
        assert!(parse_ffprobe_duration("not json").is_err());
        assert!(parse_ffprobe_duration("{}").is_err());
    }

    #[test]
    fn test_build_command_shape() {
        let probe = FfprobeProbe::new("ffprobe");
        let cmd = probe.build_command(Path::new("/v/a.flv"));
        let args: Vec<String> = cmd
            .as_std()
            .get_args()
            .filter_map(|a| a.to_str().map(String::from))
            .collect();
        assert_eq!(
            args,
            vec![
                "-v",
                "quiet",
                "-print_format",
                "json",
                "-show_streams",
                "-sexagesimal",
                "/v/a.flv"
            ]
        );
    }

    /// Stand-in ffprobe that drains stdin before answering.
    #[cfg(unix)]
    fn stdin_reading_ffprobe(dir: &Path) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("ffprobe");
        std::fs::write(
            &path,
            "#!/bin/sh\ncat > /dev/null\necho '{\"streams\": [{\"codec_type\": \"video\", \"duration\": \"0:00:42.000000\"}]}'\n",
        )
        .unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_probe_does_not_inherit_stdin() {
        let dir = tempfile::TempDir::new().unwrap();
        let bin = stdin_reading_ffprobe(dir.path());
        let probe = FfprobeProbe::new(bin.to_string_lossy().into_owned());

        let d = tokio::time::timeout(Duration::from_secs(10), probe.duration(Path::new("a.flv")))
            .await
            .expect("ffprobe waited on stdin")
            .unwrap();
        assert_eq!(d, Duration::from_secs(42));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_sexagesimal_matches_components(
            h in 0u64..48,
            m in 0u64..60,
            s in 0u64..60,
            micros in 0u64..1_000_000,
        ) {
            let text = format!("{}:{:02}:{:02}.{:06}", h, m, s, micros);
            let parsed = parse_sexagesimal(&text).unwrap();
            let expected = Duration::from_secs(h * 3600 + m * 60 + s)
                + Duration::from_micros(micros);
            let diff = if parsed > expected { parsed - expected } else { expected - parsed };
            prop_assert!(diff < Duration::from_micros(2), "{} -> {:?}", text, parsed);
        }
    }
}
