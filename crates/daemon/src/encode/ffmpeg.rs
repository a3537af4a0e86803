//! ffmpeg-backed transcoder.
//!
//! Builds the argument lines for each encode profile and the trim pass, runs
//! ffmpeg as a child process and relays its progress output to the log.

use super::progress::{ProgressParser, ProgressThrottle};
use super::{EncodeError, EncodeProfile, Transcoder};
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Flags shared by every invocation: quiet log, overwrite, machine progress on stdout.
const COMMON_ARGS: [&str; 7] = [
    "-v",
    "warning",
    "-y",
    "-progress",
    "-",
    "-nostats",
    "-hide_banner",
];

/// Argument list for a full transcode of `input` into `output`.
///
/// # Arguments
/// * `input` - Raw recording
/// * `output` - Temporary destination (extension must match the profile)
/// * `profile` - Which codec settings to use
pub fn transcode_args(input: &Path, output: &Path, profile: EncodeProfile) -> Vec<String> {
    let mut args = vec!["-i".to_string(), input.display().to_string()];
    args.extend(profile.codec_args().iter().map(|a| a.to_string()));
    args.extend(COMMON_ARGS.iter().map(|a| a.to_string()));
    args.push(output.display().to_string());
    args
}

/// Argument list cutting the first `start_seconds` off `input` without re-encoding.
pub fn trim_args(input: &Path, output: &Path, start_seconds: u32) -> Vec<String> {
    let mut args = vec![
        "-ss".to_string(),
        start_seconds.to_string(),
        "-i".to_string(),
        input.display().to_string(),
        "-c".to_string(),
        "copy".to_string(),
    ];
    args.extend(COMMON_ARGS.iter().map(|a| a.to_string()));
    args.push(output.display().to_string());
    args
}

/// Runs the ffmpeg binary.
#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    bin: String,
    progress_every: Duration,
}

impl FfmpegTranscoder {
    pub fn new(bin: impl Into<String>, progress_every: Duration) -> Self {
        Self {
            bin: bin.into(),
            progress_every,
        }
    }

    /// Build a Command for the given argument list.
    pub fn build_command(&self, args: &[String]) -> Command {
        let mut cmd = Command::new(&self.bin);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    async fn run(&self, args: Vec<String>) -> Result<(), EncodeError> {
        debug!(cmd = %format!("{} {}", self.bin, args.join(" ")), "spawning ffmpeg");
        let mut child = self.build_command(&args).spawn()?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let every = self.progress_every;
        tokio::join!(
            async {
                if let Some(out) = stdout {
                    watch_progress(out, every).await;
                }
            },
            async {
                if let Some(err) = stderr {
                    watch_stderr(err).await;
                }
            }
        );

        let status = child.wait().await?;
        if status.success() {
            Ok(())
        } else {
            match status.code() {
                Some(code) => Err(EncodeError::FfmpegFailed(code)),
                None => Err(EncodeError::FfmpegTerminated),
            }
        }
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    fn command_line(&self, input: &Path, output: &Path, profile: EncodeProfile) -> String {
        format!("{} {}", self.bin, transcode_args(input, output, profile).join(" "))
    }

    async fn transcode(
        &self,
        input: &Path,
        output: &Path,
        profile: EncodeProfile,
    ) -> Result<(), EncodeError> {
        self.run(transcode_args(input, output, profile)).await
    }

    async fn trim(&self, input: &Path, output: &Path, start_seconds: u32) -> Result<(), EncodeError> {
        self.run(trim_args(input, output, start_seconds)).await
    }
}

async fn watch_progress<R: AsyncRead + Unpin>(stream: R, every: Duration) {
    let mut lines = BufReader::new(stream).lines();
    let mut parser = ProgressParser::new();
    let mut throttle = ProgressThrottle::new(every);
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if let Some(report) = parser.feed(&line) {
                    if throttle.should_log(&report) {
                        info!(progress = %report, "ffmpeg");
                    }
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "ffmpeg stdout unreadable");
                break;
            }
        }
    }
}

async fn watch_stderr<R: AsyncRead + Unpin>(stream: R) {
    let mut lines = BufReader::new(stream).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim();
        if !line.is_empty() {
            warn!(target: "vodkeeper::ffmpeg", "{}", line);
        }
    }
}
