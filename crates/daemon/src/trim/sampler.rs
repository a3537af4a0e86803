//! Single-frame extraction.

use super::frame::frame_from_raw;
use super::TrimError;
use async_trait::async_trait;
use image::GrayImage;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

/// Decodes one greyscale frame at a given offset.
#[async_trait]
pub trait FrameSampler: Send + Sync {
    async fn sample(&self, file: &Path, seconds: u32) -> Result<GrayImage, TrimError>;
}

/// [`FrameSampler`] that pipes a raw grey frame out of ffmpeg.
#[derive(Debug, Clone)]
pub struct FfmpegFrameSampler {
    bin: String,
    width: u32,
    height: u32,
}

impl FfmpegFrameSampler {
    pub fn new(bin: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            bin: bin.into(),
            width,
            height,
        }
    }

    /// Build the extraction command for `file` at `seconds`.
    pub fn build_command(&self, file: &Path, seconds: u32) -> Command {
        let mut cmd = Command::new(&self.bin);
        cmd.args(["-v", "error", "-ss"])
            .arg(seconds.to_string())
            .arg("-i")
            .arg(file)
            .args(["-frames:v", "1", "-vf"])
            .arg(format!("scale={}:{}", self.width, self.height))
            .args(["-pix_fmt", "gray", "-f", "rawvideo", "-"])
            .stdin(Stdio::null())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl FrameSampler for FfmpegFrameSampler {
    async fn sample(&self, file: &Path, seconds: u32) -> Result<GrayImage, TrimError> {
        if !file.exists() {
            return Err(TrimError::NotFound(file.to_path_buf()));
        }
        let output = self.build_command(file, seconds).output().await?;
        if !output.status.success() {
            return Err(TrimError::Extract {
                seconds,
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        let got = output.stdout.len();
        frame_from_raw(self.width, self.height, output.stdout).ok_or_else(|| {
            TrimError::Extract {
                seconds,
                message: format!(
                    "expected {} bytes of frame data, got {}",
                    self.width as usize * self.height as usize,
                    got
                ),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_shape() {
        let sampler = FfmpegFrameSampler::new("ffmpeg", 640, 360);
        let cmd = sampler.build_command(Path::new("/tmp/a.mkv"), 600);
        let args: Vec<String> = cmd
            .as_std()
            .get_args()
            .filter_map(|a| a.to_str().map(String::from))
            .collect();
        assert_eq!(
            args.join(" "),
            "-v error -ss 600 -i /tmp/a.mkv -frames:v 1 -vf scale=640:360 -pix_fmt gray -f rawvideo -"
        );
    }

    #[tokio::test]
    async fn test_missing_file() {
        let sampler = FfmpegFrameSampler::new("ffmpeg", 640, 360);
        let result = sampler.sample(Path::new("/nonexistent/video.mkv"), 10).await;
        assert!(matches!(result, Err(TrimError::NotFound(_))));
    }
}
