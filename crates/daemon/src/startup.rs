//! Startup checks module for vodkeeper
//!
//! Preflight checks run before the daemon starts:
//! - ffmpeg and ffprobe run and report a version
//! - source, output and temp directories exist (created if missing)

use crate::config::Config;
use std::path::Path;
use std::process::Command;
use thiserror::Error;
use tracing::info;

/// Error types for startup checks
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("{tool} not available: {message}")]
    ToolUnavailable { tool: String, message: String },

    #[error("Cannot create directory {path}: {source}")]
    Directory {
        path: String,
        source: std::io::Error,
    },
}

/// Extract the version token from `<tool> -version` output.
///
/// Handles plain (`6.1.1`), n-prefixed (`n6.1-3-gabc`) and distro suffixed
/// (`4.4.2-0ubuntu0.22.04.1`) versions. The leading `n` is stripped.
pub fn parse_tool_version(output: &str, tool: &str) -> Option<String> {
    let needle = format!("{} version", tool.to_lowercase());
    let line = output
        .lines()
        .find(|line| line.to_lowercase().contains(&needle))?;
    let lower = line.to_lowercase();
    let token = lower.split(&needle).nth(1)?.split_whitespace().next()?;
    let version = token.strip_prefix('n').unwrap_or(token);
    if version.chars().next()?.is_ascii_digit() {
        Some(version.to_string())
    } else {
        None
    }
}

/// Run `<bin> -version` and return the parsed version.
///
/// # Arguments
/// * `bin` - Binary name or path from the config
/// * `tool` - Name printed in the banner (`ffmpeg` or `ffprobe`)
pub fn check_tool_version(bin: &str, tool: &str) -> Result<String, StartupError> {
    let unavailable = |message: String| StartupError::ToolUnavailable {
        tool: tool.to_string(),
        message,
    };
    let output = Command::new(bin)
        .arg("-version")
        .output()
        .map_err(|e| unavailable(format!("{} -version failed; is it in PATH? Error: {}", bin, e)))?;

    if !output.status.success() {
        return Err(unavailable(format!("{} -version failed", bin)));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let version = parse_tool_version(&stdout, tool).ok_or_else(|| {
        unavailable(format!(
            "could not parse version from output: {}",
            stdout.lines().next().unwrap_or("(empty)")
        ))
    })?;
    info!(tool, %version, "found");
    Ok(version)
}

/// Create `dir` if it does not exist yet.
pub fn ensure_directory(dir: &Path) -> Result<(), StartupError> {
    if dir.is_dir() {
        return Ok(());
    }
    std::fs::create_dir_all(dir).map_err(|source| StartupError::Directory {
        path: dir.display().to_string(),
        source,
    })?;
    info!(path = %dir.display(), "created directory");
    Ok(())
}

/// Run all startup checks in order
///
/// 1. Working directories
/// 2. ffmpeg, then ffprobe (skipped with `skip_tools`)
pub fn run_startup_checks(cfg: &Config, skip_tools: bool) -> Result<(), StartupError> {
    for dir in [
        &cfg.paths.source_dir,
        &cfg.paths.output_dir,
        &cfg.paths.temp_dir,
    ] {
        ensure_directory(dir)?;
    }
    if skip_tools {
        info!("skipping tool checks");
        return Ok(());
    }
    check_tool_version(&cfg.encoder.ffmpeg_bin, "ffmpeg")?;
    check_tool_version(&cfg.encoder.ffprobe_bin, "ffprobe")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_distro_version() {
        let out = "ffprobe version 4.4.2-0ubuntu0.22.04.1 Copyright (c) 2007-2021\nbuilt with gcc 11";
        assert_eq!(
            parse_tool_version(out, "ffprobe"),
            Some("4.4.2-0ubuntu0.22.04.1".to_string())
        );
    }

    #[test]
    fn test_parse_rejects_other_tool_and_garbage() {
        let out = "ffmpeg version 6.1 Copyright";
        assert_eq!(parse_tool_version(out, "ffprobe"), None);
        assert_eq!(parse_tool_version("ffmpeg version git-2023", "ffmpeg"), None);
        assert_eq!(parse_tool_version("", "ffmpeg"), None);
    }

    #[test]
    fn test_missing_binary_is_unavailable() {
        let result = check_tool_version("/nonexistent/bin/ffmpeg", "ffmpeg");
        assert!(matches!(result, Err(StartupError::ToolUnavailable { .. })));
    }

    #[test]
    fn test_startup_creates_directories() {
        let dir = TempDir::new().unwrap();
        let mut cfg = Config::default();
        cfg.paths.source_dir = dir.path().join("src");
        cfg.paths.output_dir = dir.path().join("out");
        cfg.paths.temp_dir = dir.path().join("tmp/vodkeeper");

        run_startup_checks(&cfg, true).unwrap();

        assert!(cfg.paths.source_dir.is_dir());
        assert!(cfg.paths.output_dir.is_dir());
        assert!(cfg.paths.temp_dir.is_dir());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_version_parsing_standard(
            major in 1u32..20,
            minor in 0u32..10,
            patch in 0u32..10,
        ) {
            let out = format!(
                "ffmpeg version {}.{}.{} Copyright (c) 2000-2024 the FFmpeg developers",
                major, minor, patch
            );
            prop_assert_eq!(
                parse_tool_version(&out, "ffmpeg"),
                Some(format!("{}.{}.{}", major, minor, patch))
            );
        }

        #[test]
        fn prop_version_parsing_n_prefixed(
            major in 1u32..20,
            minor in 0u32..10,
            git_hash in "[a-f0-9]{7}",
        ) {
            let out = format!(
                "ffprobe version n{}.{}-123-g{} Copyright (c) 2007-2024\nbuilt with gcc 12.2.0",
                major, minor, git_hash
            );
            prop_assert_eq!(
                parse_tool_version(&out, "ffprobe"),
                Some(format!("{}.{}-123-g{}", major, minor, git_hash))
            );
        }
    }
}
