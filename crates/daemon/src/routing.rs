//! Routing module deciding what happens to a recording.
//!
//! A job whose base name matches the HEVC pattern is re-encoded, one matching
//! the copy pattern is remuxed, anything else is ignored and left for the
//! retention scheduler. The HEVC rule wins when both match.

use crate::encode::EncodeProfile;
use crate::jobs::Job;
use crate::pattern::{compile_pattern, PatternError};
use regex::Regex;
use vodkeeper_config::RoutingConfig;

/// Characters that cannot appear in an output file name.
const UNSAFE_CHARS: &[char] = &['/', '\\', ':', '*', '?', '"', '<', '>', '|', '\0'];

/// Outcome of routing a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteDecision {
    /// Transcode with `profile` into `out_file`.
    Encode {
        profile: EncodeProfile,
        out_file: String,
    },
    /// No rule matched.
    Ignore,
}

/// Compiled routing patterns.
#[derive(Debug, Clone)]
pub struct RoutingRules {
    hevc: Option<Regex>,
    copy: Option<Regex>,
    time_format: String,
}

impl RoutingRules {
    pub fn new(hevc: Option<Regex>, copy: Option<Regex>, time_format: impl Into<String>) -> Self {
        Self {
            hevc,
            copy,
            time_format: time_format.into(),
        }
    }

    /// Compile the configured patterns. An empty pattern never matches.
    pub fn from_config(config: &RoutingConfig) -> Result<Self, PatternError> {
        let compile = |pattern: &str, flags: &[String]| -> Result<Option<Regex>, PatternError> {
            if pattern.is_empty() {
                Ok(None)
            } else {
                compile_pattern(pattern, flags).map(Some)
            }
        };
        Ok(Self::new(
            compile(&config.hevc_pattern, &config.hevc_pattern_flags)?,
            compile(&config.copy_pattern, &config.copy_pattern_flags)?,
            config.time_format.clone(),
        ))
    }

    pub fn time_format(&self) -> &str {
        &self.time_format
    }

    /// `"<created_at formatted>_<title>"`, made safe for use as a file name.
    pub fn base_name(&self, job: &Job) -> String {
        let title: String = job
            .title
            .trim()
            .chars()
            .map(|c| if UNSAFE_CHARS.contains(&c) { '_' } else { c })
            .collect();
        format!("{}_{}", job.created_at.format(&self.time_format), title)
    }

    /// Decide the codec and output name for `job`.
    ///
    /// Depends only on title, creation time and the rules, so routing the
    /// same job twice gives the same answer.
    pub fn route(&self, job: &Job) -> RouteDecision {
        let base = self.base_name(job);
        let matches = |re: &Option<Regex>| re.as_ref().map(|r| r.is_match(&base)).unwrap_or(false);

        let profile = if matches(&self.hevc) {
            EncodeProfile::Hevc
        } else if matches(&self.copy) {
            EncodeProfile::Copy
        } else {
            return RouteDecision::Ignore;
        };
        RouteDecision::Encode {
            profile,
            out_file: format!("{}{}", base, profile.extension()),
        }
    }
}
