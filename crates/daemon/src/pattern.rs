//! Regex construction from a pattern plus named flags.
//!
//! Flags are spelled the way the recorder's config files spell them
//! (`IGNORECASE`, `I`, `MULTILINE`, ...).

use regex::{Regex, RegexBuilder};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PatternError {
    #[error("unknown regex flag: {0}")]
    UnknownFlag(String),

    #[error("invalid regex: {0}")]
    Regex(#[from] regex::Error),
}

/// Compile `pattern` with the given flag names applied.
pub fn compile_pattern<S: AsRef<str>>(pattern: &str, flags: &[S]) -> Result<Regex, PatternError> {
    let mut builder = RegexBuilder::new(pattern);
    for flag in flags {
        match flag.as_ref().to_ascii_uppercase().as_str() {
            "IGNORECASE" | "I" => builder.case_insensitive(true),
            "MULTILINE" | "M" => builder.multi_line(true),
            "DOTALL" | "S" => builder.dot_matches_new_line(true),
            "VERBOSE" | "X" => builder.ignore_whitespace(true),
            "ASCII" | "A" => builder.unicode(false),
            other => return Err(PatternError::UnknownFlag(other.to_string())),
        };
    }
    Ok(builder.build()?)
}
