//! Duration Gate Module
//!
//! Pre-deletion validation ensuring the encode is not shorter than the source.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Result of the duration gate check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DurationGateResult {
    /// Encode is long enough; the source may be removed
    Accept,
    /// Encode is shorter than the source by more than the tolerance
    Reject { source: Duration, encoded: Duration },
}

/// Check whether the encoded file is long enough to replace its source.
///
/// Returns `Accept` iff `encoded >= source - tolerance`.
///
/// # Arguments
/// * `source` - Duration of the raw recording
/// * `encoded` - Duration of the transcoded output
/// * `tolerance` - Allowed shortfall (5 seconds by default)
pub fn check_duration_gate(
    source: Duration,
    encoded: Duration,
    tolerance: Duration,
) -> DurationGateResult {
    if encoded >= source.saturating_sub(tolerance) {
        DurationGateResult::Accept
    } else {
        DurationGateResult::Reject { source, encoded }
    }
}
