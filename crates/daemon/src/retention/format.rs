//! Human readable strings for retention messages.

use chrono::Duration;

const UNITS: &[(&str, i64)] = &[
    ("day", 86_400),
    ("hour", 3_600),
    ("minute", 60),
    ("second", 1),
];

/// `"1 video"` / `"3 videos"`.
pub fn fmt_plural(count: usize, noun: &str) -> String {
    if count == 1 {
        format!("{} {}", count, noun)
    } else {
        format!("{} {}s", count, noun)
    }
}

/// Remaining time as at most `max_units` non-zero units, largest first.
///
/// `human_timedelta(11h 59m 30s, 2)` gives `"11 hours, 59 minutes"`.
/// Negative durations are formatted by magnitude.
pub fn human_timedelta(delta: Duration, max_units: usize) -> String {
    let mut remaining = delta.num_seconds().abs();
    let mut parts = Vec::new();
    for &(name, size) in UNITS {
        if parts.len() == max_units {
            break;
        }
        let value = remaining / size;
        remaining %= size;
        if value > 0 {
            parts.push(fmt_plural(value as usize, name));
        }
    }
    if parts.is_empty() {
        return "0 seconds".to_string();
    }
    parts.join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fmt_plural() {
        assert_eq!(fmt_plural(1, "video"), "1 video");
        assert_eq!(fmt_plural(0, "video"), "0 videos");
        assert_eq!(fmt_plural(4, "video"), "4 videos");
    }

    #[test]
    fn test_two_units() {
        let d = Duration::hours(11) + Duration::minutes(59) + Duration::seconds(30);
        assert_eq!(human_timedelta(d, 2), "11 hours, 59 minutes");
    }

    #[test]
    fn test_skips_zero_units() {
        let d = Duration::days(2) + Duration::minutes(1);
        assert_eq!(human_timedelta(d, 2), "2 days, 1 minute");
        assert_eq!(human_timedelta(Duration::hours(12), 2), "12 hours");
    }

    #[test]
    fn test_zero_and_negative() {
        assert_eq!(human_timedelta(Duration::zero(), 2), "0 seconds");
        assert_eq!(human_timedelta(Duration::minutes(-5), 2), "5 minutes");
    }
}
