//! Parsing of ffmpeg `-progress -` output.
//!
//! ffmpeg prints `key=value` lines and closes every block with a
//! `progress=continue` (or `progress=end`) line.

use crate::probe::parse_sexagesimal;
use std::time::Duration;

/// One progress block.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressReport {
    pub frame: u64,
    pub fps: f64,
    pub total_size_bytes: u64,
    /// None while ffmpeg still reports `N/A`.
    pub out_time: Option<Duration>,
    /// Set on the final block.
    pub finished: bool,
}

impl std::fmt::Display for ProgressReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let time = self
            .out_time
            .map(|t| format!("{:.1}s", t.as_secs_f64()))
            .unwrap_or_else(|| "N/A".to_string());
        write!(
            f,
            "frame {}, FPS {:.2}, time {}, size {:.1}MB",
            self.frame,
            self.fps,
            time,
            self.total_size_bytes as f64 / 1e6
        )
    }
}

/// Accumulates lines until a block is complete.
#[derive(Debug, Default)]
pub struct ProgressParser {
    current: ProgressReport,
}

impl ProgressParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one line; returns the finished report when the line closes a block.
    pub fn feed(&mut self, line: &str) -> Option<ProgressReport> {
        let (key, value) = line.trim().split_once('=')?;
        let value = value.trim();
        match key.trim() {
            "frame" => self.current.frame = value.parse().unwrap_or(self.current.frame),
            "fps" => self.current.fps = value.parse().unwrap_or(self.current.fps),
            "total_size" => {
                self.current.total_size_bytes =
                    value.parse().unwrap_or(self.current.total_size_bytes)
            }
            "out_time" => self.current.out_time = parse_sexagesimal(value),
            "progress" => {
                self.current.finished = value == "end";
                return Some(std::mem::take(&mut self.current));
            }
            _ => {}
        }
        None
    }
}

/// Decides which reports are worth a log line.
#[derive(Debug)]
pub struct ProgressThrottle {
    every: Duration,
    last: Option<Duration>,
}

impl ProgressThrottle {
    pub fn new(every: Duration) -> Self {
        Self { every, last: None }
    }

    /// True when output time advanced by at least `every` since the last
    /// logged report, or when the time is unknown.
    pub fn should_log(&mut self, report: &ProgressReport) -> bool {
        let Some(now) = report.out_time else {
            return true;
        };
        let due = match self.last {
            None => true,
            Some(last) if now >= last => now - last >= self.every,
            Some(last) => last - now >= self.every,
        };
        if due {
            self.last = Some(now);
        }
        due
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "frame=84\nfps=0.00\nstream_0_0_q=-1.0\nbitrate=   8.6kbits/s\n\
total_size=3050\nout_time_us=2838000\nout_time_ms=2838000\nout_time=00:00:02.838000\n\
dup_frames=0\ndrop_frames=0\nspeed=5.59x\nprogress=continue\n";

    #[test]
    fn test_parses_block() {
        let mut parser = ProgressParser::new();
        let reports: Vec<ProgressReport> = SAMPLE.lines().filter_map(|l| parser.feed(l)).collect();

        assert_eq!(reports.len(), 1);
        let r = &reports[0];
        assert_eq!(r.frame, 84);
        assert_eq!(r.total_size_bytes, 3050);
        assert_eq!(r.out_time, Some(Duration::from_micros(2_838_000)));
        assert!(!r.finished);
    }

    #[test]
    fn test_na_time_and_end_marker() {
        let mut parser = ProgressParser::new();
        assert!(parser.feed("out_time=N/A").is_none());
        let r = parser.feed("progress=end").unwrap();
        assert_eq!(r.out_time, None);
        assert!(r.finished);
    }

    #[test]
    fn test_state_resets_between_blocks() {
        let mut parser = ProgressParser::new();
        parser.feed("frame=10");
        parser.feed("progress=continue");
        let second = parser.feed("progress=continue").unwrap();
        assert_eq!(second.frame, 0);
    }

    #[test]
    fn test_throttle_logs_every_interval() {
        let mut throttle = ProgressThrottle::new(Duration::from_secs(30));
        let at = |secs| ProgressReport {
            out_time: Some(Duration::from_secs(secs)),
            ..Default::default()
        };

        assert!(throttle.should_log(&at(0)));
        assert!(!throttle.should_log(&at(10)));
        assert!(!throttle.should_log(&at(29)));
        assert!(throttle.should_log(&at(30)));
        assert!(!throttle.should_log(&at(45)));
        assert!(throttle.should_log(&at(61)));
        assert!(throttle.should_log(&ProgressReport::default()));
    }
}
