//! Retention scheduler
//!
//! Tracks the recordings left in the source directory, deletes each one
//! `retention_days` after it was recorded and warns ahead of time at a
//! ladder of hour thresholds.

pub mod format;

use crate::jobs::split_timestamped_name;
use crate::notify::{Notification, NotifySource, Notifier};
use crate::scan::list_source_files;
use chrono::{DateTime, Local, NaiveDateTime};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Notify, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use vodkeeper_config::CleanerConfig;

pub use format::{fmt_plural, human_timedelta};

/// Error type for the retention scheduler.
#[derive(Debug, Error)]
pub enum RetentionError {
    #[error("failed to list {dir}: {source}")]
    Scan { dir: PathBuf, source: io::Error },
}

/// A file waiting for its deadline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingFile {
    pub name: String,
    pub path: PathBuf,
    pub deadline: NaiveDateTime,
}

/// Result of one deletion pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DeletionReport {
    /// Names (extension stripped) of removed files.
    pub deleted: Vec<String>,
    /// Names and errors of files that could not be removed.
    pub failed: Vec<(String, String)>,
}

impl DeletionReport {
    pub fn is_empty(&self) -> bool {
        self.deleted.is_empty() && self.failed.is_empty()
    }

    /// Status text, `None` when nothing happened.
    pub fn message(&self) -> Option<String> {
        if self.is_empty() {
            return None;
        }
        let mut sections = Vec::new();
        if !self.deleted.is_empty() {
            let lines: Vec<String> = self.deleted.iter().map(|n| format!("- \"{}\"", n)).collect();
            sections.push(format!(
                "Deleted {}:\n{}",
                fmt_plural(self.deleted.len(), "video"),
                lines.join("\n")
            ));
        }
        if !self.failed.is_empty() {
            let lines: Vec<String> = self
                .failed
                .iter()
                .map(|(n, e)| format!("- \"{}\": {}", n, e))
                .collect();
            sections.push(format!(
                "Could not delete {}:\n{}",
                fmt_plural(self.failed.len(), "video"),
                lines.join("\n")
            ));
        }
        Some(sections.join("\n"))
    }
}

/// One newly crossed warning threshold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Warning {
    pub name: String,
    pub threshold: u32,
    pub remaining: chrono::Duration,
}

/// Result of one warning pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WarningReport {
    pub warnings: Vec<Warning>,
}

impl WarningReport {
    pub fn is_empty(&self) -> bool {
        self.warnings.is_empty()
    }

    pub fn message(&self) -> Option<String> {
        if self.is_empty() {
            return None;
        }
        let lines: Vec<String> = self
            .warnings
            .iter()
            .map(|w| {
                format!(
                    "- \"{}\" will be deleted in {}",
                    w.name,
                    human_timedelta(w.remaining, 2)
                )
            })
            .collect();
        Some(format!(
            "{} to be deleted:\n{}",
            fmt_plural(self.warnings.len(), "video"),
            lines.join("\n")
        ))
    }
}

/// Pending entry as reported by `/status`.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PendingEntry {
    pub name: String,
    pub deadline: NaiveDateTime,
    pub hours_left: f64,
    pub warned_threshold: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct RetentionSnapshot {
    pub pending: Vec<PendingEntry>,
    pub blacklisted: usize,
}

/// Deadline bookkeeping for one directory.
///
/// `pending` is rebuilt from the directory on every [`update`](Self::update),
/// so dropping the scheduler mid-sleep loses nothing.
#[derive(Debug)]
pub struct RetentionScheduler {
    dir: PathBuf,
    extensions: Vec<String>,
    time_format: String,
    retention: chrono::Duration,
    /// Descending; `ladder[0]` is the "too far away" ceiling.
    ladder: Vec<u32>,
    pending: HashMap<String, PendingFile>,
    warned: HashMap<String, u32>,
    blacklist: HashSet<String>,
}

impl RetentionScheduler {
    /// `warn_at` is the list of hour thresholds; twice its largest value is
    /// prepended as the ceiling above which files are not warned about.
    pub fn new(
        dir: impl Into<PathBuf>,
        extensions: Vec<String>,
        time_format: impl Into<String>,
        retention_days: u32,
        warn_at: &[u32],
    ) -> Self {
        let mut ladder: Vec<u32> = warn_at.to_vec();
        ladder.sort_unstable_by(|a, b| b.cmp(a));
        ladder.dedup();
        if let Some(&max) = ladder.first() {
            ladder.insert(0, max.saturating_mul(2));
        }
        Self {
            dir: dir.into(),
            extensions,
            time_format: time_format.into(),
            retention: chrono::Duration::days(i64::from(retention_days)),
            ladder,
            pending: HashMap::new(),
            warned: HashMap::new(),
            blacklist: HashSet::new(),
        }
    }

    pub fn from_config(
        config: &CleanerConfig,
        dir: impl Into<PathBuf>,
        time_format: impl Into<String>,
    ) -> Self {
        Self::new(
            dir,
            config.extensions.clone(),
            time_format,
            config.retention_days,
            &config.warn_at_hours,
        )
    }

    pub fn ladder(&self) -> &[u32] {
        &self.ladder
    }

    pub fn pending(&self) -> &HashMap<String, PendingFile> {
        &self.pending
    }

    pub fn blacklist(&self) -> &HashSet<String> {
        &self.blacklist
    }

    pub fn warned_threshold(&self, name: &str) -> Option<u32> {
        self.warned.get(name).copied()
    }

    /// Start tracking `name`, recorded at `recorded_at`.
    pub fn track(&mut self, name: &str, path: PathBuf, recorded_at: NaiveDateTime) {
        self.pending.insert(
            name.to_string(),
            PendingFile {
                name: name.to_string(),
                path,
                deadline: recorded_at + self.retention,
            },
        );
    }

    /// Rebuild `pending` from the directory listing.
    ///
    /// The recording time comes from the name prefix, then the modification
    /// time. Files with neither are blacklisted for good.
    pub fn update(&mut self) -> Result<usize, RetentionError> {
        let files = list_source_files(&self.dir, &self.extensions, &self.blacklist).map_err(
            |source| RetentionError::Scan {
                dir: self.dir.clone(),
                source,
            },
        )?;

        self.pending.clear();
        for file in files {
            let recorded_at = split_timestamped_name(&file.name, &self.time_format)
                .map(|(ts, _)| ts)
                .or_else(|| {
                    debug!(file = %file.name, "no timestamp in name, using modified time");
                    file.modified
                        .map(|m| DateTime::<Local>::from(m).naive_local())
                });
            match recorded_at {
                Some(ts) => self.track(&file.name, file.path, ts),
                None => {
                    warn!(file = %file.name, "cannot determine recording time, blacklisting");
                    self.blacklist.insert(file.name);
                }
            }
        }
        let pending = &self.pending;
        self.warned.retain(|name, _| pending.contains_key(name));
        debug!(pending = self.pending.len(), "retention list updated");
        Ok(self.pending.len())
    }

    /// Earliest deadline among tracked files.
    pub fn next_deadline(&self) -> Option<NaiveDateTime> {
        self.pending.values().map(|p| p.deadline).min()
    }

    /// Delete every file whose deadline is at or before `now`.
    ///
    /// Files go in deadline order. A failed unlink blacklists the file so it
    /// is never retried; a file already gone is dropped silently.
    pub fn delete_pending(&mut self, now: NaiveDateTime) -> DeletionReport {
        let mut due: Vec<PendingFile> = self
            .pending
            .values()
            .filter(|p| p.deadline <= now && !self.blacklist.contains(&p.name))
            .cloned()
            .collect();
        due.sort_by(|a, b| a.deadline.cmp(&b.deadline).then_with(|| a.name.cmp(&b.name)));

        let mut report = DeletionReport::default();
        for file in due {
            self.pending.remove(&file.name);
            self.warned.remove(&file.name);
            match fs::remove_file(&file.path) {
                Ok(()) => {
                    info!(file = %file.name, deadline = %file.deadline, "deleted");
                    report.deleted.push(display_name(&file.name));
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    debug!(file = %file.name, "already gone");
                }
                Err(e) => {
                    warn!(file = %file.name, error = %e, "delete failed, blacklisting");
                    self.blacklist.insert(file.name.clone());
                    report.failed.push((display_name(&file.name), e.to_string()));
                }
            }
        }
        report
    }

    /// Record and return the files that crossed a new threshold.
    pub fn check_for_warnings(&mut self, now: NaiveDateTime) -> WarningReport {
        let Some(&ceiling) = self.ladder.first() else {
            return WarningReport::default();
        };
        let mut files: Vec<&PendingFile> = self.pending.values().collect();
        files.sort_by(|a, b| a.deadline.cmp(&b.deadline).then_with(|| a.name.cmp(&b.name)));

        let mut report = WarningReport::default();
        for file in files {
            let remaining = file.deadline - now;
            let hours = remaining.num_seconds() as f64 / 3600.0;
            if hours <= 0.0 {
                self.warned.remove(&file.name);
                continue;
            }
            if hours > f64::from(ceiling) {
                continue;
            }
            // Smallest threshold still at or above the remaining time.
            let Some(&next) = self.ladder[1..]
                .iter()
                .rev()
                .find(|&&th| f64::from(th) >= hours)
            else {
                continue;
            };
            let current = self.warned.get(&file.name).copied().unwrap_or(ceiling);
            if current == next {
                continue;
            }
            self.warned.insert(file.name.clone(), next);
            report.warnings.push(Warning {
                name: display_name(&file.name),
                threshold: next,
                remaining,
            });
        }
        report
    }

    pub fn snapshot(&self, now: NaiveDateTime) -> RetentionSnapshot {
        let mut pending: Vec<PendingEntry> = self
            .pending
            .values()
            .map(|p| PendingEntry {
                name: p.name.clone(),
                deadline: p.deadline,
                hours_left: (p.deadline - now).num_seconds() as f64 / 3600.0,
                warned_threshold: self.warned.get(&p.name).copied(),
            })
            .collect();
        pending.sort_by(|a, b| a.deadline.cmp(&b.deadline).then_with(|| a.name.cmp(&b.name)));
        RetentionSnapshot {
            pending,
            blacklisted: self.blacklist.len(),
        }
    }
}

fn display_name(name: &str) -> String {
    Path::new(name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(name)
        .to_string()
}

fn now() -> NaiveDateTime {
    Local::now().naive_local()
}

/// Source of the local wall-clock time deadlines are compared against.
pub type Clock = Arc<dyn Fn() -> NaiveDateTime + Send + Sync>;

/// Runs the deletion and warning loops around a shared scheduler.
#[derive(Clone)]
pub struct Cleaner {
    scheduler: Arc<RwLock<RetentionScheduler>>,
    notifier: Notifier,
    rescan: Arc<Notify>,
    max_sleep: Duration,
    warning_interval: Duration,
    clock: Clock,
}

impl Cleaner {
    pub fn new(
        scheduler: RetentionScheduler,
        notifier: Notifier,
        rescan: Arc<Notify>,
        max_sleep: Duration,
        warning_interval: Duration,
    ) -> Self {
        Self {
            scheduler: Arc::new(RwLock::new(scheduler)),
            notifier,
            rescan,
            max_sleep,
            warning_interval,
            clock: Arc::new(now),
        }
    }

    /// Replace the local clock.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn scheduler(&self) -> Arc<RwLock<RetentionScheduler>> {
        self.scheduler.clone()
    }

    pub async fn snapshot(&self) -> RetentionSnapshot {
        self.scheduler.read().await.snapshot((self.clock)())
    }

    /// Rescan, delete what is due and return how long to sleep.
    async fn delete_pass(&self) -> Duration {
        let (report, next) = {
            let mut scheduler = self.scheduler.write().await;
            if let Err(e) = scheduler.update() {
                warn!(error = %e, "retention update failed");
            }
            let current = (self.clock)();
            let report = scheduler.delete_pending(current);
            let next = scheduler
                .next_deadline()
                .map(|d| (d - current).to_std().unwrap_or(Duration::ZERO));
            (report, next)
        };

        if let Some(message) = report.message() {
            let notification = if report.failed.is_empty() {
                Notification::info(NotifySource::Cleaner, "Deleted recordings")
            } else {
                Notification::error(NotifySource::Cleaner, "Could not delete recordings")
            };
            self.notifier
                .send(notification.with_description(message))
                .await;
        }
        next.unwrap_or(self.max_sleep).min(self.max_sleep)
    }

    /// Loop A: sleep until the nearest deadline, then delete.
    ///
    /// A rescan signal cuts the sleep short. Cancellation only interrupts the
    /// sleep, never a pass in progress.
    pub async fn worker(&self, cancel: CancellationToken) {
        info!("retention worker started");
        loop {
            let wait = self.delete_pass().await;
            debug!(sleep_secs = wait.as_secs(), "waiting for next deadline");
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.rescan.notified() => debug!("rescan requested"),
                _ = tokio::time::sleep(wait) => {}
            }
        }
        info!("retention worker stopped");
    }

    /// Loop B: check warning thresholds every `warning_interval`.
    pub async fn warning_worker(&self, cancel: CancellationToken) {
        info!("warning worker started");
        loop {
            let report = {
                let mut scheduler = self.scheduler.write().await;
                if let Err(e) = scheduler.update() {
                    warn!(error = %e, "retention update failed");
                }
                scheduler.check_for_warnings((self.clock)())
            };
            if let Some(message) = report.message() {
                info!(count = report.warnings.len(), "retention warnings");
                self.notifier
                    .send(
                        Notification::warning(NotifySource::Cleaner, "Recordings to be deleted")
                            .with_description(message),
                    )
                    .await;
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.warning_interval) => {}
            }
        }
        info!("warning worker stopped");
    }
}
