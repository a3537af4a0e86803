//! Job model and persistence.
//!
//! A job is appended when the recorder submits a file and is then mutated in
//! place by the runner. Jobs are never removed by the daemon; the whole list
//! is rewritten to a single JSON file after every change.

use crate::encode::EncodeProfile;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

/// Error type for job store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error on job store: {0}")]
    Io(#[from] io::Error),

    #[error("invalid job JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid job record: {0}")]
    Record(String),
}

/// Position of a job in the runner's state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStage {
    /// Submitted, not yet looked at.
    #[default]
    New,
    /// Output name and codec chosen.
    Routed,
    /// Transcoder running.
    Encoding,
    /// Transcode finished.
    Encoded,
    /// Transcode failed; source kept.
    Failed,
    /// Searching for the intro.
    Trimming,
    /// Intro cut off the encode.
    Trimmed,
    /// Validating and removing the source.
    Deleting,
    /// Source removed.
    Deleted,
    /// Source could not be validated or removed.
    DeleteFailed,
    /// No routing rule matched, or the source was missing.
    Ignored,
}

impl JobStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStage::New => "new",
            JobStage::Routed => "routed",
            JobStage::Encoding => "encoding",
            JobStage::Encoded => "encoded",
            JobStage::Failed => "failed",
            JobStage::Trimming => "trimming",
            JobStage::Trimmed => "trimmed",
            JobStage::Deleting => "deleting",
            JobStage::Deleted => "deleted",
            JobStage::DeleteFailed => "delete_failed",
            JobStage::Ignored => "ignored",
        }
    }

    /// True when the runner has nothing left to do for the job.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStage::Encoded
                | JobStage::Failed
                | JobStage::Trimmed
                | JobStage::Deleted
                | JobStage::DeleteFailed
                | JobStage::Ignored
        )
    }
}

impl std::fmt::Display for JobStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the recorder posts to start a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSubmission {
    /// Source file, relative to the source directory or absolute
    pub input: PathBuf,
    pub title: String,
    pub user: String,
    #[serde(alias = "createdAt")]
    pub created_at: NaiveDateTime,
}

/// A unit of work with its full history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: Uuid,
    pub input: PathBuf,
    pub title: String,
    pub user: String,
    #[serde(alias = "created_at")]
    pub created_at: NaiveDateTime,
    /// Output file name, set once the job was routed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub out_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enc_codec: Option<EncodeProfile>,
    /// Exact transcoder invocation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enc_cmd: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enc_start: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enc_end: Option<DateTime<Utc>>,
    /// Seconds cut off the start of the output
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_seconds: Option<u32>,
    #[serde(default)]
    pub ignored: bool,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub stage: JobStage,
}

impl Job {
    /// Create a fresh job from a submission.
    pub fn new(submission: JobSubmission) -> Self {
        Self {
            id: Uuid::new_v4(),
            input: submission.input,
            title: submission.title,
            user: submission.user,
            created_at: submission.created_at,
            out_file: None,
            enc_codec: None,
            enc_cmd: None,
            enc_start: None,
            enc_end: None,
            start_seconds: None,
            ignored: false,
            deleted: false,
            error: None,
            stage: JobStage::New,
        }
    }

    /// Absolute location of the source file.
    pub fn source_path(&self, source_dir: &Path) -> PathBuf {
        source_dir.join(&self.input)
    }

    /// Observed transcode time.
    pub fn encode_duration(&self) -> Option<chrono::Duration> {
        match (self.enc_start, self.enc_end) {
            (Some(start), Some(end)) => Some(end - start),
            _ => None,
        }
    }

    /// Record a terminal failure: the file is left for the retention scheduler.
    pub fn fail_ignored(&mut self, stage: JobStage, error: impl Into<String>) {
        self.error = Some(error.into());
        self.ignored = true;
        self.stage = stage;
    }
}

/// Upgrade a stored record to the current [`Job`] layout.
///
/// Older records used `src`, `file_name` (timestamp prefix + title),
/// `ignore`, `trimmed`/`start_seconds`, `enc_file` and naive ISO timestamps.
/// Records already in the current layout pass through; records without an id
/// get a fresh one.
pub fn migrate_legacy_record(value: Value, time_format: &str) -> Result<Job, StoreError> {
    let Value::Object(mut map) = value else {
        return Err(StoreError::Record("job record is not an object".to_string()));
    };

    if map.contains_key("src") || map.contains_key("file_name") {
        upgrade_legacy_fields(&mut map, time_format);
    }
    if !map.contains_key("id") {
        map.insert("id".to_string(), Value::String(Uuid::new_v4().to_string()));
    }
    Ok(serde_json::from_value(Value::Object(map))?)
}

fn upgrade_legacy_fields(map: &mut Map<String, Value>, time_format: &str) {
    let rename = |map: &mut Map<String, Value>, from: &str, to: &str| {
        if let Some(v) = map.remove(from) {
            if !v.is_null() && !map.contains_key(to) {
                map.insert(to.to_string(), v);
            }
        }
    };

    rename(map, "src", "input");
    rename(map, "enc_file", "outFile");
    rename(map, "enc_cmd", "encCmd");
    rename(map, "enc_codec", "encCodec");
    rename(map, "start_seconds", "startSeconds");
    rename(map, "trimmed", "startSeconds");
    rename(map, "ignore", "ignored");

    for (from, to) in [("enc_start", "encStart"), ("enc_end", "encEnd")] {
        if let Some(Value::String(s)) = map.remove(from) {
            if let Some(dt) = parse_legacy_datetime(&s) {
                map.insert(to.to_string(), Value::String(dt.to_rfc3339()));
            }
        }
    }

    if let Some(Value::String(file_name)) = map.remove("file_name") {
        let (created, title) = match split_timestamped_name(&file_name, time_format) {
            Some((created, title)) => (Some(created), title.to_string()),
            None => (None, file_name.clone()),
        };
        let created = created
            .or_else(|| {
                map.get("encStart")
                    .and_then(Value::as_str)
                    .and_then(parse_legacy_datetime)
                    .map(|dt| dt.naive_utc())
            })
            .unwrap_or_default();
        map.entry("title").or_insert(Value::String(title));
        map.entry("createdAt")
            .or_insert(Value::String(created.format("%Y-%m-%dT%H:%M:%S").to_string()));
    }

    for flag in ["ignored", "deleted"] {
        if map.get(flag).map(Value::is_null).unwrap_or(false) {
            map.remove(flag);
        }
    }

    let raw = map.remove("raw").and_then(|v| v.as_bool()).unwrap_or(true);
    map.remove("failure");
    if !map.contains_key("stage") {
        let flag = |map: &Map<String, Value>, k: &str| {
            map.get(k).and_then(Value::as_bool).unwrap_or(false)
        };
        let stage = if flag(map, "deleted") {
            JobStage::Deleted
        } else if flag(map, "ignored") && map.contains_key("error") {
            JobStage::Failed
        } else if flag(map, "ignored") {
            JobStage::Ignored
        } else if map.contains_key("error") {
            JobStage::DeleteFailed
        } else if map.contains_key("startSeconds") {
            JobStage::Trimmed
        } else if !raw {
            JobStage::Encoded
        } else {
            JobStage::New
        };
        map.insert("stage".to_string(), Value::String(stage.as_str().to_string()));
    }
}

fn parse_legacy_datetime(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    s.parse::<NaiveDateTime>().ok().map(|naive| naive.and_utc())
}

/// Split `"<timestamp>_<rest>"` into its parsed timestamp and the rest.
pub fn split_timestamped_name<'a>(
    name: &'a str,
    time_format: &str,
) -> Option<(NaiveDateTime, &'a str)> {
    let (prefix, rest) = name.split_once('_')?;
    let ts = NaiveDateTime::parse_from_str(prefix, time_format).ok()?;
    Some((ts, rest))
}

/// Reads and writes the job list file.
#[derive(Debug, Clone)]
pub struct JobStore {
    path: PathBuf,
    time_format: String,
}

impl JobStore {
    pub fn new(path: impl Into<PathBuf>, time_format: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            time_format: time_format.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load all jobs, upgrading old records. A missing file is an empty list.
    pub fn load(&self) -> Result<Vec<Job>, StoreError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let records: Vec<Value> = serde_json::from_str(&content)?;
        records
            .into_iter()
            .map(|r| migrate_legacy_record(r, &self.time_format))
            .collect()
    }

    /// Write the whole list through a temp file and rename.
    pub fn save(&self, jobs: &[Job]) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(jobs)?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}
