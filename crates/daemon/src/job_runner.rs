//! Job runner module
//!
//! Owns the job list and drives each job through route, encode, trim and
//! source cleanup. The whole list is persisted after every state change.

use crate::duration_gate::{check_duration_gate, DurationGateResult};
use crate::encode::{EncodeProfile, Transcoder};
use crate::jobs::{Job, JobStage, JobStore, JobSubmission, StoreError};
use crate::notify::{Notification, NotifySource, Notifier};
use crate::probe::VideoProbe;
use crate::replace::{move_into_dir, replace_with_trimmed};
use crate::routing::{RouteDecision, RoutingRules};
use crate::trim::IntroTrimmer;
use chrono::Utc;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, Notify, Semaphore};
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;
use vodkeeper_config::Config;

/// Error type for submitting and running jobs
#[derive(Debug, Error)]
pub enum SubmitError {
    /// The source file does not exist; the job was recorded as ignored
    #[error("Source file not found: {0}")]
    SourceNotFound(PathBuf),

    #[error("Unknown job: {0}")]
    UnknownJob(Uuid),

    /// The runner was closed
    #[error("Job runner is shutting down")]
    ShuttingDown,

    /// The task driving the job panicked or was aborted
    #[error("Job task aborted: {0}")]
    Aborted(String),
}

/// Directories and limits for the runner.
#[derive(Debug, Clone)]
pub struct RunnerSettings {
    pub source_dir: PathBuf,
    pub output_dir: PathBuf,
    pub temp_dir: PathBuf,
    /// Allowed shortfall of the encode against its source
    pub duration_tolerance: Duration,
    pub max_concurrent_jobs: usize,
}

impl RunnerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            source_dir: config.paths.source_dir.clone(),
            output_dir: config.paths.output_dir.clone(),
            temp_dir: config.paths.temp_dir.clone(),
            duration_tolerance: Duration::from_secs(config.encoder.duration_tolerance_secs),
            max_concurrent_jobs: usize::try_from(config.encoder.max_concurrent_jobs)
                .unwrap_or(usize::MAX)
                .max(1),
        }
    }
}

/// External collaborators used by the runner.
#[derive(Clone)]
pub struct RunnerTools {
    pub transcoder: Arc<dyn Transcoder>,
    pub probe: Arc<dyn VideoProbe>,
    pub trimmer: Arc<IntroTrimmer>,
    pub notifier: Notifier,
}

/// Runs jobs with a concurrency limit.
///
/// Steps of one job always run in sequence; different jobs may interleave
/// up to `max_concurrent_jobs`.
pub struct JobRunner {
    jobs: Mutex<Vec<Job>>,
    running: Mutex<HashSet<Uuid>>,
    store: JobStore,
    /// Held across a write so snapshots reach disk in commit order
    persist: Mutex<()>,
    semaphore: Arc<Semaphore>,
    routing: RoutingRules,
    tools: RunnerTools,
    settings: RunnerSettings,
    rescan: Arc<Notify>,
}

impl JobRunner {
    /// Create a runner, reloading previously persisted jobs.
    ///
    /// Reloaded jobs are only tracked, never re-run.
    pub fn new(
        settings: RunnerSettings,
        store: JobStore,
        routing: RoutingRules,
        tools: RunnerTools,
        rescan: Arc<Notify>,
    ) -> Result<Self, StoreError> {
        let jobs = store.load()?;
        info!(jobs = jobs.len(), file = %store.path().display(), "jobs file read");
        Ok(Self {
            jobs: Mutex::new(jobs),
            running: Mutex::new(HashSet::new()),
            store,
            persist: Mutex::new(()),
            semaphore: Arc::new(Semaphore::new(settings.max_concurrent_jobs.max(1))),
            routing,
            tools,
            settings,
            rescan,
        })
    }

    pub fn settings(&self) -> &RunnerSettings {
        &self.settings
    }

    /// All known jobs in their current state.
    pub async fn list_jobs(&self) -> Vec<Job> {
        self.jobs.lock().await.clone()
    }

    pub async fn get(&self, id: Uuid) -> Option<Job> {
        self.jobs.lock().await.iter().find(|j| j.id == id).cloned()
    }

    /// Ids of jobs currently inside [`run_job`](Self::run_job).
    pub async fn running(&self) -> Vec<Uuid> {
        self.running.lock().await.iter().copied().collect()
    }

    /// Announce that the runner is up.
    pub async fn announce_start(&self) {
        self.tools
            .notifier
            .send(Notification::info(NotifySource::Encoder, "Encoder is running"))
            .await;
    }

    /// Stop accepting new runs. Jobs already holding a permit finish.
    pub async fn close(&self) {
        self.semaphore.close();
        info!("job runner closed");
        self.tools
            .notifier
            .send(Notification::info(NotifySource::Encoder, "Encoder stopped"))
            .await;
    }

    /// Record a submitted job.
    ///
    /// A missing source is still recorded, as ignored with an error, so the
    /// submission shows up in the job list.
    pub async fn submit(&self, submission: JobSubmission) -> Result<Uuid, SubmitError> {
        let mut job = Job::new(submission);
        let source = job.source_path(&self.settings.source_dir);
        if !source.exists() {
            let status = format!("Source file not found: {}", source.display());
            error!(job = %job.id, "{}", status);
            job.fail_ignored(JobStage::Ignored, status.clone());
            self.commit(&job).await;
            self.tools
                .notifier
                .send(
                    Notification::error(NotifySource::Encoder, "Encode failed")
                        .with_field("Error", status),
                )
                .await;
            return Err(SubmitError::SourceNotFound(source));
        }
        info!(job = %job.id, input = %job.input.display(), title = %job.title, "job submitted");
        self.commit(&job).await;
        Ok(job.id)
    }

    /// Drive one job through its whole lifecycle.
    ///
    /// Failures are recorded on the job rather than returned; the error is
    /// only for jobs that cannot be run at all.
    ///
    /// The job runs on its own task, so dropping the returned future does
    /// not stop it halfway.
    pub async fn run_job(self: &Arc<Self>, id: Uuid) -> Result<Job, SubmitError> {
        let runner = Arc::clone(self);
        tokio::spawn(async move { runner.drive(id).await }.in_current_span())
            .await
            .map_err(|e| SubmitError::Aborted(e.to_string()))?
    }

    async fn drive(&self, id: Uuid) -> Result<Job, SubmitError> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| SubmitError::ShuttingDown)?;
        let job = self.get(id).await.ok_or(SubmitError::UnknownJob(id))?;

        self.running.lock().await.insert(id);
        let job = self.execute(job).await;
        self.running.lock().await.remove(&id);

        self.rescan.notify_one();
        Ok(job)
    }

    async fn execute(&self, mut job: Job) -> Job {
        let (profile, out_file) = match self.routing.route(&job) {
            RouteDecision::Encode { profile, out_file } => (profile, out_file),
            RouteDecision::Ignore => {
                info!(job = %job.id, title = %job.title, "ignoring job");
                job.ignored = true;
                job.out_file = None;
                job.enc_codec = None;
                job.stage = JobStage::Ignored;
                self.commit(&job).await;
                self.tools
                    .notifier
                    .send(
                        Notification::info(NotifySource::Encoder, "Ignore")
                            .with_description(self.routing.base_name(&job)),
                    )
                    .await;
                return job;
            }
        };
        job.out_file = Some(out_file.clone());
        job.enc_codec = Some(profile);
        job.ignored = false;
        job.error = None;
        job.stage = JobStage::Routed;
        self.commit(&job).await;

        let source = job.source_path(&self.settings.source_dir);
        if !source.exists() {
            let status = format!("Source file not found: {}", source.display());
            error!(job = %job.id, "{}", status);
            job.fail_ignored(JobStage::Failed, status);
            self.commit(&job).await;
            return job;
        }

        // Encode into the temp directory
        let temp = self
            .settings
            .temp_dir
            .join(format!("{}{}", job.id, profile.extension()));
        if let Err(e) = tokio::fs::create_dir_all(&self.settings.temp_dir).await {
            job.fail_ignored(JobStage::Failed, format!("Cannot create temp dir: {}", e));
            self.commit(&job).await;
            return job;
        }
        job.enc_cmd = Some(self.tools.transcoder.command_line(&source, &temp, profile));
        job.enc_start = Some(Utc::now());
        job.enc_end = None;
        job.stage = JobStage::Encoding;
        self.commit(&job).await;
        info!(job = %job.id, source = %source.display(), target = %out_file, codec = %profile, "encoding");
        self.tools
            .notifier
            .send(
                Notification::info(NotifySource::Encoder, "Encode")
                    .with_field("Source", file_name(&source))
                    .with_field("Target", out_file.clone()),
            )
            .await;

        let encoded = self.tools.transcoder.transcode(&source, &temp, profile).await;
        job.enc_end = Some(Utc::now());
        if let Err(e) = encoded {
            error!(job = %job.id, error = %e, "encoding failed");
            job.fail_ignored(JobStage::Failed, e.to_string());
            self.commit(&job).await;
            let _ = tokio::fs::remove_file(&temp).await;
            self.tools
                .notifier
                .send(
                    Notification::error(NotifySource::Encoder, "Encode failed")
                        .with_description(out_file)
                        .with_field("Error", e.to_string()),
                )
                .await;
            return job;
        }
        job.stage = JobStage::Encoded;
        self.commit(&job).await;

        let mut summary = Notification::info(NotifySource::Encoder, "Encoded")
            .with_description(out_file.clone());
        if let Some(took) = job.encode_duration() {
            info!(job = %job.id, secs = took.num_seconds(), "encoded {}", out_file);
            summary = summary.with_field("Encode Time", format_elapsed(took));
        }

        let trimmed = match self.trim(&mut job, &temp, profile).await {
            Ok(Some(seconds)) => {
                summary = summary.with_field("Trimmed", format!("{} seconds", seconds));
                true
            }
            Ok(None) => false,
            Err(message) => {
                summary = summary.with_field("Trim Failed", message);
                false
            }
        };

        // Move into place before touching the source
        let user_dir = self.settings.output_dir.join(&job.user);
        let output = match move_into_dir(&temp, &user_dir, &out_file) {
            Ok(path) => path,
            Err(e) => {
                error!(job = %job.id, error = %e, "cannot move output into place");
                job.error = Some(e.to_string());
                self.commit(&job).await;
                self.tools
                    .notifier
                    .send(summary.with_field("Output Missing", e.to_string()))
                    .await;
                return job;
            }
        };

        if !trimmed && job.error.is_none() {
            match self.delete_source(&mut job, &source, &output).await {
                Ok(()) => summary = summary.with_field("Source Deleted", file_name(&source)),
                Err(message) => summary = summary.with_field("Source Delete Failed", message),
            }
        }
        job.deleted = !source.exists();
        self.commit(&job).await;
        self.tools.notifier.send(summary).await;
        job
    }

    /// Cut the intro off the encode in `temp` if a trim rule matches.
    ///
    /// # Returns
    /// * `Ok(Some(secs))` - the encode now starts at `secs`
    /// * `Ok(None)` - no rule for this title
    /// * `Err(message)` - trimming failed; `temp` still holds the full encode
    async fn trim(
        &self,
        job: &mut Job,
        temp: &Path,
        profile: EncodeProfile,
    ) -> Result<Option<u32>, String> {
        if self.tools.trimmer.get_config(&job.title).is_none() {
            return Ok(None);
        }
        job.stage = JobStage::Trimming;
        self.commit(job).await;

        let result: Result<Option<u32>, String> = async {
            let Some(seconds) = self
                .tools
                .trimmer
                .find_intro(temp, &job.title)
                .instrument(info_span!("trimmer"))
                .await
                .map_err(|e| e.to_string())?
            else {
                return Ok(None);
            };
            let cut = self
                .settings
                .temp_dir
                .join(format!("{}.trim{}", job.id, profile.extension()));
            if let Err(e) = self.tools.transcoder.trim(temp, &cut, seconds).await {
                let _ = tokio::fs::remove_file(&cut).await;
                return Err(e.to_string());
            }
            replace_with_trimmed(temp, &cut).map_err(|e| e.to_string())?;
            Ok(Some(seconds))
        }
        .await;

        match result {
            Ok(Some(seconds)) => {
                info!(job = %job.id, seconds, "trimmed intro");
                job.start_seconds = Some(seconds);
                job.stage = JobStage::Trimmed;
            }
            Ok(None) => job.stage = JobStage::Encoded,
            Err(ref message) => {
                warn!(job = %job.id, error = %message, "could not trim, keeping full encode");
                job.stage = JobStage::Encoded;
            }
        }
        self.commit(job).await;
        result
    }

    /// Remove the source once the output is proven long enough.
    async fn delete_source(
        &self,
        job: &mut Job,
        source: &Path,
        output: &Path,
    ) -> Result<(), String> {
        job.stage = JobStage::Deleting;
        self.commit(job).await;

        let result = self.validate_and_unlink(source, output).await;
        match &result {
            Ok(()) => {
                info!(job = %job.id, source = %source.display(), "deleted source");
                job.stage = JobStage::Deleted;
            }
            Err(message) => {
                warn!(job = %job.id, source = %source.display(), error = %message, "source kept");
                job.error = Some(message.clone());
                job.stage = JobStage::DeleteFailed;
            }
        }
        result
    }

    async fn validate_and_unlink(&self, source: &Path, output: &Path) -> Result<(), String> {
        if !output.exists() {
            error!(source = %source.display(), output = %output.display(), "output missing");
            return Err(format!("Missing output: {}", output.display()));
        }
        let source_duration = self
            .tools
            .probe
            .duration(source)
            .await
            .map_err(|e| format!("Cannot parse source duration: {}", e))?;
        let output_duration = self
            .tools
            .probe
            .duration(output)
            .await
            .map_err(|e| format!("Cannot parse output duration: {}", e))?;

        match check_duration_gate(source_duration, output_duration, self.settings.duration_tolerance)
        {
            DurationGateResult::Accept => {}
            DurationGateResult::Reject { source, encoded } => {
                return Err(format!(
                    "{} is too short: {}s < {}s",
                    output.display(),
                    encoded.as_secs(),
                    source.as_secs()
                ));
            }
        }

        tokio::fs::remove_file(source)
            .await
            .map_err(|e| format!("Failed to delete {}: {}", source.display(), e))
    }

    /// Replace the stored copy of `job` and persist the list.
    ///
    /// The file is written on the blocking pool; the job list is unlocked
    /// while the write runs.
    async fn commit(&self, job: &Job) {
        let (snapshot, _persist) = {
            let mut jobs = self.jobs.lock().await;
            match jobs.iter_mut().find(|j| j.id == job.id) {
                Some(slot) => *slot = job.clone(),
                None => jobs.push(job.clone()),
            }
            (jobs.clone(), self.persist.lock().await)
        };
        let store = self.store.clone();
        match tokio::task::spawn_blocking(move || store.save(&snapshot)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!(error = %e, file = %self.store.path().display(), "cannot write jobs file")
            }
            Err(e) => error!(error = %e, "jobs file writer panicked"),
        }
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn format_elapsed(d: chrono::Duration) -> String {
    let secs = d.num_seconds().max(0);
    format!("{}:{:02}:{:02}", secs / 3600, secs % 3600 / 60, secs % 60)
}
