//! Daemon startup and main loop for vodkeeper
//!
//! Wires the job runner, the retention scheduler and the HTTP API together
//! and runs them until the shutdown token fires.

use crate::config::{Config, ConfigError};
use crate::encode::FfmpegTranscoder;
use crate::job_runner::{JobRunner, RunnerSettings, RunnerTools};
use crate::jobs::{JobStore, StoreError};
use crate::notify::{LogSink, Notifier};
use crate::pattern::PatternError;
use crate::probe::FfprobeProbe;
use crate::retention::{Cleaner, RetentionScheduler};
use crate::retry::RetryPolicy;
use crate::routing::RoutingRules;
use crate::server::{run_server, AppState, ServerError};
use crate::startup::{run_startup_checks, StartupError};
use crate::trim::{CatalogError, FfmpegFrameSampler, IntroTrimmer};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, Instrument};

/// Error type for daemon operations
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Startup check failed
    #[error("Startup check failed: {0}")]
    Startup(#[from] StartupError),

    /// Routing pattern did not compile
    #[error("Routing pattern error: {0}")]
    Pattern(#[from] PatternError),

    /// Trim catalog could not be loaded
    #[error("Trim catalog error: {0}")]
    Catalog(#[from] CatalogError),

    /// Jobs file could not be read
    #[error("Jobs file error: {0}")]
    Store(#[from] StoreError),

    /// Server error
    #[error("Server error: {0}")]
    Server(#[from] ServerError),
}

/// Daemon state containing all runtime components
pub struct Daemon {
    /// Configuration loaded from file and environment
    pub config: Config,
    runner: Arc<JobRunner>,
    /// `None` when the cleaner is disabled
    cleaner: Option<Cleaner>,
    cancel: CancellationToken,
}

impl Daemon {
    /// Initialize the daemon with configuration from file
    ///
    /// 1. Load config from file and apply environment overrides
    /// 2. Run startup checks (directories, ffmpeg, ffprobe)
    /// 3. Build the runner and the cleaner
    pub fn new<P: AsRef<Path>>(config_path: P, skip_checks: bool) -> Result<Self, DaemonError> {
        let config = Config::load(config_path)?;
        Self::with_config(config, skip_checks)
    }

    /// Initialize the daemon with an existing configuration
    pub fn with_config(config: Config, skip_checks: bool) -> Result<Self, DaemonError> {
        run_startup_checks(&config, skip_checks)?;

        let sampler = Arc::new(FfmpegFrameSampler::new(
            config.encoder.ffmpeg_bin.clone(),
            config.trimmer.frame_width,
            config.trimmer.frame_height,
        ));
        let trimmer = IntroTrimmer::from_settings(
            &config.trimmer,
            config.paths.trim_catalog.as_deref(),
            sampler,
        )?;
        let notifier = if config.notifications.enabled {
            Notifier::new(Arc::new(LogSink), RetryPolicy::default())
        } else {
            Notifier::noop()
        };
        let tools = RunnerTools {
            transcoder: Arc::new(FfmpegTranscoder::new(
                config.encoder.ffmpeg_bin.clone(),
                Duration::from_secs(config.encoder.progress_every_secs),
            )),
            probe: Arc::new(FfprobeProbe::new(config.encoder.ffprobe_bin.clone())),
            trimmer: Arc::new(trimmer),
            notifier,
        };
        Self::with_tools(config, tools)
    }

    /// Initialize the daemon around the given collaborators, without checks
    pub fn with_tools(config: Config, tools: RunnerTools) -> Result<Self, DaemonError> {
        let rescan = Arc::new(Notify::new());
        let cleaner = config.cleaner.enabled.then(|| {
            Cleaner::new(
                RetentionScheduler::from_config(
                    &config.cleaner,
                    config.paths.source_dir.clone(),
                    config.routing.time_format.clone(),
                ),
                tools.notifier.clone(),
                rescan.clone(),
                Duration::from_secs(config.cleaner.max_sleep_secs),
                Duration::from_secs(config.cleaner.warning_interval_secs),
            )
        });
        let runner = JobRunner::new(
            RunnerSettings::from_config(&config),
            JobStore::new(config.paths.jobs_file.clone(), config.routing.time_format.clone()),
            RoutingRules::from_config(&config.routing)?,
            tools,
            rescan,
        )?;

        Ok(Self {
            config,
            runner: Arc::new(runner),
            cleaner,
            cancel: CancellationToken::new(),
        })
    }

    pub fn runner(&self) -> Arc<JobRunner> {
        self.runner.clone()
    }

    pub fn cleaner(&self) -> Option<&Cleaner> {
        self.cleaner.as_ref()
    }

    /// Token that stops [`run`](Self::run) when cancelled
    pub fn shutdown_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run the daemon with all background tasks
    ///
    /// Starts the cleaner loops and serves the API until shutdown. Jobs
    /// already running are allowed to finish.
    pub async fn run(&self) -> Result<(), DaemonError> {
        self.runner.announce_start().await;

        let mut workers = Vec::new();
        if let Some(cleaner) = &self.cleaner {
            let (c, token) = (cleaner.clone(), self.cancel.clone());
            workers.push(tokio::spawn(
                async move { c.worker(token).await }.instrument(info_span!("cleaner")),
            ));
            let (c, token) = (cleaner.clone(), self.cancel.clone());
            workers.push(tokio::spawn(
                async move { c.warning_worker(token).await }.instrument(info_span!("cleaner")),
            ));
        } else {
            info!("cleaner disabled");
        }

        let state = AppState {
            runner: self.runner.clone(),
            cleaner: self.cleaner.clone(),
        };
        let served = run_server(&self.config.server.listen_address, state, self.cancel.clone())
            .instrument(info_span!("server"))
            .await;

        self.cancel.cancel();
        self.runner.close().await;
        for worker in workers {
            let _ = worker.await;
        }
        info!("daemon stopped");
        served.map_err(DaemonError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job_runner::tests::{FakeProbe, FakeTranscoder};
    use crate::trim::SearchParams;
    use crate::trim::tests::BrokenSampler;
    use tempfile::TempDir;

    fn test_config(dir: &TempDir) -> Config {
        let mut config = Config::default();
        config.paths.source_dir = dir.path().join("src");
        config.paths.output_dir = dir.path().join("out");
        config.paths.temp_dir = dir.path().join("tmp");
        config.paths.jobs_file = dir.path().join("data/jobs.json");
        config.server.listen_address = "127.0.0.1:0".to_string();
        config
    }

    fn fake_tools() -> RunnerTools {
        RunnerTools {
            transcoder: Arc::new(FakeTranscoder::default()),
            probe: Arc::new(FakeProbe {
                source: Duration::from_secs(60),
                encoded: Duration::from_secs(60),
            }),
            trimmer: Arc::new(IntroTrimmer::new(
                Vec::new(),
                Arc::new(BrokenSampler),
                SearchParams::default(),
                0.6,
            )),
            notifier: Notifier::noop(),
        }
    }

    #[tokio::test]
    async fn test_with_config_skipping_checks_creates_dirs() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);
        let daemon = Daemon::with_config(config.clone(), true).unwrap();

        assert!(config.paths.source_dir.is_dir());
        assert!(config.paths.temp_dir.is_dir());
        assert!(daemon.cleaner().is_none());
        assert!(daemon.runner().list_jobs().await.is_empty());
    }

    #[tokio::test]
    async fn test_cleaner_built_when_enabled() {
        let dir = TempDir::new().unwrap();
        let mut config = test_config(&dir);
        config.cleaner.enabled = true;
        let daemon = Daemon::with_tools(config, fake_tools()).unwrap();
        assert!(daemon.cleaner().is_some());
    }

    #[tokio::test]
    async fn test_bad_pattern_is_rejected() {
        let dir = TempDir::new().unwrap();
        let mut config = test_config(&dir);
        config.routing.copy_pattern = "(unclosed".to_string();
        let result = Daemon::with_tools(config, fake_tools());
        assert!(matches!(result, Err(DaemonError::Pattern(_))));
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let dir = TempDir::new().unwrap();
        let mut config = test_config(&dir);
        config.cleaner.enabled = true;
        std::fs::create_dir_all(&config.paths.source_dir).unwrap();
        let daemon = Arc::new(Daemon::with_tools(config, fake_tools()).unwrap());

        let token = daemon.shutdown_token();
        let handle = {
            let daemon = daemon.clone();
            tokio::spawn(async move { daemon.run().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();

        let result = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }
}
