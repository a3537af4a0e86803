//! vodkeeper
//!
//! Background service that encodes recorded streams, trims their waiting
//! screen and ages out the raw recordings.

pub mod daemon;
pub mod duration_gate;
pub mod encode;
pub mod job_runner;
pub mod jobs;
pub mod notify;
pub mod pattern;
pub mod probe;
pub mod replace;
pub mod retention;
pub mod retry;
pub mod routing;
pub mod scan;
pub mod server;
pub mod startup;
pub mod status;
pub mod trim;

pub use vodkeeper_config as config;
pub use vodkeeper_config::Config;
pub use daemon::{Daemon, DaemonError};
pub use duration_gate::{check_duration_gate, DurationGateResult};
pub use encode::{EncodeError, EncodeProfile, FfmpegTranscoder, Transcoder};
pub use job_runner::{JobRunner, RunnerSettings, RunnerTools, SubmitError};
pub use jobs::{migrate_legacy_record, Job, JobStage, JobStore, JobSubmission, StoreError};
pub use notify::{
    LogSink, NoopSink, Notification, NotificationSink, Notifier, NotifyError, NotifyLevel,
    NotifySource,
};
pub use probe::{FfprobeProbe, ProbeError, VideoProbe};
pub use retention::{Cleaner, RetentionError, RetentionScheduler, RetentionSnapshot};
pub use retry::RetryPolicy;
pub use routing::{RouteDecision, RoutingRules};
pub use server::{create_router, run_server, ApiResponse, AppState, ServerError};
pub use startup::{run_startup_checks, StartupError};
pub use status::StatusSnapshot;
pub use trim::{FfmpegFrameSampler, FrameSampler, IntroTrimmer, TrimConfig, TrimError};
