//! Status snapshot served at `/status`.

use crate::job_runner::JobRunner;
use crate::jobs::{Job, JobStage};
use crate::retention::{Cleaner, RetentionSnapshot};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

/// Point-in-time view of the runner and the retention scheduler.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StatusSnapshot {
    pub timestamp: DateTime<Utc>,
    pub total_jobs: usize,
    /// Job count per stage name
    pub jobs_by_stage: BTreeMap<String, usize>,
    /// Jobs being run right now
    pub running: Vec<Job>,
    /// `None` when the cleaner is disabled
    pub retention: Option<RetentionSnapshot>,
}

impl StatusSnapshot {
    pub fn from_parts(
        jobs: &[Job],
        running: &[uuid::Uuid],
        retention: Option<RetentionSnapshot>,
    ) -> Self {
        let mut jobs_by_stage = BTreeMap::new();
        for job in jobs {
            *jobs_by_stage.entry(job.stage.as_str().to_string()).or_insert(0) += 1;
        }
        Self {
            timestamp: Utc::now(),
            total_jobs: jobs.len(),
            jobs_by_stage,
            running: jobs
                .iter()
                .filter(|j| running.contains(&j.id))
                .cloned()
                .collect(),
            retention,
        }
    }

    pub async fn collect(runner: &JobRunner, cleaner: Option<&Cleaner>) -> Self {
        let jobs = runner.list_jobs().await;
        let running = runner.running().await;
        let retention = match cleaner {
            Some(c) => Some(c.snapshot().await),
            None => None,
        };
        Self::from_parts(&jobs, &running, retention)
    }

    pub fn count(&self, stage: JobStage) -> usize {
        self.jobs_by_stage.get(stage.as_str()).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::JobSubmission;
    use chrono::NaiveDate;
    use std::path::PathBuf;

    fn job(stage: JobStage) -> Job {
        let mut job = Job::new(JobSubmission {
            input: PathBuf::from("a.flv"),
            title: "t".to_string(),
            user: "u".to_string(),
            created_at: NaiveDate::from_ymd_opt(2020, 4, 1)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap(),
        });
        job.stage = stage;
        job
    }

    #[test]
    fn test_counts_and_running() {
        let jobs = vec![
            job(JobStage::Deleted),
            job(JobStage::Deleted),
            job(JobStage::Encoding),
            job(JobStage::Ignored),
        ];
        let snapshot = StatusSnapshot::from_parts(&jobs, &[jobs[2].id], None);

        assert_eq!(snapshot.total_jobs, 4);
        assert_eq!(snapshot.count(JobStage::Deleted), 2);
        assert_eq!(snapshot.count(JobStage::Encoding), 1);
        assert_eq!(snapshot.count(JobStage::Trimmed), 0);
        assert_eq!(snapshot.running, vec![jobs[2].clone()]);
        assert!(snapshot.retention.is_none());
    }

    #[test]
    fn test_serializes_stage_names() {
        let snapshot = StatusSnapshot::from_parts(&[job(JobStage::DeleteFailed)], &[], None);
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["jobs_by_stage"]["delete_failed"], 1);
        assert!(json["retention"].is_null());
    }
}
