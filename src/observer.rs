//! Hooks into the presentation layer.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::job::{JobSnapshot, JobStatus};

/// What to do when a download's destination already exists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverwritePolicy {
    /// Ask the observer.
    #[default]
    Ask,
    Always,
    Never,
}

/// How a job left its worker slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobOutcome {
    Completed,
    /// Completed without a transfer: the existing file was kept.
    Skipped,
    Failed,
    Cancelled,
    /// Returned to the live queue instead of finishing.
    Requeued,
}

impl JobOutcome {
    pub fn of(job: &JobSnapshot) -> Self {
        match job.status {
            JobStatus::Completed if job.progress.skipped => JobOutcome::Skipped,
            JobStatus::Completed => JobOutcome::Completed,
            JobStatus::Cancelled => JobOutcome::Cancelled,
            JobStatus::Queued | JobStatus::Pending => JobOutcome::Requeued,
            JobStatus::Failed | JobStatus::Downloading | JobStatus::Paused => JobOutcome::Failed,
        }
    }
}

/// Callbacks the queue makes into whatever renders it.
///
/// `confirm_overwrite` may block (a dialog); the queue calls it from a
/// blocking-capable thread. The notifications must return quickly.
pub trait QueueObserver: Send + Sync {
    /// Whether to replace `existing` with a fresh download of `job`.
    fn confirm_overwrite(&self, job: &JobSnapshot, existing: &Path) -> bool;

    fn on_job_started(&self, _job: &JobSnapshot) {}

    fn on_job_finished(&self, _job: &JobSnapshot, _outcome: JobOutcome) {}
}

/// Non-interactive observer answering overwrite questions from a fixed policy.
/// `Ask` is treated as "keep the existing file".
#[derive(Debug, Clone, Copy, Default)]
pub struct PolicyObserver {
    policy: OverwritePolicy,
}

impl PolicyObserver {
    pub fn new(policy: OverwritePolicy) -> Self {
        Self { policy }
    }
}

impl QueueObserver for PolicyObserver {
    fn confirm_overwrite(&self, _job: &JobSnapshot, _existing: &Path) -> bool {
        self.policy == OverwritePolicy::Always
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{Job, JobRequest, MediaKind};

    #[test]
    fn test_policy_observer() {
        let snap = Job::new(JobRequest::new("https://example.com/v", MediaKind::Video)).snapshot();
        let existing = Path::new("/tmp/x.mp4");
        assert!(PolicyObserver::new(OverwritePolicy::Always).confirm_overwrite(&snap, existing));
        assert!(!PolicyObserver::new(OverwritePolicy::Never).confirm_overwrite(&snap, existing));
        assert!(!PolicyObserver::default().confirm_overwrite(&snap, existing));
    }

    #[test]
    fn test_outcome_of_snapshot() {
        let job = Job::new(JobRequest::new("https://example.com/v", MediaKind::Video));
        job.transition(JobStatus::Downloading).unwrap();
        job.mark_skipped().unwrap();
        assert_eq!(JobOutcome::of(&job.snapshot()), JobOutcome::Skipped);

        let job = Job::new(JobRequest::new("https://example.com/v", MediaKind::Video));
        job.transition(JobStatus::Cancelled).unwrap();
        assert_eq!(JobOutcome::of(&job.snapshot()), JobOutcome::Cancelled);
    }

    #[test]
    fn test_policy_serde() {
        assert_eq!(serde_json::to_string(&OverwritePolicy::Never).unwrap(), "\"never\"");
        assert_eq!(serde_json::from_str::<OverwritePolicy>("\"always\"").unwrap(), OverwritePolicy::Always);
    }
}
