//! Runs one job from dispatch to a final status.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use crate::engine::{EngineError, ExtractionEngine, FetchOptions, FetchOutcome, ProgressEvent, ProgressSink};
use crate::history::{HistoryStore, write_sidecar_metadata};
use crate::job::{Job, JobStatus};
use crate::logging::{
    ErrorCategory, log_debug_simple, log_error_with_context, log_info_with_context, log_warning_with_context,
};
use crate::observer::{OverwritePolicy, QueueObserver};
use crate::paths::PathResolver;

/// Everything a worker needs, captured at dispatch time.
#[derive(Clone)]
pub struct WorkerContext {
    pub engine: Arc<dyn ExtractionEngine>,
    pub history: Arc<HistoryStore>,
    pub resolver: Arc<PathResolver>,
    pub observer: Arc<dyn QueueObserver>,
    pub overwrite_policy: OverwritePolicy,
    pub pause_poll: Duration,
}

enum Step {
    Fetched(FetchOutcome),
    /// The destination existed and the user kept it.
    Skipped,
}

/// Drive `job` to Completed, Failed or Cancelled.
///
/// The job must already be Downloading. Never returns an error: every
/// failure lands on the job itself.
pub async fn run_job(ctx: WorkerContext, job: Arc<Job>) {
    let sink = ProgressSink::new(job.clone(), ctx.pause_poll);

    match execute(&ctx, &job, &sink).await {
        Ok(Step::Fetched(outcome)) => complete(&ctx, &job, outcome),
        Ok(Step::Skipped) => {
            if job.mark_skipped().is_ok() {
                log_info_with_context(
                    ErrorCategory::Download,
                    "Kept existing file, download skipped",
                    json!({ "job_id": job.id().to_string(), "url": job.canonical_url() }),
                );
            }
        }
        Err(e) if e.is_cancelled() || job.status() == JobStatus::Cancelled => {
            // Cancelled is preserved; an engine-side abort without a request still ends here.
            let _ = job.transition(JobStatus::Cancelled);
            log_debug_simple(ErrorCategory::Download, &format!("Job {} cancelled", job.id()));
        }
        Err(e) => fail(&job, &e),
    }
}

async fn execute(ctx: &WorkerContext, job: &Arc<Job>, sink: &ProgressSink) -> Result<Step, EngineError> {
    let url = job.canonical_url();
    let output_dir = ctx.resolver.output_dir(job.platform(), job.media_kind());
    std::fs::create_dir_all(&output_dir)
        .map_err(|e| EngineError::io(format!("creating {}", output_dir.display()), e))?;

    let mut options = FetchOptions::for_job(job, output_dir);

    sink.checkpoint().await?;
    let info = ctx.engine.probe(url, &options).await?;
    if job.has_placeholder_title()
        && let Some(title) = info.title.as_deref()
    {
        job.set_title(title);
    }

    if let Some(existing) = options.expected_path(&info)
        && existing.exists()
    {
        sink.checkpoint().await?;
        if !confirm_overwrite(ctx, job, existing).await {
            return Ok(Step::Skipped);
        }
        options.overwrite = true;
    }

    sink.checkpoint().await?;
    let outcome = ctx.engine.fetch(url, &options, sink).await?;
    Ok(Step::Fetched(outcome))
}

async fn confirm_overwrite(ctx: &WorkerContext, job: &Job, existing: PathBuf) -> bool {
    match ctx.overwrite_policy {
        OverwritePolicy::Always => true,
        OverwritePolicy::Never => false,
        OverwritePolicy::Ask => {
            let observer = ctx.observer.clone();
            let snapshot = job.snapshot();
            let question = tokio::task::spawn_blocking(move || observer.confirm_overwrite(&snapshot, &existing));
            match question.await {
                Ok(answer) => answer,
                Err(e) => {
                    log_warning_with_context(
                        ErrorCategory::System,
                        "Overwrite prompt failed, keeping existing file",
                        json!({ "job_id": job.id().to_string(), "error": e.to_string() }),
                    );
                    false
                }
            }
        }
    }
}

fn complete(ctx: &WorkerContext, job: &Job, outcome: FetchOutcome) {
    if let Err(e) = job.transition(JobStatus::Completed) {
        // Cancelled after the engine finished: no history for it.
        log_debug_simple(ErrorCategory::Download, &format!("Job {} not completed: {:?}", job.id(), e));
        return;
    }

    if let Some(title) = outcome.info.title.as_deref() {
        job.set_title(title);
    }
    job.set_output_path(outcome.final_path.clone());
    job.apply_progress(&ProgressEvent::finished());

    write_sidecar_metadata(&ctx.resolver.metadata_dir(), &outcome.final_path, &outcome.info);

    let snapshot = job.snapshot();
    if let Err(e) = ctx.history.record_job(&snapshot) {
        log_warning_with_context(
            ErrorCategory::Persistence,
            "Failed to record download history",
            json!({ "job_id": snapshot.id.to_string(), "error": e.to_string() }),
        );
    }

    log_info_with_context(
        ErrorCategory::Download,
        "Download completed",
        json!({ "job_id": snapshot.id.to_string(), "path": outcome.final_path.display().to_string() }),
    );
}

fn fail(job: &Job, error: &EngineError) {
    if job.transition(JobStatus::Failed).is_err() {
        return;
    }
    job.set_error(error.to_string());

    log_error_with_context(
        ErrorCategory::Download,
        "Download failed",
        json!({ "job_id": job.id().to_string(), "url": job.canonical_url() }),
        Some(&error.to_string()),
    );
}
