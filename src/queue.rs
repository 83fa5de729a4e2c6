//! Download Queue Manager
//!
//! Owns every live job, runs the scheduling loop and hands dispatched jobs to
//! workers. Collection membership lives behind one mutex ([`QueueState`]);
//! the lock is never held across an engine call.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use serde::Serialize;
use serde_json::json;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::{AppConfig, QueueConfig};
use crate::engine::{ExtractionEngine, YtDlpEngine};
use crate::error::{QueueError, Result};
use crate::history::HistoryStore;
use crate::job::{Job, JobId, JobRequest, JobSnapshot, JobStatus, MediaKind};
use crate::logging::{
    ErrorCategory, log_debug_simple, log_error_with_context, log_info_simple, log_info_with_context,
    log_warning_with_context,
};
use crate::observer::{JobOutcome, QueueObserver};
use crate::paths::{AppPaths, PathResolver};
use crate::worker::{self, WorkerContext};

/// Consistent view of the queue taken under one lock.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueSnapshot {
    /// Queued and Pending jobs in insertion order.
    pub queued: Vec<JobSnapshot>,
    pub active: Vec<JobSnapshot>,
    pub active_count: usize,
    pub max_concurrent: usize,
}

/// Job collections. Every method runs inside the manager's critical section.
#[derive(Debug)]
pub struct QueueState {
    /// Maximum number of concurrent downloads
    max_concurrent: usize,

    /// Waiting jobs (Queued or Pending), insertion order
    queue: VecDeque<Arc<Job>>,

    /// Jobs occupying a worker slot, dispatch order
    active: Vec<Arc<Job>>,

    /// Jobs that reached a terminal state
    archive: Vec<Arc<Job>>,
}

impl QueueState {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            max_concurrent: max_concurrent.max(1), // At least 1
            queue: VecDeque::new(),
            active: Vec::new(),
            archive: Vec::new(),
        }
    }

    fn contains(&self, id: JobId) -> bool {
        self.queue.iter().chain(self.active.iter()).chain(self.archive.iter()).any(|j| j.id() == id)
    }

    fn find_waiting(&self, id: JobId) -> Option<usize> {
        self.queue.iter().position(|j| j.id() == id)
    }

    fn find_active(&self, id: JobId) -> Option<&Arc<Job>> {
        self.active.iter().find(|j| j.id() == id)
    }

    /// Add a job. The same job cannot be added twice; the same URL can.
    pub fn enqueue(&mut self, job: Arc<Job>) -> Result<JobId> {
        let id = job.id();
        if self.contains(id) {
            return Err(QueueError::invalid_job(format!("job {id} is already known to the queue")));
        }
        self.queue.push_back(job);
        Ok(id)
    }

    /// Move the first Queued job to the active set if a slot is free.
    /// Pending jobs are skipped, not blocking.
    pub fn next_to_start(&mut self) -> Option<Arc<Job>> {
        if self.active.len() >= self.max_concurrent {
            return None;
        }

        let pos = self.queue.iter().position(|j| j.status() == JobStatus::Queued)?;
        let job = self.queue.remove(pos)?;
        if let Err(e) = job.transition(JobStatus::Downloading) {
            // status only changes under this lock while queued, so this is a bug
            log_error_with_context(
                ErrorCategory::System,
                "Queued job refused to start",
                json!({ "job_id": job.id().to_string() }),
                Some(&format!("{e:?}")),
            );
            self.archive.push(job);
            return None;
        }
        self.active.push(job.clone());
        Some(job)
    }

    /// Reclaim a worker slot.
    ///
    /// The job leaves the active set and the live queue. A job that came back
    /// as Queued goes to the front of the queue; anything else is archived.
    pub fn finish(&mut self, id: JobId) -> Option<Arc<Job>> {
        let from_active = self.active.iter().position(|j| j.id() == id).map(|pos| self.active.remove(pos));
        let from_queue = self.find_waiting(id).and_then(|pos| self.queue.remove(pos));
        let job = from_active.or(from_queue)?;

        match job.status() {
            JobStatus::Queued => self.queue.push_front(job.clone()),
            JobStatus::Downloading | JobStatus::Paused => {
                if job.transition(JobStatus::Failed).is_ok() {
                    job.set_error("worker exited without a final status");
                }
                self.archive.push(job.clone());
            }
            _ => self.archive.push(job.clone()),
        }
        Some(job)
    }

    /// Cancel a waiting job (removed and archived) or flag an active one.
    pub fn cancel(&mut self, id: JobId) -> Result<()> {
        if let Some(pos) = self.find_waiting(id) {
            let job = &self.queue[pos];
            job.transition(JobStatus::Cancelled)?;
            if let Some(job) = self.queue.remove(pos) {
                self.archive.push(job);
            }
            return Ok(());
        }

        if let Some(job) = self.find_active(id) {
            // the worker observes this at its next checkpoint
            job.transition(JobStatus::Cancelled)?;
            return Ok(());
        }

        if self.contains(id) {
            return Err(QueueError::invalid_transition(format!("job {id} already finished")));
        }
        Err(self.missing(id))
    }

    /// Cancel every waiting and active job. Returns the ids that were cancelled.
    pub fn cancel_all(&mut self) -> Vec<JobId> {
        let mut cancelled = Vec::new();

        while let Some(job) = self.queue.pop_front() {
            if job.transition(JobStatus::Cancelled).is_ok() {
                cancelled.push(job.id());
            }
            self.archive.push(job);
        }

        for job in &self.active {
            if job.transition(JobStatus::Cancelled).is_ok() {
                cancelled.push(job.id());
            }
        }

        cancelled
    }

    pub fn pause(&mut self, id: JobId) -> Result<()> {
        self.transition_active(id, JobStatus::Paused)
    }

    pub fn resume(&mut self, id: JobId) -> Result<()> {
        self.transition_active(id, JobStatus::Downloading)
    }

    fn transition_active(&mut self, id: JobId, to: JobStatus) -> Result<()> {
        match self.find_active(id) {
            Some(job) => {
                job.transition(to)?;
                Ok(())
            }
            None if self.contains(id) => {
                Err(QueueError::invalid_transition(format!("job {id} is not running, cannot move it to {to}")))
            }
            None => Err(self.missing(id)),
        }
    }

    /// Pending -> Queued.
    pub fn promote(&mut self, id: JobId) -> Result<()> {
        match self.find_waiting(id) {
            Some(pos) => {
                self.queue[pos].transition(JobStatus::Queued)?;
                Ok(())
            }
            None if self.contains(id) => {
                Err(QueueError::invalid_transition(format!("job {id} is not pending")))
            }
            None => Err(self.missing(id)),
        }
    }

    fn missing(&self, id: JobId) -> QueueError {
        QueueError::not_found(format!("job {id} not found"))
    }

    pub fn queue_size(&self) -> usize {
        self.queue.len()
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Update max concurrent downloads
    pub fn set_max_concurrent(&mut self, max: usize) {
        self.max_concurrent = max.max(1);
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            queued: self.queue.iter().map(|j| j.snapshot()).collect(),
            active: self.active.iter().map(|j| j.snapshot()).collect(),
            active_count: self.active.len(),
            max_concurrent: self.max_concurrent,
        }
    }

    pub fn archived(&self) -> Vec<JobSnapshot> {
        self.archive.iter().map(|j| j.snapshot()).collect()
    }

    pub fn job(&self, id: JobId) -> Option<JobSnapshot> {
        self.queue
            .iter()
            .chain(self.active.iter())
            .chain(self.archive.iter())
            .find(|j| j.id() == id)
            .map(|j| j.snapshot())
    }
}

struct Inner {
    state: Mutex<QueueState>,
    config: QueueConfig,
    engine: Arc<dyn ExtractionEngine>,
    history: Arc<HistoryStore>,
    resolver: RwLock<Arc<PathResolver>>,
    observer: Arc<dyn QueueObserver>,
    /// Wakes the scheduler before its next tick.
    notify: Notify,
    shutdown: CancellationToken,
    scheduler: Mutex<Option<JoinHandle<()>>>,
}

/// Handle to the queue. Cheap to clone; all clones share one queue.
#[derive(Clone)]
pub struct QueueManager {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for QueueManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueManager").field("config", &self.inner.config).finish_non_exhaustive()
    }
}

impl QueueManager {
    pub fn new(
        config: QueueConfig,
        engine: Arc<dyn ExtractionEngine>,
        history: Arc<HistoryStore>,
        resolver: PathResolver,
        observer: Arc<dyn QueueObserver>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(QueueState::new(config.max_concurrent)),
                config,
                engine,
                history,
                resolver: RwLock::new(Arc::new(resolver)),
                observer,
                notify: Notify::new(),
                shutdown: CancellationToken::new(),
                scheduler: Mutex::new(None),
            }),
        }
    }

    /// Wire a queue from the persisted config: yt-dlp engine, history under
    /// `paths`, download layout under `config.download_path` (created here).
    pub fn open(config: &AppConfig, paths: &AppPaths, observer: Arc<dyn QueueObserver>) -> Result<Self> {
        config.validate()?;
        let resolver = PathResolver::new(&config.download_path);
        resolver.ensure_dirs()?;

        Ok(Self::new(
            config.queue_config(),
            Arc::new(YtDlpEngine::new(&config.engine_binary)),
            Arc::new(HistoryStore::new(paths.history_path())),
            resolver,
            observer,
        ))
    }

    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Signal the scheduler to check for available work.
    fn notify_queue(&self) {
        self.inner.notify.notify_one();
    }

    pub fn config(&self) -> &QueueConfig {
        &self.inner.config
    }

    pub fn engine(&self) -> Arc<dyn ExtractionEngine> {
        self.inner.engine.clone()
    }

    pub fn history(&self) -> Arc<HistoryStore> {
        self.inner.history.clone()
    }

    pub fn resolver(&self) -> Arc<PathResolver> {
        self.inner.resolver.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Swap in a new download root. Jobs already running keep their old resolver.
    pub fn set_download_root(&self, root: impl Into<PathBuf>) -> Result<()> {
        let resolver = PathResolver::new(root);
        resolver.ensure_dirs()?;
        log_info_with_context(
            ErrorCategory::System,
            "Download root changed",
            json!({ "root": resolver.root().display().to_string() }),
        );
        *self.inner.resolver.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(resolver);
        Ok(())
    }

    /// Validate and append a job. Returns its id.
    pub fn enqueue(&self, job: Job) -> Result<JobId> {
        job.validate()?;
        let id = self.state().enqueue(Arc::new(job))?;
        self.notify_queue();
        Ok(id)
    }

    /// Build a job from a request and enqueue it.
    pub fn submit(&self, request: JobRequest) -> Result<JobId> {
        self.enqueue(Job::new(request))
    }

    pub fn cancel(&self, id: JobId) -> Result<()> {
        self.state().cancel(id)?;
        log_debug_simple(ErrorCategory::Download, &format!("Cancellation requested for job {id}"));
        Ok(())
    }

    pub fn cancel_all(&self) -> Vec<JobId> {
        self.state().cancel_all()
    }

    pub fn pause(&self, id: JobId) -> Result<()> {
        self.state().pause(id)
    }

    pub fn resume(&self, id: JobId) -> Result<()> {
        self.state().resume(id)
    }

    pub fn promote(&self, id: JobId) -> Result<()> {
        self.state().promote(id)?;
        self.notify_queue();
        Ok(())
    }

    pub fn status(&self) -> QueueSnapshot {
        self.state().snapshot()
    }

    /// Jobs that reached a terminal state, oldest first.
    pub fn completed(&self) -> Vec<JobSnapshot> {
        self.state().archived()
    }

    pub fn job(&self, id: JobId) -> Option<JobSnapshot> {
        self.state().job(id)
    }

    pub fn set_max_concurrent(&self, max: usize) {
        self.state().set_max_concurrent(max);
        self.notify_queue();
    }

    /// List a playlist and enqueue one Pending video job per entry.
    pub async fn expand_playlist(&self, url: &str, quality: &str, format: &str) -> Result<usize> {
        let entries = self.inner.engine.list_flat(url).await?;

        let mut added = 0;
        for (n, entry) in entries.iter().enumerate() {
            let title = entry.title.clone().unwrap_or_else(|| format!("Video {}", n + 1));
            let request = JobRequest::new(entry.resolve_url(), MediaKind::Video)
                .quality(quality)
                .format(format)
                .title(title)
                .pending(true);
            match self.submit(request) {
                Ok(_) => added += 1,
                Err(e) => log_warning_with_context(
                    ErrorCategory::Validation,
                    "Skipping playlist entry",
                    json!({ "playlist": url, "entry": entry.id, "error": e.to_string() }),
                ),
            }
        }

        log_info_with_context(
            ErrorCategory::Download,
            "Playlist expanded",
            json!({ "playlist": url, "added": added }),
        );
        Ok(added)
    }

    /// Enqueue every non-empty line of a text file. Returns how many were added.
    pub fn import_batch(&self, path: &Path, kind: MediaKind, quality: &str, format: &str) -> Result<usize> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| QueueError::io(format!("reading batch file {}", path.display()), e))?;

        let mut added = 0;
        for line in contents.lines().map(str::trim).filter(|l| !l.is_empty()) {
            match self.submit(JobRequest::new(line, kind).quality(quality).format(format)) {
                Ok(_) => added += 1,
                Err(e) => log_warning_with_context(
                    ErrorCategory::Validation,
                    "Skipping batch line",
                    json!({ "line": line, "error": e.to_string() }),
                ),
            }
        }
        Ok(added)
    }

    /// Spawn the scheduling loop on the current tokio runtime.
    pub fn start(&self) -> Result<()> {
        if self.inner.shutdown.is_cancelled() {
            return Err(QueueError::invalid_transition("queue manager has been shut down"));
        }

        let mut slot = self.inner.scheduler.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return Err(QueueError::already_running("scheduler already started"));
        }

        let manager = self.clone();
        *slot = Some(tokio::spawn(async move { manager.run_scheduler().await }));
        log_info_simple(ErrorCategory::System, "Download queue scheduler started");
        Ok(())
    }

    /// Stop the scheduling loop. Running workers are left to finish.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        let handle = self.inner.scheduler.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            log_error_with_context(
                ErrorCategory::System,
                "Scheduler task terminated abnormally",
                json!({}),
                Some(&e.to_string()),
            );
        }
    }

    async fn run_scheduler(self) {
        let mut interval = tokio::time::interval(self.inner.config.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.inner.shutdown.cancelled() => break,
                _ = interval.tick() => {}
                _ = self.inner.notify.notified() => {}
            }
            self.dispatch_ready();
        }

        log_info_simple(ErrorCategory::System, "Download queue scheduler stopped");
    }

    /// One scheduling pass: start Queued jobs while slots are free.
    /// Returns how many were dispatched.
    pub fn dispatch_ready(&self) -> usize {
        let started: Vec<Arc<Job>> = {
            let mut state = self.state();
            std::iter::from_fn(|| state.next_to_start()).collect()
        };

        let count = started.len();
        for job in started {
            self.launch(job);
        }
        count
    }

    fn worker_context(&self) -> WorkerContext {
        WorkerContext {
            engine: self.inner.engine.clone(),
            history: self.inner.history.clone(),
            resolver: self.resolver(),
            observer: self.inner.observer.clone(),
            overwrite_policy: self.inner.config.overwrite_policy,
            pause_poll: self.inner.config.pause_poll_interval,
        }
    }

    fn launch(&self, job: Arc<Job>) {
        let ctx = self.worker_context();
        let manager = self.clone();

        self.inner.observer.on_job_started(&job.snapshot());
        log_info_with_context(
            ErrorCategory::Download,
            "Download started",
            json!({ "job_id": job.id().to_string(), "url": job.canonical_url(), "platform": job.platform() }),
        );

        tokio::spawn(async move {
            let worker = tokio::spawn(worker::run_job(ctx, job.clone()));
            if let Err(e) = worker.await {
                log_error_with_context(
                    ErrorCategory::System,
                    "Worker task terminated unexpectedly",
                    json!({ "job_id": job.id().to_string() }),
                    Some(&e.to_string()),
                );
                if job.transition(JobStatus::Failed).is_ok() {
                    job.set_error(format!("worker crashed: {e}"));
                }
            }
            manager.finish(&job);
        });
    }

    fn finish(&self, job: &Arc<Job>) {
        self.state().finish(job.id());
        self.notify_queue();

        let snapshot = job.snapshot();
        self.inner.observer.on_job_finished(&snapshot, JobOutcome::of(&snapshot));
    }
}
