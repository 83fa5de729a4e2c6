#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tempfile::TempDir;

use mediaqueue::engine::{FetchOptions, FetchOutcome, FlatEntry, MediaInfo, ProgressEvent, ProgressSink};
use mediaqueue::{
    EngineError, ExtractionEngine, HistoryStore, JobId, JobOutcome, JobSnapshot, OverwritePolicy, PathResolver,
    QueueConfig, QueueManager, QueueObserver,
};

pub const CHUNK: u64 = 256 * 1024;
pub const TOTAL: u64 = 64 * 1024 * 1024;
const STEP: Duration = Duration::from_millis(10);

/// Manually opened latch for holding a download in flight.
#[derive(Debug, Default)]
pub struct Gate {
    open: AtomicBool,
}

impl Gate {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn open(&self) {
        self.open.store(true, Ordering::SeqCst);
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub enum Behavior {
    /// Report `steps` chunks `STEP` apart, then succeed.
    Complete { steps: u64 },
    /// Keep reporting until the gate opens, then succeed.
    Gated(Arc<Gate>),
    FailFetch(std::io::ErrorKind),
    FailProbe,
}

/// Scripted in-memory engine. Unknown URLs complete after a few steps.
#[derive(Default)]
pub struct MockEngine {
    behaviors: Mutex<HashMap<String, Behavior>>,
    playlists: Mutex<HashMap<String, std::result::Result<Vec<FlatEntry>, String>>>,
    probes: Mutex<Vec<String>>,
    fetches: Mutex<Vec<(String, bool)>>,
    running: AtomicUsize,
    peak: AtomicUsize,
}

struct RunningGuard<'a>(&'a AtomicUsize);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

pub fn title_for(url: &str) -> String {
    let tail = url.rsplit(['/', '=']).next().unwrap_or("clip");
    tail.chars().map(|c| if c.is_ascii_alphanumeric() { c } else { '_' }).collect()
}

impl MockEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script(&self, url: &str, behavior: Behavior) {
        self.behaviors.lock().unwrap().insert(url.to_string(), behavior);
    }

    pub fn set_playlist(&self, url: &str, entries: std::result::Result<Vec<FlatEntry>, String>) {
        self.playlists.lock().unwrap().insert(url.to_string(), entries);
    }

    pub fn probed(&self) -> Vec<String> {
        self.probes.lock().unwrap().clone()
    }

    pub fn fetched(&self) -> Vec<(String, bool)> {
        self.fetches.lock().unwrap().clone()
    }

    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn behavior(&self, url: &str) -> Behavior {
        self.behaviors.lock().unwrap().get(url).cloned().unwrap_or(Behavior::Complete { steps: 3 })
    }

    fn info_for(url: &str, output_dir: &Path) -> MediaInfo {
        let title = title_for(url);
        MediaInfo {
            id: Some(title.clone()),
            title: Some(title.clone()),
            uploader: Some("mock".to_string()),
            webpage_url: Some(url.to_string()),
            filename: Some(output_dir.join(format!("{title}.webm")).display().to_string()),
            ..MediaInfo::default()
        }
    }
}

#[async_trait]
impl ExtractionEngine for MockEngine {
    async fn probe(&self, url: &str, options: &FetchOptions) -> Result<MediaInfo, EngineError> {
        self.probes.lock().unwrap().push(url.to_string());
        match self.behavior(url) {
            Behavior::FailProbe => Err(EngineError::Process {
                code: Some(1),
                stderr: "ERROR: Unsupported URL".to_string(),
            }),
            _ => Ok(Self::info_for(url, &options.output_dir)),
        }
    }

    async fn fetch(&self, url: &str, options: &FetchOptions, sink: &ProgressSink) -> Result<FetchOutcome, EngineError> {
        self.fetches.lock().unwrap().push((url.to_string(), options.overwrite));

        let now_running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now_running, Ordering::SeqCst);
        let _guard = RunningGuard(&self.running);

        let mut done = 0;
        match self.behavior(url) {
            Behavior::Complete { steps } => {
                for _ in 0..steps {
                    done += CHUNK;
                    sink.report(ProgressEvent::downloading(done, Some(TOTAL))).await?;
                    tokio::time::sleep(STEP).await;
                }
            }
            Behavior::Gated(gate) => loop {
                done += CHUNK;
                sink.report(ProgressEvent::downloading(done, Some(TOTAL))).await?;
                if gate.is_open() {
                    break;
                }
                tokio::time::sleep(STEP).await;
            },
            Behavior::FailFetch(kind) => {
                return Err(EngineError::io("writing output", std::io::Error::new(kind, "access denied")));
            }
            Behavior::FailProbe => unreachable!("probe already failed"),
        }

        let info = Self::info_for(url, &options.output_dir);
        let final_path = options.expected_path(&info).expect("mock info always has a filename");
        std::fs::write(&final_path, vec![0u8; 1024]).map_err(|e| EngineError::io("writing output", e))?;
        sink.report(ProgressEvent::finished()).await?;

        Ok(FetchOutcome { final_path, info })
    }

    async fn list_flat(&self, playlist_url: &str) -> Result<Vec<FlatEntry>, EngineError> {
        match self.playlists.lock().unwrap().get(playlist_url).cloned() {
            Some(Ok(entries)) => Ok(entries),
            Some(Err(message)) => Err(EngineError::Process {
                code: Some(1),
                stderr: message,
            }),
            None => Err(EngineError::Parse(format!("no playlist scripted for {playlist_url}"))),
        }
    }
}

/// Observer answering overwrite prompts with a fixed answer and recording events.
#[derive(Default)]
pub struct RecordingObserver {
    pub answer: bool,
    pub prompts: Mutex<Vec<PathBuf>>,
    pub started: Mutex<Vec<JobId>>,
    pub finished: Mutex<Vec<(JobId, JobOutcome)>>,
}

impl RecordingObserver {
    pub fn answering(answer: bool) -> Arc<Self> {
        Arc::new(Self {
            answer,
            ..Self::default()
        })
    }

    pub fn outcome(&self, id: JobId) -> Option<JobOutcome> {
        self.finished.lock().unwrap().iter().find(|(job, _)| *job == id).map(|(_, outcome)| *outcome)
    }
}

impl QueueObserver for RecordingObserver {
    fn confirm_overwrite(&self, _job: &JobSnapshot, existing: &Path) -> bool {
        self.prompts.lock().unwrap().push(existing.to_path_buf());
        self.answer
    }

    fn on_job_started(&self, job: &JobSnapshot) {
        self.started.lock().unwrap().push(job.id);
    }

    fn on_job_finished(&self, job: &JobSnapshot, outcome: JobOutcome) {
        self.finished.lock().unwrap().push((job.id, outcome));
    }
}

pub struct Harness {
    pub dir: TempDir,
    pub engine: Arc<MockEngine>,
    pub observer: Arc<RecordingObserver>,
    pub history: Arc<HistoryStore>,
    pub queue: QueueManager,
}

impl Harness {
    pub fn new(max_concurrent: usize) -> Self {
        Self::with_observer(max_concurrent, RecordingObserver::answering(false))
    }

    pub fn with_observer(max_concurrent: usize, observer: Arc<RecordingObserver>) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let engine = MockEngine::new();
        let history = Arc::new(HistoryStore::new(dir.path().join("data/download_history.json")));
        let resolver = PathResolver::new(dir.path().join("media"));
        resolver.ensure_dirs().unwrap();

        let config = QueueConfig {
            max_concurrent,
            tick_interval: Duration::from_millis(20),
            pause_poll_interval: Duration::from_millis(10),
            overwrite_policy: OverwritePolicy::Ask,
            ..QueueConfig::default()
        };

        let queue = QueueManager::new(config, engine.clone(), history.clone(), resolver, observer.clone());

        Self {
            dir,
            engine,
            observer,
            history,
            queue,
        }
    }

    pub fn media_root(&self) -> PathBuf {
        self.dir.path().join("media")
    }
}

const WAIT_LIMIT: Duration = Duration::from_secs(10);

/// Poll until the job's snapshot satisfies `pred`.
pub async fn wait_for(queue: &QueueManager, id: JobId, pred: impl Fn(&JobSnapshot) -> bool) -> JobSnapshot {
    let deadline = Instant::now() + WAIT_LIMIT;
    loop {
        if let Some(snapshot) = queue.job(id)
            && pred(&snapshot)
        {
            return snapshot;
        }
        assert!(Instant::now() < deadline, "timed out waiting on job {id}");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Poll until the job has left its worker slot and sits in the archive.
pub async fn wait_archived(queue: &QueueManager, id: JobId) -> JobSnapshot {
    let deadline = Instant::now() + WAIT_LIMIT;
    loop {
        if let Some(snapshot) = queue.completed().into_iter().find(|j| j.id == id) {
            return snapshot;
        }
        assert!(Instant::now() < deadline, "timed out waiting for job {id} to finish");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
