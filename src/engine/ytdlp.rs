//! yt-dlp subprocess adapter.
//!
//! Probing and playlist listing capture the whole output at once. Fetching
//! streams stdout line by line, turning templated progress lines into sink
//! reports, and kills the child when the job is cancelled.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

use super::format::{build_format_args, build_retry_args, output_template};
use super::playlist::parse_flat_playlist;
use super::progress::{INFO_PRINT_TEMPLATE, PROGRESS_TEMPLATE, parse_info_line, parse_progress_line, should_log_stderr};
use super::{EngineError, ExtractionEngine, FetchOptions, FetchOutcome, FlatEntry, MediaInfo, ProgressSink};
use crate::logging::{ErrorCategory, append_engine_log, log_debug_simple, log_warning_with_context};

/// How often a running fetch looks at the cancel flag.
const CANCEL_POLL: Duration = Duration::from_millis(100);

/// stderr lines kept for the failure message
const STDERR_TAIL_LINES: usize = 20;

/// Everything a short-lived yt-dlp invocation printed.
#[derive(Debug)]
struct Captured {
    stdout: String,
    stderr: String,
    code: Option<i32>,
}

/// Run `cmd` to completion with stdin closed, collecting both streams.
///
/// A failing exit status is not an error here: yt-dlp can print a usable
/// playlist document and still exit non-zero over one broken entry.
async fn capture(cmd: &mut Command) -> std::io::Result<Captured> {
    cmd.stdin(Stdio::null()).kill_on_drop(true);
    #[cfg(windows)]
    cmd.creation_flags(0x0800_0000);

    let output = cmd.output().await?;
    Ok(Captured {
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        code: output.status.code(),
    })
}

/// The most useful line of a stderr dump: the last `ERROR:` line, else the last line.
fn summarize_stderr(stderr: &str) -> String {
    let lines: Vec<&str> = stderr.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
    lines
        .iter()
        .rev()
        .find(|l| l.starts_with("ERROR"))
        .or_else(|| lines.last())
        .map(|l| l.to_string())
        .unwrap_or_default()
}

/// [`ExtractionEngine`] backed by the `yt-dlp` executable.
#[derive(Debug, Clone)]
pub struct YtDlpEngine {
    binary: PathBuf,
}

impl Default for YtDlpEngine {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_ENGINE_BINARY)
    }
}

impl YtDlpEngine {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self { binary: binary.into() }
    }

    fn command(&self) -> Command {
        Command::new(&self.binary)
    }

    fn program(&self) -> String {
        self.binary.display().to_string()
    }

    fn spawn_error(&self, source: std::io::Error) -> EngineError {
        EngineError::Spawn {
            program: self.program(),
            source,
        }
    }

    /// Run a capture-everything command and parse its stdout as one JSON document.
    async fn run_json(&self, cmd: &mut Command) -> Result<serde_json::Value, EngineError> {
        let out = capture(cmd).await.map_err(|e| self.spawn_error(e))?;

        match serde_json::from_str(out.stdout.trim()) {
            Ok(value) => Ok(value),
            Err(_) if !out.stderr.trim().is_empty() => Err(EngineError::Process {
                code: out.code,
                stderr: summarize_stderr(&out.stderr),
            }),
            Err(e) => Err(EngineError::Parse(format!("invalid JSON from {}: {e}", self.program()))),
        }
    }

    fn fetch_command(&self, url: &str, options: &FetchOptions) -> Command {
        let mut cmd = self.command();
        cmd.arg(url)
            .arg("--no-playlist")
            .arg("--newline")
            .arg("--progress")
            .arg("--no-simulate")
            .arg("--progress-template")
            .arg(PROGRESS_TEMPLATE)
            .arg("--print")
            .arg(INFO_PRINT_TEMPLATE)
            .arg("--output")
            .arg(output_template(&options.output_dir));

        if options.overwrite {
            cmd.arg("--force-overwrites");
        } else {
            cmd.arg("--continue");
        }

        cmd.args(build_retry_args());
        cmd.args(build_format_args(options.media_kind, &options.quality, &options.container_format));

        cmd.stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped());

        #[cfg(windows)]
        cmd.creation_flags(0x08000000); // CREATE_NO_WINDOW

        cmd
    }
}

#[async_trait]
impl ExtractionEngine for YtDlpEngine {
    async fn probe(&self, url: &str, options: &FetchOptions) -> Result<MediaInfo, EngineError> {
        let mut cmd = self.command();
        cmd.arg("-J")
            .arg("--no-playlist")
            .arg("--no-warnings")
            .arg("--output")
            .arg(output_template(&options.output_dir))
            .args(build_format_args(options.media_kind, &options.quality, &options.container_format))
            .arg(url);

        let value = self.run_json(&mut cmd).await?;
        Ok(MediaInfo::from_value(&value))
    }

    async fn fetch(&self, url: &str, options: &FetchOptions, sink: &ProgressSink) -> Result<FetchOutcome, EngineError> {
        let job_id = sink.job_id().to_string();
        let mut child = self.fetch_command(url, options).spawn().map_err(|e| self.spawn_error(e))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| EngineError::io("capturing yt-dlp stdout", std::io::Error::other("stdout unavailable")))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| EngineError::io("capturing yt-dlp stderr", std::io::Error::other("stderr unavailable")))?;

        let mut out_reader = BufReader::new(stdout).lines();
        let mut err_reader = BufReader::new(stderr).lines();

        let mut stderr_tail: VecDeque<String> = VecDeque::with_capacity(STDERR_TAIL_LINES);
        let mut info: Option<MediaInfo> = None;
        let mut last_filename: Option<String> = None;

        let mut cancelled = false;
        let mut stdout_done = false;
        let mut stderr_done = false;
        let mut process_exited = false;
        let mut status: Option<std::process::ExitStatus> = None;

        loop {
            if process_exited && stdout_done && stderr_done {
                break;
            }

            tokio::select! {
                _ = tokio::time::sleep(CANCEL_POLL), if !cancelled => {
                    if sink.is_cancelled() {
                        log_debug_simple(ErrorCategory::Download, &format!("Cancelling yt-dlp for job {job_id}"));
                        cancelled = true;
                        if let Err(e) = child.start_kill() {
                            append_engine_log(&job_id, &format!("failed to kill yt-dlp: {e}"));
                        }
                    }
                }

                res = out_reader.next_line(), if !stdout_done => {
                    match res {
                        Ok(Some(line)) => {
                            if let Some(payload) = parse_info_line(&line) {
                                match serde_json::from_str::<serde_json::Value>(payload) {
                                    Ok(value) => info = Some(MediaInfo::from_value(&value)),
                                    Err(e) => append_engine_log(&job_id, &format!("unparseable info line: {e}")),
                                }
                            } else if !cancelled && let Some(event) = parse_progress_line(&line) {
                                if event.filename.is_some() {
                                    last_filename = event.filename.clone();
                                }
                                // The sink blocks while paused; the child stalls on a full pipe meanwhile.
                                if let Err(e) = sink.report(event).await
                                    && e.is_cancelled()
                                {
                                    cancelled = true;
                                    if let Err(kill_err) = child.start_kill() {
                                        append_engine_log(&job_id, &format!("failed to kill yt-dlp: {kill_err}"));
                                    }
                                }
                            }
                        }
                        Ok(None) => stdout_done = true,
                        Err(e) => {
                            append_engine_log(&job_id, &format!("error reading stdout: {e}"));
                            stdout_done = true;
                        }
                    }
                }

                res = err_reader.next_line(), if !stderr_done => {
                    match res {
                        Ok(Some(line)) => {
                            if should_log_stderr(&line) {
                                append_engine_log(&job_id, &line);
                            }
                            if stderr_tail.len() == STDERR_TAIL_LINES {
                                stderr_tail.pop_front();
                            }
                            stderr_tail.push_back(line);
                        }
                        Ok(None) => stderr_done = true,
                        Err(e) => {
                            append_engine_log(&job_id, &format!("error reading stderr: {e}"));
                            stderr_done = true;
                        }
                    }
                }

                res = child.wait(), if !process_exited => {
                    match res {
                        Ok(s) => status = Some(s),
                        Err(e) => {
                            append_engine_log(&job_id, &format!("error waiting for yt-dlp: {e}"));
                            status = None;
                        }
                    }
                    process_exited = true;
                }
            }
        }

        if cancelled || sink.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        let Some(status) = status else {
            return Err(EngineError::io("waiting for yt-dlp", std::io::Error::other("wait failed")));
        };

        if !status.success() {
            let tail: Vec<String> = stderr_tail.into_iter().collect();
            let summary = summarize_stderr(&tail.join("\n"));
            log_warning_with_context(
                ErrorCategory::Download,
                "yt-dlp exited with failure",
                serde_json::json!({ "job_id": job_id, "code": status.code(), "stderr": summary }),
            );
            return Err(EngineError::Process {
                code: status.code(),
                stderr: summary,
            });
        }

        let info = info.unwrap_or_default();
        let final_path = info
            .filepath
            .clone()
            .or_else(|| info.filename.clone())
            .or(last_filename)
            .map(PathBuf::from)
            .ok_or_else(|| EngineError::OutputUnavailable(url.to_string()))?;

        Ok(FetchOutcome { final_path, info })
    }

    async fn list_flat(&self, playlist_url: &str) -> Result<Vec<FlatEntry>, EngineError> {
        let mut cmd = self.command();
        cmd.arg("--flat-playlist").arg("-J").arg(playlist_url);

        let out = capture(&mut cmd).await.map_err(|e| self.spawn_error(e))?;
        if out.stdout.trim().is_empty() {
            return Err(EngineError::Process {
                code: out.code,
                stderr: summarize_stderr(&out.stderr),
            });
        }

        Ok(parse_flat_playlist(&out.stdout)?.entries)
    }
}
