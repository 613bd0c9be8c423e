/// Isolated Runner - Subprocess Execution Primitive
///
/// **Core Responsibility:**
/// Execute arbitrary program text in a fresh interpreter process and capture
/// raw outputs.
///
/// **Critical Architectural Boundary:**
/// - Runner knows HOW to execute (temp file, interpreter, timeout)
/// - Runner does NOT validate source
/// - Runner does NOT grade anything
/// - Runner never returns an error: every failure becomes a `ProcessResult`
///
/// **Safety Guarantees:**
/// - Hard timeout: enforced via tokio::time::timeout, child killed on expiry
/// - Guaranteed cleanup: program file removed on every exit path via Drop guard
/// - Partial output capture: whatever was printed before a kill is kept
/// - Bounded capture: each stream is capped at `max_output_bytes`

use async_trait::async_trait;
use kata_common::config::{InterpreterConfig, RunnerConfig};
use kata_common::types::ProcessResult;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{debug, warn};

/// Exit code reported when the wall-clock bound fires
pub const TIMEOUT_EXIT_CODE: i32 = 124;

/// How long to wait for pipe readers after the child has exited or been killed
const DRAIN_GRACE: Duration = Duration::from_millis(500);

const TRUNCATION_NOTE: &str = "[output truncated]";

/// Anything that can execute program text and report what happened.
///
/// The coordinator is generic over this so tests can count or script runs
/// without spawning processes.
#[async_trait]
pub trait ProgramRunner: Send + Sync {
    async fn run(&self, program_text: &str) -> ProcessResult;
}

/// Program file cleanup guard - removes the file on drop
///
/// Covers early returns, panics and cancellation of the `run` future alike.
struct ScratchFileGuard {
    path: PathBuf,
}

impl ScratchFileGuard {
    fn new(path: PathBuf) -> Self {
        Self { path }
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScratchFileGuard {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Failed to remove program file");
            }
        }
    }
}

#[derive(Debug, Default)]
struct Captured {
    bytes: Vec<u8>,
    truncated: bool,
}

impl Captured {
    fn into_text(self) -> String {
        let mut text = String::from_utf8_lossy(&self.bytes).trim_end().to_string();
        if self.truncated {
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str(TRUNCATION_NOTE);
        }
        text
    }
}

/// Shared capture buffer, written by a reader task and taken by `drain`
type SharedCapture = Arc<Mutex<Captured>>;

fn lock(capture: &SharedCapture) -> MutexGuard<'_, Captured> {
    capture.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Read a pipe to EOF, keeping at most `limit` bytes in `sink`.
///
/// Keeps draining past the limit so the child never blocks on a full pipe.
async fn read_capped<R>(reader: Option<R>, limit: usize, sink: SharedCapture)
where
    R: AsyncRead + Unpin,
{
    let Some(mut reader) = reader else {
        return;
    };

    let mut buf = [0u8; 8192];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let mut captured = lock(&sink);
                let room = limit.saturating_sub(captured.bytes.len());
                if n > room {
                    captured.truncated = true;
                }
                captured.bytes.extend_from_slice(&buf[..n.min(room)]);
            }
            Err(e) => {
                debug!(error = %e, "Pipe read failed");
                break;
            }
        }
    }
}

fn spawn_reader<R>(reader: Option<R>, limit: usize) -> (tokio::task::JoinHandle<()>, SharedCapture)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let sink = SharedCapture::default();
    let task = tokio::spawn(read_capped(reader, limit, sink.clone()));
    (task, sink)
}

/// Wait briefly for a reader to hit EOF, then take whatever it captured.
///
/// A pipe held open by a leftover grandchild never reaches EOF; the reader is
/// aborted and the bytes read so far are kept.
async fn drain(mut task: tokio::task::JoinHandle<()>, sink: SharedCapture) -> Captured {
    match tokio::time::timeout(DRAIN_GRACE, &mut task).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "Output reader task failed"),
        Err(_) => {
            warn!("Output reader did not finish after process exit, keeping partial output");
            task.abort();
        }
    }
    std::mem::take(&mut *lock(&sink))
}

/// Map an exit status to a single integer; signal deaths become 128 + signal.
fn exit_code_of(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }

    -1
}

/// Local interpreter runner
///
/// **Execution Rules:**
/// 1. Writes program text to `<scratch_dir>/kata_<uuid>.<ext>`
/// 2. Spawns `<command> <args...> <file>` with stdin closed
/// 3. Captures stdout/stderr, trailing whitespace trimmed
/// 4. Kills the process when the timeout fires
/// 5. Removes the program file
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    interpreter: InterpreterConfig,
    scratch_dir: PathBuf,
    timeout: Duration,
    max_output_bytes: usize,
}

impl ProcessRunner {
    pub fn new(config: &RunnerConfig) -> Self {
        Self {
            interpreter: config.interpreter.clone(),
            scratch_dir: config.scratch_dir.clone(),
            timeout: Duration::from_millis(config.timeout_ms),
            max_output_bytes: config.max_output_bytes,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn program_path(&self) -> PathBuf {
        self.scratch_dir.join(format!(
            "kata_{}.{}",
            uuid::Uuid::new_v4().simple(),
            self.interpreter.file_extension
        ))
    }
}

#[async_trait]
impl ProgramRunner for ProcessRunner {
    #[tracing::instrument(skip(self, program_text), fields(program_bytes = program_text.len()))]
    async fn run(&self, program_text: &str) -> ProcessResult {
        let start_time = Instant::now();
        let elapsed_ms = |start: Instant| start.elapsed().as_millis() as u64;

        // Set up the guard before the file exists so a partial write is removed too
        let guard = ScratchFileGuard::new(self.program_path());

        if let Err(e) = tokio::fs::write(guard.path(), program_text).await {
            warn!(path = %guard.path().display(), error = %e, "Failed to write program file");
            return ProcessResult::spawn_failure(
                format!("Failed to write program file: {}", e),
                elapsed_ms(start_time),
            );
        }

        let mut command = Command::new(&self.interpreter.command);
        command
            .args(&self.interpreter.args)
            .arg(guard.path())
            .current_dir(&self.scratch_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!(interpreter = %self.interpreter.command, error = %e, "Failed to spawn interpreter");
                return ProcessResult::spawn_failure(
                    format!("Failed to start interpreter '{}': {}", self.interpreter.command, e),
                    elapsed_ms(start_time),
                );
            }
        };

        debug!(pid = ?child.id(), timeout_ms = self.timeout.as_millis() as u64, "Interpreter started");

        let (stdout_task, stdout_sink) = spawn_reader(child.stdout.take(), self.max_output_bytes);
        let (stderr_task, stderr_sink) = spawn_reader(child.stderr.take(), self.max_output_bytes);

        // HARD TIMEOUT
        let wait_result = tokio::time::timeout(self.timeout, child.wait()).await;

        let (exit_code, timed_out, wait_error) = match wait_result {
            Ok(Ok(status)) => (exit_code_of(status), false, None),
            Ok(Err(e)) => {
                warn!(error = %e, "Failed to wait for interpreter");
                if let Err(kill_err) = child.start_kill() {
                    debug!(error = %kill_err, "Kill after wait failure did not succeed");
                }
                (1, false, Some(format!("Failed to wait for interpreter: {}", e)))
            }
            Err(_) => {
                warn!(timeout_ms = self.timeout.as_millis() as u64, "Execution timed out - killing interpreter");
                if let Err(e) = child.kill().await {
                    warn!(error = %e, "Failed to kill timed-out interpreter");
                }
                (TIMEOUT_EXIT_CODE, true, None)
            }
        };

        let stdout = drain(stdout_task, stdout_sink).await.into_text();
        let mut stderr = drain(stderr_task, stderr_sink).await.into_text();

        if timed_out {
            if !stderr.is_empty() {
                stderr.push('\n');
            }
            stderr.push_str(&format!(
                "Execution timed out after {} ms",
                self.timeout.as_millis()
            ));
        } else if let Some(message) = wait_error {
            if !stderr.is_empty() {
                stderr.push('\n');
            }
            stderr.push_str(&message);
        } else if exit_code == 137 {
            stderr.push_str("\n[Process killed: SIGKILL, likely out of memory]");
        } else if exit_code == 139 {
            stderr.push_str("\n[Process killed: segmentation fault]");
        }

        let execution_time_ms = elapsed_ms(start_time);
        debug!(exit_code, timed_out, execution_time_ms, "Interpreter finished");

        ProcessResult {
            stdout,
            stderr: stderr.trim_start().to_string(),
            exit_code,
            timed_out,
            execution_time_ms,
        }
        // guard dropped here: program file removed
    }
}
