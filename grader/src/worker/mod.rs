//! Out-of-process host for a submission.
//!
//! The submission never runs inside the grader. [`CandidateWorker`] starts a
//! Python interpreter on an embedded worker script and drives it with
//! [`protocol::Request`]s; statements the submission issues on its sandbox
//! connections come back as messages and run against a
//! [`StatementExecutor`] supplied by the caller. Every request is bounded by a
//! [`Deadline`]; a worker that misses one is killed.
//!
//! Containment covers persistence only: the worker process can still do
//! anything the host user can.

pub mod protocol;
pub mod session;

use std::collections::BTreeMap;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, instrument, warn};
use wait_timeout::ChildExt;

use crate::sandbox::{SandboxError, StatementExecutor};
use protocol::{CallOutcome, Request, SqlReply, WorkerMessage};

pub use session::CandidateSession;

const WORKER_SCRIPT: &str = include_str!("../../python/worker.py");
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("could not start {python}: {source}")]
    Spawn {
        python: String,
        #[source]
        source: std::io::Error,
    },
    /// The submission raised while serving a request.
    #[error("{error}")]
    Fault { error: String, traceback: String },
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("worker exited unexpectedly ({status}): {stderr}")]
    Exited { status: String, stderr: String },
    #[error("worker protocol error: {0}")]
    Protocol(String),
    #[error("worker is not running")]
    Unavailable,
}

impl WorkerError {
    /// Full diagnostic text: the traceback for faults, the message otherwise.
    pub fn diagnostic(&self) -> String {
        match self {
            WorkerError::Fault { error, traceback } if traceback.trim().is_empty() => error.clone(),
            WorkerError::Fault { traceback, .. } => traceback.trim_end().to_string(),
            other => other.to_string(),
        }
    }
}

/// Point in time by which a request must complete.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Instant,
    budget: Duration,
}

impl Deadline {
    pub fn after(budget: Duration) -> Self {
        Self {
            at: Instant::now() + budget,
            budget,
        }
    }

    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    pub fn expired(&self) -> bool {
        Instant::now() >= self.at
    }

    pub fn budget(&self) -> Duration {
        self.budget
    }
}

#[derive(Debug, Clone)]
pub struct WorkerOptions {
    /// Interpreter to run.
    pub python: String,
    /// Submission root; working directory and first import path of the worker.
    pub root: PathBuf,
    /// Bytes of worker stderr kept for diagnostics.
    pub stderr_limit_bytes: usize,
}

pub struct CandidateWorker {
    child: Child,
    stdin: ChildStdin,
    messages: Receiver<Result<WorkerMessage, String>>,
    stderr_tail: Arc<Mutex<Vec<u8>>>,
    python_version: String,
    running: bool,
}

impl CandidateWorker {
    /// Start the interpreter and wait for its handshake.
    #[instrument(skip_all, fields(root = %options.root.display(), python = %options.python))]
    pub fn spawn(options: &WorkerOptions, deadline: Deadline) -> Result<Self, WorkerError> {
        let mut child = Command::new(&options.python)
            .args(["-I", "-B", "-u", "-c", WORKER_SCRIPT])
            .arg(&options.root)
            .current_dir(&options.root)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| WorkerError::Spawn {
                python: options.python.clone(),
                source,
            })?;

        let (Some(stdin), Some(stdout), Some(stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            child.kill().ok();
            child.wait().ok();
            return Err(WorkerError::Protocol("worker pipes were not captured".to_string()));
        };

        let (sender, messages) = mpsc::channel();
        thread::spawn(move || forward_messages(stdout, sender));

        let stderr_tail = Arc::new(Mutex::new(Vec::new()));
        let tail = Arc::clone(&stderr_tail);
        let limit = options.stderr_limit_bytes;
        thread::spawn(move || capture_stderr_tail(stderr, tail, limit));

        let mut worker = Self {
            child,
            stdin,
            messages,
            stderr_tail,
            python_version: String::new(),
            running: true,
        };

        match worker.next_message(&deadline)? {
            WorkerMessage::Ready { python } => {
                debug!(python_version = %python, "worker ready");
                worker.python_version = python;
                Ok(worker)
            }
            other => {
                worker.terminate();
                Err(WorkerError::Protocol(format!(
                    "expected ready handshake, got {other:?}"
                )))
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn python_version(&self) -> &str {
        &self.python_version
    }

    /// Load `path` as module `module` and instantiate `class`.
    pub fn load(
        &mut self,
        path: &Path,
        module: &str,
        class: &str,
        deadline: &Deadline,
    ) -> Result<(), WorkerError> {
        self.request(
            &Request::Load {
                path,
                module,
                class,
            },
            deadline,
            None,
        )
        .map(|_| ())
    }

    /// Which of `names` are callable on the loaded instance.
    pub fn methods(
        &mut self,
        names: &[&str],
        deadline: &Deadline,
    ) -> Result<BTreeMap<String, bool>, WorkerError> {
        let outcome = self.request(&Request::Methods { names }, deadline, None)?;
        serde_json::from_value(outcome.value)
            .map_err(|err| WorkerError::Protocol(format!("methods reply: {err}")))
    }

    pub fn install_sandbox(
        &mut self,
        adapter_path: Option<&Path>,
        connect_fn: &str,
        deadline: &Deadline,
    ) -> Result<(), WorkerError> {
        self.request(
            &Request::Sandbox {
                adapter_path,
                connect_fn,
            },
            deadline,
            None,
        )
        .map(|_| ())
    }

    /// Invoke a method on the instance; its statements run on `executor`.
    pub fn call(
        &mut self,
        method: &str,
        args: &[Value],
        deadline: &Deadline,
        executor: &dyn StatementExecutor,
    ) -> Result<CallOutcome, WorkerError> {
        self.request(&Request::Call { method, args }, deadline, Some(executor))
    }

    #[instrument(skip_all, fields(op = request.op()))]
    fn request(
        &mut self,
        request: &Request<'_>,
        deadline: &Deadline,
        executor: Option<&dyn StatementExecutor>,
    ) -> Result<CallOutcome, WorkerError> {
        if !self.running {
            return Err(WorkerError::Unavailable);
        }
        self.send(request)?;
        loop {
            match self.next_message(deadline)? {
                WorkerMessage::Sql(statement) => {
                    let reply = match executor {
                        Some(executor) => match executor.execute(&statement, deadline) {
                            Ok(rows) => SqlReply::Ok(rows),
                            Err(err) if err.downcast_ref::<SandboxError>().is_some() => {
                                warn!(
                                    budget_secs = deadline.budget().as_secs_f64(),
                                    "sandbox statement hit the deadline, killing worker"
                                );
                                self.terminate();
                                return Err(WorkerError::Timeout(deadline.budget()));
                            }
                            Err(err) => SqlReply::Error {
                                message: format!("{err:#}"),
                            },
                        },
                        None => SqlReply::Error {
                            message: "no sandbox database is attached".to_string(),
                        },
                    };
                    self.send(&reply)?;
                }
                WorkerMessage::Done { value, truthy } => {
                    return Ok(CallOutcome { value, truthy });
                }
                WorkerMessage::Fault { error, traceback } => {
                    debug!(error = %error, "worker reported fault");
                    return Err(WorkerError::Fault { error, traceback });
                }
                WorkerMessage::Ready { .. } => {
                    self.terminate();
                    return Err(WorkerError::Protocol("unexpected ready message".to_string()));
                }
            }
        }
    }

    fn send<T: Serialize>(&mut self, message: &T) -> Result<(), WorkerError> {
        let mut line = serde_json::to_string(message)
            .map_err(|err| WorkerError::Protocol(format!("encode request: {err}")))?;
        line.push('\n');
        let written = self
            .stdin
            .write_all(line.as_bytes())
            .and_then(|()| self.stdin.flush());
        if written.is_err() {
            return Err(self.exited());
        }
        Ok(())
    }

    fn next_message(&mut self, deadline: &Deadline) -> Result<WorkerMessage, WorkerError> {
        match self.messages.recv_timeout(deadline.remaining()) {
            Ok(Ok(message)) => Ok(message),
            Ok(Err(line)) => {
                self.terminate();
                Err(WorkerError::Protocol(line))
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    budget_secs = deadline.budget().as_secs_f64(),
                    "worker timed out, killing"
                );
                self.terminate();
                Err(WorkerError::Timeout(deadline.budget()))
            }
            Err(RecvTimeoutError::Disconnected) => Err(self.exited()),
        }
    }

    /// Reap a worker whose pipes closed and describe how it ended.
    fn exited(&mut self) -> WorkerError {
        self.running = false;
        let status = match self.child.wait_timeout(SHUTDOWN_GRACE) {
            Ok(Some(status)) => status.to_string(),
            _ => {
                self.child.kill().ok();
                self.child.wait().ok();
                "killed".to_string()
            }
        };
        let stderr = self.stderr_tail();
        warn!(status = %status, "worker exited unexpectedly");
        WorkerError::Exited {
            status,
            stderr: if stderr.is_empty() {
                "no stderr output".to_string()
            } else {
                stderr
            },
        }
    }

    fn stderr_tail(&self) -> String {
        match self.stderr_tail.lock() {
            Ok(buf) => String::from_utf8_lossy(&buf).trim().to_string(),
            Err(_) => String::new(),
        }
    }

    fn terminate(&mut self) {
        if self.running {
            self.child.kill().ok();
            self.child.wait().ok();
            self.running = false;
        }
    }

    /// Ask the worker to exit, killing it if it does not within a grace period.
    pub fn shutdown(mut self) {
        if !self.running {
            return;
        }
        if self.send(&Request::Shutdown).is_ok() {
            match self.child.wait_timeout(SHUTDOWN_GRACE) {
                Ok(Some(status)) => {
                    debug!(status = %status, "worker shut down");
                    self.running = false;
                }
                _ => self.terminate(),
            }
        } else {
            self.terminate();
        }
    }
}

impl Drop for CandidateWorker {
    fn drop(&mut self) {
        self.terminate();
    }
}

fn forward_messages(stdout: ChildStdout, sender: Sender<Result<WorkerMessage, String>>) {
    for line in BufReader::new(stdout).lines() {
        let Ok(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }
        let message = serde_json::from_str(&line)
            .map_err(|err| format!("unreadable worker message ({err}): {line}"));
        if sender.send(message).is_err() {
            break;
        }
    }
}

/// Keep the last `limit` bytes of the stream; tracebacks end up at the tail.
fn capture_stderr_tail<R: Read>(mut reader: R, tail: Arc<Mutex<Vec<u8>>>, limit: usize) {
    let mut chunk = [0u8; 8192];
    loop {
        let n = match reader.read(&mut chunk) {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        let Ok(mut buf) = tail.lock() else { break };
        buf.extend_from_slice(&chunk[..n]);
        if buf.len() > limit {
            let excess = buf.len() - limit;
            buf.drain(..excess);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stderr_tail_keeps_the_end() {
        let tail = Arc::new(Mutex::new(Vec::new()));
        capture_stderr_tail(&b"line one\nline two\nTraceback: boom\n"[..], Arc::clone(&tail), 15);
        let kept = tail.lock().expect("lock").clone();
        assert_eq!(String::from_utf8_lossy(&kept), "raceback: boom\n");
    }

    #[test]
    fn fault_diagnostic_prefers_traceback() {
        let err = WorkerError::Fault {
            error: "KeyError: 'id'".to_string(),
            traceback: "Traceback (most recent call last):\nKeyError: 'id'\n".to_string(),
        };
        assert_eq!(err.to_string(), "KeyError: 'id'");
        assert!(err.diagnostic().starts_with("Traceback"));

        let bare = WorkerError::Fault {
            error: "boom".to_string(),
            traceback: String::new(),
        };
        assert_eq!(bare.diagnostic(), "boom");
    }

    #[test]
    fn missing_interpreter_is_a_spawn_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let options = WorkerOptions {
            python: "definitely-not-a-python-interpreter".to_string(),
            root: temp.path().to_path_buf(),
            stderr_limit_bytes: 1024,
        };
        let err = CandidateWorker::spawn(&options, Deadline::after(Duration::from_secs(5)))
            .err()
            .expect("spawn fails");
        assert!(matches!(err, WorkerError::Spawn { .. }));
        assert!(err.to_string().contains("definitely-not-a-python-interpreter"));
    }

    #[test]
    fn deadline_remaining_never_exceeds_budget() {
        let deadline = Deadline::after(Duration::from_millis(200));
        assert!(deadline.remaining() <= deadline.budget());
        assert_eq!(deadline.budget(), Duration::from_millis(200));
        assert!(!deadline.expired());
        assert!(Deadline::after(Duration::ZERO).expired());
    }
}
