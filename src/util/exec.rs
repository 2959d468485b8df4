use std::ffi::OsString;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;
use wait_timeout::ChildExt;

/// Per-stream cap on captured output before the child is killed.
pub const DEFAULT_OUTPUT_LIMIT: usize = 10 * 1024 * 1024;

const WAIT_SLICE: Duration = Duration::from_millis(50);

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("{program}: command not found")]
    NotFound { program: String },
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("command `{command}` timed out after {timeout:?}")]
    TimedOut { command: String, timeout: Duration },
    #[error("command `{command}` produced more than {limit} bytes of output (output buffer exceeded)")]
    OutputOverflow { command: String, limit: usize },
    #[error("failed while waiting for `{command}`: {source}")]
    Wait {
        command: String,
        #[source]
        source: io::Error,
    },
}

/// Seam between the orchestrator and the processes it drives.
pub trait CommandRunner: Send + Sync {
    fn run(&self, request: ExecRequest) -> Result<ExecOutput, ExecError>;
}

/// Command execution with timeouts and bounded output capture.
#[derive(Debug, Clone)]
pub struct ExecService {
    default_timeout: Duration,
    output_limit: usize,
}

impl ExecService {
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            default_timeout,
            output_limit: DEFAULT_OUTPUT_LIMIT,
        }
    }

}

impl Default for ExecService {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

impl CommandRunner for ExecService {
    fn run(&self, request: ExecRequest) -> Result<ExecOutput, ExecError> {
        let command_line = request.command_line();
        let program = request.program.to_string_lossy().to_string();
        tracing::debug!(command = %command_line, cwd = ?request.cwd, "exec");

        let mut cmd = Command::new(&request.program);
        cmd.args(&request.args);
        if let Some(ref cwd) = request.cwd {
            cmd.current_dir(cwd);
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                ExecError::NotFound {
                    program: program.clone(),
                }
            } else {
                ExecError::Spawn {
                    program: program.clone(),
                    source: e,
                }
            }
        })?;

        let limit = self.output_limit;
        let overflow = Arc::new(AtomicBool::new(false));
        let stdout_reader = child
            .stdout
            .take()
            .map(|s| spawn_reader(s, limit, Arc::clone(&overflow)));
        let stderr_reader = child
            .stderr
            .take()
            .map(|s| spawn_reader(s, limit, Arc::clone(&overflow)));

        let timeout = request.timeout.unwrap_or(self.default_timeout);
        let started = Instant::now();
        let status = loop {
            let waited = child.wait_timeout(WAIT_SLICE).map_err(|e| ExecError::Wait {
                command: command_line.clone(),
                source: e,
            })?;
            if let Some(status) = waited {
                break status;
            }
            if overflow.load(Ordering::SeqCst) {
                let _ = child.kill();
                let _ = child.wait();
                return Err(ExecError::OutputOverflow {
                    command: command_line,
                    limit,
                });
            }
            if !timeout.is_zero() && started.elapsed() >= timeout {
                let _ = child.kill();
                let _ = child.wait();
                return Err(ExecError::TimedOut {
                    command: command_line,
                    timeout,
                });
            }
        };

        let stdout = join_reader(stdout_reader);
        let stderr = join_reader(stderr_reader);
        if overflow.load(Ordering::SeqCst) {
            return Err(ExecError::OutputOverflow {
                command: command_line,
                limit,
            });
        }

        Ok(ExecOutput {
            code: status.code(),
            duration: started.elapsed(),
            stdout,
            stderr,
        })
    }
}

// Pipes are drained concurrently so a chatty child never blocks on a full pipe.
fn spawn_reader<R: Read + Send + 'static>(
    mut stream: R,
    limit: usize,
    overflow: Arc<AtomicBool>,
) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut kept = Vec::new();
        let mut chunk = [0u8; 8192];
        loop {
            match stream.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => {
                    let room = limit.saturating_sub(kept.len());
                    if n > room {
                        kept.extend_from_slice(&chunk[..room]);
                        overflow.store(true, Ordering::SeqCst);
                    } else {
                        kept.extend_from_slice(&chunk[..n]);
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }
        kept
    })
}

fn join_reader(handle: Option<thread::JoinHandle<Vec<u8>>>) -> String {
    handle
        .and_then(|h| h.join().ok())
        .map(|bytes| String::from_utf8_lossy(&bytes).to_string())
        .unwrap_or_default()
}

#[derive(Debug, Clone, Default)]
pub struct ExecRequest {
    program: OsString,
    args: Vec<OsString>,
    cwd: Option<PathBuf>,
    timeout: Option<Duration>,
}

impl ExecRequest {
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn program(&self) -> &OsString {
        &self.program
    }

    pub fn arg_strings(&self) -> Vec<String> {
        self.args
            .iter()
            .map(|a| a.to_string_lossy().to_string())
            .collect()
    }

    pub fn working_dir(&self) -> Option<&Path> {
        self.cwd.as_deref()
    }

    /// Program and arguments joined for logs and error messages.
    pub fn command_line(&self) -> String {
        let mut parts = vec![self.program.to_string_lossy().to_string()];
        parts.extend(self.arg_strings());
        parts.join(" ")
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExecOutput {
    pub code: Option<i32>,
    pub duration: Duration,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Most useful text for a failure report: stderr when present, else stdout.
    pub fn failure_text(&self) -> String {
        let err = self.stderr.trim();
        if !err.is_empty() {
            return err.to_string();
        }
        let out = self.stdout.trim();
        if !out.is_empty() {
            return out.to_string();
        }
        match self.code {
            Some(c) => format!("exited with status {c}"),
            None => "terminated by signal".to_string(),
        }
    }
}
