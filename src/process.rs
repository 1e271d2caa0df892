//! External process invocation with captured output and optional timeouts

use std::io::Read;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, warn};

use crate::cancellation::CancellationToken;
use crate::error::{Error, Result};

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Captured result of a finished (or killed) process
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    /// Exit code, `None` when the process was killed by a signal
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

impl ProcessOutput {
    /// Build a successful output, mostly useful for test doubles.
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: Some(0),
            stdout: stdout.into(),
            ..Default::default()
        }
    }

    /// Build a failed output with the given exit code and stderr.
    pub fn failure(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code: Some(exit_code),
            stderr: stderr.into(),
            ..Default::default()
        }
    }

    pub fn succeeded(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }

    /// Non-empty, trimmed stdout lines
    pub fn output_lines(&self) -> Vec<String> {
        self.stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Convert a failed output into [`Error::ProcessFailed`].
    pub fn ensure_success(self, command: impl Into<String>) -> Result<Self> {
        if self.succeeded() {
            return Ok(self);
        }
        Err(Error::ProcessFailed {
            command: command.into(),
            exit_code: self.exit_code,
            stdout: self.stdout,
            stderr: self.stderr,
            timed_out: self.timed_out,
        })
    }
}

/// Runs executables, capturing their output.
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner {
    timeout: Option<Duration>,
}

impl ProcessRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Kill processes that run longer than `timeout`.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Run `program args...` in `working_dir`.
    ///
    /// The token is only consulted before spawning. Once the process runs it
    /// is left to finish unless the timeout elapses.
    pub fn execute(
        &self,
        program: &str,
        args: &[String],
        working_dir: Option<&Path>,
        cancel: &CancellationToken,
    ) -> Result<ProcessOutput> {
        cancel.check()?;

        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = working_dir {
            command.current_dir(dir);
        }

        debug!(
            "Executing {} {} in {}",
            program,
            args.join(" "),
            working_dir
                .map(|d| d.display().to_string())
                .unwrap_or_else(|| ".".to_string())
        );

        let mut child = command.spawn()?;
        let stdout_reader = spawn_reader(child.stdout.take());
        let stderr_reader = spawn_reader(child.stderr.take());

        let (exit_code, timed_out) = self.wait(&mut child, program)?;

        let stdout = stdout_reader.join().unwrap_or_default();
        let stderr = stderr_reader.join().unwrap_or_default();

        Ok(ProcessOutput {
            exit_code,
            stdout,
            stderr,
            timed_out,
        })
    }

    fn wait(&self, child: &mut Child, program: &str) -> Result<(Option<i32>, bool)> {
        let Some(timeout) = self.timeout else {
            let status = child.wait()?;
            return Ok((status.code(), false));
        };

        let started = Instant::now();
        loop {
            if let Some(status) = child.try_wait()? {
                return Ok((status.code(), false));
            }
            if started.elapsed() >= timeout {
                warn!("{} did not finish within {:?}, killing it", program, timeout);
                // The child may exit on its own between try_wait and kill
                let _ = child.kill();
                let status = child.wait()?;
                return Ok((status.code(), true));
            }
            thread::sleep(POLL_INTERVAL);
        }
    }
}

fn spawn_reader<R>(stream: Option<R>) -> thread::JoinHandle<String>
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        let mut buffer = Vec::new();
        if let Some(mut stream) = stream {
            if let Err(e) = stream.read_to_end(&mut buffer) {
                warn!("Failed to read process output, keeping {} bytes read so far: {}", buffer.len(), e);
            }
        }
        String::from_utf8_lossy(&buffer).into_owned()
    })
}
