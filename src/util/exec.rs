//! Structured command execution with per-attempt timeouts.
//!
//! Every component that shells out does so through the [`Execute`] trait so
//! tests can substitute a deterministic runner. [`ProcessExecutor`] is the
//! real implementation: it captures output on reader threads, waits on the
//! child with a hard deadline, and kills the process when the deadline
//! expires. A timeout surfaces as `ErrorKind::Timeout`, distinct from an
//! ordinary command failure.

use std::io::Read;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use wait_timeout::ChildExt;

use crate::errors::{Error, Result};

#[derive(Debug, Clone, Default)]
pub struct ExecRequest {
    pub argv: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub timeout: Option<Duration>,
}

impl ExecRequest {
    pub fn new<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            argv: argv.into_iter().map(Into::into).collect(),
            cwd: None,
            timeout: None,
        }
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Completed command. A non-zero exit code is not an `Err`; callers inspect
/// `exit_code`/`stderr` themselves, mirroring `check=False` subprocess use.
#[derive(Debug, Clone, Default)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Process execution boundary. `Err` means the command could not run to
/// completion (spawn failure, timeout); an unhappy exit code is an `Ok`.
pub trait Execute: Send + Sync {
    fn run(&self, request: ExecRequest) -> Result<ExecOutput>;
}

/// Spawns real child processes with piped capture and timeout enforcement.
#[derive(Debug, Clone)]
pub struct ProcessExecutor {
    default_timeout: Duration,
}

impl ProcessExecutor {
    pub fn new(default_timeout: Duration) -> Self {
        Self { default_timeout }
    }
}

impl Default for ProcessExecutor {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

impl Execute for ProcessExecutor {
    fn run(&self, request: ExecRequest) -> Result<ExecOutput> {
        let program = request
            .argv
            .first()
            .ok_or_else(|| Error::validation("Cannot execute an empty command."))?
            .clone();

        let mut cmd = Command::new(&program);
        cmd.args(&request.argv[1..]);
        if let Some(ref cwd) = request.cwd {
            cmd.current_dir(cwd);
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(|e| {
            Error::runtime(format!("Failed to spawn '{program}': {e}"))
                .with_hint("Check that the program is installed and on PATH.")
        })?;

        // Drain pipes on dedicated threads so the child never blocks on a
        // full pipe while we wait for it.
        let stdout_pipe = child.stdout.take();
        let stderr_pipe = child.stderr.take();
        let stdout_handle = spawn_reader(stdout_pipe);
        let stderr_handle = spawn_reader(stderr_pipe);

        let timeout = request.timeout.unwrap_or(self.default_timeout);
        let started = Instant::now();
        let status = if timeout.is_zero() {
            child
                .wait()
                .map_err(|e| Error::runtime(format!("Failed to wait for '{program}': {e}")))?
        } else {
            match child.wait_timeout(timeout).map_err(|e| {
                Error::runtime(format!("Failed to wait for '{program}' with timeout: {e}"))
            })? {
                Some(status) => status,
                None => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(Error::timeout(format!(
                        "Command '{program}' timed out after {timeout:?}."
                    ))
                    .with_hint("Increase the timeout or inspect the hanging process."));
                }
            }
        };

        let stdout = join_reader(stdout_handle);
        let stderr = join_reader(stderr_handle);

        Ok(ExecOutput {
            exit_code: status.code().unwrap_or(-1),
            stdout: decode_console_output(&stdout),
            stderr: decode_console_output(&stderr),
            duration: started.elapsed(),
        })
    }
}

fn spawn_reader(pipe: Option<impl Read + Send + 'static>) -> Option<thread::JoinHandle<Vec<u8>>> {
    pipe.map(|mut reader| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = reader.read_to_end(&mut buf);
            buf
        })
    })
}

fn join_reader(handle: Option<thread::JoinHandle<Vec<u8>>>) -> Vec<u8> {
    handle
        .and_then(|h| h.join().ok())
        .unwrap_or_default()
}

/// Decode console output tolerantly. `wsl.exe` emits UTF-16LE in Windows
/// consoles; everything else is treated as UTF-8 with lossy replacement.
pub fn decode_console_output(raw: &[u8]) -> String {
    if raw.is_empty() {
        return String::new();
    }
    if raw.contains(&0u8) {
        let units: Vec<u16> = raw
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        return String::from_utf16_lossy(&units).replace('\u{feff}', "");
    }
    String::from_utf8_lossy(raw).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_utf16le_console_output() {
        let text = "Ubuntu\r\nDebian\r\n";
        let mut bytes = vec![0xff, 0xfe]; // BOM
        for unit in text.encode_utf16() {
            bytes.extend_from_slice(&unit.to_le_bytes());
        }
        assert_eq!(decode_console_output(&bytes), text);
    }

    #[test]
    fn decodes_plain_utf8() {
        assert_eq!(decode_console_output(b"main\n"), "main\n");
        assert_eq!(decode_console_output(b""), "");
    }

    #[test]
    fn empty_command_is_a_validation_error() {
        let exec = ProcessExecutor::default();
        let err = exec.run(ExecRequest::new(Vec::<String>::new())).unwrap_err();
        assert_eq!(err.kind(), crate::errors::ErrorKind::Validation);
    }

    #[test]
    fn captures_exit_code_and_output() {
        let exec = ProcessExecutor::default();
        let out = exec
            .run(ExecRequest::new(["sh", "-c", "echo hi; echo bad >&2; exit 3"]))
            .expect("spawn sh");
        assert_eq!(out.exit_code, 3);
        assert_eq!(out.stdout, "hi\n");
        assert_eq!(out.stderr, "bad\n");
        assert!(!out.success());
    }

    #[test]
    fn timeout_kills_and_reports_timeout_kind() {
        let exec = ProcessExecutor::default();
        let err = exec
            .run(ExecRequest::new(["sleep", "5"]).timeout(Duration::from_millis(50)))
            .unwrap_err();
        assert_eq!(err.kind(), crate::errors::ErrorKind::Timeout);
    }
}
