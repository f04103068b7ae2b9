//! Hardened WSL command runtime with retry, backoff and timeout controls.
//!
//! Commands dispatched here must be idempotent or safely re-runnable: a
//! transient failure re-issues the exact same command after an exponential
//! backoff sleep. The stderr classifier is a best-effort substring heuristic
//! kept for compatibility with observed `wsl.exe` output; deterministic
//! failures (missing binary, bad arguments) never retry.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::errors::{Error, ErrorKind, Result};
use crate::retry::{run_with_retry, RetryError, RetryPolicy};
use crate::runtime::wsl::{build_wsl_command, nonempty_or};
use crate::util::exec::{ExecRequest, Execute};

const TRANSIENT_ERROR_MARKERS: &[&str] = &[
    "connection reset",
    "connection refused",
    "network is unreachable",
    "temporar",
    "timed out",
    "timeout",
    "resource temporarily unavailable",
];

const TRANSIENT_WSL_CONTEXT_MARKERS: &[&str] = &[
    "failed to connect",
    "cannot connect",
    "connection",
    "service unavailable",
];

/// Heuristic transient classification of stderr text (case-insensitive).
/// WSL-context markers only count when "wsl" itself appears in the text.
pub fn is_transient_wsl_error(stderr: &str) -> bool {
    let text = stderr.to_lowercase();
    if TRANSIENT_ERROR_MARKERS.iter().any(|m| text.contains(m)) {
        return true;
    }
    text.contains("wsl") && TRANSIENT_WSL_CONTEXT_MARKERS.iter().any(|m| text.contains(m))
}

#[derive(Debug, Clone)]
pub struct RuntimeResult {
    pub command: Vec<String>,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

type SleepFn = Box<dyn Fn(Duration) + Send + Sync>;

/// Executes commands inside one WSL distribution, retrying transient
/// failures with bounded attempts.
pub struct WslRuntime {
    distribution: String,
    exec: Arc<dyn Execute>,
    timeout: Duration,
    retry: RetryPolicy,
    generation: u64,
    sleep: SleepFn,
}

impl WslRuntime {
    pub fn new(distribution: impl Into<String>, exec: Arc<dyn Execute>) -> Self {
        Self {
            distribution: distribution.into(),
            exec,
            timeout: Duration::from_secs(30),
            retry: RetryPolicy {
                max_attempts: 3,
                initial_backoff: Duration::from_millis(500),
                multiplier: 2.0,
            },
            generation: 0,
            sleep: Box::new(thread::sleep),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// `max_retries` counts retries after the first attempt, so 2 means up
    /// to 3 executions of the same command.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.retry.max_attempts = max_retries + 1;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Replace the backoff sleep, for tests and interruptible shutdown.
    pub fn with_sleep(mut self, sleep: impl Fn(Duration) + Send + Sync + 'static) -> Self {
        self.sleep = Box::new(sleep);
        self
    }

    pub fn distribution(&self) -> &str {
        &self.distribution
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Point at a different distribution. In-flight commands started under
    /// the old generation are not cancelled; callers re-check the target
    /// before issuing new commands.
    pub fn switch_distribution(&mut self, distribution: impl Into<String>) {
        self.distribution = distribution.into();
        self.generation += 1;
        info!(
            distribution = %self.distribution,
            generation = self.generation,
            "switched WSL distribution"
        );
    }

    /// Run `command` inside the distribution. The cancellation predicate is
    /// checked before dispatch only; once a command is running it completes
    /// or times out on its own. Timeout applies per attempt.
    pub fn run(
        &self,
        command: &[String],
        timeout: Option<Duration>,
        cancelled: Option<&dyn Fn() -> bool>,
    ) -> Result<RuntimeResult> {
        if cancelled.is_some_and(|check| check()) {
            warn!("runtime execution cancelled before command start");
            return Err(Error::cancelled("Runtime command was cancelled.")
                .with_hint("Retry the command when ready."));
        }

        let policy = RetryPolicy {
            max_attempts: self.retry.max_attempts.max(1),
            ..self.retry
        };
        let mut attempt = 0u32;
        run_with_retry(
            &policy,
            |backoff| (self.sleep)(backoff),
            || {
                attempt += 1;
                let wrapped = build_wsl_command(&self.distribution, command)
                    .map_err(RetryError::Fatal)?;
                debug!(
                    attempt,
                    total = policy.max_attempts,
                    command = ?wrapped,
                    "running WSL command"
                );
                let out = self
                    .exec
                    .run(
                        ExecRequest::new(wrapped.clone())
                            .timeout(timeout.unwrap_or(self.timeout)),
                    )
                    .map_err(|e| {
                        if e.kind() == ErrorKind::Timeout {
                            error!(command = ?command, "WSL command timed out");
                            RetryError::Fatal(
                                Error::timeout("WSL command timed out.").with_hint(
                                    "Increase timeout or inspect the hanging process.",
                                ),
                            )
                        } else {
                            RetryError::Fatal(e)
                        }
                    })?;

                if out.success() {
                    debug!(attempt, "WSL command succeeded");
                    return Ok(RuntimeResult {
                        command: wrapped,
                        exit_code: out.exit_code,
                        stdout: out.stdout,
                        stderr: out.stderr,
                    });
                }

                let transient = is_transient_wsl_error(&out.stderr);
                warn!(
                    attempt,
                    transient,
                    stderr = %out.stderr.trim(),
                    "WSL command failed"
                );
                let err = Error::runtime("WSL command failed.")
                    .with_hint(nonempty_or(out.stderr.trim(), "Check WSL runtime and retry."));
                if transient {
                    Err(RetryError::Transient(err))
                } else {
                    Err(RetryError::Fatal(err))
                }
            },
        )
    }
}

/// Executor adapter that wraps every command for one distribution. Lets
/// git helpers written against [`Execute`] run inside WSL unchanged.
pub struct DistributionExec {
    distribution: String,
    inner: Arc<dyn Execute>,
}

impl DistributionExec {
    pub fn new(distribution: impl Into<String>, inner: Arc<dyn Execute>) -> Self {
        Self {
            distribution: distribution.into(),
            inner,
        }
    }
}

impl Execute for DistributionExec {
    fn run(&self, request: ExecRequest) -> Result<crate::util::exec::ExecOutput> {
        let wrapped = build_wsl_command(&self.distribution, &request.argv)?;
        let mut inner_request = ExecRequest::new(wrapped);
        inner_request.cwd = request.cwd;
        inner_request.timeout = request.timeout;
        self.inner.run(inner_request)
    }
}
