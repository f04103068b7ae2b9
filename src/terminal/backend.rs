//! Backend session attachment boundary.
//!
//! The service only needs start/stop with errors it can tell apart:
//! a session that was never there is not the same failure as one that
//! refused to die. [`ProcessBackend`] is the process-spawning
//! implementation; tests plug in fakes.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::sync::Mutex;

use tracing::{debug, warn};

use crate::errors::Error;
use crate::terminal::models::RuntimeKind;

#[derive(Debug)]
pub enum BackendError {
    /// No session is attached for this terminal id.
    NotFound(String),
    /// The session could not be created.
    StartFailed(String),
    /// The session exists but could not be torn down.
    StopFailed(String),
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendError::NotFound(id) => write!(f, "no session attached for terminal '{id}'"),
            BackendError::StartFailed(msg) => write!(f, "failed to start session: {msg}"),
            BackendError::StopFailed(msg) => write!(f, "failed to stop session: {msg}"),
        }
    }
}

impl std::error::Error for BackendError {}

impl From<BackendError> for Error {
    fn from(e: BackendError) -> Self {
        match &e {
            BackendError::NotFound(_) => {
                Error::validation(e.to_string()).with_hint("Select an attached terminal.")
            }
            BackendError::StartFailed(_) => {
                Error::runtime(e.to_string()).with_hint("Check the runtime shell installation.")
            }
            BackendError::StopFailed(_) => {
                Error::runtime(e.to_string()).with_hint("Inspect the session process manually.")
            }
        }
    }
}

/// PTY/remote shell attachment seam.
pub trait SessionBackend: Send + Sync {
    fn start(
        &self,
        terminal_id: &str,
        runtime: RuntimeKind,
        cwd: Option<&str>,
    ) -> Result<(), BackendError>;
    fn stop(&self, terminal_id: &str) -> Result<(), BackendError>;
}

/// Shell invocation for a runtime kind.
pub fn build_shell_command(runtime: RuntimeKind, wsl_distribution: &str) -> Vec<String> {
    match runtime {
        RuntimeKind::Wsl => {
            let dist = wsl_distribution.trim();
            if dist.is_empty() {
                vec!["wsl.exe".to_string()]
            } else {
                vec!["wsl.exe".to_string(), "-d".to_string(), dist.to_string()]
            }
        }
        RuntimeKind::PowerShell => vec![
            "powershell.exe".to_string(),
            "-NoLogo".to_string(),
            "-NoProfile".to_string(),
        ],
    }
}

/// Child-process backend: each terminal id owns at most one spawned shell.
pub struct ProcessBackend {
    wsl_distribution: String,
    children: Mutex<HashMap<String, Child>>,
}

impl ProcessBackend {
    pub fn new(wsl_distribution: impl Into<String>) -> Self {
        Self {
            wsl_distribution: wsl_distribution.into(),
            children: Mutex::new(HashMap::new()),
        }
    }

    fn stop_all(&self) {
        let mut children = self.children.lock().expect("backend lock poisoned");
        for (id, child) in children.iter_mut() {
            debug!(terminal_id = %id, "killing backend session at shutdown");
            let _ = child.kill();
            let _ = child.wait();
        }
        children.clear();
    }
}

impl Drop for ProcessBackend {
    fn drop(&mut self) {
        self.stop_all();
    }
}

impl SessionBackend for ProcessBackend {
    fn start(
        &self,
        terminal_id: &str,
        runtime: RuntimeKind,
        cwd: Option<&str>,
    ) -> Result<(), BackendError> {
        {
            let children = self.children.lock().expect("backend lock poisoned");
            if children.contains_key(terminal_id) {
                return Err(BackendError::StartFailed(format!(
                    "terminal already started: {terminal_id}"
                )));
            }
        }

        let argv = build_shell_command(runtime, &self.wsl_distribution);
        let mut cmd = Command::new(&argv[0]);
        cmd.args(&argv[1..])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        if let Some(dir) = cwd.filter(|d| !d.is_empty() && Path::new(d).exists()) {
            cmd.current_dir(dir);
        }

        let child = cmd
            .spawn()
            .map_err(|e| BackendError::StartFailed(format!("{}: {e}", argv[0])))?;
        debug!(terminal_id, runtime = runtime.as_str(), "attached backend session");
        self.children
            .lock()
            .expect("backend lock poisoned")
            .insert(terminal_id.to_string(), child);
        Ok(())
    }

    fn stop(&self, terminal_id: &str) -> Result<(), BackendError> {
        let mut child = {
            let mut children = self.children.lock().expect("backend lock poisoned");
            children
                .remove(terminal_id)
                .ok_or_else(|| BackendError::NotFound(terminal_id.to_string()))?
        };
        if let Err(e) = child.kill() {
            warn!(terminal_id, error = %e, "failed to kill backend session");
            return Err(BackendError::StopFailed(e.to_string()));
        }
        let _ = child.wait();
        debug!(terminal_id, "detached backend session");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shell_command_per_runtime() {
        assert_eq!(
            build_shell_command(RuntimeKind::Wsl, "Ubuntu"),
            vec!["wsl.exe", "-d", "Ubuntu"]
        );
        assert_eq!(build_shell_command(RuntimeKind::Wsl, "  "), vec!["wsl.exe"]);
        assert_eq!(
            build_shell_command(RuntimeKind::PowerShell, ""),
            vec!["powershell.exe", "-NoLogo", "-NoProfile"]
        );
    }

    #[test]
    fn stop_without_start_is_not_found() {
        let backend = ProcessBackend::new("Ubuntu");
        match backend.stop("t1") {
            Err(BackendError::NotFound(id)) => assert_eq!(id, "t1"),
            other => panic!("expected NotFound, got {other:?}"),
        }
    }
}
