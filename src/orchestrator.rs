//! End-to-end orchestration from runtime selections to a running tmux
//! session.
//!
//! Steps run in a fixed order: validate the distribution, bootstrap tmux,
//! materialize remote branches, provision worktrees, then issue the layout
//! commands. Any failure after the first worktree exists rolls back the
//! worktrees created during this run, regardless of the cleanup policy.

use std::sync::Mutex;

use tracing::{debug, error, warn};

use crate::errors::{Error, Result};
use crate::git::materialize::materialize_remote_branch;
use crate::runtime::wsl::{build_wsl_command, nonempty_or, validate_distribution};
use crate::tmux::bootstrap::ensure_tmux;
use crate::tmux::layouts::{build_layout_commands, Layout};
use crate::util::exec::{ExecOutput, ExecRequest, Execute};
use crate::worktree::{
    Assignment, CleanupOptions, CleanupPolicy, ManagedWorktree, WorktreeManager,
};

/// Step-level progress sink for a UI or log panel.
pub trait ProgressReporter: Send + Sync {
    fn record_started(&self, step: &str, message: &str);
    fn record_success(&self, step: &str, message: &str);
    fn record_error(&self, step: &str, message: &str);
}

/// Reporter that drops everything; used when no panel is attached.
pub struct NullProgress;

impl ProgressReporter for NullProgress {
    fn record_started(&self, _step: &str, _message: &str) {}
    fn record_success(&self, _step: &str, _message: &str) {}
    fn record_error(&self, _step: &str, _message: &str) {}
}

#[derive(Debug, Clone)]
pub struct OrchestrationRequest {
    pub distribution: String,
    pub available_distributions: Vec<String>,
    pub layout: Layout,
    pub cleanup_policy: CleanupPolicy,
    pub assignments: Vec<Assignment>,
    pub worktree_base: String,
    pub session_name: String,
    pub tmux_auto_install: bool,
}

#[derive(Debug, Clone)]
pub struct OrchestrationResult {
    pub worktrees: Vec<ManagedWorktree>,
    pub executed_commands: Vec<Vec<String>>,
}

/// Executor that wraps every command for the selected distribution and
/// records the wrapped form. Git and tmux steps all go through this so the
/// executed-command log matches what actually ran.
struct WslRecordingExec<'a> {
    distribution: String,
    inner: &'a dyn Execute,
    executed: Mutex<Vec<Vec<String>>>,
}

impl<'a> WslRecordingExec<'a> {
    fn new(distribution: &str, inner: &'a dyn Execute) -> Self {
        Self {
            distribution: distribution.to_string(),
            inner,
            executed: Mutex::new(Vec::new()),
        }
    }

    fn executed(&self) -> Vec<Vec<String>> {
        self.executed.lock().expect("executed lock poisoned").clone()
    }
}

impl Execute for WslRecordingExec<'_> {
    fn run(&self, request: ExecRequest) -> Result<ExecOutput> {
        let wrapped = build_wsl_command(&self.distribution, &request.argv)?;
        debug!(command = ?wrapped, "running command via WSL");
        self.executed
            .lock()
            .expect("executed lock poisoned")
            .push(wrapped.clone());
        let mut inner_request = ExecRequest::new(wrapped);
        inner_request.cwd = request.cwd;
        inner_request.timeout = request.timeout;
        self.inner.run(inner_request)
    }
}

fn validate_assignments(assignments: &[Assignment]) -> Result<()> {
    if assignments.is_empty() {
        return Err(Error::validation("No pane assignments were provided.")
            .with_hint("Assign at least two panes before orchestration."));
    }
    let mut panes: Vec<u32> = assignments.iter().map(|a| a.pane).collect();
    panes.sort_unstable();
    for pair in panes.windows(2) {
        if pair[0] == pair[1] {
            return Err(
                Error::validation(format!("Duplicate pane assignment: {}", pair[0]))
                    .with_hint("Each pane index may be assigned once."),
            );
        }
    }
    Ok(())
}

pub fn orchestrate(
    request: &OrchestrationRequest,
    exec: &dyn Execute,
    progress: &dyn ProgressReporter,
    manager: Option<&WorktreeManager>,
) -> Result<OrchestrationResult> {
    debug!(
        distribution = %request.distribution,
        layout = request.layout.as_str(),
        cleanup = ?request.cleanup_policy,
        panes = request.assignments.len(),
        "starting orchestration"
    );

    validate_assignments(&request.assignments)?;

    if !validate_distribution(&request.distribution, &request.available_distributions) {
        error!(distribution = %request.distribution, "invalid WSL distribution selected");
        return Err(
            Error::runtime(format!("Invalid WSL distribution: {}", request.distribution))
                .with_hint("Re-open WSL selection and choose a discovered distribution."),
        );
    }

    progress.record_started("tmux-bootstrap", "Checking tmux availability");
    ensure_tmux(&request.distribution, request.tmux_auto_install, exec)?;
    progress.record_success("tmux-bootstrap", "tmux is available");
    debug!(distribution = %request.distribution, "tmux available");

    let owned_manager;
    let worktree_manager = match manager {
        Some(m) => m,
        None => {
            owned_manager =
                WorktreeManager::new_remote(request.worktree_base.clone(), request.cleanup_policy);
            &owned_manager
        }
    };

    let wsl_exec = WslRecordingExec::new(&request.distribution, exec);

    progress.record_started("branch-materialize", "Preparing selected remote branches");
    let mut normalized: Vec<Assignment> = Vec::with_capacity(request.assignments.len());
    let mut ordered: Vec<&Assignment> = request.assignments.iter().collect();
    ordered.sort_by_key(|a| a.pane);
    for assignment in ordered {
        let local_branch = if assignment.branch.starts_with("origin/") {
            debug!(
                pane = assignment.pane,
                repo = %assignment.repo_path,
                branch = %assignment.branch,
                "materializing remote branch"
            );
            materialize_remote_branch(&assignment.repo_path, &assignment.branch, &wsl_exec)?
        } else {
            assignment.branch.clone()
        };
        normalized.push(Assignment::new(
            assignment.pane,
            assignment.repo_path.clone(),
            local_branch,
        ));
    }
    progress.record_success("branch-materialize", "Remote branches are ready");
    debug!(count = normalized.len(), "prepared pane assignments");

    // Rollback targets are the worktrees recorded during this run only;
    // pre-existing managed worktrees are left alone.
    let before: Vec<String> = worktree_manager
        .managed()
        .iter()
        .map(|w| w.path.clone())
        .collect();

    let outcome =
        run_worktree_and_layout(request, worktree_manager, &wsl_exec, progress, &normalized);
    match outcome {
        Ok(worktrees) => Ok(OrchestrationResult {
            worktrees,
            executed_commands: wsl_exec.executed(),
        }),
        Err(err) => {
            let created: Vec<ManagedWorktree> = worktree_manager
                .managed()
                .into_iter()
                .filter(|w| !before.contains(&w.path))
                .collect();
            if !created.is_empty() {
                match worktree_manager.cleanup(
                    &wsl_exec,
                    CleanupOptions::forced()
                        .selected(created)
                        .ignore_policy(),
                ) {
                    Ok(removed) => {
                        warn!(removed = removed.len(), "orchestration rollback removed worktrees")
                    }
                    Err(cleanup_error) => {
                        error!(error = %cleanup_error, "orchestration rollback cleanup failed")
                    }
                }
            }
            Err(err)
        }
    }
}

fn run_worktree_and_layout(
    request: &OrchestrationRequest,
    worktree_manager: &WorktreeManager,
    wsl_exec: &WslRecordingExec<'_>,
    progress: &dyn ProgressReporter,
    assignments: &[Assignment],
) -> Result<Vec<ManagedWorktree>> {
    progress.record_started("worktree", "Creating worktrees for pane assignments");
    let worktrees = worktree_manager.materialize(assignments, wsl_exec)?;
    progress.record_success("worktree", &format!("Created {} worktrees", worktrees.len()));
    debug!(count = worktrees.len(), "created worktrees");

    let mut ordered = worktrees.clone();
    ordered.sort_by_key(|w| w.pane);
    let pane_paths: Vec<String> = ordered.iter().map(|w| w.path.clone()).collect();
    let tmux_commands = build_layout_commands(&request.session_name, request.layout, &pane_paths)?;

    progress.record_started("tmux-layout", "Starting tmux session");
    for command in &tmux_commands {
        let result = wsl_exec.run(ExecRequest::new(command.clone()))?;
        if result.success() {
            continue;
        }

        let mut stderr = result.stderr.trim().to_string();
        let is_duplicate_new_session = command.len() >= 2
            && command[0] == "tmux"
            && command[1] == "new-session"
            && stderr.to_lowercase().contains("duplicate session");
        if is_duplicate_new_session {
            warn!(
                session = %request.session_name,
                "tmux session already exists; replacing existing session"
            );
            let kill = wsl_exec.run(ExecRequest::new(vec![
                "tmux".to_string(),
                "kill-session".to_string(),
                "-t".to_string(),
                request.session_name.clone(),
            ]))?;
            if kill.success() {
                let retried = wsl_exec.run(ExecRequest::new(command.clone()))?;
                if retried.success() {
                    continue;
                }
                stderr = retried.stderr.trim().to_string();
            } else {
                let kill_error =
                    nonempty_or(kill.stderr.trim(), "tmux kill-session failed");
                stderr = if stderr.is_empty() {
                    kill_error
                } else {
                    format!("{stderr}; cleanup failed: {kill_error}")
                };
            }
        }

        progress.record_error("tmux-layout", &nonempty_or(&stderr, "tmux command failed"));
        error!(command = ?command, stderr = %stderr, "tmux command failed");
        return Err(Error::tmux("Failed to initialize tmux session.")
            .with_hint(nonempty_or(&stderr, "Inspect tmux output and retry.")));
    }

    progress.record_success("tmux-layout", "tmux session ready");
    debug!("orchestration finished successfully");
    Ok(worktrees)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_panes_are_rejected() {
        let assignments = vec![
            Assignment::new(0, "/repo", "main"),
            Assignment::new(0, "/repo", "dev"),
        ];
        let err = validate_assignments(&assignments).unwrap_err();
        assert_eq!(err.kind(), crate::errors::ErrorKind::Validation);
        assert!(err.message().contains("Duplicate pane"));
    }

    #[test]
    fn empty_assignments_are_rejected() {
        assert!(validate_assignments(&[]).is_err());
        assert!(validate_assignments(&[Assignment::new(1, "/r", "main")]).is_ok());
    }
}
