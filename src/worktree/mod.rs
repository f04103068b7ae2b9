//! Worktree lifecycle manager.
//!
//! Owns a base directory and a cleanup policy; given (pane, repository,
//! branch) assignments it computes deterministic target paths, reuses
//! existing worktrees where the branch already matches, creates new ones,
//! and tears them down. The branch-to-worktree mapping is one-to-one per
//! repository: a branch checked out anywhere outside the managed base is a
//! conflict, never silently detached.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Mutex;

use clap::ValueEnum;
use tracing::{debug, error, info};

use crate::errors::{Error, Result};
use crate::runtime::wsl::nonempty_or;
use crate::util::exec::{ExecOutput, ExecRequest, Execute};
use crate::util::shell_join;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CleanupPolicy {
    /// Worktrees are removed when the session ends.
    #[value(name = "session")]
    Session,
    /// Worktrees survive session end; only explicit rollback removes them.
    #[value(name = "persistent")]
    Persistent,
}

/// One pane's repository/branch binding, produced by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub pane: u32,
    pub repo_path: String,
    pub branch: String,
}

impl Assignment {
    pub fn new(pane: u32, repo_path: impl Into<String>, branch: impl Into<String>) -> Self {
        Self {
            pane,
            repo_path: repo_path.into(),
            branch: branch.into(),
        }
    }
}

/// A provisioned (or reused) worktree, owned by the manager that created it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedWorktree {
    pub pane: u32,
    pub repo_path: String,
    pub branch: String,
    pub path: String,
}

/// How path existence is probed and paths are joined. `Remote` paths live
/// inside the execution target and are checked with `test -e` through the
/// runner; `Host` paths use the local filesystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PathMode {
    Host,
    Remote,
}

#[derive(Debug, Clone, Default)]
pub struct CleanupOptions {
    pub force: bool,
    pub selected: Option<Vec<ManagedWorktree>>,
    pub ignore_policy: bool,
}

impl CleanupOptions {
    pub fn forced() -> Self {
        Self {
            force: true,
            selected: None,
            ignore_policy: false,
        }
    }

    pub fn selected(mut self, selected: Vec<ManagedWorktree>) -> Self {
        self.selected = Some(selected);
        self
    }

    pub fn ignore_policy(mut self) -> Self {
        self.ignore_policy = true;
        self
    }
}

pub struct WorktreeManager {
    base_dir: String,
    mode: PathMode,
    cleanup_policy: CleanupPolicy,
    managed: Mutex<Vec<ManagedWorktree>>,
}

fn sanitize(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut last_dash = false;
    for c in value.chars() {
        if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
            out.push(c);
            last_dash = false;
        } else if !last_dash {
            out.push('-');
            last_dash = true;
        }
    }
    let trimmed = out.trim_matches('-');
    if trimmed.is_empty() {
        "default".to_string()
    } else {
        trimmed.to_string()
    }
}

fn as_posix(value: &str) -> String {
    let mut raw = value.replace('\\', "/");
    while raw.starts_with("//") {
        raw.remove(0);
    }
    raw
}

fn repo_name(repo_path: &str) -> String {
    let posix = as_posix(repo_path);
    let name = posix.trim_end_matches('/').rsplit('/').next().unwrap_or("");
    sanitize(name)
}

fn expected_branch_ref(branch: &str) -> String {
    if branch.starts_with("refs/heads/") {
        branch.to_string()
    } else {
        format!("refs/heads/{branch}")
    }
}

impl WorktreeManager {
    /// Manager for worktrees on the local filesystem. The base directory is
    /// created eagerly.
    pub fn new_host(base_dir: impl Into<String>, cleanup_policy: CleanupPolicy) -> Result<Self> {
        let base_dir = base_dir.into();
        std::fs::create_dir_all(&base_dir).map_err(|e| {
            Error::runtime(format!("Failed to create worktree base {base_dir}: {e}"))
                .with_hint("Check filesystem permissions for the base directory.")
        })?;
        Ok(Self {
            base_dir,
            mode: PathMode::Host,
            cleanup_policy,
            managed: Mutex::new(Vec::new()),
        })
    }

    /// Manager for worktrees living inside the execution target; all
    /// filesystem probes go through the command runner.
    pub fn new_remote(base_dir: impl Into<String>, cleanup_policy: CleanupPolicy) -> Self {
        Self {
            base_dir: as_posix(&base_dir.into()),
            mode: PathMode::Remote,
            cleanup_policy,
            managed: Mutex::new(Vec::new()),
        }
    }

    pub fn base_dir(&self) -> &str {
        &self.base_dir
    }

    pub fn cleanup_policy(&self) -> CleanupPolicy {
        self.cleanup_policy
    }

    /// Snapshot of the managed set.
    pub fn managed(&self) -> Vec<ManagedWorktree> {
        self.managed.lock().expect("managed lock poisoned").clone()
    }

    fn command_path(&self, value: &str) -> String {
        match self.mode {
            PathMode::Remote => as_posix(value),
            PathMode::Host => value.to_string(),
        }
    }

    fn join(&self, base: &str, segment: &str) -> String {
        match self.mode {
            PathMode::Remote => format!("{}/{}", base.trim_end_matches('/'), segment),
            PathMode::Host => Path::new(base).join(segment).display().to_string(),
        }
    }

    /// Deterministic target path for an assignment:
    /// `<base>/<repo-name>/pane-<pane>-<branch>`. Pure; same inputs always
    /// produce the same path, which is what makes reuse detection work
    /// without a persisted index.
    pub fn build_worktree_path(&self, assignment: &Assignment) -> String {
        let repo = repo_name(&assignment.repo_path);
        let branch = sanitize(&assignment.branch);
        let repo_dir = self.join(&self.base_dir, &repo);
        self.join(&repo_dir, &format!("pane-{}-{}", assignment.pane, branch))
    }

    fn is_under_base_dir(&self, path: &str) -> bool {
        match self.mode {
            PathMode::Remote => {
                let base = as_posix(&self.base_dir);
                let base = base.trim_end_matches('/');
                let candidate = as_posix(path);
                candidate == base || candidate.starts_with(&format!("{base}/"))
            }
            PathMode::Host => {
                let base = match std::fs::canonicalize(&self.base_dir) {
                    Ok(p) => p,
                    Err(_) => Path::new(&self.base_dir).to_path_buf(),
                };
                let candidate = std::fs::canonicalize(path)
                    .unwrap_or_else(|_| Path::new(path).to_path_buf());
                candidate.starts_with(&base)
            }
        }
    }

    fn run(&self, argv: Vec<String>, exec: &dyn Execute) -> Result<ExecOutput> {
        exec.run(ExecRequest::new(argv))
    }

    /// Where, if anywhere, is this branch already checked out? Parses
    /// `git worktree list --porcelain`; a failing lookup is treated as
    /// "no result" rather than an error, because creation will surface any
    /// real repository problem with better context.
    fn worktree_path_for_branch(
        &self,
        assignment: &Assignment,
        exec: &dyn Execute,
    ) -> Result<Option<String>> {
        let out = self.run(
            vec![
                "git".into(),
                "-C".into(),
                self.command_path(&assignment.repo_path),
                "worktree".into(),
                "list".into(),
                "--porcelain".into(),
            ],
            exec,
        )?;
        if !out.success() {
            debug!(
                pane = assignment.pane,
                repo = %assignment.repo_path,
                "skipping branch-in-use lookup due to command failure"
            );
            return Ok(None);
        }

        let expected_ref = expected_branch_ref(&assignment.branch);
        let mut current_worktree = String::new();
        for raw_line in out.stdout.lines() {
            let line = raw_line.trim();
            if line.is_empty() {
                continue;
            }
            if let Some(path) = line.strip_prefix("worktree ") {
                current_worktree = path.trim().to_string();
                continue;
            }
            if let Some(branch_ref) = line.strip_prefix("branch ") {
                if !current_worktree.is_empty() && branch_ref.trim() == expected_ref {
                    return Ok(Some(current_worktree));
                }
            }
        }
        Ok(None)
    }

    fn path_exists(&self, path: &str, exec: &dyn Execute) -> Result<bool> {
        match self.mode {
            PathMode::Remote => {
                let probe = shell_join(&[
                    "test".to_string(),
                    "-e".to_string(),
                    self.command_path(path),
                ]);
                let out = self.run(vec!["bash".into(), "-lc".into(), probe], exec)?;
                Ok(out.success())
            }
            PathMode::Host => Ok(Path::new(path).exists()),
        }
    }

    fn existing_worktree_branch(&self, path: &str, exec: &dyn Execute) -> Result<String> {
        let out = self.run(
            vec![
                "git".into(),
                "-C".into(),
                self.command_path(path),
                "rev-parse".into(),
                "--abbrev-ref".into(),
                "HEAD".into(),
            ],
            exec,
        )?;
        if !out.success() {
            return Ok(String::new());
        }
        Ok(out.stdout.trim().to_string())
    }

    fn record(&self, managed: ManagedWorktree) -> ManagedWorktree {
        self.managed
            .lock()
            .expect("managed lock poisoned")
            .push(managed.clone());
        managed
    }

    /// Provision or reuse the worktree for one assignment. The result is
    /// recorded in the managed set before returning so a later failure
    /// elsewhere can still roll it back.
    pub fn add_worktree(
        &self,
        assignment: &Assignment,
        exec: &dyn Execute,
    ) -> Result<ManagedWorktree> {
        let target = self.build_worktree_path(assignment);
        debug!(
            pane = assignment.pane,
            repo = %assignment.repo_path,
            branch = %assignment.branch,
            target = %target,
            "adding worktree"
        );

        if let Some(in_use) = self.worktree_path_for_branch(assignment, exec)? {
            if self.is_under_base_dir(&in_use) {
                if self.path_exists(&in_use, exec)? {
                    info!(
                        pane = assignment.pane,
                        branch = %assignment.branch,
                        existing = %in_use,
                        "reusing existing branch worktree"
                    );
                    return Ok(self.record(ManagedWorktree {
                        pane: assignment.pane,
                        repo_path: assignment.repo_path.clone(),
                        branch: assignment.branch.clone(),
                        path: in_use,
                    }));
                }
            } else {
                error!(
                    pane = assignment.pane,
                    branch = %assignment.branch,
                    path = %in_use,
                    "branch already checked out outside managed base"
                );
                return Err(Error::conflict(format!(
                    "Branch '{}' is already checked out by another worktree.",
                    assignment.branch
                ))
                .with_hint(format!(
                    "Existing path: {in_use}. Close that worktree or choose a different branch."
                )));
            }
        }

        if self.path_exists(&target, exec)? {
            let existing_branch = self.existing_worktree_branch(&target, exec)?;
            if existing_branch == assignment.branch {
                info!(
                    pane = assignment.pane,
                    target = %target,
                    branch = %assignment.branch,
                    "reusing existing worktree"
                );
                return Ok(self.record(ManagedWorktree {
                    pane: assignment.pane,
                    repo_path: assignment.repo_path.clone(),
                    branch: assignment.branch.clone(),
                    path: target,
                }));
            }
            if !existing_branch.is_empty() {
                error!(
                    pane = assignment.pane,
                    target = %target,
                    expected = %assignment.branch,
                    actual = %existing_branch,
                    "existing worktree branch mismatch"
                );
                return Err(Error::git(format!(
                    "Worktree path already exists for pane {}",
                    assignment.pane
                ))
                .with_hint(format!(
                    "Existing branch is '{existing_branch}'. Cleanup the old worktree or select another branch."
                )));
            }
        }

        // Prepare the parent directory.
        match self.mode {
            PathMode::Remote => {
                let parent = match target.rsplit_once('/') {
                    Some((parent, _)) => parent.to_string(),
                    None => self.base_dir.clone(),
                };
                let out = self.run(vec!["mkdir".into(), "-p".into(), parent], exec)?;
                if !out.success() {
                    error!(
                        pane = assignment.pane,
                        stderr = %out.stderr.trim(),
                        "failed to create worktree parent"
                    );
                    return Err(Error::git(format!(
                        "Failed to prepare worktree parent for pane {}",
                        assignment.pane
                    ))
                    .with_hint(nonempty_or(
                        out.stderr.trim(),
                        "Check filesystem permissions inside the distribution.",
                    )));
                }
            }
            PathMode::Host => {
                if let Some(parent) = Path::new(&target).parent() {
                    std::fs::create_dir_all(parent).map_err(|e| {
                        Error::git(format!(
                            "Failed to prepare worktree parent for pane {}",
                            assignment.pane
                        ))
                        .with_hint(e.to_string())
                    })?;
                }
            }
        }

        let cmd = vec![
            "git".to_string(),
            "-C".to_string(),
            self.command_path(&assignment.repo_path),
            "worktree".to_string(),
            "add".to_string(),
            self.command_path(&target),
            assignment.branch.clone(),
        ];
        let out = self.run(cmd.clone(), exec)?;
        if !out.success() {
            error!(
                pane = assignment.pane,
                cmd = ?cmd,
                stderr = %out.stderr.trim(),
                "git worktree add failed"
            );
            return Err(Error::git(format!(
                "Failed to create worktree for pane {}",
                assignment.pane
            ))
            .with_hint(nonempty_or(
                out.stderr.trim(),
                "Check branch existence and repo health.",
            )));
        }

        Ok(self.record(ManagedWorktree {
            pane: assignment.pane,
            repo_path: assignment.repo_path.clone(),
            branch: assignment.branch.clone(),
            path: target,
        }))
    }

    /// Provision all assignments, always in pane order regardless of the
    /// caller's ordering, so batch failures are deterministic.
    pub fn materialize(
        &self,
        assignments: &[Assignment],
        exec: &dyn Execute,
    ) -> Result<Vec<ManagedWorktree>> {
        debug!(count = assignments.len(), "materializing worktree assignments");
        let mut ordered: Vec<&Assignment> = assignments.iter().collect();
        ordered.sort_by_key(|a| a.pane);
        let mut created = Vec::with_capacity(ordered.len());
        for assignment in ordered {
            created.push(self.add_worktree(assignment, exec)?);
        }
        Ok(created)
    }

    /// True iff `git status --porcelain` reports changes. A failing status
    /// query is an error, never "not dirty".
    pub fn check_dirty(&self, worktree: &ManagedWorktree, exec: &dyn Execute) -> Result<bool> {
        let out = self.run(
            vec![
                "git".into(),
                "-C".into(),
                self.command_path(&worktree.path),
                "status".into(),
                "--porcelain".into(),
            ],
            exec,
        )?;
        if !out.success() {
            error!(path = %worktree.path, stderr = %out.stderr.trim(), "dirty check failed");
            return Err(
                Error::git(format!("Dirty check failed for {}", worktree.path))
                    .with_hint(nonempty_or(out.stderr.trim(), "Run git status manually.")),
            );
        }
        let dirty = !out.stdout.trim().is_empty();
        debug!(path = %worktree.path, dirty, "dirty check");
        Ok(dirty)
    }

    /// Remove worktrees. A persistent policy makes this a no-op unless
    /// `ignore_policy` is set (rollback must clean up regardless of the
    /// user's steady-state preference). Targets are deduplicated by path;
    /// the first removal failure propagates immediately. Successfully
    /// removed entries leave the managed set.
    pub fn cleanup(&self, exec: &dyn Execute, options: CleanupOptions) -> Result<Vec<String>> {
        if self.cleanup_policy == CleanupPolicy::Persistent && !options.ignore_policy {
            debug!("cleanup skipped due to persistent policy");
            return Ok(Vec::new());
        }

        let targets = options.selected.unwrap_or_else(|| self.managed());
        let mut removed = Vec::new();
        let mut seen: BTreeSet<String> = BTreeSet::new();
        for managed in targets {
            let managed_path = self.command_path(&managed.path);
            if !seen.insert(managed_path.clone()) {
                continue;
            }
            let mut cmd = vec![
                "git".to_string(),
                "-C".to_string(),
                self.command_path(&managed.repo_path),
                "worktree".to_string(),
                "remove".to_string(),
            ];
            if options.force {
                cmd.push("--force".to_string());
            }
            cmd.push(managed_path.clone());
            let out = self.run(cmd, exec)?;
            if !out.success() {
                error!(path = %managed.path, stderr = %out.stderr.trim(), "cleanup failed");
                return Err(
                    Error::git(format!("Cleanup failed for {}", managed.path)).with_hint(
                        nonempty_or(out.stderr.trim(), "Resolve worktree state and retry."),
                    ),
                );
            }
            self.managed
                .lock()
                .expect("managed lock poisoned")
                .retain(|w| w.path != managed.path);
            removed.push(managed.path.clone());
            debug!(path = %managed.path, "removed worktree");
        }
        Ok(removed)
    }
}
