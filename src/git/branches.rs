//! Branch listing with degrade mode: when the remote fetch fails we fall
//! back to local branches plus a warning instead of failing the whole flow.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::errors::{Error, Result};
use crate::runtime::wsl::nonempty_or;
use crate::util::exec::{ExecOutput, ExecRequest, Execute};

/// Combined local + remote branch view for one repository.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BranchSet {
    pub local: Vec<String>,
    pub remote: Vec<String>,
    pub warning: String,
}

/// Collaborator seam consumed by the terminal service.
pub trait BranchProvider: Send + Sync {
    fn branches(&self, repo_path: &str) -> Result<BranchSet>;
}

fn run_git(repo: &str, args: &[&str], exec: &dyn Execute) -> Result<ExecOutput> {
    let mut argv = vec!["git".to_string(), "-C".to_string(), repo.to_string()];
    argv.extend(args.iter().map(|s| s.to_string()));
    exec.run(ExecRequest::new(argv))
}

/// Local branches, sorted. Errors when the path is not a repository, when
/// listing fails, or when the repository has no branches at all. A detached
/// HEAD only degrades to a warning.
pub fn list_local_branches(repo_path: &str, exec: &dyn Execute) -> Result<(Vec<String>, String)> {
    debug!(repo = repo_path, "listing local branches");

    let inside = run_git(repo_path, &["rev-parse", "--is-inside-work-tree"], exec)?;
    if !inside.success() {
        error!(repo = repo_path, "repository is not accessible");
        return Err(
            Error::git(format!("Repository is not accessible: {repo_path}"))
                .with_hint("Check the path and ensure it is a valid Git repository."),
        );
    }

    let detached = run_git(repo_path, &["symbolic-ref", "--short", "-q", "HEAD"], exec)?;
    let warning = if detached.success() {
        String::new()
    } else {
        warn!(repo = repo_path, "detached HEAD detected");
        "Detached HEAD detected. Branch operations may be limited.".to_string()
    };

    let listing = run_git(repo_path, &["branch", "--format=%(refname:short)"], exec)?;
    if !listing.success() {
        error!(repo = repo_path, stderr = %listing.stderr.trim(), "failed to list local branches");
        return Err(
            Error::git(format!("Failed to list local branches for {repo_path}"))
                .with_hint("Run `git branch` manually to inspect repository state."),
        );
    }

    let branches: BTreeSet<String> = listing
        .stdout
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect();
    if branches.is_empty() {
        error!(repo = repo_path, "no local branches found");
        return Err(Error::git("No local branches found.")
            .with_hint("Create an initial commit and at least one branch."));
    }
    Ok((branches.into_iter().collect(), warning))
}

fn normalize_remote_branches(raw: &str) -> Vec<String> {
    let set: BTreeSet<String> = raw
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.contains("->"))
        .map(str::to_string)
        .collect();
    set.into_iter().collect()
}

/// Fetch with prune, then list local and remote branches. Fetch failure is
/// not fatal; it downgrades to a local-only listing with a warning.
pub fn fetch_and_list(repo_path: &str, exec: &dyn Execute) -> Result<BranchSet> {
    debug!(repo = repo_path, "fetching and listing branches");
    let (local, local_warning) = list_local_branches(repo_path, exec)?;

    let fetch = run_git(repo_path, &["fetch", "--prune"], exec)?;
    if !fetch.success() {
        warn!(repo = repo_path, stderr = %fetch.stderr.trim(), "remote fetch failed");
        return Ok(BranchSet {
            local,
            remote: Vec::new(),
            warning: "Remote fetch failed; showing local branches only.".to_string(),
        });
    }

    let remote_listing = run_git(repo_path, &["branch", "-r", "--format=%(refname:short)"], exec)?;
    if !remote_listing.success() {
        error!(repo = repo_path, stderr = %remote_listing.stderr.trim(), "failed to list remote branches");
        return Err(Error::git("Failed to list remote branches.").with_hint(nonempty_or(
            remote_listing.stderr.trim(),
            "Check remote configuration.",
        )));
    }

    let remote = normalize_remote_branches(&remote_listing.stdout);
    debug!(repo = repo_path, count = remote.len(), "discovered remote branches");
    Ok(BranchSet {
        local,
        remote,
        warning: local_warning,
    })
}

/// Process-backed provider used outside tests.
pub struct GitBranchProvider {
    exec: Arc<dyn Execute>,
}

impl GitBranchProvider {
    pub fn new(exec: Arc<dyn Execute>) -> Self {
        Self { exec }
    }
}

impl BranchProvider for GitBranchProvider {
    fn branches(&self, repo_path: &str) -> Result<BranchSet> {
        fetch_and_list(repo_path, self.exec.as_ref())
    }
}
