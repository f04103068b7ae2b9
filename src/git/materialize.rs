//! Remote branch materialization: create a local branch tracking a
//! remote-only reference. Idempotent — an already-materialized branch
//! returns the same name without touching the repository.

use std::sync::Arc;

use tracing::{debug, error};

use crate::errors::{Error, Result};
use crate::runtime::wsl::nonempty_or;
use crate::util::exec::{ExecRequest, Execute};

/// Collaborator seam for the terminal service and orchestrator.
pub trait BranchMaterializer: Send + Sync {
    fn materialize(&self, repo_path: &str, remote_branch: &str) -> Result<String>;
}

fn repo_arg(repo_path: &str) -> String {
    let normalized = repo_path.replace('\\', "/");
    match normalized.strip_prefix("//mnt/") {
        Some(rest) => format!("/mnt/{rest}"),
        None => normalized,
    }
}

/// `origin/feature-x` → `feature-x`. Names without a remote prefix are
/// rejected rather than guessed at.
pub fn local_branch_name(remote_branch: &str) -> Result<String> {
    match remote_branch.split_once('/') {
        Some((_, local)) if !local.is_empty() => Ok(local.to_string()),
        _ => Err(
            Error::validation(format!("Invalid remote branch format: {remote_branch}"))
                .with_hint("Use branch names like origin/feature-x."),
        ),
    }
}

fn run_git(repo: &str, args: &[&str], exec: &dyn Execute) -> Result<crate::util::exec::ExecOutput> {
    let mut argv = vec!["git".to_string(), "-C".to_string(), repo.to_string()];
    argv.extend(args.iter().map(|s| s.to_string()));
    exec.run(ExecRequest::new(argv))
}

pub fn materialize_remote_branch(
    repo_path: &str,
    remote_branch: &str,
    exec: &dyn Execute,
) -> Result<String> {
    let repo = repo_arg(repo_path);
    let local_branch = local_branch_name(remote_branch)?;
    debug!(repo = %repo, remote = remote_branch, local = %local_branch, "materializing remote branch");

    let exists = run_git(&repo, &["branch", "--list", &local_branch], exec)?;
    if !exists.success() {
        error!(repo = %repo, stderr = %exists.stderr.trim(), "failed to check local branch existence");
        return Err(Error::git("Failed to check local branch existence.").with_hint(
            nonempty_or(exists.stderr.trim(), "Inspect repository branch state."),
        ));
    }
    if !exists.stdout.trim().is_empty() {
        debug!(repo = %repo, branch = %local_branch, "local branch already exists");
        return Ok(local_branch);
    }

    let create = run_git(&repo, &["branch", "--track", &local_branch, remote_branch], exec)?;
    if create.success() {
        debug!(repo = %repo, branch = %local_branch, "created local tracking branch");
        return Ok(local_branch);
    }

    error!(
        repo = %repo,
        remote = remote_branch,
        stderr = %create.stderr.trim(),
        "failed to create tracking branch"
    );
    Err(
        Error::git(format!("Failed to materialize remote branch {remote_branch}.")).with_hint(
            nonempty_or(
                create.stderr.trim(),
                "Check remote branch existence and tracking permissions.",
            ),
        ),
    )
}

/// Process-backed materializer used outside tests.
pub struct GitMaterializer {
    exec: Arc<dyn Execute>,
}

impl GitMaterializer {
    pub fn new(exec: Arc<dyn Execute>) -> Self {
        Self { exec }
    }
}

impl BranchMaterializer for GitMaterializer {
    fn materialize(&self, repo_path: &str, remote_branch: &str) -> Result<String> {
        materialize_remote_branch(repo_path, remote_branch, self.exec.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_remote_prefix() {
        assert_eq!(local_branch_name("origin/feature-x").unwrap(), "feature-x");
        assert_eq!(
            local_branch_name("origin/team/nested").unwrap(),
            "team/nested"
        );
    }

    #[test]
    fn rejects_names_without_remote() {
        assert!(local_branch_name("main").is_err());
        assert!(local_branch_name("origin/").is_err());
    }

    #[test]
    fn normalizes_doubled_mnt_prefix() {
        assert_eq!(repo_arg("//mnt/c/repo"), "/mnt/c/repo");
        assert_eq!(repo_arg("C:\\work\\repo"), "C:/work/repo");
        assert_eq!(repo_arg("/home/u/repo"), "/home/u/repo");
    }
}
