use clap::{Parser, Subcommand};

use crate::terminal::models::RuntimeKind;
use crate::tmux::layouts::Layout;
use crate::worktree::{Assignment, CleanupPolicy};

/// Parse a `PANE:REPO:BRANCH` triple. The repo path may itself contain
/// colons (Windows drive letters); the branch is taken from the last colon
/// because git ref names cannot contain one.
pub fn parse_assignment(raw: &str) -> Result<Assignment, String> {
    let (pane_raw, rest) = raw
        .split_once(':')
        .ok_or_else(|| format!("expected PANE:REPO:BRANCH, got '{raw}'"))?;
    let pane = pane_raw
        .trim()
        .parse::<u32>()
        .map_err(|_| format!("invalid pane index in '{raw}'"))?;
    let (repo, branch) = rest
        .rsplit_once(':')
        .ok_or_else(|| format!("missing branch in '{raw}'"))?;
    let repo = repo.trim();
    let branch = branch.trim();
    if repo.is_empty() {
        return Err(format!("missing repo path in '{raw}'"));
    }
    if branch.is_empty() {
        return Err(format!("missing branch in '{raw}'"));
    }
    Ok(Assignment::new(pane, repo, branch))
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Provision worktrees and start the tmux session
    Up {
        /// WSL distribution to run in (overrides PANEFORGE_DISTRIBUTION)
        #[arg(long)]
        distribution: Option<String>,

        /// Pane layout
        #[arg(long, value_enum)]
        layout: Option<Layout>,

        /// Worktree cleanup policy
        #[arg(long, value_enum)]
        cleanup: Option<CleanupPolicy>,

        /// Base directory for managed worktrees (inside the distribution)
        #[arg(long = "worktree-base")]
        worktree_base: Option<String>,

        /// tmux session name
        #[arg(long)]
        session: Option<String>,

        /// Skip automatic tmux installation
        #[arg(long = "no-auto-install")]
        no_auto_install: bool,

        /// Pane assignments as PANE:REPO:BRANCH (repeatable)
        #[arg(value_parser = parse_assignment, required = true, num_args = 1..)]
        assignments: Vec<Assignment>,
    },

    /// List WSL distributions and local/remote branches for a repository
    Targets {
        /// Repository to list branches for; omit to list distributions only
        #[arg(long)]
        repo: Option<String>,

        /// WSL distribution to query (overrides PANEFORGE_DISTRIBUTION)
        #[arg(long)]
        distribution: Option<String>,
    },

    /// Run diagnostics to check environment and configuration
    Doctor,
}

#[derive(Parser, Debug)]
#[command(
    name = "paneforge",
    version,
    about = "Provision git worktrees per tmux pane inside a WSL distribution."
)]
pub struct Cli {
    /// Terminal runtime for interactive sessions
    #[arg(long, value_enum)]
    pub runtime: Option<RuntimeKind>,

    /// Print detailed execution info
    #[arg(long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_assignment_triples() {
        let a = parse_assignment("2:/mnt/c/work/repo:feature/login").unwrap();
        assert_eq!(a.pane, 2);
        assert_eq!(a.repo_path, "/mnt/c/work/repo");
        assert_eq!(a.branch, "feature/login");
    }

    #[test]
    fn repo_paths_with_drive_letters_parse() {
        let a = parse_assignment("0:C:/work/repo:main").unwrap();
        assert_eq!(a.repo_path, "C:/work/repo");
        assert_eq!(a.branch, "main");
    }

    #[test]
    fn rejects_malformed_assignments() {
        assert!(parse_assignment("x:/repo:main").is_err());
        assert!(parse_assignment("1::main").is_err());
        assert!(parse_assignment("1:/repo:").is_err());
        assert!(parse_assignment("1:/repo").is_err());
    }
}
