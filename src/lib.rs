//! paneforge: provision one git worktree per tmux pane inside a WSL
//! distribution and wire the panes into a single tmux session.
//!
//! The crate is organized around a few seams:
//! - [`util::exec::Execute`] is the process boundary; everything that
//!   shells out goes through it so tests can substitute fakes.
//! - [`runtime`] wraps commands for a WSL distribution and retries
//!   transient failures.
//! - [`worktree`] owns deterministic worktree paths, reuse/conflict
//!   detection and cleanup.
//! - [`terminal`] is the in-memory terminal state machine with the
//!   dirty-switch protocol.
//! - [`orchestrator`] sequences validation, tmux bootstrap, branch
//!   materialization, worktrees and layout commands, with rollback.

pub mod cli;
pub mod config;
pub mod errors;
pub mod git;
pub mod lock;
pub mod orchestrator;
pub mod retry;
pub mod runtime;
pub mod session;
pub mod terminal;
pub mod tmux;
pub mod util;
pub mod worktree;

pub use errors::{exit_code, user_facing_error, Error, ErrorKind, Result};
pub use lock::{acquire_session_lock, SessionLock};
pub use orchestrator::{
    orchestrate, NullProgress, OrchestrationRequest, OrchestrationResult, ProgressReporter,
};
pub use retry::{run_with_retry, RetryError, RetryPolicy};
pub use session::{
    build_runtime_snapshot, parse_runtime_snapshot, ExitChoice, RuntimeSessionSnapshot,
    SessionCleanupHandler, SessionCleanupResult, SessionTerminalSnapshot,
};
pub use worktree::{
    Assignment, CleanupOptions, CleanupPolicy, ManagedWorktree, WorktreeManager,
};
