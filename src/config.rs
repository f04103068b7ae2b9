//! Environment-driven configuration.
//!
//! `.env` is loaded by `main` via dotenvy before this runs; CLI flags win
//! over everything here.

use std::env;

use tracing::warn;

use crate::terminal::models::RuntimeKind;
use crate::tmux::layouts::Layout;
use crate::worktree::CleanupPolicy;

pub const DEFAULT_SESSION_NAME: &str = "paneforge";
pub const DEFAULT_WORKTREE_BASE: &str = "~/.paneforge/worktrees";
pub const DEFAULT_MAX_TERMINALS: usize = 6;

#[derive(Debug, Clone)]
pub struct Config {
    pub distribution: Option<String>,
    pub layout: Layout,
    pub cleanup_policy: CleanupPolicy,
    pub worktree_base: String,
    pub session_name: String,
    pub tmux_auto_install: bool,
    pub max_terminals: usize,
    pub default_runtime: RuntimeKind,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            distribution: None,
            layout: Layout::Grid,
            cleanup_policy: CleanupPolicy::Session,
            worktree_base: DEFAULT_WORKTREE_BASE.to_string(),
            session_name: DEFAULT_SESSION_NAME.to_string(),
            tmux_auto_install: true,
            max_terminals: DEFAULT_MAX_TERMINALS,
            default_runtime: RuntimeKind::Wsl,
        }
    }
}

fn env_nonempty(key: &str) -> Option<String> {
    env::var(key).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn env_bool(key: &str, default: bool) -> bool {
    match env_nonempty(key) {
        None => default,
        Some(v) => matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
    }
}

impl Config {
    /// Read configuration from `PANEFORGE_*` variables. Unparseable values
    /// fall back to defaults with a warning rather than failing startup.
    pub fn from_env() -> Self {
        let mut config = Config::default();

        config.distribution = env_nonempty("PANEFORGE_DISTRIBUTION");

        if let Some(raw) = env_nonempty("PANEFORGE_LAYOUT") {
            match Layout::parse(&raw) {
                Some(layout) => config.layout = layout,
                None => warn!(value = %raw, "ignoring invalid PANEFORGE_LAYOUT"),
            }
        }

        if let Some(raw) = env_nonempty("PANEFORGE_CLEANUP") {
            match raw.to_lowercase().as_str() {
                "session" => config.cleanup_policy = CleanupPolicy::Session,
                "persistent" => config.cleanup_policy = CleanupPolicy::Persistent,
                _ => warn!(value = %raw, "ignoring invalid PANEFORGE_CLEANUP"),
            }
        }

        if let Some(base) = env_nonempty("PANEFORGE_WORKTREE_BASE") {
            config.worktree_base = base;
        }
        if let Some(name) = env_nonempty("PANEFORGE_SESSION_NAME") {
            config.session_name = name;
        }
        config.tmux_auto_install = env_bool("PANEFORGE_TMUX_AUTO_INSTALL", true);

        if let Some(raw) = env_nonempty("PANEFORGE_MAX_TERMINALS") {
            match raw.parse::<usize>() {
                Ok(n) if (2..=16).contains(&n) => config.max_terminals = n,
                _ => warn!(value = %raw, "ignoring invalid PANEFORGE_MAX_TERMINALS"),
            }
        }

        if let Some(raw) = env_nonempty("PANEFORGE_RUNTIME") {
            match RuntimeKind::parse(&raw) {
                Some(runtime) => config.default_runtime = runtime,
                None => warn!(value = %raw, "ignoring invalid PANEFORGE_RUNTIME"),
            }
        }

        config
    }
}
