//! Session shutdown handling and runtime snapshots.
//!
//! On exit, managed worktrees are partitioned into dirty and clean; dirty
//! ones are never removed without an explicit user choice. Snapshots capture
//! enough of the terminal grid to restore it later and parse all-or-nothing:
//! one malformed terminal entry invalidates the whole snapshot.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::errors::Result;
use crate::terminal::models::{RuntimeKind, TerminalInstance};
use crate::util::exec::Execute;
use crate::worktree::{CleanupOptions, ManagedWorktree, WorktreeManager};

fn validate_terminal_count(value: usize) -> Option<usize> {
    (2..=16).contains(&value).then_some(value)
}

/// User decision when dirty worktrees would block a clean exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitChoice {
    Cancel,
    Preserve,
    Clean,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionCleanupResult {
    pub closed: bool,
    pub cancelled: bool,
    pub removed: Vec<String>,
    pub preserved_dirty: Vec<String>,
}

pub struct SessionCleanupHandler<'a> {
    manager: &'a WorktreeManager,
    prompt: Box<dyn Fn(&[String]) -> ExitChoice + 'a>,
}

impl<'a> SessionCleanupHandler<'a> {
    pub fn new(
        manager: &'a WorktreeManager,
        prompt: impl Fn(&[String]) -> ExitChoice + 'a,
    ) -> Self {
        Self {
            manager,
            prompt: Box::new(prompt),
        }
    }

    /// Run exit cleanup. Persistent policy short-circuits: everything is
    /// preserved and the session closes. Otherwise clean worktrees go, and
    /// dirty ones go only when the prompt says so.
    pub fn handle_exit(&self, exec: &dyn Execute) -> Result<SessionCleanupResult> {
        if self.manager.cleanup_policy() == crate::worktree::CleanupPolicy::Persistent {
            debug!("session cleanup skipped due to persistent policy");
            return Ok(SessionCleanupResult {
                closed: true,
                cancelled: false,
                removed: Vec::new(),
                preserved_dirty: self
                    .manager
                    .managed()
                    .iter()
                    .map(|w| w.path.clone())
                    .collect(),
            });
        }

        let mut dirty: Vec<ManagedWorktree> = Vec::new();
        let mut clean: Vec<ManagedWorktree> = Vec::new();
        for worktree in self.manager.managed() {
            if self.manager.check_dirty(&worktree, exec)? {
                dirty.push(worktree);
            } else {
                clean.push(worktree);
            }
        }
        debug!(dirty = dirty.len(), clean = clean.len(), "cleanup check complete");

        if dirty.is_empty() {
            let removed = self.manager.cleanup(exec, CleanupOptions::default())?;
            debug!(removed = removed.len(), "all worktrees clean");
            return Ok(SessionCleanupResult {
                closed: true,
                cancelled: false,
                removed,
                preserved_dirty: Vec::new(),
            });
        }

        let dirty_paths: Vec<String> = dirty.iter().map(|w| w.path.clone()).collect();
        let choice = (self.prompt)(&dirty_paths);
        info!(choice = ?choice, dirty_count = dirty.len(), "cleanup prompt result");
        match choice {
            ExitChoice::Cancel => Ok(SessionCleanupResult {
                closed: false,
                cancelled: true,
                removed: Vec::new(),
                preserved_dirty: dirty_paths,
            }),
            ExitChoice::Preserve => {
                let removed = self
                    .manager
                    .cleanup(exec, CleanupOptions::default().selected(clean))?;
                debug!(removed = removed.len(), "preserved dirty worktrees");
                Ok(SessionCleanupResult {
                    closed: true,
                    cancelled: false,
                    removed,
                    preserved_dirty: dirty_paths,
                })
            }
            ExitChoice::Clean => {
                let removed = self.manager.cleanup(exec, CleanupOptions::forced())?;
                debug!(removed = removed.len(), "cleanup forced for all worktrees");
                Ok(SessionCleanupResult {
                    closed: true,
                    cancelled: false,
                    removed,
                    preserved_dirty: Vec::new(),
                })
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionTerminalSnapshot {
    pub terminal_id: String,
    pub title: String,
    pub runtime: RuntimeKind,
    pub repo_path: String,
    pub branch: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeSessionSnapshot {
    pub layout: String,
    pub template_count: usize,
    pub focused_terminal_id: String,
    pub terminals: Vec<SessionTerminalSnapshot>,
}

impl RuntimeSessionSnapshot {
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Capture the current terminal grid. `template_count` outside 2..=16 is an
/// error because a snapshot that cannot be restored is worse than none.
pub fn build_runtime_snapshot(
    layout: &str,
    template_count: usize,
    terminals: &[TerminalInstance],
    focused_terminal_id: &str,
) -> Result<RuntimeSessionSnapshot> {
    let count = validate_terminal_count(template_count).ok_or_else(|| {
        crate::errors::Error::validation(format!("Invalid terminal count: {template_count}"))
            .with_hint("Snapshot terminal count must be between 2 and 16.")
    })?;
    Ok(RuntimeSessionSnapshot {
        layout: layout.to_string(),
        template_count: count,
        focused_terminal_id: focused_terminal_id.to_string(),
        terminals: terminals
            .iter()
            .map(|item| SessionTerminalSnapshot {
                terminal_id: item.spec.terminal_id.clone(),
                title: item.spec.title.clone(),
                runtime: item.spec.runtime,
                repo_path: item.spec.repo_path.clone(),
                branch: item.spec.branch.clone(),
            })
            .collect(),
    })
}

fn value_as_trimmed(raw: Option<&Value>) -> Option<String> {
    raw.map(|v| match v {
        Value::String(s) => s.trim().to_string(),
        other => other.to_string(),
    })
}

/// Parse a persisted snapshot leniently at the field level but strictly at
/// the structure level: missing scalar fields take defaults, while an empty
/// terminal list, a bad count, an unknown runtime, or a terminal without an
/// id discard the snapshot entirely.
pub fn parse_runtime_snapshot(raw: &Value) -> Option<RuntimeSessionSnapshot> {
    let obj = raw.as_object()?;
    let terminals_raw = obj.get("terminals")?.as_array()?;
    if terminals_raw.is_empty() {
        return None;
    }

    let template_count = match obj.get("template_count") {
        None => terminals_raw.len(),
        Some(v) => usize::try_from(v.as_i64()?).ok()?,
    };
    let template_count = validate_terminal_count(template_count)?;

    let mut terminals = Vec::with_capacity(terminals_raw.len());
    for item in terminals_raw {
        let entry = item.as_object()?;
        let terminal_id = value_as_trimmed(entry.get("terminal_id")).unwrap_or_default();
        if terminal_id.is_empty() {
            return None;
        }
        let title = value_as_trimmed(entry.get("title"))
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| terminal_id.clone());
        let repo_path = value_as_trimmed(entry.get("repo_path")).unwrap_or_default();
        let branch = value_as_trimmed(entry.get("branch")).unwrap_or_default();
        let runtime = match entry.get("runtime") {
            None => RuntimeKind::Wsl,
            Some(v) => RuntimeKind::parse(v.as_str()?)?,
        };
        terminals.push(SessionTerminalSnapshot {
            terminal_id,
            title,
            runtime,
            repo_path,
            branch,
        });
    }

    Some(RuntimeSessionSnapshot {
        layout: value_as_trimmed(obj.get("layout"))
            .filter(|l| !l.is_empty())
            .unwrap_or_else(|| "grid".to_string()),
        template_count,
        focused_terminal_id: value_as_trimmed(obj.get("focused_terminal_id")).unwrap_or_default(),
        terminals,
    })
}
