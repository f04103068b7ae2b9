//! In-memory terminal lifecycle orchestration.
//!
//! Each instance is a small state machine bound to a (runtime, repository,
//! branch) triple. Context switches replace the spec wholesale and keep the
//! previous spec/state pair until the new one is confirmed running, which is
//! what makes rollback possible. Locks guard only in-memory bookkeeping;
//! no lock is held across a backend call.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use tracing::info;

use crate::errors::{Error, Result};
use crate::git::branches::{BranchProvider, BranchSet};
use crate::git::materialize::BranchMaterializer;
use crate::terminal::backend::SessionBackend;
use crate::terminal::models::{RuntimeKind, TerminalInstance, TerminalSpec, TerminalState};

const META_PTY_ATTACHED: &str = "pty_attached";
const META_FAILURE_REASON: &str = "failure_reason";
const META_DIRTY_SWITCH: &str = "dirty_switch";

/// What to do with a dirty worktree before switching away from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirtySwitchDecision {
    Cancel,
    Preserve,
    Clean,
}

impl DirtySwitchDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            DirtySwitchDecision::Cancel => "cancel",
            DirtySwitchDecision::Preserve => "preserve",
            DirtySwitchDecision::Clean => "clean",
        }
    }

    /// Lenient parse; anything unrecognized is the safe default, Cancel.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "clean" => DirtySwitchDecision::Clean,
            "preserve" => DirtySwitchDecision::Preserve,
            _ => DirtySwitchDecision::Cancel,
        }
    }
}

/// Whether `remove` should keep or wipe the terminal's worktree state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalMode {
    Preserve,
    Clean,
}

impl RemovalMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RemovalMode::Preserve => "preserve",
            RemovalMode::Clean => "clean",
        }
    }
}

/// Append-only audit record of one lifecycle step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminalEvent {
    pub terminal_id: String,
    pub step: String,
    pub message: String,
}

/// New context for a switch. Runtime defaults to the instance's current one.
#[derive(Debug, Clone)]
pub struct SwitchRequest {
    pub repo_path: String,
    pub branch: String,
    pub runtime: Option<RuntimeKind>,
}

impl SwitchRequest {
    pub fn new(repo_path: impl Into<String>, branch: impl Into<String>) -> Self {
        Self {
            repo_path: repo_path.into(),
            branch: branch.into(),
            runtime: None,
        }
    }

    pub fn runtime(mut self, runtime: RuntimeKind) -> Self {
        self.runtime = Some(runtime);
        self
    }
}

pub type DirtyChecker<'a> = &'a dyn Fn(&TerminalInstance) -> bool;
pub type DirtyResolver<'a> = &'a dyn Fn(&TerminalInstance) -> DirtySwitchDecision;

pub struct TerminalService {
    default_runtime: RuntimeKind,
    max_terminals: usize,
    backend: Option<Arc<dyn SessionBackend>>,
    branch_provider: Option<Arc<dyn BranchProvider>>,
    materializer: Option<Arc<dyn BranchMaterializer>>,
    instances: Mutex<BTreeMap<String, TerminalInstance>>,
    events: Mutex<Vec<TerminalEvent>>,
}

impl TerminalService {
    pub fn new(max_terminals: usize, default_runtime: RuntimeKind) -> Result<Self> {
        if !(2..=16).contains(&max_terminals) {
            return Err(
                Error::validation(format!("Invalid max terminal count: {max_terminals}"))
                    .with_hint("Use a value between 2 and 16."),
            );
        }
        Ok(Self {
            default_runtime,
            max_terminals,
            backend: None,
            branch_provider: None,
            materializer: None,
            instances: Mutex::new(BTreeMap::new()),
            events: Mutex::new(Vec::new()),
        })
    }

    pub fn with_backend(mut self, backend: Arc<dyn SessionBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn with_branch_provider(mut self, provider: Arc<dyn BranchProvider>) -> Self {
        self.branch_provider = Some(provider);
        self
    }

    pub fn with_materializer(mut self, materializer: Arc<dyn BranchMaterializer>) -> Self {
        self.materializer = Some(materializer);
        self
    }

    pub fn max_terminals(&self) -> usize {
        self.max_terminals
    }

    pub fn default_runtime(&self) -> RuntimeKind {
        self.default_runtime
    }

    /// Instances sorted by terminal id.
    pub fn list_instances(&self) -> Vec<TerminalInstance> {
        self.instances
            .lock()
            .expect("instances lock poisoned")
            .values()
            .cloned()
            .collect()
    }

    pub fn list_events(&self) -> Vec<TerminalEvent> {
        self.events.lock().expect("events lock poisoned").clone()
    }

    pub fn clear_events(&self) {
        self.events.lock().expect("events lock poisoned").clear();
        info!(terminal = "*", step = "clear-events", "terminal events cleared");
    }

    pub fn record_event(&self, terminal_id: &str, step: &str, message: &str) {
        self.record(terminal_id, step, message);
    }

    fn record(&self, terminal_id: &str, step: &str, message: &str) {
        self.events
            .lock()
            .expect("events lock poisoned")
            .push(TerminalEvent {
                terminal_id: terminal_id.to_string(),
                step: step.to_string(),
                message: message.to_string(),
            });
        info!(terminal = terminal_id, step, message, "runtime-event");
    }

    fn must_get(&self, terminal_id: &str) -> Result<TerminalInstance> {
        self.instances
            .lock()
            .expect("instances lock poisoned")
            .get(terminal_id)
            .cloned()
            .ok_or_else(|| {
                Error::validation(format!("Terminal not found: {terminal_id}"))
                    .with_hint("Select an existing terminal.")
            })
    }

    fn update(
        &self,
        terminal_id: &str,
        apply: impl FnOnce(&mut TerminalInstance),
    ) -> Result<TerminalInstance> {
        let mut instances = self.instances.lock().expect("instances lock poisoned");
        let instance = instances.get_mut(terminal_id).ok_or_else(|| {
            Error::validation(format!("Terminal not found: {terminal_id}"))
                .with_hint("Select an existing terminal.")
        })?;
        apply(instance);
        Ok(instance.clone())
    }

    pub fn create(&self, spec: TerminalSpec) -> Result<TerminalInstance> {
        let mut instances = self.instances.lock().expect("instances lock poisoned");
        if instances.contains_key(&spec.terminal_id) {
            return Err(
                Error::validation(format!("Terminal already exists: {}", spec.terminal_id))
                    .with_hint("Use a unique terminal id."),
            );
        }
        if instances.len() >= self.max_terminals {
            return Err(
                Error::validation(format!("Terminal limit reached: {}", self.max_terminals))
                    .with_hint("Close another terminal before creating a new one."),
            );
        }
        let terminal_id = spec.terminal_id.clone();
        let title = spec.title.clone();
        let instance = TerminalInstance::new(spec);
        instances.insert(terminal_id.clone(), instance.clone());
        drop(instances);
        self.record(&terminal_id, "create", &format!("Created terminal '{title}'."));
        Ok(instance)
    }

    pub fn start(&self, terminal_id: &str) -> Result<TerminalInstance> {
        let instance = self.must_get(terminal_id)?;
        let needs_attach = self.backend.is_some()
            && instance.metadata.get(META_PTY_ATTACHED).map(String::as_str) != Some("true");
        if needs_attach {
            let backend = self.backend.as_ref().expect("checked above");
            let cwd = if instance.spec.repo_path.is_empty() {
                None
            } else {
                Some(instance.spec.repo_path.as_str())
            };
            backend
                .start(terminal_id, instance.spec.runtime, cwd)
                .map_err(Error::from)?;
        }
        let updated = self.update(terminal_id, |inst| {
            if needs_attach {
                inst.metadata
                    .insert(META_PTY_ATTACHED.to_string(), "true".to_string());
            }
            inst.state = TerminalState::Running;
        })?;
        self.record(terminal_id, "start", "Terminal is running.");
        Ok(updated)
    }

    /// Detach the backend session and mark the instance stopped. A backend
    /// failure marks the instance `Failed` and propagates; callers must not
    /// assume a clean stop after an error.
    pub fn stop(&self, terminal_id: &str) -> Result<TerminalInstance> {
        let instance = self.must_get(terminal_id)?;
        let attached = self.backend.is_some()
            && instance.metadata.get(META_PTY_ATTACHED).map(String::as_str) == Some("true");
        if attached {
            let backend = self.backend.as_ref().expect("checked above");
            if let Err(backend_err) = backend.stop(terminal_id) {
                let err: Error = backend_err.into();
                let _ = self.update(terminal_id, |inst| {
                    inst.state = TerminalState::Failed;
                    inst.metadata
                        .insert(META_FAILURE_REASON.to_string(), err.message().to_string());
                });
                self.record(terminal_id, "stop-failed", err.message());
                return Err(err);
            }
        }
        let updated = self.update(terminal_id, |inst| {
            inst.metadata.remove(META_PTY_ATTACHED);
            inst.state = TerminalState::Stopped;
        })?;
        self.record(terminal_id, "stop", "Terminal stopped.");
        Ok(updated)
    }

    pub fn restart(&self, terminal_id: &str) -> Result<TerminalInstance> {
        self.stop(terminal_id)?;
        self.start(terminal_id)
    }

    pub fn mark_failed(&self, terminal_id: &str, reason: &str) -> Result<TerminalInstance> {
        let updated = self.update(terminal_id, |inst| {
            inst.state = TerminalState::Failed;
            if !reason.is_empty() {
                inst.metadata
                    .insert(META_FAILURE_REASON.to_string(), reason.to_string());
            }
        })?;
        let message = if reason.is_empty() {
            "Terminal failed."
        } else {
            reason
        };
        self.record(terminal_id, "failed", message);
        Ok(updated)
    }

    pub fn remove(&self, terminal_id: &str, cleanup: RemovalMode) -> Result<()> {
        let instance = self.must_get(terminal_id)?;
        if instance.state == TerminalState::Running {
            self.stop(terminal_id)?;
        }
        self.instances
            .lock()
            .expect("instances lock poisoned")
            .remove(terminal_id);
        self.record(
            terminal_id,
            "remove",
            &format!("Terminal removed ({}).", cleanup.as_str()),
        );
        Ok(())
    }

    pub fn list_branches(&self, repo_path: &str) -> Result<BranchSet> {
        let repo = repo_path.trim();
        if repo.is_empty() {
            return Err(Error::validation("Repository path is required.")
                .with_hint("Select a repository before loading branches."));
        }
        let provider = self.branch_provider.as_ref().ok_or_else(|| {
            Error::runtime("No branch provider configured.")
                .with_hint("Attach a branch provider to the terminal service.")
        })?;
        provider.branches(repo)
    }

    /// Rebind a terminal to a new repository/branch context.
    ///
    /// Captures the previous spec/state first; if starting under the new
    /// context fails, both are restored verbatim, a previously running
    /// session is restarted, and the original error is re-raised. A dirty
    /// worktree with no resolver cancels the switch with no side effects.
    pub fn switch_context(
        &self,
        terminal_id: &str,
        request: SwitchRequest,
        dirty_checker: Option<DirtyChecker<'_>>,
        dirty_resolver: Option<DirtyResolver<'_>>,
    ) -> Result<TerminalInstance> {
        let next_repo = request.repo_path.trim().to_string();
        let next_branch = request.branch.trim().to_string();
        if next_repo.is_empty() {
            return Err(Error::validation("Repository path is required.")
                .with_hint("Select a repository for terminal switch."));
        }
        if next_branch.is_empty() {
            return Err(Error::validation("Branch is required.")
                .with_hint("Select a branch for terminal switch."));
        }

        let instance = self.must_get(terminal_id)?;
        let previous_spec = instance.spec.clone();
        let previous_state = instance.state;
        self.record(terminal_id, "switch-start", "Switching repo/branch context.");

        if dirty_checker.is_some_and(|check| check(&instance)) {
            let decision = match dirty_resolver {
                Some(resolve) => resolve(&instance),
                None => DirtySwitchDecision::Cancel,
            };
            if decision == DirtySwitchDecision::Cancel {
                self.record(terminal_id, "switch-cancel", "Dirty state cancelled switch.");
                return Err(
                    Error::validation("Switch cancelled due to dirty worktree.")
                        .with_hint("Commit/stash changes or choose preserve/clean option."),
                );
            }
            self.update(terminal_id, |inst| {
                inst.metadata
                    .insert(META_DIRTY_SWITCH.to_string(), decision.as_str().to_string());
            })?;
            self.record(
                terminal_id,
                "switch-dirty",
                &format!("Dirty switch decision: {}.", decision.as_str()),
            );
        }

        let next_branch = if next_branch.starts_with("origin/") {
            let materializer = self.materializer.as_ref().ok_or_else(|| {
                Error::runtime("No branch materializer configured.")
                    .with_hint("Attach a branch materializer to the terminal service.")
            })?;
            let local = materializer.materialize(&next_repo, &next_branch)?;
            self.record(
                terminal_id,
                "switch-materialize",
                &format!("Materialized remote branch to {local}."),
            );
            local
        } else {
            next_branch
        };

        let next_runtime = request.runtime.unwrap_or(previous_spec.runtime);

        let should_reopen = previous_state == TerminalState::Running;
        if should_reopen {
            self.record(terminal_id, "switch-stop-old", "Stopping current terminal process.");
            self.stop(terminal_id)?;
        }

        self.update(terminal_id, |inst| {
            let mut next_spec = inst.spec.clone();
            next_spec.repo_path = next_repo.clone();
            next_spec.branch = next_branch.clone();
            next_spec.runtime = next_runtime;
            inst.spec = next_spec;
        })?;

        self.record(terminal_id, "switch-start-new", "Starting terminal with new context.");
        match self.start(terminal_id) {
            Ok(_) => {}
            Err(original) => {
                let _ = self.update(terminal_id, |inst| {
                    inst.spec = previous_spec.clone();
                    inst.state = previous_state;
                });
                self.record(
                    terminal_id,
                    "switch-revert",
                    "Switch failed; restoring previous context.",
                );
                if should_reopen && self.start(terminal_id).is_err() {
                    let _ = self.mark_failed(terminal_id, "Failed to restore previous session.");
                }
                return Err(original);
            }
        }

        self.record(terminal_id, "switch-complete", "Terminal switch completed.");
        self.must_get(terminal_id)
    }
}
