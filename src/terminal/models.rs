//! Terminal domain models.

use std::collections::BTreeMap;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
pub enum RuntimeKind {
    #[value(name = "wsl")]
    #[serde(rename = "wsl")]
    Wsl,
    #[value(name = "powershell")]
    #[serde(rename = "powershell")]
    PowerShell,
}

impl RuntimeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuntimeKind::Wsl => "wsl",
            RuntimeKind::PowerShell => "powershell",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "wsl" => Some(RuntimeKind::Wsl),
            "powershell" => Some(RuntimeKind::PowerShell),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalState {
    Created,
    Running,
    Stopped,
    Failed,
}

impl TerminalState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TerminalState::Created => "created",
            TerminalState::Running => "running",
            TerminalState::Stopped => "stopped",
            TerminalState::Failed => "failed",
        }
    }
}

/// Immutable identity/config of a terminal. Replaced wholesale on a
/// successful context switch, never mutated field-by-field mid-switch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminalSpec {
    pub terminal_id: String,
    pub title: String,
    pub runtime: RuntimeKind,
    pub repo_path: String,
    pub branch: String,
}

impl TerminalSpec {
    pub fn new(terminal_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            terminal_id: terminal_id.into(),
            title: title.into(),
            runtime: RuntimeKind::Wsl,
            repo_path: String::new(),
            branch: String::new(),
        }
    }

    pub fn runtime(mut self, runtime: RuntimeKind) -> Self {
        self.runtime = runtime;
        self
    }

    pub fn repo(mut self, repo_path: impl Into<String>) -> Self {
        self.repo_path = repo_path.into();
        self
    }

    pub fn branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = branch.into();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminalInstance {
    pub spec: TerminalSpec,
    pub state: TerminalState,
    pub metadata: BTreeMap<String, String>,
}

impl TerminalInstance {
    pub fn new(spec: TerminalSpec) -> Self {
        Self {
            spec,
            state: TerminalState::Created,
            metadata: BTreeMap::new(),
        }
    }
}
