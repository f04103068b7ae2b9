//! Error model shared by every subsystem.
//!
//! Each error carries a short message plus an actionable hint computed at the
//! error site, and maps onto a stable process exit code. The retry layer never
//! inspects these directly; transient/fatal classification happens in
//! `runtime::remote` before an `Error` is surfaced.

use std::fmt;

/// Coarse error category. Drives exit codes and caller behavior
/// (validation and conflict errors are never retried).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input from the caller; never retried.
    Validation,
    /// A branch, path or session is already owned by another managed entity.
    ResourceConflict,
    /// An external command failed.
    Runtime,
    /// A git operation failed.
    Git,
    /// A tmux operation failed.
    Tmux,
    /// A command exceeded its per-attempt timeout.
    Timeout,
    /// The caller cancelled before dispatch.
    Cancelled,
}

/// Stable exit codes, kept compatible with the v1 contract.
pub fn exit_code(kind: ErrorKind) -> u8 {
    match kind {
        ErrorKind::Runtime | ErrorKind::Timeout | ErrorKind::Cancelled => 4,
        ErrorKind::Git | ErrorKind::ResourceConflict => 5,
        ErrorKind::Tmux => 6,
        ErrorKind::Validation => 7,
    }
}

#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    message: String,
    hint: String,
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            hint: String::new(),
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = hint.into();
        self
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ResourceConflict, message)
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Runtime, message)
    }

    pub fn git(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Git, message)
    }

    pub fn tmux(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Tmux, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cancelled, message)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn hint(&self) -> &str {
        &self.hint
    }

    pub fn exit_code(&self) -> u8 {
        exit_code(self.kind)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.hint.is_empty() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{} Hint: {}", self.message, self.hint)
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

/// Render an error for end users on stderr.
pub fn user_facing_error(err: &Error) -> String {
    if err.hint().is_empty() {
        format!("Error: {}.", err.message())
    } else {
        format!("Error: {}. Next step: {}", err.message(), err.hint())
    }
}
