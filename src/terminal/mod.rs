pub mod backend;
pub mod models;
pub mod service;

pub use backend::{BackendError, ProcessBackend, SessionBackend};
pub use models::{RuntimeKind, TerminalInstance, TerminalSpec, TerminalState};
pub use service::{
    DirtySwitchDecision, RemovalMode, SwitchRequest, TerminalEvent, TerminalService,
};
