pub mod bootstrap;
pub mod layouts;

pub use bootstrap::{ensure_tmux, BootstrapResult};
pub use layouts::{build_layout_commands, Layout};
