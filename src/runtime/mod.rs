pub mod remote;
pub mod wsl;

pub use remote::{DistributionExec, RuntimeResult, WslRuntime};
pub use wsl::{build_wsl_command, list_distributions, to_wsl_path, validate_distribution};
