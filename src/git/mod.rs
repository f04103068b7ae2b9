pub mod branches;
pub mod materialize;

pub use branches::{BranchProvider, BranchSet, GitBranchProvider};
pub use materialize::{BranchMaterializer, GitMaterializer};
