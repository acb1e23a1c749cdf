pub mod artifacts;
pub mod configuration;

pub use artifacts::{ArtifactKey, ArtifactWorkspace, WorkspaceLock};
pub use configuration::BinningConfig;
