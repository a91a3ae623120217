//! Core library for the PowerVS VM lifecycle tool.
//!
//! The crate drives OpenTofu to create an IBM Power Virtual Server instance,
//! records what it created so a later, independent invocation can destroy it,
//! and installs SSH access to the new machine (create → record → configure
//! access, then later destroy from the record).

pub mod access;
pub mod config;
pub mod engine;
mod files;
pub mod locate;
pub mod params;
pub mod provision;
pub mod runner;
pub mod state;
pub mod teardown;
pub mod test_support;

pub use access::{AccessError, AccessInstaller, SSH_ALIAS};
pub use config::{ConfigError, EngineConfig, ProvisionConfig};
pub use engine::{DEFAULT_TOFU_BIN, Engine, EngineError, Stage};
pub use locate::{locate, locate_str};
pub use params::{ParameterError, ProvisioningParameters, ProvisioningParametersBuilder, UserData};
pub use provision::{ProvisionError, ProvisionOrchestrator, ProvisionOutcome};
pub use runner::{CommandOutput, CommandRunner, RunnerError, StreamingCommandRunner};
pub use state::{DEFAULT_STATE_FILE, LifecycleStateRecord, StateError, StateStore};
pub use teardown::{TeardownDriver, TeardownError, TeardownOutcome};
