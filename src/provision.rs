//! Provisioning orchestration for `powervs-vm provision`.

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;
use tracing::info;

use crate::access::{AccessError, AccessInstaller, SSH_ALIAS};
use crate::engine::{Engine, EngineError, STATE_FILE};
use crate::locate::locate_str;
use crate::params::ProvisioningParameters;
use crate::runner::CommandRunner;
use crate::state::{LifecycleStateRecord, StateError, StateStore};

/// Engine output holding the machine's public address.
pub const ADDRESS_KEY: &str = "external_ip";

/// Engine output holding the generated OpenSSH private key.
pub const PRIVATE_KEY_KEY: &str = "private_key_openssh";

/// Errors surfaced while provisioning a machine.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ProvisionError {
    /// Raised when any engine step fails.
    #[error(transparent)]
    Engine(#[from] EngineError),
    /// Raised when the lifecycle record cannot be written.
    #[error(transparent)]
    State(#[from] StateError),
    /// Raised when an expected output is absent from the engine state.
    #[error("{key} not found in {STATE_FILE}")]
    MissingOutput {
        /// Output key that could not be found.
        key: &'static str,
    },
    /// Raised when SSH access cannot be installed.
    #[error(transparent)]
    Access(#[from] AccessError),
}

/// Result of a successful provisioning run.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProvisionOutcome {
    /// Public address of the new machine.
    pub address: String,
    /// SSH host alias pointing at the machine.
    pub alias: &'static str,
    /// Location of the lifecycle record teardown will read.
    pub state_path: Utf8PathBuf,
    /// Location of the installed remote shell shim.
    pub shim_path: Utf8PathBuf,
}

/// Coordinates engine creation, lifecycle recording, and SSH setup.
#[derive(Debug)]
pub struct ProvisionOrchestrator<R: CommandRunner> {
    engine: Engine<R>,
    installer: AccessInstaller,
    store: StateStore,
}

impl<R: CommandRunner> ProvisionOrchestrator<R> {
    /// Creates an orchestrator from its collaborators.
    #[must_use]
    pub const fn new(engine: Engine<R>, installer: AccessInstaller, store: StateStore) -> Self {
        Self {
            engine,
            installer,
            store,
        }
    }

    /// Provisions a machine in `work_dir` and configures SSH access to it.
    ///
    /// The lifecycle record is written as soon as `apply` succeeds, before
    /// any output is read, so teardown can always reverse a machine that
    /// exists. Both outputs are located before anything under the home
    /// directory is touched.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError`] when an engine step fails, the record cannot
    /// be written, an output is missing, or SSH files cannot be written.
    pub fn execute(
        &self,
        params: &ProvisioningParameters,
        work_dir: &Utf8Path,
    ) -> Result<ProvisionOutcome, ProvisionError> {
        self.engine.create(params, work_dir)?;
        self.store.save(&LifecycleStateRecord::new(params, work_dir))?;
        info!(path = %self.store.path(), "Saved cleanup state");

        info!("Extracting outputs from {STATE_FILE}...");
        let document = self.engine.read_state(work_dir)?;
        let address = locate_str(&document, ADDRESS_KEY)
            .ok_or(ProvisionError::MissingOutput { key: ADDRESS_KEY })?;
        let private_key = locate_str(&document, PRIVATE_KEY_KEY)
            .ok_or(ProvisionError::MissingOutput {
                key: PRIVATE_KEY_KEY,
            })?;

        self.installer.install(&address, &private_key)?;
        let shim_path = self.installer.install_shim()?;

        info!("VM provisioned successfully!");
        info!("External IP: {address}");
        info!("SSH access configured as \"{SSH_ALIAS}\" hostname");
        info!("You can now connect using: ssh {SSH_ALIAS}");
        info!("Run scripts remotely with: {shim_path} <script>");

        Ok(ProvisionOutcome {
            address,
            alias: SSH_ALIAS,
            state_path: self.store.path().to_path_buf(),
            shim_path,
        })
    }
}
