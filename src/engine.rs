//! OpenTofu driver.
//!
//! Each verb is a blocking invocation of the engine binary inside an explicit
//! working directory. A non-zero exit aborts the caller's workflow; nothing
//! is retried or rolled back here.

use std::ffi::OsString;
use std::fmt;
use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use serde_json::Value;
use shell_escape::unix::escape;
use thiserror::Error;
use tracing::{debug, info};

use crate::files::open_parent;
use crate::params::{API_KEY_VAR, ProvisioningParameters};
use crate::runner::{CommandOutput, CommandRunner, RunnerError, StreamingCommandRunner};

/// Default engine executable.
pub const DEFAULT_TOFU_BIN: &str = "tofu";

/// Plan artefact written by `plan` and consumed by `apply`.
pub const PLAN_FILE: &str = "tfplan";

/// Engine state document read after `apply`.
pub const STATE_FILE: &str = "terraform.tfstate";

/// Engine verb being executed, used in logs and errors.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Stage {
    /// `tofu init`.
    Init,
    /// `tofu plan`.
    Plan,
    /// `tofu apply`.
    Apply,
    /// `tofu destroy`.
    Destroy,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = match self {
            Self::Init => "init",
            Self::Plan => "plan",
            Self::Apply => "apply",
            Self::Destroy => "destroy",
        };
        f.write_str(verb)
    }
}

/// Errors raised while driving the engine.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum EngineError {
    /// Raised when the engine cannot be started.
    #[error("engine {stage} could not run: {source}")]
    Spawn {
        /// Verb that was being executed.
        stage: Stage,
        /// Underlying runner error.
        #[source]
        source: RunnerError,
    },
    /// Raised when the engine exits with a non-zero status.
    #[error("{program} {stage} exited with status {status_text}: {stderr}")]
    CommandFailure {
        /// Engine executable.
        program: String,
        /// Verb that failed.
        stage: Stage,
        /// Exit status reported by the OS.
        status: Option<i32>,
        /// Human readable representation of the exit status.
        status_text: String,
        /// Stderr captured from the engine.
        stderr: String,
    },
    /// Raised when the engine state document is absent after `apply`.
    #[error("{path} not found")]
    MissingArtifact {
        /// Expected location of the document.
        path: Utf8PathBuf,
    },
    /// Raised when the engine state document cannot be read or parsed.
    #[error("failed to read {path}: {message}")]
    InvalidArtifact {
        /// Location of the document.
        path: Utf8PathBuf,
        /// Reader or parser error message.
        message: String,
    },
}

/// Drives the engine binary through a [`CommandRunner`].
#[derive(Clone, Debug)]
pub struct Engine<R: CommandRunner> {
    program: String,
    runner: R,
}

impl Engine<StreamingCommandRunner> {
    /// Creates an engine that streams child output to this process.
    #[must_use]
    pub fn with_streaming_runner(program: impl Into<String>) -> Self {
        Self::new(program, StreamingCommandRunner)
    }
}

impl<R: CommandRunner> Engine<R> {
    /// Creates an engine invoking `program` through `runner`.
    #[must_use]
    pub fn new(program: impl Into<String>, runner: R) -> Self {
        Self {
            program: program.into(),
            runner,
        }
    }

    /// Runs `init`, `plan`, `apply` and returns the parsed state document.
    ///
    /// # Errors
    ///
    /// Returns the first [`EngineError`] raised by any step.
    pub fn provision(
        &self,
        params: &ProvisioningParameters,
        work_dir: &Utf8Path,
    ) -> Result<Value, EngineError> {
        self.create(params, work_dir)?;
        self.read_state(work_dir)
    }

    /// Runs `init`, `plan` and `apply` without reading the result.
    ///
    /// # Errors
    ///
    /// Returns the first [`EngineError`] raised by any step.
    pub fn create(
        &self,
        params: &ProvisioningParameters,
        work_dir: &Utf8Path,
    ) -> Result<(), EngineError> {
        info!("Initializing OpenTofu...");
        self.init(work_dir)?;
        info!("Planning infrastructure...");
        self.plan(params, work_dir)?;
        info!("Applying infrastructure...");
        self.apply(work_dir)
    }

    /// Runs `tofu init`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] when the engine fails.
    pub fn init(&self, work_dir: &Utf8Path) -> Result<(), EngineError> {
        self.invoke(Stage::Init, &[OsString::from("init")], work_dir)
            .map(drop)
    }

    /// Runs `tofu plan` with every parameter and writes [`PLAN_FILE`].
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] when the engine fails.
    pub fn plan(
        &self,
        params: &ProvisioningParameters,
        work_dir: &Utf8Path,
    ) -> Result<(), EngineError> {
        let mut args = vec![OsString::from("plan")];
        args.extend(params.var_args());
        args.push(OsString::from(format!("-out={PLAN_FILE}")));
        self.invoke(Stage::Plan, &args, work_dir).map(drop)
    }

    /// Applies [`PLAN_FILE`] non-interactively.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] when the engine fails.
    pub fn apply(&self, work_dir: &Utf8Path) -> Result<(), EngineError> {
        let args = [
            OsString::from("apply"),
            OsString::from("-auto-approve"),
            OsString::from(PLAN_FILE),
        ];
        self.invoke(Stage::Apply, &args, work_dir).map(drop)
    }

    /// Destroys everything created with `params` non-interactively.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] when the engine fails.
    pub fn destroy(
        &self,
        params: &ProvisioningParameters,
        work_dir: &Utf8Path,
    ) -> Result<(), EngineError> {
        let mut args = vec![OsString::from("destroy"), OsString::from("-auto-approve")];
        args.extend(params.var_args());
        self.invoke(Stage::Destroy, &args, work_dir).map(drop)
    }

    /// Reads and parses [`STATE_FILE`] from `work_dir`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::MissingArtifact`] when the file does not exist
    /// and [`EngineError::InvalidArtifact`] when it cannot be read or parsed.
    pub fn read_state(&self, work_dir: &Utf8Path) -> Result<Value, EngineError> {
        let path = work_dir.join(STATE_FILE);
        let contents = match open_parent(&path)
            .and_then(|(dir, file_name)| dir.read_to_string(file_name))
        {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(EngineError::MissingArtifact { path });
            }
            Err(err) => {
                return Err(EngineError::InvalidArtifact {
                    path,
                    message: err.to_string(),
                });
            }
        };

        serde_json::from_str(&contents).map_err(|err| EngineError::InvalidArtifact {
            path,
            message: err.to_string(),
        })
    }

    fn invoke(
        &self,
        stage: Stage,
        args: &[OsString],
        work_dir: &Utf8Path,
    ) -> Result<CommandOutput, EngineError> {
        debug!(
            command = %render_command(&self.program, args),
            dir = %work_dir,
            "running engine"
        );
        let output = self
            .runner
            .run(&self.program, args, work_dir)
            .map_err(|source| EngineError::Spawn { stage, source })?;
        self.check_output(stage, output)
    }

    fn check_output(
        &self,
        stage: Stage,
        output: CommandOutput,
    ) -> Result<CommandOutput, EngineError> {
        if output.is_success() {
            return Ok(output);
        }

        Err(EngineError::CommandFailure {
            program: self.program.clone(),
            stage,
            status: output.code,
            status_text: output.status_text(),
            stderr: output.stderr,
        })
    }
}

/// Renders a command line for logs with the API key masked.
#[must_use]
pub fn render_command(program: &str, args: &[OsString]) -> String {
    let secret_prefix = format!("-var={API_KEY_VAR}=");
    let mut parts = vec![escape(program.into()).into_owned()];
    for arg in args {
        let text = arg.to_string_lossy();
        let shown = if text.starts_with(&secret_prefix) {
            format!("{secret_prefix}***")
        } else {
            text.into_owned()
        };
        parts.push(escape(shown.into()).into_owned());
    }
    parts.join(" ")
}
