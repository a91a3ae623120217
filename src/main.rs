//! Binary entry point for the `powervs-vm` CLI.

use std::env;
use std::io::{self, Write};
use std::process;

use camino::{Utf8Path, Utf8PathBuf};
use clap::Parser;
use thiserror::Error;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use powervs_vm::{
    AccessError, AccessInstaller, ConfigError, DEFAULT_STATE_FILE, DEFAULT_TOFU_BIN, Engine,
    EngineConfig, ProvisionConfig, ProvisionError, ProvisionOrchestrator, StateStore,
    TeardownDriver, TeardownOutcome,
};

mod cli;

use cli::{Cli, LifecycleArgs};

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("invalid working directory: {0}")]
    WorkingDirectory(String),
    #[error("SSH setup error: {0}")]
    Access(#[from] AccessError),
    #[error("provisioning failed: {0}")]
    Provision(#[from] ProvisionError),
}

/// Resolved directories for one invocation.
#[derive(Debug, Eq, PartialEq)]
struct Locations {
    work_dir: Utf8PathBuf,
    state_path: Utf8PathBuf,
}

fn main() {
    init_tracing();
    let cli = Cli::parse();
    let exit_code = match dispatch(cli) {
        Ok(()) => 0,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn dispatch(cli: Cli) -> Result<(), CliError> {
    match cli {
        Cli::Provision(args) => provision(&args),
        Cli::Teardown(args) => {
            teardown(&args);
            Ok(())
        }
    }
}

fn provision(args: &LifecycleArgs) -> Result<(), CliError> {
    let config = ProvisionConfig::load_without_cli_args()?;
    let params = config.as_parameters()?;
    let locations = resolve_locations(args, &current_dir()?);

    let orchestrator = ProvisionOrchestrator::new(
        Engine::with_streaming_runner(config.tofu_bin),
        AccessInstaller::for_current_user()?,
        StateStore::new(locations.state_path),
    );
    orchestrator.execute(&params, &locations.work_dir)?;
    Ok(())
}

fn teardown(args: &LifecycleArgs) -> TeardownOutcome {
    let cwd = match current_dir() {
        Ok(cwd) => cwd,
        Err(err) => {
            warn!("Cleanup failed: {err}");
            return TeardownOutcome::Failed {
                message: err.to_string(),
            };
        }
    };
    let tofu_bin = EngineConfig::load_without_cli_args().map_or_else(
        |err| {
            warn!("ignoring engine configuration ({err}); using {DEFAULT_TOFU_BIN}");
            DEFAULT_TOFU_BIN.to_owned()
        },
        |config| config.tofu_bin,
    );
    let locations = resolve_locations(args, &cwd);

    TeardownDriver::new(Engine::with_streaming_runner(tofu_bin))
        .teardown(&StateStore::new(locations.state_path))
}

fn current_dir() -> Result<Utf8PathBuf, CliError> {
    let cwd = env::current_dir().map_err(|err| CliError::WorkingDirectory(err.to_string()))?;
    Utf8PathBuf::from_path_buf(cwd).map_err(|path| {
        CliError::WorkingDirectory(format!("{} is not valid UTF-8", path.display()))
    })
}

/// Resolves the engine and record locations for one invocation.
///
/// The record defaults to the invocation directory rather than the working
/// directory so a teardown run without `--working-dir` finds it.
fn resolve_locations(args: &LifecycleArgs, cwd: &Utf8Path) -> Locations {
    let work_dir = args
        .working_dir
        .as_deref()
        .map_or_else(|| cwd.to_path_buf(), |dir| absolutize(cwd, dir));
    let state_path = args
        .state_file
        .as_deref()
        .map_or_else(|| cwd.join(DEFAULT_STATE_FILE), |path| absolutize(cwd, path));
    Locations {
        work_dir,
        state_path,
    }
}

fn absolutize(base: &Utf8Path, path: &str) -> Utf8PathBuf {
    let candidate = Utf8Path::new(path);
    if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        base.join(candidate)
    }
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}
