//! Command-line interface definitions for the `powervs-vm` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::{Args, Parser};

/// Top-level CLI for the `powervs-vm` binary.
#[derive(Debug, Parser)]
#[command(
    name = "powervs-vm",
    about = "Provision an IBM Power Virtual Server VM with OpenTofu and tear it down later",
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// Create the VM, record it for teardown, and configure SSH access.
    #[command(
        name = "provision",
        about = "Create the VM, record it for teardown, and configure SSH access"
    )]
    Provision(LifecycleArgs),
    /// Destroy the VM recorded by an earlier provision run.
    #[command(
        name = "teardown",
        about = "Destroy the VM recorded by an earlier provision run"
    )]
    Teardown(LifecycleArgs),
}

/// Location arguments shared by both subcommands.
#[derive(Debug, Args)]
pub(crate) struct LifecycleArgs {
    /// Directory holding the OpenTofu configuration. Defaults to the current
    /// directory.
    #[arg(long, value_name = "DIR")]
    pub(crate) working_dir: Option<String>,
    /// Lifecycle record path. Defaults to `.cleanup-state.json` in the
    /// current directory, independent of `--working-dir`.
    #[arg(long, value_name = "PATH")]
    pub(crate) state_file: Option<String>,
}
