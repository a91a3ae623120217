//! SSH access to the provisioned machine.
//!
//! Installs the private key, appends a host alias to the user's SSH client
//! configuration, and writes a small `powervs` shim that runs a script file
//! in a login shell on the machine. Writes are not diffed against earlier
//! runs: the alias block is appended every time.

use std::io::{self, Write};

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs::OpenOptions, fs_utf8::Dir};
use thiserror::Error;
use tracing::info;

use crate::files::{open_parent, set_mode, write_with_mode};

/// Host alias written to the SSH client configuration.
pub const SSH_ALIAS: &str = "powervs";

/// Remote user the alias logs in as.
pub const SSH_USER: &str = "root";

/// File name of the private key inside the SSH directory.
pub const KEY_FILE_NAME: &str = "powervs_key";

/// File name of the remote shell shim inside the scripts directory.
pub const SHIM_NAME: &str = "powervs";

/// Shim contents: feed the script named by the first argument to a login
/// shell on the aliased host.
pub const SHIM_SCRIPT: &str = "#!/usr/bin/env sh\nssh powervs sh -l <\"$1\"\n";

/// Errors raised while installing SSH access.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum AccessError {
    /// Raised when no home directory can be determined.
    #[error("cannot determine home directory: {0}")]
    HomeDirectory(String),
    /// Raised when file system operations fail.
    #[error("failed to write {path}: {message}")]
    Io {
        /// Path that could not be written.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
}

/// Writes SSH credentials and helpers below a home directory.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AccessInstaller {
    home: Utf8PathBuf,
}

impl AccessInstaller {
    /// Creates an installer for the current user's home directory.
    ///
    /// # Errors
    ///
    /// Returns [`AccessError::HomeDirectory`] when the home directory is
    /// unknown or not valid UTF-8.
    pub fn for_current_user() -> Result<Self, AccessError> {
        let home = dirs::home_dir()
            .ok_or_else(|| AccessError::HomeDirectory(String::from("HOME is not set")))?;
        let utf8 = Utf8PathBuf::from_path_buf(home).map_err(|path| {
            AccessError::HomeDirectory(format!("{} is not valid UTF-8", path.display()))
        })?;
        Ok(Self::with_home(utf8))
    }

    /// Creates an installer rooted at an arbitrary directory (for testing).
    #[must_use]
    pub fn with_home(home: impl Into<Utf8PathBuf>) -> Self {
        Self { home: home.into() }
    }

    /// `~/.ssh`.
    #[must_use]
    pub fn ssh_dir(&self) -> Utf8PathBuf {
        self.home.join(".ssh")
    }

    /// `~/.ssh/powervs_key`.
    #[must_use]
    pub fn key_path(&self) -> Utf8PathBuf {
        self.ssh_dir().join(KEY_FILE_NAME)
    }

    /// `~/.ssh/config`.
    #[must_use]
    pub fn config_path(&self) -> Utf8PathBuf {
        self.ssh_dir().join("config")
    }

    /// `~/.local/bin`.
    #[must_use]
    pub fn bin_dir(&self) -> Utf8PathBuf {
        self.home.join(".local").join("bin")
    }

    /// `~/.local/bin/powervs`.
    #[must_use]
    pub fn shim_path(&self) -> Utf8PathBuf {
        self.bin_dir().join(SHIM_NAME)
    }

    /// Installs the private key and appends the host alias for `address`.
    ///
    /// # Errors
    ///
    /// Returns [`AccessError::Io`] when any file cannot be written.
    pub fn install(&self, address: &str, private_key: &str) -> Result<(), AccessError> {
        info!("Setting up SSH configuration...");
        self.ensure_ssh_dir()?;

        let key_path = self.key_path();
        write_file(&key_path, private_key, 0o600)?;

        let config_path = self.config_path();
        append_file(&config_path, &host_block(address, &key_path))
    }

    /// Writes the `powervs` shim into `~/.local/bin` and returns its path.
    ///
    /// # Errors
    ///
    /// Returns [`AccessError::Io`] when the directory or file cannot be
    /// written.
    pub fn install_shim(&self) -> Result<Utf8PathBuf, AccessError> {
        info!("Setting up custom shell...");
        let bin_dir = self.bin_dir();
        Dir::create_ambient_dir_all(&bin_dir, ambient_authority())
            .map_err(|err| io_error(&bin_dir, &err))?;

        let shim_path = self.shim_path();
        write_file(&shim_path, SHIM_SCRIPT, 0o755)?;
        Ok(shim_path)
    }

    fn ensure_ssh_dir(&self) -> Result<(), AccessError> {
        let ssh_dir = self.ssh_dir();
        let exists = ssh_dir
            .try_exists()
            .map_err(|err| io_error(&ssh_dir, &err))?;
        if exists {
            return Ok(());
        }
        Dir::create_ambient_dir_all(&ssh_dir, ambient_authority())
            .map_err(|err| io_error(&ssh_dir, &err))?;
        set_mode(&ssh_dir, 0o700).map_err(|err| io_error(&ssh_dir, &err))
    }
}

/// Renders the SSH client configuration block for the alias.
#[must_use]
pub fn host_block(address: &str, key_path: &Utf8Path) -> String {
    format!(
        "\nHost {SSH_ALIAS}\n  HostName {address}\n  User {SSH_USER}\n  IdentityFile {key_path}\n  StrictHostKeyChecking no\n  UserKnownHostsFile /dev/null\n  LogLevel ERROR\n"
    )
}

fn write_file(path: &Utf8Path, contents: &str, mode: u32) -> Result<(), AccessError> {
    write_with_mode(path, contents.as_bytes(), mode).map_err(|err| io_error(path, &err))
}

fn append_file(path: &Utf8Path, contents: &str) -> Result<(), AccessError> {
    let (dir, file_name) = open_parent(path).map_err(|err| io_error(path, &err))?;
    let mut options = OpenOptions::new();
    options.create(true).append(true);
    let mut file = dir
        .open_with(file_name, &options)
        .map_err(|err| io_error(path, &err))?;
    file.write_all(contents.as_bytes())
        .map_err(|err| io_error(path, &err))
}

fn io_error(path: &Utf8Path, err: &io::Error) -> AccessError {
    AccessError::Io {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}
