//! External command execution for engine invocations.
//!
//! Every invocation names its working directory explicitly; the process-wide
//! current directory is never changed.

use std::ffi::OsString;
use std::io::{self, Read, Write};
use std::process::{Command, Stdio};
use std::thread::{self, JoinHandle};

use camino::Utf8Path;
use thiserror::Error;

/// Errors raised before a command produces an exit status.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum RunnerError {
    /// Raised when a command cannot be started or awaited.
    #[error("failed to spawn {program}: {message}")]
    Spawn {
        /// Command that failed to start.
        program: String,
        /// Operating system error string.
        message: String,
    },
}

/// Result of running an external command.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandOutput {
    /// Exit code reported by the process, if available.
    pub code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl CommandOutput {
    /// Returns `true` when the exit code equals zero.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.code, Some(0))
    }

    /// Human readable exit status, `unknown` when the process was killed.
    #[must_use]
    pub fn status_text(&self) -> String {
        self.code
            .map_or_else(|| String::from("unknown"), |code| code.to_string())
    }
}

/// Abstraction over command execution to support fakes in tests.
pub trait CommandRunner {
    /// Runs `program` with `args` inside `dir`, capturing stdout and stderr.
    ///
    /// # Errors
    ///
    /// Returns [`RunnerError::Spawn`] if the command cannot be started.
    fn run(
        &self,
        program: &str,
        args: &[OsString],
        dir: &Utf8Path,
    ) -> Result<CommandOutput, RunnerError>;
}

/// Runner that forwards child output to this process as it arrives while
/// also capturing it, so long engine runs stay visible in CI logs.
#[derive(Clone, Debug, Default)]
pub struct StreamingCommandRunner;

impl CommandRunner for StreamingCommandRunner {
    fn run(
        &self,
        program: &str,
        args: &[OsString],
        dir: &Utf8Path,
    ) -> Result<CommandOutput, RunnerError> {
        let mut child = Command::new(program)
            .args(args)
            .current_dir(dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| spawn_error(program, &err))?;

        let stdout = child
            .stdout
            .take()
            .map(|pipe| thread::spawn(move || tee(pipe, io::stdout())));
        let stderr = child
            .stderr
            .take()
            .map(|pipe| thread::spawn(move || tee(pipe, io::stderr())));

        let status = child.wait().map_err(|err| spawn_error(program, &err))?;

        Ok(CommandOutput {
            code: status.code(),
            stdout: join_capture(stdout),
            stderr: join_capture(stderr),
        })
    }
}

fn spawn_error(program: &str, err: &io::Error) -> RunnerError {
    RunnerError::Spawn {
        program: program.to_owned(),
        message: err.to_string(),
    }
}

fn tee(mut source: impl Read, mut sink: impl Write) -> String {
    let mut captured = Vec::new();
    let mut buffer = [0_u8; 8192];
    loop {
        match source.read(&mut buffer) {
            Ok(0) => break,
            Ok(read) => {
                let chunk = buffer.get(..read).unwrap_or_default();
                // Forwarding is best effort; the capture is what callers inspect.
                sink.write_all(chunk).ok();
                captured.extend_from_slice(chunk);
            }
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(_) => break,
        }
    }
    sink.flush().ok();
    String::from_utf8_lossy(&captured).into_owned()
}

fn join_capture(handle: Option<JoinHandle<String>>) -> String {
    handle
        .and_then(|thread| thread.join().ok())
        .unwrap_or_default()
}
