//! Test support utilities shared across unit and integration tests.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::ffi::OsString;
use std::rc::Rc;

use camino::{Utf8Path, Utf8PathBuf};

use crate::runner::{CommandOutput, CommandRunner, RunnerError};

/// Hook run when a scripted response is consumed, for simulating the files
/// an engine step leaves behind.
type SideEffect = Box<dyn Fn(&Utf8Path)>;

/// Scripted command runner that returns pre-seeded outputs in FIFO order.
///
/// Used to drive deterministic engine outcomes without spawning processes.
#[derive(Clone, Default)]
pub struct ScriptedRunner {
    responses: Rc<RefCell<VecDeque<(CommandOutput, Option<SideEffect>)>>>,
    invocations: Rc<RefCell<Vec<CommandInvocation>>>,
}

impl std::fmt::Debug for ScriptedRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedRunner")
            .field("pending", &self.responses.borrow().len())
            .field("invocations", &self.invocations.borrow())
            .finish()
    }
}

/// Records a single invocation made through [`ScriptedRunner`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandInvocation {
    /// Program name as passed to the runner.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<OsString>,
    /// Working directory the command was asked to run in.
    pub dir: Utf8PathBuf,
}

impl CommandInvocation {
    /// Returns a shell-like command string for assertions.
    #[must_use]
    pub fn command_string(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(self.program.clone());
        parts.extend(
            self.args
                .iter()
                .map(|arg| arg.to_string_lossy().into_owned()),
        );
        parts.join(" ")
    }

    /// Returns the `-var=` assignments passed to the program.
    #[must_use]
    pub fn var_assignments(&self) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| arg.to_string_lossy().into_owned())
            .filter(|arg| arg.starts_with("-var="))
            .collect()
    }
}

impl ScriptedRunner {
    /// Creates a new runner with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all invocations recorded so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<CommandInvocation> {
        self.invocations.borrow().clone()
    }

    /// Pushes a successful exit status.
    pub fn push_success(&self) {
        self.push_output(Some(0), "", "");
    }

    /// Pushes a failing exit code with stderr text.
    pub fn push_failure(&self, code: i32) {
        self.push_output(Some(code), "", "simulated failure");
    }

    /// Pushes an explicit command output response.
    pub fn push_output(
        &self,
        code: Option<i32>,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) {
        self.responses.borrow_mut().push_back((
            CommandOutput {
                code,
                stdout: stdout.into(),
                stderr: stderr.into(),
            },
            None,
        ));
    }

    /// Pushes a successful exit status that writes `contents` to `file_name`
    /// inside the invocation's working directory, as `tofu apply` does with
    /// its state file.
    pub fn push_success_writing(&self, file_name: &str, contents: &str) {
        let name = file_name.to_owned();
        let body = contents.to_owned();
        let effect: SideEffect = Box::new(move |dir: &Utf8Path| {
            std::fs::write(dir.join(&name), &body)
                .unwrap_or_else(|err| panic!("scripted write to {dir}/{name}: {err}"));
        });
        self.responses.borrow_mut().push_back((
            CommandOutput {
                code: Some(0),
                stdout: String::new(),
                stderr: String::new(),
            },
            Some(effect),
        ));
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(
        &self,
        program: &str,
        args: &[OsString],
        dir: &Utf8Path,
    ) -> Result<CommandOutput, RunnerError> {
        self.invocations.borrow_mut().push(CommandInvocation {
            program: program.to_owned(),
            args: args.to_vec(),
            dir: dir.to_path_buf(),
        });
        let (output, effect) =
            self.responses
                .borrow_mut()
                .pop_front()
                .ok_or_else(|| RunnerError::Spawn {
                    program: program.to_owned(),
                    message: String::from("no scripted response available"),
                })?;
        if let Some(hook) = effect {
            hook(dir);
        }
        Ok(output)
    }
}

/// Builds the engine state document used across tests: outputs nested under
/// a resource list, as the engine writes them.
#[must_use]
pub fn tfstate_with_outputs(external_ip: Option<&str>, private_key: Option<&str>) -> String {
    let mut outputs = serde_json::Map::new();
    if let Some(ip) = external_ip {
        outputs.insert(String::from("external_ip"), serde_json::Value::from(ip));
    }
    if let Some(key) = private_key {
        outputs.insert(
            String::from("private_key_openssh"),
            serde_json::Value::from(key),
        );
    }
    serde_json::json!({
        "version": 4,
        "resources": [{ "outputs": outputs }]
    })
    .to_string()
}
