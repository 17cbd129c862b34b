//! Subprocess execution.
//!
//! Every external binary the installer drives (`apt-get`, `oras`, `helm`,
//! `sysctl`, `modprobe`, ...) goes through [`CommandRunner`] so phases can be
//! exercised against a recording fake.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// A command to run, with its environment and working directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandSpec {
    /// Program name or path.
    pub program: String,
    /// Positional arguments.
    pub args: Vec<String>,
    /// Extra environment variables.
    pub env: Vec<(String, String)>,
    /// Working directory, if not the current one.
    pub current_dir: Option<PathBuf>,
    /// Bytes written to stdin.
    pub stdin: Option<Vec<u8>>,
    /// Whether the command needs root.
    pub privileged: bool,
}

impl CommandSpec {
    /// Start a command for `program`.
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn path_arg(self, path: &Path) -> Self {
        self.arg(path.to_string_lossy())
    }

    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    #[must_use]
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    #[must_use]
    pub fn stdin(mut self, input: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    /// Mark the command as requiring root.
    #[must_use]
    pub fn privileged(mut self) -> Self {
        self.privileged = true;
        self
    }

    /// Render the command line for logs and error messages.
    ///
    /// Environment values are not included since they may carry credentials.
    #[must_use]
    pub fn display(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(self.program.clone());
        parts.extend(self.args.iter().cloned());
        parts.join(" ")
    }
}

/// Captured result of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code; `None` when killed by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Successful output with the given stdout.
    #[must_use]
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Failed output with the given stderr.
    #[must_use]
    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    #[must_use]
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Capability to run external commands.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run a command to completion and capture its output.
    ///
    /// Only spawn failures are errors; a non-zero exit is reported through
    /// [`CommandOutput::code`].
    async fn run(&self, spec: &CommandSpec) -> std::io::Result<CommandOutput>;

    /// Whether `program` resolves on `PATH`.
    fn has_program(&self, program: &str) -> bool;
}

/// Run a command and fail on a non-zero exit, carrying stderr in the error.
///
/// # Errors
///
/// Returns an error if the command cannot be spawned or exits non-zero.
pub async fn run_checked(runner: &dyn CommandRunner, spec: &CommandSpec) -> Result<CommandOutput> {
    let output = runner
        .run(spec)
        .await
        .with_context(|| format!("Failed to execute {}", spec.program))?;

    if !output.success() {
        let code = output
            .code
            .map_or_else(|| "signal".to_string(), |c| c.to_string());
        anyhow::bail!(
            "{} failed (exit {code}): {}",
            spec.display(),
            output.stderr.trim()
        );
    }

    Ok(output)
}

/// Runs commands on the local host through `tokio::process`.
#[derive(Debug, Clone)]
pub struct SystemRunner {
    /// Prefix privileged commands with `sudo`.
    use_sudo: bool,
}

impl SystemRunner {
    #[must_use]
    pub fn new(use_sudo: bool) -> Self {
        Self { use_sudo }
    }

    /// Use `sudo` for privileged commands unless already running as root.
    #[must_use]
    pub fn detect() -> Self {
        let is_root = std::env::var("USER").is_ok_and(|u| u == "root")
            || dirs::home_dir().is_some_and(|h| h == Path::new("/root"));
        Self::new(!is_root && which::which("sudo").is_ok())
    }

    fn build(&self, spec: &CommandSpec) -> tokio::process::Command {
        let mut cmd = if spec.privileged && self.use_sudo {
            let mut cmd = tokio::process::Command::new("sudo");
            if !spec.env.is_empty() {
                // names only; values stay out of the process table
                let names: Vec<&str> = spec.env.iter().map(|(k, _)| k.as_str()).collect();
                cmd.arg(format!("--preserve-env={}", names.join(",")));
            }
            cmd.arg(&spec.program);
            cmd
        } else {
            tokio::process::Command::new(&spec.program)
        };

        cmd.envs(spec.env.iter().map(|(k, v)| (k, v)))
            .args(&spec.args)
            .stdin(if spec.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = &spec.current_dir {
            cmd.current_dir(dir);
        }
        cmd
    }
}

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, spec: &CommandSpec) -> std::io::Result<CommandOutput> {
        debug!(command = %spec.display(), privileged = spec.privileged, "Running command");

        let mut child = self.build(spec).spawn()?;

        if let (Some(input), Some(mut stdin)) = (&spec.stdin, child.stdin.take()) {
            stdin.write_all(input).await?;
            drop(stdin);
        }

        let output = child.wait_with_output().await?;
        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }

    fn has_program(&self, program: &str) -> bool {
        which::which(program).is_ok()
    }
}

/// Recording runner for unit tests.
#[cfg(test)]
pub(crate) mod fake {
    use std::collections::HashSet;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::{CommandOutput, CommandRunner, CommandSpec};

    #[derive(Default)]
    pub(crate) struct FakeRunner {
        pub calls: Mutex<Vec<CommandSpec>>,
        /// `(display prefix, output)`; first match wins, default is success.
        pub responses: Mutex<Vec<(String, CommandOutput)>>,
        pub programs: HashSet<String>,
    }

    impl FakeRunner {
        pub(crate) fn with_programs(programs: &[&str]) -> Self {
            Self {
                programs: programs.iter().map(|p| (*p).to_string()).collect(),
                ..Self::default()
            }
        }

        pub(crate) fn respond(&self, prefix: &str, output: CommandOutput) {
            self.responses
                .lock()
                .unwrap()
                .push((prefix.to_string(), output));
        }

        pub(crate) fn commands(&self) -> Vec<String> {
            self.calls.lock().unwrap().iter().map(CommandSpec::display).collect()
        }

        pub(crate) fn find(&self, prefix: &str) -> Option<CommandSpec> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .find(|c| c.display().starts_with(prefix))
                .cloned()
        }
    }

    #[async_trait]
    impl CommandRunner for FakeRunner {
        async fn run(&self, spec: &CommandSpec) -> std::io::Result<CommandOutput> {
            self.calls.lock().unwrap().push(spec.clone());
            let display = spec.display();
            let responses = self.responses.lock().unwrap();
            Ok(responses
                .iter()
                .find(|(prefix, _)| display.starts_with(prefix.as_str()))
                .map_or_else(|| CommandOutput::ok(""), |(_, out)| out.clone()))
        }

        fn has_program(&self, program: &str) -> bool {
            self.programs.contains(program)
        }
    }
}
