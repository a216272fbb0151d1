use ferve_core::protocol::CommandOutcome;
use std::{
    io,
    path::{Path, PathBuf},
    process::Stdio,
    time::Duration,
};
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("Command timeout after {}s", .0.as_secs_f64())]
    Timeout(Duration),
    #[error("failed to spawn {program}: {source}")]
    Spawn { program: String, source: io::Error },
    #[error("failed to collect output: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, Default)]
pub struct ExecOptions {
    pub cwd: Option<PathBuf>,
    pub timeout: Option<Duration>,
}

impl ExecOptions {
    pub fn in_dir(cwd: impl Into<PathBuf>) -> Self {
        Self {
            cwd: Some(cwd.into()),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Runs shell strings and programs with a bounded lifetime. A child that outlives
/// its timeout is killed when its handle is dropped.
#[derive(Debug, Clone)]
pub struct CommandRunner {
    default_timeout: Duration,
}

impl CommandRunner {
    pub fn new(default_timeout: Duration) -> Self {
        Self { default_timeout }
    }

    /// Passes `command` to the platform shell, so pipes and redirection work.
    pub async fn execute(&self, command: &str, opts: ExecOptions) -> CommandOutcome {
        match self.run_shell(command, opts).await {
            Ok(output) => CommandOutcome::completed(output.stdout, output.stderr, output.exit_code),
            Err(err) => {
                warn!(event = "command_failed", command = command, error = %err);
                CommandOutcome::failed(err.to_string())
            }
        }
    }

    pub async fn run_shell(
        &self,
        command: &str,
        opts: ExecOptions,
    ) -> Result<ProcessOutput, RunnerError> {
        let mut cmd = shell_command(command);
        self.run(&mut cmd, shell_name(), opts).await
    }

    pub async fn run_program(
        &self,
        program: &str,
        args: &[&str],
        opts: ExecOptions,
    ) -> Result<ProcessOutput, RunnerError> {
        let mut cmd = Command::new(program);
        cmd.args(args);
        self.run(&mut cmd, program, opts).await
    }

    async fn run(
        &self,
        cmd: &mut Command,
        program: &str,
        opts: ExecOptions,
    ) -> Result<ProcessOutput, RunnerError> {
        if let Some(cwd) = &opts.cwd {
            cmd.current_dir(cwd);
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let child = cmd.spawn().map_err(|source| RunnerError::Spawn {
            program: program.to_string(),
            source,
        })?;

        let timeout = opts.timeout.unwrap_or(self.default_timeout);
        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(result) => result?,
            Err(_) => return Err(RunnerError::Timeout(timeout)),
        };
        debug!(
            event = "command_exit",
            program = program,
            code = output.status.code().unwrap_or(-1)
        );
        Ok(ProcessOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code(),
        })
    }

    /// Launches a desktop program and forgets about it; the runtime reaps it on exit.
    pub fn spawn_detached(&self, program: &str, args: &[&Path]) -> Result<(), RunnerError> {
        Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map(|_| ())
            .map_err(|source| RunnerError::Spawn {
                program: program.to_string(),
                source,
            })
    }
}

#[cfg(unix)]
fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command);
    cmd
}

#[cfg(windows)]
fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(command);
    cmd
}

#[cfg(unix)]
fn shell_name() -> &'static str {
    "sh"
}

#[cfg(windows)]
fn shell_name() -> &'static str {
    "cmd"
}
