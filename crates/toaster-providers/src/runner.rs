// runner.rs
//
// Launching external executables. Commands are always an argument vector;
// nothing is ever handed to a shell.
use crate::errors::ToolError;
use log::info;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// Number of trailing stderr lines kept in a `NonZeroExit` error.
const STDERR_TAIL_LINES: usize = 20;

/// An external command: program, arguments and optional redirections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
  program: String,
  args: Vec<String>,
  cwd: Option<PathBuf>,
  stdin_from: Option<PathBuf>,
  stdout_to: Option<PathBuf>,
}

impl ToolCommand {
  pub fn new(program: impl Into<String>) -> Self {
    Self { program: program.into(), args: Vec::new(), cwd: None, stdin_from: None, stdout_to: None }
  }

  pub fn arg(mut self, arg: impl Into<String>) -> Self {
    self.args.push(arg.into());
    self
  }

  pub fn args<I, S>(mut self, args: I) -> Self
    where I: IntoIterator<Item = S>,
          S: Into<String>
  {
    self.args.extend(args.into_iter().map(Into::into));
    self
  }

  /// Path arguments are passed through lossily; archive paths are expected
  /// to be valid UTF-8.
  pub fn path_arg(self, path: &Path) -> Self {
    self.arg(path.to_string_lossy().into_owned())
  }

  pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
    self.cwd = Some(dir.into());
    self
  }

  pub fn stdin_from(mut self, path: impl Into<PathBuf>) -> Self {
    self.stdin_from = Some(path.into());
    self
  }

  pub fn stdout_to(mut self, path: impl Into<PathBuf>) -> Self {
    self.stdout_to = Some(path.into());
    self
  }

  pub fn program(&self) -> &str {
    &self.program
  }

  pub fn get_args(&self) -> &[String] {
    &self.args
  }

  pub fn get_current_dir(&self) -> Option<&Path> {
    self.cwd.as_deref()
  }

  pub fn get_stdout_to(&self) -> Option<&Path> {
    self.stdout_to.as_deref()
  }

  /// Full argv, program first.
  pub fn argv(&self) -> Vec<String> {
    std::iter::once(self.program.clone()).chain(self.args.iter().cloned()).collect()
  }

  /// Human-readable rendering used in logs and error messages.
  pub fn display(&self) -> String {
    self.argv().join(" ")
  }
}

/// Raw result of a finished process, whatever its exit status.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolExit {
  pub code: i32,
  pub stdout: String,
  pub stderr: String,
}

impl ToolExit {
  pub fn success(&self) -> bool {
    self.code == 0
  }
}

/// Captured output of a command that exited successfully.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
  pub stdout: String,
  pub stderr: String,
}

/// Executes external commands.
///
/// Implementations only report launch failures from `execute`; `run` turns a
/// non-zero exit into [`ToolError::NonZeroExit`] carrying the stderr tail.
pub trait ToolRunner: Send + Sync {
  /// Runs the command to completion and returns its exit code and output.
  fn execute(&self, cmd: &ToolCommand) -> Result<ToolExit, ToolError>;

  /// Runs the command and fails unless it exits with status 0.
  fn run(&self, cmd: &ToolCommand) -> Result<ToolOutput, ToolError> {
    let exit = self.execute(cmd)?;
    if !exit.success() {
      return Err(ToolError::NonZeroExit { command: cmd.display(),
                                          code: exit.code,
                                          stderr_tail: stderr_tail(&exit.stderr) });
    }
    Ok(ToolOutput { stdout: exit.stdout, stderr: exit.stderr })
  }
}

pub(crate) fn stderr_tail(stderr: &str) -> String {
  let lines: Vec<&str> = stderr.lines().collect();
  let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
  lines[start..].join("\n")
}

/// Runner backed by `std::process::Command`.
#[derive(Debug, Clone, Default)]
pub struct SystemRunner {
  trace_syscalls: bool,
}

impl SystemRunner {
  pub fn new(trace_syscalls: bool) -> Self {
    Self { trace_syscalls }
  }
}

impl ToolRunner for SystemRunner {
  fn execute(&self, cmd: &ToolCommand) -> Result<ToolExit, ToolError> {
    if self.trace_syscalls {
      match cmd.get_current_dir() {
        Some(dir) => info!("syscall: {} (in {})", cmd.display(), dir.display()),
        None => info!("syscall: {}", cmd.display()),
      }
    }
    let launch_err = |e: std::io::Error| ToolError::Launch { command: cmd.display(), message: e.to_string() };

    let mut command = Command::new(&cmd.program);
    command.args(&cmd.args);
    if let Some(dir) = &cmd.cwd {
      command.current_dir(dir);
    }
    match &cmd.stdin_from {
      Some(path) => {
        command.stdin(Stdio::from(File::open(path).map_err(launch_err)?));
      }
      None => {
        command.stdin(Stdio::null());
      }
    }
    match &cmd.stdout_to {
      Some(path) => {
        command.stdout(Stdio::from(File::create(path).map_err(launch_err)?));
      }
      None => {
        command.stdout(Stdio::piped());
      }
    }
    command.stderr(Stdio::piped());

    // `output` drains both pipes before returning.
    let output = command.output().map_err(launch_err)?;
    Ok(ToolExit { code: output.status.code().unwrap_or(-1),
                  stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                  stderr: String::from_utf8_lossy(&output.stderr).into_owned() })
  }
}
