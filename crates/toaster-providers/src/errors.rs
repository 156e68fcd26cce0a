// errors.rs
use thiserror::Error;

/// Failures raised while running or reading an external executable.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ToolError {
  /// The command ran and exited with a non-zero status.
  #[error("`{command}` exited with code {code}: {stderr_tail}")]
  NonZeroExit { command: String, code: i32, stderr_tail: String },
  /// The command could not be started at all (missing binary, bad cwd...).
  #[error("could not launch `{command}`: {message}")]
  Launch { command: String, message: String },
  /// The command succeeded but its stdout did not have the expected shape.
  #[error("unexpected output from `{command}`: {message}")]
  Parse { command: String, message: String },
}

impl ToolError {
  pub fn parse(command: impl Into<String>, message: impl Into<String>) -> Self {
    Self::Parse { command: command.into(), message: message.into() }
  }
}
