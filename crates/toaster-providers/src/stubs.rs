// stubs.rs
//
// Scripted runner for tests and dry runs. No external executable is ever
// started: each program name is answered by a registered responder.
use crate::errors::ToolError;
use crate::runner::{ToolCommand, ToolExit, ToolRunner};
use std::sync::{Mutex, MutexGuard};

type Responder = Box<dyn Fn(&ToolCommand) -> Result<ToolExit, ToolError> + Send + Sync>;

/// A [`ToolRunner`] that answers from registered responders and records
/// every argv it receives.
///
/// When several responders are registered for the same program the most
/// recently registered one answers.
pub struct StubRunner {
  responders: Vec<(String, Responder)>,
  calls: Mutex<Vec<Vec<String>>>,
}

impl StubRunner {
  pub fn new() -> Self {
    Self { responders: Vec::new(), calls: Mutex::new(Vec::new()) }
  }

  /// Answers `program` with a closure that may inspect the command and
  /// create files before returning.
  pub fn respond<F>(mut self, program: &str, f: F) -> Self
    where F: Fn(&ToolCommand) -> Result<ToolExit, ToolError> + Send + Sync + 'static
  {
    self.responders.push((program.to_string(), Box::new(f)));
    self
  }

  /// Answers `program` with a fixed stdout and exit code 0.
  pub fn reply(self, program: &str, stdout: &str) -> Self {
    let stdout = stdout.to_string();
    self.respond(program, move |_| Ok(ToolExit { code: 0, stdout: stdout.clone(), stderr: String::new() }))
  }

  /// Answers `program` with a failing exit.
  pub fn fail(self, program: &str, code: i32, stderr: &str) -> Self {
    let stderr = stderr.to_string();
    self.respond(program, move |_| Ok(ToolExit { code, stdout: String::new(), stderr: stderr.clone() }))
  }

  /// Every argv seen so far, program first.
  pub fn calls(&self) -> Vec<Vec<String>> {
    self.lock().clone()
  }

  /// Argvs of the calls made to one program.
  pub fn calls_to(&self, program: &str) -> Vec<Vec<String>> {
    self.lock().iter().filter(|argv| argv.first().map(String::as_str) == Some(program)).cloned().collect()
  }

  fn lock(&self) -> MutexGuard<'_, Vec<Vec<String>>> {
    self.calls.lock().unwrap_or_else(|e| e.into_inner())
  }
}

impl Default for StubRunner {
  fn default() -> Self {
    Self::new()
  }
}

impl ToolRunner for StubRunner {
  fn execute(&self, cmd: &ToolCommand) -> Result<ToolExit, ToolError> {
    self.lock().push(cmd.argv());
    let responder = self.responders
                        .iter()
                        .rev()
                        .find(|(program, _)| program == cmd.program())
                        .map(|(_, r)| r)
                        .ok_or_else(|| ToolError::Launch { command: cmd.display(),
                                                           message: "no stub registered for this program".into() })?;
    let mut exit = responder(cmd)?;
    if let Some(path) = cmd.get_stdout_to() {
      std::fs::write(path, &exit.stdout).map_err(|e| ToolError::Launch { command: cmd.display(),
                                                                         message: e.to_string() })?;
      exit.stdout.clear();
    }
    Ok(exit)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn latest_responder_wins_and_calls_are_recorded() {
    let runner = StubRunner::new().reply("git", "old\n").reply("git", "new\n");
    let out = runner.run(&ToolCommand::new("git").args(["rev-parse", "HEAD"])).unwrap();
    assert_eq!(out.stdout, "new\n");
    assert_eq!(runner.calls(), vec![vec!["git".to_string(), "rev-parse".into(), "HEAD".into()]]);
  }

  #[test]
  fn unknown_program_is_a_launch_error() {
    let runner = StubRunner::new();
    assert!(matches!(runner.run(&ToolCommand::new("pat")), Err(ToolError::Launch { .. })));
  }

  #[test]
  fn failing_stub_surfaces_non_zero_exit() {
    let runner = StubRunner::new().fail("pam", 2, "pam: cannot open file");
    match runner.run(&ToolCommand::new("pam")) {
      Err(ToolError::NonZeroExit { code, stderr_tail, .. }) => {
        assert_eq!(code, 2);
        assert_eq!(stderr_tail, "pam: cannot open file");
      }
      other => panic!("unexpected {:?}", other),
    }
  }
}
