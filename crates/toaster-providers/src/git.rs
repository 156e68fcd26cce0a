//! Queries against git working copies, plus the `psrchive --version`
//! fallback used when the library was not installed from a git checkout.

use crate::errors::ToolError;
use crate::runner::{ToolCommand, ToolRunner};
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;

static COMMIT_HASH: Lazy<Result<Regex, regex::Error>> = Lazy::new(|| Regex::new(r"^[0-9a-f]{7,40}$"));

/// `git rev-parse HEAD` run inside `repo`.
pub fn rev_parse_head_command(repo: &Path) -> ToolCommand {
  ToolCommand::new("git").args(["rev-parse", "HEAD"]).current_dir(repo)
}

/// `git diff --quiet` run inside `repo`; exit 0 means no uncommitted changes.
pub fn diff_quiet_command(repo: &Path) -> ToolCommand {
  ToolCommand::new("git").args(["diff", "--quiet"]).current_dir(repo)
}

pub fn psrchive_version_command() -> ToolCommand {
  ToolCommand::new("psrchive").arg("--version")
}

/// Returns the commit hash HEAD points at. Fails when `repo` is not a git
/// working copy or the output does not look like a hash.
pub fn head_commit(runner: &dyn ToolRunner, repo: &Path) -> Result<String, ToolError> {
  let cmd = rev_parse_head_command(repo);
  let out = runner.run(&cmd)?;
  let hash = out.stdout.trim();
  let pattern = COMMIT_HASH.as_ref().map_err(|e| ToolError::parse(cmd.display(), e.to_string()))?;
  if !pattern.is_match(hash) {
    return Err(ToolError::parse(cmd.display(), format!("not a commit hash: {:?}", hash)));
  }
  Ok(hash.to_string())
}

/// `true` when the working copy has no unstaged modifications.
///
/// `git diff --quiet` exits 1 when there are changes; any other non-zero
/// status is a real failure (not a repository, git missing).
pub fn is_clean(runner: &dyn ToolRunner, repo: &Path) -> Result<bool, ToolError> {
  let cmd = diff_quiet_command(repo);
  let exit = runner.execute(&cmd)?;
  match exit.code {
    0 => Ok(true),
    1 => Ok(false),
    code => Err(ToolError::NonZeroExit { command: cmd.display(),
                                         code,
                                         stderr_tail: crate::runner::stderr_tail(&exit.stderr) }),
  }
}

/// First non-empty line of `psrchive --version`.
pub fn psrchive_version(runner: &dyn ToolRunner) -> Result<String, ToolError> {
  let cmd = psrchive_version_command();
  let out = runner.run(&cmd)?;
  out.stdout
     .lines()
     .map(str::trim)
     .find(|l| !l.is_empty())
     .map(str::to_string)
     .ok_or_else(|| ToolError::parse(cmd.display(), "empty version string"))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::runner::ToolExit;
  use crate::stubs::StubRunner;

  const HASH: &str = "3f2c1a9e0b7d4c5e6f708192a3b4c5d6e7f80912";

  #[test]
  fn head_commit_runs_in_repo_dir() {
    let runner = StubRunner::new().respond("git", |cmd| {
                                    assert_eq!(cmd.get_current_dir(), Some(Path::new("/srv/toaster")));
                                    Ok(ToolExit { code: 0, stdout: format!("{}\n", HASH), stderr: String::new() })
                                  });
    assert_eq!(head_commit(&runner, Path::new("/srv/toaster")).unwrap(), HASH);
  }

  #[test]
  fn head_commit_rejects_garbage() {
    let runner = StubRunner::new().reply("git", "fatal-ish output\n");
    assert!(matches!(head_commit(&runner, Path::new(".")), Err(ToolError::Parse { .. })));
  }

  #[test]
  fn diff_exit_status_maps_to_clean_flag() {
    let clean = StubRunner::new().reply("git", "");
    assert!(is_clean(&clean, Path::new(".")).unwrap());
    let dirty = StubRunner::new().fail("git", 1, "");
    assert!(!is_clean(&dirty, Path::new(".")).unwrap());
    let broken = StubRunner::new().fail("git", 128, "fatal: not a git repository");
    assert!(matches!(is_clean(&broken, Path::new(".")), Err(ToolError::NonZeroExit { code: 128, .. })));
  }

  #[test]
  fn psrchive_version_takes_first_line() {
    let runner = StubRunner::new().reply("psrchive", "\nPSRCHIVE 2023-10-01\nbuilt with ...\n");
    assert_eq!(psrchive_version(&runner).unwrap(), "PSRCHIVE 2023-10-01");
  }
}
