// manipulate.rs
//
// Runs a manipulator inside a scratch directory. Inputs are copied in, the
// plugin writes its archive there, and only a verified output is promoted to
// the destination. The scratch directory is removed on every exit path.
use crate::plugins::Manipulator;
use log::{debug, info, warn};
use serde_json::Value as JsonValue;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use toaster_domain::{ContentStore, DebugFlags, ToasterError};
use toaster_providers::ToolRunner;

pub struct ManipulatorRuntime<'a> {
  runner: &'a dyn ToolRunner,
  debug: DebugFlags,
  scratch_root: Option<PathBuf>,
}

impl<'a> ManipulatorRuntime<'a> {
  pub fn new(runner: &'a dyn ToolRunner, debug: DebugFlags) -> Self {
    Self { runner, debug, scratch_root: None }
  }

  /// Creates scratch directories under `root` instead of the system temp dir.
  pub fn with_scratch_root(mut self, root: impl Into<PathBuf>) -> Self {
    self.scratch_root = Some(root.into());
    self
  }

  fn scratch(&self, plugin: &str) -> Result<TempDir, ToasterError> {
    let prefix = format!("toaster-{}-", plugin);
    let mut builder = tempfile::Builder::new();
    builder.prefix(&prefix);
    let dir = match &self.scratch_root {
      Some(root) => builder.tempdir_in(root),
      None => builder.tempdir(),
    };
    dir.map_err(|e| ToasterError::File(format!("cannot create scratch directory: {}", e)))
  }

  /// Runs `manipulator` over `inputs` and places its output at `destination`.
  pub fn run(&self, manipulator: &dyn Manipulator, inputs: &[PathBuf], args: &JsonValue, destination: &Path)
             -> Result<PathBuf, ToasterError> {
    if inputs.is_empty() {
      return Err(ToasterError::BadInput(format!("{}: no input archive given", manipulator.name())));
    }
    if let Some(missing) = inputs.iter().find(|p| !p.is_file()) {
      return Err(ToasterError::File(format!("{} does not exist", missing.display())));
    }
    if destination.exists() {
      return Err(ToasterError::Archiving(format!("refusing to overwrite existing file {}", destination.display())));
    }
    let used = if manipulator.multi_input() {
      inputs
    } else {
      if inputs.len() > 1 {
        warn!("{} takes a single archive, ignoring {} extra input(s)", manipulator.name(), inputs.len() - 1);
      }
      &inputs[..1]
    };

    let workdir = self.scratch(manipulator.name())?;
    let result = self.run_in(workdir.path(), manipulator, used, args, destination);
    if self.debug.manipulator {
      let kept = workdir.keep();
      info!("kept manipulator scratch directory {}", kept.display());
    }
    result
  }

  fn run_in(&self, workdir: &Path, manipulator: &dyn Manipulator, inputs: &[PathBuf], args: &JsonValue,
            destination: &Path)
            -> Result<PathBuf, ToasterError> {
    let mut copies = Vec::with_capacity(inputs.len());
    for (i, input) in inputs.iter().enumerate() {
      let name = input.file_name()
                      .ok_or_else(|| ToasterError::File(format!("{} has no file name", input.display())))?;
      let copy = workdir.join(format!("{}_{}", i, name.to_string_lossy()));
      fs::copy(input, &copy)?;
      copies.push(copy);
    }
    let output = workdir.join(format!("output.{}.ar", manipulator.name()));
    debug!("{} in {}: {} input(s) -> {}", manipulator.name(), workdir.display(), copies.len(), output.display());
    manipulator.manipulate(self.runner, &copies, &output, args)?;
    if !output.is_file() {
      return Err(ToasterError::Toaster(format!("manipulator {} did not produce an output archive",
                                               manipulator.name())));
    }
    let store = ContentStore::new(workdir, "");
    store.place_at(&output, destination, true)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::plugins;
  use serde_json::json;
  use toaster_providers::{StubRunner, ToolExit};

  fn input(dir: &Path) -> PathBuf {
    let p = dir.join("guppi.ar");
    fs::write(&p, b"raw archive").unwrap();
    p
  }

  #[test]
  fn output_is_promoted_and_scratch_removed() {
    let dir = tempfile::tempdir().unwrap();
    let scratch = dir.path().join("scratch");
    fs::create_dir(&scratch).unwrap();
    let runner = StubRunner::new().reply("pam", "");
    let pamit = plugins::manipulator("pamit").unwrap();
    let dest = dir.path().join("out").join("guppi.pamit.ar");
    let rt = ManipulatorRuntime::new(&runner, DebugFlags::default()).with_scratch_root(&scratch);
    let placed = rt.run(pamit.as_ref(), &[input(dir.path())], &json!({}), &dest).unwrap();
    assert_eq!(placed, dest);
    assert_eq!(fs::read(&dest).unwrap(), b"raw archive");
    assert_eq!(fs::read_dir(&scratch).unwrap().count(), 0);
    // The input was copied, not moved.
    assert!(dir.path().join("guppi.ar").exists());
  }

  #[test]
  fn failing_plugin_leaves_destination_untouched_and_cleans_up() {
    let dir = tempfile::tempdir().unwrap();
    let scratch = dir.path().join("scratch");
    fs::create_dir(&scratch).unwrap();
    let runner = StubRunner::new().fail("pam", 1, "pam: bad archive");
    let pamit = plugins::manipulator("pamit").unwrap();
    let dest = dir.path().join("out.ar");
    let rt = ManipulatorRuntime::new(&runner, DebugFlags::default()).with_scratch_root(&scratch);
    let err = rt.run(pamit.as_ref(), &[input(dir.path())], &json!({}), &dest).unwrap_err();
    assert_eq!(err.kind(), "SystemCallError");
    assert!(!dest.exists());
    assert_eq!(fs::read_dir(&scratch).unwrap().count(), 0);
  }

  #[test]
  fn existing_destination_is_an_archiving_error() {
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("taken.ar");
    fs::write(&dest, b"keep me").unwrap();
    let runner = StubRunner::new().respond("pam", |_| Ok(ToolExit::default()));
    let pamit = plugins::manipulator("pamit").unwrap();
    let err = ManipulatorRuntime::new(&runner, DebugFlags::default()).run(pamit.as_ref(),
                                                                          &[input(dir.path())],
                                                                          &json!({}),
                                                                          &dest)
                                                                     .unwrap_err();
    assert_eq!(err.kind(), "ArchivingError");
    assert_eq!(fs::read(&dest).unwrap(), b"keep me");
    assert!(runner.calls().is_empty());
  }
}
