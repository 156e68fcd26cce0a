//! Plugin families and their static registries.
//!
//! Each family maps a plugin name to a constructor. Looking up an unknown name
//! fails with `UnrecognizedValue` and lists what is available.

pub mod diagnostics;
pub mod manipulators;
pub mod readers;

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::path::{Path, PathBuf};
use toaster_domain::{DiagnosticKind, DiagnosticValue, ToaMeasurement, ToasterError};
use toaster_providers::{ArchiveHeader, ToolRunner};

/// One accepted argument of a plugin, for help output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PluginArg {
  pub name: &'static str,
  pub help: &'static str,
}

/// Archive-to-archive transformation.
pub trait Manipulator: Send + Sync {
  fn name(&self) -> &'static str;
  fn description(&self) -> &'static str;
  fn arguments(&self) -> &'static [PluginArg];

  /// Whether every input is consumed. Otherwise only the first one is.
  fn multi_input(&self) -> bool {
    false
  }

  /// Checks `args` and returns their canonical JSON form, defaults filled in.
  fn canonical_args(&self, args: &JsonValue) -> Result<String, ToasterError>;

  /// Writes exactly one archive at `output`.
  fn manipulate(&self, runner: &dyn ToolRunner, inputs: &[PathBuf], output: &Path, args: &JsonValue)
                -> Result<(), ToasterError>;
}

/// Computes one value from an archive.
pub trait Diagnostic: Send + Sync {
  fn name(&self) -> &'static str;
  fn description(&self) -> &'static str;
  fn kind(&self) -> DiagnosticKind;

  /// `plot_path` is where plot diagnostics write their PNG; others ignore it.
  fn compute(&self, runner: &dyn ToolRunner, archive: &Path, header: &ArchiveHeader, plot_path: &Path)
             -> Result<DiagnosticValue, ToasterError>;
}

/// One TOA line as emitted by a TOA generator.
#[derive(Debug, Clone, PartialEq)]
pub struct ToaRecord {
  pub archive: String,
  pub obscode: String,
  pub measurement: ToaMeasurement,
}

/// Parser for the output of one TOA generator.
pub trait ToaReader: Send + Sync {
  fn name(&self) -> &'static str;
  fn description(&self) -> &'static str;
  fn parse(&self, stdout: &str) -> Result<Vec<ToaRecord>, ToasterError>;
}

type ManipulatorCtor = fn() -> Box<dyn Manipulator>;
type DiagnosticCtor = fn() -> Box<dyn Diagnostic>;
type ReaderCtor = fn() -> Box<dyn ToaReader>;

static MANIPULATORS: Lazy<IndexMap<&'static str, ManipulatorCtor>> = Lazy::new(|| {
  let mut m: IndexMap<&'static str, ManipulatorCtor> = IndexMap::new();
  m.insert("pamit", || Box::new(manipulators::Pamit));
  m.insert("ddfixfreq", || Box::new(manipulators::DdFixFreq));
  m
});

static DIAGNOSTICS: Lazy<IndexMap<&'static str, DiagnosticCtor>> = Lazy::new(|| {
  let mut m: IndexMap<&'static str, DiagnosticCtor> = IndexMap::new();
  m.insert("snr", || Box::new(diagnostics::Snr));
  m.insert("maskpct", || Box::new(diagnostics::MaskPct));
  m.insert("weights", || Box::new(diagnostics::Weights));
  m.insert("profile", || Box::new(diagnostics::Profile));
  m.insert("composite", || Box::new(diagnostics::Composite));
  m
});

static READERS: Lazy<IndexMap<&'static str, ReaderCtor>> = Lazy::new(|| {
  let mut m: IndexMap<&'static str, ReaderCtor> = IndexMap::new();
  m.insert("tempo2", || Box::new(readers::Tempo2Reader));
  m
});

fn unknown<T>(family: &str, name: &str, available: impl Iterator<Item = &'static str>) -> Result<T, ToasterError> {
  let names: Vec<&str> = available.collect();
  Err(ToasterError::UnrecognizedValue(format!("unknown {} '{}'; available: {}", family, name, names.join(", "))))
}

pub fn manipulator(name: &str) -> Result<Box<dyn Manipulator>, ToasterError> {
  match MANIPULATORS.get(name) {
    Some(ctor) => Ok(ctor()),
    None => unknown("manipulator", name, MANIPULATORS.keys().copied()),
  }
}

pub fn diagnostic(name: &str) -> Result<Box<dyn Diagnostic>, ToasterError> {
  match DIAGNOSTICS.get(name) {
    Some(ctor) => Ok(ctor()),
    None => unknown("diagnostic", name, DIAGNOSTICS.keys().copied()),
  }
}

pub fn toa_reader(name: &str) -> Result<Box<dyn ToaReader>, ToasterError> {
  match READERS.get(name) {
    Some(ctor) => Ok(ctor()),
    None => unknown("TOA reader", name, READERS.keys().copied()),
  }
}

pub fn manipulators() -> Vec<Box<dyn Manipulator>> {
  MANIPULATORS.values().map(|ctor| ctor()).collect()
}

pub fn diagnostics() -> Vec<Box<dyn Diagnostic>> {
  DIAGNOSTICS.values().map(|ctor| ctor()).collect()
}

pub fn toa_readers() -> Vec<Box<dyn ToaReader>> {
  READERS.values().map(|ctor| ctor()).collect()
}

/// Deserializes plugin arguments into their typed form. A missing argument
/// object (`null`) means "all defaults".
pub(crate) fn typed_args<T: DeserializeOwned>(plugin: &str, args: &JsonValue) -> Result<T, ToasterError> {
  let value = if args.is_null() { JsonValue::Object(Default::default()) } else { args.clone() };
  serde_json::from_value(value).map_err(|e| ToasterError::BadInput(format!("{}: bad arguments: {}", plugin, e)))
}

pub(crate) fn canonical<T: Serialize>(typed: &T) -> Result<String, ToasterError> {
  Ok(serde_json::to_string(typed)?)
}

/// First input of a single-input manipulator.
pub(crate) fn first_input<'a>(plugin: &str, inputs: &'a [PathBuf]) -> Result<&'a Path, ToasterError> {
  inputs.first()
        .map(PathBuf::as_path)
        .ok_or_else(|| ToasterError::BadInput(format!("{}: no input archive given", plugin)))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn registries_resolve_known_names() {
    assert_eq!(manipulator("pamit").unwrap().name(), "pamit");
    assert_eq!(diagnostic("composite").unwrap().kind(), DiagnosticKind::Plot);
    assert_eq!(toa_reader("tempo2").unwrap().name(), "tempo2");
    assert_eq!(manipulators().len(), 2);
    assert_eq!(diagnostics().len(), 5);
  }

  #[test]
  fn unknown_names_list_the_alternatives() {
    let err = manipulator("fscrunch").err().unwrap();
    assert_eq!(err.kind(), "UnrecognizedValueError");
    assert!(err.to_string().contains("pamit, ddfixfreq"));
    assert!(diagnostic("nope").err().unwrap().to_string().contains("snr, maskpct, weights, profile, composite"));
  }
}
