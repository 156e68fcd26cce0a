// pipeline.rs
//
// Full processing of raw archives: ingest, diagnose, generate TOAs.
use crate::context::ToasterContext;
use crate::diagnose::DiagnosticRuntime;
use crate::ingest::{Ingested, Ingestor};
use crate::plugins::{self, Diagnostic};
use crate::toa_engine::{ToaEngine, ToaOutcome, ToaRequest, DEFAULT_MANIPULATOR};
use log::{error, info};
use serde_json::Value as JsonValue;
use std::path::{Path, PathBuf};
use toaster_domain::{DiagnosticValue, ToasterError};

pub const DEFAULT_DIAGNOSTICS: [&str; 1] = ["snr"];

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOptions {
  pub diagnostics: Vec<String>,
  pub manipulator: String,
  pub manipulator_args: JsonValue,
  pub allow_conflicts: bool,
}

impl Default for PipelineOptions {
  fn default() -> Self {
    Self { diagnostics: DEFAULT_DIAGNOSTICS.iter().map(|s| s.to_string()).collect(),
           manipulator: DEFAULT_MANIPULATOR.to_string(),
           manipulator_args: JsonValue::Null,
           allow_conflicts: false }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedFile {
  pub ingested: Ingested,
  pub diagnostics: Vec<(String, DiagnosticValue)>,
  pub toas: ToaOutcome,
}

#[derive(Debug)]
pub struct FileReport {
  pub path: PathBuf,
  pub result: Result<ProcessedFile, ToasterError>,
}

#[derive(Debug, Default)]
pub struct PipelineReport {
  pub files: Vec<FileReport>,
}

impl PipelineReport {
  pub fn failures(&self) -> usize {
    self.files.iter().filter(|f| f.result.is_err()).count()
  }

  pub fn all_succeeded(&self) -> bool {
    self.failures() == 0
  }
}

pub struct Pipeline<'a> {
  ctx: &'a ToasterContext,
  options: PipelineOptions,
  scratch_root: Option<PathBuf>,
}

impl<'a> Pipeline<'a> {
  pub fn new(ctx: &'a ToasterContext, options: PipelineOptions) -> Self {
    Self { ctx, options, scratch_root: None }
  }

  pub fn with_scratch_root(mut self, root: impl Into<PathBuf>) -> Self {
    self.scratch_root = Some(root.into());
    self
  }

  /// Processes every file; a failing file is reported and the rest still
  /// run. Unknown plugin names fail before any file is touched.
  pub fn run(&self, paths: &[PathBuf]) -> Result<PipelineReport, ToasterError> {
    let diagnostics = self.options
                          .diagnostics
                          .iter()
                          .map(|name| plugins::diagnostic(name))
                          .collect::<Result<Vec<_>, _>>()?;
    let manipulator = plugins::manipulator(&self.options.manipulator)?;
    manipulator.canonical_args(&self.options.manipulator_args)?;

    let mut report = PipelineReport::default();
    for path in paths {
      let result = self.process(path, &diagnostics);
      match &result {
        Ok(done) => {
          info!("{}: rawfile {}, {} TOA(s)", path.display(), done.ingested.id(), done.toas.toa_ids.len())
        }
        Err(e) => error!("{}: {}: {}", path.display(), e.kind(), e),
      }
      report.files.push(FileReport { path: path.clone(), result });
    }
    Ok(report)
  }

  fn process(&self, path: &Path, diagnostics: &[Box<dyn Diagnostic>]) -> Result<ProcessedFile, ToasterError> {
    let ingested = Ingestor::new(self.ctx).add_rawfile(path)?;
    let rawfile_id = ingested.id();

    let runtime = DiagnosticRuntime::new(self.ctx.runner());
    let mut values = Vec::with_capacity(diagnostics.len());
    for diagnostic in diagnostics {
      let stored = runtime.run_for_rawfile(self.ctx.catalog(), diagnostic.as_ref(), rawfile_id)?;
      values.push((diagnostic.name().to_string(), stored.diagnostic.value));
    }

    let request = ToaRequest::new(rawfile_id).manipulator(self.options.manipulator.clone(),
                                                          self.options.manipulator_args.clone())
                                             .allow_conflicts(self.options.allow_conflicts);
    let mut engine = ToaEngine::new(self.ctx);
    if let Some(root) = &self.scratch_root {
      engine = engine.with_scratch_root(root);
    }
    let toas = engine.run(&request)?;
    Ok(ProcessedFile { ingested, diagnostics: values, toas })
  }
}
