// diagnose.rs
//
// Runs diagnostic plugins and stores their results against a rawfile.
use crate::plugins::Diagnostic;
use chrono::Utc;
use log::info;
use std::path::{Path, PathBuf};
use toaster_domain::{Catalog, Diagnostic as StoredDiagnostic, DiagnosticKind, DiagnosticValue, NewDiagnostic,
                     ToasterError};
use toaster_providers::psrchive::read_header;
use toaster_providers::ToolRunner;

/// Final location of a plot diagnostic: `<archive>.<plugin>.png` next to
/// the archive.
pub fn plot_path_for(archive: &Path, plugin: &str) -> PathBuf {
  let name = archive.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
  archive.with_file_name(format!("{}.{}.png", name, plugin))
}

pub struct DiagnosticRuntime<'a> {
  runner: &'a dyn ToolRunner,
}

impl<'a> DiagnosticRuntime<'a> {
  pub fn new(runner: &'a dyn ToolRunner) -> Self {
    Self { runner }
  }

  /// Computes a diagnostic for any archive, without touching the catalog.
  /// Plots are drawn into a temporary file and renamed into place once
  /// complete.
  pub fn compute(&self, diagnostic: &dyn Diagnostic, archive: &Path) -> Result<DiagnosticValue, ToasterError> {
    if !archive.is_file() {
      return Err(ToasterError::File(format!("{} does not exist", archive.display())));
    }
    let header = read_header(self.runner, archive)?;
    if diagnostic.kind() != DiagnosticKind::Plot {
      return diagnostic.compute(self.runner, archive, &header, Path::new(""));
    }

    let dir = archive.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
    let tmp = tempfile::Builder::new().prefix(".toaster-plot-")
                                      .suffix(".png")
                                      .tempfile_in(dir)
                                      .map_err(|e| ToasterError::File(format!("cannot create plot file: {}", e)))?;
    diagnostic.compute(self.runner, archive, &header, tmp.path())?;
    let dest = plot_path_for(archive, diagnostic.name());
    tmp.persist(&dest).map_err(|e| ToasterError::File(format!("cannot write {}: {}", dest.display(), e.error)))?;
    Ok(DiagnosticValue::Plot(dest))
  }

  /// Computes a diagnostic for a catalogued rawfile and stores it, replacing
  /// an earlier result of the same plugin.
  pub fn run_for_rawfile(&self, catalog: &dyn Catalog, diagnostic: &dyn Diagnostic, rawfile_id: i64)
                         -> Result<StoredDiagnostic, ToasterError> {
    let rawfile = catalog.get_rawfile(rawfile_id)?
                         .ok_or_else(|| ToasterError::UnrecognizedValue(format!("no rawfile with id {}", rawfile_id)))?;
    let value = self.compute(diagnostic, &rawfile.rawfile.location.path())?;
    info!("{} of rawfile {}: {}", diagnostic.name(), rawfile_id, value);
    let new = NewDiagnostic { rawfile_id,
                              plugin: diagnostic.name().to_string(),
                              value,
                              add_time: Utc::now().naive_utc() };
    let id = catalog.replace_diagnostic(new.clone())?;
    Ok(StoredDiagnostic { id, diagnostic: new })
  }
}
