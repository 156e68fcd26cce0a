// diagnostics.rs
//
// Built-in diagnostics: scalar statistics from psrstat and PNG figures from
// psrplot.
use super::Diagnostic;
use std::path::Path;
use toaster_domain::{DiagnosticKind, DiagnosticValue, ToasterError};
use toaster_providers::psrchive::{parse_float_list, parse_scalar, psrplot_command, snr_command, weights_command,
                                  PlotPanel};
use toaster_providers::{ArchiveHeader, ToolRunner};

/// Signal-to-noise ratio of the fully scrunched profile.
pub struct Snr;

impl Diagnostic for Snr {
  fn name(&self) -> &'static str {
    "snr"
  }

  fn description(&self) -> &'static str {
    "Signal-to-noise ratio of the fully scrunched profile"
  }

  fn kind(&self) -> DiagnosticKind {
    DiagnosticKind::Float
  }

  fn compute(&self, runner: &dyn ToolRunner, archive: &Path, _header: &ArchiveHeader, _plot: &Path)
             -> Result<DiagnosticValue, ToasterError> {
    let cmd = snr_command(archive);
    let out = runner.run(&cmd)?;
    Ok(DiagnosticValue::Float(parse_scalar(&cmd.display(), &out.stdout)?))
  }
}

fn read_weights(runner: &dyn ToolRunner, archive: &Path) -> Result<Vec<f64>, ToasterError> {
  let cmd = weights_command(archive);
  let out = runner.run(&cmd)?;
  Ok(parse_float_list(&cmd.display(), &out.stdout)?)
}

/// Percentage of sub-integration/channel cells with zero weight.
pub struct MaskPct;

impl Diagnostic for MaskPct {
  fn name(&self) -> &'static str {
    "maskpct"
  }

  fn description(&self) -> &'static str {
    "Percentage of sub-integration/channel cells that are masked (zero weight)"
  }

  fn kind(&self) -> DiagnosticKind {
    DiagnosticKind::Float
  }

  fn compute(&self, runner: &dyn ToolRunner, archive: &Path, _header: &ArchiveHeader, _plot: &Path)
             -> Result<DiagnosticValue, ToasterError> {
    let weights = read_weights(runner, archive)?;
    if weights.is_empty() {
      return Err(ToasterError::Toaster(format!("no weights reported for {}", archive.display())));
    }
    let masked = weights.iter().filter(|w| **w == 0.0).count();
    Ok(DiagnosticValue::Float(100.0 * masked as f64 / weights.len() as f64))
  }
}

/// Raw channel weights, sub-integration major.
pub struct Weights;

impl Diagnostic for Weights {
  fn name(&self) -> &'static str {
    "weights"
  }

  fn description(&self) -> &'static str {
    "Sub-integration/channel weights"
  }

  fn kind(&self) -> DiagnosticKind {
    DiagnosticKind::FloatArray
  }

  fn compute(&self, runner: &dyn ToolRunner, archive: &Path, _header: &ArchiveHeader, _plot: &Path)
             -> Result<DiagnosticValue, ToasterError> {
    Ok(DiagnosticValue::FloatArray(read_weights(runner, archive)?))
  }
}

fn plot(runner: &dyn ToolRunner, archive: &Path, plot_path: &Path, panels: &[PlotPanel])
        -> Result<DiagnosticValue, ToasterError> {
  runner.run(&psrplot_command(archive, plot_path, panels))?;
  if !plot_path.is_file() {
    return Err(ToasterError::File(format!("psrplot did not write {}", plot_path.display())));
  }
  Ok(DiagnosticValue::Plot(plot_path.to_path_buf()))
}

/// Scrunched pulse profile.
pub struct Profile;

impl Diagnostic for Profile {
  fn name(&self) -> &'static str {
    "profile"
  }

  fn description(&self) -> &'static str {
    "Plot of the fully scrunched pulse profile"
  }

  fn kind(&self) -> DiagnosticKind {
    DiagnosticKind::Plot
  }

  fn compute(&self, runner: &dyn ToolRunner, archive: &Path, _header: &ArchiveHeader, plot_path: &Path)
             -> Result<DiagnosticValue, ToasterError> {
    plot(runner, archive, plot_path, &[PlotPanel { kind: "flux", options: "set=pub" }])
  }
}

/// Panel arrangement of the composite figure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompositeLayout {
  /// One sub-integration and one channel: the profile alone.
  ProfileOnly,
  /// Several sub-integrations, one channel.
  NoFreq,
  /// One sub-integration, several channels.
  NoTime,
  Full,
}

impl CompositeLayout {
  pub fn select(nsub: i32, nchan: i32) -> Self {
    match (nsub > 1, nchan > 1) {
      (false, false) => CompositeLayout::ProfileOnly,
      (true, false) => CompositeLayout::NoFreq,
      (false, true) => CompositeLayout::NoTime,
      (true, true) => CompositeLayout::Full,
    }
  }

  pub fn panels(self) -> &'static [PlotPanel] {
    match self {
      CompositeLayout::ProfileOnly => &[PlotPanel { kind: "flux", options: "svp=0.1,0.9,0.15,0.9" }],
      CompositeLayout::NoFreq => &[PlotPanel { kind: "flux", options: "svp=0.1,0.9,0.65,0.9,x:unit=phase" },
                                   PlotPanel { kind: "time", options: "svp=0.1,0.9,0.15,0.65,cmap:map=plasma" }],
      CompositeLayout::NoTime => &[PlotPanel { kind: "flux", options: "svp=0.1,0.9,0.65,0.9,x:unit=phase" },
                                   PlotPanel { kind: "freq", options: "svp=0.1,0.9,0.15,0.65,cmap:map=plasma" }],
      CompositeLayout::Full => &[PlotPanel { kind: "flux", options: "svp=0.1,0.9,0.7,0.9,x:unit=phase" },
                                 PlotPanel { kind: "time", options: "svp=0.1,0.48,0.15,0.7,cmap:map=plasma" },
                                 PlotPanel { kind: "freq", options: "svp=0.52,0.9,0.15,0.7,cmap:map=plasma" }],
    }
  }
}

/// Profile plus time/frequency waterfalls, laid out from the archive shape.
pub struct Composite;

impl Diagnostic for Composite {
  fn name(&self) -> &'static str {
    "composite"
  }

  fn description(&self) -> &'static str {
    "Profile with time and frequency waterfalls where the archive has those axes"
  }

  fn kind(&self) -> DiagnosticKind {
    DiagnosticKind::Plot
  }

  fn compute(&self, runner: &dyn ToolRunner, archive: &Path, header: &ArchiveHeader, plot_path: &Path)
             -> Result<DiagnosticValue, ToasterError> {
    let layout = CompositeLayout::select(header.nsub, header.nchan);
    log::debug!("composite layout {:?} for {} (nsub {}, nchan {})", layout, archive.display(), header.nsub,
                header.nchan);
    plot(runner, archive, plot_path, layout.panels())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use toaster_providers::{StubRunner, ToolExit};

  fn header(nsub: i32, nchan: i32) -> ArchiveHeader {
    ArchiveHeader { source: "J1909-3744".into(),
                    telescope: "GBT".into(),
                    frontend: "Rcvr1_2".into(),
                    backend: "GUPPI".into(),
                    nbin: 1024,
                    nchan,
                    npol: 1,
                    nsub,
                    bw: 200.0,
                    freq: 1400.0,
                    length: 600.0,
                    mjd: 55000.0 }
  }

  #[test]
  fn layout_follows_archive_shape() {
    assert_eq!(CompositeLayout::select(1, 1), CompositeLayout::ProfileOnly);
    assert_eq!(CompositeLayout::select(4, 1), CompositeLayout::NoFreq);
    assert_eq!(CompositeLayout::select(1, 8), CompositeLayout::NoTime);
    assert_eq!(CompositeLayout::select(4, 8), CompositeLayout::Full);
  }

  #[test]
  fn maskpct_counts_zero_weights() {
    let runner = StubRunner::new().reply("psrstat", "1,0,1,1\n0,1,1,1\n");
    let v = MaskPct.compute(&runner, Path::new("a.ar"), &header(2, 4), Path::new("unused")).unwrap();
    assert_eq!(v, DiagnosticValue::Float(25.0));
  }

  #[test]
  fn composite_passes_layout_panels_to_psrplot() {
    let dir = tempfile::tempdir().unwrap();
    let png = dir.path().join("a.png");
    let runner = StubRunner::new().respond("psrplot", |cmd| {
                                    let device = cmd.get_args().iter().find(|a| a.ends_with("/PNG")).cloned();
                                    if let Some(d) = device {
                                      std::fs::write(d.trim_end_matches("/PNG"), b"png").ok();
                                    }
                                    Ok(ToolExit::default())
                                  });
    let v = Composite.compute(&runner, Path::new("a.ar"), &header(4, 8), &png).unwrap();
    assert_eq!(v, DiagnosticValue::Plot(png));
    let argv = &runner.calls()[0];
    assert_eq!(argv.iter().filter(|a| *a == "-p").count(), 3);

    let err = Composite.compute(&StubRunner::new().reply("psrplot", ""), Path::new("a.ar"), &header(1, 1),
                                &dir.path().join("missing.png"))
                       .unwrap_err();
    assert_eq!(err.kind(), "FileError");
  }
}
