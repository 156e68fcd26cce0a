// models.rs
//
// Rows of the catalog as seen by the rest of the pipeline. Identities are the
// integer primary keys assigned by the catalog; `New*` structs are the
// insertable halves without an id.
use chrono::NaiveDateTime;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use toaster_providers::ArchiveHeader;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pulsar {
  pub id: i64,
  pub name: String,
  pub master_parfile_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTelescope {
  pub name: String,
  pub abbrev: String,
  /// Two-letter observatory code written into `.tim` files.
  pub code: String,
  pub itrf_x: f64,
  pub itrf_y: f64,
  pub itrf_z: f64,
  pub latitude: Option<f64>,
  pub longitude: Option<f64>,
  pub datum: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Telescope {
  pub id: i64,
  #[serde(flatten)]
  pub telescope: NewTelescope,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewObsSystem {
  pub name: String,
  pub telescope_id: i64,
  pub frontend: String,
  pub backend: String,
  pub band_descriptor: Option<String>,
  pub clock: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObsSystem {
  pub id: i64,
  #[serde(flatten)]
  pub system: NewObsSystem,
}

impl ObsSystem {
  pub fn name(&self) -> &str {
    &self.system.name
  }
}

/// Location of a managed file: directory plus file name, stored separately.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredPath {
  pub filepath: String,
  pub filename: String,
}

impl StoredPath {
  pub fn from_path(path: &Path) -> Self {
    let filepath = path.parent().map(|p| p.to_string_lossy().into_owned()).unwrap_or_default();
    let filename = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    Self { filepath, filename }
  }

  pub fn path(&self) -> PathBuf {
    Path::new(&self.filepath).join(&self.filename)
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewParfile {
  pub location: StoredPath,
  pub md5: String,
  pub pulsar_id: i64,
  pub add_time: NaiveDateTime,
  pub comments: Option<String>,
  /// Recognized parameters, keyed by their upper-case parfile name.
  pub params: IndexMap<String, String>,
  /// Everything else found in the file.
  pub extra_params: IndexMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parfile {
  pub id: i64,
  #[serde(flatten)]
  pub parfile: NewParfile,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTemplate {
  pub location: StoredPath,
  pub md5: String,
  pub pulsar_id: i64,
  pub obssystem_id: i64,
  pub add_time: NaiveDateTime,
  pub comments: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
  pub id: i64,
  #[serde(flatten)]
  pub template: NewTemplate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewRawfile {
  pub location: StoredPath,
  pub md5: String,
  pub pulsar_id: i64,
  pub obssystem_id: i64,
  pub add_time: NaiveDateTime,
  pub filesize: i64,
  pub header: ArchiveHeader,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rawfile {
  pub id: i64,
  #[serde(flatten)]
  pub rawfile: NewRawfile,
}

/// The three kinds of managed file that can be moved on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileKind {
  Rawfile,
  Parfile,
  Template,
}

impl std::fmt::Display for FileKind {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(match self {
                  FileKind::Rawfile => "rawfile",
                  FileKind::Parfile => "parfile",
                  FileKind::Template => "template",
                })
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VersionStamp {
  pub pipeline_hash: String,
  /// Git hash of the wrapped library, or its version string.
  pub library_hash: String,
  pub tempo2_revision: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewProcess {
  pub rawfile_id: i64,
  pub parfile_id: i64,
  pub template_id: i64,
  pub user_name: String,
  pub manipulator: String,
  /// Canonical JSON of the manipulator arguments.
  pub manipulator_args: String,
  pub start_time: NaiveDateTime,
  pub end_time: NaiveDateTime,
  pub status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Process {
  pub id: i64,
  pub version_id: i64,
  #[serde(flatten)]
  pub process: NewProcess,
}

/// Inputs that identify "the same" TOA computation. Two processes with an
/// equal key produce conflicting TOAs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessKey {
  pub rawfile_id: i64,
  pub parfile_id: i64,
  pub template_id: i64,
  pub manipulator: String,
  pub manipulator_args: String,
}

impl NewProcess {
  pub fn key(&self) -> ProcessKey {
    ProcessKey { rawfile_id: self.rawfile_id,
                 parfile_id: self.parfile_id,
                 template_id: self.template_id,
                 manipulator: self.manipulator.clone(),
                 manipulator_args: self.manipulator_args.clone() }
  }
}

/// Foreign keys shared by every TOA of one process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToaProvenance {
  pub rawfile_id: i64,
  pub parfile_id: i64,
  pub template_id: i64,
  pub pulsar_id: i64,
  pub obssystem_id: i64,
}

/// One time of arrival as measured, independent of where it is stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToaMeasurement {
  /// MHz.
  pub freq: f64,
  pub imjd: i32,
  pub fmjd: f64,
  /// Microseconds.
  pub toa_unc_us: f64,
  pub goodness_of_fit: Option<f64>,
  pub bw: Option<f64>,
  pub length: Option<f64>,
  pub nbin: Option<i32>,
  /// Remaining `-flag value` pairs, in output order.
  pub flags: IndexMap<String, String>,
}

impl ToaMeasurement {
  pub fn mjd(&self) -> f64 {
    f64::from(self.imjd) + self.fmjd
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Toa {
  pub id: i64,
  pub process_id: i64,
  pub provenance: ToaProvenance,
  pub measurement: ToaMeasurement,
}

/// A TOA joined with the names needed to write a `.tim` line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimToa {
  pub toa_id: i64,
  pub pulsar_name: String,
  pub rawfile_name: String,
  pub obscode: String,
  pub freq: f64,
  pub imjd: i32,
  pub fmjd: f64,
  pub toa_unc_us: f64,
}

impl TimToa {
  pub fn mjd(&self) -> f64 {
    f64::from(self.imjd) + self.fmjd
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiagnosticKind {
  Float,
  Plot,
  FloatArray,
}

impl DiagnosticKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      DiagnosticKind::Float => "float",
      DiagnosticKind::Plot => "plot",
      DiagnosticKind::FloatArray => "float-array",
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DiagnosticValue {
  Float(f64),
  Plot(PathBuf),
  FloatArray(Vec<f64>),
}

impl DiagnosticValue {
  pub fn kind(&self) -> DiagnosticKind {
    match self {
      DiagnosticValue::Float(_) => DiagnosticKind::Float,
      DiagnosticValue::Plot(_) => DiagnosticKind::Plot,
      DiagnosticValue::FloatArray(_) => DiagnosticKind::FloatArray,
    }
  }
}

impl std::fmt::Display for DiagnosticValue {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      DiagnosticValue::Float(v) => write!(f, "{}", v),
      DiagnosticValue::Plot(p) => write!(f, "{}", p.display()),
      DiagnosticValue::FloatArray(vs) => {
        let parts: Vec<String> = vs.iter().map(|v| v.to_string()).collect();
        write!(f, "{}", parts.join(","))
      }
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewDiagnostic {
  pub rawfile_id: i64,
  pub plugin: String,
  pub value: DiagnosticValue,
  pub add_time: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
  pub id: i64,
  #[serde(flatten)]
  pub diagnostic: NewDiagnostic,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewUser {
  pub user_name: String,
  pub real_name: String,
  pub email: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Opinion {
  pub user_id: i64,
  pub toa_id: i64,
  pub is_bad: Option<bool>,
  pub comments: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTimfile {
  pub pulsar_id: i64,
  pub user_id: Option<i64>,
  pub version_id: i64,
  pub comments: Option<String>,
  pub add_time: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Timfile {
  pub id: i64,
  #[serde(flatten)]
  pub timfile: NewTimfile,
  pub toa_ids: Vec<i64>,
}
