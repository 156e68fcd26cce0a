// errors.rs
use log::warn;
use thiserror::Error;
use toaster_providers::ToolError;

/// Every failure the pipeline reports. Rendering (colour, exit code) is left
/// to the binary; this type only carries the kind and the message.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ToasterError {
  #[error("`{command}` exited with code {code}: {stderr_tail}")]
  SystemCall { command: String, code: i32, stderr_tail: String },
  #[error("{0}")]
  File(String),
  #[error("{0}")]
  Archiving(String),
  #[error("{0}")]
  UnrecognizedValue(String),
  #[error("{0}")]
  BadInput(String),
  #[error("{0}")]
  NoMaster(String),
  #[error("{0}")]
  ConflictingToas(String),
  #[error("{0}")]
  Database(String),
  #[error("{0}")]
  InconsistentDatabase(String),
  #[error("{0}")]
  Toaster(String),
}

impl ToasterError {
  /// Name of the error kind as shown to users, e.g. `BadInputError`.
  pub fn kind(&self) -> &'static str {
    match self {
      ToasterError::SystemCall { .. } => "SystemCallError",
      ToasterError::File(_) => "FileError",
      ToasterError::Archiving(_) => "ArchivingError",
      ToasterError::UnrecognizedValue(_) => "UnrecognizedValueError",
      ToasterError::BadInput(_) => "BadInputError",
      ToasterError::NoMaster(_) => "NoMasterError",
      ToasterError::ConflictingToas(_) => "ConflictingToasError",
      ToasterError::Database(_) => "DatabaseError",
      ToasterError::InconsistentDatabase(_) => "InconsistentDatabaseError",
      ToasterError::Toaster(_) => "ToasterError",
    }
  }
}

impl From<ToolError> for ToasterError {
  fn from(e: ToolError) -> Self {
    match e {
      ToolError::NonZeroExit { command, code, stderr_tail } => Self::SystemCall { command, code, stderr_tail },
      // A tool that cannot even be started is reported with the same kind,
      // without an exit status.
      ToolError::Launch { command, message } => Self::SystemCall { command, code: -1, stderr_tail: message },
      other @ ToolError::Parse { .. } => Self::Toaster(other.to_string()),
    }
  }
}

impl From<std::io::Error> for ToasterError {
  fn from(e: std::io::Error) -> Self {
    Self::File(e.to_string())
  }
}

impl From<serde_json::Error> for ToasterError {
  fn from(e: serde_json::Error) -> Self {
    Self::BadInput(format!("invalid JSON: {}", e))
  }
}

#[cfg(feature = "diesel")]
impl From<diesel::result::Error> for ToasterError {
  fn from(e: diesel::result::Error) -> Self {
    Self::Database(format!("db: {}", e))
  }
}

/// Non-fatal conditions. They are logged and processing continues.
#[derive(Debug, Clone, PartialEq)]
pub enum ToasterWarning {
  UnknownParfileKey { file: String, key: String },
  StubPulsarCreated { name: String },
  DirtyLibraryRepo { path: String },
  LibraryVersionFallback { version: String },
  DuplicateFile { path: String, existing_id: i64 },
  SourceNotRemoved { path: String, reason: String },
}

impl std::fmt::Display for ToasterWarning {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      ToasterWarning::UnknownParfileKey { file, key } => {
        write!(f, "parfile {}: parameter {} has no column, kept in extra_params", file, key)
      }
      ToasterWarning::StubPulsarCreated { name } => write!(f, "pulsar {} was not known, created a stub entry", name),
      ToasterWarning::DirtyLibraryRepo { path } => write!(f, "library repository {} has uncommitted changes", path),
      ToasterWarning::LibraryVersionFallback { version } => {
        write!(f, "library is not a git checkout, using version string {:?}", version)
      }
      ToasterWarning::DuplicateFile { path, existing_id } => {
        write!(f, "{} is already in the database (id {}), not copied", path, existing_id)
      }
      ToasterWarning::SourceNotRemoved { path, reason } => {
        write!(f, "{} was moved but the original could not be removed: {}", path, reason)
      }
    }
  }
}

impl ToasterWarning {
  pub fn emit(&self) {
    warn!("ToasterWarning: {}", self);
  }
}
